//! Calibration points file parser.

use super::ParseError;
use crate::dataset::{CalibrationPoint, PointDataset};
use crate::error::{PsyCalError, Result};
use nom::{
    bytes::complete::{take_till1, take_while1},
    combinator::{all_consuming, opt},
    multi::separated_list1,
    number::complete::double,
    sequence::preceded,
    IResult, Parser,
};
use std::path::Path;
use tracing::{debug, info, warn};

/// A line that could not be turned into a calibration point.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    /// 1-based line number
    pub line: usize,
    pub content: String,
    pub reason: String,
}

/// Result of reading a points file.
#[derive(Debug, Clone)]
pub struct LoadedPoints {
    pub dataset: PointDataset,
    pub skipped: Vec<SkippedLine>,
}

fn is_separator(c: char) -> bool {
    c == ',' || c == ' ' || c == '\t'
}

/// Any run of commas and blanks.
fn separator(input: &str) -> IResult<&str, &str> {
    take_while1::<_, &str, ParseError>(is_separator).parse(input)
}

fn field(input: &str) -> IResult<&str, &str> {
    take_till1::<_, &str, ParseError>(is_separator).parse(input)
}

fn fields(input: &str) -> IResult<&str, Vec<&str>> {
    preceded(opt(separator), separated_list1(separator, field)).parse(input)
}

/// A field that is a number from start to end.
fn number(field: &str) -> Option<f64> {
    all_consuming(double::<&str, ParseError>)
        .parse(field)
        .ok()
        .map(|(_, value)| value)
}

/// Parse a single data line into a point.
fn parse_line(line: &str) -> std::result::Result<CalibrationPoint, String> {
    let (_, fields) = fields(line).map_err(|_| "not a numeric row".to_string())?;
    if fields.len() < 3 {
        return Err(format!("expected 3 values (TS, TU, UR), found {}", fields.len()));
    }
    let mut values = [0.0; 3];
    for (slot, field) in values.iter_mut().zip(fields.iter()) {
        *slot = number(field).ok_or_else(|| format!("not a number: {:?}", field))?;
    }
    if fields.len() > 3 {
        debug!(extra = fields.len() - 3, "ignoring fields beyond UR");
    }
    let point = CalibrationPoint::new(values[0], values[1], values[2]);
    if !(point.ts.is_finite() && point.tu.is_finite() && point.ur.is_finite()) {
        return Err("non-finite value".to_string());
    }
    Ok(point)
}

fn parse_points_from(text: &str, source: &str) -> Result<LoadedPoints> {
    let mut points = Vec::new();
    let mut skipped = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(point) => points.push(point),
            Err(reason) => {
                warn!(source, line = index + 1, %reason, "skipping malformed line");
                skipped.push(SkippedLine {
                    line: index + 1,
                    content: line.to_string(),
                    reason,
                });
            }
        }
    }

    if points.is_empty() {
        return Err(PsyCalError::NoValidPoints(source.to_string()));
    }

    let dataset = PointDataset::new(points)?;
    info!(
        source,
        points = dataset.len(),
        skipped = skipped.len(),
        "loaded calibration points"
    );
    Ok(LoadedPoints { dataset, skipped })
}

/// Parse calibration points from text.
///
/// Fields are separated by any run of commas and blanks. Blank lines and
/// lines starting with `#` are ignored. Lines whose first three fields are
/// not all numbers are skipped and reported in [`LoadedPoints::skipped`].
/// Fields beyond the third are ignored.
///
/// ```
/// use psycal_rs::io::parse_points;
///
/// let loaded = parse_points("# TS TU UR\n30, 20, 45\n35 25 50\nbad line\n").unwrap();
/// assert_eq!(loaded.dataset.len(), 2);
/// assert_eq!(loaded.skipped.len(), 1);
/// ```
pub fn parse_points(text: &str) -> Result<LoadedPoints> {
    parse_points_from(text, "input")
}

/// Read and parse a calibration points file.
pub fn load_points<P: AsRef<Path>>(path: P) -> Result<LoadedPoints> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    parse_points_from(&text, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators() {
        let loaded = parse_points("30,20,45\n35 , 25 ,50\n40\t28\t48\n  45 30 52  \n").unwrap();
        let dataset = loaded.dataset;
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.points()[1], CalibrationPoint::new(35.0, 25.0, 50.0));
        assert_eq!(dataset.points()[2], CalibrationPoint::new(40.0, 28.0, 48.0));
        assert_eq!(dataset.points()[3], CalibrationPoint::new(45.0, 30.0, 52.0));
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_repeated_separators_collapse() {
        let loaded = parse_points("35,,25,50\n,30 ,, 20\t,45,\n").unwrap();
        assert!(loaded.skipped.is_empty());
        assert_eq!(loaded.dataset.points()[0], CalibrationPoint::new(35.0, 25.0, 50.0));
        assert_eq!(loaded.dataset.points()[1], CalibrationPoint::new(30.0, 20.0, 45.0));
    }

    #[test]
    fn test_number_running_into_text_is_rejected() {
        let loaded = parse_points("30 20 45abc\n30 20x 45\n35 25 50\n").unwrap();
        assert_eq!(loaded.dataset.len(), 1);
        assert_eq!(loaded.dataset.points()[0], CalibrationPoint::new(35.0, 25.0, 50.0));
        let lines: Vec<usize> = loaded.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2]);
        assert!(loaded.skipped[0].reason.contains("45abc"));
        assert!(loaded.skipped[1].reason.contains("20x"));
    }

    #[test]
    fn test_malformed_lines_are_reported() {
        let text = "TS TU UR\n30 20\n30 20 45\n-5.5e0 -7 80.25 extra\n1 2 nan\n";
        let loaded = parse_points(text).unwrap();
        assert_eq!(loaded.dataset.len(), 2);
        assert_eq!(loaded.dataset.points()[1], CalibrationPoint::new(-5.5, -7.0, 80.25));

        let lines: Vec<usize> = loaded.skipped.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2, 5]);
        assert!(loaded.skipped[1].reason.contains("found 2"));
    }

    #[test]
    fn test_no_valid_points() {
        let result = parse_points("# only a comment\n\nfoo bar baz\n");
        assert!(matches!(result, Err(PsyCalError::NoValidPoints(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_points("/definitely/not/here/points.txt");
        assert!(matches!(result, Err(PsyCalError::IoError(_))));
    }
}
