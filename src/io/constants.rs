//! Calibrated constants file.
//!
//! ```text
//! # Calibrated constants: Log-linear
//! # Formula: UR = 100 * exp(a + b*(TS-TU))
//!
//! a = -0.2000000000
//! b = -0.0600000000
//! ```

use super::ParseError;
use crate::error::{PsyCalError, Result};
use crate::models::REFERENCE_TEMPERATURE_KEY;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, space0},
    combinator::recognize,
    multi::many0,
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Decimal places written for fitted constants.
pub const CONSTANT_PRECISION: usize = 10;

/// Decimal places written for the reference temperature.
const REFERENCE_TEMPERATURE_PRECISION: usize = 2;

/// Named constants with free-form comment header lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantsFile {
    comments: Vec<String>,
    entries: Vec<(String, f64)>,
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1::<&str, ParseError>, tag::<&str, &str, ParseError>("_"))),
        many0(alt((alphanumeric1::<&str, ParseError>, tag::<&str, &str, ParseError>("_")))),
    ))
    .parse(input)
}

fn assignment(input: &str) -> IResult<&str, (&str, f64)> {
    let (input, name) = preceded(space0::<&str, ParseError>, identifier).parse(input)?;
    let (input, _) = delimited(
        space0::<&str, ParseError>,
        char::<&str, ParseError>('='),
        space0::<&str, ParseError>,
    )
    .parse(input)?;
    let (input, value) = double::<&str, ParseError>(input)?;
    let (input, _) = space0::<&str, ParseError>(input)?;
    Ok((input, (name, value)))
}

impl ConstantsFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header comment (without the leading `#`).
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    pub fn push_comment(&mut self, comment: impl Into<String>) {
        self.comments.push(comment.into());
    }

    /// Set a constant, replacing an existing entry of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, value)| value)
    }

    /// Like [`get`](Self::get) but fails with `MissingConstant`.
    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| PsyCalError::MissingConstant(name.to_string()))
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a constants file.
    ///
    /// `#` lines become comments, `NAME = value` lines become entries (the last
    /// assignment of a name wins) and any other line is ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut constants = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                constants.push_comment(comment.strip_prefix(' ').unwrap_or(comment));
                continue;
            }
            match assignment(line) {
                Ok(("", (name, value))) => {
                    if !value.is_finite() {
                        return Err(PsyCalError::ParseError {
                            line: index + 1,
                            message: format!("constant {} is not finite", name),
                        });
                    }
                    constants.insert(name, value);
                }
                _ => debug!(line = index + 1, "ignoring non-assignment line"),
            }
        }
        Ok(constants)
    }

    /// Read and parse a constants file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Render in the on-disk format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str("# ");
            out.push_str(comment);
            out.push('\n');
        }
        if !self.comments.is_empty() {
            out.push('\n');
        }
        for (name, value) in &self.entries {
            let precision = if name == REFERENCE_TEMPERATURE_KEY {
                REFERENCE_TEMPERATURE_PRECISION
            } else {
                CONSTANT_PRECISION
            };
            out.push_str(&format!("{} = {:.*}\n", name, precision, value));
        }
        out
    }

    /// Write the rendered file to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

impl FromStr for ConstantsFile {
    type Err = PsyCalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConstantsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_render_format() {
        let mut constants = ConstantsFile::new().with_comment("Calibrated constants");
        constants.insert("a", -0.2);
        constants.insert("b", 1.0 / 3.0);
        constants.insert("T_ref", 55.0);
        assert_eq!(
            constants.render(),
            "# Calibrated constants\n\na = -0.2000000000\nb = 0.3333333333\nT_ref = 55.00\n"
        );
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        let text = "# Formula: UR = 100 * exp(a + b*(TS-TU))\n\
                    a = -0.25\n\
                    b=0.125\n\
                    1     30.000000  20.000000  45.000000\n\
                    a = -0.3\n";
        let constants = ConstantsFile::parse(text).unwrap();
        assert_eq!(constants.comments(), &["Formula: UR = 100 * exp(a + b*(TS-TU))".to_string()]);
        assert_eq!(constants.len(), 2);
        assert_relative_eq!(constants.require("a").unwrap(), -0.3);
        assert_relative_eq!(constants.require("b").unwrap(), 0.125);
        assert!(matches!(
            constants.require("K"),
            Err(PsyCalError::MissingConstant(_))
        ));
    }

    #[test]
    fn test_render_then_parse_keeps_precision() {
        let mut constants = ConstantsFile::new().with_comment("Method: trf");
        constants.insert("A", 6.1121234567891);
        constants.insert("C", 242.5);
        let parsed: ConstantsFile = constants.render().parse().unwrap();
        assert_relative_eq!(parsed.get("A").unwrap(), 6.1121234568, epsilon = 1e-12);
        assert_relative_eq!(parsed.get("C").unwrap(), 242.5);
        assert_eq!(parsed.comments(), constants.comments());
    }

    #[test]
    fn test_non_finite_constant_rejected() {
        let result = ConstantsFile::parse("K = inf\n");
        assert!(matches!(result, Err(PsyCalError::ParseError { line: 1, .. })));
    }
}
