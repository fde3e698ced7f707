//! Text file formats.
//!
//! * Points files: one `TS TU UR` reading per line, separated by commas
//!   and/or whitespace, `#` comments allowed.
//! * Constants files: `NAME = value` lines preceded by `#` comment headers.

mod constants;
mod points;

pub use constants::{ConstantsFile, CONSTANT_PRECISION};
pub use points::{load_points, parse_points, LoadedPoints, SkippedLine};

type ParseError<'a> = nom::error::Error<&'a str>;
