//! Shared helpers for the whitespace-delimited FLO-2D output formats.

use chrono::{Duration, NaiveDateTime};
use std::fmt;
use std::io::{self, BufRead};

/// Timestamp format of time-series results: "YYYY-MM-DD HH:MM:SS"
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format used in raster file names: "YYYY-MM-DD_HH-MM-SS"
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Formats accepted when a timestamp is supplied on the command line or in a
/// run configuration file.
const INPUT_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// Why a single data row was rejected.
///
/// Row defects are recovered where they occur: the row (or the one value) is
/// skipped and the scan carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDefect {
    /// The row has no token at the required column
    MissingField { column: usize },
    /// The token at the column is not a number
    NotNumeric { column: usize, token: String },
    /// The simulator wrote its NaN sentinel in place of a value
    NanSentinel { column: usize },
}

impl fmt::Display for RowDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowDefect::MissingField { column } => write!(f, "no field at column {}", column),
            RowDefect::NotNumeric { column, token } => {
                write!(f, "non-numeric field {:?} at column {}", token, column)
            }
            RowDefect::NanSentinel { column } => write!(f, "NaN at column {}", column),
        }
    }
}

/// Parse a finite number, rejecting `NaN` and infinities.
pub fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read the value at `column` of an already tokenised row.
pub fn value_at(tokens: &[&str], column: usize) -> Result<f64, RowDefect> {
    let token = tokens
        .get(column)
        .ok_or(RowDefect::MissingField { column })?;
    if token.eq_ignore_ascii_case("nan") {
        return Err(RowDefect::NanSentinel { column });
    }
    parse_number(token).ok_or_else(|| RowDefect::NotNumeric {
        column,
        token: token.to_string(),
    })
}

/// Convert elapsed model hours into an absolute timestamp.
///
/// Resolution is one microsecond. Returns `None` on overflow.
pub fn model_time(base_time: NaiveDateTime, hours: f64) -> Option<NaiveDateTime> {
    let micros = (hours * MICROS_PER_HOUR).round();
    if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
        return None;
    }
    base_time.checked_add_signed(Duration::microseconds(micros as i64))
}

/// Parse a user supplied timestamp such as `2020-01-01 00:00:00` or `2020-01-01T00:00`.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    INPUT_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Sequential line reader over simulator output.
///
/// Invalid UTF-8 is replaced rather than rejected; the simulator occasionally
/// writes stray bytes into long logs.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        LineReader {
            reader,
            buf: Vec::with_capacity(256),
            line_no: 0,
        }
    }

    /// Next line without its terminator, or `None` at EOF.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// 1-based number of the line most recently returned
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}
