use crate::device::{Reader, Writer};
use crate::error::Error;
use crate::parser::nodes::LineEnding;

pub mod csv;
pub mod raw;

/// Protocol for a format being imported. For each table, `read_header` is
/// called once, `read_row` until it returns None, then `reset`. The decoder
/// owns the input device; device and codec switches hand it over through
/// `swap_input`/`take_input`.
pub trait Decoder {
    fn name(&self) -> &'static str;

    /// Derive the header, merging a declared one: a non-empty declared
    /// header wins (its length is checked in strict mode), the decoder's
    /// own header is adopted when none was declared, and when neither side
    /// has one the no-header error is returned.
    fn read_header(
        &mut self,
        frame: Option<&str>,
        declared: &[String],
    ) -> Result<Vec<String>, Error>;

    /// Skip rows; running past end-of-input is not an error.
    fn skip(&mut self, rows: i64) -> Result<(), Error>;

    fn read_row(&mut self) -> Result<Option<Vec<Option<String>>>, Error>;

    /// Called after an import so the decoder can be reused on the same
    /// device.
    fn reset(&mut self) -> Result<(), Error>;

    fn swap_input(&mut self, input: Box<dyn Reader>) -> Result<Box<dyn Reader>, Error>;

    fn take_input(&mut self) -> Result<Box<dyn Reader>, Error>;
}

/// Protocol for a format being exported: `write_header` once, `write_row`
/// repeatedly, `reset` after each table, `flush` before the device is
/// inspected or closed.
pub trait Encoder {
    fn name(&self) -> &'static str;

    fn write_header(&mut self, frame: Option<&str>, header: &[String]) -> Result<(), Error>;

    fn write_row(&mut self, row: &[Option<String>]) -> Result<(), Error>;

    fn reset(&mut self) -> Result<(), Error>;

    fn flush(&mut self) -> Result<(), Error>;

    /// Discard the pending output device rename, keeping the target file
    /// untouched.
    fn cancel(&mut self);

    fn swap_output(&mut self, out: Box<dyn Writer>) -> Result<Box<dyn Writer>, Error>;

    fn take_output(&mut self) -> Result<Box<dyn Writer>, Error>;
}

/// How SQL NULL is spelled in text for formats without a native null. The
/// empty encoding maps nothing: absent values decode to the empty string
/// and no input string encodes to NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NullEncoding(String);

impl NullEncoding {
    pub fn new(s: impl Into<String>) -> NullEncoding {
        NullEncoding(s.into())
    }

    pub fn encode(&self, s: String) -> Option<String> {
        if !self.0.is_empty() && s == self.0 {
            None
        } else {
            Some(s)
        }
    }

    pub fn decode<'a>(&'a self, v: Option<&'a str>) -> &'a str {
        v.unwrap_or(&self.0)
    }
}

/// Platform line ending resolution: DEFAULT is CRLF on Windows, LF
/// everywhere else.
pub fn use_crlf(eol: LineEnding) -> bool {
    match eol {
        LineEnding::Crlf => true,
        LineEnding::Lf => false,
        LineEnding::Default => cfg!(windows),
    }
}

pub fn no_header() -> Error {
    Error::runtime("column names cannot be derived")
}

pub fn dim_err(ctx: &str, expected: usize, got: usize) -> Error {
    Error::runtime(format!(
        "{}: expected {} columns but got {}",
        ctx, expected, got
    ))
}
