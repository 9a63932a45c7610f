use std::io::Write as _;

use crate::device::{Reader, Writer};
use crate::error::Error;
use crate::format::{self, Decoder, Encoder, NullEncoding};

/// The raw format: delimiter separated fields, one row per line, no
/// quoting. The default delimiter is tab and by default there is no header
/// on either side.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConfig {
    pub strict: bool,
    pub delim: char,
    pub crlf: bool,
    pub null: NullEncoding,
    pub header: bool,
}

impl Default for RawConfig {
    fn default() -> RawConfig {
        RawConfig {
            strict: false,
            delim: '\t',
            crlf: cfg!(windows),
            null: NullEncoding::default(),
            header: false,
        }
    }
}

pub struct RawDecoder {
    cfg: RawConfig,
    input: Option<Box<dyn Reader>>,
    hdr: Vec<String>,
    nm: String,
    lno: usize,
    resumed: bool,
}

impl RawDecoder {
    pub fn new(cfg: RawConfig, input: Box<dyn Reader>) -> RawDecoder {
        let nm = input.name().to_string();
        RawDecoder {
            cfg,
            input: Some(input),
            hdr: vec![],
            nm,
            lno: 0,
            resumed: false,
        }
    }

    fn ctx(&self) -> String {
        format!("{}:{}", self.nm, self.lno + 1)
    }

    fn read_line(&mut self) -> Result<Option<String>, Error> {
        let ctx = self.ctx();
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| Error::internal("no input device on decoder"))?;
        let mut buf = Vec::new();
        let n = input
            .read_until(b'\n', &mut buf)
            .map_err(|e| Error::system(format!("{}: {}", ctx, e)))?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if self.cfg.crlf && buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        self.lno += 1;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn read_fields(&mut self) -> Result<Option<Vec<String>>, Error> {
        let delim = self.cfg.delim;
        Ok(self
            .read_line()?
            .map(|l| l.split(delim).map(String::from).collect()))
    }
}

impl Decoder for RawDecoder {
    fn name(&self) -> &'static str {
        "RAW"
    }

    fn read_header(
        &mut self,
        _frame: Option<&str>,
        declared: &[String],
    ) -> Result<Vec<String>, Error> {
        if self.resumed || !self.cfg.header {
            if declared.is_empty() {
                return Err(format::no_header());
            }
            self.hdr = declared.to_vec();
            return Ok(self.hdr.clone());
        }
        let Some(fields) = self.read_fields()? else {
            return Err(format::no_header());
        };
        if self.cfg.strict && !declared.is_empty() && fields.len() != declared.len() {
            return Err(format::dim_err(&self.ctx(), declared.len(), fields.len()));
        }
        self.hdr = if declared.is_empty() {
            fields
        } else {
            declared.to_vec()
        };
        Ok(self.hdr.clone())
    }

    fn skip(&mut self, rows: i64) -> Result<(), Error> {
        for _ in 0..rows {
            if self.read_fields()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn read_row(&mut self) -> Result<Option<Vec<Option<String>>>, Error> {
        let Some(mut fields) = self.read_fields()? else {
            return Ok(None);
        };
        if self.cfg.strict && fields.len() != self.hdr.len() {
            return Err(format::dim_err(&self.ctx(), self.hdr.len(), fields.len()));
        }
        fields.truncate(self.hdr.len());
        let mut row: Vec<Option<String>> = fields
            .into_iter()
            .map(|f| self.cfg.null.encode(f))
            .collect();
        while row.len() < self.hdr.len() {
            row.push(None);
        }
        Ok(Some(row))
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.hdr.clear();
        self.resumed = true;
        Ok(())
    }

    fn swap_input(&mut self, input: Box<dyn Reader>) -> Result<Box<dyn Reader>, Error> {
        let old = self.take_input()?;
        self.nm = input.name().to_string();
        self.lno = 0;
        self.resumed = false;
        self.hdr.clear();
        self.input = Some(input);
        Ok(old)
    }

    fn take_input(&mut self) -> Result<Box<dyn Reader>, Error> {
        self.input
            .take()
            .ok_or_else(|| Error::internal("decoder has no input device to give up"))
    }
}

pub struct RawEncoder {
    cfg: RawConfig,
    out: Option<Box<dyn Writer>>,
    nm: String,
    lno: usize,
}

impl RawEncoder {
    pub fn new(cfg: RawConfig, out: Box<dyn Writer>) -> RawEncoder {
        let nm = out.name().to_string();
        RawEncoder {
            cfg,
            out: Some(out),
            nm,
            lno: 0,
        }
    }

    fn eol(&self) -> &'static str {
        if self.cfg.crlf { "\r\n" } else { "\n" }
    }

    fn write(&mut self, line: &str) -> Result<(), Error> {
        let ctx = format!("{}:{}", self.nm, self.lno + 1);
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| Error::internal("no output device on encoder"))?;
        out.write_all(line.as_bytes())
            .map_err(|e| Error::system(format!("{}: {}", ctx, e)))?;
        self.lno += 1;
        Ok(())
    }
}

impl Encoder for RawEncoder {
    fn name(&self) -> &'static str {
        "RAW"
    }

    fn write_header(&mut self, _frame: Option<&str>, header: &[String]) -> Result<(), Error> {
        if !self.cfg.header {
            return Ok(());
        }
        let line = format!("{}{}", header.join(&self.cfg.delim.to_string()), self.eol());
        self.write(&line)
    }

    fn write_row(&mut self, row: &[Option<String>]) -> Result<(), Error> {
        let fields: Vec<&str> = row
            .iter()
            .map(|v| self.cfg.null.decode(v.as_deref()))
            .collect();
        let line = format!("{}{}", fields.join(&self.cfg.delim.to_string()), self.eol());
        self.write(&line)
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), Error> {
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(out) = self.out.as_mut() {
            out.cancel();
        }
    }

    fn swap_output(&mut self, out: Box<dyn Writer>) -> Result<Box<dyn Writer>, Error> {
        let old = self.take_output()?;
        self.nm = out.name().to_string();
        self.lno = 0;
        self.out = Some(out);
        Ok(old)
    }

    fn take_output(&mut self) -> Result<Box<dyn Writer>, Error> {
        self.out
            .take()
            .ok_or_else(|| Error::internal("encoder has no output device to give up"))
    }
}
