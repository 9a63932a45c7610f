use crate::device::{Reader, Writer};
use crate::error::Error;
use crate::format::{self, Decoder, Encoder, NullEncoding};

/// CSV per RFC 4180 as implemented by the csv crate. The default delimiter
/// is a comma and the input is expected to carry a header.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvConfig {
    pub strict: bool,
    pub delim: u8,
    pub crlf: bool,
    pub null: NullEncoding,
    pub header: bool,
}

impl Default for CsvConfig {
    fn default() -> CsvConfig {
        CsvConfig {
            strict: false,
            delim: b',',
            crlf: cfg!(windows),
            null: NullEncoding::default(),
            header: true,
        }
    }
}

enum Input {
    Idle(Box<dyn Reader>),
    Open(csv::Reader<Box<dyn Reader>>),
    Gone,
}

pub struct CsvDecoder {
    cfg: CsvConfig,
    state: Input,
    hdr: Vec<String>,
    nm: String,
    lno: usize,
    resumed: bool,
}

impl CsvDecoder {
    pub fn new(cfg: CsvConfig, input: Box<dyn Reader>) -> CsvDecoder {
        let nm = input.name().to_string();
        CsvDecoder {
            cfg,
            state: Input::Idle(input),
            hdr: vec![],
            nm,
            lno: 0,
            resumed: false,
        }
    }

    fn ctx(&self) -> String {
        format!("{}:{}", self.nm, self.lno + 1)
    }

    /// Header handling is ours, so the csv reader runs headerless and
    /// flexible; strictness is enforced against the merged header.
    fn read_record(&mut self) -> Result<Option<Vec<String>>, Error> {
        if let Input::Idle(_) = self.state {
            let Input::Idle(r) = std::mem::replace(&mut self.state, Input::Gone) else {
                unreachable!()
            };
            let rdr = csv::ReaderBuilder::new()
                .delimiter(self.cfg.delim)
                .has_headers(false)
                .flexible(true)
                .from_reader(r);
            self.state = Input::Open(rdr);
        }
        let ctx = self.ctx();
        let Input::Open(rdr) = &mut self.state else {
            return Err(Error::internal("no input device on decoder"));
        };
        let mut rec = csv::StringRecord::new();
        match rdr.read_record(&mut rec) {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.lno += 1;
                Ok(Some(rec.iter().map(String::from).collect()))
            }
            Err(e) => Err(Error::runtime(format!("{}: {}", ctx, e))),
        }
    }
}

impl Decoder for CsvDecoder {
    fn name(&self) -> &'static str {
        "CSV"
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
        let Some(fields) = self.read_record()? else {
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
            if self.read_record()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn read_row(&mut self) -> Result<Option<Vec<Option<String>>>, Error> {
        let Some(mut fields) = self.read_record()? else {
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
        self.state = Input::Idle(input);
        Ok(old)
    }

    fn take_input(&mut self) -> Result<Box<dyn Reader>, Error> {
        match std::mem::replace(&mut self.state, Input::Gone) {
            Input::Idle(r) => Ok(r),
            Input::Open(rdr) => Ok(rdr.into_inner()),
            Input::Gone => Err(Error::internal("decoder has no input device to give up")),
        }
    }
}

enum Output {
    Idle(Box<dyn Writer>),
    Open(csv::Writer<Box<dyn Writer>>),
    Gone,
}

pub struct CsvEncoder {
    cfg: CsvConfig,
    state: Output,
    nm: String,
}

impl CsvEncoder {
    pub fn new(cfg: CsvConfig, out: Box<dyn Writer>) -> CsvEncoder {
        let nm = out.name().to_string();
        CsvEncoder {
            cfg,
            state: Output::Idle(out),
            nm,
        }
    }

    fn open(&mut self) -> Result<&mut csv::Writer<Box<dyn Writer>>, Error> {
        if let Output::Idle(_) = self.state {
            let Output::Idle(w) = std::mem::replace(&mut self.state, Output::Gone) else {
                unreachable!()
            };
            let term = if self.cfg.crlf {
                csv::Terminator::CRLF
            } else {
                csv::Terminator::Any(b'\n')
            };
            let wtr = csv::WriterBuilder::new()
                .delimiter(self.cfg.delim)
                .terminator(term)
                .from_writer(w);
            self.state = Output::Open(wtr);
        }
        match &mut self.state {
            Output::Open(w) => Ok(w),
            _ => Err(Error::internal("no output device on encoder")),
        }
    }
}

impl Encoder for CsvEncoder {
    fn name(&self) -> &'static str {
        "CSV"
    }

    fn write_header(&mut self, _frame: Option<&str>, header: &[String]) -> Result<(), Error> {
        if !self.cfg.header {
            // the writer still opens so rows go somewhere
            self.open()?;
            return Ok(());
        }
        let nm = self.nm.clone();
        let w = self.open()?;
        w.write_record(header)
            .map_err(|e| Error::runtime(format!("{}: {}", nm, e)))
    }

    fn write_row(&mut self, row: &[Option<String>]) -> Result<(), Error> {
        let nm = self.nm.clone();
        let fields: Vec<String> = row
            .iter()
            .map(|v| self.cfg.null.decode(v.as_deref()).to_string())
            .collect();
        let w = self.open()?;
        w.write_record(&fields)
            .map_err(|e| Error::runtime(format!("{}: {}", nm, e)))
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), Error> {
        if let Output::Open(w) = &mut self.state {
            w.flush()
                .map_err(|e| Error::system(format!("{}: {}", self.nm, e)))?;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        match std::mem::replace(&mut self.state, Output::Gone) {
            Output::Idle(mut w) => {
                w.cancel();
                self.state = Output::Idle(w);
            }
            Output::Open(w) => match w.into_inner() {
                Ok(mut w) => {
                    w.cancel();
                    self.state = Output::Idle(w);
                }
                Err(_) => {}
            },
            Output::Gone => {}
        }
    }

    fn swap_output(&mut self, out: Box<dyn Writer>) -> Result<Box<dyn Writer>, Error> {
        let old = self.take_output()?;
        self.nm = out.name().to_string();
        self.state = Output::Idle(out);
        Ok(old)
    }

    fn take_output(&mut self) -> Result<Box<dyn Writer>, Error> {
        match std::mem::replace(&mut self.state, Output::Gone) {
            Output::Idle(w) => Ok(w),
            Output::Open(w) => w
                .into_inner()
                .map_err(|e| Error::system(format!("{}: {}", self.nm, e))),
            Output::Gone => Err(Error::internal("encoder has no output device to give up")),
        }
    }
}
