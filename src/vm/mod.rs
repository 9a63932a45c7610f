use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::{self, FileReader, FileWriter, Reader, Writer};
use crate::driver::Conn;
use crate::error::Error;
use crate::format::csv::{CsvConfig, CsvDecoder, CsvEncoder};
use crate::format::raw::{RawConfig, RawDecoder, RawEncoder};
use crate::format::{Decoder, Encoder, NullEncoding, use_crlf};
use crate::savepoint::Stack;
use crate::types::{self, Pos};

pub mod instruction;
pub mod sysdb;
mod tests;

use instruction::{Arg, FormatSpec, ImportSpec, InsertSpec, Instruction};

/// The internal savepoint. Its digital name is reserved, so scripts cannot
/// collide with it, and same-name nesting stacks the way SQLite stacks
/// savepoints.
const SAVEPOINT: &str = "SAVEPOINT [1]";
const RELEASE: &str = "RELEASE SAVEPOINT [1]";
const ROLLBACK_TO: &str = "ROLLBACK TO SAVEPOINT [1]";

/// Execution context for one compiled program: the connection, the codecs
/// (each owning its device), the transactional model and the last recorded
/// script position for error wrapping.
pub struct Machine {
    file: String,
    conn: Conn,
    decoder: Box<dyn Decoder>,
    encoder: Box<dyn Encoder>,
    eframe: Option<String>,
    stack: Stack,
    internal: usize,
    last: Pos,
    cancel: Arc<AtomicBool>,
}

impl Machine {
    pub fn new(
        file: &str,
        db: Option<&str>,
        args: &[String],
        cancel: Arc<AtomicBool>,
    ) -> Result<Machine, Error> {
        Machine::with_io(
            file,
            db,
            args,
            cancel,
            Box::new(device::stdin()),
            Box::new(device::stdout()),
        )
    }

    /// Like `new` with explicit initial devices. The initial decoder is
    /// CSV over the input, the initial encoder headerless tab-delimited
    /// raw over the output.
    pub fn with_io(
        file: &str,
        db: Option<&str>,
        args: &[String],
        cancel: Arc<AtomicBool>,
        input: Box<dyn Reader>,
        output: Box<dyn Writer>,
    ) -> Result<Machine, Error> {
        let conn = Conn::open(db)?;
        sysdb::attach(&conn, args)?;
        Ok(Machine {
            file: file.to_string(),
            conn,
            decoder: Box::new(CsvDecoder::new(CsvConfig::default(), input)),
            encoder: Box::new(RawEncoder::new(RawConfig::default(), output)),
            eframe: None,
            stack: Stack::new(),
            internal: 0,
            last: Pos::default(),
            cancel,
        })
    }

    /// Execute the program. On the first failing instruction any open
    /// transaction or savepoint is rolled back, a pending file writer is
    /// cancelled, and the error comes back wrapped with the last recorded
    /// script position.
    pub fn run(&mut self, prog: &[Instruction]) -> Result<(), Error> {
        for inst in prog {
            if let Err(e) = self.step(inst) {
                let e = e.at(&self.file, self.last);
                if self.stack.open() || self.internal > 0 {
                    let _ = self.conn.exec("ROLLBACK");
                    self.stack.clear();
                    self.internal = 0;
                }
                self.encoder.cancel();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Flush and release everything. Close errors are collected so none of
    /// them can mask an earlier run error.
    pub fn close(mut self) -> Vec<Error> {
        let mut errs = vec![];
        if let Err(e) = self.encoder.flush() {
            errs.push(e);
        }
        match self.encoder.take_output() {
            Ok(mut w) => {
                if let Err(e) = w.close() {
                    errs.push(e);
                }
            }
            Err(e) => errs.push(e),
        }
        match self.decoder.take_input() {
            Ok(mut r) => {
                if let Err(e) = r.close() {
                    errs.push(e);
                }
            }
            Err(e) => errs.push(e),
        }
        if let Err(e) = self.conn.close() {
            errs.push(e);
        }
        errs
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Conn {
        &self.conn
    }

    fn interrupted(&self) -> Result<(), Error> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::system("interrupted"));
        }
        Ok(())
    }

    fn step(&mut self, inst: &Instruction) -> Result<(), Error> {
        self.interrupted()?;
        match inst {
            Instruction::ErrPos(p) => {
                self.last = *p;
                Ok(())
            }

            Instruction::UseStdin => self.set_input(Box::new(device::stdin())),
            Instruction::UseStdout => self.set_output(Box::new(device::stdout())),
            Instruction::UseFileInput(a) => {
                let name = self.resolve_str(a, "an input filename")?;
                self.set_input(Box::new(FileReader::open(&name)?))
            }
            Instruction::UseFileOutput(a) => {
                let name = self.resolve_str(a, "an output filename")?;
                self.set_output(Box::new(FileWriter::create(&name)?))
            }

            Instruction::SetDecoder(spec) => {
                let input = self.decoder.take_input()?;
                let d = self.build_decoder(spec, input)?;
                self.decoder = d;
                Ok(())
            }
            Instruction::SetEncoder(spec) => {
                self.encoder.flush()?;
                let out = self.encoder.take_output()?;
                let e = self.build_encoder(spec, out)?;
                self.encoder = e;
                Ok(())
            }
            Instruction::SetEncodingFrame(f) => {
                self.eframe = f.clone();
                Ok(())
            }

            Instruction::Savepoint => {
                self.internal += 1;
                self.conn.exec(SAVEPOINT)
            }
            Instruction::Release => {
                if self.internal == 0 {
                    return Err(Error::internal("savepoint release without a savepoint"));
                }
                self.internal -= 1;
                self.conn.exec(RELEASE)
            }

            Instruction::Begin(sql) => {
                self.stack.begin().map_err(Error::internal)?;
                self.conn.exec(sql)
            }
            Instruction::Commit(sql) => {
                self.stack.end().map_err(Error::internal)?;
                self.conn.exec(sql)
            }
            Instruction::UserSavepoint { name, sql } => {
                self.stack.savepoint(name);
                self.conn.exec(sql)
            }
            Instruction::UserRelease { name, sql } => {
                self.stack.release(name).map_err(Error::internal)?;
                self.conn.exec(sql)
            }

            Instruction::Exec(sql) => self.conn.exec(sql),
            Instruction::Query(sql) => self.query(sql),
            Instruction::DropTempTables(names) => {
                for n in names {
                    self.conn.exec(&format!("DROP TABLE temp.{}", n))?;
                }
                Ok(())
            }

            Instruction::Import(spec) => self.import(spec),
            Instruction::InsertWith(spec) => self.insert_with(spec),

            Instruction::Assert { pos, message, sql } => {
                self.last = *pos;
                if self.conn.assert(sql)? {
                    Ok(())
                } else {
                    Err(Error::runtime(format!("assertion failure: {}", message)))
                }
            }
        }
    }

    /// Prepare and run a query. Without result columns it is plain
    /// DDL/DML; otherwise the header and rows stream through the encoder.
    fn query(&mut self, sql: &str) -> Result<(), Error> {
        let enc = &mut self.encoder;
        let eframe = self.eframe.clone();
        let cancel = &self.cancel;
        let mut stmt = self.conn.prepare(sql)?;
        let cols = stmt.columns();
        if cols.is_empty() {
            return stmt.drain();
        }
        enc.write_header(eframe.as_deref(), &cols)?;
        stmt.rows(|row| {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::system("interrupted"));
            }
            enc.write_row(row)
        })?;
        enc.reset()?;
        enc.flush()
    }

    /// Import into a table. With a DDL the table is created first and its
    /// columns become the declared header; otherwise the table is created
    /// from the decoded header. The create+insert runs under the internal
    /// savepoint so a failing import leaves nothing behind.
    fn import(&mut self, sp: &ImportSpec) -> Result<(), Error> {
        let limit = match &sp.limit {
            None => i64::MAX,
            Some(a) => self.resolve_int(a)?,
        };
        let offset = match &sp.offset {
            None => 0,
            Some(a) => self.resolve_int(a)?,
        };

        let (declared, create) = match &sp.ddl {
            Some(ddl) => {
                self.conn.exec(ddl)?;
                let cols = self.conn.columns(&format!("SELECT * FROM {}", sp.table))?;
                (cols, false)
            }
            None => (sp.header.clone(), true),
        };

        self.conn.exec(SAVEPOINT)?;
        match self.bulk(sp, &declared, create, limit, offset) {
            Ok(()) => self.conn.exec(RELEASE),
            Err(e) => {
                let _ = self.conn.exec(ROLLBACK_TO);
                let _ = self.conn.exec(RELEASE);
                Err(e)
            }
        }
    }

    fn bulk(
        &mut self,
        sp: &ImportSpec,
        declared: &[String],
        create: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(), Error> {
        let hdr = self.decoder.read_header(sp.frame.as_deref(), declared)?;
        if create {
            let ddl = create_table_sql(sp.temporary || sp.internal, &sp.table, &hdr);
            self.conn.exec(&ddl)?;
        }
        if offset > 0 {
            self.decoder.skip(offset)?;
        }
        let insert = insert_sql(&sp.table, &hdr);
        self.load_rows(&insert, limit)?;
        self.decoder.reset()
    }

    /// INSERT ... FROM IMPORT: the synthesized statement is already
    /// complete, the declared column list wins over the input's header.
    fn insert_with(&mut self, sp: &InsertSpec) -> Result<(), Error> {
        let limit = match &sp.limit {
            None => i64::MAX,
            Some(a) => self.resolve_int(a)?,
        };
        let offset = match &sp.offset {
            None => 0,
            Some(a) => self.resolve_int(a)?,
        };
        self.decoder.read_header(sp.frame.as_deref(), &sp.header)?;
        if offset > 0 {
            self.decoder.skip(offset)?;
        }
        self.load_rows(&sp.insert, limit)?;
        self.decoder.reset()
    }

    /// The bulk insert loop: read rows until end-of-input or the limit,
    /// feeding the chunking loader, polling for cancellation as it goes.
    fn load_rows(&mut self, insert: &str, limit: i64) -> Result<(), Error> {
        let dec = &mut self.decoder;
        let cancel = &self.cancel;
        let mut loader = self.conn.loader(insert)?;
        let mut rows: i64 = 0;
        while rows < limit {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::system("interrupted"));
            }
            match dec.read_row()? {
                None => break,
                Some(row) => loader.load(row)?,
            }
            rows += 1;
        }
        loader.close()
    }

    fn set_input(&mut self, r: Box<dyn Reader>) -> Result<(), Error> {
        let mut old = self.decoder.swap_input(r)?;
        old.close()
    }

    fn set_output(&mut self, w: Box<dyn Writer>) -> Result<(), Error> {
        self.encoder.flush()?;
        let mut old = self.encoder.swap_output(w)?;
        old.close()
    }

    fn build_decoder(
        &self,
        spec: &FormatSpec,
        input: Box<dyn Reader>,
    ) -> Result<Box<dyn Decoder>, Error> {
        match spec {
            FormatSpec::Csv {
                strict,
                delim,
                eol,
                null,
                header,
            } => {
                let d = self.resolve_char(delim, ',')?;
                if !d.is_ascii() {
                    return Err(Error::runtime("the CSV delimiter must be a single byte"));
                }
                let cfg = CsvConfig {
                    strict: *strict,
                    delim: d as u8,
                    crlf: use_crlf(*eol),
                    null: NullEncoding::new(self.resolve_null(null)?),
                    header: *header,
                };
                Ok(Box::new(CsvDecoder::new(cfg, input)))
            }
            FormatSpec::Raw {
                strict,
                delim,
                eol,
                null,
                header,
            } => {
                let cfg = RawConfig {
                    strict: *strict,
                    delim: self.resolve_char(delim, '\t')?,
                    crlf: use_crlf(*eol),
                    null: NullEncoding::new(self.resolve_null(null)?),
                    header: *header,
                };
                Ok(Box::new(RawDecoder::new(cfg, input)))
            }
        }
    }

    fn build_encoder(
        &self,
        spec: &FormatSpec,
        out: Box<dyn Writer>,
    ) -> Result<Box<dyn Encoder>, Error> {
        match spec {
            FormatSpec::Csv {
                strict,
                delim,
                eol,
                null,
                header,
            } => {
                let d = self.resolve_char(delim, ',')?;
                if !d.is_ascii() {
                    return Err(Error::runtime("the CSV delimiter must be a single byte"));
                }
                let cfg = CsvConfig {
                    strict: *strict,
                    delim: d as u8,
                    crlf: use_crlf(*eol),
                    null: NullEncoding::new(self.resolve_null(null)?),
                    header: *header,
                };
                Ok(Box::new(CsvEncoder::new(cfg, out)))
            }
            FormatSpec::Raw {
                strict,
                delim,
                eol,
                null,
                header,
            } => {
                let cfg = RawConfig {
                    strict: *strict,
                    delim: self.resolve_char(delim, '\t')?,
                    crlf: use_crlf(*eol),
                    null: NullEncoding::new(self.resolve_null(null)?),
                    header: *header,
                };
                Ok(Box::new(RawEncoder::new(cfg, out)))
            }
        }
    }

    fn resolve_str(&self, a: &Arg<String>, what: &str) -> Result<String, Error> {
        match a {
            Arg::Lit(s) if !s.is_empty() => Ok(s.clone()),
            Arg::Lit(_) => Err(Error::runtime(format!("expected {} but got \"\"", what))),
            Arg::Sub(sql) => match self.conn.subquery(sql)? {
                Some(s) if !s.is_empty() => Ok(s),
                _ => Err(Error::runtime(format!(
                    "expected {} but the subquery returned nothing",
                    what
                ))),
            },
        }
    }

    fn resolve_int(&self, a: &Arg<i64>) -> Result<i64, Error> {
        match a {
            Arg::Lit(n) => Ok(*n),
            Arg::Sub(sql) => match self.conn.subquery(sql)? {
                None => Ok(0),
                Some(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| Error::runtime(format!("expected an integer, got {:?}", s))),
            },
        }
    }

    fn resolve_char(&self, a: &Option<Arg<char>>, default: char) -> Result<char, Error> {
        match a {
            None => Ok(default),
            Some(Arg::Lit(c)) => Ok(*c),
            Some(Arg::Sub(sql)) => match self.conn.subquery(sql)? {
                None => Ok(default),
                Some(s) => {
                    let mut cs = s.chars();
                    match (cs.next(), cs.next()) {
                        (Some(c), None) => Ok(c),
                        _ => Err(Error::runtime(format!(
                            "expected a single character, got {:?}",
                            s
                        ))),
                    }
                }
            },
        }
    }

    fn resolve_null(&self, a: &Option<Arg<String>>) -> Result<String, Error> {
        match a {
            None => Ok(String::new()),
            Some(Arg::Lit(s)) => Ok(s.clone()),
            Some(Arg::Sub(sql)) => Ok(self.conn.subquery(sql)?.unwrap_or_default()),
        }
    }
}

fn create_table_sql(temp: bool, table: &str, header: &[String]) -> String {
    let mut sql = String::from("CREATE ");
    if temp {
        sql.push_str("TEMPORARY ");
    }
    sql.push_str("TABLE ");
    sql.push_str(table);
    sql.push_str(" (");
    for (i, h) in header.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&types::escape_ident(h));
        sql.push_str(" TEXT");
    }
    sql.push(')');
    sql
}

fn insert_sql(table: &str, header: &[String]) -> String {
    let mut sql = String::from("INSERT INTO ");
    sql.push_str(table);
    sql.push_str(" (");
    for (i, h) in header.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&types::escape_ident(h));
    }
    sql.push_str(") VALUES (");
    for i in 0..header.len() {
        if i > 0 {
            sql.push(',');
        }
        sql.push('?');
    }
    sql.push(')');
    sql
}
