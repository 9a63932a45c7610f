use std::collections::HashSet;

use crate::error::{Error, Kind as ErrKind};
use crate::parser::nodes::{
    Device, Display, Format, Import, IntExpr, Name, Node, RuneExpr, Sql, SqlKind, StrExpr,
};
use crate::savepoint::Stack;
use crate::types::{self, Kind, Pos, Token};
use crate::vm::instruction::{Arg, FormatSpec, ImportSpec, InsertSpec, Instruction};

mod tests;

/// A compiled program: the instruction list plus the database chosen by a
/// leading USE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub db: Option<String>,
    pub inst: Vec<Instruction>,
}

/// Lower the node stream into instructions. The compiler owns all name
/// derivation, DDL/DML synthesis, savepoint modelling and the stdin guard;
/// `used_stdin` says whether the script itself arrived on standard input.
pub fn compile(name: &str, nodes: Vec<Node>, used_stdin: bool) -> Result<Program, Error> {
    let mut c = Compiler {
        name,
        used_stdin,
        inst: Vec::with_capacity(128),
        db: None,
        hdr: vec![],
        frname: None,
        dname: None,
        had_device: false,
        used: HashSet::new(),
        stack: Stack::new(),
    };

    let mut first = true;
    for n in nodes {
        c.push(Instruction::ErrPos(n.pos()));
        match n {
            Node::Use(u) => {
                if !first {
                    return Err(c.err(u.pos, "USE must be the first statement"));
                }
                c.inst.pop(); // USE compiles to nothing
                c.db = Some(u.db);
            }
            Node::Assert(a) => {
                let sql = c.render(&a.subquery.tokens, &[])?;
                c.push(Instruction::Assert {
                    pos: a.pos,
                    message: a.message,
                    sql,
                });
            }
            Node::Display(d) => c.display(d)?,
            Node::Import(imp) => c.import(imp)?,
            Node::Sql(s) => c.sql(s)?,
        }
        first = false;
    }

    // Commit well formed work at the end of the script.
    if c.stack.in_transaction() {
        c.push(Instruction::Commit("END TRANSACTION".to_string()));
    } else if let Some(top) = c.stack.top() {
        let name = top.to_string();
        let sql = format!("RELEASE {}", types::escape_ident(&name));
        c.push(Instruction::UserRelease { name, sql });
    }

    Ok(Program {
        db: c.db,
        inst: c.inst,
    })
}

struct Compiler<'a> {
    name: &'a str,
    used_stdin: bool,
    inst: Vec<Instruction>,
    db: Option<String>,

    /// Header, frame and derived-name propagation between imports.
    hdr: Vec<String>,
    frname: Option<String>,
    dname: Option<String>,
    had_device: bool,
    /// Table names already claimed by imports in this script.
    used: HashSet<String>,

    stack: Stack,
}

impl<'a> Compiler<'a> {
    fn push(&mut self, i: Instruction) {
        self.inst.push(i);
    }

    fn err(&self, pos: Pos, msg: impl Into<String>) -> Error {
        Error::new(ErrKind::Compile, self.name, pos, msg)
    }

    /// DISPLAY: switch encoder, output device and encoding frame.
    fn display(&mut self, d: Display) -> Result<(), Error> {
        if d.device.is_none() && d.format.is_none() && d.frame.is_none() {
            return Err(self.err(
                d.pos,
                "at least one of device, frame or format must be specified on DISPLAY",
            ));
        }
        if let Some(f) = &d.format {
            let spec = self.lower_format(f)?;
            self.push(Instruction::SetEncoder(spec));
        }
        match &d.device {
            Some(Device::Stdio) => self.push(Instruction::UseStdout),
            Some(Device::File(e)) => {
                let arg = self.lower_str(e)?;
                self.push(Instruction::UseFileOutput(arg));
            }
            None => {}
        }
        self.push(Instruction::SetEncodingFrame(d.frame));
        Ok(())
    }

    /// A statement-level IMPORT.
    fn import(&mut self, mut imp: Import) -> Result<(), Error> {
        self.import_state(&mut imp)?;
        let table = self.derive_table(&imp)?;
        let spec = ImportSpec {
            internal: false,
            temporary: imp.temporary,
            table,
            header: imp.header.clone(),
            frame: imp.frame.clone(),
            limit: self.lower_int_opt(&imp.limit)?,
            offset: self.lower_int_opt(&imp.offset)?,
            ddl: None,
        };
        self.push(Instruction::Import(spec));
        Ok(())
    }

    fn sql(&mut self, mut s: Sql) -> Result<(), Error> {
        match s.kind {
            SqlKind::Savepoint
            | SqlKind::Release
            | SqlKind::BeginTransaction
            | SqlKind::Commit => {
                if !s.subqueries.is_empty() {
                    return Err(Error::internal(format!(
                        "{:?} cannot have import subqueries, found {}",
                        s.kind,
                        s.subqueries.len()
                    )));
                }
                self.transactor(&s)
            }
            SqlKind::CreateTableFrom => self.create_table_from(&mut s),
            SqlKind::InsertFrom => self.insert_from(&mut s),
            SqlKind::Query | SqlKind::Exec => self.query_or_exec(&mut s),
        }
    }

    fn transactor(&mut self, s: &Sql) -> Result<(), Error> {
        let pos = s.pos();
        let sql = self.render(&s.tokens, &[])?;
        match s.kind {
            SqlKind::Savepoint => {
                let name = self.savepoint_name(s)?;
                self.stack.savepoint(&name);
                self.push(Instruction::UserSavepoint { name, sql });
            }
            SqlKind::Release => {
                let name = self.savepoint_name(s)?;
                self.stack.release(&name).map_err(|m| self.err(pos, m))?;
                self.push(Instruction::UserRelease { name, sql });
            }
            SqlKind::BeginTransaction => {
                self.stack.begin().map_err(|m| self.err(pos, m))?;
                self.push(Instruction::Begin(sql));
            }
            SqlKind::Commit => {
                self.stack.end().map_err(|m| self.err(pos, m))?;
                self.push(Instruction::Commit(sql));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn savepoint_name(&self, s: &Sql) -> Result<String, Error> {
        let t = s
            .name
            .first()
            .ok_or_else(|| Error::internal("savepoint statement without a name token"))?;
        t.unescape()
            .ok_or_else(|| Error::internal("savepoint name token is not a literal or string"))
    }

    /// CREATE TABLE ... FROM IMPORT: the DDL runs first, the created
    /// table's columns become the header for the bulk insert.
    fn create_table_from(&mut self, s: &mut Sql) -> Result<(), Error> {
        let mut imp = self.single_subquery(s)?;
        if imp.table.is_some() {
            return Err(self.err(
                imp.pos,
                "illegal to specify a table name in CREATE TABLE FROM IMPORT",
            ));
        }
        if !imp.header.is_empty() {
            return Err(self.err(
                imp.pos,
                "illegal to specify a header in CREATE TABLE FROM IMPORT",
            ));
        }
        let table = self.fmt_name(&s.name)?;
        let ddl = self.render(&s.tokens, &[])?;
        self.import_state(&mut imp)?;
        let spec = ImportSpec {
            internal: false,
            temporary: false,
            table,
            header: vec![],
            frame: imp.frame.clone(),
            limit: self.lower_int_opt(&imp.limit)?,
            offset: self.lower_int_opt(&imp.offset)?,
            ddl: Some(ddl),
        };
        self.push(Instruction::Import(spec));
        Ok(())
    }

    /// INSERT INTO t (cols) FROM IMPORT: the declared columns become the
    /// header and the arity of the synthesized VALUES template.
    fn insert_from(&mut self, s: &mut Sql) -> Result<(), Error> {
        let mut imp = self.single_subquery(s)?;
        if imp.table.is_some() {
            return Err(self.err(
                imp.pos,
                "illegal to specify a table name in INSERT FROM IMPORT",
            ));
        }
        if s.cols.is_empty() {
            return Err(self.err(s.pos(), "INSERT ... FROM IMPORT requires a column list"));
        }
        let table = self.fmt_name(&s.name)?;
        let header: Vec<String> = s
            .cols
            .iter()
            .map(|t| t.unescape().unwrap_or_default())
            .collect();
        imp.header = header.clone();
        self.import_state(&mut imp)?;

        let mut insert = self.render(&s.tokens, &[])?;
        insert.push_str(" VALUES (");
        for i in 0..header.len() {
            if i > 0 {
                insert.push(',');
            }
            insert.push('?');
        }
        insert.push(')');

        let limit = self.lower_int_opt(&imp.limit)?;
        let offset = self.lower_int_opt(&imp.offset)?;
        self.push(Instruction::Savepoint);
        self.push(Instruction::InsertWith(InsertSpec {
            table,
            frame: imp.frame.clone(),
            insert,
            header,
            limit,
            offset,
        }));
        self.push(Instruction::Release);
        Ok(())
    }

    /// Plain queries and execs, with any lifted imports materialized into
    /// temp tables `[0]`, `[1]`, ... inside a savepoint and dropped after.
    fn query_or_exec(&mut self, s: &mut Sql) -> Result<(), Error> {
        let subs = std::mem::take(&mut s.subqueries);
        let tables: Vec<String> = (0..subs.len()).map(|i| format!("[{}]", i)).collect();

        if !tables.is_empty() {
            self.push(Instruction::Savepoint);
            for (i, mut imp) in subs.into_iter().enumerate() {
                if imp.table.is_some() {
                    return Err(self.err(
                        imp.pos,
                        "illegal to specify a table name for an import in a subquery",
                    ));
                }
                self.import_state(&mut imp)?;
                let spec = ImportSpec {
                    internal: true,
                    temporary: true,
                    table: tables[i].clone(),
                    header: imp.header.clone(),
                    frame: imp.frame.clone(),
                    limit: self.lower_int_opt(&imp.limit)?,
                    offset: self.lower_int_opt(&imp.offset)?,
                    ddl: None,
                };
                self.push(Instruction::Import(spec));
            }
        }

        let q = self.render(&s.tokens, &tables)?;
        match s.kind {
            SqlKind::Exec => self.push(Instruction::Exec(q)),
            SqlKind::Query => self.push(Instruction::Query(q)),
            _ => unreachable!(),
        }

        if !tables.is_empty() {
            self.push(Instruction::DropTempTables(tables));
            self.push(Instruction::Release);
        }
        Ok(())
    }

    fn single_subquery(&mut self, s: &mut Sql) -> Result<Import, Error> {
        if s.subqueries.len() != 1 {
            return Err(Error::internal(format!(
                "{:?} must have exactly 1 import subquery, found {}",
                s.kind,
                s.subqueries.len()
            )));
        }
        Ok(s.subqueries.remove(0))
    }

    /// Device, format, header and frame state for one import: emit the
    /// device/decoder switches and run the propagation rules. Any change of
    /// device, format or frame invalidates the remembered header.
    fn import_state(&mut self, imp: &mut Import) -> Result<(), Error> {
        if self.used_stdin {
            match &imp.device {
                Some(Device::Stdio) => {
                    return Err(self.err(
                        imp.pos,
                        "script needs to read from stdin but the script itself was read from stdin",
                    ));
                }
                None if !self.had_device => {
                    return Err(self.err(
                        imp.pos,
                        "no input device specified: stdin is already reading the script",
                    ));
                }
                _ => {}
            }
        }

        if let Some(d) = &imp.device {
            match d {
                Device::Stdio => {
                    self.dname = None;
                    self.push(Instruction::UseStdin);
                }
                Device::File(e) => {
                    let arg = self.lower_str(e)?;
                    self.dname = match &arg {
                        Arg::Lit(n) => Some(base_name(n)),
                        Arg::Sub(_) => None,
                    };
                    self.push(Instruction::UseFileInput(arg));
                }
            }
            self.had_device = true;
            self.frname = None;
        }

        if let Some(f) = &imp.format {
            let spec = self.lower_format(f)?;
            self.push(Instruction::SetDecoder(spec));
            self.frname = None;
        }

        if imp.device.is_some() || imp.format.is_some() || imp.frame.is_some() {
            self.hdr.clear();
        }
        if imp.header.is_empty() {
            imp.header = self.hdr.clone();
        } else {
            self.hdr = imp.header.clone();
        }

        match &imp.frame {
            Some(f) => self.frname = Some(f.clone()),
            None => imp.frame = self.frname.clone(),
        }
        Ok(())
    }

    /// Pick the import's table name: the written one, or derived from the
    /// device's base name or the frame name. Derived names may be used only
    /// once per script.
    fn derive_table(&mut self, imp: &Import) -> Result<String, Error> {
        if let Some(t) = &imp.table {
            self.used.insert(t.clone());
            return Ok(types::escape_ident(t));
        }
        let mut cand = self
            .dname
            .clone()
            .filter(|d| !d.is_empty() && !self.used.contains(d));
        if cand.is_none() {
            cand = self
                .frname
                .clone()
                .filter(|f| !f.is_empty() && !self.used.contains(f));
        }
        let Some(name) = cand else {
            return Err(self.err(imp.pos, "cannot derive a table name"));
        };
        if imp.temporary && types::digital(&name) {
            return Err(self.err(
                imp.pos,
                "the derived name for the temporary table is numeric, which is reserved",
            ));
        }
        self.used.insert(name.clone());
        Ok(types::escape_ident(&name))
    }

    fn lower_format(&mut self, f: &Format) -> Result<FormatSpec, Error> {
        match f {
            Format::Json { pos } => Err(self.err(*pos, "JSON format is not implemented")),
            Format::Csv {
                pos,
                quote: Some(_),
                ..
            } => Err(self.err(*pos, "specifying a quote for CSV is currently unsupported")),
            Format::Csv {
                strict,
                delim,
                eol,
                null,
                header,
                ..
            } => Ok(FormatSpec::Csv {
                strict: *strict,
                delim: self.lower_rune_opt(delim)?,
                eol: *eol,
                null: self.lower_str_opt(null)?,
                header: *header,
            }),
            Format::Raw {
                strict,
                delim,
                eol,
                null,
                header,
                ..
            } => Ok(FormatSpec::Raw {
                strict: *strict,
                delim: self.lower_rune_opt(delim)?,
                eol: *eol,
                null: self.lower_str_opt(null)?,
                header: *header,
            }),
        }
    }

    fn lower_str(&mut self, e: &StrExpr) -> Result<Arg<String>, Error> {
        match e {
            StrExpr::Lit(s) => Ok(Arg::Lit(s.clone())),
            StrExpr::Sub(sql) => Ok(Arg::Sub(self.render(&sql.tokens, &[])?)),
        }
    }

    fn lower_str_opt(&mut self, e: &Option<StrExpr>) -> Result<Option<Arg<String>>, Error> {
        e.as_ref().map(|e| self.lower_str(e)).transpose()
    }

    fn lower_rune_opt(&mut self, e: &Option<RuneExpr>) -> Result<Option<Arg<char>>, Error> {
        match e {
            None => Ok(None),
            Some(RuneExpr::Lit(c)) => Ok(Some(Arg::Lit(*c))),
            Some(RuneExpr::Sub(sql)) => Ok(Some(Arg::Sub(self.render(&sql.tokens, &[])?))),
        }
    }

    fn lower_int_opt(&mut self, e: &Option<IntExpr>) -> Result<Option<Arg<i64>>, Error> {
        match e {
            None => Ok(None),
            Some(IntExpr::Lit(n)) => Ok(Some(Arg::Lit(*n))),
            Some(IntExpr::Sub(sql)) => Ok(Some(Arg::Sub(self.render(&sql.tokens, &[])?))),
        }
    }

    /// The fully escaped form of an extracted 1- or 3-token name. The raw
    /// object name is recorded so later imports cannot re-derive it.
    fn fmt_name(&mut self, toks: &[Token]) -> Result<String, Error> {
        if toks.len() != 1 && toks.len() != 3 {
            return Err(Error::internal(format!(
                "extracted name must have 1 or 3 tokens, got {}",
                toks.len()
            )));
        }
        let name = Name::new(toks.to_vec());
        self.used.insert(name.object());
        Ok(name.escaped())
    }

    /// Render a token run back to SQL. A space goes only between two
    /// consecutive non-operator literals; placeholders become reads of
    /// their lifted temp tables.
    fn render(&self, tokens: &[Token], tables: &[String]) -> Result<String, Error> {
        let mut out = String::new();
        let mut last_lit = false;
        let mut ph = 0usize;
        for t in tokens {
            match t.kind {
                Kind::Placeholder => {
                    if ph >= tables.len() {
                        return Err(Error::internal(
                            "placeholder without a matching lifted import",
                        ));
                    }
                    if last_lit {
                        out.push(' ');
                    }
                    out.push_str("SELECT * FROM temp.");
                    out.push_str(&tables[ph]);
                    ph += 1;
                    last_lit = true;
                }
                Kind::Argument => {
                    return Err(Error::internal(
                        "argument token survived parsing, desugaring missed it",
                    ));
                }
                Kind::LParen => {
                    out.push('(');
                    last_lit = false;
                }
                Kind::RParen => {
                    out.push(')');
                    last_lit = false;
                }
                Kind::Semicolon => {
                    out.push(';');
                    last_lit = false;
                }
                Kind::Literal => {
                    let is_lit = !t.is_op();
                    if last_lit && is_lit {
                        out.push(' ');
                    } else if let (Some(a), Some(b)) =
                        (out.chars().last(), t.value.chars().next())
                    {
                        // two adjacent operators must not fuse into -- or /*
                        if (a == '-' && b == '-') || (a == '/' && b == '*') {
                            out.push(' ');
                        }
                    }
                    out.push_str(&t.value);
                    last_lit = is_lit;
                }
                Kind::Str => {
                    out.push_str(&t.value);
                    last_lit = false;
                }
            }
        }
        if ph != tables.len() {
            return Err(Error::internal(format!(
                "expected {} placeholder replacements, got {}",
                tables.len(),
                ph
            )));
        }
        Ok(out)
    }
}

/// The table name a file device contributes: the base filename without
/// directory or extension, trimmed of stray dots and spaces.
fn base_name(path: &str) -> String {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = match base.rfind('.') {
        Some(0) => &base[1..],
        Some(i) => &base[..i],
        None => base,
    };
    stem.trim_matches(|c| c == '.' || c == ' ').to_string()
}
