use crate::error::{Error, Kind as ErrKind};
use crate::types::{self, Kind, Pos, Token};

pub mod nodes;
mod tests;

use nodes::{
    Assert, Device, Display, Format, Import, IntExpr, LineEnding, Name, Node, RuneExpr, Sql,
    SqlKind, StrExpr, Use,
};

/// Island parser: the four extension statements and the statement-level
/// shape of SQL are parsed precisely, everything else is treated as an
/// opaque, brace-matched token run. The first error aborts the stream.
pub struct Parser<'a> {
    toks: Vec<Token>,
    pos: usize,
    name: &'a str,
}

impl<'a> Parser<'a> {
    pub fn new(toks: Vec<Token>, name: &'a str) -> Parser<'a> {
        Parser {
            toks,
            pos: 0,
            name,
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn last_pos(&self) -> Pos {
        self.toks.last().map(|t| t.pos).unwrap_or_default()
    }

    fn next(&mut self) -> Result<Token, Error> {
        match self.toks.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                Ok(t.clone())
            }
            None => Err(Error::new(
                ErrKind::Parse,
                self.name,
                self.last_pos(),
                "unexpected end of input",
            )),
        }
    }

    fn err(&self, t: &Token, msg: impl Into<String>) -> Error {
        Error::new(ErrKind::Parse, self.name, t.pos, msg)
    }

    fn unexpected(&self, t: &Token) -> Error {
        let what = match t.kind {
            Kind::Literal => format!("unexpected token '{}'", t.value),
            Kind::Str => format!("unexpected string {}", t.value),
            Kind::Argument => format!("unexpected argument @{}", t.value),
            Kind::Placeholder => "unexpected placeholder".to_string(),
            Kind::LParen => "unexpected '('".to_string(),
            Kind::RParen => "unexpected ')'".to_string(),
            Kind::Semicolon => "unexpected ';'".to_string(),
        };
        self.err(t, what)
    }

    fn expect_kind(&mut self, kind: Kind) -> Result<Token, Error> {
        let t = self.next()?;
        if t.kind != kind {
            return Err(self.unexpected(&t));
        }
        Ok(t)
    }

    fn expect_lit(&mut self, lit: &str) -> Result<Token, Error> {
        let t = self.next()?;
        if !t.literal(lit) {
            return Err(self.err(&t, format!("expected {}, got '{}'", lit, t.value)));
        }
        Ok(t)
    }

    fn expect_lit_or_str(&mut self) -> Result<Token, Error> {
        let t = self.next()?;
        if t.kind != Kind::Literal && t.kind != Kind::Str {
            return Err(self.unexpected(&t));
        }
        Ok(t)
    }

    pub fn parse(&mut self) -> Result<Vec<Node>, Error> {
        let mut out = vec![];
        while !self.at_eof() {
            let t = self.next()?;
            out.push(self.statement(t)?);
        }
        Ok(out)
    }

    fn statement(&mut self, t: Token) -> Result<Node, Error> {
        if !t.head(false) {
            return Err(self
                .unexpected(&t)
                .with_note("statements start with a keyword such as SELECT, IMPORT or CREATE"));
        }
        match t.canon.as_str() {
            "USE" => self.use_stmt(t.pos),
            "DISPLAY" => self.display_stmt(t.pos),
            "ASSERT" => self.assert_stmt(t.pos),
            "IMPORT" => self.import_head(t.pos),
            _ => self.sql_stmt(t).map(Node::Sql),
        }
    }

    /// USE [DATABASE|DB] name ;
    fn use_stmt(&mut self, pos: Pos) -> Result<Node, Error> {
        let mut t = self.next()?;
        if t.any_literal(&["DATABASE", "DB"]) {
            t = self.next()?;
        }
        let db = t
            .unescape()
            .ok_or_else(|| self.err(&t, "expected a database name"))?;
        self.expect_kind(Kind::Semicolon)?;
        Ok(Node::Use(Use { pos, db }))
    }

    /// DISPLAY [TO device] [FRAME name] [AS format] ;
    fn display_stmt(&mut self, pos: Pos) -> Result<Node, Error> {
        let mut d = Display {
            pos,
            device: None,
            frame: None,
            format: None,
        };
        let mut t = self.next()?;
        if t.literal("TO") {
            let (dev, t2) = self.device_expr(true)?;
            d.device = Some(dev);
            t = t2;
        }
        if t.literal("FRAME") {
            let ft = self.next()?;
            d.frame = Some(
                ft.unescape()
                    .ok_or_else(|| self.err(&ft, "expected a frame name"))?,
            );
            t = self.next()?;
        }
        if t.literal("AS") {
            let head = self.next()?;
            let (f, t2) = self.format_expr(head)?;
            d.format = Some(f);
            t = t2;
        }
        if t.kind != Kind::Semicolon {
            return Err(self.err(&t, "expected ';' to end DISPLAY"));
        }
        Ok(Node::Display(d))
    }

    /// ASSERT "message", (subquery) ; The @ form desugars to a wrapped
    /// `value IS NULL` subquery so both forms evaluate uniformly.
    fn assert_stmt(&mut self, pos: Pos) -> Result<Node, Error> {
        let t = self.next()?;
        if t.kind != Kind::Str {
            return Err(self.err(&t, "expected an assertion message string"));
        }
        let message = t.unescape().unwrap_or_default();
        let c = self.next()?;
        if !c.comma() {
            return Err(self.err(&c, "expected ',' after the assertion message"));
        }
        let t = self.next()?;
        let subquery = match t.kind {
            Kind::Argument => {
                let mut s = Sql::new(SqlKind::Query);
                s.tokens = self.desugar_assert(&t)?;
                s
            }
            Kind::LParen => self.subquery_sql()?,
            _ => return Err(self.err(&t, "expected a subquery or an @ argument")),
        };
        self.expect_kind(Kind::Semicolon)?;
        Ok(Node::Assert(Assert {
            pos,
            message,
            subquery,
        }))
    }

    /// An IMPORT at statement level. When the import turns out to be the
    /// first term of a compound query it is lifted into a fresh Sql node
    /// with a placeholder standing in for it.
    fn import_head(&mut self, pos: Pos) -> Result<Node, Error> {
        let (imp, after) = self.import_stmt(pos)?;
        if after.kind == Kind::Semicolon {
            return Ok(Node::Import(imp));
        }
        if after.any_literal(&["UNION", "INTERSECT", "EXCEPT"]) {
            let mut s = Sql::new(SqlKind::Query);
            s.synth(Kind::Placeholder, pos);
            s.subqueries.push(imp);
            self.regular(&mut s, after, 0, false, true, true)?;
            return Ok(Node::Sql(s));
        }
        Err(self.err(&after, "expected ';' to end IMPORT"))
    }

    /// IMPORT [TEMPORARY] [name] [(hdr...)] [FROM device] [WITH format]
    /// [FRAME name] [LIMIT n] [OFFSET n]
    ///
    /// Stops at the first token that is not part of the import and returns
    /// it; the caller validates the terminator.
    fn import_stmt(&mut self, pos: Pos) -> Result<(Import, Token), Error> {
        let mut imp = Import {
            pos,
            temporary: false,
            table: None,
            header: vec![],
            device: None,
            format: None,
            frame: None,
            limit: None,
            offset: None,
        };
        let mut t = self.next()?;
        if t.any_literal(&["TEMP", "TEMPORARY"]) {
            imp.temporary = true;
            t = self.next()?;
        }
        if (t.kind == Kind::Literal || t.kind == Kind::Str)
            && !t.any_literal(&["FROM", "WITH", "FRAME", "LIMIT", "OFFSET"])
        {
            let name = t.unescape().unwrap_or_default();
            if imp.temporary && types::digital(&name) {
                return Err(self.err(&t, "digital temporary table names are reserved by the runtime"));
            }
            imp.table = Some(name);
            t = self.next()?;
        }
        if t.kind == Kind::LParen {
            loop {
                let h = self.expect_lit_or_str()?;
                imp.header.push(h.unescape().unwrap_or_default());
                let sep = self.next()?;
                if sep.kind == Kind::RParen {
                    break;
                }
                if !sep.comma() {
                    return Err(self.err(&sep, "expected ',' or ')' in the header list"));
                }
            }
            t = self.next()?;
        }
        if t.literal("FROM") {
            let (dev, t2) = self.device_expr(false)?;
            imp.device = Some(dev);
            t = t2;
        }
        if t.literal("WITH") {
            let head = self.next()?;
            let (f, t2) = self.format_expr(head)?;
            imp.format = Some(f);
            t = t2;
        }
        if t.literal("FRAME") {
            let ft = self.next()?;
            imp.frame = Some(
                ft.unescape()
                    .ok_or_else(|| self.err(&ft, "expected a frame name"))?,
            );
            t = self.next()?;
        }
        if t.literal("LIMIT") {
            let head = self.next()?;
            let (e, t2) = self.int_or_sub(head)?;
            // a negative limit means no limit, mirroring sqlite
            imp.limit = match e {
                IntExpr::Lit(n) if n < 0 => None,
                other => Some(other),
            };
            t = t2;
        }
        if t.literal("OFFSET") {
            let head = self.next()?;
            let (e, t2) = self.int_or_sub(head)?;
            imp.offset = match e {
                IntExpr::Lit(n) if n <= 0 => None,
                other => Some(other),
            };
            t = t2;
        }
        Ok((imp, t))
    }

    /// TO|FROM STDIN|STDOUT|filename. Stdio keywords are direction
    /// checked, a filename may be a string, a subquery or an @ argument.
    fn device_expr(&mut self, output: bool) -> Result<(Device, Token), Error> {
        let t = self.next()?;
        if t.literal("STDIN") {
            if output {
                return Err(self.err(&t, "expected STDOUT or a filename, got STDIN"));
            }
            return Ok((Device::Stdio, self.next()?));
        }
        if t.literal("STDOUT") {
            if !output {
                return Err(self.err(&t, "expected STDIN or a filename, got STDOUT"));
            }
            return Ok((Device::Stdio, self.next()?));
        }
        let (name, t) = self.str_or_sub(t, "a filename")?;
        Ok((Device::File(name), t))
    }

    /// CSV|RAW|JSON with options in fixed order:
    /// [STRICT] [DELIMITER d] [QUOTE q] [EOL e] [NULL n] [HEADER|NOHEADER]
    fn format_expr(&mut self, t: Token) -> Result<(Format, Token), Error> {
        let pos = t.pos;
        let csv = match t.canon.as_str() {
            "JSON" => return Ok((Format::Json { pos }, self.next()?)),
            "CSV" => true,
            "RAW" => false,
            _ => return Err(self.err(&t, "expected a format (CSV, RAW or JSON)")),
        };

        let mut t = self.next()?;
        let mut strict = false;
        if t.literal("STRICT") {
            strict = true;
            t = self.next()?;
        }
        let mut delim = None;
        if t.any_literal(&["DELIM", "DELIMITER"]) {
            let head = self.next()?;
            let (r, t2) = self.rune_or_sub(head)?;
            delim = Some(r);
            t = t2;
        }
        let mut quote = None;
        if csv && t.literal("QUOTE") {
            let head = self.next()?;
            let (r, t2) = self.rune_or_sub(head)?;
            quote = Some(r);
            t = t2;
        }
        let mut eol = LineEnding::Default;
        if t.literal("EOL") {
            let e = self.expect_kind(Kind::Literal)?;
            eol = match e.canon.as_str() {
                "DEFAULT" => LineEnding::Default,
                "LF" | "UNIX" => LineEnding::Lf,
                "CRLF" | "WINDOWS" => LineEnding::Crlf,
                _ => {
                    return Err(self.err(
                        &e,
                        "expected a line ending (DEFAULT, LF or UNIX, CRLF or WINDOWS)",
                    ));
                }
            };
            t = self.next()?;
        }
        let mut null = None;
        if t.literal("NULL") {
            let head = self.next()?;
            let (n, t2) = self.str_or_sub(head, "a null encoding")?;
            null = Some(n);
            t = t2;
        }
        let f = if csv {
            let mut header = true;
            if t.any_literal(&["NOHEADER", "NOHDR"]) {
                header = false;
                t = self.next()?;
            }
            Format::Csv {
                pos,
                strict,
                delim,
                quote,
                eol,
                null,
                header,
            }
        } else {
            let mut header = false;
            if t.any_literal(&["HEADER", "HDR"]) {
                header = true;
                t = self.next()?;
            }
            Format::Raw {
                pos,
                strict,
                delim,
                eol,
                null,
                header,
            }
        };
        Ok((f, t))
    }

    /// Parses a parenthesized subquery after its '(' has been consumed.
    /// The returned token run excludes the closing parenthesis.
    fn subquery_sql(&mut self) -> Result<Sql, Error> {
        let mut s = Sql::new(SqlKind::Query);
        let t = self.next()?;
        self.regular(&mut s, t, 1, true, false, true)?;
        s.tokens.pop(); // the closing ')'
        Ok(s)
    }

    fn str_or_sub(&mut self, t: Token, what: &str) -> Result<(StrExpr, Token), Error> {
        match t.kind {
            Kind::LParen => Ok((StrExpr::Sub(self.subquery_sql()?), self.next()?)),
            Kind::Argument => {
                let mut s = Sql::new(SqlKind::Query);
                s.tokens = self.desugar(&t)?;
                Ok((StrExpr::Sub(s), self.next()?))
            }
            _ => match t.unescape() {
                Some(v) => Ok((StrExpr::Lit(v), self.next()?)),
                None => Err(self.err(&t, format!("expected {what}"))),
            },
        }
    }

    fn int_or_sub(&mut self, t: Token) -> Result<(IntExpr, Token), Error> {
        match t.kind {
            Kind::LParen => Ok((IntExpr::Sub(self.subquery_sql()?), self.next()?)),
            Kind::Argument => {
                let mut s = Sql::new(SqlKind::Query);
                s.tokens = self.desugar(&t)?;
                Ok((IntExpr::Sub(s), self.next()?))
            }
            Kind::Literal => match t.value.parse::<i64>() {
                Ok(n) => Ok((IntExpr::Lit(n), self.next()?)),
                Err(_) => Err(self.err(&t, "expected an integer or subquery")),
            },
            _ => Err(self.err(&t, "expected an integer or subquery")),
        }
    }

    fn rune_or_sub(&mut self, t: Token) -> Result<(RuneExpr, Token), Error> {
        if t.literal("TAB") {
            return Ok((RuneExpr::Lit('\t'), self.next()?));
        }
        match t.kind {
            Kind::LParen => Ok((RuneExpr::Sub(self.subquery_sql()?), self.next()?)),
            Kind::Argument => {
                let mut s = Sql::new(SqlKind::Query);
                s.tokens = self.desugar(&t)?;
                Ok((RuneExpr::Sub(s), self.next()?))
            }
            _ => {
                let v = t
                    .unescape()
                    .ok_or_else(|| self.err(&t, "expected a single character"))?;
                let mut chars = v.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok((RuneExpr::Lit(c), self.next()?)),
                    _ => Err(self.err(&t, format!("expected a single character, got {:?}", v))),
                }
            }
        }
    }

    /// @N and @NAME desugar to a scalar subquery over sys.args / sys.env.
    fn desugar(&mut self, t: &Token) -> Result<Vec<Token>, Error> {
        let mut out = vec![
            Token::lit("SELECT"),
            Token::lit("value"),
            Token::lit("FROM"),
            Token::lit("sys"),
            Token::lit("."),
        ];
        if types::digital(&t.value) {
            let n: i64 = t
                .value
                .parse()
                .map_err(|_| self.err(t, "argument position out of range"))?;
            if n < 1 {
                return Err(self.err(t, "@0 is illegal: the minimum interpolation is @1"));
            }
            out.extend([
                Token::lit("args"),
                Token::lit("WHERE"),
                Token::lit("rowid"),
                Token::lit("="),
                Token::lit(&t.value),
            ]);
        } else {
            out.extend([
                Token::lit("env"),
                Token::lit("WHERE"),
                Token::lit("name"),
                Token::lit("="),
                Token::quoted(&t.value),
            ]);
        }
        Ok(out)
    }

    /// The assert form wraps the desugared argument so the assertion tests
    /// `value IS NULL`.
    fn desugar_assert(&mut self, t: &Token) -> Result<Vec<Token>, Error> {
        let inner = self.desugar(t)?;
        let mut out = vec![Token::lit("SELECT"), Token::synth(Kind::LParen, t.pos)];
        out.extend(inner);
        out.extend([
            Token::synth(Kind::RParen, t.pos),
            Token::lit("IS"),
            Token::lit("NULL"),
        ]);
        Ok(out)
    }

    /// Statement-level SQL parsing: classify by head keyword, run the
    /// statement-level checks, and hand the interior to `regular`.
    fn sql_stmt(&mut self, t: Token) -> Result<Sql, Error> {
        if t.any_literal(&["ANALYZE", "EXPLAIN", "ROLLBACK"]) {
            return Err(self.err(&t, "ANALYZE, EXPLAIN and ROLLBACK are not allowed"));
        }

        let mut s = Sql::new(match t.canon.as_str() {
            "SELECT" | "VALUES" | "WITH" => SqlKind::Query,
            "BEGIN" => SqlKind::BeginTransaction,
            "COMMIT" | "END" => SqlKind::Commit,
            "SAVEPOINT" => SqlKind::Savepoint,
            "RELEASE" => SqlKind::Release,
            _ => SqlKind::Exec,
        });

        match t.canon.as_str() {
            "SAVEPOINT" | "RELEASE" => self.saverelease(&mut s, t)?,
            "BEGIN" | "COMMIT" | "END" | "VACUUM" | "REINDEX" => {
                let head = t.clone();
                self.slurp(&mut s, head)?;
            }
            "ALTER" => self.alter(&mut s, t)?,
            "DROP" => self.drop(&mut s, t)?,
            "CREATE" => self.create(&mut s, t)?,
            "INSERT" | "REPLACE" => {
                self.insert(&mut s, t, false, true, true)?;
            }
            "UPDATE" => {
                self.update(&mut s, t, false, true, true)?;
            }
            "DELETE" => {
                self.delete(&mut s, t, false, true, true)?;
            }
            "WITH" => {
                self.with(&mut s, t, false, true, true)?;
            }
            _ => {
                self.regular(&mut s, t, 0, false, true, true)?;
            }
        }
        Ok(s)
    }

    /// SAVEPOINT name ; and RELEASE [SAVEPOINT] name ; digital names
    /// belong to the runtime.
    fn saverelease(&mut self, s: &mut Sql, t: Token) -> Result<(), Error> {
        let release = t.literal("RELEASE");
        s.push(t);
        let mut t = self.next()?;
        if release && t.literal("SAVEPOINT") {
            s.push(t.clone());
            t = self.next()?;
        }
        let nm = t
            .unescape()
            .ok_or_else(|| self.err(&t, "expected a savepoint name"))?;
        if types::digital(&nm) {
            return Err(self.err(&t, "digital savepoint names are reserved by the runtime"));
        }
        s.name = vec![t.clone()];
        s.push(t);
        let semi = self.expect_kind(Kind::Semicolon)?;
        s.push(semi);
        Ok(())
    }

    /// Slurp a simple statement to its semicolon; nothing clever may hide
    /// inside, so arguments and parentheses are rejected.
    fn slurp(&mut self, s: &mut Sql, t: Token) -> Result<(), Error> {
        let mut t = t;
        while t.kind != Kind::Semicolon {
            s.push(t);
            t = self.next()?;
            if matches!(t.kind, Kind::Argument | Kind::LParen | Kind::RParen) {
                return Err(self.unexpected(&t));
            }
        }
        s.push(t);
        Ok(())
    }

    fn alter(&mut self, s: &mut Sql, t: Token) -> Result<(), Error> {
        s.push(t);
        let tbl = self.expect_lit("TABLE")?;
        s.push(tbl);
        let head = self.next()?;
        let (name, t) = self.name(head)?;
        self.chk_dig_tmp(&name)?;
        self.chk_sys(&name)?;
        for nt in name.tokens() {
            s.push(nt.clone());
        }
        match t.canon.as_str() {
            "RENAME" => {
                s.push(t);
                let t = self.next()?;
                if t.literal("TO") {
                    s.push(t);
                    let head = self.next()?;
                    let (to, t) = self.name(head)?;
                    self.chk_dig_tmp(&to)?;
                    self.chk_sys(&to)?;
                    for nt in to.tokens() {
                        s.push(nt.clone());
                    }
                    if t.kind != Kind::Semicolon {
                        return Err(self.unexpected(&t));
                    }
                    s.push(t);
                    Ok(())
                } else {
                    // RENAME COLUMN old TO new
                    self.regular(s, t, 0, false, false, false).map(|_| ())
                }
            }
            "ADD" | "DROP" => {
                s.push(t);
                let t = self.next()?;
                self.regular(s, t, 0, false, false, false).map(|_| ())
            }
            _ => Err(self.unexpected(&t)),
        }
    }

    fn drop(&mut self, s: &mut Sql, t: Token) -> Result<(), Error> {
        s.push(t);
        let t = self.expect_kind(Kind::Literal)?;
        if !t.literal("TABLE") {
            // DROP INDEX/VIEW/TRIGGER name
            return self.slurp(s, t);
        }
        s.push(t);
        let head = self.next()?;
        let t = self.maybe_run(s, head, &["IF", "EXISTS"])?;
        let (name, t) = self.name(t)?;
        self.chk_dig_tmp(&name)?;
        self.chk_sys(&name)?;
        for nt in name.tokens() {
            s.push(nt.clone());
        }
        if t.kind != Kind::Semicolon {
            return Err(self.unexpected(&t));
        }
        s.push(t);
        Ok(())
    }

    fn create(&mut self, s: &mut Sql, t: Token) -> Result<(), Error> {
        s.push(t);
        let mut t = self.next()?;
        let mut temp = false;
        if t.any_literal(&["TEMP", "TEMPORARY"]) {
            temp = true;
            s.push(t.clone());
            t = self.next()?;
        }
        if t.literal("TRIGGER") {
            self.trigger(s, t)
        } else if t.literal("TABLE") {
            self.table(s, t, temp)
        } else {
            // CREATE INDEX / VIEW / VIRTUAL TABLE ...
            self.regular(s, t, 0, false, true, true).map(|_| ())
        }
    }

    /// CREATE TABLE, including the `... FROM IMPORT` special form where the
    /// column definitions are terminated by a synthetic semicolon and the
    /// import is recorded as the single subquery.
    fn table(&mut self, s: &mut Sql, t: Token, mut temp: bool) -> Result<(), Error> {
        s.push(t);
        let head = self.next()?;
        let t = self.maybe_run(s, head, &["IF", "NOT", "EXISTS"])?;
        let (name, mut t) = self.name(t)?;
        if name.on_temp() {
            if temp {
                return Err(self.err(
                    &name.tokens()[0],
                    "TEMPORARY and a temp. schema cannot be combined",
                ));
            }
            temp = true;
        }
        if temp && name.digital_object() {
            return Err(self.err(
                &name.tokens()[name.tokens().len() - 1],
                "digital temporary table names are reserved by the runtime",
            ));
        }
        for nt in name.tokens() {
            s.push(nt.clone());
        }

        if t.literal("AS") {
            s.push(t);
            let t = self.next()?;
            return self.regular(s, t, 0, false, false, true).map(|_| ());
        }

        if t.kind != Kind::LParen {
            return Err(self.err(&t, "expected '(' to begin the column definitions"));
        }
        s.push(t.clone());
        let mut depth = 1usize;
        loop {
            t = self.next()?;
            match t.kind {
                Kind::Semicolon | Kind::Argument => return Err(self.unexpected(&t)),
                Kind::LParen => depth += 1,
                Kind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        s.push(t);
                        break;
                    }
                }
                Kind::Literal if t.head(false) => return Err(self.unexpected(&t)),
                _ => {}
            }
            s.push(t.clone());
        }

        let head = self.next()?;
        let t = self.maybe_run(s, head, &["WITHOUT", "ROWID"])?;
        match t.kind {
            Kind::Semicolon => {
                s.push(t);
                Ok(())
            }
            _ if t.literal("FROM") => {
                // FROM is fake syntax: the DDL ends here
                s.synth(Kind::Semicolon, t.pos);
                let ih = self.expect_lit("IMPORT")?;
                let (imp, after) = self.import_stmt(ih.pos)?;
                if after.kind != Kind::Semicolon {
                    return Err(self.err(&after, "expected ';' to end IMPORT"));
                }
                s.kind = SqlKind::CreateTableFrom;
                s.name = name.tokens().to_vec();
                s.subqueries.push(imp);
                Ok(())
            }
            _ => Err(self.unexpected(&t)),
        }
    }

    /// Triggers carry their own statement list; only plain DML and SELECT
    /// may appear inside, without arguments or imports.
    fn trigger(&mut self, s: &mut Sql, t: Token) -> Result<(), Error> {
        let mut t = t;
        while !t.literal("BEGIN") {
            s.push(t);
            t = self.next()?;
            if matches!(
                t.kind,
                Kind::Argument | Kind::LParen | Kind::RParen | Kind::Semicolon
            ) {
                return Err(self.unexpected(&t));
            }
        }
        s.push(t);

        let mut stmts = 0;
        loop {
            let t = self.next()?;
            if t.literal("END") {
                if stmts == 0 {
                    return Err(self.err(&t, "trigger has no actions"));
                }
                s.push(t);
                let semi = self.expect_kind(Kind::Semicolon)?;
                s.push(semi);
                return Ok(());
            }
            match t.canon.as_str() {
                "INSERT" | "REPLACE" => {
                    self.insert(s, t, false, false, false)?;
                }
                "UPDATE" => {
                    self.update(s, t, false, false, false)?;
                }
                "DELETE" => {
                    self.delete(s, t, false, false, false)?;
                }
                "SELECT" => {
                    self.regular(s, t, 0, false, false, false)?;
                }
                _ => {
                    return Err(self.err(
                        &t,
                        "only INSERT, UPDATE, DELETE, REPLACE and SELECT are allowed in a trigger",
                    ));
                }
            }
            stmts += 1;
        }
    }

    /// INSERT [OR method] INTO name [(cols)] ... The `(cols) FROM IMPORT`
    /// form classifies as InsertFrom, with the FROM not written to the
    /// token buffer so the compiler can append its VALUES template.
    fn insert(
        &mut self,
        s: &mut Sql,
        t: Token,
        subq: bool,
        etl: bool,
        arg: bool,
    ) -> Result<Token, Error> {
        if subq {
            return Err(self.err(&t, "INSERT is not valid in a subquery"));
        }
        let replace = t.literal("REPLACE");
        s.push(t);
        let mut t = self.expect_kind(Kind::Literal)?;
        if t.literal("OR") {
            if replace {
                return Err(self.err(&t, "REPLACE cannot carry a conflict clause"));
            }
            s.push(t);
            t = self.expect_kind(Kind::Literal)?;
            if !t.any_literal(&["ROLLBACK", "ABORT", "FAIL", "IGNORE", "REPLACE"]) {
                return Err(self.err(&t, "unknown conflict resolution method"));
            }
            s.conflict = Some(t.canon.clone());
            s.push(t);
            t = self.next()?;
        }
        if !t.literal("INTO") {
            return Err(self.err(&t, "expected INTO"));
        }
        s.push(t);
        let head = self.next()?;
        let (name, mut t) = self.name(head)?;
        self.chk_dig_tmp(&name)?;
        self.chk_sys(&name)?;
        for nt in name.tokens() {
            s.push(nt.clone());
        }

        let mut cols: Vec<Token> = vec![];
        if t.kind == Kind::LParen {
            s.push(t.clone());
            loop {
                let c = self.expect_lit_or_str()?;
                cols.push(c.clone());
                s.push(c);
                t = self.next()?;
                if t.comma() {
                    s.push(t.clone());
                    continue;
                }
                if t.kind == Kind::RParen {
                    s.push(t.clone());
                    break;
                }
                return Err(self.err(&t, "expected ',' or ')' in the column list"));
            }
            t = self.next()?;
        }

        if t.literal("FROM") {
            if cols.is_empty() {
                return Err(self.err(&t, "INSERT ... FROM IMPORT requires a column list"));
            }
            let ih = self.expect_lit("IMPORT")?;
            let (imp, after) = self.import_stmt(ih.pos)?;
            if after.kind != Kind::Semicolon {
                return Err(self.err(&after, "expected ';' to end IMPORT"));
            }
            s.kind = SqlKind::InsertFrom;
            s.name = name.tokens().to_vec();
            s.cols = cols;
            s.subqueries.push(imp);
            return Ok(after);
        }

        match t.canon.as_str() {
            "DEFAULT" => {
                s.push(t);
                let v = self.expect_lit("VALUES")?;
                s.push(v);
                let semi = self.expect_kind(Kind::Semicolon)?;
                s.push(semi.clone());
                Ok(semi)
            }
            "VALUES" | "SELECT" => self.regular(s, t, 0, subq, etl, arg),
            "WITH" => self.with(s, t, subq, etl, arg),
            _ => Err(self.unexpected(&t)),
        }
    }

    fn update(
        &mut self,
        s: &mut Sql,
        t: Token,
        subq: bool,
        etl: bool,
        arg: bool,
    ) -> Result<Token, Error> {
        if subq {
            return Err(self.err(&t, "UPDATE is not valid in a subquery"));
        }
        s.push(t);
        let mut t = self.expect_lit_or_str()?;
        if t.literal("OR") {
            s.push(t);
            let m = self.expect_kind(Kind::Literal)?;
            s.push(m);
            t = self.next()?;
        }
        let (name, t) = self.name(t)?;
        self.chk_dig_tmp(&name)?;
        self.chk_sys(&name)?;
        for nt in name.tokens() {
            s.push(nt.clone());
        }
        if !t.literal("SET") {
            return Err(self.err(&t, "expected SET"));
        }
        self.regular(s, t, 0, subq, etl, arg)
    }

    fn delete(
        &mut self,
        s: &mut Sql,
        t: Token,
        subq: bool,
        etl: bool,
        arg: bool,
    ) -> Result<Token, Error> {
        if subq {
            return Err(self.err(&t, "DELETE is not valid in a subquery"));
        }
        s.push(t);
        let f = self.expect_lit("FROM")?;
        s.push(f);
        let head = self.next()?;
        let (name, t) = self.name(head)?;
        self.chk_dig_tmp(&name)?;
        self.chk_sys(&name)?;
        for nt in name.tokens() {
            s.push(nt.clone());
        }
        self.regular(s, t, 0, subq, etl, arg)
    }

    /// WITH [RECURSIVE] name [(cols)] AS ( body ) [, ...] main-statement.
    /// When `subq` is set the whole construct lives inside parentheses and
    /// parsing ends at the matching ')'.
    fn with(
        &mut self,
        s: &mut Sql,
        t: Token,
        subq: bool,
        etl: bool,
        arg: bool,
    ) -> Result<Token, Error> {
        s.push(t);
        let mut first = true;
        let mut t;
        loop {
            t = self.expect_lit_or_str()?;
            let mut rec = false;
            if t.literal("RECURSIVE") {
                if !first {
                    return Err(self.unexpected(&t));
                }
                s.push(t);
                rec = true;
                t = self.expect_lit_or_str()?;
            }
            first = false;
            s.push(t);
            t = self.next()?;
            if t.kind == Kind::LParen {
                s.push(t.clone());
                while t.kind != Kind::RParen {
                    t = self.next()?;
                    s.push(t.clone());
                }
                t = self.next()?;
            }
            if !t.literal("AS") {
                return Err(self.err(&t, "expected AS in WITH clause"));
            }
            s.push(t);
            let lp = self.expect_kind(Kind::LParen)?;
            s.push(lp);
            t = self.next()?;
            if t.literal("WITH") {
                if rec {
                    return Err(self.unexpected(&t));
                }
                self.with(s, t, true, etl, arg)?;
            } else {
                // recursive table expressions may not contain imports, their
                // bodies run more than once
                self.regular(s, t, 1, true, if rec { false } else { etl }, arg)?;
            }
            t = self.next()?;
            if !t.comma() {
                break;
            }
            s.push(t.clone());
        }

        match t.canon.as_str() {
            "INSERT" | "REPLACE" => self.insert(s, t, subq, etl, arg),
            "UPDATE" => self.update(s, t, subq, etl, arg),
            "DELETE" => self.delete(s, t, subq, etl, arg),
            "SELECT" | "VALUES" => {
                let depth = if subq { 1 } else { 0 };
                self.regular(s, t, depth, subq, etl, arg)
            }
            _ => Err(self.err(&t, "expected a statement after the WITH clause")),
        }
    }

    /// The mop-up parser: balances parentheses, finds the end of the
    /// statement or subquery, lifts IMPORT subqueries into placeholders and
    /// desugars @ arguments along the way. Returns the terminating token
    /// (';' for statements, the closing ')' for subqueries), already pushed.
    fn regular(
        &mut self,
        s: &mut Sql,
        t: Token,
        depth: i32,
        subq: bool,
        etl: bool,
        arg: bool,
    ) -> Result<Token, Error> {
        let mut t = t;
        let mut depth = depth;
        loop {
            match t.kind {
                Kind::Semicolon => {
                    if subq {
                        return Err(self.err(&t, "unexpected ';' inside a subquery"));
                    }
                    if depth != 0 {
                        return Err(self.err(&t, "unbalanced parentheses: (;"));
                    }
                    s.push(t.clone());
                    return Ok(t);
                }

                Kind::RParen => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(self.err(&t, "unbalanced parentheses: ())"));
                    }
                    s.push(t.clone());
                    if depth == 0 && subq {
                        return Ok(t);
                    }
                    t = self.next()?;
                }

                Kind::LParen => {
                    depth += 1;
                    s.push(t.clone());
                    t = self.next()?;
                    if t.kind != Kind::Literal {
                        continue;
                    }
                    if t.literal("WITH") {
                        let end = self.with(s, t, true, etl, arg)?;
                        depth -= 1;
                        if depth == 0 && subq {
                            return Ok(end);
                        }
                        t = self.next()?;
                    } else if t.literal("IMPORT") {
                        if !etl {
                            return Err(self.err(&t, "illegal IMPORT subquery"));
                        }
                        s.synth(Kind::Placeholder, t.pos);
                        let (imp, after) = self.import_stmt(t.pos)?;
                        if after.kind != Kind::RParen {
                            return Err(
                                self.err(&after, "expected ')' to close the IMPORT subquery")
                            );
                        }
                        s.subqueries.push(imp);
                        depth -= 1;
                        s.synth(Kind::RParen, after.pos);
                        if depth == 0 && subq {
                            return Ok(after);
                        }
                        t = self.next()?;
                    } else if t.head(false) && !t.head(true) {
                        return Err(self.err(&t, format!("'{}' cannot start a subquery", t.value)));
                    }
                    // anything else: reconsider t on the next round
                }

                Kind::Argument => {
                    if !arg {
                        return Err(self.err(&t, "illegal @ substitution"));
                    }
                    let ts = self.desugar(&t)?;
                    s.synth(Kind::LParen, t.pos);
                    s.tokens.extend(ts);
                    s.synth(Kind::RParen, t.pos);
                    t = self.next()?;
                }

                _ => {
                    if t.any_literal(&["UNION", "INTERSECT", "EXCEPT"]) {
                        let was_union = t.literal("UNION");
                        s.push(t.clone());
                        t = self.expect_kind(Kind::Literal)?;
                        if t.literal("ALL") {
                            if !was_union {
                                return Err(self.err(&t, "ALL is only valid after UNION"));
                            }
                            s.push(t.clone());
                            t = self.expect_kind(Kind::Literal)?;
                        }
                        match t.canon.as_str() {
                            "IMPORT" => {
                                if !etl {
                                    return Err(self.err(&t, "illegal IMPORT subquery"));
                                }
                                s.synth(Kind::Placeholder, t.pos);
                                let (imp, after) = self.import_stmt(t.pos)?;
                                s.subqueries.push(imp);
                                t = after;
                                continue; // recognize the terminator next round
                            }
                            "SELECT" | "VALUES" => {}
                            _ => {
                                return Err(self.err(
                                    &t,
                                    format!("'{}' cannot follow a compound operator", t.value),
                                ));
                            }
                        }
                    }
                    s.push(t.clone());
                    t = self.next()?;
                }
            }
        }
    }

    /// An optionally qualified name: 1 or 3 tokens. Returns the name and
    /// the first token after it.
    fn name(&mut self, t: Token) -> Result<(Name, Token), Error> {
        if t.kind != Kind::Literal && t.kind != Kind::Str {
            return Err(self.err(&t, "expected a name"));
        }
        let mut toks = vec![t];
        let dot = self.next()?;
        if !dot.literal(".") {
            return Ok((Name::new(toks), dot));
        }
        toks.push(dot);
        let obj = self.expect_lit_or_str()?;
        toks.push(obj);
        let after = self.next()?;
        Ok((Name::new(toks), after))
    }

    /// Eats a run of literals such as IF NOT EXISTS when the first matches.
    fn maybe_run(&mut self, s: &mut Sql, t: Token, lits: &[&str]) -> Result<Token, Error> {
        if !t.literal(lits[0]) {
            return Ok(t);
        }
        s.push(t);
        for lit in &lits[1..] {
            let n = self.expect_lit(lit)?;
            s.push(n);
        }
        self.next()
    }

    fn chk_dig_tmp(&self, name: &Name) -> Result<(), Error> {
        if name.on_temp() && name.digital_object() {
            return Err(self.err(
                &name.tokens()[0],
                "digital temporary table names are reserved by the runtime",
            ));
        }
        Ok(())
    }

    fn chk_sys(&self, name: &Name) -> Result<(), Error> {
        if name.reserved() {
            return Err(self.err(
                &name.tokens()[0],
                "sys.args and sys.env are reserved by the runtime",
            ));
        }
        Ok(())
    }
}
