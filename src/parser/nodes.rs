use serde::Serialize;

use crate::types::{self, Kind, Pos, Token};

/// One parsed statement. The node set is closed, so unlike a general SQL
/// tree this is a plain enum; everything the island parser does not
/// understand lives inside `Sql.tokens` as an opaque, brace-matched run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Node {
    Use(Use),
    Assert(Assert),
    Import(Import),
    Display(Display),
    Sql(Sql),
}

impl Node {
    pub fn pos(&self) -> Pos {
        match self {
            Node::Use(n) => n.pos,
            Node::Assert(n) => n.pos,
            Node::Import(n) => n.pos,
            Node::Display(n) => n.pos,
            Node::Sql(n) => n.pos(),
        }
    }
}

/// USE [DATABASE|DB] name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Use {
    pub pos: Pos,
    pub db: String,
}

/// ASSERT "message", (subquery). The subquery is already desugared into a
/// plain token run by the parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assert {
    pub pos: Pos,
    pub message: String,
    pub subquery: Sql,
}

/// IMPORT [TEMPORARY] [name] [(hdr...)] [FROM device] [WITH format]
/// [FRAME name] [LIMIT n] [OFFSET n]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Import {
    pub pos: Pos,
    pub temporary: bool,
    pub table: Option<String>,
    pub header: Vec<String>,
    pub device: Option<Device>,
    pub format: Option<Format>,
    pub frame: Option<String>,
    pub limit: Option<IntExpr>,
    pub offset: Option<IntExpr>,
}

/// DISPLAY [TO device] [FRAME name] [AS format]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Display {
    pub pos: Pos,
    pub device: Option<Device>,
    pub frame: Option<String>,
    pub format: Option<Format>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Device {
    Stdio,
    File(StrExpr),
}

/// A scalar option that is either written down literally or computed by a
/// single-column subquery at runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StrExpr {
    Lit(String),
    Sub(Sql),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IntExpr {
    Lit(i64),
    Sub(Sql),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RuneExpr {
    Lit(char),
    Sub(Sql),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum LineEnding {
    #[default]
    Default,
    Lf,
    Crlf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Format {
    Csv {
        pos: Pos,
        strict: bool,
        delim: Option<RuneExpr>,
        quote: Option<RuneExpr>,
        eol: LineEnding,
        null: Option<StrExpr>,
        header: bool,
    },
    Raw {
        pos: Pos,
        strict: bool,
        delim: Option<RuneExpr>,
        eol: LineEnding,
        null: Option<StrExpr>,
        header: bool,
    },
    Json {
        pos: Pos,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlKind {
    Query,
    Exec,
    CreateTableFrom,
    InsertFrom,
    Savepoint,
    Release,
    BeginTransaction,
    Commit,
}

/// An SQL statement or subquery, without outer parentheses. Placeholder
/// tokens in `tokens` index `subqueries` in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sql {
    pub kind: SqlKind,
    /// Target name of CreateTableFrom/InsertFrom, or the savepoint name.
    pub name: Vec<Token>,
    /// Declared columns of an InsertFrom.
    pub cols: Vec<Token>,
    /// Conflict method of `INSERT OR <method>`, passed through verbatim.
    pub conflict: Option<String>,
    pub subqueries: Vec<Import>,
    pub tokens: Vec<Token>,
}

impl Sql {
    pub fn new(kind: SqlKind) -> Sql {
        Sql {
            kind,
            name: vec![],
            cols: vec![],
            conflict: None,
            subqueries: vec![],
            tokens: vec![],
        }
    }

    pub fn pos(&self) -> Pos {
        self.tokens.first().map(|t| t.pos).unwrap_or_default()
    }

    pub fn push(&mut self, t: Token) {
        self.tokens.push(t);
    }

    pub fn synth(&mut self, kind: Kind, pos: Pos) {
        self.tokens.push(Token::synth(kind, pos));
    }
}

/// A qualified SQLite name of the form [schema.]object, kept as the original
/// tokens so errors can point at them.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    toks: Vec<Token>,
}

impl Name {
    /// From 1 (object) or 3 (schema, dot, object) tokens.
    pub fn new(toks: Vec<Token>) -> Name {
        debug_assert!(toks.len() == 1 || toks.len() == 3);
        Name { toks }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.toks
    }

    pub fn schema(&self) -> Option<String> {
        if self.toks.len() == 3 {
            self.toks[0].unescape()
        } else {
            None
        }
    }

    pub fn object(&self) -> String {
        self.toks[self.toks.len() - 1]
            .unescape()
            .unwrap_or_default()
    }

    fn schema_is(&self, what: &str) -> bool {
        self.schema()
            .is_some_and(|s| s.eq_ignore_ascii_case(what))
    }

    pub fn on_sys(&self) -> bool {
        self.schema_is("sys")
    }

    pub fn on_temp(&self) -> bool {
        self.schema_is("temp")
    }

    pub fn digital_object(&self) -> bool {
        types::digital(&self.object())
    }

    /// sys.args and sys.env belong to the runtime.
    pub fn reserved(&self) -> bool {
        if !self.on_sys() {
            return false;
        }
        let o = self.object().to_lowercase();
        o == "args" || o == "env"
    }

    /// Fully escaped serialization, usable in synthesized SQL.
    pub fn escaped(&self) -> String {
        match self.schema() {
            Some(s) => format!(
                "{}.{}",
                types::escape_ident(&s),
                types::escape_ident(&self.object())
            ),
            None => types::escape_ident(&self.object()),
        }
    }
}
