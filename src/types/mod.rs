use serde::Serialize;

/// Kind of a token as produced by the lexer. Placeholder is synthetic: the
/// parser injects it where a lifted IMPORT subquery used to sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Kind {
    Literal,
    Str,
    Argument,
    Placeholder,
    LParen,
    RParen,
    Semicolon,
}

/// Position of a token in the input, zero based; columns are byte offsets
/// into the line, made human friendly (1 based) only on display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pos {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: Kind,
    /// Original text. For strings this includes the delimiters so unescape
    /// can be inverted; for arguments the leading `@` is stripped.
    pub value: String,
    /// Upper-cased value, only meaningful for literals. Keyword matching is
    /// case-insensitive through this field.
    pub canon: String,
    /// String delimiter: one of `'`, `"`, `` ` ``, `[` or `x` for blobs.
    pub delim: Option<char>,
    pub pos: Pos,
}

impl Token {
    /// Synthesize a literal token, used by desugaring and the compiler.
    pub fn lit(s: &str) -> Token {
        Token {
            kind: Kind::Literal,
            value: s.to_string(),
            canon: s.to_uppercase(),
            delim: None,
            pos: Pos::default(),
        }
    }

    /// Synthesize a single-quoted string token from raw text.
    pub fn quoted(s: &str) -> Token {
        Token {
            kind: Kind::Str,
            value: escape_str(s),
            canon: String::new(),
            delim: Some('\''),
            pos: Pos::default(),
        }
    }

    pub fn synth(kind: Kind, pos: Pos) -> Token {
        Token {
            kind,
            value: String::new(),
            canon: String::new(),
            delim: None,
            pos,
        }
    }

    pub fn literal(&self, s: &str) -> bool {
        self.kind == Kind::Literal && self.canon == s
    }

    pub fn any_literal(&self, lits: &[&str]) -> bool {
        self.kind == Kind::Literal && lits.iter().any(|l| self.canon == *l)
    }

    pub fn comma(&self) -> bool {
        self.literal(",")
    }

    /// Operators never get a space before or after them when a token run is
    /// rendered back to SQL.
    pub fn is_op(&self) -> bool {
        self.kind == Kind::Literal
            && self
                .value
                .as_bytes()
                .first()
                .is_some_and(|b| b"!@%&|-+=/<>*.,~".contains(b))
    }

    /// Head reports whether the token may begin a statement (or a subquery
    /// when `subquery` is set) in this SQLite superset.
    pub fn head(&self, subquery: bool) -> bool {
        if self.kind != Kind::Literal {
            return false;
        }
        let lits: &[&str] = if subquery {
            &SUBQUERY_HEADS
        } else {
            &STATEMENT_HEADS
        };
        lits.iter().any(|l| self.canon == *l)
    }

    /// Unescape the token into its raw text: literals pass through, strings
    /// drop their delimiters and undouble the quote. None for every other
    /// kind.
    pub fn unescape(&self) -> Option<String> {
        match self.kind {
            Kind::Literal => Some(self.value.clone()),
            Kind::Str => {
                let end = self.value.len() - 1;
                match self.delim {
                    Some('x') => Some(self.value[2..end].to_string()),
                    Some('[') => Some(self.value[1..end].to_string()),
                    Some('\'') => Some(self.value[1..end].replace("''", "'")),
                    Some('`') => Some(self.value[1..end].replace("``", "`")),
                    Some('"') => Some(self.value[1..end].replace("\"\"", "\"")),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

const SUBQUERY_HEADS: [&str; 3] = ["IMPORT", "SELECT", "WITH"];

const STATEMENT_HEADS: [&str; 24] = [
    "END",
    "USE",
    "ASSERT",
    "DISPLAY",
    "IMPORT",
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "REPLACE",
    "WITH",
    "CREATE",
    "DROP",
    "REINDEX",
    "ALTER",
    "VACUUM",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "RELEASE",
    "VALUES",
];

/// True if s consists solely of ASCII digits. Digital names are reserved by
/// the runtime for its temporary tables and savepoints.
pub fn digital(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Escape s as a double-quoted SQLite identifier.
pub fn escape_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Escape s as a single-quoted SQLite string.
pub fn escape_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
