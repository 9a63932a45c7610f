use crate::parser::nodes::LineEnding;
use crate::types::Pos;

/// A value that is either known at compile time or computed by a
/// single-value subquery when the instruction executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg<T> {
    Lit(T),
    Sub(String),
}

/// One unit of work for the machine. Options live on the instruction; the
/// only runtime indirection is `Arg` subquery resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Record a script position for wrapping runtime errors.
    ErrPos(Pos),

    UseStdin,
    UseStdout,
    UseFileInput(Arg<String>),
    UseFileOutput(Arg<String>),

    SetDecoder(FormatSpec),
    SetEncoder(FormatSpec),
    SetEncodingFrame(Option<String>),

    /// Internal savepoint pair guarding lifted subquery groups.
    Savepoint,
    Release,

    /// User transaction management; the modeled stack is updated, then the
    /// verbatim SQL runs.
    Begin(String),
    Commit(String),
    UserSavepoint { name: String, sql: String },
    UserRelease { name: String, sql: String },

    Exec(String),
    Query(String),
    DropTempTables(Vec<String>),

    Import(ImportSpec),
    InsertWith(InsertSpec),

    Assert {
        pos: Pos,
        message: String,
        sql: String,
    },
}

/// An import into a (possibly created) table. `table` is already escaped.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpec {
    /// Internal imports feed lifted subqueries; they are always temporary.
    pub internal: bool,
    pub temporary: bool,
    pub table: String,
    pub header: Vec<String>,
    pub frame: Option<String>,
    pub limit: Option<Arg<i64>>,
    pub offset: Option<Arg<i64>>,
    /// CREATE TABLE ... FROM IMPORT: the DDL runs first and the created
    /// table's columns become the header.
    pub ddl: Option<String>,
}

/// INSERT INTO ... FROM IMPORT: the synthesized insert statement with its
/// declared header.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertSpec {
    pub table: String,
    pub frame: Option<String>,
    pub insert: String,
    pub header: Vec<String>,
    pub limit: Option<Arg<i64>>,
    pub offset: Option<Arg<i64>>,
}

/// A codec configuration as compiled; subquery-valued options resolve when
/// the decoder or encoder is installed.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatSpec {
    Csv {
        strict: bool,
        delim: Option<Arg<char>>,
        eol: LineEnding,
        null: Option<Arg<String>>,
        header: bool,
    },
    Raw {
        strict: bool,
        delim: Option<Arg<char>>,
        eol: LineEnding,
        null: Option<Arg<String>>,
        header: bool,
    },
}
