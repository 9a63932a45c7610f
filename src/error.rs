use std::fmt;

use crate::types::Pos;

/// Kind partitions errors by the stage and surface behavior: script errors
/// carry a position and abort, system errors wrap the OS, internal errors
/// mean a bug in sqetl itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Lex,
    Parse,
    Compile,
    Runtime,
    System,
    Internal,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lex => "Lex",
            Self::Parse => "Parse",
            Self::Compile => "Compile",
            Self::Runtime => "Runtime",
            Self::System => "System",
            Self::Internal => "Internal",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Lex => "The script contains characters that do not form a valid token",
            Self::Parse => "The script contains a statement with invalid syntax",
            Self::Compile => "The script is well formed but cannot be lowered to instructions",
            Self::Runtime => "A statement failed while the script was executing",
            Self::System => "The operating system reported a failure",
            Self::Internal => "sqetl violated one of its own invariants, please file a bug",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: Kind,
    pub file: String,
    pub pos: Option<Pos>,
    pub msg: String,
    pub note: String,
}

impl Error {
    pub fn new(kind: Kind, file: impl Into<String>, pos: Pos, msg: impl Into<String>) -> Self {
        Error {
            kind,
            file: file.into(),
            pos: Some(pos),
            msg: msg.into(),
            note: String::new(),
        }
    }

    /// A positionless error; the VM attaches the last recorded script
    /// position before reporting it.
    pub fn bare(kind: Kind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            file: String::new(),
            pos: None,
            msg: msg.into(),
            note: String::new(),
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::bare(Kind::Runtime, msg)
    }

    pub fn system(msg: impl Into<String>) -> Self {
        Self::bare(Kind::System, msg)
    }

    /// Internal errors record where they were raised; the message tells the
    /// user to report them rather than fix their script.
    pub fn internal(msg: impl Into<String>) -> Self {
        let mut e = Self::bare(Kind::Internal, format!("internal error: {}", msg.into()));
        e.note = format!(
            "this is a bug in sqetl, not in your script\n{}",
            std::backtrace::Backtrace::capture()
        );
        e
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Fill in file and position if the error does not carry them yet.
    pub fn at(mut self, file: &str, pos: Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        if self.file.is_empty() {
            self.file = file.to_string();
        }
        self
    }

    /// Renders the error with colors and the offending source line, in the
    /// shape `error[Kind]: msg` followed by position and context.
    pub fn print(&self, b: &mut String, source: &str) {
        colored(b, "error", Color::Red);
        b.push('[');
        colored(b, self.kind.name(), Color::Red);
        b.push_str("]: ");
        b.push_str(&self.msg);
        b.push('\n');

        if let Some(pos) = self.pos {
            colored(b, " -> ", Color::Blue);
            colored(b, &self.file, Color::Cyan);
            colored(
                b,
                &format!(":{}:{}", pos.line + 1, pos.start + 1),
                Color::Yellow,
            );
            b.push('\n');

            if let Some(line) = source.lines().nth(pos.line) {
                colored(b, &format!(" {:02} | ", pos.line + 1), Color::Blue);
                b.push_str(line);
                colored(b, "\n    |", Color::Blue);
                let repeat = if pos.end > pos.start {
                    pos.end - pos.start
                } else {
                    1
                };
                colored(
                    b,
                    &format!(
                        " {}{} error occurs here\n",
                        " ".repeat(pos.start),
                        "~".repeat(repeat)
                    ),
                    Color::Red,
                );
            }
        }

        if !self.note.is_empty() {
            colored(b, "    ~ note: ", Color::Blue);
            b.push_str(&self.note);
            b.push('\n');
        }

        colored(b, "  * ", Color::Blue);
        colored(b, self.kind.name(), Color::Blue);
        b.push_str(": ");
        b.push_str(self.kind.description());
        b.push('\n');
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pos {
            Some(p) => write!(
                f,
                "{}:{}:{}: {}",
                self.file,
                p.line + 1,
                p.start + 1,
                self.msg
            ),
            None => write!(f, "{}", self.msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::system(err.to_string())
    }
}

#[derive(Debug)]
pub enum Color {
    Reset,
    Red,
    Blue,
    Cyan,
    Yellow,
}

impl Color {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Reset => "\x1b[0m",
            Self::Red => "\x1b[31m",
            Self::Blue => "\x1b[94m",
            Self::Yellow => "\x1b[93m",
            Self::Cyan => "\x1b[96m",
        }
    }
}

pub fn colored(b: &mut String, s: &str, c: Color) {
    b.push_str(c.as_str());
    b.push_str(s);
    b.push_str(Color::Reset.as_str());
}
