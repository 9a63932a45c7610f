use crate::error::{Error, Kind as ErrKind};
use crate::types::{Kind, Pos, Token};


/// Byte level scanner over the script source. The first illegal token
/// terminates the stream and is surfaced as the Err variant.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    line_pos: usize,
    name: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a [u8], name: &'a str) -> Lexer<'a> {
        Lexer {
            source,
            pos: 0,
            line: 0,
            line_pos: 0,
            name,
        }
    }

    fn advance(&mut self) {
        if self.is(b'\n') {
            self.line += 1;
            self.line_pos = 0;
        } else {
            self.line_pos += 1;
        }
        self.pos += 1;
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn cur(&self) -> u8 {
        self.source[self.pos]
    }

    fn is(&self, c: u8) -> bool {
        self.source.get(self.pos).is_some_and(|b| *b == c)
    }

    fn next_is(&self, c: u8) -> bool {
        self.source.get(self.pos + 1).is_some_and(|b| *b == c)
    }

    fn next_isp(&self, p: impl Fn(u8) -> bool) -> bool {
        self.source.get(self.pos + 1).is_some_and(|b| p(*b))
    }

    fn here(&self) -> Pos {
        Pos {
            line: self.line,
            start: self.line_pos,
            end: self.line_pos,
        }
    }

    fn err(&self, msg: impl Into<String>, note: &str, start: Pos) -> Error {
        let mut pos = start;
        pos.end = if pos.line == self.line && self.line_pos > pos.start {
            self.line_pos
        } else {
            pos.start + 1
        };
        let mut e = Error::new(ErrKind::Lex, self.name, pos, msg);
        if !note.is_empty() {
            e = e.with_note(note);
        }
        e
    }

    fn text(&self, from: usize) -> String {
        String::from_utf8_lossy(&self.source[from..self.pos]).into_owned()
    }

    fn token(&self, kind: Kind, from: usize, start: Pos) -> Token {
        let value = self.text(from);
        let canon = if kind == Kind::Literal {
            value.to_uppercase()
        } else {
            String::new()
        };
        let mut pos = start;
        pos.end = if pos.line == self.line {
            self.line_pos
        } else {
            pos.start + 1
        };
        Token {
            kind,
            value,
            canon,
            delim: None,
            pos,
        }
    }

    pub fn run(mut self) -> Result<Vec<Token>, Error> {
        let mut out = vec![];
        while !self.is_eof() {
            match self.cur() {
                b' ' | b'\t' | b'\r' | b'\n' => self.advance(),
                b'#' => self.line_comment(),
                b'-' => {
                    if self.next_is(b'-') {
                        self.line_comment();
                    } else {
                        out.push(self.operator(1));
                    }
                }
                b'/' => {
                    if self.next_is(b'*') {
                        self.block_comment()?;
                    } else {
                        out.push(self.operator(1));
                    }
                }
                b'*' => {
                    if self.next_is(b'/') {
                        return Err(self.err("*/ without /*", "", self.here()));
                    }
                    out.push(self.operator(1));
                }
                b'|' => {
                    let n = if self.next_is(b'|') { 2 } else { 1 };
                    out.push(self.operator(n));
                }
                b'=' => {
                    let n = if self.next_is(b'=') { 2 } else { 1 };
                    out.push(self.operator(n));
                }
                b'<' => {
                    let n = if self.next_isp(|b| b"<=>".contains(&b)) { 2 } else { 1 };
                    out.push(self.operator(n));
                }
                b'>' => {
                    let n = if self.next_isp(|b| b"=>".contains(&b)) { 2 } else { 1 };
                    out.push(self.operator(n));
                }
                b'!' => {
                    if !self.next_is(b'=') {
                        return Err(self.err("! without =", "", self.here()));
                    }
                    out.push(self.operator(2));
                }
                b'%' | b'&' | b'+' | b'~' | b',' => out.push(self.operator(1)),
                b'(' => out.push(self.single(Kind::LParen)),
                b')' => out.push(self.single(Kind::RParen)),
                b';' => out.push(self.single(Kind::Semicolon)),
                b'\'' | b'"' | b'`' => out.push(self.qstring()?),
                b'[' => out.push(self.bstring()?),
                b']' => return Err(self.err("] without [", "", self.here())),
                c @ (b'$' | b'?' | b':') => {
                    return Err(self.err(
                        format!("a '{}' bind is invalid: only @ binds are allowed", c as char),
                        "",
                        self.here(),
                    ));
                }
                c @ (b'\\' | b'^' | b'{' | b'}') => {
                    return Err(self.err(
                        format!("unrecognized token: '{}'", c as char),
                        "",
                        self.here(),
                    ));
                }
                b'@' => out.push(self.argument()?),
                b'.' => {
                    if self.next_isp(|b| b.is_ascii_digit()) {
                        out.push(self.number()?);
                    } else {
                        out.push(self.operator(1));
                    }
                }
                b'0'..=b'9' => out.push(self.number()?),
                b'x' | b'X' if self.next_is(b'\'') => out.push(self.blob()?),
                c if c < b' ' => {
                    return Err(self.err(
                        format!("invalid control code {:#04x} in input", c),
                        "",
                        self.here(),
                    ));
                }
                _ => out.push(self.literal()),
            }
        }
        Ok(out)
    }

    fn line_comment(&mut self) {
        while !self.is_eof() && !self.is(b'\n') {
            self.advance();
        }
    }

    fn block_comment(&mut self) -> Result<(), Error> {
        let start = self.here();
        self.advance(); // skip /
        self.advance(); // skip *
        while !self.is_eof() {
            if self.is(b'*') && self.next_is(b'/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(self.err("EOF in /* */ comment", "", start))
    }

    fn single(&mut self, kind: Kind) -> Token {
        let start = self.here();
        let from = self.pos;
        self.advance();
        self.token(kind, from, start)
    }

    fn operator(&mut self, len: usize) -> Token {
        let start = self.here();
        let from = self.pos;
        for _ in 0..len {
            self.advance();
        }
        self.token(Kind::Literal, from, start)
    }

    fn qstring(&mut self) -> Result<Token, Error> {
        let delim = self.cur();
        let start = self.here();
        let from = self.pos;
        self.advance();
        while !self.is_eof() {
            if self.is(delim) {
                if self.next_is(delim) {
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                let mut t = self.token(Kind::Str, from, start);
                t.delim = Some(delim as char);
                return Ok(t);
            }
            self.advance();
        }
        let d = delim as char;
        Err(self.err(format!("EOF in {d}string{d}"), "", start))
    }

    fn bstring(&mut self) -> Result<Token, Error> {
        let start = self.here();
        let from = self.pos;
        self.advance();
        while !self.is_eof() {
            if self.is(b']') {
                self.advance();
                let mut t = self.token(Kind::Str, from, start);
                t.delim = Some('[');
                return Ok(t);
            }
            self.advance();
        }
        Err(self.err("EOF in [string]", "", start))
    }

    fn blob(&mut self) -> Result<Token, Error> {
        let start = self.here();
        let from = self.pos;
        self.advance(); // x
        self.advance(); // '
        while !self.is_eof() && self.cur().is_ascii_hexdigit() {
            self.advance();
        }
        if !self.is(b'\'') {
            return Err(self.err(
                "invalid blob literal",
                "a blob is hexadecimal data wrapped in x'...'",
                start,
            ));
        }
        self.advance();
        let mut t = self.token(Kind::Str, from, start);
        t.delim = Some('x');
        Ok(t)
    }

    fn argument(&mut self) -> Result<Token, Error> {
        let start = self.here();
        self.advance(); // skip @, not part of the value
        let from = self.pos;
        if self.is_eof() || end_of_literal(self.cur()) {
            return Err(self.err("@ with no argument", "", start));
        }
        if self.cur().is_ascii_digit() {
            while !self.is_eof() && self.cur().is_ascii_digit() {
                self.advance();
            }
        } else {
            while !self.is_eof() && !end_of_literal(self.cur()) {
                self.advance();
            }
        }
        Ok(self.token(Kind::Argument, from, start))
    }

    fn number(&mut self) -> Result<Token, Error> {
        let start = self.here();
        let from = self.pos;

        if self.is(b'0') && self.next_isp(|b| b == b'x' || b == b'X') {
            self.advance();
            self.advance();
            if self.is_eof() || !self.cur().is_ascii_hexdigit() {
                return Err(self.err("unexpected end in hex literal", "", start));
            }
            while !self.is_eof() && self.cur().is_ascii_hexdigit() {
                self.advance();
            }
            return Ok(self.token(Kind::Literal, from, start));
        }

        let mut dot_seen = self.is(b'.');
        let mut e_seen = false;
        let mut last = self.cur();
        self.advance();
        while !self.is_eof() {
            let c = self.cur();
            if !(c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E') {
                break;
            }
            if c == b'e' || c == b'E' {
                if e_seen {
                    return Err(self.err(
                        format!("invalid numeric literal: only one '{}' allowed", c as char),
                        "",
                        start,
                    ));
                }
                e_seen = true;
            } else if c == b'.' {
                if dot_seen {
                    return Err(self.err("invalid numeric literal: only one . allowed", "", start));
                }
                dot_seen = true;
            }
            last = c;
            self.advance();
        }
        if last == b'e' || last == b'E' {
            return Err(self.err("no exponent on number", "", start));
        }
        Ok(self.token(Kind::Literal, from, start))
    }

    fn literal(&mut self) -> Token {
        let start = self.here();
        let from = self.pos;
        while !self.is_eof() && !end_of_literal(self.cur()) {
            self.advance();
        }
        self.token(Kind::Literal, from, start)
    }
}

/// Reserved bytes end a literal run; everything else, including non-ASCII,
/// is part of the literal.
fn end_of_literal(c: u8) -> bool {
    c <= b' ' || b"`|/-+%~[]'\"<>!=@$?;.()&{}^:\\,*".contains(&c)
}
