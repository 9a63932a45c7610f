//! In-memory devices for tests: a reader over fixed bytes and a writer
//! whose contents stay inspectable after the machine consumed it.

use std::cell::RefCell;
use std::io::{self, BufRead, Cursor, Read, Write};
use std::rc::Rc;

use crate::device::{Reader, Writer};
use crate::error::Error;

pub struct MemReader {
    name: String,
    cur: Cursor<Vec<u8>>,
}

impl MemReader {
    pub fn new(name: &str, data: &str) -> MemReader {
        MemReader {
            name: name.to_string(),
            cur: Cursor::new(data.as_bytes().to_vec()),
        }
    }
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cur.read(buf)
    }
}

impl BufRead for MemReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.cur.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.cur.consume(amt)
    }
}

impl Reader for MemReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemWriter {
    buf: Rc<RefCell<Vec<u8>>>,
    cancelled: Rc<RefCell<bool>>,
}

impl MemWriter {
    pub fn new() -> MemWriter {
        MemWriter::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.borrow()).into_owned()
    }

    pub fn was_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer for MemWriter {
    fn name(&self) -> &str {
        "-"
    }

    fn cancel(&mut self) {
        *self.cancelled.borrow_mut() = true;
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
