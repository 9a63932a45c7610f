use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, StdinLock, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Error;

/// An input device: a buffered byte source with a name for diagnostics.
/// Stdio devices report `-` as their name.
pub trait Reader: BufRead {
    fn name(&self) -> &str;
    fn close(&mut self) -> Result<(), Error>;
}

/// An output device. File writers buffer into a scratch file and only the
/// close step atomically renames it to the target; `cancel` discards the
/// rename so an aborted run never clobbers the target.
pub trait Writer: Write {
    fn name(&self) -> &str;
    fn cancel(&mut self);
    fn close(&mut self) -> Result<(), Error>;
}

/// Standard input. Close is a no-op so the device can be re-entered after
/// an intervening file device; buffered bytes live in the process-wide
/// stdin handle.
pub struct StdinReader {
    lock: StdinLock<'static>,
}

pub fn stdin() -> StdinReader {
    StdinReader {
        lock: io::stdin().lock(),
    }
}

impl Read for StdinReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock.read(buf)
    }
}

impl BufRead for StdinReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.lock.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.lock.consume(amt)
    }
}

impl Reader for StdinReader {
    fn name(&self) -> &str {
        "-"
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Standard output.
pub struct StdoutWriter {
    out: io::Stdout,
}

pub fn stdout() -> StdoutWriter {
    StdoutWriter { out: io::stdout() }
}

impl Write for StdoutWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl Writer for StdoutWriter {
    fn name(&self) -> &str {
        "-"
    }

    fn cancel(&mut self) {}

    fn close(&mut self) -> Result<(), Error> {
        self.out.flush()?;
        Ok(())
    }
}

/// A file opened for reading.
pub struct FileReader {
    name: String,
    inner: BufReader<File>,
}

impl FileReader {
    pub fn open(name: &str) -> Result<FileReader, Error> {
        let f = File::open(name)
            .map_err(|e| Error::system(format!("cannot open {}: {}", name, e)))?;
        let meta = f
            .metadata()
            .map_err(|e| Error::system(format!("cannot stat {}: {}", name, e)))?;
        if meta.is_dir() {
            return Err(Error::system(format!("{} is a directory", name)));
        }
        Ok(FileReader {
            name: name.to_string(),
            inner: BufReader::new(f),
        })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for FileReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

impl Reader for FileReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A file opened for writing. Bytes go to a scratch file next to the
/// target; close renames it into place, cancel removes it instead.
pub struct FileWriter {
    name: String,
    target: PathBuf,
    tmp: Option<BufWriter<NamedTempFile>>,
    cancelled: bool,
}

impl FileWriter {
    pub fn create(name: &str) -> Result<FileWriter, Error> {
        let target = PathBuf::from(name);
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::system(format!("cannot create scratch file for {}: {}", name, e)))?;
        Ok(FileWriter {
            name: name.to_string(),
            target,
            tmp: Some(BufWriter::new(tmp)),
            cancelled: false,
        })
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.tmp {
            Some(w) => w.write(buf),
            None => Err(io::Error::other("write to a closed file device")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.tmp {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Writer for FileWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn close(&mut self) -> Result<(), Error> {
        let Some(buf) = self.tmp.take() else {
            return Ok(());
        };
        let tmp = buf
            .into_inner()
            .map_err(|e| Error::system(format!("cannot flush {}: {}", self.name, e)))?;
        if self.cancelled {
            // the scratch file is removed, the target stays untouched
            tmp.close()
                .map_err(|e| Error::system(format!("cannot remove scratch file: {}", e)))?;
            return Ok(());
        }
        tmp.persist(&self.target)
            .map_err(|e| Error::system(format!("cannot rename into {}: {}", self.name, e)))?;
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        // an unclosed writer must not clobber the target
        self.cancelled = true;
        self.tmp = None;
    }
}
