use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::Error;

/// How many buffered rows a Loader flushes at a time.
const BULK_ROWS: usize = 256;

/// The minimal surface of SQLite the machine depends on: open, prepare,
/// exec, stream rows as text, evaluate single-value subqueries, evaluate
/// boolean assertions and bulk-load rows.
pub struct Conn {
    db: Connection,
}

impl Conn {
    pub fn open(path: Option<&str>) -> Result<Conn, Error> {
        let db = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::system(format!("cannot open database {}: {}", p, e)))?,
            None => Connection::open_in_memory()
                .map_err(|e| Error::system(format!("cannot open in-memory database: {}", e)))?,
        };
        Ok(Conn { db })
    }

    pub fn close(self) -> Result<(), Error> {
        self.db
            .close()
            .map_err(|(_, e)| Error::system(format!("cannot close database: {}", e)))
    }

    /// Run a statement for its effect. Statements that return rows (PRAGMA
    /// and friends) are drained rather than rejected.
    pub fn exec(&self, sql: &str) -> Result<(), Error> {
        let mut stmt = self.prepare(sql)?;
        stmt.drain()
    }

    pub fn prepare(&self, sql: &str) -> Result<Stmt<'_>, Error> {
        let inner = self
            .db
            .prepare(sql)
            .map_err(|e| Error::runtime(e.to_string()))?;
        Ok(Stmt { inner })
    }

    /// Column names of sql without running it.
    pub fn columns(&self, sql: &str) -> Result<Vec<String>, Error> {
        Ok(self.prepare(sql)?.columns())
    }

    /// Evaluate a single-value subquery: exactly one column, at most one
    /// row. No row is NULL.
    pub fn subquery(&self, sql: &str) -> Result<Option<String>, Error> {
        let mut stmt = self.prepare(sql)?;
        if stmt.inner.column_count() != 1 {
            return Err(Error::runtime("a subquery can only return a single column"));
        }
        let mut rows = stmt
            .inner
            .query([])
            .map_err(|e| Error::runtime(e.to_string()))?;
        let first = match rows.next().map_err(|e| Error::runtime(e.to_string()))? {
            None => return Ok(None),
            Some(row) => value_text(row.get_ref(0).map_err(|e| Error::runtime(e.to_string()))?),
        };
        if rows
            .next()
            .map_err(|e| Error::runtime(e.to_string()))?
            .is_some()
        {
            return Err(Error::runtime("a subquery can only return a single row"));
        }
        Ok(first)
    }

    /// Evaluate an assertion query: exactly one row with exactly one
    /// integer-valued column, reported as a boolean.
    pub fn assert(&self, sql: &str) -> Result<bool, Error> {
        let mut stmt = self.prepare(sql)?;
        if stmt.inner.column_count() != 1 {
            return Err(Error::runtime("assert query must have exactly one column"));
        }
        let mut rows = stmt
            .inner
            .query([])
            .map_err(|e| Error::runtime(e.to_string()))?;
        let row = rows
            .next()
            .map_err(|e| Error::runtime(e.to_string()))?
            .ok_or_else(|| {
                Error::runtime("assert query must have exactly one result, none returned")
            })?;
        let v = match row.get_ref(0).map_err(|e| Error::runtime(e.to_string()))? {
            ValueRef::Integer(i) => i != 0,
            _ => return Err(Error::runtime("assert query must return a boolean")),
        };
        if rows
            .next()
            .map_err(|e| Error::runtime(e.to_string()))?
            .is_some()
        {
            return Err(Error::runtime(
                "assert query must have exactly one result, multiple returned",
            ));
        }
        Ok(v)
    }

    /// A bulk loader over an insert statement with `?` binds.
    pub fn loader(&self, sql: &str) -> Result<Loader<'_>, Error> {
        let stmt = self.prepare(sql)?;
        if stmt.inner.parameter_count() == 0 {
            return Err(Error::internal(
                "cannot create a loader on a statement without ? binds",
            ));
        }
        Ok(Loader {
            stmt,
            buf: Vec::with_capacity(BULK_ROWS),
        })
    }
}

pub struct Stmt<'c> {
    inner: rusqlite::Statement<'c>,
}

impl Stmt<'_> {
    pub fn columns(&self) -> Vec<String> {
        self.inner
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect()
    }

    /// Run the statement, discarding any rows it produces.
    pub fn drain(&mut self) -> Result<(), Error> {
        let mut rows = self
            .inner
            .query([])
            .map_err(|e| Error::runtime(e.to_string()))?;
        while rows
            .next()
            .map_err(|e| Error::runtime(e.to_string()))?
            .is_some()
        {}
        Ok(())
    }

    /// Stream every row as a vector of optional texts to `f`.
    pub fn rows<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&[Option<String>]) -> Result<(), Error>,
    {
        let n = self.inner.column_count();
        let mut rows = self
            .inner
            .query([])
            .map_err(|e| Error::runtime(e.to_string()))?;
        let mut acc: Vec<Option<String>> = Vec::with_capacity(n);
        while let Some(row) = rows.next().map_err(|e| Error::runtime(e.to_string()))? {
            acc.clear();
            for i in 0..n {
                let v = row.get_ref(i).map_err(|e| Error::runtime(e.to_string()))?;
                acc.push(value_text(v));
            }
            f(&acc)?;
        }
        Ok(())
    }
}

/// Buffers rows and replays them against the prepared insert in chunks.
/// Errors during a chunk flush surface as instruction errors.
pub struct Loader<'c> {
    stmt: Stmt<'c>,
    buf: Vec<Vec<Option<String>>>,
}

impl Loader<'_> {
    pub fn load(&mut self, row: Vec<Option<String>>) -> Result<(), Error> {
        self.buf.push(row);
        if self.buf.len() >= BULK_ROWS {
            return self.flush();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        for row in self.buf.drain(..) {
            self.stmt
                .inner
                .execute(rusqlite::params_from_iter(row.iter()))
                .map_err(|e| Error::runtime(e.to_string()))?;
        }
        Ok(())
    }

    /// Flush residual rows. Dropping an unclosed loader discards them.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush()
    }
}

/// SQLite values surfaced as text, NULL as None. Reals keep a decimal
/// point the way the sqlite3 shell prints them.
fn value_text(v: ValueRef<'_>) -> Option<String> {
    match v {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                Some(format!("{:.1}", f))
            } else {
                Some(f.to_string())
            }
        }
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}
