use crate::driver::Conn;
use crate::error::Error;

/// Attach the in-memory sys schema and populate it: sys.env from the
/// process environment, sys.args in order from the caller's argument list
/// (1-indexed by rowid). Scripts may read and write both tables; the
/// parser forbids structural mutation.
pub fn attach(conn: &Conn, args: &[String]) -> Result<(), Error> {
    conn.exec("ATTACH ':memory:' AS sys")?;
    conn.exec(
        "CREATE TABLE sys.env (\n\
         \tname TEXT PRIMARY KEY ON CONFLICT REPLACE,\n\
         \tvalue TEXT NOT NULL\n\
         ) WITHOUT ROWID",
    )?;
    conn.exec("CREATE TABLE sys.args (value TEXT NOT NULL)")?;

    if !args.is_empty() {
        let mut ld = conn.loader("INSERT INTO sys.args VALUES (?)")?;
        for a in args {
            ld.load(vec![Some(a.clone())])?;
        }
        ld.close()?;
    }

    let env: Vec<(String, String)> = std::env::vars().collect();
    if !env.is_empty() {
        let mut ld = conn.loader("INSERT INTO sys.env VALUES (?, ?)")?;
        for (k, v) in env {
            ld.load(vec![Some(k), Some(v)])?;
        }
        ld.close()?;
    }
    Ok(())
}
