#![cfg(test)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pretty_assertions::assert_eq;

use crate::compiler::compile;
use crate::error::Error;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::testio::{MemReader, MemWriter};
use crate::vm::Machine;

/// Compile and run a script against injected in-memory devices, returning
/// the run result, the captured output and the machine for inspection.
fn exec(
    src: &str,
    db: Option<&str>,
    args: &[String],
    input: &str,
) -> (Result<(), Error>, MemWriter, Machine) {
    let toks = Lexer::new(src.as_bytes(), "vm_tests").run().expect("lex");
    let nodes = Parser::new(toks, "vm_tests").parse().expect("parse");
    let prog = compile("vm_tests", nodes, false).expect("compile");
    let db = prog.db.clone().or_else(|| db.map(String::from));
    let w = MemWriter::new();
    let cancel = Arc::new(AtomicBool::new(false));
    let mut m = Machine::with_io(
        "vm_tests",
        db.as_deref(),
        args,
        cancel,
        Box::new(MemReader::new("-", input)),
        Box::new(w.clone()),
    )
    .expect("machine");
    let r = m.run(&prog.inst);
    (r, w, m)
}

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let p = dir.path().join(name);
    std::fs::write(&p, content).expect("fixture");
    p.to_str().expect("utf8 path").to_string()
}

#[test]
fn csv_import_then_select() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "in.csv", "a,b\n1,x\n2,y\n");
    let src = format!(r#"IMPORT csv_in FROM "{f}"; SELECT b FROM csv_in ORDER BY a;"#);
    let (r, w, _m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "x\ny\n");
}

#[test]
fn display_as_csv_writes_the_header() {
    let (r, w, _m) = exec("DISPLAY AS CSV EOL LF; SELECT 1 AS n, 'a' AS s;", None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "n,s\n1,a\n");
}

#[test]
fn lifted_import_leaves_no_temp_table() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "t.tsv", "h\n1\n2\n");
    let src = format!(r#"SELECT * FROM (IMPORT FROM "{f}");"#);
    let (r, w, m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "1\n2\n");
    let left = m
        .conn()
        .subquery("SELECT COUNT(*) FROM sqlite_temp_master WHERE name = '0'")
        .unwrap();
    assert_eq!(left.as_deref(), Some("0"));
}

#[test]
fn assertions_pass_and_fail() {
    let (r, _, _m) = exec(r#"ASSERT "must be one", (SELECT 1);"#, None, &[], "");
    r.expect("run");

    let (r, _, _m) = exec(r#"ASSERT "never", (SELECT 0);"#, None, &[], "");
    let e = r.expect_err("the assertion must fail");
    assert_eq!(e.msg, "assertion failure: never");
    assert!(e.pos.is_some(), "assertion errors carry a position");
}

#[test]
fn transaction_commits_at_end_of_script() {
    let src = "BEGIN TRANSACTION; CREATE TABLE t(a); INSERT INTO t VALUES (1); \
               SAVEPOINT x; INSERT INTO t VALUES (2); RELEASE x;";
    let (r, _, m) = exec(src, None, &[], "");
    r.expect("run");
    let n = m.conn().subquery("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(n.as_deref(), Some("2"));
}

#[test]
fn failed_transaction_rolls_back_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("x.db");
    let db = db.to_str().unwrap();

    let src = "CREATE TABLE t(a); INSERT INTO t VALUES (1); BEGIN TRANSACTION; \
               INSERT INTO t VALUES (2); ASSERT \"boom\", (SELECT 0);";
    let (r, _, m) = exec(src, Some(db), &[], "");
    assert!(r.is_err());
    for e in m.close() {
        panic!("close failed: {}", e);
    }

    // an independent run observes no partial effects of the failed segment
    let (r, w, _m) = exec("SELECT COUNT(*) FROM t;", Some(db), &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "1\n");
}

#[test]
fn limit_and_offset_bound_the_import() {
    // R = 5 data rows; LIMIT L OFFSET K imports max(0, min(L, R-K))
    let cases: &[(&str, &str, i64)] = &[
        ("LIMIT 2", "", 2),
        ("LIMIT 2 OFFSET 4", "", 1),
        ("LIMIT 10 OFFSET 2", "", 3),
        ("LIMIT 0", "", 0),
        ("LIMIT 3 OFFSET 10", "", 0),
        ("", "OFFSET beyond input is empty, not an error", 5),
    ];
    for (clause, note, want) in cases {
        let dir = tempfile::tempdir().unwrap();
        let f = write_file(&dir, "f.csv", "1\n2\n3\n4\n5\n");
        let src = format!(r#"IMPORT t (h) FROM "{f}" WITH CSV NOHEADER {clause};"#);
        let (r, _, m) = exec(&src, None, &[], "");
        r.expect("run");
        let n = m.conn().subquery("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(n.as_deref(), Some(want.to_string().as_str()), "{clause} {note}");
    }
}

#[test]
fn insert_from_import_fills_the_declared_columns() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "f.csv", "a,b\n1,x\n2,y\n");
    let src = format!(
        r#"CREATE TABLE t (a TEXT, b TEXT); INSERT INTO t (a, b) FROM IMPORT FROM "{f}"; SELECT b FROM t ORDER BY a;"#
    );
    let (r, w, _m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "x\ny\n");
}

#[test]
fn create_table_from_import_uses_the_declared_header() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "f.csv", "a,b\n1,x\n2,y\n");
    let src = format!(
        r#"CREATE TABLE n (x TEXT, y TEXT) FROM IMPORT FROM "{f}"; SELECT y FROM n ORDER BY x;"#
    );
    let (r, w, _m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "x\ny\n");
}

#[test]
fn import_as_first_compound_term() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "a.csv", "a,b\n1,x\n");
    let src = format!(r#"IMPORT FROM "{f}" UNION ALL SELECT '2', 'y';"#);
    let (r, w, _m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "1\tx\n2\ty\n");
}

#[test]
fn format_round_trips_through_import_and_display() {
    let input = "a,b\n1,x\n2,y\n";
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "f.csv", input);
    let src = format!(r#"IMPORT t FROM "{f}" WITH CSV EOL LF; DISPLAY AS CSV EOL LF; SELECT * FROM t;"#);
    let (r, w, _m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), input);
}

#[test]
fn default_device_feeds_an_import() {
    let (r, _, m) = exec("IMPORT t;", None, &[], "a,b\n1,x\n");
    r.expect("run");
    let n = m.conn().subquery("SELECT COUNT(*) FROM t").unwrap();
    assert_eq!(n.as_deref(), Some("1"));
}

#[test]
fn delimiter_can_come_from_a_subquery() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "f.psv", "a|b\n1|2\n");
    let src = format!(r#"IMPORT t FROM "{f}" WITH CSV DELIMITER (SELECT '|'); SELECT b FROM t;"#);
    let (r, w, _m) = exec(&src, None, &[], "");
    r.expect("run");
    assert_eq!(w.contents(), "2\n");
}

#[test]
fn file_name_can_come_from_sys_args() {
    let dir = tempfile::tempdir().unwrap();
    let f = write_file(&dir, "f.csv", "a\n7\n");
    let src = "IMPORT t FROM @1; SELECT a FROM t;";
    let (r, w, _m) = exec(src, None, &[f], "");
    r.expect("run");
    assert_eq!(w.contents(), "7\n");
}

#[test]
fn arguments_read_sys_args_and_env() {
    let (r, _, _m) = exec(
        r#"ASSERT "first arg", (SELECT @1 = 'hello'); ASSERT "no second arg", (SELECT @2 IS NULL);"#,
        None,
        &["hello".to_string()],
        "",
    );
    r.expect("run");
}

#[test]
fn display_to_file_renames_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.csv");
    let out_s = out.to_str().unwrap();
    let src = format!(r#"DISPLAY TO "{out_s}" AS CSV EOL LF; SELECT 1 AS n;"#);
    let (r, _, m) = exec(&src, None, &[], "");
    r.expect("run");
    for e in m.close() {
        panic!("close failed: {}", e);
    }
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "n\n1\n");
}

#[test]
fn failed_run_does_not_clobber_the_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.csv");
    std::fs::write(&out, "old").unwrap();
    let out_s = out.to_str().unwrap();
    let src = format!(
        r#"DISPLAY TO "{out_s}" AS CSV; SELECT 1 AS n; ASSERT "stop", (SELECT 0);"#
    );
    let (r, _, m) = exec(&src, None, &[], "");
    assert!(r.is_err());
    m.close();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "old");
    assert_eq!(dir.path().read_dir().unwrap().count(), 1, "scratch removed");
}

#[test]
fn cancellation_interrupts_the_program() {
    let toks = Lexer::new(b"SELECT 1;", "vm_tests").run().unwrap();
    let nodes = Parser::new(toks, "vm_tests").parse().unwrap();
    let prog = compile("vm_tests", nodes, false).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);
    let w = MemWriter::new();
    let mut m = Machine::with_io(
        "vm_tests",
        None,
        &[],
        cancel,
        Box::new(MemReader::new("-", "")),
        Box::new(w.clone()),
    )
    .unwrap();
    let e = m.run(&prog.inst).expect_err("must be interrupted");
    assert!(e.msg.contains("interrupted"), "got {:?}", e.msg);
    assert!(w.was_cancelled(), "pending output must be discarded");
}

#[test]
fn close_collects_errors_without_masking_the_run() {
    let (r, _, m) = exec("SELECT 1;", None, &[], "");
    r.expect("run");
    assert!(m.close().is_empty());
}

#[test]
fn sys_env_is_populated_from_the_environment() {
    // PATH exists in any reasonable test environment
    let (r, _, _m) = exec(
        r#"ASSERT "env present", (SELECT COUNT(*) > 0 FROM sys.env);"#,
        None,
        &[],
        "",
    );
    r.expect("run");
}
