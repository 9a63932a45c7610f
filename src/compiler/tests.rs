#![cfg(test)]

use pretty_assertions::assert_eq;

use crate::compiler::{Program, compile};
use crate::error::Error;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::vm::instruction::{Arg, ImportSpec, Instruction};

fn compile_src(src: &str) -> Result<Program, Error> {
    let toks = Lexer::new(src.as_bytes(), "compiler_tests").run()?;
    let nodes = Parser::new(toks, "compiler_tests").parse()?;
    compile("compiler_tests", nodes, false)
}

fn compile_stdin_src(src: &str) -> Result<Program, Error> {
    let toks = Lexer::new(src.as_bytes(), "<STDIN>").run()?;
    let nodes = Parser::new(toks, "<STDIN>").parse()?;
    compile("<STDIN>", nodes, true)
}

fn instructions(src: &str) -> Vec<Instruction> {
    compile_src(src).expect("expected the script to compile").inst
}

/// Savepoint/Release pairs in the emitted list nest and balance; no
/// Release ever comes first.
fn assert_balanced(inst: &[Instruction]) {
    let mut depth: i64 = 0;
    for i in inst {
        match i {
            Instruction::Savepoint => depth += 1,
            Instruction::Release => {
                depth -= 1;
                assert!(depth >= 0, "Release without a Savepoint in {:#?}", inst);
            }
            _ => {}
        }
    }
    assert_eq!(depth, 0, "unbalanced savepoints in {:#?}", inst);
}

mod lifting {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subquery_becomes_temp_table_group() {
        let inst = instructions(r#"SELECT * FROM (IMPORT FROM "t.tsv");"#);
        assert_balanced(&inst);

        let q = inst
            .iter()
            .find_map(|i| match i {
                Instruction::Query(q) => Some(q.clone()),
                _ => None,
            })
            .expect("expected a query instruction");
        assert!(q.contains("SELECT * FROM temp.[0]"), "got {:?}", q);

        assert!(inst.iter().any(|i| matches!(i, Instruction::Savepoint)));
        assert!(
            inst.iter()
                .any(|i| matches!(i, Instruction::DropTempTables(t) if t == &vec!["[0]".to_string()]))
        );
        assert!(inst.iter().any(|i| matches!(
            i,
            Instruction::Import(ImportSpec {
                internal: true,
                temporary: true,
                ..
            })
        )));
    }

    #[test]
    fn two_subqueries_number_in_order() {
        let inst =
            instructions(r#"SELECT * FROM (IMPORT FROM "a.csv") JOIN (IMPORT FROM "b.csv");"#);
        assert_balanced(&inst);
        let tables: Vec<String> = inst
            .iter()
            .filter_map(|i| match i {
                Instruction::Import(s) => Some(s.table.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tables, vec!["[0]", "[1]"]);
        let q = inst
            .iter()
            .find_map(|i| match i {
                Instruction::Query(q) => Some(q.clone()),
                _ => None,
            })
            .unwrap();
        assert!(q.contains("temp.[0]") && q.contains("temp.[1]"), "got {:?}", q);
    }

    #[test]
    fn exec_with_subquery_drops_tables_before_release() {
        let inst = instructions(r#"INSERT INTO t SELECT * FROM (IMPORT FROM "a.csv");"#);
        assert_balanced(&inst);
        let drop_at = inst
            .iter()
            .position(|i| matches!(i, Instruction::DropTempTables(_)))
            .expect("expected a drop");
        let release_at = inst
            .iter()
            .rposition(|i| matches!(i, Instruction::Release))
            .unwrap();
        assert!(drop_at < release_at);
    }

    #[test]
    fn named_subquery_import_is_rejected() {
        let err = compile_src(r#"SELECT * FROM (IMPORT named FROM "a.csv");"#).unwrap_err();
        assert!(err.msg.contains("table name"), "got {:?}", err.msg);
    }
}

mod naming {
    use super::*;
    use pretty_assertions::assert_eq;

    fn import_table(src: &str) -> String {
        let inst = instructions(src);
        inst.iter()
            .find_map(|i| match i {
                Instruction::Import(s) => Some(s.table.clone()),
                _ => None,
            })
            .expect("expected an import instruction")
    }

    #[test]
    fn explicit_name_wins() {
        assert_eq!(import_table(r#"IMPORT t FROM "f.csv";"#), "\"t\"");
    }

    #[test]
    fn name_derives_from_file_base() {
        assert_eq!(import_table(r#"IMPORT FROM "dir/people.csv";"#), "\"people\"");
    }

    #[test]
    fn file_base_wins_over_frame() {
        assert_eq!(import_table(r#"IMPORT FROM "f.csv" FRAME sheet2;"#), "\"f\"");
    }

    #[test]
    fn frame_names_the_table_when_the_device_has_no_base() {
        assert_eq!(
            import_table(r#"IMPORT FROM (SELECT 'made-up') FRAME sheet;"#),
            "\"sheet\""
        );
    }

    #[test]
    fn derived_name_cannot_repeat() {
        let err =
            compile_src(r#"IMPORT FROM "a.csv"; IMPORT FROM "a.csv";"#).unwrap_err();
        assert!(err.msg.contains("derive"), "got {:?}", err.msg);
    }

    #[test]
    fn second_import_falls_back_to_frame() {
        let inst = instructions(r#"IMPORT FROM "a.csv"; IMPORT FROM "a.csv" FRAME two;"#);
        let tables: Vec<String> = inst
            .iter()
            .filter_map(|i| match i {
                Instruction::Import(s) => Some(s.table.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tables, vec!["\"a\"", "\"two\""]);
    }

    #[test]
    fn underivable_name_fails() {
        let err = compile_src(r#"IMPORT FROM (SELECT 'f.csv');"#).unwrap_err();
        assert!(err.msg.contains("derive"), "got {:?}", err.msg);
    }
}

mod propagation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_persists_until_device_changes() {
        let inst = instructions(
            r#"IMPORT a (x, y) FROM "f.csv"; IMPORT b; IMPORT c FROM "g.csv";"#,
        );
        let headers: Vec<Vec<String>> = inst
            .iter()
            .filter_map(|i| match i {
                Instruction::Import(s) => Some(s.header.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], vec!["x", "y"]);
        // no new device: the previous explicit header persists
        assert_eq!(headers[1], vec!["x", "y"]);
        // the device switch invalidates it
        assert!(headers[2].is_empty());
    }

    #[test]
    fn frame_propagates_to_later_imports() {
        let inst = instructions(r#"IMPORT a FROM "f.csv" FRAME one; IMPORT b;"#);
        let frames: Vec<Option<String>> = inst
            .iter()
            .filter_map(|i| match i {
                Instruction::Import(s) => Some(s.frame.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![Some("one".to_string()), Some("one".to_string())]);
    }
}

mod transactions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn open_transaction_commits_at_end_of_script() {
        let inst = instructions(
            "BEGIN TRANSACTION; CREATE TABLE t(a); INSERT INTO t VALUES (1); \
             SAVEPOINT x; INSERT INTO t VALUES (2); RELEASE x;",
        );
        match inst.last() {
            Some(Instruction::Commit(sql)) => assert_eq!(sql, "END TRANSACTION"),
            other => panic!("expected a synthesized commit, got {:?}", other),
        }
    }

    #[test]
    fn open_savepoints_release_outermost_at_end_of_script() {
        let inst = instructions("SAVEPOINT a; SAVEPOINT b; CREATE TABLE t(x);");
        match inst.last() {
            Some(Instruction::UserRelease { name, sql }) => {
                assert_eq!(name, "a");
                assert!(sql.contains("RELEASE"));
            }
            other => panic!("expected a synthesized release, got {:?}", other),
        }
    }

    #[test]
    fn commit_without_transaction_is_rejected() {
        assert!(compile_src("COMMIT;").is_err());
    }

    #[test]
    fn begin_with_open_savepoints_is_rejected() {
        assert!(compile_src("SAVEPOINT a; BEGIN TRANSACTION;").is_err());
    }

    #[test]
    fn releasing_unknown_savepoint_is_rejected() {
        assert!(compile_src("RELEASE nope;").is_err());
    }

    #[test]
    fn release_drops_inner_savepoints_too() {
        // releasing a releases b with it, so releasing b afterwards fails
        assert!(compile_src("SAVEPOINT a; SAVEPOINT b; RELEASE a; RELEASE b;").is_err());
    }
}

mod guards {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stdin_script_cannot_import_stdin() {
        let err = compile_stdin_src("IMPORT t FROM STDIN;").unwrap_err();
        assert!(err.msg.contains("stdin"), "got {:?}", err.msg);
    }

    #[test]
    fn stdin_script_cannot_default_to_stdin() {
        let err = compile_stdin_src("IMPORT t;").unwrap_err();
        assert!(err.msg.contains("stdin"), "got {:?}", err.msg);
    }

    #[test]
    fn file_script_may_import_stdin() {
        assert!(compile_src("IMPORT t FROM STDIN;").is_ok());
    }

    #[test]
    fn stdin_script_may_import_files() {
        assert!(compile_stdin_src(r#"IMPORT t FROM "f.csv";"#).is_ok());
    }

    #[test]
    fn use_must_come_first() {
        assert!(compile_src(r#"SELECT 1; USE "db";"#).is_err());
        let p = compile_src(r#"USE "db"; SELECT 1;"#).unwrap();
        assert_eq!(p.db.as_deref(), Some("db"));
    }

    #[test]
    fn json_format_is_stubbed() {
        let err = compile_src(r#"IMPORT t FROM "f" WITH JSON;"#).unwrap_err();
        assert!(err.msg.contains("JSON"), "got {:?}", err.msg);
    }

    #[test]
    fn csv_quote_is_rejected() {
        let err = compile_src(r#"IMPORT t FROM "f" WITH CSV QUOTE "'";"#).unwrap_err();
        assert!(err.msg.contains("quote"), "got {:?}", err.msg);
    }

    #[test]
    fn display_needs_something() {
        assert!(compile_src("DISPLAY;").is_err());
    }
}

mod synthesis {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_from_builds_values_template() {
        let inst = instructions(r#"INSERT INTO t (a, b) FROM IMPORT FROM "f.csv";"#);
        assert_balanced(&inst);
        let spec = inst
            .iter()
            .find_map(|i| match i {
                Instruction::InsertWith(s) => Some(s.clone()),
                _ => None,
            })
            .expect("expected an insert-with instruction");
        assert_eq!(spec.header, vec!["a", "b"]);
        assert!(spec.insert.ends_with("VALUES (?,?)"), "got {:?}", spec.insert);
    }

    #[test]
    fn insert_from_passes_conflict_method_through() {
        let inst = instructions(r#"INSERT OR IGNORE INTO t (a) FROM IMPORT FROM "f.csv";"#);
        let spec = inst
            .iter()
            .find_map(|i| match i {
                Instruction::InsertWith(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert!(spec.insert.contains("OR IGNORE"), "got {:?}", spec.insert);
        assert!(spec.insert.ends_with("VALUES (?)"), "got {:?}", spec.insert);
    }

    #[test]
    fn plain_insert_has_no_conflict_clause() {
        let inst = instructions(r#"INSERT INTO t (a) FROM IMPORT FROM "f.csv";"#);
        let spec = inst
            .iter()
            .find_map(|i| match i {
                Instruction::InsertWith(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!spec.insert.contains(" OR "), "got {:?}", spec.insert);
    }

    #[test]
    fn create_table_from_carries_ddl() {
        let inst = instructions(r#"CREATE TABLE t (a TEXT, b TEXT) FROM IMPORT FROM "f.csv";"#);
        let spec = inst
            .iter()
            .find_map(|i| match i {
                Instruction::Import(s) => Some(s.clone()),
                _ => None,
            })
            .expect("expected an import instruction");
        let ddl = spec.ddl.expect("expected ddl on the import");
        assert!(ddl.starts_with("CREATE TABLE t"), "got {:?}", ddl);
        assert!(spec.header.is_empty());
        assert_eq!(spec.table, "\"t\"");
    }

    #[test]
    fn limits_lower_to_literals_and_subqueries() {
        let inst = instructions(r#"IMPORT t FROM "f.csv" LIMIT 3 OFFSET (SELECT 1);"#);
        let spec = inst
            .iter()
            .find_map(|i| match i {
                Instruction::Import(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(spec.limit, Some(Arg::Lit(3)));
        assert!(matches!(spec.offset, Some(Arg::Sub(_))));
    }

    #[test]
    fn every_statement_records_its_position() {
        let inst = instructions("SELECT 1;\nSELECT 2;");
        let positions: Vec<usize> = inst
            .iter()
            .filter_map(|i| match i {
                Instruction::ErrPos(p) => Some(p.line),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![0, 1]);
    }
}
