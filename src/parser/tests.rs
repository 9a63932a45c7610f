#[allow(unused_macros)]
macro_rules! test_group_pass {
    ($group_name:ident,$($ident:ident:$input:literal),*) => {
    mod $group_name {
        use crate::{lexer::Lexer, parser::Parser};

        $(
            #[test]
            fn $ident() {
                let toks = Lexer::new($input.as_bytes(), "parser_tests_pass")
                    .run()
                    .expect("expected the input to lex");
                let nodes = Parser::new(toks, "parser_tests_pass").parse();
                assert!(nodes.is_ok(), "expected a parse, got {:?}", nodes);
            }
        )*
        }
    };
}

#[allow(unused_macros)]
macro_rules! test_group_fail {
    ($group_name:ident,$($ident:ident:$input:literal),*) => {
    mod $group_name {
        use crate::{lexer::Lexer, parser::Parser};

        $(
            #[test]
            fn $ident() {
                let toks = Lexer::new($input.as_bytes(), "parser_tests_fail")
                    .run()
                    .expect("expected the input to lex");
                let nodes = Parser::new(toks, "parser_tests_fail").parse();
                assert!(nodes.is_err(), "expected a parse error, got {:#?}", nodes);
            }
        )*
        }
    };
}

#[cfg(test)]
fn parse(input: &str) -> Vec<crate::parser::nodes::Node> {
    let toks = crate::lexer::Lexer::new(input.as_bytes(), "parser_tests")
        .run()
        .expect("lex");
    crate::parser::Parser::new(toks, "parser_tests")
        .parse()
        .expect("parse")
}

#[cfg(test)]
mod should_pass {
    test_group_pass! {
        extensions,
        use_plain: r#"USE "out.db";"#,
        use_database: r#"USE DATABASE "out.db";"#,
        use_db_literal: "USE DB mydb;",
        display_device: r#"DISPLAY TO "out.csv";"#,
        display_format: "DISPLAY AS CSV;",
        display_frame: r#"DISPLAY TO STDOUT FRAME sheet AS RAW HEADER;"#,
        assert_subquery: r#"ASSERT "must hold", (SELECT 1);"#,
        assert_argument: r#"ASSERT "set", @HOME;"#,
        import_bare: r#"IMPORT t FROM "f.csv";"#,
        import_full: r#"IMPORT TEMPORARY t (a, b) FROM "f.csv" WITH CSV STRICT DELIMITER "|" EOL LF NULL "\N" NOHEADER FRAME page LIMIT 10 OFFSET 2;"#,
        import_stdin: "IMPORT t FROM STDIN;",
        import_raw: r#"IMPORT t FROM "f.tsv" WITH RAW DELIMITER TAB HEADER;"#,
        import_sub_filename: r#"IMPORT t FROM (SELECT value FROM sys.env WHERE name='SRC');"#,
        import_arg_filename: "IMPORT t FROM @1;"
    }

    test_group_pass! {
        plain_sql,
        select: "SELECT 1;",
        select_star: "SELECT * FROM t WHERE a < 10 ORDER BY b;",
        values: "VALUES (1, 2);",
        create: "CREATE TABLE t (a TEXT, b INTEGER PRIMARY KEY);",
        create_without_rowid: "CREATE TABLE t (a TEXT PRIMARY KEY) WITHOUT ROWID;",
        create_as: "CREATE TABLE t AS SELECT 1 AS a;",
        insert: "INSERT INTO t VALUES (1, 'x');",
        insert_cols: "INSERT INTO t (a, b) VALUES (1, 2);",
        insert_default: "INSERT INTO t DEFAULT VALUES;",
        insert_conflict: "INSERT OR IGNORE INTO t (a) VALUES (1);",
        replace: "REPLACE INTO t (a) VALUES (1);",
        update: "UPDATE t SET a = 1 WHERE b = 2;",
        delete: "DELETE FROM t WHERE a = 1;",
        drop_table: "DROP TABLE IF EXISTS t;",
        drop_view: "DROP VIEW v;",
        alter_rename: "ALTER TABLE t RENAME TO u;",
        pragma: "PRAGMA user_version;",
        vacuum: "VACUUM;",
        with_query: "WITH x AS (SELECT 1) SELECT * FROM x;",
        with_recursive: "WITH RECURSIVE c (n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 5) SELECT n FROM c;",
        trigger: "CREATE TRIGGER tr AFTER INSERT ON t BEGIN UPDATE t SET a = 1 WHERE b = 2; END;",
        savepoint: "SAVEPOINT stable;",
        release: "RELEASE stable;",
        release_keyword: "RELEASE SAVEPOINT stable;",
        begin: "BEGIN;",
        begin_transaction: "BEGIN TRANSACTION;",
        commit: "COMMIT;",
        end_transaction: "END TRANSACTION;"
    }

    test_group_pass! {
        import_subqueries,
        in_from: r#"SELECT * FROM (IMPORT FROM "t.tsv");"#,
        in_where: r#"SELECT a FROM t WHERE a IN (IMPORT FROM "ids.csv");"#,
        in_compound: r#"SELECT 1 UNION SELECT * FROM (IMPORT FROM "x.csv");"#,
        compound_head: r#"IMPORT FROM "a.csv" UNION SELECT 1, 2;"#,
        insert_from: r#"INSERT INTO t (a, b) FROM IMPORT FROM "f.csv";"#,
        insert_or_from: r#"INSERT OR REPLACE INTO t (a) FROM IMPORT FROM "f.csv";"#,
        create_from: r#"CREATE TABLE t (a TEXT, b TEXT) FROM IMPORT FROM "f.csv";"#,
        arguments: "SELECT @1, @NAME;"
    }
}

#[cfg(test)]
mod should_fail {
    test_group_fail! {
        forbidden_statements,
        analyze: "ANALYZE;",
        explain: "EXPLAIN SELECT 1;",
        rollback: "ROLLBACK;"
    }

    test_group_fail! {
        reserved_names,
        digital_savepoint: "SAVEPOINT 12;",
        digital_release: "RELEASE 12;",
        digital_temp_table: "CREATE TEMP TABLE 123 (a);",
        digital_temp_schema: "CREATE TABLE temp.123 (a);",
        digital_temp_import: r#"IMPORT TEMPORARY 42 FROM "f.csv";"#,
        sys_insert: "INSERT INTO sys.env (name, value) VALUES ('a', 'b');",
        sys_update: "UPDATE sys.args SET value = 'x';",
        sys_delete: "DELETE FROM sys.env WHERE name = 'x';",
        sys_drop: "DROP TABLE sys.args;",
        sys_alter: "ALTER TABLE sys.env RENAME TO env2;"
    }

    test_group_fail! {
        arguments,
        zero_position: "SELECT @0;",
        in_trigger: "CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT @1; END;"
    }

    test_group_fail! {
        triggers,
        import_inside: r#"CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT * FROM (IMPORT FROM "f.csv"); END;"#,
        foreign_head: "CREATE TRIGGER tr AFTER INSERT ON t BEGIN VACUUM; END;",
        no_actions: "CREATE TRIGGER tr AFTER INSERT ON t BEGIN END;"
    }

    test_group_fail! {
        shape,
        unbalanced_close: "SELECT 1);",
        stray_semicolon_in_subquery: "SELECT (SELECT 1;);",
        unterminated: "SELECT 1",
        insert_from_without_cols: r#"INSERT INTO t FROM IMPORT FROM "f.csv";"#,
        import_stdout: "IMPORT t FROM STDOUT;",
        display_stdin: "DISPLAY TO STDIN;",
        bad_line_ending: r#"IMPORT t FROM "f" WITH RAW EOL SOMETIMES;"#,
        savepoint_with_parens: "SAVEPOINT (x);",
        transaction_with_argument: "BEGIN @1;"
    }
}

#[cfg(test)]
mod structure {
    use pretty_assertions::assert_eq;

    use super::parse;
    use crate::parser::nodes::{Node, SqlKind};
    use crate::types::Kind;

    fn single_sql(input: &str) -> crate::parser::nodes::Sql {
        let mut nodes = parse(input);
        assert_eq!(nodes.len(), 1);
        match nodes.remove(0) {
            Node::Sql(s) => s,
            n => panic!("expected a Sql node, got {:?}", n),
        }
    }

    #[test]
    fn classification() {
        let cases: &[(&str, SqlKind)] = &[
            ("SELECT 1;", SqlKind::Query),
            ("VALUES (1);", SqlKind::Query),
            ("WITH x AS (SELECT 1) SELECT * FROM x;", SqlKind::Query),
            ("CREATE TABLE t (a);", SqlKind::Exec),
            ("INSERT INTO t VALUES (1);", SqlKind::Exec),
            ("PRAGMA user_version;", SqlKind::Exec),
            ("SAVEPOINT s;", SqlKind::Savepoint),
            ("RELEASE s;", SqlKind::Release),
            ("BEGIN TRANSACTION;", SqlKind::BeginTransaction),
            ("COMMIT;", SqlKind::Commit),
            ("END TRANSACTION;", SqlKind::Commit),
            (
                r#"CREATE TABLE t (a TEXT) FROM IMPORT FROM "f.csv";"#,
                SqlKind::CreateTableFrom,
            ),
            (
                r#"INSERT INTO t (a) FROM IMPORT FROM "f.csv";"#,
                SqlKind::InsertFrom,
            ),
        ];
        for (input, kind) in cases {
            assert_eq!(single_sql(input).kind, *kind, "for {:?}", input);
        }
    }

    /// Placeholders inside the token run match the lifted subqueries one to
    /// one, and the remaining tokens stay paren balanced without them.
    #[test]
    fn placeholders_match_subqueries() {
        let inputs = [
            r#"SELECT * FROM (IMPORT FROM "a.csv");"#,
            r#"SELECT * FROM (IMPORT FROM "a.csv") JOIN (IMPORT FROM "b.csv");"#,
            r#"SELECT 1 UNION IMPORT FROM "c.csv" UNION SELECT 2;"#,
            r#"IMPORT FROM "a.csv" UNION SELECT 1;"#,
        ];
        for input in inputs {
            let s = single_sql(input);
            let placeholders = s
                .tokens
                .iter()
                .filter(|t| t.kind == Kind::Placeholder)
                .count();
            assert_eq!(placeholders, s.subqueries.len(), "for {:?}", input);
            assert!(!s.subqueries.is_empty(), "for {:?}", input);

            let mut depth: i64 = 0;
            for t in s.tokens.iter().filter(|t| t.kind != Kind::Placeholder) {
                match t.kind {
                    Kind::LParen => depth += 1,
                    Kind::RParen => depth -= 1,
                    _ => {}
                }
                assert!(depth >= 0, "for {:?}", input);
            }
            assert_eq!(depth, 0, "for {:?}", input);
        }
    }

    #[test]
    fn insert_from_collects_columns() {
        let s = single_sql(r#"INSERT INTO t (a, b) FROM IMPORT FROM "f.csv";"#);
        let cols: Vec<String> = s.cols.iter().map(|t| t.value.clone()).collect();
        assert_eq!(cols, vec!["a", "b"]);
        assert_eq!(s.subqueries.len(), 1);
        // FROM is fake syntax and must not reach the token buffer
        assert!(!s.tokens.iter().any(|t| t.literal("FROM")));
    }

    #[test]
    fn insert_from_keeps_conflict_method() {
        let s = single_sql(r#"INSERT OR REPLACE INTO t (a) FROM IMPORT FROM "f.csv";"#);
        assert_eq!(s.conflict.as_deref(), Some("REPLACE"));
        assert!(s.tokens.iter().any(|t| t.literal("OR")));
    }

    #[test]
    fn create_from_records_name_and_synthetic_semicolon() {
        let s = single_sql(r#"CREATE TABLE t (a TEXT, b TEXT) FROM IMPORT FROM "f.csv";"#);
        assert_eq!(s.name.len(), 1);
        assert_eq!(s.name[0].value, "t");
        assert_eq!(s.tokens.last().map(|t| t.kind), Some(Kind::Semicolon));
        assert_eq!(s.subqueries.len(), 1);
    }

    #[test]
    fn import_options() {
        let mut nodes = parse(
            r#"IMPORT TEMPORARY t (a, b) FROM "dir/f.csv" WITH CSV FRAME page LIMIT 3 OFFSET 2;"#,
        );
        let Node::Import(imp) = nodes.remove(0) else {
            panic!("expected an import node");
        };
        assert!(imp.temporary);
        assert_eq!(imp.table.as_deref(), Some("t"));
        assert_eq!(imp.header, vec!["a", "b"]);
        assert_eq!(imp.frame.as_deref(), Some("page"));
        assert!(imp.device.is_some());
        assert!(imp.format.is_some());
        assert!(imp.limit.is_some());
        assert!(imp.offset.is_some());
    }

    #[test]
    fn arguments_desugar_to_sys_reads() {
        let s = single_sql("SELECT @2, @HOME;");
        assert!(!s.tokens.iter().any(|t| t.kind == Kind::Argument));
        let text: Vec<&str> = s.tokens.iter().map(|t| t.value.as_str()).collect();
        assert!(text.contains(&"args"));
        assert!(text.contains(&"env"));
        assert!(text.contains(&"rowid"));
    }

    #[test]
    fn assert_argument_wraps_is_null() {
        let mut nodes = parse(r#"ASSERT "set", @HOME;"#);
        let Node::Assert(a) = nodes.remove(0) else {
            panic!("expected an assert node");
        };
        let text: Vec<&str> = a.subquery.tokens.iter().map(|t| t.value.as_str()).collect();
        assert!(text.contains(&"IS"));
        assert!(text.contains(&"NULL"));
        assert_eq!(a.message, "set");
    }
}
