//! Scenario tests for `Database` against the scripted session.

use portsql_types::{Params, Query, Row, ServerVersion, Value, Vendor};

use crate::config::ConnectionOptions;
use crate::database::{Database, Strictness};
use crate::env_override::{
    OptimizerHint, FORCE_SEARCH_DEPTH_MARKER, MATERIALIZATION_FORCE_OFF_MARKER,
};
use crate::error::{BackendError, DmlError, ErrorKind};
use crate::mock::{Response, ScriptHandle};

fn connect(script: &ScriptHandle, options: ConnectionOptions) -> Database {
    Database::connect(&script.connector(), options).expect("connect should succeed")
}

/// Connected MySQL 8 database with an empty statement log.
fn mysql() -> (ScriptHandle, Database) {
    let script = ScriptHandle::new();
    let db = connect(&script, ConnectionOptions::default());
    script.clear_log();
    (script, db)
}

fn mariadb_options() -> ConnectionOptions {
    ConnectionOptions {
        driver: Vendor::Mariadb,
        ..Default::default()
    }
}

/// Connected MariaDB 10.6 database with an empty statement log.
fn mariadb() -> (ScriptHandle, Database) {
    let script = ScriptHandle::new();
    {
        let mut s = script.script();
        s.version = "10.6.12-MariaDB".to_string();
        s.collation_database = "utf8mb4_unicode_ci".to_string();
    }
    let db = connect(&script, mariadb_options());
    script.clear_log();
    (script, db)
}

fn user_columns(script: &ScriptHandle) {
    script.on(
        "SHOW COLUMNS FROM \"ps_user\"",
        Response::rows(
            &["Field", "Type", "Null", "Key", "Default", "Extra"],
            vec![
                vec![
                    "id".into(),
                    "bigint(10)".into(),
                    "NO".into(),
                    "PRI".into(),
                    Value::Null,
                    "auto_increment".into(),
                ],
                vec![
                    "name".into(),
                    "varchar(255)".into(),
                    "NO".into(),
                    "".into(),
                    "".into(),
                    "".into(),
                ],
                vec![
                    "flag".into(),
                    "tinyint(1)".into(),
                    "NO".into(),
                    "".into(),
                    "0".into(),
                    "".into(),
                ],
            ],
        ),
    );
}

fn two_users() -> Response {
    Response::rows(
        &["id", "name"],
        vec![
            vec![Value::Int(1), "alice".into()],
            vec![Value::Int(2), "bob".into()],
        ],
    )
}

// ── connection setup ─────────────────────────────────────────────────

#[test]
fn connect_negotiates_session_in_order() {
    let script = ScriptHandle::new();
    let mut db = connect(&script, ConnectionOptions::default());

    assert_eq!(
        script.log(),
        vec![
            "SHOW TABLE STATUS WHERE Name = 'ps_config'",
            "SELECT VERSION()",
            "--set_charset(utf8mb4)",
            "SET NAMES utf8mb4 COLLATE utf8mb4_0900_as_cs",
            "SET SESSION sql_mode = 'STRICT_ALL_TABLES,ANSI_QUOTES'",
            "SELECT @@group_concat_max_len",
            "SET SESSION group_concat_max_len = 131072",
        ]
    );
    assert_eq!(db.get_dbcollation(), "utf8mb4_0900_as_cs");
    assert_eq!(db.get_charset(), "utf8mb4");
    assert!(db.setup_supports_four_byte_character_set());
    assert_eq!(
        db.get_server_info().expect("server info").version,
        ServerVersion::new(8, 0, 36)
    );
    assert_eq!(db.query_stats().reads, 0, "setup queries are not counted");
    assert!(db.is_connected());
}

#[test]
fn large_group_concat_limit_is_left_alone() {
    let script = ScriptHandle::new();
    script.script().group_concat_max_len = 1_048_576;
    let _db = connect(&script, ConnectionOptions::default());
    assert!(script.statements("SET SESSION group_concat_max_len").is_empty());
}

#[test]
fn early_mysql_8_disables_derived_merge() {
    let script = ScriptHandle::new();
    script.script().version = "8.0.2".to_string();
    let _db = connect(&script, ConnectionOptions::default());
    assert_eq!(
        script.statements("SET SESSION optimizer_switch"),
        ["SET SESSION optimizer_switch='derived_merge=off'"]
    );
}

#[test]
fn explicit_collation_skips_detection() {
    let script = ScriptHandle::new();
    let db = connect(
        &script,
        ConnectionOptions {
            collation: Some("utf8mb4_unicode_ci".into()),
            ..Default::default()
        },
    );
    assert!(script.statements("SHOW TABLE STATUS").is_empty());
    assert_eq!(
        script.statements("SET NAMES"),
        ["SET NAMES utf8mb4 COLLATE utf8mb4_unicode_ci"]
    );
    assert_eq!(db.get_dbcollation(), "utf8mb4_unicode_ci");
}

#[test]
fn config_table_collation_and_engine_win() {
    let script = ScriptHandle::new();
    script.on(
        "SHOW TABLE STATUS WHERE Name = 'ps_config'",
        Response::rows(
            &["Name", "Engine", "Collation"],
            vec![vec!["ps_config".into(), "InnoDB".into(), "utf8mb4_unicode_ci".into()]],
        ),
    );
    let mut db = connect(&script, ConnectionOptions::default());
    assert_eq!(db.get_dbcollation(), "utf8mb4_unicode_ci");
    assert_eq!(db.get_dbengine().expect("engine").as_deref(), Some("InnoDB"));
}

#[test]
fn non_utf8_config_table_is_rejected() {
    let script = ScriptHandle::new();
    script.on(
        "SHOW TABLE STATUS",
        Response::rows(
            &["Name", "Engine", "Collation"],
            vec![vec!["ps_config".into(), "InnoDB".into(), "latin1_swedish_ci".into()]],
        ),
    );
    let err = Database::connect(&script.connector(), ConnectionOptions::default())
        .expect_err("latin1 is unsupported");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(script.script().closed, "failed setup must close the session");
}

#[test]
fn legacy_mariadb_banner_is_normalised() {
    let script = ScriptHandle::new();
    script.script().version = "5.5.5-10.3.39-MariaDB-0+deb10u1".to_string();
    let mut db = connect(&script, mariadb_options());
    assert_eq!(
        db.get_server_info().expect("server info").version,
        ServerVersion::new(10, 3, 39)
    );
}

#[test]
fn wrong_vendor_disposes_connection() {
    let script = ScriptHandle::new();
    let err = Database::connect(&script.connector(), mariadb_options())
        .expect_err("MySQL 8 with the MariaDB driver");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(script.script().closed);
    assert!(script.statements("SET SESSION sql_mode").is_empty());
}

#[test]
fn missing_driver_fails_before_any_statement() {
    let script = ScriptHandle::new();
    let mut connector = script.connector();
    connector.installed = false;
    let err = Database::connect(&connector, ConnectionOptions::default())
        .expect_err("driver is missing");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(script.log().is_empty());
}

#[test]
fn refused_handshake_is_a_connection_error() {
    let script = ScriptHandle::new();
    let mut connector = script.connector();
    connector.refuse = Some(BackendError::with_code(1045, "Access denied for user"));
    let err = Database::connect(&connector, ConnectionOptions::default())
        .expect_err("credentials refused");
    assert!(matches!(err, DmlError::Connection(ref m) if m.contains("Access denied")));
}

#[test]
fn long_prefix_requires_external_database() {
    let script = ScriptHandle::new();
    let options = ConnectionOptions {
        prefix: "p".repeat(17),
        ..Default::default()
    };
    let err = Database::connect(&script.connector(), options.clone()).expect_err("prefix too long");
    assert_eq!(err.kind(), ErrorKind::Connection);

    let external = ConnectionOptions {
        external: true,
        ..options
    };
    let db = connect(&script, external);
    assert_eq!(db.get_dbcollation(), "utf8mb4_0900_ai_ci");
}

#[test]
fn disposed_connection_rejects_queries() {
    let (script, mut db) = mysql();
    db.dispose();
    db.dispose();
    assert!(!db.is_connected());
    let err = db
        .get_records_sql("SELECT id FROM {user}", 0, 0)
        .expect_err("connection is gone");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(script.log().is_empty());
}

#[test]
fn diagnose_reports_myisam_tables() {
    let (script, mut db) = mysql();
    assert_eq!(db.diagnose().expect("diagnose"), None);
    script.on(
        "Engine = 'MyISAM'",
        Response::rows(&["Name"], vec![vec!["ps_user".into()], vec!["ps_log".into()]]),
    );
    let report = db.diagnose().expect("diagnose").expect("two tables reported");
    assert!(report.starts_with("2 tables"));
    assert_eq!(
        script.statements("SHOW TABLE STATUS")[0],
        "SHOW TABLE STATUS WHERE Name LIKE BINARY 'ps\\_%' AND Engine = 'MyISAM'"
    );
}

// ── reads ────────────────────────────────────────────────────────────

#[test]
fn keyed_records_reject_duplicate_first_column() {
    let (script, mut db) = mysql();
    script.on(
        "FROM ps_user",
        Response::rows(
            &["id", "name"],
            vec![
                vec![Value::Int(1), "alice".into()],
                vec![Value::Int(1), "alias".into()],
            ],
        ),
    );
    let err = db
        .get_records_sql("SELECT id, name FROM {user}", 0, 0)
        .expect_err("duplicate key");
    assert_eq!(err.kind(), ErrorKind::Read);

    let rows = db
        .get_records_sql_unkeyed("SELECT id, name FROM {user}", 0, 0)
        .expect("unkeyed read");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("name"), Some(&Value::from("alias")));
}

#[test]
fn records_keep_query_order_and_bind_params() {
    let (script, mut db) = mysql();
    script.on("FROM ps_user", two_users());
    let rows = db
        .get_records_sql(
            Query::new("SELECT id, name FROM {user} WHERE name <> ?").bind("it's"),
            5,
            0,
        )
        .expect("read");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(
        script.log(),
        ["SELECT id, name FROM ps_user WHERE name <> 'it\\'s' LIMIT 5, 18446744073709551615"]
    );
}

#[test]
fn record_strictness() {
    let (script, mut db) = mysql();
    script.on("FROM ps_user", two_users());

    let err = db
        .get_record_sql("SELECT id, name FROM {user}", Strictness::MustExist)
        .expect_err("two rows");
    assert_eq!(err.kind(), ErrorKind::Read);

    let first = db
        .get_record_sql("SELECT id, name FROM {user}", Strictness::IgnoreMultiple)
        .expect("ignore multiple")
        .expect("a row");
    assert_eq!(first.get("name"), Some(&Value::from("alice")));
    assert_eq!(
        script.statements("SELECT"),
        [
            "SELECT id, name FROM ps_user LIMIT 0, 2",
            "SELECT id, name FROM ps_user LIMIT 0, 1",
        ]
    );

    assert_eq!(
        db.get_record_sql("SELECT id FROM {course}", Strictness::IgnoreMissing)
            .expect("missing is fine"),
        None
    );
    let err = db
        .get_field_sql("SELECT id FROM {course}", Strictness::MustExist)
        .expect_err("must exist");
    assert_eq!(err.kind(), ErrorKind::Read);
}

#[test]
fn fieldset_and_exists() {
    let (script, mut db) = mysql();
    script.on("EXISTS", Response::value("1", 1));
    script.on("FROM ps_user", two_users());

    let ids = db
        .get_fieldset_sql("SELECT id, name FROM {user}")
        .expect("fieldset");
    assert_eq!(ids, [Value::Int(1), Value::Int(2)]);

    assert!(db
        .record_exists_sql(Query::new("SELECT id FROM {course} WHERE id = ?").bind(5))
        .expect("exists"));
    assert!(script
        .log()
        .contains(&"SELECT 1 FROM DUAL WHERE EXISTS (SELECT id FROM ps_course WHERE id = '5') LIMIT 0, 1".to_string()));
}

#[test]
fn counted_recordset_reads_found_rows() {
    let (script, mut db) = mysql();
    script.on("FOUND_ROWS()", Response::value("FOUND_ROWS()", 42));
    script.on("SQL_CALC_FOUND_ROWS", two_users());

    let mut rs = db
        .get_counted_recordset_sql(Query::new("SELECT id FROM {user} WHERE id > ?").bind(0), 0, 2)
        .expect("counted recordset");
    assert_eq!(
        script.log(),
        [
            "SELECT SQL_CALC_FOUND_ROWS id FROM ps_user WHERE id > '0' LIMIT 0, 2",
            "SELECT FOUND_ROWS()",
        ]
    );
    assert!(rs.valid());
    assert_eq!(rs.key(), Some(&Value::Int(1)));
    rs.close();
    rs.close();
    assert!(!rs.valid());
    assert_eq!(rs.get_count_without_limits(), 42);

    let err = db
        .get_counted_recordset_sql("SHOW TABLES", 0, 0)
        .expect_err("not a select");
    assert_eq!(err.kind(), ErrorKind::Coding);
}

#[test]
fn missing_found_rows_is_a_read_error() {
    let (script, mut db) = mysql();
    script.on("FOUND_ROWS()", Response::value("FOUND_ROWS()", Value::Null));
    script.on("SQL_CALC_FOUND_ROWS", two_users());

    let err = db
        .get_counted_recordset_sql("SELECT id FROM {user}", 0, 0)
        .expect_err("count is unknown");
    assert_eq!(err.kind(), ErrorKind::Read);
    assert!(matches!(err, DmlError::Read { ref sql, .. } if sql == "SELECT FOUND_ROWS()"));
}

#[test]
fn export_streams_whole_table() {
    let (script, mut db) = mysql();
    script.on("SELECT * FROM ps_user", two_users());
    let names: Vec<String> = db
        .export_table_recordset("user")
        .expect("export")
        .map(|row| {
            let row = row.expect("row");
            row.get("name").and_then(Value::as_str).unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(names, ["alice", "bob"]);
    assert_eq!(db.query_stats().reads, 1);
}

// ── writes ───────────────────────────────────────────────────────────

#[test]
fn execute_rejects_multiple_statements() {
    let (script, mut db) = mysql();
    let err = db
        .execute("DELETE FROM {user}; DROP TABLE {user}")
        .expect_err("two statements");
    assert_eq!(err.kind(), ErrorKind::Coding);
    assert!(script.log().is_empty());
}

#[test]
fn execute_reports_affected_rows_and_counts_writes() {
    let (script, mut db) = mysql();
    script.on("UPDATE ps_user", Response::Affected(3));
    let affected = db
        .execute(Query::new("UPDATE {user} SET flag = ? WHERE name = ?").bind(true).bind("bob"))
        .expect("update");
    assert_eq!(affected, 3);
    assert_eq!(script.log(), ["UPDATE ps_user SET flag = 1 WHERE name = 'bob'"]);
    assert_eq!(db.query_stats().writes, 1);

    script.on("DELETE FROM ps_user", Response::error("locked"));
    let err = db.execute("DELETE FROM {user}").expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::Write);
}

#[test]
fn insert_record_keeps_known_columns() {
    let (script, mut db) = mysql();
    user_columns(&script);
    let id = db
        .insert_record(
            "user",
            Row::new()
                .with("id", 99)
                .with("name", "carol")
                .with("flag", true)
                .with("nickname", "c"),
        )
        .expect("insert");
    assert_eq!(id, 1);
    assert_eq!(
        script.statements("INSERT"),
        ["INSERT INTO ps_user (\"name\",\"flag\") VALUES('carol','1')"]
    );

    let err = db
        .insert_record("missing", Row::new().with("name", "x"))
        .expect_err("no such table");
    assert_eq!(err.kind(), ErrorKind::Read);
}

#[test]
fn update_record_requires_id() {
    let (script, mut db) = mysql();
    user_columns(&script);
    let err = db
        .update_record("user", Row::new().with("name", "x"))
        .expect_err("no id");
    assert_eq!(err.kind(), ErrorKind::Coding);

    db.update_record("user", Row::new().with("id", 4).with("name", ""))
        .expect("update");
    assert_eq!(
        script.statements("UPDATE"),
        ["UPDATE ps_user SET \"name\" = '' WHERE id='4'"]
    );
}

#[test]
fn delete_records_select_builds_where_clause() {
    let (script, mut db) = mysql();
    db.delete_records_select("user", "flag = ?", Params::Positional(vec![Value::Int(0)]))
        .expect("delete");
    db.delete_records_select("log", "", Params::default())
        .expect("delete all");
    assert_eq!(
        script.log(),
        ["DELETE FROM ps_user WHERE flag = '0'", "DELETE FROM ps_log"]
    );
}

fn users(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            Row::new()
                .with("name", format!("user{i}"))
                .with("flag", i % 2 == 0)
        })
        .collect()
}

fn inserted_tuples(script: &ScriptHandle) -> Vec<String> {
    script
        .statements("INSERT")
        .iter()
        .flat_map(|sql| {
            let values = sql.split(" VALUES ").nth(1).unwrap_or_default();
            values
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split("),(")
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn chunked_insert_matches_single_statement() {
    let mut tuples = Vec::new();
    for size in [1, 2, 50] {
        let script = ScriptHandle::new();
        let mut db = connect(
            &script,
            ConnectionOptions {
                bulk_insert_size: Some(size),
                ..Default::default()
            },
        );
        user_columns(&script);
        db.insert_records("user", users(5)).expect("bulk insert");
        assert_eq!(script.statements("INSERT").len(), 5usize.div_ceil(size));
        tuples.push(inserted_tuples(&script));
    }
    assert_eq!(tuples[0], tuples[1]);
    assert_eq!(tuples[1], tuples[2]);
    assert_eq!(tuples[0][0], "'user0','1'");
}

#[test]
fn chunk_size_follows_max_allowed_packet() {
    let (script, mut db) = mysql();
    script.on(
        "max_allowed_packet",
        Response::rows(
            &["Variable_name", "Value"],
            vec![vec!["max_allowed_packet".into(), "1000000".into()]],
        ),
    );
    assert_eq!(db.bulk_insert_chunk_size().expect("chunk size"), 5);
    assert_eq!(db.bulk_insert_chunk_size().expect("cached"), 5);
    assert_eq!(script.statements("SHOW VARIABLES").len(), 1);
}

#[test]
fn bulk_insert_rejects_mixed_structure_before_network() {
    let (script, mut db) = mysql();
    let rows = vec![
        Row::new().with("name", "a").with("flag", 1),
        Row::new().with("flag", 0).with("name", "b"),
    ];
    let err = db.insert_records("user", rows).expect_err("field order differs");
    assert_eq!(err.kind(), ErrorKind::Coding);
    assert!(script.log().is_empty());

    db.insert_records("user", Vec::new()).expect("nothing to insert");
    assert!(script.log().is_empty());
}

// ── transactions ─────────────────────────────────────────────────────

#[test]
fn release_after_ddl_is_silent_but_rollback_fails() {
    let (script, mut db) = mysql();
    db.begin_transaction().expect("begin");
    db.create_savepoint("sp1").expect("savepoint");
    db.change_database_structure(&["CREATE TABLE {tmp} (id INT)"], None)
        .expect("ddl");

    db.release_savepoint("sp1").expect("release degrades to a no-op");
    assert!(script.statements("RELEASE").is_empty());

    let err = db.rollback_savepoint("sp1").expect_err("implicitly committed");
    assert!(matches!(err, DmlError::RollbackAfterAutocommit(ref name) if name == "sp1"));

    db.rollback_transaction().expect("rollback");
    assert_eq!(
        script.log(),
        [
            "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED",
            "START TRANSACTION",
            "SAVEPOINT sp1",
            "CREATE TABLE ps_tmp (id INT)",
            "ROLLBACK",
        ]
    );
}

#[test]
fn nested_transaction_failure_rolls_back_to_savepoint() {
    let (script, mut db) = mysql();
    db.transaction(|db| {
        db.execute(Query::new("UPDATE {user} SET name = ?").bind("x"))?;
        let inner: Result<(), DmlError> =
            db.transaction(|_| Err(DmlError::coding("inner failure")));
        assert!(inner.is_err());
        Ok(())
    })
    .expect("outer transaction commits");

    assert_eq!(
        script.log(),
        [
            "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED",
            "START TRANSACTION",
            "UPDATE ps_user SET name = 'x'",
            "SAVEPOINT tsp_1",
            "ROLLBACK TO SAVEPOINT tsp_1",
            "RELEASE SAVEPOINT tsp_1",
            "COMMIT",
        ]
    );
    assert!(!db.is_transaction_started());
}

#[test]
fn outer_transaction_failure_rolls_back() {
    let (script, mut db) = mysql();
    let result: Result<(), DmlError> = db.transaction(|db| {
        db.execute("DELETE FROM {user}")?;
        Err(DmlError::coding("abort"))
    });
    assert!(result.is_err());
    assert_eq!(script.statements("ROLLBACK"), ["ROLLBACK"]);
    assert!(!db.is_transaction_started());

    let err = db.commit_transaction().expect_err("nothing to commit");
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

// ── environment overrides ────────────────────────────────────────────

#[test]
fn override_is_restored_when_query_fails() {
    let (script, mut db) = mariadb();
    let marker = db
        .get_optimizer_hint(OptimizerHint::MaterializationForceOff)
        .expect("hint");
    assert_eq!(marker, MATERIALIZATION_FORCE_OFF_MARKER);
    script.on("FROM ps_user", Response::error("syntax error"));

    let err = db
        .get_recordset_sql(format!("SELECT {marker} id FROM {{user}}"), 0, 0)
        .expect_err("query fails");
    assert_eq!(err.kind(), ErrorKind::Read);
    assert_eq!(
        script.log(),
        [
            "SET SESSION optimizer_switch='materialization=off'",
            "SELECT  id FROM ps_user",
            "SET SESSION optimizer_switch='materialization=default'",
        ]
    );
}

#[test]
fn both_overrides_bracket_one_failing_query() {
    let (script, mut db) = mariadb();
    let materialization = db
        .get_optimizer_hint(OptimizerHint::MaterializationForceOff)
        .expect("materialization hint");
    let depth = db
        .get_optimizer_hint(OptimizerHint::ForceSearchDepth(3))
        .expect("depth hint");
    assert_eq!(depth, FORCE_SEARCH_DEPTH_MARKER);
    script.on("FROM ps_user", Response::error("lock wait timeout"));

    let err = db
        .get_recordset_sql(format!("SELECT {materialization}{depth} id FROM {{user}}"), 0, 0)
        .expect_err("query fails");
    assert_eq!(err.kind(), ErrorKind::Read);
    assert_eq!(
        script.log(),
        [
            "SET SESSION optimizer_switch='materialization=off'",
            "SET SESSION optimizer_search_depth=3",
            "SELECT  id FROM ps_user",
            "SET SESSION optimizer_switch='materialization=default'",
            "SET SESSION optimizer_search_depth=default",
        ]
    );
}

#[test]
fn apostrophe_in_comment_does_not_block_marked_query() {
    let (script, mut db) = mariadb();
    let marker = db
        .get_optimizer_hint(OptimizerHint::MaterializationForceOff)
        .expect("hint");
    script.on("FROM ps_user", two_users());

    let rows = db
        .get_recordset_sql(format!("SELECT id /* don't inline */ {marker} FROM {{user}}"), 0, 0)
        .expect("select runs")
        .to_array()
        .expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        script.log(),
        [
            "SET SESSION optimizer_switch='materialization=off'",
            "SELECT id /* don't inline */  FROM ps_user",
            "SET SESSION optimizer_switch='materialization=default'",
        ]
    );
}

#[test]
fn mysql_ignores_optimizer_hints() {
    let (script, mut db) = mysql();
    let marker = db
        .get_optimizer_hint(OptimizerHint::ForceSearchDepth(3))
        .expect("hint");
    assert_eq!(marker, "");
    db.get_recordset_sql(format!("SELECT {marker}id FROM {{user}}"), 0, 0)
        .expect("select");
    assert_eq!(script.log(), ["SELECT id FROM ps_user"]);

    let err = db
        .get_optimizer_hint(OptimizerHint::ForceSearchDepth(63))
        .expect_err("out of range");
    assert_eq!(err.kind(), ErrorKind::Coding);
}

// ── schema ───────────────────────────────────────────────────────────

#[test]
fn columns_are_cached_until_structure_changes() {
    let (script, mut db) = mysql();
    user_columns(&script);
    let columns = db.get_columns("user").expect("columns");
    assert_eq!(columns.len(), 3);
    db.get_columns("user").expect("cached columns");
    assert_eq!(script.statements("SHOW COLUMNS").len(), 1);

    db.change_database_structure(&["ALTER TABLE {user} ADD x INT"], Some(&["user"][..]))
        .expect("ddl");
    db.get_columns("user").expect("fresh columns");
    assert_eq!(script.statements("SHOW COLUMNS").len(), 2);
}

#[test]
fn failing_describe_is_empty_and_not_cached() {
    let (script, mut db) = mysql();
    script.on("SHOW COLUMNS FROM \"ps_nope\"", Response::error("no such table"));
    assert!(db.get_columns("nope").expect("empty").is_empty());
    assert!(db.get_columns("nope").expect("empty").is_empty());
    assert_eq!(script.statements("SHOW COLUMNS").len(), 2);
}

#[test]
fn reserved_word_tables_are_quoted_when_described() {
    let script = ScriptHandle::new();
    let mut db = connect(
        &script,
        ConnectionOptions {
            prefix: String::new(),
            external: true,
            ..Default::default()
        },
    );
    script.clear_log();
    script.on("SHOW COLUMNS FROM order", Response::error("syntax error"));

    db.get_columns("order").expect("describe");
    db.get_indexes("order");
    assert_eq!(
        script.log(),
        ["SHOW COLUMNS FROM \"order\"", "SHOW INDEXES FROM \"order\""]
    );
}

#[test]
fn tables_include_registered_temporary_tables() {
    let (script, mut db) = mysql();
    script.on(
        "SHOW TABLES LIKE",
        Response::rows(
            &["Tables_in_portsql"],
            vec![vec!["ps_user".into()], vec!["ps_config".into()]],
        ),
    );
    db.register_temp_table("temp_ids");
    let tables = db.get_tables(true).expect("tables");
    assert_eq!(tables, ["config", "temp_ids", "user"]);
    assert_eq!(script.log(), ["SHOW TABLES LIKE 'ps\\_%'"]);

    db.get_tables(true).expect("cached");
    assert_eq!(script.log().len(), 1);

    db.unregister_temp_table("temp_ids");
    assert_eq!(db.get_tables(true).expect("tables"), ["config", "user"]);
}

#[test]
fn indexes_skip_primary_and_order_columns() {
    let (script, mut db) = mysql();
    script.on(
        "SHOW INDEXES FROM \"ps_user\"",
        Response::rows(
            &["Table", "Non_unique", "Key_name", "Seq_in_index", "Column_name", "Index_type"],
            vec![
                vec!["ps_user".into(), Value::Int(0), "PRIMARY".into(), Value::Int(1), "id".into(), "BTREE".into()],
                vec!["ps_user".into(), Value::Int(0), "name_flag".into(), Value::Int(2), "flag".into(), "BTREE".into()],
                vec!["ps_user".into(), Value::Int(0), "name_flag".into(), Value::Int(1), "name".into(), "BTREE".into()],
                vec!["ps_user".into(), Value::Int(1), "bio".into(), Value::Int(1), "bio".into(), "FULLTEXT".into()],
            ],
        ),
    );
    let indexes = db.get_indexes("user");
    assert_eq!(indexes.len(), 2);
    assert_eq!(indexes[0].name, "name_flag");
    assert!(indexes[0].unique);
    assert_eq!(indexes[0].columns, ["name", "flag"]);
    assert!(indexes[1].fulltext);
    assert!(!indexes[1].unique);

    script.on("SHOW INDEXES FROM \"ps_gone\"", Response::error("no such table"));
    assert!(db.get_indexes("gone").is_empty());
}

// ── session locks ────────────────────────────────────────────────────

#[test]
fn session_lock_timeout_is_distinct_error() {
    let (script, mut db) = mysql();
    db.release_session_lock(7).expect("nothing to release");
    assert!(script.log().is_empty());

    script.once("GET_LOCK", Response::value("GET_LOCK", 1));
    db.get_session_lock(7, 5).expect("lock acquired");
    let err = db.get_session_lock(7, 5).expect_err("lock busy");
    assert_eq!(err.kind(), ErrorKind::SessionLock);

    db.release_session_lock(7).expect("release");
    assert_eq!(
        script.log(),
        [
            "SELECT GET_LOCK('portsql-ps_-session-7', 5)",
            "SELECT GET_LOCK('portsql-ps_-session-7', 5)",
            "SELECT RELEASE_LOCK('portsql-ps_-session-7')",
        ]
    );
}
