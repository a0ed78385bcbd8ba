#[macro_use]
mod common;

use common::{fetch_column, get_connection};
use rusqlite as sql;
use sqlite3_vtab::virtual_table::ordered_map;

fn populated() -> sql::Connection {
    let conn = get_connection();
    conn.execute_batch("CREATE VIRTUAL TABLE m USING ordered_map(k INTEGER, v TEXT);")
        .unwrap();
    for k in 1..=10 {
        conn.execute("INSERT INTO m VALUES (?1, ?2);", sql::params![k, format!("v{}", k)])
            .unwrap();
    }
    conn
}

#[test]
fn range_scans_in_key_order() {
    let conn = populated();
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k >= 3 AND k < 7 ORDER BY k;");
    assert_eq!(keys, [3, 4, 5, 6]);
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k >= 3 AND k < 7 ORDER BY k DESC;");
    assert_eq!(keys, [6, 5, 4, 3]);
    let values: Vec<String> = fetch_column(&conn, "SELECT v FROM m WHERE k > 8;");
    assert_eq!(values, ["v9", "v10"]);
}

#[test]
fn conflicting_equalities_match_nothing() {
    let conn = populated();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m WHERE k = 5 AND k = 7;");
    assert_eq!(rows, 0);
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m WHERE k > 7 AND k < 3;");
    assert_eq!(rows, 0);
}

#[test]
fn non_integer_constraints() {
    let conn = populated();
    let low: i64 = fetch_one_cell!(conn, "SELECT min(k) FROM m WHERE k > 2.5;");
    assert_eq!(low, 3);
    let high: i64 = fetch_one_cell!(conn, "SELECT max(k) FROM m WHERE k <= 4.5;");
    assert_eq!(high, 4);
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m WHERE k = 2.5;");
    assert_eq!(rows, 0);
    // every integer sorts before any text
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m WHERE k < 'abc';");
    assert_eq!(rows, 10);
}

#[test]
fn in_lists_are_point_lookups() {
    let conn = populated();
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k IN (9, 2, 5, 42);");
    assert_eq!(keys, [2, 5, 9]);
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k IN (2, 5, 9) ORDER BY k DESC;");
    assert_eq!(keys, [9, 5, 2]);
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k IN (2, 5, 9) AND k > 3;");
    assert_eq!(keys, [5, 9]);
    let values: Vec<String> = fetch_column(&conn, "SELECT v FROM m WHERE k IN (2, 'x', 2.5, 5, 5);");
    assert_eq!(values, ["v2", "v5"]);
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k IN (SELECT value FROM generate_series(3, 5));");
    assert_eq!(keys, [3, 4, 5]);
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m WHERE k IN (2, 5) AND k IN (5, 7);");
    assert_eq!(rows, 1);
}

#[test]
fn update_and_delete() {
    let conn = populated();
    conn.execute("UPDATE m SET v = 'changed' WHERE k = 3;", []).unwrap();
    let value: String = fetch_one_cell!(conn, "SELECT v FROM m WHERE k = 3;");
    assert_eq!(value, "changed");

    // untouched columns keep their value when the key moves
    conn.execute("UPDATE m SET k = 100 WHERE k = 4;", []).unwrap();
    let value: String = fetch_one_cell!(conn, "SELECT v FROM m WHERE k = 100;");
    assert_eq!(value, "v4");
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m WHERE k = 4;");
    assert_eq!(rows, 0);

    conn.execute("DELETE FROM m WHERE k > 8;", []).unwrap();
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m;");
    assert_eq!(keys, [1, 2, 3, 5, 6, 7, 8]);
}

#[test]
fn duplicate_keys() {
    let conn = populated();
    assert!(conn.execute("INSERT INTO m VALUES (1, 'dup');", []).is_err());
    conn.execute("INSERT OR IGNORE INTO m VALUES (1, 'ignored');", []).unwrap();
    let value: String = fetch_one_cell!(conn, "SELECT v FROM m WHERE k = 1;");
    assert_eq!(value, "v1");
    conn.execute("INSERT OR REPLACE INTO m VALUES (1, 'replaced');", []).unwrap();
    let value: String = fetch_one_cell!(conn, "SELECT v FROM m WHERE k = 1;");
    assert_eq!(value, "replaced");
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m;");
    assert_eq!(rows, 10);
}

#[test]
fn missing_keys_are_assigned() {
    let conn = populated();
    conn.execute("INSERT INTO m(v) VALUES ('auto');", []).unwrap();
    let key: i64 = fetch_one_cell!(conn, "SELECT k FROM m WHERE v = 'auto';");
    assert_eq!(key, 11);
    assert!(conn.execute("INSERT INTO m VALUES ('text key', 'x');", []).is_err());
}

#[test]
fn float_keys_must_fit_an_integer() {
    let conn = populated();
    conn.execute("INSERT INTO m VALUES (12.0, 'whole');", []).unwrap();
    let value: String = fetch_one_cell!(conn, "SELECT v FROM m WHERE k = 12;");
    assert_eq!(value, "whole");
    for key in ["1e300", "-1e300", "9223372036854775808.0", "12.5"] {
        let sql = format!("INSERT INTO m VALUES ({}, 'x');", key);
        assert!(conn.execute(&sql, []).is_err(), "{} was accepted", key);
    }
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m;");
    assert_eq!(rows, 11);
}

#[test]
fn rollback_restores_rows() {
    let conn = populated();
    conn.execute_batch("BEGIN; INSERT INTO m VALUES (11, 'x'); DELETE FROM m WHERE k < 3; ROLLBACK;")
        .unwrap();
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m;");
    assert_eq!(keys, (1..=10).collect::<Vec<_>>());
}

#[test]
fn rollback_of_an_empty_table() {
    let conn = get_connection();
    conn.execute_batch("CREATE VIRTUAL TABLE e USING ordered_map(k INTEGER, v TEXT);")
        .unwrap();
    conn.execute_batch("BEGIN; INSERT INTO e VALUES (1, 'a'), (2, 'b');").unwrap();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM e;");
    assert_eq!(rows, 2);
    conn.execute_batch("ROLLBACK;").unwrap();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM e;");
    assert_eq!(rows, 0);
}

#[test]
fn self_join_sees_consistent_rows() {
    let conn = populated();
    let pairs: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m AS a JOIN m AS b ON b.k = a.k + 1;");
    assert_eq!(pairs, 9);
}

#[test]
fn rollback_to_outer_savepoint() {
    let conn = populated();
    conn.execute_batch(
        "BEGIN;
         SAVEPOINT a;
         INSERT INTO m VALUES (20, 'x');
         SAVEPOINT b;
         INSERT INTO m VALUES (21, 'y');",
    )
    .unwrap();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m;");
    assert_eq!(rows, 12);
    conn.execute_batch("ROLLBACK TO a;").unwrap();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM m;");
    assert_eq!(rows, 10);
    conn.execute_batch("COMMIT;").unwrap();
}

#[test]
fn rollback_to_inner_savepoint() {
    let conn = populated();
    conn.execute_batch(
        "BEGIN;
         INSERT INTO m VALUES (30, 'x');
         SAVEPOINT b;
         INSERT INTO m VALUES (31, 'y');
         ROLLBACK TO b;
         COMMIT;",
    )
    .unwrap();
    let keys: Vec<i64> = fetch_column(&conn, "SELECT k FROM m WHERE k > 10;");
    assert_eq!(keys, [30]);
}

#[test]
fn rename_and_drop() {
    let conn = populated();
    conn.execute_batch("ALTER TABLE m RENAME TO renamed;").unwrap();
    let rows: i64 = fetch_one_cell!(conn, "SELECT count(*) FROM renamed;");
    assert_eq!(rows, 10);
    let value: String = fetch_one_cell!(conn, "SELECT v FROM renamed WHERE k = 7;");
    assert_eq!(value, "v7");
    conn.execute("INSERT INTO renamed VALUES (11, 'v11');", []).unwrap();
    conn.execute_batch("DROP TABLE renamed;").unwrap();
    assert!(conn.prepare("SELECT * FROM renamed;").is_err());
}

#[test]
fn store_follows_table_lifecycle() {
    let conn = sql::Connection::open_in_memory().unwrap();
    let store = unsafe { ordered_map::register(conn.handle()) }.unwrap();
    assert!(store.tables().is_empty());

    conn.execute_batch("CREATE VIRTUAL TABLE m USING ordered_map(k INTEGER, v TEXT); INSERT INTO m VALUES (1, 'a'), (2, 'b');")
        .unwrap();
    assert_eq!(store.tables(), ["main.m"]);
    assert_eq!(store.row_count("main", "m"), Some(2));

    conn.execute_batch("ALTER TABLE m RENAME TO n;").unwrap();
    assert_eq!(store.tables(), ["main.n"]);
    assert_eq!(store.row_count("main", "n"), Some(2));

    conn.execute_batch("DROP TABLE n;").unwrap();
    assert!(store.tables().is_empty());
}

#[test]
fn default_columns() {
    let conn = get_connection();
    conn.execute_batch("CREATE VIRTUAL TABLE d USING ordered_map; INSERT INTO d VALUES (2, x'00ff'), (1, NULL);")
        .unwrap();
    let keys: Vec<i64> = fetch_column(&conn, "SELECT key FROM d;");
    assert_eq!(keys, [1, 2]);
    let blob: Vec<u8> = fetch_one_cell!(conn, "SELECT value FROM d WHERE key = 2;");
    assert_eq!(blob, [0x00, 0xff]);
}
