#![allow(dead_code)]
use rusqlite as sql;

/// An in-memory connection with the bundled tables registered.
pub fn get_connection() -> sql::Connection {
    let conn = sql::Connection::open_in_memory().unwrap();
    unsafe { sqlite3_vtab::register_all(conn.handle()) }.unwrap();
    conn
}

/// Every value of the first column, in result order.
pub fn fetch_column<T: sql::types::FromSql>(conn: &sql::Connection, sql_string: &str) -> Vec<T> {
    let mut stmt = conn.prepare(sql_string).unwrap();
    let rows = stmt.query_map([], |r| r.get(0)).unwrap();
    rows.map(|r| r.unwrap()).collect()
}

macro_rules! fetch_one_cell {
    ($conn: expr, $sql_string: expr) => {
        $conn.query_row($sql_string, [], |r| r.get(0)).unwrap()
    };
}
