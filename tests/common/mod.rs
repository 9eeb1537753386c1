//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use sqxx::Connection;

/// In-memory database with two small tables:
///
/// - `items(id, v)`: `(1, 11)`, `(2, 22)`, `(3, 33)`
/// - `types(id, i, l, d, s, b, n)`: one row with one value of each kind
pub fn setup_db() -> Connection {
   let conn = Connection::open_in_memory().unwrap();
   conn
      .exec(
         r#"
         CREATE TABLE items (id INTEGER PRIMARY KEY, v INTEGER);
         INSERT INTO items VALUES (1, 11), (2, 22), (3, 33);

         CREATE TABLE types (id INTEGER PRIMARY KEY, i INTEGER, l INTEGER, d REAL, s TEXT, b BLOB, n);
         INSERT INTO types VALUES (1, 2, 3000000000000, 4.5, 'abc', x'62696e', NULL);
         "#,
      )
      .unwrap();
   conn
}

/// Database file in a fresh temporary directory. Keep the directory alive
/// for as long as the file is used.
pub fn temp_db_path(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
   let dir = tempfile::tempdir().unwrap();
   let path = dir.path().join(name);
   (dir, path)
}

/// Every `v` in `items`, in id order.
pub fn item_values(conn: &Connection) -> Vec<i64> {
   let mut stmt = conn.prepare("SELECT v FROM items ORDER BY id").unwrap();
   stmt.map_rows(|row| row.val::<i64>(0)).collect::<sqxx::Result<_>>().unwrap()
}
