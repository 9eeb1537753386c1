//! Integration tests for scoped transactions.

mod common;

use common::{item_values, setup_db, temp_db_path};
use sqxx::{Connection, TransactionBehavior, ffi};

#[test]
fn test_commit_keeps_changes() {
   let conn = setup_db();
   let tx = conn.transaction(TransactionBehavior::Deferred).unwrap();
   assert!(!tx.autocommit());

   tx.exec("INSERT INTO items VALUES (4, 44)").unwrap();
   tx.commit().unwrap();

   assert!(conn.autocommit());
   assert_eq!(item_values(&conn), vec![11, 22, 33, 44]);
}

#[test]
fn test_rollback_discards_changes() {
   let conn = setup_db();
   let tx = conn.transaction(TransactionBehavior::default()).unwrap();
   tx.exec("DELETE FROM items").unwrap();
   assert!(item_values(tx.connection()).is_empty());

   tx.rollback().unwrap();
   assert_eq!(item_values(&conn), vec![11, 22, 33]);
}

#[test]
fn test_drop_rolls_back() {
   let conn = setup_db();
   {
      let tx = conn.transaction(TransactionBehavior::Immediate).unwrap();
      tx.exec("UPDATE items SET v = 0").unwrap();
   }

   assert!(conn.autocommit());
   assert_eq!(item_values(&conn), vec![11, 22, 33]);
}

#[test]
fn test_drop_after_manual_commit_is_harmless() {
   let conn = setup_db();
   {
      let tx = conn.transaction(TransactionBehavior::Deferred).unwrap();
      tx.exec("INSERT INTO items VALUES (4, 44); COMMIT;").unwrap();
   }

   assert_eq!(item_values(&conn), vec![11, 22, 33, 44]);
}

#[test]
fn test_statements_inside_transaction() {
   let conn = setup_db();
   let tx = conn.transaction(TransactionBehavior::Deferred).unwrap();
   {
      let mut stmt = tx.prepare("INSERT INTO items VALUES (?, ?)").unwrap();
      for id in 4..7_i64 {
         stmt.bind(0, id).unwrap();
         stmt.bind(1, id * 11).unwrap();
         stmt.run().unwrap();
      }
   }
   tx.commit().unwrap();

   assert_eq!(item_values(&conn), vec![11, 22, 33, 44, 55, 66]);
}

#[test]
fn test_nested_begin_fails() {
   let conn = setup_db();
   let tx = conn.transaction(TransactionBehavior::Deferred).unwrap();

   let err = tx.transaction(TransactionBehavior::Deferred).err().unwrap();
   assert!(err.message().contains("within a transaction"), "{}", err.message());

   // The outer transaction is still open.
   assert!(!tx.autocommit());
   tx.rollback().unwrap();
}

#[test]
fn test_failed_commit_rolls_back() {
   let conn = setup_db();
   conn
      .exec(
         "PRAGMA foreign_keys = ON;
          CREATE TABLE parent (id INTEGER PRIMARY KEY);
          CREATE TABLE child (pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED);",
      )
      .unwrap();

   let tx = conn.transaction(TransactionBehavior::Deferred).unwrap();
   tx.exec("INSERT INTO child VALUES (99)").unwrap();
   tx.exec("INSERT INTO items VALUES (4, 44)").unwrap();

   let err = tx.commit().unwrap_err();
   assert_eq!(err.code(), ffi::SQLITE_CONSTRAINT_FOREIGNKEY);

   assert!(conn.autocommit());
   assert_eq!(item_values(&conn), vec![11, 22, 33]);
   let children: i64 = conn.run("SELECT count(*) FROM child").unwrap().val(0).unwrap();
   assert_eq!(children, 0);
}

#[test]
fn test_immediate_blocks_other_writers() {
   let (_dir, path) = temp_db_path("tx.db");
   let first = Connection::open(&path).unwrap();
   first.exec("CREATE TABLE t (x)").unwrap();
   let second = Connection::open(&path).unwrap();

   let tx = first.transaction(TransactionBehavior::Immediate).unwrap();

   // Readers are fine, writers are not.
   second.exec("SELECT * FROM t").unwrap();
   let err = second.transaction(TransactionBehavior::Immediate).err().unwrap();
   assert!(err.is_busy());

   tx.commit().unwrap();
   second
      .transaction(TransactionBehavior::Immediate)
      .unwrap()
      .commit()
      .unwrap();
}

#[test]
fn test_exclusive_blocks_readers() {
   let (_dir, path) = temp_db_path("tx_exclusive.db");
   let first = Connection::open(&path).unwrap();
   first.exec("CREATE TABLE t (x)").unwrap();
   let second = Connection::open(&path).unwrap();

   let tx = first.transaction(TransactionBehavior::Exclusive).unwrap();
   let err = second.exec("SELECT * FROM t").unwrap_err();
   assert!(err.is_busy());

   tx.rollback().unwrap();
   second.exec("SELECT * FROM t").unwrap();
}
