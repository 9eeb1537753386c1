//! Integration tests for incremental blob I/O.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use sqxx::{Blob, Connection, Error, ffi};

fn blob_db() -> Connection {
   let conn = Connection::open_in_memory().unwrap();
   conn
      .exec(
         "CREATE TABLE files (id INTEGER PRIMARY KEY, data BLOB, size INTEGER);
          INSERT INTO files VALUES (1, x'0102030405', 5), (2, x'aabb', 2);",
      )
      .unwrap();
   conn
}

#[test]
fn test_read_whole_blob() {
   let conn = blob_db();
   let mut blob = conn.blob_open("main", "files", "data", 1, false).unwrap();

   assert_eq!(blob.len(), 5);
   let mut buf = Vec::new();
   blob.read_to_end(&mut buf).unwrap();
   assert_eq!(buf, [1, 2, 3, 4, 5]);
   assert_eq!(blob.position(), 5);

   // At the end, reads return nothing.
   assert_eq!(blob.read(&mut [0; 4]).unwrap(), 0);
   blob.close().unwrap();
}

#[test]
fn test_seek_then_read() {
   let conn = blob_db();
   let mut blob = conn.blob_open("main", "files", "data", 1, false).unwrap();

   assert_eq!(blob.seek(SeekFrom::Start(2)).unwrap(), 2);
   let mut buf = [0; 2];
   blob.read_exact(&mut buf).unwrap();
   assert_eq!(buf, [3, 4]);

   assert_eq!(blob.seek(SeekFrom::End(-1)).unwrap(), 4);
   assert_eq!(blob.seek(SeekFrom::Current(-4)).unwrap(), 0);

   let err = blob.seek(SeekFrom::Current(-1)).unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidInput);
   let err = blob.seek(SeekFrom::Start(6)).unwrap_err();
   assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_write_into_reserved_space() {
   let conn = blob_db();
   let mut stmt = conn.prepare("INSERT INTO files (id, data) VALUES (3, ?)").unwrap();
   stmt.bind(0, Blob::zeroed(8)).unwrap();
   stmt.run().unwrap();
   drop(stmt);

   let mut blob = conn.blob_open("main", "files", "data", 3, true).unwrap();
   blob.write_all(b"sqxx").unwrap();
   blob.seek(SeekFrom::End(-2)).unwrap();
   blob.write_all(b"!!").unwrap();
   blob.close().unwrap();

   let data: Vec<u8> = conn.run("SELECT data FROM files WHERE id = 3").unwrap().val(0).unwrap();
   assert_eq!(data, b"sqxx\0\0!!");
}

#[test]
fn test_write_cannot_grow_blob() {
   let conn = blob_db();
   let mut blob = conn.blob_open("main", "files", "data", 2, true).unwrap();

   assert_eq!(blob.write(b"xyz").unwrap(), 2);
   assert_eq!(blob.write(b"z").unwrap(), 0);

   blob.seek(SeekFrom::Start(0)).unwrap();
   let err = blob.write_all(b"too long").unwrap_err();
   assert_eq!(err.kind(), ErrorKind::WriteZero);
}

#[test]
fn test_read_only_blob_rejects_writes() {
   let conn = blob_db();
   let mut blob = conn.blob_open("main", "files", "data", 1, false).unwrap();

   let err = blob.write(b"x").unwrap_err();
   let inner = err.get_ref().and_then(|e| e.downcast_ref::<Error>()).unwrap();
   assert_eq!(inner.primary_code(), ffi::SQLITE_READONLY);
}

#[test]
fn test_reopen_moves_to_another_row() {
   let conn = blob_db();
   let mut blob = conn.blob_open("main", "files", "data", 1, false).unwrap();
   blob.seek(SeekFrom::Start(3)).unwrap();

   blob.reopen(2).unwrap();
   assert_eq!(blob.position(), 0);
   assert_eq!(blob.len(), 2);

   let mut buf = Vec::new();
   blob.read_to_end(&mut buf).unwrap();
   assert_eq!(buf, [0xaa, 0xbb]);

   assert!(blob.reopen(99).is_err());
}

#[test]
fn test_open_errors() {
   let conn = blob_db();

   assert!(conn.blob_open("main", "files", "data", 99, false).is_err());
   assert!(conn.blob_open("main", "nosuch", "data", 1, false).is_err());
   // Only text and blob values can be streamed.
   assert!(conn.blob_open("main", "files", "size", 1, false).is_err());
}

#[test]
fn test_row_change_expires_stream() {
   let conn = blob_db();
   let mut blob = conn.blob_open("main", "files", "data", 1, false).unwrap();

   conn.exec("UPDATE files SET data = x'ff' WHERE id = 1").unwrap();

   let err = blob.read(&mut [0; 2]).unwrap_err();
   let inner = err.get_ref().and_then(|e| e.downcast_ref::<Error>()).unwrap();
   assert_eq!(inner.code(), ffi::SQLITE_ABORT);
}
