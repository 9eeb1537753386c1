//! Incremental blob I/O.

use std::ffi::{c_int, c_void};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ptr::{self, NonNull};

use libsqlite3_sys as ffi;
use tracing::warn;

use crate::connection::Connection;
use crate::util::str_to_cstring;
use crate::{Error, Result};

impl Connection {
   /// Opens the blob stored in `table.column` of row `rowid` for streaming
   /// reads (and writes, if `writable`).
   ///
   /// Writes cannot change the blob's size; reserve space first with
   /// [`crate::Blob::zeroed`].
   pub fn blob_open(
      &self,
      db: &str,
      table: &str,
      column: &str,
      rowid: i64,
      writable: bool,
   ) -> Result<BlobStream<'_>> {
      let c_db = str_to_cstring(db)?;
      let c_table = str_to_cstring(table)?;
      let c_column = str_to_cstring(column)?;
      let mut blob: *mut ffi::sqlite3_blob = ptr::null_mut();

      let rc = unsafe {
         ffi::sqlite3_blob_open(
            self.handle(),
            c_db.as_ptr(),
            c_table.as_ptr(),
            c_column.as_ptr(),
            rowid,
            c_int::from(writable),
            &mut blob,
         )
      };
      unsafe { Error::check(self.handle(), rc)? };

      let blob = NonNull::new(blob).ok_or_else(|| Error::from_code(ffi::SQLITE_NOMEM))?;
      Ok(BlobStream {
         conn: self,
         blob: Some(blob),
         pos: 0,
      })
   }
}

/// A stream over one blob value, implementing [`Read`], [`Write`] and
/// [`Seek`].
///
/// The stream becomes invalid (every call fails with `SQLITE_ABORT`) if
/// the row is modified by other means while it is open.
pub struct BlobStream<'c> {
   conn: &'c Connection,
   blob: Option<NonNull<ffi::sqlite3_blob>>,
   pos: c_int,
}

impl BlobStream<'_> {
   fn raw(&self) -> io::Result<*mut ffi::sqlite3_blob> {
      self.blob
         .map(NonNull::as_ptr)
         .ok_or_else(|| io::Error::other(Error::new(ffi::SQLITE_MISUSE, "blob is closed")))
   }

   /// Size of the blob in bytes.
   pub fn len(&self) -> usize {
      self.blob
         .map_or(0, |b| unsafe { ffi::sqlite3_blob_bytes(b.as_ptr()) }.max(0) as usize)
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }

   /// Current offset.
   pub fn position(&self) -> usize {
      self.pos as usize
   }

   /// Moves the stream to the same column of another row, rewinding to the
   /// start.
   pub fn reopen(&mut self, rowid: i64) -> Result<()> {
      let blob = self.raw().map_err(|_| Error::new(ffi::SQLITE_MISUSE, "blob is closed"))?;
      let rc = unsafe { ffi::sqlite3_blob_reopen(blob, rowid) };
      unsafe { Error::check(self.conn.handle(), rc)? };
      self.pos = 0;
      Ok(())
   }

   /// Closes the blob, reporting any error from the final flush.
   pub fn close(mut self) -> Result<()> {
      self.close_inner()
   }

   fn close_inner(&mut self) -> Result<()> {
      let Some(blob) = self.blob.take() else {
         return Ok(());
      };
      let rc = unsafe { ffi::sqlite3_blob_close(blob.as_ptr()) };
      unsafe { Error::check(self.conn.handle(), rc) }
   }

   fn io_error(&self, rc: c_int) -> io::Error {
      io::Error::other(Error::from_code(rc))
   }
}

impl Read for BlobStream<'_> {
   fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      let blob = self.raw()?;
      let available = (self.len() as c_int).saturating_sub(self.pos).max(0);
      let n = c_int::try_from(buf.len()).unwrap_or(c_int::MAX).min(available);
      if n == 0 {
         return Ok(0);
      }
      let rc = unsafe { ffi::sqlite3_blob_read(blob, buf.as_mut_ptr().cast::<c_void>(), n, self.pos) };
      if rc != ffi::SQLITE_OK {
         return Err(self.io_error(rc));
      }
      self.pos += n;
      Ok(n as usize)
   }
}

impl Write for BlobStream<'_> {
   /// Writes in place. Writing past the end writes as much as fits; a full
   /// blob accepts zero bytes.
   fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      let blob = self.raw()?;
      let available = (self.len() as c_int).saturating_sub(self.pos).max(0);
      let n = c_int::try_from(buf.len()).unwrap_or(c_int::MAX).min(available);
      if n == 0 {
         return Ok(0);
      }
      let rc = unsafe { ffi::sqlite3_blob_write(blob, buf.as_ptr().cast::<c_void>(), n, self.pos) };
      if rc != ffi::SQLITE_OK {
         return Err(self.io_error(rc));
      }
      self.pos += n;
      Ok(n as usize)
   }

   fn flush(&mut self) -> io::Result<()> {
      Ok(())
   }
}

impl Seek for BlobStream<'_> {
   fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
      let len = self.len() as i64;
      let target = match pos {
         SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
         SeekFrom::End(offset) => len.saturating_add(offset),
         SeekFrom::Current(offset) => i64::from(self.pos).saturating_add(offset),
      };
      if !(0..=len).contains(&target) {
         return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek outside the blob",
         ));
      }
      self.pos = target as c_int;
      Ok(target as u64)
   }
}

impl Drop for BlobStream<'_> {
   fn drop(&mut self) {
      if let Err(err) = self.close_inner() {
         warn!(code = %err.error_code(), "failed to close blob: {}", err);
      }
   }
}
