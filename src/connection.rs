//! Database connections.

use std::cell::{Cell, RefCell};
use std::ffi::{CString, c_char, c_int, c_void};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use libsqlite3_sys as ffi;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::hooks::CallbackTable;
use crate::types::{CheckpointMode, ColumnMetadata, Counter, DbStatus, Limit, OpenFlags, SqlValue};
use crate::util::{cstr_to_str, cstr_to_string, quote_identifier, str_to_cstring};
use crate::value::FromValue;
use crate::{Error, Result};

static OPEN_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of connections currently open in this process.
pub fn open_connections() -> usize {
   OPEN_CONNECTIONS.load(Ordering::Acquire)
}

pub(crate) struct InnerConnection {
   db: Cell<*mut ffi::sqlite3>,
   /// Shared with [`InterruptHandle`]s; nulled when the connection closes.
   interrupt_lock: Arc<Mutex<*mut ffi::sqlite3>>,
   /// Hook handlers. Declared after `db` so they are released only after
   /// the native handle is closed.
   pub(crate) callbacks: RefCell<Option<Box<CallbackTable>>>,
}

impl InnerConnection {
   fn close(&self) -> Result<()> {
      let db = self.db.get();
      if db.is_null() {
         return Ok(());
      }

      let mut shared = self.interrupt_lock.lock();
      let rc = unsafe { ffi::sqlite3_close(db) };
      if rc != ffi::SQLITE_OK {
         return Err(unsafe { Error::recent(db) });
      }
      *shared = ptr::null_mut();
      self.db.set(ptr::null_mut());
      OPEN_CONNECTIONS.fetch_sub(1, Ordering::AcqRel);
      debug!("connection closed");
      Ok(())
   }
}

impl Drop for InnerConnection {
   fn drop(&mut self) {
      let db = self.db.get();
      if db.is_null() {
         return;
      }

      let mut shared = self.interrupt_lock.lock();
      // close_v2 defers the close if anything is still outstanding, so the
      // only failures left to report are misuse.
      let rc = unsafe { ffi::sqlite3_close_v2(db) };
      if rc != ffi::SQLITE_OK {
         let err = Error::from_code(rc);
         warn!(code = %err.error_code(), "failed to close connection: {}", err);
      }
      *shared = ptr::null_mut();
      self.db.set(ptr::null_mut());
      OPEN_CONNECTIONS.fetch_sub(1, Ordering::AcqRel);
      trace!("connection dropped");
   }
}

/// A connection to a database.
///
/// A connection owns its native handle exclusively. Statements, backups,
/// blobs and transactions borrow it, so it cannot be closed while any of
/// them are alive. The type is neither `Send` nor `Sync`; use
/// [`Connection::interrupt_handle`] to cancel work from another thread.
pub struct Connection {
   pub(crate) inner: Rc<InnerConnection>,
}

impl Connection {
   /// Opens (creating if needed) the database at `path` for reading and
   /// writing.
   pub fn open(path: impl AsRef<Path>) -> Result<Self> {
      Self::open_with_flags(path, OpenFlags::default())
   }

   /// Opens a private, temporary in-memory database.
   pub fn open_in_memory() -> Result<Self> {
      Self::open_with_flags(":memory:", OpenFlags::default())
   }

   /// Opens the database at `path` with explicit flags. Empty flags mean
   /// the default `READ_WRITE | CREATE`.
   pub fn open_with_flags(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
      let path = path.as_ref();
      let c_path = path_to_cstring(path)?;
      let flags = if flags.is_empty() {
         OpenFlags::default()
      } else {
         flags
      };

      let mut db: *mut ffi::sqlite3 = ptr::null_mut();
      let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.bits(), ptr::null()) };
      if rc != ffi::SQLITE_OK {
         // The engine allocates a handle even for most failures; it must be
         // closed after reading the message.
         let err = if db.is_null() {
            Error::from_code(rc)
         } else {
            let err = unsafe { Error::recent(db) };
            unsafe { ffi::sqlite3_close(db) };
            err
         };
         debug!(path = %path.display(), "failed to open database: {}", err);
         return Err(err);
      }

      OPEN_CONNECTIONS.fetch_add(1, Ordering::AcqRel);
      debug!(path = %path.display(), ?flags, "database opened");

      Ok(Self {
         inner: Rc::new(InnerConnection {
            db: Cell::new(db),
            interrupt_lock: Arc::new(Mutex::new(db)),
            callbacks: RefCell::new(None),
         }),
      })
   }

   /// Opens the database at `path` and applies `config`.
   pub fn open_with_config(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<Self> {
      let conn = Self::open_with_flags(path, config.flags)?;
      config.apply(&conn)?;
      Ok(conn)
   }

   /// Closes the connection, reporting any failure.
   ///
   /// Dropping a connection also closes it, but only logs failures.
   pub fn close(self) -> Result<()> {
      match Rc::try_unwrap(self.inner) {
         Ok(inner) => inner.close(),
         // Only reachable from inside a collation-needed handler, which
         // borrows the connection for the duration of the call.
         Err(_) => Err(Error::new(
            ffi::SQLITE_MISUSE,
            "connection is in use by a callback and cannot be closed",
         )),
      }
   }

   pub(crate) fn from_inner(inner: Rc<InnerConnection>) -> Self {
      Self { inner }
   }

   pub(crate) fn handle(&self) -> *mut ffi::sqlite3 {
      self.inner.db.get()
   }

   /// The native handle, for calls this crate does not wrap.
   pub fn raw(&self) -> *mut ffi::sqlite3 {
      self.handle()
   }

   /// Runs one or more `;`-separated statements, discarding any rows.
   pub fn exec(&self, sql: &str) -> Result<()> {
      let c_sql = str_to_cstring(sql)?;
      trace!(sql, "exec");
      let rc = unsafe {
         ffi::sqlite3_exec(self.handle(), c_sql.as_ptr(), None, ptr::null_mut(), ptr::null_mut())
      };
      unsafe { Error::check(self.handle(), rc) }
   }

   /// Runs one or more statements, calling `handler` with the values and
   /// column names of every result row. Returning `false` stops execution
   /// with `SQLITE_ABORT`.
   ///
   /// Values arrive as the engine's text rendering; prefer
   /// [`Connection::prepare`] for typed access.
   pub fn exec_with<F>(&self, sql: &str, mut handler: F) -> Result<()>
   where
      F: FnMut(&[Option<&str>], &[&str]) -> bool,
   {
      struct ExecState<'f, F> {
         handler: &'f mut F,
         panic: Option<Box<dyn std::any::Any + Send>>,
      }

      unsafe extern "C" fn exec_row<F>(
         arg: *mut c_void,
         count: c_int,
         values: *mut *mut c_char,
         names: *mut *mut c_char,
      ) -> c_int
      where
         F: FnMut(&[Option<&str>], &[&str]) -> bool,
      {
         let state = unsafe { &mut *arg.cast::<ExecState<'_, F>>() };
         let count = count.max(0) as usize;
         let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut row = Vec::with_capacity(count);
            let mut cols = Vec::with_capacity(count);
            for i in 0..count {
               unsafe {
                  row.push(cstr_to_str(*values.add(i)));
                  cols.push(cstr_to_str(*names.add(i)).unwrap_or(""));
               }
            }
            (state.handler)(&row, &cols)
         }));
         match outcome {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(payload) => {
               state.panic = Some(payload);
               1
            }
         }
      }

      let c_sql = str_to_cstring(sql)?;
      let mut state = ExecState {
         handler: &mut handler,
         panic: None,
      };
      let rc = unsafe {
         ffi::sqlite3_exec(
            self.handle(),
            c_sql.as_ptr(),
            Some(exec_row::<F>),
            (&mut state as *mut ExecState<'_, F>).cast::<c_void>(),
            ptr::null_mut(),
         )
      };
      if let Some(payload) = state.panic.take() {
         panic::resume_unwind(payload);
      }
      unsafe { Error::check(self.handle(), rc) }
   }

   /// Causes any pending operation to abort with `SQLITE_INTERRUPT` at its
   /// earliest opportunity.
   pub fn interrupt(&self) {
      unsafe { ffi::sqlite3_interrupt(self.handle()) }
   }

   /// A handle that can interrupt this connection from another thread.
   pub fn interrupt_handle(&self) -> InterruptHandle {
      InterruptHandle {
         db_lock: Arc::clone(&self.inner.interrupt_lock),
      }
   }

   /// Sets a run-time limit, returning its previous value. Negative values
   /// leave the limit unchanged.
   pub fn limit(&self, limit: Limit, new_value: i32) -> i32 {
      unsafe { ffi::sqlite3_limit(self.handle(), limit as c_int, new_value) }
   }

   /// Current value of a run-time limit.
   pub fn get_limit(&self, limit: Limit) -> i32 {
      self.limit(limit, -1)
   }

   /// Sleeps and retries for up to `timeout` when a table is locked.
   ///
   /// Replaces any handler set with [`Connection::set_busy_handler`].
   pub fn busy_timeout(&self, timeout: Duration) -> Result<()> {
      let ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
      let rc = unsafe { ffi::sqlite3_busy_timeout(self.handle(), ms) };
      unsafe { Error::check(self.handle(), rc)? };
      self.release_busy_handler();
      Ok(())
   }

   /// Frees as much memory as possible from this connection's caches.
   pub fn release_memory(&self) -> Result<()> {
      let rc = unsafe { ffi::sqlite3_db_release_memory(self.handle()) };
      unsafe { Error::check(self.handle(), rc) }
   }

   /// Rows modified by the most recent INSERT, UPDATE or DELETE.
   pub fn changes(&self) -> u64 {
      unsafe { ffi::sqlite3_changes64(self.handle()) as u64 }
   }

   /// Rows modified since the connection was opened.
   pub fn total_changes(&self) -> u64 {
      unsafe { ffi::sqlite3_total_changes64(self.handle()) as u64 }
   }

   pub fn last_insert_rowid(&self) -> i64 {
      unsafe { ffi::sqlite3_last_insert_rowid(self.handle()) }
   }

   /// True outside an explicit transaction.
   pub fn autocommit(&self) -> bool {
      unsafe { ffi::sqlite3_get_autocommit(self.handle()) != 0 }
   }

   /// Whether the attached database `db` (e.g. `"main"`) is read-only.
   pub fn readonly(&self, db: &str) -> Result<bool> {
      let c_db = str_to_cstring(db)?;
      match unsafe { ffi::sqlite3_db_readonly(self.handle(), c_db.as_ptr()) } {
         0 => Ok(false),
         1 => Ok(true),
         _ => Err(Error::new(ffi::SQLITE_ERROR, format!("no such database: {db}"))),
      }
   }

   /// File backing the attached database `db`, or `None` for temporary and
   /// in-memory databases.
   pub fn filename(&self, db: &str) -> Result<Option<String>> {
      let c_db = str_to_cstring(db)?;
      let name = unsafe { cstr_to_string(ffi::sqlite3_db_filename(self.handle(), c_db.as_ptr())) };
      Ok(name.filter(|n| !n.is_empty()))
   }

   /// Reads (and optionally resets) a connection status counter.
   pub fn status(&self, status: DbStatus, reset: bool) -> Result<Counter> {
      let mut current: c_int = 0;
      let mut highwater: c_int = 0;
      let rc = unsafe {
         ffi::sqlite3_db_status(
            self.handle(),
            status as c_int,
            &mut current,
            &mut highwater,
            c_int::from(reset),
         )
      };
      Error::check_code(rc)?;
      Ok(Counter {
         current: i64::from(current),
         highwater: i64::from(highwater),
      })
   }

   /// Declared properties of `table.column` in database `db` (`None`
   /// searches all attached databases).
   pub fn metadata(&self, db: Option<&str>, table: &str, column: &str) -> Result<ColumnMetadata> {
      let c_db = db.map(str_to_cstring).transpose()?;
      let c_table = str_to_cstring(table)?;
      let c_column = str_to_cstring(column)?;

      let mut data_type: *const c_char = ptr::null();
      let mut collation: *const c_char = ptr::null();
      let mut not_null: c_int = 0;
      let mut primary_key: c_int = 0;
      let mut autoincrement: c_int = 0;

      let rc = unsafe {
         ffi::sqlite3_table_column_metadata(
            self.handle(),
            c_db.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            c_table.as_ptr(),
            c_column.as_ptr(),
            &mut data_type,
            &mut collation,
            &mut not_null,
            &mut primary_key,
            &mut autoincrement,
         )
      };
      // The return code alone carries no message.
      unsafe { Error::check(self.handle(), rc)? };

      Ok(ColumnMetadata {
         data_type: unsafe { cstr_to_string(data_type) },
         collation: unsafe { cstr_to_string(collation) },
         not_null: not_null != 0,
         primary_key: primary_key != 0,
         autoincrement: autoincrement != 0,
      })
   }

   fn db_config_bool(&self, op: c_int, enable: bool) -> Result<bool> {
      let mut current: c_int = 0;
      let rc = unsafe {
         ffi::sqlite3_db_config(self.handle(), op, c_int::from(enable), &mut current as *mut c_int)
      };
      unsafe { Error::check(self.handle(), rc)? };
      Ok(current != 0)
   }

   /// Enables or disables foreign key enforcement, returning the new state.
   pub fn config_enable_fkey(&self, enable: bool) -> Result<bool> {
      self.db_config_bool(ffi::SQLITE_DBCONFIG_ENABLE_FKEY, enable)
   }

   /// Enables or disables triggers, returning the new state.
   pub fn config_enable_trigger(&self, enable: bool) -> Result<bool> {
      self.db_config_bool(ffi::SQLITE_DBCONFIG_ENABLE_TRIGGER, enable)
   }

   /// Resizes this connection's lookaside allocator. The engine allocates
   /// the buffer itself.
   pub fn config_lookaside(&self, slot_size: i32, slot_count: i32) -> Result<()> {
      let rc = unsafe {
         ffi::sqlite3_db_config(
            self.handle(),
            ffi::SQLITE_DBCONFIG_LOOKASIDE,
            ptr::null_mut::<c_void>(),
            slot_size as c_int,
            slot_count as c_int,
         )
      };
      unsafe { Error::check(self.handle(), rc) }
   }

   /// Checkpoints the write-ahead log automatically once it reaches `pages`
   /// frames. Zero or negative disables automatic checkpoints.
   ///
   /// Replaces any handler set with [`Connection::set_wal_handler`].
   pub fn wal_autocheckpoint(&self, pages: i32) -> Result<()> {
      let rc = unsafe { ffi::sqlite3_wal_autocheckpoint(self.handle(), pages) };
      unsafe { Error::check(self.handle(), rc)? };
      self.release_wal_handler();
      Ok(())
   }

   /// Checkpoints database `db` (`None` for all attached databases).
   ///
   /// Returns the size of the log and the number of frames checkpointed, in
   /// frames.
   pub fn wal_checkpoint(&self, db: Option<&str>, mode: CheckpointMode) -> Result<(i32, i32)> {
      let c_db = db.map(str_to_cstring).transpose()?;
      let mut log_frames: c_int = 0;
      let mut checkpointed: c_int = 0;
      let rc = unsafe {
         ffi::sqlite3_wal_checkpoint_v2(
            self.handle(),
            c_db.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            mode as c_int,
            &mut log_frames,
            &mut checkpointed,
         )
      };
      unsafe { Error::check(self.handle(), rc)? };
      Ok((log_frames, checkpointed))
   }

   /// Reads the first value returned by `PRAGMA <name>`.
   pub fn pragma_query_value<T: FromValue>(&self, schema: Option<&str>, name: &str) -> Result<T> {
      let sql = match schema {
         Some(schema) => format!("PRAGMA {}.{}", quote_identifier(schema), quote_identifier(name)),
         None => format!("PRAGMA {}", quote_identifier(name)),
      };
      let mut stmt = self.prepare(&sql)?;
      if !stmt.step()? {
         return Err(Error::new(
            ffi::SQLITE_DONE,
            format!("PRAGMA {name} returned no rows"),
         ));
      }
      stmt.val(0)
   }

   /// Runs `PRAGMA <name> = <value>`.
   ///
   /// Pragmas do not accept bound parameters, so `value` is rendered as an
   /// SQL literal.
   pub fn pragma_update(
      &self,
      schema: Option<&str>,
      name: &str,
      value: impl Into<SqlValue>,
   ) -> Result<()> {
      let literal = sql_literal(&value.into());
      let sql = match schema {
         Some(schema) => format!(
            "PRAGMA {}.{} = {}",
            quote_identifier(schema),
            quote_identifier(name),
            literal
         ),
         None => format!("PRAGMA {} = {}", quote_identifier(name), literal),
      };
      self.exec(&sql)
   }
}

impl fmt::Debug for Connection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Connection")
         .field("path", &self.filename("main").ok().flatten())
         .field("autocommit", &self.autocommit())
         .finish()
   }
}

/// Renders `value` as an SQL literal.
fn sql_literal(value: &SqlValue) -> String {
   match value {
      SqlValue::Null => "NULL".to_string(),
      SqlValue::Integer(i) => i.to_string(),
      SqlValue::Real(r) => format!("{r:?}"),
      SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
      SqlValue::Blob(b) => {
         let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
         format!("X'{hex}'")
      }
   }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
   let s = path
      .to_str()
      .ok_or_else(|| Error::new(ffi::SQLITE_MISUSE, format!("path is not valid UTF-8: {}", path.display())))?;
   str_to_cstring(s)
}

/// Interrupts a connection from any thread.
///
/// Interrupting after the connection has closed does nothing.
#[derive(Clone)]
pub struct InterruptHandle {
   db_lock: Arc<Mutex<*mut ffi::sqlite3>>,
}

// SAFETY: sqlite3_interrupt may be called from any thread, and the mutex
// guarantees the handle is not closed while the call is in progress.
unsafe impl Send for InterruptHandle {}
unsafe impl Sync for InterruptHandle {}

impl InterruptHandle {
   /// Interrupts the query currently executing on the connection.
   pub fn interrupt(&self) {
      let db = self.db_lock.lock();
      if !db.is_null() {
         unsafe { ffi::sqlite3_interrupt(*db) }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_sql_literal_rendering() {
      assert_eq!(sql_literal(&SqlValue::Null), "NULL");
      assert_eq!(sql_literal(&SqlValue::Integer(-4)), "-4");
      assert_eq!(sql_literal(&SqlValue::Real(1.0)), "1.0");
      assert_eq!(sql_literal(&SqlValue::Text("it's".into())), "'it''s'");
      assert_eq!(sql_literal(&SqlValue::Blob(vec![0x0a, 0xff])), "X'0AFF'");
   }
}
