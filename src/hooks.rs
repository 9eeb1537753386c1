//! Connection hooks: commit, rollback, update, trace, profile, authorizer,
//! busy, progress, write-ahead log and collation-needed.
//!
//! Every setter wraps the handler in an `Rc`, installs a monomorphized
//! trampoline with the raw `Rc` as its argument, then stores the `Rc` in
//! the connection's callback table until it is replaced, cleared, or the
//! connection closes. A running trampoline holds its own reference, so a
//! handler may clear or replace itself. Handlers run on the thread that is
//! executing the statement; a panicking handler is reported through
//! [`crate::set_callback_error_handler`] and replaced by a fixed fallback
//! answer. A handler that re-enters its own hook gets the fallback too.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void};
use std::ptr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use libsqlite3_sys as ffi;
use tracing::trace;

use crate::connection::{Connection, InnerConnection};
use crate::error::guard;
use crate::types::{Authorization, UpdateAction};
use crate::util::cstr_to_str;

/// The table's reference to a type-erased handler.
pub(crate) struct BoxedHandler {
   ptr: *mut c_void,
   drop_fn: unsafe fn(*mut c_void),
}

impl BoxedHandler {
   fn new<F: 'static>(handler: F) -> Self {
      Self {
         ptr: Rc::into_raw(Rc::new(RefCell::new(handler))).cast_mut().cast::<c_void>(),
         drop_fn: release_handler::<F>,
      }
   }
}

impl Drop for BoxedHandler {
   fn drop(&mut self) {
      // SAFETY: ptr came from Rc::into_raw in `new` with the matching type.
      unsafe { (self.drop_fn)(self.ptr) }
   }
}

unsafe fn release_handler<F>(ptr: *mut c_void) {
   guard("destructor", (), || {
      drop(unsafe { Rc::from_raw(ptr.cast_const().cast::<RefCell<F>>()) });
   })
}

/// Calls `f` with the handler behind a trampoline argument.
///
/// The call owns a strong reference, so the handler outlives a `clear_*`
/// or `set_*` issued from inside it. Returns `None` on a reentrant call.
///
/// # Safety
///
/// `arg` must be the pointer of a [`BoxedHandler`] for `F` that the
/// callback table still holds.
unsafe fn with_handler<F, R>(arg: *mut c_void, f: impl FnOnce(&mut F) -> R) -> Option<R> {
   let ptr = arg.cast_const().cast::<RefCell<F>>();
   let handler = unsafe {
      Rc::increment_strong_count(ptr);
      Rc::from_raw(ptr)
   };
   let result = match handler.try_borrow_mut() {
      Ok(mut borrowed) => Some(f(&mut *borrowed)),
      Err(_) => None,
   };
   result
}

/// At most one handler per hook kind. Allocated on first registration.
#[derive(Default)]
pub(crate) struct CallbackTable {
   commit: Option<BoxedHandler>,
   rollback: Option<BoxedHandler>,
   update: Option<BoxedHandler>,
   trace: Option<BoxedHandler>,
   profile: Option<BoxedHandler>,
   authorizer: Option<BoxedHandler>,
   busy: Option<BoxedHandler>,
   progress: Option<BoxedHandler>,
   wal: Option<BoxedHandler>,
   collation_needed: Option<BoxedHandler>,
}

// ─── Trampolines ───

unsafe extern "C" fn commit_hook<F: FnMut() -> bool>(arg: *mut c_void) -> c_int {
   // A panicking handler turns the commit into a rollback.
   guard("commit_hook", 1, || {
      unsafe { with_handler(arg, |handler: &mut F| c_int::from(handler())) }.unwrap_or(1)
   })
}

unsafe extern "C" fn rollback_hook<F: FnMut()>(arg: *mut c_void) {
   guard("rollback_hook", (), || {
      unsafe { with_handler(arg, |handler: &mut F| handler()) };
   })
}

unsafe extern "C" fn update_hook<F>(
   arg: *mut c_void,
   action: c_int,
   db: *const c_char,
   table: *const c_char,
   rowid: ffi::sqlite3_int64,
) where
   F: FnMut(UpdateAction, &str, &str, i64),
{
   let Some(action) = UpdateAction::from_raw(action) else {
      return;
   };
   guard("update_hook", (), || {
      let db = unsafe { cstr_to_str(db) }.unwrap_or("");
      let table = unsafe { cstr_to_str(table) }.unwrap_or("");
      unsafe { with_handler(arg, |handler: &mut F| handler(action, db, table, rowid)) };
   })
}

unsafe extern "C" fn trace_hook<F: FnMut(&str)>(arg: *mut c_void, sql: *const c_char) {
   guard("trace", (), || {
      let sql = unsafe { cstr_to_str(sql) }.unwrap_or("");
      unsafe { with_handler(arg, |handler: &mut F| handler(sql)) };
   })
}

unsafe extern "C" fn profile_hook<F: FnMut(&str, Duration)>(
   arg: *mut c_void,
   sql: *const c_char,
   nanos: ffi::sqlite3_uint64,
) {
   guard("profile", (), || {
      let sql = unsafe { cstr_to_str(sql) }.unwrap_or("");
      unsafe { with_handler(arg, |handler: &mut F| handler(sql, Duration::from_nanos(nanos))) };
   })
}

unsafe extern "C" fn authorizer_hook<F>(
   arg: *mut c_void,
   action: c_int,
   arg1: *const c_char,
   arg2: *const c_char,
   db: *const c_char,
   trigger: *const c_char,
) -> c_int
where
   F: FnMut(AuthAction<'_>) -> Authorization,
{
   // A panicking authorizer denies the action.
   guard("authorizer", ffi::SQLITE_DENY, || {
      let request = unsafe {
         AuthAction {
            code: action,
            arg1: cstr_to_str(arg1),
            arg2: cstr_to_str(arg2),
            database: cstr_to_str(db),
            trigger: cstr_to_str(trigger),
         }
      };
      unsafe { with_handler(arg, |handler: &mut F| handler(request) as c_int) }
         .unwrap_or(ffi::SQLITE_DENY)
   })
}

unsafe extern "C" fn busy_hook<F: FnMut(i32) -> bool>(arg: *mut c_void, count: c_int) -> c_int {
   // A panicking handler gives up waiting.
   guard("busy_handler", 0, || {
      unsafe { with_handler(arg, |handler: &mut F| c_int::from(handler(count))) }.unwrap_or(0)
   })
}

unsafe extern "C" fn progress_hook<F: FnMut() -> bool>(arg: *mut c_void) -> c_int {
   // A panicking handler interrupts the statement.
   guard("progress_handler", 1, || {
      unsafe { with_handler(arg, |handler: &mut F| c_int::from(handler())) }.unwrap_or(1)
   })
}

unsafe extern "C" fn wal_hook<F: FnMut(&str, i32)>(
   arg: *mut c_void,
   _db: *mut ffi::sqlite3,
   name: *const c_char,
   pages: c_int,
) -> c_int {
   guard("wal_hook", (), || {
      let name = unsafe { cstr_to_str(name) }.unwrap_or("");
      unsafe { with_handler(arg, |handler: &mut F| handler(name, pages)) };
   });
   ffi::SQLITE_OK
}

struct CollationNeeded<F> {
   conn: Weak<InnerConnection>,
   handler: F,
}

unsafe extern "C" fn collation_needed_hook<F: FnMut(&Connection, &str)>(
   arg: *mut c_void,
   _db: *mut ffi::sqlite3,
   _text_rep: c_int,
   name: *const c_char,
) {
   guard("collation_needed", (), || {
      let name = unsafe { cstr_to_str(name) }.unwrap_or("");
      unsafe {
         with_handler(arg, |data: &mut CollationNeeded<F>| {
            let Some(inner) = data.conn.upgrade() else {
               return;
            };
            let conn = Connection::from_inner(inner);
            (data.handler)(&conn, name)
         })
      };
   })
}

/// The request passed to an authorizer.
///
/// `code` is one of the engine's action codes (`SQLITE_CREATE_TABLE`,
/// `SQLITE_READ`, ...). The meaning of `arg1` and `arg2` depends on it;
/// for `SQLITE_READ` they are the table and column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthAction<'a> {
   pub code: i32,
   pub arg1: Option<&'a str>,
   pub arg2: Option<&'a str>,
   /// Database name (`"main"`, `"temp"`, ...), where applicable.
   pub database: Option<&'a str>,
   /// Innermost trigger or view responsible for the access.
   pub trigger: Option<&'a str>,
}

// ─── Registration ───

macro_rules! slot {
   ($field:ident) => {
      |table| &mut table.$field
   };
}

impl Connection {
   /// Puts `handler` into the table slot chosen by `slot`, allocating the
   /// table if needed. The previous handler is dropped after the table is
   /// released.
   fn store_handler(
      &self,
      slot: impl FnOnce(&mut CallbackTable) -> &mut Option<BoxedHandler>,
      handler: Option<BoxedHandler>,
   ) {
      let mut callbacks = self.inner.callbacks.borrow_mut();
      if callbacks.is_none() && handler.is_none() {
         return;
      }
      let table = callbacks.get_or_insert_with(Box::default);
      let previous = std::mem::replace(slot(&mut **table), handler);
      drop(callbacks);
      drop(previous);
   }

   /// Called before every commit. Returning `true` turns the commit into
   /// a rollback.
   pub fn set_commit_handler<F: FnMut() -> bool + 'static>(&self, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_commit_hook(self.handle(), Some(commit_hook::<F>), handler.ptr) };
      trace!("commit handler installed");
      self.store_handler(slot!(commit), Some(handler));
   }

   pub fn clear_commit_handler(&self) {
      unsafe { ffi::sqlite3_commit_hook(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(commit), None);
   }

   /// Called after every rollback, including the implicit one when a commit
   /// handler vetoes a commit.
   pub fn set_rollback_handler<F: FnMut() + 'static>(&self, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_rollback_hook(self.handle(), Some(rollback_hook::<F>), handler.ptr) };
      trace!("rollback handler installed");
      self.store_handler(slot!(rollback), Some(handler));
   }

   pub fn clear_rollback_handler(&self) {
      unsafe { ffi::sqlite3_rollback_hook(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(rollback), None);
   }

   /// Called for every row inserted, updated or deleted in a rowid table,
   /// with the database name, table name and rowid.
   pub fn set_update_handler<F>(&self, handler: F)
   where
      F: FnMut(UpdateAction, &str, &str, i64) + 'static,
   {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_update_hook(self.handle(), Some(update_hook::<F>), handler.ptr) };
      trace!("update handler installed");
      self.store_handler(slot!(update), Some(handler));
   }

   pub fn clear_update_handler(&self) {
      unsafe { ffi::sqlite3_update_hook(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(update), None);
   }

   /// Called with the SQL text of every statement as it starts running.
   pub fn set_trace_handler<F: FnMut(&str) + 'static>(&self, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_trace(self.handle(), Some(trace_hook::<F>), handler.ptr) };
      trace!("trace handler installed");
      self.store_handler(slot!(trace), Some(handler));
   }

   pub fn clear_trace_handler(&self) {
      unsafe { ffi::sqlite3_trace(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(trace), None);
   }

   /// Called when each statement finishes, with its SQL text and the
   /// wall-clock time it took.
   pub fn set_profile_handler<F: FnMut(&str, Duration) + 'static>(&self, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_profile(self.handle(), Some(profile_hook::<F>), handler.ptr) };
      trace!("profile handler installed");
      self.store_handler(slot!(profile), Some(handler));
   }

   pub fn clear_profile_handler(&self) {
      unsafe { ffi::sqlite3_profile(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(profile), None);
   }

   /// Consulted while statements are prepared, once per action they would
   /// perform.
   pub fn set_authorizer<F>(&self, handler: F)
   where
      F: FnMut(AuthAction<'_>) -> Authorization + 'static,
   {
      let handler = BoxedHandler::new(handler);
      unsafe {
         ffi::sqlite3_set_authorizer(self.handle(), Some(authorizer_hook::<F>), handler.ptr)
      };
      trace!("authorizer installed");
      self.store_handler(slot!(authorizer), Some(handler));
   }

   pub fn clear_authorizer(&self) {
      unsafe { ffi::sqlite3_set_authorizer(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(authorizer), None);
   }

   /// Called when a table is locked, with the number of prior calls for the
   /// same lock event. Returning `true` retries; `false` fails the
   /// statement with `SQLITE_BUSY`.
   ///
   /// Replaces any [`Connection::busy_timeout`].
   pub fn set_busy_handler<F: FnMut(i32) -> bool + 'static>(&self, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_busy_handler(self.handle(), Some(busy_hook::<F>), handler.ptr) };
      trace!("busy handler installed");
      self.store_handler(slot!(busy), Some(handler));
   }

   pub fn clear_busy_handler(&self) {
      unsafe { ffi::sqlite3_busy_handler(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(busy), None);
   }

   /// Drops the stored busy handler after the engine has replaced it.
   pub(crate) fn release_busy_handler(&self) {
      self.store_handler(slot!(busy), None);
   }

   /// Called every `instructions` virtual machine instructions. Returning
   /// `true` interrupts the running statement.
   pub fn set_progress_handler<F: FnMut() -> bool + 'static>(&self, instructions: i32, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe {
         ffi::sqlite3_progress_handler(
            self.handle(),
            instructions,
            Some(progress_hook::<F>),
            handler.ptr,
         )
      };
      trace!(instructions, "progress handler installed");
      self.store_handler(slot!(progress), Some(handler));
   }

   pub fn clear_progress_handler(&self) {
      unsafe { ffi::sqlite3_progress_handler(self.handle(), 0, None, ptr::null_mut()) };
      self.store_handler(slot!(progress), None);
   }

   /// Called after each commit in write-ahead-log mode, with the database
   /// name and the number of frames in the log.
   ///
   /// Replaces automatic checkpointing; see [`Connection::wal_autocheckpoint`].
   pub fn set_wal_handler<F: FnMut(&str, i32) + 'static>(&self, handler: F) {
      let handler = BoxedHandler::new(handler);
      unsafe { ffi::sqlite3_wal_hook(self.handle(), Some(wal_hook::<F>), handler.ptr) };
      trace!("wal handler installed");
      self.store_handler(slot!(wal), Some(handler));
   }

   pub fn clear_wal_handler(&self) {
      unsafe { ffi::sqlite3_wal_hook(self.handle(), None, ptr::null_mut()) };
      self.store_handler(slot!(wal), None);
   }

   pub(crate) fn release_wal_handler(&self) {
      self.store_handler(slot!(wal), None);
   }

   /// Called while preparing a statement that names an unknown collation.
   /// The handler may register it on the connection it receives before
   /// returning.
   ///
   /// ```
   /// # fn main() -> sqxx::Result<()> {
   /// let conn = sqxx::Connection::open_in_memory()?;
   /// conn.set_collation_needed_handler(|conn, name| {
   ///    if name == "nocase_rev" {
   ///       let _ = conn.create_collation_str(name, |a, b| b.to_lowercase().cmp(&a.to_lowercase()));
   ///    }
   /// });
   /// conn.prepare("SELECT 'a' < 'B' COLLATE nocase_rev")?;
   /// # Ok(())
   /// # }
   /// ```
   pub fn set_collation_needed_handler<F>(&self, handler: F)
   where
      F: FnMut(&Connection, &str) + 'static,
   {
      let handler = BoxedHandler::new(CollationNeeded {
         conn: Rc::downgrade(&self.inner),
         handler,
      });
      unsafe {
         ffi::sqlite3_collation_needed(
            self.handle(),
            handler.ptr,
            Some(collation_needed_hook::<F>),
         )
      };
      trace!("collation-needed handler installed");
      self.store_handler(slot!(collation_needed), Some(handler));
   }

   pub fn clear_collation_needed_handler(&self) {
      unsafe { ffi::sqlite3_collation_needed(self.handle(), ptr::null_mut(), None) };
      self.store_handler(slot!(collation_needed), None);
   }
}
