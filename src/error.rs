//! Error type for every fallible call into the engine, plus the process-wide
//! handler for panics that escape user callbacks.

use std::any::Any;
use std::ffi::{CStr, NulError, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::str::Utf8Error;
use std::sync::Arc;

use libsqlite3_sys as ffi;
use parking_lot::RwLock;
use tracing::error;

/// Result type alias for sqxx operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An engine status code together with a human-readable message.
///
/// Every failing native call is surfaced as one of these. The code is the
/// engine's own integer code (possibly extended), so callers can branch on
/// specific conditions such as [`ffi::SQLITE_BUSY`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
   code: c_int,
   message: String,
}

impl Error {
   /// Creates an error with an explicit code and message.
   pub fn new(code: c_int, message: impl Into<String>) -> Self {
      Self {
         code,
         message: message.into(),
      }
   }

   /// Creates an error whose message is the engine's fixed description of
   /// `code`.
   pub fn from_code(code: c_int) -> Self {
      // SAFETY: sqlite3_errstr returns a pointer to a static string for any
      // input, including unknown codes.
      let message = unsafe { CStr::from_ptr(ffi::sqlite3_errstr(code)) }
         .to_string_lossy()
         .into_owned();
      Self { code, message }
   }

   /// Creates an error from the most recent failure recorded on `db`.
   ///
   /// # Safety
   ///
   /// `db` must be a valid, open connection handle or null. A null handle
   /// yields `SQLITE_NOMEM`, which is what the engine reports for a handle
   /// it failed to allocate.
   pub(crate) unsafe fn recent(db: *mut ffi::sqlite3) -> Self {
      if db.is_null() {
         return Self::from_code(ffi::SQLITE_NOMEM);
      }
      // SAFETY: caller guarantees db is a valid handle.
      unsafe {
         let code = ffi::sqlite3_extended_errcode(db);
         let message = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
         Self { code, message }
      }
   }

   /// Maps a native return code to `Ok(())` or an error built from `db`.
   ///
   /// # Safety
   ///
   /// Same requirements as [`Error::recent`].
   pub(crate) unsafe fn check(db: *mut ffi::sqlite3, rc: c_int) -> Result<()> {
      if rc == ffi::SQLITE_OK {
         Ok(())
      } else {
         // SAFETY: forwarded from caller.
         Err(unsafe { Self::recent(db) })
      }
   }

   /// Maps a native return code to `Ok(())` or an error with the fixed
   /// message for that code.
   pub(crate) fn check_code(rc: c_int) -> Result<()> {
      if rc == ffi::SQLITE_OK {
         Ok(())
      } else {
         Err(Self::from_code(rc))
      }
   }

   /// The full status code, including any extended bits.
   pub fn code(&self) -> c_int {
      self.code
   }

   /// The primary status code (low eight bits of the full code).
   pub fn primary_code(&self) -> c_int {
      self.code & 0xff
   }

   /// The message text.
   pub fn message(&self) -> &str {
      &self.message
   }

   /// True when the engine reported that a lock could not be acquired.
   pub fn is_busy(&self) -> bool {
      matches!(self.primary_code(), ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED)
   }

   /// Extract a structured error code from the error.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      let name = match self.primary_code() {
         ffi::SQLITE_OK => "OK",
         ffi::SQLITE_ERROR => "ERROR",
         ffi::SQLITE_INTERNAL => "INTERNAL",
         ffi::SQLITE_PERM => "PERM",
         ffi::SQLITE_ABORT => "ABORT",
         ffi::SQLITE_BUSY => "BUSY",
         ffi::SQLITE_LOCKED => "LOCKED",
         ffi::SQLITE_NOMEM => "NOMEM",
         ffi::SQLITE_READONLY => "READONLY",
         ffi::SQLITE_INTERRUPT => "INTERRUPT",
         ffi::SQLITE_IOERR => "IOERR",
         ffi::SQLITE_CORRUPT => "CORRUPT",
         ffi::SQLITE_NOTFOUND => "NOTFOUND",
         ffi::SQLITE_FULL => "FULL",
         ffi::SQLITE_CANTOPEN => "CANTOPEN",
         ffi::SQLITE_PROTOCOL => "PROTOCOL",
         ffi::SQLITE_EMPTY => "EMPTY",
         ffi::SQLITE_SCHEMA => "SCHEMA",
         ffi::SQLITE_TOOBIG => "TOOBIG",
         ffi::SQLITE_CONSTRAINT => "CONSTRAINT",
         ffi::SQLITE_MISMATCH => "MISMATCH",
         ffi::SQLITE_MISUSE => "MISUSE",
         ffi::SQLITE_NOLFS => "NOLFS",
         ffi::SQLITE_AUTH => "AUTH",
         ffi::SQLITE_FORMAT => "FORMAT",
         ffi::SQLITE_RANGE => "RANGE",
         ffi::SQLITE_NOTADB => "NOTADB",
         ffi::SQLITE_NOTICE => "NOTICE",
         ffi::SQLITE_WARNING => "WARNING",
         ffi::SQLITE_ROW => "ROW",
         ffi::SQLITE_DONE => "DONE",
         _ => return format!("SQLITE_{}", self.code),
      };
      format!("SQLITE_{name}")
   }
}

impl From<NulError> for Error {
   fn from(e: NulError) -> Self {
      Self::new(ffi::SQLITE_MISUSE, format!("string contains an interior nul byte: {e}"))
   }
}

impl From<Utf8Error> for Error {
   fn from(e: Utf8Error) -> Self {
      Self::new(ffi::SQLITE_MISMATCH, format!("text is not valid UTF-8: {e}"))
   }
}

// ============================================================================
// Callback panic handling
// ============================================================================

type CallbackErrorHandler = dyn Fn(&str, &(dyn Any + Send)) + Send + Sync;

static CALLBACK_ERROR_HANDLER: RwLock<Option<Arc<CallbackErrorHandler>>> = RwLock::new(None);

/// Installs the process-wide handler for panics that escape user callbacks
/// with no caller to return them to (hooks, collations, destructors).
///
/// The handler receives the callback kind (`"commit_hook"`, `"collation"`,
/// ...) and the panic payload. The default handler writes to stderr.
pub fn set_callback_error_handler<F>(handler: F)
where
   F: Fn(&str, &(dyn Any + Send)) + Send + Sync + 'static,
{
   *CALLBACK_ERROR_HANDLER.write() = Some(Arc::new(handler));
}

/// Restores the default stderr handler.
pub fn reset_callback_error_handler() {
   *CALLBACK_ERROR_HANDLER.write() = None;
}

/// Best-effort text for a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
   if let Some(s) = payload.downcast_ref::<&'static str>() {
      *s
   } else if let Some(s) = payload.downcast_ref::<String>() {
      s.as_str()
   } else {
      "non-string panic payload"
   }
}

fn default_callback_error_handler(name: &str, payload: &(dyn Any + Send)) {
   eprintln!("sqxx: uncaught panic in {name}: {}", panic_message(payload));
}

pub(crate) fn report_callback_panic(name: &str, payload: &(dyn Any + Send)) {
   error!(callback = name, "panic in user callback: {}", panic_message(payload));

   // Clone out of the lock so a handler may replace itself.
   let handler = CALLBACK_ERROR_HANDLER.read().clone();
   match handler {
      Some(handler) => {
         if panic::catch_unwind(AssertUnwindSafe(|| handler(name, payload))).is_err() {
            default_callback_error_handler(name, payload);
         }
      }
      None => default_callback_error_handler(name, payload),
   }
}

/// Runs `f`, reporting a panic and returning `fallback` instead of unwinding
/// into native code.
pub(crate) fn guard<R>(name: &str, fallback: R, f: impl FnOnce() -> R) -> R {
   match panic::catch_unwind(AssertUnwindSafe(f)) {
      Ok(value) => value,
      Err(payload) => {
         report_callback_panic(name, &*payload);
         fallback
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_busy() {
      let err = Error::from_code(ffi::SQLITE_BUSY);
      assert_eq!(err.error_code(), "SQLITE_BUSY");
      assert!(err.is_busy());
   }

   #[test]
   fn test_error_code_uses_primary_code() {
      let err = Error::new(ffi::SQLITE_CONSTRAINT_UNIQUE, "UNIQUE constraint failed");
      assert_eq!(err.primary_code(), ffi::SQLITE_CONSTRAINT);
      assert_eq!(err.error_code(), "SQLITE_CONSTRAINT");
      assert_eq!(err.code(), ffi::SQLITE_CONSTRAINT_UNIQUE);
   }

   #[test]
   fn test_error_code_unknown() {
      let err = Error::new(200, "custom");
      assert_eq!(err.error_code(), "SQLITE_200");
      assert!(!err.is_busy());
   }

   #[test]
   fn test_from_code_uses_engine_message() {
      let err = Error::from_code(ffi::SQLITE_MISUSE);
      assert!(err.to_string().contains("misuse"));
   }

   #[test]
   fn test_display_is_message() {
      let err = Error::new(ffi::SQLITE_ERROR, "no such table: t");
      assert_eq!(err.to_string(), "no such table: t");
   }

   #[test]
   fn test_nul_error_maps_to_misuse() {
      let err: Error = std::ffi::CString::new("a\0b").unwrap_err().into();
      assert_eq!(err.code(), ffi::SQLITE_MISUSE);
   }

   #[test]
   fn test_guard_returns_fallback_on_panic() {
      let value = guard("test", -1, || -> i32 { panic!("boom") });
      assert_eq!(value, -1);
      assert_eq!(guard("test", -1, || 5), 5);
   }

   #[test]
   fn test_panic_message_variants() {
      let s: Box<dyn Any + Send> = Box::new("static");
      assert_eq!(panic_message(&*s), "static");
      let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
      assert_eq!(panic_message(&*s), "owned");
      let s: Box<dyn Any + Send> = Box::new(42);
      assert_eq!(panic_message(&*s), "non-string panic payload");
   }
}
