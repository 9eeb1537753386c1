//! Process-wide engine state: initialization, configuration, statistics and
//! version information.
//!
//! The `config_*` functions change engine-wide settings and are only
//! accepted before the engine is initialized. The engine initializes itself
//! on the first [`Connection::open`](crate::Connection::open), so call them
//! first, or after [`shutdown`]. Once initialized they fail with
//! `SQLITE_MISUSE`.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

use libsqlite3_sys as ffi;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::connection::open_connections;
use crate::error::guard;
use crate::types::{Counter, Status};
use crate::util::{cstr_to_str, str_to_cstring};
use crate::{Error, Result};

type LogHandler = Arc<dyn Fn(c_int, &str) + Send + Sync>;

static INITIALIZED: Mutex<bool> = Mutex::new(false);
static LOG_HANDLER: RwLock<Option<LogHandler>> = RwLock::new(None);

// ============================================================================
// Lifecycle
// ============================================================================

/// Initializes the engine. Calling it again while initialized does nothing.
pub fn initialize() -> Result<()> {
   let mut initialized = INITIALIZED.lock();
   if *initialized {
      return Ok(());
   }
   Error::check_code(unsafe { ffi::sqlite3_initialize() })?;
   *initialized = true;
   debug!("engine initialized");
   Ok(())
}

/// Releases the engine's process-wide resources.
///
/// Refuses with `SQLITE_MISUSE` while any [`Connection`](crate::Connection)
/// is open. Calling it when the engine is not initialized does nothing.
pub fn shutdown() -> Result<()> {
   let mut initialized = INITIALIZED.lock();
   let open = open_connections();
   if open > 0 {
      return Err(Error::new(
         ffi::SQLITE_MISUSE,
         format!("cannot shut down with {open} open connection(s)"),
      ));
   }
   // The engine may have initialized itself on open, so always ask it.
   Error::check_code(unsafe { ffi::sqlite3_shutdown() })?;
   if *initialized {
      debug!("engine shut down");
   }
   *initialized = false;
   Ok(())
}

/// Whether [`initialize`] has been called without a matching [`shutdown`].
pub fn is_initialized() -> bool {
   *INITIALIZED.lock()
}

// ============================================================================
// Configuration
// ============================================================================

/// Engine threading modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadingMode {
   /// All mutexes disabled. Unsafe to use the engine from more than one
   /// thread.
   SingleThread,
   /// Connections may be used from any thread, but not concurrently.
   MultiThread,
   /// Fully serialized access.
   Serialized,
}

/// Selects the threading mode.
pub fn config_threading(mode: ThreadingMode) -> Result<()> {
   let op = match mode {
      ThreadingMode::SingleThread => ffi::SQLITE_CONFIG_SINGLETHREAD,
      ThreadingMode::MultiThread => ffi::SQLITE_CONFIG_MULTITHREAD,
      ThreadingMode::Serialized => ffi::SQLITE_CONFIG_SERIALIZED,
   };
   Error::check_code(unsafe { ffi::sqlite3_config(op) })
}

/// Enables or disables memory allocation statistics.
pub fn config_memstatus(enable: bool) -> Result<()> {
   Error::check_code(unsafe { ffi::sqlite3_config(ffi::SQLITE_CONFIG_MEMSTATUS, c_int::from(enable)) })
}

/// Default lookaside allocator size for new connections.
pub fn config_lookaside(slot_size: i32, slot_count: i32) -> Result<()> {
   Error::check_code(unsafe {
      ffi::sqlite3_config(ffi::SQLITE_CONFIG_LOOKASIDE, slot_size as c_int, slot_count as c_int)
   })
}

/// Whether filenames passed to open are interpreted as URIs by default.
pub fn config_uri(enable: bool) -> Result<()> {
   Error::check_code(unsafe { ffi::sqlite3_config(ffi::SQLITE_CONFIG_URI, c_int::from(enable)) })
}

/// Whether the query planner may use covering index scans.
pub fn config_covering_index_scan(enable: bool) -> Result<()> {
   Error::check_code(unsafe {
      ffi::sqlite3_config(ffi::SQLITE_CONFIG_COVERING_INDEX_SCAN, c_int::from(enable))
   })
}

/// Default and maximum memory-map sizes, in bytes.
pub fn config_mmap_size(default_size: i64, max_size: i64) -> Result<()> {
   Error::check_code(unsafe {
      ffi::sqlite3_config(
         ffi::SQLITE_CONFIG_MMAP_SIZE,
         default_size as ffi::sqlite3_int64,
         max_size as ffi::sqlite3_int64,
      )
   })
}

/// Minimum PMA size for the multithreaded sorter.
pub fn config_pmasz(size: u32) -> Result<()> {
   Error::check_code(unsafe { ffi::sqlite3_config(ffi::SQLITE_CONFIG_PMASZ, size as std::ffi::c_uint) })
}

/// Size at which statement journals spill to disk. `-1` keeps them in
/// memory.
pub fn config_stmtjrnl_spill(bytes: i32) -> Result<()> {
   Error::check_code(unsafe { ffi::sqlite3_config(ffi::SQLITE_CONFIG_STMTJRNL_SPILL, bytes as c_int) })
}

unsafe extern "C" fn log_callback(_: *mut c_void, code: c_int, message: *const c_char) {
   guard("log handler", (), || {
      let handler = LOG_HANDLER.read().clone();
      if let Some(handler) = handler {
         let message = unsafe { cstr_to_str(message) }.unwrap_or("");
         handler(code, message);
      }
   });
}

/// Installs a handler for the engine's error log. It receives the
/// (extended) result code and the message.
///
/// The handler may be called from any thread.
pub fn config_log<F>(handler: F) -> Result<()>
where
   F: Fn(i32, &str) + Send + Sync + 'static,
{
   let callback: unsafe extern "C" fn(*mut c_void, c_int, *const c_char) = log_callback;
   Error::check_code(unsafe {
      ffi::sqlite3_config(ffi::SQLITE_CONFIG_LOG, callback, ptr::null_mut::<c_void>())
   })?;
   *LOG_HANDLER.write() = Some(Arc::new(handler));
   Ok(())
}

/// Removes the error log handler.
pub fn clear_config_log() -> Result<()> {
   Error::check_code(unsafe {
      ffi::sqlite3_config(ffi::SQLITE_CONFIG_LOG, ptr::null_mut::<c_void>(), ptr::null_mut::<c_void>())
   })?;
   *LOG_HANDLER.write() = None;
   Ok(())
}

/// Forwards the engine's error log into `tracing`.
///
/// Warnings and notices are logged at `warn!`/`info!`, everything else at
/// `error!`.
pub fn config_log_to_tracing() -> Result<()> {
   config_log(|code, message| match code & 0xff {
      ffi::SQLITE_WARNING => warn!(target: "sqxx::engine", code, "{}", message),
      ffi::SQLITE_NOTICE => info!(target: "sqxx::engine", code, "{}", message),
      _ => error!(target: "sqxx::engine", code, "{}", message),
   })
}

// ============================================================================
// Memory and statistics
// ============================================================================

/// Asks the engine to free up to `bytes` of heap. Returns the amount freed.
pub fn release_memory(bytes: i32) -> i32 {
   unsafe { ffi::sqlite3_release_memory(bytes as c_int) }
}

/// Sets the soft heap limit in bytes and returns the previous one. A
/// negative value only queries it.
pub fn soft_heap_limit(limit: i64) -> i64 {
   unsafe { ffi::sqlite3_soft_heap_limit64(limit) }
}

/// Bytes of memory currently allocated by the engine.
pub fn memory_used() -> i64 {
   unsafe { ffi::sqlite3_memory_used() }
}

/// Peak of [`memory_used`], optionally resetting it.
pub fn memory_highwater(reset: bool) -> i64 {
   unsafe { ffi::sqlite3_memory_highwater(c_int::from(reset)) }
}

/// Reads a process-wide status counter.
pub fn status(status: Status, reset: bool) -> Result<Counter> {
   let mut current: ffi::sqlite3_int64 = 0;
   let mut highwater: ffi::sqlite3_int64 = 0;
   let rc = unsafe { ffi::sqlite3_status64(status as c_int, &mut current, &mut highwater, c_int::from(reset)) };
   Error::check_code(rc)?;
   Ok(Counter { current, highwater })
}

/// Fills `buf` with bytes from the engine's pseudo-random generator.
pub fn randomness(buf: &mut [u8]) {
   for chunk in buf.chunks_mut(c_int::MAX as usize) {
      unsafe { ffi::sqlite3_randomness(chunk.len() as c_int, chunk.as_mut_ptr().cast()) };
   }
}

// ============================================================================
// Build information
// ============================================================================

/// Version string of the linked engine, e.g. `"3.46.0"`.
pub fn libversion() -> &'static str {
   unsafe { static_str(ffi::sqlite3_libversion()) }
}

/// Version as a number, e.g. `3046000`.
pub fn libversion_number() -> i32 {
   unsafe { ffi::sqlite3_libversion_number() }
}

/// Check-in identifier of the engine source.
pub fn source_id() -> &'static str {
   unsafe { static_str(ffi::sqlite3_sourceid()) }
}

/// Compile-time threading mode: 0 for single-thread, otherwise the engine
/// was built with mutexes.
pub fn threadsafe() -> i32 {
   unsafe { ffi::sqlite3_threadsafe() }
}

/// Whether the engine was built with `option` (the `SQLITE_` prefix is
/// optional).
pub fn compileoption_used(option: &str) -> Result<bool> {
   let option = str_to_cstring(option)?;
   Ok(unsafe { ffi::sqlite3_compileoption_used(option.as_ptr()) } != 0)
}

/// The `n`th compile-time option, without its `SQLITE_` prefix.
pub fn compileoption_get(n: usize) -> Option<&'static str> {
   let n = c_int::try_from(n).ok()?;
   let ptr = unsafe { ffi::sqlite3_compileoption_get(n) };
   if ptr.is_null() {
      return None;
   }
   Some(unsafe { static_str(ptr) })
}

/// Every compile-time option.
pub fn compile_options() -> Vec<&'static str> {
   (0..).map_while(compileoption_get).collect()
}

/// Whether `sql` ends in a complete statement.
pub fn complete(sql: &str) -> Result<bool> {
   let sql = str_to_cstring(sql)?;
   Ok(unsafe { ffi::sqlite3_complete(sql.as_ptr()) } != 0)
}

/// # Safety
///
/// `ptr` must point to a NUL-terminated string with static storage.
unsafe fn static_str(ptr: *const c_char) -> &'static str {
   unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_version_numbers_agree() {
      let number = libversion_number();
      let expected = format!("{}.{}.{}", number / 1_000_000, number / 1000 % 1000, number % 1000);
      assert!(libversion().starts_with(&expected));
   }

   #[test]
   fn test_complete() {
      assert!(complete("SELECT 1;").unwrap());
      assert!(!complete("SELECT 1").unwrap());
      assert!(!complete("CREATE TRIGGER t AFTER INSERT ON x BEGIN SELECT 1;").unwrap());
   }

   #[test]
   fn test_compile_options_listed() {
      let options = compile_options();
      assert!(!options.is_empty());
      assert!(compileoption_used(options[0]).unwrap());
      assert!(!compileoption_used("NOT_A_REAL_OPTION").unwrap());
   }

   #[test]
   fn test_randomness_fills_buffer() {
      let mut a = [0u8; 32];
      let mut b = [0u8; 32];
      randomness(&mut a);
      randomness(&mut b);
      assert_ne!(a, b);
   }
}
