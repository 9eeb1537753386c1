//! Writing results back from user-defined functions.

use std::error::Error as StdError;
use std::ffi::{c_char, c_int, c_void};
use std::marker::PhantomData;

use libsqlite3_sys as ffi;

use crate::Error;
use crate::types::{Blob, SqlValue};
use crate::util::{bytes_for_sqlite, len_as_c_int};

/// The execution context of one function or aggregate invocation.
///
/// Text and blob results come in two flavors. The plain methods
/// (`result_text`, `result_blob`) make the engine copy the bytes. The
/// `static` variants hand the engine a pointer it keeps without copying,
/// which is only sound for `'static` data.
pub struct Context<'a> {
   raw: *mut ffi::sqlite3_context,
   _marker: PhantomData<&'a mut ffi::sqlite3_context>,
}

impl<'a> Context<'a> {
   /// # Safety
   ///
   /// `raw` must be the context of the current callback invocation.
   pub(crate) unsafe fn from_raw(raw: *mut ffi::sqlite3_context) -> Self {
      Self {
         raw,
         _marker: PhantomData,
      }
   }

   pub fn raw(&self) -> *mut ffi::sqlite3_context {
      self.raw
   }

   /// Opaque pointer registered alongside the function.
   pub(crate) fn user_data(&self) -> *mut c_void {
      unsafe { ffi::sqlite3_user_data(self.raw) }
   }

   /// Sets the result to SQL NULL.
   pub fn result_null(&self) {
      unsafe { ffi::sqlite3_result_null(self.raw) }
   }

   pub fn result_int(&self, value: i32) {
      unsafe { ffi::sqlite3_result_int(self.raw, value) }
   }

   pub fn result_int64(&self, value: i64) {
      unsafe { ffi::sqlite3_result_int64(self.raw, value) }
   }

   pub fn result_double(&self, value: f64) {
      unsafe { ffi::sqlite3_result_double(self.raw, value) }
   }

   /// Sets a text result; the engine copies `text`.
   pub fn result_text(&self, text: &str) {
      match bytes_for_sqlite(text.as_bytes()) {
         Ok((ptr, len)) => unsafe {
            ffi::sqlite3_result_text(self.raw, ptr, len, ffi::SQLITE_TRANSIENT())
         },
         Err(_) => self.result_error_toobig(),
      }
   }

   /// Sets a text result that the engine references without copying.
   pub fn result_static_text(&self, text: &'static str) {
      match bytes_for_sqlite(text.as_bytes()) {
         Ok((ptr, len)) => unsafe {
            ffi::sqlite3_result_text(self.raw, ptr, len, ffi::SQLITE_STATIC())
         },
         Err(_) => self.result_error_toobig(),
      }
   }

   /// Sets a blob result; the engine copies `data`.
   pub fn result_blob(&self, data: &[u8]) {
      match bytes_for_sqlite(data) {
         Ok((ptr, len)) => unsafe {
            ffi::sqlite3_result_blob(self.raw, ptr.cast::<c_void>(), len, ffi::SQLITE_TRANSIENT())
         },
         Err(_) => self.result_error_toobig(),
      }
   }

   /// Sets a blob result that the engine references without copying.
   pub fn result_static_blob(&self, data: &'static [u8]) {
      match bytes_for_sqlite(data) {
         Ok((ptr, len)) => unsafe {
            ffi::sqlite3_result_blob(self.raw, ptr.cast::<c_void>(), len, ffi::SQLITE_STATIC())
         },
         Err(_) => self.result_error_toobig(),
      }
   }

   /// Sets a blob of `len` zero bytes.
   pub fn result_zeroblob(&self, len: usize) {
      match len_as_c_int(len) {
         Ok(len) => unsafe { ffi::sqlite3_result_zeroblob(self.raw, len) },
         Err(_) => self.result_error_toobig(),
      }
   }

   /// Sets a blob result from a [`Blob`]; a blob without data becomes a
   /// zero-filled blob of its length.
   pub fn result_blob_value(&self, blob: Blob<'_>) {
      match blob.data() {
         Some(data) => self.result_blob(data),
         None => self.result_zeroblob(blob.len()),
      }
   }

   /// Fails the invocation with `message` (`SQLITE_ERROR`).
   pub fn result_error(&self, message: &str) {
      // Error messages are copied by the engine; a length is passed so
      // interior nul bytes need no special handling.
      let len = len_as_c_int(message.len()).unwrap_or(c_int::MAX - 1);
      unsafe { ffi::sqlite3_result_error(self.raw, message.as_ptr().cast::<c_char>(), len) }
   }

   /// Changes the error code reported for the invocation.
   pub fn result_error_code(&self, code: c_int) {
      unsafe { ffi::sqlite3_result_error_code(self.raw, code) }
   }

   pub fn result_error_nomem(&self) {
      unsafe { ffi::sqlite3_result_error_nomem(self.raw) }
   }

   pub fn result_error_toobig(&self) {
      unsafe { ffi::sqlite3_result_error_toobig(self.raw) }
   }

   /// Reports `SQLITE_MISUSE`.
   pub fn result_misuse(&self) {
      self.result_error_code(ffi::SQLITE_MISUSE)
   }

   /// Writes `value` using its [`ToResult`] implementation.
   pub fn result<T: ToResult>(&self, value: T) {
      value.set_result(self)
   }

   /// Reports an error returned by a user callback.
   ///
   /// An [`Error`] keeps its own code, with `SQLITE_NOMEM` mapped to the
   /// engine's out-of-memory result. Allocation failures map the same way.
   /// Any other error becomes `SQLITE_ERROR` with its display text.
   pub fn result_callback_error(&self, err: &(dyn StdError + Send + Sync + 'static)) {
      if let Some(err) = err.downcast_ref::<Error>() {
         if err.primary_code() == ffi::SQLITE_NOMEM {
            self.result_error_nomem();
         } else {
            self.result_error(err.message());
            self.result_error_code(err.code());
         }
      } else if err.is::<std::collections::TryReserveError>() {
         self.result_error_nomem();
      } else {
         self.result_error(&err.to_string());
      }
   }
}

/// Types that can be returned from a user-defined function.
pub trait ToResult {
   fn set_result(self, ctx: &Context<'_>);
}

impl ToResult for () {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_null()
   }
}

impl ToResult for i32 {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_int(self)
   }
}

impl ToResult for i64 {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_int64(self)
   }
}

impl ToResult for f64 {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_double(self)
   }
}

impl ToResult for bool {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_int(i32::from(self))
   }
}

impl ToResult for String {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_text(&self)
   }
}

impl ToResult for &'static str {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_static_text(self)
   }
}

impl ToResult for Vec<u8> {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_blob(&self)
   }
}

impl ToResult for &'static [u8] {
   fn set_result(self, ctx: &Context<'_>) {
      ctx.result_static_blob(self)
   }
}

impl ToResult for Blob<'static> {
   fn set_result(self, ctx: &Context<'_>) {
      match self.data() {
         Some(data) => ctx.result_static_blob(data),
         None => ctx.result_zeroblob(self.len()),
      }
   }
}

impl ToResult for SqlValue {
   fn set_result(self, ctx: &Context<'_>) {
      match self {
         SqlValue::Null => ctx.result_null(),
         SqlValue::Integer(i) => ctx.result_int64(i),
         SqlValue::Real(r) => ctx.result_double(r),
         SqlValue::Text(s) => ctx.result_text(&s),
         SqlValue::Blob(b) => ctx.result_blob(&b),
      }
   }
}

/// `None` is SQL NULL.
impl<T: ToResult> ToResult for Option<T> {
   fn set_result(self, ctx: &Context<'_>) {
      match self {
         Some(value) => value.set_result(ctx),
         None => ctx.result_null(),
      }
   }
}

/// `Err` is reported through [`Context::result_callback_error`].
impl<T, E> ToResult for std::result::Result<T, E>
where
   T: ToResult,
   E: Into<Box<dyn StdError + Send + Sync>>,
{
   fn set_result(self, ctx: &Context<'_>) {
      match self {
         Ok(value) => value.set_result(ctx),
         Err(err) => {
            let err: Box<dyn StdError + Send + Sync> = err.into();
            ctx.result_callback_error(&*err)
         }
      }
   }
}
