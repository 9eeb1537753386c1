//! Conversions at the C string and length boundary.

use std::ffi::{CStr, CString, c_char, c_int};

use libsqlite3_sys as ffi;

use crate::{Error, Result};

pub(crate) fn str_to_cstring(s: &str) -> Result<CString> {
   Ok(CString::new(s)?)
}

/// Lengths handed to the engine are C ints; anything larger is `SQLITE_TOOBIG`.
pub(crate) fn len_as_c_int(len: usize) -> Result<c_int> {
   if len >= c_int::MAX as usize {
      Err(Error::from_code(ffi::SQLITE_TOOBIG))
   } else {
      Ok(len as c_int)
   }
}

/// Pointer and length for text or blob bytes.
///
/// Empty input gets a pointer to a static empty string: the engine treats
/// a null data pointer as NULL, not as an empty value.
pub(crate) fn bytes_for_sqlite(bytes: &[u8]) -> Result<(*const c_char, c_int)> {
   let len = len_as_c_int(bytes.len())?;
   if len == 0 {
      Ok((c"".as_ptr(), 0))
   } else {
      Ok((bytes.as_ptr().cast::<c_char>(), len))
   }
}

/// Borrows a nul-terminated string owned by the engine.
///
/// # Safety
///
/// `ptr` must be null or point to a nul-terminated string that stays alive
/// for `'a`.
pub(crate) unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
   if ptr.is_null() {
      return None;
   }
   // SAFETY: checked for null above; validity is the caller's contract.
   unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Like [`cstr_to_str`] but copies into an owned `String`, replacing
/// invalid UTF-8.
///
/// # Safety
///
/// Same requirements as [`cstr_to_str`].
pub(crate) unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
   if ptr.is_null() {
      return None;
   }
   // SAFETY: checked for null above; validity is the caller's contract.
   Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Borrows `len` bytes starting at `ptr`, treating null as empty.
///
/// # Safety
///
/// When non-null, `ptr` must be valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn raw_bytes<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
   if ptr.is_null() || len <= 0 {
      &[]
   } else {
      // SAFETY: non-null and positive length; validity is the caller's contract.
      unsafe { std::slice::from_raw_parts(ptr, len as usize) }
   }
}

/// Quotes `name` as an SQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
   format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_len_as_c_int_rejects_oversized() {
      assert_eq!(len_as_c_int(10).unwrap(), 10);
      let err = len_as_c_int(usize::MAX).unwrap_err();
      assert_eq!(err.code(), ffi::SQLITE_TOOBIG);
   }

   #[test]
   fn test_empty_bytes_get_non_null_pointer() {
      let (ptr, len) = bytes_for_sqlite(b"").unwrap();
      assert!(!ptr.is_null());
      assert_eq!(len, 0);
   }

   #[test]
   fn test_quote_identifier_escapes_quotes() {
      assert_eq!(quote_identifier("main"), "\"main\"");
      assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
   }

   #[test]
   fn test_raw_bytes_null_is_empty() {
      let bytes = unsafe { raw_bytes(std::ptr::null(), 5) };
      assert!(bytes.is_empty());
   }
}
