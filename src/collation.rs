//! Custom collating sequences.

use std::cmp::Ordering;
use std::ffi::{c_int, c_void};
use std::ptr;

use libsqlite3_sys as ffi;
use tracing::debug;

use crate::connection::Connection;
use crate::error::guard;
use crate::function::drop_boxed;
use crate::util::{raw_bytes, str_to_cstring};
use crate::{Error, Result};

unsafe extern "C" fn compare<F>(
   arg: *mut c_void,
   len_a: c_int,
   ptr_a: *const c_void,
   len_b: c_int,
   ptr_b: *const c_void,
) -> c_int
where
   F: Fn(&[u8], &[u8]) -> Ordering,
{
   // A panicking comparator reports the operands as equal.
   guard("collation", 0, || {
      // SAFETY: arg was registered as `*mut F`; the operands are valid for
      // the stated lengths during this call.
      let f = unsafe { &*arg.cast::<F>() };
      let a = unsafe { raw_bytes(ptr_a.cast::<u8>(), len_a) };
      let b = unsafe { raw_bytes(ptr_b.cast::<u8>(), len_b) };
      match f(a, b) {
         Ordering::Less => -1,
         Ordering::Equal => 0,
         Ordering::Greater => 1,
      }
   })
}

impl Connection {
   /// Registers a collating sequence comparing raw UTF-8 bytes.
   ///
   /// ```
   /// # fn main() -> sqxx::Result<()> {
   /// let conn = sqxx::Connection::open_in_memory()?;
   /// conn.create_collation("reverse", |a: &[u8], b: &[u8]| b.cmp(a))?;
   ///
   /// let mut stmt = conn.prepare("SELECT 'a' < 'b' COLLATE reverse")?;
   /// assert!(stmt.step()?);
   /// assert_eq!(stmt.val::<bool>(0)?, false);
   /// # Ok(())
   /// # }
   /// ```
   pub fn create_collation<F>(&self, name: &str, compare_fn: F) -> Result<()>
   where
      F: Fn(&[u8], &[u8]) -> Ordering + 'static,
   {
      let c_name = str_to_cstring(name)?;
      let user_data = Box::into_raw(Box::new(compare_fn));

      debug!(name, "registering collation");

      let rc = unsafe {
         ffi::sqlite3_create_collation_v2(
            self.handle(),
            c_name.as_ptr(),
            ffi::SQLITE_UTF8,
            user_data.cast::<c_void>(),
            Some(compare::<F>),
            Some(drop_boxed::<F>),
         )
      };
      if rc != ffi::SQLITE_OK {
         // Unlike function registration, a failed collation registration
         // does not call the destructor.
         drop(unsafe { Box::from_raw(user_data) });
         return Err(unsafe { Error::recent(self.handle()) });
      }
      Ok(())
   }

   /// Registers a collating sequence over text. Invalid UTF-8 is replaced
   /// before comparison.
   pub fn create_collation_str<F>(&self, name: &str, compare_fn: F) -> Result<()>
   where
      F: Fn(&str, &str) -> Ordering + 'static,
   {
      self.create_collation(name, move |a: &[u8], b: &[u8]| {
         compare_fn(&String::from_utf8_lossy(a), &String::from_utf8_lossy(b))
      })
   }

   /// Removes the collating sequence registered under `name`.
   pub fn remove_collation(&self, name: &str) -> Result<()> {
      let c_name = str_to_cstring(name)?;
      let rc = unsafe {
         ffi::sqlite3_create_collation_v2(
            self.handle(),
            c_name.as_ptr(),
            ffi::SQLITE_UTF8,
            ptr::null_mut(),
            None,
            None,
         )
      };
      unsafe { Error::check(self.handle(), rc) }
   }
}
