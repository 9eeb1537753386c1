//! Online backup between two connections.

use std::ffi::c_int;
use std::marker::PhantomData;
use std::ptr::NonNull;

use libsqlite3_sys as ffi;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::util::str_to_cstring;
use crate::{Error, Result};

/// Pages left and total pages after a backup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
   pub remaining: i32,
   pub pagecount: i32,
}

/// A page-by-page copy of one database into another.
///
/// The destination is borrowed mutably so nothing else writes to it while
/// the copy runs. Dropping the backup finishes it.
pub struct Backup<'a, 'b> {
   handle: Option<NonNull<ffi::sqlite3_backup>>,
   dest: *mut ffi::sqlite3,
   _dest: PhantomData<&'a mut Connection>,
   _src: PhantomData<&'b Connection>,
}

impl<'a, 'b> Backup<'a, 'b> {
   /// Starts copying database `src_db` of `src` into database `dest_db` of
   /// `dest` (`"main"`, `"temp"` or an attached name).
   ///
   /// Fails with the destination's most recent error if the engine refuses
   /// to start, for example while the destination has a read transaction
   /// open.
   pub fn new(dest: &'a mut Connection, dest_db: &str, src: &'b Connection, src_db: &str) -> Result<Self> {
      let c_dest_db = str_to_cstring(dest_db)?;
      let c_src_db = str_to_cstring(src_db)?;
      let dest_handle = dest.handle();

      let handle = unsafe {
         ffi::sqlite3_backup_init(dest_handle, c_dest_db.as_ptr(), src.handle(), c_src_db.as_ptr())
      };
      let Some(handle) = NonNull::new(handle) else {
         return Err(unsafe { Error::recent(dest_handle) });
      };

      debug!(dest_db, src_db, "backup started");
      Ok(Self {
         handle: Some(handle),
         dest: dest_handle,
         _dest: PhantomData,
         _src: PhantomData,
      })
   }

   fn raw(&self) -> Result<*mut ffi::sqlite3_backup> {
      self
         .handle
         .map(NonNull::as_ptr)
         .ok_or_else(|| Error::new(ffi::SQLITE_MISUSE, "backup already finished"))
   }

   /// Copies up to `pages` pages (all remaining pages if negative).
   ///
   /// Returns `true` while pages remain. `SQLITE_BUSY` and `SQLITE_LOCKED`
   /// are returned as errors; the step may be retried.
   pub fn step(&mut self, pages: i32) -> Result<bool> {
      let handle = self.raw()?;
      match unsafe { ffi::sqlite3_backup_step(handle, pages as c_int) } {
         ffi::SQLITE_OK => Ok(true),
         ffi::SQLITE_DONE => Ok(false),
         rc => Err(Error::from_code(rc)),
      }
   }

   /// Copies everything in one step.
   pub fn run(&mut self) -> Result<()> {
      self.step(-1).map(|_| ())
   }

   /// Pages still to copy, as of the last step.
   pub fn remaining(&self) -> i32 {
      self.handle
         .map_or(0, |h| unsafe { ffi::sqlite3_backup_remaining(h.as_ptr()) })
   }

   /// Total pages in the source, as of the last step.
   pub fn pagecount(&self) -> i32 {
      self.handle
         .map_or(0, |h| unsafe { ffi::sqlite3_backup_pagecount(h.as_ptr()) })
   }

   pub fn progress(&self) -> Progress {
      Progress {
         remaining: self.remaining(),
         pagecount: self.pagecount(),
      }
   }

   /// Iterator that steps `stepsize` pages at a time, yielding progress
   /// after each step until the copy is complete.
   pub fn steps(&mut self, stepsize: i32) -> Steps<'_, 'a, 'b> {
      Steps {
         backup: self,
         stepsize,
         finished: false,
      }
   }

   /// Releases the backup, reporting the first error any step hit.
   pub fn finish(mut self) -> Result<()> {
      self.finish_inner()
   }

   fn finish_inner(&mut self) -> Result<()> {
      let Some(handle) = self.handle.take() else {
         return Ok(());
      };
      let rc = unsafe { ffi::sqlite3_backup_finish(handle.as_ptr()) };
      unsafe { Error::check(self.dest, rc) }
   }
}

impl Drop for Backup<'_, '_> {
   fn drop(&mut self) {
      if let Err(err) = self.finish_inner() {
         warn!(code = %err.error_code(), "backup finished with error: {}", err);
      }
   }
}

/// Iterator returned by [`Backup::steps`].
pub struct Steps<'s, 'a, 'b> {
   backup: &'s mut Backup<'a, 'b>,
   stepsize: i32,
   finished: bool,
}

impl Iterator for Steps<'_, '_, '_> {
   type Item = Result<Progress>;

   fn next(&mut self) -> Option<Self::Item> {
      if self.finished {
         return None;
      }
      match self.backup.step(self.stepsize) {
         Ok(more) => {
            self.finished = !more;
            Some(Ok(self.backup.progress()))
         }
         Err(err) => {
            self.finished = true;
            Some(Err(err))
         }
      }
   }
}
