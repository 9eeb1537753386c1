//! A single result column of the current row.

use std::ffi::c_int;

use libsqlite3_sys as ffi;

use crate::Result;
use crate::statement::Statement;
use crate::types::ColumnType;
use crate::util::{cstr_to_str, raw_bytes};
use crate::value::{FromValue, ValueSource};

/// A result column of a [`Statement`], by zero-based index.
///
/// Reads reflect whichever row the statement is currently on.
#[derive(Clone, Copy)]
pub struct Column<'s, 'c> {
   stmt: &'s Statement<'c>,
   index: usize,
}

impl<'s, 'c> Column<'s, 'c> {
   pub(crate) fn new(stmt: &'s Statement<'c>, index: usize) -> Self {
      Self { stmt, index }
   }

   fn raw_index(&self) -> c_int {
      c_int::try_from(self.index).unwrap_or(c_int::MAX)
   }

   pub fn index(&self) -> usize {
      self.index
   }

   /// The column's name in the result set (its `AS` alias, if any).
   pub fn name(&self) -> Option<&'s str> {
      self.stmt.col_name(self.index)
   }

   /// Database the column's value originates from, or `None` for
   /// expressions.
   pub fn database_name(&self) -> Option<&'s str> {
      unsafe { cstr_to_str(ffi::sqlite3_column_database_name(self.stmt.raw(), self.raw_index())) }
   }

   /// Table the column's value originates from.
   pub fn table_name(&self) -> Option<&'s str> {
      unsafe { cstr_to_str(ffi::sqlite3_column_table_name(self.stmt.raw(), self.raw_index())) }
   }

   /// Name of the table column the value originates from.
   pub fn origin_name(&self) -> Option<&'s str> {
      unsafe { cstr_to_str(ffi::sqlite3_column_origin_name(self.stmt.raw(), self.raw_index())) }
   }

   /// Declared type of the originating table column.
   pub fn decl_type(&self) -> Option<&'s str> {
      unsafe { cstr_to_str(ffi::sqlite3_column_decltype(self.stmt.raw(), self.raw_index())) }
   }

   /// Storage class of the value in the current row.
   pub fn column_type(&self) -> ColumnType {
      self.value_type()
   }

   /// Reads the value as `T`.
   pub fn val<T: FromValue>(&self) -> Result<T> {
      self.stmt.val(self.index)
   }
}

impl ValueSource for Column<'_, '_> {
   fn value_type(&self) -> ColumnType {
      ColumnType::from_raw(unsafe { ffi::sqlite3_column_type(self.stmt.raw(), self.raw_index()) })
   }

   fn int(&self) -> i32 {
      unsafe { ffi::sqlite3_column_int(self.stmt.raw(), self.raw_index()) }
   }

   fn int64(&self) -> i64 {
      unsafe { ffi::sqlite3_column_int64(self.stmt.raw(), self.raw_index()) }
   }

   fn double(&self) -> f64 {
      unsafe { ffi::sqlite3_column_double(self.stmt.raw(), self.raw_index()) }
   }

   fn text_bytes(&self) -> &[u8] {
      // Text before length, so the length is that of the UTF-8 form.
      unsafe {
         let ptr = ffi::sqlite3_column_text(self.stmt.raw(), self.raw_index());
         let len = ffi::sqlite3_column_bytes(self.stmt.raw(), self.raw_index());
         raw_bytes(ptr, len)
      }
   }

   fn blob_bytes(&self) -> &[u8] {
      unsafe {
         let ptr = ffi::sqlite3_column_blob(self.stmt.raw(), self.raw_index());
         let len = ffi::sqlite3_column_bytes(self.stmt.raw(), self.raw_index());
         raw_bytes(ptr.cast::<u8>(), len)
      }
   }
}
