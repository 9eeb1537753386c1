//! Reading typed data out of engine values and result columns.

use std::ffi::c_int;
use std::marker::PhantomData;

use libsqlite3_sys as ffi;
use sqxx_callable::Arguments;

use crate::types::{ColumnType, SqlValue};
use crate::util::raw_bytes;
use crate::{Error, Result};

/// Typed access shared by function arguments ([`Value`]) and result columns
/// ([`crate::Column`]).
///
/// Each accessor applies the engine's own type coercion, so reading an
/// integer column as text yields its decimal representation.
pub trait ValueSource {
   fn value_type(&self) -> ColumnType;
   fn int(&self) -> i32;
   fn int64(&self) -> i64;
   fn double(&self) -> f64;
   /// Text bytes, UTF-8 encoded. Empty for NULL.
   fn text_bytes(&self) -> &[u8];
   /// Blob bytes. Empty for NULL or a zero-length blob.
   fn blob_bytes(&self) -> &[u8];

   fn is_null(&self) -> bool {
      self.value_type() == ColumnType::Null
   }

   /// Text as `&str`, failing with `SQLITE_MISMATCH` on invalid UTF-8.
   fn text(&self) -> Result<&str> {
      Ok(std::str::from_utf8(self.text_bytes())?)
   }
}

/// Conversion from a [`ValueSource`] into a Rust type.
pub trait FromValue: Sized {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self>;
}

impl FromValue for i32 {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      Ok(source.int())
   }
}

impl FromValue for i64 {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      Ok(source.int64())
   }
}

impl FromValue for f64 {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      Ok(source.double())
   }
}

impl FromValue for bool {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      Ok(source.int64() != 0)
   }
}

impl FromValue for String {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      source.text().map(str::to_owned)
   }
}

impl FromValue for Vec<u8> {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      Ok(source.blob_bytes().to_vec())
   }
}

impl FromValue for SqlValue {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      Ok(match source.value_type() {
         ColumnType::Null => SqlValue::Null,
         ColumnType::Integer => SqlValue::Integer(source.int64()),
         ColumnType::Float => SqlValue::Real(source.double()),
         ColumnType::Text => SqlValue::Text(String::from_value(source)?),
         ColumnType::Blob => SqlValue::Blob(source.blob_bytes().to_vec()),
      })
   }
}

/// NULL reads as `None`; anything else goes through `T`.
impl<T: FromValue> FromValue for Option<T> {
   fn from_value<S: ValueSource + ?Sized>(source: &S) -> Result<Self> {
      if source.is_null() {
         Ok(None)
      } else {
         T::from_value(source).map(Some)
      }
   }
}

/// An argument passed to a user-defined function.
///
/// Only valid for the duration of the callback that received it.
#[repr(transparent)]
pub struct Value<'a> {
   raw: *mut ffi::sqlite3_value,
   _marker: PhantomData<&'a ffi::sqlite3_value>,
}

impl<'a> Value<'a> {
   /// # Safety
   ///
   /// `raw` must be a valid value handle for `'a`.
   pub(crate) unsafe fn from_raw(raw: *mut ffi::sqlite3_value) -> Self {
      Self {
         raw,
         _marker: PhantomData,
      }
   }

   /// Views the engine's argument array as values.
   ///
   /// # Safety
   ///
   /// `argv` must point to `argc` valid value handles that live for `'a`.
   pub(crate) unsafe fn slice_from_raw(
      argc: c_int,
      argv: *mut *mut ffi::sqlite3_value,
   ) -> &'a [Value<'a>] {
      if argv.is_null() || argc <= 0 {
         return &[];
      }
      // SAFETY: Value is a transparent wrapper over the handle pointer.
      unsafe { std::slice::from_raw_parts(argv.cast::<Value<'a>>(), argc as usize) }
   }

   /// Reads the value as `T`.
   pub fn get<T: FromValue>(&self) -> Result<T> {
      T::from_value(self)
   }

   /// Copies the value into an owned [`SqlValue`].
   pub fn to_owned_value(&self) -> SqlValue {
      // Text with invalid UTF-8 is surfaced as a blob rather than lost.
      SqlValue::from_value(self).unwrap_or_else(|_| SqlValue::Blob(self.text_bytes().to_vec()))
   }

   pub fn raw(&self) -> *mut ffi::sqlite3_value {
      self.raw
   }
}

impl ValueSource for Value<'_> {
   fn value_type(&self) -> ColumnType {
      // SAFETY: raw is valid for the callback lifetime.
      ColumnType::from_raw(unsafe { ffi::sqlite3_value_type(self.raw) })
   }

   fn int(&self) -> i32 {
      unsafe { ffi::sqlite3_value_int(self.raw) }
   }

   fn int64(&self) -> i64 {
      unsafe { ffi::sqlite3_value_int64(self.raw) }
   }

   fn double(&self) -> f64 {
      unsafe { ffi::sqlite3_value_double(self.raw) }
   }

   fn text_bytes(&self) -> &[u8] {
      // SAFETY: the text pointer must be fetched before the length so the
      // length describes the UTF-8 form.
      unsafe {
         let ptr = ffi::sqlite3_value_text(self.raw);
         let len = ffi::sqlite3_value_bytes(self.raw);
         raw_bytes(ptr, len)
      }
   }

   fn blob_bytes(&self) -> &[u8] {
      unsafe {
         let ptr = ffi::sqlite3_value_blob(self.raw);
         let len = ffi::sqlite3_value_bytes(self.raw);
         raw_bytes(ptr.cast::<u8>(), len)
      }
   }
}

impl std::fmt::Debug for Value<'_> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_tuple("Value").field(&self.to_owned_value()).finish()
   }
}

/// Conversion of a function's argument array into a typed tuple.
pub trait FromValues: Sized {
   fn from_values(values: &[Value<'_>]) -> Result<Self>;
}

macro_rules! from_values {
   ($($idx:tt $arg:ident),*) => {
      impl<$($arg: FromValue),*> FromValues for ($($arg,)*) {
         #[allow(unused_variables)]
         fn from_values(values: &[Value<'_>]) -> Result<Self> {
            let count = <($($arg,)*) as Arguments>::COUNT;
            if values.len() != count {
               return Err(Error::new(
                  ffi::SQLITE_MISUSE,
                  format!("expected {} arguments, got {}", count, values.len()),
               ));
            }
            Ok(($($arg::from_value(&values[$idx])?,)*))
         }
      }
   };
}

from_values!();
from_values!(0 A0);
from_values!(0 A0, 1 A1);
from_values!(0 A0, 1 A1, 2 A2);
from_values!(0 A0, 1 A1, 2 A2, 3 A3);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8, 9 A9);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8, 9 A9, 10 A10);
from_values!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5, 6 A6, 7 A7, 8 A8, 9 A9, 10 A10, 11 A11);
