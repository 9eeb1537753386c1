//! Prepared statements.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::ptr::{self, NonNull};

use libsqlite3_sys as ffi;
use tracing::trace;

use crate::column::Column;
use crate::connection::Connection;
use crate::parameter::Parameter;
use crate::types::{Blob, Row, SqlValue, StmtStatus};
use crate::util::{bytes_for_sqlite, cstr_to_str, len_as_c_int, str_to_cstring};
use crate::value::FromValue;
use crate::{Error, Result};

/// Where a statement is in its step sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
   /// Freshly prepared or reset.
   Ready,
   /// The last step produced a row.
   Row,
   /// Finished, or failed with anything but busy or locked; only `reset`
   /// leaves this state.
   Done,
}

impl Connection {
   /// Compiles a single SQL statement.
   ///
   /// Trailing whitespace and comments are allowed; a second statement is
   /// rejected with `SQLITE_MISUSE`.
   pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
      let stmt = self.prepare_one(sql)?;
      Ok(Statement::new(self, stmt))
   }

   /// Prepares `sql` and steps it once.
   ///
   /// The returned statement is positioned on the first row, if any, so
   /// queries can be read right away and other statements can simply be
   /// ignored.
   pub fn run(&self, sql: &str) -> Result<Statement<'_>> {
      let mut stmt = self.prepare(sql)?;
      stmt.step()?;
      Ok(stmt)
   }

   fn prepare_one(&self, sql: &str) -> Result<NonNull<ffi::sqlite3_stmt>> {
      let (ptr, len) = bytes_for_sqlite(sql.as_bytes())?;
      let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
      let mut tail = ptr::null();
      let rc = unsafe { ffi::sqlite3_prepare_v2(self.handle(), ptr, len, &mut stmt, &mut tail) };
      unsafe { Error::check(self.handle(), rc)? };

      let Some(stmt) = NonNull::new(stmt) else {
         return Err(Error::new(ffi::SQLITE_MISUSE, "SQL text contains no statement"));
      };
      trace!(sql, "statement prepared");

      // The tail pointer stays within `sql`; anything left must compile to
      // nothing.
      let consumed = if tail.is_null() {
         sql.len()
      } else {
         (tail as usize).saturating_sub(ptr as usize).min(sql.len())
      };
      let rest = &sql.as_bytes()[consumed..];
      if rest.iter().any(|b| !b.is_ascii_whitespace()) && self.compiles_to_statement(rest) {
         unsafe { ffi::sqlite3_finalize(stmt.as_ptr()) };
         return Err(Error::new(
            ffi::SQLITE_MISUSE,
            "multiple SQL statements given where one was expected",
         ));
      }
      Ok(stmt)
   }

   fn compiles_to_statement(&self, sql: &[u8]) -> bool {
      let Ok((ptr, len)) = bytes_for_sqlite(sql) else {
         return true;
      };
      let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
      let rc = unsafe {
         ffi::sqlite3_prepare_v2(self.handle(), ptr, len, &mut stmt, ptr::null_mut())
      };
      if !stmt.is_null() {
         unsafe { ffi::sqlite3_finalize(stmt) };
      }
      rc != ffi::SQLITE_OK || !stmt.is_null()
   }
}

/// A compiled SQL statement.
///
/// Parameter and column indices are zero-based. Stepping past the last row
/// leaves the statement done: further steps return `false` without
/// re-running it until [`Statement::reset`] is called. Resetting keeps the
/// current bindings; [`Statement::clear_bindings`] drops them. Binding a
/// new value resets a stepped statement, so a `bind`/`run` loop needs no
/// explicit reset.
pub struct Statement<'c> {
   conn: &'c Connection,
   stmt: NonNull<ffi::sqlite3_stmt>,
   state: StepState,
   /// Column name to index, built on first lookup and dropped on reset.
   column_index: OnceCell<HashMap<String, usize>>,
}

impl<'c> Statement<'c> {
   fn new(conn: &'c Connection, stmt: NonNull<ffi::sqlite3_stmt>) -> Self {
      Self {
         conn,
         stmt,
         state: StepState::Ready,
         column_index: OnceCell::new(),
      }
   }

   /// The native handle, for calls this crate does not wrap.
   pub fn raw(&self) -> *mut ffi::sqlite3_stmt {
      self.stmt.as_ptr()
   }

   /// The connection this statement belongs to.
   pub fn connection(&self) -> &'c Connection {
      self.conn
   }

   // ─── Parameters ───

   /// Number of parameters, i.e. the largest parameter index plus one.
   pub fn param_count(&self) -> usize {
      unsafe { ffi::sqlite3_bind_parameter_count(self.raw()) as usize }
   }

   /// Index of the parameter called `name`, including its prefix
   /// (`":id"`, `"@id"`, `"$id"`).
   pub fn param_index(&self, name: &str) -> Result<usize> {
      let c_name = str_to_cstring(name)?;
      match unsafe { ffi::sqlite3_bind_parameter_index(self.raw(), c_name.as_ptr()) } {
         0 => Err(Error::new(ffi::SQLITE_RANGE, format!("no such parameter: {name}"))),
         idx => Ok(idx as usize - 1),
      }
   }

   /// Name of the parameter at `index`, or `None` for a nameless `?`.
   pub fn param_name(&self, index: usize) -> Option<&str> {
      let idx = raw_index(index).ok()?;
      unsafe { cstr_to_str(ffi::sqlite3_bind_parameter_name(self.raw(), idx)) }
   }

   /// The parameter at `index`.
   pub fn param(&mut self, index: usize) -> Parameter<'_, 'c> {
      Parameter::new(self, index)
   }

   /// The parameter called `name`.
   pub fn param_named(&mut self, name: &str) -> Result<Parameter<'_, 'c>> {
      let index = self.param_index(name)?;
      Ok(Parameter::new(self, index))
   }

   /// Binds `value` to the parameter at `index`.
   ///
   /// Text and blobs are copied. `None` binds NULL. Binding to a statement
   /// that has been stepped resets it first; other bindings are kept.
   pub fn bind<T: BindValue>(&mut self, index: usize, value: T) -> Result<()> {
      value.bind_to(self, index)
   }

   /// Binds `value` to the parameter called `name`.
   pub fn bind_named<T: BindValue>(&mut self, name: &str, value: T) -> Result<()> {
      let index = self.param_index(name)?;
      value.bind_to(self, index)
   }

   fn check_bind(&self, rc: c_int) -> Result<()> {
      Error::check_code(rc)
   }

   /// The engine refuses bindings mid-run, so a stepped statement is
   /// rewound first.
   fn ready_for_bind(&mut self) {
      if self.state != StepState::Ready {
         self.reset();
      }
   }

   pub fn bind_null(&mut self, index: usize) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      self.check_bind(unsafe { ffi::sqlite3_bind_null(self.raw(), idx) })
   }

   pub fn bind_int(&mut self, index: usize, value: i32) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      self.check_bind(unsafe { ffi::sqlite3_bind_int(self.raw(), idx, value) })
   }

   pub fn bind_int64(&mut self, index: usize, value: i64) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      self.check_bind(unsafe { ffi::sqlite3_bind_int64(self.raw(), idx, value) })
   }

   pub fn bind_double(&mut self, index: usize, value: f64) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      self.check_bind(unsafe { ffi::sqlite3_bind_double(self.raw(), idx, value) })
   }

   /// Binds a copy of `text`; `None` binds NULL.
   pub fn bind_text(&mut self, index: usize, text: Option<&str>) -> Result<()> {
      let Some(text) = text else {
         return self.bind_null(index);
      };
      let idx = raw_index(index)?;
      self.ready_for_bind();
      let (ptr, len) = bytes_for_sqlite(text.as_bytes())?;
      self.check_bind(unsafe {
         ffi::sqlite3_bind_text(self.raw(), idx, ptr, len, ffi::SQLITE_TRANSIENT())
      })
   }

   /// Binds `text` without copying it.
   pub fn bind_static_text(&mut self, index: usize, text: &'static str) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      let (ptr, len) = bytes_for_sqlite(text.as_bytes())?;
      self.check_bind(unsafe {
         ffi::sqlite3_bind_text(self.raw(), idx, ptr, len, ffi::SQLITE_STATIC())
      })
   }

   /// Binds a copy of `blob`; a blob without data binds that many zero
   /// bytes.
   pub fn bind_blob(&mut self, index: usize, blob: Blob<'_>) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      match blob.data() {
         Some(data) => {
            let (ptr, len) = bytes_for_sqlite(data)?;
            self.check_bind(unsafe {
               ffi::sqlite3_bind_blob(
                  self.raw(),
                  idx,
                  ptr.cast::<c_void>(),
                  len,
                  ffi::SQLITE_TRANSIENT(),
               )
            })
         }
         None => {
            let len = len_as_c_int(blob.len())?;
            self.check_bind(unsafe { ffi::sqlite3_bind_zeroblob(self.raw(), idx, len) })
         }
      }
   }

   /// Binds `data` without copying it.
   pub fn bind_static_blob(&mut self, index: usize, data: &'static [u8]) -> Result<()> {
      let idx = raw_index(index)?;
      self.ready_for_bind();
      let (ptr, len) = bytes_for_sqlite(data)?;
      self.check_bind(unsafe {
         ffi::sqlite3_bind_blob(self.raw(), idx, ptr.cast::<c_void>(), len, ffi::SQLITE_STATIC())
      })
   }

   /// Sets every parameter back to NULL.
   pub fn clear_bindings(&mut self) -> Result<()> {
      Error::check_code(unsafe { ffi::sqlite3_clear_bindings(self.raw()) })
   }

   // ─── Stepping ───

   /// Advances to the next row, returning `true` if one is available.
   ///
   /// After the last row (or an error) the statement is done and keeps
   /// returning `false` until [`Statement::reset`]. `SQLITE_BUSY` and
   /// `SQLITE_LOCKED` are the exception: the statement keeps its place, so
   /// stepping again retries.
   pub fn step(&mut self) -> Result<bool> {
      if self.state == StepState::Done {
         return Ok(false);
      }
      match unsafe { ffi::sqlite3_step(self.raw()) } {
         ffi::SQLITE_ROW => {
            self.state = StepState::Row;
            Ok(true)
         }
         ffi::SQLITE_DONE => {
            self.state = StepState::Done;
            Ok(false)
         }
         _ => {
            let err = unsafe { Error::recent(self.conn.handle()) };
            if !err.is_busy() {
               self.state = StepState::Done;
            }
            Err(err)
         }
      }
   }

   /// Executes the statement from the start, stopping at the first row.
   ///
   /// A statement that was already stepped is reset first; bindings are
   /// kept.
   pub fn run(&mut self) -> Result<()> {
      if self.state != StepState::Ready {
         self.reset();
      }
      self.step().map(|_| ())
   }

   /// Alias for [`Statement::step`] that ignores the row flag; check
   /// [`Statement::done`] afterwards.
   pub fn next_row(&mut self) -> Result<()> {
      self.step().map(|_| ())
   }

   /// True once the statement has no more rows.
   pub fn done(&self) -> bool {
      self.state == StepState::Done
   }

   /// Rewinds the statement so it can run again with the same bindings.
   pub fn reset(&mut self) {
      // The return code repeats the last step's error, already reported.
      unsafe { ffi::sqlite3_reset(self.raw()) };
      self.state = StepState::Ready;
      self.column_index.take();
   }

   /// A cursor over the result rows.
   ///
   /// If the statement is already positioned on a row (after
   /// [`Connection::run`] or [`Statement::run`]), that row comes first. A
   /// finished statement yields nothing until it is reset.
   pub fn rows(&mut self) -> Rows<'_, 'c> {
      Rows {
         stmt: self,
         started: false,
      }
   }

   /// Iterator mapping each row through `f`.
   pub fn map_rows<T, F>(&mut self, f: F) -> MappedRows<'_, 'c, F>
   where
      F: FnMut(&Statement<'c>) -> Result<T>,
   {
      MappedRows {
         rows: self.rows(),
         map: f,
      }
   }

   /// Every remaining row as a name-to-value map.
   pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
      self.map_rows(Statement::row).collect()
   }

   // ─── Columns ───

   /// Number of columns in the result set.
   pub fn col_count(&self) -> usize {
      unsafe { ffi::sqlite3_column_count(self.raw()) as usize }
   }

   /// The result column at `index`.
   pub fn col(&self, index: usize) -> Column<'_, 'c> {
      Column::new(self, index)
   }

   /// Name of the result column at `index`.
   pub fn col_name(&self, index: usize) -> Option<&str> {
      let idx = c_int::try_from(index).ok()?;
      unsafe { cstr_to_str(ffi::sqlite3_column_name(self.raw(), idx)) }
   }

   /// Index of the result column called `name`.
   pub fn col_index(&self, name: &str) -> Result<usize> {
      let table = self.column_index.get_or_init(|| {
         (0..self.col_count())
            .filter_map(|i| self.col_name(i).map(|n| (n.to_owned(), i)))
            .collect()
      });
      table
         .get(name)
         .copied()
         .ok_or_else(|| Error::new(ffi::SQLITE_RANGE, format!("no such column: {name}")))
   }

   /// Reads the current row's column at `index` as `T`.
   pub fn val<T: FromValue>(&self, index: usize) -> Result<T> {
      if index >= self.col_count() {
         return Err(Error::new(
            ffi::SQLITE_RANGE,
            format!("column index {index} out of range"),
         ));
      }
      T::from_value(&self.col(index))
   }

   /// Reads the current row's column called `name` as `T`.
   pub fn val_named<T: FromValue>(&self, name: &str) -> Result<T> {
      self.val(self.col_index(name)?)
   }

   /// Snapshot of the current row.
   pub fn row(&self) -> Result<Row> {
      let mut row = Row::with_capacity(self.col_count());
      for i in 0..self.col_count() {
         let name = self.col_name(i).unwrap_or_default().to_owned();
         row.insert(name, self.val::<SqlValue>(i)?);
      }
      Ok(row)
   }

   // ─── Introspection ───

   /// The SQL text the statement was prepared from.
   pub fn sql(&self) -> Option<&str> {
      unsafe { cstr_to_str(ffi::sqlite3_sql(self.raw())) }
   }

   /// Reads (and optionally resets) a statement counter.
   pub fn status(&self, status: StmtStatus, reset: bool) -> i32 {
      unsafe { ffi::sqlite3_stmt_status(self.raw(), status as c_int, c_int::from(reset)) }
   }

   /// True if the statement does not write to the database.
   pub fn readonly(&self) -> bool {
      unsafe { ffi::sqlite3_stmt_readonly(self.raw()) != 0 }
   }

   /// True between the first step and completion or reset.
   pub fn busy(&self) -> bool {
      unsafe { ffi::sqlite3_stmt_busy(self.raw()) != 0 }
   }
}

impl Drop for Statement<'_> {
   fn drop(&mut self) {
      unsafe { ffi::sqlite3_finalize(self.raw()) };
   }
}

impl fmt::Debug for Statement<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Statement")
         .field("sql", &self.sql())
         .field("state", &self.state)
         .finish()
   }
}

fn raw_index(index: usize) -> Result<c_int> {
   index
      .checked_add(1)
      .and_then(|i| c_int::try_from(i).ok())
      .ok_or_else(|| Error::from_code(ffi::SQLITE_RANGE))
}

/// A cursor over a statement's rows.
///
/// Not an [`Iterator`]: each row borrows the statement, which the next call
/// advances.
pub struct Rows<'s, 'c> {
   stmt: &'s mut Statement<'c>,
   started: bool,
}

impl<'s, 'c> Rows<'s, 'c> {
   /// Advances to the next row.
   #[allow(clippy::should_implement_trait)]
   pub fn next(&mut self) -> Result<Option<&Statement<'c>>> {
      let first = !self.started;
      self.started = true;

      let has_row = if first && self.stmt.state == StepState::Row {
         true
      } else {
         self.stmt.step()?
      };
      Ok(has_row.then_some(&*self.stmt))
   }
}

/// Iterator returned by [`Statement::map_rows`].
pub struct MappedRows<'s, 'c, F> {
   rows: Rows<'s, 'c>,
   map: F,
}

impl<'c, T, F> Iterator for MappedRows<'_, 'c, F>
where
   F: FnMut(&Statement<'c>) -> Result<T>,
{
   type Item = Result<T>;

   fn next(&mut self) -> Option<Self::Item> {
      match self.rows.next() {
         Ok(Some(stmt)) => Some((self.map)(stmt)),
         Ok(None) => None,
         Err(err) => Some(Err(err)),
      }
   }
}

/// Values that can be bound to a statement parameter.
pub trait BindValue {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()>;
}

impl<T: BindValue + ?Sized> BindValue for &T {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      (**self).bind_to(stmt, index)
   }
}

impl BindValue for i32 {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_int(index, *self)
   }
}

impl BindValue for i64 {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_int64(index, *self)
   }
}

impl BindValue for f64 {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_double(index, *self)
   }
}

impl BindValue for bool {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_int(index, i32::from(*self))
   }
}

impl BindValue for str {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_text(index, Some(self))
   }
}

impl BindValue for String {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_text(index, Some(self))
   }
}

impl BindValue for [u8] {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_blob(index, Blob::new(self))
   }
}

impl BindValue for Vec<u8> {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_blob(index, Blob::new(self))
   }
}

impl BindValue for Blob<'_> {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      stmt.bind_blob(index, *self)
   }
}

impl BindValue for SqlValue {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      match self {
         SqlValue::Null => stmt.bind_null(index),
         SqlValue::Integer(i) => stmt.bind_int64(index, *i),
         SqlValue::Real(r) => stmt.bind_double(index, *r),
         SqlValue::Text(s) => stmt.bind_text(index, Some(s)),
         SqlValue::Blob(b) => stmt.bind_blob(index, Blob::new(b)),
      }
   }
}

/// `None` binds NULL.
impl<T: BindValue> BindValue for Option<T> {
   fn bind_to(&self, stmt: &mut Statement<'_>, index: usize) -> Result<()> {
      match self {
         Some(value) => value.bind_to(stmt, index),
         None => stmt.bind_null(index),
      }
   }
}
