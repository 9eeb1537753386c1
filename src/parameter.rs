//! A single statement parameter.

use crate::Result;
use crate::statement::{BindValue, Statement};
use crate::types::Blob;

/// A parameter of a [`Statement`], by zero-based index.
///
/// Holds the statement mutably, so it cannot outlive it or overlap with
/// other access.
pub struct Parameter<'s, 'c> {
   stmt: &'s mut Statement<'c>,
   index: usize,
}

impl<'s, 'c> Parameter<'s, 'c> {
   pub(crate) fn new(stmt: &'s mut Statement<'c>, index: usize) -> Self {
      Self { stmt, index }
   }

   pub fn index(&self) -> usize {
      self.index
   }

   /// The parameter's name including its prefix, or `None` for `?`.
   pub fn name(&self) -> Option<&str> {
      self.stmt.param_name(self.index)
   }

   pub fn bind<T: BindValue>(&mut self, value: T) -> Result<()> {
      self.stmt.bind(self.index, value)
   }

   pub fn bind_null(&mut self) -> Result<()> {
      self.stmt.bind_null(self.index)
   }

   /// Binds a copy of `text`; `None` binds NULL.
   pub fn bind_text(&mut self, text: Option<&str>) -> Result<()> {
      self.stmt.bind_text(self.index, text)
   }

   pub fn bind_static_text(&mut self, text: &'static str) -> Result<()> {
      self.stmt.bind_static_text(self.index, text)
   }

   pub fn bind_blob(&mut self, blob: Blob<'_>) -> Result<()> {
      self.stmt.bind_blob(self.index, blob)
   }

   pub fn bind_static_blob(&mut self, data: &'static [u8]) -> Result<()> {
      self.stmt.bind_static_blob(self.index, data)
   }
}
