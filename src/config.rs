//! Configuration applied when opening a connection

use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::connection::Connection;
use crate::types::OpenFlags;

/// Configuration for opening a [`Connection`]
///
/// # Examples
///
/// ```
/// use sqxx::{ConnectionConfig, OpenFlags};
/// use std::time::Duration;
///
/// // Use defaults
/// let config = ConnectionConfig::default();
///
/// // Customize specific fields
/// let config = ConnectionConfig {
///    flags: OpenFlags::READ_ONLY,
///    busy_timeout: Some(Duration::from_secs(1)),
///    foreign_keys: Some(true),
///    triggers: None,
/// };
///
/// // Override just one field
/// let config = ConnectionConfig {
///    foreign_keys: Some(true),
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
   /// Flags passed to the open call
   ///
   /// Default: `READ_WRITE | CREATE`
   pub flags: OpenFlags,

   /// How long to wait for a locked table before failing with `SQLITE_BUSY`
   ///
   /// `None` leaves the engine's default in place, which fails immediately.
   ///
   /// Default: 5 seconds
   #[serde(with = "millis")]
   pub busy_timeout: Option<Duration>,

   /// Enforce foreign key constraints
   ///
   /// `None` keeps the compile-time default (on in the bundled engine).
   ///
   /// Default: None
   pub foreign_keys: Option<bool>,

   /// Enable triggers
   ///
   /// Default: None
   pub triggers: Option<bool>,
}

impl Default for ConnectionConfig {
   fn default() -> Self {
      Self {
         flags: OpenFlags::default(),
         busy_timeout: Some(Duration::from_secs(5)),
         foreign_keys: None,
         triggers: None,
      }
   }
}

impl ConnectionConfig {
   pub(crate) fn apply(&self, conn: &Connection) -> Result<()> {
      if let Some(timeout) = self.busy_timeout {
         conn.busy_timeout(timeout)?;
      }
      if let Some(enable) = self.foreign_keys {
         conn.config_enable_fkey(enable)?;
      }
      if let Some(enable) = self.triggers {
         conn.config_enable_trigger(enable)?;
      }
      Ok(())
   }
}

/// Durations are written as integer milliseconds.
mod millis {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer};

   pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
      Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
   }
}
