//! Plain data types shared across the binding.

use std::ffi::c_int;

use indexmap::IndexMap;
use libsqlite3_sys as ffi;
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
   /// Flags for opening a connection, passed unchanged to `sqlite3_open_v2`.
   #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
   pub struct OpenFlags: c_int {
      const READ_ONLY = ffi::SQLITE_OPEN_READONLY;
      const READ_WRITE = ffi::SQLITE_OPEN_READWRITE;
      const CREATE = ffi::SQLITE_OPEN_CREATE;
      const URI = ffi::SQLITE_OPEN_URI;
      const MEMORY = ffi::SQLITE_OPEN_MEMORY;
      const NO_MUTEX = ffi::SQLITE_OPEN_NOMUTEX;
      const FULL_MUTEX = ffi::SQLITE_OPEN_FULLMUTEX;
      const SHARED_CACHE = ffi::SQLITE_OPEN_SHAREDCACHE;
      const PRIVATE_CACHE = ffi::SQLITE_OPEN_PRIVATECACHE;
      const NO_FOLLOW = ffi::SQLITE_OPEN_NOFOLLOW;
   }
}

impl Default for OpenFlags {
   fn default() -> OpenFlags {
      OpenFlags::READ_WRITE | OpenFlags::CREATE
   }
}

impl Serialize for OpenFlags {
   fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.serialize_i32(self.bits())
   }
}

impl<'de> Deserialize<'de> for OpenFlags {
   fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
      let bits = c_int::deserialize(deserializer)?;
      Ok(OpenFlags::from_bits_retain(bits))
   }
}

/// Current and high-water values of a status counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
   pub current: i64,
   pub highwater: i64,
}

/// Storage class of a value or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
   Integer,
   Float,
   Text,
   Blob,
   Null,
}

impl ColumnType {
   pub(crate) fn from_raw(raw: c_int) -> Self {
      match raw {
         ffi::SQLITE_INTEGER => ColumnType::Integer,
         ffi::SQLITE_FLOAT => ColumnType::Float,
         ffi::SQLITE_TEXT => ColumnType::Text,
         ffi::SQLITE_BLOB => ColumnType::Blob,
         _ => ColumnType::Null,
      }
   }
}

/// A borrowed blob, or a request for a zero-filled blob.
///
/// A blob without data stands for `len` zero bytes; the engine allocates
/// them itself (`sqlite3_bind_zeroblob`, `sqlite3_result_zeroblob`). This is
/// distinct from SQL NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob<'a> {
   data: Option<&'a [u8]>,
   len: usize,
}

impl<'a> Blob<'a> {
   /// A blob referencing `data`.
   pub fn new(data: &'a [u8]) -> Self {
      Self {
         data: Some(data),
         len: data.len(),
      }
   }

   /// `len` zero bytes.
   pub fn zeroed(len: usize) -> Blob<'static> {
      Blob { data: None, len }
   }

   /// The referenced bytes, or `None` for a zero-filled blob.
   pub fn data(&self) -> Option<&'a [u8]> {
      self.data
   }

   pub fn len(&self) -> usize {
      self.len
   }

   pub fn is_empty(&self) -> bool {
      self.len == 0
   }
}

impl<'a> From<&'a [u8]> for Blob<'a> {
   fn from(data: &'a [u8]) -> Self {
      Blob::new(data)
   }
}

/// Owned, dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl SqlValue {
   /// Returns true if this value is null.
   pub fn is_null(&self) -> bool {
      matches!(self, SqlValue::Null)
   }

   /// Storage class of this value.
   pub fn column_type(&self) -> ColumnType {
      match self {
         SqlValue::Null => ColumnType::Null,
         SqlValue::Integer(_) => ColumnType::Integer,
         SqlValue::Real(_) => ColumnType::Float,
         SqlValue::Text(_) => ColumnType::Text,
         SqlValue::Blob(_) => ColumnType::Blob,
      }
   }

   /// Attempts to get this value as an integer.
   pub fn as_integer(&self) -> Option<i64> {
      match self {
         SqlValue::Integer(i) => Some(*i),
         _ => None,
      }
   }

   /// Attempts to get this value as a float.
   pub fn as_real(&self) -> Option<f64> {
      match self {
         SqlValue::Real(r) => Some(*r),
         _ => None,
      }
   }

   /// Attempts to get this value as a string reference.
   pub fn as_text(&self) -> Option<&str> {
      match self {
         SqlValue::Text(s) => Some(s),
         _ => None,
      }
   }

   /// Attempts to get this value as a blob reference.
   pub fn as_blob(&self) -> Option<&[u8]> {
      match self {
         SqlValue::Blob(b) => Some(b),
         _ => None,
      }
   }
}

macro_rules! sql_value_from {
   ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
      $(
         impl From<$ty> for SqlValue {
            fn from($v: $ty) -> Self {
               $conv
            }
         }
      )*
   };
}

sql_value_from! {
   i32 => |v| SqlValue::Integer(i64::from(v)),
   i64 => |v| SqlValue::Integer(v),
   f64 => |v| SqlValue::Real(v),
   bool => |v| SqlValue::Integer(i64::from(v)),
   String => |v| SqlValue::Text(v),
   &str => |v| SqlValue::Text(v.to_owned()),
   Vec<u8> => |v| SqlValue::Blob(v),
   &[u8] => |v| SqlValue::Blob(v.to_vec()),
}

/// A materialized result row: column name to value, in column order.
pub type Row = IndexMap<String, SqlValue>;

/// Kind of row change reported to an update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateAction {
   Insert,
   Update,
   Delete,
}

impl UpdateAction {
   pub(crate) fn from_raw(raw: c_int) -> Option<Self> {
      match raw {
         ffi::SQLITE_INSERT => Some(UpdateAction::Insert),
         ffi::SQLITE_UPDATE => Some(UpdateAction::Update),
         ffi::SQLITE_DELETE => Some(UpdateAction::Delete),
         _ => None,
      }
   }
}

/// Verdict returned by an authorizer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Authorization {
   /// Allow the action.
   Allow = ffi::SQLITE_OK,
   /// Fail the statement with an authorization error.
   Deny = ffi::SQLITE_DENY,
   /// Treat the column as NULL or skip the action.
   Ignore = ffi::SQLITE_IGNORE,
}

/// Per-connection run-time limits (`sqlite3_limit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Limit {
   Length = ffi::SQLITE_LIMIT_LENGTH,
   SqlLength = ffi::SQLITE_LIMIT_SQL_LENGTH,
   Column = ffi::SQLITE_LIMIT_COLUMN,
   ExprDepth = ffi::SQLITE_LIMIT_EXPR_DEPTH,
   CompoundSelect = ffi::SQLITE_LIMIT_COMPOUND_SELECT,
   VdbeOp = ffi::SQLITE_LIMIT_VDBE_OP,
   FunctionArg = ffi::SQLITE_LIMIT_FUNCTION_ARG,
   Attached = ffi::SQLITE_LIMIT_ATTACHED,
   LikePatternLength = ffi::SQLITE_LIMIT_LIKE_PATTERN_LENGTH,
   VariableNumber = ffi::SQLITE_LIMIT_VARIABLE_NUMBER,
   TriggerDepth = ffi::SQLITE_LIMIT_TRIGGER_DEPTH,
   WorkerThreads = ffi::SQLITE_LIMIT_WORKER_THREADS,
}

/// Per-connection status counters (`sqlite3_db_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DbStatus {
   LookasideUsed = ffi::SQLITE_DBSTATUS_LOOKASIDE_USED,
   CacheUsed = ffi::SQLITE_DBSTATUS_CACHE_USED,
   SchemaUsed = ffi::SQLITE_DBSTATUS_SCHEMA_USED,
   StmtUsed = ffi::SQLITE_DBSTATUS_STMT_USED,
   LookasideHit = ffi::SQLITE_DBSTATUS_LOOKASIDE_HIT,
   LookasideMissSize = ffi::SQLITE_DBSTATUS_LOOKASIDE_MISS_SIZE,
   LookasideMissFull = ffi::SQLITE_DBSTATUS_LOOKASIDE_MISS_FULL,
   CacheHit = ffi::SQLITE_DBSTATUS_CACHE_HIT,
   CacheMiss = ffi::SQLITE_DBSTATUS_CACHE_MISS,
   CacheWrite = ffi::SQLITE_DBSTATUS_CACHE_WRITE,
   DeferredFks = ffi::SQLITE_DBSTATUS_DEFERRED_FKS,
   CacheUsedShared = ffi::SQLITE_DBSTATUS_CACHE_USED_SHARED,
   CacheSpill = ffi::SQLITE_DBSTATUS_CACHE_SPILL,
}

/// Per-statement counters (`sqlite3_stmt_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StmtStatus {
   FullscanStep = ffi::SQLITE_STMTSTATUS_FULLSCAN_STEP,
   Sort = ffi::SQLITE_STMTSTATUS_SORT,
   AutoIndex = ffi::SQLITE_STMTSTATUS_AUTOINDEX,
   VmStep = ffi::SQLITE_STMTSTATUS_VM_STEP,
   Reprepare = ffi::SQLITE_STMTSTATUS_REPREPARE,
   Run = ffi::SQLITE_STMTSTATUS_RUN,
   MemUsed = ffi::SQLITE_STMTSTATUS_MEMUSED,
}

/// Process-wide status counters (`sqlite3_status64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
   MemoryUsed = ffi::SQLITE_STATUS_MEMORY_USED,
   PagecacheUsed = ffi::SQLITE_STATUS_PAGECACHE_USED,
   PagecacheOverflow = ffi::SQLITE_STATUS_PAGECACHE_OVERFLOW,
   MallocSize = ffi::SQLITE_STATUS_MALLOC_SIZE,
   ParserStack = ffi::SQLITE_STATUS_PARSER_STACK,
   PagecacheSize = ffi::SQLITE_STATUS_PAGECACHE_SIZE,
   MallocCount = ffi::SQLITE_STATUS_MALLOC_COUNT,
}

/// Write-ahead-log checkpoint modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum CheckpointMode {
   #[default]
   Passive = ffi::SQLITE_CHECKPOINT_PASSIVE,
   Full = ffi::SQLITE_CHECKPOINT_FULL,
   Restart = ffi::SQLITE_CHECKPOINT_RESTART,
   Truncate = ffi::SQLITE_CHECKPOINT_TRUNCATE,
}

/// Declared properties of a table column (`sqlite3_table_column_metadata`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
   /// Declared type, if any.
   pub data_type: Option<String>,
   /// Name of the default collation sequence.
   pub collation: Option<String>,
   pub not_null: bool,
   pub primary_key: bool,
   pub autoincrement: bool,
}
