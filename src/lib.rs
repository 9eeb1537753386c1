//! # sqxx
//!
//! A thin, typed binding over the SQLite C API.
//!
//! Every wrapper corresponds to one native entry point; what this crate adds
//! is ownership. Connections close when dropped, statements finalize when
//! dropped and cannot outlive their connection, and Rust closures can be
//! registered as SQL functions, aggregates, collations and hooks without
//! unwinding into native code.
//!
//! ## Example
//!
//! ```
//! use sqxx::Connection;
//!
//! let conn = Connection::open_in_memory()?;
//! conn.exec("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//! let mut insert = conn.prepare("INSERT INTO items (name) VALUES (?)")?;
//! for name in ["apple", "pear"] {
//!    insert.bind(0, name)?;
//!    insert.run()?;
//! }
//!
//! conn.create_function("shout", |s: String| s.to_uppercase())?;
//!
//! let mut select = conn.prepare("SELECT shout(name) FROM items ORDER BY id")?;
//! let names = select.map_rows(|row| row.val::<String>(0)).collect::<sqxx::Result<Vec<_>>>()?;
//! assert_eq!(names, ["APPLE", "PEAR"]);
//! # Ok::<(), sqxx::Error>(())
//! ```
//!
//! Parameter and column indices are zero-based throughout.
//!
//! ## Errors
//!
//! Every failing native call returns an [`Error`] carrying the engine's
//! (extended) result code. A panic inside a registered callback is caught at
//! the boundary. Functions and aggregates turn it into an SQL error that
//! surfaces from [`Statement::step`]; hooks and collations fall back to a
//! fixed answer and pass the panic to the handler installed with
//! [`set_callback_error_handler`].

mod aggregate;
mod backup;
mod blob;
mod collation;
mod column;
mod config;
mod connection;
mod context;
mod error;
mod function;
pub mod global;
mod hooks;
mod parameter;
mod statement;
mod transaction;
mod types;
mod util;
mod value;

pub use backup::{Backup, Progress, Steps};
pub use blob::BlobStream;
pub use column::Column;
pub use config::ConnectionConfig;
pub use connection::{Connection, InterruptHandle, open_connections};
pub use context::{Context, ToResult};
pub use error::{Error, Result, panic_message, reset_callback_error_handler, set_callback_error_handler};
pub use hooks::AuthAction;
pub use parameter::Parameter;
pub use statement::{BindValue, MappedRows, Rows, Statement};
pub use transaction::{Transaction, TransactionBehavior};
pub use types::{
   Authorization, Blob, CheckpointMode, ColumnMetadata, ColumnType, Counter, DbStatus, Limit, OpenFlags, Row,
   SqlValue, Status, StmtStatus, UpdateAction,
};
pub use value::{FromValue, FromValues, Value, ValueSource};

pub use sqxx_callable::{ArgumentAt, Arguments, Callable, StepCallable, arity_of, step_arity_of};

/// Raw bindings to the engine, for calls this crate does not wrap.
pub use libsqlite3_sys as ffi;
