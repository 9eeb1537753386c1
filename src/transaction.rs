//! Scoped transactions.
//!
//! A [`Transaction`] borrows its connection, so statements prepared inside
//! it cannot outlive it. Dropping an unfinished transaction rolls it back.

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::{Error, Result};

/// How eagerly `BEGIN` acquires locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionBehavior {
   /// Locks are taken on first read or write.
   #[default]
   Deferred,
   /// A write lock is taken immediately.
   Immediate,
   /// An exclusive lock is taken immediately.
   Exclusive,
}

impl TransactionBehavior {
   fn begin_sql(self) -> &'static str {
      match self {
         TransactionBehavior::Deferred => "BEGIN DEFERRED",
         TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
         TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
      }
   }
}

/// An open transaction on a [`Connection`].
#[must_use = "a transaction rolls back when dropped"]
pub struct Transaction<'c> {
   conn: &'c Connection,
   finished: bool,
}

impl Connection {
   /// Begins a transaction with the given locking behavior.
   ///
   /// ```
   /// # use sqxx::{Connection, TransactionBehavior};
   /// let conn = Connection::open_in_memory()?;
   /// conn.exec("CREATE TABLE t (x)")?;
   ///
   /// let tx = conn.transaction(TransactionBehavior::Immediate)?;
   /// tx.exec("INSERT INTO t VALUES (1)")?;
   /// tx.commit()?;
   /// # Ok::<(), sqxx::Error>(())
   /// ```
   pub fn transaction(&self, behavior: TransactionBehavior) -> Result<Transaction<'_>> {
      self.exec(behavior.begin_sql())?;
      debug!(?behavior, "transaction started");
      Ok(Transaction {
         conn: self,
         finished: false,
      })
   }
}

impl<'c> Transaction<'c> {
   /// The connection this transaction runs on.
   pub fn connection(&self) -> &'c Connection {
      self.conn
   }

   /// Commits the transaction.
   ///
   /// If `COMMIT` fails the transaction is rolled back. When that rollback
   /// fails as well, the returned error carries both messages.
   pub fn commit(mut self) -> Result<()> {
      self.finished = true;
      match self.conn.exec("COMMIT") {
         Ok(()) => {
            debug!("transaction committed");
            Ok(())
         }
         Err(commit_err) => {
            // COMMIT can fail and leave the transaction open (SQLITE_BUSY)
            if self.conn.autocommit() {
               return Err(commit_err);
            }
            match self.conn.exec("ROLLBACK") {
               Ok(()) => Err(commit_err),
               Err(rollback_err) => Err(Error::new(
                  commit_err.code(),
                  format!("transaction failed: {commit_err}; rollback also failed: {rollback_err}"),
               )),
            }
         }
      }
   }

   /// Rolls the transaction back.
   pub fn rollback(mut self) -> Result<()> {
      self.finished = true;
      self.conn.exec("ROLLBACK")?;
      debug!("transaction rolled back");
      Ok(())
   }
}

impl std::ops::Deref for Transaction<'_> {
   type Target = Connection;

   fn deref(&self) -> &Connection {
      self.conn
   }
}

impl Drop for Transaction<'_> {
   fn drop(&mut self) {
      if self.finished || self.conn.autocommit() {
         return;
      }
      debug!("dropping unfinished transaction (rolling back)");
      if let Err(e) = self.conn.exec("ROLLBACK") {
         warn!("rollback on drop failed: {}", e);
      }
   }
}
