//! Sessions: one pooled SQLite handle lent to one caller

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnection, SqliteQueryResult};
use sqlx_handle_pool::{
   HandleId, Pool, PoolConfig, PooledHandle, SqliteConnector, rollback_open_transaction,
};
use tracing::{debug, warn};

use crate::decode::{Row, build_query, decode_rows};
use crate::transactions::Transaction;
use crate::{Error, Result};

/// Pool of SQLite handles that sessions are drawn from
pub type SessionPool = Pool<SqliteConnector>;

/// Create a session pool for a database file (created if missing).
///
/// No connection is opened until the first session is.
pub fn open_pool(path: impl AsRef<Path>, config: PoolConfig) -> Result<SessionPool> {
   Ok(Pool::new(config, SqliteConnector::from_path(path))?)
}

/// Create a session pool from a `sqlite:` URL
pub fn open_pool_url(url: &str, config: PoolConfig) -> Result<SessionPool> {
   let connector = SqliteConnector::from_url(url)
      .map_err(|e| sqlx_handle_pool::Error::InvalidConfig(format!("bad database url: {e}")))?;
   Ok(Pool::new(config, connector)?)
}

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only meaningful for INSERT operations on tables with a ROWID.
   pub last_insert_id: i64,
}

impl From<SqliteQueryResult> for WriteQueryResult {
   fn from(result: SqliteQueryResult) -> Self {
      Self {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      }
   }
}

/// A checked-out handle plus the pool it goes back to.
///
/// Release it with [`Session::release`]. If a session is dropped instead
/// (early return, panic) its handle still goes back to the pool; a handle
/// with an open transaction is discarded rather than reused.
#[derive(Debug)]
pub struct Session {
   handle: PooledHandle<SqliteConnector>,
   pool: SessionPool,
}

impl Session {
   /// Acquire a session, waiting up to the pool's configured acquire timeout
   pub async fn open(pool: &SessionPool) -> Result<Self> {
      let handle = pool.acquire().await?;
      Ok(Self::from_handle(pool, handle))
   }

   /// Acquire a session, waiting at most `timeout`
   pub async fn open_timeout(pool: &SessionPool, timeout: Duration) -> Result<Self> {
      let handle = pool.acquire_timeout(timeout).await?;
      Ok(Self::from_handle(pool, handle))
   }

   fn from_handle(pool: &SessionPool, handle: PooledHandle<SqliteConnector>) -> Self {
      debug!(
         handle = %handle.id(),
         session_id = handle.session_id(),
         "session opened"
      );
      Self {
         handle,
         pool: pool.clone(),
      }
   }

   /// Session id of the underlying connection
   pub fn session_id(&self) -> u64 {
      self.handle.session_id()
   }

   pub fn handle_id(&self) -> HandleId {
      self.handle.id()
   }

   /// Time since this session last ran a statement
   pub fn idle_for(&self) -> Duration {
      self.handle.idle_for()
   }

   /// Execute a write statement (INSERT/UPDATE/DELETE/DDL)
   pub async fn execute(&mut self, query: &str, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      self.settle().await?;
      let result = build_query(query, values).execute(self.conn()).await?;
      Ok(result.into())
   }

   /// Execute a SELECT query, possibly returning multiple rows
   pub async fn fetch_all(&mut self, query: &str, values: Vec<JsonValue>) -> Result<Vec<Row>> {
      self.settle().await?;
      let rows = build_query(query, values).fetch_all(self.conn()).await?;
      decode_rows(rows)
   }

   /// Execute a SELECT query expecting zero or one row
   pub async fn fetch_one(&mut self, query: &str, values: Vec<JsonValue>) -> Result<Option<Row>> {
      let mut rows = self.fetch_all(query, values).await?;
      match rows.len() {
         0 | 1 => Ok(rows.pop()),
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }

   /// Start a transaction on this session.
   ///
   /// The returned [`Transaction`] borrows the session, so a session never has
   /// more than one open transaction.
   pub async fn begin(&mut self) -> Result<Transaction<'_>> {
      Transaction::begin(self).await
   }

   /// Run `f` inside a transaction.
   ///
   /// Commits when `f` returns `Ok`; rolls back when it returns `Err` or the
   /// commit fails. If the rollback itself fails the error carries both
   /// messages.
   pub async fn transaction<T>(
      &mut self,
      f: impl AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
   ) -> Result<T> {
      let mut tx = self.begin().await?;
      match f(&mut tx).await {
         Ok(value) => match tx.commit().await {
            Ok(()) => Ok(value),
            // COMMIT can fail with the transaction still open
            Err(commit_err) => match self.settle().await {
               Ok(()) => Err(commit_err),
               Err(rollback_err) => Err(Error::TransactionRollbackFailed {
                  transaction_error: commit_err.to_string(),
                  rollback_error: rollback_err.to_string(),
               }),
            },
         },
         Err(e) => Err(tx.rollback_after(e).await),
      }
   }

   /// Return the handle to the pool
   pub async fn release(self) -> Result<()> {
      let Self { handle, pool } = self;
      let session_id = handle.session_id();
      pool.release(handle).await?;
      debug!(session_id, "session released");
      Ok(())
   }

   /// Close the handle instead of returning it to the pool
   pub async fn close(self) {
      debug!(session_id = self.session_id(), "closing session");
      self.handle.close().await;
   }

   pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
      &mut self.handle
   }

   pub(crate) fn handle_mut(&mut self) -> &mut PooledHandle<SqliteConnector> {
      &mut self.handle
   }

   /// Roll back a transaction left open by a dropped [`Transaction`] or a
   /// failed commit
   pub(crate) async fn settle(&mut self) -> Result<()> {
      if self.handle.needs_reset() {
         warn!(
            session_id = self.session_id(),
            "rolling back transaction left open"
         );
         rollback_open_transaction(self.conn()).await?;
         self.handle.clear_needs_reset();
      }
      Ok(())
   }
}

/// Run `f` with a session, releasing it on every exit path.
///
/// A panic inside `f` drops the session, which still returns the handle.
pub async fn with_session<T>(
   pool: &SessionPool,
   f: impl AsyncFnOnce(&mut Session) -> Result<T>,
) -> Result<T> {
   let mut session = Session::open(pool).await?;
   let result = f(&mut session).await;
   finish_scope(session, result).await
}

/// Run `f` inside a transaction on a fresh session, then release it.
///
/// Commit on `Ok`, rollback on `Err`; the session is released either way.
pub async fn with_transaction<T>(
   pool: &SessionPool,
   f: impl AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
) -> Result<T> {
   let mut session = Session::open(pool).await?;
   let result = session.transaction(f).await;
   finish_scope(session, result).await
}

async fn finish_scope<T>(session: Session, result: Result<T>) -> Result<T> {
   match (result, session.release().await) {
      (Ok(value), Ok(())) => Ok(value),
      (Ok(_), Err(e)) => Err(e),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(release_err)) => {
         warn!(error = %release_err, "release failed after session error");
         Err(e)
      }
   }
}
