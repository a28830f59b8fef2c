//! Transactions on a session

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx_handle_pool::rollback_open_transaction;
use tracing::debug;
use uuid::Uuid;

use crate::decode::{Row, build_query, decode_rows};
use crate::session::{Session, SessionPool, WriteQueryResult, with_transaction};
use crate::{Error, Result};

/// Statement in a transaction with query and bind values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
   pub query: String,
   #[serde(default)]
   pub values: Vec<JsonValue>,
}

impl Statement {
   pub fn new(query: impl Into<String>) -> Self {
      Self {
         query: query.into(),
         values: Vec::new(),
      }
   }

   pub fn with_values(mut self, values: Vec<JsonValue>) -> Self {
      self.values = values;
      self
   }
}

/// An open transaction on a [`Session`].
///
/// Ends with [`commit`](Self::commit) or [`rollback`](Self::rollback). If it
/// is dropped instead, the handle is flagged and the transaction is rolled
/// back before the session runs anything else, or before the handle is
/// pooled again.
#[must_use = "if unused, the transaction is rolled back before the session is used again"]
pub struct Transaction<'s> {
   session: &'s mut Session,
   id: Uuid,
   finalized: bool,
}

impl<'s> Transaction<'s> {
   pub(crate) async fn begin(session: &'s mut Session) -> Result<Self> {
      session.settle().await?;

      // IMMEDIATE takes the write lock up front, so concurrent sessions queue
      // on busy_timeout instead of failing mid-transaction
      sqlx::query("BEGIN IMMEDIATE").execute(session.conn()).await?;
      session.handle_mut().mark_needs_reset();

      let id = Uuid::new_v4();
      debug!(transaction_id = %id, session_id = session.session_id(), "transaction started");

      Ok(Self {
         session,
         id,
         finalized: false,
      })
   }

   pub fn id(&self) -> Uuid {
      self.id
   }

   pub fn session_id(&self) -> u64 {
      self.session.session_id()
   }

   /// Execute a write statement within this transaction
   pub async fn execute(&mut self, query: &str, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let result = build_query(query, values)
         .execute(self.session.conn())
         .await?;
      Ok(result.into())
   }

   /// Execute a read query within this transaction and return decoded results
   pub async fn fetch_all(&mut self, query: &str, values: Vec<JsonValue>) -> Result<Vec<Row>> {
      let rows = build_query(query, values)
         .fetch_all(self.session.conn())
         .await?;
      decode_rows(rows)
   }

   /// Execute a read query expecting zero or one row
   pub async fn fetch_one(&mut self, query: &str, values: Vec<JsonValue>) -> Result<Option<Row>> {
      let mut rows = self.fetch_all(query, values).await?;
      match rows.len() {
         0 | 1 => Ok(rows.pop()),
         count => Err(Error::MultipleRowsReturned(count)),
      }
   }

   /// Execute statements in order, stopping at the first failure
   pub async fn execute_statements(
      &mut self,
      statements: Vec<Statement>,
   ) -> Result<Vec<WriteQueryResult>> {
      let mut results = Vec::with_capacity(statements.len());
      for statement in statements {
         results.push(self.execute(&statement.query, statement.values).await?);
      }
      Ok(results)
   }

   /// Commit this transaction
   pub async fn commit(mut self) -> Result<()> {
      sqlx::query("COMMIT").execute(self.session.conn()).await?;
      self.finish();
      debug!(transaction_id = %self.id, "transaction committed");
      Ok(())
   }

   /// Rollback this transaction.
   ///
   /// Succeeds when SQLite already rolled the transaction back on its own.
   pub async fn rollback(mut self) -> Result<()> {
      let was_open = rollback_open_transaction(self.session.conn()).await?;
      self.finish();
      debug!(transaction_id = %self.id, was_open, "transaction rolled back");
      Ok(())
   }

   /// Roll back after `error`, returning the error to report
   pub(crate) async fn rollback_after(self, error: Error) -> Error {
      match self.rollback().await {
         // Rollback succeeded, return original error
         Ok(()) => error,

         // Rollback also failed, return the rollback error and the original error
         Err(rollback_err) => Error::TransactionRollbackFailed {
            transaction_error: error.to_string(),
            rollback_error: rollback_err.to_string(),
         },
      }
   }

   fn finish(&mut self) {
      self.finalized = true;
      self.session.handle_mut().clear_needs_reset();
   }
}

impl Drop for Transaction<'_> {
   fn drop(&mut self) {
      if !self.finalized {
         debug!(
            transaction_id = %self.id,
            "transaction dropped without commit (will roll back)"
         );
      }
   }
}

/// Execute statements atomically on a fresh session.
///
/// Commits when every statement succeeds, otherwise rolls back. The session
/// is released either way. Returns the result of each statement.
pub async fn execute_transaction(
   pool: &SessionPool,
   statements: Vec<Statement>,
) -> Result<Vec<WriteQueryResult>> {
   with_transaction(pool, async move |tx| tx.execute_statements(statements).await).await
}
