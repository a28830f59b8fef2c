//! SQLite connector built on sqlx

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, warn};

use crate::manager::{Connected, ManageConnection};

/// Opens `sqlx` SQLite connections for a [`Pool`](crate::Pool).
///
/// SQLite has no server process to hand out session ids, so the connector
/// numbers the connections it opens, starting at 1.
#[derive(Debug)]
pub struct SqliteConnector {
   options: SqliteConnectOptions,
   next_session: AtomicU64,
}

impl SqliteConnector {
   pub fn new(options: SqliteConnectOptions) -> Self {
      Self {
         options,
         next_session: AtomicU64::new(1),
      }
   }

   /// Connector for a database file, created if it does not exist
   pub fn from_path(path: impl AsRef<Path>) -> Self {
      Self::new(
         SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
      )
   }

   /// Connector for a `sqlite:` URL
   pub fn from_url(url: &str) -> Result<Self, sqlx::Error> {
      Ok(Self::new(SqliteConnectOptions::from_str(url)?))
   }

   pub fn options(&self) -> &SqliteConnectOptions {
      &self.options
   }
}

impl ManageConnection for SqliteConnector {
   type Connection = SqliteConnection;
   type Error = sqlx::Error;

   async fn connect(&self) -> Result<Connected<SqliteConnection>, sqlx::Error> {
      let conn = self.options.connect().await?;
      let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
      debug!(session_id, "opened sqlite connection");
      Ok(Connected::new(session_id, conn))
   }

   async fn is_valid(&self, conn: &mut SqliteConnection) -> bool {
      conn.ping().await.is_ok()
   }

   /// Roll back whatever transaction the previous borrower left open
   async fn reset(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
      rollback_open_transaction(conn).await?;
      Ok(())
   }

   async fn close(&self, conn: SqliteConnection) {
      if let Err(e) = conn.close().await {
         warn!(error = %e, "error while closing sqlite connection");
      }
   }
}

/// Roll back the transaction open on `conn`.
///
/// SQLite ends a transaction on its own after some failures (an `OR ROLLBACK`
/// conflict, a full disk, I/O errors), and a `ROLLBACK` issued afterwards
/// fails with "no transaction is active". That counts as rolled back.
///
/// Returns `false` when no transaction was open.
pub async fn rollback_open_transaction(conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
   match sqlx::query("ROLLBACK").execute(&mut *conn).await {
      Ok(_) => Ok(true),
      Err(e) if is_no_transaction_active(&e) => {
         debug!("no transaction open; nothing to roll back");
         Ok(false)
      }
      Err(e) => Err(e),
   }
}

fn is_no_transaction_active(error: &sqlx::Error) -> bool {
   error
      .as_database_error()
      .is_some_and(|db_err| db_err.message().contains("no transaction is active"))
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{Pool, PoolConfig};

   #[tokio::test]
   async fn test_session_ids_are_sequential() {
      let temp_dir = tempfile::TempDir::new().unwrap();
      let connector = SqliteConnector::from_path(temp_dir.path().join("ids.db"));

      let first = connector.connect().await.unwrap();
      let second = connector.connect().await.unwrap();

      assert_eq!(first.session_id, 1);
      assert_eq!(second.session_id, 2);

      connector.close(first.connection).await;
      connector.close(second.connection).await;
   }

   #[tokio::test]
   async fn test_reset_rolls_back_open_transaction() {
      let temp_dir = tempfile::TempDir::new().unwrap();
      let pool = Pool::new(
         PoolConfig {
            capacity: 1,
            overflow: 0,
            ..Default::default()
         },
         SqliteConnector::from_path(temp_dir.path().join("reset.db")),
      )
      .unwrap();

      let mut handle = pool.acquire().await.unwrap();
      sqlx::query("CREATE TABLE t (id INTEGER)")
         .execute(&mut *handle)
         .await
         .unwrap();
      sqlx::query("BEGIN").execute(&mut *handle).await.unwrap();
      sqlx::query("INSERT INTO t VALUES (1)")
         .execute(&mut *handle)
         .await
         .unwrap();
      handle.mark_needs_reset();
      let session_id = handle.session_id();
      pool.release(handle).await.unwrap();

      // Same connection comes back, without the uncommitted row
      let mut handle = pool.acquire().await.unwrap();
      assert_eq!(handle.session_id(), session_id);

      let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
         .fetch_one(&mut *handle)
         .await
         .unwrap();
      assert_eq!(count, 0);

      pool.release(handle).await.unwrap();
      pool.shutdown().await;
   }

   #[tokio::test]
   async fn test_from_url_opens_in_memory_database() {
      let connector = SqliteConnector::from_url("sqlite::memory:").unwrap();
      let mut connected = connector.connect().await.unwrap();

      assert!(connector.is_valid(&mut connected.connection).await);
      connector.close(connected.connection).await;
   }

   #[tokio::test]
   async fn test_missing_directory_is_connection_failure() {
      let temp_dir = tempfile::TempDir::new().unwrap();
      let pool = Pool::new(
         PoolConfig::default(),
         SqliteConnector::from_path(temp_dir.path().join("missing/dir/db.sqlite")),
      )
      .unwrap();

      let err = pool.acquire().await.unwrap_err();
      assert!(matches!(err, crate::Error::ConnectionFailure(_)));
      assert_eq!(pool.stats().checked_out, 0);
   }

   #[tokio::test]
   async fn test_rollback_without_open_transaction_succeeds() {
      let connector = SqliteConnector::from_url("sqlite::memory:").unwrap();
      let mut connected = connector.connect().await.unwrap();
      let conn = &mut connected.connection;

      sqlx::query("BEGIN").execute(&mut *conn).await.unwrap();
      assert!(rollback_open_transaction(conn).await.unwrap());
      assert!(!rollback_open_transaction(conn).await.unwrap());

      connector.close(connected.connection).await;
   }

   #[tokio::test]
   async fn test_reset_keeps_handle_after_sqlite_rolled_back() {
      let temp_dir = tempfile::TempDir::new().unwrap();
      let pool = Pool::new(
         PoolConfig {
            capacity: 1,
            overflow: 0,
            ..Default::default()
         },
         SqliteConnector::from_path(temp_dir.path().join("auto.db")),
      )
      .unwrap();

      let mut handle = pool.acquire().await.unwrap();
      sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
         .execute(&mut *handle)
         .await
         .unwrap();
      sqlx::query("INSERT INTO t VALUES (1)")
         .execute(&mut *handle)
         .await
         .unwrap();

      // The conflict makes SQLite end the transaction itself
      sqlx::query("BEGIN").execute(&mut *handle).await.unwrap();
      handle.mark_needs_reset();
      assert!(
         sqlx::query("INSERT OR ROLLBACK INTO t VALUES (1)")
            .execute(&mut *handle)
            .await
            .is_err()
      );

      let session_id = handle.session_id();
      pool.release(handle).await.unwrap();
      assert_eq!(pool.stats().idle, 1);

      let handle = pool.acquire().await.unwrap();
      assert_eq!(handle.session_id(), session_id);
      pool.release(handle).await.unwrap();
      pool.shutdown().await;
   }
}
