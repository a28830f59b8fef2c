//! # sqlx-session-toolkit
//!
//! Scoped SQLite sessions on top of [`sqlx_handle_pool`].
//!
//! A [`Session`] is one pooled handle lent to one caller. Statements bind
//! JSON values and decode rows to ordered JSON maps. Transactions borrow the
//! session, commit or roll back explicitly, and are rolled back if dropped.
//!
//! The scoped helpers follow an acquire → use → guaranteed release pattern:
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_session_toolkit::{PoolConfig, open_pool, with_transaction};
//!
//! # async fn demo() -> sqlx_session_toolkit::Result<()> {
//! let pool = open_pool("app.db", PoolConfig::default())?;
//!
//! with_transaction(&pool, async |tx| {
//!    tx.execute("INSERT INTO audit (msg) VALUES ($1)", vec![json!("hello")])
//!       .await?;
//!    Ok(())
//! })
//! .await?;
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod decode;
mod error;
mod session;
mod transactions;

pub use decode::Row;
pub use error::{Error, Result};
pub use session::{
   Session, SessionPool, WriteQueryResult, open_pool, open_pool_url, with_session,
   with_transaction,
};
pub use transactions::{Statement, Transaction, execute_transaction};

// Re-export pool types callers need to configure and inspect a session pool
pub use sqlx_handle_pool::{HandleId, PoolConfig, PoolStats};
