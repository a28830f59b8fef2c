//! # sqlx-handle-pool
//!
//! A bounded pool of reusable connection handles to one database endpoint.
//!
//! ## Core Types
//!
//! - **[`Pool`]**: hands out handles, takes them back, reclaims idle ones
//! - **[`PoolConfig`]**: capacity, overflow allowance and timeouts
//! - **[`PooledHandle`]**: RAII guard for a checked-out connection
//! - **[`ManageConnection`]**: the "open connection" capability the pool is built on
//! - **[`SqliteConnector`]**: `ManageConnection` for sqlx SQLite connections (`sqlite` feature)
//! - **[`Error`]**: error type for pool operations
//!
//! ## Behavior
//!
//! - **Bounded**: at most `capacity + overflow` handles are checked out at once;
//!   further acquirers wait up to a timeout, then fail with [`Error::PoolExhausted`]
//! - **Overflow**: handles beyond `capacity` are closed when returned to a full idle set
//! - **Idle reclamation**: [`Pool::reclaim_idle`] sweeps explicitly, and idle handles past
//!   `idle_timeout` are closed instead of lent at checkout
//! - **Reset on return**: handles flagged as carrying session state are reset before
//!   reuse, or discarded when dropped
//!
//! ```no_run
//! use sqlx_handle_pool::{Pool, PoolConfig, SqliteConnector};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(PoolConfig::default(), SqliteConnector::from_path("app.db"))?;
//!
//! let mut handle = pool.acquire().await?;
//! sqlx::query("SELECT 1").execute(&mut *handle).await?;
//! pool.release(handle).await?;
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handle;
mod manager;
mod pool;
#[cfg(feature = "sqlite")]
mod sqlite;
mod stats;

// Re-export public types
pub use config::PoolConfig;
pub use error::{BoxError, Error, Result};
pub use handle::{HandleId, HandleInfo};
pub use manager::{Connected, ManageConnection};
pub use pool::{Pool, PooledHandle};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, rollback_open_transaction};
pub use stats::PoolStats;
