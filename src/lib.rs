//! # sqlite-session-pool
//!
//! Bounded SQLite connection pooling with scoped sessions.
//!
//! The pieces live in two crates, re-exported here:
//!
//! - [`sqlx_handle_pool`]: a pool with a fixed `capacity` of reusable
//!   handles plus a temporary `overflow`, acquire timeouts, idle reclamation
//!   and shutdown
//! - [`sqlx_session_toolkit`]: sessions and transactions on pooled SQLite
//!   handles, released on every exit path
//!
//! [`scenarios`] drives a pool through the two classic pooling exercises:
//! sequential reuse of one connection, and a burst of held sessions that runs
//! into the pool's bound.

pub mod scenarios;

pub use scenarios::{
   BurstOptions, BurstReport, CycleOptions, CycleRecord, connection_cycle, insert_burst,
};

pub use sqlx_handle_pool;
pub use sqlx_session_toolkit;

pub use sqlx_session_toolkit::{
   Error, PoolConfig, PoolStats, Result, Session, SessionPool, Transaction, open_pool,
   open_pool_url, with_session, with_transaction,
};
