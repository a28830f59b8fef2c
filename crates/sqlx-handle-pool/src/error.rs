//! Error types for sqlx-handle-pool

use std::time::Duration;

use thiserror::Error;

use crate::handle::HandleId;

/// Boxed error produced by a connection manager
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that may occur when working with a [`Pool`](crate::Pool)
#[derive(Error, Debug)]
pub enum Error {
   /// A new connection could not be opened. The pool does not retry; the
   /// slot reserved for it is given back before this error is returned.
   #[error("failed to open connection: {0}")]
   ConnectionFailure(#[source] BoxError),

   /// No handle became available within the acquire timeout
   #[error("pool exhausted: no handle became available within {0:?}")]
   PoolExhausted(Duration),

   /// Pool has been shut down and cannot be used
   #[error("pool has been shut down")]
   PoolClosed,

   /// The released handle was checked out from a different pool
   #[error("handle {0} was not acquired from this pool")]
   ForeignHandle(HandleId),

   /// Configuration was rejected by [`Pool::new`](crate::Pool::new)
   #[error("invalid pool configuration: {0}")]
   InvalidConfig(String),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_pool_exhausted_message_includes_timeout() {
      let err = Error::PoolExhausted(Duration::from_secs(1));
      assert!(err.to_string().contains("1s"));
   }

   #[test]
   fn test_connection_failure_keeps_source() {
      let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
      let err = Error::ConnectionFailure(Box::new(io));

      assert!(err.to_string().contains("refused"));
      assert!(std::error::Error::source(&err).is_some());
   }

   #[test]
   fn test_foreign_handle_names_the_handle() {
      let err = Error::ForeignHandle(HandleId::new(7));
      assert!(err.to_string().contains("#7"));
   }
}
