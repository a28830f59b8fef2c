/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the handle pool (exhausted, closed, connection failure).
   #[error(transparent)]
   Pool(#[from] sqlx_handle_pool::Error),

   /// A statement failed to execute or decode.
   #[error("statement failed: {0}")]
   Statement(#[from] sqlx::Error),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Multiple rows returned from fetch_one query.
   #[error("fetch_one() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Pool(e) => match e {
            sqlx_handle_pool::Error::ConnectionFailure(_) => "CONNECTION_FAILURE",
            sqlx_handle_pool::Error::PoolExhausted(_) => "POOL_EXHAUSTED",
            sqlx_handle_pool::Error::PoolClosed => "POOL_CLOSED",
            sqlx_handle_pool::Error::ForeignHandle(_) => "FOREIGN_HANDLE",
            sqlx_handle_pool::Error::InvalidConfig(_) => "INVALID_CONFIG",
         }
         .to_string(),
         Error::Statement(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "STATEMENT_FAILURE".to_string()
         }
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }

   /// True when the pool had no free handle within the acquire timeout.
   ///
   /// Callers decide whether to back off and retry.
   pub fn is_pool_exhausted(&self) -> bool {
      matches!(self, Error::Pool(sqlx_handle_pool::Error::PoolExhausted(_)))
   }
}
