//! The "open connection" capability the pool is built on

use std::future::Future;

/// A freshly opened connection and the session id the endpoint gave it
#[derive(Debug)]
pub struct Connected<C> {
   pub session_id: u64,
   pub connection: C,
}

impl<C> Connected<C> {
   pub fn new(session_id: u64, connection: C) -> Self {
      Self {
         session_id,
         connection,
      }
   }
}

/// Opens, checks, resets and closes connections for a [`Pool`](crate::Pool).
///
/// Endpoint address, credentials and driver choice live in the implementor;
/// the pool only sees this trait.
pub trait ManageConnection: Send + Sync + 'static {
   type Connection: Send + 'static;
   type Error: std::error::Error + Send + Sync + 'static;

   /// Open a new connection to the endpoint
   fn connect(
      &self,
   ) -> impl Future<Output = Result<Connected<Self::Connection>, Self::Error>> + Send;

   /// Check that an idle connection is still usable
   ///
   /// Only called when `PoolConfig::test_on_acquire` is set.
   fn is_valid(&self, _conn: &mut Self::Connection) -> impl Future<Output = bool> + Send {
      async { true }
   }

   /// Discard per-session state before the connection is reused
   ///
   /// Called on release for handles flagged with
   /// [`PooledHandle::mark_needs_reset`](crate::PooledHandle::mark_needs_reset).
   /// If this fails the connection is closed instead of pooled.
   fn reset(
      &self,
      _conn: &mut Self::Connection,
   ) -> impl Future<Output = Result<(), Self::Error>> + Send {
      async { Ok(()) }
   }

   /// Close a connection the pool no longer wants
   fn close(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send {
      async move { drop(conn) }
   }
}
