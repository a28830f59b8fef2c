//! Handle identity and bookkeeping

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Pool-local identifier of a connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
   pub fn new(id: u64) -> Self {
      Self(id)
   }

   pub fn get(self) -> u64 {
      self.0
   }
}

impl fmt::Display for HandleId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "#{}", self.0)
   }
}

/// Metadata the pool keeps for every open handle
///
/// Timestamps use tokio's clock so they follow a paused test runtime.
#[derive(Debug, Clone)]
pub struct HandleInfo {
   id: HandleId,
   session_id: u64,
   created_at: Instant,
   last_activity: Instant,
}

impl HandleInfo {
   pub(crate) fn new(id: HandleId, session_id: u64) -> Self {
      let now = Instant::now();
      Self {
         id,
         session_id,
         created_at: now,
         last_activity: now,
      }
   }

   pub fn id(&self) -> HandleId {
      self.id
   }

   /// Session identifier assigned by the endpoint when the connection opened
   pub fn session_id(&self) -> u64 {
      self.session_id
   }

   pub fn created_at(&self) -> Instant {
      self.created_at
   }

   pub fn last_activity(&self) -> Instant {
      self.last_activity
   }

   /// Time elapsed since the handle was last used
   pub fn idle_for(&self) -> Duration {
      self.last_activity.elapsed()
   }

   pub(crate) fn touch(&mut self) {
      self.last_activity = Instant::now();
   }
}
