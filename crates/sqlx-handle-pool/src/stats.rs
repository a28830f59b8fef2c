//! Point-in-time pool occupancy

use serde::Serialize;

/// Snapshot of a pool's occupancy
///
/// Counters are read one at a time, so under concurrent use the snapshot is
/// approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
   pub capacity: usize,
   pub overflow: usize,
   /// Handles sitting in the idle set
   pub idle: usize,
   /// Handles currently lent to callers
   pub checked_out: usize,
   /// Callers waiting for a free slot
   pub waiting: usize,
}

impl PoolStats {
   /// Open handles known to the pool (idle + checked out)
   pub fn total(&self) -> usize {
      self.idle + self.checked_out
   }

   /// True when every slot, overflow included, is checked out
   pub fn is_saturated(&self) -> bool {
      self.checked_out >= self.capacity + self.overflow
   }
}
