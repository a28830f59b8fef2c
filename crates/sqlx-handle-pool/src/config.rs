//! Configuration for handle pools

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for a [`Pool`](crate::Pool)
///
/// Durations (de)serialize as whole milliseconds, so a config can be loaded
/// from JSON such as `{"capacity": 7, "overflow": 0, "acquire_timeout": 10000}`.
///
/// # Examples
///
/// ```
/// use sqlx_handle_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just a few fields
/// let config = PoolConfig {
///     capacity: 7,
///     overflow: 0,
///     ..Default::default()
/// };
///
/// assert_eq!(config.max_handles(), 7);
/// assert_eq!(config.acquire_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Base number of handles the pool keeps
   ///
   /// This is also the most idle handles the pool will hold on to. Must be
   /// greater than zero.
   ///
   /// Default: 5
   pub capacity: usize,

   /// Extra handles that may be checked out beyond `capacity`
   ///
   /// Overflow handles are closed when they are returned while the idle set
   /// is already full.
   ///
   /// Default: 2
   pub overflow: usize,

   /// How long [`Pool::acquire`](crate::Pool::acquire) waits for a free slot
   ///
   /// Default: 10 seconds
   #[serde(with = "millis")]
   pub acquire_timeout: Duration,

   /// Idle handles older than this are closed at checkout instead of reused
   ///
   /// `None` disables the lazy check; [`Pool::reclaim_idle`](crate::Pool::reclaim_idle)
   /// still works.
   ///
   /// Default: 30 seconds
   #[serde(with = "opt_millis")]
   pub idle_timeout: Option<Duration>,

   /// Ping idle handles before lending them out
   ///
   /// Default: false
   pub test_on_acquire: bool,
}

impl PoolConfig {
   /// Most handles that may be checked out at once
   pub fn max_handles(&self) -> usize {
      self.capacity.saturating_add(self.overflow)
   }

   pub(crate) fn validate(&self) -> Result<()> {
      if self.capacity == 0 {
         return Err(Error::InvalidConfig(
            "capacity must be greater than zero".into(),
         ));
      }

      let max = self.max_handles();
      if max > tokio::sync::Semaphore::MAX_PERMITS || max > u32::MAX as usize {
         return Err(Error::InvalidConfig(format!(
            "capacity + overflow ({max}) is too large"
         )));
      }

      Ok(())
   }
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         capacity: 5,
         overflow: 2,
         acquire_timeout: Duration::from_secs(10),
         idle_timeout: Some(Duration::from_secs(30)),
         test_on_acquire: false,
      }
   }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn clamp_millis(value: &Duration) -> u64 {
   u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

mod millis {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer, Serializer};

   pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.serialize_u64(super::clamp_millis(value))
   }

   pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
      u64::deserialize(deserializer).map(Duration::from_millis)
   }
}

mod opt_millis {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer, Serializer};

   pub fn serialize<S: Serializer>(
      value: &Option<Duration>,
      serializer: S,
   ) -> Result<S::Ok, S::Error> {
      match value {
         Some(d) => serializer.serialize_some(&super::clamp_millis(d)),
         None => serializer.serialize_none(),
      }
   }

   pub fn deserialize<'de, D: Deserializer<'de>>(
      deserializer: D,
   ) -> Result<Option<Duration>, D::Error> {
      Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
   }
}
