//! Integration tests for pool bookkeeping, using an in-process mock connector.
//!
//! Timing tests run on tokio's paused clock, so "waiting a second" is instant
//! and deterministic.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sqlx_handle_pool::{Connected, Error, HandleId, ManageConnection, Pool, PoolConfig};
use tokio::time::Instant;

#[derive(Debug)]
struct MockError(&'static str);

impl std::fmt::Display for MockError {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str(self.0)
   }
}

impl std::error::Error for MockError {}

/// Connection that records its own closing
#[derive(Debug)]
struct MockConnection {
   closed: Arc<AtomicUsize>,
}

impl Drop for MockConnection {
   fn drop(&mut self) {
      self.closed.fetch_add(1, Ordering::SeqCst);
   }
}

#[derive(Debug, Default)]
struct MockConnector {
   opened: AtomicUsize,
   closed: Arc<AtomicUsize>,
   resets: AtomicUsize,
   fail_connect: AtomicBool,
   fail_reset: AtomicBool,
   invalid: AtomicBool,
}

impl MockConnector {
   fn opened(&self) -> usize {
      self.opened.load(Ordering::SeqCst)
   }

   fn closed(&self) -> usize {
      self.closed.load(Ordering::SeqCst)
   }

   fn live(&self) -> usize {
      self.opened() - self.closed()
   }
}

impl ManageConnection for MockConnector {
   type Connection = MockConnection;
   type Error = MockError;

   async fn connect(&self) -> Result<Connected<MockConnection>, MockError> {
      if self.fail_connect.load(Ordering::SeqCst) {
         return Err(MockError("endpoint unreachable"));
      }

      // Server-style session ids start well above pool-local handle ids
      let n = self.opened.fetch_add(1, Ordering::SeqCst) as u64;
      Ok(Connected::new(
         50 + n,
         MockConnection {
            closed: Arc::clone(&self.closed),
         },
      ))
   }

   async fn is_valid(&self, _conn: &mut MockConnection) -> bool {
      !self.invalid.load(Ordering::SeqCst)
   }

   async fn reset(&self, _conn: &mut MockConnection) -> Result<(), MockError> {
      self.resets.fetch_add(1, Ordering::SeqCst);
      if self.fail_reset.load(Ordering::SeqCst) {
         return Err(MockError("reset failed"));
      }
      Ok(())
   }
}

fn pool_with(capacity: usize, overflow: usize) -> Pool<MockConnector> {
   let config = PoolConfig {
      capacity,
      overflow,
      acquire_timeout: Duration::from_secs(1),
      idle_timeout: None,
      test_on_acquire: false,
   };
   Pool::new(config, MockConnector::default()).unwrap()
}

// ============================================================================
// Acquire / release
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_acquire_opens_then_reuses() {
   let pool = pool_with(2, 0);

   let handle = pool.acquire().await.unwrap();
   let first_id = handle.id();
   assert_eq!(pool.stats().checked_out, 1);
   assert_eq!(pool.manager().opened(), 1);

   pool.release(handle).await.unwrap();
   assert_eq!(pool.stats().idle, 1);
   assert_eq!(pool.stats().checked_out, 0);

   let handle = pool.acquire().await.unwrap();
   assert_eq!(handle.id(), first_id);
   assert_eq!(pool.manager().opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_id_comes_from_connector() {
   let pool = pool_with(2, 0);

   let a = pool.acquire().await.unwrap();
   let b = pool.acquire().await.unwrap();

   assert_eq!(a.session_id(), 50);
   assert_eq!(b.session_id(), 51);
   assert_ne!(a.id(), b.id());
}

#[tokio::test(start_paused = true)]
async fn test_drop_returns_handle() {
   let pool = pool_with(1, 0);

   {
      let _handle = pool.acquire().await.unwrap();
      assert_eq!(pool.stats().checked_out, 1);
   }

   let stats = pool.stats();
   assert_eq!((stats.idle, stats.checked_out), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_times_out() {
   let pool = pool_with(5, 0);

   let mut held = Vec::new();
   for _ in 0..5 {
      held.push(pool.acquire().await.unwrap());
   }

   let started = Instant::now();
   let err = pool
      .acquire_timeout(Duration::from_secs(1))
      .await
      .unwrap_err();

   assert!(matches!(err, Error::PoolExhausted(t) if t == Duration::from_secs(1)));
   assert!(started.elapsed() >= Duration::from_secs(1));
   assert!(started.elapsed() < Duration::from_secs(2));

   // The failed attempt leaves no trace
   let stats = pool.stats();
   assert_eq!((stats.checked_out, stats.waiting), (5, 0));
   assert_eq!(pool.manager().opened(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_release_unblocks_waiter() {
   let pool = pool_with(5, 0);

   let mut held = Vec::new();
   for _ in 0..5 {
      held.push(pool.acquire().await.unwrap());
   }

   let waiter = {
      let pool = pool.clone();
      tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(10)).await })
   };

   tokio::time::sleep(Duration::from_millis(100)).await;
   assert_eq!(pool.stats().waiting, 1);

   let released = held.pop().unwrap();
   let released_id = released.id();
   pool.release(released).await.unwrap();

   let handle = waiter.await.unwrap().unwrap();
   assert_eq!(handle.id(), released_id);
   assert_eq!(pool.stats().waiting, 0);
   assert_eq!(pool.manager().opened(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_bound_holds_under_concurrency() {
   let pool = pool_with(3, 2);
   let in_use = Arc::new(AtomicUsize::new(0));
   let peak = Arc::new(AtomicUsize::new(0));
   let held_ids = Arc::new(Mutex::new(HashSet::<HandleId>::new()));

   let mut tasks = Vec::new();
   for i in 0..40u64 {
      let pool = pool.clone();
      let in_use = Arc::clone(&in_use);
      let peak = Arc::clone(&peak);
      let held_ids = Arc::clone(&held_ids);

      tasks.push(tokio::spawn(async move {
         let handle = pool
            .acquire_timeout(Duration::from_secs(60))
            .await
            .unwrap();

         // No two callers may hold the same handle
         assert!(held_ids.lock().insert(handle.id()));

         let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
         peak.fetch_max(now, Ordering::SeqCst);
         assert!(pool.stats().checked_out <= 5);

         tokio::time::sleep(Duration::from_millis(10 + i % 7)).await;

         in_use.fetch_sub(1, Ordering::SeqCst);
         held_ids.lock().remove(&handle.id());
         pool.release(handle).await.unwrap();
      }));
   }

   for task in tasks {
      task.await.unwrap();
   }

   assert_eq!(peak.load(Ordering::SeqCst), 5);

   let stats = pool.stats();
   assert_eq!(stats.checked_out, 0);
   assert!(stats.idle <= 3);
   assert_eq!(pool.manager().live(), stats.idle);
}

// ============================================================================
// Overflow
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_overflow_handles_close_on_return() {
   let pool = pool_with(2, 1);

   let a = pool.acquire().await.unwrap();
   let b = pool.acquire().await.unwrap();
   let c = pool.acquire().await.unwrap();
   assert!(pool.stats().is_saturated());

   pool.release(a).await.unwrap();
   pool.release(b).await.unwrap();
   pool.release(c).await.unwrap();

   let stats = pool.stats();
   assert_eq!((stats.idle, stats.checked_out), (2, 0));
   assert_eq!(pool.manager().closed(), 1);
   assert_eq!(pool.manager().live(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_handle_dropped_into_full_pool_is_closed() {
   let pool = pool_with(1, 1);

   let a = pool.acquire().await.unwrap();
   let b = pool.acquire().await.unwrap();
   drop(a);
   drop(b);

   assert_eq!(pool.stats().idle, 1);
   assert_eq!(pool.manager().closed(), 1);
}

// ============================================================================
// Release edge cases
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_foreign_handle_is_rejected() {
   let pool = pool_with(2, 0);
   let other = pool_with(2, 0);

   let handle = other.acquire().await.unwrap();
   let id = handle.id();

   let err = pool.release(handle).await.unwrap_err();
   assert!(matches!(err, Error::ForeignHandle(h) if h == id));

   // Our idle set is untouched; the handle went home
   assert_eq!(pool.stats().idle, 0);
   assert_eq!(other.stats().idle, 1);
   assert_eq!(other.stats().checked_out, 0);
}

#[tokio::test(start_paused = true)]
async fn test_flagged_handle_is_reset_on_release() {
   let pool = pool_with(1, 0);

   let mut handle = pool.acquire().await.unwrap();
   handle.mark_needs_reset();
   pool.release(handle).await.unwrap();

   assert_eq!(pool.manager().resets.load(Ordering::SeqCst), 1);
   assert_eq!(pool.stats().idle, 1);

   let handle = pool.acquire().await.unwrap();
   assert!(!handle.needs_reset());
}

#[tokio::test(start_paused = true)]
async fn test_failed_reset_closes_handle() {
   let pool = pool_with(1, 0);
   pool.manager().fail_reset.store(true, Ordering::SeqCst);

   let mut handle = pool.acquire().await.unwrap();
   handle.mark_needs_reset();
   pool.release(handle).await.unwrap();

   let stats = pool.stats();
   assert_eq!((stats.idle, stats.checked_out), (0, 0));
   assert_eq!(pool.manager().live(), 0);

   // The slot is free again
   let handle = pool.acquire().await.unwrap();
   assert_eq!(pool.manager().opened(), 2);
   drop(handle);
}

#[tokio::test(start_paused = true)]
async fn test_flagged_handle_dropped_is_discarded() {
   let pool = pool_with(1, 0);

   let mut handle = pool.acquire().await.unwrap();
   handle.mark_needs_reset();
   drop(handle);

   let stats = pool.stats();
   assert_eq!((stats.idle, stats.checked_out), (0, 0));
   assert_eq!(pool.manager().closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_handle_outright() {
   let pool = pool_with(2, 0);

   let handle = pool.acquire().await.unwrap();
   handle.close().await;

   let stats = pool.stats();
   assert_eq!((stats.idle, stats.checked_out), (0, 0));
   assert_eq!(pool.manager().closed(), 1);
}

// ============================================================================
// Connection failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_failure_frees_slot() {
   let pool = pool_with(1, 0);
   pool.manager().fail_connect.store(true, Ordering::SeqCst);

   for _ in 0..3 {
      let err = pool.acquire().await.unwrap_err();
      assert!(matches!(err, Error::ConnectionFailure(_)));
      assert!(err.to_string().contains("endpoint unreachable"));
   }

   let stats = pool.stats();
   assert_eq!((stats.checked_out, stats.waiting), (0, 0));

   pool.manager().fail_connect.store(false, Ordering::SeqCst);
   let handle = pool.acquire_timeout(Duration::ZERO).await.unwrap();
   assert_eq!(pool.stats().checked_out, 1);
   drop(handle);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_idle_handle_is_replaced() {
   let config = PoolConfig {
      capacity: 1,
      overflow: 0,
      test_on_acquire: true,
      idle_timeout: None,
      ..Default::default()
   };
   let pool = Pool::new(config, MockConnector::default()).unwrap();

   let handle = pool.acquire().await.unwrap();
   let first = handle.id();
   pool.release(handle).await.unwrap();

   pool.manager().invalid.store(true, Ordering::SeqCst);
   let handle = pool.acquire().await.unwrap();

   assert_ne!(handle.id(), first);
   assert_eq!(pool.manager().closed(), 1);
}

// ============================================================================
// Idle reclamation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reclaim_idle_closes_only_stale_handles() {
   let pool = pool_with(3, 0);

   let a = pool.acquire().await.unwrap();
   let b = pool.acquire().await.unwrap();
   let c = pool.acquire().await.unwrap();

   pool.release(a).await.unwrap();
   pool.release(b).await.unwrap();
   tokio::time::advance(Duration::from_secs(40)).await;
   pool.release(c).await.unwrap();

   let reclaimed = pool.reclaim_idle(Duration::from_secs(30)).await;
   assert_eq!(reclaimed, 2);
   assert_eq!(pool.manager().closed(), 2);

   let remaining = pool.idle_handles();
   assert_eq!(remaining.len(), 1);
   assert!(
      remaining
         .iter()
         .all(|info| info.idle_for() <= Duration::from_secs(30))
   );
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_idle_ignores_checked_out_handles() {
   let pool = pool_with(2, 0);

   let held = pool.acquire().await.unwrap();
   tokio::time::advance(Duration::from_secs(60)).await;

   assert_eq!(pool.reclaim_idle(Duration::from_secs(1)).await, 0);
   assert_eq!(pool.manager().closed(), 0);
   pool.release(held).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_checked_on_acquire() {
   let config = PoolConfig {
      capacity: 2,
      overflow: 0,
      idle_timeout: Some(Duration::from_secs(30)),
      ..Default::default()
   };
   let pool = Pool::new(config, MockConnector::default()).unwrap();

   let handle = pool.acquire().await.unwrap();
   let stale_id = handle.id();
   pool.release(handle).await.unwrap();

   tokio::time::advance(Duration::from_secs(31)).await;

   let handle = pool.acquire().await.unwrap();
   assert_ne!(handle.id(), stale_id);
   assert_eq!(pool.manager().closed(), 1);
   assert_eq!(pool.manager().opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_use_refreshes_last_activity() {
   let pool = pool_with(1, 0);

   let mut handle = pool.acquire().await.unwrap();
   tokio::time::advance(Duration::from_secs(20)).await;
   assert!(handle.idle_for() >= Duration::from_secs(20));

   let _conn: &mut MockConnection = &mut handle;
   assert_eq!(handle.idle_for(), Duration::ZERO);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_everything() {
   let pool = pool_with(3, 0);

   let a = pool.acquire().await.unwrap();
   let b = pool.acquire().await.unwrap();
   pool.release(a).await.unwrap();

   let shutdown = {
      let pool = pool.clone();
      tokio::spawn(async move { pool.shutdown().await })
   };

   tokio::time::sleep(Duration::from_millis(10)).await;
   assert!(pool.is_closed());
   assert!(!shutdown.is_finished());
   assert_eq!(pool.manager().closed(), 1);

   // In-flight handle is closed when it comes back
   pool.release(b).await.unwrap();
   shutdown.await.unwrap();

   assert_eq!(pool.manager().live(), 0);
   assert_eq!(pool.stats().total(), 0);
   assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));

   // Second shutdown is a no-op
   pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_waiting_acquirers() {
   let pool = pool_with(1, 0);
   let held = pool.acquire().await.unwrap();

   let waiter = {
      let pool = pool.clone();
      tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(30)).await })
   };
   tokio::time::sleep(Duration::from_millis(10)).await;

   let shutdown = {
      let pool = pool.clone();
      tokio::spawn(async move { pool.shutdown().await })
   };
   tokio::time::sleep(Duration::from_millis(10)).await;

   drop(held);

   assert!(matches!(waiter.await.unwrap(), Err(Error::PoolClosed)));
   shutdown.await.unwrap();
   assert_eq!(pool.manager().live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_while_holding_a_handle() {
   let pool = pool_with(2, 0);
   let held = pool.acquire().await.unwrap();
   pool.release(pool.acquire().await.unwrap()).await.unwrap();

   let started = Instant::now();
   assert!(!pool.shutdown_timeout(Duration::from_secs(2)).await);
   assert!(started.elapsed() >= Duration::from_secs(2));

   assert!(pool.is_closed());
   assert_eq!(pool.stats().idle, 0);
   assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));

   // The straggler is closed when it finally comes back
   pool.release(held).await.unwrap();
   assert_eq!(pool.manager().live(), 0);
   assert_eq!(pool.stats().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_with_nothing_checked_out() {
   let pool = pool_with(2, 0);
   pool.release(pool.acquire().await.unwrap()).await.unwrap();

   assert!(pool.shutdown_timeout(Duration::from_secs(2)).await);
   assert_eq!(pool.manager().live(), 0);

   // Already shut down, nothing outstanding
   assert!(pool.shutdown_timeout(Duration::from_secs(2)).await);
}

#[test]
fn test_zero_capacity_is_invalid_config() {
   let config = PoolConfig {
      capacity: 0,
      ..Default::default()
   };

   let err = Pool::new(config, MockConnector::default()).unwrap_err();
   assert!(matches!(err, Error::InvalidConfig(_)));
}
