//! Bounded pool of reusable connection handles

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::handle::{HandleId, HandleInfo};
use crate::manager::{Connected, ManageConnection};
use crate::stats::PoolStats;
use crate::{Error, Result};

/// Bounded pool of connection handles to a single endpoint.
///
/// ## Architecture
///
/// - **`slots`**: semaphore with `capacity + overflow` permits. Every
///   [`PooledHandle`] owns one permit, so the number of checked-out handles
///   can never exceed the bound.
/// - **`idle`**: FIFO queue of returned connections, capped at `capacity`.
///   Connections are moved in and out under a lock, so a handle is never
///   visible as both idle and checked out.
/// - **`closed`**: set by [`Pool::shutdown`]; handles returned afterwards are
///   closed instead of pooled.
///
/// `Pool` is a cheap, cloneable reference. Clones share the same handles.
pub struct Pool<M: ManageConnection> {
   inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ManageConnection> {
   config: PoolConfig,
   manager: M,
   idle: Mutex<VecDeque<IdleHandle<M::Connection>>>,
   slots: Arc<Semaphore>,
   checked_out: AtomicUsize,
   waiting: AtomicUsize,
   next_handle: AtomicU64,
   closed: AtomicBool,
}

struct IdleHandle<C> {
   info: HandleInfo,
   conn: C,
}

impl<M: ManageConnection> Pool<M> {
   /// Create a pool. No connection is opened until the first acquire.
   pub fn new(config: PoolConfig, manager: M) -> Result<Self> {
      config.validate()?;

      let slots = Arc::new(Semaphore::new(config.max_handles()));
      debug!(
         capacity = config.capacity,
         overflow = config.overflow,
         "created handle pool"
      );

      Ok(Self {
         inner: Arc::new(PoolInner {
            config,
            manager,
            idle: Mutex::new(VecDeque::new()),
            slots,
            checked_out: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
         }),
      })
   }

   /// Acquire a handle, waiting at most `config.acquire_timeout`
   pub async fn acquire(&self) -> Result<PooledHandle<M>> {
      self.acquire_timeout(self.inner.config.acquire_timeout).await
   }

   /// Acquire a handle, waiting at most `timeout` for a free slot.
   ///
   /// Reuses the oldest idle handle when one is available, otherwise opens a
   /// new connection. Idle handles past `config.idle_timeout` (or failing
   /// validation when `config.test_on_acquire` is set) are closed and skipped.
   ///
   /// # Errors
   ///
   /// - [`Error::PoolExhausted`] if every slot stays checked out for `timeout`
   /// - [`Error::ConnectionFailure`] if a new connection could not be opened
   /// - [`Error::PoolClosed`] after [`Pool::shutdown`]
   pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledHandle<M>> {
      let inner = &self.inner;
      if inner.is_closed() {
         return Err(Error::PoolClosed);
      }

      let permit = {
         let _waiting = WaitingGuard::new(&inner.waiting);
         match tokio::time::timeout(timeout, Arc::clone(&inner.slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::PoolClosed),
            Err(_) => {
               warn!(
                  ?timeout,
                  checked_out = inner.checked_out.load(Ordering::SeqCst),
                  "pool exhausted"
               );
               return Err(Error::PoolExhausted(timeout));
            }
         }
      };

      // Shutdown may have started while we were waiting
      if inner.is_closed() {
         return Err(Error::PoolClosed);
      }

      let (info, conn) = match inner.take_idle().await {
         Some(reused) => reused,
         None => inner.open().await?,
      };

      inner.checked_out.fetch_add(1, Ordering::SeqCst);
      trace!(handle = %info.id(), session_id = info.session_id(), "handle checked out");

      Ok(PooledHandle {
         conn: Some(conn),
         info,
         needs_reset: false,
         pool: Arc::clone(inner),
         _permit: permit,
      })
   }

   /// Return a handle to the idle set.
   ///
   /// Handles flagged with [`PooledHandle::mark_needs_reset`] are reset first;
   /// if the reset fails the connection is closed instead. When the idle set
   /// is already full (an overflow handle) or the pool is shut down, the
   /// connection is closed.
   ///
   /// Dropping a [`PooledHandle`] also returns it, but cannot run the async
   /// reset, so a flagged handle is discarded on drop.
   ///
   /// # Errors
   ///
   /// [`Error::ForeignHandle`] if the handle came from another pool. The
   /// handle then goes back to the pool it came from.
   pub async fn release(&self, mut handle: PooledHandle<M>) -> Result<()> {
      if !Arc::ptr_eq(&handle.pool, &self.inner) {
         return Err(Error::ForeignHandle(handle.info.id()));
      }

      let Some(mut conn) = handle.conn.take() else {
         return Ok(());
      };

      if handle.needs_reset {
         if let Err(e) = self.inner.manager.reset(&mut conn).await {
            warn!(handle = %handle.info.id(), error = %e, "reset failed; closing handle");
            self.inner.manager.close(conn).await;
            return Ok(());
         }
         handle.needs_reset = false;
      }

      match self.inner.try_put_idle(handle.info.clone(), conn) {
         None => trace!(handle = %handle.info.id(), "handle returned to idle set"),
         Some(conn) => {
            debug!(handle = %handle.info.id(), "idle set full or pool closed; closing handle");
            self.inner.manager.close(conn).await;
         }
      }

      Ok(())
   }

   /// Close every idle handle unused for longer than `threshold`.
   ///
   /// Returns how many handles were closed. Checked-out handles are never
   /// touched.
   pub async fn reclaim_idle(&self, threshold: Duration) -> usize {
      let stale = {
         let mut idle = self.inner.idle.lock();
         let (stale, fresh): (VecDeque<_>, VecDeque<_>) = idle
            .drain(..)
            .partition(|h: &IdleHandle<M::Connection>| h.info.idle_for() > threshold);
         *idle = fresh;
         stale
      };

      let count = stale.len();
      for handle in stale {
         trace!(handle = %handle.info.id(), idle_for = ?handle.info.idle_for(), "reclaiming idle handle");
         self.inner.manager.close(handle.conn).await;
      }

      if count > 0 {
         debug!(count, ?threshold, "reclaimed idle handles");
      }

      count
   }

   /// Close all handles and stop lending new ones.
   ///
   /// Idle handles are closed right away. Checked-out handles are closed as
   /// they come back, and this call waits until all of them have. Waiting and
   /// later acquirers fail with [`Error::PoolClosed`]. Calling it again is a
   /// no-op.
   ///
   /// The wait has no limit: a task that still holds a handle of this pool
   /// must not call it, or it waits forever. Use
   /// [`shutdown_timeout`](Self::shutdown_timeout) to bound the wait.
   pub async fn shutdown(&self) {
      self.close_and_drain(None).await;
   }

   /// Like [`shutdown`](Self::shutdown), but stops waiting for checked-out
   /// handles after `timeout`.
   ///
   /// Returns `true` when every handle came back in time. Handles still out
   /// are closed whenever they are returned.
   pub async fn shutdown_timeout(&self, timeout: Duration) -> bool {
      self.close_and_drain(Some(timeout)).await
   }

   async fn close_and_drain(&self, timeout: Option<Duration>) -> bool {
      let inner = &self.inner;
      if inner.closed.swap(true, Ordering::SeqCst) {
         return inner.checked_out.load(Ordering::SeqCst) == 0;
      }

      debug!(
         checked_out = inner.checked_out.load(Ordering::SeqCst),
         "shutting down pool"
      );
      inner.close_idle().await;

      // Every slot coming back means every checked-out handle was returned
      let max = inner.config.max_handles() as u32;
      let all_slots = inner.slots.acquire_many(max);
      let drained = match timeout {
         None => all_slots.await.map(|permits| permits.forget()).is_ok(),
         Some(limit) => match tokio::time::timeout(limit, all_slots).await {
            Ok(permits) => permits.map(|permits| permits.forget()).is_ok(),
            Err(_) => {
               warn!(
                  ?limit,
                  checked_out = inner.checked_out.load(Ordering::SeqCst),
                  "shutdown timed out waiting for checked-out handles"
               );
               false
            }
         },
      };
      inner.slots.close();

      inner.close_idle().await;
      debug!(drained, "pool shut down");
      drained
   }

   pub fn is_closed(&self) -> bool {
      self.inner.is_closed()
   }

   pub fn stats(&self) -> PoolStats {
      let idle = self.inner.idle.lock().len();
      PoolStats {
         capacity: self.inner.config.capacity,
         overflow: self.inner.config.overflow,
         idle,
         checked_out: self.inner.checked_out.load(Ordering::SeqCst),
         waiting: self.inner.waiting.load(Ordering::SeqCst),
      }
   }

   /// Snapshot of the idle set, oldest first
   pub fn idle_handles(&self) -> Vec<HandleInfo> {
      self
         .inner
         .idle
         .lock()
         .iter()
         .map(|h| h.info.clone())
         .collect()
   }

   pub fn config(&self) -> &PoolConfig {
      &self.inner.config
   }

   pub fn manager(&self) -> &M {
      &self.inner.manager
   }
}

impl<M: ManageConnection> Clone for Pool<M> {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Pool")
         .field("config", &self.inner.config)
         .field("stats", &self.stats())
         .field("closed", &self.is_closed())
         .finish()
   }
}

impl<M: ManageConnection> PoolInner<M> {
   fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   async fn take_idle(&self) -> Option<(HandleInfo, M::Connection)> {
      loop {
         let IdleHandle { mut info, mut conn } = self.idle.lock().pop_front()?;

         if let Some(limit) = self.config.idle_timeout
            && info.idle_for() > limit
         {
            debug!(handle = %info.id(), idle_for = ?info.idle_for(), "closing handle idle past timeout");
            self.manager.close(conn).await;
            continue;
         }

         if self.config.test_on_acquire && !self.manager.is_valid(&mut conn).await {
            debug!(handle = %info.id(), "closing handle that failed validation");
            self.manager.close(conn).await;
            continue;
         }

         info.touch();
         return Some((info, conn));
      }
   }

   async fn open(&self) -> Result<(HandleInfo, M::Connection)> {
      let Connected {
         session_id,
         connection,
      } = self.manager.connect().await.map_err(|e| {
         warn!(error = %e, "failed to open connection");
         Error::ConnectionFailure(Box::new(e))
      })?;

      let id = HandleId::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
      debug!(handle = %id, session_id, "opened new handle");

      Ok((HandleInfo::new(id, session_id), connection))
   }

   /// Put a returned connection into the idle set.
   ///
   /// Gives the connection back when the pool is closed or the idle set is
   /// full; the caller must close it.
   fn try_put_idle(&self, mut info: HandleInfo, conn: M::Connection) -> Option<M::Connection> {
      let mut idle = self.idle.lock();
      if self.is_closed() || idle.len() >= self.config.capacity {
         return Some(conn);
      }

      info.touch();
      idle.push_back(IdleHandle { info, conn });
      None
   }

   async fn close_idle(&self) -> usize {
      let drained: Vec<_> = self.idle.lock().drain(..).collect();
      let count = drained.len();

      for handle in drained {
         self.manager.close(handle.conn).await;
      }

      count
   }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
   fn new(counter: &'a AtomicUsize) -> Self {
      counter.fetch_add(1, Ordering::SeqCst);
      Self(counter)
   }
}

impl Drop for WaitingGuard<'_> {
   fn drop(&mut self) {
      self.0.fetch_sub(1, Ordering::SeqCst);
   }
}

/// RAII guard for a checked-out connection handle.
///
/// Derefs to the underlying connection. Return it with [`Pool::release`], or
/// let it drop. Either way the slot it holds is freed exactly once.
#[must_use = "if unused, the handle is immediately returned to the pool"]
pub struct PooledHandle<M: ManageConnection> {
   conn: Option<M::Connection>,
   info: HandleInfo,
   needs_reset: bool,
   pool: Arc<PoolInner<M>>,
   // Declared last so the slot frees only after the connection is pooled
   _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledHandle<M> {
   pub fn info(&self) -> &HandleInfo {
      &self.info
   }

   pub fn id(&self) -> HandleId {
      self.info.id()
   }

   pub fn session_id(&self) -> u64 {
      self.info.session_id()
   }

   pub fn idle_for(&self) -> Duration {
      self.info.idle_for()
   }

   /// Flag the connection as carrying session state (e.g. an open
   /// transaction) that must be reset before anyone else uses it.
   pub fn mark_needs_reset(&mut self) {
      self.needs_reset = true;
   }

   pub fn clear_needs_reset(&mut self) {
      self.needs_reset = false;
   }

   pub fn needs_reset(&self) -> bool {
      self.needs_reset
   }

   /// Close the connection instead of returning it to the pool
   pub async fn close(mut self) {
      if let Some(conn) = self.conn.take() {
         debug!(handle = %self.info.id(), "closing handle");
         self.pool.manager.close(conn).await;
      }
   }
}

impl<M: ManageConnection> Deref for PooledHandle<M> {
   type Target = M::Connection;

   fn deref(&self) -> &Self::Target {
      self.conn.as_ref().expect("connection already taken")
   }
}

impl<M: ManageConnection> DerefMut for PooledHandle<M> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.info.touch();
      self.conn.as_mut().expect("connection already taken")
   }
}

impl<M: ManageConnection> fmt::Debug for PooledHandle<M> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PooledHandle")
         .field("info", &self.info)
         .field("needs_reset", &self.needs_reset)
         .finish()
   }
}

impl<M: ManageConnection> Drop for PooledHandle<M> {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         if self.needs_reset {
            warn!(
               handle = %self.info.id(),
               "handle dropped with pending session state; discarding connection"
            );
            drop(conn);
         } else if let Some(conn) = self.pool.try_put_idle(self.info.clone(), conn) {
            trace!(handle = %self.info.id(), "idle set full or pool closed; closing handle");
            drop(conn);
         }
      }

      self.pool.checked_out.fetch_sub(1, Ordering::SeqCst);
   }
}
