//! Pooling scenarios: sequential reuse, and a burst of held sessions

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx_session_toolkit::{Result, Session, SessionPool, with_session};
use tracing::{info, warn};

const CREATE_INSERT_TABLE: &str = "CREATE TABLE IF NOT EXISTS connpoolinsert (
   id INTEGER PRIMARY KEY,
   insert_time TEXT NOT NULL,
   session_id INTEGER NOT NULL
)";

const INSERT_ROW: &str = "INSERT INTO connpoolinsert (insert_time, session_id)
   VALUES (strftime('%Y-%m-%d %H:%M:%f', 'now'), $1)";

/// Options for [`connection_cycle`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleOptions {
   pub repeats: usize,
   /// How long each cycle holds its session before releasing it
   #[serde(with = "millis")]
   pub pause: Duration,
}

impl Default for CycleOptions {
   fn default() -> Self {
      Self {
         repeats: 15,
         pause: Duration::from_secs(1),
      }
   }
}

/// One cycle of [`connection_cycle`]
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
   pub cycle: usize,
   pub session_id: u64,
   pub server_time: String,
}

/// Open, query, and release a session `repeats` times in a row.
///
/// Each cycle runs one statement and returns its session before the next
/// starts, so the pool hands the same connection back every time.
pub async fn connection_cycle(pool: &SessionPool, options: &CycleOptions) -> Result<Vec<CycleRecord>> {
   let mut records = Vec::with_capacity(options.repeats);

   for cycle in 1..=options.repeats {
      info!(cycle, "opening a session");

      let record = with_session(pool, async |session| {
         let row = session
            .fetch_one("SELECT datetime('now') AS server_time", vec![])
            .await?;
         let server_time = row
            .and_then(|r| r.get("server_time").and_then(|v| v.as_str()).map(String::from))
            .unwrap_or_default();
         info!(cycle, session_id = session.session_id(), %server_time, "current time from database");

         tokio::time::sleep(options.pause).await;

         Ok(CycleRecord {
            cycle,
            session_id: session.session_id(),
            server_time,
         })
      })
      .await?;

      info!(cycle, "session returned to the pool");
      records.push(record);
   }

   Ok(records)
}

/// Options for [`insert_burst`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstOptions {
   /// Sessions to open, one after another
   pub sessions: usize,
   /// Delay after each session's insert
   #[serde(with = "millis")]
   pub pause: Duration,
   /// Held sessions unused for longer than this are released
   #[serde(with = "millis")]
   pub idle_threshold: Duration,
}

impl Default for BurstOptions {
   fn default() -> Self {
      Self {
         sessions: 30,
         pause: Duration::from_secs(5),
         idle_threshold: Duration::from_secs(30),
      }
   }
}

/// Outcome of [`insert_burst`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct BurstReport {
   /// Session ids in the order they were opened
   pub session_ids: Vec<u64>,
   pub committed: usize,
   pub rolled_back: usize,
   /// Sessions released early by the idle sweep
   pub released_idle: usize,
   /// Sessions still held when the burst ended
   pub released_at_end: usize,
   /// Error code of the acquire that ended the burst early
   pub stopped_by: Option<String>,
}

impl BurstReport {
   pub fn opened(&self) -> usize {
      self.session_ids.len()
   }
}

/// Open up to `sessions` sessions and keep them checked out, inserting one
/// row per session in its own transaction.
///
/// After every insert, held sessions idle for longer than `idle_threshold`
/// go back to the pool. The burst stops at the first session that cannot be
/// acquired (typically [`POOL_EXHAUSTED`](sqlx_session_toolkit::Error::error_code)).
/// Everything still held is released before returning.
pub async fn insert_burst(pool: &SessionPool, options: &BurstOptions) -> Result<BurstReport> {
   with_session(pool, async |session| {
      session.execute(CREATE_INSERT_TABLE, vec![]).await?;
      Ok(())
   })
   .await?;

   let mut report = BurstReport::default();
   let mut held: Vec<Session> = Vec::new();

   for n in 1..=options.sessions {
      info!(n, "opening session");
      let mut session = match Session::open(pool).await {
         Ok(session) => session,
         Err(e) => {
            warn!(n, error = %e, "could not open session");
            report.stopped_by = Some(e.error_code());
            break;
         }
      };

      let session_id = session.session_id();
      report.session_ids.push(session_id);

      let inserted = session
         .transaction(async |tx| {
            tx.execute(INSERT_ROW, vec![json!(session_id)]).await?;
            Ok(())
         })
         .await;

      match inserted {
         Ok(()) => {
            info!(session_id, "insert committed");
            report.committed += 1;
         }
         Err(e) => {
            warn!(session_id, error = %e, "insert rolled back");
            report.rolled_back += 1;
         }
      }
      held.push(session);

      report.released_idle += release_idle(&mut held, options.idle_threshold).await;

      tokio::time::sleep(options.pause).await;
   }

   for session in held {
      info!(session_id = session.session_id(), "releasing remaining session");
      release_or_warn(session).await;
      report.released_at_end += 1;
   }

   Ok(report)
}

/// Release held sessions unused for longer than `threshold`
async fn release_idle(held: &mut Vec<Session>, threshold: Duration) -> usize {
   let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(held)
      .into_iter()
      .partition(|s| s.idle_for() > threshold);
   *held = fresh;

   let count = stale.len();
   for session in stale {
      info!(session_id = session.session_id(), "releasing idle session");
      release_or_warn(session).await;
   }
   count
}

async fn release_or_warn(session: Session) {
   let session_id = session.session_id();
   if let Err(e) = session.release().await {
      warn!(session_id, error = %e, "release failed");
   }
}

mod millis {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer, Serializer};

   pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
   }

   pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
      u64::deserialize(deserializer).map(Duration::from_millis)
   }
}
