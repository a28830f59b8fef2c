//! Open, query, and release one session at a time.
//!
//! With a single caller the pool keeps handing back the same connection, so
//! every cycle logs the same session id.
//!
//! ```text
//! cargo run --example connection_cycle -- [database path]
//! ```

use std::time::Duration;

use sqlite_session_pool::{CycleOptions, PoolConfig, connection_cycle, open_pool};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
   tracing_subscriber::fmt()
      .with_env_filter(
         EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sqlite_session_pool=info,sqlx_handle_pool=debug")),
      )
      .init();

   let path = std::env::args()
      .nth(1)
      .unwrap_or_else(|| "connection_cycle.db".to_string());

   let config = PoolConfig {
      capacity: 5,
      overflow: 2,
      acquire_timeout: Duration::from_secs(10),
      ..Default::default()
   };
   let pool = open_pool(&path, config)?;

   let records = connection_cycle(&pool, &CycleOptions::default()).await?;
   println!("{}", serde_json::to_string_pretty(&records)?);
   println!("{:?}", pool.stats());

   pool.shutdown().await;
   Ok(())
}
