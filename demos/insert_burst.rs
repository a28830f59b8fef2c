//! Hold more sessions than the pool allows.
//!
//! Each session inserts a row in its own transaction and stays checked out.
//! Sessions idle past the threshold are released; the burst ends once the
//! pool has nothing left to lend within its acquire timeout.
//!
//! ```text
//! cargo run --example insert_burst -- [database path]
//! ```

use std::time::Duration;

use sqlite_session_pool::{BurstOptions, PoolConfig, insert_burst, open_pool};
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
      .unwrap_or_else(|| "insert_burst.db".to_string());

   let config = PoolConfig {
      capacity: 7,
      overflow: 0,
      acquire_timeout: Duration::from_secs(10),
      ..Default::default()
   };
   let pool = open_pool(&path, config)?;

   let report = insert_burst(&pool, &BurstOptions::default()).await?;
   println!("{}", serde_json::to_string_pretty(&report)?);
   println!("{:?}", pool.stats());

   pool.shutdown().await;
   Ok(())
}
