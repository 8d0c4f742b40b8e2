pub mod memory;
pub mod postgres;

use std::sync::Arc;

use tracing::{info, warn};

use lurkbot_common::traits::repository_traits::GuildConfigRepository;

use crate::Error;
use crate::repositories::memory::MemoryGuildConfigRepository;
use crate::repositories::postgres::PostgresGuildConfigRepository;

/// Connect to Postgres when a database URL is configured; otherwise (or
/// when the connection fails) fall back to the in-memory store, which
/// loses all subscriptions on restart.
pub async fn select_backend(
    database_url: Option<&str>,
) -> Result<Arc<dyn GuildConfigRepository>, Error> {
    let Some(url) = database_url else {
        warn!("no database URL configured; using in-memory guild store");
        return Ok(Arc::new(MemoryGuildConfigRepository::new()));
    };

    match PostgresGuildConfigRepository::connect(url).await {
        Ok(repo) => {
            info!("connected to Postgres guild store");
            Ok(Arc::new(repo))
        }
        Err(e) => {
            warn!(error = ?e, "Postgres unavailable; falling back to in-memory guild store");
            Ok(Arc::new(MemoryGuildConfigRepository::new()))
        }
    }
}
