use async_trait::async_trait;

use crate::error::Error;
use crate::models::subscription::NotificationEvent;
use crate::models::twitch::{BulkStreamLookup, StreamSnapshot, TwitchUser};

/// Read-only view of live/offline state on the streaming platform.
#[async_trait]
pub trait StreamStateSource: Send + Sync {
    /// Current stream state for a single login, `None` when offline.
    /// Transient upstream failures surface as `Err`; the caller decides
    /// whether that means "skip this cycle".
    async fn get_stream(&self, login: &str) -> Result<Option<StreamSnapshot>, Error>;

    /// Bulk variant, chunked internally at the platform's batch limit.
    /// Fail-soft: chunk failures are reported per-login in the result
    /// instead of aborting the whole lookup.
    async fn get_streams_bulk(&self, logins: &[String]) -> BulkStreamLookup;

    /// User lookup, used to validate and canonicalize a login before it
    /// enters the monitoring list.
    async fn get_user(&self, login: &str) -> Result<Option<TwitchUser>, Error>;
}

/// Delivers a rendered notification to its destination channel.
/// Best-effort: a failed delivery is the caller's to log, never retried
/// within the same cycle and never rolled back in the live-set tracker.
#[async_trait]
pub trait StreamNotifier: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), Error>;
}
