use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// What one poll observed about a single streamer.
///
/// Produced per cycle from the Helix "Get Streams" response and discarded
/// afterwards; nothing here is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub user_login: String,
    pub user_name: String,
    pub is_live: bool,
    pub title: Option<String>,
    pub game_name: Option<String>,
    pub viewer_count: Option<u64>,
    pub thumbnail_url: Option<String>,
}

/// Single user record from the Helix "Get Users" endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    pub profile_image_url: String,
}

/// Per-streamer outcome of one polling cycle's state lookup.
#[derive(Debug, Clone)]
pub enum StreamObservation<'a> {
    Live(&'a StreamSnapshot),
    Offline,
    /// The lookup for this login failed this cycle; treat as "no new
    /// information" rather than as an offline observation.
    Unknown,
}

/// Result of a chunked bulk stream lookup.
///
/// Logins absent from `live` and not listed in `failed` were observed
/// offline; a failed chunk marks only its own logins as failed and leaves
/// results from other chunks intact.
#[derive(Debug, Default)]
pub struct BulkStreamLookup {
    pub live: HashMap<String, StreamSnapshot>,
    pub failed: HashSet<String>,
}

impl BulkStreamLookup {
    pub fn observe(&self, login: &str) -> StreamObservation<'_> {
        if self.failed.contains(login) {
            StreamObservation::Unknown
        } else if let Some(snapshot) = self.live.get(login) {
            StreamObservation::Live(snapshot)
        } else {
            StreamObservation::Offline
        }
    }
}
