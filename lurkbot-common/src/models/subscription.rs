use serde::{Deserialize, Serialize};

use crate::models::twitch::StreamSnapshot;

/// One monitored streamer within a guild. The login is stored lowercased;
/// `custom_message` overrides the global notification template when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerSub {
    pub login: String,
    pub custom_message: Option<String>,
}

/// Per-guild subscription snapshot handed to the polling cycle.
#[derive(Debug, Clone)]
pub struct GuildConfig {
    pub guild_id: String,
    pub notification_channel: Option<String>,
    pub streamers: Vec<StreamerSub>,
}

/// The unit handed to the notification dispatcher. Produced exactly once
/// per detected offline -> live edge, never replayed.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub guild_id: String,
    pub channel_id: String,
    pub streamer_login: String,
    pub content: String,
    pub snapshot: StreamSnapshot,
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryStats {
    pub total_guilds: u64,
    pub total_streamers: u64,
    pub total_custom_messages: u64,
}
