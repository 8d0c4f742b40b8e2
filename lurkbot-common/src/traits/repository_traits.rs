use async_trait::async_trait;

use crate::error::Error;
use crate::models::subscription::{GuildConfig, RepositoryStats};

/// Storage for per-guild monitoring configuration.
///
/// Two interchangeable backends implement this (Postgres and in-memory);
/// the server picks one at startup and everything else depends only on the
/// trait. Streamer logins are lowercased before they reach an
/// implementation.
#[async_trait]
pub trait GuildConfigRepository: Send + Sync {
    /// Create the guild entry if it does not exist yet. Returns true if a
    /// new entry was created.
    async fn ensure_guild(&self, guild_id: &str) -> Result<bool, Error>;

    /// Remove the guild and everything attached to it.
    async fn delete_guild(&self, guild_id: &str) -> Result<bool, Error>;

    /// Full subscription snapshot, read once per polling cycle. Must
    /// reflect any add/remove performed through the command handlers.
    async fn list_guild_configs(&self) -> Result<Vec<GuildConfig>, Error>;

    /// Returns true if the streamer was newly added (false: already
    /// monitored in this guild).
    async fn add_streamer(&self, guild_id: &str, login: &str) -> Result<bool, Error>;

    /// Returns true if the streamer was removed. Also clears any custom
    /// message for that streamer.
    async fn remove_streamer(&self, guild_id: &str, login: &str) -> Result<bool, Error>;

    async fn list_streamers(&self, guild_id: &str) -> Result<Vec<String>, Error>;

    async fn set_notification_channel(&self, guild_id: &str, channel_id: &str)
        -> Result<(), Error>;

    async fn get_notification_channel(&self, guild_id: &str) -> Result<Option<String>, Error>;

    async fn set_custom_message(
        &self,
        guild_id: &str,
        login: &str,
        message: &str,
    ) -> Result<(), Error>;

    async fn get_custom_message(&self, guild_id: &str, login: &str)
        -> Result<Option<String>, Error>;

    async fn get_stats(&self) -> Result<RepositoryStats, Error>;
}
