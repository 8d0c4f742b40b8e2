use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use lurkbot_common::Error;
use lurkbot_common::models::subscription::{GuildConfig, RepositoryStats, StreamerSub};
use lurkbot_common::traits::repository_traits::GuildConfigRepository;

#[derive(Debug, Default, Clone)]
struct GuildEntry {
    notification_channel: Option<String>,
    streamers: Vec<String>,
    custom_messages: HashMap<String, String>,
}

/// Guild store backed by a plain HashMap. Used when no database URL is
/// configured or Postgres is unreachable; everything is lost on restart.
#[derive(Default)]
pub struct MemoryGuildConfigRepository {
    guilds: Mutex<HashMap<String, GuildEntry>>,
}

impl MemoryGuildConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuildConfigRepository for MemoryGuildConfigRepository {
    async fn ensure_guild(&self, guild_id: &str) -> Result<bool, Error> {
        let mut guilds = self.guilds.lock().await;
        if guilds.contains_key(guild_id) {
            return Ok(false);
        }
        guilds.insert(guild_id.to_string(), GuildEntry::default());
        Ok(true)
    }

    async fn delete_guild(&self, guild_id: &str) -> Result<bool, Error> {
        let mut guilds = self.guilds.lock().await;
        Ok(guilds.remove(guild_id).is_some())
    }

    async fn list_guild_configs(&self) -> Result<Vec<GuildConfig>, Error> {
        let guilds = self.guilds.lock().await;
        let mut configs: Vec<GuildConfig> = guilds
            .iter()
            .map(|(guild_id, entry)| GuildConfig {
                guild_id: guild_id.clone(),
                notification_channel: entry.notification_channel.clone(),
                streamers: entry
                    .streamers
                    .iter()
                    .map(|login| StreamerSub {
                        login: login.clone(),
                        custom_message: entry.custom_messages.get(login).cloned(),
                    })
                    .collect(),
            })
            .collect();
        configs.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
        Ok(configs)
    }

    async fn add_streamer(&self, guild_id: &str, login: &str) -> Result<bool, Error> {
        let login = login.to_lowercase();
        let mut guilds = self.guilds.lock().await;
        let entry = guilds.entry(guild_id.to_string()).or_default();
        if entry.streamers.contains(&login) {
            return Ok(false);
        }
        entry.streamers.push(login);
        Ok(true)
    }

    async fn remove_streamer(&self, guild_id: &str, login: &str) -> Result<bool, Error> {
        let login = login.to_lowercase();
        let mut guilds = self.guilds.lock().await;
        let Some(entry) = guilds.get_mut(guild_id) else {
            return Ok(false);
        };
        let before = entry.streamers.len();
        entry.streamers.retain(|s| s != &login);
        entry.custom_messages.remove(&login);
        Ok(entry.streamers.len() < before)
    }

    async fn list_streamers(&self, guild_id: &str) -> Result<Vec<String>, Error> {
        let guilds = self.guilds.lock().await;
        Ok(guilds
            .get(guild_id)
            .map(|e| e.streamers.clone())
            .unwrap_or_default())
    }

    async fn set_notification_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), Error> {
        let mut guilds = self.guilds.lock().await;
        let entry = guilds.entry(guild_id.to_string()).or_default();
        entry.notification_channel = Some(channel_id.to_string());
        Ok(())
    }

    async fn get_notification_channel(&self, guild_id: &str) -> Result<Option<String>, Error> {
        let guilds = self.guilds.lock().await;
        Ok(guilds
            .get(guild_id)
            .and_then(|e| e.notification_channel.clone()))
    }

    async fn set_custom_message(
        &self,
        guild_id: &str,
        login: &str,
        message: &str,
    ) -> Result<(), Error> {
        let login = login.to_lowercase();
        let mut guilds = self.guilds.lock().await;
        let Some(entry) = guilds.get_mut(guild_id) else {
            return Err(Error::Platform(format!(
                "guild {guild_id} has no configuration"
            )));
        };
        if !entry.streamers.contains(&login) {
            return Err(Error::Platform(format!(
                "{login} is not monitored in guild {guild_id}"
            )));
        }
        entry.custom_messages.insert(login, message.to_string());
        Ok(())
    }

    async fn get_custom_message(
        &self,
        guild_id: &str,
        login: &str,
    ) -> Result<Option<String>, Error> {
        let login = login.to_lowercase();
        let guilds = self.guilds.lock().await;
        Ok(guilds
            .get(guild_id)
            .and_then(|e| e.custom_messages.get(&login).cloned()))
    }

    async fn get_stats(&self) -> Result<RepositoryStats, Error> {
        let guilds = self.guilds.lock().await;
        Ok(RepositoryStats {
            total_guilds: guilds.len() as u64,
            total_streamers: guilds.values().map(|e| e.streamers.len() as u64).sum(),
            total_custom_messages: guilds
                .values()
                .map(|e| e.custom_messages.len() as u64)
                .sum(),
        })
    }
}
