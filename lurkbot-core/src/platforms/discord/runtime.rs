use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{
    self as gateway, CloseFrame, Config, Event, EventTypeFlags, Intents, MessageSender, Shard,
    StreamExt,
};
use twilight_http::Client as HttpClient;
use twilight_http::client::ClientBuilder;
use twilight_model::gateway::payload::incoming::{GuildDelete, Ready as ReadyPayload};
use twilight_model::gateway::payload::outgoing::UpdatePresence;
use twilight_model::gateway::presence::{ActivityType, MinimalActivity, Status};
use twilight_model::guild::Permissions;
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker, RoleMarker};
use twilight_model::util::Timestamp;
use twilight_util::builder::embed::{EmbedBuilder, EmbedFieldBuilder, ImageSource};

use lurkbot_common::models::subscription::NotificationEvent;
use lurkbot_common::traits::platform_traits::StreamNotifier;

use crate::Error;
use crate::services::notification::fill_thumbnail;

/// Twitch brand purple, used for live-notification embeds.
const EMBED_COLOR_TWITCH: u32 = 0x9146FF;

/// One inbound guild chat message, as handed to the command service.
#[derive(Debug, Clone)]
pub struct DiscordMessageEvent {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    /// Role ids the author carries in the guild, for the permission guard.
    pub author_roles: Vec<String>,
}

/// Gateway events the rest of the bot cares about.
#[derive(Debug, Clone)]
pub enum DiscordEvent {
    Message(DiscordMessageEvent),
    /// The bot was removed from a guild (kicked, banned, or the guild was
    /// deleted). Not emitted for guild outages.
    GuildRemoved { guild_id: String },
}

/// A GuildDelete with `unavailable` set signals an outage, not a removal;
/// only a real removal yields a guild id to clean up.
fn guild_removal(event: &GuildDelete) -> Option<String> {
    if event.unavailable.unwrap_or(false) {
        return None;
    }
    Some(event.id.to_string())
}

/// Shard runner: updates the in-memory cache and forwards inbound chat
/// messages to `tx`. Bot-authored messages are dropped here.
async fn shard_runner(
    mut shard: Shard,
    tx: UnboundedSender<DiscordEvent>,
    cache: Arc<InMemoryCache>,
) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        match item {
            Ok(event) => {
                cache.update(&event);

                match &event {
                    Event::Ready(ready) => {
                        let data: &ReadyPayload = ready.as_ref();
                        info!(
                            "Shard {shard_id} => READY as {} (ID={})",
                            data.user.name, data.user.id
                        );
                    }
                    Event::MessageCreate(msg) => {
                        if msg.author.bot {
                            debug!("Ignoring bot message from {}", msg.author.name);
                            continue;
                        }
                        let author_roles = msg
                            .member
                            .as_ref()
                            .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
                            .unwrap_or_default();

                        let _ = tx.send(DiscordEvent::Message(DiscordMessageEvent {
                            guild_id: msg.guild_id.map(|g| g.to_string()),
                            channel_id: msg.channel_id.to_string(),
                            author_id: msg.author.id.to_string(),
                            author_name: msg.author.name.clone(),
                            content: msg.content.clone(),
                            author_roles,
                        }));
                    }
                    Event::GuildDelete(del) => {
                        if let Some(guild_id) = guild_removal(del) {
                            info!("Shard {shard_id} => removed from guild {guild_id}");
                            let _ = tx.send(DiscordEvent::GuildRemoved { guild_id });
                        }
                    }
                    _ => {
                        trace!("Shard {shard_id} => unhandled event: {event:?}");
                    }
                }
            }
            Err(err) => {
                error!("Shard {shard_id} => error receiving event: {err:?}");
            }
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

/// Discord side of the bot: gateway shards for inbound commands, HTTP
/// client for outbound messages, in-memory cache for permission checks.
pub struct DiscordPlatform {
    token: String,

    rx: Mutex<Option<UnboundedReceiver<DiscordEvent>>>,

    shard_tasks: StdMutex<Vec<JoinHandle<()>>>,
    shard_senders: StdMutex<Vec<MessageSender>>,

    http: Option<Arc<HttpClient>>,
    cache: Option<Arc<InMemoryCache>>,
}

impl DiscordPlatform {
    pub fn new(token: String) -> Self {
        Self {
            token,
            rx: Mutex::new(None),
            shard_tasks: StdMutex::new(Vec::new()),
            shard_senders: StdMutex::new(Vec::new()),
            http: None,
            cache: None,
        }
    }

    /// Create the gateway shards and start their runner tasks.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.token.is_empty() {
            return Err(Error::Auth("Discord token is empty".into()));
        }
        if self.http.is_some() {
            info!("(DiscordPlatform) Already connected => skipping");
            return Ok(());
        }

        let (tx, rx) = unbounded_channel::<DiscordEvent>();
        {
            let mut guard = self.rx.lock().await;
            *guard = Some(rx);
        }

        let http_client = Arc::new(
            ClientBuilder::new()
                .token(self.token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );
        self.http = Some(http_client.clone());

        let cache = InMemoryCache::builder()
            .resource_types(ResourceType::GUILD | ResourceType::CHANNEL | ResourceType::ROLE)
            .build();
        let cache = Arc::new(cache);
        self.cache = Some(cache.clone());

        let config = Config::new(
            self.token.clone(),
            Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT,
        );

        let shards = gateway::create_recommended(&http_client, config, |_, b| b.build())
            .await
            .map_err(|e| Error::Platform(format!("create_recommended error: {e}")))?;

        for shard in shards {
            self.shard_senders.lock().unwrap().push(shard.sender());

            let tx_for_shard = tx.clone();
            let cache_for_shard = cache.clone();
            let handle = tokio::spawn(async move {
                shard_runner(shard, tx_for_shard, cache_for_shard).await;
            });
            self.shard_tasks.lock().unwrap().push(handle);
        }

        Ok(())
    }

    /// Close the shards and wait for their runner tasks to finish.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let senders = std::mem::take(&mut *self.shard_senders.lock().unwrap());
        for sender in &senders {
            let _ = sender.close(CloseFrame::NORMAL);
        }
        let tasks = std::mem::take(&mut *self.shard_tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }

        {
            let mut guard = self.rx.lock().await;
            *guard = None;
        }
        Ok(())
    }

    /// Await the next gateway event of interest. Returns `None` once the
    /// platform has been disconnected.
    pub async fn next_event(&self) -> Option<DiscordEvent> {
        let mut guard = self.rx.lock().await;
        match guard.as_mut() {
            Some(r) => r.recv().await,
            None => None,
        }
    }

    fn http(&self) -> Result<&Arc<HttpClient>, Error> {
        self.http
            .as_ref()
            .ok_or_else(|| Error::Platform("Discord HTTP client not connected".into()))
    }

    fn parse_channel_id(channel: &str) -> Result<Id<ChannelMarker>, Error> {
        let raw: u64 = channel
            .parse()
            .map_err(|_| Error::Platform(format!("Invalid channel ID: {channel}")))?;
        Ok(Id::new(raw))
    }

    pub async fn send_message(&self, channel: &str, message: &str) -> Result<(), Error> {
        let channel_id = Self::parse_channel_id(channel)?;
        self.http()?
            .create_message(channel_id)
            .content(message)
            .await
            .map_err(|e| Error::Platform(format!("Error sending Discord message: {e:?}")))?;
        Ok(())
    }

    /// Update the bot's presence on every shard.
    pub fn set_status(&self, status_text: &str) -> Result<(), Error> {
        let activity = MinimalActivity {
            kind: ActivityType::Playing,
            name: status_text.to_string(),
            url: None,
        };
        let payload = UpdatePresence::new(vec![activity.into()], false, None, Status::Online)
            .map_err(|e| Error::Platform(format!("Invalid presence payload: {e}")))?;
        let senders = self.shard_senders.lock().unwrap().clone();
        for sender in &senders {
            sender
                .command(&payload)
                .map_err(|e| Error::Platform(format!("Error updating presence: {e}")))?;
        }
        Ok(())
    }

    /// Permission guard input: does this member hold Administrator or
    /// Manage Guild in the given guild? Resolved from the role cache; the
    /// guild owner always passes.
    pub fn member_is_admin(&self, guild_id: &str, author_id: &str, author_roles: &[String]) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let Ok(guild_raw) = guild_id.parse::<u64>() else {
            return false;
        };
        let guild: Id<GuildMarker> = Id::new(guild_raw);

        if let Some(cached_guild) = cache.guild(guild) {
            if cached_guild.owner_id().to_string() == author_id {
                return true;
            }
        }

        // The @everyone role shares the guild's id and is not listed on
        // the member, so check it alongside the member's explicit roles.
        let role_ids = author_roles
            .iter()
            .filter_map(|r| r.parse::<u64>().ok())
            .chain(std::iter::once(guild_raw));

        for raw in role_ids {
            let role: Id<RoleMarker> = Id::new(raw);
            if let Some(cached_role) = cache.role(role) {
                let perms = cached_role.permissions;
                if perms.contains(Permissions::ADMINISTRATOR)
                    || perms.contains(Permissions::MANAGE_GUILD)
                {
                    return true;
                }
            }
        }
        false
    }

    /// Number of guilds currently visible through the cache.
    pub fn guild_count(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.iter().guilds().count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StreamNotifier for DiscordPlatform {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), Error> {
        let channel_id = Self::parse_channel_id(&event.channel_id)?;
        let snapshot = &event.snapshot;
        let stream_url = format!("https://twitch.tv/{}", event.streamer_login);

        let mut embed = EmbedBuilder::new()
            .title(format!("🔴 {} is now live!", snapshot.user_name))
            .url(&stream_url)
            .color(EMBED_COLOR_TWITCH);

        if let Some(title) = &snapshot.title {
            embed = embed.description(title);
        }
        if let Some(game) = &snapshot.game_name {
            embed = embed.field(EmbedFieldBuilder::new("Category", game).inline());
        }
        if let Some(viewers) = snapshot.viewer_count {
            embed = embed.field(EmbedFieldBuilder::new("Viewers", viewers.to_string()).inline());
        }
        if let Some(thumbnail) = &snapshot.thumbnail_url {
            match ImageSource::url(fill_thumbnail(thumbnail)) {
                Ok(source) => embed = embed.image(source),
                Err(e) => warn!(error = ?e, "skipping invalid thumbnail url"),
            }
        }
        if let Ok(now) = Timestamp::from_secs(chrono::Utc::now().timestamp()) {
            embed = embed.timestamp(now);
        }

        let embed = embed
            .validate()
            .map_err(|e| Error::Platform(format!("Invalid notification embed: {e}")))?
            .build();

        self.http()?
            .create_message(channel_id)
            .content(&event.content)
            .embeds(&[embed])
            .await
            .map_err(|e| Error::Platform(format!("Error sending live notification: {e:?}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild_delete(unavailable: Option<bool>) -> GuildDelete {
        GuildDelete {
            id: Id::new(42),
            unavailable,
        }
    }

    #[test]
    fn removal_from_guild_yields_its_id() {
        assert_eq!(
            guild_removal(&guild_delete(Some(false))),
            Some("42".to_string())
        );
        assert_eq!(guild_removal(&guild_delete(None)), Some("42".to_string()));
    }

    #[test]
    fn guild_outage_is_not_a_removal() {
        assert_eq!(guild_removal(&guild_delete(Some(true))), None);
    }
}
