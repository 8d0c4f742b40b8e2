use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lurkbot_common::models::twitch::StreamSnapshot;
use lurkbot_common::traits::platform_traits::StreamStateSource;
use lurkbot_common::traits::repository_traits::GuildConfigRepository;

use crate::Error;
use crate::platforms::discord::{DiscordMessageEvent, DiscordPlatform};
use crate::services::notification::build_notification;

/// Custom notification templates longer than this are rejected.
pub const MAX_CUSTOM_MESSAGE_LEN: usize = 1000;

const NO_PERMISSION_REPLY: &str = "❌ You don't have permission to use this command.";

/// Chat-command front end: parses prefixed guild messages, enforces the
/// admin/owner guards, and mutates the guild store.
pub struct CommandService {
    prefix: String,
    owner_id: String,
    registry: Arc<dyn GuildConfigRepository>,
    source: Arc<dyn StreamStateSource>,
    discord: Arc<DiscordPlatform>,
    shutdown_tx: watch::Sender<bool>,
}

/// Split `!cmd the rest` into a lowercased command name and the raw
/// remainder. Returns `None` for non-command messages.
fn split_command<'a>(content: &'a str, prefix: &str) -> Option<(String, &'a str)> {
    let stripped = content.strip_prefix(prefix)?;
    let stripped = stripped.trim_start();
    if stripped.is_empty() {
        return None;
    }
    match stripped.split_once(char::is_whitespace) {
        Some((cmd, rest)) => Some((cmd.to_lowercase(), rest.trim())),
        None => Some((stripped.to_lowercase(), "")),
    }
}

/// Accepts `<#123456>` channel mentions or bare channel ids.
fn parse_channel_mention(arg: &str) -> Option<String> {
    let raw = arg
        .strip_prefix("<#")
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(arg);
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        Some(raw.to_string())
    } else {
        None
    }
}

impl CommandService {
    pub fn new(
        prefix: &str,
        owner_id: &str,
        registry: Arc<dyn GuildConfigRepository>,
        source: Arc<dyn StreamStateSource>,
        discord: Arc<DiscordPlatform>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            prefix: prefix.to_string(),
            owner_id: owner_id.to_string(),
            registry,
            source,
            discord,
            shutdown_tx,
        }
    }

    async fn reply(&self, channel_id: &str, text: &str) {
        if let Err(e) = self.discord.send_message(channel_id, text).await {
            error!(channel_id, error = ?e, "failed to send command reply");
        }
    }

    fn is_owner(&self, author_id: &str) -> bool {
        author_id == self.owner_id
    }

    /// Guild admins and the bot owner pass; everyone else gets a denial
    /// reply.
    async fn require_admin(&self, evt: &DiscordMessageEvent, guild_id: &str) -> bool {
        if self.is_owner(&evt.author_id)
            || self
                .discord
                .member_is_admin(guild_id, &evt.author_id, &evt.author_roles)
        {
            return true;
        }
        warn!(
            guild_id,
            author = %evt.author_name,
            "denied admin command"
        );
        self.reply(&evt.channel_id, NO_PERMISSION_REPLY).await;
        false
    }

    async fn require_owner(&self, evt: &DiscordMessageEvent) -> bool {
        if self.is_owner(&evt.author_id) {
            return true;
        }
        warn!(author = %evt.author_name, "denied owner command");
        self.reply(&evt.channel_id, NO_PERMISSION_REPLY).await;
        false
    }

    /// Entry point for every inbound chat message.
    pub async fn handle_message(&self, evt: DiscordMessageEvent) {
        let Some((cmd, rest)) = split_command(&evt.content, &self.prefix) else {
            return;
        };
        let Some(guild_id) = evt.guild_id.clone() else {
            debug!("ignoring command outside a guild: {cmd}");
            return;
        };

        let outcome = match cmd.as_str() {
            "help" => {
                self.cmd_help(&evt).await;
                Ok(())
            }
            "addstreamer" => self.cmd_add_streamer(&evt, &guild_id, rest).await,
            "removestreamer" => self.cmd_remove_streamer(&evt, &guild_id, rest).await,
            "liststreamers" => self.cmd_list_streamers(&evt, &guild_id).await,
            "setchannel" => self.cmd_set_channel(&evt, &guild_id, rest).await,
            "setmessage" => self.cmd_set_message(&evt, &guild_id, rest).await,
            "testnotification" => self.cmd_test_notification(&evt, &guild_id, rest).await,
            "info" => self.cmd_info(&evt).await,
            "setstatus" => self.cmd_set_status(&evt, rest).await,
            "shutdown" => self.cmd_shutdown(&evt).await,
            other => {
                debug!("unknown command: {other}");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            error!(command = %cmd, guild_id, error = ?e, "command failed");
            self.reply(
                &evt.channel_id,
                "❌ Something went wrong running that command.",
            )
            .await;
        }
    }

    async fn cmd_help(&self, evt: &DiscordMessageEvent) {
        let p = &self.prefix;
        let text = format!(
            "**Stream notification commands** (admins only)\n\
             `{p}addstreamer <login>` - monitor a Twitch channel\n\
             `{p}removestreamer <login>` - stop monitoring a channel\n\
             `{p}liststreamers` - show monitored channels\n\
             `{p}setchannel <#channel>` - where notifications are posted\n\
             `{p}setmessage <login> <template>` - custom live message \
             ({{streamer}}, {{title}}, {{game}}, {{url}})\n\
             `{p}testnotification [login]` - send a sample notification"
        );
        self.reply(&evt.channel_id, &text).await;
    }

    async fn cmd_add_streamer(
        &self,
        evt: &DiscordMessageEvent,
        guild_id: &str,
        rest: &str,
    ) -> Result<(), Error> {
        if !self.require_admin(evt, guild_id).await {
            return Ok(());
        }
        let Some(login) = rest.split_whitespace().next() else {
            self.reply(
                &evt.channel_id,
                &format!("Usage: `{}addstreamer <twitch login>`", self.prefix),
            )
            .await;
            return Ok(());
        };

        // Validate against Helix and keep the canonical login casing.
        let user = match self.source.get_user(login).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.reply(
                    &evt.channel_id,
                    &format!("❌ Twitch channel `{login}` does not exist."),
                )
                .await;
                return Ok(());
            }
            Err(e) => {
                warn!(login, error = ?e, "streamer validation lookup failed");
                self.reply(
                    &evt.channel_id,
                    "❌ Couldn't reach Twitch to validate that channel. Try again shortly.",
                )
                .await;
                return Ok(());
            }
        };

        let added = self.registry.add_streamer(guild_id, &user.login).await?;
        let text = if added {
            info!(guild_id, login = %user.login, "streamer added");
            format!("✅ Now monitoring **{}**.", user.display_name)
        } else {
            format!("**{}** is already being monitored.", user.display_name)
        };
        self.reply(&evt.channel_id, &text).await;
        Ok(())
    }

    async fn cmd_remove_streamer(
        &self,
        evt: &DiscordMessageEvent,
        guild_id: &str,
        rest: &str,
    ) -> Result<(), Error> {
        if !self.require_admin(evt, guild_id).await {
            return Ok(());
        }
        let Some(login) = rest.split_whitespace().next() else {
            self.reply(
                &evt.channel_id,
                &format!("Usage: `{}removestreamer <twitch login>`", self.prefix),
            )
            .await;
            return Ok(());
        };

        let removed = self.registry.remove_streamer(guild_id, login).await?;
        let text = if removed {
            info!(guild_id, login, "streamer removed");
            format!("✅ Stopped monitoring **{}**.", login.to_lowercase())
        } else {
            format!("`{login}` wasn't being monitored.")
        };
        self.reply(&evt.channel_id, &text).await;
        Ok(())
    }

    async fn cmd_list_streamers(
        &self,
        evt: &DiscordMessageEvent,
        guild_id: &str,
    ) -> Result<(), Error> {
        if !self.require_admin(evt, guild_id).await {
            return Ok(());
        }
        let streamers = self.registry.list_streamers(guild_id).await?;
        let text = if streamers.is_empty() {
            format!(
                "No streamers are being monitored. Add one with `{}addstreamer <login>`.",
                self.prefix
            )
        } else {
            let mut lines = vec!["**Monitored streamers:**".to_string()];
            for login in &streamers {
                lines.push(format!("• {login}"));
            }
            lines.join("\n")
        };
        self.reply(&evt.channel_id, &text).await;
        Ok(())
    }

    async fn cmd_set_channel(
        &self,
        evt: &DiscordMessageEvent,
        guild_id: &str,
        rest: &str,
    ) -> Result<(), Error> {
        if !self.require_admin(evt, guild_id).await {
            return Ok(());
        }
        let Some(channel_id) = rest.split_whitespace().next().and_then(parse_channel_mention)
        else {
            self.reply(
                &evt.channel_id,
                &format!("Usage: `{}setchannel <#channel>`", self.prefix),
            )
            .await;
            return Ok(());
        };

        self.registry
            .set_notification_channel(guild_id, &channel_id)
            .await?;
        info!(guild_id, channel_id, "notification channel set");
        self.reply(
            &evt.channel_id,
            &format!("✅ Live notifications will be posted in <#{channel_id}>."),
        )
        .await;
        Ok(())
    }

    async fn cmd_set_message(
        &self,
        evt: &DiscordMessageEvent,
        guild_id: &str,
        rest: &str,
    ) -> Result<(), Error> {
        if !self.require_admin(evt, guild_id).await {
            return Ok(());
        }
        let Some((login, template)) = rest.split_once(char::is_whitespace) else {
            self.reply(
                &evt.channel_id,
                &format!("Usage: `{}setmessage <login> <template>`", self.prefix),
            )
            .await;
            return Ok(());
        };
        let template = template.trim();
        if template.chars().count() > MAX_CUSTOM_MESSAGE_LEN {
            self.reply(
                &evt.channel_id,
                &format!("❌ Custom messages are capped at {MAX_CUSTOM_MESSAGE_LEN} characters."),
            )
            .await;
            return Ok(());
        }

        let monitored = self.registry.list_streamers(guild_id).await?;
        if !monitored.contains(&login.to_lowercase()) {
            self.reply(
                &evt.channel_id,
                &format!("❌ `{login}` isn't monitored here. Add it first with `{}addstreamer`.", self.prefix),
            )
            .await;
            return Ok(());
        }

        self.registry
            .set_custom_message(guild_id, login, template)
            .await?;
        self.reply(
            &evt.channel_id,
            &format!("✅ Custom message set for **{}**.", login.to_lowercase()),
        )
        .await;
        Ok(())
    }

    async fn cmd_test_notification(
        &self,
        evt: &DiscordMessageEvent,
        guild_id: &str,
        rest: &str,
    ) -> Result<(), Error> {
        if !self.require_admin(evt, guild_id).await {
            return Ok(());
        }
        let Some(channel_id) = self.registry.get_notification_channel(guild_id).await? else {
            self.reply(
                &evt.channel_id,
                &format!(
                    "❌ No notification channel set. Use `{}setchannel <#channel>` first.",
                    self.prefix
                ),
            )
            .await;
            return Ok(());
        };

        let login = rest
            .split_whitespace()
            .next()
            .unwrap_or("teststreamer")
            .to_lowercase();
        let snapshot = StreamSnapshot {
            user_login: login.clone(),
            user_name: login.clone(),
            is_live: true,
            title: Some("This is a test notification".to_string()),
            game_name: Some("Just Chatting".to_string()),
            viewer_count: Some(42),
            thumbnail_url: None,
        };
        let custom = self.registry.get_custom_message(guild_id, &login).await?;
        let event =
            build_notification(guild_id, &channel_id, &login, custom.as_deref(), &snapshot);

        use lurkbot_common::traits::platform_traits::StreamNotifier;
        match self.discord.deliver(&event).await {
            Ok(()) => {
                self.reply(
                    &evt.channel_id,
                    &format!("✅ Test notification sent to <#{channel_id}>."),
                )
                .await;
            }
            Err(e) => {
                error!(guild_id, error = ?e, "test notification failed");
                self.reply(
                    &evt.channel_id,
                    "❌ Couldn't post in the notification channel. Check the bot's permissions there.",
                )
                .await;
            }
        }
        Ok(())
    }

    async fn cmd_info(&self, evt: &DiscordMessageEvent) -> Result<(), Error> {
        if !self.require_owner(evt).await {
            return Ok(());
        }
        let stats = self.registry.get_stats().await?;
        let text = format!(
            "**lurkbot v{}**\n\
             Guilds (cached): {}\n\
             Guilds (configured): {}\n\
             Monitored streamers: {}\n\
             Custom messages: {}",
            env!("CARGO_PKG_VERSION"),
            self.discord.guild_count(),
            stats.total_guilds,
            stats.total_streamers,
            stats.total_custom_messages,
        );
        self.reply(&evt.channel_id, &text).await;
        Ok(())
    }

    async fn cmd_set_status(&self, evt: &DiscordMessageEvent, rest: &str) -> Result<(), Error> {
        if !self.require_owner(evt).await {
            return Ok(());
        }
        if rest.is_empty() {
            self.reply(
                &evt.channel_id,
                &format!("Usage: `{}setstatus <text>`", self.prefix),
            )
            .await;
            return Ok(());
        }
        self.discord.set_status(rest)?;
        self.reply(&evt.channel_id, "✅ Status updated.").await;
        Ok(())
    }

    async fn cmd_shutdown(&self, evt: &DiscordMessageEvent) -> Result<(), Error> {
        if !self.require_owner(evt).await {
            return Ok(());
        }
        info!(author = %evt.author_name, "shutdown requested via command");
        self.reply(&evt.channel_id, "Shutting down. 👋").await;
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }
}
