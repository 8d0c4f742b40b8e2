use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lurkbot_common::traits::platform_traits::{StreamNotifier, StreamStateSource};
use lurkbot_core::platforms::discord::{DiscordEvent, DiscordPlatform};
use lurkbot_core::platforms::twitch::TwitchHelixClient;
use lurkbot_core::repositories::select_backend;
use lurkbot_core::services::CommandService;
use lurkbot_core::tasks::{StreamWatcher, spawn_stream_watch_task};

#[derive(Parser, Debug, Clone)]
#[command(name = "lurkbot-server")]
#[command(about = "Twitch live-stream notification bot for Discord")]
struct Args {
    /// Postgres connection string. Falls back to an in-memory store when
    /// absent or unreachable.
    #[arg(long, env = "DATABASE_URL")]
    db_url: Option<String>,

    /// Seconds between stream-state poll cycles.
    #[arg(long, default_value = "120")]
    poll_interval_secs: u64,

    /// Chat command prefix.
    #[arg(long, default_value = "!")]
    command_prefix: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!("lurkbot-server starting...");

    let discord_token = required_env("DISCORD_TOKEN")?;
    let twitch_client_id = required_env("TWITCH_CLIENT_ID")?;
    let twitch_client_secret = required_env("TWITCH_CLIENT_SECRET")?;
    let owner_id = required_env("OWNER_ID")?;

    let registry = select_backend(args.db_url.as_deref()).await?;

    let twitch = Arc::new(TwitchHelixClient::new(
        &twitch_client_id,
        &twitch_client_secret,
    ));

    let mut discord = DiscordPlatform::new(discord_token);
    discord.connect().await.context("Discord connect failed")?;
    let discord = Arc::new(discord);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = Arc::new(StreamWatcher::new(
        registry.clone(),
        twitch.clone() as Arc<dyn StreamStateSource>,
        discord.clone() as Arc<dyn StreamNotifier>,
    ));
    let watch_handle = spawn_stream_watch_task(
        watcher,
        Duration::from_secs(args.poll_interval_secs),
        shutdown_rx.clone(),
    );

    let commands = CommandService::new(
        &args.command_prefix,
        &owner_id,
        registry.clone(),
        twitch as Arc<dyn StreamStateSource>,
        discord.clone(),
        shutdown_tx.clone(),
    );

    info!(
        poll_interval_secs = args.poll_interval_secs,
        prefix = %args.command_prefix,
        "lurkbot-server running; press Ctrl-C to stop"
    );

    let mut shutdown_watch = shutdown_rx.clone();
    loop {
        tokio::select! {
            maybe_evt = discord.next_event() => {
                match maybe_evt {
                    Some(DiscordEvent::Message(evt)) => commands.handle_message(evt).await,
                    Some(DiscordEvent::GuildRemoved { guild_id }) => {
                        info!(guild_id, "removed from guild; dropping its configuration");
                        if let Err(e) = registry.delete_guild(&guild_id).await {
                            error!(guild_id, error = ?e, "guild cleanup failed");
                        }
                    }
                    None => {
                        error!("Discord event stream closed; shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down");
                break;
            }
            changed = shutdown_watch.changed() => {
                if changed.is_err() || *shutdown_watch.borrow() {
                    info!("shutdown signalled; stopping command loop");
                    break;
                }
            }
        }
    }

    // Let an in-flight poll cycle finish before the process exits.
    let _ = shutdown_tx.send(true);
    if let Err(e) = watch_handle.await {
        error!(error = ?e, "stream watch task join failed");
    }
    if let Err(e) = discord.disconnect().await {
        error!(error = ?e, "Discord disconnect failed");
    }

    info!("lurkbot-server stopped");
    Ok(())
}
