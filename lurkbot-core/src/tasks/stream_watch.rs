use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use lurkbot_common::models::twitch::StreamObservation;
use lurkbot_common::traits::platform_traits::{StreamNotifier, StreamStateSource};
use lurkbot_common::traits::repository_traits::GuildConfigRepository;

use crate::Error;
use crate::services::notification::build_notification;

/// One (guild, streamer) subscription. Logins are stored lowercased so a
/// key compares equal regardless of how the streamer was typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveKey {
    pub guild_id: String,
    pub streamer_login: String,
}

impl LiveKey {
    pub fn new(guild_id: &str, streamer_login: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            streamer_login: streamer_login.to_lowercase(),
        }
    }
}

/// The set of subscriptions currently known to be live. Marking a key
/// live both records it and reports whether it was newly inserted, so
/// checking and claiming a live transition is a single atomic step.
#[derive(Default)]
pub struct LiveSetTracker {
    inner: Mutex<HashSet<LiveKey>>,
}

impl LiveSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &LiveKey) -> bool {
        self.inner.lock().unwrap().contains(key)
    }

    /// Returns true only for the transition that first inserted the key.
    pub fn mark_live(&self, key: LiveKey) -> bool {
        self.inner.lock().unwrap().insert(key)
    }

    /// Returns true when the key was present, i.e. an offline transition.
    pub fn mark_offline(&self, key: &LiveKey) -> bool {
        self.inner.lock().unwrap().remove(key)
    }

    /// Drop keys whose subscription no longer exists, so a re-added
    /// streamer who stayed live the whole time notifies again.
    pub fn retain_subscribed(&self, subscribed: &HashSet<LiveKey>) {
        self.inner.lock().unwrap().retain(|k| subscribed.contains(k));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Polls stream state for every subscription and dispatches exactly one
/// notification per offline-to-live transition.
pub struct StreamWatcher {
    registry: Arc<dyn GuildConfigRepository>,
    source: Arc<dyn StreamStateSource>,
    notifier: Arc<dyn StreamNotifier>,
    tracker: LiveSetTracker,
}

impl StreamWatcher {
    pub fn new(
        registry: Arc<dyn GuildConfigRepository>,
        source: Arc<dyn StreamStateSource>,
        notifier: Arc<dyn StreamNotifier>,
    ) -> Self {
        Self {
            registry,
            source,
            notifier,
            tracker: LiveSetTracker::new(),
        }
    }

    pub fn tracker(&self) -> &LiveSetTracker {
        &self.tracker
    }

    /// One full poll cycle over every guild's subscriptions.
    ///
    /// Per subscription: a newly live stream claims its key in the
    /// tracker before delivery, a stream observed offline releases the
    /// key, and a failed lookup changes nothing so no transition is
    /// invented or lost. Delivery failures are logged and not rolled
    /// back; the stream is genuinely live and the next cycle must not
    /// repeat the notification.
    pub async fn run_cycle(&self) -> Result<(), Error> {
        let configs = self.registry.list_guild_configs().await?;

        let mut subscribed: HashSet<LiveKey> = HashSet::new();
        let mut lookup_logins: HashSet<String> = HashSet::new();
        for config in &configs {
            for sub in &config.streamers {
                subscribed.insert(LiveKey::new(&config.guild_id, &sub.login));
                if config.notification_channel.is_some() {
                    lookup_logins.insert(sub.login.to_lowercase());
                }
            }
        }

        let logins: Vec<String> = lookup_logins.into_iter().collect();
        let lookup = self.source.get_streams_bulk(&logins).await;

        let mut went_live = 0usize;
        let mut went_offline = 0usize;

        for config in &configs {
            let Some(channel_id) = &config.notification_channel else {
                continue;
            };
            for sub in &config.streamers {
                let key = LiveKey::new(&config.guild_id, &sub.login);
                match lookup.observe(&key.streamer_login) {
                    StreamObservation::Live(snapshot) => {
                        if !self.tracker.mark_live(key.clone()) {
                            continue;
                        }
                        went_live += 1;
                        let event = build_notification(
                            &config.guild_id,
                            channel_id,
                            &key.streamer_login,
                            sub.custom_message.as_deref(),
                            snapshot,
                        );
                        if let Err(e) = self.notifier.deliver(&event).await {
                            error!(
                                guild_id = %config.guild_id,
                                streamer = %key.streamer_login,
                                error = ?e,
                                "live notification delivery failed"
                            );
                        }
                    }
                    StreamObservation::Offline => {
                        if self.tracker.mark_offline(&key) {
                            went_offline += 1;
                            info!(
                                guild_id = %config.guild_id,
                                streamer = %key.streamer_login,
                                "stream went offline"
                            );
                        }
                    }
                    StreamObservation::Unknown => {
                        warn!(
                            guild_id = %config.guild_id,
                            streamer = %key.streamer_login,
                            "stream state unknown this cycle; keeping previous state"
                        );
                    }
                }
            }
        }

        // Unsubscribed keys must not linger, or re-adding a streamer who
        // never went offline would stay silent forever.
        self.tracker.retain_subscribed(&subscribed);

        debug!(
            checked = logins.len(),
            went_live,
            went_offline,
            tracked_live = self.tracker.len(),
            "poll cycle finished"
        );
        Ok(())
    }
}

/// Spawns the polling loop. Ticks that land while a cycle is still
/// running are skipped rather than queued, so cycles never overlap.
/// Shutdown is observed between cycles; an in-flight cycle always
/// finishes.
pub fn spawn_stream_watch_task(
    watcher: Arc<StreamWatcher>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = poll_interval.as_secs(), "stream watch task started");
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = watcher.run_cycle().await {
                        error!(error = ?e, "poll cycle failed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("stream watch task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_live_claims_key_exactly_once() {
        let tracker = LiveSetTracker::new();
        let key = LiveKey::new("g1", "Alice");
        assert!(tracker.mark_live(key.clone()));
        assert!(!tracker.mark_live(key.clone()));
        assert!(tracker.contains(&key));
    }

    #[test]
    fn keys_normalize_login_case() {
        assert_eq!(LiveKey::new("g1", "Alice"), LiveKey::new("g1", "alice"));
    }

    #[test]
    fn mark_offline_reports_transition() {
        let tracker = LiveSetTracker::new();
        let key = LiveKey::new("g1", "alice");
        assert!(!tracker.mark_offline(&key));
        tracker.mark_live(key.clone());
        assert!(tracker.mark_offline(&key));
        assert!(tracker.is_empty());
    }

    #[test]
    fn retain_subscribed_evicts_stale_keys() {
        let tracker = LiveSetTracker::new();
        tracker.mark_live(LiveKey::new("g1", "alice"));
        tracker.mark_live(LiveKey::new("g1", "bob"));

        let mut subscribed = HashSet::new();
        subscribed.insert(LiveKey::new("g1", "alice"));
        tracker.retain_subscribed(&subscribed);

        assert!(tracker.contains(&LiveKey::new("g1", "alice")));
        assert!(!tracker.contains(&LiveKey::new("g1", "bob")));
        // A fresh subscription for bob fires again.
        assert!(tracker.mark_live(LiveKey::new("g1", "bob")));
    }

    #[test]
    fn same_login_in_two_guilds_is_two_keys() {
        let tracker = LiveSetTracker::new();
        assert!(tracker.mark_live(LiveKey::new("g1", "alice")));
        assert!(tracker.mark_live(LiveKey::new("g2", "alice")));
        assert_eq!(tracker.len(), 2);
    }
}
