use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mockall::mock;
use tokio::sync::Mutex;

use lurkbot_common::Error;
use lurkbot_common::models::subscription::NotificationEvent;
use lurkbot_common::models::twitch::{BulkStreamLookup, StreamSnapshot, TwitchUser};
use lurkbot_common::traits::platform_traits::{StreamNotifier, StreamStateSource};
use lurkbot_common::traits::repository_traits::GuildConfigRepository;

use lurkbot_core::repositories::memory::MemoryGuildConfigRepository;
use lurkbot_core::tasks::{LiveKey, LiveSetTracker, StreamWatcher};

fn snapshot(login: &str, title: &str) -> StreamSnapshot {
    StreamSnapshot {
        user_login: login.to_string(),
        user_name: login.to_string(),
        is_live: true,
        title: Some(title.to_string()),
        game_name: Some("Just Chatting".to_string()),
        viewer_count: Some(10),
        thumbnail_url: None,
    }
}

fn lookup_live(snaps: Vec<StreamSnapshot>) -> BulkStreamLookup {
    let mut lookup = BulkStreamLookup::default();
    for snap in snaps {
        lookup.live.insert(snap.user_login.clone(), snap);
    }
    lookup
}

fn lookup_failed(logins: &[&str]) -> BulkStreamLookup {
    let mut lookup = BulkStreamLookup::default();
    lookup.failed.extend(logins.iter().map(|l| l.to_string()));
    lookup
}

/// Stream source that replays one scripted lookup per cycle.
struct ScriptedSource {
    cycles: Mutex<VecDeque<BulkStreamLookup>>,
}

impl ScriptedSource {
    fn new(cycles: Vec<BulkStreamLookup>) -> Arc<Self> {
        Arc::new(Self {
            cycles: Mutex::new(cycles.into()),
        })
    }
}

#[async_trait]
impl StreamStateSource for ScriptedSource {
    async fn get_stream(&self, _login: &str) -> Result<Option<StreamSnapshot>, Error> {
        Ok(None)
    }

    async fn get_streams_bulk(&self, _logins: &[String]) -> BulkStreamLookup {
        self.cycles.lock().await.pop_front().unwrap_or_default()
    }

    async fn get_user(&self, _login: &str) -> Result<Option<TwitchUser>, Error> {
        Ok(None)
    }
}

/// Notifier that records every delivered event; can be told to fail.
#[derive(Default)]
struct RecordingNotifier {
    delivered: Mutex<Vec<NotificationEvent>>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn delivered(&self) -> Vec<NotificationEvent> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl StreamNotifier for RecordingNotifier {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Platform("delivery refused".into()));
        }
        self.delivered.lock().await.push(event.clone());
        Ok(())
    }
}

mock! {
    Notifier {}

    #[async_trait]
    impl StreamNotifier for Notifier {
        async fn deliver(&self, event: &NotificationEvent) -> Result<(), Error>;
    }
}

async fn registry_with(
    guild_id: &str,
    channel: Option<&str>,
    streamers: &[&str],
) -> Arc<MemoryGuildConfigRepository> {
    let repo = Arc::new(MemoryGuildConfigRepository::new());
    repo.ensure_guild(guild_id).await.unwrap();
    if let Some(channel) = channel {
        repo.set_notification_channel(guild_id, channel)
            .await
            .unwrap();
    }
    for login in streamers {
        repo.add_streamer(guild_id, login).await.unwrap();
    }
    repo
}

#[tokio::test]
async fn live_stream_notifies_exactly_once() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    let source = ScriptedSource::new(vec![
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
    ]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    for _ in 0..3 {
        watcher.run_cycle().await.unwrap();
    }

    let delivered = notifier.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].streamer_login, "alice");
    assert_eq!(delivered[0].channel_id, "chan1");
    assert!(delivered[0].content.contains("Hello"));
}

#[tokio::test]
async fn offline_then_live_again_notifies_again() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    let source = ScriptedSource::new(vec![
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
        BulkStreamLookup::default(), // observed offline
        lookup_live(vec![snapshot("alice", "Again")]),
    ]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    for _ in 0..4 {
        watcher.run_cycle().await.unwrap();
    }

    let delivered = notifier.delivered().await;
    assert_eq!(delivered.len(), 2);
    assert!(delivered[0].content.contains("Hello"));
    assert!(delivered[1].content.contains("Again"));
}

#[tokio::test]
async fn failed_lookup_changes_nothing() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    // Live, then a failed cycle, then live again: the failure must not
    // release the key, so no second notification fires.
    let source = ScriptedSource::new(vec![
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_failed(&["alice"]),
        lookup_live(vec![snapshot("alice", "Hello")]),
    ]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    for _ in 0..3 {
        watcher.run_cycle().await.unwrap();
    }

    assert_eq!(notifier.delivered().await.len(), 1);
    assert!(watcher.tracker().contains(&LiveKey::new("g1", "alice")));
}

#[tokio::test]
async fn one_failed_login_does_not_block_another() {
    let registry = registry_with("g1", Some("chan1"), &["alice", "bob"]).await;
    // Alice's lookup fails while bob resolves live in the same cycle.
    let mut lookup = lookup_live(vec![snapshot("bob", "Bob stream")]);
    lookup.failed.insert("alice".to_string());
    let source = ScriptedSource::new(vec![lookup]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    watcher.run_cycle().await.unwrap();

    let delivered = notifier.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].streamer_login, "bob");
    assert!(watcher.tracker().contains(&LiveKey::new("g1", "bob")));
    assert!(!watcher.tracker().contains(&LiveKey::new("g1", "alice")));
}

#[tokio::test]
async fn failed_lookup_while_offline_does_not_notify() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    let source = ScriptedSource::new(vec![lookup_failed(&["alice"])]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    watcher.run_cycle().await.unwrap();

    assert!(notifier.delivered().await.is_empty());
    assert!(watcher.tracker().is_empty());
}

#[tokio::test]
async fn guilds_track_the_same_streamer_independently() {
    let registry = Arc::new(MemoryGuildConfigRepository::new());
    for (guild, chan) in [("g1", "chan1"), ("g2", "chan2")] {
        registry.ensure_guild(guild).await.unwrap();
        registry.set_notification_channel(guild, chan).await.unwrap();
        registry.add_streamer(guild, "alice").await.unwrap();
    }
    let source = ScriptedSource::new(vec![
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
    ]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry.clone(), source, notifier.clone());

    watcher.run_cycle().await.unwrap();

    let mut channels: Vec<String> = notifier
        .delivered()
        .await
        .iter()
        .map(|e| e.channel_id.clone())
        .collect();
    channels.sort();
    assert_eq!(channels, vec!["chan1", "chan2"]);

    // Removing the subscription in one guild leaves the other's live
    // state untouched.
    registry.remove_streamer("g1", "alice").await.unwrap();
    watcher.run_cycle().await.unwrap();
    assert!(!watcher.tracker().contains(&LiveKey::new("g1", "alice")));
    assert!(watcher.tracker().contains(&LiveKey::new("g2", "alice")));
    assert_eq!(notifier.delivered().await.len(), 2);
}

#[tokio::test]
async fn resubscribing_a_still_live_streamer_notifies_again() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    let source = ScriptedSource::new(vec![
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
    ]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry.clone(), source, notifier.clone());

    watcher.run_cycle().await.unwrap();
    registry.remove_streamer("g1", "alice").await.unwrap();
    watcher.run_cycle().await.unwrap();
    registry.add_streamer("g1", "alice").await.unwrap();
    watcher.run_cycle().await.unwrap();

    assert_eq!(notifier.delivered().await.len(), 2);
}

#[tokio::test]
async fn delivery_failure_is_not_retried() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    let source = ScriptedSource::new(vec![
        lookup_live(vec![snapshot("alice", "Hello")]),
        lookup_live(vec![snapshot("alice", "Hello")]),
    ]);
    let notifier = RecordingNotifier::new();
    notifier.fail.store(true, Ordering::SeqCst);
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    watcher.run_cycle().await.unwrap();
    watcher.run_cycle().await.unwrap();

    // One attempt, zero deliveries, and the key stays claimed.
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
    assert!(notifier.delivered().await.is_empty());
    assert!(watcher.tracker().contains(&LiveKey::new("g1", "alice")));
}

#[tokio::test]
async fn guild_without_channel_is_not_notified() {
    let registry = registry_with("g1", None, &["alice"]).await;
    let source = ScriptedSource::new(vec![lookup_live(vec![snapshot("alice", "Hello")])]);
    let notifier = RecordingNotifier::new();
    let watcher = StreamWatcher::new(registry, source, notifier.clone());

    watcher.run_cycle().await.unwrap();

    assert!(notifier.delivered().await.is_empty());
    assert!(watcher.tracker().is_empty());
}

#[tokio::test]
async fn custom_message_is_rendered_on_delivery() {
    let registry = registry_with("g1", Some("chan1"), &["alice"]).await;
    registry
        .set_custom_message("g1", "alice", "{streamer} hit go-live: {url}")
        .await
        .unwrap();
    let source = ScriptedSource::new(vec![lookup_live(vec![snapshot("alice", "Hello")])]);

    let mut mock = MockNotifier::new();
    mock.expect_deliver()
        .times(1)
        .withf(|event: &NotificationEvent| {
            event.content == "alice hit go-live: https://twitch.tv/alice"
        })
        .returning(|_| Ok(()));

    let watcher = StreamWatcher::new(registry, source, Arc::new(mock));
    watcher.run_cycle().await.unwrap();
}

#[tokio::test]
async fn concurrent_distinct_keys_all_claim() {
    let tracker = Arc::new(LiveSetTracker::new());
    let mut handles = Vec::new();
    for i in 0..16 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker.mark_live(LiveKey::new("g1", &format!("streamer{i}")))
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(tracker.len(), 16);
}

#[tokio::test]
async fn concurrent_marking_yields_one_winner_per_key() {
    let tracker = Arc::new(LiveSetTracker::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker.mark_live(LiveKey::new("g1", "alice"))
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(tracker.len(), 1);
}
