use lurkbot_common::models::subscription::NotificationEvent;
use lurkbot_common::models::twitch::StreamSnapshot;

/// Template used when a guild has not set a custom message for the
/// streamer. Placeholders: {streamer}, {title}, {game}, {url}.
pub const DEFAULT_NOTIFICATION_MESSAGE: &str =
    "🔴 {streamer} is now live! Playing {game} - {title} {url}";

pub const FALLBACK_TITLE: &str = "No title";
pub const FALLBACK_CATEGORY: &str = "No category";

/// Helix thumbnail URLs carry literal `{width}x{height}` placeholders.
const THUMBNAIL_WIDTH: &str = "640";
const THUMBNAIL_HEIGHT: &str = "360";

pub fn stream_url(login: &str) -> String {
    format!("https://twitch.tv/{login}")
}

pub fn fill_thumbnail(template: &str) -> String {
    template
        .replace("{width}", THUMBNAIL_WIDTH)
        .replace("{height}", THUMBNAIL_HEIGHT)
}

/// Substitute the message placeholders from a live snapshot. Missing
/// title or category fall back to readable defaults rather than empty
/// strings.
pub fn render_template(template: &str, login: &str, snapshot: &StreamSnapshot) -> String {
    template
        .replace("{streamer}", &snapshot.user_name)
        .replace(
            "{title}",
            snapshot.title.as_deref().unwrap_or(FALLBACK_TITLE),
        )
        .replace(
            "{game}",
            snapshot.game_name.as_deref().unwrap_or(FALLBACK_CATEGORY),
        )
        .replace("{url}", &stream_url(login))
}

/// Assemble the deliverable event for one live transition.
pub fn build_notification(
    guild_id: &str,
    channel_id: &str,
    login: &str,
    custom_message: Option<&str>,
    snapshot: &StreamSnapshot,
) -> NotificationEvent {
    let template = custom_message.unwrap_or(DEFAULT_NOTIFICATION_MESSAGE);
    NotificationEvent {
        guild_id: guild_id.to_string(),
        channel_id: channel_id.to_string(),
        streamer_login: login.to_string(),
        content: render_template(template, login, snapshot),
        snapshot: snapshot.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(title: Option<&str>, game: Option<&str>) -> StreamSnapshot {
        StreamSnapshot {
            user_login: "alice".to_string(),
            user_name: "Alice".to_string(),
            is_live: true,
            title: title.map(str::to_string),
            game_name: game.map(str::to_string),
            viewer_count: Some(7),
            thumbnail_url: Some("https://cdn.example/{width}x{height}.jpg".to_string()),
        }
    }

    #[test]
    fn default_template_renders_all_placeholders() {
        let snap = snapshot(Some("Speedrun"), Some("Celeste"));
        let rendered = render_template(DEFAULT_NOTIFICATION_MESSAGE, "alice", &snap);
        assert_eq!(
            rendered,
            "🔴 Alice is now live! Playing Celeste - Speedrun https://twitch.tv/alice"
        );
    }

    #[test]
    fn missing_title_and_game_use_fallbacks() {
        let snap = snapshot(None, None);
        let rendered = render_template(DEFAULT_NOTIFICATION_MESSAGE, "alice", &snap);
        assert!(rendered.contains("No title"));
        assert!(rendered.contains("No category"));
    }

    #[test]
    fn custom_message_overrides_default() {
        let snap = snapshot(Some("Hello"), None);
        let event = build_notification("g1", "c1", "alice", Some("{streamer} went live: {url}"), &snap);
        assert_eq!(event.content, "Alice went live: https://twitch.tv/alice");
        assert_eq!(event.guild_id, "g1");
        assert_eq!(event.channel_id, "c1");
    }

    #[test]
    fn missing_game_renders_fallback_not_empty() {
        let snap = snapshot(Some("Run"), None);
        let rendered = render_template("{streamer} live: {title} ({game}) {url}", "alice", &snap);
        assert_eq!(
            rendered,
            "Alice live: Run (No category) https://twitch.tv/alice"
        );
    }

    #[test]
    fn thumbnail_placeholders_are_filled() {
        assert_eq!(
            fill_thumbnail("https://cdn.example/{width}x{height}.jpg"),
            "https://cdn.example/640x360.jpg"
        );
    }
}
