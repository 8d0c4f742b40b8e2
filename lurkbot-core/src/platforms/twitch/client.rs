use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use lurkbot_common::models::twitch::{BulkStreamLookup, StreamSnapshot, TwitchUser};
use lurkbot_common::traits::platform_traits::StreamStateSource;

use crate::Error;
use crate::platforms::twitch::auth::AppTokenManager;

pub const HELIX_URL_BASE: &str = "https://api.twitch.tv/helix";

/// Helix accepts at most this many logins per "Get Streams" request;
/// larger lookups are chunked.
pub const HELIX_BATCH_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct HelixDataResponse<T> {
    data: Vec<T>,
}

/// Single stream record from the "Get Streams" endpoint.
#[derive(Debug, Clone, Deserialize)]
struct HelixStream {
    user_login: String,
    user_name: String,
    #[serde(rename = "type")]
    stream_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    game_name: String,
    #[serde(default)]
    viewer_count: Option<u64>,
    #[serde(default)]
    thumbnail_url: String,
}

impl HelixStream {
    fn into_snapshot(self) -> StreamSnapshot {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        StreamSnapshot {
            is_live: self.stream_type == "live",
            user_login: self.user_login,
            user_name: self.user_name,
            title: non_empty(self.title),
            game_name: non_empty(self.game_name),
            viewer_count: self.viewer_count,
            thumbnail_url: non_empty(self.thumbnail_url),
        }
    }
}

/// Client for the Helix endpoints this bot needs: stream state and user
/// lookups, authenticated with a shared app access token.
pub struct TwitchHelixClient {
    http: ReqwestClient,
    client_id: String,
    auth: AppTokenManager,
}

impl TwitchHelixClient {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        let http = ReqwestClient::new();
        Self {
            http: http.clone(),
            client_id: client_id.to_string(),
            auth: AppTokenManager::new(client_id, client_secret, http),
        }
    }

    async fn send(&self, url: &str, token: &str) -> Result<reqwest::Response, Error> {
        self.http
            .get(url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| Error::Platform(format!("Helix network error: {e}")))
    }

    /// Authenticated GET with the bounded auth-retry rule: a 401 triggers
    /// one token refresh and one retry of the same request, then the call
    /// fails. A 429 fails immediately; the next poll cycle retries
    /// naturally.
    async fn get_helix<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let token = self.auth.bearer_token().await?;
        let mut resp = self.send(url, &token).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Helix returned 401; refreshing app token and retrying once");
            self.auth.invalidate().await;
            let token = self.auth.bearer_token().await?;
            resp = self.send(url, &token).await?;
            if resp.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::Auth(
                    "Helix still rejects the app token after refresh".into(),
                ));
            }
        }

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Platform(
                "Helix rate limited (HTTP 429); giving up until the next cycle".into(),
            ));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Platform(format!(
                "Helix request failed: HTTP {status} => {body}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::Platform(format!("Helix parse error: {e}")))
    }
}

/// `?user_login=a&user_login=b...` for one chunk of logins.
fn build_login_query(param: &str, logins: &[String]) -> String {
    let mut query = String::new();
    for (i, login) in logins.iter().enumerate() {
        let sep = if i == 0 { '?' } else { '&' };
        query.push(sep);
        query.push_str(param);
        query.push('=');
        query.push_str(&urlencoding::encode(&login.to_lowercase()));
    }
    query
}

#[async_trait]
impl StreamStateSource for TwitchHelixClient {
    async fn get_stream(&self, login: &str) -> Result<Option<StreamSnapshot>, Error> {
        let url = format!(
            "{HELIX_URL_BASE}/streams{}",
            build_login_query("user_login", &[login.to_string()])
        );
        let resp: HelixDataResponse<HelixStream> = self.get_helix(&url).await?;
        Ok(resp
            .data
            .into_iter()
            .next()
            .map(HelixStream::into_snapshot)
            .filter(|s| s.is_live))
    }

    async fn get_streams_bulk(&self, logins: &[String]) -> BulkStreamLookup {
        let mut lookup = BulkStreamLookup::default();
        if logins.is_empty() {
            return lookup;
        }

        for chunk in logins.chunks(HELIX_BATCH_LIMIT) {
            let url = format!(
                "{HELIX_URL_BASE}/streams{}",
                build_login_query("user_login", chunk)
            );
            match self.get_helix::<HelixDataResponse<HelixStream>>(&url).await {
                Ok(resp) => {
                    debug!(
                        chunk_len = chunk.len(),
                        live_count = resp.data.len(),
                        "fetched stream chunk"
                    );
                    for stream in resp.data {
                        let snapshot = stream.into_snapshot();
                        if snapshot.is_live {
                            lookup.live.insert(snapshot.user_login.clone(), snapshot);
                        }
                    }
                }
                Err(e) => {
                    warn!(chunk_len = chunk.len(), error = ?e, "stream chunk lookup failed");
                    lookup
                        .failed
                        .extend(chunk.iter().map(|l| l.to_lowercase()));
                }
            }
        }
        lookup
    }

    async fn get_user(&self, login: &str) -> Result<Option<TwitchUser>, Error> {
        let url = format!(
            "{HELIX_URL_BASE}/users{}",
            build_login_query("login", &[login.to_string()])
        );
        let resp: HelixDataResponse<TwitchUser> = self.get_helix(&url).await?;
        Ok(resp.data.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_query_lowercases_and_joins() {
        let logins = vec!["Alice".to_string(), "BOB".to_string()];
        assert_eq!(
            build_login_query("user_login", &logins),
            "?user_login=alice&user_login=bob"
        );
    }

    #[test]
    fn live_stream_parses_into_snapshot() {
        let raw = serde_json::json!({
            "user_login": "alice",
            "user_name": "Alice",
            "type": "live",
            "title": "Hello",
            "game_name": "",
            "viewer_count": 42,
            "thumbnail_url": "https://cdn.example/{width}x{height}.jpg"
        });
        let stream: HelixStream = serde_json::from_value(raw).unwrap();
        let snap = stream.into_snapshot();
        assert!(snap.is_live);
        assert_eq!(snap.title.as_deref(), Some("Hello"));
        // Helix signals "no category" with an empty string
        assert!(snap.game_name.is_none());
        assert_eq!(snap.viewer_count, Some(42));
    }

    #[test]
    fn chunking_splits_at_batch_limit() {
        let logins: Vec<String> = (0..250).map(|i| format!("user{i}")).collect();
        let chunks: Vec<_> = logins.chunks(HELIX_BATCH_LIMIT).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }
}
