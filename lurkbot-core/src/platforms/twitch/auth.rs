use chrono::{DateTime, Duration, Utc};
use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Error;

const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Refresh the app token once fewer than this many seconds of validity
/// remain, rather than waiting for a 401.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    expires_in: u64,
    #[allow(dead_code)]
    token_type: String,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AppAccessToken {
    /// True when the token is expired or will be within `margin`.
    fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }
}

/// Holds the Helix app access token (client-credentials grant) and keeps
/// it fresh.
///
/// All callers share one token; refresh happens inside a single mutex
/// critical section, so concurrent callers never race two refreshes
/// against the token endpoint.
pub struct AppTokenManager {
    client_id: String,
    client_secret: String,
    http: ReqwestClient,
    token: Mutex<Option<AppAccessToken>>,
}

impl AppTokenManager {
    pub fn new(client_id: &str, client_secret: &str, http: ReqwestClient) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            http,
            token: Mutex::new(None),
        }
    }

    /// Returns a bearer token that is valid for at least the refresh
    /// margin, fetching a new one if necessary.
    pub async fn bearer_token(&self) -> Result<String, Error> {
        let mut guard = self.token.lock().await;
        if let Some(tok) = guard.as_ref() {
            if !tok.needs_refresh(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
                return Ok(tok.access_token.clone());
            }
            debug!("app access token within refresh margin; fetching a new one");
        }
        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    /// Drops the cached token so the next `bearer_token` call fetches a
    /// fresh one. Called after an authentication-rejected response.
    pub async fn invalidate(&self) {
        let mut guard = self.token.lock().await;
        *guard = None;
    }

    async fn fetch_token(&self) -> Result<AppAccessToken, Error> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("HTTP error fetching app token: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Auth(format!("Twitch token endpoint error: {e}")))?
            .json::<TwitchTokenResponse>()
            .await
            .map_err(|e| Error::Auth(format!("Parse error on token JSON: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(resp.expires_in as i64);
        info!("obtained Twitch app access token, expires_at={}", expires_at);

        Ok(AppAccessToken {
            access_token: resp.access_token,
            expires_at,
        })
    }
}
