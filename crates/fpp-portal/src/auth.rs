//! Bearer-token session with single-flight refresh.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::ApiErrorBody;

/// Tokens are refreshed this long before their stated expiry so an
/// in-flight download never races the deadline.
pub const REFRESH_MARGIN_SECS: i64 = 60;

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 900;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected (status {status})")]
    InvalidCredentials { status: u16 },
    #[error("authorization endpoint returned {status}: {detail}")]
    Endpoint { status: u16, detail: String },
    #[error("malformed authorization response: {0}")]
    MalformedResponse(String),
    #[error("authorization transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
struct Token {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    fn usable_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

enum SessionState {
    Fresh,
    Active(Token),
    /// The portal rejected the credential pair; the pair will keep being
    /// rejected, so the session never posts it again.
    Denied { status: u16 },
}

/// Holds the current bearer token for one credential pair. The token slot
/// sits behind one async mutex, so concurrent callers that find it stale
/// block on the single in-flight refresh and reuse its result. A credential
/// rejection latches: every later call fails fast with the original denial.
pub struct AuthSession {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    state: Mutex<SessionState>,
}

impl AuthSession {
    pub fn new(client: reqwest::Client, base_url: &str, credentials: Credentials) -> AuthSession {
        AuthSession {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            state: Mutex::new(SessionState::Fresh),
        }
    }

    /// Returns a token valid for at least the refresh margin, refreshing
    /// first when the cached one is missing or about to lapse.
    pub async fn ensure_valid(&self) -> Result<String, AuthError> {
        let mut slot = self.state.lock().await;
        match &*slot {
            SessionState::Denied { status } => {
                return Err(AuthError::InvalidCredentials { status: *status });
            }
            SessionState::Active(token) if token.usable_at(Utc::now()) => {
                return Ok(token.access_token.clone());
            }
            _ => {}
        }
        match self.authenticate().await {
            Ok(token) => {
                let access = token.access_token.clone();
                *slot = SessionState::Active(token);
                Ok(access)
            }
            Err(err) => {
                if let AuthError::InvalidCredentials { status } = &err {
                    *slot = SessionState::Denied { status: *status };
                }
                Err(err)
            }
        }
    }

    /// Drops the cached token so the next caller re-authenticates. A
    /// latched denial stays latched.
    pub async fn invalidate(&self) {
        let mut slot = self.state.lock().await;
        if matches!(&*slot, SessionState::Active(_)) {
            *slot = SessionState::Fresh;
        }
    }

    async fn authenticate(&self) -> Result<Token, AuthError> {
        let url = format!("{}/api/v1/authorize", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "username": self.credentials.username,
                "password": self.credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidCredentials {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let detail = ApiErrorBody::summarize(&body)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(AuthError::Endpoint {
                status: status.as_u16(),
                detail,
            });
        }

        let parsed: AuthResponse = response
            .json()
            .await
            .map_err(|err| AuthError::MalformedResponse(err.to_string()))?;
        let access_token = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing access_token".into()))?;
        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        info!(username = %self.credentials.username, lifetime, "authorized against portal");
        Ok(Token {
            access_token,
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }
}
