//! Session lifecycle: login, restore on startup, logout.
//!
//! Tokens are persisted as two independently expiring entries. A restored
//! session is trusted without asking the server; an expired access token is
//! only discovered when a request fails.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, MAX_TOKEN_TTL_DAYS};
use crate::context::{AppContext, CredentialPair};
use crate::gateway::{extract_message, field_message, ApiGateway, Payload};

pub const LOGIN_PATH: &str = "/accounts/login/";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Rejected(String),

    #[error("Login response did not include both tokens")]
    MissingTokens,

    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl StoredToken {
    fn live(self, now: DateTime<Utc>) -> Option<String> {
        (self.expires_at > now).then_some(self.value)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    access: Option<StoredToken>,
    refresh: Option<StoredToken>,
}

/// Durable token storage in a small JSON file
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenStore {
    /// Lifetimes are clamped to `[0, MAX_TOKEN_TTL_DAYS]` so expiries stay representable
    pub fn new(path: impl Into<PathBuf>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let max = Duration::days(MAX_TOKEN_TTL_DAYS);
        Self {
            path: path.into(),
            access_ttl: access_ttl.clamp(Duration::zero(), max),
            refresh_ttl: refresh_ttl.clamp(Duration::zero(), max),
        }
    }

    /// `<data_dir>/clinidesk/session.json` with the configured lifetimes
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let path = Config::data_dir()?.join("session.json");
        Ok(Self::new(path, config.access_token_ttl(), config.refresh_token_ttl()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, pair: &CredentialPair) -> Result<(), SessionError> {
        self.save_at(pair, Utc::now())
    }

    pub fn save_at(&self, pair: &CredentialPair, now: DateTime<Utc>) -> Result<(), SessionError> {
        let stored = StoredSession {
            access: Some(StoredToken {
                value: pair.access_token.clone(),
                expires_at: now + self.access_ttl,
            }),
            refresh: Some(StoredToken {
                value: pair.refresh_token.clone(),
                expires_at: now + self.refresh_ttl,
            }),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<CredentialPair>, SessionError> {
        self.load_at(Utc::now())
    }

    /// Returns the pair only when both entries are still live. A file left
    /// with a single live entry is removed so no half session survives.
    pub fn load_at(&self, now: DateTime<Utc>) -> Result<Option<CredentialPair>, SessionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredSession = serde_json::from_str(&content)?;
        let access = stored.access.and_then(|t| t.live(now));
        let refresh = stored.refresh.and_then(|t| t.live(now));

        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(CredentialPair {
                access_token,
                refresh_token,
            })),
            _ => {
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Login failures report the body's `error` field first
fn login_failure_message(data: &Payload) -> String {
    match data {
        Payload::Json(value) => field_message(value, "error").unwrap_or_else(|| extract_message(data)),
        Payload::Text(_) => extract_message(data),
    }
}

fn token_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    ctx: AppContext,
    store: TokenStore,
}

impl SessionStore {
    pub fn new(ctx: AppContext, store: TokenStore) -> Self {
        Self { ctx, store }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn is_logged_in(&self) -> bool {
        self.ctx.is_authenticated()
    }

    /// Exchange username and password for a credential pair. Prior state is
    /// left untouched unless the server hands back both tokens.
    pub async fn login(
        &self,
        gateway: &ApiGateway,
        username: &str,
        password: &str,
    ) -> Result<CredentialPair, SessionError> {
        let body = json!({ "username": username, "password": password });
        let response = gateway.post(LOGIN_PATH, Some(&body)).await;

        if !response.ok {
            let message = login_failure_message(&response.data);
            self.ctx.publish_error(message.clone());
            return Err(SessionError::Rejected(message));
        }

        let tokens = response
            .json()
            .and_then(|v| Some((token_field(v, "access")?, token_field(v, "refresh")?)));
        let Some((access_token, refresh_token)) = tokens else {
            let err = SessionError::MissingTokens;
            self.ctx.publish_error(err.to_string());
            return Err(err);
        };

        let pair = CredentialPair {
            access_token,
            refresh_token,
        };

        if let Err(e) = self.store.save(&pair) {
            warn!(error = %e, "could not persist session, staying logged in for this run");
        }
        self.ctx.set_credentials(pair.clone());
        self.ctx.clear_status();
        info!(username, "logged in");

        Ok(pair)
    }

    pub fn restore(&self) -> Option<CredentialPair> {
        match self.store.load() {
            Ok(Some(pair)) => {
                info!("restored saved session");
                self.ctx.set_credentials(pair.clone());
                Some(pair)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "discarding unreadable session file");
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "could not remove session file");
                }
                None
            }
        }
    }

    pub fn logout(&self) {
        self.ctx.clear_credentials();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "could not remove session file");
        }
        info!("logged out");
    }
}
