//! Shared application context
//!
//! Holds the two pieces of state every component may touch: the current
//! credential pair and the process-wide status message. It is cloned into
//! whatever needs it (gateway, session store, background tasks) instead of
//! living in a global.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Bearer credentials issued by the login endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// The message shown in the status bar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct AppContext {
    credentials: Arc<RwLock<Option<CredentialPair>>>,
    status: Arc<RwLock<Option<StatusMessage>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        read(&self.credentials).clone()
    }

    pub fn access_token(&self) -> Option<String> {
        read(&self.credentials).as_ref().map(|c| c.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        read(&self.credentials).is_some()
    }

    pub(crate) fn set_credentials(&self, pair: CredentialPair) {
        *write(&self.credentials) = Some(pair);
    }

    pub(crate) fn clear_credentials(&self) {
        *write(&self.credentials) = None;
    }

    pub fn status(&self) -> Option<StatusMessage> {
        read(&self.status).clone()
    }

    pub fn publish_error(&self, text: impl Into<String>) {
        self.publish(StatusLevel::Error, text.into());
    }

    pub fn publish_info(&self, text: impl Into<String>) {
        self.publish(StatusLevel::Info, text.into());
    }

    pub fn clear_status(&self) {
        *write(&self.status) = None;
    }

    fn publish(&self, level: StatusLevel, text: String) {
        *write(&self.status) = Some(StatusMessage { level, text });
    }
}
