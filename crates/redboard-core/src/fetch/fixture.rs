//! Offline provider backed by local files
//!
//! `FixtureFetcher` serves provider usage payloads from
//! `<root>/<property_id>/<consumer_id>.json`, and `StaticAuthenticator`
//! validates credentials locally. Together they let the CLI and tests drive
//! full refresh cycles without network access.

use super::validation::parse_provider_usage;
use super::{AuthSession, Authenticator, Fetcher};
use crate::config::Credentials;
use crate::error::{AuthError, FetchError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use redboard_types::UsageSeries;
use std::path::PathBuf;
use tracing::debug;

pub struct FixtureFetcher {
    root: PathBuf,
}

impl FixtureFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn payload_path(&self, property_id: &str, consumer_id: &str) -> PathBuf {
        self.root
            .join(sanitize(property_id))
            .join(format!("{}.json", sanitize(consumer_id)))
    }
}

/// Keep identifiers from escaping the fixture root
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, property_id: &str, consumer_id: &str) -> Result<UsageSeries, FetchError> {
        let path = self.payload_path(property_id, consumer_id);
        debug!(path = %path.display(), "Reading usage fixture");

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::Network(format!("{}: {}", path.display(), e)))?;
        let payload: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| FetchError::Validation(format!("{}: {}", path.display(), e)))?;

        parse_provider_usage(&payload)
    }
}

/// How long a locally issued session stays valid
const SESSION_TTL_MINUTES: i64 = 60;

pub struct StaticAuthenticator {
    credentials: RwLock<Credentials>,
    session: RwLock<Option<AuthSession>>,
}

impl StaticAuthenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            session: RwLock::new(None),
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.read().is_some()
    }
}

/// Shape checks on credentials before they are accepted
pub fn check_credentials(credentials: &Credentials) -> Result<(), AuthError> {
    let username = credentials.username.trim();
    let Some((user, domain)) = username.split_once('@') else {
        return Err(AuthError::Rejected("username must be an email address".into()));
    };
    if user.is_empty() || !domain.contains('.') {
        return Err(AuthError::Rejected("username must be an email address".into()));
    }
    if credentials.client_id.trim().len() < 5 {
        return Err(AuthError::Rejected(
            "client id must be at least 5 characters".into(),
        ));
    }
    if credentials.secret.is_empty() {
        return Err(AuthError::Rejected("secret must not be empty".into()));
    }
    Ok(())
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn ensure_valid(&self) -> Result<AuthSession, AuthError> {
        let now = Utc::now();
        if let Some(session) = self.session.read().as_ref() {
            if session.expires_at.map_or(true, |at| at > now) {
                return Ok(session.clone());
            }
        }

        let credentials = self.credentials.read().clone();
        check_credentials(&credentials)?;

        let session = AuthSession {
            subject: credentials.username.trim().to_lowercase(),
            expires_at: Some(now + Duration::minutes(SESSION_TTL_MINUTES)),
        };
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    async fn invalidate(&self) {
        *self.session.write() = None;
    }

    async fn update_credentials(&self, credentials: Credentials) -> Result<(), AuthError> {
        check_credentials(&credentials)?;
        *self.credentials.write() = credentials;
        *self.session.write() = None;
        Ok(())
    }
}
