//! Provider collaborators and the bulk fetch processor
//!
//! The engine never talks HTTP itself. A `Fetcher` returns a usage series for
//! one (property, service) pair and an `Authenticator` keeps a valid session;
//! both are injected as trait objects.

pub mod bulk;
pub mod fixture;
pub mod validation;

pub use bulk::{BulkFetchProcessor, FetchUnit, MergeResult, UnitFailure};
pub use fixture::{check_credentials, FixtureFetcher, StaticAuthenticator};
pub use validation::{parse_provider_usage, validate_series};

use crate::config::Credentials;
use crate::error::{AuthError, FetchError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redboard_types::UsageSeries;

/// Retrieves usage data for one service from the provider
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, property_id: &str, consumer_id: &str)
        -> Result<UsageSeries, FetchError>;
}

/// A valid provider session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub subject: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Obtains and refreshes provider sessions
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return a valid session, re-authenticating if needed
    async fn ensure_valid(&self) -> Result<AuthSession, AuthError>;

    /// Drop the current session so the next `ensure_valid` re-authenticates
    async fn invalidate(&self);

    /// Validate and adopt new credentials
    async fn update_credentials(&self, credentials: Credentials) -> Result<(), AuthError>;
}
