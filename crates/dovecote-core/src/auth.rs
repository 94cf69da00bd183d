// Authorization capability contract
//
// Any authorization strategy - remote exchange, local code generation, or
// a caller-provided custom implementation - plugs in through this trait.
// The token cache only ever sees the trait: a stable fingerprint to key the
// cache, an apply_token call to refresh, and attach_to_request to decorate
// the outgoing upload form.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::transport::RequestForm;

/// A short-lived authorization token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Credential value attached to upload requests
    pub value: String,
    /// Raw authority response the value was extracted from
    pub raw: String,
    /// Expiry instant; `None` means the token is never cached
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Token with a fixed lifetime from now
    pub fn expiring(value: impl Into<String>, raw: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            raw: raw.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Token the cache must never hold on to
    pub fn uncacheable(value: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            raw: raw.into(),
            expires_at: None,
        }
    }

    /// Whether the token can still be served from the cache at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => false,
        }
    }
}

/// Pluggable authorization strategy
///
/// Two components with identical configuration must produce identical
/// fingerprints, and therefore share one cache entry and one refresh lock.
/// Implementations memoize the fingerprint after first computation.
#[async_trait]
pub trait AuthComponent: Send + Sync {
    /// Stable identity derived from configuration, never from runtime state
    fn fingerprint(&self) -> String;

    /// Produce a fresh token; may perform network I/O
    ///
    /// Must fail with a configuration error when required fields are unset.
    async fn apply_token(&self) -> Result<Token>;

    /// Add the authorization field to an outgoing upload form
    ///
    /// Pure apart from the mutation of `form`.
    fn attach_to_request(&self, form: &mut RequestForm, token: &Token);
}
