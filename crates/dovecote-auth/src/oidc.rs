// Remote token exchange component
//
// Posts a configured set of ticket fields to an authority endpoint and
// extracts the credential and its lifetime from the JSON response through
// configurable keys. Two components with the same authority and ticket
// share a fingerprint, and therefore one cached token.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use dovecote_core::auth::{AuthComponent, Token};
use dovecote_core::error::{DeliveryError, Result};
use dovecote_core::transport::{Method, RequestForm, Transport};

const DEFAULT_CREDENTIAL_KEY: &str = "access_token";
const DEFAULT_EXPIRES_KEY: &str = "expires_in";

/// Authorization through a form-POST token endpoint
pub struct OidcAuth {
    authority: Url,
    /// Ticket fields posted to the authority; sorted by key for fingerprinting
    ticket: BTreeMap<String, String>,
    credential_key: String,
    expires_key: String,
    transport: Arc<dyn Transport>,
    fingerprint: OnceLock<String>,
}

impl OidcAuth {
    /// Start building a component against an authority endpoint
    pub fn builder(authority: Url, transport: Arc<dyn Transport>) -> OidcAuthBuilder {
        OidcAuthBuilder {
            component: OidcAuth {
                authority,
                ticket: BTreeMap::new(),
                credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
                expires_key: DEFAULT_EXPIRES_KEY.to_string(),
                transport,
                fingerprint: OnceLock::new(),
            },
        }
    }
}

/// Fluent builder for [`OidcAuth`]
pub struct OidcAuthBuilder {
    component: OidcAuth,
}

impl OidcAuthBuilder {
    /// Add one ticket field (client id, client secret, grant type, ...)
    pub fn ticket_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.component.ticket.insert(key.into(), value.into());
        self
    }

    /// Add several ticket fields at once
    pub fn ticket_fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.component
            .ticket
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Response key holding the credential (default `access_token`)
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.component.credential_key = key.into();
        self
    }

    /// Response key holding the lifetime in seconds (default `expires_in`)
    pub fn expires_key(mut self, key: impl Into<String>) -> Self {
        self.component.expires_key = key.into();
        self
    }

    pub fn build(self) -> OidcAuth {
        self.component
    }
}

#[async_trait]
impl AuthComponent for OidcAuth {
    fn fingerprint(&self) -> String {
        self.fingerprint
            .get_or_init(|| {
                let mut hasher = Sha256::new();
                hasher.update(self.authority.as_str().as_bytes());
                // BTreeMap iteration is key-sorted: insertion order never
                // leaks into the fingerprint.
                for (key, value) in &self.ticket {
                    hasher.update(key.as_bytes());
                    hasher.update(value.as_bytes());
                }
                hex::encode(hasher.finalize())
            })
            .clone()
    }

    async fn apply_token(&self) -> Result<Token> {
        debug!(authority = %self.authority, "exchanging ticket for token");

        let mut form = RequestForm::new();
        for (key, value) in &self.ticket {
            form.add_field(key.clone(), value.clone());
        }

        let response = self
            .transport
            .send(&self.authority, form, Method::Post)
            .await?;
        if !response.is_success() {
            return Err(DeliveryError::TransportStatus {
                status: response.status,
            });
        }

        let raw = response.body;
        let json: Value = serde_json::from_str(&raw)
            .map_err(|e| DeliveryError::unrecognized(format!("authority response: {e}")))?;

        let value = match json.get(&self.credential_key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(DeliveryError::unrecognized(format!(
                    "authority response has no `{}` field",
                    self.credential_key
                )))
            }
        };

        let expires_at = match expire_seconds(&json, &self.expires_key) {
            secs if secs > 0 => Some(Utc::now() + Duration::seconds(secs)),
            _ => None,
        };

        Ok(Token {
            value,
            raw,
            expires_at,
        })
    }

    fn attach_to_request(&self, form: &mut RequestForm, token: &Token) {
        form.add_field("auth_token", token.value.clone());
    }
}

/// Lifetime in seconds at the given key; non-positive when absent or invalid
fn expire_seconds(json: &Value, key: &str) -> i64 {
    match json.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}
