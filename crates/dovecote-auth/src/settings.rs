// Typed authorization settings
//
// The shape an external configuration loader deserializes into; `build`
// turns it into a live component. The engine never inspects configuration
// shapes at runtime - everything is explicit construction from here on.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use dovecote_core::auth::AuthComponent;
use dovecote_core::error::Result;
use dovecote_core::transport::Transport;

use crate::oidc::OidcAuth;
use crate::totp::TotpAuth;

/// Authorization configuration, tagged by strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthSettings {
    /// Remote token exchange against an authority endpoint
    Oidc {
        authority: Url,
        #[serde(default)]
        ticket: BTreeMap<String, String>,
        #[serde(default)]
        credential_key: Option<String>,
        #[serde(default)]
        expires_key: Option<String>,
    },
    /// Time-based one-time codes, locally generated or remotely fetched
    Totp {
        #[serde(default)]
        secret: Option<String>,
        #[serde(default)]
        server: Option<Url>,
        #[serde(default)]
        period: Option<u64>,
    },
}

impl AuthSettings {
    /// Build the configured component over the given transport
    pub fn build(&self, transport: Arc<dyn Transport>) -> Result<Arc<dyn AuthComponent>> {
        match self {
            AuthSettings::Oidc {
                authority,
                ticket,
                credential_key,
                expires_key,
            } => {
                let mut builder = OidcAuth::builder(authority.clone(), transport)
                    .ticket_fields(ticket.iter().map(|(k, v)| (k.clone(), v.clone())));
                if let Some(key) = credential_key {
                    builder = builder.credential_key(key);
                }
                if let Some(key) = expires_key {
                    builder = builder.expires_key(key);
                }
                Ok(Arc::new(builder.build()))
            }
            AuthSettings::Totp {
                secret,
                server,
                period,
            } => {
                let mut builder = TotpAuth::builder().transport(transport);
                if let Some(secret) = secret {
                    builder = builder.secret(secret);
                }
                if let Some(server) = server {
                    builder = builder.server(server.clone());
                }
                if let Some(period) = period {
                    builder = builder.period(*period);
                }
                Ok(Arc::new(builder.build()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dovecote_core::stub::StubTransport;

    #[test]
    fn test_oidc_settings_build_a_component() {
        let settings: AuthSettings = serde_json::from_str(
            r#"{
                "type": "oidc",
                "authority": "http://auth.example.com/token",
                "ticket": {"client_id": "dovecote", "client_secret": "s3cret"},
                "credential_key": "ticket"
            }"#,
        )
        .unwrap();

        let component = settings.build(StubTransport::new()).unwrap();
        assert!(!component.fingerprint().is_empty());
    }

    #[test]
    fn test_totp_settings_build_a_component() {
        let settings: AuthSettings =
            serde_json::from_str(r#"{"type": "totp", "secret": "JBSWY3DPEHPK3PXP"}"#).unwrap();

        let component = settings.build(StubTransport::new()).unwrap();
        assert!(!component.fingerprint().is_empty());
    }

    #[test]
    fn test_contradictory_totp_settings_fail_to_build() {
        let settings: AuthSettings = serde_json::from_str(
            r#"{"type": "totp", "secret": "JBSWY3DPEHPK3PXP", "server": "http://codes.example.com/"}"#,
        )
        .unwrap();

        assert!(settings.build(StubTransport::new()).is_err());
    }

    #[test]
    fn test_equal_settings_share_a_fingerprint() {
        let raw = r#"{"type": "oidc", "authority": "http://auth.example.com/token", "ticket": {"client_id": "dovecote"}}"#;
        let a: AuthSettings = serde_json::from_str(raw).unwrap();
        let b: AuthSettings = serde_json::from_str(raw).unwrap();

        let stub = StubTransport::new();
        assert_eq!(
            a.build(stub.clone()).unwrap().fingerprint(),
            b.build(stub).unwrap().fingerprint()
        );
    }
}
