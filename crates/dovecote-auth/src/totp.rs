// Time-based one-time code component
//
// Exactly one of {shared secret, remote server} is configured. Local
// generation is RFC 6238 TOTP over HMAC-SHA-1: counter = unix_time / period
// as 8 big-endian bytes, dynamic truncation, six digits. Remote mode fetches
// the current code from a server with a bare GET. In both modes the token is
// cached for one period from now, regardless of any validity claims.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use dovecote_core::auth::{AuthComponent, Token};
use dovecote_core::error::{DeliveryError, Result};
use dovecote_core::transport::{Method, RequestForm, Transport};

const DEFAULT_PERIOD: u64 = 30;

enum Mode {
    /// Generate codes locally from a shared secret
    Generate { secret: String, key: Vec<u8> },
    /// Fetch the current code from a server
    Remote { server: Url },
}

/// Authorization through rotating six-digit codes
pub struct TotpAuth {
    mode: Mode,
    period: u64,
    transport: Option<Arc<dyn Transport>>,
    fingerprint: OnceLock<String>,
}

impl TotpAuth {
    pub fn builder() -> TotpAuthBuilder {
        TotpAuthBuilder {
            secret: None,
            server: None,
            period: DEFAULT_PERIOD,
            transport: None,
        }
    }

    /// Code for an explicit Unix time; local-generation mode only
    pub fn code_at(&self, unix_time: u64) -> Result<String> {
        match &self.mode {
            Mode::Generate { key, .. } => Ok(generate_code(key, unix_time / self.period)),
            Mode::Remote { .. } => Err(DeliveryError::configuration(
                "code generation requires a shared secret",
            )),
        }
    }
}

/// Fluent builder for [`TotpAuth`]
///
/// Setting both the secret and the server is a configuration error, as is
/// setting neither.
pub struct TotpAuthBuilder {
    secret: Option<String>,
    server: Option<Url>,
    period: u64,
    transport: Option<Arc<dyn Transport>>,
}

impl TotpAuthBuilder {
    /// Use local generation from a base32-encoded shared secret
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Use remote fetch from a code server
    pub fn server(mut self, server: Url) -> Self {
        self.server = Some(server);
        self
    }

    /// Code rotation period in seconds (default 30)
    pub fn period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// Transport for remote fetch mode
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<TotpAuth> {
        if self.period == 0 {
            return Err(DeliveryError::configuration("code period must be positive"));
        }

        let mode = match (self.secret, self.server) {
            (Some(_), Some(_)) => {
                return Err(DeliveryError::configuration(
                    "both a shared secret and a code server are configured; pick one",
                ))
            }
            (None, None) => {
                return Err(DeliveryError::configuration(
                    "neither a shared secret nor a code server is configured",
                ))
            }
            (Some(secret), None) => {
                let key = decode_secret(&secret)?;
                Mode::Generate { secret, key }
            }
            (None, Some(server)) => {
                if self.transport.is_none() {
                    return Err(DeliveryError::configuration(
                        "remote code fetch requires a transport",
                    ));
                }
                Mode::Remote { server }
            }
        };

        Ok(TotpAuth {
            mode,
            period: self.period,
            transport: self.transport,
            fingerprint: OnceLock::new(),
        })
    }
}

#[async_trait]
impl AuthComponent for TotpAuth {
    fn fingerprint(&self) -> String {
        self.fingerprint
            .get_or_init(|| {
                let mut hasher = Sha256::new();
                match &self.mode {
                    Mode::Generate { secret, .. } => {
                        hasher.update(b"generate:");
                        hasher.update(secret.as_bytes());
                    }
                    Mode::Remote { server } => {
                        hasher.update(b"remote:");
                        hasher.update(server.as_str().as_bytes());
                    }
                }
                hex::encode(hasher.finalize())
            })
            .clone()
    }

    async fn apply_token(&self) -> Result<Token> {
        let now = Utc::now();
        let code = match &self.mode {
            Mode::Generate { .. } => {
                let unix_time = now.timestamp().max(0) as u64;
                self.code_at(unix_time)?
            }
            Mode::Remote { server } => {
                debug!(server = %server, "fetching code from server");
                let transport = self.transport.as_ref().ok_or_else(|| {
                    DeliveryError::configuration("remote code fetch requires a transport")
                })?;
                let response = transport.send(server, RequestForm::new(), Method::Get).await?;
                if !response.is_success() {
                    return Err(DeliveryError::TransportStatus {
                        status: response.status,
                    });
                }
                response.body.trim().to_string()
            }
        };

        // The code rotates with the window, so the cache keeps it for one
        // period from now in both modes.
        Ok(Token {
            value: code.clone(),
            raw: code,
            expires_at: Some(now + Duration::seconds(self.period as i64)),
        })
    }

    fn attach_to_request(&self, form: &mut RequestForm, token: &Token) {
        form.add_field("auth_token", token.value.clone());
    }
}

/// Decode a base32 secret, tolerating lowercase and trailing padding
fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized = secret.trim().trim_end_matches('=').to_ascii_uppercase();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| DeliveryError::configuration(format!("secret is not valid base32: {e}")))
}

/// Six-digit code for one counter window
fn generate_code(key: &[u8], counter: u64) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let truncated = u32::from_be_bytes([
        hash[offset],
        hash[offset + 1],
        hash[offset + 2],
        hash[offset + 3],
    ]) & 0x7fff_ffff;

    format!("{:06}", truncated % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dovecote_core::stub::{StubOutcome, StubTransport};

    const SECRET: &str = "JBSWY3DPEHPK3PXP";
    /// RFC 6238 test secret, base32 encoding of "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn local(secret: &str) -> TotpAuth {
        TotpAuth::builder().secret(secret).build().unwrap()
    }

    #[test]
    fn test_reference_vectors() {
        let auth = local(SECRET);
        assert_eq!(auth.code_at(59).unwrap(), "996554");
        assert_eq!(auth.code_at(1111111109).unwrap(), "071271");
        assert_eq!(auth.code_at(1465324707).unwrap(), "341128");

        assert_eq!(local(RFC_SECRET).code_at(59).unwrap(), "287082");
    }

    #[test]
    fn test_code_is_stable_within_a_window_and_rotates_across() {
        let auth = local(SECRET);
        // 1465324680 is the start of the 30-second window holding 1465324707.
        assert_eq!(auth.code_at(1465324680).unwrap(), "341128");
        assert_eq!(auth.code_at(1465324709).unwrap(), "341128");
        assert_eq!(auth.code_at(1465324710).unwrap(), "370323");
    }

    #[test]
    fn test_secret_decoding_tolerates_case_and_padding() {
        let auth = local("jbswy3dpehpk3pxp");
        assert_eq!(auth.code_at(59).unwrap(), "996554");
    }

    #[test]
    fn test_custom_period_widens_the_window() {
        let auth = TotpAuth::builder()
            .secret(SECRET)
            .period(60)
            .build()
            .unwrap();
        assert_eq!(auth.code_at(0).unwrap(), auth.code_at(59).unwrap());
        assert_ne!(auth.code_at(59).unwrap(), auth.code_at(60).unwrap());
    }

    #[test]
    fn test_configuration_errors() {
        let both = TotpAuth::builder()
            .secret(SECRET)
            .server("http://codes.example.com/".parse().unwrap())
            .build();
        assert!(matches!(both, Err(DeliveryError::Configuration(_))));

        let neither = TotpAuth::builder().build();
        assert!(matches!(neither, Err(DeliveryError::Configuration(_))));

        let bad_secret = TotpAuth::builder().secret("not!base32").build();
        assert!(matches!(bad_secret, Err(DeliveryError::Configuration(_))));

        let no_transport = TotpAuth::builder()
            .server("http://codes.example.com/".parse().unwrap())
            .build();
        assert!(matches!(no_transport, Err(DeliveryError::Configuration(_))));

        let zero_period = TotpAuth::builder().secret(SECRET).period(0).build();
        assert!(matches!(zero_period, Err(DeliveryError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_local_apply_token_expires_one_period_out() {
        let auth = local(SECRET);
        let before = Utc::now();
        let token = auth.apply_token().await.unwrap();

        assert_eq!(token.value.len(), 6);
        assert!(token.value.chars().all(|c| c.is_ascii_digit()));
        let expires_at = token.expires_at.unwrap();
        assert!(expires_at >= before + Duration::seconds(29));
        assert!(expires_at <= Utc::now() + Duration::seconds(31));
    }

    #[tokio::test]
    async fn test_remote_apply_token_fetches_with_get() {
        let stub = StubTransport::new();
        stub.push_outcomes([StubOutcome::Success("654321\n".into())]);
        let auth = TotpAuth::builder()
            .server("http://codes.example.com/current".parse().unwrap())
            .transport(stub.clone())
            .build()
            .unwrap();

        let token = auth.apply_token().await.unwrap();

        assert_eq!(token.value, "654321");
        assert!(token.expires_at.is_some());
        let sent = stub.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::Get);
    }

    #[test]
    fn test_fingerprints_distinguish_modes_and_configs() {
        let a = local(SECRET);
        let b = local(SECRET);
        let c = local(RFC_SECRET);
        let stub = StubTransport::new();
        let remote = TotpAuth::builder()
            .server("http://codes.example.com/".parse().unwrap())
            .transport(stub)
            .build()
            .unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), remote.fingerprint());
    }
}
