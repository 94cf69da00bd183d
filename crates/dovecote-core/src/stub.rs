// Scriptable in-memory fakes for tests
//
// StubTransport stands in for the network: outcomes are scripted per call
// and every sent request is recorded in order. StubAuth is a counting
// authorization component with a fixed fingerprint. Both are shipped as a
// public module so downstream crates can test against the engine without a
// server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use url::Url;

use crate::auth::{AuthComponent, Token};
use crate::error::{DeliveryError, Result};
use crate::transport::{Method, RequestForm, Transport, TransportResponse};

/// Scripted outcome of one StubTransport call
#[derive(Debug, Clone)]
pub enum StubOutcome {
    /// 200 with the given body
    Success(String),
    /// Explicit status and body
    Status(u16, String),
    /// Transport-level failure (I/O error)
    Error(String),
    /// Panic mid-send, for exercising the worker fault path
    Panic,
}

/// One request as the stub saw it
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub url: Url,
    pub method: Method,
    pub fields: Vec<(String, String)>,
    pub file_name: Option<String>,
}

impl SentRequest {
    /// Value of the first field with the given key
    pub fn field_value(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Scriptable transport double
///
/// Without a script every call succeeds with a JSON payload whose URL is
/// derived from the uploaded file name.
#[derive(Default)]
pub struct StubTransport {
    script: Mutex<VecDeque<StubOutcome>>,
    sent: Mutex<Vec<SentRequest>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes consumed one per call; the default applies afterwards
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = StubOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Sleep this long inside every call (widens concurrency windows)
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Total calls observed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently in-flight calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every request in arrival order
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    /// File names of the sent requests in arrival order
    pub fn sent_file_names(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|r| r.file_name.clone())
            .collect()
    }

    fn default_body(form: &RequestForm) -> String {
        let name = form.file().map(|f| f.file_name.as_str()).unwrap_or("file");
        format!(r#"{{"url":"http://stub-server/group1/{name}","retcode":0}}"#)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, url: &Url, form: RequestForm, method: Method) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.sent.lock().push(SentRequest {
            url: url.clone(),
            method,
            fields: form.fields().to_vec(),
            file_name: form.file().map(|f| f.file_name.clone()),
        });

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            None => Ok(TransportResponse {
                status: 200,
                body: Self::default_body(&form),
            }),
            Some(StubOutcome::Success(body)) => Ok(TransportResponse { status: 200, body }),
            Some(StubOutcome::Status(status, body)) => Ok(TransportResponse { status, body }),
            Some(StubOutcome::Error(message)) => Err(DeliveryError::transport(message)),
            Some(StubOutcome::Panic) => panic!("scripted transport fault"),
        }
    }
}

/// Counting authorization component with a fixed fingerprint
pub struct StubAuth {
    fingerprint: String,
    calls: AtomicU32,
    ttl_seconds: Option<i64>,
    delay: Duration,
    error: Option<String>,
}

impl StubAuth {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            calls: AtomicU32::new(0),
            ttl_seconds: None,
            delay: Duration::ZERO,
            error: None,
        }
    }

    /// Lifetime reported on every produced token; negative means already spent
    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Sleep inside apply_token, to hold the refresh lock open
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every apply_token call with a transport error
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Number of apply_token invocations
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthComponent for StubAuth {
    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    async fn apply_token(&self) -> Result<Token> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.error {
            return Err(DeliveryError::transport(message.clone()));
        }
        let value = format!("{}-token-{call}", self.fingerprint);
        Ok(Token {
            value: value.clone(),
            raw: value,
            expires_at: self
                .ttl_seconds
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    fn attach_to_request(&self, form: &mut RequestForm, token: &Token) {
        form.add_field("auth_token", token.value.clone());
    }
}
