// Transport contract and the reqwest-backed implementation
//
// The engine never touches reqwest types directly: dispatch attempts and
// token exchanges build a RequestForm and hand it to a Transport. Tests
// substitute a scriptable stub; production uses HttpTransport. Connection
// pooling and keep-alive policy belong to the transport, not the engine.

use async_trait::async_trait;
use reqwest::multipart;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{DeliveryError, Result};

/// Form fields plus an optional file part, in insertion order
#[derive(Debug, Clone, Default)]
pub struct RequestForm {
    fields: Vec<(String, String)>,
    file: Option<FilePart>,
}

/// The file part of an upload form
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl RequestForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text field
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Append a text field, fluent form
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_field(key, value);
        self
    }

    /// Set the file part; it is always encoded after the text fields
    pub fn set_file(&mut self, file_name: impl Into<String>, content: Vec<u8>) {
        self.file = Some(FilePart {
            file_name: file_name.into(),
            content,
        });
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Value of the first field with the given key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn file(&self) -> Option<&FilePart> {
        self.file.as_ref()
    }
}

/// HTTP method subset the engine needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Status and body of a completed transport call
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes one network call for the engine
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &Url, form: RequestForm, method: Method) -> Result<TransportResponse>;
}

/// Request timeout; a longer request would stall its upload worker
const HTTP_TIMEOUT: Duration = Duration::from_secs(45);

/// reqwest-backed transport
///
/// One shared client; reqwest keeps its own per-host connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::internal(format!("http client init: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &Url, form: RequestForm, method: Method) -> Result<TransportResponse> {
        debug!(url = %url, ?method, fields = form.fields().len(), "sending request");

        let request = match method {
            // GET carries no body; token fetch endpoints take no parameters
            Method::Get => self.client.get(url.clone()),
            Method::Post => {
                let mut multipart = multipart::Form::new();
                for (key, value) in form.fields() {
                    multipart = multipart.text(key.clone(), value.clone());
                }
                if let Some(file) = form.file() {
                    let part = multipart::Part::bytes(file.content.clone())
                        .file_name(file.file_name.clone());
                    multipart = multipart.part("file", part);
                }
                self.client.post(url.clone()).multipart(multipart)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::transport(e.to_string()))?;

        Ok(TransportResponse { status, body })
    }
}
