// Endpoint and client options
//
// There is no implicit global default configuration: a ClientOptions value
// is built explicitly and handed to the client at construction time. The
// serde Settings mirrors exist for an external loader to populate - the
// engine itself never reads config files or the environment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::AuthComponent;

/// Response shape the storage server is asked to produce
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl OutputFormat {
    /// Wire value of the `output` form field
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }
}

/// Destination settings for one upload
#[derive(Clone)]
pub struct EndpointOptions {
    /// Upload endpoint, e.g. `http://127.0.0.1:8080/upload`
    pub endpoint: Url,
    /// Server-side path prefix for the stored file
    pub file_path: Option<String>,
    /// Scene label, see the go-fastdfs scene pool documentation
    pub scene: Option<String>,
    /// Response shape to request
    pub output: OutputFormat,
    /// Authorization component; a token is attached only when this is set
    pub auth: Option<Arc<dyn AuthComponent>>,
}

impl EndpointOptions {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            file_path: None,
            scene: None,
            output: OutputFormat::default(),
            auth: None,
        }
    }

    /// Set the server-side path prefix
    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Set the scene label
    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = Some(scene.into());
        self
    }

    /// Set the response shape
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Attach an authorization component
    ///
    /// The component is a single owned value of these options; equivalently
    /// configured components share one token cache entry through their
    /// fingerprint.
    pub fn with_auth(mut self, auth: Arc<dyn AuthComponent>) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl fmt::Debug for EndpointOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointOptions")
            .field("endpoint", &self.endpoint.as_str())
            .field("file_path", &self.file_path)
            .field("scene", &self.scene)
            .field("output", &self.output)
            .field("auth", &self.auth.as_ref().map(|a| a.fingerprint()))
            .finish()
    }
}

/// Client-wide options: default destination plus pool and retry tuning
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Default destination for deliveries that do not override it
    pub endpoint: EndpointOptions,
    /// Maximum number of concurrently active upload workers
    pub pool_cap: usize,
    /// Session retry budget for failed attempts and worker faults
    pub max_retries: u32,
    /// Wait between retries, also the token cache's inter-cycle wait
    pub retry_wait: Duration,
}

pub(crate) const DEFAULT_POOL_CAP: usize = 10;
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 5;
pub(crate) const DEFAULT_RETRY_WAIT: Duration = Duration::from_millis(1000);

impl ClientOptions {
    pub fn new(endpoint: EndpointOptions) -> Self {
        Self {
            endpoint,
            pool_cap: DEFAULT_POOL_CAP,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_wait: DEFAULT_RETRY_WAIT,
        }
    }

    /// Set the worker pool cap
    pub fn with_pool_cap(mut self, pool_cap: usize) -> Self {
        self.pool_cap = pool_cap;
        self
    }

    /// Set the session retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the wait between retries
    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_wait = retry_wait;
        self
    }
}

/// Loader-facing mirror of [`EndpointOptions`] without the trait object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub endpoint: Url,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub output: OutputFormat,
}

impl From<EndpointSettings> for EndpointOptions {
    fn from(settings: EndpointSettings) -> Self {
        Self {
            endpoint: settings.endpoint,
            file_path: settings.file_path,
            scene: settings.scene,
            output: settings.output,
            auth: None,
        }
    }
}

/// Loader-facing mirror of [`ClientOptions`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(flatten)]
    pub endpoint: EndpointSettings,
    #[serde(default = "default_pool_cap")]
    pub pool_cap: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
}

fn default_pool_cap() -> usize {
    DEFAULT_POOL_CAP
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_wait_ms() -> u64 {
    DEFAULT_RETRY_WAIT.as_millis() as u64
}

impl From<ClientSettings> for ClientOptions {
    fn from(settings: ClientSettings) -> Self {
        Self {
            endpoint: settings.endpoint.into(),
            pool_cap: settings.pool_cap,
            max_retries: settings.max_retries,
            retry_wait: Duration::from_millis(settings.retry_wait_ms),
        }
    }
}
