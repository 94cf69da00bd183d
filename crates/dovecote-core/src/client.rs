// Client facade
//
// Thin surface over the dispatch engine: submit one or many payloads against
// the default destination (or a per-call override), await receipts, and
// expose the current authorization token for callers that need it directly.

use std::sync::Arc;

use futures::future::join_all;

use crate::dispatch::Dispatcher;
use crate::envelope::Envelope;
use crate::error::{DeliveryError, Result};
use crate::options::{ClientOptions, EndpointOptions};
use crate::receipt::{Receipt, ReceiptBatch};
use crate::transport::{HttpTransport, Transport};

/// Upload client for a go-fastdfs-style storage server
pub struct DovecoteClient {
    dispatcher: Dispatcher,
    defaults: Arc<EndpointOptions>,
}

impl DovecoteClient {
    /// Create a client with the reqwest transport
    ///
    /// Must be called inside a Tokio runtime; the engine's reaction tasks
    /// are spawned here.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
        Ok(Self::with_transport(options, transport))
    }

    /// Create a client over any transport (stubs in tests, custom pools)
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Self {
        let defaults = Arc::new(options.endpoint.clone());
        let dispatcher = Dispatcher::new(transport, &options);
        Self {
            dispatcher,
            defaults,
        }
    }

    /// Upload one payload through the normal lane
    pub async fn deliver(&self, file_name: impl Into<String>, payload: Vec<u8>) -> Receipt {
        self.dispatcher
            .dispatch(file_name, payload, self.defaults.clone(), false)
            .receipt()
            .await
    }

    /// Upload one payload through the priority lane
    pub async fn deliver_priority(
        &self,
        file_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Receipt {
        self.dispatcher
            .dispatch(file_name, payload, self.defaults.clone(), true)
            .receipt()
            .await
    }

    /// Upload one payload against per-call destination options
    pub async fn deliver_with(
        &self,
        file_name: impl Into<String>,
        payload: Vec<u8>,
        options: EndpointOptions,
        priority: bool,
    ) -> Receipt {
        self.dispatcher
            .dispatch(file_name, payload, Arc::new(options), priority)
            .receipt()
            .await
    }

    /// Upload a batch through the normal lane
    pub async fn deliver_many(
        &self,
        files: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> ReceiptBatch {
        let envelopes = self
            .dispatcher
            .dispatch_many(files, self.defaults.clone(), false);
        collect(envelopes).await
    }

    /// Upload a batch through the priority lane
    pub async fn deliver_many_priority(
        &self,
        files: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> ReceiptBatch {
        let envelopes = self
            .dispatcher
            .dispatch_many(files, self.defaults.clone(), true);
        collect(envelopes).await
    }

    /// Upload a batch against per-call destination options
    pub async fn deliver_many_with(
        &self,
        files: impl IntoIterator<Item = (String, Vec<u8>)>,
        options: EndpointOptions,
        priority: bool,
    ) -> ReceiptBatch {
        let envelopes = self
            .dispatcher
            .dispatch_many(files, Arc::new(options), priority);
        collect(envelopes).await
    }

    /// Current token for the default destination's authorization component
    pub async fn token(&self) -> Result<String> {
        self.token_for(&self.defaults).await
    }

    /// Current token for an explicit destination's authorization component
    pub async fn token_with(&self, options: &EndpointOptions) -> Result<String> {
        self.token_for(options).await
    }

    async fn token_for(&self, options: &EndpointOptions) -> Result<String> {
        let auth = options.auth.as_ref().ok_or_else(|| {
            DeliveryError::configuration("no authorization component is configured")
        })?;
        let token = self
            .dispatcher
            .token_cache()
            .get_token(auth.as_ref())
            .await?;
        Ok(token.value)
    }

    /// The underlying engine, for observability
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Await every receipt of a batch, preserving submission order
async fn collect(envelopes: Vec<Envelope>) -> ReceiptBatch {
    join_all(envelopes.iter().map(Envelope::receipt))
        .await
        .into()
}
