// Envelope - one unit of submitted upload work and its eventual receipt
//
// The receipt slot is a one-shot signal: exactly one producer (the worker
// that completes the envelope), any number of consumers, first write wins.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::options::EndpointOptions;
use crate::receipt::Receipt;

/// A single upload task in flight
///
/// Cloning is cheap; every clone refers to the same payload and receipt
/// slot. The envelope is dropped once the caller consumes the receipt -
/// there is no pooling or reuse.
#[derive(Clone)]
pub struct Envelope {
    inner: Arc<EnvelopeInner>,
}

struct EnvelopeInner {
    id: Uuid,
    file_name: String,
    payload: Vec<u8>,
    options: Arc<EndpointOptions>,
    slot: watch::Sender<Option<Receipt>>,
}

impl Envelope {
    /// Create an envelope for one named payload bound to a destination
    pub fn new(
        file_name: impl Into<String>,
        payload: Vec<u8>,
        options: Arc<EndpointOptions>,
    ) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(EnvelopeInner {
                id: Uuid::now_v7(),
                file_name: file_name.into(),
                payload,
                options,
                slot,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn file_name(&self) -> &str {
        &self.inner.file_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    pub fn options(&self) -> &Arc<EndpointOptions> {
        &self.inner.options
    }

    /// Store the terminal receipt and wake every waiter
    ///
    /// Only the first write takes effect; a second resolution is ignored.
    pub fn resolve(&self, receipt: Receipt) {
        let stored = self.inner.slot.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(receipt);
                true
            } else {
                false
            }
        });
        if !stored {
            debug!(envelope_id = %self.inner.id, "receipt already written, ignoring");
        }
    }

    /// Whether a receipt has been written
    pub fn is_resolved(&self) -> bool {
        self.inner.slot.borrow().is_some()
    }

    /// Wait for the receipt, blocking until the owning worker writes it
    pub async fn receipt(&self) -> Receipt {
        let mut rx = self.inner.slot.subscribe();
        let receipt = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone().unwrap_or_else(|| {
                Receipt {
                    envelope_id: self.inner.id,
                    file_name: self.inner.file_name.clone(),
                    success: false,
                    error: Some(DeliveryError::internal("empty receipt slot")),
                    payload: None,
                    raw_response: None,
                }
            }),
            // The sender lives inside this envelope, so the channel can only
            // close once every clone is gone - report it instead of hanging.
            Err(_) => Receipt {
                envelope_id: self.inner.id,
                file_name: self.inner.file_name.clone(),
                success: false,
                error: Some(DeliveryError::internal("receipt slot closed")),
                payload: None,
                raw_response: None,
            },
        };
        receipt
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.inner.id)
            .field("file_name", &self.inner.file_name)
            .field("payload_len", &self.inner.payload.len())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
