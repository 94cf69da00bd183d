// Delivery receipts
//
// A Receipt is the terminal record of one envelope: success or failure,
// the parsed server payload when there is one, and the raw response body
// for callers that want to inspect it themselves.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::DeliveryError;

/// Terminal result of a single delivery, immutable once written
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Id of the envelope this receipt belongs to
    pub envelope_id: Uuid,
    /// File name the envelope was submitted under
    pub file_name: String,
    /// Whether the upload was accepted by the storage server
    pub success: bool,
    /// Error captured when the delivery failed
    pub error: Option<DeliveryError>,
    /// Parsed response payload (JSON mode, or the bare URL in text mode)
    pub payload: Option<PayloadInfo>,
    /// Raw response body as returned by the server
    pub raw_response: Option<String>,
}

impl Receipt {
    /// Build a successful receipt for an envelope
    pub fn delivered(envelope: &Envelope, payload: PayloadInfo, raw: String) -> Self {
        Self {
            envelope_id: envelope.id(),
            file_name: envelope.file_name().to_string(),
            success: true,
            error: None,
            payload: Some(payload),
            raw_response: Some(raw),
        }
    }

    /// Build a failed receipt for an envelope
    pub fn failed(envelope: &Envelope, error: DeliveryError, raw: Option<String>) -> Self {
        Self {
            envelope_id: envelope.id(),
            file_name: envelope.file_name().to_string(),
            success: false,
            error: Some(error),
            payload: None,
            raw_response: raw,
        }
    }

    /// Resulting storage URL, when the server reported one
    pub fn url(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.url.as_str())
    }
}

/// Response payload of the storage server in JSON output mode
///
/// Field set follows the go-fastdfs upload response. Everything except the
/// URL is optional so that older or trimmed-down servers still parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadInfo {
    pub url: String,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub scenes: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mtime: Option<i64>,
    #[serde(default)]
    pub retmsg: Option<String>,
    #[serde(default)]
    pub retcode: Option<i64>,
    #[serde(default)]
    pub src: Option<String>,
}

impl PayloadInfo {
    /// Payload for text output mode, where the body is the URL itself
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Ordered collection of receipts from a batch submission
#[derive(Debug, Clone, Default)]
pub struct ReceiptBatch {
    receipts: Vec<Receipt>,
}

impl ReceiptBatch {
    pub fn new(receipts: Vec<Receipt>) -> Self {
        Self { receipts }
    }

    /// True when every receipt in the batch succeeded
    pub fn all_succeeded(&self) -> bool {
        self.receipts.iter().all(|r| r.success)
    }

    /// Receipts of deliveries the server accepted
    pub fn successes(&self) -> impl Iterator<Item = &Receipt> {
        self.receipts.iter().filter(|r| r.success)
    }

    /// Receipts of deliveries that failed
    pub fn failures(&self) -> impl Iterator<Item = &Receipt> {
        self.receipts.iter().filter(|r| !r.success)
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Receipt> {
        self.receipts.iter()
    }
}

impl IntoIterator for ReceiptBatch {
    type Item = Receipt;
    type IntoIter = std::vec::IntoIter<Receipt>;

    fn into_iter(self) -> Self::IntoIter {
        self.receipts.into_iter()
    }
}

impl From<Vec<Receipt>> for ReceiptBatch {
    fn from(receipts: Vec<Receipt>) -> Self {
        Self::new(receipts)
    }
}
