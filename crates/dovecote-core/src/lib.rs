// Delivery engine for go-fastdfs-style object storage
//
// Callers submit named byte payloads; a bounded, self-scaling worker pool
// drains a two-lane queue and writes one receipt per envelope. Failed
// attempts are retried against a per-worker-session budget, worker faults
// respawn a replacement that inherits the dead worker's session, and
// authorization tokens are acquired through a per-fingerprint cache that
// serializes refresh while letting readers of a live token proceed freely.
//
// Key design decisions:
// - Transport is a trait: reqwest in production, a scriptable stub in tests
// - Authorization is a capability trait (dovecote-auth ships the variants)
// - Receipts are one-shot watch channels: one writer, any number of readers
// - No global configuration: ClientOptions is built and passed explicitly
// - The retry counter belongs to the worker session, not the envelope

pub mod auth;
pub mod client;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod options;
pub mod queue;
pub mod receipt;
pub mod token_cache;
pub mod transport;

// Scriptable in-memory fakes for tests
pub mod stub;

// Re-exports for convenience
pub use auth::{AuthComponent, Token};
pub use client::DovecoteClient;
pub use dispatch::Dispatcher;
pub use envelope::Envelope;
pub use error::{DeliveryError, Result};
pub use options::{ClientOptions, ClientSettings, EndpointOptions, EndpointSettings, OutputFormat};
pub use queue::EnvelopeQueue;
pub use receipt::{PayloadInfo, Receipt, ReceiptBatch};
pub use token_cache::TokenCache;
pub use transport::{FilePart, HttpTransport, Method, RequestForm, Transport, TransportResponse};
