// Dispatch engine
//
// A self-scaling pool of upload workers over the two-lane envelope queue.
//
// Moving parts:
// - arrival listener: woken by the queue's arrival notification, starts an
//   activator when none is running (redundant notifications are idempotent)
// - activator: spawns workers until the pool is full or the queue is empty
// - worker: drains the queue one envelope at a time, retrying failed
//   attempts against its session budget, and exits when the queue is empty
// - supervisor: observes worker exits; a fault (panic escaping the worker
//   body) respawns a worker that inherits the dead worker's session, so the
//   interrupted envelope is retried with the incremented count
//
// The retry counter deliberately lives on the worker session, not on the
// envelope: a fault is charged to the session slot that was processing it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::{DeliveryError, Result};
use crate::options::{ClientOptions, EndpointOptions, OutputFormat};
use crate::queue::EnvelopeQueue;
use crate::receipt::{PayloadInfo, Receipt};
use crate::token_cache::TokenCache;
use crate::transport::{Method, RequestForm, Transport};

/// URL shape a text-mode response body must match to be accepted
static FILE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ht|f)tps?://[0-9a-zA-Z]([-.\w]*[0-9a-zA-Z])*(:[0-9]+)?/?[a-zA-Z0-9\-._?,'/\\+&%$#=]*$")
        .expect("URL pattern is valid")
});

/// Per-worker mutable cursor; outlives any single worker instance
#[derive(Default)]
struct WorkerSession {
    /// Envelope currently being processed, if any
    current: Option<Envelope>,
    /// Failed attempts (stored failures and faults) charged to this session
    retries: u32,
}

type SharedSession = Arc<Mutex<WorkerSession>>;

struct WorkerExit {
    worker_id: u64,
    faulted: bool,
}

#[derive(Default)]
struct PoolState {
    /// Sessions of the currently active workers
    workers: HashMap<u64, SharedSession>,
    next_worker_id: u64,
    /// Live activation attempt, if one is running
    activator: Option<JoinHandle<()>>,
}

/// The concurrent dispatch engine
///
/// Owns the queue, the worker pool, and the token cache. Dropping the
/// dispatcher stops the background reaction tasks; workers already running
/// drain the queue naturally. Must be created inside a Tokio runtime.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    shutdown: watch::Sender<bool>,
}

struct DispatcherInner {
    queue: EnvelopeQueue,
    pool: Mutex<PoolState>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    transport: Arc<dyn Transport>,
    tokens: TokenCache,
    pool_cap: usize,
    max_retries: u32,
    retry_wait: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, options: &ClientOptions) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(DispatcherInner {
            queue: EnvelopeQueue::new(),
            pool: Mutex::new(PoolState::default()),
            exits: exits_tx,
            transport,
            tokens: TokenCache::new(options.max_retries, options.retry_wait),
            pool_cap: options.pool_cap,
            max_retries: options.max_retries,
            retry_wait: options.retry_wait,
        });

        spawn_arrival_listener(Arc::downgrade(&inner), shutdown_rx);
        spawn_supervisor(Arc::downgrade(&inner), exits_rx);

        Self { inner, shutdown }
    }

    /// Enqueue one envelope; the returned handle resolves to its receipt
    pub fn dispatch(
        &self,
        file_name: impl Into<String>,
        payload: Vec<u8>,
        options: Arc<EndpointOptions>,
        priority: bool,
    ) -> Envelope {
        let envelope = Envelope::new(file_name, payload, options);
        self.inner.queue.enqueue(envelope.clone(), priority);
        envelope
    }

    /// Enqueue a batch with a single arrival notification
    pub fn dispatch_many(
        &self,
        files: impl IntoIterator<Item = (String, Vec<u8>)>,
        options: Arc<EndpointOptions>,
        priority: bool,
    ) -> Vec<Envelope> {
        let envelopes: Vec<Envelope> = files
            .into_iter()
            .map(|(name, payload)| Envelope::new(name, payload, options.clone()))
            .collect();
        self.inner
            .queue
            .enqueue_many(envelopes.iter().cloned(), priority);
        envelopes
    }

    /// Token cache shared by every dispatch attempt of this engine
    pub fn token_cache(&self) -> &TokenCache {
        &self.inner.tokens
    }

    /// Number of currently active workers
    pub fn active_workers(&self) -> usize {
        self.inner.pool.lock().workers.len()
    }

    /// Number of envelopes waiting in the queue
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stop reacting to arrivals; running workers drain the queue naturally
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn spawn_arrival_listener(weak: Weak<DispatcherInner>, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        loop {
            let Some(inner) = weak.upgrade() else { break };
            tokio::select! {
                _ = inner.queue.arrival() => inner.activate(),
                _ = shutdown_rx.changed() => {
                    debug!("arrival listener shutting down");
                    break;
                }
            }
        }
    });
}

fn spawn_supervisor(weak: Weak<DispatcherInner>, mut exits_rx: mpsc::UnboundedReceiver<WorkerExit>) {
    tokio::spawn(async move {
        while let Some(exit) = exits_rx.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            inner.handle_worker_exit(exit);
        }
    });
}

impl DispatcherInner {
    /// Start an activation attempt unless one is already running
    fn activate(self: &Arc<Self>) {
        let mut pool = self.pool.lock();
        let running = pool
            .activator
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if running {
            return;
        }

        let inner = Arc::clone(self);
        pool.activator = Some(tokio::spawn(async move {
            while inner.try_spawn_worker(None) {}
        }));
    }

    /// Spawn one worker if capacity and pending work allow it
    ///
    /// Pending work counts the queue plus an inherited session's in-flight
    /// envelope - fault recovery must be able to respawn even when the
    /// interrupted envelope was the last one in the queue.
    fn try_spawn_worker(self: &Arc<Self>, inherited: Option<SharedSession>) -> bool {
        let mut pool = self.pool.lock();

        let active = pool.workers.len();
        let inherited_work = inherited
            .as_ref()
            .is_some_and(|s| s.lock().current.is_some());
        let pending = self.queue.len() + usize::from(inherited_work);
        if active >= self.pool_cap || active >= pending {
            return false;
        }

        let session = inherited.unwrap_or_default();
        let worker_id = pool.next_worker_id;
        pool.next_worker_id += 1;
        pool.workers.insert(worker_id, session.clone());

        let inner = Arc::clone(self);
        let body = tokio::spawn(inner.worker_body(worker_id, session));

        // Monitor: report how the worker ended, panic included.
        let exits = self.exits.clone();
        tokio::spawn(async move {
            let faulted = match body.await {
                Ok(()) => false,
                Err(join_error) => join_error.is_panic(),
            };
            let _ = exits.send(WorkerExit { worker_id, faulted });
        });

        debug!(worker_id, active = active + 1, "worker spawned");
        true
    }

    /// React to a worker leaving the pool
    fn handle_worker_exit(self: &Arc<Self>, exit: WorkerExit) {
        let session = self.pool.lock().workers.remove(&exit.worker_id);
        let Some(session) = session else { return };

        if exit.faulted {
            let retries = {
                let mut s = session.lock();
                s.retries += 1;
                s.retries
            };
            warn!(
                worker_id = exit.worker_id,
                retries, "worker faulted, respawning with inherited session"
            );
            self.try_spawn_worker(Some(session));
        } else {
            debug!(worker_id = exit.worker_id, "worker finished cleanly");
            // An envelope enqueued between this worker's final dequeue and
            // its removal would otherwise wait for the next arrival.
            if !self.queue.is_empty() {
                self.activate();
            }
        }
    }

    /// Worker body: drain the queue one envelope at a time, then exit
    async fn worker_body(self: Arc<Self>, worker_id: u64, session: SharedSession) {
        loop {
            let (envelope, retries) = {
                let mut s = session.lock();
                if s.current.is_none() {
                    s.current = self.queue.dequeue();
                    s.retries = 0;
                }
                match &s.current {
                    Some(envelope) => (envelope.clone(), s.retries),
                    None => {
                        debug!(worker_id, "queue drained, worker exiting");
                        return;
                    }
                }
            };

            // The first attempt always runs; afterwards the session budget
            // applies, covering stored failures and faults alike.
            if retries == 0 || retries < self.max_retries {
                let receipt = self.attempt(&envelope).await;
                if receipt.success {
                    info!(
                        worker_id,
                        envelope_id = %envelope.id(),
                        file_name = envelope.file_name(),
                        "delivered"
                    );
                    envelope.resolve(receipt);
                } else {
                    debug!(
                        worker_id,
                        envelope_id = %envelope.id(),
                        retries = retries + 1,
                        error = ?receipt.error,
                        "attempt failed"
                    );
                    session.lock().retries += 1;
                    tokio::time::sleep(self.retry_wait).await;
                    continue;
                }
            } else {
                warn!(
                    worker_id,
                    envelope_id = %envelope.id(),
                    attempts = retries,
                    "retry budget exhausted"
                );
                envelope.resolve(Receipt::failed(
                    &envelope,
                    DeliveryError::RetryExhausted { attempts: retries },
                    None,
                ));
            }

            let mut s = session.lock();
            s.current = self.queue.dequeue();
            s.retries = 0;
            if s.current.is_none() {
                debug!(worker_id, "queue drained, worker exiting");
                return;
            }
        }
    }

    /// One dispatch attempt; every failure is converted into a receipt
    async fn attempt(&self, envelope: &Envelope) -> Receipt {
        let options = envelope.options();

        let mut form = RequestForm::new()
            .with_field("output", options.output.as_str())
            .with_field("path", options.file_path.clone().unwrap_or_default())
            .with_field("scene", options.scene.clone().unwrap_or_default());

        if let Some(auth) = &options.auth {
            match self.tokens.get_token(auth.as_ref()).await {
                Ok(token) => auth.attach_to_request(&mut form, &token),
                Err(error) => return Receipt::failed(envelope, error, None),
            }
        }

        form.set_file(envelope.file_name(), envelope.payload().to_vec());

        let response = match self
            .transport
            .send(&options.endpoint, form, Method::Post)
            .await
        {
            Ok(response) => response,
            Err(error) => return Receipt::failed(envelope, error, None),
        };

        let accepted = response.is_success();
        let status = response.status;
        let raw = response.body;

        if !accepted {
            return Receipt::failed(
                envelope,
                DeliveryError::TransportStatus { status },
                Some(raw),
            );
        }

        match parse_payload(options.output, &raw) {
            Ok(payload) => Receipt::delivered(envelope, payload, raw),
            Err(error) => Receipt::failed(envelope, error, Some(raw)),
        }
    }
}

/// Interpret a successful response body according to the output mode
fn parse_payload(output: OutputFormat, raw: &str) -> Result<PayloadInfo> {
    match output {
        OutputFormat::Json => serde_json::from_str(raw)
            .map_err(|e| DeliveryError::unrecognized(format!("invalid JSON payload: {e}"))),
        OutputFormat::Text => {
            let candidate = raw.trim();
            if FILE_URL_RE.is_match(candidate) {
                Ok(PayloadInfo::from_url(candidate))
            } else {
                Err(DeliveryError::unrecognized(
                    "response body is not a storage URL",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_mode_accepts_url_shaped_bodies() {
        for url in [
            "http://127.0.0.1:8080/group1/default/report.txt",
            "https://storage.example.com/group1/f_1.png",
            "ftp://files.example.com/pub/data.bin",
            "http://host/f%20name.txt",
        ] {
            assert!(
                parse_payload(OutputFormat::Text, url).is_ok(),
                "expected accept: {url}"
            );
        }
    }

    #[test]
    fn test_text_mode_rejects_non_urls() {
        for body in ["not a url", "upload failed", "htp://host/x", ""] {
            let err = parse_payload(OutputFormat::Text, body).unwrap_err();
            assert!(matches!(err, DeliveryError::UnrecognizedResponse(_)));
        }
    }

    #[test]
    fn test_text_mode_trims_trailing_newline() {
        let payload = parse_payload(OutputFormat::Text, "http://host/f.txt\n").unwrap();
        assert_eq!(payload.url, "http://host/f.txt");
    }

    #[test]
    fn test_json_mode_parses_payload() {
        let payload =
            parse_payload(OutputFormat::Json, r#"{"url":"http://h/f","md5":"d41d8"}"#).unwrap();
        assert_eq!(payload.url, "http://h/f");
        assert_eq!(payload.md5.as_deref(), Some("d41d8"));
    }

    #[test]
    fn test_json_mode_rejects_invalid_bodies() {
        let err = parse_payload(OutputFormat::Json, "<html>oops</html>").unwrap_err();
        assert!(matches!(err, DeliveryError::UnrecognizedResponse(_)));
    }
}
