// Token acquisition cache
//
// One slot per authorization fingerprint. Readers of a live token share the
// slot's read lock and never contend with a writer (writers only run when no
// live token exists). Refresh is serialized per fingerprint: exactly one
// apply_token call is in flight at any time, and late write-lock winners
// re-check the slot before fetching so a refresh that already happened is
// never repeated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::auth::{AuthComponent, Token};
use crate::error::{DeliveryError, Result};
use crate::options::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WAIT};

/// Default wait for one read-lock acquisition attempt
const DEFAULT_READ_WAIT: Duration = Duration::from_secs(10);
/// Default wait for one write-lock acquisition attempt
const DEFAULT_WRITE_WAIT: Duration = Duration::from_millis(10);

type Slot = Arc<RwLock<Option<Token>>>;

/// Per-fingerprint token cache with serialized refresh
pub struct TokenCache {
    /// Slot per fingerprint, created exactly once and never removed
    slots: Mutex<HashMap<String, Slot>>,
    /// Full read-then-write cycles allowed before giving up
    max_attempts: u32,
    /// Sleep between cycles
    retry_wait: Duration,
    /// Wait for one read-lock acquisition attempt
    read_wait: Duration,
    /// Wait for one write-lock acquisition attempt
    write_wait: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WAIT)
    }
}

impl TokenCache {
    pub fn new(max_attempts: u32, retry_wait: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_attempts,
            retry_wait,
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
        }
    }

    /// Override the per-attempt lock waits (both fixed per cache instance)
    pub fn with_lock_waits(mut self, read_wait: Duration, write_wait: Duration) -> Self {
        self.read_wait = read_wait;
        self.write_wait = write_wait;
        self
    }

    /// Get a live token for the component, refreshing through it when needed
    ///
    /// Blocks while another caller holds the refresh lock for the same
    /// fingerprint; fails with [`DeliveryError::LockTimeout`] once the lock
    /// budget is exhausted without progress.
    pub async fn get_token(&self, component: &dyn AuthComponent) -> Result<Token> {
        let fingerprint = component.fingerprint();
        let slot = self.slot(&fingerprint);
        let mut attempts = 0u32;

        loop {
            // Read path: a live cached token ends the call immediately.
            match timeout(self.read_wait, slot.read()).await {
                Ok(guard) => {
                    if let Some(token) = guard.as_ref().filter(|t| t.is_live(Utc::now())) {
                        return Ok(token.clone());
                    }
                }
                Err(_) => debug!(%fingerprint, "read lock wait elapsed"),
            }

            // No live token visible: race for the refresh lock.
            if let Ok(guard) = timeout(self.write_wait, slot.write()).await {
                return refresh(component, &fingerprint, guard).await;
            }

            attempts += 1;
            if attempts > self.max_attempts {
                warn!(%fingerprint, attempts, "token cache lock budget exhausted");
                return Err(DeliveryError::LockTimeout { attempts });
            }
            tokio::time::sleep(self.retry_wait).await;
        }
    }

    fn slot(&self, fingerprint: &str) -> Slot {
        self.slots
            .lock()
            .entry(fingerprint.to_string())
            .or_default()
            .clone()
    }
}

/// Fetch a fresh token while holding the slot's write lock
async fn refresh(
    component: &dyn AuthComponent,
    fingerprint: &str,
    mut guard: RwLockWriteGuard<'_, Option<Token>>,
) -> Result<Token> {
    // A refresh may have completed while this caller queued for the lock.
    if let Some(token) = guard.as_ref().filter(|t| t.is_live(Utc::now())) {
        return Ok(token.clone());
    }

    debug!(%fingerprint, "refreshing token");
    let mut token = component.apply_token().await?;

    // A reported lifetime that is already spent means the token is never
    // cached - the same policy as a component reporting no lifetime at all.
    let now = Utc::now();
    if token.expires_at.is_some_and(|at| at <= now) {
        token.expires_at = None;
    }

    *guard = token.is_live(now).then(|| token.clone());
    debug!(
        %fingerprint,
        cached = guard.is_some(),
        expires_at = ?token.expires_at,
        "token refreshed"
    );
    Ok(token)
}
