//! Defers batch work while another writer holds a conflicting lock on moves.
//!
//! Best effort only: it narrows the window for lock waits, conflicts are
//! still resolved by the database.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::errors::ServiceError;
use crate::store::LockProbe;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct LockBackoffGate {
    probe: Arc<dyn LockProbe>,
    interval: Duration,
}

impl LockBackoffGate {
    pub fn new(probe: Arc<dyn LockProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls until the probe reports no contention, sleeping `interval`
    /// between polls. Returns how many polls found the lock held.
    ///
    /// Contention is retried without limit; a probe error ends the wait.
    pub async fn wait_until_clear(&self) -> Result<u32, ServiceError> {
        let mut contended = 0u32;
        while self.probe.moves_locked().await? {
            contended += 1;
            counter!("autoassign.lock_gate.contended", 1);
            if contended == 1 {
                info!(interval = ?self.interval, "moves table locked by another writer; waiting");
            } else {
                debug!(polls = contended, "moves table still locked");
            }
            sleep(self.interval).await;
        }
        if contended > 0 {
            info!(polls = contended, "moves table lock released");
        }
        Ok(contended)
    }
}
