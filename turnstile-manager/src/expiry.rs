use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use crate::manager::ManagerInner;

/// Upper bound on the sweep period so short-lived config changes and loaded
/// holds are noticed promptly even with a long expire timeout.
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// One tracked hold. The transaction id pins the entry to a specific hold
/// episode: a ticket cancelled and re-held shows up as a fresh entry, and the
/// old one is discarded as stale.
#[derive(Debug, Clone)]
pub(crate) struct ExpiryEntry {
    pub ticket_id: String,
    pub hold_tx_id: String,
    pub hold_time_ms: i64,
}

/// FIFO of holds in creation order, oldest first. Pushed by `hold`, consumed
/// only by the expiry monitor. Entries for holds that were cancelled or
/// bought in the meantime are deleted lazily during the sweep, so a dead
/// head entry never blocks inspection of later ones.
///
/// Timestamps are taken under separate slot locks, so two concurrent holds
/// can enqueue microseconds out of timestamp order; the sweep's early stop
/// defers such an entry's reclamation by at most that skew plus one tick.
#[derive(Default)]
pub(crate) struct ExpiryQueue {
    entries: Mutex<VecDeque<ExpiryEntry>>,
}

impl ExpiryQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ExpiryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_back(&self, entry: ExpiryEntry) {
        self.lock().push_back(entry);
    }

    pub fn push_front(&self, entry: ExpiryEntry) {
        self.lock().push_front(entry);
    }

    pub fn front_cloned(&self) -> Option<ExpiryEntry> {
        self.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<ExpiryEntry> {
        self.lock().pop_front()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Background reclamation loop. Runs until the shutdown signal flips, then
/// exits; one final sweep is not attempted because outstanding holds are
/// simply durable Held records the next process start picks up again.
pub(crate) async fn run(inner: Arc<ManagerInner>, mut shutdown: watch::Receiver<bool>) {
    let expire = inner.config.expire_time();
    let period = expire.min(MAX_SWEEP_PERIOD).max(Duration::from_millis(1));
    let mut ticks = tokio::time::interval(period);
    info!(period_ms = period.as_millis() as u64, "expiry monitor started");

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                sweep(&inner, expire.as_millis() as i64).await;
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
    info!("expiry monitor stopped");
}

/// Walks the queue from the oldest entry. Holds enter in timestamp order, so
/// once a live, unexpired entry is reached everything behind it is newer and
/// the sweep can stop.
async fn sweep(inner: &ManagerInner, expire_ms: i64) {
    loop {
        let Some(entry) = inner.expiry_queue.front_cloned() else {
            break;
        };
        let age_ms = Utc::now().timestamp_millis() - entry.hold_time_ms;
        if age_ms > expire_ms {
            inner.expiry_queue.pop_front();
            if !inner.reclaim_expired_hold(&entry).await {
                // Persisting the reclamation failed; leave the entry at the
                // head and try again next tick.
                inner.expiry_queue.push_front(entry);
                break;
            }
        } else if inner.hold_is_current(&entry).await {
            break;
        } else {
            // Cancelled or bought since it was enqueued.
            inner.expiry_queue.pop_front();
        }
    }
}
