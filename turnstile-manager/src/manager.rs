use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};
use uuid::Uuid;

use turnstile_core::{
    PurchaseClient, StoreError, Ticket, TicketError, TicketStatus, TicketStore,
};

use crate::config::ManagerConfig;
use crate::expiry::{self, ExpiryEntry, ExpiryQueue};
use crate::gate::CompletionGate;
use crate::index::TicketIndex;
use crate::pipeline::PurchasePipeline;

/// Coordinates concurrent holds, cancellations and purchases over a fixed
/// ticket inventory.
///
/// The manager is the sole authority over its loaded ticket set within one
/// process. Every transition is persisted before the action it authorizes is
/// taken: a hold transaction id is only handed out after the Held record is
/// durable, the purchase service is only called after the Buying record is
/// durable, and the sellout counter only drops after the Bought record is
/// durable. That ordering is what makes a crash at any point recoverable
/// without losing or double-selling a ticket.
pub struct TicketManager {
    inner: Arc<ManagerInner>,
    shutdown_tx: watch::Sender<bool>,
    expiry_task: StdMutex<Option<JoinHandle<()>>>,
    recovery_tasks: AsyncMutex<JoinSet<()>>,
}

/// Shared state behind the manager's operations and its background tasks.
pub(crate) struct ManagerInner {
    pub(crate) index: TicketIndex,
    store: Arc<dyn TicketStore>,
    /// The store is not assumed safe under concurrent access; every update
    /// goes through this lock.
    persist_lock: AsyncMutex<()>,
    pub(crate) pipeline: PurchasePipeline,
    pub(crate) gate: CompletionGate,
    /// Count of tickets in {Available, Held}, for lock-free reads.
    available: AtomicU64,
    pub(crate) expiry_queue: ExpiryQueue,
    pub(crate) config: ManagerConfig,
    shutting_down: AtomicBool,
}

impl ManagerInner {
    async fn persist(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let _serialized = self.persist_lock.lock().await;
        self.store.update(ticket).await
    }

    fn ensure_running(&self) -> Result<(), TicketError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(TicketError::ShuttingDown);
        }
        Ok(())
    }

    /// True while the entry still describes the ticket's live hold episode.
    pub(crate) async fn hold_is_current(&self, entry: &ExpiryEntry) -> bool {
        let Some(slot) = self.index.get(&entry.ticket_id) else {
            return false;
        };
        let ticket = slot.lock.lock().await;
        ticket.status == TicketStatus::Held
            && ticket.hold_tx_id.as_deref() == Some(entry.hold_tx_id.as_str())
    }

    /// Reclaims one expired hold, using the ticket's own persisted holder and
    /// transaction id. Returns false only when persisting the reclamation
    /// failed and the entry should be retried.
    pub(crate) async fn reclaim_expired_hold(&self, entry: &ExpiryEntry) -> bool {
        let Some(slot) = self.index.get(&entry.ticket_id) else {
            return true;
        };
        let mut ticket = slot.lock.lock().await;
        if ticket.status != TicketStatus::Held
            || ticket.hold_tx_id.as_deref() != Some(entry.hold_tx_id.as_str())
        {
            // Cancelled, bought, or re-held since this entry was queued.
            return true;
        }
        let before = ticket.clone();
        ticket.clear_hold();
        match self.persist(&ticket).await {
            Ok(()) => {
                info!(ticket_id = %entry.ticket_id, "hold expired, ticket reclaimed");
                true
            }
            Err(e) => {
                *ticket = before;
                error!(ticket_id = %entry.ticket_id, error = %e, "failed to persist hold expiry");
                false
            }
        }
    }

    /// Runs the purchase call through the pipeline and records the outcome.
    /// Callers must have durably persisted the Buying record first; this is
    /// the shared tail of `buy` and of crash recovery.
    pub(crate) async fn finish_purchase(
        &self,
        ticket_id: &str,
        user_id: &str,
    ) -> Result<String, TicketError> {
        let buy_tx_id = self.pipeline.purchase(ticket_id, user_id).await?;

        let slot = self
            .index
            .get(ticket_id)
            .ok_or_else(|| TicketError::NotFound(ticket_id.to_string()))?;
        let mut ticket = slot.lock.lock().await;
        if ticket.status == TicketStatus::Bought {
            // A concurrent re-entry of the same purchase already recorded the
            // sale; the idempotent service returned the equivalent result.
            return Ok(ticket.buy_tx_id.clone().unwrap_or(buy_tx_id));
        }
        ticket.complete_purchase(buy_tx_id.as_str());
        if let Err(e) = self.persist(&ticket).await {
            // Keep the durable Buying record authoritative so a later
            // recovery pass can finish the purchase.
            ticket.revert_to_buying();
            error!(%ticket_id, error = %e, "failed to persist completed purchase");
            return Err(e.into());
        }
        drop(ticket);

        self.gate.record_sale();
        info!(%ticket_id, %user_id, remaining = self.gate.remaining(), "ticket purchased");
        Ok(buy_tx_id)
    }
}

impl TicketManager {
    /// Loads the ticket set from the store, starts the expiry monitor and
    /// resumes any purchase that a previous process crashed in the middle of.
    pub async fn new(
        config: ManagerConfig,
        store: Arc<dyn TicketStore>,
        client: Arc<dyn PurchaseClient>,
    ) -> Result<Self, TicketError> {
        let tickets = store.load_all().await?;

        let mut available: u64 = 0;
        let mut unsold: u64 = 0;
        let mut interrupted: Vec<(String, String)> = Vec::new();
        let mut tracked_holds: Vec<ExpiryEntry> = Vec::new();
        let now = Utc::now().timestamp_millis();

        let mut loaded = Vec::with_capacity(tickets.len());
        for mut ticket in tickets {
            match ticket.status {
                TicketStatus::Available => available += 1,
                TicketStatus::Held => {
                    available += 1;
                    // The record format carries no timestamp, so the expiry
                    // window restarts from load time.
                    ticket.hold_time_ms = now;
                    if let Some(hold_tx_id) = ticket.hold_tx_id.clone() {
                        tracked_holds.push(ExpiryEntry {
                            ticket_id: ticket.id.clone(),
                            hold_tx_id,
                            hold_time_ms: now,
                        });
                    }
                }
                TicketStatus::Buying => {
                    if let Some(user_id) = ticket.user_id.clone() {
                        interrupted.push((ticket.id.clone(), user_id));
                    }
                }
                TicketStatus::Bought => {}
            }
            if ticket.status != TicketStatus::Bought {
                unsold += 1;
            }
            loaded.push(ticket);
        }

        let inner = Arc::new(ManagerInner {
            index: TicketIndex::new(loaded),
            store,
            persist_lock: AsyncMutex::new(()),
            pipeline: PurchasePipeline::new(
                client,
                config.purchase_workers,
                config.retry.clone(),
            ),
            gate: CompletionGate::new(unsold),
            available: AtomicU64::new(available),
            expiry_queue: ExpiryQueue::default(),
            config,
            shutting_down: AtomicBool::new(false),
        });
        for entry in tracked_holds {
            inner.expiry_queue.push_back(entry);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let expiry_task = tokio::spawn(expiry::run(inner.clone(), shutdown_rx));

        let mut recovery_tasks = JoinSet::new();
        for (ticket_id, user_id) in interrupted {
            let inner = inner.clone();
            recovery_tasks.spawn(async move {
                info!(%ticket_id, "resuming purchase interrupted by a crash");
                if let Err(e) = inner.finish_purchase(&ticket_id, &user_id).await {
                    error!(%ticket_id, error = %e, "crash recovery purchase failed");
                }
            });
        }

        info!(total = inner.index.len(), available, unsold, "ticket manager started");
        Ok(Self {
            inner,
            shutdown_tx,
            expiry_task: StdMutex::new(Some(expiry_task)),
            recovery_tasks: AsyncMutex::new(recovery_tasks),
        })
    }

    /// Reserves a ticket for a user and returns the hold transaction id.
    ///
    /// Holding a ticket the same user already holds is idempotent: the
    /// existing transaction id comes back unchanged and the hold clock is not
    /// reset. A hold by anyone else fails with `Conflict`.
    pub async fn hold(&self, user_id: &str, ticket_id: &str) -> Result<String, TicketError> {
        self.inner.ensure_running()?;
        let slot = self
            .inner
            .index
            .get(ticket_id)
            .ok_or_else(|| TicketError::NotFound(ticket_id.to_string()))?;
        let mut ticket = slot.lock.lock().await;

        match ticket.status {
            TicketStatus::Bought => Err(TicketError::AlreadySold(ticket_id.to_string())),
            TicketStatus::Buying => Err(TicketError::InProgress(ticket_id.to_string())),
            TicketStatus::Held => {
                if ticket.user_id.as_deref() != Some(user_id) {
                    return Err(TicketError::Conflict(ticket_id.to_string()));
                }
                match ticket.hold_tx_id.clone() {
                    Some(existing) => Ok(existing),
                    // Unreachable while the Held invariants hold.
                    None => Err(TicketError::Conflict(ticket_id.to_string())),
                }
            }
            TicketStatus::Available => {
                let hold_tx_id = Uuid::new_v4().to_string();
                ticket.hold(user_id, hold_tx_id.as_str());
                if let Err(e) = self.inner.persist(&ticket).await {
                    ticket.clear_hold();
                    return Err(e.into());
                }
                self.inner.expiry_queue.push_back(ExpiryEntry {
                    ticket_id: ticket.id.clone(),
                    hold_tx_id: hold_tx_id.clone(),
                    hold_time_ms: ticket.hold_time_ms,
                });
                info!(%ticket_id, %user_id, "ticket held");
                Ok(hold_tx_id)
            }
        }
    }

    /// Releases a hold. Cancelling a ticket with no active hold succeeds as a
    /// no-op, so racing against expiry or another cancel is harmless.
    pub async fn cancel(
        &self,
        user_id: &str,
        ticket_id: &str,
        hold_tx_id: &str,
    ) -> Result<(), TicketError> {
        self.inner.ensure_running()?;
        let slot = self
            .inner
            .index
            .get(ticket_id)
            .ok_or_else(|| TicketError::NotFound(ticket_id.to_string()))?;
        let mut ticket = slot.lock.lock().await;

        match ticket.status {
            TicketStatus::Available => Ok(()),
            TicketStatus::Bought => Err(TicketError::AlreadySold(ticket_id.to_string())),
            TicketStatus::Buying => Err(TicketError::InProgress(ticket_id.to_string())),
            TicketStatus::Held => {
                if !ticket.holder_matches(user_id, hold_tx_id) {
                    return Err(TicketError::Conflict(ticket_id.to_string()));
                }
                let before = ticket.clone();
                ticket.clear_hold();
                if let Err(e) = self.inner.persist(&ticket).await {
                    *ticket = before;
                    return Err(e.into());
                }
                info!(%ticket_id, %user_id, "hold cancelled");
                Ok(())
            }
        }
    }

    /// Converts a hold into a purchase and returns the buy transaction id.
    ///
    /// The Buying record is persisted before the purchase service is called;
    /// the returned future resolves once the (possibly retried) purchase
    /// completes and the Bought record is durable. If the purchase cannot be
    /// completed the ticket stays durably Buying — never silently reverted to
    /// Available, because the external sale may already have happened.
    pub async fn buy(
        &self,
        user_id: &str,
        ticket_id: &str,
        hold_tx_id: &str,
    ) -> Result<String, TicketError> {
        self.inner.ensure_running()?;
        let slot = self
            .inner
            .index
            .get(ticket_id)
            .ok_or_else(|| TicketError::NotFound(ticket_id.to_string()))?;

        {
            let mut ticket = slot.lock.lock().await;
            match ticket.status {
                TicketStatus::Available => {
                    return Err(TicketError::NotHeld(ticket_id.to_string()))
                }
                TicketStatus::Bought => {
                    return Err(TicketError::AlreadySold(ticket_id.to_string()))
                }
                TicketStatus::Held => {
                    if !ticket.holder_matches(user_id, hold_tx_id) {
                        return Err(TicketError::Conflict(ticket_id.to_string()));
                    }
                    ticket.begin_purchase();
                    if let Err(e) = self.inner.persist(&ticket).await {
                        // The purchase call was never issued; the hold stands.
                        ticket.revert_to_held();
                        return Err(e.into());
                    }
                    self.inner.available.fetch_sub(1, Ordering::SeqCst);
                }
                TicketStatus::Buying => {
                    // Re-entry of an already persisted purchase intent; skip
                    // the re-persist and go straight to dispatch.
                    if !ticket.holder_matches(user_id, hold_tx_id) {
                        return Err(TicketError::Conflict(ticket_id.to_string()));
                    }
                }
            }
            // The slot lock is released here; the external call below must
            // not run under it.
        }

        self.inner.finish_purchase(ticket_id, user_id).await
    }

    /// Current count of tickets that can still be held (Available or Held).
    pub fn available_count(&self) -> u64 {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Resolves once every ticket's persisted record shows Bought.
    pub async fn await_all_bought(&self) -> Result<(), TicketError> {
        self.inner.gate.wait_sold_out().await
    }

    /// Read-only view of every ticket's current state, ordered by id.
    pub async fn snapshot(&self) -> Vec<Ticket> {
        self.inner.index.snapshot().await
    }

    /// Rejects further operations, stops the expiry monitor, and waits for
    /// in-flight purchase calls and recovery tasks to finish. An in-flight
    /// purchase is never aborted: the external effect may already have
    /// happened. Idempotent.
    pub async fn shutdown(&self) -> Result<(), TicketError> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("ticket manager shutting down");

        let _ = self.shutdown_tx.send(true);
        self.inner.pipeline.drain().await;

        let expiry_task = self
            .expiry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = expiry_task {
            task.await.map_err(|_| TicketError::Interrupted)?;
        }

        let mut recovery = self.recovery_tasks.lock().await;
        while recovery.join_next().await.is_some() {}

        info!("ticket manager stopped");
        Ok(())
    }
}
