use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use turnstile_core::Ticket;

/// One ticket plus the lock guarding its transition window. The lock is held
/// for an in-memory transition and the single persist recording it, never
/// across a purchase-service call.
pub(crate) struct TicketSlot {
    pub lock: Mutex<Ticket>,
}

/// Authoritative in-process map from ticket id to ticket. Built once at
/// startup from storage; the set of ids never changes afterwards.
pub(crate) struct TicketIndex {
    slots: HashMap<String, Arc<TicketSlot>>,
}

impl TicketIndex {
    pub fn new(tickets: Vec<Ticket>) -> Self {
        let slots = tickets
            .into_iter()
            .map(|ticket| {
                (
                    ticket.id.clone(),
                    Arc::new(TicketSlot {
                        lock: Mutex::new(ticket),
                    }),
                )
            })
            .collect();
        Self { slots }
    }

    pub fn get(&self, ticket_id: &str) -> Option<Arc<TicketSlot>> {
        self.slots.get(ticket_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Clones every ticket's current state, ordered by id. Read-only view
    /// for inspection; each slot lock is taken briefly in turn, so the
    /// result is per-ticket consistent rather than a global atomic snapshot.
    pub async fn snapshot(&self) -> Vec<Ticket> {
        let mut tickets = Vec::with_capacity(self.slots.len());
        for slot in self.slots.values() {
            tickets.push(slot.lock.lock().await.clone());
        }
        tickets.sort_by(|a, b| a.id.cmp(&b.id));
        tickets
    }
}
