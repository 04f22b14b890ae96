use async_trait::async_trait;

use crate::error::StoreError;
use crate::ticket::Ticket;

/// Durable storage for ticket records.
///
/// Implementations are not assumed to be safe under concurrent access; the
/// manager serializes every call through a single persistence lock. `update`
/// must be atomic: a crash mid-update leaves either the old record or the new
/// one, never a torn record.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Snapshot read of every stored ticket, taken once at startup.
    /// Ordering is not significant.
    async fn load_all(&self) -> Result<Vec<Ticket>, StoreError>;

    /// Persists the complete current state of one ticket, replacing its
    /// prior record.
    async fn update(&self, ticket: &Ticket) -> Result<(), StoreError>;
}
