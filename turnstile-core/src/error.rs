use thiserror::Error;

/// Failures raised by a ticket store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid ticket record: {line}")]
    InvalidRecord { line: String },

    #[error("no stored record for ticket: {0}")]
    UnknownTicket(String),
}

/// Failures raised by a purchase client. The external purchase action has no
/// permanent failure mode of its own; callers retry transient failures.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("transient purchase failure: {0}")]
    Transient(String),
}

/// The manager-level error surface.
///
/// Validation variants are returned before any state mutation. `Store`
/// failures abort the in-progress operation; the in-memory state is rolled
/// back so the ticket stays consistent with its durable record.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket not found: {0}")]
    NotFound(String),

    #[error("ticket already sold: {0}")]
    AlreadySold(String),

    #[error("purchase already in progress for ticket: {0}")]
    InProgress(String),

    #[error("ticket is not held: {0}")]
    NotHeld(String),

    #[error("user or hold transaction mismatch for ticket: {0}")]
    Conflict(String),

    #[error("manager is shutting down")]
    ShuttingDown,

    #[error("purchase for ticket {0} failed after exhausting retries")]
    PurchaseFailed(String),

    #[error("wait was interrupted")]
    Interrupted,

    #[error(transparent)]
    Store(#[from] StoreError),
}
