use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The four lifecycle states of a ticket.
///
/// The purchased side is split into `Buying` and `Bought` so the manager can
/// recover from a crash mid-purchase: intent to purchase is persisted first,
/// and only then is the purchase service called. A ticket found in `Buying`
/// at startup is one the process crashed on before recording the outcome, and
/// the purchase can be safely re-issued because the service is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Open for holding. The only valid next state is `Held`.
    Available,
    /// Reserved by a user. Moves to `Available` on cancel or expiry, or to
    /// `Buying` when a purchase begins.
    Held,
    /// Purchase intent persisted; the purchase service call may be in flight.
    Buying,
    /// Purchase confirmed by the service. Terminal.
    Bought,
}

impl TicketStatus {
    /// True while a user actively holds the ticket (`Held` or `Buying`).
    pub fn is_active_hold(&self) -> bool {
        matches!(self, TicketStatus::Held | TicketStatus::Buying)
    }

    /// `Bought` is terminal; nothing transitions away from it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Bought)
    }
}

/// A single inventory item. Ticket ids are assigned externally before the
/// manager ever sees them; inventory is fixed for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub status: TicketStatus,
    /// Holder, present while the status is `Held`, `Buying` or `Bought`.
    pub user_id: Option<String>,
    /// Token minted fresh on each successful hold. Retained after purchase
    /// as an audit trail, never reused across hold episodes.
    pub hold_tx_id: Option<String>,
    /// Wall-clock hold creation time, epoch milliseconds. Zero when available.
    pub hold_time_ms: i64,
    /// Token returned by the purchase service. Present iff `Bought`.
    pub buy_tx_id: Option<String>,
}

impl Ticket {
    /// A fresh, available ticket.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TicketStatus::Available,
            user_id: None,
            hold_tx_id: None,
            hold_time_ms: 0,
            buy_tx_id: None,
        }
    }

    /// True when `user_id` and `hold_tx_id` both match the persisted values.
    pub fn holder_matches(&self, user_id: &str, hold_tx_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id) && self.hold_tx_id.as_deref() == Some(hold_tx_id)
    }

    /// Available → Held. Records the holder, the new transaction token and
    /// the hold timestamp.
    pub fn hold(&mut self, user_id: impl Into<String>, hold_tx_id: impl Into<String>) {
        debug_assert_eq!(self.status, TicketStatus::Available);
        self.status = TicketStatus::Held;
        self.user_id = Some(user_id.into());
        self.hold_tx_id = Some(hold_tx_id.into());
        self.hold_time_ms = Utc::now().timestamp_millis();
    }

    /// Held → Available. Clears holder, transaction token and timestamp.
    pub fn clear_hold(&mut self) {
        debug_assert_eq!(self.status, TicketStatus::Held);
        self.status = TicketStatus::Available;
        self.user_id = None;
        self.hold_tx_id = None;
        self.hold_time_ms = 0;
    }

    /// Held → Buying. Holder and token are kept; callers must persist this
    /// state before issuing the purchase call.
    pub fn begin_purchase(&mut self) {
        debug_assert_eq!(self.status, TicketStatus::Held);
        self.status = TicketStatus::Buying;
    }

    /// Buying → Bought. Records the purchase service's transaction token;
    /// holder and hold token are retained for audit.
    pub fn complete_purchase(&mut self, buy_tx_id: impl Into<String>) {
        debug_assert_eq!(self.status, TicketStatus::Buying);
        self.status = TicketStatus::Bought;
        self.buy_tx_id = Some(buy_tx_id.into());
    }

    /// Bought → Buying, used only when persisting the Bought record failed
    /// and the purchase must remain retryable from durable state.
    pub fn revert_to_buying(&mut self) {
        debug_assert_eq!(self.status, TicketStatus::Bought);
        self.status = TicketStatus::Buying;
        self.buy_tx_id = None;
    }

    /// Buying → Held, used only when persisting the Buying record failed and
    /// the purchase call was therefore never issued.
    pub fn revert_to_held(&mut self) {
        debug_assert_eq!(self.status, TicketStatus::Buying);
        self.status = TicketStatus::Held;
    }
}
