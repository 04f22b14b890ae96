use tokio::sync::watch;

use turnstile_core::TicketError;

/// Tracks the count of tickets not yet purchased and releases sellout
/// waiters when it reaches zero.
///
/// Built on a `watch` channel: the decrement publishes the new value and
/// waiters observe it through the channel, so a decrement can never slip in
/// between a waiter's check and its registration.
pub(crate) struct CompletionGate {
    remaining: watch::Sender<u64>,
}

impl CompletionGate {
    /// `unsold` is the number of tickets whose loaded status is not Bought.
    pub fn new(unsold: u64) -> Self {
        let (remaining, _) = watch::channel(unsold);
        Self { remaining }
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    /// Records one more durably persisted purchase. Callers must only invoke
    /// this after the Bought record hit storage.
    pub fn record_sale(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Resolves once every ticket has been purchased.
    pub async fn wait_sold_out(&self) -> Result<(), TicketError> {
        let mut rx = self.remaining.subscribe();
        rx.wait_for(|remaining| *remaining == 0)
            .await
            .map(|_| ())
            .map_err(|_| TicketError::Interrupted)
    }
}
