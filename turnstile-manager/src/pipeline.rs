use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::warn;

use turnstile_core::{PurchaseClient, PurchaseError, TicketError};

use crate::config::RetryConfig;

/// Bounded admission into the external purchase service.
///
/// A fixed number of permits caps concurrent purchase calls; transient
/// failures are retried with a fixed backoff under the same permit. The
/// external call is idempotent, so a retry after a lost response cannot
/// double-sell.
pub(crate) struct PurchasePipeline {
    client: Arc<dyn PurchaseClient>,
    permits: Arc<Semaphore>,
    workers: u32,
    retry: RetryConfig,
}

impl PurchasePipeline {
    pub fn new(client: Arc<dyn PurchaseClient>, workers: usize, retry: RetryConfig) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(workers)),
            workers: workers as u32,
            retry,
        }
    }

    /// Executes one purchase, waiting for a worker slot first. Returns the
    /// buy transaction id, or `ShuttingDown` if the pipeline was drained
    /// while waiting for a slot, or `PurchaseFailed` once a bounded retry
    /// policy is exhausted.
    pub async fn purchase(&self, ticket_id: &str, user_id: &str) -> Result<String, TicketError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TicketError::ShuttingDown)?;

        let mut attempt: u32 = 0;
        loop {
            match self.client.buy(ticket_id, user_id).await {
                Ok(buy_tx_id) => return Ok(buy_tx_id),
                Err(PurchaseError::Transient(reason)) => {
                    attempt += 1;
                    if let Some(max) = self.retry.max_attempts {
                        if attempt >= max {
                            warn!(%ticket_id, attempt, "giving up on purchase after retry budget");
                            return Err(TicketError::PurchaseFailed(ticket_id.to_string()));
                        }
                    }
                    warn!(%ticket_id, attempt, %reason, "transient purchase failure, backing off");
                    sleep(self.retry.backoff()).await;
                }
            }
        }
    }

    /// Waits for every in-flight call to finish, then rejects all further
    /// admissions. In-flight purchases are never aborted: the external
    /// effect may already have happened.
    pub async fn drain(&self) {
        if let Ok(all) = self.permits.acquire_many(self.workers).await {
            all.forget();
        }
        self.permits.close();
    }
}
