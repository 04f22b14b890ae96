use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

use crate::error::PurchaseError;

/// Client for the external purchase service.
///
/// `buy` is the irrevocable action that converts a hold into a sale. The
/// contract requires idempotent replay: calling `buy` again for the same
/// (ticket, user) pair after a crash or a lost response must return the
/// transaction id of the already-completed purchase rather than selling the
/// ticket twice. The manager's retry and crash-recovery paths depend on this.
#[async_trait]
pub trait PurchaseClient: Send + Sync {
    /// Purchases a ticket on behalf of a user, returning the buy transaction
    /// id. Blocks until the service confirms. May fail with
    /// [`PurchaseError::Transient`], in which case the caller retries after
    /// a backoff.
    async fn buy(&self, ticket_id: &str, user_id: &str) -> Result<String, PurchaseError>;
}

/// In-process purchase service with real idempotent replay, artificial
/// latency and injectable transient failures.
///
/// The transaction id for a (ticket, user) pair is committed to the replay
/// map before any failure can be injected, modelling a service that completed
/// the sale but lost the response in transit: the retry observes the same id.
pub struct SimulatedPurchaseService {
    completed: Mutex<HashMap<(String, String), String>>,
    failure_ratio: f64,
    max_latency: Duration,
}

impl SimulatedPurchaseService {
    /// A service that always succeeds after a small random delay.
    pub fn new() -> Self {
        Self::with_failures(0.0)
    }

    /// A service where each call fails transiently with the given
    /// probability (after the sale has already been committed internally).
    pub fn with_failures(failure_ratio: f64) -> Self {
        Self {
            completed: Mutex::new(HashMap::new()),
            failure_ratio,
            max_latency: Duration::from_millis(50),
        }
    }

    /// Number of distinct (ticket, user) purchases committed so far.
    pub fn committed_count(&self) -> usize {
        self.completed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for SimulatedPurchaseService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PurchaseClient for SimulatedPurchaseService {
    async fn buy(&self, ticket_id: &str, user_id: &str) -> Result<String, PurchaseError> {
        let (latency, fail) = {
            let mut rng = rand::thread_rng();
            (
                self.max_latency.mul_f64(rng.gen::<f64>()),
                rng.gen::<f64>() < self.failure_ratio,
            )
        };
        sleep(latency).await;

        let tx_id = {
            let mut completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
            let key = (ticket_id.to_string(), user_id.to_string());
            if let Some(existing) = completed.get(&key) {
                debug!(%ticket_id, %user_id, "replaying already-committed purchase");
                existing.clone()
            } else {
                let fresh = Uuid::new_v4().to_string();
                completed.insert(key, fresh.clone());
                fresh
            }
        };

        if fail {
            return Err(PurchaseError::Transient(format!(
                "purchase response lost for ticket {ticket_id}"
            )));
        }
        Ok(tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_returns_same_transaction_id() {
        let service = SimulatedPurchaseService::new();
        let first = service.buy("t-1", "alice").await.unwrap();
        let second = service.buy("t-1", "alice").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.committed_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_pairs_get_distinct_ids() {
        let service = SimulatedPurchaseService::new();
        let a = service.buy("t-1", "alice").await.unwrap();
        let b = service.buy("t-2", "alice").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_failed_call_still_commits_the_sale() {
        let service = SimulatedPurchaseService::with_failures(1.0);
        let err = service.buy("t-1", "alice").await.unwrap_err();
        assert!(matches!(err, PurchaseError::Transient(_)));
        // The sale went through even though the response was lost.
        assert_eq!(service.committed_count(), 1);
    }
}
