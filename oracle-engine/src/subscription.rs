//! Subscription manager (§4.1).
//!
//! Owns one websocket subscription per chain-enabled category and keeps it
//! alive across transient disconnects. Starting an already-`Active`
//! subscription is a no-op; stopping is bounded so shutdown never hangs on a
//! chain that stopped answering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::constants::{DEFAULT_LIVENESS_INTERVAL, UNSUBSCRIBE_DEADLINE};
use crate::metrics::Metrics;
use crate::types::{RawEvent, SubscribedQuery, SubscriptionStatus};

struct Handle {
    status: SubscriptionStatus,
    task: JoinHandle<()>,
    cancellation: CancellationToken,
}

/// Drives one `Inactive -> Starting -> Active` subscription per query,
/// re-establishing it on drop with a liveness tick when the chain closes the
/// stream without an explicit unsubscribe.
pub struct SubscriptionManager {
    chain: Arc<dyn ChainClient>,
    metrics: Arc<Metrics>,
    handles: Mutex<HashMap<SubscribedQuery, Handle>>,
}

impl SubscriptionManager {
    pub fn new(chain: Arc<dyn ChainClient>, metrics: Arc<Metrics>) -> Self {
        Self { chain, metrics, handles: Mutex::new(HashMap::new()) }
    }

    pub fn status_of(&self, query: &SubscribedQuery) -> SubscriptionStatus {
        self.handles.lock().unwrap().get(query).map(|h| h.status).unwrap_or(SubscriptionStatus::Inactive)
    }

    /// Idempotent: a query that is already `Starting` or `Active` is left
    /// untouched.
    pub fn start(self: &Arc<Self>, query: SubscribedQuery, events: mpsc::Sender<(SubscribedQuery, RawEvent)>) {
        let mut handles = self.handles.lock().unwrap();
        if handles.contains_key(&query) {
            return;
        }
        let cancellation = CancellationToken::new();
        let manager = self.clone();
        let task = {
            let query = query.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move { manager.run_subscription(query, events, cancellation).await })
        };
        handles.insert(query, Handle { status: SubscriptionStatus::Starting, task, cancellation });
    }

    /// Cancels the subscription task and asks the chain to drop it within
    /// [`UNSUBSCRIBE_DEADLINE`]; a chain that does not answer in time is
    /// abandoned rather than blocking shutdown.
    pub async fn stop(&self, query: &SubscribedQuery) {
        let handle = self.handles.lock().unwrap().remove(query);
        let Some(handle) = handle else { return };
        handle.cancellation.cancel();
        let _ = handle.task.await;
        match tokio::time::timeout(UNSUBSCRIBE_DEADLINE, self.chain.unsubscribe(query)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "unsubscribe rejected by chain"),
            Err(_) => tracing::warn!("unsubscribe did not complete within deadline, abandoning"),
        }
    }

    async fn run_subscription(
        self: Arc<Self>,
        query: SubscribedQuery,
        events: mpsc::Sender<(SubscribedQuery, RawEvent)>,
        cancellation: CancellationToken,
    ) {
        loop {
            let mut stream = match self.chain.subscribe(&query).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(query = %query.query_string(), error = %e, "subscribe failed, retrying");
                    if tokio::time::timeout(DEFAULT_LIVENESS_INTERVAL, cancellation.cancelled())
                        .await
                        .is_ok()
                    {
                        return;
                    }
                    continue;
                }
            };
            self.set_status(&query, SubscriptionStatus::Active);

            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => return,
                    event = stream.next() => match event {
                        Some(event) => {
                            if events.send((query.clone(), event)).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            tracing::info!(query = %query.query_string(), "subscription stream closed, re-establishing");
                            self.metrics.subscription_restarts.inc();
                            self.set_status(&query, SubscriptionStatus::Starting);
                            break;
                        }
                    },
                }
            }
        }
    }

    fn set_status(&self, query: &SubscribedQuery, status: SubscriptionStatus) {
        if let Some(handle) = self.handles.lock().unwrap().get_mut(query) {
            handle.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;

    fn test_metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn start_is_idempotent_for_an_already_active_query() {
        let mut mock = MockChainClient::new();
        mock.expect_subscribe().returning(|_| Ok(futures::stream::pending().boxed()));
        mock.expect_unsubscribe().returning(|_| Ok(()));
        let chain: Arc<dyn ChainClient> = Arc::new(mock);
        let manager = Arc::new(SubscriptionManager::new(chain, test_metrics()));
        let query = SubscribedQuery::new("new_oracle_request", "id");
        let (tx, _rx) = mpsc::channel(8);

        manager.start(query.clone(), tx.clone());
        manager.start(query.clone(), tx);

        assert_eq!(manager.handles.lock().unwrap().len(), 1);
        manager.stop(&query).await;
    }

    #[tokio::test]
    async fn stop_on_unknown_query_is_a_no_op() {
        let mock = MockChainClient::new();
        let chain: Arc<dyn ChainClient> = Arc::new(mock);
        let manager = Arc::new(SubscriptionManager::new(chain, test_metrics()));
        manager.stop(&SubscribedQuery::new("missing", "id")).await;
    }
}
