//! Run lifecycle supervision (§4, §4.4).
//!
//! Owns one "run" at a time: connect, discover enabled categories, build the
//! provider registry, start subscriptions, and spin up the aggregator and
//! submitter. A background health loop probes the chain and restarts the
//! whole run after [`HEALTH_FAILURE_RESTART_THRESHOLD`] consecutive failed
//! probes; the outer `run_forever` loop keeps doing that until asked to shut
//! down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{default_pool_size, Aggregator};
use crate::chain::{ChainClient, RpcChainClient};
use crate::constants::{HEALTH_FAILURE_RESTART_THRESHOLD, HEALTH_LOOP_BASE_INTERVAL, SHUTDOWN_DEADLINE, STATUS_PROBE_DEADLINE};
use crate::keyring::Keyring;
use crate::metrics::Metrics;
use crate::providers::ProviderRegistry;
use crate::settings::Settings;
use crate::submitter::Submitter;
use crate::subscription::SubscriptionManager;
use crate::types::AccountState;

/// Builds the provider registry for a run. Supplied by the caller (the
/// `oracled` binary) since which concrete [`Provider`](crate::providers::Provider)
/// implementations exist is a deployment concern, not something the
/// supervisor should hardcode.
pub type ProviderRegistryFactory =
    Arc<dyn Fn(&[u32]) -> crate::providers::ProviderRegistryBuilder + Send + Sync>;

pub struct Supervisor {
    settings: Settings,
    keyring: Arc<dyn Keyring>,
    metrics: Arc<Metrics>,
    provider_factory: ProviderRegistryFactory,
    shutdown: CancellationToken,
}

/// Everything a single run owns, so tearing down is just dropping/cancelling
/// this and joining its tasks.
struct Run {
    cancellation: CancellationToken,
    tasks: JoinSet<()>,
    subscriptions: Arc<SubscriptionManager>,
    queries: Vec<crate::types::SubscribedQuery>,
}

impl Supervisor {
    pub fn new(
        settings: Settings,
        keyring: Arc<dyn Keyring>,
        metrics: Arc<Metrics>,
        provider_factory: ProviderRegistryFactory,
        shutdown: CancellationToken,
    ) -> Self {
        Self { settings, keyring, metrics, provider_factory, shutdown }
    }

    /// Runs until `shutdown` fires, restarting the underlying run whenever
    /// the health loop gives up on it.
    pub async fn run_forever(&self) -> anyhow::Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            let run_cancellation = self.shutdown.child_token();
            let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::connect(&self.settings.chain).await?);
            let run = self.start_run(chain.clone(), run_cancellation.clone()).await?;

            let restart = self.health_loop(chain, run_cancellation.clone()).await;
            self.teardown(run).await;

            if self.shutdown.is_cancelled() {
                tracing::info!("shutdown requested, not restarting run");
                return Ok(());
            }
            if !restart {
                return Ok(());
            }
            tracing::warn!("health loop exhausted its failure budget, restarting run");
        }
    }

    async fn start_run(&self, chain: Arc<dyn ChainClient>, cancellation: CancellationToken) -> anyhow::Result<Run> {
        let mut tasks = JoinSet::new();

        let enabled_categories = chain.get_enabled_categories().await?;
        let providers: Arc<ProviderRegistry> =
            Arc::new((self.provider_factory)(&enabled_categories).build(&enabled_categories)?);

        let account_snapshot = chain.get_account_info(&self.keyring.address()).await?;
        let account = Arc::new(AccountState::new(account_snapshot.account_number, account_snapshot.sequence));
        self.metrics.cached_sequence.set(account.sequence() as i64);

        let fee_market = chain.get_fee_market_params().await?;

        let provider_counts: Vec<String> = enabled_categories
            .iter()
            .map(|category| format!("{category}={}", providers.providers_for(*category).len()))
            .collect();
        tracing::info!(
            chain_id = %self.settings.chain.chain_id,
            address = %self.keyring.address(),
            categories = ?enabled_categories,
            providers = %provider_counts.join(","),
            "oracle daemon run started"
        );

        let submitter = Arc::new(Submitter::new(
            chain.clone(),
            self.keyring.clone(),
            account,
            self.settings.gas.clone(),
            fee_market.min_gas_price,
            self.metrics.clone(),
        ));
        tasks.spawn(submitter.clone().spawn_gas_price_refresh_loop(cancellation.clone()).wait_forever());

        let subscriptions = Arc::new(SubscriptionManager::new(chain.clone(), self.metrics.clone()));
        let (event_tx, mut event_rx) = mpsc::channel(256);
        let mut queries = Vec::new();
        for category in &enabled_categories {
            let query = crate::types::SubscribedQuery::new(format!("new_oracle_request_{category}"), "id");
            subscriptions.start(query.clone(), event_tx.clone());
            tracing::debug!(category, "subscription started");
            queries.push(query);
        }
        drop(event_tx);

        let aggregator = Arc::new(Aggregator::new(providers, self.metrics.clone()));
        let (task_tx, task_rx) = async_channel::bounded(256);
        let (report_tx, mut report_rx) = mpsc::channel(256);
        let mut workers = aggregator.spawn_worker_pool(default_pool_size(), task_rx, report_tx, cancellation.clone());
        tasks.spawn(async move { while workers.join_next().await.is_some() {} });

        {
            let chain = chain.clone();
            let cancellation = cancellation.clone();
            let task_tx = task_tx.clone();
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancellation.cancelled() => return,
                        received = event_rx.recv() => match received {
                            Some((query, event)) => {
                                let Some(request_id) = event.request_id_for(&query) else { continue };
                                let Some(category) = query
                                    .event_type
                                    .strip_prefix("new_oracle_request_")
                                    .and_then(|s| s.parse::<u32>().ok())
                                else {
                                    continue;
                                };
                                match chain.get_oracle_task(category, request_id).await {
                                    Ok(task) => { let _ = task_tx.send(task).await; }
                                    Err(e) => tracing::debug!(error = %e, "could not resolve oracle task"),
                                }
                            }
                            None => return,
                        },
                    }
                }
            });
        }

        {
            let cancellation = cancellation.clone();
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancellation.cancelled() => return,
                        received = report_rx.recv() => match received {
                            Some(report) => {
                                if let Err(e) = submitter.submit_report(report).await {
                                    tracing::warn!(error = %e, "report submission failed");
                                }
                            }
                            None => return,
                        },
                    }
                }
            });
        }

        Ok(Run { cancellation, tasks, subscriptions, queries })
    }

    async fn teardown(&self, mut run: Run) {
        run.cancellation.cancel();
        let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
            for query in &run.queries {
                run.subscriptions.stop(query).await;
            }
            while run.tasks.join_next().await.is_some() {}
        })
        .await;
    }

    /// Returns `true` if the run should be restarted (the failure streak hit
    /// the threshold), `false` if shutdown was requested instead.
    ///
    /// A failed probe does not wait a full [`HEALTH_LOOP_BASE_INTERVAL`]
    /// before rechecking — per §4.4, streak counts 1 and 2 instead recheck
    /// after `2^streak` seconds, so three consecutive failures trigger a
    /// restart in `2 + 4 = 6` seconds after the first failure rather than
    /// two more full base intervals.
    async fn health_loop(&self, chain: Arc<dyn ChainClient>, cancellation: CancellationToken) -> bool {
        let mut failures: u32 = 0;
        loop {
            let wait = if failures == 0 { HEALTH_LOOP_BASE_INTERVAL } else { Duration::from_secs(2u64.pow(failures)) };
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = cancellation.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }

            let healthy = tokio::time::timeout(STATUS_PROBE_DEADLINE, chain.status()).await.map(|r| r.is_ok()).unwrap_or(false);
            if healthy {
                failures = 0;
                self.metrics.health_failure_streak.set(0);
                continue;
            }

            failures += 1;
            self.metrics.health_failure_streak.set(failures as i64);
            if failures >= HEALTH_FAILURE_RESTART_THRESHOLD {
                tracing::error!(failures, "status probe failed, restarting run");
                return true;
            }
            tracing::warn!(failures, "status probe failed, rechecking with backoff");
        }
    }
}

/// Adapts a `JoinHandle<()>` into a task the outer `JoinSet` can own
/// uniformly alongside the other run tasks.
trait WaitForever {
    fn wait_forever(self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
}

impl WaitForever for tokio::task::JoinHandle<()> {
    fn wait_forever(self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let _ = self.await;
        })
    }
}
