//! Provider fan-out and lower-median selection (§5).
//!
//! Each task is handed to every provider registered for its category; the
//! first fully-decoded replies are compared as exact decimals and the lower
//! median is kept. A category with zero surviving samples drops the task
//! rather than guessing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::constants::DEFAULT_PROVIDER_TIMEOUT;
use crate::decimal::parse_decimal;
use crate::metrics::Metrics;
use crate::providers::ProviderRegistry;
use crate::types::{OracleReport, OracleTask, ProviderSample};

pub struct Aggregator {
    providers: Arc<ProviderRegistry>,
    metrics: Arc<Metrics>,
}

impl Aggregator {
    pub fn new(providers: Arc<ProviderRegistry>, metrics: Arc<Metrics>) -> Self {
        Self { providers, metrics }
    }

    /// Runs one task to completion: fan out to every provider for its
    /// category, keep the ones that parse, and select the lower median.
    /// Returns `None` when every provider failed or returned unparseable
    /// data, in which case the caller is expected to simply move on.
    pub async fn process_task(&self, task: &OracleTask) -> Option<OracleReport> {
        let providers = self.providers.providers_for(task.category);
        if providers.is_empty() {
            tracing::warn!(category = task.category, "no providers registered for category");
            self.metrics.tasks_dropped_no_samples.inc();
            return None;
        }

        let mut fetches = JoinSet::new();
        for provider in providers {
            let provider = provider.clone();
            let symbol = task.symbol.clone();
            fetches.spawn(async move {
                let result = tokio::time::timeout(DEFAULT_PROVIDER_TIMEOUT, provider.fetch(&symbol)).await;
                (provider.id().to_string(), result)
            });
        }

        let mut samples = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            let (provider_id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!(error = %e, "provider fetch task panicked");
                    continue;
                }
            };
            let raw = match result {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    tracing::debug!(provider = %provider_id, error = %e, "provider fetch failed");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(provider = %provider_id, "provider fetch timed out");
                    continue;
                }
            };
            match parse_decimal(&raw) {
                Ok(parsed) => samples.push(ProviderSample { provider_id, raw, parsed }),
                Err(e) => tracing::debug!(provider = %provider_id, error = %e, "provider reply malformed"),
            }
        }

        let selected = select_lower_median(samples)?;
        self.metrics.tasks_processed.with_label_values(&[&task.category.to_string()]).inc();
        Some(OracleReport {
            request_id: task.request_id,
            raw_data: selected.raw,
            nonce: task.nonce,
            provider: String::new(),
            signature: Vec::new(),
        })
    }

    /// Spawns `pool_size` workers pulling tasks off `tasks` and pushing
    /// completed reports onto `reports`. Workers stop once `tasks` closes or
    /// `cancellation` fires, whichever happens first.
    pub fn spawn_worker_pool(
        self: Arc<Self>,
        pool_size: usize,
        tasks: async_channel::Receiver<OracleTask>,
        reports: mpsc::Sender<OracleReport>,
        cancellation: CancellationToken,
    ) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for _ in 0..pool_size {
            let aggregator = self.clone();
            let tasks = tasks.clone();
            let reports = reports.clone();
            let cancellation = cancellation.clone();
            workers.spawn(async move {
                loop {
                    let task = tokio::select! {
                        _ = cancellation.cancelled() => break,
                        received = tasks.recv() => match received {
                            Ok(task) => task,
                            Err(_) => break,
                        },
                    };
                    if let Some(report) = aggregator.process_task(&task).await {
                        if reports.send(report).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
        workers
    }
}

/// Default worker pool size: `2 * num_cpus`, matching the teacher's
/// CPU-scaled concurrency bound for fan-out workloads.
pub fn default_pool_size() -> usize {
    2 * num_cpus::get()
}

fn select_lower_median(mut samples: Vec<ProviderSample>) -> Option<ProviderSample> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.parsed.cmp(&b.parsed));
    let index = if samples.len() % 2 == 1 { samples.len() / 2 } else { samples.len() / 2 - 1 };
    Some(samples.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(raw: &str) -> ProviderSample {
        ProviderSample { provider_id: raw.to_string(), raw: raw.to_string(), parsed: parse_decimal(raw).unwrap() }
    }

    #[test]
    fn lower_median_of_odd_count_is_middle_value() {
        let samples = vec![sample("3"), sample("1"), sample("2")];
        let selected = select_lower_median(samples).unwrap();
        assert_eq!(selected.raw, "2");
    }

    #[test]
    fn lower_median_of_even_count_is_lower_middle_value() {
        let samples = vec![sample("4"), sample("1"), sample("3"), sample("2")];
        let selected = select_lower_median(samples).unwrap();
        assert_eq!(selected.raw, "2");
    }

    #[test]
    fn lower_median_of_empty_is_none() {
        assert!(select_lower_median(Vec::new()).is_none());
    }

    #[test]
    fn lower_median_of_single_sample_is_itself() {
        let samples = vec![sample("5")];
        assert_eq!(select_lower_median(samples).unwrap().raw, "5");
    }
}
