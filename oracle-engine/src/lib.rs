//! Off-chain oracle reporting daemon core.
//!
//! The binary crate (`oracled`) is a thin CLI shell around [`run`]; this
//! crate holds everything else: chain RPC access, price providers,
//! subscription handling, aggregation, submission, and the supervisor that
//! ties a run's lifecycle together.

pub mod aggregator;
pub mod chain;
pub mod constants;
pub mod decimal;
pub mod errors;
pub mod health;
pub mod keyring;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod settings;
pub mod submitter;
pub mod subscription;
pub mod supervisor;
pub mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::keyring::Keyring;
use crate::metrics::Metrics;
use crate::providers::{CoinbaseProvider, ProviderRegistryBuilder};
use crate::settings::Settings;
use crate::supervisor::{ProviderRegistryFactory, Supervisor};

/// Builds the default provider registry: every chain-enabled category gets
/// the same reference provider. A deployment with per-category or
/// additional providers would supply its own [`ProviderRegistryFactory`]
/// instead of calling this.
pub fn default_provider_factory() -> ProviderRegistryFactory {
    Arc::new(|categories: &[u32]| {
        let mut builder = ProviderRegistryBuilder::new();
        for &category in categories {
            let _ = builder.register(category, Arc::new(CoinbaseProvider::new()));
        }
        builder
    })
}

/// Runs the daemon until `shutdown` is cancelled, restarting runs internally
/// per the supervisor's health loop. Starts the health/metrics endpoint
/// alongside the main run loop.
pub async fn run(
    settings: Settings,
    keyring: Arc<dyn Keyring>,
    provider_factory: ProviderRegistryFactory,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);

    let health_settings = settings.health_check.clone();
    let health_metrics = metrics.clone();
    let health_shutdown = shutdown.clone();
    let health_task = tokio::spawn(async move {
        tokio::select! {
            _ = health_shutdown.cancelled() => {}
            result = health::serve(&health_settings, health_metrics) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "health endpoint exited");
                }
            }
        }
    });

    let supervisor = Supervisor::new(settings, keyring, metrics, provider_factory, shutdown);
    let result = supervisor.run_forever().await;
    health_task.abort();
    result
}
