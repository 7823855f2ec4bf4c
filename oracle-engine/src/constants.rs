use std::time::Duration;

/// Maximum number of providers registered per category.
pub const MAX_PROVIDERS_PER_CATEGORY: usize = 10;

/// Default interval of the subscription manager's liveness tick (§4.1).
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded deadline for an `unsubscribe` call during shutdown.
pub const UNSUBSCRIBE_DEADLINE: Duration = Duration::from_secs(5);

/// Default HTTP client timeout used by all price providers.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Base interval of the supervisor's health loop.
pub const HEALTH_LOOP_BASE_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded deadline for a single status probe.
pub const STATUS_PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Consecutive health-probe failures before the supervisor restarts the run.
pub const HEALTH_FAILURE_RESTART_THRESHOLD: u32 = 3;

/// Bounded deadline for the whole shutdown sequence of a run.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Interval at which the gas-price refresh loop re-queries fee-market parameters.
pub const GAS_PRICE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Domain separation tag prefixed to every report's canonical sign bytes.
pub const REPORT_DOMAIN_TAG: &[u8] = b"oracled/report/v1";

/// Home directory layout, relative to the user-supplied home path.
pub const CONFIG_SUBDIR: &str = ".oracled";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub fn keyring_subdir(backend: &str) -> String {
    format!("keyring-{backend}")
}
