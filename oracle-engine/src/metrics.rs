//! Prometheus metrics, exposed alongside the health endpoint (§4.4 / AMBIENT).

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub tasks_processed: IntCounterVec,
    pub tasks_dropped_no_samples: prometheus::IntCounter,
    pub broadcasts_by_code: IntCounterVec,
    pub cached_sequence: IntGauge,
    pub subscription_restarts: prometheus::IntCounter,
    pub health_failure_streak: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tasks_processed = IntCounterVec::new(
            Opts::new("oracle_tasks_processed_total", "Tasks that produced a report"),
            &["category"],
        )?;
        let tasks_dropped_no_samples = prometheus::IntCounter::new(
            "oracle_tasks_dropped_no_samples_total",
            "Tasks dropped because every provider failed",
        )?;
        let broadcasts_by_code = IntCounterVec::new(
            Opts::new("oracle_broadcasts_total", "Broadcast attempts by result code"),
            &["code"],
        )?;
        let cached_sequence =
            IntGauge::new("oracle_cached_sequence", "Current cached account sequence number")?;
        let subscription_restarts = prometheus::IntCounter::new(
            "oracle_subscription_restarts_total",
            "Subscriptions re-established by the liveness loop",
        )?;
        let health_failure_streak = IntGauge::new(
            "oracle_health_failure_streak",
            "Consecutive failed status probes in the current streak",
        )?;

        registry.register(Box::new(tasks_processed.clone()))?;
        registry.register(Box::new(tasks_dropped_no_samples.clone()))?;
        registry.register(Box::new(broadcasts_by_code.clone()))?;
        registry.register(Box::new(cached_sequence.clone()))?;
        registry.register(Box::new(subscription_restarts.clone()))?;
        registry.register(Box::new(health_failure_streak.clone()))?;

        Ok(Self {
            registry,
            tasks_processed,
            tasks_dropped_no_samples,
            broadcasts_by_code,
            cached_sequence,
            subscription_restarts,
            health_failure_streak,
        })
    }

    pub fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        let _ = encoder.encode(&metric_families, &mut buf);
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_registered_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.tasks_dropped_no_samples.inc();
        let rendered = metrics.render();
        assert!(rendered.contains("oracle_tasks_dropped_no_samples_total"));
    }
}
