//! Health and metrics HTTP endpoint.
//!
//! Returns `200 OK` on `/health` so external orchestration can probe the
//! daemon's liveness, and renders the Prometheus registry on `/metrics`.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use warp::Filter;

use crate::metrics::Metrics;
use crate::settings::HealthCheckSettings;

pub async fn serve(settings: &HealthCheckSettings, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let ip = IpAddr::from_str(&settings.hostname)
        .unwrap_or_else(|_| IpAddr::from_str("0.0.0.0").unwrap());
    let addr = SocketAddr::new(ip, settings.port);

    let health = warp::path("health").map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let metrics_route = {
        let metrics = metrics.clone();
        warp::path("metrics").map(move || warp::reply::with_header(
            metrics.render(),
            "content-type",
            "text/plain; version=0.0.4",
        ))
    };

    tracing::info!(%addr, "starting health/metrics endpoint");
    warp::serve(health.or(metrics_route)).run(addr).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_route_returns_200() {
        let filter = warp::path("health")
            .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));
        let response = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn metrics_route_renders_registered_metric() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.tasks_dropped_no_samples.inc();
        let filter = {
            let metrics = metrics.clone();
            warp::path("metrics").map(move || metrics.render())
        };
        let response = warp::test::request().path("/metrics").reply(&filter).await;
        assert!(String::from_utf8_lossy(response.body())
            .contains("oracle_tasks_dropped_no_samples_total"));
    }
}
