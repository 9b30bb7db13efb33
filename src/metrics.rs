//! Prometheus metrics surface, installed once at startup. After `install()`
//! the `metrics` crate macros can be used anywhere in the process; the
//! `PrometheusHandle` here is retained solely to render `/metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "tunnelgate_connections_total",
            Unit::Count,
            "Accepted public TCP connections on the server listener"
        );
        describe_counter!(
            "tunnelgate_requests_total",
            Unit::Count,
            "Tunneled requests by outcome (ok, timeout, bad_gateway)"
        );
        describe_histogram!(
            "tunnelgate_request_duration_seconds",
            Unit::Seconds,
            "End-to-end latency of a tunneled request as seen by the public caller"
        );
        describe_gauge!(
            "tunnelgate_pending_requests",
            Unit::Count,
            "Number of requests currently awaiting a correlated response"
        );
        describe_gauge!(
            "tunnelgate_tunnel_connected",
            Unit::Count,
            "1 when a tunnel client is attached, 0 otherwise"
        );
        describe_counter!(
            "tunnelgate_reconnect_attempts_total",
            Unit::Count,
            "Client redial attempts toward the exit server"
        );

        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
