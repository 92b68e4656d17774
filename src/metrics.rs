//! Relay Prometheus metrics.

use std::{net::SocketAddr, time::Duration};

use metrics_exporter_prometheus::PrometheusBuilder;
use reth_metrics::metrics::{self, Counter, Gauge, Histogram};
use tracing::info;

/// Event intake counters.
#[derive(Debug, Clone)]
pub struct SubscriberMetrics {
    requests_observed: Counter,
    duplicates: Counter,
    undecodable_logs: Counter,
    reconnects: Counter,
}

impl SubscriberMetrics {
    pub fn new() -> Self {
        Self {
            requests_observed: metrics::counter!("randao_relay_requests_observed_total"),
            duplicates: metrics::counter!("randao_relay_requests_duplicate_total"),
            undecodable_logs: metrics::counter!("randao_relay_logs_undecodable_total"),
            reconnects: metrics::counter!("randao_relay_subscription_reconnects_total"),
        }
    }

    pub fn record_request(&self, fresh: bool) {
        if fresh {
            self.requests_observed.increment(1);
        } else {
            self.duplicates.increment(1);
        }
    }

    pub fn record_undecodable(&self) {
        self.undecodable_logs.increment(1);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.increment(1);
    }
}

impl Default for SubscriberMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fulfillment outcomes and latency.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    fulfilled: Counter,
    fetch_retries: Counter,
    in_flight: Gauge,
    fulfillment_latency: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            fulfilled: metrics::counter!("randao_relay_fulfillments_confirmed_total"),
            fetch_retries: metrics::counter!("randao_relay_header_fetch_retries_total"),
            in_flight: metrics::gauge!("randao_relay_fulfillments_in_flight"),
            fulfillment_latency: metrics::histogram!(
                "randao_relay_fulfillment_duration_seconds",
                "stage" => "request_to_receipt"
            ),
        }
    }

    pub fn record_fulfilled(&self, duration: Duration) {
        self.fulfilled.increment(1);
        self.fulfillment_latency.record(duration.as_secs_f64());
    }

    /// Failures are labelled by reason, so the handle is resolved per call.
    pub fn record_failed(&self, reason: &'static str) {
        metrics::counter!("randao_relay_fulfillments_failed_total", "reason" => reason)
            .increment(1);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.increment(1);
    }

    pub fn fulfillment_started(&self) {
        self.in_flight.increment(1.0);
    }

    pub fn fulfillment_finished(&self) {
        self.in_flight.decrement(1.0);
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast counters for the relayer account.
#[derive(Debug, Clone)]
pub struct SequencerMetrics {
    broadcasts: Counter,
    nonce_resyncs: Counter,
    receipt_errors: Counter,
    broadcast_latency: Histogram,
    next_nonce: Gauge,
}

impl SequencerMetrics {
    pub fn new() -> Self {
        Self {
            broadcasts: metrics::counter!("randao_relay_callbacks_broadcast_total"),
            nonce_resyncs: metrics::counter!("randao_relay_nonce_resyncs_total"),
            receipt_errors: metrics::counter!("randao_relay_receipt_poll_errors_total"),
            broadcast_latency: metrics::histogram!(
                "randao_relay_broadcast_duration_seconds",
                "stage" => "eth_sendRawTransaction"
            ),
            next_nonce: metrics::gauge!("randao_relay_next_nonce"),
        }
    }

    pub fn record_broadcast(&self, duration: Duration, next_nonce: u64) {
        self.broadcasts.increment(1);
        self.broadcast_latency.record(duration.as_secs_f64());
        self.next_nonce.set(next_nonce as f64);
    }

    pub fn record_resync(&self) {
        self.nonce_resyncs.increment(1);
    }

    pub fn record_receipt_error(&self) {
        self.receipt_errors.increment(1);
    }
}

impl Default for SequencerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global Prometheus recorder and serves `/metrics` on `addr`.
///
/// Must be called from inside a tokio runtime.
pub fn install_prometheus_exporter(addr: SocketAddr) -> eyre::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(target: "randao_relay::metrics", %addr, "Serving Prometheus metrics");
    Ok(())
}
