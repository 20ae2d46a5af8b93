use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};

// Metrics registry
static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests seen by the admission filter",
        &["method", "status"]
    )
    .unwrap()
});

static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Total number of rate limit decisions",
        &["kind", "decision"]
    )
    .unwrap()
});

static RATE_LIMIT_DECISION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rate_limit_decision_duration_seconds",
        "Rate limit decision latency in seconds",
        &["kind", "backend"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]
    )
    .unwrap()
});

static RATE_LIMIT_BLOCKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_blocks_total",
        "Total number of identifiers put into a block cooldown",
        &["kind"]
    )
    .unwrap()
});

static RATE_LIMIT_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_errors_total",
        "Total number of failed rate limit decisions",
        &["kind", "error_type"]
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_http_request(method: &str, status: u16) {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    pub fn record_decision(kind: &str, allowed: bool) {
        let decision = if allowed { "allow" } else { "deny" };
        RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&[kind, decision])
            .inc();
    }

    pub fn record_decision_latency(kind: &str, backend: &str, duration: f64) {
        RATE_LIMIT_DECISION_DURATION
            .with_label_values(&[kind, backend])
            .observe(duration);
    }

    pub fn record_block(kind: &str) {
        RATE_LIMIT_BLOCKS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_error(kind: &str, error_type: &str) {
        RATE_LIMIT_ERRORS_TOTAL
            .with_label_values(&[kind, error_type])
            .inc();
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}
