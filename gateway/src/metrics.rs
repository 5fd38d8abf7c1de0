use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_requests_total",
        "Total telemetry requests received"
    ))
    .unwrap();
    pub static ref CLIENT_ERRORS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_client_errors_total",
        "Total requests rejected before reaching upstream"
    ))
    .unwrap();
    pub static ref UPSTREAM_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "gateway_upstream_failures_total",
            "Total failed upstream calls by failure class"
        ),
        &["class"]
    )
    .unwrap();
    pub static ref UPSTREAM_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gateway_upstream_latency_seconds",
            "Time taken by the upstream datapoints call"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(CLIENT_ERRORS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
