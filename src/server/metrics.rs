use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all server metrics
const PREFIX: &str = "cml_mcp";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // MCP Metrics
    pub static ref MCP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_requests_total"), "Total MCP requests by method and outcome"),
        &["method", "status"]
    ).expect("Failed to create requests_total metric");

    // Pool Metrics
    pub static ref POOL_CLIENTS: Gauge = Gauge::new(
        format!("{PREFIX}_pool_clients"),
        "Number of clients currently tracked by the pool"
    ).expect("Failed to create pool_clients metric");

    pub static ref POOL_ACTIVE_REQUESTS: Gauge = Gauge::new(
        format!("{PREFIX}_pool_active_requests"),
        "Requests currently holding a pooled client"
    ).expect("Failed to create pool_active_requests metric");

    pub static ref POOL_EVICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_pool_evictions_total"), "Pool evictions by reason"),
        &["reason"]
    ).expect("Failed to create pool_evictions_total metric");

    pub static ref POOL_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_pool_rejections_total"), "Requests refused before reaching the backend"),
        &["reason"]
    ).expect("Failed to create pool_rejections_total metric");

    // Backend Metrics
    pub static ref BACKEND_AUTH_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_backend_auth_failures_total"), "Failed logins against lab controllers"),
        &["kind"]
    ).expect("Failed to create backend_auth_failures_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(MCP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(POOL_CLIENTS.clone()));
    let _ = REGISTRY.register(Box::new(POOL_ACTIVE_REQUESTS.clone()));
    let _ = REGISTRY.register(Box::new(POOL_EVICTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(POOL_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKEND_AUTH_FAILURES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_mcp_request(method: &str, status: &str) {
    MCP_REQUESTS_TOTAL.with_label_values(&[method, status]).inc();
}

pub fn set_pool_clients(clients: usize, active_requests: usize) {
    POOL_CLIENTS.set(clients as f64);
    POOL_ACTIVE_REQUESTS.set(active_requests as f64);
}

pub fn record_pool_eviction(reason: &str) {
    POOL_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_pool_rejection(reason: &str) {
    POOL_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_backend_auth_failure(kind: &str) {
    BACKEND_AUTH_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
