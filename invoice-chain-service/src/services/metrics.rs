//! Prometheus metrics for invoice-chain-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder behind the `metrics` facade used by the shared HTTP middleware.
static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// gRPC request counter by method and status.
pub static GRPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_chain_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register grpc_requests_total")
});

/// gRPC request duration histogram by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoice_chain_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register grpc_request_duration")
});

/// Issued documents by type.
pub static DOCUMENTS_ISSUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_chain_documents_issued_total",
        "Total number of documents appended to a chain",
        &["document_type"] // invoice, credit_note
    )
    .expect("Failed to register documents_issued_total")
});

/// Chain build outcomes other than first-attempt success.
pub static CHAIN_BUILD_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_chain_build_events_total",
        "Chain build retries and failures",
        &["event"] // duplicate_sequence, build_failure
    )
    .expect("Failed to register build_events_total")
});

/// Validation runs by outcome.
pub static VALIDATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_chain_validations_total",
        "Total number of chain validations by outcome",
        &["outcome"] // valid, invalid
    )
    .expect("Failed to register validations_total")
});

/// Anomalies found by the validator, by kind.
pub static ANOMALIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_chain_anomalies_total",
        "Total number of chain anomalies detected",
        &["kind"]
    )
    .expect("Failed to register anomalies_total")
});

/// Ledger exports by format.
pub static EXPORTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoice_chain_exports_total",
        "Total number of ledger exports by format",
        &["format"]
    )
    .expect("Failed to register exports_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoice_chain_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics: installs the HTTP recorder once per process and
/// forces the lazy registrations.
pub fn init_metrics() {
    HTTP_METRICS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "HTTP metrics recorder already installed");
        }
        handle
    });

    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&DOCUMENTS_ISSUED_TOTAL);
    Lazy::force(&CHAIN_BUILD_EVENTS_TOTAL);
    Lazy::force(&VALIDATIONS_TOTAL);
    Lazy::force(&ANOMALIES_TOTAL);
    Lazy::force(&EXPORTS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Record a completed gRPC call.
pub fn record_grpc_request(method: &str, status: &str, duration_secs: f64) {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, status])
        .inc();
    GRPC_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Get metrics in Prometheus text format: HTTP metrics first, then the
/// service registry.
pub fn get_metrics() -> String {
    let mut output = HTTP_METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    if let Ok(service_metrics) = encoder.encode_to_string(&metric_families) {
        output.push_str(&service_metrics);
    }

    output
}
