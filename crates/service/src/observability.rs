use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

// Prometheus metrics (default registry)
pub static STORAGE_READS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seder_storage_reads_total",
        "Registration reads per storage tier and outcome",
        &["tier", "outcome"]
    )
    .expect("register storage_reads_total")
});

pub static STORAGE_WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seder_storage_writes_total",
        "Registration writes per storage tier and outcome",
        &["tier", "outcome"]
    )
    .expect("register storage_writes_total")
});

pub static EDGE_CONFIG_DEGRADED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seder_edge_config_degraded_total",
        "Times the Edge Config client fell back from the read endpoint to the management API"
    )
    .expect("register edge_config_degraded_total")
});

pub static BLOB_SYNCS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seder_blob_syncs_total",
        "Blob mirror sync attempts by outcome",
        &["outcome"]
    )
    .expect("register blob_syncs_total")
});

pub static REGISTRATIONS_STORED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "seder_registrations_stored",
        "Number of registrations in the last successfully saved collection"
    )
    .expect("register registrations_stored")
});

pub fn record_read(tier: &str, ok: bool) {
    STORAGE_READS_TOTAL
        .with_label_values(&[tier, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_write(tier: &str, ok: bool) {
    STORAGE_WRITES_TOTAL
        .with_label_values(&[tier, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
