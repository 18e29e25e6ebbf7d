//! Integration tests for telemetry initialization and span helpers.

use idxwalk::model::Phase;
use idxwalk::telemetry::{TelemetryConfig, init_telemetry, metrics, walk};

#[test]
fn telemetry_initializes_without_endpoint() {
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "idxwalk-test".to_string(),
        default_filter: "debug".to_string(),
    };
    // A global subscriber may already be set by another test in this
    // process; an Err is acceptable then.
    if let Ok(guard) = init_telemetry(config) {
        guard.force_flush();
    }
}

#[test]
fn step_span_creates_and_records_phase() {
    let span = walk::start_step_span("nano", 3);
    walk::record_phase(
        &span,
        &Phase::Walking.to_string(),
        &Phase::Fetching.to_string(),
    );
}

#[test]
fn instruments_accept_measurements_without_a_provider() {
    metrics::walk_steps().add(1, &[]);
    metrics::items_processed().add(1, &[]);
    metrics::download_bytes().record(1024, &[]);
    metrics::page_load_ms().record(12.5, &[]);
}
