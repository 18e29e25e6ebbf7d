//! Metric instrument factories for idxwalk.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("idxwalk")
}

/// Counter: walker steps taken.
/// Labels: `kind` ("navigated" | "fetched" | "done").
pub fn walk_steps() -> Counter<u64> {
    meter()
        .u64_counter("idxwalk.walk.steps")
        .with_description("Number of walker steps")
        .build()
}

/// Counter: items whose cursor position was passed.
/// Labels: `outcome` ("downloaded" | "not_found").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("idxwalk.items.processed")
        .with_description("Number of work items handled")
        .build()
}

/// Histogram: size of downloaded files.
pub fn download_bytes() -> Histogram<u64> {
    meter()
        .u64_histogram("idxwalk.download.bytes")
        .with_description("Size of downloaded files")
        .with_unit("By")
        .build()
}

/// Histogram: page load duration in milliseconds.
pub fn page_load_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("idxwalk.page.load_ms")
        .with_description("Index page load duration in milliseconds")
        .with_unit("ms")
        .build()
}
