use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;
use std::time::Instant;

/// OpenTelemetry metrics for server observability.
///
/// Tracks requests, redirect outcomes, auth failures and storage ops.
/// Singleton instance accessed via `Metrics::get()`.
pub struct Metrics {
    // Server-level metrics
    pub connections_total: Counter<u64>,
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,

    // Redirect metrics
    pub redirects_resolved_total: Counter<u64>,
    pub redirects_created_total: Counter<u64>,
    pub redirects_updated_total: Counter<u64>,
    pub conflicts_total: Counter<u64>,
    pub auth_failures_total: Counter<u64>,

    // Storage backend metrics
    pub storage_operations_total: Counter<u64>,
    pub storage_operation_duration: Histogram<f64>,
    pub storage_errors_total: Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    pub fn init() -> &'static Self {
        METRICS.get_or_init(|| {
            let meter = global::meter("coral-redirect");

            Metrics {
                connections_total: meter
                    .u64_counter("coral_connections_total")
                    .with_description("Total number of client connections")
                    .init(),

                requests_total: meter
                    .u64_counter("coral_requests_total")
                    .with_description("Total number of HTTP requests processed")
                    .init(),

                request_duration: meter
                    .f64_histogram("coral_request_duration_seconds")
                    .with_description("Request processing duration in seconds")
                    .init(),

                errors_total: meter
                    .u64_counter("coral_errors_total")
                    .with_description("Total number of errors")
                    .init(),

                redirects_resolved_total: meter
                    .u64_counter("coral_redirects_resolved_total")
                    .with_description("Total number of redirect lookups by mode")
                    .init(),

                redirects_created_total: meter
                    .u64_counter("coral_redirects_created_total")
                    .with_description("Total number of redirects created")
                    .init(),

                redirects_updated_total: meter
                    .u64_counter("coral_redirects_updated_total")
                    .with_description("Total number of redirects replaced")
                    .init(),

                conflicts_total: meter
                    .u64_counter("coral_conflicts_total")
                    .with_description("Total number of key conflicts")
                    .init(),

                auth_failures_total: meter
                    .u64_counter("coral_auth_failures_total")
                    .with_description("Total number of rejected credentials")
                    .init(),

                storage_operations_total: meter
                    .u64_counter("coral_storage_operations_total")
                    .with_description("Total number of storage operations")
                    .init(),

                storage_operation_duration: meter
                    .f64_histogram("coral_storage_operation_duration_seconds")
                    .with_description("Storage operation duration in seconds")
                    .init(),

                storage_errors_total: meter
                    .u64_counter("coral_storage_errors_total")
                    .with_description("Total number of storage errors")
                    .init(),
            }
        })
    }

    pub fn get() -> &'static Self {
        METRICS.get().unwrap_or_else(Self::init)
    }

    pub fn record_request(&self, method: &str, status: u16, duration: f64) {
        let labels = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", i64::from(status)),
        ];
        self.requests_total.add(1, labels);
        self.request_duration.record(duration, labels);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    pub fn record_resolved(&self, mode: &str, found: bool) {
        let labels = &[
            KeyValue::new("mode", mode.to_string()),
            KeyValue::new("found", found),
        ];
        self.redirects_resolved_total.add(1, labels);
    }

    pub fn record_created(&self, generated_key: bool) {
        self.redirects_created_total
            .add(1, &[KeyValue::new("generated_key", generated_key)]);
    }

    pub fn record_updated(&self) {
        self.redirects_updated_total.add(1, &[]);
    }

    pub fn record_conflict(&self, operation: &str) {
        self.conflicts_total
            .add(1, &[KeyValue::new("operation", operation.to_string())]);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures_total.add(1, &[]);
    }

    pub fn increment_connections(&self) {
        self.connections_total.add(1, &[]);
    }

    pub fn record_storage_operation(&self, operation: &str, bucket: &str, duration: f64) {
        let labels = &[
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("bucket", bucket.to_string()),
        ];
        self.storage_operations_total.add(1, labels);
        self.storage_operation_duration.record(duration, labels);
    }

    pub fn record_storage_error(&self, operation: &str, bucket: &str, error_type: &str) {
        let labels = &[
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("bucket", bucket.to_string()),
            KeyValue::new("error_type", error_type.to_string()),
        ];
        self.storage_errors_total.add(1, labels);
    }
}

// Timer utility for measuring durations
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
