//! Telemetry: structured logging and metric descriptions.
//!
//! Tessera emits `tracing` events throughout the pipeline and counts
//! operations through the `metrics` facade. Installing a metrics recorder is
//! left to the embedding application; without one the counters are no-ops.

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};

use metrics::describe_counter;

/// Counter incremented for every constructed `TesseraError`.
pub const ERRORS_TOTAL: &str = "tessera_errors_total";
/// Counter incremented for every operation the applier completes.
pub const OPERATIONS_APPLIED_TOTAL: &str = "tessera_operations_applied_total";
/// Counter incremented when the applier halts on a failed operation.
pub const OPERATIONS_FAILED_TOTAL: &str = "tessera_operations_failed_total";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(ERRORS_TOTAL, "Total number of errors by code and category");
    describe_counter!(
        OPERATIONS_APPLIED_TOTAL,
        "Total number of IAM operations applied, by kind"
    );
    describe_counter!(
        OPERATIONS_FAILED_TOTAL,
        "Total number of IAM operations that failed, by kind"
    );
}
