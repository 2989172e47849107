//! Index engine metrics.
//!
//! Counters and histograms for dump and GC runs, complementing the
//! structured logging already in place.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Shards written during dumps.
pub const DUMP_SHARDS_WRITTEN: &str = "stratum_dump_shards_written_total";

/// Partitions that failed to serialize or write.
pub const DUMP_PARTITIONS_FAILED: &str = "stratum_dump_partitions_failed_total";

/// Dump run duration histogram.
pub const DUMP_RUN_DURATION: &str = "stratum_dump_run_duration_seconds";

/// GC objects deleted counter.
pub const GC_OBJECTS_DELETED: &str = "stratum_gc_objects_deleted_total";

/// GC bytes reclaimed counter.
pub const GC_BYTES_RECLAIMED: &str = "stratum_gc_bytes_reclaimed_total";

/// GC errors counter.
pub const GC_ERRORS: &str = "stratum_gc_errors_total";

/// GC run duration histogram.
pub const GC_RUN_DURATION: &str = "stratum_gc_run_duration_seconds";

/// Registers all index metric descriptions.
///
/// Call once at application startup after installing a metrics recorder.
pub fn register_metrics() {
    describe_counter!(DUMP_SHARDS_WRITTEN, "Total shard files written by dumps");
    describe_counter!(
        DUMP_PARTITIONS_FAILED,
        "Total partitions that failed during dumps"
    );
    describe_histogram!(DUMP_RUN_DURATION, "Duration of dump runs in seconds");
    describe_counter!(GC_OBJECTS_DELETED, "Total objects deleted by GC");
    describe_counter!(GC_BYTES_RECLAIMED, "Total bytes reclaimed by GC");
    describe_counter!(GC_ERRORS, "Total GC errors encountered");
    describe_histogram!(GC_RUN_DURATION, "Duration of GC runs in seconds");
}

/// Records dump completion metrics.
pub fn record_dump_completion(shards_written: u64, partitions_failed: u64, duration_secs: f64) {
    counter!(DUMP_SHARDS_WRITTEN).increment(shards_written);
    counter!(DUMP_PARTITIONS_FAILED).increment(partitions_failed);
    histogram!(DUMP_RUN_DURATION).record(duration_secs);
}

/// Records GC completion metrics.
pub fn record_gc_completion(objects_deleted: u64, bytes_reclaimed: u64, duration_secs: f64) {
    counter!(GC_OBJECTS_DELETED).increment(objects_deleted);
    counter!(GC_BYTES_RECLAIMED).increment(bytes_reclaimed);
    histogram!(GC_RUN_DURATION).record(duration_secs);
}

/// Records a GC error.
pub fn record_gc_error() {
    counter!(GC_ERRORS).increment(1);
}
