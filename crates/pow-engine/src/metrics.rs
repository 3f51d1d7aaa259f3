//! Engine metrics.
//!
//! Counters and histograms for job execution and reconciler sweeps. A
//! recorder must be installed by the binary; without one these are no-ops.
//! The store crate records its own dropped-event counters.

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use pow_core::JobStatus;

// -- Jobs ---------------------------------------------------------------

pub const JOBS_ENQUEUED: &str = "pow_jobs_enqueued_total";

/// Jobs that reached a final status, labelled by status.
pub const JOBS_FINISHED: &str = "pow_jobs_finished_total";

/// Wall time of one job execution.
pub const JOB_DURATION: &str = "pow_job_duration_seconds";

pub const EXECUTING_JOBS: &str = "pow_executing_jobs";

// -- Reconciler ---------------------------------------------------------

pub const SWEEPS: &str = "pow_reconciler_sweeps_total";

/// Reconciler jobs enqueued by sweeps.
pub const SWEEP_ENQUEUED: &str = "pow_reconciler_enqueued_total";

/// Registers all engine metric descriptions.
///
/// Call once at startup after installing the recorder.
pub fn register_metrics() {
    describe_counter!(JOBS_ENQUEUED, "Storage jobs enqueued");
    describe_counter!(JOBS_FINISHED, "Storage jobs that reached a final status");
    describe_histogram!(JOB_DURATION, "Duration of storage job execution in seconds");
    describe_gauge!(EXECUTING_JOBS, "Storage jobs currently executing");
    describe_counter!(SWEEPS, "Reconciler sweeps run");
    describe_counter!(SWEEP_ENQUEUED, "Reconciler jobs enqueued by sweeps");
    describe_counter!(
        "pow_watch_events_dropped_total",
        "Job events dropped on full watcher buffers"
    );
    describe_counter!(
        "pow_cid_log_events_dropped_total",
        "Cid log entries dropped on full watcher buffers"
    );
}

pub(crate) fn record_job_enqueued() {
    counter!(JOBS_ENQUEUED).increment(1);
}

pub(crate) fn record_job_started() {
    gauge!(EXECUTING_JOBS).increment(1.0);
}

pub(crate) fn record_job_finished(status: JobStatus, elapsed: Duration) {
    gauge!(EXECUTING_JOBS).decrement(1.0);
    counter!(JOBS_FINISHED, "status" => status.to_string()).increment(1);
    histogram!(JOB_DURATION).record(elapsed.as_secs_f64());
}

pub(crate) fn record_sweep(enqueued: usize) {
    counter!(SWEEPS).increment(1);
    counter!(SWEEP_ENQUEUED).increment(enqueued as u64);
}
