//! Metrics for blobfs.
//!
//! Counters go through the `metrics` facade. No recorder is installed
//! here; an embedding application that wants them installs its own
//! exporter and calls [`describe_metrics`] once.

use metrics::{counter, describe_counter};

// -- Metric name constants ----------------------------------------------------

/// Requests dispatched to the blob service (counter). Labels: method, status.
pub const REQUESTS_TOTAL: &str = "blobfs_requests_total";

/// Bytes staged through Put Block (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "blobfs_bytes_uploaded_total";

/// Blocks staged through Put Block (counter).
pub const BLOCKS_UPLOADED_TOTAL: &str = "blobfs_blocks_uploaded_total";

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Requests dispatched to the blob service");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Bytes uploaded as blocks");
    describe_counter!(BLOCKS_UPLOADED_TOTAL, "Blocks uploaded");
}

/// Count one dispatched request by method and response status.
pub fn record_request(method: &str, status: u16) {
    counter!(REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Count one staged block of `size` bytes.
pub fn record_block_upload(size: usize) {
    counter!(BLOCKS_UPLOADED_TOTAL).increment(1);
    counter!(BYTES_UPLOADED_TOTAL).increment(size as u64);
}
