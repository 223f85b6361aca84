//! Metrics recorded through the `metrics` facade
//!
//! No exporter is installed here; a host that wants them installs its own
//! recorder before calling [`describe_metrics`].

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

pub const SESSIONS_ACTIVE: &str = "babelcall_sessions_active";
pub const CONNECTIONS_OPEN: &str = "babelcall_connections_open";
pub const CALLS_STARTED: &str = "babelcall_calls_started_total";
pub const CALLS_FAILED: &str = "babelcall_calls_failed_total";
pub const MESSAGES_DROPPED: &str = "babelcall_messages_dropped_total";
pub const SERVICE_REQUEST_DURATION: &str = "babelcall_service_request_duration_seconds";

pub fn describe_metrics() {
    describe_gauge!(SESSIONS_ACTIVE, "Number of live call sessions");
    describe_gauge!(CONNECTIONS_OPEN, "Number of open peer connections");
    describe_counter!(CALLS_STARTED, "Total number of call sessions created");
    describe_counter!(CALLS_FAILED, "Total number of call sessions ended by a failure");
    describe_counter!(
        MESSAGES_DROPPED,
        "Total number of signaling messages dropped as stale or unexpected"
    );
    describe_histogram!(
        SERVICE_REQUEST_DURATION,
        "Duration of translate and assistant requests in seconds"
    );
}

pub fn set_sessions(count: usize) {
    gauge!(SESSIONS_ACTIVE).set(count as f64);
}

pub fn set_connections(count: usize) {
    gauge!(CONNECTIONS_OPEN).set(count as f64);
}

pub fn record_call_started(role: &'static str) {
    counter!(CALLS_STARTED, "role" => role).increment(1);
}

pub fn record_call_failed(reason: &'static str) {
    counter!(CALLS_FAILED, "reason" => reason).increment(1);
}

pub fn record_message_dropped(kind: &'static str) {
    counter!(MESSAGES_DROPPED, "type" => kind).increment(1);
}

pub fn record_service_request(service: &'static str, success: bool, duration: Duration) {
    histogram!(
        SERVICE_REQUEST_DURATION,
        "service" => service,
        "success" => if success { "true" } else { "false" }
    )
    .record(duration.as_secs_f64());
}
