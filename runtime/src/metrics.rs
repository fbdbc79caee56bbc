//! Metric descriptions.
//!
//! Metrics are emitted through the `metrics` facade. Installing an exporter is left to
//! the host process; [`describe_metrics`] registers units and help texts with whatever
//! recorder is installed.

use metrics::{Unit, describe_counter, describe_histogram};

/// Register all metric descriptions.
pub fn describe_metrics() {
    // Dispatcher
    describe_counter!(
        "cfn_resource.requests.total",
        Unit::Count,
        "Lifecycle events received, by request type"
    );
    describe_counter!(
        "cfn_resource.replies.total",
        Unit::Count,
        "Reply documents produced, by status"
    );
    describe_counter!(
        "cfn_resource.transport.failures.total",
        Unit::Count,
        "Reply PUTs that did not complete"
    );

    // Long-running
    describe_counter!(
        "cfn_resource.pings.scheduled.total",
        Unit::Count,
        "Long-running ping rounds scheduled"
    );
    describe_counter!(
        "cfn_resource.pingback.failures.total",
        Unit::Count,
        "Self re-invocations that could not be started"
    );

    // Store
    describe_counter!(
        "store.effects.executed",
        Unit::Count,
        "Effects started by the store, by type"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        Unit::Seconds,
        "Time spent in the reducer per action"
    );
    describe_histogram!(
        "store.effects.count",
        Unit::Count,
        "Effects returned per action"
    );

    // Host loop
    describe_counter!(
        "cfn_resource.invocations.total",
        Unit::Count,
        "Invocations served by the Runtime API loop, by outcome"
    );
}
