//! Metric instrument factories for draftsmith.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"draftsmith"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for draftsmith instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("draftsmith")
}

/// Counter: number of tasks created.
/// Labels: `agent_kind`, `result` ("ok" | "duplicate").
pub fn tasks_created() -> Counter<u64> {
    meter()
        .u64_counter("draftsmith.tasks.created")
        .with_description("Number of tasks created")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("draftsmith.tasks.state_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: events published into the hub.
/// Labels: `kind`.
pub fn events_published() -> Counter<u64> {
    meter()
        .u64_counter("draftsmith.events.published")
        .with_description("Number of events published")
        .build()
}

/// Counter: observer connection lifecycle.
/// Labels: `op` ("connect" | "disconnect" | "evicted").
pub fn observer_connections() -> Counter<u64> {
    meter()
        .u64_counter("draftsmith.observers.connections")
        .with_description("Observer connection lifecycle operations")
        .build()
}

/// Counter: LLM token usage.
/// Labels: `model`, `direction` ("input" | "output").
pub fn llm_tokens() -> Counter<u64> {
    meter()
        .u64_counter("draftsmith.llm.tokens")
        .with_description("LLM token usage")
        .build()
}
