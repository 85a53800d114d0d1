//! Task execution span helpers.
//!
//! Provides span creation and status-transition recording for tasks
//! flowing through the registry.

use tracing::Span;

use crate::model::{AgentKind, TaskId};

/// Start a span covering one task's whole execution.
///
/// The `task.status` field is declared empty and can be updated via
/// [`record_status_transition`].
pub fn start_task_span(agent_kind: AgentKind, task_id: TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.agent_kind" = %agent_kind,
        "task.id" = %task_id.0,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
///
/// Emits a tracing `info` event scoped to the span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
