//! Events published to real-time observers.
//!
//! An event is an immutable notification of a state change: a shared
//! envelope (kind, timestamp) around a closed set of typed payloads, so
//! dispatch on kind is exhaustive at compile time. On the wire each event
//! is one JSON object: `{"kind": ..., "payload": {...}, "timestamp": ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{AgentKind, ObserverId, TaskId, TaskStatus};

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Classification of observer-facing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Connection confirmation carrying the assigned observer id.
    ConnectionEstablished,
    /// Reply to an observer heartbeat.
    HeartbeatAck,
    /// Task lifecycle status change.
    TaskStatus,
    /// Step-level task progress.
    TaskProgress,
    /// Generated output, streamed as it becomes available.
    GenerationStreamChunk,
    /// Document pipeline stage change.
    DocumentStatus,
    /// Token/cost counters after a generation call.
    CostUpdate,
    /// A task is approaching or has crossed its budget.
    BudgetWarning,
    /// Human-facing notice (also used for protocol errors).
    UserNotification,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::ConnectionEstablished,
        EventKind::HeartbeatAck,
        EventKind::TaskStatus,
        EventKind::TaskProgress,
        EventKind::GenerationStreamChunk,
        EventKind::DocumentStatus,
        EventKind::CostUpdate,
        EventKind::BudgetWarning,
        EventKind::UserNotification,
    ];

    /// Kinds delivered to every connected observer regardless of its
    /// interest set: connection-lifecycle and user-facing notices.
    pub fn always_broadcast(self) -> bool {
        matches!(
            self,
            EventKind::ConnectionEstablished | EventKind::HeartbeatAck | EventKind::UserNotification
        )
    }

    /// Wire name, as used in subscribe/unsubscribe messages.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ConnectionEstablished => "connection_established",
            EventKind::HeartbeatAck => "heartbeat_ack",
            EventKind::TaskStatus => "task_status",
            EventKind::TaskProgress => "task_progress",
            EventKind::GenerationStreamChunk => "generation_stream_chunk",
            EventKind::DocumentStatus => "document_status",
            EventKind::CostUpdate => "cost_update",
            EventKind::BudgetWarning => "budget_warning",
            EventKind::UserNotification => "user_notification",
        }
    }

    /// Parse a wire name. Unknown names yield None; callers ignore them
    /// rather than erroring.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEstablishedPayload {
    pub observer_id: ObserverId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAckPayload {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusPayload {
    pub task_id: TaskId,
    pub agent_kind: AgentKind,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressPayload {
    pub task_id: TaskId,
    pub step_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    pub step_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_description: Option<String>,
    pub completed_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStreamChunkPayload {
    pub task_id: TaskId,
    pub chunk: String,
    pub is_final: bool,
}

/// Stage of the document ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStage {
    Uploading,
    Processing,
    Chunking,
    Embedding,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStatusPayload {
    pub document_id: Uuid,
    pub filename: String,
    pub stage: DocumentStage,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostUpdatePayload {
    pub task_id: TaskId,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub cumulative_cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_remaining_usd: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetWarningLevel {
    Approaching,
    Exceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetWarningPayload {
    pub task_id: TaskId,
    pub limit_usd: f64,
    pub spent_usd: f64,
    pub percent_used: f64,
    pub level: BudgetWarningLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotificationPayload {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

/// The closed set of payload shapes, adjacently tagged so the wire form
/// carries `kind` and `payload` as sibling fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    ConnectionEstablished(ConnectionEstablishedPayload),
    HeartbeatAck(HeartbeatAckPayload),
    TaskStatus(TaskStatusPayload),
    TaskProgress(TaskProgressPayload),
    GenerationStreamChunk(GenerationStreamChunkPayload),
    DocumentStatus(DocumentStatusPayload),
    CostUpdate(CostUpdatePayload),
    BudgetWarning(BudgetWarningPayload),
    UserNotification(UserNotificationPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ConnectionEstablished(_) => EventKind::ConnectionEstablished,
            EventPayload::HeartbeatAck(_) => EventKind::HeartbeatAck,
            EventPayload::TaskStatus(_) => EventKind::TaskStatus,
            EventPayload::TaskProgress(_) => EventKind::TaskProgress,
            EventPayload::GenerationStreamChunk(_) => EventKind::GenerationStreamChunk,
            EventPayload::DocumentStatus(_) => EventKind::DocumentStatus,
            EventPayload::CostUpdate(_) => EventKind::CostUpdate,
            EventPayload::BudgetWarning(_) => EventKind::BudgetWarning,
            EventPayload::UserNotification(_) => EventKind::UserNotification,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An immutable, timestamped notification. Never mutated after being
/// handed to the distributor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn connection_established(observer_id: ObserverId) -> Self {
        Self::new(EventPayload::ConnectionEstablished(ConnectionEstablishedPayload {
            observer_id,
        }))
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(EventPayload::HeartbeatAck(HeartbeatAckPayload {
            status: "ok".to_string(),
        }))
    }

    pub fn notification(level: NotificationLevel, title: &str, message: &str) -> Self {
        Self::new(EventPayload::UserNotification(UserNotificationPayload {
            level,
            title: title.to_string(),
            message: message.to_string(),
        }))
    }
}
