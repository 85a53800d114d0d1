//! Core task data model.
//!
//! A task is one execution of an agent's work. It has identity, immutable
//! run parameters, a lifecycle status, monotonic usage counters, and a
//! crash-resumable checkpoint owned exclusively by the task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Maximum sub-task nesting depth.
pub const MAX_DEPTH: u8 = 3;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Newtype for observer IDs (connected real-time clients).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a full UUID string, as supplied by reconnecting clients.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for its worker to start.
    Pending,
    /// Worker actively executing.
    Running,
    /// Paused at a checkpoint boundary, waiting for resume.
    Paused,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished with an error. Terminal.
    Failed,
    /// Stopped by a cancel signal or the deadline. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled) // cancelled before the worker started
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Agent kind
// ---------------------------------------------------------------------------

/// Which agent specialization handles a task.
///
/// The registry and state machine are generic over the kind; only
/// `Writing` has an implementation today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Writing,
    Research,
    Compliance,
    Creative,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentKind::Writing => "writing",
            AgentKind::Research => "research",
            AgentKind::Compliance => "compliance",
            AgentKind::Creative => "creative",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Immutable run parameters for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub project_id: Option<Uuid>,

    /// Model identifier passed through to the generation collaborator.
    pub model: String,
    pub temperature: f64,

    /// Token budget across the whole run.
    pub max_tokens: u64,
    /// Spend budget across the whole run.
    pub max_cost_usd: f64,
    /// Hard deadline enforced by the registry, independent of the
    /// cooperative cancel path.
    pub time_limit_secs: u64,

    /// Whether to retrieve document context before generating.
    pub use_context: bool,
    pub max_context_passages: usize,

    /// Sub-task nesting depth. 0 = root.
    pub depth_level: u8,
    pub parent_task_id: Option<TaskId>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.7,
            max_tokens: 100_000,
            max_cost_usd: 5.0,
            time_limit_secs: 1800,
            use_context: true,
            max_context_passages: 10,
            depth_level: 0,
            parent_task_id: None,
        }
    }
}

impl TaskConfig {
    /// Validate creation-time invariants.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;
        if self.model.is_empty() {
            return Err(Error::InvalidInput("model must not be empty".to_string()));
        }
        if self.depth_level > MAX_DEPTH {
            return Err(Error::InvalidInput(format!(
                "depth_level {} exceeds maximum {MAX_DEPTH}",
                self.depth_level
            )));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidInput("max_tokens must be positive".to_string()));
        }
        if self.max_cost_usd <= 0.0 {
            return Err(Error::InvalidInput("max_cost_usd must be positive".to_string()));
        }
        if self.time_limit_secs == 0 {
            return Err(Error::InvalidInput("time_limit_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Monotonic token/cost counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.cost_usd += cost_usd;
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Crash-resumable snapshot of a task's progress.
///
/// Mutated only by the owning task on its own execution path. Updates are
/// idempotent per step: resuming replays from the last completed step, so
/// re-recording the same step must not corrupt the bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the most recently completed phase.
    pub last_step: String,
    pub step_index: u32,
    /// Unknown for open-ended tasks.
    pub total_steps: Option<u32>,
    /// Ordered identifiers for idempotent-resume bookkeeping.
    pub completed_items: Vec<String>,
    /// Merge-only partial outputs keyed by step.
    pub interim_results: BTreeMap<String, serde_json::Value>,
    /// Cumulative usage at the time of the last update.
    pub usage_at_checkpoint: UsageTotals,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            last_step: String::new(),
            step_index: 0,
            total_steps: None,
            completed_items: Vec::new(),
            interim_results: BTreeMap::new(),
            usage_at_checkpoint: UsageTotals::default(),
            saved_at: Utc::now(),
        }
    }

    /// Record a completed step. Safe to call repeatedly for the same step.
    pub fn record_step(
        &mut self,
        step: &str,
        step_index: u32,
        total_steps: Option<u32>,
        usage: UsageTotals,
    ) {
        self.last_step = step.to_string();
        self.step_index = step_index;
        if total_steps.is_some() {
            self.total_steps = total_steps;
        }
        self.usage_at_checkpoint = usage;
        self.saved_at = Utc::now();
    }

    /// Append an item identifier unless it was already recorded.
    pub fn record_item(&mut self, item: impl Into<String>) {
        let item = item.into();
        if !self.completed_items.contains(&item) {
            self.completed_items.push(item);
        }
        self.saved_at = Utc::now();
    }

    /// Merge a partial result: new keys added, same-step re-runs overwrite.
    pub fn merge_interim(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.interim_results.insert(key.into(), value);
        self.saved_at = Utc::now();
    }

    /// Progress as an integer percentage, truncated then clamped to
    /// [0, 100]. A re-run step after resume can push step_index past
    /// total_steps; the clamp keeps the reported figure sane. 0 when
    /// total_steps is unknown.
    pub fn progress_percent(&self) -> u8 {
        match self.total_steps {
            Some(total) if total > 0 => {
                let pct = (u64::from(self.step_index) * 100) / u64::from(total);
                pct.min(100) as u8
            }
            _ => 0,
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Final outcome of a task run, always produced — `run` never raises to
/// its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub agent_kind: AgentKind,
    pub status: TaskStatus,

    pub output: Option<String>,
    pub output_sections: BTreeMap<String, String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,

    pub usage: UsageTotals,

    /// Human-readable message for Failed/Cancelled outcomes.
    pub error_message: Option<String>,

    /// Checkpoint for resumption.
    pub checkpoint: Checkpoint,
}
