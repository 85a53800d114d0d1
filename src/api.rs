//! Transport-agnostic boundary surface.
//!
//! Typed requests and responses over the registry, shaped the way any
//! control transport (HTTP handler, CLI, test harness) consumes them.
//! Registry errors pass through as typed failures; nothing is swallowed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Tuning;
use crate::error::{Error, Result};
use crate::model::{AgentKind, TaskConfig, TaskId, TaskStatus};
use crate::registry::TaskRegistry;

/// Request to create and start a task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub agent_kind: AgentKind,
    /// Agent-specific input, validated by the agent itself.
    pub input: serde_json::Value,

    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub depth_level: Option<u8>,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
}

impl CreateTaskRequest {
    fn build_config(&self, tuning: &Tuning) -> TaskConfig {
        let defaults = TaskConfig::default();
        TaskConfig {
            project_id: self.project_id,
            model: self.model.clone().unwrap_or(defaults.model),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(tuning.default_max_tokens),
            max_cost_usd: self.max_cost_usd.unwrap_or(tuning.default_max_cost_usd),
            time_limit_secs: self
                .time_limit_secs
                .unwrap_or(tuning.default_time_limit_secs),
            use_context: defaults.use_context,
            max_context_passages: defaults.max_context_passages,
            depth_level: self.depth_level.unwrap_or(0),
            parent_task_id: self.parent_task_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Response to a status query.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub agent_kind: AgentKind,
    pub status: TaskStatus,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Acknowledgement of a control signal.
#[derive(Debug, Clone, Serialize)]
pub struct ControlAck {
    pub task_id: TaskId,
    pub action: &'static str,
}

/// Create a task. The input must be a JSON object; limits left unset fall
/// back to the configured defaults.
pub fn create_task(
    registry: &TaskRegistry,
    tuning: &Tuning,
    request: &CreateTaskRequest,
) -> Result<CreateTaskResponse> {
    if !request.input.is_object() {
        return Err(Error::InvalidInput(
            "task input must be a JSON object".to_string(),
        ));
    }
    let config = request.build_config(tuning);
    let task_id = registry.create(request.agent_kind, config, request.input.clone())?;
    Ok(CreateTaskResponse {
        task_id,
        status: TaskStatus::Pending,
    })
}

/// Query a task's status. Unknown ids are `NotFound`, never an empty
/// default.
pub fn task_status(registry: &TaskRegistry, id: TaskId) -> Result<TaskStatusResponse> {
    let cell = registry.get(id)?;
    let snapshot = cell.snapshot();
    let current_step = if snapshot.checkpoint.last_step.is_empty() {
        None
    } else {
        Some(snapshot.checkpoint.last_step.clone())
    };
    Ok(TaskStatusResponse {
        task_id: id,
        agent_kind: cell.agent_kind,
        status: snapshot.status,
        progress_percent: snapshot.checkpoint.progress_percent(),
        current_step,
        output: snapshot.current_output,
        error_message: snapshot.error_message,
        tokens_used: snapshot.usage.total_tokens(),
        cost_usd: snapshot.usage.cost_usd,
    })
}

pub fn pause_task(registry: &TaskRegistry, id: TaskId) -> Result<ControlAck> {
    registry.request_pause(id)?;
    Ok(ControlAck {
        task_id: id,
        action: "pause",
    })
}

pub fn resume_task(registry: &TaskRegistry, id: TaskId) -> Result<ControlAck> {
    registry.request_resume(id)?;
    Ok(ControlAck {
        task_id: id,
        action: "resume",
    })
}

pub fn cancel_task(registry: &TaskRegistry, id: TaskId) -> Result<ControlAck> {
    registry.request_cancel(id)?;
    Ok(ControlAck {
        task_id: id,
        action: "cancel",
    })
}

pub fn delete_task(registry: &TaskRegistry, id: TaskId) -> Result<ControlAck> {
    registry.delete(id)?;
    Ok(ControlAck {
        task_id: id,
        action: "delete",
    })
}
