//! Task lifecycle: the shared cell, cooperative control, and the run
//! wrapper.
//!
//! A task's mutable state lives in a [`TaskCell`] shared between the
//! owning worker and status-querying callers. The worker is the only
//! writer of status, checkpoint, and counters; external control signals
//! touch nothing but the two atomic flags, which the worker reads at its
//! own checkpoint boundaries. The inner mutex guards plain bookkeeping
//! and is never held across an await.
//!
//! Checkpoint-then-event discipline: every helper here updates the
//! checkpoint strictly before publishing the corresponding event, so a
//! status query racing a just-published event never observes a
//! checkpoint older than what the event describes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{error, Instrument};

use crate::agent::{Agent, ExecuteOutcome};
use crate::error::{Error, Result};
use crate::event::{
    BudgetWarningLevel, BudgetWarningPayload, CostUpdatePayload, Event, EventPayload,
    GenerationStreamChunkPayload, TaskProgressPayload, TaskStatusPayload,
};
use crate::llm::{GenerationRequest, Generator};
use crate::model::{AgentKind, Checkpoint, TaskConfig, TaskId, TaskResult, TaskStatus, UsageTotals};
use crate::realtime::Hub;
use crate::search::ContextSearch;
use crate::telemetry::{genai, metrics, task as task_telemetry};

/// Fraction of the cost budget at which an `approaching` warning fires.
const BUDGET_WARN_FRACTION: f64 = 0.8;

// ---------------------------------------------------------------------------
// Shared cell
// ---------------------------------------------------------------------------

struct TaskState {
    status: TaskStatus,
    checkpoint: Checkpoint,
    usage: UsageTotals,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    output: Option<String>,
    output_sections: BTreeMap<String, String>,
    budget_warned: bool,
}

/// Shared mutable state of one task.
pub struct TaskCell {
    pub id: TaskId,
    pub agent_kind: AgentKind,
    pub config: TaskConfig,
    cancel_requested: AtomicBool,
    pause_requested: AtomicBool,
    budget_exhausted: AtomicBool,
    /// Woken on resume and cancel so a paused worker re-checks its flags.
    control: Notify,
    inner: Mutex<TaskState>,
}

impl TaskCell {
    pub fn new(id: TaskId, agent_kind: AgentKind, config: TaskConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            agent_kind,
            config,
            cancel_requested: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            budget_exhausted: AtomicBool::new(false),
            control: Notify::new(),
            inner: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                checkpoint: Checkpoint::new(),
                usage: UsageTotals::default(),
                started_at: None,
                completed_at: None,
                error_message: None,
                output: None,
                output_sections: BTreeMap::new(),
                budget_warned: false,
            }),
        })
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().status
    }

    // --- control signals (written by callers, read by the worker) ---

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.control.notify_waiters();
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.control.notify_waiters();
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn budget_exhausted(&self) -> bool {
        self.budget_exhausted.load(Ordering::SeqCst)
    }

    fn notified(&self) -> Notified<'_> {
        self.control.notified()
    }

    // --- worker-side transitions ---

    fn mark_started(&self) {
        let mut inner = self.inner.lock();
        if inner.status.can_transition_to(TaskStatus::Running) {
            self.record_transition(inner.status, TaskStatus::Running);
            inner.status = TaskStatus::Running;
            inner.started_at = Some(Utc::now());
        }
    }

    fn transition(&self, to: TaskStatus) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.can_transition_to(to) {
            self.record_transition(inner.status, to);
            inner.status = to;
            true
        } else {
            false
        }
    }

    fn record_transition(&self, from: TaskStatus, to: TaskStatus) {
        // The worker runs inside its task span, so this lands there.
        task_telemetry::record_status_transition(
            &tracing::Span::current(),
            &from.to_string(),
            &to.to_string(),
        );
        metrics::task_state_transitions().add(
            1,
            &[
                opentelemetry::KeyValue::new("from", from.to_string()),
                opentelemetry::KeyValue::new("to", to.to_string()),
            ],
        );
    }

    /// Force-mark the task cancelled from outside the worker. Used by the
    /// deadline watchdog after aborting the execution future. Returns
    /// false if the task already reached a terminal status.
    pub fn force_cancel(&self, message: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return false;
        }
        self.record_transition(inner.status, TaskStatus::Cancelled);
        inner.status = TaskStatus::Cancelled;
        inner.error_message = Some(message.to_string());
        inner.completed_at = Some(Utc::now());
        true
    }

    fn finish(
        &self,
        status: TaskStatus,
        error_message: Option<String>,
        output: Option<String>,
        output_sections: BTreeMap<String, String>,
    ) -> TaskResult {
        let mut inner = self.inner.lock();
        if !inner.status.is_terminal() && inner.status.can_transition_to(status) {
            self.record_transition(inner.status, status);
            inner.status = status;
            inner.error_message = error_message;
            inner.completed_at = Some(Utc::now());
            if status == TaskStatus::Completed {
                // A normal completion leaves step_index == total_steps.
                let usage = inner.usage;
                let checkpoint = &mut inner.checkpoint;
                if let Some(total) = checkpoint.total_steps {
                    checkpoint.step_index = checkpoint.step_index.max(total);
                }
                checkpoint.record_step(
                    "completed",
                    checkpoint.step_index,
                    checkpoint.total_steps,
                    usage,
                );
                if let Some(ref text) = output {
                    checkpoint.merge_interim("output", serde_json::Value::String(text.clone()));
                }
                inner.output = output;
                inner.output_sections = output_sections;
            }
        }
        Self::result_of(self.id, self.agent_kind, &inner)
    }

    fn result_of(id: TaskId, agent_kind: AgentKind, inner: &TaskState) -> TaskResult {
        let duration_ms = match (inner.started_at, inner.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        };
        TaskResult {
            task_id: id,
            agent_kind,
            status: inner.status,
            output: inner.output.clone(),
            output_sections: inner.output_sections.clone(),
            started_at: inner.started_at,
            completed_at: inner.completed_at,
            duration_ms,
            usage: inner.usage,
            error_message: inner.error_message.clone(),
            checkpoint: inner.checkpoint.clone(),
        }
    }

    /// Point-in-time view for status queries.
    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.inner.lock();
        let current_output = inner.output.clone().or_else(|| {
            inner
                .checkpoint
                .interim_results
                .get("output")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
        TaskSnapshot {
            status: inner.status,
            checkpoint: inner.checkpoint.clone(),
            usage: inner.usage,
            started_at: inner.started_at,
            completed_at: inner.completed_at,
            error_message: inner.error_message.clone(),
            current_output,
        }
    }

}

/// Point-in-time view of a task for status queries.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub checkpoint: Checkpoint,
    pub usage: UsageTotals,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub current_output: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Decision of a checkpoint gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGate {
    /// Keep going.
    Proceed,
    /// Cancel was requested; return a cancelled outcome.
    Cancelled,
}

/// Everything an agent needs while executing: the shared cell, the event
/// hub, and the collaborators.
#[derive(Clone)]
pub struct TaskCtx {
    cell: Arc<TaskCell>,
    hub: Arc<Hub>,
    generator: Arc<dyn Generator>,
    search: Arc<dyn ContextSearch>,
}

impl TaskCtx {
    pub fn new(
        cell: Arc<TaskCell>,
        hub: Arc<Hub>,
        generator: Arc<dyn Generator>,
        search: Arc<dyn ContextSearch>,
    ) -> Self {
        Self {
            cell,
            hub,
            generator,
            search,
        }
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    pub fn config(&self) -> &TaskConfig {
        &self.cell.config
    }

    pub fn cell(&self) -> &Arc<TaskCell> {
        &self.cell
    }

    pub fn search(&self) -> &dyn ContextSearch {
        self.search.as_ref()
    }

    pub fn publish(&self, payload: EventPayload) {
        self.hub.publish(Event::new(payload));
    }

    /// Publish a task_status event reflecting the current state.
    pub fn status_event(&self, message: Option<&str>) {
        let snapshot = self.cell.snapshot();
        let current_step = if snapshot.checkpoint.last_step.is_empty() {
            None
        } else {
            Some(snapshot.checkpoint.last_step.clone())
        };
        self.publish(EventPayload::TaskStatus(TaskStatusPayload {
            task_id: self.cell.id,
            agent_kind: self.cell.agent_kind,
            status: snapshot.status,
            message: message.map(str::to_string),
            progress_percent: snapshot.checkpoint.progress_percent(),
            current_step,
            tokens_used: snapshot.usage.total_tokens(),
            cost_usd: snapshot.usage.cost_usd,
        }));
    }

    /// Record a completed step on the checkpoint, then publish a
    /// task_progress event describing it.
    pub fn progress(
        &self,
        step: &str,
        step_index: u32,
        total_steps: Option<u32>,
        description: Option<&str>,
    ) {
        let completed_items = {
            let mut inner = self.cell.inner.lock();
            let usage = inner.usage;
            inner.checkpoint.record_step(step, step_index, total_steps, usage);
            inner.checkpoint.completed_items.clone()
        };
        self.publish(EventPayload::TaskProgress(TaskProgressPayload {
            task_id: self.cell.id,
            step_index,
            total_steps,
            step_name: step.to_string(),
            step_description: description.map(str::to_string),
            completed_items,
        }));
    }

    /// Record an item as done for idempotent-resume bookkeeping.
    pub fn complete_item(&self, item: &str) {
        self.cell.inner.lock().checkpoint.record_item(item);
    }

    /// Merge a partial output into the checkpoint.
    pub fn merge_interim(&self, key: &str, value: serde_json::Value) {
        self.cell.inner.lock().checkpoint.merge_interim(key, value);
    }

    /// Add to the usage counters and enforce the budget.
    ///
    /// Publishes a cost_update, warns once when spend crosses 80% of the
    /// cost limit, and returns `Error::BudgetExceeded` as soon as either
    /// the token or the cost ceiling is crossed; the execution loop must
    /// stop at the next checkpoint boundary.
    pub fn track_usage(&self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) -> Result<()> {
        let config = &self.cell.config;
        let (usage, warn_now) = {
            let mut inner = self.cell.inner.lock();
            inner.usage.add(prompt_tokens, completion_tokens, cost_usd);
            let usage = inner.usage;
            let warn_now = !inner.budget_warned
                && usage.cost_usd >= config.max_cost_usd * BUDGET_WARN_FRACTION;
            if warn_now {
                inner.budget_warned = true;
            }
            (usage, warn_now)
        };

        metrics::llm_tokens().add(
            prompt_tokens,
            &[
                opentelemetry::KeyValue::new("model", config.model.clone()),
                opentelemetry::KeyValue::new("direction", "input"),
            ],
        );
        metrics::llm_tokens().add(
            completion_tokens,
            &[
                opentelemetry::KeyValue::new("model", config.model.clone()),
                opentelemetry::KeyValue::new("direction", "output"),
            ],
        );

        self.publish(EventPayload::CostUpdate(CostUpdatePayload {
            task_id: self.cell.id,
            model: config.model.clone(),
            prompt_tokens,
            completion_tokens,
            cost_usd,
            cumulative_cost_usd: usage.cost_usd,
            budget_remaining_usd: Some((config.max_cost_usd - usage.cost_usd).max(0.0)),
        }));

        let percent_used = usage.cost_usd / config.max_cost_usd * 100.0;
        let over_cost = usage.cost_usd > config.max_cost_usd;
        let over_tokens = usage.total_tokens() > config.max_tokens;

        if warn_now && !over_cost && !over_tokens {
            self.publish(EventPayload::BudgetWarning(BudgetWarningPayload {
                task_id: self.cell.id,
                limit_usd: config.max_cost_usd,
                spent_usd: usage.cost_usd,
                percent_used,
                level: BudgetWarningLevel::Approaching,
            }));
        }

        if over_cost || over_tokens {
            self.publish(EventPayload::BudgetWarning(BudgetWarningPayload {
                task_id: self.cell.id,
                limit_usd: config.max_cost_usd,
                spent_usd: usage.cost_usd,
                percent_used,
                level: BudgetWarningLevel::Exceeded,
            }));
            self.cell.budget_exhausted.store(true, Ordering::SeqCst);
            self.cell.control.notify_waiters();
            let what = if over_cost {
                format!("cost ${:.4} over limit ${:.2}", usage.cost_usd, config.max_cost_usd)
            } else {
                format!("{} tokens over limit {}", usage.total_tokens(), config.max_tokens)
            };
            return Err(Error::BudgetExceeded(what));
        }

        Ok(())
    }

    /// Cooperative checkpoint boundary. Agents call this between steps.
    ///
    /// Observes the control flags: cancel short-circuits, pause parks the
    /// worker here (status Paused) until resume or cancel, an exhausted
    /// budget surfaces as `BudgetExceeded`. Never interrupts an in-flight
    /// step; only the *next* step is prevented from starting.
    pub async fn gate(&self) -> Result<StepGate> {
        loop {
            if self.cell.budget_exhausted() {
                // Leave via Running so the machine only walks legal edges.
                if self.cell.status() == TaskStatus::Paused {
                    self.cell.transition(TaskStatus::Running);
                }
                return Err(Error::BudgetExceeded("task budget exhausted".to_string()));
            }
            if self.cell.cancel_requested() {
                return Ok(StepGate::Cancelled);
            }
            if !self.cell.pause_requested() {
                if self.cell.status() == TaskStatus::Paused {
                    self.cell.transition(TaskStatus::Running);
                    self.status_event(Some("Task resumed"));
                }
                return Ok(StepGate::Proceed);
            }

            if self.cell.transition(TaskStatus::Paused) {
                self.status_event(Some("Task paused"));
            }

            let notified = self.cell.notified();
            // Re-check after registering interest so a signal that landed
            // between the flag check and here is not missed.
            if self.cell.cancel_requested()
                || !self.cell.pause_requested()
                || self.cell.budget_exhausted()
            {
                continue;
            }
            notified.await;
        }
    }

    /// Run one generation call: GenAI span, stream event, usage tracking.
    pub async fn generate(&self, system: &str, prompt: &str, max_tokens: u64) -> Result<String> {
        let config = &self.cell.config;
        let span = genai::start_chat_span(&config.model, "anthropic");
        let request = GenerationRequest {
            system: system.to_string(),
            prompt: prompt.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens,
        };

        let generation = self
            .generator
            .generate(request)
            .instrument(span.clone())
            .await?;
        genai::record_token_usage(&span, generation.prompt_tokens, generation.completion_tokens);

        // The collaborator returns complete output; observers still get it
        // through the streaming channel as a single final chunk.
        self.publish(EventPayload::GenerationStreamChunk(GenerationStreamChunkPayload {
            task_id: self.cell.id,
            chunk: generation.content.clone(),
            is_final: true,
        }));

        self.track_usage(
            generation.prompt_tokens,
            generation.completion_tokens,
            generation.cost_usd,
        )?;

        Ok(generation.content)
    }
}

// ---------------------------------------------------------------------------
// Run wrapper
// ---------------------------------------------------------------------------

/// Drive an agent through the task lifecycle.
///
/// Contract: always returns a result — agent errors, budget kills, and
/// cooperative cancellation all become a terminal status on the cell and
/// a populated [`TaskResult`], never a raised error.
pub async fn run_task(
    agent: Arc<dyn Agent>,
    ctx: TaskCtx,
    input: serde_json::Value,
) -> TaskResult {
    ctx.cell().mark_started();
    ctx.status_event(Some("Task started"));

    let outcome = agent.execute(&ctx, input).await;

    let result = match outcome {
        Ok(ExecuteOutcome::Completed { output, sections }) => {
            ctx.cell()
                .finish(TaskStatus::Completed, None, Some(output), sections)
        }
        Ok(ExecuteOutcome::Cancelled) | Err(Error::Cancelled) => ctx.cell().finish(
            TaskStatus::Cancelled,
            Some("Task was cancelled".to_string()),
            None,
            BTreeMap::new(),
        ),
        Err(e) => {
            error!(task = %ctx.id(), agent = %ctx.cell().agent_kind, "task failed: {e}");
            ctx.cell()
                .finish(TaskStatus::Failed, Some(e.to_string()), None, BTreeMap::new())
        }
    };

    let message = match result.status {
        TaskStatus::Completed => "Task completed".to_string(),
        _ => result
            .error_message
            .clone()
            .unwrap_or_else(|| result.status.to_string()),
    };
    ctx.status_event(Some(&message));

    result
}
