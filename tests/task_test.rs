//! Integration tests for the task lifecycle: the run wrapper, cooperative
//! pause/cancel, and budget enforcement.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use draftsmith::agent::{Agent, ExecuteOutcome};
use draftsmith::error::{Error, Result};
use draftsmith::event::{EventKind, EventPayload};
use draftsmith::llm::{Generation, GenerationRequest, Generator};
use draftsmith::model::{AgentKind, TaskConfig, TaskId, TaskStatus};
use draftsmith::realtime::Hub;
use draftsmith::search::NoSearch;
use draftsmith::task::{run_task, StepGate, TaskCell, TaskCtx};
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

struct NullGenerator;

#[async_trait]
impl Generator for NullGenerator {
    async fn generate(&self, _request: GenerationRequest) -> Result<Generation> {
        Ok(Generation {
            content: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
        })
    }
}

struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _request: GenerationRequest) -> Result<Generation> {
        Err(Error::Generation("model exploded".to_string()))
    }
}

fn test_cell(config: TaskConfig) -> (Arc<TaskCell>, TaskCtx, Arc<Hub>) {
    test_cell_with(config, Arc::new(NullGenerator))
}

fn test_cell_with(
    config: TaskConfig,
    generator: Arc<dyn Generator>,
) -> (Arc<TaskCell>, TaskCtx, Arc<Hub>) {
    let cell = TaskCell::new(TaskId::new(), AgentKind::Writing, config);
    let hub = Hub::new(64);
    let ctx = TaskCtx::new(
        Arc::clone(&cell),
        Arc::clone(&hub),
        generator,
        Arc::new(NoSearch),
    );
    (cell, ctx, hub)
}

/// Agent that runs `total` steps, acquiring one semaphore permit per step
/// so tests can pace it deterministically.
struct SteppedAgent {
    total: u32,
    release: Arc<Semaphore>,
    steps_run: Arc<AtomicU32>,
}

#[async_trait]
impl Agent for SteppedAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Writing
    }

    fn system_prompt(&self) -> String {
        "stepped".to_string()
    }

    async fn execute(&self, ctx: &TaskCtx, _input: serde_json::Value) -> Result<ExecuteOutcome> {
        for i in 0..self.total {
            if ctx.gate().await? == StepGate::Cancelled {
                return Ok(ExecuteOutcome::Cancelled);
            }
            let permit = self.release.acquire().await.expect("semaphore closed");
            permit.forget();
            ctx.progress(&format!("step_{i}"), i, Some(self.total), None);
            self.steps_run.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ExecuteOutcome::Completed {
            output: "done".to_string(),
            sections: BTreeMap::new(),
        })
    }
}

/// Agent that spends a fixed cost per step until the budget stops it.
struct SpendingAgent {
    cost_per_step: f64,
    steps_run: Arc<AtomicU32>,
}

#[async_trait]
impl Agent for SpendingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Writing
    }

    fn system_prompt(&self) -> String {
        "spending".to_string()
    }

    async fn execute(&self, ctx: &TaskCtx, _input: serde_json::Value) -> Result<ExecuteOutcome> {
        for i in 0..10 {
            if ctx.gate().await? == StepGate::Cancelled {
                return Ok(ExecuteOutcome::Cancelled);
            }
            ctx.track_usage(10, 10, self.cost_per_step)?;
            self.steps_run.fetch_add(1, Ordering::SeqCst);
            ctx.progress(&format!("spend_{i}"), i, Some(10), None);
        }
        Ok(ExecuteOutcome::Completed {
            output: "spent".to_string(),
            sections: BTreeMap::new(),
        })
    }
}

/// Agent that makes one generation call and returns its output.
struct GeneratingAgent;

#[async_trait]
impl Agent for GeneratingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Writing
    }

    fn system_prompt(&self) -> String {
        "generating".to_string()
    }

    async fn execute(&self, ctx: &TaskCtx, _input: serde_json::Value) -> Result<ExecuteOutcome> {
        let output = ctx.generate(&self.system_prompt(), "write", 256).await?;
        Ok(ExecuteOutcome::Completed {
            output,
            sections: BTreeMap::new(),
        })
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cond() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Normal completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn normal_completion_reaches_total_steps() {
    let (_cell, ctx, _hub) = test_cell(TaskConfig::default());
    let release = Arc::new(Semaphore::new(0));
    release.add_permits(4);
    let agent = Arc::new(SteppedAgent {
        total: 4,
        release,
        steps_run: Arc::new(AtomicU32::new(0)),
    });

    let result = run_task(agent, ctx, serde_json::json!({})).await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.checkpoint.total_steps, Some(4));
    assert_eq!(result.checkpoint.step_index, 4);
    assert_eq!(result.output.as_deref(), Some("done"));
    assert!(result.started_at.is_some());
    assert!(result.completed_at.is_some());
    assert!(result.error_message.is_none());
}

// ---------------------------------------------------------------------------
// Cooperative cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_is_observed_at_the_next_boundary() {
    let (cell, ctx, _hub) = test_cell(TaskConfig::default());
    let release = Arc::new(Semaphore::new(0));
    let steps_run = Arc::new(AtomicU32::new(0));
    let agent = Arc::new(SteppedAgent {
        total: 6,
        release: Arc::clone(&release),
        steps_run: Arc::clone(&steps_run),
    });

    release.add_permits(2);
    let worker = tokio::spawn(run_task(agent, ctx, serde_json::json!({})));

    let observed = Arc::clone(&steps_run);
    wait_until(move || observed.load(Ordering::SeqCst) == 2).await;
    cell.request_cancel();
    release.add_permits(10);

    let result = worker.await.expect("worker panicked");
    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(result.error_message.as_deref(), Some("Task was cancelled"));
    assert!(result.completed_at.is_some());
    // Cancellation is cooperative: at most the step already past its gate
    // finished, nothing after it.
    assert!(steps_run.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn cancel_before_start_never_runs_a_step() {
    let (cell, ctx, _hub) = test_cell(TaskConfig::default());
    let release = Arc::new(Semaphore::new(0));
    release.add_permits(4);
    let steps_run = Arc::new(AtomicU32::new(0));
    let agent = Arc::new(SteppedAgent {
        total: 4,
        release,
        steps_run: Arc::clone(&steps_run),
    });

    cell.request_cancel();
    let result = run_task(agent, ctx, serde_json::json!({})).await;

    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(steps_run.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Pause / resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_parks_before_the_next_step_and_resume_continues() {
    let (cell, ctx, _hub) = test_cell(TaskConfig::default());
    let release = Arc::new(Semaphore::new(0));
    let steps_run = Arc::new(AtomicU32::new(0));
    let agent = Arc::new(SteppedAgent {
        total: 4,
        release: Arc::clone(&release),
        steps_run: Arc::clone(&steps_run),
    });

    release.add_permits(1);
    let worker = tokio::spawn(run_task(agent, ctx, serde_json::json!({})));

    let observed = Arc::clone(&steps_run);
    wait_until(move || observed.load(Ordering::SeqCst) == 1).await;
    cell.request_pause();
    release.add_permits(1);

    // The in-flight step finishes; the worker parks at the next gate.
    let paused_cell = Arc::clone(&cell);
    wait_until(move || paused_cell.status() == TaskStatus::Paused).await;
    assert_eq!(steps_run.load(Ordering::SeqCst), 2);

    // Permits alone do not un-pause the worker.
    release.add_permits(10);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cell.status(), TaskStatus::Paused);
    assert_eq!(steps_run.load(Ordering::SeqCst), 2);

    cell.request_resume();
    let result = worker.await.expect("worker panicked");
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(steps_run.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn cancel_while_paused_ends_the_task() {
    let (cell, ctx, _hub) = test_cell(TaskConfig::default());
    let release = Arc::new(Semaphore::new(0));
    let steps_run = Arc::new(AtomicU32::new(0));
    let agent = Arc::new(SteppedAgent {
        total: 4,
        release: Arc::clone(&release),
        steps_run: Arc::clone(&steps_run),
    });

    release.add_permits(1);
    let worker = tokio::spawn(run_task(agent, ctx, serde_json::json!({})));

    let observed = Arc::clone(&steps_run);
    wait_until(move || observed.load(Ordering::SeqCst) == 1).await;
    cell.request_pause();
    release.add_permits(1);

    let paused_cell = Arc::clone(&cell);
    wait_until(move || paused_cell.status() == TaskStatus::Paused).await;

    cell.request_cancel();
    let result = worker.await.expect("worker panicked");
    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(result.error_message.as_deref(), Some("Task was cancelled"));
}

// ---------------------------------------------------------------------------
// Budget enforcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn budget_exceeded_fails_the_task_and_stops_the_loop() {
    let config = TaskConfig {
        max_cost_usd: 5.0,
        ..TaskConfig::default()
    };
    let (_cell, ctx, _hub) = test_cell(config);
    let steps_run = Arc::new(AtomicU32::new(0));
    let agent = Arc::new(SpendingAgent {
        cost_per_step: 3.0,
        steps_run: Arc::clone(&steps_run),
    });

    let result = run_task(agent, ctx, serde_json::json!({})).await;

    assert_eq!(result.status, TaskStatus::Failed);
    let message = result.error_message.expect("failed result carries a message");
    assert!(message.contains("budget exceeded"), "got: {message}");
    // Step 0 spends 3.0; step 1 crosses 5.0 and stops the loop there.
    assert_eq!(steps_run.load(Ordering::SeqCst), 1);
    assert!(result.completed_at.is_some());
}

#[tokio::test]
async fn token_budget_is_enforced_too() {
    let config = TaskConfig {
        max_tokens: 15,
        max_cost_usd: 100.0,
        ..TaskConfig::default()
    };
    let (_cell, ctx, _hub) = test_cell(config);
    let agent = Arc::new(SpendingAgent {
        cost_per_step: 0.01,
        steps_run: Arc::new(AtomicU32::new(0)),
    });

    let result = run_task(agent, ctx, serde_json::json!({})).await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result
        .error_message
        .expect("failed result carries a message")
        .contains("budget exceeded"));
}

#[tokio::test]
async fn budget_warnings_escalate_from_approaching_to_exceeded() {
    let config = TaskConfig {
        max_cost_usd: 5.0,
        ..TaskConfig::default()
    };
    let (_cell, ctx, hub) = test_cell(config);

    let (observer, mut events) = hub.connect(None);
    hub.subscribe(observer, &[EventKind::BudgetWarning]);

    let agent = Arc::new(SpendingAgent {
        cost_per_step: 2.0,
        steps_run: Arc::new(AtomicU32::new(0)),
    });
    let result = run_task(agent, ctx, serde_json::json!({})).await;
    assert_eq!(result.status, TaskStatus::Failed);

    let mut warnings = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventPayload::BudgetWarning(ref payload) = event.payload {
            warnings.push(payload.level);
        }
    }
    use draftsmith::event::BudgetWarningLevel::*;
    assert_eq!(warnings, vec![Approaching, Exceeded]);
}

// ---------------------------------------------------------------------------
// Generation failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generation_failure_becomes_a_failed_result() {
    let (_cell, ctx, _hub) = test_cell_with(TaskConfig::default(), Arc::new(FailingGenerator));
    let result = run_task(Arc::new(GeneratingAgent), ctx, serde_json::json!({})).await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result
        .error_message
        .expect("failed result carries a message")
        .contains("model exploded"));
    assert!(result.completed_at.is_some());
}
