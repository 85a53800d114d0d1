//! Task registry: owns all in-flight tasks, spawns their workers, and
//! mediates control signals and status queries from the boundary layer.
//!
//! One mutex guards the id → entry map; it is held for map operations
//! only — never while agent work runs, and never across an await. Each
//! task gets one worker, wrapped in a hard deadline that force-terminates
//! the run if the cooperative cancel path does not exit in time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::agent::{agent_for_kind, Agent};
use crate::error::{Error, Result};
use crate::llm::Generator;
use crate::model::{AgentKind, TaskConfig, TaskId, TaskStatus};
use crate::realtime::Hub;
use crate::search::ContextSearch;
use crate::task::{run_task, TaskCell, TaskCtx, TaskSnapshot};
use crate::telemetry::{metrics, task as task_telemetry};

struct TaskEntry {
    cell: Arc<TaskCell>,
    worker: Option<JoinHandle<()>>,
}

/// Registry of all in-flight and recently finished tasks.
///
/// Initialized empty at process start; dropping the registry drops every
/// entry. There is no other ambient task state.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    hub: Arc<Hub>,
    generator: Arc<dyn Generator>,
    search: Arc<dyn ContextSearch>,
}

impl TaskRegistry {
    pub fn new(
        hub: Arc<Hub>,
        generator: Arc<dyn Generator>,
        search: Arc<dyn ContextSearch>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            hub,
            generator,
            search,
        })
    }

    /// Allocate a task in Pending state and start its worker, resolving
    /// the agent implementation from its kind.
    pub fn create(
        &self,
        agent_kind: AgentKind,
        config: TaskConfig,
        input: serde_json::Value,
    ) -> Result<TaskId> {
        let agent = agent_for_kind(agent_kind)?;
        self.create_with_agent(agent, config, input)
    }

    /// Allocate a task for an explicit agent implementation. The registry
    /// and state machine are generic over the variant; this is the seam
    /// custom agents plug into.
    pub fn create_with_agent(
        &self,
        agent: Arc<dyn Agent>,
        config: TaskConfig,
        input: serde_json::Value,
    ) -> Result<TaskId> {
        config.validate()?;
        let agent_kind = agent.kind();

        let id = TaskId::new();
        let cell = TaskCell::new(id, agent_kind, config);
        let ctx = TaskCtx::new(
            Arc::clone(&cell),
            Arc::clone(&self.hub),
            Arc::clone(&self.generator),
            Arc::clone(&self.search),
        );

        let deadline = cell.config.time_limit();
        let watchdog_ctx = ctx.clone();
        let span = task_telemetry::start_task_span(agent_kind, id);
        let worker = tokio::spawn(
            async move {
                match tokio::time::timeout(deadline, run_task(agent, ctx, input)).await {
                    Ok(_result) => {}
                    Err(_elapsed) => {
                        // The run future was dropped mid-step; mark the
                        // task and tell observers ourselves.
                        warn!(task = %id, "deadline expired, force-cancelling");
                        if watchdog_ctx.cell().force_cancel("Task deadline exceeded") {
                            watchdog_ctx.status_event(Some("Task deadline exceeded"));
                        }
                    }
                }
            }
            .instrument(span),
        );

        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&id) {
            // Unreachable with v4 ids, but never clobber an existing task.
            drop(tasks);
            worker.abort();
            metrics::tasks_created().add(
                1,
                &[
                    opentelemetry::KeyValue::new("agent_kind", agent_kind.to_string()),
                    opentelemetry::KeyValue::new("result", "duplicate"),
                ],
            );
            return Err(Error::DuplicateId(id.to_string()));
        }
        tasks.insert(
            id,
            TaskEntry {
                cell,
                worker: Some(worker),
            },
        );
        drop(tasks);

        info!(task = %id, agent = %agent_kind, "task created");
        metrics::tasks_created().add(
            1,
            &[
                opentelemetry::KeyValue::new("agent_kind", agent_kind.to_string()),
                opentelemetry::KeyValue::new("result", "ok"),
            ],
        );
        Ok(id)
    }

    /// Look up a task's shared cell.
    pub fn get(&self, id: TaskId) -> Result<Arc<TaskCell>> {
        let tasks = self.tasks.lock();
        tasks
            .get(&id)
            .map(|entry| Arc::clone(&entry.cell))
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    /// Point-in-time status snapshot.
    pub fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot> {
        Ok(self.get(id)?.snapshot())
    }

    /// Ask a task to stop at its next checkpoint boundary.
    pub fn request_cancel(&self, id: TaskId) -> Result<()> {
        let cell = self.get(id)?;
        let status = cell.status();
        if status.is_terminal() {
            return Err(Error::InvalidTransition {
                action: "cancel",
                status,
            });
        }
        cell.request_cancel();
        Ok(())
    }

    /// Ask a running task to pause before its next step.
    pub fn request_pause(&self, id: TaskId) -> Result<()> {
        let cell = self.get(id)?;
        let status = cell.status();
        if status != TaskStatus::Running {
            return Err(Error::InvalidTransition {
                action: "pause",
                status,
            });
        }
        cell.request_pause();
        Ok(())
    }

    /// Resume a paused task.
    pub fn request_resume(&self, id: TaskId) -> Result<()> {
        let cell = self.get(id)?;
        let status = cell.status();
        if status != TaskStatus::Paused {
            return Err(Error::InvalidTransition {
                action: "resume",
                status,
            });
        }
        cell.request_resume();
        Ok(())
    }

    /// Remove a terminal task from the registry.
    pub fn delete(&self, id: TaskId) -> Result<()> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        let status = entry.cell.status();
        if !status.is_terminal() {
            return Err(Error::InvalidTransition {
                action: "delete",
                status,
            });
        }
        tasks.remove(&id);
        info!(task = %id, "task deleted");
        Ok(())
    }

    /// Wait for a task's worker to finish. Consumes the join handle; a
    /// second call returns immediately.
    pub async fn join(&self, id: TaskId) -> Result<()> {
        let worker = {
            let mut tasks = self.tasks.lock();
            let entry = tasks
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
            entry.worker.take()
        };
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| Error::Other(format!("task worker panicked: {e}")))?;
        }
        Ok(())
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.lock().keys().copied().collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}
