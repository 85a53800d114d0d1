//! Agent abstraction.
//!
//! An agent is a pluggable specialization over two capabilities: a system
//! prompt and a multi-step `execute`. The registry, state machine, and
//! event plumbing are generic over the kind; only the writing agent has
//! an implementation today.

pub mod writing;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::AgentKind;
use crate::task::TaskCtx;

pub use writing::WritingAgent;

/// What `execute` produced.
#[derive(Debug)]
pub enum ExecuteOutcome {
    Completed {
        output: String,
        sections: BTreeMap<String, String>,
    },
    /// A cancel signal was observed at a checkpoint boundary.
    Cancelled,
}

/// A pluggable agent specialization.
///
/// `execute` performs the actual multi-step work. Between steps it must
/// pass through `ctx.gate()` and short-circuit on a cancel decision, and
/// record each completed step via `ctx.progress` so the task stays
/// resumable.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn system_prompt(&self) -> String;

    async fn execute(&self, ctx: &TaskCtx, input: serde_json::Value) -> Result<ExecuteOutcome>;
}

/// Construct the agent implementation for a kind.
pub fn agent_for_kind(kind: AgentKind) -> Result<Arc<dyn Agent>> {
    match kind {
        AgentKind::Writing => Ok(Arc::new(WritingAgent::new())),
        other => Err(Error::InvalidInput(format!(
            "no agent implemented for kind {other}"
        ))),
    }
}
