//! Context search collaborator.
//!
//! Vector similarity search over project documents lives outside this
//! engine; tasks consume it through this trait only. [`NoSearch`] is the
//! stand-in when no document store is wired up.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// A scored passage returned by similarity search.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub content: String,
    pub score: f64,
    pub source: Option<String>,
}

#[async_trait]
pub trait ContextSearch: Send + Sync {
    /// Return up to `limit` passages relevant to `query`, best first.
    async fn search(
        &self,
        query: &str,
        project_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ScoredPassage>>;
}

/// Search backend that finds nothing. Tasks degrade to generating
/// without document context.
pub struct NoSearch;

#[async_trait]
impl ContextSearch for NoSearch {
    async fn search(
        &self,
        _query: &str,
        _project_id: Option<Uuid>,
        _limit: usize,
    ) -> Result<Vec<ScoredPassage>> {
        Ok(Vec::new())
    }
}

/// Format passages as numbered source blocks for prompt inclusion.
pub fn format_passages(passages: &[ScoredPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, passage)| format!("[Source {}]\n{}\n", i + 1, passage.content))
        .collect::<Vec<_>>()
        .join("\n")
}
