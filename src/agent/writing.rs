//! Writing agent: drafts grant sections from retrieved document context.
//!
//! Four checkpointed steps — retrieve context, build prompt, generate,
//! format — with a cooperative gate between each so pause and cancel
//! signals take effect at step boundaries, never mid-generation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::agent::{Agent, ExecuteOutcome};
use crate::error::{Error, Result};
use crate::model::AgentKind;
use crate::search::format_passages;
use crate::task::{StepGate, TaskCtx};

const TOTAL_STEPS: u32 = 4;

/// Standard NIH grant sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSection {
    SpecificAims,
    Significance,
    Innovation,
    Approach,
    PreliminaryData,
    Timeline,
    BudgetJustification,
    Facilities,
    Equipment,
    Bibliography,
}

impl GrantSection {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantSection::SpecificAims => "specific_aims",
            GrantSection::Significance => "significance",
            GrantSection::Innovation => "innovation",
            GrantSection::Approach => "approach",
            GrantSection::PreliminaryData => "preliminary_data",
            GrantSection::Timeline => "timeline",
            GrantSection::BudgetJustification => "budget_justification",
            GrantSection::Facilities => "facilities",
            GrantSection::Equipment => "equipment",
            GrantSection::Bibliography => "bibliography",
        }
    }

    /// Section-specific drafting guidance, where we have it.
    fn guidance(self) -> Option<&'static str> {
        match self {
            GrantSection::SpecificAims => Some(
                "Structure the Specific Aims page as follows:\n\
                 1. Opening paragraph: hook with the problem and its significance\n\
                 2. Gap in knowledge: what is unknown that this research will address\n\
                 3. Long-term goal and objective\n\
                 4. Central hypothesis: testable, mechanistic statement\n\
                 5. Rationale: why this approach will work\n\
                 6. Specific Aims (2-3): clear, measurable objectives\n\
                 7. Expected outcomes and impact\n\
                 \n\
                 Keep to ~1 page (500 words). Each aim should be independent yet \
                 synergistic. Avoid jargon. Write in future tense for proposed work.",
            ),
            GrantSection::Significance => Some(
                "Address these key questions:\n\
                 1. What is the clinical/scientific problem?\n\
                 2. What is the current state of knowledge?\n\
                 3. What are the barriers to progress?\n\
                 4. How will this research advance the field?\n\
                 5. What is the potential impact on human health?\n\
                 \n\
                 Be specific about gaps in knowledge. Cite key literature. \
                 Explain why solving this problem matters NOW.",
            ),
            GrantSection::Innovation => Some(
                "Highlight what is NEW about:\n\
                 1. Conceptual/theoretical approach\n\
                 2. Technical/methodological approach\n\
                 3. Instrumentation or resources\n\
                 \n\
                 Avoid claiming innovation without justification. Be specific: \
                 \"This is the first study to...\" or \"Unlike prior approaches...\". \
                 Innovation can be incremental - focus on meaningful advances.",
            ),
            GrantSection::Approach => Some(
                "For each Specific Aim, include:\n\
                 1. Rationale: why this aim and approach\n\
                 2. Experimental design: clear methods with controls\n\
                 3. Expected results\n\
                 4. Potential problems: honest assessment of risks\n\
                 5. Alternative approaches: backup plans\n\
                 \n\
                 Include preliminary data to demonstrate feasibility. Be specific \
                 about sample sizes, statistical approaches, and timelines.",
            ),
            GrantSection::PreliminaryData => Some(
                "Present data that demonstrates:\n\
                 1. Feasibility of the proposed approach\n\
                 2. Your expertise in the methods\n\
                 3. Initial support for your hypothesis\n\
                 \n\
                 Each figure should have a clear purpose. Interpret results \
                 honestly - acknowledge limitations. Connect preliminary data to \
                 proposed experiments.",
            ),
            _ => None,
        }
    }

    /// Search query for retrieving section-relevant passages.
    fn search_query(self, project_title: &str) -> String {
        match self {
            GrantSection::SpecificAims => {
                format!("specific aims hypothesis objectives {project_title}")
            }
            GrantSection::Significance => {
                format!("significance importance clinical impact {project_title}")
            }
            GrantSection::Innovation => {
                format!("innovation novel approach new methods {project_title}")
            }
            GrantSection::Approach => {
                format!("methods experimental design approach {project_title}")
            }
            GrantSection::PreliminaryData => {
                format!("preliminary data results findings {project_title}")
            }
            _ => project_title.to_string(),
        }
    }
}

impl std::fmt::Display for GrantSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for the writing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritingInput {
    pub section: GrantSection,
    pub project_id: Uuid,
    pub project_title: String,
    #[serde(default)]
    pub project_description: Option<String>,

    #[serde(default)]
    pub rfa_requirements: Option<String>,
    #[serde(default)]
    pub previous_feedback: Option<String>,
    #[serde(default)]
    pub user_notes: Option<String>,

    /// 0-1, higher = more formal.
    #[serde(default = "default_formality")]
    pub formality: f64,
    /// 0-1, higher = more technical.
    #[serde(default = "default_technical_depth")]
    pub technical_depth: f64,
    #[serde(default = "default_max_words")]
    pub max_words: u32,
}

fn default_formality() -> f64 {
    0.8
}

fn default_technical_depth() -> f64 {
    0.7
}

fn default_max_words() -> u32 {
    500
}

/// Agent that drafts grant sections.
pub struct WritingAgent;

impl WritingAgent {
    pub fn new() -> Self {
        Self
    }

    async fn retrieve_context(&self, ctx: &TaskCtx, input: &WritingInput) -> String {
        if !ctx.config().use_context {
            return String::new();
        }

        let query = input.section.search_query(&input.project_title);
        match ctx
            .search()
            .search(&query, Some(input.project_id), ctx.config().max_context_passages)
            .await
        {
            Ok(passages) if passages.is_empty() => String::new(),
            Ok(passages) => format_passages(&passages),
            Err(e) => {
                // Context is an enhancement; drafting proceeds without it.
                warn!(task = %ctx.id(), "context retrieval failed: {e}");
                String::new()
            }
        }
    }

    fn build_prompt(&self, input: &WritingInput, context: &str) -> String {
        let section_title = input.section.as_str().replace('_', " ");
        let mut parts = vec![
            format!("# Task: Write the {section_title} section"),
            String::new(),
            format!("## Project Title\n{}", input.project_title),
        ];

        if let Some(ref description) = input.project_description {
            parts.push(String::new());
            parts.push(format!("## Project Description\n{description}"));
        }

        if !context.is_empty() {
            parts.push(String::new());
            parts.push("## Relevant Context from Your Documents".to_string());
            parts.push(context.to_string());
        }

        if let Some(ref rfa) = input.rfa_requirements {
            parts.push(String::new());
            parts.push("## RFA Requirements to Address".to_string());
            parts.push(rfa.clone());
        }

        if let Some(ref feedback) = input.previous_feedback {
            parts.push(String::new());
            parts.push("## Previous Reviewer Feedback to Address".to_string());
            parts.push(feedback.clone());
        }

        if let Some(ref notes) = input.user_notes {
            parts.push(String::new());
            parts.push("## Additional Notes from Researcher".to_string());
            parts.push(notes.clone());
        }

        if let Some(guidance) = input.section.guidance() {
            parts.push(String::new());
            parts.push("## Section-Specific Guidelines".to_string());
            parts.push(guidance.to_string());
        }

        parts.push(String::new());
        parts.push("## Style Requirements".to_string());
        parts.push(format!("- Formality level: {}", level_label(input.formality)));
        parts.push(format!(
            "- Technical depth: {}",
            level_label(input.technical_depth)
        ));
        parts.push(format!("- Target length: ~{} words", input.max_words));
        parts.push(String::new());
        parts.push("## Instructions".to_string());
        parts.push(
            "Write a draft for this section. Use the context provided but don't \
             fabricate specific data."
                .to_string(),
        );
        parts.push(
            "Mark any areas where the researcher needs to add specific information \
             with [TODO: ...]."
                .to_string(),
        );
        parts.push("Focus on clarity and scientific rigor.".to_string());

        parts.join("\n")
    }
}

impl Default for WritingAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn level_label(value: f64) -> &'static str {
    if value > 0.7 {
        "High"
    } else if value > 0.4 {
        "Medium"
    } else {
        "Low"
    }
}

#[async_trait]
impl Agent for WritingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Writing
    }

    fn system_prompt(&self) -> String {
        "You are an expert NIH grant writing assistant with extensive experience \
         in biomedical research and successful grant applications. You help \
         researchers draft compelling, scientifically rigorous grant sections.\n\
         \n\
         Your writing should be:\n\
         - Clear and accessible to non-specialists on the review panel\n\
         - Scientifically precise and mechanistic\n\
         - Well-structured with clear transitions\n\
         - Free of unnecessary jargon\n\
         - Persuasive without being hyperbolic\n\
         \n\
         Always ground your writing in the provided context and research \
         materials. If you don't have enough information for a specific detail, \
         note what the researcher should add rather than making up information."
            .to_string()
    }

    async fn execute(&self, ctx: &TaskCtx, input: serde_json::Value) -> Result<ExecuteOutcome> {
        let input: WritingInput = serde_json::from_value(input)
            .map_err(|e| Error::InvalidInput(format!("bad writing input: {e}")))?;

        ctx.status_event(Some(&format!("Starting {} draft", input.section)));

        // Step 1: retrieve relevant context
        ctx.progress(
            "retrieving_context",
            0,
            Some(TOTAL_STEPS),
            Some("Searching your documents..."),
        );
        let context = self.retrieve_context(ctx, &input).await;
        ctx.complete_item("context_retrieved");

        if ctx.gate().await? == StepGate::Cancelled {
            return Ok(ExecuteOutcome::Cancelled);
        }

        // Step 2: build the prompt
        ctx.progress(
            "building_prompt",
            1,
            Some(TOTAL_STEPS),
            Some("Preparing writing instructions..."),
        );
        let prompt = self.build_prompt(&input, &context);
        ctx.complete_item("prompt_built");

        if ctx.gate().await? == StepGate::Cancelled {
            return Ok(ExecuteOutcome::Cancelled);
        }

        // Step 3: generate the draft
        ctx.progress(
            "generating_draft",
            2,
            Some(TOTAL_STEPS),
            Some("Writing section content..."),
        );
        // Rough token estimate from the word target.
        let max_tokens = u64::from(input.max_words) * 2;
        let draft = ctx
            .generate(&self.system_prompt(), &prompt, max_tokens)
            .await?;
        ctx.merge_interim("output", serde_json::Value::String(draft.clone()));
        ctx.complete_item("draft_generated");

        if ctx.gate().await? == StepGate::Cancelled {
            return Ok(ExecuteOutcome::Cancelled);
        }

        // Step 4: format the output
        ctx.progress("formatting", 3, Some(TOTAL_STEPS), Some("Finalizing draft..."));
        let output = draft.trim().to_string();
        let mut sections = BTreeMap::new();
        sections.insert(input.section.as_str().to_string(), output.clone());

        Ok(ExecuteOutcome::Completed { output, sections })
    }
}
