//! draftsmith CLI — run the realtime gateway or a one-shot draft task.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use draftsmith::api::{self, CreateTaskRequest};
use draftsmith::config::Config;
use draftsmith::event::EventKind;
use draftsmith::llm::AnthropicGenerator;
use draftsmith::model::AgentKind;
use draftsmith::realtime::{server, Hub};
use draftsmith::registry::TaskRegistry;
use draftsmith::search::NoSearch;
use draftsmith::telemetry::{init_telemetry, TelemetryConfig};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "draftsmith", about = "Agent task engine with real-time progress fan-out")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the realtime gateway daemon
    Serve {
        /// Bind address, overriding DRAFTSMITH_BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one writing task locally, printing its events
    Draft {
        /// Grant section to draft (e.g. specific_aims, significance)
        section: String,
        /// Project title used for context and prompts
        project_title: String,
        /// Project description
        #[arg(long)]
        description: Option<String>,
        /// Extra notes for the researcher's draft
        #[arg(long)]
        notes: Option<String>,
        /// Model override
        #[arg(long)]
        model: Option<String>,
        /// Target draft length in words
        #[arg(long, default_value_t = 500)]
        max_words: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => cmd_serve(bind).await,
        Command::Draft {
            section,
            project_title,
            description,
            notes,
            model,
            max_words,
        } => cmd_draft(section, project_title, description, notes, model, max_words).await,
    }
}

async fn cmd_serve(bind: Option<String>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        ..TelemetryConfig::default()
    })?;

    let hub = Hub::new(config.tuning.observer_queue_capacity);
    let addr = bind.unwrap_or_else(|| config.bind_addr.clone());

    let gateway = server::serve(Arc::clone(&hub), config.tuning.clone(), &addr);
    tokio::select! {
        result = gateway => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("shutting down");
        }
    }
    Ok(())
}

async fn cmd_draft(
    section: String,
    project_title: String,
    description: Option<String>,
    notes: Option<String>,
    model: Option<String>,
    max_words: u32,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        ..TelemetryConfig::default()
    })?;

    let hub = Hub::new(config.tuning.observer_queue_capacity);
    let generator = Arc::new(AnthropicGenerator::new(&config.anthropic_api_key)?);
    let registry = TaskRegistry::new(Arc::clone(&hub), generator, Arc::new(NoSearch));

    // Watch our own task the way a remote observer would.
    let (observer_id, mut events) = hub.connect(None);
    hub.subscribe(observer_id, &EventKind::ALL);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Ok(json) = serde_json::to_string(event.as_ref()) {
                println!("{json}");
            }
        }
    });

    let request = CreateTaskRequest {
        agent_kind: AgentKind::Writing,
        input: serde_json::json!({
            "section": section,
            "project_id": Uuid::new_v4(),
            "project_title": project_title,
            "project_description": description,
            "user_notes": notes,
            "max_words": max_words,
        }),
        project_id: None,
        model,
        temperature: None,
        max_tokens: None,
        max_cost_usd: None,
        time_limit_secs: None,
        depth_level: None,
        parent_task_id: None,
    };

    let created = api::create_task(&registry, &config.tuning, &request)?;
    registry.join(created.task_id).await?;

    let status = api::task_status(&registry, created.task_id)?;
    hub.disconnect(observer_id);
    let _ = printer.await;

    println!("---");
    println!("Task:    {}", status.task_id);
    println!("Status:  {}", status.status);
    println!("Tokens:  {}", status.tokens_used);
    println!("Cost:    ${:.4}", status.cost_usd);
    if let Some(ref error) = status.error_message {
        println!("Error:   {error}");
    }
    if let Some(ref output) = status.output {
        println!("---\n{output}");
    }

    Ok(())
}
