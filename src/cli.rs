use crate::backend::HttpSearchBackend;
use crate::cache::CacheStore;
use crate::events::EventBus;
use crate::model::{SearchConfig, SearchOptions, SearchType, TaskEvent, TaskStatus};
use crate::orchestrator::{HistoryLoader, SearchOrchestrator};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "paper-search-cli",
    version,
    about = "Submit a search to the async paper search service and wait for results"
)]
pub struct Cli {
    /// Query keyword to search for
    pub keyword: Option<String>,

    /// Base URL of the search service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Search mode: keyword, vector, or hybrid
    #[arg(long, default_value = "hybrid")]
    pub search_type: SearchType,

    /// Maximum number of results to request
    #[arg(long, default_value_t = 30)]
    pub max_results: u32,

    /// Enable LLM relevance evaluation on the backend
    #[arg(long)]
    pub enable_llm: bool,

    /// Print the finished task as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Number of history entries to load at startup
    #[arg(long, default_value_t = 20)]
    pub history_limit: usize,

    /// Show loaded history entries before searching
    #[arg(long)]
    pub show_history: bool,

    /// Polling interval for the in-flight search
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Maximum polling attempts before the task is forced to complete
    #[arg(long, default_value_t = 60)]
    pub max_poll_attempts: u32,

    /// Delay applied after results materialize, before completion
    #[arg(long, default_value = "1s")]
    pub settle_delay: humantime::Duration,

    /// HTTP request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// Clear the local result cache and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Print backend cache statistics and exit
    #[arg(long)]
    pub cache_stats: bool,
}

/// Build a `SearchConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SearchConfig {
    SearchConfig {
        base_url: args.base_url.clone(),
        page: 1,
        page_size: args.max_results,
        enable_llm: args.enable_llm,
        poll_interval: Duration::from(args.poll_interval),
        max_poll_attempts: args.max_poll_attempts,
        settle_delay: Duration::from(args.settle_delay),
        request_timeout_ms: args.request_timeout_ms,
        user_agent: format!("paper-search-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let backend = Arc::new(HttpSearchBackend::new(&cfg).context("build HTTP client")?);
    let cache = Arc::new(CacheStore::open().context("open local result cache")?);

    if args.clear_cache {
        cache.clear_all()?;
        println!("Local result cache cleared.");
        return Ok(());
    }

    let events = EventBus::new();
    let orchestrator =
        SearchOrchestrator::new(backend.clone(), cache, events.clone(), cfg);

    if args.cache_stats {
        let stats = orchestrator.backend_cache_stats().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if !orchestrator.is_backend_healthy().await {
        eprintln!("Warning: backend at {} is not reachable", args.base_url);
    }

    // Seed prior searches; results stay empty until a task is selected.
    let history = HistoryLoader::new(backend).load(args.history_limit).await;
    orchestrator.adopt_tasks(history);
    if args.show_history {
        for task in orchestrator.tasks() {
            eprintln!(
                "history: {:>13}  {:28}  {} results",
                task.id,
                task.keyword,
                task.total_results.unwrap_or(0)
            );
        }
        if args.keyword.is_none() {
            return Ok(());
        }
    }

    let keyword = args
        .keyword
        .as_deref()
        .context("a query keyword is required (see --help)")?;
    let mut rx = events.subscribe();
    let task = orchestrator.create_task(
        keyword,
        SearchOptions {
            search_type: args.search_type,
            max_results: args.max_results,
        },
    )?;

    wait_for_completion(&mut rx, task.id).await;

    let finished = orchestrator
        .task(task.id)
        .context("task disappeared from the orchestrator")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        for line in crate::text_summary::build_text_summary(&finished).lines {
            println!("{line}");
        }
    }
    Ok(())
}

/// Consume events, echoing status transitions, until the task completes.
async fn wait_for_completion(rx: &mut broadcast::Receiver<TaskEvent>, task_id: u64) {
    loop {
        match rx.recv().await {
            Ok(TaskEvent::StatusUpdate {
                task_id: id,
                status,
            }) if id == task_id => {
                eprintln!("== {status:?} ==");
                if status == TaskStatus::Completed {
                    return;
                }
            }
            Ok(_) => {}
            // Dropping events under lag is acceptable here; the final state
            // is read back from the orchestrator, not from the stream.
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
