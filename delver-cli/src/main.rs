//! Delver CLI: run a deep research pipeline from the terminal.
//!
//! Wires the real collaborators (OpenAI-compatible model backend,
//! DuckDuckGo search provider) into the core pipeline, prints progress as
//! directives resolve, and renders the final report as Markdown.

use anyhow::Context;
use clap::Parser;
use delver_core::{
    DelverConfig, DelverError, DirectiveOutcome, DuckDuckGoProvider, OpenAiCompatibleBackend,
    PipelineObserver, Report, ResearchPipeline, ResultCache, SearchGateway, SearchPlan,
    SearchThrottle,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use uuid::Uuid;

/// Delver: automated multi-stage research from your terminal
#[derive(Parser, Debug)]
#[command(name = "delver", version, about, long_about = None)]
struct Cli {
    /// Research topic
    topic: String,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Cache directory (overrides config)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Maximum concurrent searches (overrides config)
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

/// Prints stage and per-directive progress to stderr.
struct ProgressPrinter {
    quiet: bool,
    total: AtomicUsize,
    resolved: AtomicUsize,
}

impl ProgressPrinter {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            total: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
        }
    }
}

impl PipelineObserver for ProgressPrinter {
    fn on_plan_ready(&self, plan: &SearchPlan) {
        self.total.store(plan.len(), Ordering::SeqCst);
        if self.quiet {
            return;
        }
        eprintln!("Plan ready: {} searches", plan.len());
        for directive in &plan.directives {
            eprintln!("  [{}] {}", directive.intent, directive.query_text);
        }
    }

    fn on_directive_resolved(&self, _id: Uuid, outcome: &DirectiveOutcome) {
        let done = self.resolved.fetch_add(1, Ordering::SeqCst) + 1;
        if self.quiet {
            return;
        }
        let total = self.total.load(Ordering::SeqCst);
        match outcome {
            DirectiveOutcome::Resolved { results } => {
                eprintln!("  [{done}/{total}] ok ({results} results)");
            }
            DirectiveOutcome::Failed { failure } => {
                eprintln!("  [{done}/{total}] FAILED: {failure}");
            }
        }
    }

    fn on_report_ready(&self, report: &Report) {
        if self.quiet {
            return;
        }
        eprintln!(
            "Report synthesized: {} sections, {} citations, confidence {:.0}%",
            report.sections.len(),
            report.citations.len(),
            report.confidence_score * 100.0
        );
    }
}

fn init_logging(verbose: u8, quiet: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = if quiet {
        "delver=error".to_string()
    } else {
        match verbose {
            0 => "delver=warn".to_string(),
            1 => "delver=debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging.
    let log_dir = directories::ProjectDirs::from("dev", "delver", "delver")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delver.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    guard
}

/// Name the stage a fatal error came from, for the exit message.
fn failed_stage(err: &DelverError) -> &'static str {
    match err {
        DelverError::Planning(_) => "planning",
        DelverError::InsufficientCoverage { .. } => "search execution",
        DelverError::Synthesis(_) => "synthesis",
        DelverError::Cancelled => "cancelled",
        _ => "pipeline",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.quiet);
    tracing::info!(topic = %cli.topic, "Starting research run");

    let workspace = std::env::current_dir().ok();
    let mut config: DelverConfig =
        delver_core::load_config(workspace.as_deref(), None)
            .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    if let Some(model) = cli.model {
        config.backend.model = model;
    }
    if let Some(cache_dir) = cli.cache_dir {
        config.cache.dir = Some(cache_dir);
    }
    if let Some(max_in_flight) = cli.max_in_flight {
        config.executor.max_in_flight = max_in_flight;
    }

    let cache = ResultCache::open(config.cache.resolve_dir())
        .context("failed to open result cache")?;
    let provider = DuckDuckGoProvider::new(config.search.timeout_secs)
        .context("failed to build search client")?;
    let throttle = Arc::new(SearchThrottle::new(Duration::from_millis(
        config.search.min_spacing_ms,
    )));
    let gateway = Arc::new(SearchGateway::new(
        Arc::new(provider),
        cache,
        throttle,
        config.retry.clone(),
        config.search.max_results,
    ));
    let backend = Arc::new(
        OpenAiCompatibleBackend::new(&config.backend)
            .context("failed to initialize model backend")?,
    );

    let observer = Arc::new(ProgressPrinter::new(cli.quiet));
    let pipeline =
        ResearchPipeline::new(backend, gateway, &config).with_observer(observer.clone());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            ctrl_c_cancel.cancel();
        }
    });

    if !cli.quiet {
        eprintln!("Researching: {}", cli.topic);
    }

    let run = match pipeline.run(&cli.topic, cancel).await {
        Ok(run) => run,
        Err(err @ DelverError::Cancelled) => {
            return Err(anyhow::anyhow!(err)).context("research run cancelled");
        }
        Err(err) => {
            let stage = failed_stage(&err);
            return Err(anyhow::anyhow!(err)).context(format!("research failed during {stage}"));
        }
    };

    let markdown = run.report.to_markdown();
    match cli.output {
        Some(path) => {
            std::fs::write(&path, &markdown)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            if !cli.quiet {
                eprintln!("Report written to {}", path.display());
            }
        }
        None => println!("{markdown}"),
    }

    if !cli.quiet {
        eprintln!(
            "Done in {:.1}s: {} model calls, {} searches, ~${:.4}",
            run.duration.as_secs_f64(),
            run.costs.model_calls,
            run.costs.search_calls,
            run.costs.estimated_usd
        );
    }

    Ok(())
}
