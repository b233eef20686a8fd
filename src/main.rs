use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pagecraft_core::config::AppConfig;
use pagecraft_core::event::EventBus;
use pagecraft_core::types::RunId;
use pagecraft_engine::graph::{Graph, GraphEngine, RunOptions, TerminalResult};
use pagecraft_engine::RunLogger;
use pagecraft_steps::{content_pipeline, keys};

#[derive(Parser)]
#[command(name = "pagecraft", version, about = "Cyclic content pipeline with a bounded review loop")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pagecraft.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate pages for one product record
    Run {
        /// Product JSON file
        #[arg(short, long)]
        input: PathBuf,
        /// Tone of voice for generated copy
        #[arg(long)]
        tone: Option<String>,
        /// Back-edge budget of the review loop
        #[arg(long)]
        max_loops: Option<u32>,
        /// Global deadline in seconds (0 = none)
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Directory for the generated pages and run report
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Print the validated pipeline graph
    Graph,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pagecraft=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pagecraft", &mut std::io::stdout());
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Graph => {
            let graph = content_pipeline(&load_config(&cli.config)?)?;
            print_graph(&graph);
        }
        Commands::Run {
            input,
            tone,
            max_loops,
            timeout_secs,
            out_dir,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(tone) = tone {
                config.pipeline.tone = tone;
            }
            if let Some(n) = max_loops {
                config.pipeline.max_loops = n;
            }
            if let Some(secs) = timeout_secs {
                config.pipeline.timeout_secs = secs;
            }
            if let Some(dir) = out_dir {
                config.pipeline.output_dir = dir.display().to_string();
            }
            run_pipeline(&config, &input).await?;
        }
    }

    Ok(())
}

/// A missing config file means built-in defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        Ok(AppConfig::load(path)?)
    } else {
        info!(path = %path.display(), "No config file found, using defaults");
        Ok(AppConfig::default())
    }
}

async fn run_pipeline(config: &AppConfig, input_path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(input_path)
        .await
        .with_context(|| format!("reading {}", input_path.display()))?;
    let input: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", input_path.display()))?;

    let graph = content_pipeline(config)?;
    let event_bus = Arc::new(EventBus::default());
    let engine = GraphEngine::new(graph).with_events(event_bus.clone());
    let run_id = RunId::new();

    // Spawn RunLogger if logging is enabled. Subscribe before the run starts.
    let cancel = CancellationToken::new();
    let logger = config.log_dir().map(|log_dir| {
        let level = config.log.as_ref().map(|l| l.level).unwrap_or(2);
        let logger = RunLogger::new(log_dir, level);
        tokio::spawn(logger.run(event_bus.subscribe(), run_id.clone(), cancel.clone()))
    });

    let options = RunOptions {
        run_id: Some(run_id.clone()),
        ..Default::default()
    };
    let result = engine.run(input, options).await;

    let log_path = match logger {
        Some(handle) => {
            // The logger stops on RunFinished; the timeout only guards a lost event.
            let path = tokio::time::timeout(Duration::from_secs(5), handle).await;
            cancel.cancel();
            path.ok().and_then(|joined| joined.ok()).flatten()
        }
        None => None,
    };

    let out_dir = config.output_dir();
    let written = write_outputs(&out_dir, &result).await?;
    print_summary(&run_id, &result, &written, log_path.as_deref());

    if let TerminalResult::Aborted { step, .. } = &result {
        anyhow::bail!("run {} aborted at step '{}'", run_id, step);
    }
    Ok(())
}

/// Write every present page artifact plus `run_report.json`. Returns the
/// paths written.
async fn write_outputs(out_dir: &Path, result: &TerminalResult) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut written = Vec::new();
    for key in keys::PAGES {
        if let Some(page) = result.state().artifact(key) {
            let path = out_dir.join(format!("{}.json", key));
            tokio::fs::write(&path, serde_json::to_string_pretty(page)?).await?;
            written.push(path);
        }
    }

    let report = out_dir.join("run_report.json");
    tokio::fs::write(&report, serde_json::to_string_pretty(result)?).await?;
    written.push(report);
    Ok(written)
}

fn print_summary(
    run_id: &RunId,
    result: &TerminalResult,
    written: &[PathBuf],
    log_path: Option<&Path>,
) {
    let state = result.state();
    println!("Run {}: {}", run_id, result.outcome_name());
    println!(
        "  loops: {}/{}  transitions: {}  errors: {}",
        state.loop_count(),
        state.max_loops(),
        state.transitions().len(),
        state.errors().len()
    );
    match result {
        TerminalResult::PartiallyFailed { reason, .. } => {
            warn!(?reason, "Run ended partially failed");
            println!("  reason: {:?}", reason);
        }
        TerminalResult::Aborted { step, .. } => println!("  aborted at: {}", step),
        TerminalResult::Completed { .. } => {}
    }
    if let Some(feedback) = state.feedback() {
        println!("  open critiques:");
        for critique in &feedback.critiques {
            println!("    - {}: {}", critique.artifact, critique.message);
        }
    }
    for path in written {
        println!("  wrote {}", path.display());
    }
    if let Some(path) = log_path {
        println!("  log {}", path.display());
    }
}

fn print_graph(graph: &Graph) {
    println!("Pipeline (entry: {})", graph.entry());
    println!(
        "  max_loops: {}  max_transitions: {}  timeout: {}",
        graph.max_loops(),
        graph.max_transitions(),
        graph
            .timeout()
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".to_string())
    );
    println!();
    println!("{:<18} {:<9} {:<9} {:<34} WRITES", "NODE", "KIND", "ATTEMPTS", "READS");
    for node in graph.nodes() {
        let detail = if node.is_parallel() {
            format!("[{}]", node.members().join(", "))
        } else {
            node.reads().join(", ")
        };
        println!(
            "{:<18} {:<9} {:<9} {:<34} {}",
            node.name(),
            node.kind_label(),
            node.retry().max_attempts(),
            detail,
            node.writes().join(", ")
        );
        if let Some(entry) = node.retry_entry() {
            println!("{:<18} back-edge on reject -> {}", "", entry);
        }
    }
    println!();
    println!("{:<18} {:<14} {:<18} PRIORITY", "FROM", "WHEN", "TO");
    for edge in graph.edges() {
        println!(
            "{:<18} {:<14} {:<18} {}",
            edge.from,
            edge.condition.to_string(),
            edge.to.to_string(),
            edge.priority
        );
    }
}
