//! `devflow` command-line tools.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devflow::config::{LoggingConfig, WorkflowConfig};
use devflow::iteration_log::{IterationLog, IterationRecord};
use std::path::{Path, PathBuf};

mod render;

const DEFAULT_LOG_FILE: &str = "workspace/reports/iteration_log.jsonl";

#[derive(Parser)]
#[command(name = "devflow")]
#[command(version, about = "Inspect devflow workspaces and configuration")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// View the verify/fix iteration log
    Log {
        /// Path to the log file
        #[arg(long, default_value = DEFAULT_LOG_FILE)]
        log_file: PathBuf,

        /// Show only the latest iteration
        #[arg(long, conflicts_with = "iteration")]
        latest: bool,

        /// Show a specific iteration number
        #[arg(long)]
        iteration: Option<u32>,

        /// Include raw test output
        #[arg(long)]
        full: bool,
    },
    /// Load, validate and print the resolved configuration
    Config {
        /// Path to a YAML config file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Which records `devflow log` shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Summary,
    Latest,
    Iteration(u32),
}

impl Selection {
    fn from_flags(latest: bool, iteration: Option<u32>) -> Self {
        match (latest, iteration) {
            (true, _) => Self::Latest,
            (false, Some(n)) => Self::Iteration(n),
            (false, None) => Self::Summary,
        }
    }
}

/// Renders the `log` view for records already read from `path`.
fn render_log(path: &Path, records: &[IterationRecord], selection: Selection, full: bool) -> String {
    if records.is_empty() {
        return "No iteration logs found\n".to_string();
    }

    let mut out = render::header(path, records.len());
    match selection {
        Selection::Summary => out.push_str(&render::summary(records)),
        Selection::Latest => {
            if let Some(record) = records.last() {
                out.push_str(&render::detail(record, full));
            }
        }
        Selection::Iteration(n) => match records.iter().rev().find(|r| r.iteration == n) {
            Some(record) => out.push_str(&render::detail(record, full)),
            None => out.push_str(&format!("\nIteration {n} not found\n")),
        },
    }
    out
}

async fn show_log(path: &Path, selection: Selection, full: bool) -> Result<()> {
    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?;
    if !exists {
        println!("Log file not found: {}", path.display());
        return Ok(());
    }

    let records = IterationLog::new(path)
        .read_all()
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(path = %path.display(), records = records.len(), "Loaded iteration log");

    print!("{}", render_log(path, &records, selection, full));
    Ok(())
}

fn show_config(path: Option<&Path>) -> Result<WorkflowConfig> {
    let config = match path {
        Some(path) => WorkflowConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkflowConfig::default(),
    };
    config.validate().context("validating configuration")?;
    print!("{}", config.to_yaml()?);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: if cli.verbose { "debug" } else { "warn" }.to_string(),
        ..LoggingConfig::default()
    };
    devflow::telemetry::init_tracing(&logging)?;

    match cli.command {
        Commands::Log {
            log_file,
            latest,
            iteration,
            full,
        } => show_log(&log_file, Selection::from_flags(latest, iteration), full).await,
        Commands::Config { config } => show_config(config.as_deref()).map(|_| ()),
    }
}
