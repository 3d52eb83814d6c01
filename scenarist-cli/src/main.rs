//! Scenarist CLI: ingest requirement documents and generate grounded test
//! scenarios from them.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Scenarist: test scenarios grounded in your own documents
#[derive(Parser, Debug)]
#[command(name = "scenarist", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ingest documents into a task's vector namespace
    Ingest {
        /// Task to ingest into (shared namespace if omitted)
        #[arg(long)]
        task: Option<u64>,
        /// Description used for image files
        #[arg(long)]
        caption: Option<String>,
        /// Files to ingest (.pdf, .docx, .txt, .png, .jpg, .jpeg)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Search a namespace and show the diversified top hits
    Search {
        #[arg(long)]
        task: Option<u64>,
        /// Query text
        query: String,
        /// Number of results
        #[arg(short, default_value = "5")]
        k: usize,
    },
    /// Generate a test scenario for a task
    Generate {
        #[arg(long)]
        task: u64,
        /// Scenario name stored in history
        #[arg(long)]
        name: String,
        /// Test criteria
        criteria: String,
    },
    /// Browse or clear saved scenarios
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show or change prompt settings
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum HistoryAction {
    /// List saved scenarios, newest first
    List,
    /// Print one saved scenario
    Show { id: u64 },
    /// Delete one task's scenario, document links and vector storage
    Delete { id: u64 },
    /// Delete every saved scenario and its vector storage
    Clear,
}

#[derive(clap::Subcommand, Debug)]
enum PromptAction {
    /// Print current prompt settings
    Show,
    /// Replace the system prompt
    SetSystem { text: String },
    /// Replace the scenario prompt (use {context} and {criteria} placeholders)
    SetScenario { text: String },
    /// Set the maximum number of output tokens
    SetMaxTokens { n: usize },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default workspace configuration file
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "scenarist", "scenarist")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "scenarist.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
