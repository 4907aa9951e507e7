//! Telepivot CLI
//!
//! Runs configured transformation pipelines over decoded telemetry.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Telepivot - pivot and reshape model-driven telemetry
#[derive(Parser)]
#[command(name = "telepivot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file or project directory
    #[arg(short, long, env = "TELEPIVOT_CONFIG", default_value = "telepivot.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new telepivot project
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Pivot and transform every input message
    Run {
        /// Number of worker tasks (overrides runtime.workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Validate configuration without running
    Validate,

    /// Print the normalized transformation pipeline
    Dump {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = DumpFormat::Yaml)]
        format: DumpFormat,
    },
}

/// Output format of `dump`
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DumpFormat {
    /// YAML document
    Yaml,
    /// Pretty-printed JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
        Commands::Run { workers } => {
            commands::run::run(&cli.config, workers).await?;
        }
        Commands::Validate => {
            commands::validate::run(&cli.config).await?;
        }
        Commands::Dump { format } => {
            commands::dump::run(&cli.config, format).await?;
        }
    }

    Ok(())
}
