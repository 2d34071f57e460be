//! Memloop CLI, the main entry point.
//!
//! Commands:
//! - `run`     Drive a task to completion in a named context
//! - `search`  Query one log of a context by similarity
//! - `forget`  Delete everything stored for a context
//! - `config`  Show, locate, or validate configuration

use clap::{Parser, Subcommand};

mod commands;

use commands::search::LogArg;

#[derive(Parser)]
#[command(
    name = "memloop",
    about = "Memloop: bounded-context agent memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task until it calls `finish`
    Run {
        /// Context to run in; resumed if it already exists
        context: String,

        /// Goal to add before running
        #[arg(short, long)]
        goal: Option<String>,

        /// Override the configured iteration limit
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Search a context's log
    Search {
        context: String,

        query: String,

        /// Which log to search
        #[arg(short, long, value_enum, default_value = "temporary")]
        log: LogArg,

        /// Maximum results (0 = all)
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,

        /// Drop hits whose text repeats a better hit
        #[arg(short, long)]
        unique: bool,
    },

    /// Delete a context's logs, collections and variables
    Forget { context: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Print a default configuration file
    Defaults,
    /// Check the configuration for errors
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            context,
            goal,
            max_iterations,
        } => commands::run::run(&context, goal, max_iterations).await?,
        Commands::Search {
            context,
            query,
            log,
            limit,
            unique,
        } => commands::search::run(&context, &query, log, limit, unique).await?,
        Commands::Forget { context } => commands::forget::run(&context).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Defaults => commands::config_cmd::defaults().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
