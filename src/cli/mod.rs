//! Command-line interface definitions and dispatch.

pub mod ask;
pub mod cache;
pub mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crewclause::cache::{create_cache, CacheHandle};
use crewclause::config::Config;
use crewclause::providers::OpenAiProvider;
use crewclause::ContractAssistant;

#[derive(Parser, Debug)]
#[command(name = "crewclause")]
#[command(version)]
#[command(about = "Cached, retrying chat backend for a union-contract assistant")]
pub struct Cli {
    /// Config file (defaults to ~/.crewclause/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask a single question and print the answer
    Ask {
        /// The question
        query: String,
        /// Context pair such as `airline=acme` (repeatable)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
    /// Inspect the answer cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry and hit counts
    Stats,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `--log-format` wins, then `CREWCLAUSE_LOG_FORMAT`, then text.
    fn resolve(flag: Option<LogFormat>) -> LogFormat {
        if let Some(format) = flag {
            return format;
        }
        match std::env::var("CREWCLAUSE_LOG_FORMAT") {
            Ok(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

/// Wire the upstream provider and the configured cache into an assistant.
///
/// The returned handle must be shut down so pending cache writes land.
pub(crate) fn build_assistant(config: &Config) -> Result<(ContractAssistant, Option<CacheHandle>)> {
    let provider =
        OpenAiProvider::from_config(&config.provider).context("Failed to create provider")?;
    let handle = create_cache(config);
    let cache = handle.as_ref().map(|h| h.cache.clone());
    let assistant = ContractAssistant::from_config(config, Arc::new(provider), cache);
    Ok((assistant, handle))
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(LogFormat::resolve(cli.log_format));

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { bind, port } => serve::cmd_serve(config, bind, port).await,
        Commands::Ask { query, context } => ask::cmd_ask(config, query, context).await,
        Commands::Cache { action } => cache::cmd_cache(config, action).await,
    }
}
