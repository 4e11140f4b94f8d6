//! WebSocket coordination server for the Apologies game.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use apologies_server::config::ServerConfig;
use apologies_server::server;

/// Start the Apologies server and let it run until signalled.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to configuration on disk (JSON); defaults apply if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to logfile on disk (default is stdout)
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Override a config parameter as "param:value" (repeatable)
    #[arg(long = "override", value_name = "PARAM:VALUE")]
    overrides: Vec<String>,

    /// Decrease log verbosity from INFO to ERROR
    #[arg(long)]
    quiet: bool,

    /// Increase log verbosity from INFO to DEBUG
    #[arg(long)]
    verbose: bool,
}

fn setup_logging(args: &Args, config: &ServerConfig) -> anyhow::Result<()> {
    let level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let logfile = args
        .logfile
        .clone()
        .or_else(|| config.logfile_path.as_ref().map(PathBuf::from));
    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open logfile: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref(), &args.overrides)?;
    setup_logging(&args, &config)?;
    info!("Apologies server started");
    info!(
        "configuration: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );
    server::run(config).await?;
    info!("Apologies server finished");
    Ok(())
}
