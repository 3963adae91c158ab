mod cli;
mod commands;

use clap::Parser as ClapParser;
use cli::Cli;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use upstack::{Error as UpstackError, Orchestrator, Parser as ConfigParser};

/// Candidate config files tried in order when --config is not given.
const DEFAULT_CONFIG_FILES: [&str; 3] = ["upstack.json", "upstack.yaml", "upstack.yml"];

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(upstack_error) = e.downcast_ref::<UpstackError>() {
            eprintln!("Error: {}", upstack_error);
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = resolve_config_path(cli.config)?;
    let config = ConfigParser::new().load(&config_path)?;
    let orchestrator = Orchestrator::new(config)?;

    let mut should_quit = false;
    if let Some(line) = &cli.input {
        should_quit = commands::process_line(&orchestrator, line).await;
    } else {
        commands::print_help();
    }

    if !should_quit {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if commands::process_line(&orchestrator, &line).await {
                break;
            }
        }
    }

    orchestrator.shutdown_all().await;
    Ok(())
}

fn resolve_config_path(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    for candidate in DEFAULT_CONFIG_FILES {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }
    anyhow::bail!(
        "no config file found; looked for {}. Pass one with --config",
        DEFAULT_CONFIG_FILES.join(", ")
    )
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
