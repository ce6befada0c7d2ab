//! Switchboard CLI entry point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard::adapters::{CliChannel, ConsoleObserver};
use switchboard::agent::Orchestrator;
use switchboard::ui;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Chat with a language model that can call your tool providers")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "warn,switchboard=debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = switchboard::config::load(&cli.config)
        .with_context(|| format!("could not load {}", cli.config.display()))?;

    ui::print_step(&format!("Connecting to {} tool provider(s)...", config.providers.len()));
    let (orchestrator, diagnostics) = Orchestrator::start(&config).await?;

    for connection in orchestrator.connections() {
        ui::print_success(&format!(
            "{} ({} tools)",
            connection.identity(),
            connection.list_tools().len()
        ));
    }
    for diagnostic in &diagnostics {
        ui::print_warning(&diagnostic.to_string());
    }

    if orchestrator.connections().is_empty() {
        bail!("no tool provider could be reached");
    }

    ui::print_header(
        orchestrator.model(),
        &config.model.provider.to_string(),
        orchestrator.registry().len(),
    );

    let mut channel = CliChannel::new(orchestrator.with_observer(ConsoleObserver));
    channel.run_interactive().await?;
    Ok(())
}
