use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fc_cli::commands::{audit, clock, history, ingest, monitor, region, status};
use fc_cli::{Cli, Commands, Config};
use fc_engine::Engine;

async fn dispatch<W: Write>(
    writer: &mut W,
    command: &Commands,
    engine: &Engine,
    config: &Config,
) -> Result<()> {
    match command {
        Commands::Region(action) => region::run(writer, engine, action).await,
        Commands::ClockIn { region, at } => {
            clock::clock_in(writer, engine, region, at.as_deref()).await
        }
        Commands::ClockOut { at } => clock::clock_out(writer, engine, at.as_deref()).await,
        Commands::Status => status::run(writer, engine).await,
        Commands::History { limit, json } => history::run(writer, engine, *limit, *json).await,
        Commands::Audit { limit, json } => audit::run(writer, engine, *limit, *json).await,
        Commands::Ingest {
            lat,
            lon,
            accuracy,
            at,
            json,
        } => {
            let sample = ingest::sample_from_args(*lat, *lon, *accuracy, at.as_deref())?;
            ingest::run(writer, engine, config.data_dir(), &sample, *json).await
        }
        Commands::Monitor => {
            let stdin = std::io::BufReader::new(std::io::stdin());
            monitor::run(stdin, writer, engine).await
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let engine = fc_cli::commands::open_engine(&config)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let mut stdout = std::io::stdout().lock();
    runtime.block_on(async {
        let result = dispatch(&mut stdout, command, &engine, &config).await;
        // Alerts are fire-and-forget inside the engine; let them finish
        // before the runtime shuts down.
        engine.flush_alerts().await;
        result
    })
}
