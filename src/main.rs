// src/main.rs - Command line host for the stepper board
use clap::Parser;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::BufReader;

use tbone_host::config::load_config;
use tbone_host::gcode::GCodeReader;
use tbone_host::motion::Axis;
use tbone_host::printer::Printer;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Drives a two-axis stepper board over its serial line.
#[derive(Parser, Debug)]
#[command(name = "tbone-host", version, about)]
struct Cli {
    /// Path to the printer TOML config
    config: String,

    /// G-code file to print after configuring (and homing)
    #[arg(long)]
    gcode: Option<PathBuf>,

    /// Axes to home before printing, e.g. --home x,y
    #[arg(long, value_delimiter = ',')]
    home: Vec<Axis>,

    /// More output; repeat for debug (-v) or trace (-vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .init();

    tracing::info!("Loading configuration from: {}", cli.config);
    let config = load_config(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config, e);
        e
    })?;

    let mut printer = Printer::connect(&config).await?;
    printer.configure(&config).await?;

    if !cli.home.is_empty() {
        printer.home(&cli.home).await?;
    }

    let Some(path) = cli.gcode else {
        tracing::info!("Nothing to print");
        return Ok(());
    };

    tracing::info!("Printing {}", path.display());
    let mut reader = GCodeReader::new(BufReader::new(File::open(&path).await?));
    printer.start_print().await?;
    while let Some(target) = reader.next_target().await? {
        printer.move_to(target).await?;
    }
    let executed = printer.stop_print().await?;
    tracing::info!(
        "Done: {} moves from {} lines, now at ({}, {})",
        executed,
        reader.line(),
        printer.position().x,
        printer.position().y
    );
    Ok(())
}
