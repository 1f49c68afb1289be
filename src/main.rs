//! Retrograde CLI
//!
//! Renders direction-reversible playback of WAV files.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use retrograde::cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Retrograde v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Retrograde v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Render(args) => commands::render(&args),
        Commands::Reverse {
            input,
            output,
            bit_depth,
        } => commands::reverse(&input, &output, bit_depth),
        Commands::Info { input } => commands::info(&input),
    }
}
