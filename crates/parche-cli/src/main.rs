//! parche CLI - command-line interface for the parche patch-graph engine.

mod commands;
mod settings;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parche")]
#[command(author, version, about = "Patch-graph audio engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a patch on an audio device
    Play(commands::play::PlayArgs),

    /// Render a patch to a WAV file
    Render(commands::render::RenderArgs),

    /// Parse and compile a patch without running it
    Check(commands::check::CheckArgs),

    /// List audio devices
    Devices(commands::devices::DevicesArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play(args) => commands::play::run(args),
        Commands::Render(args) => commands::render::run(args),
        Commands::Check(args) => commands::check::run(args),
        Commands::Devices(args) => commands::devices::run(args),
    }
}
