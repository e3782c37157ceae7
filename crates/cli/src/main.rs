use clap::Parser;
use tracing_subscriber::EnvFilter;
use umbra_cli::commands::{Cmd, Command};

/// umbra CLI
///
/// umbra is a managed-module protector that renames identifiers, encrypts
/// string literals, flattens control flow into dispatched state machines,
/// and injects anti-debug and tamper probes.
#[derive(Parser)]
#[command(name = "umbra")]
#[command(about = "umbra: managed module protector")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

/// Runs the umbra CLI with the provided arguments.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .without_time()
        .init();

    let cli = Cli::parse();
    cli.command.execute()
}
