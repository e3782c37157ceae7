use clap::Subcommand;
use std::error::Error;

pub mod inspect;
pub mod protect;

use thiserror::Error;

/// Errors that can occur while driving a protection run from the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// No input module was given by flag or positional argument.
    #[error("no input module specified; pass --input or a positional path")]
    MissingInput,
    /// The protection run reported failure.
    #[error("protection failed: {0}")]
    ProtectionFailed(String),
    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    /// Invalid seed value on the command line.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// CLI subcommands for umbra.
#[derive(Subcommand)]
pub enum Cmd {
    /// Protect a module: rename, encrypt strings, flatten control flow,
    /// inject runtime probes.
    Protect(protect::ProtectArgs),
    /// Load a module and print a structural summary.
    Inspect(inspect::InspectArgs),
}

/// Trait for executing CLI subcommands.
pub trait Command {
    /// Executes the subcommand.
    ///
    /// # Returns
    /// A `Result` indicating success or an error if execution fails.
    fn execute(self) -> Result<(), Box<dyn Error>>;
}

impl Command for Cmd {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Protect(args) => args.execute(),
            Cmd::Inspect(args) => args.execute(),
        }
    }
}
