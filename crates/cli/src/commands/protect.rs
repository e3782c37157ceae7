//! Module for the `protect` subcommand, which runs the full protection
//! pipeline over an input module and writes the transformed result.

use crate::commands::{CliError, Command};
use clap::Args;
use std::error::Error;
use std::path::PathBuf;
use umbra_core::Seed;
use umbra_passes::config::{Configuration, ProtectionLevel};
use umbra_passes::protector::Protector;

/// Arguments for the `protect` subcommand.
#[derive(Args)]
pub struct ProtectArgs {
    /// Input module path (positional form).
    pub input: Option<PathBuf>,
    /// Input module path.
    #[arg(short, long = "input", value_name = "PATH")]
    input_flag: Option<PathBuf>,
    /// Output module path. Defaults to the input with a `.protected` stem.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Configuration file (JSON, every field optional).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Protection level preset.
    #[arg(short, long, value_enum, default_value = "balanced")]
    level: Level,
    /// Seed for reproducible builds (64 hex chars, 0x prefix optional).
    #[arg(long)]
    seed: Option<String>,
    /// Emit a rename mapping file beside the output.
    #[arg(long)]
    mapping: bool,
    /// Disable identifier renaming.
    #[arg(long = "no-renaming")]
    no_renaming: bool,
    /// Disable string encryption.
    #[arg(long = "no-stringenc")]
    no_stringenc: bool,
    /// Disable control-flow flattening.
    #[arg(long = "no-controlflow")]
    no_controlflow: bool,
    /// Disable anti-debug and anti-tamper probes.
    #[arg(long = "no-antidebug")]
    no_antidebug: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Level {
    None,
    Minimal,
    Balanced,
    Aggressive,
}

impl From<Level> for ProtectionLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::None => ProtectionLevel::None,
            Level::Minimal => ProtectionLevel::Minimal,
            Level::Balanced => ProtectionLevel::Balanced,
            Level::Aggressive => ProtectionLevel::Aggressive,
        }
    }
}

impl Command for ProtectArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        // Flag wins over the positional form when both are present.
        let input = self
            .input_flag
            .clone()
            .or(self.input.clone())
            .ok_or(CliError::MissingInput)?;

        let mut config = match &self.config {
            Some(path) => Configuration::from_file(path)?,
            None => Configuration::from_level(self.level.into()),
        };

        if self.no_renaming {
            config.enable_renaming = false;
        }
        if self.no_stringenc {
            config.enable_string_encryption = false;
        }
        if self.no_controlflow {
            config.enable_control_flow = false;
        }
        if self.no_antidebug {
            config.enable_anti_debug = false;
            config.enable_anti_tamper = false;
        }
        if self.mapping {
            config.renaming.generate_mapping_file = true;
        }
        if let Some(seed) = &self.seed {
            config.seed =
                Some(Seed::from_hex(seed).map_err(|e| CliError::InvalidSeed(e.to_string()))?);
        }

        let output = match (&self.output, &config.output_path) {
            (Some(path), _) => path.clone(),
            (None, Some(path)) => path.clone(),
            (None, None) => default_output(&input),
        };
        config.output_path = Some(output.clone());
        tracing::debug!(
            "protecting {} -> {} (renaming={}, strings={}, control-flow={}, probes={})",
            input.display(),
            output.display(),
            config.enable_renaming,
            config.enable_string_encryption,
            config.enable_control_flow,
            config.enable_anti_debug || config.enable_anti_tamper,
        );

        let result = Protector::new().protect(&input, config);

        for diagnostic in &result.diagnostics {
            println!("{diagnostic}");
        }
        println!(
            "applied {} passes in {:?}: {}",
            result.applied.len(),
            result.total_duration,
            result.applied.join(", ")
        );
        for (pass, duration) in &result.pass_timings {
            println!("  {pass:>18} {duration:?}");
        }

        if !result.success {
            return Err(CliError::ProtectionFailed(result.errors.join("; ")).into());
        }
        println!("wrote {}", output.display());
        Ok(())
    }
}

/// `app.json` becomes `app.protected.json`.
fn default_output(input: &std::path::Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    let extension = input.extension().and_then(|e| e.to_str()).unwrap_or("json");
    input.with_file_name(format!("{stem}.protected.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_keeps_directory_and_extension() {
        let out = default_output(std::path::Path::new("/tmp/build/app.json"));
        assert_eq!(out, PathBuf::from("/tmp/build/app.protected.json"));
    }
}
