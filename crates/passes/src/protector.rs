//! The protection pipeline: registry assembly, supervised pass execution,
//! finalization, and the single public entry point.

use crate::anti_debug::AntiDebugPass;
use crate::config::{Configuration, DebugMode};
use crate::context::RunState;
use crate::control_flow::ControlFlowPass;
use crate::diagnostics::{Diagnostic, Severity};
use crate::optimizer;
use crate::renaming::RenamingPass;
use crate::schedule::execution_order;
use crate::string_encryption::StringEncryptionPass;
use crate::watermark::WatermarkPass;
use crate::{Error, Pass, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use umbra_core::{JsonModuleIo, Module, ModuleIo};

/// Aggregate outcome of one protection run.
#[derive(Debug)]
pub struct ProtectionResult {
    pub success: bool,
    /// Ids of passes whose `apply` completed.
    pub applied: Vec<String>,
    pub errors: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub pass_timings: Vec<(String, Duration)>,
    pub total_duration: Duration,
    pub output_path: Option<PathBuf>,
}

impl ProtectionResult {
    fn failure(errors: Vec<String>, diagnostics: Vec<Diagnostic>, started: Instant) -> Self {
        Self {
            success: false,
            applied: Vec::new(),
            errors,
            diagnostics,
            pass_timings: Vec::new(),
            total_duration: started.elapsed(),
            output_path: None,
        }
    }
}

/// Builds the pass set enabled by the configuration, warning about
/// recognised toggles this build cannot honour.
pub fn build_registry(config: &Configuration, state: &mut RunState) -> Vec<Box<dyn Pass>> {
    let mut passes: Vec<Box<dyn Pass>> = Vec::new();
    if config.enable_renaming {
        passes.push(Box::new(RenamingPass));
    }
    if config.enable_string_encryption {
        passes.push(Box::new(StringEncryptionPass));
    }
    if config.enable_control_flow {
        passes.push(Box::new(ControlFlowPass));
    }
    if config.enable_anti_debug || config.enable_anti_tamper {
        passes.push(Box::new(AntiDebugPass));
    }
    if config.enable_watermarking {
        passes.push(Box::new(WatermarkPass));
    }

    let unavailable = [
        (config.enable_virtualization, "virtualization"),
        (config.enable_mutation, "mutation"),
        (config.enable_constants_encoding, "constants-encoding"),
        (config.enable_resources_protection, "resources-protection"),
        (config.enable_call_indirection, "call-indirection"),
        (config.enable_junk_code, "junk-code"),
    ];
    for (enabled, name) in unavailable {
        if enabled {
            state.add_diagnostic(Diagnostic::warning(
                "ORC002",
                format!("pass '{name}' is not available in this build"),
            ));
        }
    }
    passes
}

/// Outcome of running a pass vector over a module.
#[derive(Debug)]
pub struct PipelineReport {
    pub applied: Vec<String>,
    pub errors: Vec<String>,
}

/// Runs `passes` in resolved order under supervision, then the finalizer.
/// A cycle aborts before any mutation. Individual pass failures become
/// error diagnostics unless debug mode is `Full`, which re-raises.
pub fn run_pipeline(
    module: &mut Module,
    state: &mut RunState,
    passes: &[Box<dyn Pass>],
) -> Result<PipelineReport> {
    let order = execution_order(passes)?;

    let mut applied = Vec::new();
    let mut errors = Vec::new();
    for index in order {
        let pass = &passes[index];
        if !pass.can_apply(module) {
            state.add_diagnostic(Diagnostic::info(
                "ORC001",
                format!("pass '{}' not applicable, skipped", pass.id()),
            ));
            continue;
        }
        debug!("applying pass '{}'", pass.id());
        let started = Instant::now();
        match pass.apply(module, state) {
            Ok(()) => {
                state.mark_applied(pass.id());
                applied.push(pass.id().to_string());
            }
            Err(error) => {
                let message = format!("pass '{}' failed: {error}", pass.id());
                warn!("{message}");
                state.add_diagnostic(Diagnostic::error("ORC003", message.clone()));
                errors.push(message);
                if state.config.debug_mode == DebugMode::Full {
                    return Err(Error::PassFailed {
                        pass: pass.id().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        let elapsed = started.elapsed();
        state.pass_timings.push((pass.id().to_string(), elapsed));
        debug!("pass '{}' took {elapsed:?}", pass.id());
    }

    optimizer::finalize(module, state)?;
    Ok(PipelineReport { applied, errors })
}

/// The sole entry point of the core: load, transform, write.
pub struct Protector<IO: ModuleIo = JsonModuleIo> {
    io: IO,
}

impl Default for Protector<JsonModuleIo> {
    fn default() -> Self {
        Self::new()
    }
}

impl Protector<JsonModuleIo> {
    pub fn new() -> Self {
        Self {
            io: JsonModuleIo::new(),
        }
    }
}

impl<IO: ModuleIo> Protector<IO> {
    pub fn with_io(io: IO) -> Self {
        Self { io }
    }

    pub fn protect(&self, input: &Path, config: Configuration) -> ProtectionResult {
        let started = Instant::now();

        let Some(output) = config.output_path.clone() else {
            return ProtectionResult::failure(
                vec!["configuration error: output path is required".into()],
                Vec::new(),
                started,
            );
        };

        let mut module = match self.io.load(input) {
            Ok(module) => module,
            Err(error) => {
                return ProtectionResult::failure(
                    vec![format!("failed to load '{}': {error}", input.display())],
                    Vec::new(),
                    started,
                );
            }
        };
        info!(
            "loaded '{}': {} types, {} methods",
            module.name,
            module.types.len(),
            module.methods.len()
        );

        let mut state = RunState::new(config);
        let passes = build_registry(&state.config.clone(), &mut state);
        let report = match run_pipeline(&mut module, &mut state, &passes) {
            Ok(report) => report,
            Err(error) => {
                let mut diagnostics = state.diagnostics().to_vec();
                diagnostics.push(Diagnostic::error("ORC004", error.to_string()));
                return ProtectionResult::failure(
                    vec![error.to_string()],
                    diagnostics,
                    started,
                );
            }
        };

        let mut errors = report.errors;
        errors.extend(
            state
                .diagnostics()
                .iter()
                .filter(|d| d.severity == Severity::Error && d.code.starts_with("FIN"))
                .map(|d| d.message.clone()),
        );

        // Post-condition failures are reported but the module is written
        // regardless; a write failure is a run error with no output
        // guarantees.
        if let Err(error) = self.io.write(&module, &output) {
            errors.push(format!("failed to write '{}': {error}", output.display()));
        }

        let success = errors.is_empty();
        info!(
            "protection {} in {:?}: {} passes applied",
            if success { "succeeded" } else { "failed" },
            started.elapsed(),
            report.applied.len()
        );
        ProtectionResult {
            success,
            applied: report.applied,
            errors,
            diagnostics: state.diagnostics().to_vec(),
            pass_timings: state.pass_timings.clone(),
            total_duration: started.elapsed(),
            output_path: Some(output),
        }
    }
}
