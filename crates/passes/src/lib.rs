//! umbra-passes: the protection passes and the pipeline that schedules them.

pub mod anti_debug;
pub mod config;
pub mod context;
pub mod control_flow;
pub mod diagnostics;
pub mod naming;
pub mod optimizer;
pub mod preservation;
pub mod protector;
pub mod renaming;
pub mod schedule;
pub mod string_encryption;
pub mod watermark;

use context::RunState;
use thiserror::Error;
use umbra_core::Module;

/// Pass error type encompassing all pass and pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Core operation failed.
    #[error(transparent)]
    Core(#[from] umbra_core::Error),

    /// The configuration cannot drive a run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Enabled passes form a dependency cycle.
    #[error("dependency cycle among enabled passes: {0}")]
    DependencyCycle(String),

    /// A declared dependency names no enabled pass.
    #[error("pass '{pass}' depends on unknown or disabled pass '{dependency}'")]
    UnknownDependency { pass: String, dependency: String },

    /// A pass failed as a whole.
    #[error("pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },

    /// One method could not be transformed.
    #[error("method '{method}' could not be transformed: {message}")]
    MethodFailed { method: String, message: String },

    /// The emitted module violates a structural post-condition.
    #[error("post-condition violated: {0}")]
    PostCondition(String),

    /// An instruction or metadata reference went dangling during a rewrite.
    #[error("dangling reference while transforming '{0}'")]
    DanglingReference(String),
}

/// Pass result type
pub type Result<T> = std::result::Result<T, Error>;

/// One orchestrator-scheduled transformation unit.
///
/// `conflicts_with` lists passes that must run *before* this one when both
/// are enabled, so the conflicting pass's output is this pass's input.
pub trait Pass {
    /// Globally unique id within a run.
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Higher priority schedules earlier among order-equivalent passes.
    fn priority(&self) -> i32 {
        0
    }
    /// Ids that must have completed before this pass runs.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }
    /// Ids ordered before this pass when present in the run.
    fn conflicts_with(&self) -> &'static [&'static str] {
        &[]
    }
    /// Cheap applicability test; `false` skips the pass with a diagnostic.
    fn can_apply(&self, module: &Module) -> bool;
    /// Performs the transformation. A returned error marks the pass
    /// not-applied; per-method recovery happens inside the pass.
    fn apply(&self, module: &mut Module, state: &mut RunState) -> Result<()>;
}
