//! Marker attribute identifying the producing build.

use crate::context::RunState;
use crate::diagnostics::Diagnostic;
use crate::{Pass, Result};
use umbra_core::{CustomAttribute, Module};

pub const WATERMARK_ATTRIBUTE: &str = "ProtectedModuleAttribute::.ctor";

pub struct WatermarkPass;

impl Pass for WatermarkPass {
    fn id(&self) -> &'static str {
        "watermarking"
    }

    fn name(&self) -> &'static str {
        "Watermarking"
    }

    fn description(&self) -> &'static str {
        "Stamps the module with a marker attribute carrying version and build identity"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_apply(&self, module: &Module) -> bool {
        // Re-stamping an already protected module would duplicate the marker.
        !module
            .attributes
            .iter()
            .any(|a| a.ctor == WATERMARK_ATTRIBUTE)
    }

    fn apply(&self, module: &mut Module, state: &mut RunState) -> Result<()> {
        // The seed hash identifies the build without revealing the seed.
        let argument = format!(
            "umbra/{} {}",
            env!("CARGO_PKG_VERSION"),
            &state.seed.hash_hex()[..18]
        );
        module.attributes.push(CustomAttribute {
            ctor: WATERMARK_ATTRIBUTE.to_string(),
            argument,
        });
        state.add_diagnostic(Diagnostic::info("WM001", "module watermarked"));
        Ok(())
    }
}
