//! Finalizer: canonicalises every body after the passes have run.
//!
//! Two sweeps per body: `simplify` widens every short form so positions are
//! stable, `optimize` recomputes byte offsets to a fixed point and re-shortens
//! branches and constant loads where the distance or value allows it.

use crate::config::OptimizationLevel;
use crate::context::RunState;
use crate::diagnostics::Diagnostic;
use crate::Result;
use std::collections::HashMap;
use tracing::debug;
use umbra_core::{InstrId, MethodBody, Module, Op};

/// Runs the finalizer over the whole module: body canonicalisation, debug
/// symbol policy, and structural post-condition checks.
pub fn finalize(module: &mut Module, state: &mut RunState) -> Result<()> {
    let optimize_bodies = state.config.optimization >= OptimizationLevel::Minimal;
    let mut touched = 0usize;
    for method in &mut module.methods {
        if let Some(body) = method.body.as_mut() {
            simplify_body(body);
            if optimize_bodies {
                touched += optimize_body(body);
            }
        }
    }
    debug!("finalizer re-shortened {touched} instructions");

    if !state.config.preserve_debug_symbols {
        module.debug_directory = None;
    }

    check_post_conditions(module, state);
    Ok(())
}

/// Expands every short-form instruction to its canonical long form.
pub fn simplify_body(body: &mut MethodBody) {
    for instr in &mut body.instrs {
        instr.op = instr.op.clone().to_long_form();
    }
}

/// Shrinks branch and constant widths where legal. Returns the number of
/// instructions rewritten.
pub fn optimize_body(body: &mut MethodBody) -> usize {
    let mut rewritten = 0;
    // Shrinking one instruction can bring another target into short range,
    // so iterate to a fixed point. Each pass only ever shrinks, so the loop
    // terminates.
    loop {
        let offsets = byte_offsets(body);
        let mut changed = false;
        for index in 0..body.instrs.len() {
            let op = body.instrs[index].op.clone();
            let Some(short) = op.to_short_form() else {
                continue;
            };
            let legal = match op.branch_targets().first() {
                Some(target) => branch_fits_i8(body, &offsets, index, *target, &short),
                // Non-branch short forms (constant widths) are always legal.
                None => true,
            };
            if legal {
                body.instrs[index].op = short;
                changed = true;
                rewritten += 1;
            }
        }
        if !changed {
            break;
        }
    }
    rewritten
}

/// Byte offset of every instruction under current encodings.
fn byte_offsets(body: &MethodBody) -> HashMap<InstrId, usize> {
    let mut offsets = HashMap::with_capacity(body.len());
    let mut position = 0usize;
    for instr in &body.instrs {
        offsets.insert(instr.id, position);
        position += instr.op.encoded_size();
    }
    offsets
}

/// A short branch holds an i8 displacement measured from the end of the
/// shortened instruction.
fn branch_fits_i8(
    body: &MethodBody,
    offsets: &HashMap<InstrId, usize>,
    index: usize,
    target: InstrId,
    short: &Op,
) -> bool {
    let Some(&target_offset) = offsets.get(&target) else {
        return false;
    };
    let own_offset = offsets[&body.instrs[index].id];
    let end_of_short = own_offset as i64 + short.encoded_size() as i64;
    let displacement = target_offset as i64 - end_of_short;
    i8::try_from(displacement).is_ok()
}

/// Structural sanity of the emitted module. Violations are error
/// diagnostics; the module is still written.
fn check_post_conditions(module: &Module, state: &mut RunState) {
    if module.types.is_empty() {
        state.add_diagnostic(Diagnostic::error(
            "FIN001",
            "emitted module declares no types",
        ));
    }
    if let Some(entry) = module.entry_point {
        if module.method(entry).body.is_none() {
            state.add_diagnostic(Diagnostic::error(
                "FIN002",
                format!(
                    "entry point '{}' has no body",
                    module.method_full_name(entry)
                ),
            ));
        }
    }
    for (index, method) in module.methods.iter().enumerate() {
        if let Some(body) = &method.body {
            if !body.references_resolve() {
                state.add_diagnostic(Diagnostic::error(
                    "FIN003",
                    format!(
                        "body of '{}' holds a dangling instruction reference",
                        module.method_full_name(umbra_core::MethodId(index as u32))
                    ),
                ));
            }
        }
    }
}
