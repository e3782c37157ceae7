//! Control-flow flattening.
//!
//! Each eligible body is cut into basic blocks, the blocks are shuffled, and
//! a state-variable dispatcher re-establishes the original execution order
//! through a switch header. Branch operands are instruction handles, so the
//! original branches keep their targets wherever the blocks land.

use crate::config::ControlFlowMode;
use crate::context::RunState;
use crate::diagnostics::Diagnostic;
use crate::{Pass, Result};
use serde_json::json;
use sha3::{Digest, Keccak256};
use tracing::debug;
use umbra_core::{InstrId, Instruction, MethodBody, MethodId, Module, Op, Rand, TypeSig};

/// Blocks longer than this are chunked so even straight-line bodies feed the
/// dispatcher more than one block.
const MAX_BLOCK_LEN: usize = 4;

pub struct ControlFlowPass;

impl Pass for ControlFlowPass {
    fn id(&self) -> &'static str {
        "control-flow"
    }

    fn name(&self) -> &'static str {
        "Control-flow flattening"
    }

    fn description(&self) -> &'static str {
        "Rewrites method bodies into switch-dispatched state machines with shuffled block order"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn conflicts_with(&self) -> &'static [&'static str] {
        &["renaming", "string-encryption"]
    }

    fn can_apply(&self, module: &Module) -> bool {
        module
            .methods
            .iter()
            .any(|m| m.body.as_ref().is_some_and(|b| b.len() >= 3))
    }

    fn apply(&self, module: &mut Module, state: &mut RunState) -> Result<()> {
        let mode = state.config.control_flow.mode;
        if mode == ControlFlowMode::None {
            debug!("control-flow mode is none, nothing to do");
            return Ok(());
        }
        let threshold = state.config.control_flow.complexity_threshold.max(3);
        let insert_junk =
            state.config.control_flow.insert_junk_blocks || mode >= ControlFlowMode::Heavy;
        if state.config.control_flow.split_methods {
            state.add_diagnostic(Diagnostic::warning(
                "CF002",
                "method splitting is not available in this build",
            ));
        }

        let mut flattened = 0usize;
        let mut skipped = 0usize;
        for index in 0..module.methods.len() {
            let id = MethodId(index as u32);
            let method = module.method(id);
            if method.is_constructor() || method.is_special_name || method.is_runtime_special {
                continue;
            }
            if method.body.as_ref().map_or(true, |b| b.len() < threshold) {
                continue;
            }
            if state.preservation().is_method_excluded(module, id) {
                continue;
            }
            // Light mode only touches a coin-flip subset. The draw happens
            // unconditionally so the stream stays aligned across runs.
            let selected = state.rand().chance(match mode {
                ControlFlowMode::Light => 0.5,
                _ => 1.0,
            });
            if !selected {
                continue;
            }

            let full_name = module.method_full_name(id);
            let body = module.methods[index].body.as_mut().expect("checked above");
            let snapshot = body.clone();
            match flatten_body(body, state.rand(), mode, insert_junk) {
                Ok(true) => flattened += 1,
                Ok(false) => {}
                Err(message) => {
                    *module.methods[index].body.as_mut().expect("body present") = snapshot;
                    skipped += 1;
                    state.add_diagnostic(
                        Diagnostic::warning("CF001", format!("{full_name}: {message}"))
                            .with_payload(json!({ "method": full_name, "error": message })),
                    );
                }
            }
        }

        state.add_diagnostic(Diagnostic::info(
            "CF000",
            format!("flattened {flattened} methods, skipped {skipped}"),
        ));
        Ok(())
    }
}

/// Flattens one body in place. Returns `Ok(false)` when the body is left
/// untouched, an error message when the caller should restore the snapshot.
fn flatten_body(
    body: &mut MethodBody,
    rand: &mut Rand,
    mode: ControlFlowMode,
    insert_junk: bool,
) -> std::result::Result<bool, String> {
    // Long forms first so widths cannot constrain later insertion.
    for instr in &mut body.instrs {
        instr.op = instr.op.clone().to_long_form();
    }

    let blocks = split_blocks(&body.instrs);
    if blocks.len() < 2 {
        return Ok(false);
    }
    check_regions_within_blocks(body, &blocks)?;

    let block_instrs: Vec<Vec<Instruction>> = blocks
        .iter()
        .map(|range| body.instrs[range.clone()].to_vec())
        .collect();
    let first_ids: Vec<InstrId> = block_instrs
        .iter()
        .map(|b| b.first().expect("blocks are non-empty").id)
        .collect();
    let block_count = block_instrs.len();

    let state_local = body.add_local("state", TypeSig::I4);

    // Dispatcher skeleton. All fresh instructions are minted before assembly
    // so ids are fixed when branches reference them.
    let header_load = body.fresh(Op::Ldloc(state_local));
    let default_exit = body.fresh(Op::Ret);
    let switch_instr = body.fresh(Op::Switch(first_ids));
    let fallback = body.fresh(Op::Br(default_exit.id));

    let mut stream: Vec<Instruction> = Vec::with_capacity(body.len() + block_count * 3 + 8);
    let init = body.fresh(Op::LdcI4(0));
    let store = body.fresh(Op::Stloc(state_local));
    let jump_header = body.fresh(Op::Br(header_load.id));
    stream.extend([init, store, jump_header]);
    stream.extend([header_load.clone(), switch_instr, fallback]);

    let mut order: Vec<usize> = (0..block_count).collect();
    rand.shuffle(&mut order);

    for &block_index in &order {
        stream.extend(block_instrs[block_index].iter().cloned());
        if block_index + 1 == block_count {
            stream.push(body.fresh(Op::Br(default_exit.id)));
        } else {
            stream.push(body.fresh(Op::LdcI4(block_index as i32 + 1)));
            stream.push(body.fresh(Op::Stloc(state_local)));
            stream.push(body.fresh(Op::Br(header_load.id)));
        }
        if insert_junk && rand.chance(0.35) {
            stream.extend(junk_block(body, rand, header_load.id));
        }
    }
    stream.push(default_exit);

    body.replace_instrs(stream);

    if mode >= ControlFlowMode::Normal {
        inject_opaque_predicates(body, rand);
    }

    if !body.references_resolve() {
        return Err("dispatcher left a dangling branch target".into());
    }
    Ok(true)
}

/// Flow-based partition refined by chunking. Straight-line bodies of at
/// least three instructions always produce two or more blocks.
fn split_blocks(instrs: &[Instruction]) -> Vec<std::ops::Range<usize>> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for (index, instr) in instrs.iter().enumerate() {
        if instr.op.is_block_ending() {
            blocks.push(start..index + 1);
            start = index + 1;
        }
    }
    if start < instrs.len() {
        blocks.push(start..instrs.len());
    }

    if blocks.len() == 1 && instrs.len() >= 3 {
        let mid = instrs.len() / 2;
        blocks = vec![0..mid, mid..instrs.len()];
    }

    blocks
        .into_iter()
        .flat_map(|range| {
            let mut chunks = Vec::new();
            let mut chunk_start = range.start;
            while range.end - chunk_start > MAX_BLOCK_LEN {
                chunks.push(chunk_start..chunk_start + MAX_BLOCK_LEN);
                chunk_start += MAX_BLOCK_LEN;
            }
            chunks.push(chunk_start..range.end);
            chunks
        })
        .collect()
}

/// Every region's try and handler range must sit inside a single block;
/// anything else would tear the region apart once blocks move.
fn check_regions_within_blocks(
    body: &MethodBody,
    blocks: &[std::ops::Range<usize>],
) -> std::result::Result<(), String> {
    for region in &body.regions {
        for (start, end) in [
            (region.try_start, region.try_end),
            (region.handler_start, region.handler_end),
        ] {
            let start_index = body
                .index_of(start)
                .ok_or_else(|| "region boundary not in body".to_string())?;
            let end_index = body
                .index_of(end)
                .ok_or_else(|| "region boundary not in body".to_string())?;
            let within_one_block = blocks
                .iter()
                .any(|b| b.contains(&start_index) && b.contains(&end_index));
            if !within_one_block {
                return Err("exception region spans multiple basic blocks".into());
            }
        }
    }
    Ok(())
}

/// Constant for a predicate operand: a Keccak digest of the draw, so the
/// values carry no visible pattern.
fn opaque_constant(seed: u64) -> i32 {
    let mut hasher = Keccak256::new();
    hasher.update(seed.to_le_bytes());
    let digest = hasher.finalize();
    i32::from_le_bytes(digest[..4].try_into().expect("digest is 32 bytes"))
}

/// Dead block never named by the switch table: arithmetic noise and a jump
/// back to the header.
fn junk_block(body: &mut MethodBody, rand: &mut Rand, header: InstrId) -> Vec<Instruction> {
    let a = rand.next_int(1, 0x7fff) as i32;
    let b = rand.next_int(1, 0x7fff) as i32;
    vec![
        body.fresh(Op::LdcI4(a)),
        body.fresh(Op::LdcI4(b)),
        body.fresh(Op::Xor),
        body.fresh(Op::Pop),
        body.fresh(Op::Br(header)),
    ]
}

/// Inserts one to three always-taken / never-taken predicates at boundaries
/// where neither neighbour branches. Both outcomes land on the instruction
/// that would have executed anyway.
fn inject_opaque_predicates(body: &mut MethodBody, rand: &mut Rand) {
    // The first six instructions are the dispatch prologue and switch
    // header; predicates only land inside emitted blocks.
    let mut candidates: Vec<InstrId> = Vec::new();
    for window in body.instrs.iter().skip(6).collect::<Vec<_>>().windows(2) {
        if !window[0].op.is_branch() && !window[1].op.is_branch() {
            candidates.push(window[1].id);
        }
    }
    if candidates.is_empty() {
        return;
    }
    rand.shuffle(&mut candidates);
    let count = rand.next_int(1, 4) as usize;
    for next in candidates.into_iter().take(count) {
        let value = opaque_constant(rand.next_int(0, i64::MAX) as u64);
        if rand.chance(0.5) {
            // (x * 0 == 0) always branches to `next`.
            for op in [
                Op::LdcI4(value),
                Op::LdcI4(0),
                Op::Mul,
                Op::LdcI4(0),
                Op::Ceq,
                Op::Brtrue(next),
            ] {
                let _ = body.insert_before(next, op);
            }
        } else {
            // (x & 0) never branches; falls through to `next` regardless.
            for op in [Op::LdcI4(value), Op::LdcI4(0), Op::And, Op::Brtrue(next)] {
                let _ = body.insert_before(next, op);
            }
        }
    }
}
