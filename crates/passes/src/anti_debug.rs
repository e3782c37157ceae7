//! Runtime self-checks: debugger probes and integrity validation.
//!
//! A helper type is synthesised into the global namespace carrying p/invoke
//! declarations, managed detection methods, a timing probe, a checksum probe
//! over a baked blob, and a corruption method. The module initialiser gains a
//! startup check chain; selected method bodies gain entry and periodic
//! probes. Every injected sequence nets zero stack.

use crate::config::AntiTamperMode;
use crate::context::RunState;
use crate::diagnostics::Diagnostic;
use crate::naming::{NameAllocator, NameKind, NameScope};
use crate::{Pass, Result};
use tracing::debug;
use umbra_core::{
    ExternalRef, FieldDef, FieldId, InstrId, MethodBody, MethodDef, MethodId, Module, Op,
    Signature, TypeDef, TypeId, TypeSig, Visibility,
};

/// Process names compared against the parent process.
const DEBUGGER_PROCESS_NAMES: &[&str] = &["windbg", "x64dbg", "x32dbg", "ollydbg", "dnSpy", "ilspy"];

/// FNV-1a 64-bit.
pub(crate) fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub struct AntiDebugPass;

impl Pass for AntiDebugPass {
    fn id(&self) -> &'static str {
        "anti-debug"
    }

    fn name(&self) -> &'static str {
        "Anti-debug and tamper probes"
    }

    fn description(&self) -> &'static str {
        "Injects a helper type with debugger and integrity probes wired into the module initialiser and method entries"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn conflicts_with(&self) -> &'static [&'static str] {
        // Probe bodies must not be rewritten by the earlier mutation passes.
        &["renaming", "string-encryption", "control-flow"]
    }

    fn can_apply(&self, module: &Module) -> bool {
        module.methods.iter().any(|m| m.body.is_some()) || module.user_type_count() > 0
    }

    fn apply(&self, module: &mut Module, state: &mut RunState) -> Result<()> {
        let mode = state.config.anti_tamper.mode;
        let with_integrity =
            state.config.enable_anti_tamper && state.config.anti_tamper.validate_checksum;
        if state.config.anti_tamper.validate_signature {
            state.add_diagnostic(Diagnostic::warning(
                "AD003",
                "signature validation is not available in this build",
            ));
        }

        let existing_bodies = module.method_ids_with_body();
        let helper = synthesize_helper(module, state, with_integrity);

        install_startup_chain(module, &helper, mode, with_integrity);

        let probability = match mode {
            AntiTamperMode::None | AntiTamperMode::Light => 0.3,
            AntiTamperMode::Normal => 0.6,
            AntiTamperMode::Heavy => 0.9,
        };

        let mut probed = 0usize;
        for id in existing_bodies {
            let method = module.method(id);
            if method.is_constructor() || method.is_special_name || method.is_runtime_special {
                continue;
            }
            if method.declaring_type == helper.type_id {
                continue;
            }
            if is_accessor_name(&method.name) {
                continue;
            }
            if state.preservation().is_method_excluded(module, id) {
                continue;
            }
            if !state.rand().chance(probability) {
                continue;
            }
            let check = if state.rand().chance(0.5) {
                helper.detect_native
            } else {
                helper.detect_managed
            };
            let body = module.methods[id.0 as usize]
                .body
                .as_mut()
                .expect("selected from bodies");
            inject_probes(body, check, helper.corrupt);
            probed += 1;
        }

        state.add_diagnostic(Diagnostic::info(
            "AD001",
            format!(
                "installed startup checks and probed {probed} methods ({} helper members)",
                module.type_(helper.type_id).methods.len()
            ),
        ));
        debug!("anti-debug helper type: {}", module.type_(helper.type_id).name);
        Ok(())
    }
}

fn is_accessor_name(name: &str) -> bool {
    ["get_", "set_", "add_", "remove_", "raise_"]
        .iter()
        .any(|p| name.starts_with(p))
}

/// Handles into the synthesised helper.
struct Helper {
    type_id: TypeId,
    corrupt: MethodId,
    detect_native: MethodId,
    detect_managed: MethodId,
    detect_remote: MethodId,
    detect_peb: MethodId,
    detect_heap: MethodId,
    detect_ods: MethodId,
    detect_parent: MethodId,
    detect_timing: MethodId,
    detect_env: MethodId,
    verify_integrity: Option<MethodId>,
}

fn synthesize_helper(module: &mut Module, state: &mut RunState, with_integrity: bool) -> Helper {
    let mut scope: NameScope = module.types.iter().map(|t| t.name.clone()).collect();
    let mut allocator =
        NameAllocator::new(state.config.renaming.scheme, state.config.renaming.mode);

    let type_name = allocator.mint(state.rand(), &mut scope, NameKind::Type);
    let mut type_def = TypeDef::new("", type_name);
    type_def.visibility = Visibility::Internal;
    type_def.is_sealed = true;
    type_def.is_abstract = true;
    let type_id = module.add_type(type_def);

    let mut members = NameScope::new();
    let mint = |state: &mut RunState, scope: &mut NameScope, alloc: &mut NameAllocator| {
        alloc.mint(state.rand(), scope, NameKind::Method)
    };

    // P/invoke declarations: metadata only, no bodies.
    let pinvoke = |module: &mut Module, name: &str, dll: &str, params: Vec<TypeSig>, ret: TypeSig| {
        let mut method = MethodDef::new(name, type_id, Signature::new(params, ret));
        method.is_static = true;
        method.pinvoke_module = Some(dll.to_string());
        module.add_method(method)
    };
    let is_debugger_present = pinvoke(
        module,
        "IsDebuggerPresent",
        "kernel32.dll",
        vec![],
        TypeSig::Bool,
    );
    let check_remote = pinvoke(
        module,
        "CheckRemoteDebuggerPresent",
        "kernel32.dll",
        vec![TypeSig::I8, TypeSig::I8],
        TypeSig::Bool,
    );
    let nt_query = pinvoke(
        module,
        "NtQueryInformationProcess",
        "ntdll.dll",
        vec![TypeSig::I8, TypeSig::I4, TypeSig::I8, TypeSig::I4, TypeSig::I8],
        TypeSig::I4,
    );
    let output_debug_string = pinvoke(
        module,
        "OutputDebugStringA",
        "kernel32.dll",
        vec![TypeSig::Str],
        TypeSig::Void,
    );

    let ext = |module: &mut Module, full_name: &str, params: usize, returns_value: bool| {
        module.add_ext_ref(ExternalRef {
            assembly: "System.Runtime".into(),
            full_name: full_name.into(),
            params,
            returns_value,
        })
    };
    let debugger_attached = ext(module, "System.Diagnostics.Debugger::get_IsAttached", 0, true);
    let debugger_logging = ext(module, "System.Diagnostics.Debugger::IsLogging", 0, true);
    let tick_count = ext(module, "System.Environment::get_TickCount", 0, true);
    let env_exit = ext(module, "System.Environment::Exit", 1, false);
    let get_env = ext(
        module,
        "System.Environment::GetEnvironmentVariable",
        1,
        true,
    );
    let current_process = ext(
        module,
        "System.Diagnostics.Process::GetCurrentProcess",
        0,
        true,
    );
    let process_name = ext(
        module,
        "System.Diagnostics.Process::get_ProcessName",
        1,
        true,
    );
    let string_equals = ext(module, "System.String::Equals", 2, true);
    let is_null_or_empty = ext(module, "System.String::IsNullOrEmpty", 1, true);

    let bool_sig = || Signature::new(vec![], TypeSig::Bool);
    let add_check = |module: &mut Module, name: String, body: MethodBody| {
        let mut method = MethodDef::new(name, type_id, bool_sig());
        method.is_static = true;
        method.body = Some(body);
        module.add_method(method)
    };

    // Native probe: the kernel flag.
    let mut body = MethodBody::new();
    body.push(Op::Call(is_debugger_present));
    body.push(Op::Ret);
    let name = mint(state, &mut members, &mut allocator);
    let detect_native = add_check(module, name, body);

    // Managed probes.
    let mut body = MethodBody::new();
    body.push(Op::CallExt(debugger_attached));
    body.push(Op::CallExt(debugger_logging));
    body.push(Op::Or);
    body.push(Op::Ret);
    let name = mint(state, &mut members, &mut allocator);
    let detect_managed = add_check(module, name, body);

    // Remote debugger via the process handle.
    let mut body = MethodBody::new();
    body.push(Op::LdcI8(-1));
    body.push(Op::LdcI8(0));
    body.push(Op::Call(check_remote));
    body.push(Op::Ret);
    let name = mint(state, &mut members, &mut allocator);
    let detect_remote = add_check(module, name, body);

    // Process-environment-block flag through NtQueryInformationProcess.
    let mut body = MethodBody::new();
    body.push(Op::LdcI8(-1));
    body.push(Op::LdcI4(7)); // ProcessDebugPort
    body.push(Op::LdcI8(0));
    body.push(Op::LdcI4(8));
    body.push(Op::LdcI8(0));
    body.push(Op::Call(nt_query));
    body.push(Op::LdcI4(0));
    body.push(Op::Cgt);
    body.push(Op::Ret);
    let name = mint(state, &mut members, &mut allocator);
    let detect_peb = add_check(module, name, body);

    // Debug-heap environment marker.
    let name = mint(state, &mut members, &mut allocator);
    let detect_heap = add_check(
        module,
        name,
        env_probe_body("_NO_DEBUG_HEAP", get_env, is_null_or_empty),
    );

    // OutputDebugString trick, confirmed by the native flag.
    let mut body = MethodBody::new();
    body.push(Op::LdStr(String::from("\u{1}")));
    body.push(Op::Call(output_debug_string));
    body.push(Op::Call(is_debugger_present));
    body.push(Op::Ret);
    let name = mint(state, &mut members, &mut allocator);
    let detect_ods = add_check(module, name, body);

    // Parent/process-name blacklist comparison.
    let name = mint(state, &mut members, &mut allocator);
    let detect_parent = add_check(
        module,
        name,
        parent_probe_body(current_process, process_name, string_equals),
    );

    // Timing analysis: a spin loop must not take observably long.
    let name = mint(state, &mut members, &mut allocator);
    let detect_timing = add_check(module, name, timing_probe_body(tick_count));

    // Profiler/instrumentation environment artefacts.
    let name = mint(state, &mut members, &mut allocator);
    let detect_env = add_check(
        module,
        name,
        env_probe_body("COR_ENABLE_PROFILING", get_env, is_null_or_empty),
    );

    // Integrity: FNV-1a over a baked blob against a transform-time constant.
    let verify_integrity = if with_integrity {
        let blob = state.rand().next_bytes(64);
        let expected = fnv1a64(&blob) as i64;
        let field_name = allocator.mint(state.rand(), &mut members, NameKind::Field);
        let mut field = FieldDef::new(field_name, type_id, TypeSig::Bytes);
        field.is_static = true;
        field.initial_value = Some(blob);
        let blob_field = module.add_field(field);

        let mut checksum_method = MethodDef::new(
            allocator.mint(state.rand(), &mut members, NameKind::Method),
            type_id,
            Signature::new(vec![], TypeSig::I8),
        );
        checksum_method.is_static = true;
        checksum_method.body = Some(checksum_body(blob_field));
        let compute_checksum = module.add_method(checksum_method);

        let mut body = MethodBody::new();
        body.push(Op::Call(compute_checksum));
        body.push(Op::LdcI8(expected));
        body.push(Op::Ceq);
        body.push(Op::LdcI4(0));
        body.push(Op::Ceq);
        body.push(Op::Ret);
        let name = mint(state, &mut members, &mut allocator);
        Some(add_check(module, name, body))
    } else {
        None
    };

    // Corruption: fault the process, or exit cleanly when configured.
    let mut corrupt_body = MethodBody::new();
    if state.config.anti_tamper.corrupt_on_tamper {
        corrupt_body.push(Op::LdNull);
        corrupt_body.push(Op::Throw);
    } else {
        corrupt_body.push(Op::LdcI4(134));
        corrupt_body.push(Op::CallExt(env_exit));
        corrupt_body.push(Op::Ret);
    }
    let mut corrupt_method = MethodDef::new(
        mint(state, &mut members, &mut allocator),
        type_id,
        Signature::empty(),
    );
    corrupt_method.is_static = true;
    corrupt_method.body = Some(corrupt_body);
    let corrupt = module.add_method(corrupt_method);

    Helper {
        type_id,
        corrupt,
        detect_native,
        detect_managed,
        detect_remote,
        detect_peb,
        detect_heap,
        detect_ods,
        detect_parent,
        detect_timing,
        detect_env,
        verify_integrity,
    }
}

/// `tampered = !IsNullOrEmpty(GetEnvironmentVariable(name))`
fn env_probe_body(
    variable: &str,
    get_env: umbra_core::ExtRefId,
    is_null_or_empty: umbra_core::ExtRefId,
) -> MethodBody {
    let mut body = MethodBody::new();
    body.push(Op::LdStr(variable.to_string()));
    body.push(Op::CallExt(get_env));
    body.push(Op::CallExt(is_null_or_empty));
    body.push(Op::LdcI4(0));
    body.push(Op::Ceq);
    body.push(Op::Ret);
    body
}

/// Compares the current process name against the known debugger list.
fn parent_probe_body(
    current_process: umbra_core::ExtRefId,
    process_name: umbra_core::ExtRefId,
    string_equals: umbra_core::ExtRefId,
) -> MethodBody {
    let mut body = MethodBody::new();
    let name = body.add_local("name", TypeSig::Str);
    let flag = body.add_local("flag", TypeSig::I4);
    body.push(Op::CallExt(current_process));
    body.push(Op::CallExt(process_name));
    body.push(Op::Stloc(name));
    body.push(Op::LdcI4(0));
    body.push(Op::Stloc(flag));
    for debugger in DEBUGGER_PROCESS_NAMES {
        body.push(Op::Ldloc(name));
        body.push(Op::LdStr((*debugger).to_string()));
        body.push(Op::CallExt(string_equals));
        body.push(Op::Ldloc(flag));
        body.push(Op::Or);
        body.push(Op::Stloc(flag));
    }
    body.push(Op::Ldloc(flag));
    body.push(Op::Ret);
    body
}

/// TickCount delta around a spin loop, compared against a threshold.
fn timing_probe_body(tick_count: umbra_core::ExtRefId) -> MethodBody {
    let mut body = MethodBody::new();
    let t0 = body.add_local("t0", TypeSig::I4);
    let acc = body.add_local("acc", TypeSig::I4);
    let i = body.add_local("i", TypeSig::I4);

    body.push(Op::CallExt(tick_count));
    body.push(Op::Stloc(t0));
    body.push(Op::LdcI4(0));
    body.push(Op::Stloc(acc));
    body.push(Op::LdcI4(0));
    body.push(Op::Stloc(i));

    let check = body.push(Op::Ldloc(i));
    body.push(Op::LdcI4(64));
    let exit_branch = body.push(Op::Bge(InstrId(0)));

    body.push(Op::Ldloc(acc));
    body.push(Op::Ldloc(i));
    body.push(Op::LdcI4(31));
    body.push(Op::Mul);
    body.push(Op::Xor);
    body.push(Op::Stloc(acc));
    body.push(Op::Ldloc(i));
    body.push(Op::LdcI4(1));
    body.push(Op::Add);
    body.push(Op::Stloc(i));
    body.push(Op::Br(check));

    let done = body.push(Op::CallExt(tick_count));
    body.push(Op::Ldloc(t0));
    body.push(Op::Sub);
    body.push(Op::LdcI4(500));
    body.push(Op::Cgt);
    body.push(Op::Ret);

    if let Some(instr) = body.instr_mut(exit_branch) {
        instr.op = Op::Bge(done);
    }
    body
}

/// FNV-1a 64 loop over the baked blob.
fn checksum_body(blob: FieldId) -> MethodBody {
    let mut body = MethodBody::new();
    let hash = body.add_local("hash", TypeSig::I8);
    let i = body.add_local("i", TypeSig::I4);
    let n = body.add_local("n", TypeSig::I4);

    body.push(Op::LdcI8(0xcbf29ce484222325u64 as i64));
    body.push(Op::Stloc(hash));
    body.push(Op::Ldsfld(blob));
    body.push(Op::Ldlen);
    body.push(Op::Stloc(n));
    body.push(Op::LdcI4(0));
    body.push(Op::Stloc(i));

    let check = body.push(Op::Ldloc(i));
    body.push(Op::Ldloc(n));
    let exit_branch = body.push(Op::Bge(InstrId(0)));

    body.push(Op::Ldloc(hash));
    body.push(Op::Ldsfld(blob));
    body.push(Op::Ldloc(i));
    body.push(Op::LdelemU1);
    body.push(Op::ConvI8);
    body.push(Op::Xor);
    body.push(Op::LdcI8(0x100000001b3));
    body.push(Op::Mul);
    body.push(Op::Stloc(hash));
    body.push(Op::Ldloc(i));
    body.push(Op::LdcI4(1));
    body.push(Op::Add);
    body.push(Op::Stloc(i));
    body.push(Op::Br(check));

    let done = body.push(Op::Ldloc(hash));
    body.push(Op::Ret);

    if let Some(instr) = body.instr_mut(exit_branch) {
        instr.op = Op::Bge(done);
    }
    body
}

/// Prepends the startup check chain to the module initialiser, creating the
/// initialiser when absent. Chain order: native probes, managed flag, PEB,
/// heap, OutputDebugString, remote/trap, parent process, timing, environment
/// artefacts, integrity.
fn install_startup_chain(
    module: &mut Module,
    helper: &Helper,
    mode: AntiTamperMode,
    with_integrity: bool,
) {
    let mut checks: Vec<MethodId> = vec![helper.detect_native, helper.detect_managed];
    if mode >= AntiTamperMode::Normal {
        checks.extend([
            helper.detect_peb,
            helper.detect_heap,
            helper.detect_ods,
            helper.detect_remote,
        ]);
    }
    if mode >= AntiTamperMode::Heavy {
        checks.push(helper.detect_parent);
    }
    if mode >= AntiTamperMode::Normal {
        checks.extend([helper.detect_timing, helper.detect_env]);
    }
    if with_integrity {
        checks.extend(helper.verify_integrity);
    }

    let cctor = match module.static_initializer(module.global_type) {
        Some(id) => id,
        None => {
            let mut method = MethodDef::new(".cctor", module.global_type, Signature::empty());
            method.is_static = true;
            method.is_special_name = true;
            method.is_runtime_special = true;
            let mut body = MethodBody::new();
            body.push(Op::Ret);
            method.body = Some(body);
            module.add_method(method)
        }
    };

    let body = module.methods[cctor.0 as usize]
        .body
        .get_or_insert_with(|| {
            let mut b = MethodBody::new();
            b.push(Op::Ret);
            b
        });

    // Built back to front so each insert lands at index 0..2.
    for &check in checks.iter().rev() {
        let resume = body.first_id().expect("initialiser has a terminator");
        let call_id = body.insert_at(0, Op::Call(check));
        let _ = body.insert_after(call_id, Op::Brfalse(resume));
        let branch = body
            .index_of(call_id)
            .expect("just inserted");
        body.insert_at(branch + 2, Op::Call(helper.corrupt));
    }
}

/// Entry probe, plus periodic probes roughly every twenty instructions in
/// long bodies.
fn inject_probes(body: &mut MethodBody, check: MethodId, corrupt: MethodId) {
    let mut anchors: Vec<InstrId> = Vec::new();
    if let Some(first) = body.first_id() {
        anchors.push(first);
    }
    if body.len() > 50 {
        let mut index = 20;
        while index + 1 < body.len() {
            // Shift off branch neighbourhoods so the probe sits on a plain
            // fallthrough edge.
            let mut at = index;
            while at + 1 < body.len()
                && (body.instrs[at].op.is_branch() || body.instrs[at - 1].op.is_branch())
            {
                at += 1;
            }
            if at + 1 < body.len() {
                anchors.push(body.instrs[at].id);
            }
            index += 20;
        }
    }
    for anchor in anchors {
        let call_id = body
            .insert_before(anchor, Op::Call(check))
            .expect("anchor present");
        let branch_id = body
            .insert_after(call_id, Op::Brfalse(anchor))
            .expect("call present");
        let _ = body.insert_after(branch_id, Op::Call(corrupt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use umbra_core::Seed;

    fn module_with_methods(count: usize, body_len: usize) -> Module {
        let mut module = Module::new("app");
        let t = module.add_type(TypeDef::new("App", "Widget"));
        for index in 0..count {
            let mut method = MethodDef::new(format!("M{index}"), t, Signature::empty());
            let mut body = MethodBody::new();
            for _ in 0..body_len.saturating_sub(1) {
                body.push(Op::Nop);
            }
            body.push(Op::Ret);
            method.body = Some(body);
            module.add_method(method);
        }
        module
    }

    fn apply(module: &mut Module, config: Configuration) -> RunState {
        let mut state = RunState::new(config);
        AntiDebugPass.apply(module, &mut state).expect("apply");
        state
    }

    fn seeded_config() -> Configuration {
        Configuration::builder().seed(Seed::generate()).build()
    }

    #[test]
    fn fnv_matches_known_vector() {
        // FNV-1a 64 of empty input is the offset basis.
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn synthesises_helper_and_initialiser() {
        let mut module = module_with_methods(1, 3);
        apply(&mut module, seeded_config());

        let helper = module
            .types
            .iter()
            .find(|t| t.namespace.is_empty() && t.is_sealed && t.is_abstract)
            .expect("helper type injected");
        assert!(helper.methods.len() >= 10);

        // P/invoke declarations are metadata-only.
        let pinvokes: Vec<_> = module
            .methods
            .iter()
            .filter(|m| m.is_pinvoke())
            .collect();
        assert!(pinvokes.iter().any(|m| m.name == "IsDebuggerPresent"));
        assert!(pinvokes.iter().all(|m| m.body.is_none()));

        // The global type gained a static initialiser calling the chain.
        let cctor = module
            .static_initializer(module.global_type)
            .expect("module initialiser");
        let body = module.method(cctor).body.as_ref().unwrap();
        assert!(matches!(body.instrs[0].op, Op::Call(_)));
        assert!(body.references_resolve());
    }

    #[test]
    fn startup_chain_nets_zero_stack() {
        let mut module = module_with_methods(1, 3);
        apply(&mut module, seeded_config());
        let cctor = module.static_initializer(module.global_type).unwrap();
        let body = module.method(cctor).body.as_ref().unwrap();
        assert_eq!(body.stack_delta_of_range(&module, 0, body.len()), 0);
    }

    #[test]
    fn heavy_mode_probes_most_methods() {
        let mut module = module_with_methods(30, 6);
        let mut config = seeded_config();
        config.anti_tamper.mode = AntiTamperMode::Heavy;
        apply(&mut module, config);

        let probed = module
            .methods
            .iter()
            .filter(|m| {
                m.name.starts_with('M')
                    && m.body
                        .as_ref()
                        .is_some_and(|b| matches!(b.instrs[0].op, Op::Call(_)))
            })
            .count();
        assert!(probed >= 15, "only {probed} of 30 methods probed");
    }

    #[test]
    fn long_bodies_get_periodic_probes() {
        let mut body = MethodBody::new();
        for _ in 0..79 {
            body.push(Op::Nop);
        }
        body.push(Op::Ret);
        let check = MethodId(0);
        let corrupt = MethodId(1);
        inject_probes(&mut body, check, corrupt);
        let probe_calls = body
            .instrs
            .iter()
            .filter(|i| matches!(i.op, Op::Call(m) if m == check))
            .count();
        // Entry probe plus probes near instructions 20, 40, 60.
        assert_eq!(probe_calls, 4);
        assert!(body.references_resolve());
    }

    #[test]
    fn entry_probe_nets_zero_stack() {
        let mut module = module_with_methods(1, 3);
        let mut config = seeded_config();
        config.anti_tamper.mode = AntiTamperMode::Heavy;
        apply(&mut module, config);
        // Find a probed user method and check the injected prefix.
        for method in module.methods.iter().filter(|m| m.name.starts_with('M')) {
            let body = method.body.as_ref().unwrap();
            if matches!(body.instrs[0].op, Op::Call(_)) {
                assert_eq!(body.stack_delta_of_range(&module, 0, 3), 0);
            }
        }
    }

    #[test]
    fn exit_variant_when_corruption_disabled() {
        let mut module = module_with_methods(1, 3);
        let mut config = seeded_config();
        config.anti_tamper.corrupt_on_tamper = false;
        apply(&mut module, config);
        let has_exit_ref = module
            .ext_refs
            .iter()
            .any(|e| e.full_name == "System.Environment::Exit");
        assert!(has_exit_ref);
        // No null-throw corruption body in this configuration.
        let throws = module.methods.iter().any(|m| {
            m.body.as_ref().is_some_and(|b| {
                b.instrs
                    .windows(2)
                    .any(|w| matches!((&w[0].op, &w[1].op), (Op::LdNull, Op::Throw)))
            })
        });
        assert!(!throws);
    }

    #[test]
    fn helper_methods_are_never_probed() {
        let mut module = module_with_methods(2, 3);
        let mut config = seeded_config();
        config.anti_tamper.mode = AntiTamperMode::Heavy;
        apply(&mut module, config);
        let helper_type = module
            .types
            .iter()
            .position(|t| t.namespace.is_empty() && t.is_sealed && t.is_abstract)
            .map(|i| TypeId(i as u32))
            .unwrap();
        // Detection methods call pinvokes/ext refs, never each other in a
        // probe prefix followed by corrupt; recursion would hang the probe.
        for &m in &module.type_(helper_type).methods {
            let method = module.method(m);
            if let Some(body) = &method.body {
                let prefix_probe = body.len() >= 3
                    && matches!(body.instrs[0].op, Op::Call(_))
                    && matches!(body.instrs[1].op, Op::Brfalse(_));
                assert!(!prefix_probe, "helper method {} was probed", method.name);
            }
        }
    }
}
