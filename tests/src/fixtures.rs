//! Programmatic module fixtures shared across the integration tests.

use umbra_core::{
    MethodBody, MethodDef, MethodId, Module, Op, Signature, TypeDef, TypeId, TypeSig,
};

/// One type `App.T` with a static `Greet` returning the literal `"hi"`.
pub fn trivial_module() -> Module {
    let mut module = Module::new("trivial");
    let t = module.add_type(TypeDef::new("App", "T"));
    let mut method = MethodDef::new("Greet", t, Signature::new(vec![], TypeSig::Str));
    method.is_static = true;
    let mut body = MethodBody::new();
    body.push(Op::LdStr("hi".into()));
    body.push(Op::Ret);
    method.body = Some(body);
    module.add_method(method);
    module
}

/// Adds a type with one static method built from `ops`.
pub fn add_method(
    module: &mut Module,
    type_id: TypeId,
    name: &str,
    ops: Vec<Op>,
) -> MethodId {
    let mut method = MethodDef::new(name, type_id, Signature::new(vec![], TypeSig::I4));
    method.is_static = true;
    let mut body = MethodBody::new();
    for op in ops {
        body.push(op);
    }
    method.body = Some(body);
    module.add_method(method)
}

/// Two types, `Keep.Me` and `Obf.Us`, each with a small method.
pub fn two_type_module() -> Module {
    let mut module = Module::new("pair");
    let keep = module.add_type(TypeDef::new("Keep", "Me"));
    let obf = module.add_type(TypeDef::new("Obf", "Us"));
    add_method(
        &mut module,
        keep,
        "Stay",
        vec![Op::LdcI4(1), Op::Ret],
    );
    add_method(
        &mut module,
        obf,
        "Hide",
        vec![Op::LdcI4(2), Op::Ret],
    );
    module
}

/// A module whose single method is the three-instruction straight line
/// `[ldc 0, ldc 0, ret]`.
pub fn three_instruction_module() -> (Module, MethodId) {
    let mut module = Module::new("tiny");
    let t = module.add_type(TypeDef::new("App", "Tiny"));
    let id = add_method(
        &mut module,
        t,
        "Zero",
        vec![Op::LdcI4(0), Op::LdcI4(0), Op::Ret],
    );
    (module, id)
}

/// Unique temp-file path for a test artefact.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("umbra_tests_{name}"))
}
