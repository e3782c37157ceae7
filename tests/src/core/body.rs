use umbra_core::{InstrId, MethodBody, Module, Op, TypeSig};

#[test]
fn empty_bodies_are_accepted_everywhere() {
    let body = MethodBody::new();
    assert!(body.is_empty());
    assert!(body.references_resolve());
    assert!(body.reachable_ids().is_empty());
    assert_eq!(body.first_id(), None);
}

#[test]
fn insertion_preserves_branch_identity() {
    let mut body = MethodBody::new();
    let a = body.push(Op::LdcI4(1));
    let ret = body.push(Op::Ret);
    let br = body.insert_after(a, Op::Br(ret)).unwrap();

    // Pile instructions around the branch target.
    for _ in 0..10 {
        let _ = body.insert_before(ret, Op::Nop);
    }
    assert!(body.references_resolve());
    let Op::Br(target) = body.instr(br).unwrap().op else {
        panic!("branch rewritten");
    };
    assert_eq!(target, ret);
}

#[test]
fn switch_tables_survive_reordering() {
    let mut body = MethodBody::new();
    let b0 = body.push(Op::LdcI4(0));
    let b1 = body.push(Op::LdcI4(1));
    let b2 = body.push(Op::Ret);
    body.insert_at(0, Op::Switch(vec![b0, b1, b2]));

    let mut reversed = body.instrs.clone();
    reversed.reverse();
    body.replace_instrs(reversed);
    assert!(body.references_resolve());
}

#[test]
fn locals_index_in_declaration_order() {
    let mut body = MethodBody::new();
    let a = body.add_local("a", TypeSig::I4);
    let b = body.add_local("b", TypeSig::Str);
    assert_eq!(a.0, 0);
    assert_eq!(b.0, 1);
    assert_eq!(body.locals.len(), 2);
}

#[test]
fn stack_delta_accounts_for_signatures() {
    use umbra_core::{MethodDef, Signature, TypeDef};
    let mut module = Module::new("sig");
    let t = module.add_type(TypeDef::new("App", "X"));
    let mut callee = MethodDef::new(
        "TwoArgsOneRet",
        t,
        Signature::new(vec![TypeSig::I4, TypeSig::I4], TypeSig::I4),
    );
    callee.is_static = true;
    let callee = module.add_method(callee);

    assert_eq!(Op::Call(callee).stack_delta(&module), -1);
    assert_eq!(Op::LdcI4(1).stack_delta(&module), 1);
    assert_eq!(Op::Switch(vec![InstrId(0)]).stack_delta(&module), -1);
}
