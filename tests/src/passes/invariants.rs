//! Quantified invariants over single passes and pass combinations.

use crate::fixtures;
use umbra_core::{InstrId, Module, Op, Seed};
use umbra_passes::config::Configuration;
use umbra_passes::context::RunState;
use umbra_passes::control_flow::ControlFlowPass;
use umbra_passes::renaming::RenamingPass;
use umbra_passes::string_encryption::{decrypt_reference, StringEncryptionPass};
use umbra_passes::Pass;

fn seeded_config() -> Configuration {
    Configuration::builder()
        .seed(Seed::generate())
        .preserve_public_api(false)
        .build()
}

fn literal_instructions(module: &Module) -> Vec<String> {
    module
        .methods
        .iter()
        .filter_map(|m| m.body.as_ref())
        .flat_map(|b| &b.instrs)
        .filter_map(|i| match &i.op {
            Op::LdStr(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn no_eligible_literal_survives_encryption() {
    let mut module = Module::new("lits");
    let t = module.add_type(umbra_core::TypeDef::new("App", "X"));
    for (index, literal) in ["first secret", "second secret", "first secret"]
        .iter()
        .enumerate()
    {
        fixtures::add_method(
            &mut module,
            t,
            &format!("M{index}"),
            vec![Op::LdStr(literal.to_string()), Op::Ret],
        );
    }

    let mut state = RunState::new(seeded_config());
    StringEncryptionPass.apply(&mut module, &mut state).unwrap();

    assert!(literal_instructions(&module)
        .iter()
        .all(|s| s != "first secret" && s != "second secret"));
    // Registry decrypts back to the originals.
    for plaintext in ["first secret", "second secret"] {
        let entry = state.strings.lookup(plaintext).unwrap();
        assert_eq!(decrypt_reference(entry), plaintext);
    }
}

#[test]
fn renamed_members_leave_no_stale_structural_name() {
    let mut module = Module::new("names");
    let t = module.add_type(umbra_core::TypeDef::new("App", "Widget"));
    fixtures::add_method(&mut module, t, "Render", vec![Op::LdcI4(1), Op::Ret]);

    let mut state = RunState::new(seeded_config());
    RenamingPass.apply(&mut module, &mut state).unwrap();

    // Structural lookups by old names fail, lookups by new names succeed.
    assert!(module.find_type("App.Widget").is_none());
    for (original, renamed) in state.rename_map.iter() {
        assert_ne!(original, renamed);
        if original.contains("::") {
            continue;
        }
        let new_full = if state.config.renaming.flatten_namespaces {
            renamed.to_string()
        } else {
            format!("App.{renamed}")
        };
        assert!(module.find_type(&new_full).is_some(), "{new_full} missing");
    }
}

#[test]
fn flattening_preserves_reachable_instruction_set() {
    let (mut module, id) = fixtures::three_instruction_module();
    let original: Vec<InstrId> = module
        .method(id)
        .body
        .as_ref()
        .unwrap()
        .instrs
        .iter()
        .map(|i| i.id)
        .collect();

    let mut state = RunState::new(seeded_config());
    ControlFlowPass.apply(&mut module, &mut state).unwrap();

    let body = module.method(id).body.as_ref().unwrap();
    let reachable = body.reachable_ids();
    for instr_id in original {
        assert!(reachable.contains(&instr_id));
    }
    assert!(body.references_resolve());
}

#[test]
fn flattening_keeps_original_instructions_exactly_once() {
    let (mut module, id) = fixtures::three_instruction_module();
    let original: Vec<InstrId> = module
        .method(id)
        .body
        .as_ref()
        .unwrap()
        .instrs
        .iter()
        .map(|i| i.id)
        .collect();

    let mut state = RunState::new(seeded_config());
    ControlFlowPass.apply(&mut module, &mut state).unwrap();

    let body = module.method(id).body.as_ref().unwrap();
    for instr_id in &original {
        let occurrences = body.instrs.iter().filter(|i| i.id == *instr_id).count();
        assert_eq!(occurrences, 1, "{instr_id} duplicated or dropped");
    }
    // The default exit adds a second return; the original one survives.
    let returns = body
        .instrs
        .iter()
        .filter(|i| matches!(i.op, Op::Ret))
        .count();
    assert_eq!(returns, 2);
}

#[test]
fn rename_then_encrypt_compose() {
    let mut module = fixtures::trivial_module();
    let seed = Seed::generate();
    let config = Configuration::builder()
        .seed(seed)
        .preserve_public_api(false)
        .build();
    let mut state = RunState::new(config);

    RenamingPass.apply(&mut module, &mut state).unwrap();
    StringEncryptionPass.apply(&mut module, &mut state).unwrap();

    assert!(module.find_type("App.T").is_none());
    assert!(literal_instructions(&module).iter().all(|s| s != "hi"));
    assert!(state.is_applied("renaming") || !state.rename_map.is_empty());
}
