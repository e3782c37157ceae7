//! End-to-end protection scenarios over the full `Protector` entry point.

use crate::fixtures;
use std::path::Path;
use umbra_core::{JsonModuleIo, Module, ModuleIo, Op, Seed};
use umbra_passes::config::{Configuration, OptimizationLevel, ProtectionLevel};
use umbra_passes::protector::Protector;
use umbra_passes::watermark::WATERMARK_ATTRIBUTE;

fn write_fixture(module: &Module, name: &str) -> std::path::PathBuf {
    let path = fixtures::temp_path(name);
    JsonModuleIo::new().write(module, &path).expect("fixture");
    path
}

fn literals(module: &Module) -> Vec<String> {
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

fn cleanup(paths: &[&Path]) {
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn default_pipeline_on_trivial_module() {
    let input = write_fixture(&fixtures::trivial_module(), "e2e_default_in.json");
    let output = fixtures::temp_path("e2e_default_out.json");
    let config = Configuration::builder()
        .seed(Seed::generate())
        .preserve_public_api(false)
        .output_path(&output)
        .build();

    let result = Protector::new().protect(&input, config);
    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.applied.contains(&"renaming".to_string()));
    assert!(result.applied.contains(&"string-encryption".to_string()));
    assert!(result.applied.contains(&"watermarking".to_string()));

    let protected = JsonModuleIo::new().load(&output).expect("output parses");
    cleanup(&[&input, &output]);

    // The original names are gone.
    assert!(protected.find_type("App.T").is_none());
    assert!(!protected.methods.iter().any(|m| m.name == "Greet"));
    // The literal is gone; a synthesised global-namespace helper carries
    // blobs and a decryptor.
    assert!(literals(&protected).iter().all(|s| s != "hi"));
    assert!(protected
        .types
        .iter()
        .any(|t| t.namespace.is_empty() && t.is_sealed && t.is_abstract));
    assert!(protected
        .fields
        .iter()
        .any(|f| f.is_static && f.initial_value.is_some()));
    // Watermark attribute present on the module.
    assert!(protected
        .attributes
        .iter()
        .any(|a| a.ctor == WATERMARK_ATTRIBUTE));
}

#[test]
fn renaming_disabled_keeps_names_but_encrypts() {
    let input = write_fixture(&fixtures::trivial_module(), "e2e_norename_in.json");
    let output = fixtures::temp_path("e2e_norename_out.json");
    let config = Configuration::builder()
        .seed(Seed::generate())
        .renaming(false)
        .output_path(&output)
        .build();

    let result = Protector::new().protect(&input, config);
    assert!(result.success);
    assert!(!result.applied.contains(&"renaming".to_string()));

    let protected = JsonModuleIo::new().load(&output).unwrap();
    cleanup(&[&input, &output]);

    assert!(protected.find_type("App.T").is_some());
    assert!(protected.methods.iter().any(|m| m.name == "Greet"));
    assert!(literals(&protected).iter().all(|s| s != "hi"));
}

#[test]
fn flattening_three_instruction_method() {
    let (module, id) = fixtures::three_instruction_module();
    let input = write_fixture(&module, "e2e_flatten_in.json");
    let output = fixtures::temp_path("e2e_flatten_out.json");
    let mut config = Configuration::builder()
        .seed(Seed::generate())
        .renaming(false)
        .string_encryption(false)
        .anti_debug(false)
        .anti_tamper(false)
        .watermarking(false)
        .output_path(&output)
        .build();
    // Leave the dispatcher visible for assertions.
    config.optimization = OptimizationLevel::None;

    let result = Protector::new().protect(&input, config);
    assert!(result.success);
    assert_eq!(result.applied, vec!["control-flow".to_string()]);

    let protected = JsonModuleIo::new().load(&output).unwrap();
    cleanup(&[&input, &output]);

    let body = protected.method(id).body.as_ref().unwrap();
    // State init, branch to the switch header, a switch over the blocks.
    assert!(matches!(body.instrs[0].op, Op::LdcI4(0)));
    assert!(matches!(body.instrs[1].op, Op::Stloc(_)));
    assert!(matches!(body.instrs[2].op, Op::Br(_)));
    let switch = body
        .instrs
        .iter()
        .find_map(|i| match &i.op {
            Op::Switch(targets) => Some(targets.clone()),
            _ => None,
        })
        .expect("dispatcher switch present");
    assert_eq!(switch.len(), 2);
    assert!(body.references_resolve());
    // Both original constants and the return survive.
    let zeros = body
        .instrs
        .iter()
        .filter(|i| matches!(i.op, Op::LdcI4(0)))
        .count();
    assert!(zeros >= 3, "state init plus the two original constants");
    assert!(body.instrs.iter().any(|i| matches!(i.op, Op::Ret)));
}

#[test]
fn excluded_type_keeps_its_name() {
    let input = write_fixture(&fixtures::two_type_module(), "e2e_exclude_in.json");
    let output = fixtures::temp_path("e2e_exclude_out.json");
    let config = Configuration::builder()
        .seed(Seed::generate())
        .preserve_public_api(false)
        .exclude_type("Keep.Me")
        .output_path(&output)
        .build();

    let result = Protector::new().protect(&input, config);
    assert!(result.success);

    let protected = JsonModuleIo::new().load(&output).unwrap();
    cleanup(&[&input, &output]);

    assert!(protected.find_type("Keep.Me").is_some());
    assert!(protected.find_type("Obf.Us").is_none());
}

#[test]
fn missing_input_fails_without_output() {
    let output = fixtures::temp_path("e2e_missing_out.json");
    let config = Configuration::builder()
        .output_path(&output)
        .build();
    let result = Protector::new().protect(Path::new("/nonexistent/module.json"), config);
    assert!(!result.success);
    assert!(result.errors[0].contains("could not read file"));
    assert!(!output.exists());
}

#[test]
fn disabled_pipeline_is_a_structural_no_op() {
    let module = fixtures::trivial_module();
    let input = write_fixture(&module, "e2e_noop_in.json");
    let output = fixtures::temp_path("e2e_noop_out.json");
    let mut config = Configuration::from_level(ProtectionLevel::None);
    config.output_path = Some(output.clone());
    config.optimization = OptimizationLevel::None;

    let result = Protector::new().protect(&input, config);
    assert!(result.success);
    assert!(result.applied.is_empty());

    let protected = JsonModuleIo::new().load(&output).unwrap();
    cleanup(&[&input, &output]);
    assert_eq!(
        serde_json::to_string(&module).unwrap(),
        serde_json::to_string(&protected).unwrap()
    );
}

#[test]
fn fixed_seed_reproduces_output_bytes() {
    let seed = Seed::generate();
    // One fixture serves both runs; module identity must not vary between
    // them.
    let module = fixtures::trivial_module();
    let run = |tag: &str| {
        let input = write_fixture(&module, &format!("e2e_seed_in_{tag}.json"));
        let output = fixtures::temp_path(&format!("e2e_seed_out_{tag}.json"));
        let config = Configuration::builder()
            .seed(seed.clone())
            .preserve_public_api(false)
            .output_path(&output)
            .build();
        let result = Protector::new().protect(&input, config);
        assert!(result.success);
        let bytes = std::fs::read_to_string(&output).unwrap();
        cleanup(&[&input, &output]);
        bytes
    };
    assert_eq!(run("a"), run("b"));
}

#[test]
fn mapping_file_lands_beside_the_output() {
    let input = write_fixture(&fixtures::two_type_module(), "e2e_mapping_in.json");
    let output = fixtures::temp_path("e2e_mapping_out.json");
    let config = Configuration::builder()
        .seed(Seed::generate())
        .preserve_public_api(false)
        .mapping_file(true)
        .output_path(&output)
        .build();

    let result = Protector::new().protect(&input, config);
    assert!(result.success);

    let mapping_path = output.with_extension("map.json");
    let raw = std::fs::read_to_string(&mapping_path).expect("mapping written");
    cleanup(&[&input, &output, &mapping_path]);

    let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert!(!entries.is_empty());
    assert!(entries
        .iter()
        .any(|e| e["original"].as_str() == Some("Obf.Us")));
}
