//! Pipeline-level behaviour: supervision, ordering, cycles.

use crate::fixtures;
use umbra_core::{Module, Seed};
use umbra_passes::config::Configuration;
use umbra_passes::context::RunState;
use umbra_passes::protector::{build_registry, run_pipeline};
use umbra_passes::{Error, Pass};

struct NamedPass {
    id: &'static str,
    deps: &'static [&'static str],
    fail: bool,
}

impl Pass for NamedPass {
    fn id(&self) -> &'static str {
        self.id
    }
    fn name(&self) -> &'static str {
        self.id
    }
    fn description(&self) -> &'static str {
        "test pass"
    }
    fn dependencies(&self) -> &'static [&'static str] {
        self.deps
    }
    fn can_apply(&self, _module: &Module) -> bool {
        true
    }
    fn apply(&self, module: &mut Module, _state: &mut RunState) -> umbra_passes::Result<()> {
        if self.fail {
            return Err(Error::PassFailed {
                pass: self.id.to_string(),
                message: "intentional".into(),
            });
        }
        // Leave a visible mutation so ordering tests can observe it.
        module.attributes.push(umbra_core::CustomAttribute {
            ctor: "TraceAttribute::.ctor".into(),
            argument: self.id.to_string(),
        });
        Ok(())
    }
}

fn boxed(id: &'static str, deps: &'static [&'static str], fail: bool) -> Box<dyn Pass> {
    Box::new(NamedPass { id, deps, fail })
}

#[test]
fn dependency_cycle_fails_before_any_mutation() {
    let mut module = fixtures::trivial_module();
    let pristine = serde_json::to_string(&module).unwrap();
    let mut state = RunState::new(Configuration::default());
    let passes = vec![boxed("a", &["b"], false), boxed("b", &["a"], false)];

    let err = run_pipeline(&mut module, &mut state, &passes).unwrap_err();
    assert!(matches!(err, Error::DependencyCycle(_)));
    assert_eq!(serde_json::to_string(&module).unwrap(), pristine);
}

#[test]
fn dependencies_execute_in_order() {
    let mut module = fixtures::trivial_module();
    let mut state = RunState::new(Configuration::default());
    let passes = vec![boxed("late", &["early"], false), boxed("early", &[], false)];

    run_pipeline(&mut module, &mut state, &passes).unwrap();
    let trace: Vec<&str> = module
        .attributes
        .iter()
        .filter(|a| a.ctor.starts_with("Trace"))
        .map(|a| a.argument.as_str())
        .collect();
    assert_eq!(trace, vec!["early", "late"]);
}

#[test]
fn failed_pass_is_recorded_and_following_passes_run() {
    let mut module = fixtures::trivial_module();
    let mut state = RunState::new(Configuration::default());
    let passes = vec![boxed("broken", &[], true), boxed("after", &["broken"], false)];

    let report = run_pipeline(&mut module, &mut state, &passes).unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.applied, vec!["after".to_string()]);
    assert!(!state.is_applied("broken"));
    assert!(state.is_applied("after"));
}

#[test]
fn full_debug_mode_reraises_pass_failure() {
    let mut module = fixtures::trivial_module();
    let mut config = Configuration::default();
    config.debug_mode = umbra_passes::config::DebugMode::Full;
    let mut state = RunState::new(config);
    let passes = vec![boxed("broken", &[], true)];

    assert!(matches!(
        run_pipeline(&mut module, &mut state, &passes),
        Err(Error::PassFailed { .. })
    ));
}

#[test]
fn applied_ids_are_distinct_and_subset_of_enabled() {
    let mut module = fixtures::trivial_module();
    let mut state = RunState::new(
        Configuration::builder()
            .seed(Seed::generate())
            .preserve_public_api(false)
            .build(),
    );
    let passes = build_registry(&state.config.clone(), &mut state);
    let enabled: Vec<String> = passes.iter().map(|p| p.id().to_string()).collect();

    let report = run_pipeline(&mut module, &mut state, &passes).unwrap();
    let mut seen = std::collections::HashSet::new();
    for id in &report.applied {
        assert!(seen.insert(id.clone()), "duplicate applied id {id}");
        assert!(enabled.contains(id), "{id} applied but not enabled");
    }
}

#[test]
fn skipped_pass_leaves_a_diagnostic() {
    // A module with only the global type: renaming's can_apply is false.
    let mut module = Module::new("bare");
    let mut state = RunState::new(Configuration::default());
    let passes = build_registry(&state.config.clone(), &mut state);

    run_pipeline(&mut module, &mut state, &passes).unwrap();
    assert!(state
        .diagnostics()
        .iter()
        .any(|d| d.code == "ORC001" && d.message.contains("renaming")));
}
