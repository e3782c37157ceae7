//! Identifier rewriting with collision-free allocation and implicit
//! cross-reference repair.
//!
//! References between members are typed ids, so renaming mutates names in
//! place and every bytecode operand keeps resolving. The only references
//! that cannot follow a rename are reflection-style string literals; those
//! are left untouched and reported.

use crate::config::RenamingMode;
use crate::context::RunState;
use crate::diagnostics::Diagnostic;
use crate::naming::{NameAllocator, NameKind, NameScope};
use crate::{Error, Pass, Result};
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;
use umbra_core::{EventId, FieldId, MethodId, Module, Op, PropertyId, TypeId};

pub struct RenamingPass;

/// Full names of every member, captured before any mutation so the rename
/// map is keyed by pre-transform identifiers.
struct Originals {
    types: Vec<String>,
    methods: Vec<String>,
    fields: Vec<String>,
    properties: Vec<String>,
    events: Vec<String>,
}

impl Originals {
    fn capture(module: &Module) -> Self {
        let member = |type_id: TypeId, name: &str| {
            format!("{}::{}", module.type_(type_id).full_name(), name)
        };
        Self {
            types: module.types.iter().map(|t| t.full_name()).collect(),
            methods: module
                .methods
                .iter()
                .map(|m| member(m.declaring_type, &m.name))
                .collect(),
            fields: module
                .fields
                .iter()
                .map(|f| member(f.declaring_type, &f.name))
                .collect(),
            properties: module
                .properties
                .iter()
                .map(|p| member(p.declaring_type, &p.name))
                .collect(),
            events: module
                .events
                .iter()
                .map(|e| member(e.declaring_type, &e.name))
                .collect(),
        }
    }
}

impl Pass for RenamingPass {
    fn id(&self) -> &'static str {
        "renaming"
    }

    fn name(&self) -> &'static str {
        "Identifier renaming"
    }

    fn description(&self) -> &'static str {
        "Renames types, methods, fields, properties and events, repairing all structural references"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_apply(&self, module: &Module) -> bool {
        module.user_type_count() > 0
    }

    fn apply(&self, module: &mut Module, state: &mut RunState) -> Result<()> {
        if state.config.renaming.mode == RenamingMode::None {
            debug!("renaming mode is none, nothing to do");
            return Ok(());
        }

        let originals = Originals::capture(module);
        let mut scope = collect_scope(module);
        let mut allocator =
            NameAllocator::new(state.config.renaming.scheme, state.config.renaming.mode);

        let accessors = accessor_method_ids(module);
        let mut renamed_count = 0usize;

        for index in 0..module.types.len() {
            let type_id = TypeId(index as u32);
            if state.preservation().should_preserve_type(module, type_id) {
                continue;
            }
            let fresh = allocator.mint(state.rand(), &mut scope, NameKind::Type);
            state
                .rename_map
                .record(originals.types[index].clone(), fresh.clone());
            let type_def = module.type_mut(type_id);
            type_def.name = fresh;
            if state.config.renaming.flatten_namespaces {
                type_def.namespace = state
                    .config
                    .renaming
                    .namespace_prefix
                    .clone()
                    .unwrap_or_default();
            }
            renamed_count += 1;
        }

        renamed_count +=
            self.rename_methods(module, state, &mut allocator, &mut scope, &accessors, &originals);

        if state.config.renaming.rename_fields {
            renamed_count +=
                self.rename_fields(module, state, &mut allocator, &mut scope, &originals);
        }
        if state.config.renaming.rename_properties {
            renamed_count +=
                self.rename_properties(module, state, &mut allocator, &mut scope, &originals);
        }
        if state.config.renaming.rename_events {
            renamed_count +=
                self.rename_events(module, state, &mut allocator, &mut scope, &originals);
        }

        self.warn_on_reflection_strings(module, state);

        state.add_diagnostic(
            Diagnostic::info("REN001", format!("renamed {renamed_count} members"))
                .with_payload(json!({ "renamed": renamed_count })),
        );

        if state.config.renaming.generate_mapping_file {
            self.emit_mapping(state)?;
        }
        Ok(())
    }
}

impl RenamingPass {
    fn rename_methods(
        &self,
        module: &mut Module,
        state: &mut RunState,
        allocator: &mut NameAllocator,
        scope: &mut NameScope,
        accessors: &HashSet<MethodId>,
        originals: &Originals,
    ) -> usize {
        let mut renamed = 0;
        for index in 0..module.methods.len() {
            let id = MethodId(index as u32);
            // Accessors follow their owning property or event.
            if accessors.contains(&id) {
                continue;
            }
            if state.preservation().should_preserve_method(module, id) {
                continue;
            }
            let fresh = allocator.mint(state.rand(), scope, NameKind::Method);
            state
                .rename_map
                .record(originals.methods[index].clone(), fresh.clone());
            module.method_mut(id).name = fresh;
            renamed += 1;
        }
        renamed
    }

    fn rename_fields(
        &self,
        module: &mut Module,
        state: &mut RunState,
        allocator: &mut NameAllocator,
        scope: &mut NameScope,
        originals: &Originals,
    ) -> usize {
        let rename_enum_members = state.config.renaming.rename_enum_members;
        let mut renamed = 0;
        for index in 0..module.fields.len() {
            let id = FieldId(index as u32);
            let declaring = module.field(id).declaring_type;
            if module.type_(declaring).is_enum && !rename_enum_members {
                continue;
            }
            if state.preservation().should_preserve_field(module, id) {
                continue;
            }
            let fresh = allocator.mint(state.rand(), scope, NameKind::Field);
            state
                .rename_map
                .record(originals.fields[index].clone(), fresh.clone());
            module.field_mut(id).name = fresh;
            renamed += 1;
        }
        renamed
    }

    /// Renames a property to `X` and its accessors to `get_X` / `set_X`.
    fn rename_properties(
        &self,
        module: &mut Module,
        state: &mut RunState,
        allocator: &mut NameAllocator,
        scope: &mut NameScope,
        originals: &Originals,
    ) -> usize {
        let mut renamed = 0;
        for index in 0..module.properties.len() {
            let id = PropertyId(index as u32);
            if state.preservation().should_preserve_property(module, id) {
                continue;
            }
            let fresh = allocator.mint(state.rand(), scope, NameKind::Property);
            state
                .rename_map
                .record(originals.properties[index].clone(), fresh.clone());
            let property = module.property(id);
            let links = [(property.getter, "get"), (property.setter, "set")];
            for (method, prefix) in links {
                if let Some(m) = method {
                    let accessor = format!("{prefix}_{fresh}");
                    scope.register(accessor.clone());
                    state
                        .rename_map
                        .record(originals.methods[m.0 as usize].clone(), accessor.clone());
                    module.method_mut(m).name = accessor;
                }
            }
            module.property_mut(id).name = fresh;
            renamed += 1;
        }
        renamed
    }

    /// Renames an event to `X` and its accessors to `add_X` / `remove_X` /
    /// `raise_X`.
    fn rename_events(
        &self,
        module: &mut Module,
        state: &mut RunState,
        allocator: &mut NameAllocator,
        scope: &mut NameScope,
        originals: &Originals,
    ) -> usize {
        let mut renamed = 0;
        for index in 0..module.events.len() {
            let id = EventId(index as u32);
            if state.preservation().should_preserve_event(module, id) {
                continue;
            }
            let fresh = allocator.mint(state.rand(), scope, NameKind::Event);
            state
                .rename_map
                .record(originals.events[index].clone(), fresh.clone());
            let event = module.event(id);
            let links = [
                (event.add, "add"),
                (event.remove, "remove"),
                (event.raise, "raise"),
            ];
            for (method, prefix) in links {
                if let Some(m) = method {
                    let accessor = format!("{prefix}_{fresh}");
                    scope.register(accessor.clone());
                    state
                        .rename_map
                        .record(originals.methods[m.0 as usize].clone(), accessor.clone());
                    module.method_mut(m).name = accessor;
                }
            }
            module.event_mut(id).name = fresh;
            renamed += 1;
        }
        renamed
    }

    /// String-form references (reflection lookups) cannot be repaired
    /// structurally; leave them and warn.
    fn warn_on_reflection_strings(&self, module: &Module, state: &mut RunState) {
        let mut hits: Vec<(String, String)> = Vec::new();
        for method in &module.methods {
            let Some(body) = &method.body else { continue };
            for instr in &body.instrs {
                if let Op::LdStr(literal) = &instr.op {
                    if state.rename_map.contains(literal) {
                        hits.push((method.name.clone(), literal.clone()));
                    }
                }
            }
        }
        for (method, literal) in hits {
            state.add_diagnostic(Diagnostic::warning(
                "REN002",
                format!(
                    "string literal '{literal}' in '{method}' names a renamed member and was left unchanged"
                ),
            ));
        }
    }

    fn emit_mapping(&self, state: &mut RunState) -> Result<()> {
        let Some(output) = state.config.output_path.clone() else {
            return Ok(());
        };
        let mapping_path = output.with_extension("map.json");
        let entries: Vec<serde_json::Value> = state
            .rename_map
            .iter()
            .map(|(original, renamed)| json!({ "original": original, "renamed": renamed }))
            .collect();
        let raw = serde_json::to_string_pretty(&entries)
            .map_err(|e| Error::Core(umbra_core::Error::ModuleFormat(e)))?;
        std::fs::write(&mapping_path, raw).map_err(|source| {
            Error::Core(umbra_core::Error::FileWrite {
                path: mapping_path.display().to_string(),
                source,
            })
        })?;
        state.add_diagnostic(Diagnostic::info(
            "REN003",
            format!("wrote rename mapping to {}", mapping_path.display()),
        ));
        Ok(())
    }
}

/// Every name currently used anywhere in the module.
fn collect_scope(module: &Module) -> NameScope {
    let mut scope = NameScope::new();
    for type_def in &module.types {
        scope.register(type_def.name.clone());
        scope.register(type_def.full_name());
    }
    for method in &module.methods {
        scope.register(method.name.clone());
    }
    for field in &module.fields {
        scope.register(field.name.clone());
    }
    for property in &module.properties {
        scope.register(property.name.clone());
    }
    for event in &module.events {
        scope.register(event.name.clone());
    }
    scope
}

/// Methods reachable as property or event accessors.
fn accessor_method_ids(module: &Module) -> HashSet<MethodId> {
    let mut ids = HashSet::new();
    for property in &module.properties {
        ids.extend(property.getter);
        ids.extend(property.setter);
    }
    for event in &module.events {
        ids.extend(event.add);
        ids.extend(event.remove);
        ids.extend(event.raise);
    }
    ids
}
