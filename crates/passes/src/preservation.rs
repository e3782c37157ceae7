//! Central exclusion rules. Every pass consults this policy before mutating
//! a member, so the skip-list lives in exactly one place.

use crate::config::Configuration;
use std::collections::BTreeSet;
use umbra_core::{EventId, FieldId, MethodId, Module, PropertyId, TypeId, Visibility};

/// Decides which members a run must leave untouched.
#[derive(Debug, Clone)]
pub struct PreservationPolicy {
    preserved_prefixes: Vec<String>,
    excluded_namespaces: BTreeSet<String>,
    excluded_types: BTreeSet<String>,
    excluded_methods: BTreeSet<String>,
    preserve_public_api: bool,
    preserve_virtual_dispatch: bool,
    preserve_custom_attributes: bool,
}

impl PreservationPolicy {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            preserved_prefixes: config.preserved_prefixes.clone(),
            excluded_namespaces: config.excluded_namespaces.clone(),
            excluded_types: config.excluded_types.clone(),
            excluded_methods: config.excluded_methods.clone(),
            preserve_public_api: config.preserve_public_api,
            // Renaming across virtual slots is not attempted; see DESIGN.md.
            preserve_virtual_dispatch: true,
            preserve_custom_attributes: config.preserve_custom_attributes,
        }
    }

    /// True when `full_name` belongs to the framework by prefix.
    pub fn is_framework_name(&self, full_name: &str) -> bool {
        self.preserved_prefixes
            .iter()
            .any(|p| full_name.starts_with(p))
    }

    pub fn preserve_attributes(&self) -> bool {
        self.preserve_custom_attributes
    }

    /// True when the type itself must keep its name.
    pub fn should_preserve_type(&self, module: &Module, id: TypeId) -> bool {
        let type_def = module.type_(id);
        if type_def.is_global || type_def.is_special_name || type_def.is_runtime_special {
            return true;
        }
        let full = type_def.full_name();
        if self.is_framework_name(&full) {
            return true;
        }
        if self.excluded_types.contains(&full)
            || self.excluded_namespaces.contains(&type_def.namespace)
        {
            return true;
        }
        if self.preserve_public_api && type_def.visibility == Visibility::Public {
            return true;
        }
        false
    }

    /// True when the method must keep its name. Checks run in declaration
    /// order: special flags, constructors, explicit exclusions, containing
    /// type, public surface, virtual dispatch, p/invoke.
    pub fn should_preserve_method(&self, module: &Module, id: MethodId) -> bool {
        let method = module.method(id);
        if method.is_runtime_special || method.is_special_name {
            return true;
        }
        if method.is_constructor() {
            return true;
        }
        let full = module.method_full_name(id);
        if self.excluded_methods.contains(&full) {
            return true;
        }
        let declaring = module.type_(method.declaring_type);
        if self.excluded_namespaces.contains(&declaring.namespace)
            || self.excluded_types.contains(&declaring.full_name())
            || self.is_framework_name(&declaring.full_name())
        {
            return true;
        }
        if self.preserve_public_api && method.is_public {
            return true;
        }
        if self.preserve_virtual_dispatch && (method.is_virtual || method.has_overrides) {
            return true;
        }
        if method.is_pinvoke() {
            return true;
        }
        // Operator overloads resolve by name.
        if method.name.starts_with("op_") {
            return true;
        }
        false
    }

    pub fn should_preserve_field(&self, module: &Module, id: FieldId) -> bool {
        let field = module.field(id);
        if field.is_special_name {
            return true;
        }
        let declaring = module.type_(field.declaring_type);
        if self.excluded_namespaces.contains(&declaring.namespace)
            || self.excluded_types.contains(&declaring.full_name())
            || self.is_framework_name(&declaring.full_name())
        {
            return true;
        }
        if self.preserve_public_api && field.is_public {
            return true;
        }
        false
    }

    /// A property preserves when either accessor does.
    pub fn should_preserve_property(&self, module: &Module, id: PropertyId) -> bool {
        let property = module.property(id);
        let declaring = module.type_(property.declaring_type);
        if self.excluded_namespaces.contains(&declaring.namespace)
            || self.excluded_types.contains(&declaring.full_name())
        {
            return true;
        }
        property
            .getter
            .into_iter()
            .chain(property.setter)
            .any(|m| self.accessor_pins_owner(module, m))
    }

    /// An event preserves when any accessor does.
    pub fn should_preserve_event(&self, module: &Module, id: EventId) -> bool {
        let event = module.event(id);
        let declaring = module.type_(event.declaring_type);
        if self.excluded_namespaces.contains(&declaring.namespace)
            || self.excluded_types.contains(&declaring.full_name())
        {
            return true;
        }
        event
            .add
            .into_iter()
            .chain(event.remove)
            .chain(event.raise)
            .any(|m| self.accessor_pins_owner(module, m))
    }

    /// Exclusion test for passes that rewrite bodies rather than names.
    pub fn is_method_excluded(&self, module: &Module, id: MethodId) -> bool {
        let method = module.method(id);
        let declaring = module.type_(method.declaring_type);
        self.excluded_methods.contains(&module.method_full_name(id))
            || self.excluded_types.contains(&declaring.full_name())
            || self.excluded_namespaces.contains(&declaring.namespace)
    }

    // Accessor-name preservation propagates to the owning property/event,
    // ignoring the special-name flag every accessor carries.
    fn accessor_pins_owner(&self, module: &Module, id: MethodId) -> bool {
        let method = module.method(id);
        if self.preserve_public_api && method.is_public {
            return true;
        }
        if self.preserve_virtual_dispatch && (method.is_virtual || method.has_overrides) {
            return true;
        }
        self.excluded_methods
            .contains(&module.method_full_name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::{MethodDef, Signature, TypeDef};

    fn module_with_type(ns: &str, name: &str) -> (Module, TypeId) {
        let mut module = Module::new("test");
        let t = module.add_type(TypeDef::new(ns, name));
        (module, t)
    }

    #[test]
    fn global_type_always_preserves() {
        let module = Module::new("test");
        let policy = PreservationPolicy::from_config(&Configuration::default());
        assert!(policy.should_preserve_type(&module, module.global_type));
    }

    #[test]
    fn excluded_type_preserves_members() {
        let (mut module, t) = module_with_type("Keep", "Me");
        let m = module.add_method(MethodDef::new("Run", t, Signature::empty()));
        let config = Configuration::builder().exclude_type("Keep.Me").build();
        let policy = PreservationPolicy::from_config(&config);
        assert!(policy.should_preserve_type(&module, t));
        assert!(policy.should_preserve_method(&module, m));
    }

    #[test]
    fn constructors_and_operators_preserve() {
        let (mut module, t) = module_with_type("App", "Widget");
        let ctor = module.add_method(MethodDef::new(".ctor", t, Signature::empty()));
        let op = module.add_method(MethodDef::new("op_Equality", t, Signature::empty()));
        let plain = module.add_method(MethodDef::new("Run", t, Signature::empty()));
        let policy = PreservationPolicy::from_config(&Configuration::default());
        assert!(policy.should_preserve_method(&module, ctor));
        assert!(policy.should_preserve_method(&module, op));
        assert!(!policy.should_preserve_method(&module, plain));
    }

    #[test]
    fn public_api_preservation_is_configurable() {
        let (mut module, t) = module_with_type("App", "Widget");
        let mut method = MethodDef::new("Run", t, Signature::empty());
        method.is_public = true;
        let m = module.add_method(method);

        let keep = PreservationPolicy::from_config(&Configuration::default());
        assert!(keep.should_preserve_method(&module, m));

        let strip = PreservationPolicy::from_config(
            &Configuration::builder().preserve_public_api(false).build(),
        );
        assert!(!strip.should_preserve_method(&module, m));
    }

    #[test]
    fn virtual_members_pin_under_dispatch_preservation() {
        let (mut module, t) = module_with_type("App", "Widget");
        let mut method = MethodDef::new("Render", t, Signature::empty());
        method.is_virtual = true;
        let m = module.add_method(method);
        let policy = PreservationPolicy::from_config(
            &Configuration::builder().preserve_public_api(false).build(),
        );
        assert!(policy.should_preserve_method(&module, m));
    }
}
