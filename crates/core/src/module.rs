//! Mutable metadata graph for a managed module.
//!
//! Members live in flat arenas on [`Module`]; types hold id lists into those
//! arenas. Every cross-reference is a typed id, so renaming a member repairs
//! all references implicitly and nothing dangles when instruction streams are
//! rewritten.

use crate::body::MethodBody;
use serde::{Deserialize, Serialize};

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(
    /// Index into [`Module::types`].
    TypeId
);
arena_id!(
    /// Index into [`Module::methods`].
    MethodId
);
arena_id!(
    /// Index into [`Module::fields`].
    FieldId
);
arena_id!(
    /// Index into [`Module::properties`].
    PropertyId
);
arena_id!(
    /// Index into [`Module::events`].
    EventId
);
arena_id!(
    /// Index into [`Module::ext_refs`].
    ExtRefId
);

/// Member accessibility. Nested visibility collapses onto these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

/// Type of a field, local, parameter, or return slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeSig {
    Void,
    Bool,
    I4,
    I8,
    R8,
    Str,
    Bytes,
    Object,
    Class(TypeId),
    Array(Box<TypeSig>),
}

/// Method parameter list and return slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<TypeSig>,
    pub ret: TypeSig,
}

impl Signature {
    pub fn new(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        Self { params, ret }
    }

    /// `() -> void`
    pub fn empty() -> Self {
        Self::new(Vec::new(), TypeSig::Void)
    }

    pub fn returns_value(&self) -> bool {
        self.ret != TypeSig::Void
    }
}

/// A custom attribute instance: constructor name plus its literal argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttribute {
    pub ctor: String,
    pub argument: String,
}

/// Reference to a member of another assembly. Opaque to every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub assembly: String,
    /// `Namespace.Type::Member`
    pub full_name: String,
    pub params: usize,
    pub returns_value: bool,
}

/// A type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub visibility: Visibility,
    pub is_sealed: bool,
    pub is_abstract: bool,
    pub is_interface: bool,
    pub is_enum: bool,
    pub is_special_name: bool,
    pub is_runtime_special: bool,
    /// Marks the synthetic module-scope container.
    pub is_global: bool,
    pub methods: Vec<MethodId>,
    pub fields: Vec<FieldId>,
    pub properties: Vec<PropertyId>,
    pub events: Vec<EventId>,
    pub attributes: Vec<CustomAttribute>,
}

impl TypeDef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            visibility: Visibility::Internal,
            is_sealed: false,
            is_abstract: false,
            is_interface: false,
            is_enum: false,
            is_special_name: false,
            is_runtime_special: false,
            is_global: false,
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// `Namespace.Name`, or just `Name` for the empty namespace.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A method definition, or a p/invoke declaration when `pinvoke_module` is
/// set and `body` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub signature: Signature,
    pub is_static: bool,
    pub is_public: bool,
    pub is_virtual: bool,
    /// Set when another method overrides this one or this overrides a base
    /// or interface slot; such members stay pinned under virtual dispatch.
    pub has_overrides: bool,
    pub is_special_name: bool,
    pub is_runtime_special: bool,
    pub pinvoke_module: Option<String>,
    pub body: Option<MethodBody>,
    pub attributes: Vec<CustomAttribute>,
}

impl MethodDef {
    pub fn new(name: impl Into<String>, declaring_type: TypeId, signature: Signature) -> Self {
        Self {
            name: name.into(),
            declaring_type,
            signature,
            is_static: false,
            is_public: false,
            is_virtual: false,
            has_overrides: false,
            is_special_name: false,
            is_runtime_special: false,
            pinvoke_module: None,
            body: None,
            attributes: Vec::new(),
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == ".cctor"
    }

    pub fn is_pinvoke(&self) -> bool {
        self.pinvoke_module.is_some()
    }
}

/// A field definition. `initial_value` is the metadata blob backing
/// module-static byte arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub sig: TypeSig,
    pub is_static: bool,
    pub is_public: bool,
    pub is_special_name: bool,
    pub initial_value: Option<Vec<u8>>,
    pub attributes: Vec<CustomAttribute>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, declaring_type: TypeId, sig: TypeSig) -> Self {
        Self {
            name: name.into(),
            declaring_type,
            sig,
            is_static: false,
            is_public: false,
            is_special_name: false,
            initial_value: None,
            attributes: Vec::new(),
        }
    }
}

/// A property and its accessor linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
    pub attributes: Vec<CustomAttribute>,
}

/// An event and its accessor linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub add: Option<MethodId>,
    pub remove: Option<MethodId>,
    pub raise: Option<MethodId>,
    pub attributes: Vec<CustomAttribute>,
}

/// Name of the synthetic module-scope type.
pub const GLOBAL_TYPE_NAME: &str = "<Module>";

/// The mutable module graph handed to every pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// Module version id; 16 random bytes minted at creation.
    pub mvid: [u8; 16],
    pub types: Vec<TypeDef>,
    pub methods: Vec<MethodDef>,
    pub fields: Vec<FieldDef>,
    pub properties: Vec<PropertyDef>,
    pub events: Vec<EventDef>,
    pub ext_refs: Vec<ExternalRef>,
    pub global_type: TypeId,
    pub entry_point: Option<MethodId>,
    pub attributes: Vec<CustomAttribute>,
    /// Path of an associated symbols file, if the compiler emitted one.
    pub debug_directory: Option<String>,
}

impl Module {
    /// Creates an empty module holding only the global type.
    pub fn new(name: impl Into<String>) -> Self {
        let mut global = TypeDef::new("", GLOBAL_TYPE_NAME);
        global.is_global = true;
        global.is_special_name = true;
        global.visibility = Visibility::Private;
        Self {
            name: name.into(),
            mvid: rand::random(),
            types: vec![global],
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            ext_refs: Vec::new(),
            global_type: TypeId(0),
            entry_point: None,
            attributes: Vec::new(),
            debug_directory: None,
        }
    }

    pub fn type_(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    pub fn type_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.0 as usize]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.0 as usize]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.0 as usize]
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.0 as usize]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldDef {
        &mut self.fields[id.0 as usize]
    }

    pub fn property(&self, id: PropertyId) -> &PropertyDef {
        &self.properties[id.0 as usize]
    }

    pub fn property_mut(&mut self, id: PropertyId) -> &mut PropertyDef {
        &mut self.properties[id.0 as usize]
    }

    pub fn event(&self, id: EventId) -> &EventDef {
        &self.events[id.0 as usize]
    }

    pub fn event_mut(&mut self, id: EventId) -> &mut EventDef {
        &mut self.events[id.0 as usize]
    }

    pub fn ext_ref(&self, id: ExtRefId) -> &ExternalRef {
        &self.ext_refs[id.0 as usize]
    }

    pub fn add_type(&mut self, type_def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(type_def);
        id
    }

    /// Adds the method and links it into its declaring type.
    pub fn add_method(&mut self, method: MethodDef) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        let declaring = method.declaring_type;
        self.methods.push(method);
        self.types[declaring.0 as usize].methods.push(id);
        id
    }

    /// Adds the field and links it into its declaring type.
    pub fn add_field(&mut self, field: FieldDef) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        let declaring = field.declaring_type;
        self.fields.push(field);
        self.types[declaring.0 as usize].fields.push(id);
        id
    }

    pub fn add_property(&mut self, property: PropertyDef) -> PropertyId {
        let id = PropertyId(self.properties.len() as u32);
        let declaring = property.declaring_type;
        self.properties.push(property);
        self.types[declaring.0 as usize].properties.push(id);
        id
    }

    pub fn add_event(&mut self, event: EventDef) -> EventId {
        let id = EventId(self.events.len() as u32);
        let declaring = event.declaring_type;
        self.events.push(event);
        self.types[declaring.0 as usize].events.push(id);
        id
    }

    /// Adds an external reference, reusing an existing entry with the same
    /// full name.
    pub fn add_ext_ref(&mut self, ext: ExternalRef) -> ExtRefId {
        if let Some(pos) = self
            .ext_refs
            .iter()
            .position(|e| e.full_name == ext.full_name)
        {
            return ExtRefId(pos as u32);
        }
        let id = ExtRefId(self.ext_refs.len() as u32);
        self.ext_refs.push(ext);
        id
    }

    /// `Namespace.Type::Method`
    pub fn method_full_name(&self, id: MethodId) -> String {
        let method = self.method(id);
        format!(
            "{}::{}",
            self.type_(method.declaring_type).full_name(),
            method.name
        )
    }

    /// `Namespace.Type::Field`
    pub fn field_full_name(&self, id: FieldId) -> String {
        let field = self.field(id);
        format!(
            "{}::{}",
            self.type_(field.declaring_type).full_name(),
            field.name
        )
    }

    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.full_name() == full_name)
            .map(|i| TypeId(i as u32))
    }

    /// Ids of all methods that carry a body, in arena order.
    pub fn method_ids_with_body(&self) -> Vec<MethodId> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.body.is_some())
            .map(|(i, _)| MethodId(i as u32))
            .collect()
    }

    /// The static initializer of `type_id`, if one exists.
    pub fn static_initializer(&self, type_id: TypeId) -> Option<MethodId> {
        self.type_(type_id)
            .methods
            .iter()
            .copied()
            .find(|&m| self.method(m).is_static_initializer())
    }

    /// Number of type definitions excluding the global container.
    pub fn user_type_count(&self) -> usize {
        self.types.iter().filter(|t| !t.is_global).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_module_holds_global_type() {
        let module = Module::new("app");
        assert_eq!(module.types.len(), 1);
        assert!(module.type_(module.global_type).is_global);
        assert_eq!(module.type_(module.global_type).name, GLOBAL_TYPE_NAME);
        assert_eq!(module.user_type_count(), 0);
    }

    #[test]
    fn add_method_links_declaring_type() {
        let mut module = Module::new("app");
        let t = module.add_type(TypeDef::new("App", "Widget"));
        let m = module.add_method(MethodDef::new("Run", t, Signature::empty()));
        assert_eq!(module.type_(t).methods, vec![m]);
        assert_eq!(module.method_full_name(m), "App.Widget::Run");
    }

    #[test]
    fn ext_refs_dedup_by_full_name() {
        let mut module = Module::new("app");
        let a = module.add_ext_ref(ExternalRef {
            assembly: "System.Runtime".into(),
            full_name: "System.Diagnostics.Debugger::get_IsAttached".into(),
            params: 0,
            returns_value: true,
        });
        let b = module.add_ext_ref(ExternalRef {
            assembly: "System.Runtime".into(),
            full_name: "System.Diagnostics.Debugger::get_IsAttached".into(),
            params: 0,
            returns_value: true,
        });
        assert_eq!(a, b);
        assert_eq!(module.ext_refs.len(), 1);
    }

    #[test]
    fn static_initializer_lookup() {
        let mut module = Module::new("app");
        let t = module.add_type(TypeDef::new("App", "Holder"));
        assert_eq!(module.static_initializer(t), None);
        let mut cctor = MethodDef::new(".cctor", t, Signature::empty());
        cctor.is_static = true;
        cctor.is_runtime_special = true;
        let id = module.add_method(cctor);
        assert_eq!(module.static_initializer(t), Some(id));
    }
}
