// This module implements the type registry that stands in for runtime reflection: a closed,
// configuration-time table of type descriptors covering every type that participates in a
// mapping. A descriptor records the type's kind (primitive, list, struct, interface), its
// fields with read-only flags, whether it has value or reference semantics, and how it can
// be constructed (parameterless, or through a constructor whose parameters may be optional
// with declared defaults). TypeId is a plain index into the table and is the unit every
// other component keys on: type pairs, field references, plan caches. The TypeSource trait
// abstracts descriptor lookup so the engine can overlay synthesized carrier types (created
// by the projection compiler) on top of the frozen registry without mutating it.

//! Type descriptors and the registry standing in for reflection.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::value::ConstValue;

/// Index of a registered type. Produced only by [`TypeRegistry::register`]
/// and [`crate::engine::Engine`] carrier synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// One field of a struct or interface type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeId,
    pub read_only: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        FieldDescriptor {
            name: name.into(),
            ty,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// One declared constructor parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CtorParam {
    pub name: String,
    pub ty: TypeId,
    pub optional: bool,
    pub default: Option<ConstValue>,
}

impl CtorParam {
    pub fn required(name: impl Into<String>, ty: TypeId) -> Self {
        CtorParam {
            name: name.into(),
            ty,
            optional: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: TypeId, default: ConstValue) -> Self {
        CtorParam {
            name: name.into(),
            ty,
            optional: true,
            default: Some(default),
        }
    }
}

/// A parameterized constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct CtorDescriptor {
    pub params: Vec<CtorParam>,
}

/// Struct shape: fields plus construction and semantics flags.
#[derive(Debug, Clone, PartialEq)]
pub struct StructInfo {
    /// Value semantics: instances carry no reference identity, so cycles
    /// through them can only be broken by depth bounding.
    pub by_value: bool,
    pub is_abstract: bool,
    /// Whether a parameterless constructor exists.
    pub parameterless: bool,
    pub fields: Vec<FieldDescriptor>,
    pub ctor: Option<CtorDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Int,
    Float,
    Bool,
    Str,
    List { element: TypeId },
    Struct(StructInfo),
    /// Interface destinations are constructed through a materialized adapter
    /// type; the fields here describe the surface the adapter must expose.
    Interface { fields: Vec<FieldDescriptor> },
}

/// A registered type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
}

impl TypeDescriptor {
    /// Reference-semantics struct with a parameterless constructor.
    pub fn entity(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        TypeDescriptor {
            name: name.into(),
            kind: TypeKind::Struct(StructInfo {
                by_value: false,
                is_abstract: false,
                parameterless: true,
                fields,
                ctor: None,
            }),
        }
    }

    /// Value-semantics struct.
    pub fn value_type(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        TypeDescriptor {
            name: name.into(),
            kind: TypeKind::Struct(StructInfo {
                by_value: true,
                is_abstract: false,
                parameterless: true,
                fields,
                ctor: None,
            }),
        }
    }

    pub fn interface(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        TypeDescriptor {
            name: name.into(),
            kind: TypeKind::Interface { fields },
        }
    }

    /// Attach a parameterized constructor.
    pub fn with_ctor(mut self, params: Vec<CtorParam>) -> Self {
        if let TypeKind::Struct(info) = &mut self.kind {
            info.ctor = Some(CtorDescriptor { params });
        }
        self
    }

    /// Remove the parameterless constructor.
    pub fn without_parameterless(mut self) -> Self {
        if let TypeKind::Struct(info) = &mut self.kind {
            info.parameterless = false;
        }
        self
    }

    pub fn abstract_type(mut self) -> Self {
        if let TypeKind::Struct(info) = &mut self.kind {
            info.is_abstract = true;
        }
        self
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        match &self.kind {
            TypeKind::Struct(info) => &info.fields,
            TypeKind::Interface { fields } => fields,
            _ => &[],
        }
    }

    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.fields().iter().position(|f| f.name == name).map(|i| i as u32)
    }

    pub fn struct_info(&self) -> Option<&StructInfo> {
        match &self.kind {
            TypeKind::Struct(info) => Some(info),
            _ => None,
        }
    }

    /// Value semantics: primitives and by-value structs. These cannot carry
    /// reference identity, which is what the cycle resolver keys on.
    pub fn is_value_type(&self) -> bool {
        match &self.kind {
            TypeKind::Int | TypeKind::Float | TypeKind::Bool => true,
            TypeKind::Struct(info) => info.by_value,
            _ => false,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, TypeKind::List { .. })
    }

    pub fn list_element(&self) -> Option<TypeId> {
        match self.kind {
            TypeKind::List { element } => Some(element),
            _ => None,
        }
    }
}

/// Descriptor lookup, implemented by the frozen registry and by the engine
/// (which overlays carrier types synthesized during projection building).
pub trait TypeSource {
    fn descriptor(&self, id: TypeId) -> Arc<TypeDescriptor>;
}

/// The frozen table of registered types. Built once by configuration;
/// read-only afterwards.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeDescriptor>>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistry {
    pub const INT: TypeId = TypeId(0);
    pub const FLOAT: TypeId = TypeId(1);
    pub const BOOL: TypeId = TypeId(2);
    pub const STR: TypeId = TypeId(3);

    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            types: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.register(TypeDescriptor {
            name: "int".into(),
            kind: TypeKind::Int,
        });
        registry.register(TypeDescriptor {
            name: "float".into(),
            kind: TypeKind::Float,
        });
        registry.register(TypeDescriptor {
            name: "bool".into(),
            kind: TypeKind::Bool,
        });
        registry.register(TypeDescriptor {
            name: "str".into(),
            kind: TypeKind::Str,
        });
        registry
    }

    pub fn register(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.by_name.insert(descriptor.name.clone(), id);
        self.types.push(Arc::new(descriptor));
        id
    }

    /// Register (or reuse) the list type over `element`.
    pub fn register_list(&mut self, element: TypeId) -> TypeId {
        let name = format!("[{}]", self.types[element.0 as usize].name);
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        self.register(TypeDescriptor {
            name,
            kind: TypeKind::List { element },
        })
    }

    pub fn id_of(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.types[id.0 as usize].name
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeSource for TypeRegistry {
    fn descriptor(&self, id: TypeId) -> Arc<TypeDescriptor> {
        self.types[id.0 as usize].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_preregistered() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.id_of("int"), Some(TypeRegistry::INT));
        assert_eq!(registry.id_of("str"), Some(TypeRegistry::STR));
        assert!(registry.descriptor(TypeRegistry::INT).is_value_type());
        assert!(!registry.descriptor(TypeRegistry::STR).is_value_type());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TypeRegistry::new();
        let address = registry.register(TypeDescriptor::entity(
            "Address",
            vec![FieldDescriptor::new("city", TypeRegistry::STR)],
        ));
        let descriptor = registry.descriptor(address);
        assert_eq!(descriptor.name, "Address");
        assert_eq!(descriptor.field_index("city"), Some(0));
        assert_eq!(descriptor.field_index("nope"), None);
    }

    #[test]
    fn test_list_registration_dedups() {
        let mut registry = TypeRegistry::new();
        let a = registry.register_list(TypeRegistry::INT);
        let b = registry.register_list(TypeRegistry::INT);
        assert_eq!(a, b);
        assert_eq!(registry.descriptor(a).list_element(), Some(TypeRegistry::INT));
    }

    #[test]
    fn test_value_type_flags() {
        let mut registry = TypeRegistry::new();
        let v = registry.register(TypeDescriptor::value_type("Point", vec![]));
        let e = registry.register(TypeDescriptor::entity("Node", vec![]));
        assert!(registry.descriptor(v).is_value_type());
        assert!(!registry.descriptor(e).is_value_type());
    }
}
