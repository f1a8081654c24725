// This module implements destination construction over the type registry, replacing the
// original's reflective object factory. Instantiation rules, in order: primitives get
// their zero/empty values, lists an empty list, interfaces are redirected to a concrete
// adapter type chosen at configuration time through the TypeMaterializer seam, abstract
// structs are a configuration error, structs with a parameterless constructor get default
// fields, and structs whose constructor has only optional parameters get those defaults
// applied. Anything else has no usable constructor, which is a fatal configuration error
// detected at plan-compile time, not a run-time fault. Field defaults are shallow: nested
// struct-typed fields default to null so self-referential value types cannot recurse.

//! Destination construction.

use crate::error::{PlanError, PlanResult};
use crate::registry::{TypeId, TypeKind, TypeSource};
use crate::value::Value;

/// Configuration-time hook resolving an interface destination to a concrete
/// adapter type. A systems port of runtime proxy emission: the closed set of
/// adapters is chosen when the configuration is built.
pub trait TypeMaterializer: Send + Sync {
    fn adapter_for(&self, interface: TypeId) -> Option<TypeId>;
}

/// Constructs destination instances from type descriptors.
pub struct ObjectFactory<'a> {
    types: &'a dyn TypeSource,
    materializer: Option<&'a dyn TypeMaterializer>,
}

impl<'a> ObjectFactory<'a> {
    pub fn new(types: &'a dyn TypeSource, materializer: Option<&'a dyn TypeMaterializer>) -> Self {
        ObjectFactory {
            types,
            materializer,
        }
    }

    /// The default value of a type: zero for numeric value types, an empty
    /// default instance for by-value structs, null for reference types.
    pub fn default_value(&self, ty: TypeId) -> Value {
        let descriptor = self.types.descriptor(ty);
        match &descriptor.kind {
            TypeKind::Int => Value::Int(0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Bool => Value::Bool(false),
            TypeKind::Str | TypeKind::List { .. } | TypeKind::Interface { .. } => Value::Null,
            TypeKind::Struct(info) => {
                if info.by_value {
                    self.default_instance(ty)
                } else {
                    Value::Null
                }
            }
        }
    }

    /// Shallow field default: primitives zero, everything else null.
    fn field_default(&self, ty: TypeId) -> Value {
        let descriptor = self.types.descriptor(ty);
        match &descriptor.kind {
            TypeKind::Int => Value::Int(0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Bool => Value::Bool(false),
            _ => Value::Null,
        }
    }

    fn default_instance(&self, ty: TypeId) -> Value {
        let descriptor = self.types.descriptor(ty);
        let fields = descriptor
            .fields()
            .iter()
            .map(|f| self.field_default(f.ty))
            .collect();
        Value::object(ty, fields)
    }

    /// Whether `instantiate` can succeed for this type, checked when the
    /// plan compiler decides on a default-construction null fallback.
    pub fn can_instantiate(&self, ty: TypeId) -> bool {
        let descriptor = self.types.descriptor(ty);
        match &descriptor.kind {
            TypeKind::Struct(info) => {
                !info.is_abstract
                    && (info.parameterless
                        || info
                            .ctor
                            .as_ref()
                            .is_some_and(|c| c.params.iter().all(|p| p.optional)))
            }
            TypeKind::Interface { .. } => self
                .materializer
                .and_then(|m| m.adapter_for(ty))
                .is_some(),
            _ => true,
        }
    }

    /// Allocate an instance with default fields, ignoring declared
    /// constructor requirements. Used when a constructor map supplies the
    /// parameter values itself.
    pub fn allocate(&self, ty: TypeId) -> PlanResult<Value> {
        let descriptor = self.types.descriptor(ty);
        match &descriptor.kind {
            TypeKind::Struct(info) if !info.is_abstract => Ok(self.default_instance(ty)),
            _ => self.instantiate(ty),
        }
    }

    /// Construct a fresh, empty instance.
    pub fn instantiate(&self, ty: TypeId) -> PlanResult<Value> {
        let descriptor = self.types.descriptor(ty);
        match &descriptor.kind {
            TypeKind::Int => Ok(Value::Int(0)),
            TypeKind::Float => Ok(Value::Float(0.0)),
            TypeKind::Bool => Ok(Value::Bool(false)),
            TypeKind::Str => Ok(Value::Str(String::new())),
            TypeKind::List { .. } => Ok(Value::List(Vec::new())),
            TypeKind::Interface { .. } => {
                let adapter = self
                    .materializer
                    .and_then(|m| m.adapter_for(ty))
                    .ok_or_else(|| PlanError::MissingMaterializer {
                        type_name: descriptor.name.clone(),
                    })?;
                self.instantiate(adapter)
            }
            TypeKind::Struct(info) => {
                if info.is_abstract {
                    return Err(PlanError::AbstractDestination {
                        type_name: descriptor.name.clone(),
                    });
                }
                if info.parameterless {
                    return Ok(self.default_instance(ty));
                }
                let ctor = info.ctor.as_ref().filter(|c| {
                    c.params.iter().all(|p| p.optional)
                });
                match ctor {
                    Some(ctor) => {
                        let instance = self.default_instance(ty);
                        for param in &ctor.params {
                            if let (Some(default), Some(index)) =
                                (&param.default, descriptor.field_index(&param.name))
                            {
                                let _ = instance.set_field(index, default.to_value());
                            }
                        }
                        Ok(instance)
                    }
                    None => Err(PlanError::NoUsableConstructor {
                        type_name: descriptor.name.clone(),
                    }),
                }
            }
        }
    }
}
