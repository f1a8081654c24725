// This module defines the dynamic value model the mapping runtime operates on. Since Rust
// has no runtime reflection, source and destination instances are represented as tagged
// values: Null, primitives (bool/int/float/string), lists, and objects. Objects are
// reference-counted cells carrying their TypeId and a field vector indexed parallel to the
// registry's field descriptors, which gives them the two properties the plan compiler
// relies on: interior mutability (a destination is constructed first and populated after,
// so a cycle can point at a not-yet-populated instance) and stable identity (the cell
// address keys the reference-preservation cache). ConstValue is the Send + Sync subset of
// Value used inside compiled plans and type descriptors, which are shared across threads;
// full Values never are, so they use single-threaded reference counting.

//! Runtime values for mapping execution.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{MapError, MapResult};
use crate::registry::{TypeId, TypeRegistry};

/// Object payload: the runtime instance of a registered struct or interface
/// adapter. `fields` is indexed parallel to the descriptor's field list.
#[derive(Debug)]
pub struct ObjectData {
    pub ty: TypeId,
    pub fields: Vec<Value>,
}

/// Shared, mutable object cell. The cell address is the object's identity.
pub type ObjectRef = Rc<RefCell<ObjectData>>;

/// A dynamic runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(ObjectRef),
}

impl Value {
    /// Wrap a freshly built object payload.
    pub fn object(ty: TypeId, fields: Vec<Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectData { ty, fields })))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Identity of the underlying object cell, for reference preservation.
    /// Only objects carry identity; value-typed data cannot alias.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(obj) => Some(Rc::as_ptr(obj) as usize),
            _ => None,
        }
    }

    /// The registered type of this value, when it can be derived from the
    /// value alone. `Null` and lists have no intrinsic type.
    pub fn type_of(&self) -> Option<TypeId> {
        match self {
            Value::Bool(_) => Some(TypeRegistry::BOOL),
            Value::Int(_) => Some(TypeRegistry::INT),
            Value::Float(_) => Some(TypeRegistry::FLOAT),
            Value::Str(_) => Some(TypeRegistry::STR),
            Value::Object(obj) => Some(obj.borrow().ty),
            Value::Null | Value::List(_) => None,
        }
    }

    /// Read a field by index. `Null` dereference and non-object access are
    /// run-time errors so the caller can decide whether to recover.
    pub fn get_field(&self, index: u32) -> MapResult<Value> {
        match self {
            Value::Null => Err(MapError::NullDeref),
            Value::Object(obj) => {
                let data = obj.borrow();
                data.fields
                    .get(index as usize)
                    .cloned()
                    .ok_or(MapError::MissingField {
                        type_name: format!("#{}", data.ty.0),
                        index,
                    })
            }
            other => Err(MapError::TypeMismatch {
                expected: "object",
                found: other.kind_name(),
            }),
        }
    }

    /// Write a field by index.
    pub fn set_field(&self, index: u32, value: Value) -> MapResult<()> {
        match self {
            Value::Null => Err(MapError::NullDeref),
            Value::Object(obj) => {
                let mut data = obj.borrow_mut();
                let ty = data.ty;
                match data.fields.get_mut(index as usize) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(MapError::MissingField {
                        type_name: format!("#{}", ty.0),
                        index,
                    }),
                }
            }
            other => Err(MapError::TypeMismatch {
                expected: "object",
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Same-object check: true only when both sides are the same cell.
    pub fn same_object(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }
}

/// Equality: objects compare by identity (structural comparison could not
/// terminate on cyclic graphs), everything else structurally.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The `Send + Sync` subset of [`Value`] that may live inside compiled plans,
/// type descriptors and expressions, all of which are shared across threads.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConstValue {
    pub fn to_value(&self) -> Value {
        match self {
            ConstValue::Null => Value::Null,
            ConstValue::Bool(b) => Value::Bool(*b),
            ConstValue::Int(i) => Value::Int(*i),
            ConstValue::Float(f) => Value::Float(*f),
            ConstValue::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl std::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstValue::Null => write!(f, "null"),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Float(v) => write!(f, "{}", v),
            ConstValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}
