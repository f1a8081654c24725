//! remap - a mapping-plan compiler.
//!
//! remap turns a declarative graph of type-to-type mapping configurations
//! into executable transformation routines, and alternatively into
//! composable query-projection expressions for query-translatable data
//! sources.
//!
//! # Primary Usage
//!
//! ```ignore
//! use remap::{MapperConfig, TypeRegistry, TypeDescriptor, FieldDescriptor};
//!
//! let mut registry = TypeRegistry::new();
//! let source = registry.register(TypeDescriptor::entity("Source", vec![
//!     FieldDescriptor::new("name", TypeRegistry::STR),
//! ]));
//! let dest = registry.register(TypeDescriptor::entity("Dest", vec![
//!     FieldDescriptor::new("name", TypeRegistry::STR),
//! ]));
//!
//! let mut config = MapperConfig::new(registry);
//! config.create_map(source, dest).member("name", |m| m.from(["name"]));
//! let engine = config.build()?;
//!
//! let src = engine.factory().instantiate(source)?;
//! let mapped = engine.map(&src, dest)?;
//! ```
//!
//! # Architecture
//!
//! - [`graph`] - The type-map graph: pairs, nodes, members, policies
//! - [`plan`] - The executable backend: cycle resolver, compiler, interpreter, cache
//! - [`query`] - The projection backend: request dedup, hoisting, carrier synthesis
//! - [`registry`] - Type descriptors standing in for reflection
//! - [`value`] - The dynamic runtime value model
//! - [`engine`] - Configuration finalization and entry points

pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod factory;
pub mod graph;
pub mod plan;
pub mod query;
pub mod registry;
pub mod value;

// Re-export the common surface.
pub use context::ResolutionContext;
pub use engine::{Engine, MapperConfig, ServiceLocator};
pub use error::{MapError, MapResult, PlanError, PlanResult};
pub use expr::{AggregateOp, Expr, FieldRef};
pub use factory::{ObjectFactory, TypeMaterializer};
pub use graph::{
    ConditionArgs, FieldPath, MemberConfig, Profile, TypeMapBuilder, TypePair, ValueConverter,
    ValueResolver,
};
pub use plan::{CompiledPlan, PlanCache};
pub use query::{ProjectionRequest, QueryExpressions};
pub use registry::{
    CtorParam, FieldDescriptor, StructInfo, TypeDescriptor, TypeId, TypeKind, TypeRegistry,
    TypeSource,
};
pub use value::{ConstValue, ObjectData, ObjectRef, Value};
