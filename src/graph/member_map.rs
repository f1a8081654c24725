// This module defines the per-member configuration: how one destination member gets its
// value. A MemberMap names the destination (a field, a constructor parameter, or a nested
// destination path), the resolved source accessor chain, and the optional custom
// resolution logic in the priority order the value pipeline honors: value converter,
// value resolver, map function, map expression, accessor chain, destination passthrough.
// It also carries the per-member knobs: precondition (skip resolution entirely),
// condition (resolve but discard), null substitute, ordered post-resolution transformers,
// and the inline flag the cycle resolver flips. Resolvers and converters are trait seams
// so embedders can supply instances directly or have them service-located by type.

//! Per-member mapping configuration.

use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::ResolutionContext;
use crate::error::MapResult;
use crate::expr::{Expr, FieldRef};
use crate::graph::TypePair;
use crate::registry::TypeId;
use crate::value::Value;

/// Full-map override function: `(source, existing destination, context)`.
pub type MapFn =
    Arc<dyn Fn(&Value, Option<&Value>, &mut ResolutionContext) -> MapResult<Value> + Send + Sync>;

/// Per-member map function: `(source, current destination member, context)`.
pub type MemberMapFn =
    Arc<dyn Fn(&Value, &Value, &mut ResolutionContext) -> MapResult<Value> + Send + Sync>;

/// Custom constructor function: `(source, context)`.
pub type CtorFn = Arc<dyn Fn(&Value, &mut ResolutionContext) -> MapResult<Value> + Send + Sync>;

/// Before/after-map action: `(source, destination, context)`.
pub type MapAction = Arc<dyn Fn(&Value, &Value, &mut ResolutionContext) + Send + Sync>;

/// Precondition: evaluated before any resolution; false skips the member.
pub type PreconditionFn = Arc<dyn Fn(&Value, &mut ResolutionContext) -> bool + Send + Sync>;

/// Arguments to a member condition.
pub struct ConditionArgs<'a> {
    pub source: &'a Value,
    /// The fully resolved and mapped candidate value.
    pub candidate: &'a Value,
    /// The destination member's current value.
    pub current: &'a Value,
}

/// Condition: evaluated after resolution; false discards the computed value.
pub type ConditionFn = Arc<dyn Fn(&ConditionArgs<'_>) -> bool + Send + Sync>;

/// Null substitute, taking precedence over default construction.
pub type SubstituteFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Post-resolution transformer, applied in registration order.
pub type TransformerFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Custom source-value resolver.
pub trait ValueResolver: Send + Sync {
    fn resolve(
        &self,
        source: &Value,
        destination: Option<&Value>,
        source_member: Option<&Value>,
        dest_member: &Value,
        ctx: &mut ResolutionContext,
    ) -> MapResult<Value>;
}

/// Custom source-member converter.
pub trait ValueConverter: Send + Sync {
    fn convert(&self, source_member: &Value, ctx: &mut ResolutionContext) -> MapResult<Value>;
}

/// A resolver, either supplied directly or constructed by the service
/// locator from a registered type.
#[derive(Clone)]
pub enum ResolverSpec {
    Instance(Arc<dyn ValueResolver>),
    Located(TypeId),
}

/// A converter, either supplied directly or service-located.
#[derive(Clone)]
pub enum ConverterSpec {
    Instance(Arc<dyn ValueConverter>),
    Located(TypeId),
}

/// Custom resolution logic for one member, in pipeline priority order.
#[derive(Clone, Default)]
pub enum Resolution {
    #[default]
    None,
    Converter(ConverterSpec),
    Resolver(ResolverSpec),
    Function(MemberMapFn),
    Expression(Expr),
}

/// Where the resolved value lands on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberTarget {
    /// A directly writable destination field.
    Field { index: u32 },
    /// A declared constructor parameter, by position.
    CtorParam { index: u32 },
    /// A nested destination path; intermediates are constructed on demand.
    Path(Vec<FieldRef>),
}

/// Configuration for producing one destination member's value.
pub struct MemberMap {
    pub target: MemberTarget,
    pub dest_name: String,
    pub dest_ty: TypeId,
    pub source_ty: TypeId,
    /// Resolved accessor chain from the source object; possibly empty.
    pub source_path: SmallVec<[FieldRef; 4]>,
    pub resolution: Resolution,
    pub precondition: Option<PreconditionFn>,
    pub condition: Option<ConditionFn>,
    pub null_substitute: Option<SubstituteFn>,
    pub transformers: Vec<TransformerFn>,
    pub can_resolve_value: bool,
    /// Projections only expand this member when its path was requested.
    pub explicit_expansion: bool,
    /// Feed the destination member's current value into the nested map.
    pub use_destination_value: bool,
    /// Destination member cannot be written; the value is still evaluated.
    pub read_only: bool,
    /// Expand the nested map inline; the cycle resolver may flip this to
    /// indirect. Set once, before the owning plan compiles.
    inline: AtomicBool,
}

impl MemberMap {
    pub fn new(
        target: MemberTarget,
        dest_name: impl Into<String>,
        dest_ty: TypeId,
        source_ty: TypeId,
    ) -> Self {
        MemberMap {
            target,
            dest_name: dest_name.into(),
            dest_ty,
            source_ty,
            source_path: SmallVec::new(),
            resolution: Resolution::None,
            precondition: None,
            condition: None,
            null_substitute: None,
            transformers: Vec::new(),
            can_resolve_value: true,
            explicit_expansion: false,
            use_destination_value: false,
            read_only: false,
            inline: AtomicBool::new(true),
        }
    }

    /// The nested type pair this member maps through.
    pub fn pair(&self) -> TypePair {
        TypePair::new(self.source_ty, self.dest_ty)
    }

    pub fn inline(&self) -> bool {
        self.inline.load(Ordering::Relaxed)
    }

    pub fn set_inline(&self, inline: bool) {
        self.inline.store(inline, Ordering::Relaxed);
    }
}
