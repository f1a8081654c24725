// This module is the hub of the executable backend: it defines the compiled-plan data
// model and organizes the four stages around it. cycles classifies recursive edges before
// anything compiles; resolve builds the per-member value pipeline; builder assembles the
// construct-then-populate plan per type pair; exec interprets it; cache memoizes it. A
// CompiledPlan is immutable and Send + Sync once built: every callable it holds is an Arc
// to a Send + Sync closure or trait object, every expression is over ConstValue, and all
// per-call state lives in the ResolutionContext the caller passes in.

//! The executable mapping backend: plan model, compiler, interpreter, cache.

pub mod builder;
pub mod cache;
pub mod cycles;
pub mod exec;
pub mod resolve;

use std::sync::Arc;

use crate::expr::Expr;
use crate::graph::member_map::{
    ConditionFn, CtorFn, MapAction, MapFn, MemberMapFn, MemberTarget, PreconditionFn,
    SubstituteFn, TransformerFn, ValueConverter, ValueResolver,
};
use crate::graph::TypePair;
use crate::registry::TypeId;
use crate::value::ConstValue;

pub use cache::PlanCache;

/// The compiled, executable form of one type map. Immutable after
/// compilation; safe for unlimited concurrent invocation.
pub struct CompiledPlan {
    pub pair: TypePair,
    pub(crate) kind: PlanKind,
}

impl std::fmt::Debug for CompiledPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            PlanKind::Function(_) => "Function",
            PlanKind::Expression(_) => "Expression",
            PlanKind::Standard(_) => "Standard",
        };
        f.debug_struct("CompiledPlan")
            .field("pair", &self.pair)
            .field("kind", &kind)
            .finish()
    }
}

pub(crate) enum PlanKind {
    /// Full custom-map override, used verbatim as the entire routine.
    Function(MapFn),
    /// Full custom-map expression override.
    Expression(Expr),
    Standard(StandardPlan),
}

/// The regular construct-then-populate routine.
pub(crate) struct StandardPlan {
    pub construction: Construction,
    pub preserve_references: bool,
    /// 0 means unbounded.
    pub max_depth: u32,
    pub allow_null_destination: bool,
    pub dest_is_value_type: bool,
    pub before_map: Vec<MapAction>,
    pub after_map: Vec<MapAction>,
    pub members: Vec<MemberPlan>,
}

/// How the destination instance is produced, highest-priority strategy
/// resolved at compile time.
pub(crate) enum Construction {
    Expression(Expr),
    Function(CtorFn),
    ServiceLocated(TypeId),
    /// Constructor-parameter mapping.
    Parameters(Vec<CtorParamPlan>),
    /// Parameterless or all-optional construction; for interface
    /// destinations this already names the materialized adapter type.
    Instantiate(TypeId),
}

/// One mapped constructor parameter.
pub(crate) struct CtorParamPlan {
    pub name: String,
    /// Destination field carrying the parameter's value, when one matches.
    pub field_index: Option<u32>,
    pub ty: TypeId,
    pub default: Option<ConstValue>,
    /// None: unresolvable but optional; the declared default applies.
    pub value: Option<MemberValue>,
}

/// The shared resolve-then-map core of a member or constructor parameter.
pub(crate) struct MemberValue {
    pub value: ValuePlan,
    pub null_fallback: NullFallback,
    pub nested: NestedPlan,
}

/// One member of the populate phase.
pub(crate) struct MemberPlan {
    pub label: String,
    pub target: MemberTarget,
    pub dest_ty: TypeId,
    pub read_only: bool,
    /// Already consumed during construction; only re-applied when the caller
    /// supplied an existing destination.
    pub ctor_consumed: bool,
    pub use_destination_value: bool,
    pub precondition: Option<PreconditionFn>,
    pub condition: Option<ConditionFn>,
    pub transformers: Vec<TransformerFn>,
    pub value: MemberValue,
}

/// The value pipeline for one member, in source priority order.
pub(crate) enum ValuePlan {
    Converter {
        converter: Arc<dyn ValueConverter>,
        source: Expr,
    },
    Resolver {
        resolver: Arc<dyn ValueResolver>,
        source_member: Option<Expr>,
    },
    Function(MemberMapFn),
    /// Custom expression, already wrapped so recoverable errors degrade to a
    /// default value.
    Expression(Expr),
    /// Null-checked accessor chain.
    Chain(Expr),
    /// Last resort: the destination member's current value.
    Destination,
}

/// What replaces a null resolved value.
pub(crate) enum NullFallback {
    None,
    /// Configured substitute; always wins over default construction.
    Substitute(SubstituteFn),
    EmptyList,
    /// Construct an empty source instance and map it.
    ConstructSource(TypeId),
}

/// How the nested mapping of a resolved value runs.
pub(crate) enum NestedPlan {
    /// No nested map: assign directly, converting primitives.
    Direct,
    /// The child's compiled routine is embedded; no cache lookup at run time.
    Inline(Arc<CompiledPlan>),
    /// The child's routine is fetched from the plan cache at run time.
    Indirect(TypePair),
}
