// This module defines TypeMap, one node of the mapping graph: the ordered member maps for
// a source/destination type pair plus everything that overrides or wraps member-by-member
// population (full custom map, custom constructor, service-located construction,
// constructor map, before/after actions, per-map null policies, derived-map links). The
// three cycle-resolution flags are atomics: the graph is otherwise immutable once the
// engine owns it, and these flags are written exactly once, under the compile lock, by
// the cycle resolver before the pair's plan is built.

//! Type-map graph nodes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::expr::Expr;
use crate::graph::member_map::{CtorFn, MapAction, MapFn, MemberMap};
use crate::graph::TypePair;

/// Full-map override: replaces the entire construct-then-populate routine.
#[derive(Clone)]
pub enum CustomMap {
    Function(MapFn),
    Expression(Expr),
}

/// Custom destination construction.
#[derive(Clone)]
pub enum CustomCtor {
    Function(CtorFn),
    Expression(Expr),
}

/// Constructor-parameter mapping: one member map per declared parameter.
pub struct CtorMap {
    pub params: Vec<MemberMap>,
}

impl CtorMap {
    /// Usable only when every parameter resolves or has a declared default.
    pub fn can_resolve(&self, optional: &[bool]) -> bool {
        self.params
            .iter()
            .zip(optional.iter())
            .all(|(param, &opt)| param.can_resolve_value || opt)
    }
}

/// One node of the type-map graph.
pub struct TypeMap {
    pub pair: TypePair,
    /// Property and path maps, in configuration order.
    pub members: Vec<MemberMap>,
    pub ctor_map: Option<CtorMap>,
    pub custom_map: Option<CustomMap>,
    pub custom_ctor: Option<CustomCtor>,
    /// Construct the destination through the service locator.
    pub use_service_locator: bool,
    /// Pairs of maps registered as derived from this one; the cycle resolver
    /// propagates reference preservation to them.
    pub included: Vec<TypePair>,
    pub before_map: Vec<MapAction>,
    pub after_map: Vec<MapAction>,
    pub allow_null_destination_values: Option<bool>,
    pub allow_null_collections: Option<bool>,
    preserve_references: AtomicBool,
    max_depth: AtomicU32,
    was_inline_checked: AtomicBool,
}

impl TypeMap {
    pub fn new(pair: TypePair) -> Self {
        TypeMap {
            pair,
            members: Vec::new(),
            ctor_map: None,
            custom_map: None,
            custom_ctor: None,
            use_service_locator: false,
            included: Vec::new(),
            before_map: Vec::new(),
            after_map: Vec::new(),
            allow_null_destination_values: None,
            allow_null_collections: None,
            preserve_references: AtomicBool::new(false),
            max_depth: AtomicU32::new(0),
            was_inline_checked: AtomicBool::new(false),
        }
    }

    pub fn preserve_references(&self) -> bool {
        self.preserve_references.load(Ordering::Relaxed)
    }

    pub fn set_preserve_references(&self) {
        self.preserve_references.store(true, Ordering::Relaxed);
    }

    /// 0 means unbounded.
    pub fn max_depth(&self) -> u32 {
        self.max_depth.load(Ordering::Relaxed)
    }

    pub fn set_max_depth(&self, depth: u32) {
        self.max_depth.store(depth, Ordering::Relaxed);
    }

    /// Mark this map as visited by the cycle resolver; returns the previous
    /// state so a traversal can tell first visits from repeats.
    pub fn mark_inline_checked(&self) -> bool {
        self.was_inline_checked.swap(true, Ordering::Relaxed)
    }

    pub fn was_inline_checked(&self) -> bool {
        self.was_inline_checked.load(Ordering::Relaxed)
    }

    /// Effective null-destination policy for this map.
    pub fn allows_null_destination(&self, profile_default: bool) -> bool {
        self.allow_null_destination_values.unwrap_or(profile_default)
    }

    /// Effective null-collection policy for this map.
    pub fn allows_null_collections(&self, profile_default: bool) -> bool {
        self.allow_null_collections.unwrap_or(profile_default)
    }
}
