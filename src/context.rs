// This module provides the per-invocation resolution context: scratch state created fresh
// for every top-level map call and never shared across calls or threads. It tracks two
// things. First, a recursion depth counter per type pair, incremented and decremented
// symmetrically around every nested mapping call so depth-bounded maps can short-circuit.
// Second, an instance cache keyed by (source object identity, destination type) that is
// only consulted when a visited type map preserves references: a destination is inserted
// before its members are populated, so a member pointing back at the same source instance
// resolves to the same, possibly still-empty, destination instead of recursing.

//! Per-call resolution state.

use hashbrown::HashMap;

use crate::graph::TypePair;
use crate::registry::TypeId;
use crate::value::Value;

/// Run-time scratch state for one top-level mapping call.
#[derive(Default)]
pub struct ResolutionContext {
    depths: HashMap<TypePair, u32>,
    instances: HashMap<(usize, TypeId), Value>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        ResolutionContext::default()
    }

    /// Increment the depth counter for `pair` and return the new depth.
    pub fn increment_depth(&mut self, pair: TypePair) -> u32 {
        let depth = self.depths.entry(pair).or_insert(0);
        *depth += 1;
        *depth
    }

    /// Decrement the depth counter for `pair`. Counters never go negative.
    pub fn decrement_depth(&mut self, pair: TypePair) {
        if let Some(depth) = self.depths.get_mut(&pair) {
            *depth = depth.saturating_sub(1);
        }
    }

    pub fn depth(&self, pair: TypePair) -> u32 {
        self.depths.get(&pair).copied().unwrap_or(0)
    }

    /// Record a constructed destination for a source identity, before the
    /// destination is populated.
    pub fn cache_instance(&mut self, identity: usize, destination: TypeId, value: Value) {
        self.instances.insert((identity, destination), value);
    }

    pub fn cached_instance(&self, identity: usize, destination: TypeId) -> Option<Value> {
        self.instances.get(&(identity, destination)).cloned()
    }
}
