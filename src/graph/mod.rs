// This module serves as the hub for the type-map graph: the read-only configuration data
// the two compilation backends consume. It exports the graph key (TypePair), the graph
// container (MapGraph), the per-node configuration (TypeMap with its cycle flags), the
// per-member configuration (MemberMap and its resolution variants), destination field
// paths, profile policies, and the builder types that assemble all of the above from a
// type registry. The graph is owned by the configuration layer; after the engine is built
// the compiler only mutates the cycle-resolution flags (preserve-references, max-depth,
// inline), which is why those are atomics rather than plain fields.

//! The type-map graph consumed by both compilation backends.

pub mod builder;
pub mod member_map;
pub mod path;
pub mod profile;
pub mod type_map;

use hashbrown::HashMap;
use std::sync::Arc;

use crate::registry::TypeId;

pub use builder::{MemberConfig, TypeMapBuilder};
pub use member_map::{
    ConditionArgs, ConditionFn, ConverterSpec, CtorFn, MapAction, MapFn, MemberMap,
    MemberMapFn, MemberTarget, PreconditionFn, Resolution, ResolverSpec, SubstituteFn,
    TransformerFn, ValueConverter, ValueResolver,
};
pub use path::FieldPath;
pub use profile::Profile;
pub use type_map::{CtorMap, CustomCtor, CustomMap, TypeMap};

/// Graph key: a source/destination type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypePair {
    pub source: TypeId,
    pub destination: TypeId,
}

impl TypePair {
    pub fn new(source: TypeId, destination: TypeId) -> Self {
        TypePair {
            source,
            destination,
        }
    }
}

/// The finalized graph: one node per configured type pair.
#[derive(Default)]
pub struct MapGraph {
    maps: HashMap<TypePair, Arc<TypeMap>>,
}

impl MapGraph {
    pub fn new() -> Self {
        MapGraph {
            maps: HashMap::new(),
        }
    }

    pub fn insert(&mut self, map: TypeMap) -> Option<Arc<TypeMap>> {
        self.maps.insert(map.pair, Arc::new(map))
    }

    pub fn get(&self, pair: TypePair) -> Option<&Arc<TypeMap>> {
        self.maps.get(&pair)
    }

    pub fn contains(&self, pair: TypePair) -> bool {
        self.maps.contains_key(&pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TypePair, &Arc<TypeMap>)> {
        self.maps.iter()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
