// This module defines the projection request, the key of the query backend's
// deduplication cache. A request names the type pair, the explicitly requested expansion
// paths, and the chain of ancestor requests that led here. Equality and hashing cover the
// pair and expansion paths but deliberately exclude the chain: that is what lets a
// request find itself among its ancestors (re-entrant expansion over a recursive graph)
// while two top-level requests for the same pair and paths still collide in the cache.

//! Projection requests and their deduplication identity.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::graph::{FieldPath, TypePair};

/// One projection request, deduplicated by (pair, expansion paths).
#[derive(Debug, Clone)]
pub struct ProjectionRequest {
    pub pair: TypePair,
    pub expand: Arc<[FieldPath]>,
    chain: Arc<[TypePair]>,
}

impl ProjectionRequest {
    pub fn new(pair: TypePair, expand: Vec<FieldPath>) -> Self {
        ProjectionRequest {
            pair,
            expand: expand.into(),
            chain: Arc::from([]),
        }
    }

    /// A nested request for `pair`, with this request appended to the chain.
    pub fn child(&self, pair: TypePair) -> Self {
        let mut chain: Vec<TypePair> = self.chain.to_vec();
        chain.push(self.pair);
        ProjectionRequest {
            pair,
            expand: self.expand.clone(),
            chain: chain.into(),
        }
    }

    /// Re-entrant: this request already occurs among its ancestors.
    pub fn already_exists(&self) -> bool {
        self.chain.contains(&self.pair)
    }

    /// Whether any requested expansion path covers `path`.
    pub fn should_expand(&self, path: &FieldPath) -> bool {
        self.expand.iter().any(|m| m.starts_with(path))
    }
}

impl PartialEq for ProjectionRequest {
    fn eq(&self, other: &Self) -> bool {
        self.pair == other.pair && self.expand == other.expand
    }
}

impl Eq for ProjectionRequest {}

impl Hash for ProjectionRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pair.hash(state);
        self.expand.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeId;

    fn pair(a: u32, b: u32) -> TypePair {
        TypePair::new(TypeId(a), TypeId(b))
    }

    #[test]
    fn test_identity_excludes_chain() {
        let root = ProjectionRequest::new(pair(1, 2), vec![]);
        let nested = root.child(pair(3, 4)).child(pair(1, 2));
        assert_eq!(root, nested);
        assert!(nested.already_exists());
        assert!(!root.already_exists());
    }

    #[test]
    fn test_expansion_coverage() {
        let request = ProjectionRequest::new(
            pair(1, 2),
            vec![FieldPath::new(["orders", "lines"])],
        );
        assert!(request.should_expand(&FieldPath::new(["orders"])));
        assert!(request.should_expand(&FieldPath::new(["orders", "lines"])));
        assert!(!request.should_expand(&FieldPath::new(["customer"])));
    }
}
