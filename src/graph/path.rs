// This module defines FieldPath, an ordered sequence of destination field names used in
// two places: path maps (mapping into a nested destination member) and projection
// expansion requests (the caller names which explicitly-expandable members to include).
// Equality and hashing are structural so paths can key caches; starts_with supports the
// projection builder's "is this member's path covered by a requested expansion" check.

//! Ordered destination field paths.

use smallvec::SmallVec;
use std::fmt;

/// A dotted destination member path, e.g. `customer.address.city`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    parts: SmallVec<[String; 4]>,
}

impl FieldPath {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPath {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        FieldPath::default()
    }

    pub fn push(&mut self, part: impl Into<String>) {
        self.parts.push(part.into());
    }

    pub fn pop(&mut self) {
        self.parts.pop();
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Whether `prefix` is a leading subsequence of this path.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        prefix.parts.len() <= self.parts.len()
            && self
                .parts
                .iter()
                .zip(prefix.parts.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with() {
        let full = FieldPath::new(["customer", "address", "city"]);
        let prefix = FieldPath::new(["customer", "address"]);
        let other = FieldPath::new(["customer", "name"]);

        assert!(full.starts_with(&prefix));
        assert!(full.starts_with(&FieldPath::empty()));
        assert!(!full.starts_with(&other));
        assert!(!prefix.starts_with(&full));
    }

    #[test]
    fn test_display() {
        let path = FieldPath::new(["a", "b"]);
        assert_eq!(path.to_string(), "a.b");
    }
}
