// This module defines the profile policies shared by every type map plus the two engine
// knobs the compilers read: the inline-reset stride of the cycle resolver and the
// expansion cap of the projection compiler. Individual type maps may override the two
// null policies; the knobs are engine-wide.

//! Profile policies and compiler knobs.

/// Mapping policies applied to every type map unless overridden per map.
#[derive(Debug, Clone)]
pub struct Profile {
    /// When true, a null source maps to the destination default instead of a
    /// constructed instance, and null member values stay null.
    pub allow_null_destination_values: bool,

    /// When true, a null source collection maps to null instead of an empty
    /// list.
    pub allow_null_collections: bool,

    /// Inline-reset stride of the cycle resolver: every time the traversal
    /// path length is a multiple of this, members are switched from inline to
    /// indirect to bound how large a single compiled routine grows. Purely a
    /// size/performance heuristic.
    pub max_plan_depth: usize,

    /// Expansion cap of the projection compiler for re-entrant requests over
    /// recursive type graphs.
    pub recursion_cap: u32,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            allow_null_destination_values: true,
            allow_null_collections: false,
            max_plan_depth: 1,
            recursion_cap: 8,
        }
    }
}
