// This module defines error types for the remap compiler using the thiserror crate for
// idiomatic Rust error handling. PlanError is the configuration/compile-time enum covering
// fatal conditions detected while a mapping plan is built: destinations with no usable
// constructor, abstract destinations, value converters without a resolvable source member,
// missing or duplicate type maps, unknown fields, and absent external capabilities (service
// locator, type materializer). MapError is the run-time enum raised while a compiled plan
// executes: null dereferences, missing arguments or fields, unwritable path segments, user
// resolver failures, and the Member variant that rewraps any of these with the offending
// member and type pair attached while preserving the original error as the cause. The module
// also provides PlanResult<T> and MapResult<T> as convenience aliases.

//! Error types for plan compilation and mapping execution.
//!
//! Using thiserror for more idiomatic error handling.

use std::error::Error;
use std::fmt;

/// Configuration errors detected while compiling a mapping plan.
///
/// These are fatal: the compile phase aborts and is never retried.
#[derive(Debug)]
pub enum PlanError {
    NoUsableConstructor { type_name: String },

    AbstractDestination { type_name: String },

    ConverterWithoutSource { member: String },

    MissingTypeMap { source: String, destination: String },

    DuplicateTypeMap { source: String, destination: String },

    DuplicateMember { member: String },

    UnknownField { type_name: String, field: String },

    MissingServiceLocator { needed: String },

    MissingMaterializer { type_name: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::NoUsableConstructor { type_name } => write!(
                f,
                "no usable constructor for destination type `{type_name}`"
            ),
            PlanError::AbstractDestination { type_name } => write!(
                f,
                "cannot construct an instance of abstract type `{type_name}`"
            ),
            PlanError::ConverterWithoutSource { member } => write!(
                f,
                "value converter on `{member}` has no source member to convert from"
            ),
            PlanError::MissingTypeMap {
                source,
                destination,
            } => write!(
                f,
                "no type map registered for `{source}` -> `{destination}`"
            ),
            PlanError::DuplicateTypeMap {
                source,
                destination,
            } => write!(
                f,
                "type map for `{source}` -> `{destination}` is registered twice"
            ),
            PlanError::DuplicateMember { member } => {
                write!(f, "conflicting definitions for destination member `{member}`")
            }
            PlanError::UnknownField { type_name, field } => {
                write!(f, "type `{type_name}` has no field `{field}`")
            }
            PlanError::MissingServiceLocator { needed } => {
                write!(f, "no service locator configured, required by `{needed}`")
            }
            PlanError::MissingMaterializer { type_name } => write!(
                f,
                "no type materializer configured for interface destination `{type_name}`"
            ),
        }
    }
}

impl Error for PlanError {}

/// Result type alias for plan compilation.
pub type PlanResult<T> = Result<T, PlanError>;

/// Run-time errors raised while executing a compiled plan.
#[derive(Debug)]
pub enum MapError {
    NullDeref,

    MissingArgument(String),

    MissingField { type_name: String, index: u32 },

    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    NullPathSegment { segment: String },

    CannotProject {
        source: String,
        destination: String,
        member: String,
    },

    Resolver(String),

    Member {
        source_type: String,
        destination_type: String,
        member: String,
        cause: Box<MapError>,
    },

    Plan(PlanError),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::NullDeref => write!(f, "attempted to dereference a null value"),
            MapError::MissingArgument(arg) => write!(f, "missing argument `{arg}`"),
            MapError::MissingField { type_name, index } => {
                write!(f, "object of type `{type_name}` has no field index {index}")
            }
            MapError::TypeMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            MapError::NullPathSegment { segment } => write!(
                f,
                "destination path segment `{segment}` is null and read-only"
            ),
            MapError::CannotProject {
                source,
                destination,
                member,
            } => write!(
                f,
                "member `{member}` cannot be projected for `{source}` -> `{destination}`"
            ),
            MapError::Resolver(msg) => write!(f, "resolver failed: {msg}"),
            MapError::Member {
                source_type,
                destination_type,
                member,
                ..
            } => write!(
                f,
                "error mapping `{source_type}` -> `{destination_type}`, member `{member}`"
            ),
            MapError::Plan(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl Error for MapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MapError::Member { cause, .. } => Some(&**cause),
            MapError::Plan(err) => err.source(),
            _ => None,
        }
    }
}

impl From<PlanError> for MapError {
    fn from(err: PlanError) -> Self {
        MapError::Plan(err)
    }
}

/// Result type alias for mapping execution.
pub type MapResult<T> = Result<T, MapError>;

impl MapError {
    /// Whether the error is one a guarded custom expression swallows.
    ///
    /// Custom map expressions are allowed to assume a fully populated source
    /// graph; a null dereference or missing argument raised strictly inside
    /// one degrades to a default value instead of failing the whole mapping.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MapError::NullDeref | MapError::MissingArgument(_))
    }
}
