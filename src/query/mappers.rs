// This module picks the per-member lowering for the projection compiler, mirroring the
// ordered mapper chain of the executable backend's nested-map decision: a member whose
// pair has a type map projects as a nested member-init; assignable members (same type or
// widenable primitives) project as the resolved source expression itself; list members
// project as an element-wise select, recursing into the element pair when it is mapped.
// A member no lowering matches cannot be projected, which is a mapping error naming the
// member.

//! Per-member projection lowering.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{MapError, MapResult};
use crate::expr::Expr;
use crate::graph::member_map::MemberMap;
use crate::graph::type_map::TypeMap;
use crate::graph::TypePair;
use crate::query::let_clauses::LetClauseTracker;
use crate::query::projection;
use crate::query::request::ProjectionRequest;
use crate::registry::{TypeId, TypeKind, TypeSource};

/// Lower one member to a projection expression, or `None` when expansion is
/// truncated.
pub(crate) fn project_member(
    engine: &Engine,
    member: &MemberMap,
    member_map: Option<&Arc<TypeMap>>,
    request: &ProjectionRequest,
    source: Expr,
    tracker: &mut LetClauseTracker,
) -> MapResult<Option<Expr>> {
    // Mapped type: nested member-init over the resolved source.
    if let Some(map) = member_map {
        return projection::projection_core(engine, request, &source, map, tracker);
    }

    // Assignable: the source expression is usable as-is.
    if assignable(engine, member.source_ty, member.dest_ty) {
        return Ok(Some(source));
    }

    // Enumerable: element-wise select.
    let source_descriptor = engine.descriptor(member.source_ty);
    let dest_descriptor = engine.descriptor(member.dest_ty);
    if let (TypeKind::List { element: source_element }, TypeKind::List { element: dest_element }) =
        (&source_descriptor.kind, &dest_descriptor.kind)
    {
        let element_pair = TypePair::new(*source_element, *dest_element);
        let body = match engine.graph().get(element_pair).cloned() {
            Some(element_map) => {
                let element_request = request.child(element_pair);
                match projection::projection_core(
                    engine,
                    &element_request,
                    &Expr::It,
                    &element_map,
                    tracker,
                )? {
                    Some(body) => body,
                    None => return Ok(None),
                }
            }
            None if assignable(engine, *source_element, *dest_element) => Expr::It,
            None => {
                return Err(cannot_project(engine, member));
            }
        };
        return Ok(Some(Expr::Select {
            input: source.boxed(),
            body: body.boxed(),
        }));
    }

    Err(cannot_project(engine, member))
}

/// Whether a source value of `from` can land on a destination of `to`
/// without a nested map.
fn assignable(engine: &Engine, from: TypeId, to: TypeId) -> bool {
    if from == to {
        return true;
    }
    let from_kind = &engine.descriptor(from).kind;
    let to_kind = &engine.descriptor(to).kind;
    matches!(
        (from_kind, to_kind),
        (TypeKind::Int, TypeKind::Float) | (TypeKind::Float, TypeKind::Int)
    )
}

fn cannot_project(engine: &Engine, member: &MemberMap) -> MapError {
    MapError::CannotProject {
        source: engine.type_name(member.source_ty),
        destination: engine.type_name(member.dest_ty),
        member: member.dest_name.clone(),
    }
}
