// This module drives projection building and owns the request-deduplication cache. A
// projection walks the type map's members in destination-name order (writable fields
// only), resolves each member's source expression (custom expressions containing a
// provider-incompatible aggregation are hoisted through the let-clause tracker when the
// member maps to a nested type), truncates re-entrant requests past the recursion cap and
// depth-bounded maps past their max depth, and lowers each member through the mapper
// chain. Constructor maps project through their parameter expressions, defaulting
// unresolvable optional parameters. The cache serves concurrent readers and builds each
// distinct request at most once, returning the identical expression object afterwards.

//! Projection building and the request cache.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::engine::Engine;
use crate::error::{MapError, MapResult, PlanError};
use crate::expr::{Expr, FieldRef};
use crate::graph::member_map::{MemberMap, MemberTarget, Resolution};
use crate::graph::type_map::{CustomMap, TypeMap};
use crate::plan::resolve;
use crate::query::let_clauses::{self, LetClauseTracker};
use crate::query::mappers;
use crate::query::request::ProjectionRequest;
use crate::query::QueryExpressions;
use crate::registry::TypeSource;

/// Memoizes one projection per distinct request.
#[derive(Default)]
pub struct ProjectionCache {
    cache: RwLock<HashMap<ProjectionRequest, Arc<QueryExpressions>>>,
    build_lock: Mutex<()>,
}

impl ProjectionCache {
    pub fn new() -> Self {
        ProjectionCache::default()
    }

    /// Return the cached projection for the request, building it on first
    /// use. Identical requests share one expression object.
    pub fn get_or_create(
        &self,
        engine: &Engine,
        request: ProjectionRequest,
    ) -> MapResult<Arc<QueryExpressions>> {
        if let Some(cached) = self.cache.read().get(&request) {
            return Ok(cached.clone());
        }
        let _guard = self.build_lock.lock();
        if let Some(cached) = self.cache.read().get(&request) {
            return Ok(cached.clone());
        }
        let built = Arc::new(create_projection(engine, &request)?);
        debug!(
            "built projection: {} -> {}",
            engine.type_name(request.pair.source),
            engine.type_name(request.pair.destination),
        );
        self.cache.write().insert(request, built.clone());
        Ok(built)
    }
}

/// Build the full projection for one request.
pub(crate) fn create_projection(
    engine: &Engine,
    request: &ProjectionRequest,
) -> MapResult<QueryExpressions> {
    let map = engine
        .graph()
        .get(request.pair)
        .cloned()
        .ok_or_else(|| PlanError::MissingTypeMap {
            source: engine.type_name(request.pair.source),
            destination: engine.type_name(request.pair.destination),
        })?;

    let mut tracker = LetClauseTracker::new();
    let core = projection_core(engine, request, &Expr::Source, &map, &mut tracker)?;
    let projection = core.unwrap_or(Expr::Default(request.pair.destination));

    if tracker.has_saved() {
        Ok(let_clauses::build_let_clause(
            engine,
            request.pair.source,
            projection,
            tracker.into_saved(),
        ))
    } else {
        Ok(QueryExpressions {
            projection: Expr::Lambda {
                param: request.pair.source,
                body: projection.boxed(),
            },
            let_clause: None,
        })
    }
}

/// Build the member-init expression for one type map over `instance`.
/// Returns `None` when expansion is truncated (over depth with null
/// destinations allowed).
pub(crate) fn projection_core(
    engine: &Engine,
    request: &ProjectionRequest,
    instance: &Expr,
    map: &TypeMap,
    tracker: &mut LetClauseTracker,
) -> MapResult<Option<Expr>> {
    if let Some(CustomMap::Expression(expr)) = &map.custom_map {
        return Ok(Some(expr.clone().substitute_source(instance)));
    }

    let depth = tracker.increment_depth(request.pair);
    let over_depth = map.max_depth() > 0 && depth >= map.max_depth();
    let mut bindings = Vec::new();

    if over_depth {
        if map.allows_null_destination(engine.profile().allow_null_destination_values) {
            return Ok(None);
        }
    } else {
        // Destination-name order, writable fields only.
        let mut ordered: Vec<&MemberMap> = map
            .members
            .iter()
            .filter(|m| {
                m.can_resolve_value && !m.read_only && matches!(m.target, MemberTarget::Field { .. })
            })
            .collect();
        ordered.sort_by(|a, b| a.dest_name.cmp(&b.dest_name));

        for member in ordered {
            if let Some(projected) =
                try_project_member(engine, request, instance, member, depth, tracker)?
            {
                if let MemberTarget::Field { index } = &member.target {
                    bindings.push((
                        FieldRef {
                            owner: map.pair.destination,
                            index: *index,
                        },
                        projected,
                    ));
                }
            }
        }
    }

    let ctor_args = ctor_args(engine, request, instance, map, depth, tracker)?;
    Ok(Some(Expr::MemberInit {
        ty: map.pair.destination,
        ctor_args,
        bindings,
    }))
}

/// Project one member, tracking its position on the current path.
fn try_project_member(
    engine: &Engine,
    request: &ProjectionRequest,
    instance: &Expr,
    member: &MemberMap,
    depth: u32,
    tracker: &mut LetClauseTracker,
) -> MapResult<Option<Expr>> {
    tracker.push(&member.dest_name);
    let result = project_member_core(engine, request, instance, member, depth, tracker);
    tracker.pop();
    result
}

fn project_member_core(
    engine: &Engine,
    request: &ProjectionRequest,
    instance: &Expr,
    member: &MemberMap,
    depth: u32,
    tracker: &mut LetClauseTracker,
) -> MapResult<Option<Expr>> {
    if member.explicit_expansion && !request.should_expand(&tracker.current_path()) {
        return Ok(None);
    }

    let member_map = engine.graph().get(member.pair()).cloned();
    let resolved = resolve_member_source(engine, member, member_map.is_some(), instance, tracker)?;

    let member_request = request.child(member.pair());
    if member_request.already_exists() && depth >= engine.profile().recursion_cap {
        // Truncate re-entrant expansion past the cap.
        return Ok(None);
    }

    mappers::project_member(
        engine,
        member,
        member_map.as_ref(),
        &member_request,
        resolved,
        tracker,
    )
}

/// Resolve the member's source expression, hoisting provider-incompatible
/// custom expressions when the member maps to a nested type.
fn resolve_member_source(
    engine: &Engine,
    member: &MemberMap,
    has_member_map: bool,
    instance: &Expr,
    tracker: &mut LetClauseTracker,
) -> MapResult<Expr> {
    if let Resolution::Expression(expr) = &member.resolution {
        let substituted = expr.clone().substitute_source(instance);
        if has_member_map && substituted.has_aggregate() {
            return Ok(tracker.marker_for(substituted, member.source_ty));
        }
        return Ok(substituted);
    }
    match resolve::source_expr_over(member, instance.clone()) {
        Some(chain) => Ok(chain),
        None => Err(MapError::CannotProject {
            source: engine.type_name(member.source_ty),
            destination: engine.type_name(member.dest_ty),
            member: member.dest_name.clone(),
        }),
    }
}

/// Project constructor arguments when the map constructs through parameters.
fn ctor_args(
    engine: &Engine,
    request: &ProjectionRequest,
    instance: &Expr,
    map: &TypeMap,
    depth: u32,
    tracker: &mut LetClauseTracker,
) -> MapResult<Vec<Expr>> {
    let destination = engine.descriptor(map.pair.destination);
    let Some(info) = destination.struct_info() else {
        return Ok(Vec::new());
    };
    let (Some(ctor_map), Some(ctor)) = (&map.ctor_map, &info.ctor) else {
        return Ok(Vec::new());
    };
    let optional: Vec<bool> = ctor.params.iter().map(|p| p.optional).collect();
    if !ctor_map.can_resolve(&optional) {
        return Ok(Vec::new());
    }

    let mut args = Vec::with_capacity(ctor_map.params.len());
    for (index, param) in ctor_map.params.iter().enumerate() {
        let projected = if param.can_resolve_value {
            try_project_member(engine, request, instance, param, depth, tracker)?
        } else {
            None
        };
        args.push(projected.unwrap_or(Expr::Default(ctor.params[index].ty)));
    }
    Ok(args)
}
