// This module assembles one CompiledPlan per type map. A full custom-map override is used
// verbatim as the whole routine; otherwise the builder picks the construction strategy by
// the fixed priority (custom expression, custom function, service location,
// constructor-parameter mapping when every required parameter resolves, materialized
// adapter for interface destinations, parameterless/all-optional construction; no usable
// constructor aborts compilation), then lowers every resolvable member into a MemberPlan.
// Members matching a constructor parameter are flagged as consumed so they only re-apply
// when the caller supplied an existing destination. Nested mapping is embedded inline only
// when the cycle resolver left the member inline and the child map is neither
// reference-preserving, depth-bounded, nor currently being compiled; anything else defers
// to the plan cache at run time.

//! The plan compiler.

use hashbrown::HashSet;

use crate::engine::Engine;
use crate::error::PlanResult;
use crate::graph::member_map::{MemberMap, MemberTarget};
use crate::graph::type_map::{CustomCtor, CustomMap, TypeMap};
use crate::graph::TypePair;
use crate::plan::{
    CompiledPlan, Construction, CtorParamPlan, MemberPlan, MemberValue, NestedPlan, PlanKind,
    StandardPlan,
};
use crate::plan::resolve;
use crate::registry::{TypeKind, TypeSource};

/// Compile-session state threaded through recursive plan builds.
#[derive(Default)]
pub(crate) struct CompileCx {
    /// Pairs whose plan is currently being built; a member mapping back into
    /// one of these must stay indirect.
    pub in_progress: HashSet<TypePair>,
}

/// Build the plan for one type map. Children embedded inline are compiled
/// (and cached) along the way.
pub(crate) fn build_plan(
    engine: &Engine,
    cx: &mut CompileCx,
    map: &TypeMap,
) -> PlanResult<CompiledPlan> {
    if let Some(custom) = &map.custom_map {
        let kind = match custom {
            CustomMap::Function(f) => PlanKind::Function(f.clone()),
            CustomMap::Expression(e) => PlanKind::Expression(e.clone()),
        };
        return Ok(CompiledPlan {
            pair: map.pair,
            kind,
        });
    }

    let construction = build_construction(engine, cx, map)?;
    let ctor_names: HashSet<String> = match &construction {
        Construction::Parameters(params) => params.iter().map(|p| p.name.clone()).collect(),
        _ => HashSet::new(),
    };

    let mut members = Vec::new();
    for member in &map.members {
        if !member.can_resolve_value {
            continue;
        }
        members.push(build_member_plan(engine, cx, map, member, &ctor_names)?);
    }

    let destination = engine.descriptor(map.pair.destination);
    Ok(CompiledPlan {
        pair: map.pair,
        kind: PlanKind::Standard(StandardPlan {
            construction,
            preserve_references: map.preserve_references(),
            max_depth: map.max_depth(),
            allow_null_destination: map
                .allows_null_destination(engine.profile().allow_null_destination_values),
            dest_is_value_type: destination.is_value_type(),
            before_map: map.before_map.clone(),
            after_map: map.after_map.clone(),
            members,
        }),
    })
}

/// Pick and validate the construction strategy.
fn build_construction(
    engine: &Engine,
    cx: &mut CompileCx,
    map: &TypeMap,
) -> PlanResult<Construction> {
    if let Some(custom) = &map.custom_ctor {
        return Ok(match custom {
            CustomCtor::Expression(e) => Construction::Expression(e.clone()),
            CustomCtor::Function(f) => Construction::Function(f.clone()),
        });
    }
    if map.use_service_locator {
        if engine.service_locator().is_none() {
            return Err(crate::error::PlanError::MissingServiceLocator {
                needed: engine.type_name(map.pair.destination),
            });
        }
        return Ok(Construction::ServiceLocated(map.pair.destination));
    }

    let destination = engine.descriptor(map.pair.destination);
    if let (Some(ctor_map), Some(info)) = (&map.ctor_map, destination.struct_info()) {
        if let Some(ctor) = &info.ctor {
            let optional: Vec<bool> = ctor.params.iter().map(|p| p.optional).collect();
            if ctor_map.can_resolve(&optional) {
                let mut params = Vec::with_capacity(ctor_map.params.len());
                for (index, member) in ctor_map.params.iter().enumerate() {
                    let declared = &ctor.params[index];
                    let value = if member.can_resolve_value {
                        Some(build_member_value(engine, cx, map, member)?)
                    } else {
                        None
                    };
                    params.push(CtorParamPlan {
                        name: declared.name.clone(),
                        field_index: destination.field_index(&declared.name),
                        ty: declared.ty,
                        default: declared.default.clone(),
                        value,
                    });
                }
                return Ok(Construction::Parameters(params));
            }
        }
    }

    if matches!(destination.kind, TypeKind::Interface { .. }) {
        let adapter = engine
            .materializer()
            .and_then(|m| m.adapter_for(map.pair.destination))
            .ok_or_else(|| crate::error::PlanError::MissingMaterializer {
                type_name: destination.name.clone(),
            })?;
        return Ok(Construction::Instantiate(adapter));
    }

    // Parameterless or all-optional construction. Probing now surfaces a
    // missing constructor as a compile-time configuration error.
    engine.factory().instantiate(map.pair.destination)?;
    Ok(Construction::Instantiate(map.pair.destination))
}

/// The resolve-then-map core shared by members and constructor parameters.
fn build_member_value(
    engine: &Engine,
    cx: &mut CompileCx,
    map: &TypeMap,
    member: &MemberMap,
) -> PlanResult<MemberValue> {
    Ok(MemberValue {
        value: resolve::build_value_plan(engine, member)?,
        null_fallback: resolve::null_fallback(engine, map, member),
        nested: nested_plan(engine, cx, member)?,
    })
}

fn build_member_plan(
    engine: &Engine,
    cx: &mut CompileCx,
    map: &TypeMap,
    member: &MemberMap,
    ctor_names: &HashSet<String>,
) -> PlanResult<MemberPlan> {
    let ctor_consumed = matches!(member.target, MemberTarget::Field { .. })
        && ctor_names.contains(&member.dest_name);
    Ok(MemberPlan {
        label: member.dest_name.clone(),
        target: member.target.clone(),
        dest_ty: member.dest_ty,
        read_only: member.read_only,
        ctor_consumed,
        use_destination_value: member.use_destination_value,
        precondition: member.precondition.clone(),
        condition: member.condition.clone(),
        transformers: member.transformers.clone(),
        value: build_member_value(engine, cx, map, member)?,
    })
}

/// Decide inline vs. indirect expansion for one member's nested map.
fn nested_plan(engine: &Engine, cx: &mut CompileCx, member: &MemberMap) -> PlanResult<NestedPlan> {
    let pair = member.pair();
    let Some(child) = engine.graph().get(pair) else {
        return Ok(NestedPlan::Direct);
    };
    let inlineable = member.inline()
        && !child.preserve_references()
        && child.max_depth() == 0
        && !cx.in_progress.contains(&pair);
    if inlineable {
        let plan = engine.plans().compile_recursive(engine, cx, pair)?;
        Ok(NestedPlan::Inline(plan))
    } else {
        Ok(NestedPlan::Indirect(pair))
    }
}
