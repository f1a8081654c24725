// This module builds the per-member value pipeline: given a member map, produce the plan
// that fetches the candidate value from the source, in the fixed priority order: value
// converter, value resolver, custom map function, custom map expression, accessor chain,
// destination passthrough. Custom expressions are wrapped so a recoverable error raised
// inside them degrades to the default value; accessor chains are null-checked per link.
// The null fallback is decided here too: a configured substitute always wins, null
// collections become empty lists under policy, and a null resolved value whose source
// type is a constructible reference struct is replaced by a fresh empty instance when the
// policy disallows null destination values. The chain and guarded-expression constructors
// are shared with the query backend, which lowers them differently.

//! The per-member value resolution pipeline.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{PlanError, PlanResult};
use crate::expr::Expr;
use crate::graph::member_map::{
    ConverterSpec, MemberMap, Resolution, ResolverSpec, ValueConverter, ValueResolver,
};
use crate::graph::type_map::TypeMap;
use crate::plan::{NullFallback, ValuePlan};
use crate::registry::{TypeId, TypeKind, TypeSource};

/// The member's accessor chain over the given instance expression, or `None`
/// when the chain is empty.
pub(crate) fn source_expr_over(member: &MemberMap, instance: Expr) -> Option<Expr> {
    if member.source_path.is_empty() {
        None
    } else {
        Some(Expr::chain(
            instance,
            member.source_path.iter().copied(),
            member.source_ty,
        ))
    }
}

/// The member's accessor chain over the routine's source parameter.
pub(crate) fn source_expr(member: &MemberMap) -> Option<Expr> {
    source_expr_over(member, Expr::Source)
}

/// Wrap a custom expression so recoverable errors degrade to the default
/// value. Custom expressions may assume a fully populated source graph.
pub(crate) fn guarded_expression(expr: &Expr, fallback: TypeId) -> Expr {
    Expr::TryRecover {
        body: expr.clone().boxed(),
        fallback: Expr::Default(fallback).boxed(),
    }
}

/// Build the value plan for one member.
pub(crate) fn build_value_plan(engine: &Engine, member: &MemberMap) -> PlanResult<ValuePlan> {
    match &member.resolution {
        Resolution::Converter(spec) => {
            let source =
                source_expr(member).ok_or_else(|| PlanError::ConverterWithoutSource {
                    member: member.dest_name.clone(),
                })?;
            Ok(ValuePlan::Converter {
                converter: resolve_converter(engine, spec)?,
                source,
            })
        }
        Resolution::Resolver(spec) => Ok(ValuePlan::Resolver {
            resolver: resolve_resolver(engine, spec)?,
            source_member: source_expr(member),
        }),
        Resolution::Function(f) => Ok(ValuePlan::Function(f.clone())),
        Resolution::Expression(expr) => Ok(ValuePlan::Expression(guarded_expression(
            expr,
            member.source_ty,
        ))),
        Resolution::None => match source_expr(member) {
            Some(chain) => Ok(ValuePlan::Chain(chain)),
            None => Ok(ValuePlan::Destination),
        },
    }
}

/// Decide what replaces a null resolved value for this member.
pub(crate) fn null_fallback(engine: &Engine, map: &TypeMap, member: &MemberMap) -> NullFallback {
    if let Some(substitute) = &member.null_substitute {
        return NullFallback::Substitute(substitute.clone());
    }
    let source_descriptor = engine.descriptor(member.source_ty);
    if source_descriptor.is_list() {
        let allows = map.allows_null_collections(engine.profile().allow_null_collections);
        return if allows {
            NullFallback::None
        } else {
            NullFallback::EmptyList
        };
    }
    if map.allows_null_destination(engine.profile().allow_null_destination_values) {
        return NullFallback::None;
    }
    let constructible = matches!(&source_descriptor.kind, TypeKind::Struct(info) if !info.by_value)
        && engine.factory().can_instantiate(member.source_ty);
    if constructible {
        NullFallback::ConstructSource(member.source_ty)
    } else {
        NullFallback::None
    }
}

fn resolve_resolver(engine: &Engine, spec: &ResolverSpec) -> PlanResult<Arc<dyn ValueResolver>> {
    match spec {
        ResolverSpec::Instance(resolver) => Ok(resolver.clone()),
        ResolverSpec::Located(ty) => {
            let locator =
                engine
                    .service_locator()
                    .ok_or_else(|| PlanError::MissingServiceLocator {
                        needed: engine.type_name(*ty),
                    })?;
            locator
                .create_resolver(*ty)
                .ok_or_else(|| PlanError::NoUsableConstructor {
                    type_name: engine.type_name(*ty),
                })
        }
    }
}

fn resolve_converter(engine: &Engine, spec: &ConverterSpec) -> PlanResult<Arc<dyn ValueConverter>> {
    match spec {
        ConverterSpec::Instance(converter) => Ok(converter.clone()),
        ConverterSpec::Located(ty) => {
            let locator =
                engine
                    .service_locator()
                    .ok_or_else(|| PlanError::MissingServiceLocator {
                        needed: engine.type_name(*ty),
                    })?;
            locator
                .create_converter(*ty)
                .ok_or_else(|| PlanError::NoUsableConstructor {
                    type_name: engine.type_name(*ty),
                })
        }
    }
}
