// This module executes compiled plans: a direct interpreter over the shared expression
// AST plus the construct-then-populate routine around it. Execution order per plan: null
// source short-circuits to the destination default when policy allows; the
// reference-preservation cache is consulted for the source identity; the destination is
// reused (reference types with a caller-supplied instance) or constructed, then inserted
// into the reference cache before members populate so cycles resolve to the same instance;
// the depth counter is incremented and checked, skipping population past the bound;
// members run precondition / resolve / nested-map / transformers / condition / assign with
// every failure rewrapped with the member and type pair; the depth counter is decremented
// symmetrically before returning. Chain nodes null-check every link; TryRecover degrades
// recoverable errors to the fallback, which is how guarded custom expressions swallow
// null dereferences.

//! Plan execution: the AST interpreter and the populate loop.

use crate::context::ResolutionContext;
use crate::engine::Engine;
use crate::error::{MapError, MapResult};
use crate::expr::{AggregateOp, Expr};
use crate::graph::member_map::{ConditionArgs, MemberTarget};
use crate::graph::TypePair;
use crate::plan::{
    CompiledPlan, Construction, MemberPlan, MemberValue, NestedPlan, NullFallback, PlanKind,
    StandardPlan, ValuePlan,
};
use crate::registry::{TypeId, TypeKind, TypeSource};
use crate::value::Value;

/// Evaluation scope: the parameters an expression can reference.
pub(crate) struct EvalScope<'a> {
    pub source: &'a Value,
    pub existing: Option<&'a Value>,
    pub it: Option<&'a Value>,
}

impl<'a> EvalScope<'a> {
    pub fn of_source(source: &'a Value) -> Self {
        EvalScope {
            source,
            existing: None,
            it: None,
        }
    }
}

/// Evaluate an expression against a scope.
pub(crate) fn eval(
    engine: &Engine,
    expr: &Expr,
    scope: &EvalScope<'_>,
    ctx: &mut ResolutionContext,
) -> MapResult<Value> {
    match expr {
        Expr::Source => Ok(scope.source.clone()),
        Expr::It => scope
            .it
            .cloned()
            .ok_or_else(|| MapError::MissingArgument("it".into())),
        Expr::ExistingDest => Ok(scope.existing.cloned().unwrap_or(Value::Null)),
        Expr::Constant(c) => Ok(c.to_value()),
        Expr::Default(ty) => Ok(engine.factory().default_value(*ty)),
        Expr::GetField { base, field } => {
            let value = eval(engine, base, scope, ctx)?;
            value.get_field(field.index)
        }
        Expr::Chain {
            base,
            path,
            fallback,
        } => {
            let mut current = eval(engine, base, scope, ctx)?;
            for link in path {
                if current.is_null() {
                    return Ok(engine.factory().default_value(*fallback));
                }
                current = current.get_field(link.index)?;
            }
            Ok(current)
        }
        Expr::Construct { ty, args } => {
            let instance = engine.factory().instantiate(*ty)?;
            apply_ctor_args(engine, *ty, &instance, args, scope, ctx)?;
            Ok(instance)
        }
        Expr::MemberInit {
            ty,
            ctor_args,
            bindings,
        } => {
            let instance = engine.factory().instantiate(*ty)?;
            apply_ctor_args(engine, *ty, &instance, ctor_args, scope, ctx)?;
            for (field, binding) in bindings {
                let value = eval(engine, binding, scope, ctx)?;
                instance.set_field(field.index, value)?;
            }
            Ok(instance)
        }
        Expr::Coalesce { value, fallback } => {
            let resolved = eval(engine, value, scope, ctx)?;
            if resolved.is_null() {
                eval(engine, fallback, scope, ctx)
            } else {
                Ok(resolved)
            }
        }
        Expr::TryRecover { body, fallback } => match eval(engine, body, scope, ctx) {
            Err(err) if err.is_recoverable() => eval(engine, fallback, scope, ctx),
            other => other,
        },
        Expr::Aggregate { op, input } => {
            let value = eval(engine, input, scope, ctx)?;
            aggregate(*op, &value)
        }
        Expr::Select { input, body } => {
            let value = eval(engine, input, scope, ctx)?;
            let items = match &value {
                Value::Null => return Err(MapError::NullDeref),
                Value::List(items) => items,
                other => {
                    return Err(MapError::TypeMismatch {
                        expected: "list",
                        found: other.kind_name(),
                    })
                }
            };
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                let element_scope = EvalScope {
                    source: scope.source,
                    existing: scope.existing,
                    it: Some(item),
                };
                mapped.push(eval(engine, body, &element_scope, ctx)?);
            }
            Ok(Value::List(mapped))
        }
        Expr::Lambda { .. } | Expr::SubQueryMarker { .. } => Err(MapError::TypeMismatch {
            expected: "executable expression",
            found: "query-only node",
        }),
    }
}

/// Bind evaluated constructor arguments onto same-named fields.
fn apply_ctor_args(
    engine: &Engine,
    ty: TypeId,
    instance: &Value,
    args: &[Expr],
    scope: &EvalScope<'_>,
    ctx: &mut ResolutionContext,
) -> MapResult<()> {
    if args.is_empty() {
        return Ok(());
    }
    let descriptor = engine.descriptor(ty);
    let params = descriptor
        .struct_info()
        .and_then(|info| info.ctor.as_ref())
        .map(|ctor| ctor.params.clone())
        .unwrap_or_default();
    for (index, arg) in args.iter().enumerate() {
        let value = eval(engine, arg, scope, ctx)?;
        if let Some(field_index) = params
            .get(index)
            .and_then(|p| descriptor.field_index(&p.name))
        {
            instance.set_field(field_index, value)?;
        }
    }
    Ok(())
}

fn aggregate(op: AggregateOp, value: &Value) -> MapResult<Value> {
    let items = match value {
        Value::Null => return Err(MapError::NullDeref),
        Value::List(items) => items,
        other => {
            return Err(MapError::TypeMismatch {
                expected: "list",
                found: other.kind_name(),
            })
        }
    };
    match op {
        AggregateOp::Count => Ok(Value::Int(items.len() as i64)),
        AggregateOp::First => Ok(items.first().cloned().unwrap_or(Value::Null)),
        AggregateOp::Sum => {
            let mut int_sum = 0i64;
            let mut float_sum = 0f64;
            let mut float_seen = false;
            for item in items {
                match item {
                    Value::Int(i) => int_sum += i,
                    Value::Float(f) => {
                        float_seen = true;
                        float_sum += f;
                    }
                    _ => continue,
                }
            }
            if float_seen {
                Ok(Value::Float(float_sum + int_sum as f64))
            } else {
                Ok(Value::Int(int_sum))
            }
        }
        AggregateOp::Min | AggregateOp::Max => {
            let mut best: Option<i64> = None;
            for item in items {
                if let Value::Int(i) = item {
                    best = Some(match best {
                        None => *i,
                        Some(current) if matches!(op, AggregateOp::Min) => current.min(*i),
                        Some(current) => current.max(*i),
                    });
                }
            }
            Ok(best.map(Value::Int).unwrap_or(Value::Null))
        }
    }
}

/// Primitive widening applied when a resolved value lands on a differently
/// typed destination with no nested map.
fn convert_value(engine: &Engine, value: Value, dest_ty: TypeId) -> Value {
    let descriptor = engine.descriptor(dest_ty);
    match (&descriptor.kind, &value) {
        (TypeKind::Float, Value::Int(i)) => Value::Float(*i as f64),
        (TypeKind::Int, Value::Float(f)) => Value::Int(*f as i64),
        _ => value,
    }
}

impl CompiledPlan {
    /// Run the routine: `(source, existing destination, context) -> destination`.
    pub fn execute(
        &self,
        engine: &Engine,
        source: &Value,
        existing: Option<Value>,
        ctx: &mut ResolutionContext,
    ) -> MapResult<Value> {
        match &self.kind {
            PlanKind::Function(f) => f(source, existing.as_ref(), ctx),
            PlanKind::Expression(expr) => {
                let scope = EvalScope {
                    source,
                    existing: existing.as_ref(),
                    it: None,
                };
                eval(engine, expr, &scope, ctx)
            }
            PlanKind::Standard(plan) => plan.execute(engine, self.pair, source, existing, ctx),
        }
    }
}

impl StandardPlan {
    fn execute(
        &self,
        engine: &Engine,
        pair: TypePair,
        source: &Value,
        existing: Option<Value>,
        ctx: &mut ResolutionContext,
    ) -> MapResult<Value> {
        if self.allow_null_destination && source.is_null() {
            return Ok(engine.factory().default_value(pair.destination));
        }

        if self.preserve_references {
            if let Some(identity) = source.identity() {
                if let Some(cached) = ctx.cached_instance(identity, pair.destination) {
                    return Ok(cached);
                }
            }
        }

        let had_existing = existing.as_ref().is_some_and(|v| !v.is_null());
        let destination = if !self.dest_is_value_type && had_existing {
            // Reuse the caller-supplied instance; value types always
            // construct fresh.
            existing.clone().unwrap_or(Value::Null)
        } else {
            self.construct(engine, pair, source, ctx)?
        };

        if self.preserve_references {
            if let Some(identity) = source.identity() {
                // Insert before populating, so members pointing back at the
                // same source resolve to this still-empty instance.
                ctx.cache_instance(identity, pair.destination, destination.clone());
            }
        }

        let mut over_depth = false;
        if self.max_depth > 0 {
            let depth = ctx.increment_depth(pair);
            if depth >= self.max_depth {
                over_depth = true;
            }
        }

        if !over_depth {
            for action in &self.before_map {
                action(source, &destination, ctx);
            }
            for member in &self.members {
                member
                    .apply(engine, source, &destination, had_existing, ctx)
                    .map_err(|cause| member_error(engine, pair, &member.label, cause))?;
            }
            for action in &self.after_map {
                action(source, &destination, ctx);
            }
        }

        if self.max_depth > 0 {
            ctx.decrement_depth(pair);
        }
        Ok(destination)
    }

    fn construct(
        &self,
        engine: &Engine,
        pair: TypePair,
        source: &Value,
        ctx: &mut ResolutionContext,
    ) -> MapResult<Value> {
        match &self.construction {
            Construction::Expression(expr) => {
                eval(engine, expr, &EvalScope::of_source(source), ctx)
            }
            Construction::Function(f) => f(source, ctx),
            Construction::ServiceLocated(ty) => {
                let locator = engine.service_locator().ok_or_else(|| {
                    MapError::Plan(crate::error::PlanError::MissingServiceLocator {
                        needed: engine.type_name(*ty),
                    })
                })?;
                locator.create_instance(*ty)
            }
            Construction::Instantiate(ty) => Ok(engine.factory().instantiate(*ty)?),
            Construction::Parameters(params) => {
                let instance = engine.factory().allocate(pair.destination)?;
                for param in params {
                    let value = match &param.value {
                        None => param
                            .default
                            .as_ref()
                            .map(|c| c.to_value())
                            .unwrap_or(Value::Null),
                        Some(member_value) => member_value
                            .produce(engine, source, &Value::Null, &Value::Null, None, ctx)
                            .map_err(|cause| member_error(engine, pair, &param.name, cause))?,
                    };
                    if let Some(field_index) = param.field_index {
                        instance.set_field(field_index, value)?;
                    }
                }
                Ok(instance)
            }
        }
    }
}

/// Rewrap a member failure with the offending member and type pair attached,
/// preserving the original error as the cause. Nested member failures wrap
/// at every member boundary they cross.
fn member_error(engine: &Engine, pair: TypePair, member: &str, cause: MapError) -> MapError {
    MapError::Member {
        source_type: engine.type_name(pair.source),
        destination_type: engine.type_name(pair.destination),
        member: member.to_string(),
        cause: Box::new(cause),
    }
}

impl MemberValue {
    /// Resolve the candidate value and run the nested map. `current` is the
    /// destination member's current value; `nested_existing` is what a nested
    /// map receives as its existing destination.
    fn produce(
        &self,
        engine: &Engine,
        source: &Value,
        current: &Value,
        nested_existing: &Value,
        destination: Option<&Value>,
        ctx: &mut ResolutionContext,
    ) -> MapResult<Value> {
        let resolved = match &self.value {
            ValuePlan::Chain(expr) | ValuePlan::Expression(expr) => {
                eval(engine, expr, &EvalScope::of_source(source), ctx)?
            }
            ValuePlan::Destination => current.clone(),
            ValuePlan::Function(f) => f(source, current, ctx)?,
            ValuePlan::Converter {
                converter,
                source: source_member,
            } => {
                let member_value =
                    eval(engine, source_member, &EvalScope::of_source(source), ctx)?;
                converter.convert(&member_value, ctx)?
            }
            ValuePlan::Resolver {
                resolver,
                source_member,
            } => {
                let member_value = source_member
                    .as_ref()
                    .map(|expr| eval(engine, expr, &EvalScope::of_source(source), ctx))
                    .transpose()?;
                resolver.resolve(source, destination, member_value.as_ref(), current, ctx)?
            }
        };

        let resolved = if resolved.is_null() {
            match &self.null_fallback {
                NullFallback::None => resolved,
                NullFallback::Substitute(substitute) => substitute(),
                NullFallback::EmptyList => Value::List(Vec::new()),
                NullFallback::ConstructSource(ty) => engine.factory().instantiate(*ty)?,
            }
        } else {
            resolved
        };

        match &self.nested {
            NestedPlan::Direct => Ok(resolved),
            NestedPlan::Inline(plan) => {
                plan.execute(engine, &resolved, Some(nested_existing.clone()), ctx)
            }
            NestedPlan::Indirect(pair) => {
                let plan = engine.plan(*pair)?;
                plan.execute(engine, &resolved, Some(nested_existing.clone()), ctx)
            }
        }
    }
}

impl MemberPlan {
    fn apply(
        &self,
        engine: &Engine,
        source: &Value,
        destination: &Value,
        had_existing: bool,
        ctx: &mut ResolutionContext,
    ) -> MapResult<()> {
        if self.ctor_consumed && !had_existing {
            // Consumed during construction; nothing to re-validate.
            return Ok(());
        }
        if let Some(precondition) = &self.precondition {
            if !precondition(source, ctx) {
                return Ok(());
            }
        }

        let current = self.current_value(destination);
        // The value the nested map sees as its existing destination.
        let nested_existing = if self.use_destination_value || self.read_only {
            current.clone()
        } else if !had_existing {
            engine.factory().default_value(self.dest_ty)
        } else {
            current.clone()
        };

        let mapped = self.value.produce(
            engine,
            source,
            &current,
            &nested_existing,
            Some(destination),
            ctx,
        )?;
        let mapped = convert_value(engine, mapped, self.dest_ty);
        let mapped = self
            .transformers
            .iter()
            .fold(mapped, |value, transform| transform(value));

        if let Some(condition) = &self.condition {
            let args = ConditionArgs {
                source,
                candidate: &mapped,
                current: &current,
            };
            if !condition(&args) {
                // Resolution ran for its effects; the value is discarded.
                return Ok(());
            }
        }
        if self.read_only {
            // Read-only destinations are evaluated, never written.
            return Ok(());
        }
        self.assign(engine, destination, mapped)
    }

    /// The destination member's current value; null when a path segment is
    /// not yet reachable.
    fn current_value(&self, destination: &Value) -> Value {
        match &self.target {
            MemberTarget::Field { index } => destination
                .get_field(*index)
                .unwrap_or(Value::Null),
            MemberTarget::CtorParam { .. } => Value::Null,
            MemberTarget::Path(path) => {
                let mut current = destination.clone();
                for link in path {
                    if current.is_null() {
                        return Value::Null;
                    }
                    current = match current.get_field(link.index) {
                        Ok(value) => value,
                        Err(_) => return Value::Null,
                    };
                }
                current
            }
        }
    }

    fn assign(&self, engine: &Engine, destination: &Value, value: Value) -> MapResult<()> {
        match &self.target {
            MemberTarget::Field { index } => destination.set_field(*index, value),
            MemberTarget::CtorParam { .. } => Ok(()),
            MemberTarget::Path(path) => {
                let Some((leaf, intermediates)) = path.split_last() else {
                    return Ok(());
                };
                let mut current = destination.clone();
                for link in intermediates {
                    let next = current.get_field(link.index)?;
                    if next.is_null() {
                        let descriptor = engine.descriptor(link.owner);
                        let field = &descriptor.fields()[link.index as usize];
                        if field.read_only {
                            return Err(MapError::NullPathSegment {
                                segment: field.name.clone(),
                            });
                        }
                        let fresh = engine.factory().instantiate(field.ty)?;
                        current.set_field(link.index, fresh.clone())?;
                        current = fresh;
                    } else {
                        current = next;
                    }
                }
                current.set_field(leaf.index, value)
            }
        }
    }
}
