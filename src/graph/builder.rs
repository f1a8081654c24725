// This module assembles the type-map graph from plain configuration data. TypeMapBuilder
// collects member configurations for one type pair; MemberConfig describes one destination
// member (field, constructor parameter, or nested path) with its source chain and custom
// logic. build() resolves every field name against the type registry into indexed field
// references, derives member source/destination types, rejects unknown fields and
// conflicting member definitions, and produces the immutable TypeMap the compilers
// consume. Name resolution happens exactly once, here; the compilers never look up a
// field by name again.

//! Builders for the type-map graph.

use smallvec::SmallVec;

use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, FieldRef};
use crate::graph::member_map::{
    ConditionArgs, ConditionFn, ConverterSpec, MapAction, MemberMap, MemberTarget,
    PreconditionFn, Resolution, ResolverSpec, SubstituteFn, TransformerFn,
};
use crate::graph::type_map::{CtorMap, CustomCtor, CustomMap, TypeMap};
use crate::graph::TypePair;
use crate::registry::{TypeId, TypeRegistry, TypeSource};

/// Where a member configuration lands on the destination.
#[derive(Debug, Clone)]
enum DestSpec {
    Field(String),
    CtorParam(String),
    Path(Vec<String>),
}

/// Configuration for one destination member, resolved by
/// [`TypeMapBuilder::build`].
pub struct MemberConfig {
    dest: DestSpec,
    source_path: Vec<String>,
    source_ty: Option<TypeId>,
    resolution: Resolution,
    precondition: Option<PreconditionFn>,
    condition: Option<ConditionFn>,
    null_substitute: Option<SubstituteFn>,
    transformers: Vec<TransformerFn>,
    ignore: bool,
    explicit_expansion: bool,
    use_destination_value: bool,
}

impl MemberConfig {
    fn new(dest: DestSpec) -> Self {
        MemberConfig {
            dest,
            source_path: Vec::new(),
            source_ty: None,
            resolution: Resolution::None,
            precondition: None,
            condition: None,
            null_substitute: None,
            transformers: Vec::new(),
            ignore: false,
            explicit_expansion: false,
            use_destination_value: false,
        }
    }

    /// Map from a chain of source accessors.
    pub fn from<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_path = parts.into_iter().map(Into::into).collect();
        self
    }

    /// Map from a custom expression over the source.
    pub fn from_expr(mut self, expr: Expr) -> Self {
        self.resolution = Resolution::Expression(expr);
        self
    }

    /// Map through a custom function.
    pub fn map_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(
                &crate::value::Value,
                &crate::value::Value,
                &mut crate::context::ResolutionContext,
            ) -> crate::error::MapResult<crate::value::Value>
            + Send
            + Sync
            + 'static,
    {
        self.resolution = Resolution::Function(std::sync::Arc::new(f));
        self
    }

    pub fn resolver(mut self, resolver: std::sync::Arc<dyn crate::graph::ValueResolver>) -> Self {
        self.resolution = Resolution::Resolver(ResolverSpec::Instance(resolver));
        self
    }

    pub fn resolver_located(mut self, ty: TypeId) -> Self {
        self.resolution = Resolution::Resolver(ResolverSpec::Located(ty));
        self
    }

    pub fn converter(mut self, converter: std::sync::Arc<dyn crate::graph::ValueConverter>) -> Self {
        self.resolution = Resolution::Converter(ConverterSpec::Instance(converter));
        self
    }

    pub fn converter_located(mut self, ty: TypeId) -> Self {
        self.resolution = Resolution::Converter(ConverterSpec::Located(ty));
        self
    }

    /// Declare the type the custom resolution produces; defaults to the
    /// destination member type when no source chain is configured.
    pub fn source_type(mut self, ty: TypeId) -> Self {
        self.source_ty = Some(ty);
        self
    }

    pub fn precondition<F>(mut self, f: F) -> Self
    where
        F: Fn(&crate::value::Value, &mut crate::context::ResolutionContext) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.precondition = Some(std::sync::Arc::new(f));
        self
    }

    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConditionArgs<'_>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(std::sync::Arc::new(f));
        self
    }

    pub fn null_substitute<F>(mut self, f: F) -> Self
    where
        F: Fn() -> crate::value::Value + Send + Sync + 'static,
    {
        self.null_substitute = Some(std::sync::Arc::new(f));
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::value::Value) -> crate::value::Value + Send + Sync + 'static,
    {
        self.transformers.push(std::sync::Arc::new(f));
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn explicit_expansion(mut self) -> Self {
        self.explicit_expansion = true;
        self
    }

    pub fn use_destination_value(mut self) -> Self {
        self.use_destination_value = true;
        self
    }
}

/// Builder for one graph node.
pub struct TypeMapBuilder {
    pair: TypePair,
    members: Vec<MemberConfig>,
    ctor_params: Vec<MemberConfig>,
    custom_map: Option<CustomMap>,
    custom_ctor: Option<CustomCtor>,
    use_service_locator: bool,
    included: Vec<TypePair>,
    before_map: Vec<MapAction>,
    after_map: Vec<MapAction>,
    allow_null_destination_values: Option<bool>,
    allow_null_collections: Option<bool>,
    max_depth: u32,
    preserve_references: bool,
}

impl TypeMapBuilder {
    pub(crate) fn new(pair: TypePair) -> Self {
        TypeMapBuilder {
            pair,
            members: Vec::new(),
            ctor_params: Vec::new(),
            custom_map: None,
            custom_ctor: None,
            use_service_locator: false,
            included: Vec::new(),
            before_map: Vec::new(),
            after_map: Vec::new(),
            allow_null_destination_values: None,
            allow_null_collections: None,
            max_depth: 0,
            preserve_references: false,
        }
    }

    /// Configure a destination field.
    pub fn member(
        &mut self,
        dest_field: &str,
        cfg: impl FnOnce(MemberConfig) -> MemberConfig,
    ) -> &mut Self {
        self.members
            .push(cfg(MemberConfig::new(DestSpec::Field(dest_field.into()))));
        self
    }

    /// Configure a nested destination path.
    pub fn path_member(
        &mut self,
        dest_path: &[&str],
        cfg: impl FnOnce(MemberConfig) -> MemberConfig,
    ) -> &mut Self {
        let path = dest_path.iter().map(|s| s.to_string()).collect();
        self.members
            .push(cfg(MemberConfig::new(DestSpec::Path(path))));
        self
    }

    /// Configure a constructor parameter, by declared name.
    pub fn ctor_param(
        &mut self,
        param: &str,
        cfg: impl FnOnce(MemberConfig) -> MemberConfig,
    ) -> &mut Self {
        self.ctor_params
            .push(cfg(MemberConfig::new(DestSpec::CtorParam(param.into()))));
        self
    }

    /// Replace the whole routine with a custom function.
    pub fn custom_map_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &crate::value::Value,
                Option<&crate::value::Value>,
                &mut crate::context::ResolutionContext,
            ) -> crate::error::MapResult<crate::value::Value>
            + Send
            + Sync
            + 'static,
    {
        self.custom_map = Some(CustomMap::Function(std::sync::Arc::new(f)));
        self
    }

    /// Replace the whole routine with a custom expression.
    pub fn custom_map_expr(&mut self, expr: Expr) -> &mut Self {
        self.custom_map = Some(CustomMap::Expression(expr));
        self
    }

    /// Construct the destination with a custom function.
    pub fn construct_with<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(
                &crate::value::Value,
                &mut crate::context::ResolutionContext,
            ) -> crate::error::MapResult<crate::value::Value>
            + Send
            + Sync
            + 'static,
    {
        self.custom_ctor = Some(CustomCtor::Function(std::sync::Arc::new(f)));
        self
    }

    /// Construct the destination from a custom expression.
    pub fn construct_with_expr(&mut self, expr: Expr) -> &mut Self {
        self.custom_ctor = Some(CustomCtor::Expression(expr));
        self
    }

    /// Construct the destination through the service locator.
    pub fn use_service_locator(&mut self) -> &mut Self {
        self.use_service_locator = true;
        self
    }

    /// Register a derived/included map.
    pub fn include(&mut self, pair: TypePair) -> &mut Self {
        self.included.push(pair);
        self
    }

    pub fn before_map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&crate::value::Value, &crate::value::Value, &mut crate::context::ResolutionContext)
            + Send
            + Sync
            + 'static,
    {
        self.before_map.push(std::sync::Arc::new(f));
        self
    }

    pub fn after_map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&crate::value::Value, &crate::value::Value, &mut crate::context::ResolutionContext)
            + Send
            + Sync
            + 'static,
    {
        self.after_map.push(std::sync::Arc::new(f));
        self
    }

    pub fn allow_null_destination_values(&mut self, allow: bool) -> &mut Self {
        self.allow_null_destination_values = Some(allow);
        self
    }

    pub fn allow_null_collections(&mut self, allow: bool) -> &mut Self {
        self.allow_null_collections = Some(allow);
        self
    }

    pub fn max_depth(&mut self, depth: u32) -> &mut Self {
        self.max_depth = depth;
        self
    }

    pub fn preserve_references(&mut self) -> &mut Self {
        self.preserve_references = true;
        self
    }

    /// Resolve names against the registry and produce the immutable node.
    pub(crate) fn build(self, registry: &TypeRegistry) -> PlanResult<TypeMap> {
        let mut map = TypeMap::new(self.pair);
        map.custom_map = self.custom_map;
        map.custom_ctor = self.custom_ctor;
        map.use_service_locator = self.use_service_locator;
        map.included = self.included;
        map.before_map = self.before_map;
        map.after_map = self.after_map;
        map.allow_null_destination_values = self.allow_null_destination_values;
        map.allow_null_collections = self.allow_null_collections;
        if self.max_depth > 0 {
            map.set_max_depth(self.max_depth);
        }
        if self.preserve_references {
            map.set_preserve_references();
        }

        let mut seen = hashbrown::HashSet::new();
        for config in self.members {
            let member = resolve_member(registry, self.pair, config)?;
            if !seen.insert(member.dest_name.clone()) {
                return Err(PlanError::DuplicateMember {
                    member: member.dest_name,
                });
            }
            map.members.push(member);
        }

        map.ctor_map = build_ctor_map(registry, self.pair, self.ctor_params)?;
        Ok(map)
    }
}

/// Resolve one member configuration against the registry.
fn resolve_member(
    registry: &TypeRegistry,
    pair: TypePair,
    config: MemberConfig,
) -> PlanResult<MemberMap> {
    let dest_descriptor = registry.descriptor(pair.destination);
    let (target, dest_name, dest_ty, read_only) = match &config.dest {
        DestSpec::Field(name) => {
            let index = dest_descriptor
                .field_index(name)
                .ok_or_else(|| PlanError::UnknownField {
                    type_name: dest_descriptor.name.clone(),
                    field: name.clone(),
                })?;
            let field = &dest_descriptor.fields()[index as usize];
            (
                MemberTarget::Field { index },
                name.clone(),
                field.ty,
                field.read_only,
            )
        }
        DestSpec::Path(parts) => {
            let mut refs = Vec::with_capacity(parts.len());
            let mut current = pair.destination;
            let mut leaf_ty = pair.destination;
            let mut leaf_read_only = false;
            for part in parts {
                let descriptor = registry.descriptor(current);
                let index =
                    descriptor
                        .field_index(part)
                        .ok_or_else(|| PlanError::UnknownField {
                            type_name: descriptor.name.clone(),
                            field: part.clone(),
                        })?;
                let field = &descriptor.fields()[index as usize];
                refs.push(FieldRef {
                    owner: current,
                    index,
                });
                leaf_ty = field.ty;
                leaf_read_only = field.read_only;
                current = field.ty;
            }
            (
                MemberTarget::Path(refs),
                parts.join("."),
                leaf_ty,
                leaf_read_only,
            )
        }
        DestSpec::CtorParam(_) => unreachable!("constructor parameters resolve in build_ctor_map"),
    };

    finish_member(registry, pair, config, target, dest_name, dest_ty, read_only)
}

/// Common tail of member resolution: source chain, types, custom logic.
fn finish_member(
    registry: &TypeRegistry,
    pair: TypePair,
    config: MemberConfig,
    target: MemberTarget,
    dest_name: String,
    dest_ty: TypeId,
    read_only: bool,
) -> PlanResult<MemberMap> {
    let mut source_path: SmallVec<[FieldRef; 4]> = SmallVec::new();
    let mut chain_ty = pair.source;
    for part in &config.source_path {
        let descriptor = registry.descriptor(chain_ty);
        let index = descriptor
            .field_index(part)
            .ok_or_else(|| PlanError::UnknownField {
                type_name: descriptor.name.clone(),
                field: part.clone(),
            })?;
        let field = &descriptor.fields()[index as usize];
        source_path.push(FieldRef {
            owner: chain_ty,
            index,
        });
        chain_ty = field.ty;
    }

    let source_ty = config.source_ty.unwrap_or(if source_path.is_empty() {
        dest_ty
    } else {
        chain_ty
    });

    let mut member = MemberMap::new(target, dest_name, dest_ty, source_ty);
    member.source_path = source_path;
    member.resolution = config.resolution;
    member.precondition = config.precondition;
    member.condition = config.condition;
    member.null_substitute = config.null_substitute;
    member.transformers = config.transformers;
    member.can_resolve_value = !config.ignore;
    member.explicit_expansion = config.explicit_expansion;
    member.use_destination_value = config.use_destination_value;
    member.read_only = read_only;
    Ok(member)
}

/// Align constructor-parameter configurations with the destination's declared
/// constructor, inserting unresolvable placeholders for unconfigured
/// parameters (usable only when the parameter is optional).
fn build_ctor_map(
    registry: &TypeRegistry,
    pair: TypePair,
    configs: Vec<MemberConfig>,
) -> PlanResult<Option<CtorMap>> {
    let dest_descriptor = registry.descriptor(pair.destination);
    let ctor = match dest_descriptor.struct_info().and_then(|s| s.ctor.as_ref()) {
        Some(ctor) => ctor.clone(),
        None => {
            return match configs.first() {
                Some(config) => {
                    let name = match &config.dest {
                        DestSpec::CtorParam(name) => name.clone(),
                        _ => String::new(),
                    };
                    Err(PlanError::UnknownField {
                        type_name: dest_descriptor.name.clone(),
                        field: name,
                    })
                }
                None => Ok(None),
            };
        }
    };

    if configs.is_empty() {
        return Ok(None);
    }

    let mut by_name: hashbrown::HashMap<String, MemberConfig> = hashbrown::HashMap::new();
    for config in configs {
        let name = match &config.dest {
            DestSpec::CtorParam(name) => name.clone(),
            _ => continue,
        };
        if by_name.insert(name.clone(), config).is_some() {
            return Err(PlanError::DuplicateMember { member: name });
        }
    }

    let mut params = Vec::with_capacity(ctor.params.len());
    for (index, declared) in ctor.params.iter().enumerate() {
        let target = MemberTarget::CtorParam {
            index: index as u32,
        };
        match by_name.remove(&declared.name) {
            Some(config) => {
                params.push(finish_member(
                    registry,
                    pair,
                    config,
                    target,
                    declared.name.clone(),
                    declared.ty,
                    false,
                )?);
            }
            None => {
                let mut placeholder =
                    MemberMap::new(target, declared.name.clone(), declared.ty, declared.ty);
                placeholder.can_resolve_value = false;
                params.push(placeholder);
            }
        }
    }

    if let Some(unknown) = by_name.keys().next() {
        return Err(PlanError::UnknownField {
            type_name: dest_descriptor.name.clone(),
            field: unknown.clone(),
        });
    }

    Ok(Some(CtorMap { params }))
}
