// This module ties the system together. MapperConfig collects the registry, profile,
// type-map builders and external capability hooks, and build() finalizes them into an
// Engine: the immutable graph, the plan cache, the projection cache, and an overlay for
// carrier types synthesized by the projection compiler. The engine owns all caches
// explicitly; there is no global state. Entry points: map/map_into/map_with_context for
// the executable backend (a fresh ResolutionContext per top-level call unless the caller
// manages one), compile/compile_all for eager initialization, and project for the query
// backend. The engine is Send + Sync; runtime values are not and stay within one call.

//! The mapping engine and its configuration.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::RwLock;

use crate::context::ResolutionContext;
use crate::error::{MapError, MapResult, PlanError, PlanResult};
use crate::factory::{ObjectFactory, TypeMaterializer};
use crate::graph::builder::TypeMapBuilder;
use crate::graph::member_map::{ValueConverter, ValueResolver};
use crate::graph::{FieldPath, MapGraph, Profile, TypePair};
use crate::plan::{CompiledPlan, PlanCache};
use crate::query::{ProjectionCache, ProjectionRequest, QueryExpressions};
use crate::registry::{TypeDescriptor, TypeId, TypeRegistry, TypeSource};
use crate::value::Value;

/// External instance-construction capability: service-located destinations
/// and resolver/converter descriptors are built through this seam.
pub trait ServiceLocator: Send + Sync {
    fn create_instance(&self, ty: TypeId) -> MapResult<Value>;

    fn create_resolver(&self, _ty: TypeId) -> Option<Arc<dyn ValueResolver>> {
        None
    }

    fn create_converter(&self, _ty: TypeId) -> Option<Arc<dyn ValueConverter>> {
        None
    }
}

/// Collects configuration and finalizes it into an [`Engine`].
pub struct MapperConfig {
    registry: TypeRegistry,
    profile: Profile,
    builders: Vec<TypeMapBuilder>,
    service_locator: Option<Arc<dyn ServiceLocator>>,
    materializer: Option<Arc<dyn TypeMaterializer>>,
}

impl MapperConfig {
    pub fn new(registry: TypeRegistry) -> Self {
        MapperConfig {
            registry,
            profile: Profile::default(),
            builders: Vec::new(),
            service_locator: None,
            materializer: None,
        }
    }

    pub fn profile(&mut self, profile: Profile) -> &mut Self {
        self.profile = profile;
        self
    }

    pub fn profile_mut(&mut self) -> &mut Profile {
        &mut self.profile
    }

    /// Start configuring a map for the pair.
    pub fn create_map(&mut self, source: TypeId, destination: TypeId) -> &mut TypeMapBuilder {
        let index = self.builders.len();
        self.builders
            .push(TypeMapBuilder::new(TypePair::new(source, destination)));
        &mut self.builders[index]
    }

    pub fn service_locator(&mut self, locator: Arc<dyn ServiceLocator>) -> &mut Self {
        self.service_locator = Some(locator);
        self
    }

    pub fn materializer(&mut self, materializer: Arc<dyn TypeMaterializer>) -> &mut Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Finalize the graph and produce the engine.
    pub fn build(self) -> PlanResult<Engine> {
        let mut graph = MapGraph::new();
        let mut seen: HashSet<TypePair> = HashSet::new();
        for builder in self.builders {
            let map = builder.build(&self.registry)?;
            let pair = map.pair;
            if !seen.insert(pair) {
                return Err(PlanError::DuplicateTypeMap {
                    source: self.registry.name(pair.source).to_string(),
                    destination: self.registry.name(pair.destination).to_string(),
                });
            }
            graph.insert(map);
        }
        Ok(Engine {
            registry: self.registry,
            graph,
            profile: self.profile,
            service_locator: self.service_locator,
            materializer: self.materializer,
            plans: PlanCache::new(),
            projections: ProjectionCache::new(),
            synthesized: RwLock::new(Vec::new()),
        })
    }
}

/// The compiled mapping engine: immutable graph, memoizing caches, external
/// capability hooks.
pub struct Engine {
    registry: TypeRegistry,
    graph: MapGraph,
    profile: Profile,
    service_locator: Option<Arc<dyn ServiceLocator>>,
    materializer: Option<Arc<dyn TypeMaterializer>>,
    plans: PlanCache,
    projections: ProjectionCache,
    /// Carrier types synthesized by the projection compiler, overlaid on the
    /// frozen registry.
    synthesized: RwLock<Vec<Arc<TypeDescriptor>>>,
}

impl Engine {
    /// Map `source` into a fresh destination of the given type.
    pub fn map(&self, source: &Value, destination: TypeId) -> MapResult<Value> {
        let source_ty = source
            .type_of()
            .ok_or_else(|| MapError::MissingArgument("source".into()))?;
        let mut ctx = ResolutionContext::new();
        self.map_with_context(
            TypePair::new(source_ty, destination),
            source,
            None,
            &mut ctx,
        )
    }

    /// Map `source` onto a caller-supplied destination instance.
    pub fn map_into(&self, source: &Value, existing: Value) -> MapResult<Value> {
        let source_ty = source
            .type_of()
            .ok_or_else(|| MapError::MissingArgument("source".into()))?;
        let destination = existing
            .type_of()
            .ok_or_else(|| MapError::MissingArgument("destination".into()))?;
        let mut ctx = ResolutionContext::new();
        self.map_with_context(
            TypePair::new(source_ty, destination),
            source,
            Some(existing),
            &mut ctx,
        )
    }

    /// Map with an explicit pair and caller-managed context.
    pub fn map_with_context(
        &self,
        pair: TypePair,
        source: &Value,
        existing: Option<Value>,
        ctx: &mut ResolutionContext,
    ) -> MapResult<Value> {
        let plan = self.plans.get_or_compile(self, pair)?;
        plan.execute(self, source, existing, ctx)
    }

    /// Compile (or fetch) the plan for a pair.
    pub fn compile(&self, pair: TypePair) -> PlanResult<Arc<CompiledPlan>> {
        self.plans.get_or_compile(self, pair)
    }

    /// Eagerly compile every configured pair.
    pub fn compile_all(&self) -> PlanResult<()> {
        let pairs: Vec<TypePair> = self.graph.iter().map(|(pair, _)| *pair).collect();
        for pair in pairs {
            self.plans.get_or_compile(self, pair)?;
        }
        Ok(())
    }

    /// Build (or fetch) the query projection for a pair.
    pub fn project(
        &self,
        source: TypeId,
        destination: TypeId,
        expand: Vec<FieldPath>,
    ) -> MapResult<Arc<QueryExpressions>> {
        let request = ProjectionRequest::new(TypePair::new(source, destination), expand);
        self.projections.get_or_create(self, request)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub(crate) fn graph(&self) -> &MapGraph {
        &self.graph
    }

    pub(crate) fn profile(&self) -> &Profile {
        &self.profile
    }

    pub(crate) fn plans(&self) -> &PlanCache {
        &self.plans
    }

    pub(crate) fn plan(&self, pair: TypePair) -> MapResult<Arc<CompiledPlan>> {
        Ok(self.plans.get_or_compile(self, pair)?)
    }

    pub(crate) fn service_locator(&self) -> Option<&dyn ServiceLocator> {
        self.service_locator.as_deref()
    }

    pub(crate) fn materializer(&self) -> Option<&dyn TypeMaterializer> {
        self.materializer.as_deref()
    }

    /// The object factory over this engine's types, usable by embedders to
    /// build source instances.
    pub fn factory(&self) -> ObjectFactory<'_> {
        ObjectFactory::new(self, self.materializer.as_deref())
    }

    pub(crate) fn type_name(&self, ty: TypeId) -> String {
        self.descriptor(ty).name.clone()
    }

    /// Register a carrier type synthesized by the projection compiler.
    pub(crate) fn synthesize(&self, descriptor: TypeDescriptor) -> TypeId {
        let mut synthesized = self.synthesized.write();
        let id = TypeId((self.registry.len() + synthesized.len()) as u32);
        synthesized.push(Arc::new(descriptor));
        id
    }
}

impl TypeSource for Engine {
    fn descriptor(&self, id: TypeId) -> Arc<TypeDescriptor> {
        let base = self.registry.len() as u32;
        if id.0 < base {
            self.registry.descriptor(id)
        } else {
            self.synthesized.read()[(id.0 - base) as usize].clone()
        }
    }
}
