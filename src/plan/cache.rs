// This module memoizes compiled plans per type pair. Reads are concurrent through an
// RwLock; first-use compilation is serialized by a single compile mutex shared with lazy
// discovery, with a double-check after acquisition so each pair compiles at most once
// even under concurrent first use. The cycle resolver runs under the lock, before the
// requested pair's plan builds. Compilation is recursive: inline-embedded children are
// compiled through compile_recursive and cached alongside their parent; the CompileCx
// in-progress set keeps a member that maps back into a pair still being built indirect
// instead of recursing forever.

//! The memoizing plan cache.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::engine::Engine;
use crate::error::{PlanError, PlanResult};
use crate::graph::TypePair;
use crate::plan::builder::{self, CompileCx};
use crate::plan::cycles;
use crate::plan::CompiledPlan;

/// Memoizes one compiled plan per type pair.
#[derive(Default)]
pub struct PlanCache {
    plans: RwLock<HashMap<TypePair, Arc<CompiledPlan>>>,
    compile_lock: Mutex<()>,
}

impl PlanCache {
    pub fn new() -> Self {
        PlanCache::default()
    }

    pub fn get(&self, pair: TypePair) -> Option<Arc<CompiledPlan>> {
        self.plans.read().get(&pair).cloned()
    }

    pub fn contains(&self, pair: TypePair) -> bool {
        self.plans.read().contains_key(&pair)
    }

    /// Return the cached plan, compiling it on first use. Guarantees at most
    /// one compilation per pair under concurrent first use.
    pub fn get_or_compile(&self, engine: &Engine, pair: TypePair) -> PlanResult<Arc<CompiledPlan>> {
        if let Some(plan) = self.get(pair) {
            return Ok(plan);
        }
        let _guard = self.compile_lock.lock();
        if let Some(plan) = self.get(pair) {
            return Ok(plan);
        }
        // Cycle resolution for a node runs before its plan compiles, never
        // after.
        cycles::resolve(engine, pair);
        let mut cx = CompileCx::default();
        self.compile_recursive(engine, &mut cx, pair)
    }

    /// Compile a pair (and, transitively, its inline children) while the
    /// compile lock is held.
    pub(crate) fn compile_recursive(
        &self,
        engine: &Engine,
        cx: &mut CompileCx,
        pair: TypePair,
    ) -> PlanResult<Arc<CompiledPlan>> {
        if let Some(plan) = self.get(pair) {
            return Ok(plan);
        }
        let map = engine
            .graph()
            .get(pair)
            .cloned()
            .ok_or_else(|| PlanError::MissingTypeMap {
                source: engine.type_name(pair.source),
                destination: engine.type_name(pair.destination),
            })?;

        cx.in_progress.insert(pair);
        let built = builder::build_plan(engine, cx, &map);
        cx.in_progress.remove(&pair);

        let plan = Arc::new(built?);
        self.plans.write().insert(pair, plan.clone());
        debug!(
            "compiled plan: {} -> {}",
            engine.type_name(pair.source),
            engine.type_name(pair.destination),
        );
        Ok(plan)
    }
}
