// This module implements the cycle and depth resolver that runs, under the compile lock,
// before a type pair's plan is built. It walks the reachable member graph depth-first with
// an explicit frame stack, tracking the current path as a visited set. A member whose
// child pair is already on the path closes a cycle: if the child's source is a value type
// (no reference identity, so aliasing cannot be detected) the child gets the default depth
// bound and the current node stops descending; otherwise the child and every map derived
// from it switch to reference preservation. Along the way the inline-reset heuristic flips
// members from inline to indirect whenever the path length hits a multiple of the
// configured stride, bounding how large one compiled routine grows; this is traversal-order
// dependent and affects only compiled-routine size, never termination. Each visited map is
// marked inline-checked so later traversals do not re-derive conflicting inline decisions.

//! Cycle detection and depth bounding over the type-map graph.

use std::sync::Arc;

use hashbrown::HashSet;
use log::debug;

use crate::engine::Engine;
use crate::graph::type_map::{CustomMap, TypeMap};
use crate::graph::TypePair;
use crate::registry::TypeSource;

/// Depth bound applied to value-type cycles that have none configured.
/// Counting is the only safe cycle-breaker for types without identity.
pub(crate) const DEFAULT_VALUE_TYPE_DEPTH: u32 = 10;

/// One member slot of a frame: the owning map and the member's position,
/// either in the member list or the constructor map.
enum Slot {
    Member(Arc<TypeMap>, usize),
    CtorParam(Arc<TypeMap>, usize),
}

struct Frame {
    pair: TypePair,
    slots: Vec<Slot>,
    next: usize,
    inline_was_checked: bool,
}

enum Step {
    Pop,
    Descend(TypePair),
    Next,
}

/// Classify every edge reachable from `root` before its plan compiles.
pub(crate) fn resolve(engine: &Engine, root: TypePair) {
    let Some(root_map) = engine.graph().get(root) else {
        return;
    };

    let stride = engine.profile().max_plan_depth.max(1);
    let mut on_path: HashSet<TypePair> = HashSet::new();
    let mut stack: Vec<Frame> = Vec::new();

    on_path.insert(root);
    stack.push(make_frame(engine, root, root_map.clone()));

    loop {
        let Some(frame) = stack.last_mut() else {
            break;
        };
        let frame_pair = frame.pair;
        let step = advance(engine, frame, on_path.len(), stride, &on_path);
        match step {
            Step::Pop => {
                on_path.remove(&frame_pair);
                stack.pop();
            }
            Step::Next => {}
            Step::Descend(child_pair) => {
                // The child is known to exist; advance() checked the graph.
                if let Some(child) = engine.graph().get(child_pair) {
                    let child = child.clone();
                    on_path.insert(child_pair);
                    stack.push(make_frame(engine, child_pair, child));
                }
            }
        }
    }
}

fn make_frame(engine: &Engine, pair: TypePair, map: Arc<TypeMap>) -> Frame {
    let inline_was_checked = map.mark_inline_checked();
    let mut slots = Vec::new();
    collect_slots(&map, &mut slots);
    // Members of maps registered as derived from this one are part of the
    // reachable surface too.
    for included in &map.included {
        if let Some(derived) = engine.graph().get(*included) {
            collect_slots(derived, &mut slots);
        }
    }
    Frame {
        pair,
        slots,
        next: 0,
        inline_was_checked,
    }
}

fn collect_slots(map: &Arc<TypeMap>, slots: &mut Vec<Slot>) {
    for index in 0..map.members.len() {
        slots.push(Slot::Member(map.clone(), index));
    }
    if let Some(ctor_map) = &map.ctor_map {
        for index in 0..ctor_map.params.len() {
            slots.push(Slot::CtorParam(map.clone(), index));
        }
    }
}

/// Process one member slot of the top frame.
fn advance(
    engine: &Engine,
    frame: &mut Frame,
    path_len: usize,
    stride: usize,
    on_path: &HashSet<TypePair>,
) -> Step {
    if frame.next >= frame.slots.len() {
        return Step::Pop;
    }
    let index = frame.next;
    frame.next += 1;
    let slot = &frame.slots[index];

    let member = match slot {
        Slot::Member(owner, index) => &owner.members[*index],
        Slot::CtorParam(owner, index) => match &owner.ctor_map {
            Some(ctor_map) => &ctor_map.params[*index],
            None => return Step::Next,
        },
    };
    if !member.can_resolve_value {
        return Step::Next;
    }

    let child_pair = member.pair();
    let Some(child) = engine.graph().get(child_pair) else {
        return Step::Next;
    };
    // Already reference-preserving, already compiled, or fully replaced by a
    // custom expression: nothing left to decide for this branch.
    if child.preserve_references()
        || engine.plans().contains(child_pair)
        || matches!(child.custom_map, Some(CustomMap::Expression(_)))
    {
        return Step::Next;
    }

    if !frame.inline_was_checked && path_len % stride == 0 {
        debug!(
            "resetting inline: {} in {} -> {}",
            member.dest_name,
            engine.type_name(frame.pair.source),
            engine.type_name(frame.pair.destination),
        );
        member.set_inline(false);
    }

    if on_path.contains(&child_pair) {
        if engine.descriptor(child_pair.source).is_value_type() {
            if child.max_depth() == 0 {
                debug!(
                    "bounding value-type cycle: {} -> {} gets max depth {}",
                    engine.type_name(child_pair.source),
                    engine.type_name(child_pair.destination),
                    DEFAULT_VALUE_TYPE_DEPTH,
                );
                child.set_max_depth(DEFAULT_VALUE_TYPE_DEPTH);
            }
            // Stop descending this node entirely.
            frame.next = frame.slots.len();
            return Step::Next;
        }
        debug!(
            "setting preserve_references: {} -> {}",
            engine.type_name(child_pair.source),
            engine.type_name(child_pair.destination),
        );
        child.set_preserve_references();
        for derived_pair in &child.included {
            if let Some(derived) = engine.graph().get(*derived_pair) {
                debug!(
                    "setting preserve_references: {} -> {}",
                    engine.type_name(derived_pair.source),
                    engine.type_name(derived_pair.destination),
                );
                derived.set_preserve_references();
            }
        }
        return Step::Next;
    }

    Step::Descend(child_pair)
}

#[cfg(test)]
mod tests {
    use crate::engine::MapperConfig;
    use crate::graph::TypePair;
    use crate::registry::{FieldDescriptor, TypeDescriptor, TypeId, TypeRegistry};

    fn self_referential(registry: &mut TypeRegistry, name: &str) -> TypeId {
        let id = TypeId(registry.len() as u32);
        registry.register(TypeDescriptor::entity(
            name,
            vec![FieldDescriptor::new("next", id)],
        ));
        id
    }

    #[test]
    fn test_reference_cycle_sets_preserve_references() {
        let mut registry = TypeRegistry::new();
        let node = self_referential(&mut registry, "Node");
        let node_dto = self_referential(&mut registry, "NodeDto");

        let mut config = MapperConfig::new(registry);
        config
            .create_map(node, node_dto)
            .member("next", |m| m.from(["next"]));
        let engine = config.build().unwrap();

        let pair = TypePair::new(node, node_dto);
        engine.compile(pair).unwrap();
        assert!(engine.graph().get(pair).unwrap().preserve_references());
    }

    #[test]
    fn test_value_type_cycle_gets_default_depth_bound() {
        let mut registry = TypeRegistry::new();
        let wrap = TypeId(registry.len() as u32);
        registry.register(TypeDescriptor::value_type(
            "Wrap",
            vec![FieldDescriptor::new("inner", wrap)],
        ));
        let wrap_dto = TypeId(registry.len() as u32);
        registry.register(TypeDescriptor::value_type(
            "WrapDto",
            vec![FieldDescriptor::new("inner", wrap_dto)],
        ));

        let mut config = MapperConfig::new(registry);
        config
            .create_map(wrap, wrap_dto)
            .member("inner", |m| m.from(["inner"]));
        let engine = config.build().unwrap();

        let pair = TypePair::new(wrap, wrap_dto);
        engine.compile(pair).unwrap();
        let map = engine.graph().get(pair).unwrap();
        assert_eq!(map.max_depth(), super::DEFAULT_VALUE_TYPE_DEPTH);
        assert!(!map.preserve_references());
    }

    #[test]
    fn test_configured_depth_bound_not_overridden() {
        let mut registry = TypeRegistry::new();
        let wrap = TypeId(registry.len() as u32);
        registry.register(TypeDescriptor::value_type(
            "Wrap",
            vec![FieldDescriptor::new("inner", wrap)],
        ));
        let wrap_dto = TypeId(registry.len() as u32);
        registry.register(TypeDescriptor::value_type(
            "WrapDto",
            vec![FieldDescriptor::new("inner", wrap_dto)],
        ));

        let mut config = MapperConfig::new(registry);
        let builder = config.create_map(wrap, wrap_dto);
        builder.member("inner", |m| m.from(["inner"]));
        builder.max_depth(3);
        let engine = config.build().unwrap();

        let pair = TypePair::new(wrap, wrap_dto);
        engine.compile(pair).unwrap();
        assert_eq!(engine.graph().get(pair).unwrap().max_depth(), 3);
    }

    fn chain_types(registry: &mut TypeRegistry) -> (TypeId, TypeId, TypeId, TypeId) {
        let inner = registry.register(TypeDescriptor::entity(
            "Inner",
            vec![FieldDescriptor::new("value", TypeRegistry::INT)],
        ));
        let inner_dto = registry.register(TypeDescriptor::entity(
            "InnerDto",
            vec![FieldDescriptor::new("value", TypeRegistry::INT)],
        ));
        let outer = registry.register(TypeDescriptor::entity(
            "Outer",
            vec![FieldDescriptor::new("inner", inner)],
        ));
        let outer_dto = registry.register(TypeDescriptor::entity(
            "OuterDto",
            vec![FieldDescriptor::new("inner", inner_dto)],
        ));
        (inner, inner_dto, outer, outer_dto)
    }

    #[test]
    fn test_inline_reset_heuristic_flips_members_to_indirect() {
        let mut registry = TypeRegistry::new();
        let (inner, inner_dto, outer, outer_dto) = chain_types(&mut registry);

        let mut config = MapperConfig::new(registry);
        config.profile_mut().max_plan_depth = 1;
        config
            .create_map(inner, inner_dto)
            .member("value", |m| m.from(["value"]));
        config
            .create_map(outer, outer_dto)
            .member("inner", |m| m.from(["inner"]));
        let engine = config.build().unwrap();

        let pair = TypePair::new(outer, outer_dto);
        engine.compile(pair).unwrap();
        assert!(!engine.graph().get(pair).unwrap().members[0].inline());
    }

    #[test]
    fn test_wide_stride_leaves_members_inline() {
        let mut registry = TypeRegistry::new();
        let (inner, inner_dto, outer, outer_dto) = chain_types(&mut registry);

        let mut config = MapperConfig::new(registry);
        config.profile_mut().max_plan_depth = 16;
        config
            .create_map(inner, inner_dto)
            .member("value", |m| m.from(["value"]));
        config
            .create_map(outer, outer_dto)
            .member("inner", |m| m.from(["inner"]));
        let engine = config.build().unwrap();

        let pair = TypePair::new(outer, outer_dto);
        engine.compile(pair).unwrap();
        assert!(engine.graph().get(pair).unwrap().members[0].inline());
        // The nested pair was compiled along the way for inline embedding.
        assert!(engine.plans().contains(TypePair::new(inner, inner_dto)));
    }

    #[test]
    fn test_preserve_references_propagates_to_derived_maps() {
        let mut registry = TypeRegistry::new();
        let node = self_referential(&mut registry, "Node");
        let node_dto = self_referential(&mut registry, "NodeDto");
        let special_dto = self_referential(&mut registry, "SpecialNodeDto");

        let mut config = MapperConfig::new(registry);
        let derived_pair = TypePair::new(node, special_dto);
        let builder = config.create_map(node, node_dto);
        builder.member("next", |m| m.from(["next"]));
        builder.include(derived_pair);
        config
            .create_map(node, special_dto)
            .member("next", |m| m.from(["next"]).source_type(node));
        let engine = config.build().unwrap();

        let pair = TypePair::new(node, node_dto);
        engine.compile(pair).unwrap();
        assert!(engine.graph().get(pair).unwrap().preserve_references());
        assert!(engine
            .graph()
            .get(derived_pair)
            .unwrap()
            .preserve_references());
    }
}
