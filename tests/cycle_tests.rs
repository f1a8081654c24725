//! Tests for cycle breaking, depth bounding and plan-cache memoization.

use std::sync::Arc;

use remap::{
    Engine, FieldDescriptor, MapperConfig, PlanError, ResolutionContext, TypeDescriptor, TypeId,
    TypePair, TypeRegistry, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Self-referential node shapes: `Node { name, next: Node }`.
fn node_engine() -> (Engine, TypeId, TypeId) {
    let mut registry = TypeRegistry::new();
    let node = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::entity(
        "Node",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("next", node),
        ],
    ));
    let node_dto = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::entity(
        "NodeDto",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("next", node_dto),
        ],
    ));

    let mut config = MapperConfig::new(registry);
    config
        .create_map(node, node_dto)
        .member("name", |m| m.from(["name"]))
        .member("next", |m| m.from(["next"]));
    (config.build().unwrap(), node, node_dto)
}

#[test]
fn test_plan_cache_memoizes_compilation() {
    init_logging();
    let (engine, node, node_dto) = node_engine();
    let pair = TypePair::new(node, node_dto);

    let first = engine.compile(pair).unwrap();
    let second = engine.compile(pair).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_plan_cache_memoizes_under_concurrent_first_use() {
    init_logging();
    let (engine, node, node_dto) = node_engine();
    let pair = TypePair::new(node, node_dto);

    let plans: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine: &Engine = &engine;
                scope.spawn(move || engine.compile(pair).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for plan in &plans[1..] {
        assert!(Arc::ptr_eq(&plans[0], plan));
    }
}

#[test]
fn test_self_referential_cycle_preserves_references() {
    init_logging();
    let (engine, node, node_dto) = node_engine();

    // a.next == a
    let a = Value::object(node, vec![Value::Str("a".into()), Value::Null]);
    a.set_field(1, a.clone()).unwrap();

    let dto = engine.map(&a, node_dto).unwrap();
    let next = dto.get_field(1).unwrap();
    // The cycle is reconstructed, not unrolled.
    assert!(Value::same_object(&dto, &next));
    assert_eq!(dto.get_field(0).unwrap(), Value::Str("a".into()));
}

#[test]
fn test_shared_references_map_to_shared_destinations() {
    init_logging();
    let mut registry = TypeRegistry::new();
    let node = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::entity(
        "Node",
        vec![FieldDescriptor::new("next", node)],
    ));
    let node_dto = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::entity(
        "NodeDto",
        vec![FieldDescriptor::new("next", node_dto)],
    ));
    let holder = registry.register(TypeDescriptor::entity(
        "Holder",
        vec![
            FieldDescriptor::new("left", node),
            FieldDescriptor::new("right", node),
        ],
    ));
    let holder_dto = registry.register(TypeDescriptor::entity(
        "HolderDto",
        vec![
            FieldDescriptor::new("left", node_dto),
            FieldDescriptor::new("right", node_dto),
        ],
    ));

    let mut config = MapperConfig::new(registry);
    config
        .create_map(node, node_dto)
        .member("next", |m| m.from(["next"]))
        .preserve_references();
    config
        .create_map(holder, holder_dto)
        .member("left", |m| m.from(["left"]))
        .member("right", |m| m.from(["right"]));
    let engine = config.build().unwrap();

    let shared = Value::object(node, vec![Value::Null]);
    let source = Value::object(holder, vec![shared.clone(), shared]);
    let dto = engine.map(&source, holder_dto).unwrap();

    let left = dto.get_field(0).unwrap();
    let right = dto.get_field(1).unwrap();
    assert!(Value::same_object(&left, &right));
}

/// Value-type recursive shapes: `Wrap { depth, inner: Wrap }` by value.
fn wrap_engine() -> (Engine, TypeId, TypeId) {
    let mut registry = TypeRegistry::new();
    let wrap = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::value_type(
        "Wrap",
        vec![
            FieldDescriptor::new("depth", TypeRegistry::INT),
            FieldDescriptor::new("inner", wrap),
        ],
    ));
    let wrap_dto = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::value_type(
        "WrapDto",
        vec![
            FieldDescriptor::new("depth", TypeRegistry::INT),
            FieldDescriptor::new("inner", wrap_dto),
        ],
    ));

    let mut config = MapperConfig::new(registry);
    config
        .create_map(wrap, wrap_dto)
        .member("depth", |m| m.from(["depth"]))
        .member("inner", |m| m.from(["inner"]));
    (config.build().unwrap(), wrap, wrap_dto)
}

#[test]
fn test_value_type_cycle_bounded_by_default_depth() {
    init_logging();
    let (engine, wrap, wrap_dto) = wrap_engine();

    // Fifteen nested levels, deeper than the default bound of ten.
    let mut source = Value::object(wrap, vec![Value::Int(14), Value::Null]);
    for depth in (0..14).rev() {
        source = Value::object(wrap, vec![Value::Int(depth), source]);
    }

    let pair = TypePair::new(wrap, wrap_dto);
    let mut ctx = ResolutionContext::new();
    let dto = engine
        .map_with_context(pair, &source, None, &mut ctx)
        .unwrap();

    // Depth counters decremented symmetrically.
    assert_eq!(ctx.depth(pair), 0);

    // Walk the mapped chain: populated levels carry their source depth, the
    // cutoff level is a default instance.
    let mut current = dto;
    let mut levels = 0;
    loop {
        levels += 1;
        let inner = current.get_field(1).unwrap();
        if inner.is_null() {
            break;
        }
        current = inner;
    }
    assert_eq!(levels, 10);
    // The cutoff level was never populated: default depth, no inner.
    assert_eq!(current.get_field(0).unwrap(), Value::Int(0));
}

#[test]
fn test_missing_type_map_is_config_error() {
    init_logging();
    let (engine, node, _) = node_engine();
    let err = engine
        .compile(TypePair::new(node, TypeRegistry::STR))
        .unwrap_err();
    assert!(matches!(err, PlanError::MissingTypeMap { .. }));
}

#[test]
fn test_duplicate_type_map_rejected() {
    init_logging();
    let mut registry = TypeRegistry::new();
    let a = registry.register(TypeDescriptor::entity("A", vec![]));
    let b = registry.register(TypeDescriptor::entity("B", vec![]));
    let mut config = MapperConfig::new(registry);
    config.create_map(a, b);
    config.create_map(a, b);
    assert!(matches!(
        config.build(),
        Err(PlanError::DuplicateTypeMap { .. })
    ));
}

#[test]
fn test_compile_all_compiles_every_pair() {
    init_logging();
    let (engine, node, node_dto) = node_engine();
    engine.compile_all().unwrap();
    let pair = TypePair::new(node, node_dto);
    let first = engine.compile(pair).unwrap();
    let second = engine.compile(pair).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
