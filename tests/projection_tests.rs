//! Tests for the query-projection backend: shape, caching, expansion
//! control, recursion truncation and let-clause hoisting.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use remap::{
    AggregateOp, Expr, FieldDescriptor, FieldPath, FieldRef, MapError, MapperConfig,
    TypeDescriptor, TypeId, TypeRegistry,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct ShopTypes {
    customer: TypeId,
    customer_dto: TypeId,
    order: TypeId,
    order_dto: TypeId,
    orders: TypeId,
}

fn shop_registry() -> (TypeRegistry, ShopTypes) {
    let mut registry = TypeRegistry::new();
    let order = registry.register(TypeDescriptor::entity(
        "Order",
        vec![FieldDescriptor::new("total", TypeRegistry::INT)],
    ));
    let order_dto = registry.register(TypeDescriptor::entity(
        "OrderDto",
        vec![FieldDescriptor::new("total", TypeRegistry::INT)],
    ));
    let orders = registry.register_list(order);
    let orders_dto = registry.register_list(order_dto);
    let customer = registry.register(TypeDescriptor::entity(
        "Customer",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("orders", orders),
        ],
    ));
    let customer_dto = registry.register(TypeDescriptor::entity(
        "CustomerDto",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("orders", orders_dto),
        ],
    ));
    (
        registry,
        ShopTypes {
            customer,
            customer_dto,
            order,
            order_dto,
            orders,
        },
    )
}

#[test]
fn test_projection_shape() {
    init_logging();
    let (registry, types) = shop_registry();
    let mut config = MapperConfig::new(registry);
    config
        .create_map(types.order, types.order_dto)
        .member("total", |m| m.from(["total"]));
    config
        .create_map(types.customer, types.customer_dto)
        .member("name", |m| m.from(["name"]))
        .member("orders", |m| m.from(["orders"]));
    let engine = config.build().unwrap();

    let qe = engine
        .project(types.customer, types.customer_dto, vec![])
        .unwrap();
    assert!(qe.let_clause.is_none());
    assert_eq!(
        qe.projection.display(&engine).to_string(),
        "src => new CustomerDto() { name: src.name, \
         orders: src.orders.select(it => new OrderDto() { total: it.total }) }"
    );
}

#[test]
fn test_identical_requests_share_the_cached_projection() {
    init_logging();
    let (registry, types) = shop_registry();
    let mut config = MapperConfig::new(registry);
    config
        .create_map(types.order, types.order_dto)
        .member("total", |m| m.from(["total"]));
    config
        .create_map(types.customer, types.customer_dto)
        .member("name", |m| m.from(["name"]))
        .member("orders", |m| m.from(["orders"]));
    let engine = config.build().unwrap();

    let first = engine
        .project(types.customer, types.customer_dto, vec![])
        .unwrap();
    let second = engine
        .project(types.customer, types.customer_dto, vec![])
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A different expansion set is a different request.
    let expanded = engine
        .project(
            types.customer,
            types.customer_dto,
            vec![FieldPath::new(["orders"])],
        )
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &expanded));
}

#[test]
fn test_aggregation_hoisted_into_single_shared_let_clause() {
    init_logging();
    let (mut registry, types) = shop_registry();
    let summary = registry.register(TypeDescriptor::entity(
        "CustomerSummary",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("newest", types.order_dto),
            FieldDescriptor::new("primary", types.order_dto),
        ],
    ));

    // first(src.orders): a sub-query the provider cannot embed inline.
    let first_order = Expr::Aggregate {
        op: AggregateOp::First,
        input: Expr::GetField {
            base: Expr::Source.boxed(),
            field: FieldRef {
                owner: types.customer,
                index: 1,
            },
        }
        .boxed(),
    };

    let mut config = MapperConfig::new(registry);
    config
        .create_map(types.order, types.order_dto)
        .member("total", |m| m.from(["total"]));
    let order = types.order;
    config
        .create_map(types.customer, summary)
        .member("name", |m| m.from(["name"]))
        .member("newest", {
            let expr = first_order.clone();
            move |m| m.from_expr(expr).source_type(order)
        })
        .member("primary", {
            let expr = first_order.clone();
            move |m| m.from_expr(expr).source_type(order)
        });
    let engine = config.build().unwrap();

    let qe = engine.project(types.customer, summary, vec![]).unwrap();
    let let_clause = qe.let_clause.as_ref().expect("hoisting produces a let-clause");

    // Exactly one preceding clause with exactly one hoisted sub-expression,
    // shared by both members.
    let let_rendered = let_clause.display(&engine).to_string();
    assert_eq!(let_rendered.matches(".first()").count(), 1);
    assert_eq!(
        let_rendered,
        "src => new __Customer_let() { __newest: src.orders.first(), name: src.name }"
    );

    let rendered = qe.projection.display(&engine).to_string();
    assert_eq!(rendered.matches("src.__newest.total").count(), 2);
    assert_eq!(
        rendered,
        "src => new CustomerSummary() { name: src.name, \
         newest: new OrderDto() { total: src.__newest.total }, \
         primary: new OrderDto() { total: src.__newest.total } }"
    );
}

fn category_registry() -> (TypeRegistry, TypeId, TypeId) {
    let mut registry = TypeRegistry::new();
    let category = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::entity(
        "Category",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("parent", category),
        ],
    ));
    let category_dto = TypeId(registry.len() as u32);
    registry.register(TypeDescriptor::entity(
        "CategoryDto",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("parent", category_dto),
        ],
    ));
    (registry, category, category_dto)
}

#[test]
fn test_recursive_projection_truncated_at_recursion_cap() {
    init_logging();
    let (registry, category, category_dto) = category_registry();
    let mut config = MapperConfig::new(registry);
    config.profile_mut().recursion_cap = 2;
    config
        .create_map(category, category_dto)
        .member("name", |m| m.from(["name"]))
        .member("parent", |m| m.from(["parent"]));
    let engine = config.build().unwrap();

    let qe = engine.project(category, category_dto, vec![]).unwrap();
    let rendered = qe.projection.display(&engine).to_string();
    assert_eq!(rendered.matches("new CategoryDto").count(), 3);
    // The innermost level no longer expands its parent.
    assert!(rendered.contains("src.parent.parent.name"));
    assert!(!rendered.contains("src.parent.parent.parent"));
}

#[test]
fn test_map_max_depth_bounds_projection() {
    init_logging();
    let (registry, category, category_dto) = category_registry();
    let mut config = MapperConfig::new(registry);
    let builder = config.create_map(category, category_dto);
    builder.member("name", |m| m.from(["name"]));
    builder.member("parent", |m| m.from(["parent"]));
    builder.max_depth(2);
    let engine = config.build().unwrap();

    let qe = engine.project(category, category_dto, vec![]).unwrap();
    let rendered = qe.projection.display(&engine).to_string();
    assert_eq!(rendered.matches("new CategoryDto").count(), 2);
}

#[test]
fn test_explicit_expansion_filters_members() {
    init_logging();
    let (registry, types) = shop_registry();
    let mut config = MapperConfig::new(registry);
    config
        .create_map(types.order, types.order_dto)
        .member("total", |m| m.from(["total"]));
    config
        .create_map(types.customer, types.customer_dto)
        .member("name", |m| m.from(["name"]))
        .member("orders", |m| m.from(["orders"]).explicit_expansion());
    let engine = config.build().unwrap();

    let collapsed = engine
        .project(types.customer, types.customer_dto, vec![])
        .unwrap();
    let rendered = collapsed.projection.display(&engine).to_string();
    assert!(!rendered.contains("select"));
    assert!(rendered.contains("name: src.name"));

    let expanded = engine
        .project(
            types.customer,
            types.customer_dto,
            vec![FieldPath::new(["orders"])],
        )
        .unwrap();
    let rendered = expanded.projection.display(&engine).to_string();
    assert!(rendered.contains("select"));
}

#[test]
fn test_unprojectable_member_is_an_error() {
    init_logging();
    let (registry, types) = shop_registry();
    let mut config = MapperConfig::new(registry);
    config
        .create_map(types.customer, types.customer_dto)
        .member("name", |m| {
            m.map_fn(|_, _, _| Ok(remap::Value::Str("computed".into())))
        });
    let engine = config.build().unwrap();

    let err = engine
        .project(types.customer, types.customer_dto, vec![])
        .unwrap_err();
    assert!(matches!(err, MapError::CannotProject { .. }));
}

#[test]
fn test_projected_ctor_args() {
    init_logging();
    let mut registry = TypeRegistry::new();
    let source = registry.register(TypeDescriptor::entity(
        "Reading",
        vec![FieldDescriptor::new("value", TypeRegistry::INT)],
    ));
    let dest = registry.register(
        TypeDescriptor::entity(
            "ReadingDto",
            vec![FieldDescriptor::new("value", TypeRegistry::INT)],
        )
        .without_parameterless()
        .with_ctor(vec![remap::CtorParam::required("value", TypeRegistry::INT)]),
    );
    let mut config = MapperConfig::new(registry);
    config
        .create_map(source, dest)
        .ctor_param("value", |m| m.from(["value"]));
    let engine = config.build().unwrap();

    let qe = engine.project(source, dest, vec![]).unwrap();
    assert_eq!(
        qe.projection.display(&engine).to_string(),
        "src => new ReadingDto(src.value) {  }"
    );
}

#[test]
fn test_list_field_used_by_aggregate_only_lives_on_carrier() {
    init_logging();
    let (mut registry, types) = shop_registry();
    let stats = registry.register(TypeDescriptor::entity(
        "CustomerStats",
        vec![
            FieldDescriptor::new("name", TypeRegistry::STR),
            FieldDescriptor::new("top", types.order_dto),
            FieldDescriptor::new("orders", types.orders),
        ],
    ));

    let first_order = Expr::Aggregate {
        op: AggregateOp::First,
        input: Expr::GetField {
            base: Expr::Source.boxed(),
            field: FieldRef {
                owner: types.customer,
                index: 1,
            },
        }
        .boxed(),
    };

    let mut config = MapperConfig::new(registry);
    config
        .create_map(types.order, types.order_dto)
        .member("total", |m| m.from(["total"]));
    let order = types.order;
    config
        .create_map(types.customer, stats)
        .member("name", |m| m.from(["name"]))
        .member("top", move |m| m.from_expr(first_order).source_type(order))
        .member("orders", |m| m.from(["orders"]));
    let engine = config.build().unwrap();

    let qe = engine.project(types.customer, stats, vec![]).unwrap();
    let let_rendered = qe
        .let_clause
        .as_ref()
        .expect("hoisting produces a let-clause")
        .display(&engine)
        .to_string();
    // The carrier exposes the hoisted result plus the fields the main
    // projection still reads.
    assert!(let_rendered.contains("__top: src.orders.first()"));
    assert!(let_rendered.contains("orders: src.orders"));
    assert!(let_rendered.contains("name: src.name"));
}
