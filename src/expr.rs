// This module defines the typed expression AST both compilation backends build from. The
// executable backend evaluates these nodes with the interpreter in plan::exec; the query
// backend emits them as its output representation (projection lambdas, member-init trees,
// hoisted let-clauses). Keeping one AST means chain construction, guarded custom
// expressions and member-init shapes are written once and only the final lowering step
// differs. Two parameters are modeled positionally rather than by name: Source is the
// parameter of the enclosing lambda (the routine's source object, or the carrier after a
// let-clause rewrite) and It is the element parameter of the enclosing Select. Constants
// are restricted to ConstValue so expressions stay Send + Sync inside shared plans.

//! The shared expression AST.

use smallvec::SmallVec;
use std::fmt;

use crate::registry::{TypeId, TypeSource};
use crate::value::ConstValue;

/// A field of a registered type, by owner and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub owner: TypeId,
    pub index: u32,
}

/// Aggregations a query provider cannot embed directly inside a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    First,
}

impl AggregateOp {
    fn name(self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::First => "first",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The parameter of the enclosing lambda.
    Source,
    /// The element parameter of the enclosing `Select`.
    It,
    /// The caller-supplied destination of the routine.
    ExistingDest,
    Constant(ConstValue),
    /// The default value of a type: zero for numeric value types, null for
    /// reference types.
    Default(TypeId),
    GetField {
        base: Box<Expr>,
        field: FieldRef,
    },
    /// Null-checked member chain: any null link short-circuits the whole
    /// chain to the default of `fallback`.
    Chain {
        base: Box<Expr>,
        path: SmallVec<[FieldRef; 4]>,
        fallback: TypeId,
    },
    /// Construct an instance; `args` feed the declared constructor parameters
    /// in order.
    Construct {
        ty: TypeId,
        args: Vec<Expr>,
    },
    /// Construct then bind fields: the projection backend's output shape.
    MemberInit {
        ty: TypeId,
        ctor_args: Vec<Expr>,
        bindings: Vec<(FieldRef, Expr)>,
    },
    /// `value` unless it is null, then `fallback`.
    Coalesce {
        value: Box<Expr>,
        fallback: Box<Expr>,
    },
    /// Evaluate `body`; a recoverable error degrades to `fallback`.
    TryRecover {
        body: Box<Expr>,
        fallback: Box<Expr>,
    },
    Aggregate {
        op: AggregateOp,
        input: Box<Expr>,
    },
    /// Element-wise projection over a list.
    Select {
        input: Box<Expr>,
        body: Box<Expr>,
    },
    Lambda {
        param: TypeId,
        body: Box<Expr>,
    },
    /// Placeholder for a hoisted sub-expression, rewritten into a carrier
    /// field access once the let-clause is built.
    SubQueryMarker {
        id: u32,
        ty: TypeId,
    },
}

impl Expr {
    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }

    /// Build a null-checked chain over `base`, or return `base` when the path
    /// is empty.
    pub fn chain(base: Expr, path: impl IntoIterator<Item = FieldRef>, fallback: TypeId) -> Expr {
        let path: SmallVec<[FieldRef; 4]> = path.into_iter().collect();
        if path.is_empty() {
            base
        } else {
            Expr::Chain {
                base: base.boxed(),
                path,
                fallback,
            }
        }
    }

    /// Whether any node satisfies `pred`.
    pub fn any(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Expr::GetField { base, .. } => base.any(pred),
            Expr::Chain { base, .. } => base.any(pred),
            Expr::Construct { args, .. } => args.iter().any(|a| a.any(pred)),
            Expr::MemberInit {
                ctor_args,
                bindings,
                ..
            } => {
                ctor_args.iter().any(|a| a.any(pred))
                    || bindings.iter().any(|(_, e)| e.any(pred))
            }
            Expr::Coalesce { value, fallback } => value.any(pred) || fallback.any(pred),
            Expr::TryRecover { body, fallback } => body.any(pred) || fallback.any(pred),
            Expr::Aggregate { input, .. } => input.any(pred),
            Expr::Select { input, body } => input.any(pred) || body.any(pred),
            Expr::Lambda { body, .. } => body.any(pred),
            _ => false,
        }
    }

    /// Whether the expression contains an aggregation, the construct a query
    /// provider cannot embed inside a projection.
    pub fn has_aggregate(&self) -> bool {
        self.any(&mut |e| matches!(e, Expr::Aggregate { .. }))
    }

    /// Bottom-up rewrite: children are rebuilt first, then `f` is applied to
    /// the resulting node. `f` sees every node, including lambda bodies.
    pub fn rewrite(self, f: &mut impl FnMut(Expr) -> Expr) -> Expr {
        let rebuilt = match self {
            Expr::GetField { base, field } => Expr::GetField {
                base: base.rewrite(f).boxed(),
                field,
            },
            Expr::Chain {
                base,
                path,
                fallback,
            } => Expr::Chain {
                base: base.rewrite(f).boxed(),
                path,
                fallback,
            },
            Expr::Construct { ty, args } => Expr::Construct {
                ty,
                args: args.into_iter().map(|a| a.rewrite(f)).collect(),
            },
            Expr::MemberInit {
                ty,
                ctor_args,
                bindings,
            } => Expr::MemberInit {
                ty,
                ctor_args: ctor_args.into_iter().map(|a| a.rewrite(f)).collect(),
                bindings: bindings
                    .into_iter()
                    .map(|(field, e)| (field, e.rewrite(f)))
                    .collect(),
            },
            Expr::Coalesce { value, fallback } => Expr::Coalesce {
                value: value.rewrite(f).boxed(),
                fallback: fallback.rewrite(f).boxed(),
            },
            Expr::TryRecover { body, fallback } => Expr::TryRecover {
                body: body.rewrite(f).boxed(),
                fallback: fallback.rewrite(f).boxed(),
            },
            Expr::Aggregate { op, input } => Expr::Aggregate {
                op,
                input: input.rewrite(f).boxed(),
            },
            Expr::Select { input, body } => Expr::Select {
                input: input.rewrite(f).boxed(),
                body: body.rewrite(f).boxed(),
            },
            Expr::Lambda { param, body } => Expr::Lambda {
                param,
                body: body.rewrite(f).boxed(),
            },
            leaf => leaf,
        };
        f(rebuilt)
    }

    /// Replace `Source` with `replacement`, respecting lambda scoping: nested
    /// lambdas rebind `Source`, so the substitution stops at them.
    pub fn substitute_source(self, replacement: &Expr) -> Expr {
        match self {
            Expr::Source => replacement.clone(),
            Expr::Lambda { .. } => self,
            Expr::GetField { base, field } => Expr::GetField {
                base: base.substitute_source(replacement).boxed(),
                field,
            },
            Expr::Chain {
                base,
                path,
                fallback,
            } => Expr::Chain {
                base: base.substitute_source(replacement).boxed(),
                path,
                fallback,
            },
            Expr::Construct { ty, args } => Expr::Construct {
                ty,
                args: args
                    .into_iter()
                    .map(|a| a.substitute_source(replacement))
                    .collect(),
            },
            Expr::MemberInit {
                ty,
                ctor_args,
                bindings,
            } => Expr::MemberInit {
                ty,
                ctor_args: ctor_args
                    .into_iter()
                    .map(|a| a.substitute_source(replacement))
                    .collect(),
                bindings: bindings
                    .into_iter()
                    .map(|(field, e)| (field, e.substitute_source(replacement)))
                    .collect(),
            },
            Expr::Coalesce { value, fallback } => Expr::Coalesce {
                value: value.substitute_source(replacement).boxed(),
                fallback: fallback.substitute_source(replacement).boxed(),
            },
            Expr::TryRecover { body, fallback } => Expr::TryRecover {
                body: body.substitute_source(replacement).boxed(),
                fallback: fallback.substitute_source(replacement).boxed(),
            },
            Expr::Aggregate { op, input } => Expr::Aggregate {
                op,
                input: input.substitute_source(replacement).boxed(),
            },
            Expr::Select { input, body } => Expr::Select {
                input: input.substitute_source(replacement).boxed(),
                // The select body still sees the outer lambda parameter.
                body: body.substitute_source(replacement).boxed(),
            },
            leaf => leaf,
        }
    }

    /// Render the expression against a type source, for logs and tests.
    pub fn display<'a>(&'a self, types: &'a dyn TypeSource) -> ExprDisplay<'a> {
        ExprDisplay { expr: self, types }
    }
}

/// Display adapter resolving field and type names.
pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    types: &'a dyn TypeSource,
}

impl ExprDisplay<'_> {
    fn fmt_expr(&self, expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.types;
        let field_name = |field: &FieldRef| -> String {
            let descriptor = types.descriptor(field.owner);
            descriptor
                .fields()
                .get(field.index as usize)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| format!("#{}", field.index))
        };
        match expr {
            Expr::Source => write!(f, "src"),
            Expr::It => write!(f, "it"),
            Expr::ExistingDest => write!(f, "dest"),
            Expr::Constant(c) => write!(f, "{}", c),
            Expr::Default(ty) => write!(f, "default({})", types.descriptor(*ty).name),
            Expr::GetField { base, field } => {
                self.fmt_expr(base, f)?;
                write!(f, ".{}", field_name(field))
            }
            Expr::Chain { base, path, .. } => {
                self.fmt_expr(base, f)?;
                for field in path {
                    write!(f, ".{}", field_name(field))?;
                }
                Ok(())
            }
            Expr::Construct { ty, args } => {
                write!(f, "new {}(", types.descriptor(*ty).name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_expr(arg, f)?;
                }
                write!(f, ")")
            }
            Expr::MemberInit {
                ty,
                ctor_args,
                bindings,
            } => {
                write!(f, "new {}(", types.descriptor(*ty).name)?;
                for (i, arg) in ctor_args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_expr(arg, f)?;
                }
                write!(f, ") {{ ")?;
                for (i, (field, e)) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", field_name(field))?;
                    self.fmt_expr(e, f)?;
                }
                write!(f, " }}")
            }
            Expr::Coalesce { value, fallback } => {
                self.fmt_expr(value, f)?;
                write!(f, " ?? ")?;
                self.fmt_expr(fallback, f)
            }
            Expr::TryRecover { body, fallback } => {
                write!(f, "try(")?;
                self.fmt_expr(body, f)?;
                write!(f, ", ")?;
                self.fmt_expr(fallback, f)?;
                write!(f, ")")
            }
            Expr::Aggregate { op, input } => {
                self.fmt_expr(input, f)?;
                write!(f, ".{}()", op.name())
            }
            Expr::Select { input, body } => {
                self.fmt_expr(input, f)?;
                write!(f, ".select(it => ")?;
                self.fmt_expr(body, f)?;
                write!(f, ")")
            }
            Expr::Lambda { body, .. } => {
                write!(f, "src => ")?;
                self.fmt_expr(body, f)
            }
            Expr::SubQueryMarker { id, .. } => write!(f, "<let:{}>", id),
        }
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_expr(self.expr, f)
    }
}
