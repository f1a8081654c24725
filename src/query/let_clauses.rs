// This module implements sub-expression hoisting for the projection compiler. While the
// main projection builds, the tracker records the current member path and hands out
// markers for hoisted sub-expressions; two hoists are shared when their expressions are
// equal and they sit at equivalent positions (same path prefix). Once the main projection
// is complete, build_let_clause synthesizes a minimal carrier type exposing exactly the
// hoisted results plus every source field the projection still reads, emits the preceding
// let-clause (source -> carrier), and rewrites the main projection so markers and source
// field accesses become carrier field accesses.

//! Let-clause tracking, carrier synthesis and projection rewriting.

use hashbrown::HashMap;

use crate::engine::Engine;
use crate::expr::{Expr, FieldRef};
use crate::graph::{FieldPath, TypePair};
use crate::query::QueryExpressions;
use crate::registry::{FieldDescriptor, TypeDescriptor, TypeId, TypeSource};

/// One hoisted sub-expression.
pub(crate) struct SavedSubQuery {
    /// Destination-name path at the hoist point.
    pub path: Vec<String>,
    /// The hoisted expression, rooted at the projection source.
    pub expr: Expr,
    pub marker: u32,
    pub ty: TypeId,
}

impl SavedSubQuery {
    /// Synthesized carrier field name for this hoist.
    fn field_name(&self) -> String {
        format!("__{}", self.path.join("#"))
    }
}

/// Traversal state for one projection build.
#[derive(Default)]
pub(crate) struct LetClauseTracker {
    current_path: Vec<String>,
    saved: Vec<SavedSubQuery>,
    depths: HashMap<TypePair, u32>,
    next_marker: u32,
}

impl LetClauseTracker {
    pub fn new() -> Self {
        LetClauseTracker::default()
    }

    pub fn push(&mut self, member: &str) {
        self.current_path.push(member.to_string());
    }

    pub fn pop(&mut self) {
        self.current_path.pop();
    }

    pub fn current_path(&self) -> FieldPath {
        FieldPath::new(self.current_path.iter().cloned())
    }

    /// Per-pair expansion depth; the first visit counts as zero.
    pub fn increment_depth(&mut self, pair: TypePair) -> u32 {
        let depth = match self.depths.get(&pair) {
            Some(previous) => previous + 1,
            None => 0,
        };
        self.depths.insert(pair, depth);
        depth
    }

    /// Hand out a marker for a hoisted sub-expression, reusing an existing
    /// one when an equal expression was hoisted at an equivalent position.
    pub fn marker_for(&mut self, expr: Expr, ty: TypeId) -> Expr {
        let prefix = self.path_prefix();
        if let Some(existing) = self.saved.iter().find(|s| {
            s.expr == expr && s.path.split_last().map(|(_, p)| p) == Some(prefix)
        }) {
            return Expr::SubQueryMarker {
                id: existing.marker,
                ty: existing.ty,
            };
        }
        let marker = self.next_marker;
        self.next_marker += 1;
        self.saved.push(SavedSubQuery {
            path: self.current_path.clone(),
            expr,
            marker,
            ty,
        });
        Expr::SubQueryMarker { id: marker, ty }
    }

    fn path_prefix(&self) -> &[String] {
        match self.current_path.split_last() {
            Some((_, prefix)) => prefix,
            None => &[],
        }
    }

    pub fn has_saved(&self) -> bool {
        !self.saved.is_empty()
    }

    pub fn into_saved(self) -> Vec<SavedSubQuery> {
        self.saved
    }
}

/// Build the preceding clause and rewrite the main projection over the
/// synthesized carrier.
pub(crate) fn build_let_clause(
    engine: &Engine,
    source_ty: TypeId,
    projection: Expr,
    saved: Vec<SavedSubQuery>,
) -> QueryExpressions {
    // Every source field the projection still reads directly must ride along
    // on the carrier.
    let mut passthrough: Vec<FieldRef> = Vec::new();
    projection.any(&mut |node| {
        let first_link = match node {
            Expr::GetField { base, field } if **base == Expr::Source => Some(*field),
            Expr::Chain { base, path, .. } if **base == Expr::Source => path.first().copied(),
            _ => None,
        };
        if let Some(field) = first_link {
            if field.owner == source_ty && !passthrough.contains(&field) {
                passthrough.push(field);
            }
        }
        false
    });

    let source_descriptor = engine.descriptor(source_ty);
    let mut fields = Vec::with_capacity(saved.len() + passthrough.len());
    for sub_query in &saved {
        fields.push(FieldDescriptor::new(sub_query.field_name(), sub_query.ty));
    }
    for link in &passthrough {
        let field = &source_descriptor.fields()[link.index as usize];
        fields.push(FieldDescriptor::new(field.name.clone(), field.ty));
    }
    let carrier_ty = engine.synthesize(TypeDescriptor::entity(
        format!("__{}_let", source_descriptor.name),
        fields,
    ));

    let mut bindings = Vec::with_capacity(saved.len() + passthrough.len());
    let mut marker_fields: HashMap<u32, u32> = HashMap::new();
    for (index, sub_query) in saved.iter().enumerate() {
        let carrier_field = FieldRef {
            owner: carrier_ty,
            index: index as u32,
        };
        marker_fields.insert(sub_query.marker, carrier_field.index);
        bindings.push((carrier_field, sub_query.expr.clone()));
    }
    let mut passthrough_fields: HashMap<u32, u32> = HashMap::new();
    for (offset, link) in passthrough.iter().enumerate() {
        let carrier_index = (saved.len() + offset) as u32;
        passthrough_fields.insert(link.index, carrier_index);
        bindings.push((
            FieldRef {
                owner: carrier_ty,
                index: carrier_index,
            },
            Expr::GetField {
                base: Expr::Source.boxed(),
                field: *link,
            },
        ));
    }
    let let_body = Expr::MemberInit {
        ty: carrier_ty,
        ctor_args: Vec::new(),
        bindings,
    };

    let rewritten = projection.rewrite(&mut |node| match node {
        Expr::SubQueryMarker { id, ty } => match marker_fields.get(&id) {
            Some(&index) => Expr::GetField {
                base: Expr::Source.boxed(),
                field: FieldRef {
                    owner: carrier_ty,
                    index,
                },
            },
            None => Expr::SubQueryMarker { id, ty },
        },
        Expr::GetField { base, field }
            if *base == Expr::Source && field.owner == source_ty =>
        {
            let index = passthrough_fields.get(&field.index).copied().unwrap_or(0);
            Expr::GetField {
                base,
                field: FieldRef {
                    owner: carrier_ty,
                    index,
                },
            }
        }
        Expr::Chain {
            base,
            path,
            fallback,
        } if *base == Expr::Source
            && path.first().is_some_and(|f| f.owner == source_ty) =>
        {
            let first = path[0];
            let index = passthrough_fields.get(&first.index).copied().unwrap_or(0);
            let carrier_access = Expr::GetField {
                base,
                field: FieldRef {
                    owner: carrier_ty,
                    index,
                },
            };
            if path.len() == 1 {
                carrier_access
            } else {
                Expr::Chain {
                    base: carrier_access.boxed(),
                    path: path[1..].iter().copied().collect(),
                    fallback,
                }
            }
        }
        other => other,
    });

    QueryExpressions {
        projection: Expr::Lambda {
            param: carrier_ty,
            body: rewritten.boxed(),
        },
        let_clause: Some(Expr::Lambda {
            param: source_ty,
            body: let_body.boxed(),
        }),
    }
}
