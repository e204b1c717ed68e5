//! Schema inference and attribute resolution.
//!
//! Post-order walk: children's schemas are computed first, then this node's
//! own schema, then every expression attached to this node is resolved
//! against the schema named by the node's contract (e.g. a hash-join's left
//! key against the left child's schema, its right key against the right).
//!
//! Because join optimization replaces `From` subtrees with concrete join
//! trees, this pass runs twice: once before optimization (to give the
//! estimator bound tablenames/types) and once after (to bind slot indices in
//! the newly built join tree).

use itertools::Itertools;

use crate::database::Database;
use crate::error::{Error, ErrorKind, Span, WithErrorInfo};
use crate::expr::{Expr, ExprKind};
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::schema::{Attr, Schema};
use crate::value::Type;
use crate::Result;

pub fn resolve_plan(plan: &mut Plan, db: &Database, root: NodeId) -> Result<()> {
    for child in plan.children(root) {
        resolve_plan(plan, db, child)?;
    }
    infer_schema(plan, db, root).with_span(Some(Span(root)))?;
    resolve_exprs(plan, root).with_span(Some(Span(root)))
}

fn infer_schema(plan: &mut Plan, db: &Database, id: NodeId) -> Result<()> {
    let schema = match &plan.get(id).kind {
        PlanKind::Scan { table, alias } => db.schema(table)?.set_tablename(alias),
        PlanKind::SubQuerySource { child, alias } => plan.schema(*child).set_tablename(alias),
        PlanKind::DummyScan => Schema::empty(),
        PlanKind::Filter { child, .. }
        | PlanKind::OrderBy { child, .. }
        | PlanKind::Limit { child, .. }
        | PlanKind::Sink { child, .. } => plan.schema(*child).clone(),
        PlanKind::Project {
            child,
            exprs,
            aliases,
        } => {
            let child_schema = child.map(|c| plan.schema(c).clone()).unwrap_or_default();
            project_schema(exprs, aliases, &child_schema)?
        }
        PlanKind::From { children, .. } => {
            children
                .iter()
                .map(|c| plan.schema(*c).clone())
                .fold(Schema::empty(), |acc, s| acc.concat(&s))
        }
        PlanKind::ThetaJoin { l, r, .. } | PlanKind::HashJoin { l, r, .. } => {
            plan.schema(*l).concat(plan.schema(*r))
        }
        PlanKind::GroupBy {
            child,
            group_exprs,
            project_exprs,
            aliases,
        } => {
            let child_schema = plan.schema(*child).clone();
            let group_term_schema = group_term_schema(group_exprs, &child_schema);
            let schema = project_schema(project_exprs, aliases, &child_schema)?;
            plan.get_mut(id).group_term_schema = Some(group_term_schema);
            schema
        }
    };
    plan.get_mut(id).schema = Some(schema);
    Ok(())
}

fn project_schema(exprs: &[Expr], aliases: &[String], child_schema: &Schema) -> Result<Schema> {
    let attrs = exprs
        .iter()
        .zip(aliases.iter())
        .enumerate()
        .map(|(i, (e, alias))| {
            let ty = resolved_type_guess(e, child_schema);
            Attr::new(alias.clone(), ty).with_index(i)
        })
        .collect();
    Ok(Schema::new(attrs))
}

fn resolved_type_guess(e: &Expr, _child_schema: &Schema) -> Type {
    e.ty
}

/// The deduplicated sequence of attributes referenced by the group-by
/// expressions (the "group-term schema" of the glossary), used later to
/// resolve non-aggregate projection expressions.
fn group_term_schema(group_exprs: &[Expr], child_schema: &Schema) -> Schema {
    let mut seen = Vec::new();
    for ge in group_exprs {
        for col in ge.columns() {
            if let Some(idx) = col.index.or_else(|| child_schema.resolve(col).ok().flatten()) {
                if let Some(attr) = child_schema.get(idx) {
                    if !seen.iter().any(|a: &Attr| a.name == attr.name && a.table == attr.table) {
                        seen.push(attr.clone());
                    }
                }
            }
        }
    }
    for (i, a) in seen.iter_mut().enumerate() {
        a.index = Some(i);
    }
    Schema::new(seen)
}

fn resolve_exprs(plan: &mut Plan, id: NodeId) -> Result<()> {
    let node = plan.get(id).clone();
    match node.kind {
        PlanKind::Scan { .. } | PlanKind::DummyScan | PlanKind::SubQuerySource { .. } => {}
        PlanKind::Filter { child, mut cond } => {
            let schema = plan.schema(child).clone();
            resolve_expr(&mut cond, &schema)?;
            plan.get_mut(id).kind = PlanKind::Filter { child, cond };
        }
        PlanKind::Project {
            child,
            mut exprs,
            aliases,
        } => {
            let schema = child.map(|c| plan.schema(c).clone()).unwrap_or_default();
            for e in exprs.iter_mut() {
                resolve_expr(e, &schema)?;
            }
            plan.get_mut(id).kind = PlanKind::Project {
                child,
                exprs,
                aliases,
            };
            // Refresh the schema now that expression types are known.
            infer_schema_from_exprs(plan, id)?;
        }
        PlanKind::From { .. } => {
            // left as-is; removed by the optimizer before this matters again
        }
        PlanKind::ThetaJoin { l, r, mut cond } => {
            let schema = plan.schema(l).concat(plan.schema(r));
            resolve_expr(&mut cond, &schema)?;
            plan.get_mut(id).kind = PlanKind::ThetaJoin { l, r, cond };
        }
        PlanKind::HashJoin {
            l,
            r,
            mut left_key,
            mut right_key,
        } => {
            let lschema = plan.schema(l).clone();
            let rschema = plan.schema(r).clone();
            resolve_expr(&mut left_key, &lschema)?;
            resolve_expr(&mut right_key, &rschema)?;
            plan.get_mut(id).kind = PlanKind::HashJoin {
                l,
                r,
                left_key,
                right_key,
            };
        }
        PlanKind::GroupBy {
            child,
            mut group_exprs,
            mut project_exprs,
            aliases,
        } => {
            let child_schema = plan.schema(child).clone();
            for e in group_exprs.iter_mut() {
                resolve_expr(e, &child_schema)?;
            }
            let term_schema = group_term_schema(&group_exprs, &child_schema);
            for e in project_exprs.iter_mut() {
                if e.contains_agg() {
                    resolve_agg_args(e, &child_schema)?;
                } else {
                    resolve_expr(e, &term_schema)?;
                }
            }
            plan.get_mut(id).group_term_schema = Some(term_schema);
            plan.get_mut(id).kind = PlanKind::GroupBy {
                child,
                group_exprs,
                project_exprs,
                aliases,
            };
            infer_schema_from_exprs(plan, id)?;
        }
        PlanKind::OrderBy {
            child,
            mut order_exprs,
            asc,
        } => {
            let schema = plan.schema(child).clone();
            for e in order_exprs.iter_mut() {
                resolve_expr(e, &schema)?;
            }
            plan.get_mut(id).kind = PlanKind::OrderBy {
                child,
                order_exprs,
                asc,
            };
        }
        PlanKind::Limit {
            child,
            mut limit,
            mut offset,
        } => {
            let schema = Schema::empty();
            resolve_expr(&mut limit, &schema)?;
            if let Some(o) = offset.as_mut() {
                resolve_expr(o, &schema)?;
            }
            check_non_negative(&limit)?;
            if let Some(o) = &offset {
                check_non_negative(o)?;
            }
            plan.get_mut(id).kind = PlanKind::Limit {
                child,
                limit,
                offset,
            };
        }
        PlanKind::Sink { .. } => {}
    }
    Ok(())
}

fn infer_schema_from_exprs(plan: &mut Plan, id: NodeId) -> Result<()> {
    match &plan.get(id).kind {
        PlanKind::Project { exprs, aliases, .. } => {
            let attrs = exprs
                .iter()
                .zip(aliases.iter())
                .enumerate()
                .map(|(i, (e, a))| Attr::new(a.clone(), e.ty).with_index(i))
                .collect_vec();
            plan.get_mut(id).schema = Some(Schema::new(attrs));
        }
        PlanKind::GroupBy { project_exprs, aliases, .. } => {
            let attrs = project_exprs
                .iter()
                .zip(aliases.iter())
                .enumerate()
                .map(|(i, (e, a))| Attr::new(a.clone(), e.ty).with_index(i))
                .collect_vec();
            plan.get_mut(id).schema = Some(Schema::new(attrs));
        }
        _ => {}
    }
    Ok(())
}

fn resolve_agg_args(e: &mut Expr, child_schema: &Schema) -> Result<()> {
    if let ExprKind::AggCall { args, .. } = &mut e.kind {
        for a in args.iter_mut() {
            resolve_expr(a, child_schema)?;
        }
    }
    Ok(())
}

fn check_non_negative(e: &Expr) -> Result<()> {
    if let ExprKind::Literal(v) = &e.kind {
        if let Some(n) = v.as_num() {
            if n < 0.0 {
                return Err(Error::simple(
                    ErrorKind::Type,
                    "LIMIT/OFFSET must not be negative",
                ));
            }
        }
    }
    Ok(())
}

/// Binds every `Column` reference under `e` to a slot index in `schema`, and
/// type-checks arithmetic/comparison/BETWEEN operands once their operands
/// are bound.
pub fn resolve_expr(e: &mut Expr, schema: &Schema) -> Result<()> {
    match &mut e.kind {
        ExprKind::Literal(_) | ExprKind::Star { .. } => {}
        ExprKind::Column(attr) => {
            let idx = schema.resolve(attr).map_err(|n| {
                Error::ambiguous(ErrorKind::Resolution, attr.name.clone(), n)
            })?;
            let idx = idx.ok_or_else(|| {
                Error::not_found(ErrorKind::Resolution, attr.name.clone(), "column")
            })?;
            let bound = schema.get(idx).unwrap().clone();
            e.ty = bound.ty;
            *attr = bound;
        }
        ExprKind::Paren(inner) => {
            resolve_expr(inner, schema)?;
            e.ty = inner.ty;
        }
        ExprKind::Unary { expr, .. } => {
            resolve_expr(expr, schema)?;
            e.ty = expr.ty;
        }
        ExprKind::Binary { op, l, r } => {
            resolve_expr(l, schema)?;
            resolve_expr(r, schema)?;
            use crate::expr::BinOp;
            if matches!(op, BinOp::Arith(_) | BinOp::Cmp(_)) {
                l.require_numeric("left operand")?;
                r.require_numeric("right operand")?;
            }
        }
        ExprKind::Between { expr, lo, hi } => {
            resolve_expr(expr, schema)?;
            resolve_expr(lo, schema)?;
            resolve_expr(hi, schema)?;
            expr.require_numeric("BETWEEN operand")?;
            lo.require_numeric("BETWEEN lower bound")?;
            hi.require_numeric("BETWEEN upper bound")?;
        }
        ExprKind::ScalarCall { args, .. } | ExprKind::AggCall { args, .. } => {
            for a in args.iter_mut() {
                resolve_expr(a, schema)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::plan::{Plan, PlanKind, SinkKind};
    use crate::tuple::Tuple;
    use crate::value::Value;

    fn db_with_t() -> Database {
        let mut db = Database::new();
        let schema = Schema::new(vec![
            Attr::new("a", Type::Num).with_table("t").with_index(0),
            Attr::new("b", Type::Str).with_table("t").with_index(1),
        ]);
        db.register_dataframe(
            "t",
            schema,
            vec![Tuple::new(vec![Value::num(1.0), Value::Str("x".into())])],
        );
        db
    }

    #[test]
    fn scan_schema_is_tablename_qualified() {
        let db = db_with_t();
        let mut plan = Plan::new(PlanKind::Scan {
            table: "t".into(),
            alias: "t".into(),
        });
        let root = plan.root;
        resolve_plan(&mut plan, &db, root).unwrap();
        assert_eq!(plan.schema(root).len(), 2);
        assert_eq!(plan.schema(root).get(0).unwrap().table.as_deref(), Some("t"));
    }

    #[test]
    fn filter_resolves_column_against_child_schema() {
        let db = db_with_t();
        let mut plan = Plan::new(PlanKind::Scan {
            table: "t".into(),
            alias: "t".into(),
        });
        let scan = plan.root;
        let cond = Expr::binary(
            crate::expr::BinOp::Cmp(crate::expr::CmpOp::Gt),
            Expr::column(Attr::unbound("a")),
            Expr::literal(Value::num(0.0)),
        );
        let filter = plan.alloc(PlanKind::Filter { child: scan, cond });
        plan.set_root(filter);
        resolve_plan(&mut plan, &db, filter).unwrap();
        if let PlanKind::Filter { cond, .. } = &plan.get(filter).kind {
            let col = cond.columns()[0];
            assert_eq!(col.index, Some(0));
        } else {
            panic!("expected filter");
        }
    }

    #[test]
    fn ambiguous_column_is_rejected() {
        let db = db_with_t();
        let mut plan = Plan::new(PlanKind::Scan {
            table: "t".into(),
            alias: "l".into(),
        });
        let l = plan.root;
        let r = plan.alloc(PlanKind::Scan {
            table: "t".into(),
            alias: "r".into(),
        });
        let from = plan.alloc(PlanKind::From {
            children: vec![l, r],
            predicates: vec![],
        });
        plan.set_root(from);
        resolve_plan(&mut plan, &db, from).unwrap();
        let mut ambiguous = Expr::column(Attr::unbound("a"));
        let err = resolve_expr(&mut ambiguous, plan.schema(from));
        assert!(err.is_err());
    }
}
