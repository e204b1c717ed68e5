//! Tree-walking interpreter. Evaluates a resolved, optimized [Plan] directly
//! against a [Database], with no pipelining, fusion or lineage capture.
//!
//! Exists only as a test oracle, never exposed as a user-facing execution
//! mode: tests check that [run] and the compiled executor in
//! [crate::codegen] agree on every query's output multiset.

use std::collections::HashMap;

use crate::database::Database;
use crate::error::{Error, ErrorKind};
use crate::expr::{ArithOp, BinOp, BoolOp, CmpOp, Expr, ExprKind, UnOp};
use crate::ir::plan::{NodeId, Plan, PlanKind, SinkKind};
use crate::tuple::Tuple;
use crate::udf::{AggImpl, UdfRegistry};
use crate::value::Value;
use crate::Result;

/// Runs `id` (and everything under it) against `db`, returning the output
/// multiset in scan-determined order. Callers that care about a total order
/// put an `OrderBy` at the root.
pub fn run(plan: &Plan, db: &Database, udfs: &UdfRegistry, id: NodeId) -> Result<Vec<Tuple>> {
    match &plan.get(id).kind {
        PlanKind::Scan { table, .. } => Ok(db.table(table)?.rows.clone()),
        PlanKind::DummyScan => Ok(vec![Tuple::new(vec![])]),
        PlanKind::SubQuerySource { child, .. } => run(plan, db, udfs, *child),
        PlanKind::Filter { child, cond } => {
            let rows = run(plan, db, udfs, *child)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if eval(cond, &row, udfs)?.as_bool().unwrap_or(false) {
                    out.push(row);
                }
            }
            Ok(out)
        }
        PlanKind::Project {
            child: Some(child),
            exprs,
            ..
        } => {
            let rows = run(plan, db, udfs, *child)?;
            rows.iter()
                .map(|row| {
                    let values = exprs
                        .iter()
                        .map(|e| eval(e, row, udfs))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Tuple::new(values))
                })
                .collect()
        }
        PlanKind::Project {
            child: None, exprs, ..
        } => {
            let empty = Tuple::new(vec![]);
            let values = exprs
                .iter()
                .map(|e| eval(e, &empty, udfs))
                .collect::<Result<Vec<_>>>()?;
            Ok(vec![Tuple::new(values)])
        }
        PlanKind::From { children, .. } => {
            // Interpreting an un-optimized plan directly degenerates the
            // n-ary FROM into a left-deep cross product; only used by tests
            // that deliberately skip the optimizer.
            let mut acc = run(plan, db, udfs, children[0])?;
            for &child in &children[1..] {
                let rhs = run(plan, db, udfs, child)?;
                acc = cross(&acc, &rhs);
            }
            Ok(acc)
        }
        PlanKind::ThetaJoin { l, r, cond } => {
            let left = run(plan, db, udfs, *l)?;
            let right = run(plan, db, udfs, *r)?;
            let mut out = Vec::new();
            for lrow in &left {
                for rrow in &right {
                    let combined = concat(lrow, rrow);
                    if eval(cond, &combined, udfs)?.as_bool().unwrap_or(false) {
                        out.push(combined);
                    }
                }
            }
            Ok(out)
        }
        PlanKind::HashJoin {
            l,
            r,
            left_key,
            right_key,
        } => {
            let left = run(plan, db, udfs, *l)?;
            let right = run(plan, db, udfs, *r)?;
            let mut buckets: HashMap<Value, Vec<&Tuple>> = HashMap::new();
            for lrow in &left {
                let key = eval(left_key, lrow, udfs)?;
                buckets.entry(key).or_default().push(lrow);
            }
            let mut out = Vec::new();
            for rrow in &right {
                let key = eval(right_key, rrow, udfs)?;
                if let Some(bucket) = buckets.get(&key) {
                    for lrow in bucket {
                        out.push(concat(lrow, rrow));
                    }
                }
            }
            Ok(out)
        }
        PlanKind::GroupBy {
            child,
            group_exprs,
            project_exprs,
            ..
        } => {
            let rows = run(plan, db, udfs, *child)?;
            let group_term_schema = plan
                .get(id)
                .group_term_schema
                .clone()
                .expect("group-term schema computed during resolution");
            let mut buckets: Vec<(Vec<Value>, Vec<Tuple>)> = Vec::new();
            let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
            for row in rows {
                let key: Vec<Value> = group_exprs
                    .iter()
                    .map(|e| eval(e, &row, udfs))
                    .collect::<Result<_>>()?;
                let term_vals: Vec<Value> = group_term_schema
                    .attrs
                    .iter()
                    .map(|a| row[a.index.unwrap_or(0)].clone())
                    .collect();
                let bucket_idx = *index.entry(key.clone()).or_insert_with(|| {
                    buckets.push((term_vals, Vec::new()));
                    buckets.len() - 1
                });
                buckets[bucket_idx].1.push(row);
            }
            buckets
                .into_iter()
                .map(|(term_vals, group_rows)| {
                    let term_row = Tuple::new(term_vals);
                    let values = project_exprs
                        .iter()
                        .map(|e| {
                            if e.contains_agg() {
                                eval_agg(e, &group_rows, udfs)
                            } else {
                                eval(e, &term_row, udfs)
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Tuple::new(values))
                })
                .collect()
        }
        PlanKind::OrderBy {
            child,
            order_exprs,
            asc,
        } => {
            let mut rows: Vec<(Vec<Value>, Tuple)> = run(plan, db, udfs, *child)?
                .into_iter()
                .map(|row| {
                    let key = order_exprs
                        .iter()
                        .map(|e| eval(e, &row, udfs))
                        .collect::<Result<Vec<_>>>()?;
                    Ok((key, row))
                })
                .collect::<Result<Vec<_>>>()?;
            // `sort_by` is a stable sort: ties keep scan order.
            rows.sort_by(|(a, _), (b, _)| {
                for (i, dir) in asc.iter().enumerate() {
                    let ord = a[i].cmp(&b[i]);
                    let ord = if *dir { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            Ok(rows.into_iter().map(|(_, row)| row).collect())
        }
        PlanKind::Limit {
            child,
            limit,
            offset,
        } => {
            let rows = run(plan, db, udfs, *child)?;
            let empty = Tuple::new(vec![]);
            let offset = match offset {
                Some(o) => eval(o, &empty, udfs)?.as_num().unwrap_or(0.0) as usize,
                None => 0,
            };
            let limit = eval(limit, &empty, udfs)?.as_num().unwrap_or(0.0) as usize;
            Ok(rows.into_iter().skip(offset).take(limit).collect())
        }
        PlanKind::Sink { child, kind } => {
            let rows = run(plan, db, udfs, *child)?;
            if *kind == SinkKind::Print {
                log::debug!("interp sink(print): {} row(s)", rows.len());
            }
            Ok(rows)
        }
    }
}

fn cross(left: &[Tuple], right: &[Tuple]) -> Vec<Tuple> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            out.push(concat(l, r));
        }
    }
    out
}

fn concat(l: &Tuple, r: &Tuple) -> Tuple {
    let mut values = l.as_slice().to_vec();
    values.extend(r.as_slice().iter().cloned());
    Tuple::new(values)
}

fn eval_agg(e: &Expr, rows: &[Tuple], udfs: &UdfRegistry) -> Result<Value> {
    let (name, args) = match &e.kind {
        ExprKind::AggCall { name, args, .. } => (name, args),
        _ => {
            return Err(Error::simple(
                ErrorKind::Compilation,
                "eval_agg called on a non-aggregate expression",
            ))
        }
    };
    let udf = udfs.agg(name)?;
    UdfRegistry::check_arity(name, udf.arity, args.len())?;
    match &udf.imp {
        AggImpl::WholeBucket(f) => {
            let cols: Vec<Vec<Value>> = args
                .iter()
                .map(|a| rows.iter().map(|row| eval(a, row, udfs)).collect())
                .collect::<Result<_>>()?;
            f(&cols)
        }
        AggImpl::Incremental(inc) => {
            let mut state = (inc.init)();
            for row in rows {
                let arg_vals: Vec<Value> = args
                    .iter()
                    .map(|a| eval(a, row, udfs))
                    .collect::<Result<_>>()?;
                (inc.update)(&mut state, &arg_vals)?;
            }
            Ok((inc.finalize)(&state))
        }
    }
}

/// Evaluates `e` against `row`. Aggregate calls are only meaningful inside a
/// group-by's projection and must be routed through [eval_agg] by the
/// caller; reaching one here is a compilation-contract violation.
pub fn eval(e: &Expr, row: &Tuple, udfs: &UdfRegistry) -> Result<Value> {
    match &e.kind {
        ExprKind::Literal(v) => Ok(v.clone()),
        ExprKind::Column(attr) => {
            let idx = attr.index.ok_or_else(|| {
                Error::simple(
                    ErrorKind::Compilation,
                    format!("column `{}` has no bound slot at evaluation time", attr.name),
                )
            })?;
            Ok(row[idx].clone())
        }
        ExprKind::Paren(inner) => eval(inner, row, udfs),
        ExprKind::Unary { op, expr } => {
            let v = eval(expr, row, udfs)?;
            Ok(match op {
                UnOp::Neg => Value::num(-v.as_num().unwrap_or(0.0)),
                UnOp::Not => Value::Bool(!v.as_bool().unwrap_or(false)),
            })
        }
        ExprKind::Binary { op, l, r } => {
            let lv = eval(l, row, udfs)?;
            let rv = eval(r, row, udfs)?;
            eval_binop(*op, lv, rv)
        }
        ExprKind::Between { expr, lo, hi } => {
            let v = eval(expr, row, udfs)?;
            let lo = eval(lo, row, udfs)?;
            let hi = eval(hi, row, udfs)?;
            Ok(Value::Bool(lo <= v && v <= hi))
        }
        ExprKind::ScalarCall { name, args } => {
            let udf = udfs.scalar(name)?;
            UdfRegistry::check_arity(name, udf.arity, args.len())?;
            let arg_vals: Vec<Value> = args
                .iter()
                .map(|a| eval(a, row, udfs))
                .collect::<Result<_>>()?;
            (udf.f)(&arg_vals)
        }
        ExprKind::AggCall { name, .. } => Err(Error::simple(
            ErrorKind::Compilation,
            format!("aggregate `{name}` evaluated outside a group-by projection"),
        )),
        ExprKind::Star { .. } => Err(Error::simple(
            ErrorKind::Compilation,
            "`*` must be expanded to column references before evaluation",
        )),
    }
}

fn eval_binop(op: BinOp, l: Value, r: Value) -> Result<Value> {
    Ok(match op {
        BinOp::Bool(BoolOp::And) => Value::Bool(l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false)),
        BinOp::Bool(BoolOp::Or) => Value::Bool(l.as_bool().unwrap_or(false) || r.as_bool().unwrap_or(false)),
        BinOp::Cmp(CmpOp::Eq) => Value::Bool(l == r),
        BinOp::Cmp(CmpOp::Neq) => Value::Bool(l != r),
        BinOp::Cmp(CmpOp::Lt) => Value::Bool(l < r),
        BinOp::Cmp(CmpOp::Lte) => Value::Bool(l <= r),
        BinOp::Cmp(CmpOp::Gt) => Value::Bool(l > r),
        BinOp::Cmp(CmpOp::Gte) => Value::Bool(l >= r),
        BinOp::Arith(arith) => {
            let a = l.as_num().unwrap_or(0.0);
            let b = r.as_num().unwrap_or(0.0);
            Value::num(match arith {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attr, Schema};
    use crate::value::Type;

    fn db_with_data() -> Database {
        let mut db = Database::new();
        let schema = Schema::new(vec![
            Attr::new("a", Type::Num).with_table("t").with_index(0),
            Attr::new("b", Type::Num).with_table("t").with_index(1),
        ]);
        let rows = vec![
            Tuple::new(vec![Value::num(1.0), Value::num(10.0)]),
            Tuple::new(vec![Value::num(2.0), Value::num(20.0)]),
        ];
        db.register_dataframe("t", schema, rows);
        db
    }

    #[test]
    fn filter_and_project_compose() {
        let db = db_with_data();
        let udfs = UdfRegistry::new();
        let mut plan = Plan::new(PlanKind::Scan {
            table: "t".into(),
            alias: "t".into(),
        });
        let scan = plan.root;
        let cond = Expr::binary(
            BinOp::Cmp(CmpOp::Gt),
            Expr::column(Attr::unbound("a")),
            Expr::literal(Value::num(1.0)),
        );
        let filter = plan.alloc(PlanKind::Filter { child: scan, cond });
        let project = plan.alloc(PlanKind::Project {
            child: Some(filter),
            exprs: vec![Expr::column(Attr::unbound("b"))],
            aliases: vec!["b".into()],
        });
        plan.set_root(project);
        crate::resolve::resolve_plan(&mut plan, &db, project).unwrap();

        let rows = run(&plan, &db, &udfs, project).unwrap();
        assert_eq!(rows, vec![Tuple::new(vec![Value::num(20.0)])]);
    }
}
