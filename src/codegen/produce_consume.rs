//! Per-operator produce/consume contracts, executed directly rather than
//! emitted as text (see [crate::codegen] module doc). Each `Row` is a tuple
//! plus the rid bookkeeping the lineage layer needs; `execute` walks the
//! plan in the same leaves-first order the pipeliner's pipelines are in,
//! assigning and composing lindexes as it goes.

use std::collections::HashMap;

use crate::database::Database;
use crate::error::{Error, ErrorKind};
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::lineage::{CapturePoint, LineagePolicy, LineageRegistry, Lindex};
use crate::tuple::Tuple;
use crate::udf::{AggImpl, UdfRegistry};
use crate::value::Value;
use crate::Result;

/// A tuple in flight through the compiled pipeline, carrying the rid of the
/// most recent capture point it passed through. `origin = None` means that
/// rid is still the original scan index (scans are an identity lindex, so
/// there is nothing to compose through).
#[derive(Debug, Clone)]
struct Row {
    tuple: Tuple,
    rid: usize,
    origin: Option<(NodeId, CapturePoint)>,
}

pub struct CompiledOutput {
    pub rows: Vec<Tuple>,
    pub lineage: LineageRegistry,
}

/// Runs the produce/consume protocol over `root` against `db`, applying
/// `policy` to decide which capture points build and keep a lindex.
pub fn execute(
    plan: &Plan,
    db: &Database,
    udfs: &UdfRegistry,
    policy: &LineagePolicy,
    root: NodeId,
) -> Result<CompiledOutput> {
    let mut ctx = Ctx {
        plan,
        db,
        udfs,
        policy,
        working: HashMap::new(),
        materialize: HashMap::new(),
        counters: HashMap::new(),
    };
    let rows = ctx.produce(root)?;
    let mut registry = LineageRegistry::new();
    for (key, lindex) in ctx.working {
        if ctx.materialize.get(&key).copied().unwrap_or(false) {
            registry.publish(key.0, key.1, lindex);
        }
    }
    Ok(CompiledOutput {
        rows: rows.into_iter().map(|r| r.tuple).collect(),
        lineage: registry,
    })
}

struct Ctx<'a> {
    plan: &'a Plan,
    db: &'a Database,
    udfs: &'a UdfRegistry,
    policy: &'a LineagePolicy,
    working: HashMap<(NodeId, CapturePoint), Lindex>,
    materialize: HashMap<(NodeId, CapturePoint), bool>,
    counters: HashMap<(NodeId, CapturePoint), usize>,
}

impl<'a> Ctx<'a> {
    fn next_rid(&mut self, key: (NodeId, CapturePoint)) -> usize {
        let counter = self.counters.entry(key).or_insert(0);
        let rid = *counter;
        *counter += 1;
        rid
    }

    /// Records lineage at a capture point for a single contributing input
    /// rid, returning the freshly minted output rid.
    fn capture_one(&mut self, node: NodeId, point: CapturePoint, alias: Option<&str>, row: &Row) -> usize {
        self.capture_many(node, point, alias, std::slice::from_ref(row))
    }

    /// Records lineage for a bucket of contributing rows that collapse into
    /// one output row (group-by's case), returning the new output rid.
    fn capture_many(&mut self, node: NodeId, point: CapturePoint, alias: Option<&str>, rows: &[Row]) -> usize {
        if !self.policy.should_capture(point, alias) {
            return self.next_rid((node, point));
        }
        let key = (node, point);
        if !self.materialize.contains_key(&key) {
            self.materialize.insert(key, self.policy.should_materialize(point, alias));
            self.working.insert(key, Lindex::dynamic(point));
        }
        let oid = self.next_rid(key);

        // Compose through the previous capture point only when it was not
        // itself materialized.
        let prev_key = rows.first().and_then(|r| r.origin);
        let prev = prev_key.filter(|k| !self.materialize.get(k).copied().unwrap_or(true)).and_then(|k| self.working.get(&k).cloned());

        let iids: Vec<usize> = rows.iter().map(|r| r.rid).collect();
        let lindex = self.working.get_mut(&key).expect("lindex created above");
        lindex.record(prev.as_ref(), &iids, oid);
        log::trace!("codegen: capture {:?}/{:?} oid={} from {:?}", node, point, oid, iids);
        oid
    }

    /// Allocates the rid a join shares between its two sides for one matched
    /// (left, right) pair, using the join's right-hand counter as the
    /// canonical source regardless of whether either side is itself under
    /// policy (mirroring a hash join's single shared output counter).
    fn join_oid(&mut self, node: NodeId) -> usize {
        self.next_rid((node, CapturePoint::JoinRight))
    }

    /// Records one side of a join match under a `oid` already shared with
    /// the other side. A no-op when `point` isn't captured under the
    /// current policy.
    fn record_join_side(&mut self, node: NodeId, point: CapturePoint, alias: Option<&str>, row: &Row, oid: usize) {
        if !self.policy.should_capture(point, alias) {
            return;
        }
        let key = (node, point);
        if !self.materialize.contains_key(&key) {
            self.materialize.insert(key, self.policy.should_materialize(point, alias));
            self.working.insert(key, Lindex::dynamic(point));
        }
        let prev_key = row.origin;
        let prev = prev_key.filter(|k| !self.materialize.get(k).copied().unwrap_or(true)).and_then(|k| self.working.get(&k).cloned());
        let lindex = self.working.get_mut(&key).expect("lindex created above");
        lindex.record(prev.as_ref(), std::slice::from_ref(&row.rid), oid);
        log::trace!("codegen: capture {:?}/{:?} oid={} from {:?}", node, point, oid, row.rid);
    }

    fn produce(&mut self, id: NodeId) -> Result<Vec<Row>> {
        match self.plan.get(id).kind.clone() {
            PlanKind::Scan { table, alias } => {
                log::trace!("codegen: scan {table} as {alias}");
                let rows = self.db.table(&table)?.rows.clone();
                Ok(rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, tuple)| Row { tuple, rid: i, origin: None })
                    .collect())
            }
            PlanKind::DummyScan => Ok(vec![Row {
                tuple: Tuple::new(vec![]),
                rid: 0,
                origin: None,
            }]),
            PlanKind::SubQuerySource { child, .. } => self.produce(child),
            PlanKind::Filter { child, cond } => {
                let rows = self.produce(child)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    if crate::interp::eval(&cond, &row.tuple, self.udfs)?
                        .as_bool()
                        .unwrap_or(false)
                    {
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
                let rows = self.produce(child)?;
                rows.into_iter()
                    .map(|row| {
                        let values = exprs
                            .iter()
                            .map(|e| crate::interp::eval(e, &row.tuple, self.udfs))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(Row {
                            tuple: Tuple::new(values),
                            ..row
                        })
                    })
                    .collect()
            }
            PlanKind::Project {
                child: None, exprs, ..
            } => {
                let empty = Tuple::new(vec![]);
                let values = exprs
                    .iter()
                    .map(|e| crate::interp::eval(e, &empty, self.udfs))
                    .collect::<Result<Vec<_>>>()?;
                Ok(vec![Row {
                    tuple: Tuple::new(values),
                    rid: 0,
                    origin: None,
                }])
            }
            PlanKind::From { .. } => Err(Error::simple(
                ErrorKind::Compilation,
                "codegen reached a From node; the join optimizer must run first",
            )),
            PlanKind::ThetaJoin { l, r, cond } => {
                let left = self.produce(l)?;
                let right = self.produce(r)?;
                let left_alias = node_alias(self.plan, l);
                let right_alias = node_alias(self.plan, r);
                let mut out = Vec::new();
                for rrow in &right {
                    for lrow in &left {
                        let combined = Tuple::new(
                            lrow.tuple
                                .as_slice()
                                .iter()
                                .chain(rrow.tuple.as_slice())
                                .cloned()
                                .collect(),
                        );
                        if crate::interp::eval(&cond, &combined, self.udfs)?
                            .as_bool()
                            .unwrap_or(false)
                        {
                            // One fresh oid per matched (left, right) pair,
                            // shared by both sides' lindexes.
                            let oid = self.join_oid(id);
                            self.record_join_side(id, CapturePoint::JoinLeft, left_alias.as_deref(), lrow, oid);
                            self.record_join_side(id, CapturePoint::JoinRight, right_alias.as_deref(), rrow, oid);
                            out.push(Row {
                                tuple: combined,
                                rid: oid,
                                origin: Some((id, CapturePoint::JoinRight)),
                            });
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
                let left = self.produce(l)?;
                let right = self.produce(r)?;
                let left_alias = node_alias(self.plan, l);
                let right_alias = node_alias(self.plan, r);
                let mut buckets: HashMap<Value, Vec<&Row>> = HashMap::new();
                for lrow in &left {
                    let key = crate::interp::eval(&left_key, &lrow.tuple, self.udfs)?;
                    buckets.entry(key).or_default().push(lrow);
                }
                let mut out = Vec::new();
                for rrow in &right {
                    let key = crate::interp::eval(&right_key, &rrow.tuple, self.udfs)?;
                    let Some(bucket) = buckets.get(&key) else {
                        continue;
                    };
                    for lrow in bucket {
                        // One fresh oid per matched (left, right) pair,
                        // shared by both sides' lindexes.
                        let oid = self.join_oid(id);
                        self.record_join_side(id, CapturePoint::JoinLeft, left_alias.as_deref(), lrow, oid);
                        self.record_join_side(id, CapturePoint::JoinRight, right_alias.as_deref(), rrow, oid);
                        let combined = Tuple::new(
                            lrow.tuple
                                .as_slice()
                                .iter()
                                .chain(rrow.tuple.as_slice())
                                .cloned()
                                .collect(),
                        );
                        out.push(Row {
                            tuple: combined,
                            rid: oid,
                            origin: Some((id, CapturePoint::JoinRight)),
                        });
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
                let rows = self.produce(child)?;
                let group_term_schema = self
                    .plan
                    .get(id)
                    .group_term_schema
                    .clone()
                    .expect("group-term schema computed during resolution");
                let mut buckets: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
                let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
                for row in rows {
                    let key: Vec<Value> = group_exprs
                        .iter()
                        .map(|e| crate::interp::eval(e, &row.tuple, self.udfs))
                        .collect::<Result<_>>()?;
                    let term_vals: Vec<Value> = group_term_schema
                        .attrs
                        .iter()
                        .map(|a| row.tuple[a.index.unwrap_or(0)].clone())
                        .collect();
                    let bucket_idx = *index.entry(key).or_insert_with(|| {
                        buckets.push((term_vals, Vec::new()));
                        buckets.len() - 1
                    });
                    buckets[bucket_idx].1.push(row);
                }
                let alias = node_alias(self.plan, child);
                buckets
                    .into_iter()
                    .map(|(term_vals, group_rows)| {
                        let new_oid = self.capture_many(id, CapturePoint::GroupByTop, alias.as_deref(), &group_rows);
                        let term_row = Tuple::new(term_vals);
                        let values = project_exprs
                            .iter()
                            .map(|e| {
                                if e.contains_agg() {
                                    eval_agg(e, &group_rows, self.udfs)
                                } else {
                                    crate::interp::eval(e, &term_row, self.udfs)
                                }
                            })
                            .collect::<Result<Vec<_>>>()?;
                        Ok(Row {
                            tuple: Tuple::new(values),
                            rid: new_oid,
                            origin: Some((id, CapturePoint::GroupByTop)),
                        })
                    })
                    .collect()
            }
            PlanKind::OrderBy {
                child,
                order_exprs,
                asc,
            } => {
                let rows = self.produce(child)?;
                let mut keyed: Vec<(Vec<Value>, Row)> = rows
                    .into_iter()
                    .map(|row| {
                        let key = order_exprs
                            .iter()
                            .map(|e| crate::interp::eval(e, &row.tuple, self.udfs))
                            .collect::<Result<Vec<_>>>()?;
                        Ok((key, row))
                    })
                    .collect::<Result<Vec<_>>>()?;
                keyed.sort_by(|(a, _), (b, _)| {
                    for (i, dir) in asc.iter().enumerate() {
                        let ord = a[i].cmp(&b[i]);
                        let ord = if *dir { ord } else { ord.reverse() };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                let alias = node_alias(self.plan, child);
                Ok(keyed
                    .into_iter()
                    .map(|(_, row)| {
                        let new_oid = self.capture_one(id, CapturePoint::OrderByTop, alias.as_deref(), &row);
                        Row {
                            rid: new_oid,
                            origin: Some((id, CapturePoint::OrderByTop)),
                            ..row
                        }
                    })
                    .collect())
            }
            PlanKind::Limit {
                child,
                limit,
                offset,
            } => {
                let rows = self.produce(child)?;
                let empty = Tuple::new(vec![]);
                let offset = match &offset {
                    Some(o) => crate::interp::eval(o, &empty, self.udfs)?.as_num().unwrap_or(0.0) as usize,
                    None => 0,
                };
                let limit = crate::interp::eval(&limit, &empty, self.udfs)?.as_num().unwrap_or(0.0) as usize;
                Ok(rows.into_iter().skip(offset).take(limit).collect())
            }
            PlanKind::Sink { child, kind } => {
                let rows = self.produce(child)?;
                let alias = node_alias(self.plan, child);
                let out = rows
                    .into_iter()
                    .map(|row| {
                        let new_oid = self.capture_one(id, CapturePoint::Sink, alias.as_deref(), &row);
                        log::trace!("codegen: sink({:?}) emits oid={}", kind, new_oid);
                        Row {
                            rid: new_oid,
                            origin: Some((id, CapturePoint::Sink)),
                            ..row
                        }
                    })
                    .collect();
                Ok(out)
            }
        }
    }
}

/// Walks down from `id` through single-child operators to the `Scan`/
/// `SubQuerySource` alias feeding it. Returns `None` once it hits a node
/// with more than one input (a join, or a no-FROM `Project`) since there is
/// then no single owning alias to report.
fn node_alias(plan: &Plan, id: NodeId) -> Option<String> {
    match &plan.get(id).kind {
        PlanKind::Scan { alias, .. } | PlanKind::SubQuerySource { alias, .. } => Some(alias.clone()),
        PlanKind::Filter { child, .. }
        | PlanKind::GroupBy { child, .. }
        | PlanKind::OrderBy { child, .. }
        | PlanKind::Limit { child, .. }
        | PlanKind::Sink { child, .. } => node_alias(plan, *child),
        PlanKind::Project { child: Some(child), .. } => node_alias(plan, *child),
        _ => None,
    }
}

fn eval_agg(e: &crate::expr::Expr, rows: &[Row], udfs: &UdfRegistry) -> Result<Value> {
    use crate::expr::ExprKind;
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
                .map(|a| rows.iter().map(|row| crate::interp::eval(a, &row.tuple, udfs)).collect())
                .collect::<Result<_>>()?;
            f(&cols)
        }
        AggImpl::Incremental(inc) => {
            let mut state = (inc.init)();
            for row in rows {
                let arg_vals: Vec<Value> = args
                    .iter()
                    .map(|a| crate::interp::eval(a, &row.tuple, udfs))
                    .collect::<Result<_>>()?;
                (inc.update)(&mut state, &arg_vals)?;
            }
            Ok((inc.finalize)(&state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::plan::SinkKind;
    use crate::lineage::LineagePolicy;
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
            Tuple::new(vec![Value::num(1.0), Value::num(20.0)]),
            Tuple::new(vec![Value::num(2.0), Value::num(30.0)]),
        ];
        db.register_dataframe("t", schema, rows);
        db
    }

    /// `orders(id, cid)` has two rows sharing a `cid` that matches exactly
    /// one `customers(id)` row, so a hash join on `orders.cid = customers.id`
    /// produces one right-hand match with two left-hand matches.
    fn join_db() -> Database {
        let mut db = Database::new();
        let orders_schema = Schema::new(vec![
            Attr::new("id", Type::Num).with_table("orders").with_index(0),
            Attr::new("cid", Type::Num).with_table("orders").with_index(1),
        ]);
        db.register_dataframe(
            "orders",
            orders_schema,
            vec![
                Tuple::new(vec![Value::num(1.0), Value::num(10.0)]),
                Tuple::new(vec![Value::num(2.0), Value::num(10.0)]),
                Tuple::new(vec![Value::num(3.0), Value::num(11.0)]),
            ],
        );
        let customers_schema =
            Schema::new(vec![Attr::new("id", Type::Num).with_table("customers").with_index(0)]);
        db.register_dataframe(
            "customers",
            customers_schema,
            vec![
                Tuple::new(vec![Value::num(10.0)]),
                Tuple::new(vec![Value::num(11.0)]),
            ],
        );
        db
    }

    fn join_plan(db: &Database) -> (Plan, NodeId, NodeId) {
        let mut plan = Plan::new(PlanKind::Scan {
            table: "orders".into(),
            alias: "orders".into(),
        });
        let orders = plan.root;
        let customers = plan.alloc(PlanKind::Scan {
            table: "customers".into(),
            alias: "customers".into(),
        });
        let join = plan.alloc(PlanKind::HashJoin {
            l: orders,
            r: customers,
            left_key: crate::expr::Expr::column(Attr::unbound("cid").with_table("orders")),
            right_key: crate::expr::Expr::column(Attr::unbound("id").with_table("customers")),
        });
        let sink = plan.alloc(PlanKind::Sink {
            child: join,
            kind: SinkKind::Collect,
        });
        plan.set_root(sink);
        crate::resolve::resolve_plan(&mut plan, db, sink).unwrap();
        (plan, join, sink)
    }

    #[test]
    fn hash_join_mints_one_oid_per_matched_pair_and_captures_both_sides() {
        let db = join_db();
        let udfs = UdfRegistry::new();
        let (plan, join, sink) = join_plan(&db);

        let policy = LineagePolicy::all();
        let out = execute(&plan, &db, &udfs, &policy, sink).unwrap();
        assert_eq!(out.rows.len(), 3);

        let sink_oids: Vec<usize> = (0..out.rows.len()).collect();
        let join_oids = out.lineage.back(sink, CapturePoint::Sink, &sink_oids);
        let mut sorted_oids = join_oids.clone();
        sorted_oids.sort();
        assert_eq!(sorted_oids, vec![0, 1, 2], "one fresh oid per matched pair, not one per right row");

        let left_rids: Vec<usize> = join_oids
            .iter()
            .map(|&oid| out.lineage.back(join, CapturePoint::JoinLeft, &[oid])[0])
            .collect();
        let mut sorted_left = left_rids.clone();
        sorted_left.sort();
        assert_eq!(sorted_left, vec![0, 1, 2], "each match pair must trace back to a distinct left row");

        let right_rids: Vec<usize> = join_oids
            .iter()
            .map(|&oid| out.lineage.back(join, CapturePoint::JoinRight, &[oid])[0])
            .collect();
        let mut right_counts: HashMap<usize, usize> = HashMap::new();
        for r in &right_rids {
            *right_counts.entry(*r).or_insert(0) += 1;
        }
        assert_eq!(
            right_counts.values().filter(|&&c| c == 2).count(),
            1,
            "the two orders sharing a cid should trace back to the same customer row"
        );
    }

    #[test]
    fn path_selected_policy_captures_join_sides_by_alias() {
        let db = join_db();
        let udfs = UdfRegistry::new();
        let (plan, join, sink) = join_plan(&db);

        let policy = LineagePolicy::path_selected(["orders".to_string()]);
        let out = execute(&plan, &db, &udfs, &policy, sink).unwrap();

        assert!(out.lineage.get(join, CapturePoint::JoinLeft).is_some());
        assert!(out.lineage.get(join, CapturePoint::JoinRight).is_none());
    }

    #[test]
    fn group_by_with_all_policy_tracks_backward_membership() {
        let db = db_with_data();
        let udfs = UdfRegistry::new();
        let mut plan = Plan::new(PlanKind::Scan {
            table: "t".into(),
            alias: "t".into(),
        });
        let scan = plan.root;
        let group = plan.alloc(PlanKind::GroupBy {
            child: scan,
            group_exprs: vec![crate::expr::Expr::column(Attr::unbound("a"))],
            project_exprs: vec![crate::expr::Expr::agg_call(
                "sum",
                vec![crate::expr::Expr::column(Attr::unbound("b"))],
                true,
            )],
            aliases: vec!["sum".into()],
        });
        let sink = plan.alloc(PlanKind::Sink {
            child: group,
            kind: SinkKind::Collect,
        });
        plan.set_root(sink);
        crate::resolve::resolve_plan(&mut plan, &db, sink).unwrap();

        let policy = LineagePolicy::all();
        let out = execute(&plan, &db, &udfs, &policy, sink).unwrap();
        assert_eq!(out.rows.len(), 2);

        let a1_group_oid = out
            .rows
            .iter()
            .position(|r| r.as_slice()[0] == Value::num(1.0))
            .unwrap();
        let input_rids = out.lineage.back(sink, CapturePoint::Sink, &[a1_group_oid]);
        let group_rids = out.lineage.back(group, CapturePoint::GroupByTop, &input_rids);
        let mut sorted = group_rids.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1]);
    }
}
