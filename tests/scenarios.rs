//! End-to-end behavioral tests, built directly against the plan arena since
//! there is no SQL surface parser in scope.

use databass::database::Database;
use databass::driver::{self, Options};
use databass::expr::{ArithOp, BinOp, CmpOp, Expr};
use databass::interp;
use databass::ir::plan::{Plan, PlanKind, SinkKind};
use databass::lineage::{CapturePoint, LineagePolicy};
use databass::schema::{Attr, Schema};
use databass::tuple::Tuple;
use databass::udf::UdfRegistry;
use databass::value::{Type, Value};

fn seed_data() -> Database {
    let mut db = Database::new();
    let schema = Schema::new(vec![
        Attr::new("a", Type::Num).with_table("data").with_index(0),
        Attr::new("b", Type::Num).with_table("data").with_index(1),
        Attr::new("c", Type::Num).with_table("data").with_index(2),
        Attr::new("f", Type::Num).with_table("data").with_index(3),
    ]);
    // c = 0 -> 2.0 (5 rows), c = 1 -> 3.0 (5 rows); sum(f) = 200 and 220
    // respectively, count(a) = 10 total, once we project `c+2`.
    let rows = (0..10)
        .map(|i| {
            let c = if i < 5 { 0.0 } else { 1.0 };
            let f = if i < 5 { 40.0 } else { 44.0 };
            Tuple::new(vec![Value::num(i as f64), Value::num(i as f64 * 10.0), Value::num(c), Value::num(f)])
        })
        .collect();
    db.register_dataframe("data", schema, rows);
    db
}

/// `SELECT 1 ORDER BY 1` produces one row `(1)`.
#[test]
fn constant_select_with_order_by_produces_one_row() {
    let db = Database::new();
    let udfs = UdfRegistry::new();
    let mut plan = Plan::new(PlanKind::Project {
        child: None,
        exprs: vec![Expr::literal(Value::num(1.0))],
        aliases: vec!["1".into()],
    });
    let project = plan.root;
    let order = plan.alloc(PlanKind::OrderBy {
        child: project,
        order_exprs: vec![Expr::column(Attr::unbound("1"))],
        asc: vec![true],
    });
    let sink = plan.alloc(PlanKind::Sink {
        child: order,
        kind: SinkKind::Collect,
    });
    plan.set_root(sink);
    databass::resolve::resolve_plan(&mut plan, &db, sink).unwrap();

    let rows = interp::run(&plan, &db, &udfs, sink).unwrap();
    assert_eq!(rows, vec![Tuple::new(vec![Value::num(1.0)])]);
}

/// `SELECT * FROM data ORDER BY a, b` sorts ascending by a then b.
#[test]
fn order_by_two_columns_is_stable() {
    let db = seed_data();
    let udfs = UdfRegistry::new();
    let mut plan = Plan::new(PlanKind::Scan {
        table: "data".into(),
        alias: "data".into(),
    });
    let scan = plan.root;
    let order = plan.alloc(PlanKind::OrderBy {
        child: scan,
        order_exprs: vec![
            Expr::column(Attr::unbound("a")),
            Expr::column(Attr::unbound("b")),
        ],
        asc: vec![true, true],
    });
    plan.set_root(order);
    databass::resolve::resolve_plan(&mut plan, &db, order).unwrap();

    let rows = interp::run(&plan, &db, &udfs, order).unwrap();
    let a_values: Vec<f64> = rows.iter().map(|r| r.as_slice()[0].as_num().unwrap()).collect();
    let mut sorted = a_values.clone();
    sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
    assert_eq!(a_values, sorted);
}

/// `SELECT c+2, sum(f), count(a) FROM data GROUP BY c` yields
/// `{(2.0, 200, 5), (3.0, 220, 5)}` for our ten-row seed.
#[test]
fn group_by_with_aggregates() {
    let db = seed_data();
    let udfs = UdfRegistry::new();
    let mut plan = Plan::new(PlanKind::Scan {
        table: "data".into(),
        alias: "data".into(),
    });
    let scan = plan.root;
    let group = plan.alloc(PlanKind::GroupBy {
        child: scan,
        group_exprs: vec![Expr::column(Attr::unbound("c"))],
        project_exprs: vec![
            Expr::binary(
                BinOp::Arith(ArithOp::Add),
                Expr::column(Attr::unbound("c")),
                Expr::literal(Value::num(2.0)),
            ),
            Expr::agg_call("sum", vec![Expr::column(Attr::unbound("f"))], true),
            Expr::agg_call("count", vec![Expr::column(Attr::unbound("a"))], true),
        ],
        aliases: vec!["c".into(), "sum".into(), "count".into()],
    });
    plan.set_root(group);
    databass::resolve::resolve_plan(&mut plan, &db, group).unwrap();

    let mut rows = interp::run(&plan, &db, &udfs, group).unwrap();
    rows.sort_by(|a, b| a.as_slice()[0].partial_cmp(&b.as_slice()[0]).unwrap());
    assert_eq!(
        rows,
        vec![
            Tuple::new(vec![Value::num(2.0), Value::num(200.0), Value::num(5.0)]),
            Tuple::new(vec![Value::num(3.0), Value::num(220.0), Value::num(5.0)]),
        ]
    );
}

fn five_way_chain_db() -> Database {
    let mut db = Database::new();
    for name in ["t1", "t2", "t3", "t4", "t5"] {
        let schema = Schema::new(vec![Attr::new("a", Type::Num).with_table(name).with_index(0)]);
        let rows = (0..20).map(|i| Tuple::new(vec![Value::num(i as f64)])).collect();
        db.register_dataframe(name, schema, rows);
    }
    db
}

fn chain_join_plan(db: &Database) -> (Plan, databass::ir::plan::NodeId) {
    let mut plan = Plan::new(PlanKind::Scan {
        table: "t1".into(),
        alias: "t1".into(),
    });
    let t1 = plan.root;
    let t2 = plan.alloc(PlanKind::Scan {
        table: "t2".into(),
        alias: "t2".into(),
    });
    let t3 = plan.alloc(PlanKind::Scan {
        table: "t3".into(),
        alias: "t3".into(),
    });
    let t4 = plan.alloc(PlanKind::Scan {
        table: "t4".into(),
        alias: "t4".into(),
    });
    let t5 = plan.alloc(PlanKind::Scan {
        table: "t5".into(),
        alias: "t5".into(),
    });
    let eq = |l: &str, lt: &str, r: &str, rt: &str| {
        Expr::binary(
            BinOp::Cmp(CmpOp::Eq),
            Expr::column(Attr::unbound(l).with_table(lt)),
            Expr::column(Attr::unbound(r).with_table(rt)),
        )
    };
    let preds = vec![
        eq("a", "t1", "a", "t2"),
        eq("a", "t2", "a", "t3"),
        eq("a", "t3", "a", "t4"),
        eq("a", "t4", "a", "t5"),
    ];
    let from = plan.alloc(PlanKind::From {
        children: vec![t1, t2, t3, t4, t5],
        predicates: preds,
    });
    let sink = plan.alloc(PlanKind::Sink {
        child: from,
        kind: SinkKind::Collect,
    });
    plan.set_root(sink);
    databass::resolve::resolve_plan(&mut plan, db, sink).unwrap();
    (plan, sink)
}

/// Over a 5-way chain join, Selinger tests no more candidate joins than the
/// exhaustive oracle.
#[test]
fn selinger_tests_no_more_plans_than_exhaustive() {
    let db = five_way_chain_db();

    let (mut selinger_plan, sink) = chain_join_plan(&db);
    let from_id = match &selinger_plan.get(sink).kind {
        PlanKind::Sink { child, .. } => *child,
        _ => unreachable!(),
    };
    let (_new_root, selinger_tested) =
        databass::optimizer::selinger::optimize(&mut selinger_plan, &db, from_id).unwrap();

    let (mut exhaustive_plan, sink2) = chain_join_plan(&db);
    let from_id2 = match &exhaustive_plan.get(sink2).kind {
        PlanKind::Sink { child, .. } => *child,
        _ => unreachable!(),
    };
    let (_new_root2, exhaustive_tested) =
        databass::optimizer::exhaustive::optimize(&mut exhaustive_plan, &db, from_id2).unwrap();

    assert!(selinger_tested <= exhaustive_tested);
}

/// Compile-and-run matches the interpreter's output multiset for a simple
/// projection over a join-free plan.
#[test]
fn compiled_and_interpreted_outputs_agree() {
    let db = seed_data();
    let udfs = UdfRegistry::new();

    let build = || {
        let mut plan = Plan::new(PlanKind::Scan {
            table: "data".into(),
            alias: "data".into(),
        });
        let scan = plan.root;
        let project = plan.alloc(PlanKind::Project {
            child: Some(scan),
            exprs: vec![Expr::binary(
                BinOp::Arith(ArithOp::Add),
                Expr::column(Attr::unbound("a")),
                Expr::column(Attr::unbound("b")),
            )],
            aliases: vec!["sum".into()],
        });
        let sink = plan.alloc(PlanKind::Sink {
            child: project,
            kind: SinkKind::Collect,
        });
        plan.set_root(sink);
        databass::resolve::resolve_plan(&mut plan, &db, sink).unwrap();
        (plan, sink)
    };

    let (interp_plan, interp_sink) = build();
    let mut interpreted = interp::run(&interp_plan, &db, &udfs, interp_sink).unwrap();

    let (compile_plan, _) = build();
    let compiled = driver::compile(compile_plan, &db, UdfRegistry::new(), Options::default()).unwrap();
    let (mut rows, _) = compiled.run(&db).unwrap();

    let key = |t: &Tuple| t.as_slice()[0].as_num().unwrap();
    interpreted.sort_by(|a, b| key(a).partial_cmp(&key(b)).unwrap());
    rows.sort_by(|a, b| key(a).partial_cmp(&key(b)).unwrap());
    assert_eq!(interpreted, rows);
}

/// Under the `all` lineage policy, `GROUP BY a` backward-maps a group's
/// output row to exactly the rows sharing that `a` value.
#[test]
fn group_by_lineage_round_trip() {
    let db = seed_data();
    let mut plan = Plan::new(PlanKind::Scan {
        table: "data".into(),
        alias: "data".into(),
    });
    let scan = plan.root;
    let group = plan.alloc(PlanKind::GroupBy {
        child: scan,
        group_exprs: vec![Expr::column(Attr::unbound("a"))],
        project_exprs: vec![
            Expr::column(Attr::unbound("a")),
            Expr::agg_call("sum", vec![Expr::column(Attr::unbound("b"))], true),
        ],
        aliases: vec!["a".into(), "sum".into()],
    });
    let sink = plan.alloc(PlanKind::Sink {
        child: group,
        kind: SinkKind::Collect,
    });
    plan.set_root(sink);
    databass::resolve::resolve_plan(&mut plan, &db, sink).unwrap();

    let opt = Options::default().with_lineage_policy(LineagePolicy::all());
    let compiled = driver::compile(plan, &db, UdfRegistry::new(), opt).unwrap();
    let (rows, registry) = compiled.run(&db).unwrap();

    // Since `a` is a per-row unique key here, every group has exactly one
    // contributing scan row.
    let target = rows
        .iter()
        .position(|r| r.as_slice()[0] == Value::num(1.0))
        .unwrap();
    let input_rids = registry.back(sink, CapturePoint::Sink, &[target]);
    let group_rids = registry.back(group, CapturePoint::GroupByTop, &input_rids);
    assert_eq!(group_rids, vec![1]);
}

/// Limit/offset semantics over scan order.
#[test]
fn limit_and_offset_follow_scan_order() {
    let db = seed_data();
    let udfs = UdfRegistry::new();
    let mut plan = Plan::new(PlanKind::Scan {
        table: "data".into(),
        alias: "data".into(),
    });
    let scan = plan.root;
    let limit = plan.alloc(PlanKind::Limit {
        child: scan,
        limit: Expr::literal(Value::num(3.0)),
        offset: Some(Expr::literal(Value::num(2.0))),
    });
    plan.set_root(limit);
    databass::resolve::resolve_plan(&mut plan, &db, limit).unwrap();

    let rows = interp::run(&plan, &db, &udfs, limit).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].as_slice()[0], Value::num(2.0));
    assert_eq!(rows[2].as_slice()[0], Value::num(4.0));
}
