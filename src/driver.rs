//! Compiled-query driver: owns a plan that has been optimized and pipelined
//! once, and can be invoked against a [Database] repeatedly, each call
//! getting its own fresh [LineageRegistry].
//!
//! There is no textual "emitted code" to cache (see [crate::codegen]'s
//! module doc), so "compiling" means running the optimizer and pipeliner
//! once and keeping the resulting plan and pipeline list around for reuse.

use crate::database::Database;
use crate::error::Error;
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::lineage::{LineagePolicy, LineageRegistry};
use crate::pipeline::{build_pipelines, Pipelines};
use crate::tuple::Tuple;
use crate::udf::UdfRegistry;
use crate::Result;

/// Compilation options.
#[derive(Debug, Clone)]
pub struct Options {
    pub lineage_policy: LineagePolicy,
    pub pretty_print: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lineage_policy: LineagePolicy::none(),
            pretty_print: true,
        }
    }
}

impl Options {
    pub fn with_lineage_policy(mut self, policy: LineagePolicy) -> Self {
        self.lineage_policy = policy;
        self
    }

    pub fn with_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }
}

/// A plan that has passed through resolution, join optimization and
/// pipelining exactly once, ready to run against a [Database] any number of
/// times.
pub struct CompiledQuery {
    plan: Plan,
    root: NodeId,
    pipelines: Pipelines,
    opt: Options,
    udfs: UdfRegistry,
    plans_tested: usize,
}

/// Optimizes `plan`, runs the pipeliner, and leaves the emitted procedure
/// as the plan itself (see [crate::codegen]). `plan`'s root must already
/// have had its first resolution pass run so the
/// optimizer's cost estimator has bound types; this function runs the
/// second pass itself once optimization settles the join tree.
pub fn compile(mut plan: Plan, db: &Database, udfs: UdfRegistry, opt: Options) -> Result<CompiledQuery> {
    let froms = plan.collect_kind(plan.root, &|k| matches!(k, PlanKind::From { .. }));
    let mut plans_tested = 0;
    for from_id in froms {
        let (new_root, tested) = crate::optimizer::selinger::optimize(&mut plan, db, from_id)?;
        plans_tested += tested;
        match plan.parent(from_id) {
            Some(parent) => plan.replace_child(parent, from_id, new_root),
            None => plan.set_root(new_root),
        }
    }
    let root = plan.root;
    crate::resolve::resolve_plan(&mut plan, db, root)?;

    let pipelines = build_pipelines(&plan, root);
    Ok(CompiledQuery {
        plan,
        root,
        pipelines,
        opt,
        udfs,
        plans_tested,
    })
}

impl CompiledQuery {
    /// Number of candidate joins the optimizer costed while building this
    /// query's plan.
    pub fn plans_tested(&self) -> usize {
        self.plans_tested
    }

    /// Looks up the (sub)plan node scanning `alias`.
    pub fn source_op(&self, alias: &str) -> Option<NodeId> {
        self.plan
            .collect_kind(self.root, &|k| match k {
                PlanKind::Scan { alias: a, .. } | PlanKind::SubQuerySource { alias: a, .. } => a == alias,
                _ => false,
            })
            .into_iter()
            .next()
    }

    /// Renders the pipeline list as a tree dump, standing in for a textual
    /// emitted-source printout (see [crate::codegen]'s module doc for why
    /// there is no source text here).
    pub fn print_code(&self) -> String {
        let mut out = String::new();
        for (i, pipeline) in self.pipelines.pipelines.iter().enumerate() {
            out.push_str(&format!("pipeline {i}:\n"));
            for t in &pipeline.translators {
                let kind = &self.plan.get(t.node).kind;
                out.push_str(&format!("  {:?} {:?}\n", t.role, kind.as_ref()));
            }
        }
        out
    }

    /// Runs the compiled plan against `db`, returning its output rows and a
    /// freshly populated lineage registry.
    pub fn run(&self, db: &Database) -> Result<(Vec<Tuple>, LineageRegistry)> {
        let out = crate::codegen::execute(&self.plan, db, &self.udfs, &self.opt.lineage_policy, self.root)?;
        Ok((out.rows, out.lineage))
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }
}

/// Convenience wrapper: builds a [CompiledQuery] and immediately runs it
/// once.
pub fn compile_and_run(
    plan: Plan,
    db: &Database,
    udfs: UdfRegistry,
    opt: Options,
) -> Result<(Vec<Tuple>, LineageRegistry)> {
    let compiled = compile(plan, db, udfs, opt)?;
    compiled.run(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, CmpOp, Expr};
    use crate::schema::{Attr, Schema};
    use crate::value::{Type, Value};
    use crate::ir::plan::SinkKind;

    fn two_table_db() -> Database {
        let mut db = Database::new();
        let s1 = Schema::new(vec![Attr::new("id", Type::Num).with_table("a").with_index(0)]);
        db.register_dataframe(
            "a",
            s1,
            (0..5).map(|i| Tuple::new(vec![Value::num(i as f64)])).collect(),
        );
        let s2 = Schema::new(vec![Attr::new("id", Type::Num).with_table("b").with_index(0)]);
        db.register_dataframe(
            "b",
            s2,
            (0..5).map(|i| Tuple::new(vec![Value::num(i as f64)])).collect(),
        );
        db
    }

    #[test]
    fn compiles_and_runs_a_two_way_join() {
        let db = two_table_db();
        let mut plan = Plan::new(PlanKind::Scan {
            table: "a".into(),
            alias: "a".into(),
        });
        let left = plan.root;
        let right = plan.alloc(PlanKind::Scan {
            table: "b".into(),
            alias: "b".into(),
        });
        let pred = Expr::binary(
            BinOp::Cmp(CmpOp::Eq),
            Expr::column(Attr::unbound("id").with_table("a")),
            Expr::column(Attr::unbound("id").with_table("b")),
        );
        let from = plan.alloc(PlanKind::From {
            children: vec![left, right],
            predicates: vec![pred],
        });
        let sink = plan.alloc(PlanKind::Sink {
            child: from,
            kind: SinkKind::Collect,
        });
        plan.set_root(sink);
        crate::resolve::resolve_plan(&mut plan, &db, sink).unwrap();

        let compiled = compile(plan, &db, UdfRegistry::new(), Options::default()).unwrap();
        assert!(compiled.plans_tested() > 0);
        let (rows, _lineage) = compiled.run(&db).unwrap();
        assert_eq!(rows.len(), 5);
        assert!(compiled.source_op("a").is_some());
    }
}
