#![cfg(not(target_family = "wasm"))]

//! Thin CLI exercising the library end to end. There is no SQL surface
//! parser in this crate, so the CLI drives a small built-in demo plan
//! against a built-in in-memory database rather than parsing user SQL; it
//! exists to prove the optimizer/pipeliner/driver chain runs.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::database::Database;
use crate::driver::{self, Options};
use crate::expr::{BinOp, CmpOp, Expr};
use crate::ir::plan::{Plan, PlanKind, SinkKind};
use crate::lineage::LineagePolicy;
use crate::schema::{Attr, Schema};
use crate::tuple::Tuple;
use crate::udf::UdfRegistry;
use crate::value::{Type, Value};

/// Entrypoint called by [`crate::main`]
pub fn main() -> color_eyre::eyre::Result<()> {
    env_logger::builder().format_timestamp(None).init();
    color_eyre::install()?;
    let cli = Cli::parse();
    cli.command.run().map_err(Into::into)
}

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), about, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, optimize, and run the demo two-table join query.
    Run {
        /// Track row-level lineage while running.
        #[arg(long)]
        lineage: bool,
    },
    /// Print the demo query's pipeline tree without running it.
    Explain,
}

impl Command {
    fn run(&self) -> Result<()> {
        match self {
            Command::Run { lineage } => {
                let db = demo_database();
                let plan = demo_plan(&db)?;
                let opt = Options::default().with_lineage_policy(if *lineage {
                    LineagePolicy::all()
                } else {
                    LineagePolicy::none()
                });
                let compiled = driver::compile(plan, &db, UdfRegistry::new(), opt)?;
                println!("plans_tested = {}", compiled.plans_tested());
                let (rows, registry) = compiled.run(&db)?;
                for row in &rows {
                    println!("{row}");
                }
                if *lineage {
                    println!("lineage entries tracked: {}", rows.len());
                    let _ = registry;
                }
            }
            Command::Explain => {
                let db = demo_database();
                let plan = demo_plan(&db)?;
                let compiled = driver::compile(plan, &db, UdfRegistry::new(), Options::default())?;
                print!("{}", compiled.print_code());
            }
        }
        Ok(())
    }
}

fn demo_database() -> Database {
    let mut db = Database::new();
    let orders = Schema::new(vec![
        Attr::new("id", Type::Num).with_table("orders").with_index(0),
        Attr::new("customer_id", Type::Num).with_table("orders").with_index(1),
        Attr::new("total", Type::Num).with_table("orders").with_index(2),
    ]);
    db.register_dataframe(
        "orders",
        orders,
        vec![
            Tuple::new(vec![Value::num(1.0), Value::num(10.0), Value::num(99.5)]),
            Tuple::new(vec![Value::num(2.0), Value::num(11.0), Value::num(40.0)]),
            Tuple::new(vec![Value::num(3.0), Value::num(10.0), Value::num(12.25)]),
        ],
    );
    let customers = Schema::new(vec![
        Attr::new("id", Type::Num).with_table("customers").with_index(0),
        Attr::new("name", Type::Str).with_table("customers").with_index(1),
    ]);
    db.register_dataframe(
        "customers",
        customers,
        vec![
            Tuple::new(vec![Value::num(10.0), Value::Str("Ada".into())]),
            Tuple::new(vec![Value::num(11.0), Value::Str("Grace".into())]),
        ],
    );
    db
}

/// `SELECT customers.name, orders.total FROM orders, customers WHERE
/// orders.customer_id = customers.id`, built directly against the plan
/// arena (no parser in scope, see module doc).
fn demo_plan(db: &Database) -> Result<Plan> {
    let mut plan = Plan::new(PlanKind::Scan {
        table: "orders".into(),
        alias: "orders".into(),
    });
    let orders = plan.root;
    let customers = plan.alloc(PlanKind::Scan {
        table: "customers".into(),
        alias: "customers".into(),
    });
    let pred = Expr::binary(
        BinOp::Cmp(CmpOp::Eq),
        Expr::column(Attr::unbound("customer_id").with_table("orders")),
        Expr::column(Attr::unbound("id").with_table("customers")),
    );
    let from = plan.alloc(PlanKind::From {
        children: vec![orders, customers],
        predicates: vec![pred],
    });
    let project = plan.alloc(PlanKind::Project {
        child: Some(from),
        exprs: vec![
            Expr::column(Attr::unbound("name").with_table("customers")),
            Expr::column(Attr::unbound("total").with_table("orders")),
        ],
        aliases: vec!["name".into(), "total".into()],
    });
    let sink = plan.alloc(PlanKind::Sink {
        child: project,
        kind: SinkKind::Collect,
    });
    plan.set_root(sink);
    crate::resolve::resolve_plan(&mut plan, db, sink)?;
    Ok(plan)
}
