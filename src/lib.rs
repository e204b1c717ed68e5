//! # databass
//!
//! An educational analytical query engine: cost-based join order
//! optimization, produce/consume query compilation, and fine-grained
//! row-level lineage tracking over an in-memory columnar-ish table store.
//!
//! There is no SQL surface parser: callers build a [`ir::plan::Plan`]
//! directly against the arena in [ir::plan], resolve it, and hand it to
//! [driver::compile]. The pieces, in the order a query actually moves
//! through them:
//!
//! ```text
//! Plan (arena)
//!   │ resolve::resolve_plan      — bind column slots, infer schemas
//!   ▼
//! optimizer::selinger / exhaustive  — replace From fragments with join trees
//!   │ resolve::resolve_plan (again) — bind slots in the new join tree
//!   ▼
//! pipeline::build_pipelines   — split into produce/consume pipelines
//!   │ codegen::execute          — run pipelines directly, tracking lineage
//!   ▼
//! Vec<Tuple> + LineageRegistry
//! ```
//!
//! [driver::compile] chains all of the above into a [driver::CompiledQuery]
//! that can be run against a [database::Database] any number of times.

#![forbid(unsafe_code)]
#![allow(clippy::result_large_err)]

pub mod codegen;
pub mod database;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod expr;
pub mod interp;
pub mod ir;
pub mod lineage;
pub mod optimizer;
pub mod pipeline;
pub mod resolve;
pub mod schema;
pub mod tuple;
pub mod udf;
pub mod value;

pub use driver::{compile, compile_and_run, CompiledQuery, Options};
pub use error::{Error, Result};
pub use lineage::{LineagePolicy, LineageRegistry};

#[cfg(doctest)]
#[doc = include_str!("../README.md")]
pub struct ReadmeDoctests;
