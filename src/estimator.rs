//! Cost, cardinality and selectivity estimation.

use std::collections::HashMap;

use crate::database::Database;
use crate::expr::{BinOp, BoolOp, CmpOp, Expr, ExprKind};
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::value::Type;

/// Per-optimization-run estimator state: a cache of computed costs/
/// cardinalities keyed by node id, and the `plans_tested` counter
/// incremented once per [Estimator::cost] call.
pub struct Estimator<'a> {
    plan: &'a Plan,
    db: &'a Database,
    costs: HashMap<NodeId, f64>,
    cards: HashMap<NodeId, f64>,
    pub plans_tested: usize,
}

impl<'a> Estimator<'a> {
    pub fn new(plan: &'a Plan, db: &'a Database) -> Self {
        Estimator {
            plan,
            db,
            costs: HashMap::new(),
            cards: HashMap::new(),
            plans_tested: 0,
        }
    }

    pub fn cost(&mut self, op: NodeId) -> f64 {
        self.plans_tested += 1;
        if let Some(c) = self.costs.get(&op) {
            return *c;
        }
        let cost = match &self.plan.get(op).kind {
            PlanKind::Scan { .. } => self.card(op),
            PlanKind::HashJoin { l, r, .. } => {
                self.cost(*l) + self.cost(*r) + 0.05 * self.card(op)
            }
            PlanKind::ThetaJoin { l, r, .. } => {
                self.cost(*l) + self.card(*l) * self.cost(*r) + 0.05 * self.card(op)
            }
            PlanKind::Filter { child, .. }
            | PlanKind::Project { child: Some(child), .. }
            | PlanKind::OrderBy { child, .. }
            | PlanKind::Limit { child, .. }
            | PlanKind::GroupBy { child, .. }
            | PlanKind::Sink { child, .. }
            | PlanKind::SubQuerySource { child, .. } => self.cost(*child),
            PlanKind::Project { child: None, .. } | PlanKind::DummyScan => 1.0,
            PlanKind::From { children, .. } => children.iter().map(|c| self.cost(*c)).sum(),
        };
        self.costs.insert(op, cost);
        cost
    }

    pub fn card(&mut self, op: NodeId) -> f64 {
        if let Some(c) = self.cards.get(&op) {
            return *c;
        }
        let card = match &self.plan.get(op).kind {
            PlanKind::Scan { table, .. } => {
                self.db.table(table).map(|t| t.card() as f64).unwrap_or(0.0)
            }
            PlanKind::DummyScan => 1.0,
            PlanKind::HashJoin { l, r, left_key, right_key } => {
                self.card(*l) * self.card(*r) * self.sel_hash_join(left_key, right_key)
            }
            PlanKind::ThetaJoin { l, r, cond } => {
                self.card(*l) * self.card(*r) * self.sel_cond(cond)
            }
            PlanKind::Filter { child, cond } => self.card(*child) * self.sel_cond(cond),
            PlanKind::Project { child: Some(child), .. }
            | PlanKind::OrderBy { child, .. }
            | PlanKind::SubQuerySource { child, .. } => self.card(*child),
            PlanKind::Project { child: None, .. } => 1.0,
            PlanKind::GroupBy { child, .. } => self.card(*child),
            PlanKind::Limit { child, limit, .. } => {
                let child_card = self.card(*child);
                match &limit.kind {
                    ExprKind::Literal(v) => v.as_num().unwrap_or(child_card).min(child_card),
                    _ => child_card,
                }
            }
            PlanKind::Sink { child, .. } => self.card(*child),
            PlanKind::From { children, .. } => {
                children.iter().map(|c| self.card(*c)).product()
            }
        };
        self.cards.insert(op, card);
        card
    }

    fn sel_hash_join(&self, left_key: &Expr, right_key: &Expr) -> f64 {
        self.sel_attr(left_key).min(self.sel_attr(right_key)).min(1.0)
    }

    fn sel_cond(&self, cond: &Expr) -> f64 {
        match &cond.kind {
            ExprKind::Binary {
                op: BinOp::Bool(BoolOp::And),
                l,
                r,
            } => self.sel_cond(l) * self.sel_cond(r),
            ExprKind::Binary {
                op: BinOp::Cmp(CmpOp::Eq),
                l,
                r,
            } => {
                if matches!(l.kind, ExprKind::Column(_)) {
                    self.sel_attr(l)
                } else if matches!(r.kind, ExprKind::Column(_)) {
                    self.sel_attr(r)
                } else {
                    0.05
                }
            }
            ExprKind::Paren(inner) => self.sel_cond(inner),
            _ => 0.05,
        }
    }

    /// `sel_attr` on a base-table-backed attribute; `1.0` if the attribute's
    /// origin cannot be traced to a base table (e.g. it came out of a prior
    /// join or a projection alias).
    fn sel_attr(&self, e: &Expr) -> f64 {
        let attr = match &e.kind {
            ExprKind::Column(a) => a,
            _ => return 1.0,
        };
        let (table, name) = match (&attr.table, &attr.name) {
            (Some(t), n) => (t, n),
            _ => return 1.0,
        };
        let table = match self.db.table(table) {
            Ok(t) => t,
            Err(_) => return 1.0,
        };
        let stats = table.col_stats(name);
        match attr.ty {
            Type::Num => match (stats.min, stats.max) {
                (Some(min), Some(max)) if max > min => 1.0 / (max - min + 1.0),
                _ => 0.05,
            },
            Type::Str => {
                if stats.ndistinct > 0 {
                    1.0 / stats.ndistinct as f64
                } else {
                    0.05
                }
            }
            _ => 0.05,
        }
    }
}
