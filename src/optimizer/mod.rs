//! Join order optimizer. Converts a `From(children, predicates)` fragment
//! into a binary tree of physical joins. Two search strategies share the
//! same predicate classification and candidate-generation logic: [selinger]
//! (bottom-up DP, the default) and [exhaustive] (unmemoized recursion,
//! retained as a test oracle).

pub mod exhaustive;
pub mod selinger;

use std::collections::BTreeSet;

use crate::error::{Error, ErrorKind};
use crate::expr::{BinOp, BoolOp, CmpOp, Expr, ExprKind};
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::value::Value;
use crate::Result;

/// A join predicate: a binary equality between two attributes owned by
/// distinct leaves of the `From` being optimized.
#[derive(Debug, Clone)]
pub struct JoinPredicate {
    pub expr: Expr,
    pub left_leaf: usize,
    pub right_leaf: usize,
    pub left_expr: Expr,
    pub right_expr: Expr,
}

/// Memoization key for a set of relations. Leaf indices serve as the
/// canonical key rather than sorted alias strings, avoiding a string
/// allocation per DP cell.
#[derive(Debug, Clone)]
pub struct JoinInfo {
    pub leaves: BTreeSet<usize>,
    pub pred_idxs: Vec<usize>,
    pub best_plan: Option<NodeId>,
    pub best_cost: f64,
}

impl JoinInfo {
    pub fn singleton(leaf: usize) -> Self {
        JoinInfo {
            leaves: [leaf].into_iter().collect(),
            pred_idxs: Vec::new(),
            best_plan: None,
            best_cost: f64::INFINITY,
        }
    }

    pub fn merge(&self, other: &JoinInfo, preds: &[JoinPredicate]) -> JoinInfo {
        let leaves: BTreeSet<usize> = self.leaves.union(&other.leaves).cloned().collect();
        let pred_idxs = predicates_within(preds, &leaves);
        JoinInfo {
            leaves,
            pred_idxs,
            best_plan: None,
            best_cost: f64::INFINITY,
        }
    }

    pub fn overlaps(&self, other: &JoinInfo) -> bool {
        !self.leaves.is_disjoint(&other.leaves)
    }
}

pub fn canonical_key(leaves: &BTreeSet<usize>) -> Vec<usize> {
    leaves.iter().cloned().collect()
}

pub fn predicates_within(preds: &[JoinPredicate], leaves: &BTreeSet<usize>) -> Vec<usize> {
    preds
        .iter()
        .enumerate()
        .filter(|(_, p)| leaves.contains(&p.left_leaf) && leaves.contains(&p.right_leaf))
        .map(|(i, _)| i)
        .collect()
}

/// Predicates bridging exactly `left` and `right` (one endpoint in each).
pub fn bridging_predicates<'a>(
    preds: &'a [JoinPredicate],
    pred_idxs: &[usize],
    left: &BTreeSet<usize>,
    right: &BTreeSet<usize>,
) -> Vec<&'a JoinPredicate> {
    pred_idxs
        .iter()
        .map(|&i| &preds[i])
        .filter(|p| {
            (left.contains(&p.left_leaf) && right.contains(&p.right_leaf))
                || (left.contains(&p.right_leaf) && right.contains(&p.left_leaf))
        })
        .collect()
}

/// Classifies a `From`'s predicates into join predicates (binary equality
/// over two distinct child aliases) and leftover predicates, which remain as
/// a `Filter` stacked above the optimized join tree.
pub fn classify_predicates(
    plan: &Plan,
    children: &[NodeId],
    predicates: Vec<Expr>,
) -> Result<(Vec<JoinPredicate>, Vec<Expr>)> {
    let mut alias_to_leaf = std::collections::HashMap::new();
    for (i, child) in children.iter().enumerate() {
        for attr in &plan.schema(*child).attrs {
            if let Some(table) = &attr.table {
                alias_to_leaf.insert(table.clone(), i);
            }
        }
    }

    let mut join_preds = Vec::new();
    let mut leftover = Vec::new();
    for predicate in predicates {
        if let ExprKind::Binary {
            op: BinOp::Cmp(CmpOp::Eq),
            l,
            r,
        } = &predicate.kind
        {
            if let (ExprKind::Column(lc), ExprKind::Column(rc)) = (&l.kind, &r.kind) {
                if let (Some(lt), Some(rt)) = (&lc.table, &rc.table) {
                    if let (Some(&li), Some(&ri)) =
                        (alias_to_leaf.get(lt), alias_to_leaf.get(rt))
                    {
                        if li != ri {
                            join_preds.push(JoinPredicate {
                                expr: predicate.clone(),
                                left_leaf: li,
                                right_leaf: ri,
                                left_expr: (**l).clone(),
                                right_expr: (**r).clone(),
                            });
                            continue;
                        }
                    } else {
                        return Err(Error::simple(
                            ErrorKind::Optimizer,
                            format!(
                                "join predicate references an alias not in the FROM: {lt} or {rt}"
                            ),
                        ));
                    }
                }
            }
        }
        leftover.push(predicate);
    }
    Ok((join_preds, leftover))
}

fn cnf_and(mut exprs: Vec<Expr>) -> Expr {
    let mut acc = exprs.remove(0);
    for e in exprs {
        acc = Expr::binary(BinOp::Bool(BoolOp::And), acc, e);
    }
    acc
}

/// Allocates every physical alternative for joining `l_plan` (owning
/// `l_leaves`) with `r_plan` (owning `r_leaves`) given the predicates that
/// bridge them.
pub fn build_candidates(
    plan: &mut Plan,
    l_leaves: &BTreeSet<usize>,
    l_plan: NodeId,
    r_plan: NodeId,
    bridging: &[&JoinPredicate],
) -> Vec<NodeId> {
    if bridging.is_empty() {
        let cond = Expr::literal(Value::Bool(true));
        return vec![plan.alloc(PlanKind::ThetaJoin {
            l: l_plan,
            r: r_plan,
            cond,
        })];
    }

    let mut out = Vec::new();
    for p in bridging {
        let (left_key, right_key) = if l_leaves.contains(&p.left_leaf) {
            (p.left_expr.clone(), p.right_expr.clone())
        } else {
            (p.right_expr.clone(), p.left_expr.clone())
        };
        out.push(plan.alloc(PlanKind::HashJoin {
            l: l_plan,
            r: r_plan,
            left_key: left_key.clone(),
            right_key: right_key.clone(),
        }));
        out.push(plan.alloc(PlanKind::HashJoin {
            l: r_plan,
            r: l_plan,
            left_key: right_key,
            right_key: left_key,
        }));
    }
    let cnf = cnf_and(bridging.iter().map(|p| p.expr.clone()).collect());
    out.push(plan.alloc(PlanKind::ThetaJoin {
        l: l_plan,
        r: r_plan,
        cond: cnf.clone(),
    }));
    out.push(plan.alloc(PlanKind::ThetaJoin {
        l: r_plan,
        r: l_plan,
        cond: cnf,
    }));
    out
}

/// Fixes every parent pointer under `root` to match the arena's actual child
/// slots. Needed because constructing rejected candidates during costing
/// temporarily overwrites a child's `parent` slot; only the chosen plan
/// needs its parent pointers fixed up afterward.
pub fn fix_parent_pointers(plan: &mut Plan, root: NodeId) {
    for child in plan.children(root) {
        plan.get_mut(child).parent = Some(root);
        fix_parent_pointers(plan, child);
    }
}

/// Wraps `base` in a stack of `Filter`s for predicates the optimizer could
/// not turn into a join condition.
pub fn wrap_leftover_filters(plan: &mut Plan, base: NodeId, leftover: Vec<Expr>) -> NodeId {
    leftover.into_iter().fold(base, |child, cond| {
        plan.alloc(PlanKind::Filter { child, cond })
    })
}
