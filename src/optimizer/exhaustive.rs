//! Exhaustive recursive join enumeration: considers every bipartition of
//! the leaf set with no memoization, used as a test oracle to confirm
//! Selinger DP never produces a worse plan.

use std::collections::BTreeSet;

use super::{
    build_candidates, bridging_predicates, classify_predicates, fix_parent_pointers,
    predicates_within, wrap_leftover_filters, JoinPredicate,
};
use crate::database::Database;
use crate::estimator::Estimator;
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::Result;

pub fn optimize(plan: &mut Plan, db: &Database, from_id: NodeId) -> Result<(NodeId, usize)> {
    let (children, predicates) = match &plan.get(from_id).kind {
        PlanKind::From {
            children,
            predicates,
        } => (children.clone(), predicates.clone()),
        _ => panic!("optimize_exhaustive called on a non-From node"),
    };
    let n = children.len();
    let (join_preds, leftover) = classify_predicates(plan, &children, predicates)?;
    let mut estimator = Estimator::new(plan, db);

    let full: BTreeSet<usize> = (0..n).collect();
    let (best, _) = best_plan_for(plan, &children, &join_preds, &mut estimator, &full);
    let chosen = best.expect("exhaustive search must find a plan covering every leaf");

    fix_parent_pointers(plan, chosen);
    let new_root = wrap_leftover_filters(plan, chosen, leftover);
    Ok((new_root, estimator.plans_tested))
}

/// Returns the cheapest physical plan joining exactly the leaves in `set`,
/// and its cost. Recurses over every non-trivial bipartition of `set`;
/// nothing is memoized, so overlapping subproblems across sibling calls are
/// recomputed from scratch (that repetition is the point: it is the oracle
/// against which Selinger DP's memoized search is checked).
fn best_plan_for(
    plan: &mut Plan,
    children: &[NodeId],
    join_preds: &[JoinPredicate],
    estimator: &mut Estimator,
    set: &BTreeSet<usize>,
) -> (Option<NodeId>, f64) {
    if set.len() == 1 {
        let leaf = *set.iter().next().unwrap();
        let node = children[leaf];
        let cost = estimator.cost(node);
        return (Some(node), cost);
    }

    let members: Vec<usize> = set.iter().cloned().collect();
    let mut best: Option<NodeId> = None;
    let mut best_cost = f64::INFINITY;

    for mask in 1..(1u32 << members.len()) - 1 {
        let left_set: BTreeSet<usize> = members
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, &v)| v)
            .collect();
        let right_set: BTreeSet<usize> = set.difference(&left_set).cloned().collect();
        if left_set.is_empty() || right_set.is_empty() || left_set > right_set {
            // Each unordered bipartition is considered once.
            continue;
        }

        let pred_idxs = predicates_within(join_preds, set);
        if predicates_within(join_preds, &left_set).len() == pred_idxs.len()
            && predicates_within(join_preds, &right_set).len() == pred_idxs.len()
        {
            // No predicate bridges left_set and right_set: still a valid
            // split (cross product), just costed without a bridging key.
        }

        let (l_plan, _) = best_plan_for(plan, children, join_preds, estimator, &left_set);
        let (r_plan, _) = best_plan_for(plan, children, join_preds, estimator, &right_set);
        let (Some(l_plan), Some(r_plan)) = (l_plan, r_plan) else {
            continue;
        };

        let bridging = bridging_predicates(join_preds, &pred_idxs, &left_set, &right_set);
        for candidate in build_candidates(plan, &left_set, l_plan, r_plan, &bridging) {
            let cost = estimator.cost(candidate);
            if cost < best_cost {
                best_cost = cost;
                best = Some(candidate);
            }
        }
    }

    (best, best_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::expr::{BinOp, CmpOp, Expr};
    use crate::schema::{Attr, Schema};
    use crate::tuple::Tuple;
    use crate::value::{Type, Value};

    #[test]
    fn matches_selinger_on_a_three_way_chain_join() {
        let mut db = Database::new();
        for name in ["a", "b", "c"] {
            let schema = Schema::new(vec![
                Attr::new("id", Type::Num).with_table(name).with_index(0),
            ]);
            db.register_dataframe(
                name,
                schema,
                (0..4).map(|i| Tuple::new(vec![Value::num(i as f64)])).collect(),
            );
        }

        let build_from = || {
            let mut plan = Plan::new(PlanKind::Scan {
                table: "a".into(),
                alias: "a".into(),
            });
            let a = plan.root;
            let b = plan.alloc(PlanKind::Scan {
                table: "b".into(),
                alias: "b".into(),
            });
            let c = plan.alloc(PlanKind::Scan {
                table: "c".into(),
                alias: "c".into(),
            });
            let ab = Expr::binary(
                BinOp::Cmp(CmpOp::Eq),
                Expr::column(Attr::unbound("id").with_table("a")),
                Expr::column(Attr::unbound("id").with_table("b")),
            );
            let bc = Expr::binary(
                BinOp::Cmp(CmpOp::Eq),
                Expr::column(Attr::unbound("id").with_table("b")),
                Expr::column(Attr::unbound("id").with_table("c")),
            );
            let from = plan.alloc(PlanKind::From {
                children: vec![a, b, c],
                predicates: vec![ab, bc],
            });
            plan.set_root(from);
            (plan, from)
        };

        let (mut plan_a, from_a) = build_from();
        crate::resolve::resolve_plan(&mut plan_a, &db, from_a).unwrap();
        let (_root_a, tested_exhaustive) = optimize(&mut plan_a, &db, from_a).unwrap();

        let (mut plan_b, from_b) = build_from();
        crate::resolve::resolve_plan(&mut plan_b, &db, from_b).unwrap();
        let (_root_b, tested_selinger) = super::super::selinger::optimize(&mut plan_b, &db, from_b).unwrap();

        assert!(tested_exhaustive >= tested_selinger);
    }
}
