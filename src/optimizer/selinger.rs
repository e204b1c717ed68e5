//! Selinger-style bottom-up dynamic programming join enumeration.

use std::collections::{BTreeSet, HashMap};

use super::{
    build_candidates, bridging_predicates, canonical_key, classify_predicates,
    fix_parent_pointers, wrap_leftover_filters, JoinInfo, JoinPredicate,
};
use crate::database::Database;
use crate::estimator::Estimator;
use crate::expr::Expr;
use crate::ir::plan::{NodeId, Plan, PlanKind};
use crate::Result;

/// Runs Selinger DP over the `From` fragment at `from_id`, replaces it in
/// place with the chosen binary join tree (plus leftover filters), and
/// returns `(new_root, plans_tested)`.
pub fn optimize(plan: &mut Plan, db: &Database, from_id: NodeId) -> Result<(NodeId, usize)> {
    let (children, predicates) = match &plan.get(from_id).kind {
        PlanKind::From {
            children,
            predicates,
        } => (children.clone(), predicates.clone()),
        _ => panic!("optimize_selinger called on a non-From node"),
    };
    let n = children.len();
    if n == 1 {
        let mut estimator = Estimator::new(plan, db);
        let cost = estimator.cost(children[0]);
        let _ = cost;
        let new_root = wrap_leftover_filters(plan, children[0], predicates);
        return Ok((new_root, 1));
    }

    let (join_preds, leftover) = classify_predicates(plan, &children, predicates)?;

    let mut dp: Vec<HashMap<Vec<usize>, JoinInfo>> = vec![HashMap::new(); n + 1];
    let mut estimator = Estimator::new(plan, db);

    for (i, &leaf_plan) in children.iter().enumerate() {
        let mut info = JoinInfo::singleton(i);
        info.best_cost = estimator.cost(leaf_plan);
        info.best_plan = Some(leaf_plan);
        dp[1].insert(canonical_key(&info.leaves), info);
    }

    let mut k = 2;
    while k <= n {
        let prev = dp[k - 1].clone();
        for s_prime in prev.values() {
            for t in 0..n {
                if s_prime.leaves.contains(&t) {
                    continue;
                }
                let t_info = dp[1][&vec![t]].clone();
                let merged = s_prime.merge(&t_info, &join_preds);
                if merged.pred_idxs.is_empty() {
                    continue;
                }
                let bridging = bridging_predicates(
                    &join_preds,
                    &merged.pred_idxs,
                    &s_prime.leaves,
                    &t_info.leaves,
                );
                let candidates = build_candidates(
                    plan,
                    &s_prime.leaves,
                    s_prime.best_plan.unwrap(),
                    t_info.best_plan.unwrap(),
                    &bridging,
                );
                let mut best_plan = None;
                let mut best_cost = f64::INFINITY;
                for c in candidates {
                    let cost = estimator.cost(c);
                    if cost < best_cost {
                        best_cost = cost;
                        best_plan = Some(c);
                    }
                }
                let key = canonical_key(&merged.leaves);
                let mut merged = merged;
                merged.best_plan = best_plan;
                merged.best_cost = best_cost;
                let better = match dp[k].get(&key) {
                    Some(existing) => merged.best_cost < existing.best_cost,
                    None => true,
                };
                if better {
                    dp[k].insert(key, merged);
                }
            }
        }

        if dp[k].is_empty() {
            log::debug!("selinger: DP level {k} empty, falling back to a cross-product tail");
            cross_product_fallback(plan, db, &mut dp, &mut estimator, &join_preds, k, n);
            break;
        }
        log::debug!("selinger: DP level {k} has {} candidate(s)", dp[k].len());
        k += 1;
    }

    let full: BTreeSet<usize> = (0..n).collect();
    let final_info = dp
        .iter()
        .rev()
        .find_map(|level| level.get(&canonical_key(&full)))
        .expect("DP must produce a plan covering every leaf");

    let chosen = final_info.best_plan.unwrap();
    fix_parent_pointers(plan, chosen);
    let new_root = wrap_leftover_filters(plan, chosen, leftover);
    Ok((new_root, estimator.plans_tested))
}

/// When `DP[k]` comes up empty (the unplaced leaves form a disconnected
/// join-graph component relative to everything placed so far), take the
/// cheapest plan found so far and cross-product it, one leaf at a time,
/// until every leaf is absorbed.
fn cross_product_fallback(
    plan: &mut Plan,
    db: &Database,
    dp: &mut [HashMap<Vec<usize>, JoinInfo>],
    estimator: &mut Estimator,
    join_preds: &[JoinPredicate],
    start_k: usize,
    n: usize,
) {
    let _ = db;
    let mut growing = dp[start_k - 1]
        .values()
        .min_by(|a, b| a.best_cost.partial_cmp(&b.best_cost).unwrap())
        .cloned()
        .expect("previous DP level must be non-empty");

    let all: BTreeSet<usize> = (0..n).collect();
    let mut level = start_k;
    while growing.leaves.len() < n {
        let t = *all.difference(&growing.leaves).next().unwrap();
        let t_info = dp[1][&vec![t]].clone();
        let bridging = bridging_predicates(
            join_preds,
            &super::predicates_within(join_preds, &growing.leaves.union(&t_info.leaves).cloned().collect()),
            &growing.leaves,
            &t_info.leaves,
        );
        let candidates = build_candidates(
            plan,
            &growing.leaves,
            growing.best_plan.unwrap(),
            t_info.best_plan.unwrap(),
            &bridging,
        );
        let mut best_plan = None;
        let mut best_cost = f64::INFINITY;
        for c in candidates {
            let cost = estimator.cost(c);
            if cost < best_cost {
                best_cost = cost;
                best_plan = Some(c);
            }
        }
        let merged = growing.merge(&t_info, join_preds);
        growing = JoinInfo {
            leaves: merged.leaves.clone(),
            pred_idxs: merged.pred_idxs,
            best_plan,
            best_cost,
        };
        level = (level + 1).min(n);
        dp[level].insert(canonical_key(&growing.leaves), growing.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::schema::{Attr, Schema};
    use crate::tuple::Tuple;
    use crate::value::{Type, Value};

    fn two_table_db() -> Database {
        let mut db = Database::new();
        let s1 = Schema::new(vec![
            Attr::new("id", Type::Num).with_table("a").with_index(0),
        ]);
        db.register_dataframe(
            "a",
            s1,
            (0..5).map(|i| Tuple::new(vec![Value::num(i as f64)])).collect(),
        );
        let s2 = Schema::new(vec![
            Attr::new("id", Type::Num).with_table("b").with_index(0),
        ]);
        db.register_dataframe(
            "b",
            s2,
            (0..5).map(|i| Tuple::new(vec![Value::num(i as f64)])).collect(),
        );
        db
    }

    #[test]
    fn optimizes_two_way_equi_join_into_hash_join() {
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
            crate::expr::BinOp::Cmp(crate::expr::CmpOp::Eq),
            Expr::column(Attr::unbound("id").with_table("a")),
            Expr::column(Attr::unbound("id").with_table("b")),
        );
        let from = plan.alloc(PlanKind::From {
            children: vec![left, right],
            predicates: vec![pred],
        });
        plan.set_root(from);
        crate::resolve::resolve_plan(&mut plan, &db, from).unwrap();

        let (new_root, tested) = optimize(&mut plan, &db, from).unwrap();
        assert!(tested > 0);
        match &plan.get(new_root).kind {
            PlanKind::HashJoin { .. } | PlanKind::ThetaJoin { .. } => {}
            other => panic!("expected a join, got {other:?}"),
        }
    }
}
