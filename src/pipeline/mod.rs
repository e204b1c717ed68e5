//! Pipeliner: decomposes a physical plan into a list of pipelines,
//! leaves-first, with the root sink's pipeline last. A top-down traversal
//! allocates translator pairs at breakers (`GroupBy`, `OrderBy`, a hash
//! join's build side).

use crate::ir::plan::{NodeId, Plan, PlanKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Plain,
    Bottom,
    Top,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
pub struct Translator {
    pub node: NodeId,
    pub role: Role,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub translators: Vec<Translator>,
}

impl Pipeline {
    fn push(&mut self, t: Translator) {
        self.translators.push(t);
    }
}

#[derive(Debug, Clone)]
pub struct Pipelines {
    pub pipelines: Vec<Pipeline>,
}

impl Pipelines {
    /// The pipeline holding the root sink.
    pub fn main(&self) -> &Pipeline {
        self.pipelines.last().expect("at least one pipeline")
    }
}

/// Builds the pipeline list for the physical plan rooted at `root`. `root`
/// must already be free of `From` nodes (the join optimizer's job).
pub fn build_pipelines(plan: &Plan, root: NodeId) -> Pipelines {
    let (mut done, main) = build(plan, root);
    done.push(main);
    Pipelines { pipelines: done }
}

/// Returns `(completed sub-pipelines, still-open pipeline ending at `id`)`.
/// The open pipeline is merged into its caller (breakers start a fresh one,
/// everything else keeps appending to the same one), so the pipeline
/// containing the ultimate root is always the last one completed.
fn build(plan: &Plan, id: NodeId) -> (Vec<Pipeline>, Pipeline) {
    match &plan.get(id).kind {
        PlanKind::OrderBy { child, .. } | PlanKind::GroupBy { child, .. } => {
            log::debug!("pipeliner: opening new pipeline at breaker node {:?}", id);
            let (mut done, mut bottom) = build(plan, *child);
            bottom.push(Translator {
                node: id,
                role: Role::Bottom,
            });
            log::debug!("pipeliner: closing pipeline at breaker bottom {:?}", id);
            done.push(bottom);
            let mut top = Pipeline::default();
            top.push(Translator {
                node: id,
                role: Role::Top,
            });
            (done, top)
        }
        PlanKind::HashJoin { l, r, .. } => {
            log::debug!("pipeliner: opening new pipeline for hash-join build side {:?}", id);
            let (mut done, mut left) = build(plan, *l);
            left.push(Translator {
                node: id,
                role: Role::Left,
            });
            done.push(left);
            let (done_r, mut current) = build(plan, *r);
            done.extend(done_r);
            current.push(Translator {
                node: id,
                role: Role::Right,
            });
            (done, current)
        }
        PlanKind::ThetaJoin { l, r, .. } => {
            let (mut done, mut current) = build(plan, *l);
            current.push(Translator {
                node: id,
                role: Role::Left,
            });
            let (done_r, right) = build(plan, *r);
            done.extend(done_r);
            current.translators.extend(right.translators);
            current.push(Translator {
                node: id,
                role: Role::Right,
            });
            (done, current)
        }
        PlanKind::Scan { .. } | PlanKind::DummyScan => {
            let mut pipeline = Pipeline::default();
            pipeline.push(Translator {
                node: id,
                role: Role::Plain,
            });
            (vec![], pipeline)
        }
        PlanKind::Filter { child, .. }
        | PlanKind::Limit { child, .. }
        | PlanKind::Sink { child, .. }
        | PlanKind::SubQuerySource { child, .. } => {
            let (done, mut current) = build(plan, *child);
            current.push(Translator {
                node: id,
                role: Role::Plain,
            });
            (done, current)
        }
        PlanKind::Project { child: Some(c), .. } => {
            let (done, mut current) = build(plan, *c);
            current.push(Translator {
                node: id,
                role: Role::Plain,
            });
            (done, current)
        }
        PlanKind::Project { child: None, .. } => {
            let mut pipeline = Pipeline::default();
            pipeline.push(Translator {
                node: id,
                role: Role::Plain,
            });
            (vec![], pipeline)
        }
        PlanKind::From { .. } => {
            panic!("pipeliner reached a From node; the join optimizer must run first")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attr, Schema};
    use crate::value::Type;

    #[test]
    fn group_by_splits_into_bottom_and_top_pipelines() {
        let mut plan = Plan::new(PlanKind::Scan {
            table: "t".into(),
            alias: "t".into(),
        });
        let scan = plan.root;
        let group = plan.alloc(PlanKind::GroupBy {
            child: scan,
            group_exprs: vec![],
            project_exprs: vec![],
            aliases: vec![],
        });
        let sink = plan.alloc(PlanKind::Sink {
            child: group,
            kind: crate::ir::plan::SinkKind::Collect,
        });
        plan.set_root(sink);

        let pipelines = build_pipelines(&plan, sink);
        assert_eq!(pipelines.pipelines.len(), 2);
        assert!(pipelines
            .pipelines
            .last()
            .unwrap()
            .translators
            .iter()
            .any(|t| t.node == sink));
        let _ = Schema::new(vec![Attr::new("a", Type::Num)]);
    }
}
