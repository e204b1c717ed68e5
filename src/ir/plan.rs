//! Arena-allocated logical/physical plan.
//!
//! Operators are tagged variants over an arena of cells addressed by a
//! stable integer [NodeId], with an optional `parent` back-reference per
//! cell. Edits (`replace_child`) are O(1) index rewrites rather than pointer
//! surgery through a live mutable operator tree.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl From<usize> for NodeId {
    fn from(v: usize) -> Self {
        NodeId(v)
    }
}

impl NodeId {
    pub fn get(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkKind {
    Yield,
    Collect,
    Print,
}

#[derive(Debug, Clone, Serialize, Deserialize, strum::AsRefStr)]
pub enum PlanKind {
    Scan {
        table: String,
        alias: String,
    },
    SubQuerySource {
        child: NodeId,
        alias: String,
    },
    DummyScan,
    Filter {
        child: NodeId,
        cond: Expr,
    },
    Project {
        /// `None` models the no-FROM `SELECT <constant-expr>` case.
        child: Option<NodeId>,
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    /// N-ary FROM; removed by the join optimizer before codegen.
    From {
        children: Vec<NodeId>,
        predicates: Vec<Expr>,
    },
    ThetaJoin {
        l: NodeId,
        r: NodeId,
        cond: Expr,
    },
    HashJoin {
        l: NodeId,
        r: NodeId,
        left_key: Expr,
        right_key: Expr,
    },
    GroupBy {
        child: NodeId,
        group_exprs: Vec<Expr>,
        project_exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    OrderBy {
        child: NodeId,
        order_exprs: Vec<Expr>,
        /// `true` = ascending, parallel to `order_exprs`.
        asc: Vec<bool>,
    },
    Limit {
        child: NodeId,
        limit: Expr,
        offset: Option<Expr>,
    },
    Sink {
        child: NodeId,
        kind: SinkKind,
    },
}

#[derive(Debug, Clone)]
pub struct PlanNode {
    pub kind: PlanKind,
    pub parent: Option<NodeId>,
    pub schema: Option<Schema>,
    /// Populated only for `GroupBy`: the deduplicated attributes referenced
    /// by `group_exprs`, used to resolve non-aggregate projection
    /// expressions (the "group-term schema" of the glossary).
    pub group_term_schema: Option<Schema>,
}

impl PlanNode {
    fn new(kind: PlanKind) -> Self {
        PlanNode {
            kind,
            parent: None,
            schema: None,
            group_term_schema: None,
        }
    }
}

/// An arena of plan nodes plus the id of its root.
#[derive(Debug, Clone)]
pub struct Plan {
    nodes: Vec<PlanNode>,
    pub root: NodeId,
}

impl Plan {
    pub fn new(root_kind: PlanKind) -> Self {
        let mut plan = Plan {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        plan.root = plan.alloc(root_kind);
        plan
    }

    pub fn alloc(&mut self, kind: PlanKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PlanNode::new(kind));
        for child in Self::child_ids_of(&self.nodes[id.0].kind) {
            self.nodes[child.0].parent = Some(id);
        }
        id
    }

    pub fn get(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0]
    }

    pub fn schema(&self, id: NodeId) -> &Schema {
        self.nodes[id.0]
            .schema
            .as_ref()
            .expect("schema requested before resolution pass ran")
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Direct children of a node, in traversal order. `From`'s children are
    /// included; it is the optimizer's job to remove the `From` node itself.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        Self::child_ids_of(&self.nodes[id.0].kind)
    }

    fn child_ids_of(kind: &PlanKind) -> Vec<NodeId> {
        match kind {
            PlanKind::Scan { .. } | PlanKind::DummyScan => vec![],
            PlanKind::SubQuerySource { child, .. }
            | PlanKind::Filter { child, .. }
            | PlanKind::GroupBy { child, .. }
            | PlanKind::OrderBy { child, .. }
            | PlanKind::Limit { child, .. }
            | PlanKind::Sink { child, .. } => vec![*child],
            PlanKind::Project { child, .. } => child.into_iter().copied().collect(),
            PlanKind::From { children, .. } => children.clone(),
            PlanKind::ThetaJoin { l, r, .. } | PlanKind::HashJoin { l, r, .. } => vec![*l, *r],
        }
    }

    /// Replaces `old` with `new` inside `parent`'s child slot(s), and fixes
    /// up `new`'s parent pointer. Used by the join optimizer to swap a
    /// `From` fragment for its chosen binary join tree, and generically by
    /// any in-place plan edit.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let kind = &mut self.nodes[parent.0].kind;
        match kind {
            PlanKind::SubQuerySource { child, .. }
            | PlanKind::Filter { child, .. }
            | PlanKind::GroupBy { child, .. }
            | PlanKind::OrderBy { child, .. }
            | PlanKind::Limit { child, .. }
            | PlanKind::Sink { child, .. } => {
                if *child == old {
                    *child = new;
                }
            }
            PlanKind::Project { child, .. } => {
                if *child == Some(old) {
                    *child = Some(new);
                }
            }
            PlanKind::From { children, .. } => {
                for c in children.iter_mut() {
                    if *c == old {
                        *c = new;
                    }
                }
            }
            PlanKind::ThetaJoin { l, r, .. } | PlanKind::HashJoin { l, r, .. } => {
                if *l == old {
                    *l = new;
                }
                if *r == old {
                    *r = new;
                }
            }
        }
        self.nodes[new.0].parent = Some(parent);
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = id;
        self.nodes[id.0].parent = None;
    }

    /// Pre-order collection of every node id whose kind matches `pred`.
    pub fn collect_kind<F: Fn(&PlanKind) -> bool>(&self, root: NodeId, pred: &F) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.traverse(root, &mut |id, node| {
            if pred(&node.kind) {
                out.push(id);
            }
        });
        out
    }

    pub fn traverse<F: FnMut(NodeId, &PlanNode)>(&self, root: NodeId, f: &mut F) {
        f(root, &self.nodes[root.0]);
        for child in self.children(root) {
            self.traverse(child, f);
        }
    }

    pub fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        while let Some(p) = self.parent(node) {
            if p == ancestor {
                return true;
            }
            node = p;
        }
        false
    }
}
