//! Lineage policy and index representations.

use std::collections::{HashMap, HashSet};

pub const FW: u8 = 0b01;
pub const BW: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineagePolicyKind {
    None,
    All,
    EndToEnd,
    PathSelected,
}

/// Which operator role a capture point plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapturePoint {
    Scan,
    Sink,
    OrderByTop,
    GroupByTop,
    JoinLeft,
    JoinRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalityKind {
    One,
    N,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Fw,
    Bw,
}

/// Backward/forward cardinality kinds for each capture point. Scan is
/// handled separately by callers: its lindex is [IndexRepr::Identity] on
/// both sides, not a stored kind.
pub fn kinds_for(point: CapturePoint) -> (CardinalityKind, CardinalityKind) {
    use CardinalityKind::*;
    match point {
        CapturePoint::Scan => (One, One),
        CapturePoint::Sink | CapturePoint::OrderByTop => (One, One),
        CapturePoint::GroupByTop => (N, One),
        CapturePoint::JoinLeft | CapturePoint::JoinRight => (One, N),
    }
}

#[derive(Debug, Clone)]
pub struct LineagePolicy {
    pub kind: LineagePolicyKind,
    pub flags: u8,
    pub selected: HashSet<String>,
}

impl LineagePolicy {
    pub fn none() -> Self {
        LineagePolicy {
            kind: LineagePolicyKind::None,
            flags: 0,
            selected: HashSet::new(),
        }
    }

    pub fn all() -> Self {
        LineagePolicy {
            kind: LineagePolicyKind::All,
            flags: FW | BW,
            selected: HashSet::new(),
        }
    }

    pub fn end_to_end() -> Self {
        LineagePolicy {
            kind: LineagePolicyKind::EndToEnd,
            flags: FW | BW,
            selected: HashSet::new(),
        }
    }

    pub fn path_selected(selected: impl IntoIterator<Item = String>) -> Self {
        LineagePolicy {
            kind: LineagePolicyKind::PathSelected,
            flags: FW | BW,
            selected: selected.into_iter().collect(),
        }
    }

    /// True if the forward direction is enabled under this policy.
    pub fn bfw(&self) -> bool {
        self.flags & FW != 0
    }

    /// True if the backward direction is enabled under this policy.
    pub fn bbw(&self) -> bool {
        self.flags & BW != 0
    }

    /// `alias` is the table/subquery alias a join side or scan owns, when
    /// the point has one.
    pub fn should_capture(&self, point: CapturePoint, alias: Option<&str>) -> bool {
        match self.kind {
            LineagePolicyKind::None => false,
            LineagePolicyKind::All => true,
            LineagePolicyKind::EndToEnd => matches!(point, CapturePoint::Scan | CapturePoint::Sink),
            LineagePolicyKind::PathSelected => {
                matches!(point, CapturePoint::Sink)
                    || alias.is_some_and(|a| self.selected.contains(a))
            }
        }
    }

    /// "Mark `l_materialize = true` if the policy says so." Under `all`
    /// every capture point survives its pipeline; under `end_to_end` only
    /// scans and sinks do (everything between them is composed away);
    /// `path_selected` materializes only the selected aliases plus the sink.
    pub fn should_materialize(&self, point: CapturePoint, alias: Option<&str>) -> bool {
        self.should_capture(point, alias)
            && match self.kind {
                LineagePolicyKind::EndToEnd => matches!(point, CapturePoint::Scan | CapturePoint::Sink),
                _ => true,
            }
    }
}

/// One capture point's storage. `Identity` costs nothing to maintain and is
/// used at scans, where forward/backward are both the identity function.
#[derive(Debug, Clone)]
pub enum IndexRepr {
    Identity,
    /// Preallocated one-to-one, sized to the producer's cardinality.
    PreallocOne(Vec<Option<usize>>),
    /// Dynamic one-to-one, append-only (backward at a sink).
    DynOneSeq(Vec<usize>),
    /// Dynamic one-to-one, sparse (forward where destinations may be absent).
    DynOneMap(HashMap<usize, usize>),
    /// One-to-many: input-rid (or output-rid, for backward N) to a list.
    OneToMany(HashMap<usize, Vec<usize>>),
}

impl IndexRepr {
    pub fn preallocated(size: usize, kind: CardinalityKind) -> Self {
        match kind {
            CardinalityKind::One => IndexRepr::PreallocOne(vec![None; size]),
            CardinalityKind::N => IndexRepr::OneToMany(HashMap::new()),
        }
    }

    pub fn dynamic(kind: CardinalityKind) -> Self {
        match kind {
            CardinalityKind::One => IndexRepr::DynOneMap(HashMap::new()),
            CardinalityKind::N => IndexRepr::OneToMany(HashMap::new()),
        }
    }

    pub fn append(&mut self, val: usize) {
        if let IndexRepr::DynOneSeq(seq) = self {
            seq.push(val);
        }
    }

    pub fn set(&mut self, key: usize, val: usize) {
        match self {
            IndexRepr::PreallocOne(arr) => {
                if key >= arr.len() {
                    arr.resize(key + 1, None);
                }
                arr[key] = Some(val);
            }
            IndexRepr::DynOneMap(map) => {
                map.insert(key, val);
            }
            _ => {}
        }
    }

    pub fn add_1(&mut self, key: usize, val: usize) {
        if let IndexRepr::OneToMany(map) = self {
            map.entry(key).or_default().push(val);
        }
    }

    pub fn add_n(&mut self, key: usize, vals: &[usize]) {
        if let IndexRepr::OneToMany(map) = self {
            map.entry(key).or_default().extend(vals.iter().copied());
        }
    }

    pub fn get_one(&self, key: usize) -> Option<usize> {
        match self {
            IndexRepr::Identity => Some(key),
            IndexRepr::PreallocOne(arr) => arr.get(key).copied().flatten(),
            IndexRepr::DynOneMap(map) => map.get(&key).copied(),
            IndexRepr::DynOneSeq(seq) => seq.get(key).copied(),
            IndexRepr::OneToMany(map) => map.get(&key).and_then(|v| v.first().copied()),
        }
    }

    pub fn get_many(&self, key: usize) -> Vec<usize> {
        match self {
            IndexRepr::Identity => vec![key],
            IndexRepr::OneToMany(map) => map.get(&key).cloned().unwrap_or_default(),
            other => other.get_one(key).into_iter().collect(),
        }
    }
}

/// A (backward, forward) pair of indexes for one capture point.
#[derive(Debug, Clone)]
pub struct Lindex {
    pub backward: IndexRepr,
    pub forward: IndexRepr,
    pub backward_kind: CardinalityKind,
    pub forward_kind: CardinalityKind,
}

impl Lindex {
    pub fn identity() -> Self {
        Lindex {
            backward: IndexRepr::Identity,
            forward: IndexRepr::Identity,
            backward_kind: CardinalityKind::One,
            forward_kind: CardinalityKind::One,
        }
    }

    pub fn preallocated(point: CapturePoint, size: usize) -> Self {
        let (bk, fk) = kinds_for(point);
        Lindex {
            backward: IndexRepr::preallocated(size, bk),
            forward: IndexRepr::preallocated(size, fk),
            backward_kind: bk,
            forward_kind: fk,
        }
    }

    pub fn dynamic(point: CapturePoint) -> Self {
        let (bk, fk) = kinds_for(point);
        Lindex {
            backward: IndexRepr::dynamic(bk),
            forward: IndexRepr::dynamic(fk),
            backward_kind: bk,
            forward_kind: fk,
        }
    }

    /// Records that output rid `oid` was produced from input rid(s) `iids`,
    /// translating through `prev` first when `prev` was not itself
    /// materialized. With `prev = None` (the previous capture point was
    /// materialized, or this is the first capture point in its pipeline),
    /// `iids` are used as-is.
    pub fn record(&mut self, prev: Option<&Lindex>, iids: &[usize], oid: usize) {
        let translated: Vec<usize> = match prev {
            None => iids.to_vec(),
            Some(prev) => iids.iter().flat_map(|&i| prev.backward.get_many(i)).collect(),
        };
        match self.backward_kind {
            CardinalityKind::One => {
                if let IndexRepr::DynOneSeq(_) = &self.backward {
                    self.backward.append(translated.first().copied().unwrap_or(oid));
                } else if let Some(&i) = translated.first() {
                    self.backward.set(oid, i);
                }
            }
            CardinalityKind::N => self.backward.add_n(oid, &translated),
        }
        for &i in &translated {
            match self.forward_kind {
                CardinalityKind::One => self.forward.set(i, oid),
                CardinalityKind::N => self.forward.add_1(i, oid),
            }
        }
    }
}

/// Registry of materialized lindexes, published per-call. Keyed by
/// `(NodeId, CapturePoint)` since a HashJoin/ThetaJoin owns two distinct
/// capture points (left, right).
#[derive(Debug, Clone, Default)]
pub struct LineageRegistry {
    entries: HashMap<(crate::ir::plan::NodeId, CapturePoint), Lindex>,
}

impl LineageRegistry {
    pub fn new() -> Self {
        LineageRegistry::default()
    }

    pub fn publish(&mut self, node: crate::ir::plan::NodeId, point: CapturePoint, lindex: Lindex) {
        self.entries.insert((node, point), lindex);
    }

    pub fn get(&self, node: crate::ir::plan::NodeId, point: CapturePoint) -> Option<&Lindex> {
        self.entries.get(&(node, point))
    }

    pub fn back(&self, node: crate::ir::plan::NodeId, point: CapturePoint, output_rids: &[usize]) -> Vec<usize> {
        match self.get(node, point) {
            Some(l) => output_rids.iter().flat_map(|&o| l.backward.get_many(o)).collect(),
            None => output_rids.to_vec(),
        }
    }

    pub fn forw(&self, node: crate::ir::plan::NodeId, point: CapturePoint, input_rids: &[usize]) -> Vec<usize> {
        match self.get(node, point) {
            Some(l) => input_rids.iter().flat_map(|&i| l.forward.get_many(i)).collect(),
            None => input_rids.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfw_bbw_reject_a_direction_that_is_off() {
        let mut fw_only = LineagePolicy::all();
        fw_only.flags = FW;
        assert!(fw_only.bfw());
        assert!(!fw_only.bbw());
    }

    #[test]
    fn group_by_top_is_n_to_one() {
        assert_eq!(kinds_for(CapturePoint::GroupByTop), (CardinalityKind::N, CardinalityKind::One));
    }

    #[test]
    fn lindex_records_and_reports_group_membership() {
        let mut lindex = Lindex::dynamic(CapturePoint::GroupByTop);
        lindex.record(None, &[0, 1, 2], 0);
        lindex.record(None, &[3, 4], 1);
        assert_eq!(lindex.backward.get_many(0), vec![0, 1, 2]);
        assert_eq!(lindex.forward.get_one(3), Some(1));
    }
}
