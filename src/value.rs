//! Runtime values and the column-type lattice used by schema and expression
//! resolution.

use std::cmp::Ordering;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A column's declared type. `Unknown` is used for expressions whose type
/// cannot be determined until resolution (e.g. before a UDF's return type is
/// looked up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    Num,
    Str,
    Bool,
    Date,
    List,
    Unknown,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A runtime value held in a tuple slot.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub enum Value {
    Num(OrderedFloat<f64>),
    Str(String),
    Bool(bool),
    /// Days since epoch.
    Date(i64),
    List(Vec<Value>),
    Null,
}

impl Value {
    pub fn num(n: f64) -> Self {
        Value::Num(OrderedFloat(n))
    }

    pub fn ty(&self) -> Type {
        match self {
            Value::Num(_) => Type::Num,
            Value::Str(_) => Type::Str,
            Value::Bool(_) => Type::Bool,
            Value::Date(_) => Type::Date,
            Value::List(_) => Type::List,
            Value::Null => Type::Unknown,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(n.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Rows are sorted with a total order; cross-type comparisons fall back to a
/// stable, arbitrary (but deterministic) ranking so `OrderBy` never panics on
/// heterogeneous data produced by a buggy upstream UDF.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Num(a), Num(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Num(_) => 2,
        Value::Date(_) => 3,
        Value::Str(_) => 4,
        Value::List(_) => 5,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{}", n.0),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "date:{d}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Null => write!(f, "null"),
        }
    }
}
