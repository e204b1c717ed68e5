//! The expression tree: literals, column references, operators, BETWEEN,
//! scalar/aggregate UDF calls and star.

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::schema::Attr;
use crate::value::{Type, Value};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Bool(BoolOp),
    Cmp(CmpOp),
    Arith(ArithOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
pub enum UnOp {
    Neg,
    Not,
}

/// A node in the expression tree. `ty` is the inferred type guess, refined
/// during resolution (see [crate::resolve::resolve_expr]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum ExprKind {
    Literal(Value),
    /// A column reference. Starts out as an unbound [Attr] and is rebound to
    /// a fully-bound schema attribute (with `index` set) during resolution.
    Column(Attr),
    Paren(Box<Expr>),
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        l: Box<Expr>,
        r: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        lo: Box<Expr>,
        hi: Box<Expr>,
    },
    ScalarCall {
        name: String,
        args: Vec<Expr>,
    },
    AggCall {
        name: String,
        args: Vec<Expr>,
        incremental: bool,
    },
    /// `*` or `table.*`; only legal directly under a FROM-backed `Project`.
    Star {
        table: Option<String>,
    },
}

impl Expr {
    pub fn literal(v: Value) -> Self {
        let ty = v.ty();
        Expr {
            kind: ExprKind::Literal(v),
            ty,
        }
    }

    pub fn column(attr: Attr) -> Self {
        let ty = attr.ty;
        Expr {
            kind: ExprKind::Column(attr),
            ty,
        }
    }

    pub fn paren(e: Expr) -> Self {
        let ty = e.ty;
        Expr {
            kind: ExprKind::Paren(Box::new(e)),
            ty,
        }
    }

    pub fn unary(op: UnOp, e: Expr) -> Self {
        let ty = e.ty;
        Expr {
            kind: ExprKind::Unary {
                op,
                expr: Box::new(e),
            },
            ty,
        }
    }

    pub fn binary(op: BinOp, l: Expr, r: Expr) -> Self {
        let ty = match op {
            BinOp::Bool(_) | BinOp::Cmp(_) => Type::Bool,
            BinOp::Arith(_) => Type::Num,
        };
        Expr {
            kind: ExprKind::Binary {
                op,
                l: Box::new(l),
                r: Box::new(r),
            },
            ty,
        }
    }

    pub fn between(expr: Expr, lo: Expr, hi: Expr) -> Self {
        Expr {
            kind: ExprKind::Between {
                expr: Box::new(expr),
                lo: Box::new(lo),
                hi: Box::new(hi),
            },
            ty: Type::Bool,
        }
    }

    pub fn scalar_call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr {
            kind: ExprKind::ScalarCall {
                name: name.into(),
                args,
            },
            ty: Type::Unknown,
        }
    }

    pub fn agg_call(name: impl Into<String>, args: Vec<Expr>, incremental: bool) -> Self {
        Expr {
            kind: ExprKind::AggCall {
                name: name.into(),
                args,
                incremental,
            },
            ty: Type::Unknown,
        }
    }

    pub fn star(table: Option<String>) -> Self {
        Expr {
            kind: ExprKind::Star { table },
            ty: Type::Unknown,
        }
    }

    /// True if an `AggCall` occurs anywhere under this expression. Aggregate
    /// calls must not be nested under each other; that is enforced where
    /// expressions are built, not here.
    pub fn contains_agg(&self) -> bool {
        match &self.kind {
            ExprKind::AggCall { .. } => true,
            ExprKind::Literal(_) | ExprKind::Column(_) | ExprKind::Star { .. } => false,
            ExprKind::Paren(e) | ExprKind::Unary { expr: e, .. } => e.contains_agg(),
            ExprKind::Binary { l, r, .. } => l.contains_agg() || r.contains_agg(),
            ExprKind::Between { expr, lo, hi } => {
                expr.contains_agg() || lo.contains_agg() || hi.contains_agg()
            }
            ExprKind::ScalarCall { args, .. } => args.iter().any(Expr::contains_agg),
        }
    }

    /// Rejects `AggCall` nested under another `AggCall`. Called when an
    /// expression is attached to a plan node.
    pub fn check_no_nested_agg(&self, already_in_agg: bool) -> Result<()> {
        match &self.kind {
            ExprKind::AggCall { args, .. } => {
                if already_in_agg {
                    return Err(Error::simple(
                        ErrorKind::GroupBy,
                        "aggregate functions cannot be nested",
                    ));
                }
                for a in args {
                    a.check_no_nested_agg(true)?;
                }
                Ok(())
            }
            ExprKind::Literal(_) | ExprKind::Column(_) | ExprKind::Star { .. } => Ok(()),
            ExprKind::Paren(e) | ExprKind::Unary { expr: e, .. } => {
                e.check_no_nested_agg(already_in_agg)
            }
            ExprKind::Binary { l, r, .. } => {
                l.check_no_nested_agg(already_in_agg)?;
                r.check_no_nested_agg(already_in_agg)
            }
            ExprKind::Between { expr, lo, hi } => {
                expr.check_no_nested_agg(already_in_agg)?;
                lo.check_no_nested_agg(already_in_agg)?;
                hi.check_no_nested_agg(already_in_agg)
            }
            ExprKind::ScalarCall { args, .. } => {
                for a in args {
                    a.check_no_nested_agg(already_in_agg)?;
                }
                Ok(())
            }
        }
    }

    /// Collects every `Column` reference under this expression.
    pub fn columns(&self) -> Vec<&Attr> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Attr>) {
        match &self.kind {
            ExprKind::Column(a) => out.push(a),
            ExprKind::Literal(_) | ExprKind::Star { .. } => {}
            ExprKind::Paren(e) | ExprKind::Unary { expr: e, .. } => e.collect_columns(out),
            ExprKind::Binary { l, r, .. } => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            ExprKind::Between { expr, lo, hi } => {
                expr.collect_columns(out);
                lo.collect_columns(out);
                hi.collect_columns(out);
            }
            ExprKind::ScalarCall { args, .. } | ExprKind::AggCall { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
        }
    }

    /// Checks that arithmetic/comparison/BETWEEN operands are numeric once
    /// resolved.
    pub fn require_numeric(&self, what: &str) -> Result<()> {
        if self.ty != Type::Num && self.ty != Type::Unknown {
            return Err(Error::type_mismatch(ErrorKind::Type, Some(what.to_string()), "num", self.ty));
        }
        Ok(())
    }
}
