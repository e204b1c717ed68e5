//! User-defined function registry.
//!
//! Scalar and aggregate UDFs share a name-keyed registry but live in disjoint
//! namespaces: registering `avg` as both a scalar and an aggregate is a
//! `UdfError`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::value::Value;
use crate::Result;

pub type ScalarFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct ScalarUdf {
    pub name: String,
    pub arity: usize,
    pub f: ScalarFn,
}

/// An aggregate UDF is implemented either as a whole-bucket function, or as
/// an incremental `(init, update, finalize)` triple that the group-by
/// codegen may choose to inline instead of invoking by name.
#[derive(Clone)]
pub enum AggImpl {
    WholeBucket(Arc<dyn Fn(&[Vec<Value>]) -> Result<Value> + Send + Sync>),
    Incremental(IncAgg),
}

#[derive(Clone)]
pub struct IncAgg {
    pub init: Arc<dyn Fn() -> Vec<Value> + Send + Sync>,
    pub update: Arc<dyn Fn(&mut [Value], &[Value]) -> Result<()> + Send + Sync>,
    pub finalize: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

#[derive(Clone)]
pub struct AggUdf {
    pub name: String,
    pub arity: usize,
    pub imp: AggImpl,
}

#[derive(Default, Clone)]
pub struct UdfRegistry {
    scalars: HashMap<String, ScalarUdf>,
    aggs: HashMap<String, AggUdf>,
}

impl UdfRegistry {
    pub fn new() -> Self {
        let mut reg = UdfRegistry::default();
        reg.register_standard();
        reg
    }

    pub fn register_scalar(&mut self, udf: ScalarUdf) -> Result<()> {
        if self.aggs.contains_key(&udf.name) {
            return Err(Error::simple(
                ErrorKind::Udf,
                format!("`{}` is already registered as an aggregate", udf.name),
            ));
        }
        self.scalars.insert(udf.name.clone(), udf);
        Ok(())
    }

    pub fn register_agg(&mut self, udf: AggUdf) -> Result<()> {
        if self.scalars.contains_key(&udf.name) {
            return Err(Error::simple(
                ErrorKind::Udf,
                format!("`{}` is already registered as a scalar function", udf.name),
            ));
        }
        self.aggs.insert(udf.name.clone(), udf);
        Ok(())
    }

    pub fn scalar(&self, name: &str) -> Result<&ScalarUdf> {
        self.scalars
            .get(name)
            .ok_or_else(|| Error::not_found(ErrorKind::Udf, name, "scalar function"))
    }

    pub fn agg(&self, name: &str) -> Result<&AggUdf> {
        self.aggs
            .get(name)
            .ok_or_else(|| Error::not_found(ErrorKind::Udf, name, "aggregate function"))
    }

    pub fn check_arity(name: &str, expected: usize, got: usize) -> Result<()> {
        if expected != got {
            return Err(Error::simple(
                ErrorKind::Udf,
                format!("`{name}` expects {expected} argument(s), got {got}"),
            ));
        }
        Ok(())
    }

    fn register_standard(&mut self) {
        self.register_scalar(ScalarUdf {
            name: "lower".into(),
            arity: 1,
            f: Arc::new(|args| {
                Ok(Value::Str(args[0].as_str().unwrap_or_default().to_lowercase()))
            }),
        })
        .unwrap();
        self.register_scalar(ScalarUdf {
            name: "upper".into(),
            arity: 1,
            f: Arc::new(|args| {
                Ok(Value::Str(args[0].as_str().unwrap_or_default().to_uppercase()))
            }),
        })
        .unwrap();

        self.register_agg(AggUdf {
            name: "count".into(),
            arity: 1,
            imp: AggImpl::Incremental(IncAgg {
                init: Arc::new(|| vec![Value::num(0.0)]),
                update: Arc::new(|state, _args| {
                    state[0] = Value::num(state[0].as_num().unwrap_or(0.0) + 1.0);
                    Ok(())
                }),
                finalize: Arc::new(|state| state[0].clone()),
            }),
        })
        .unwrap();
        self.register_agg(AggUdf {
            name: "sum".into(),
            arity: 1,
            imp: AggImpl::Incremental(IncAgg {
                init: Arc::new(|| vec![Value::num(0.0)]),
                update: Arc::new(|state, args| {
                    let n = args[0]
                        .as_num()
                        .ok_or_else(|| Error::simple(ErrorKind::GroupBy, "sum() expects a numeric argument"))?;
                    state[0] = Value::num(state[0].as_num().unwrap_or(0.0) + n);
                    Ok(())
                }),
                finalize: Arc::new(|state| state[0].clone()),
            }),
        })
        .unwrap();
        // avg: state = [sum, count]
        self.register_agg(AggUdf {
            name: "avg".into(),
            arity: 1,
            imp: AggImpl::Incremental(IncAgg {
                init: Arc::new(|| vec![Value::num(0.0), Value::num(0.0)]),
                update: Arc::new(|state, args| {
                    let n = args[0]
                        .as_num()
                        .ok_or_else(|| Error::simple(ErrorKind::GroupBy, "avg() expects a numeric argument"))?;
                    state[0] = Value::num(state[0].as_num().unwrap_or(0.0) + n);
                    state[1] = Value::num(state[1].as_num().unwrap_or(0.0) + 1.0);
                    Ok(())
                }),
                finalize: Arc::new(|state| {
                    let sum = state[0].as_num().unwrap_or(0.0);
                    let count = state[1].as_num().unwrap_or(0.0);
                    Value::num(if count == 0.0 { 0.0 } else { sum / count })
                }),
            }),
        })
        .unwrap();
        // std (alias stddev): Welford's algorithm, state = [count, mean, m2]
        let std_imp = AggImpl::Incremental(IncAgg {
            init: Arc::new(|| vec![Value::num(0.0), Value::num(0.0), Value::num(0.0)]),
            update: Arc::new(|state, args| {
                let x = args[0]
                    .as_num()
                    .ok_or_else(|| Error::simple(ErrorKind::GroupBy, "std() expects a numeric argument"))?;
                let count = state[0].as_num().unwrap_or(0.0) + 1.0;
                let mean = state[1].as_num().unwrap_or(0.0);
                let delta = x - mean;
                let new_mean = mean + delta / count;
                let delta2 = x - new_mean;
                let m2 = state[2].as_num().unwrap_or(0.0) + delta * delta2;
                state[0] = Value::num(count);
                state[1] = Value::num(new_mean);
                state[2] = Value::num(m2);
                Ok(())
            }),
            finalize: Arc::new(|state| {
                let count = state[0].as_num().unwrap_or(0.0);
                let m2 = state[2].as_num().unwrap_or(0.0);
                Value::num(if count < 2.0 { f64::NAN } else { m2 / (count - 1.0) })
            }),
        });
        self.register_agg(AggUdf {
            name: "std".into(),
            arity: 1,
            imp: std_imp.clone(),
        })
        .unwrap();
        // `stdev` is kept alongside the more conventional `stddev` spelling
        // (see DESIGN.md).
        self.register_agg(AggUdf {
            name: "stdev".into(),
            arity: 1,
            imp: std_imp.clone(),
        })
        .unwrap();
        self.register_agg(AggUdf {
            name: "stddev".into(),
            arity: 1,
            imp: std_imp,
        })
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_agg_namespaces_are_disjoint() {
        let mut reg = UdfRegistry::new();
        let err = reg.register_agg(AggUdf {
            name: "lower".into(),
            arity: 1,
            imp: AggImpl::WholeBucket(Arc::new(|_| Ok(Value::Null))),
        });
        assert!(err.is_err());
    }

    #[test]
    fn standard_udfs_are_registered() {
        let reg = UdfRegistry::new();
        assert!(reg.scalar("lower").is_ok());
        assert!(reg.agg("count").is_ok());
        assert!(reg.agg("std").is_ok());
        assert!(reg.agg("stdev").is_ok());
    }
}
