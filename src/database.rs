//! The in-memory table catalog. On-disk ingestion is out of scope beyond
//! [`Database::register_file_by_path`], a thin CSV convenience (no dialect
//! sniffing, no quoting); the in-memory registration is what actually drives
//! the core algorithms.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{Error, ErrorKind};
use crate::schema::{Attr, Schema};
use crate::tuple::Tuple;
use crate::value::{Type, Value};
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct ColStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub ndistinct: usize,
}

pub struct Table {
    pub name: String,
    pub schema: Schema,
    pub rows: Vec<Tuple>,
    stats: RefCell<HashMap<String, ColStats>>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema, rows: Vec<Tuple>) -> Self {
        Table {
            name: name.into(),
            schema,
            rows,
            stats: RefCell::new(HashMap::new()),
        }
    }

    pub fn card(&self) -> usize {
        self.rows.len()
    }

    /// Lazily computes and caches per-column stats, mirroring
    /// `Stats.__getitem__`'s memoization.
    pub fn col_stats(&self, column: &str) -> ColStats {
        if let Some(s) = self.stats.borrow().get(column) {
            return s.clone();
        }
        let idx = match self.schema.attrs.iter().position(|a| a.name == column) {
            Some(i) => i,
            None => return ColStats::default(),
        };
        let ty = self.schema.attrs[idx].ty;
        let mut distinct: std::collections::HashSet<String> = Default::default();
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        for row in &self.rows {
            let v = &row[idx];
            distinct.insert(format!("{v:?}"));
            if ty == Type::Num {
                if let Some(n) = v.as_num() {
                    min = Some(min.map_or(n, |m: f64| m.min(n)));
                    max = Some(max.map_or(n, |m: f64| m.max(n)));
                }
            }
        }
        let stats = ColStats {
            min,
            max,
            ndistinct: distinct.len().max(1),
        };
        self.stats.borrow_mut().insert(column.to_string(), stats.clone());
        stats
    }
}

#[derive(Default)]
pub struct Database {
    tables: HashMap<String, Table>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    pub fn register_dataframe(&mut self, name: impl Into<String>, schema: Schema, rows: Vec<Tuple>) {
        let name = name.into();
        self.tables.insert(name.clone(), Table::new(name, schema, rows));
    }

    /// Registers the comma-separated file at `path` as a table named after
    /// its file stem. The first line is the header; each column's type is
    /// guessed from its first data row (parses as `f64` or it's a `Str`,
    /// mirroring `guess_type`'s num/str split) and every other row is coerced
    /// to that column's type, falling back to `Value::Null` on a parse
    /// failure. There's no quoting, no separator sniffing, and no per-row
    /// type reconciliation beyond the first row's guess.
    pub fn register_file_by_path(&mut self, path: &str) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::simple(ErrorKind::Resolution, format!("failed to read {path}: {e}")))?;
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::simple(ErrorKind::Resolution, format!("{path} has no header row")))?;
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let data: Vec<Vec<&str>> = lines
            .filter(|l| !l.is_empty())
            .map(|l| l.split(',').map(str::trim).collect())
            .collect();

        let types: Vec<Type> = (0..names.len())
            .map(|i| match data.first().and_then(|row| row.get(i)) {
                Some(cell) if cell.parse::<f64>().is_ok() => Type::Num,
                _ => Type::Str,
            })
            .collect();

        let tablename = std::path::Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();

        let attrs = names
            .iter()
            .zip(&types)
            .enumerate()
            .map(|(i, (name, ty))| Attr::new(*name, *ty).with_table(tablename.clone()).with_index(i))
            .collect();

        let rows = data
            .into_iter()
            .map(|cells| {
                Tuple::new(
                    cells
                        .into_iter()
                        .zip(&types)
                        .map(|(cell, ty)| match ty {
                            Type::Num => cell.parse::<f64>().map(Value::num).unwrap_or(Value::Null),
                            _ => Value::Str(cell.to_string()),
                        })
                        .collect(),
                )
            })
            .collect();

        self.register_dataframe(tablename, Schema::new(attrs), rows);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Result<Schema> {
        self.table(name).map(|t| t.schema.clone())
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::not_found(ErrorKind::Resolution, name, "table"))
    }

    pub fn tablenames(&self) -> Vec<&str> {
        self.tables.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attr;

    fn sample_db() -> Database {
        let mut db = Database::new();
        let schema = Schema::new(vec![
            Attr::new("a", Type::Num).with_table("t").with_index(0),
            Attr::new("b", Type::Str).with_table("t").with_index(1),
        ]);
        let rows = vec![
            Tuple::new(vec![Value::num(1.0), Value::Str("x".into())]),
            Tuple::new(vec![Value::num(5.0), Value::Str("y".into())]),
        ];
        db.register_dataframe("t", schema, rows);
        db
    }

    #[test]
    fn register_file_by_path_infers_types_from_the_first_row() {
        let path = std::env::temp_dir().join("databass_register_file_by_path_test.csv");
        std::fs::write(&path, "id,name\n1,Ada\n2,Grace\n").unwrap();

        let mut db = Database::new();
        db.register_file_by_path(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        let tablename = path.file_stem().unwrap().to_str().unwrap();
        let t = db.table(tablename).unwrap();
        assert_eq!(t.schema.attrs[0].ty, Type::Num);
        assert_eq!(t.schema.attrs[1].ty, Type::Str);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0].as_slice()[0], Value::num(1.0));
        assert_eq!(t.rows[1].as_slice()[1], Value::Str("Grace".into()));
    }

    #[test]
    fn col_stats_are_memoized_and_correct() {
        let db = sample_db();
        let t = db.table("t").unwrap();
        let stats = t.col_stats("a");
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(5.0));
        assert_eq!(t.col_stats("a").min, stats.min);
    }
}
