//! Column attributes and schemas.
//!
//! An [Attr] plays two roles: a *schema attribute* is fully bound (name,
//! type, table alias, slot index all set); an *expression reference* may
//! start with `table`/`ty`/`index` unbound and gets bound during resolution
//! (see [crate::resolve]).

use serde::{Deserialize, Serialize};

use crate::value::Type;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attr {
    pub name: String,
    pub ty: Type,
    pub table: Option<String>,
    pub index: Option<usize>,
}

impl Attr {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Attr {
            name: name.into(),
            ty,
            table: None,
            index: None,
        }
    }

    pub fn unbound(name: impl Into<String>) -> Self {
        Attr {
            name: name.into(),
            ty: Type::Unknown,
            table: None,
            index: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Asymmetric compatibility check used during resolution: `self` is a
    /// schema attribute (fully bound), `other` is the, possibly partially
    /// bound, expression-side reference being matched against it.
    pub fn matches(&self, other: &Attr) -> bool {
        if self.name != other.name {
            return false;
        }
        if let Some(table) = &other.table {
            if self.table.as_deref() != Some(table.as_str()) {
                return false;
            }
        }
        if other.ty != Type::Unknown && other.ty != self.ty {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub attrs: Vec<Attr>,
}

impl Schema {
    pub fn new(attrs: Vec<Attr>) -> Self {
        Schema { attrs }
    }

    pub fn empty() -> Self {
        Schema::default()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Copies the schema, rebinding every attribute's `table` and re-indexing
    /// slots `0..len`. Does *not* clear the type, only the table alias.
    pub fn set_tablename(&self, alias: &str) -> Schema {
        Schema {
            attrs: self
                .attrs
                .iter()
                .cloned()
                .map(|a| a.with_table(alias))
                .collect(),
        }
    }

    /// Concatenates two schemas (used for joins): right-hand indices are
    /// offset by `self.len()`.
    pub fn concat(&self, other: &Schema) -> Schema {
        let offset = self.attrs.len();
        let mut attrs = self.attrs.clone();
        attrs.extend(other.attrs.iter().cloned().map(|mut a| {
            if let Some(i) = a.index {
                a.index = Some(i + offset);
            }
            a
        }));
        Schema { attrs }
    }

    /// Finds the unique attribute matching `reference`. Returns `Ok(None)`
    /// when there are zero matches and `Err(count)` when there are more than
    /// one (the caller turns both into a `ResolutionError`).
    pub fn resolve(&self, reference: &Attr) -> Result<Option<usize>, usize> {
        let matches: Vec<usize> = self
            .attrs
            .iter()
            .enumerate()
            .filter(|(_, a)| a.matches(reference))
            .map(|(i, _)| i)
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            n => Err(n),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Attr> {
        self.attrs.get(index)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name == name)
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .attrs
            .iter()
            .map(|a| match &a.table {
                Some(t) => format!("{t}.{}:{}", a.name, a.ty),
                None => format!("{}:{}", a.name, a.ty),
            })
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_is_asymmetric() {
        let schema_attr = Attr::new("a", Type::Num).with_table("t").with_index(0);
        let unbound_ref = Attr::unbound("a");
        let bound_ref = Attr::unbound("a").with_table("t");
        let wrong_table = Attr::unbound("a").with_table("u");

        assert!(schema_attr.matches(&unbound_ref));
        assert!(schema_attr.matches(&bound_ref));
        assert!(!schema_attr.matches(&wrong_table));
    }

    #[test]
    fn resolve_detects_ambiguity() {
        let schema = Schema::new(vec![
            Attr::new("a", Type::Num).with_table("l").with_index(0),
            Attr::new("a", Type::Num).with_table("r").with_index(1),
        ]);
        assert_eq!(schema.resolve(&Attr::unbound("a")), Err(2));
        assert_eq!(
            schema.resolve(&Attr::unbound("a").with_table("r")),
            Ok(Some(1))
        );
        assert_eq!(schema.resolve(&Attr::unbound("missing")), Ok(None));
    }
}
