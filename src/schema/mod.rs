//! Schema layer: per-type field descriptors and the registry that owns them.
//!
//! A [`Schema`] is an ordered list of [`SchemaEntry`] plus two derived
//! indexes:
//! - `autogen_dependents` on each entry: the keys to recompute when that
//!   entry's field changes;
//! - `trunk_regen_keys`: autogen fields recomputed whenever the node is
//!   attached to or detached from a trunk.
//!
//! Both are rebuilt incrementally on every register/clear so that
//! re-registering a key is idempotent.

pub mod entry;
pub mod registry;

pub use entry::{
    Autogen, DefaultValue, EntryOptions, Generator, Getter, Parser, Proxy, SchemaEntry, SetHook,
};
pub use registry::{LinkHook, TypeDef, TypeOptions, TypeRegistry};

use crate::error::{GraphError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Change key reported to autogen predicates when a node's trunk changes.
pub const TRUNK_KEY: &str = "$trunk";

const KEY_RE: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Field and type names must be identifiers: dots would be ambiguous in
/// event paths, and `$` is reserved for [`TRUNK_KEY`].
pub fn validate_key(key: &str) -> Result<()> {
    let re = Regex::new(KEY_RE)?;
    if !re.is_match(key) {
        return Err(GraphError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: Vec<Rc<SchemaEntry>>,
    by_key: BTreeMap<String, usize>,
    trunk_regen_keys: BTreeSet<String>,
}

impl Schema {
    pub fn get(&self, key: &str) -> Option<&Rc<SchemaEntry>> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &Rc<SchemaEntry>> {
        self.entries.iter()
    }

    pub fn trunk_regen_keys(&self) -> &BTreeSet<String> {
        &self.trunk_regen_keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add or replace an entry and wire its autogen edges in both directions.
    pub(crate) fn insert(&mut self, mut entry: SchemaEntry) {
        let key = entry.key.clone();
        let slot = self.purge(&key);

        entry.autogen_dependents.clear();
        if entry.autogen.accepts(TRUNK_KEY) {
            self.trunk_regen_keys.insert(key.clone());
        }
        for other in self.entries.iter_mut() {
            if other.key == key {
                continue;
            }
            if other.autogen.accepts(&key) {
                entry.autogen_dependents.insert(other.key.clone());
            }
            if entry.autogen.accepts(&other.key) {
                Rc::make_mut(other).autogen_dependents.insert(key.clone());
            }
        }

        match slot {
            Some(i) => self.entries[i] = Rc::new(entry),
            None => {
                self.by_key.insert(key, self.entries.len());
                self.entries.push(Rc::new(entry));
            }
        }
    }

    /// Remove an entry and every edge pointing at it.
    pub(crate) fn remove(&mut self, key: &str) -> bool {
        let Some(i) = self.purge(key) else {
            return false;
        };
        self.entries.remove(i);
        self.by_key = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        true
    }

    // Drop `key` from the dependency sets; returns its current position.
    fn purge(&mut self, key: &str) -> Option<usize> {
        for other in self.entries.iter_mut() {
            if other.autogen_dependents.contains(key) {
                Rc::make_mut(other).autogen_dependents.remove(key);
            }
        }
        self.trunk_regen_keys.remove(key);
        self.by_key.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn deps(schema: &Schema, key: &str) -> Vec<String> {
        schema.get(key).unwrap().autogen_dependents().iter().cloned().collect()
    }

    #[test]
    fn dependency_edges_are_wired_both_ways() {
        let mut schema = Schema::default();
        schema.insert(SchemaEntry::new(
            "adata",
            EntryOptions::new().autogen(Autogen::on_keys(["sdata"])),
        ));
        schema.insert(SchemaEntry::new("sdata", EntryOptions::new()));
        schema.insert(SchemaEntry::new(
            "bdata",
            EntryOptions::new().autogen_when(|k| k == "sdata"),
        ));

        assert_eq!(deps(&schema, "sdata"), vec!["adata".to_string(), "bdata".to_string()]);
        assert!(deps(&schema, "adata").is_empty());
    }

    #[test]
    fn reregistration_replaces_in_place() {
        let mut schema = Schema::default();
        schema.insert(SchemaEntry::new("a", EntryOptions::new()));
        schema.insert(SchemaEntry::new(
            "b",
            EntryOptions::new().autogen(Autogen::on_keys(["a", TRUNK_KEY])),
        ));
        assert_eq!(deps(&schema, "a"), vec!["b".to_string()]);
        assert!(schema.trunk_regen_keys().contains("b"));

        schema.insert(SchemaEntry::new("b", EntryOptions::new()));
        assert!(deps(&schema, "a").is_empty());
        assert!(schema.trunk_regen_keys().is_empty());
        let keys: Vec<&str> = schema.entries().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn remove_purges_edges() {
        let mut schema = Schema::default();
        schema.insert(SchemaEntry::new("a", EntryOptions::new()));
        schema.insert(SchemaEntry::new("b", EntryOptions::new().autogen(Autogen::Always)));
        schema.insert(SchemaEntry::new("c", EntryOptions::new()));
        assert!(schema.remove("b"));
        assert!(deps(&schema, "a").is_empty());
        assert!(schema.trunk_regen_keys().is_empty());
        assert_eq!(schema.get("c").map(|e| e.key.as_str()), Some("c"));
        assert!(!schema.remove("b"));
    }

    #[test]
    fn keys_are_identifiers() {
        assert!(validate_key("sdata").is_ok());
        assert!(validate_key("a.b").is_err());
        assert!(validate_key(TRUNK_KEY).is_err());
        assert!(validate_key("").is_err());
    }
}
