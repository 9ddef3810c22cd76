//! Type registry.
//!
//! Types are defined once, optionally extending a supertype. A type has no
//! schema of its own until its first `register`; until then it resolves to
//! the nearest ancestor's schema. The first `register` snapshots that
//! inherited schema, so later changes to the supertype do not leak into an
//! already specialized subtype.

use super::{EntryOptions, Schema, SchemaEntry, validate_key};
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Called as `(node, trunk)` after a node is attached to / detached from a
/// trunk.
pub type LinkHook = Rc<dyn Fn(&mut Graph, NodeId, NodeId) -> Result<()>>;

#[derive(Clone, Default)]
pub struct TypeOptions {
    extends: Option<String>,
    emitter: bool,
    on_attach: Option<LinkHook>,
    on_detach: Option<LinkHook>,
}

impl TypeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.extends = Some(supertype.into());
        self
    }

    /// Opt the type into root event emission.
    pub fn emitter(mut self, emitter: bool) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn on_attach(
        mut self,
        f: impl Fn(&mut Graph, NodeId, NodeId) -> Result<()> + 'static,
    ) -> Self {
        self.on_attach = Some(Rc::new(f));
        self
    }

    pub fn on_detach(
        mut self,
        f: impl Fn(&mut Graph, NodeId, NodeId) -> Result<()> + 'static,
    ) -> Self {
        self.on_detach = Some(Rc::new(f));
        self
    }
}

#[derive(Clone)]
pub struct TypeDef {
    pub name: String,
    pub extends: Option<String>,
    pub emitter: bool,
    pub on_attach: Option<LinkHook>,
    pub on_detach: Option<LinkHook>,
    schema: Option<Rc<Schema>>,
}

impl TypeDef {
    pub fn has_own_schema(&self) -> bool {
        self.schema.is_some()
    }
}

#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, opts: TypeOptions) -> Result<()> {
        validate_key(name)?;
        if self.types.contains_key(name) {
            return Err(GraphError::DuplicateType(name.to_string()));
        }
        if let Some(parent) = &opts.extends {
            if !self.types.contains_key(parent) {
                return Err(GraphError::UnknownType(parent.clone()));
            }
        }
        self.types.insert(
            name.to_string(),
            TypeDef {
                name: name.to_string(),
                extends: opts.extends,
                emitter: opts.emitter,
                on_attach: opts.on_attach,
                on_detach: opts.on_detach,
                schema: None,
            },
        );
        Ok(())
    }

    /// Register (or re-register) a field on `ty`.
    pub fn register(&mut self, ty: &str, key: &str, opts: EntryOptions) -> Result<()> {
        validate_key(key)?;
        let inherited = self.schema(ty);
        let def = self
            .types
            .get_mut(ty)
            .ok_or_else(|| GraphError::UnknownType(ty.to_string()))?;
        let schema = def
            .schema
            .get_or_insert_with(|| Rc::new(inherited.as_deref().cloned().unwrap_or_default()));
        Rc::make_mut(schema).insert(SchemaEntry::new(key, opts));
        Ok(())
    }

    /// Remove a field from `ty`'s own schema. Returns whether it existed.
    pub fn clear(&mut self, ty: &str, key: &str) -> Result<bool> {
        let inherited = self.schema(ty);
        let def = self
            .types
            .get_mut(ty)
            .ok_or_else(|| GraphError::UnknownType(ty.to_string()))?;
        let schema = def
            .schema
            .get_or_insert_with(|| Rc::new(inherited.as_deref().cloned().unwrap_or_default()));
        Ok(Rc::make_mut(schema).remove(key))
    }

    /// The schema in effect for `ty`: its own, or the nearest ancestor's.
    pub fn schema(&self, ty: &str) -> Option<Rc<Schema>> {
        let mut cur = self.types.get(ty);
        // Bounded by the number of types; `define` only accepts existing
        // supertypes, so the chain cannot loop.
        for _ in 0..=self.types.len() {
            let def = cur?;
            if let Some(schema) = &def.schema {
                return Some(schema.clone());
            }
            cur = def.extends.as_deref().and_then(|p| self.types.get(p));
        }
        None
    }

    pub fn entry(&self, ty: &str, key: &str) -> Option<Rc<SchemaEntry>> {
        self.schema(ty).and_then(|s| s.get(key).cloned())
    }

    pub fn get(&self, ty: &str) -> Option<&TypeDef> {
        self.types.get(ty)
    }

    pub fn contains(&self, ty: &str) -> bool {
        self.types.contains_key(ty)
    }

    /// Whether `ty` is `ancestor` or extends it.
    pub fn is_a(&self, ty: &str, ancestor: &str) -> bool {
        let mut cur = Some(ty);
        for _ in 0..=self.types.len() {
            let Some(name) = cur else {
                return false;
            };
            if name == ancestor {
                return true;
            }
            cur = self.types.get(name).and_then(|d| d.extends.as_deref());
        }
        false
    }

    /// Drop every type. Intended for test teardown.
    pub fn reset(&mut self) {
        self.types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Autogen;
    use pretty_assertions::assert_eq;

    #[test]
    fn subtype_snapshots_supertype_on_first_register() {
        let mut reg = TypeRegistry::new();
        reg.define("Base", TypeOptions::new()).unwrap();
        reg.define("Sub", TypeOptions::new().extends("Base")).unwrap();
        reg.register("Base", "a", EntryOptions::new()).unwrap();

        // No own schema yet: resolves to Base.
        assert!(reg.entry("Sub", "a").is_some());

        reg.register("Sub", "b", EntryOptions::new().autogen(Autogen::on_keys(["a"])))
            .unwrap();
        reg.register("Base", "late", EntryOptions::new()).unwrap();

        let sub = reg.schema("Sub").unwrap();
        let keys: Vec<&str> = sub.entries().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(sub.get("a").unwrap().autogen_dependents().contains("b"));
        // The subtype's edges do not leak into the supertype.
        assert!(reg.entry("Base", "a").unwrap().autogen_dependents().is_empty());
        assert!(reg.is_a("Sub", "Base"));
        assert!(!reg.is_a("Base", "Sub"));
    }

    #[test]
    fn unknown_and_duplicate_types() {
        let mut reg = TypeRegistry::new();
        assert!(matches!(
            reg.register("Nope", "a", EntryOptions::new()),
            Err(GraphError::UnknownType(_))
        ));
        reg.define("T", TypeOptions::new()).unwrap();
        assert!(matches!(
            reg.define("T", TypeOptions::new()),
            Err(GraphError::DuplicateType(_))
        ));
        assert!(matches!(
            reg.define("U", TypeOptions::new().extends("Missing")),
            Err(GraphError::UnknownType(_))
        ));
        reg.reset();
        assert!(!reg.contains("T"));
    }

    #[test]
    fn clear_removes_own_entry() {
        let mut reg = TypeRegistry::new();
        reg.define("T", TypeOptions::new()).unwrap();
        reg.register("T", "a", EntryOptions::new()).unwrap();
        assert!(reg.clear("T", "a").unwrap());
        assert!(reg.entry("T", "a").is_none());
        assert!(!reg.clear("T", "a").unwrap());
    }
}
