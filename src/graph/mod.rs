//! The node graph: arena, field access and the set pipeline.
//!
//! `Graph` owns every node, the type registry and the event collaborator.
//! Field writes go through [`Graph::set`]:
//!
//! 1) resolve the schema entry; computed and readonly fields are rejected;
//! 2) run the generator;
//! 3) skip identical writes on defined nodes;
//! 4) detach the old node value if it still hangs off this field;
//! 5) wrap raw containers (proxy fields) and attach the new node value;
//! 6) store;
//! 7) on defined nodes: update hook, autogen dependents, watchers, and the
//!    root event when the node is its own root.

pub mod link;
pub mod node;

pub use link::{DEFAULT_PRIORITY, WatchFn, WatcherId};
pub use node::{NodeId, NodeKind};

use crate::error::{GraphError, Result};
use crate::events::{EventAttrs, EventSystem, SET_EVENT_TAG};
use crate::path::KeyPath;
use crate::schema::{EntryOptions, Proxy, SchemaEntry, TypeDef, TypeOptions, TypeRegistry};
use crate::value::{Spec, Value};
use node::{Arena, NodeData, Store};
use std::rc::Rc;
use tracing::{debug, trace};

/// A field change as seen by hooks and watchers.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    pub target: NodeId,
    pub key: &'a str,
    pub old: &'a Value,
    pub new: &'a Value,
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Changed,
    /// The stored value was already identical.
    Unchanged,
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The field has a getter.
    Computed,
    Readonly,
}

impl SetOutcome {
    pub fn is_changed(self) -> bool {
        self == SetOutcome::Changed
    }

    pub fn is_rejected(self) -> bool {
        matches!(self, SetOutcome::Rejected(_))
    }
}

pub(crate) enum Incoming {
    /// Caller-supplied; runs through the generator.
    Value(Value),
    /// Produced by a parser; stored as is.
    Parsed(Value),
    /// Recompute from the entry's default.
    Regenerate,
}

pub struct Graph {
    registry: TypeRegistry,
    pub(crate) arena: Arena,
    events: Option<Rc<dyn EventSystem>>,
    next_watcher: u64,
    shallow_element: Rc<SchemaEntry>,
    deep_element: Rc<SchemaEntry>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            arena: Arena::default(),
            events: None,
            next_watcher: 0,
            shallow_element: Rc::new(SchemaEntry::element(Proxy::Off)),
            deep_element: Rc::new(SchemaEntry::element(Proxy::Deep)),
        }
    }

    pub fn with_events(events: Rc<dyn EventSystem>) -> Self {
        let mut graph = Self::new();
        graph.events = Some(events);
        graph
    }

    /// Replace the event collaborator. Watchers installed earlier keep the
    /// emitter decision made when they were installed.
    pub fn set_event_system(&mut self, events: Option<Rc<dyn EventSystem>>) {
        self.events = events;
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn define_type(&mut self, name: &str, opts: TypeOptions) -> Result<()> {
        self.registry.define(name, opts)
    }

    pub fn register(&mut self, ty: &str, key: &str, opts: EntryOptions) -> Result<()> {
        self.registry.register(ty, key, opts)
    }

    /// Create a node of type `ty`, deriving each stored field from `spec`
    /// through its entry's parser. No hooks, watchers or events run for the
    /// initial values.
    pub fn create(&mut self, ty: &str, spec: &Spec) -> Result<NodeId> {
        if !self.registry.contains(ty) {
            return Err(GraphError::UnknownType(ty.to_string()));
        }
        let schema = self.registry.schema(ty);
        let id = self.arena.insert(NodeData::new(NodeKind::Gizmo(ty.to_string())));

        if let Some(schema) = schema {
            for entry in schema.entries() {
                if entry.is_computed() {
                    continue;
                }
                let value = entry.parse(self, id, spec);
                if let Err(err) = self.assign(id, &entry.key, Incoming::Parsed(value), entry.clone()) {
                    self.destroy(id)?;
                    return Err(err);
                }
            }
        }
        self.node_mut(id)?.defined = true;
        debug!(node = %id, ty, "create");
        Ok(id)
    }

    /// Create a node with no schema. Its fields are plain storage.
    pub fn create_plain(&mut self, spec: &Spec) -> NodeId {
        let mut data = NodeData::new(NodeKind::Plain);
        data.store = Store::Fields(spec.clone());
        data.defined = true;
        self.arena.insert(data)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.arena.live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self, id: NodeId) -> Result<&NodeKind> {
        Ok(&self.node(id)?.kind)
    }

    pub fn type_name(&self, id: NodeId) -> Option<&str> {
        match &self.arena.get(id)?.kind {
            NodeKind::Gizmo(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn is_defined(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.defined)
    }

    /// Stored keys, in store order. Computed fields are not listed.
    pub fn keys(&self, id: NodeId) -> Result<Vec<String>> {
        Ok(self.node(id)?.store.keys())
    }

    pub fn get(&self, id: NodeId, key: &str) -> Result<Value> {
        let node = self.node(id)?;
        if let NodeKind::Gizmo(ty) = &node.kind {
            if let Some(getter) = self.registry.entry(ty, key).and_then(|e| e.getter.clone()) {
                return Ok(getter(self, id));
            }
        }
        Ok(node.store.get(key).cloned().unwrap_or_default())
    }

    /// Follow a dotted path through node references and raw containers.
    /// Missing keys and destroyed nodes resolve to null.
    pub fn get_path(&self, id: NodeId, path: &str) -> Result<Value> {
        let path = KeyPath::parse(path)?;
        let mut cur = Value::Node(id);
        for key in path.segments() {
            cur = match cur {
                Value::Node(n) if !self.contains(n) => Value::Null,
                Value::Node(n) => self.get(n, key)?,
                Value::Object(mut map) => map.remove(key).unwrap_or_default(),
                Value::Array(items) => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.into_iter().nth(i))
                    .unwrap_or_default(),
                _ => Value::Null,
            };
        }
        Ok(cur)
    }

    pub fn set(&mut self, id: NodeId, key: &str, value: impl Into<Value>) -> Result<SetOutcome> {
        let value = value.into();
        let Some(entry) = self.entry_for(id, key)? else {
            return self.write_plain(id, key, value);
        };
        if entry.is_computed() {
            return Ok(SetOutcome::Rejected(Rejection::Computed));
        }
        if entry.readonly {
            return Ok(SetOutcome::Rejected(Rejection::Readonly));
        }
        self.assign(id, key, Incoming::Value(value), entry)
    }

    /// Force an autogen recompute of `key`. Bypasses `readonly`.
    pub fn regenerate(&mut self, id: NodeId, key: &str) -> Result<()> {
        let Some(entry) = self.entry_for(id, key)? else {
            return Ok(());
        };
        if entry.is_computed() {
            return Ok(());
        }
        trace!(node = %id, key, "regenerate");
        self.assign(id, key, Incoming::Regenerate, entry)?;
        Ok(())
    }

    pub(crate) fn assign(
        &mut self,
        id: NodeId,
        key: &str,
        incoming: Incoming,
        entry: Rc<SchemaEntry>,
    ) -> Result<SetOutcome> {
        self.node(id)?.store.check_key(key)?;
        if entry.is_computed() {
            return Ok(SetOutcome::Rejected(Rejection::Computed));
        }
        let value = match incoming {
            Incoming::Value(v) => match &entry.generator {
                Some(generator) => generator(self, id, v),
                None => v,
            },
            Incoming::Parsed(v) => v,
            Incoming::Regenerate => entry.regenerate(self, id),
        };

        let node = self.node(id)?;
        let defined = node.defined;
        let old = node.store.get(key).cloned().unwrap_or_default();
        if defined && old.same_value(&value) {
            return Ok(SetOutcome::Unchanged);
        }

        let value = if entry.link {
            self.wrap(value, entry.proxy)?
        } else {
            value
        };

        if entry.link {
            // Cycle check first: a rejected attach must leave the old value
            // linked.
            if let Some(leaf) = value.as_node() {
                self.node(leaf)?;
                self.check_acyclic(id, leaf)?;
            }
            if let Some(prev) = old.as_node() {
                if self.is_leaf_at(id, key, prev) {
                    self.detach(id, prev)?;
                }
            }
            if let Some(leaf) = value.as_node() {
                self.link_leaf(id, key, Some(entry.clone()), leaf)?;
            }
        }

        self.node_mut(id)?.store.write(key, value.clone())?;

        if defined {
            self.notify(id, key, &entry, &old, &value)?;
        }
        Ok(SetOutcome::Changed)
    }

    /// Remove `key` from the store, detaching a node value still attached
    /// there. Defined nodes report the removal as a change to null.
    pub(crate) fn unset(&mut self, id: NodeId, key: &str) -> Result<Option<Value>> {
        let entry = self.entry_for(id, key)?;
        let node = self.node(id)?;
        let defined = node.defined;
        let Some(old) = node.store.get(key).cloned() else {
            return Ok(None);
        };

        if let (Some(entry), Value::Node(prev)) = (&entry, &old) {
            if entry.link && self.is_leaf_at(id, key, *prev) {
                self.detach(id, *prev)?;
            }
        }
        self.node_mut(id)?.store.remove(key);

        if let (true, Some(entry)) = (defined, entry) {
            self.notify(id, key, &entry, &old, &Value::Null)?;
        }
        Ok(Some(old))
    }

    fn notify(
        &mut self,
        id: NodeId,
        key: &str,
        entry: &Rc<SchemaEntry>,
        old: &Value,
        new: &Value,
    ) -> Result<()> {
        let change = Change {
            target: id,
            key,
            old,
            new,
        };
        if let Some(hook) = entry.on_set.clone() {
            hook(self, id, &change)?;
        }
        for dep in entry.autogen_dependents.iter() {
            self.regenerate(id, dep)?;
        }
        self.fire_watchers(&change)?;
        if entry.eventable && self.trunk_of(id)?.is_none() && self.is_emitter(id) {
            self.emit(id, KeyPath::new(vec![key.to_string()]), new.clone());
        }
        Ok(())
    }

    fn write_plain(&mut self, id: NodeId, key: &str, value: Value) -> Result<SetOutcome> {
        let node = self.node_mut(id)?;
        if node
            .store
            .get(key)
            .is_some_and(|old| old.same_value(&value))
        {
            return Ok(SetOutcome::Unchanged);
        }
        node.store.write(key, value)?;
        Ok(SetOutcome::Changed)
    }

    pub(crate) fn regenerate_trunk_keys(&mut self, id: NodeId) -> Result<()> {
        let Some(schema) = self.type_name(id).and_then(|ty| self.registry.schema(ty)) else {
            return Ok(());
        };
        for key in schema.trunk_regen_keys() {
            self.regenerate(id, key)?;
        }
        Ok(())
    }

    /// Wrap raw arrays/objects for a proxying entry.
    pub(crate) fn wrap(&mut self, value: Value, proxy: Proxy) -> Result<Value> {
        let deep = match proxy {
            Proxy::Off => return Ok(value),
            Proxy::Shallow => false,
            Proxy::Deep => true,
        };
        Ok(match value {
            Value::Array(items) => Value::Node(self.wrap_array(items, deep)?.node()),
            Value::Object(map) => Value::Node(self.wrap_object(map, deep)?.node()),
            other => other,
        })
    }

    pub(crate) fn entry_for(&self, id: NodeId, key: &str) -> Result<Option<Rc<SchemaEntry>>> {
        Ok(match &self.node(id)?.kind {
            NodeKind::Plain => None,
            NodeKind::Gizmo(ty) => self.registry.entry(ty, key),
            NodeKind::Array { deep } | NodeKind::Object { deep } => Some(self.element(*deep)),
        })
    }

    pub(crate) fn element(&self, deep: bool) -> Rc<SchemaEntry> {
        if deep {
            self.deep_element.clone()
        } else {
            self.shallow_element.clone()
        }
    }

    pub(crate) fn type_def(&self, id: NodeId) -> Option<&TypeDef> {
        self.type_name(id).and_then(|ty| self.registry.get(ty))
    }

    /// A node emits root events when its type opted in and the event
    /// collaborator agrees.
    pub fn is_emitter(&self, id: NodeId) -> bool {
        let opted_in = self.type_def(id).is_some_and(|d| d.emitter);
        opted_in && self.events.as_ref().is_some_and(|ev| ev.is_emitter(id))
    }

    pub(crate) fn emit(&self, root: NodeId, path: KeyPath, value: Value) {
        let Some(events) = self.events.clone() else {
            return;
        };
        let path = path.to_string();
        debug!(%root, %path, "root event");
        events.trigger(root, SET_EVENT_TAG, &EventAttrs::set(path, value));
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.arena.get(id).ok_or(GraphError::StaleNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.arena.get_mut(id).ok_or(GraphError::StaleNode(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::schema::Autogen;
    use pretty_assertions::assert_eq;

    fn spec(json: serde_json::Value) -> Spec {
        crate::value::spec_from_json(json)
    }

    #[test]
    fn create_parses_spec_then_defaults() {
        let mut g = Graph::new();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register("T", "a", EntryOptions::new().default_value(1)).unwrap();
        g.register("T", "b", EntryOptions::new().default_value("x").spec_key("bee"))
            .unwrap();
        let id = g.create("T", &spec(serde_json::json!({"a": 5, "bee": "y"}))).unwrap();
        assert_eq!(g.get(id, "a").unwrap(), Value::from(5));
        assert_eq!(g.get(id, "b").unwrap(), Value::from("y"));
        assert!(g.is_defined(id).unwrap());
        assert!(matches!(g.create("Nope", &Spec::new()), Err(GraphError::UnknownType(_))));
    }

    #[test]
    fn custom_parser_synthesizes_values() {
        let mut g = Graph::new();
        let counter = Rc::new(std::cell::Cell::new(0));
        let c = counter.clone();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register(
            "T",
            "gid",
            EntryOptions::new().readonly(true).parser(move |_, _, _| {
                c.set(c.get() + 1);
                Value::from(c.get())
            }),
        )
        .unwrap();
        let a = g.create("T", &spec(serde_json::json!({"gid": 99}))).unwrap();
        let b = g.create("T", &Spec::new()).unwrap();
        assert_eq!(g.get(a, "gid").unwrap(), Value::from(1));
        assert_eq!(g.get(b, "gid").unwrap(), Value::from(2));
        assert_eq!(
            g.set(a, "gid", 7).unwrap(),
            SetOutcome::Rejected(Rejection::Readonly)
        );
    }

    #[test]
    fn computed_fields_reject_writes_and_never_store() {
        let mut g = Graph::new();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register("T", "n", EntryOptions::new().default_value(2)).unwrap();
        g.register(
            "T",
            "twice",
            EntryOptions::new().getter(|g, id| {
                Value::from(g.get(id, "n").ok().and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0)
            }),
        )
        .unwrap();
        let id = g.create("T", &Spec::new()).unwrap();
        assert_eq!(g.get(id, "twice").unwrap(), Value::from(4));
        assert_eq!(
            g.set(id, "twice", 1).unwrap(),
            SetOutcome::Rejected(Rejection::Computed)
        );
        assert_eq!(g.keys(id).unwrap(), vec!["n".to_string()]);
        assert!(!g.registry().entry("T", "twice").unwrap().eventable);
    }

    #[test]
    fn generator_transforms_writes() {
        let mut g = Graph::new();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register(
            "T",
            "name",
            EntryOptions::new()
                .default_value("")
                .generator(|_, _, v| match v {
                    Value::Str(s) => Value::Str(s.to_uppercase()),
                    other => other,
                }),
        )
        .unwrap();
        let id = g.create("T", &Spec::new()).unwrap();
        assert!(g.set(id, "name", "bob").unwrap().is_changed());
        assert_eq!(g.get(id, "name").unwrap(), Value::from("BOB"));
        assert_eq!(g.set(id, "name", "BOB").unwrap(), SetOutcome::Unchanged);
    }

    #[test]
    fn on_set_hook_runs_for_direct_writes_only_when_defined() {
        let mut g = Graph::new();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let s = seen.clone();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register(
            "T",
            "v",
            EntryOptions::new().default_value(0).on_set(move |_, owner, change| {
                s.borrow_mut().push((owner, change.key.to_string(), change.new.clone()));
                Ok(())
            }),
        )
        .unwrap();
        let id = g.create("T", &Spec::new()).unwrap();
        assert!(seen.borrow().is_empty());
        assert!(g.set(id, "v", 3).unwrap().is_changed());
        assert_eq!(*seen.borrow(), vec![(id, "v".to_string(), Value::from(3))]);
    }

    #[test]
    fn autogen_chain_and_readonly_bypass() {
        let mut g = Graph::new();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register("T", "a", EntryOptions::new().default_value(1)).unwrap();
        g.register(
            "T",
            "b",
            EntryOptions::new()
                .readonly(true)
                .autogen(Autogen::on_keys(["a"]))
                .generator(|g, id, _| {
                    Value::from(g.get(id, "a").ok().and_then(|v| v.as_f64()).unwrap_or(0.0) + 1.0)
                }),
        )
        .unwrap();
        g.register(
            "T",
            "c",
            EntryOptions::new()
                .autogen(Autogen::on_keys(["b"]))
                .generator(|g, id, _| {
                    Value::from(g.get(id, "b").ok().and_then(|v| v.as_f64()).unwrap_or(0.0) * 10.0)
                }),
        )
        .unwrap();
        let id = g.create("T", &Spec::new()).unwrap();
        assert_eq!(g.get(id, "c").unwrap(), Value::from(20));
        assert!(g.set(id, "a", 4).unwrap().is_changed());
        assert_eq!(g.get(id, "b").unwrap(), Value::from(5));
        assert_eq!(g.get(id, "c").unwrap(), Value::from(50));
    }

    #[test]
    fn plain_nodes_are_raw_storage() {
        let log = Rc::new(EventLog::new());
        let mut g = Graph::with_events(log.clone());
        let a = g.create_plain(&spec(serde_json::json!({"x": 1, "y": "z"})));
        let b = g.create_plain(&Spec::new());
        assert_eq!(g.keys(a).unwrap(), vec!["x".to_string(), "y".to_string()]);
        assert_eq!(g.get(a, "y").unwrap(), Value::from("z"));
        assert_eq!(g.set(a, "x", 1).unwrap(), SetOutcome::Unchanged);
        assert!(g.set(a, "child", b).unwrap().is_changed());
        // No schema: storing a node does not link it.
        assert_eq!(g.trunk_of(b).unwrap(), None);
        assert!(log.is_empty());
    }

    #[test]
    fn get_path_walks_nodes_and_raw_data() {
        let mut g = Graph::new();
        let inner = g.create_plain(&spec(serde_json::json!({"xs": [1, {"k": "v"}]})));
        let outer = g.create_plain(&Spec::new());
        assert!(g.set(outer, "inner", inner).unwrap().is_changed());
        assert_eq!(g.get_path(outer, "inner.xs.1.k").unwrap(), Value::from("v"));
        assert_eq!(g.get_path(outer, "inner.missing.deeper").unwrap(), Value::Null);
        assert!(g.get_path(outer, "a..b").is_err());
    }

    #[test]
    fn get_path_through_a_destroyed_node_is_null() {
        let mut g = Graph::new();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register("T", "data", EntryOptions::new()).unwrap();
        g.register("T", "el", EntryOptions::new().default_value(1)).unwrap();
        let root = g.create("T", &Spec::new()).unwrap();
        let sub = g.create("T", &Spec::new()).unwrap();
        assert!(g.set(root, "data", sub).unwrap().is_changed());
        assert_eq!(g.get_path(root, "data.el").unwrap(), Value::from(1));

        g.destroy(sub).unwrap();
        assert_eq!(g.get(root, "data").unwrap(), Value::Node(sub));
        assert_eq!(g.get_path(root, "data.el").unwrap(), Value::Null);
        assert!(matches!(g.get(sub, "el"), Err(GraphError::StaleNode(_))));
    }

    #[test]
    fn stale_handles_error() {
        let mut g = Graph::new();
        let a = g.create_plain(&Spec::new());
        g.destroy(a).unwrap();
        assert!(matches!(g.get(a, "x"), Err(GraphError::StaleNode(_))));
        assert!(matches!(g.set(a, "x", 1), Err(GraphError::StaleNode(_))));
        assert!(g.is_empty());
    }
}
