//! Arena storage for nodes.
//!
//! Nodes live in a slot vector and are addressed by generational handles.
//! Freed slots are reused; bumping the generation on free makes every
//! outstanding handle to the old occupant detectably stale.

use super::link::Link;
use crate::error::{GraphError, Result};
use crate::value::Value;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    idx: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> u32 {
        self.idx
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.idx, self.generation)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// No schema: fields are raw storage with no linking or events.
    Plain,
    /// An instance of a registered type.
    Gizmo(String),
    /// Reactive array. `deep` containers wrap raw containers assigned into them.
    Array { deep: bool },
    /// Reactive object.
    Object { deep: bool },
}

impl NodeKind {
    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Array { .. } | NodeKind::Object { .. })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Store {
    Fields(BTreeMap<String, Value>),
    Items(Vec<Value>),
}

impl Store {
    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Store::Fields(map) => map.get(key),
            Store::Items(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        }
    }

    /// Fail early for keys `write` would reject, before any link work.
    pub(crate) fn check_key(&self, key: &str) -> Result<()> {
        match self {
            Store::Fields(_) => Ok(()),
            Store::Items(items) => {
                let index = parse_index(key)?;
                if index > items.len() {
                    return Err(GraphError::IndexOutOfRange {
                        index,
                        len: items.len(),
                    });
                }
                Ok(())
            }
        }
    }

    pub(crate) fn write(&mut self, key: &str, value: Value) -> Result<()> {
        match self {
            Store::Fields(map) => {
                map.insert(key.to_string(), value);
            }
            Store::Items(items) => {
                let index = parse_index(key)?;
                match index.cmp(&items.len()) {
                    std::cmp::Ordering::Less => items[index] = value,
                    std::cmp::Ordering::Equal => items.push(value),
                    std::cmp::Ordering::Greater => {
                        return Err(GraphError::IndexOutOfRange {
                            index,
                            len: items.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Arrays only shrink from the end; removing an inner index leaves a
    /// null in its place.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Store::Fields(map) => map.remove(key),
            Store::Items(items) => {
                let index = key.parse::<usize>().ok()?;
                if index + 1 == items.len() {
                    items.pop()
                } else {
                    items.get_mut(index).map(std::mem::take)
                }
            }
        }
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        match self {
            Store::Fields(map) => map.keys().cloned().collect(),
            Store::Items(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Store::Fields(map) => map.len(),
            Store::Items(items) => items.len(),
        }
    }
}

fn parse_index(key: &str) -> Result<usize> {
    key.parse::<usize>()
        .map_err(|_| GraphError::InvalidKey(key.to_string()))
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub(crate) kind: NodeKind,
    pub(crate) store: Store,
    pub(crate) link: Option<Link>,
    /// False while the initial parse runs; gates hooks, watchers and events.
    pub(crate) defined: bool,
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind) -> Self {
        let store = match kind {
            NodeKind::Array { .. } => Store::Items(Vec::new()),
            _ => Store::Fields(BTreeMap::new()),
        };
        Self {
            kind,
            store,
            link: None,
            defined: false,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    pub(crate) fn insert(&mut self, data: NodeData) -> NodeId {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.data = Some(data);
            return NodeId {
                idx,
                generation: slot.generation,
            };
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(data),
        });
        NodeId { idx, generation: 0 }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.slots
            .get(id.idx as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots
            .get_mut(id.idx as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_mut())
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<NodeData> {
        let slot = self
            .slots
            .get_mut(id.idx as usize)
            .filter(|s| s.generation == id.generation)?;
        let data = slot.data.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.idx);
        self.live -= 1;
        Some(data)
    }

    /// Upper bound on the length of any ancestor chain.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn freed_handles_go_stale() {
        let mut arena = Arena::default();
        let a = arena.insert(NodeData::new(NodeKind::Plain));
        assert!(arena.remove(a).is_some());
        let b = arena.insert(NodeData::new(NodeKind::Plain));
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
        assert_eq!(arena.live(), 1);
    }

    #[test]
    fn items_store_bounds() {
        let mut store = Store::Items(Vec::new());
        store.write("0", Value::from(1)).unwrap();
        assert!(store.check_key("1").is_ok());
        assert!(matches!(
            store.write("2", Value::Null),
            Err(GraphError::IndexOutOfRange { index: 2, len: 1 })
        ));
        assert!(matches!(store.check_key("x"), Err(GraphError::InvalidKey(_))));
        assert_eq!(store.remove("0"), Some(Value::from(1)));
        assert_eq!(store.len(), 0);
    }
}
