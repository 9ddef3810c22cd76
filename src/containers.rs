//! Reactive arrays and objects.
//!
//! Containers are ordinary graph nodes whose every slot shares one element
//! entry (linking on, eventable). All mutation is expressed as slot writes
//! and removals through the regular set pipeline, so watchers and root
//! events see the same index mapping a caller would get from explicit
//! writes. Removing a slot is reported as a change to null.

use crate::error::{GraphError, Result};
use crate::graph::{Graph, Incoming, NodeId, NodeKind, SetOutcome};
use crate::value::Value;
use std::collections::BTreeMap;

/// Slot-level access shared by the container handles.
pub trait KeyedMutation<K> {
    fn node(&self) -> NodeId;
    fn get(&self, graph: &Graph, key: K) -> Result<Value>;
    fn set(&self, graph: &mut Graph, key: K, value: Value) -> Result<SetOutcome>;
    fn remove(&self, graph: &mut Graph, key: K) -> Result<Option<Value>>;
    fn len(&self, graph: &Graph) -> Result<usize>;

    fn is_empty(&self, graph: &Graph) -> Result<bool> {
        Ok(self.len(graph)? == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GizmoArray(NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GizmoObject(NodeId);

impl Graph {
    /// Wrap `items` into a new reactive array. Node items are attached under
    /// their index; with `deep`, raw containers are wrapped recursively.
    pub fn wrap_array(&mut self, items: Vec<Value>, deep: bool) -> Result<GizmoArray> {
        let id = self
            .arena
            .insert(crate::graph::node::NodeData::new(NodeKind::Array { deep }));
        let entry = self.element(deep);
        for (i, item) in items.into_iter().enumerate() {
            self.assign(id, &i.to_string(), Incoming::Value(item), entry.clone())?;
        }
        self.node_mut(id)?.defined = true;
        Ok(GizmoArray(id))
    }

    pub fn wrap_object(&mut self, map: BTreeMap<String, Value>, deep: bool) -> Result<GizmoObject> {
        let id = self
            .arena
            .insert(crate::graph::node::NodeData::new(NodeKind::Object { deep }));
        let entry = self.element(deep);
        for (k, v) in map {
            self.assign(id, &k, Incoming::Value(v), entry.clone())?;
        }
        self.node_mut(id)?.defined = true;
        Ok(GizmoObject(id))
    }
}

impl GizmoArray {
    pub fn from_node(graph: &Graph, id: NodeId) -> Result<Self> {
        match graph.kind(id)? {
            NodeKind::Array { .. } => Ok(Self(id)),
            _ => Err(GraphError::NotAContainer(id)),
        }
    }

    pub fn node(self) -> NodeId {
        self.0
    }

    pub fn len(self, graph: &Graph) -> Result<usize> {
        Ok(graph.node(self.0)?.store.len())
    }

    pub fn is_empty(self, graph: &Graph) -> Result<bool> {
        Ok(self.len(graph)? == 0)
    }

    pub fn get(self, graph: &Graph, index: usize) -> Result<Value> {
        graph.get(self.0, &index.to_string())
    }

    /// Write an existing index, or append at `len`.
    pub fn set(self, graph: &mut Graph, index: usize, value: impl Into<Value>) -> Result<SetOutcome> {
        graph.set(self.0, &index.to_string(), value)
    }

    pub fn to_vec(self, graph: &Graph) -> Result<Vec<Value>> {
        let len = self.len(graph)?;
        (0..len).map(|i| self.get(graph, i)).collect()
    }

    /// Append; returns the new length.
    pub fn push(self, graph: &mut Graph, value: impl Into<Value>) -> Result<usize> {
        let len = self.len(graph)?;
        let _ = self.set(graph, len, value)?;
        Ok(len + 1)
    }

    pub fn pop(self, graph: &mut Graph) -> Result<Option<Value>> {
        match self.len(graph)? {
            0 => Ok(None),
            len => graph.unset(self.0, &(len - 1).to_string()),
        }
    }

    /// Remove the first element, moving every later element down one index.
    pub fn shift(self, graph: &mut Graph) -> Result<Option<Value>> {
        let len = self.len(graph)?;
        if len == 0 {
            return Ok(None);
        }
        let first = self.get(graph, 0)?;
        for i in 0..len - 1 {
            let next = self.get(graph, i + 1)?;
            let _ = self.set(graph, i, next)?;
        }
        graph.unset(self.0, &(len - 1).to_string())?;
        Ok(Some(first))
    }

    /// Insert at the front, moving every element up one index (highest
    /// first); returns the new length.
    pub fn unshift(self, graph: &mut Graph, value: impl Into<Value>) -> Result<usize> {
        let len = self.len(graph)?;
        for i in (0..len).rev() {
            let v = self.get(graph, i)?;
            let _ = self.set(graph, i + 1, v)?;
        }
        let _ = self.set(graph, 0, value)?;
        Ok(len + 1)
    }

    /// Remove `delete_count` elements at `start` and insert `items` there.
    /// Returns the removed elements.
    ///
    /// Slots are rewritten so that no element is overwritten before it has
    /// moved: growing arrays write the new tail first, then the shifted
    /// region from high to low; shrinking arrays write low to high and then
    /// truncate from the end.
    pub fn splice(
        self,
        graph: &mut Graph,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let current = self.to_vec(graph)?;
        let len = current.len();
        let start = start.min(len);
        let end = start + delete_count.min(len - start);

        let removed = current[start..end].to_vec();
        let mut next = current[..start].to_vec();
        next.extend(items);
        next.extend_from_slice(&current[end..]);
        let new_len = next.len();

        if new_len > len {
            for (i, v) in next.iter().enumerate().skip(len) {
                let _ = self.set(graph, i, v.clone())?;
            }
            for i in (start..len).rev() {
                let _ = self.set(graph, i, next[i].clone())?;
            }
        } else {
            for (i, v) in next.iter().enumerate().take(new_len).skip(start) {
                let _ = self.set(graph, i, v.clone())?;
            }
            for i in (new_len..len).rev() {
                graph.unset(self.0, &i.to_string())?;
            }
        }
        Ok(removed)
    }
}

impl KeyedMutation<usize> for GizmoArray {
    fn node(&self) -> NodeId {
        self.0
    }

    fn get(&self, graph: &Graph, key: usize) -> Result<Value> {
        GizmoArray::get(*self, graph, key)
    }

    fn set(&self, graph: &mut Graph, key: usize, value: Value) -> Result<SetOutcome> {
        GizmoArray::set(*self, graph, key, value)
    }

    /// Removes the element and closes the gap.
    fn remove(&self, graph: &mut Graph, key: usize) -> Result<Option<Value>> {
        if key >= GizmoArray::len(*self, graph)? {
            return Ok(None);
        }
        Ok(self.splice(graph, key, 1, Vec::new())?.into_iter().next())
    }

    fn len(&self, graph: &Graph) -> Result<usize> {
        GizmoArray::len(*self, graph)
    }
}

impl GizmoObject {
    pub fn from_node(graph: &Graph, id: NodeId) -> Result<Self> {
        match graph.kind(id)? {
            NodeKind::Object { .. } => Ok(Self(id)),
            _ => Err(GraphError::NotAContainer(id)),
        }
    }

    pub fn node(self) -> NodeId {
        self.0
    }

    pub fn get(self, graph: &Graph, key: &str) -> Result<Value> {
        graph.get(self.0, key)
    }

    pub fn set(self, graph: &mut Graph, key: &str, value: impl Into<Value>) -> Result<SetOutcome> {
        graph.set(self.0, key, value)
    }

    pub fn remove(self, graph: &mut Graph, key: &str) -> Result<Option<Value>> {
        graph.unset(self.0, key)
    }

    pub fn contains_key(self, graph: &Graph, key: &str) -> Result<bool> {
        Ok(graph.node(self.0)?.store.get(key).is_some())
    }

    pub fn keys(self, graph: &Graph) -> Result<Vec<String>> {
        graph.keys(self.0)
    }

    pub fn len(self, graph: &Graph) -> Result<usize> {
        Ok(graph.node(self.0)?.store.len())
    }

    pub fn is_empty(self, graph: &Graph) -> Result<bool> {
        Ok(self.len(graph)? == 0)
    }
}

impl<'k> KeyedMutation<&'k str> for GizmoObject {
    fn node(&self) -> NodeId {
        self.0
    }

    fn get(&self, graph: &Graph, key: &'k str) -> Result<Value> {
        GizmoObject::get(*self, graph, key)
    }

    fn set(&self, graph: &mut Graph, key: &'k str, value: Value) -> Result<SetOutcome> {
        GizmoObject::set(*self, graph, key, value)
    }

    fn remove(&self, graph: &mut Graph, key: &'k str) -> Result<Option<Value>> {
        GizmoObject::remove(*self, graph, key)
    }

    fn len(&self, graph: &Graph) -> Result<usize> {
        GizmoObject::len(*self, graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Spec;
    use pretty_assertions::assert_eq;

    fn nums(graph: &Graph, arr: GizmoArray) -> Vec<Value> {
        arr.to_vec(graph).unwrap()
    }

    fn v(xs: &[i32]) -> Vec<Value> {
        xs.iter().map(|&x| Value::from(x)).collect()
    }

    #[test]
    fn push_pop_shift_unshift() {
        let mut g = Graph::new();
        let arr = g.wrap_array(v(&[1, 2]), false).unwrap();
        assert_eq!(arr.push(&mut g, 3).unwrap(), 3);
        assert_eq!(arr.unshift(&mut g, 0).unwrap(), 4);
        assert_eq!(nums(&g, arr), v(&[0, 1, 2, 3]));
        assert_eq!(arr.shift(&mut g).unwrap(), Some(Value::from(0)));
        assert_eq!(arr.pop(&mut g).unwrap(), Some(Value::from(3)));
        assert_eq!(nums(&g, arr), v(&[1, 2]));
        assert!(matches!(
            arr.set(&mut g, 5, 1),
            Err(GraphError::IndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn splice_grow_and_shrink() {
        let mut g = Graph::new();
        let arr = g.wrap_array(v(&[1, 2, 3, 4]), false).unwrap();
        let removed = arr.splice(&mut g, 1, 1, v(&[7, 8, 9])).unwrap();
        assert_eq!(removed, v(&[2]));
        assert_eq!(nums(&g, arr), v(&[1, 7, 8, 9, 3, 4]));
        let removed = arr.splice(&mut g, 0, 4, v(&[5])).unwrap();
        assert_eq!(removed, v(&[1, 7, 8, 9]));
        assert_eq!(nums(&g, arr), v(&[5, 3, 4]));
        assert_eq!(KeyedMutation::remove(&arr, &mut g, 1).unwrap(), Some(Value::from(3)));
        assert_eq!(nums(&g, arr), v(&[5, 4]));
    }

    #[test]
    fn node_elements_follow_their_index() {
        let mut g = Graph::new();
        let a = g.create_plain(&Spec::new());
        let b = g.create_plain(&Spec::new());
        let c = g.create_plain(&Spec::new());
        let arr = g
            .wrap_array(vec![Value::Node(a), Value::Node(b)], false)
            .unwrap();
        assert_eq!(g.key_of(b).unwrap().as_deref(), Some("1"));

        arr.unshift(&mut g, c).unwrap();
        assert_eq!(g.key_of(c).unwrap().as_deref(), Some("0"));
        assert_eq!(g.key_of(a).unwrap().as_deref(), Some("1"));
        assert_eq!(g.key_of(b).unwrap().as_deref(), Some("2"));

        arr.shift(&mut g).unwrap();
        assert_eq!(g.trunk_of(c).unwrap(), None);
        assert_eq!(g.key_of(a).unwrap().as_deref(), Some("0"));
        assert_eq!(g.key_of(b).unwrap().as_deref(), Some("1"));

        arr.splice(&mut g, 0, 1, Vec::new()).unwrap();
        assert_eq!(g.trunk_of(a).unwrap(), None);
        assert_eq!(g.key_of(b).unwrap().as_deref(), Some("0"));
        assert_eq!(g.leafs_of(arr.node()).unwrap(), vec![b]);
    }

    #[test]
    fn deep_wrap_recurses() {
        let mut g = Graph::new();
        let raw = Value::from(serde_json::json!([[1, 2], {"k": [3]}]));
        let Value::Array(items) = raw else {
            unreachable!()
        };
        let arr = g.wrap_array(items, true).unwrap();
        let inner = arr.get(&g, 0).unwrap().as_node().unwrap();
        assert!(GizmoArray::from_node(&g, inner).is_ok());
        let obj = GizmoObject::from_node(&g, arr.get(&g, 1).unwrap().as_node().unwrap()).unwrap();
        let nested = obj.get(&g, "k").unwrap().as_node().unwrap();
        assert_eq!(g.trunk_of(nested).unwrap(), Some(obj.node()));
        assert_eq!(g.path_of(nested).unwrap().to_string(), "1.k");

        let pushed = arr.push(&mut g, Value::Array(v(&[4]))).unwrap();
        assert_eq!(pushed, 3);
        assert!(arr.get(&g, 2).unwrap().as_node().is_some());
    }

    #[test]
    fn shallow_wrap_keeps_raw_values() {
        let mut g = Graph::new();
        let arr = g.wrap_array(vec![Value::Array(v(&[1]))], false).unwrap();
        assert_eq!(arr.get(&g, 0).unwrap(), Value::Array(v(&[1])));
        assert!(matches!(
            GizmoObject::from_node(&g, arr.node()),
            Err(GraphError::NotAContainer(_))
        ));
    }

    #[test]
    fn object_set_and_remove() {
        let mut g = Graph::new();
        let obj = g.wrap_object(BTreeMap::new(), false).unwrap();
        let leaf = g.create_plain(&Spec::new());
        assert!(obj.set(&mut g, "a", leaf).unwrap().is_changed());
        assert_eq!(g.trunk_of(leaf).unwrap(), Some(obj.node()));
        assert_eq!(obj.remove(&mut g, "a").unwrap(), Some(Value::Node(leaf)));
        assert_eq!(g.trunk_of(leaf).unwrap(), None);
        assert!(!obj.contains_key(&g, "a").unwrap());
        assert_eq!(obj.remove(&mut g, "a").unwrap(), None);
    }
}
