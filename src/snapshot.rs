//! JSON snapshots of a node and everything reachable from it.
//!
//! Typed nodes contribute their serializable stored fields under each
//! field's serialize key. Plain nodes contribute every stored key. Reactive
//! containers become JSON arrays and objects. A node reached a second time,
//! or a stale handle, is written as a `{"$node": "<id>"}` reference.

use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeKind};
use crate::value::{Value, as_integer};
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeSet;

impl Graph {
    pub fn snapshot(&self, id: NodeId) -> Result<Json> {
        self.node(id)?;
        let mut seen = BTreeSet::new();
        Ok(self.snapshot_node(id, &mut seen))
    }

    fn snapshot_node(&self, id: NodeId, seen: &mut BTreeSet<NodeId>) -> Json {
        let Some(node) = self.arena.get(id) else {
            return node_ref(id);
        };
        if !seen.insert(id) {
            return node_ref(id);
        }
        match &node.kind {
            NodeKind::Array { .. } => Json::Array(
                (0..node.store.len())
                    .map(|i| {
                        let v = node.store.get(&i.to_string()).cloned().unwrap_or_default();
                        self.snapshot_value(&v, seen)
                    })
                    .collect(),
            ),
            NodeKind::Object { .. } | NodeKind::Plain => {
                let mut out = Map::new();
                for key in node.store.keys() {
                    let v = node.store.get(&key).cloned().unwrap_or_default();
                    out.insert(key, self.snapshot_value(&v, seen));
                }
                Json::Object(out)
            }
            NodeKind::Gizmo(ty) => {
                let mut out = Map::new();
                if let Some(schema) = self.registry().schema(ty) {
                    for entry in schema.entries() {
                        if !entry.serializable || entry.is_computed() {
                            continue;
                        }
                        let Some(v) = node.store.get(&entry.key) else {
                            continue;
                        };
                        out.insert(entry.serialize_key.clone(), self.snapshot_value(v, seen));
                    }
                }
                Json::Object(out)
            }
        }
    }

    fn snapshot_value(&self, value: &Value, seen: &mut BTreeSet<NodeId>) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number(*n),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) => {
                Json::Array(items.iter().map(|v| self.snapshot_value(v, seen)).collect())
            }
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.snapshot_value(v, seen)))
                    .collect(),
            ),
            Value::Node(id) => self.snapshot_node(*id, seen),
        }
    }
}

fn number(n: f64) -> Json {
    match as_integer(n) {
        Some(i) => Json::Number(Number::from(i)),
        // NaN and infinities have no JSON form.
        None => Number::from_f64(n).map_or(Json::Null, Json::Number),
    }
}

fn node_ref(id: NodeId) -> Json {
    let mut m = Map::new();
    m.insert("$node".to_string(), Json::String(id.to_string()));
    Json::Object(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntryOptions, Proxy, TypeOptions};
    use crate::value::Spec;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn typed_nodes_follow_serialize_options() {
        let mut g = Graph::new();
        g.define_type("T", TypeOptions::new()).unwrap();
        g.register("T", "name", EntryOptions::new().default_value("n").serialize_key("label"))
            .unwrap();
        g.register("T", "secret", EntryOptions::new().default_value(1).serializable(false))
            .unwrap();
        g.register("T", "size", EntryOptions::new().getter(|_, _| Value::from(3)))
            .unwrap();
        g.register("T", "items", EntryOptions::new().link(true).proxy(Proxy::Deep))
            .unwrap();
        g.register("T", "child", EntryOptions::new().link(true)).unwrap();

        let parent = g.create("T", &Spec::new()).unwrap();
        let child = g.create("T", &Spec::new()).unwrap();
        assert!(g.set(parent, "child", child).unwrap().is_changed());
        assert!(g
            .set(parent, "items", Value::from(json!([1, {"x": 2.5}])))
            .unwrap()
            .is_changed());

        assert_eq!(
            g.snapshot(parent).unwrap(),
            json!({
                "label": "n",
                "items": [1, {"x": 2.5}],
                "child": {"label": "n", "items": null, "child": null},
            })
        );
    }

    #[test]
    fn numbers_match_value_serialization() {
        let mut g = Graph::new();
        let raw = json!({"int": 8, "neg": -3, "frac": 2.5, "big": 1e300});
        let id = g.create_plain(&crate::value::spec_from_json(raw.clone()));
        let as_value = serde_json::to_value(Value::from(raw.clone())).unwrap();
        assert_eq!(g.snapshot(id).unwrap(), as_value);
        assert_eq!(g.snapshot(id).unwrap(), raw);
    }

    #[test]
    fn revisits_and_stale_nodes_become_references() {
        let mut g = Graph::new();
        let a = g.create_plain(&Spec::new());
        let b = g.create_plain(&Spec::new());
        let gone = g.create_plain(&Spec::new());
        g.destroy(gone).unwrap();
        assert!(g.set(a, "x", b).unwrap().is_changed());
        assert!(g.set(a, "y", b).unwrap().is_changed());
        assert!(g.set(b, "back", a).unwrap().is_changed());
        assert!(g.set(b, "gone", gone).unwrap().is_changed());

        let snap = g.snapshot(a).unwrap();
        assert_eq!(snap["x"]["back"], json!({"$node": a.to_string()}));
        assert_eq!(snap["x"]["gone"], json!({"$node": gone.to_string()}));
        assert_eq!(snap["y"], json!({"$node": b.to_string()}));
    }
}
