//! Executes a validated script against a fresh graph.

use super::{spec_arg, Aliases, Script, Step};
use anyhow::{Context, anyhow};
use gizmo_graph::{EventLog, GizmoArray, Graph, NodeId, SetOutcome, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// One root event, attributed to the step that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayEvent {
    pub step: usize,
    /// Alias of the root node, or its id when it has none.
    pub root: String,
    pub tag: String,
    pub set: BTreeMap<String, Value>,
}

pub struct Replay {
    graph: Graph,
    log: Rc<EventLog>,
    aliases: Aliases,
}

impl Replay {
    pub fn new(script: &Script) -> anyhow::Result<Self> {
        let log = Rc::new(EventLog::new());
        let mut graph = Graph::with_events(log.clone());
        script.install(&mut graph)?;
        Ok(Self {
            graph,
            log,
            aliases: Aliases::new(),
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, alias: &str) -> anyhow::Result<NodeId> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| anyhow!("unknown node alias {:?}", alias))
    }

    /// Run every step, collecting the root events in order.
    pub fn run(&mut self, script: &Script) -> anyhow::Result<Vec<ReplayEvent>> {
        let mut events = Vec::new();
        for (i, step) in script.steps.iter().enumerate() {
            self.step(step)
                .with_context(|| format!("step {} ({}) failed", i, step.op()))?;
            for emitted in self.log.take() {
                events.push(ReplayEvent {
                    step: i,
                    root: self.name_of(emitted.node),
                    tag: emitted.tag,
                    set: emitted.attrs.set,
                });
            }
        }
        Ok(events)
    }

    pub fn snapshot(&self, alias: &str) -> anyhow::Result<serde_json::Value> {
        Ok(self.graph.snapshot(self.node(alias)?)?)
    }

    fn step(&mut self, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::Create { alias, ty, spec } => {
                let id = self.graph.create(ty, &spec_arg(spec)?)?;
                self.aliases.insert(alias.clone(), id);
            }
            Step::Set { node, key, value } => {
                let id = self.node(node)?;
                let outcome = self.graph.set(id, key, Value::from(value.clone()))?;
                self.report(node, key, outcome);
            }
            Step::SetNode { node, key, target } => {
                let (id, target) = (self.node(node)?, self.node(target)?);
                let outcome = self.graph.set(id, key, target)?;
                self.report(node, key, outcome);
            }
            Step::Attach { trunk, key, leaf } => {
                let (t, l) = (self.node(trunk)?, self.node(leaf)?);
                self.graph.attach(t, key, l)?;
            }
            Step::Detach { trunk, leaf } => {
                let (t, l) = (self.node(trunk)?, self.node(leaf)?);
                if !self.graph.detach(t, l)? {
                    debug!(%trunk, %leaf, "detach: not attached");
                }
            }
            Step::Destroy { node } => {
                let id = self.node(node)?;
                self.graph.destroy(id)?;
                self.aliases.remove(node);
            }
            Step::Push { node, key, value } => {
                let arr = self.array_field(node, key)?;
                arr.push(&mut self.graph, Value::from(value.clone()))?;
            }
            Step::Pop { node, key } => {
                let arr = self.array_field(node, key)?;
                arr.pop(&mut self.graph)?;
            }
        }
        Ok(())
    }

    fn array_field(&self, alias: &str, key: &str) -> anyhow::Result<GizmoArray> {
        let id = self.node(alias)?;
        let field = self
            .graph
            .get(id, key)?
            .as_node()
            .with_context(|| format!("{alias}.{key} does not hold an array"))?;
        Ok(GizmoArray::from_node(&self.graph, field)?)
    }

    fn report(&self, alias: &str, key: &str, outcome: SetOutcome) {
        match outcome {
            SetOutcome::Changed => {}
            SetOutcome::Unchanged => debug!(node = alias, key, "set: unchanged"),
            SetOutcome::Rejected(why) => {
                warn!(node = alias, key, ?why, "write rejected");
            }
        }
    }

    fn name_of(&self, id: NodeId) -> String {
        self.aliases
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::RawScript;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn replay(script: serde_json::Value) -> (Replay, Vec<ReplayEvent>) {
        let raw: RawScript = serde_json::from_value(script).unwrap();
        let script = raw.validate_and_build().unwrap();
        let mut replay = Replay::new(&script).unwrap();
        let events = replay.run(&script).unwrap();
        (replay, events)
    }

    fn types() -> serde_json::Value {
        json!([
            {"name": "Root", "emitter": true, "fields": [
                {"key": "sub"},
                {"key": "sdata", "default": 0},
                {"key": "adata", "autogen": ["sdata"], "readonly": true,
                 "compute": {"scale": "sdata", "by": 2}}
            ]},
            {"name": "Leaf", "fields": [
                {"key": "el", "default": 0},
                {"key": "items", "default": [], "proxy": "shallow"}
            ]}
        ])
    }

    #[test]
    fn nested_change_is_reported_at_the_root() {
        let (replay, events) = replay(json!({
            "types": types(),
            "steps": [
                {"op": "create", "as": "r", "type": "Root"},
                {"op": "create", "as": "l", "type": "Leaf"},
                {"op": "set_node", "node": "r", "key": "sub", "target": "l"},
                {"op": "set", "node": "l", "key": "el", "value": 5},
                {"op": "set", "node": "r", "key": "sdata", "value": 4}
            ]
        }));
        let paths: Vec<(usize, String)> = events
            .iter()
            .flat_map(|e| e.set.keys().map(move |k| (e.step, k.clone())))
            .collect();
        assert_eq!(
            paths,
            vec![
                (2, "sub".to_string()),
                (3, "sub.el".to_string()),
                (4, "adata".to_string()),
                (4, "sdata".to_string()),
            ]
        );
        assert!(events.iter().all(|e| e.root == "r"));
        let snap = replay.snapshot("r").unwrap();
        assert_eq!(snap["adata"], json!(8));
        assert_eq!(snap["sub"]["el"], json!(5));
    }

    #[test]
    fn push_and_pop_report_indices() {
        let (replay, events) = replay(json!({
            "types": types(),
            "steps": [
                {"op": "create", "as": "r", "type": "Root"},
                {"op": "create", "as": "l", "type": "Leaf"},
                {"op": "attach", "trunk": "r", "key": "sub", "leaf": "l"},
                {"op": "push", "node": "l", "key": "items", "value": 7},
                {"op": "pop", "node": "l", "key": "items"}
            ]
        }));
        let sets: Vec<BTreeMap<String, Value>> = events.into_iter().map(|e| e.set).collect();
        assert_eq!(
            sets,
            vec![
                BTreeMap::from([("sub.items.0".to_string(), Value::from(7))]),
                BTreeMap::from([("sub.items.0".to_string(), Value::Null)]),
            ]
        );
        assert_eq!(replay.snapshot("l").unwrap()["items"], json!([]));
    }

    #[test]
    fn failing_step_names_its_index() {
        let raw: RawScript = serde_json::from_value(json!({
            "types": [{"name": "T", "fields": [{"key": "child"}]}],
            "steps": [
                {"op": "create", "as": "a", "type": "T"},
                {"op": "set_node", "node": "a", "key": "child", "target": "a"}
            ]
        }))
        .unwrap();
        let script = raw.validate_and_build().unwrap();
        let mut replay = Replay::new(&script).unwrap();
        let err = replay.run(&script).unwrap_err();
        assert!(format!("{err:#}").contains("step 1 (set_node)"));
    }

    #[test]
    fn rejected_writes_do_not_stop_the_replay() {
        let (replay, events) = replay(json!({
            "types": types(),
            "steps": [
                {"op": "create", "as": "r", "type": "Root"},
                {"op": "set", "node": "r", "key": "adata", "value": 99},
                {"op": "set", "node": "r", "key": "sdata", "value": 1}
            ]
        }));
        let steps: Vec<usize> = events.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![2, 2]);
        assert_eq!(replay.snapshot("r").unwrap()["adata"], json!(2));
    }
}
