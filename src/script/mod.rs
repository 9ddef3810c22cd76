//! Replay scripts: type definitions plus a list of graph operations.
//!
//! JSON shape:
//! {
//!   "types": [
//!     {
//!       "name": "Sprite",
//!       "extends": null,             // optional supertype, defined earlier
//!       "emitter": true,             // root events for trees rooted here
//!       "fields": [
//!         { "key": "x", "default": 0, "autogen": ["y"],
//!           "compute": { "scale": "y", "by": 2 } }
//!       ]
//!     }
//!   ],
//!   "steps": [
//!     { "op": "create", "as": "a", "type": "Sprite", "spec": {} },
//!     { "op": "set", "node": "a", "key": "x", "value": 3 }
//!   ]
//! }
//!
//! Node aliases are bound by `create` and released by `destroy`; every
//! other step must name a bound alias. All of this is checked before the
//! first step runs.

pub mod run;

use gizmo_graph::schema::validate_key;
use gizmo_graph::{Autogen, EntryOptions, Graph, Proxy, TypeOptions, Value};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

pub use run::{Replay, ReplayEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct RawScript {
    #[serde(default)]
    pub types: Vec<RawType>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawType {
    pub name: String,

    #[serde(default)]
    pub extends: Option<String>,

    #[serde(default)]
    pub emitter: bool,

    #[serde(default)]
    pub fields: Vec<RawField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawField {
    pub key: String,

    #[serde(default)]
    pub default: serde_json::Value,

    #[serde(default)]
    pub spec_key: Option<String>,

    #[serde(default)]
    pub readonly: bool,

    #[serde(default)]
    pub eventable: Option<bool>,

    #[serde(default)]
    pub link: Option<bool>,

    #[serde(default)]
    pub proxy: Proxy,

    #[serde(default)]
    pub autogen: Option<RawAutogen>,

    #[serde(default)]
    pub compute: Option<Formula>,

    #[serde(default)]
    pub serializable: Option<bool>,

    #[serde(default)]
    pub serialize_key: Option<String>,
}

/// `true` recomputes on every change (and on trunk changes); a list names
/// the triggering keys, `"$trunk"` included.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAutogen {
    All(bool),
    Keys(Vec<String>),
}

/// Generator for a scripted field, evaluated against the node's other
/// fields whenever the field is written or regenerated.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Formula {
    Scale { scale: String, by: f64 },
    Sum { sum: Vec<String> },
    Copy { copy: String },
}

impl Formula {
    fn inputs(&self) -> Vec<&str> {
        match self {
            Formula::Scale { scale, .. } => vec![scale.as_str()],
            Formula::Sum { sum } => sum.iter().map(String::as_str).collect(),
            Formula::Copy { copy } => vec![copy.as_str()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Create {
        #[serde(rename = "as")]
        alias: String,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        spec: serde_json::Value,
    },
    Set {
        node: String,
        key: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    SetNode {
        node: String,
        key: String,
        target: String,
    },
    Attach {
        trunk: String,
        key: String,
        leaf: String,
    },
    Detach {
        trunk: String,
        leaf: String,
    },
    Destroy {
        node: String,
    },
    Push {
        node: String,
        key: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    Pop {
        node: String,
        key: String,
    },
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Create { .. } => "create",
            Step::Set { .. } => "set",
            Step::SetNode { .. } => "set_node",
            Step::Attach { .. } => "attach",
            Step::Detach { .. } => "detach",
            Step::Destroy { .. } => "destroy",
            Step::Push { .. } => "push",
            Step::Pop { .. } => "pop",
        }
    }

    /// Aliases the step reads, in argument order.
    fn uses(&self) -> Vec<&str> {
        match self {
            Step::Create { .. } => Vec::new(),
            Step::Set { node, .. }
            | Step::Push { node, .. }
            | Step::Pop { node, .. }
            | Step::Destroy { node } => vec![node.as_str()],
            Step::SetNode { node, target, .. } => vec![node.as_str(), target.as_str()],
            Step::Attach { trunk, leaf, .. } | Step::Detach { trunk, leaf } => {
                vec![trunk.as_str(), leaf.as_str()]
            }
        }
    }
}

/// A script whose types and alias references have been checked.
#[derive(Debug, Clone)]
pub struct Script {
    pub types: Vec<RawType>,
    pub steps: Vec<Step>,
}

impl RawScript {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check type names, supertypes, field keys and alias usage.
    pub fn validate_and_build(&self) -> anyhow::Result<Script> {
        use anyhow::bail;

        // Types: unique, identifiers, supertypes defined earlier.
        let mut seen_types: BTreeSet<&str> = BTreeSet::new();
        for ty in &self.types {
            if validate_key(&ty.name).is_err() {
                bail!("invalid type name in script: {:?}", ty.name);
            }
            if let Some(sup) = &ty.extends {
                if !seen_types.contains(sup.as_str()) {
                    bail!("type {} extends {} which is not defined before it", ty.name, sup);
                }
            }
            if !seen_types.insert(ty.name.as_str()) {
                bail!("duplicate type in script: {}", ty.name);
            }

            let mut keys = BTreeSet::new();
            for field in &ty.fields {
                if validate_key(&field.key).is_err() {
                    bail!("type {}: invalid field key {:?}", ty.name, field.key);
                }
                if !keys.insert(field.key.as_str()) {
                    bail!("type {}: duplicate field {}", ty.name, field.key);
                }
            }
            for field in &ty.fields {
                for input in field.compute.iter().flat_map(Formula::inputs) {
                    if !keys.contains(input) && ty.extends.is_none() {
                        bail!(
                            "type {}: field {} computes from unknown field {}",
                            ty.name,
                            field.key,
                            input
                        );
                    }
                }
            }
        }

        // Steps: aliases bound before use, released by destroy.
        let mut live: BTreeSet<&str> = BTreeSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            for alias in step.uses() {
                if !live.contains(alias) {
                    bail!("step {} ({}): unknown node alias {:?}", i, step.op(), alias);
                }
            }
            match step {
                Step::Create { alias, ty, .. } => {
                    if validate_key(alias).is_err() {
                        bail!("step {}: invalid alias {:?}", i, alias);
                    }
                    if !seen_types.contains(ty.as_str()) {
                        bail!("step {}: unknown type {}", i, ty);
                    }
                    if !live.insert(alias.as_str()) {
                        bail!("step {}: alias {} is already bound", i, alias);
                    }
                }
                Step::Destroy { node } => {
                    live.remove(node.as_str());
                }
                _ => {}
            }
        }

        Ok(Script {
            types: self.types.clone(),
            steps: self.steps.clone(),
        })
    }
}

impl Script {
    /// Define every scripted type on `graph`, in order.
    pub fn install(&self, graph: &mut Graph) -> anyhow::Result<()> {
        for ty in &self.types {
            let mut opts = TypeOptions::new().emitter(ty.emitter);
            if let Some(sup) = &ty.extends {
                opts = opts.extends(sup.clone());
            }
            graph.define_type(&ty.name, opts)?;
            for field in &ty.fields {
                graph.register(&ty.name, &field.key, field.entry_options())?;
            }
        }
        Ok(())
    }
}

impl RawField {
    fn entry_options(&self) -> EntryOptions {
        let mut opts = EntryOptions::new()
            .default_value(Value::from(self.default.clone()))
            .readonly(self.readonly)
            .proxy(self.proxy);
        if let Some(key) = &self.spec_key {
            opts = opts.spec_key(key.clone());
        }
        if let Some(eventable) = self.eventable {
            opts = opts.eventable(eventable);
        }
        if let Some(link) = self.link {
            opts = opts.link(link);
        }
        if let Some(serializable) = self.serializable {
            opts = opts.serializable(serializable);
        }
        if let Some(key) = &self.serialize_key {
            opts = opts.serialize_key(key.clone());
        }
        match &self.autogen {
            Some(RawAutogen::All(true)) => opts = opts.autogen(Autogen::Always),
            Some(RawAutogen::Keys(keys)) => opts = opts.autogen(Autogen::on_keys(keys.clone())),
            Some(RawAutogen::All(false)) | None => {}
        }
        if let Some(formula) = self.compute.clone() {
            opts = opts.generator(move |graph, node, incoming| formula.eval(graph, node, incoming));
        }
        opts
    }
}

impl Formula {
    fn eval(&self, graph: &Graph, node: gizmo_graph::NodeId, incoming: Value) -> Value {
        let num = |key: &str| graph.get(node, key).ok().and_then(|v| v.as_f64());
        match self {
            Formula::Scale { scale, by } => {
                num(scale.as_str()).map_or(incoming, |n| Value::from(n * by))
            }
            Formula::Sum { sum } => {
                Value::from(sum.iter().filter_map(|k| num(k.as_str())).sum::<f64>())
            }
            Formula::Copy { copy } => graph.get(node, copy).unwrap_or(incoming),
        }
    }
}

/// Parse a `spec` argument; `null` is an empty spec.
pub(crate) fn spec_arg(json: &serde_json::Value) -> anyhow::Result<gizmo_graph::Spec> {
    match json {
        serde_json::Value::Null => Ok(gizmo_graph::Spec::new()),
        serde_json::Value::Object(_) => Ok(gizmo_graph::value::spec_from_json(json.clone())),
        other => anyhow::bail!("spec must be an object, got {}", other),
    }
}

pub(crate) type Aliases = BTreeMap<String, gizmo_graph::NodeId>;
