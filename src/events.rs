//! Event collaborator.
//!
//! The engine only ever triggers events at the root of a linked tree, with
//! tag [`SET_EVENT_TAG`] and attributes `{ "set": { "<path>": value } }`.

use crate::graph::NodeId;
use crate::value::Value;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

pub const SET_EVENT_TAG: &str = "gizmo.set";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventAttrs {
    pub set: BTreeMap<String, Value>,
}

impl EventAttrs {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        let mut set = BTreeMap::new();
        set.insert(path.into(), value);
        Self { set }
    }
}

/// Capability the graph dispatches events through.
pub trait EventSystem {
    fn is_emitter(&self, node: NodeId) -> bool;
    fn trigger(&self, node: NodeId, tag: &str, attrs: &EventAttrs);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emitted {
    pub node: NodeId,
    pub tag: String,
    pub attrs: EventAttrs,
}

/// Records every triggered event. Every node is an emitter unless muted.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RefCell<Vec<Emitted>>,
    muted: RefCell<BTreeSet<NodeId>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mute(&self, node: NodeId) {
        self.muted.borrow_mut().insert(node);
    }

    pub fn unmute(&self, node: NodeId) {
        self.muted.borrow_mut().remove(&node);
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<Emitted> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn events(&self) -> Vec<Emitted> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl EventSystem for EventLog {
    fn is_emitter(&self, node: NodeId) -> bool {
        !self.muted.borrow().contains(&node)
    }

    fn trigger(&self, node: NodeId, tag: &str, attrs: &EventAttrs) {
        self.events.borrow_mut().push(Emitted {
            node,
            tag: tag.to_string(),
            attrs: attrs.clone(),
        });
    }
}
