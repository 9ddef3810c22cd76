//! Trunk/leaf linking and watcher propagation.
//!
//! Every attach or detach rebuilds the watcher lists of the moved node and
//! its whole subtree. For a node `n`, walking up the trunk chain installs on
//! `n`'s link:
//! - a hook watcher for each ancestor field with an update hook;
//! - a regenerate watcher for each ancestor field with autogen dependents;
//! - one root event watcher, if the root is an emitter and every field on the
//!   way up is eventable.
//!
//! A change to `n` therefore fires exactly one root event, carrying the path
//! from the root down to the changed key.

use super::{Change, Graph, NodeId};
use crate::error::{CycleError, Result};
use crate::path::KeyPath;
use crate::schema::{SchemaEntry, SetHook};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// User watcher callback.
pub type WatchFn = Rc<dyn Fn(&mut Graph, &Change<'_>) -> Result<()>>;

pub const DEFAULT_PRIORITY: i32 = 0;

// Root events go out after every other watcher on the node.
const ROOT_EVENT_PRIORITY: i32 = i32::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

#[derive(Clone)]
pub(crate) enum Effect {
    /// Call an ancestor field's update hook with the ancestor as owner.
    Hook(SetHook),
    /// Recompute these keys on the origin node.
    Regenerate(Vec<String>),
    /// Emit a root event at the origin under `path.<key>`.
    EmitRoot(KeyPath),
    Callback(WatchFn),
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Hook(_) => f.write_str("Hook"),
            Effect::Regenerate(keys) => f.debug_tuple("Regenerate").field(keys).finish(),
            Effect::EmitRoot(path) => write!(f, "EmitRoot({path})"),
            Effect::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Watcher {
    pub(crate) id: WatcherId,
    /// The node the effect acts on.
    pub(crate) origin: NodeId,
    pub(crate) priority: i32,
    pub(crate) effect: Effect,
}

#[derive(Debug, Default)]
pub(crate) struct Link {
    pub(crate) trunk: Option<NodeId>,
    pub(crate) leafs: Vec<NodeId>,
    pub(crate) key: Option<String>,
    pub(crate) sentry: Option<Rc<SchemaEntry>>,
    /// Sorted by descending priority, insertion order within a priority.
    pub(crate) watchers: Vec<Watcher>,
}

impl Link {
    fn insert_watcher(&mut self, watcher: Watcher) {
        let at = self
            .watchers
            .iter()
            .position(|w| w.priority < watcher.priority)
            .unwrap_or(self.watchers.len());
        self.watchers.insert(at, watcher);
    }
}

// One step of an upward walk: `node` hangs off `trunk` under `key`.
struct Step {
    trunk: NodeId,
    key: String,
    sentry: Option<Rc<SchemaEntry>>,
}

impl Graph {
    /// Attach `leaf` under `trunk` as `key`, using `trunk`'s schema entry for
    /// `key` (if any) as the sentry. Does not write the trunk's field.
    pub fn attach(&mut self, trunk: NodeId, key: &str, leaf: NodeId) -> Result<()> {
        let sentry = self.entry_for(trunk, key)?;
        self.link_leaf(trunk, key, sentry, leaf)
    }

    pub(crate) fn link_leaf(
        &mut self,
        trunk: NodeId,
        key: &str,
        sentry: Option<Rc<SchemaEntry>>,
        leaf: NodeId,
    ) -> Result<()> {
        self.node(trunk)?;
        self.node(leaf)?;
        self.check_acyclic(trunk, leaf)?;

        if let Some(prev) = self.trunk_of(leaf)? {
            if prev == trunk && self.key_of(leaf)?.as_deref() == Some(key) {
                return Ok(());
            }
            self.detach(prev, leaf)?;
        }

        self.ensure_link(trunk)?.leafs.push(leaf);
        let link = self.ensure_link(leaf)?;
        link.trunk = Some(trunk);
        link.key = Some(key.to_string());
        link.sentry = sentry;
        debug!(%trunk, %leaf, key, "attach");

        self.regenerate_trunk_keys(leaf)?;
        self.propagate(leaf)?;

        if let Some(hook) = self.type_def(leaf).and_then(|d| d.on_attach.clone()) {
            hook(self, leaf, trunk)?;
        }
        Ok(())
    }

    /// Detach `leaf` from `trunk`. Returns `false` if `leaf` was not attached
    /// to `trunk`.
    pub fn detach(&mut self, trunk: NodeId, leaf: NodeId) -> Result<bool> {
        if self.trunk_of(leaf)? != Some(trunk) {
            return Ok(false);
        }
        if let Some(link) = self.node_mut(trunk)?.link.as_mut() {
            link.leafs.retain(|&l| l != leaf);
        }
        if let Some(link) = self.node_mut(leaf)?.link.as_mut() {
            link.trunk = None;
            link.key = None;
            link.sentry = None;
        }
        debug!(%trunk, %leaf, "detach");

        self.regenerate_trunk_keys(leaf)?;
        self.propagate(leaf)?;

        if let Some(hook) = self.type_def(leaf).and_then(|d| d.on_detach.clone()) {
            hook(self, leaf, trunk)?;
        }
        Ok(true)
    }

    /// Detach and destroy every leaf depth-first, detach `node` from its
    /// trunk, then free it.
    pub fn destroy(&mut self, node: NodeId) -> Result<()> {
        for leaf in self.leafs_of(node)? {
            self.detach(node, leaf)?;
            self.destroy(leaf)?;
        }
        if let Some(trunk) = self.trunk_of(node)? {
            self.detach(trunk, node)?;
        }
        self.arena.remove(node);
        debug!(%node, "destroy");
        Ok(())
    }

    /// Reject attaching `leaf` under `trunk` if `leaf` is `trunk` or one of
    /// its ancestors.
    pub(crate) fn check_acyclic(&self, trunk: NodeId, leaf: NodeId) -> Result<()> {
        if leaf == trunk || self.is_ancestor(leaf, trunk) {
            warn!(%trunk, %leaf, "rejected cyclic attach");
            return Err(CycleError { trunk, leaf }.into());
        }
        Ok(())
    }

    /// Register a watcher on `target`. `origin` is the node on whose behalf it
    /// runs: the watcher is dropped once `origin` is neither `target` nor one
    /// of its ancestors. Higher priorities run first.
    pub fn watch(
        &mut self,
        target: NodeId,
        origin: NodeId,
        priority: i32,
        f: impl Fn(&mut Graph, &Change<'_>) -> Result<()> + 'static,
    ) -> Result<WatcherId> {
        self.node(origin)?;
        let id = self.next_watcher_id();
        self.ensure_link(target)?.insert_watcher(Watcher {
            id,
            origin,
            priority,
            effect: Effect::Callback(Rc::new(f)),
        });
        Ok(id)
    }

    pub fn unwatch(&mut self, target: NodeId, id: WatcherId) -> Result<bool> {
        let Some(link) = self.node_mut(target)?.link.as_mut() else {
            return Ok(false);
        };
        let before = link.watchers.len();
        link.watchers.retain(|w| w.id != id);
        Ok(link.watchers.len() != before)
    }

    pub fn trunk_of(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(node)?.link.as_ref().and_then(|l| l.trunk))
    }

    /// The key under which `node` hangs off its trunk.
    pub fn key_of(&self, node: NodeId) -> Result<Option<String>> {
        Ok(self.node(node)?.link.as_ref().and_then(|l| l.key.clone()))
    }

    pub fn leafs_of(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .node(node)?
            .link
            .as_ref()
            .map(|l| l.leafs.clone())
            .unwrap_or_default())
    }

    /// Ancestors from the immediate trunk up to the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.raw_trunk(node);
        while let Some(t) = cur {
            if out.len() > self.arena.capacity() {
                break;
            }
            out.push(t);
            cur = self.raw_trunk(t);
        }
        out
    }

    pub fn root_of(&self, node: NodeId) -> Result<NodeId> {
        self.node(node)?;
        Ok(self.ancestors(node).last().copied().unwrap_or(node))
    }

    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).contains(&ancestor)
    }

    /// Path of keys from the root down to `node`.
    pub fn path_of(&self, node: NodeId) -> Result<KeyPath> {
        self.node(node)?;
        let mut keys: Vec<String> = self.steps_up(node).into_iter().map(|s| s.key).collect();
        keys.reverse();
        Ok(KeyPath::new(keys))
    }

    pub fn watcher_count(&self, node: NodeId) -> Result<usize> {
        Ok(self
            .node(node)?
            .link
            .as_ref()
            .map_or(0, |l| l.watchers.len()))
    }

    /// Rebuild the watchers of `node` and its subtree from the current trunk
    /// chain.
    fn propagate(&mut self, node: NodeId) -> Result<()> {
        let steps = self.steps_up(node);
        let ancestors: BTreeSet<NodeId> = steps.iter().map(|s| s.trunk).collect();

        let mut installed = Vec::new();
        let mut eventable = true;
        let mut path = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            path.push(step.key.clone());
            if let Some(sentry) = &step.sentry {
                if let Some(hook) = &sentry.on_set {
                    installed.push((step.trunk, DEFAULT_PRIORITY, Effect::Hook(hook.clone())));
                }
                if !sentry.autogen_dependents.is_empty() {
                    let keys = sentry.autogen_dependents.iter().cloned().collect();
                    installed.push((step.trunk, DEFAULT_PRIORITY, Effect::Regenerate(keys)));
                }
                eventable &= sentry.eventable;
            }
            let at_root = i + 1 == steps.len();
            if at_root && eventable && self.is_emitter(step.trunk) {
                let mut keys = path.clone();
                keys.reverse();
                installed.push((
                    step.trunk,
                    ROOT_EVENT_PRIORITY,
                    Effect::EmitRoot(KeyPath::new(keys)),
                ));
            }
        }

        let mut watchers = Vec::with_capacity(installed.len());
        for (origin, priority, effect) in installed {
            watchers.push(Watcher {
                id: self.next_watcher_id(),
                origin,
                priority,
                effect,
            });
        }

        if let Some(link) = self.node_mut(node)?.link.as_mut() {
            // Structural watchers are always rebuilt; user callbacks survive
            // while their origin is still the node or above it.
            link.watchers.retain(|w| {
                matches!(w.effect, Effect::Callback(_))
                    && (w.origin == node || ancestors.contains(&w.origin))
            });
            for w in watchers {
                link.insert_watcher(w);
            }
        }
        trace!(%node, depth = steps.len(), "propagate");

        for leaf in self.leafs_of(node)? {
            self.propagate(leaf)?;
        }
        Ok(())
    }

    /// Run the watchers on `change.target`'s link in priority order. A
    /// watcher removed by an earlier one in the same pass does not run.
    pub(crate) fn fire_watchers(&mut self, change: &Change<'_>) -> Result<()> {
        let snapshot = match self.node(change.target)?.link.as_ref() {
            Some(link) if !link.watchers.is_empty() => link.watchers.clone(),
            _ => return Ok(()),
        };
        for watcher in snapshot {
            let live = self
                .arena
                .get(change.target)
                .and_then(|n| n.link.as_ref())
                .is_some_and(|l| l.watchers.iter().any(|w| w.id == watcher.id));
            if !live {
                continue;
            }
            trace!(node = %change.target, key = change.key, effect = ?watcher.effect, "watcher");
            self.apply(watcher.origin, &watcher.effect, change)?;
        }
        Ok(())
    }

    fn apply(&mut self, origin: NodeId, effect: &Effect, change: &Change<'_>) -> Result<()> {
        match effect {
            Effect::Hook(hook) => hook(self, origin, change),
            Effect::Regenerate(keys) => {
                for key in keys {
                    self.regenerate(origin, key)?;
                }
                Ok(())
            }
            Effect::EmitRoot(path) => {
                // The changed field itself must be eventable too.
                let eventable = self
                    .entry_for(change.target, change.key)?
                    .is_none_or(|entry| entry.eventable);
                if eventable {
                    self.emit(origin, path.child(change.key), change.new.clone());
                }
                Ok(())
            }
            Effect::Callback(f) => f(self, change),
        }
    }

    /// Whether `node` is attached to `trunk` under exactly `key`.
    pub(crate) fn is_leaf_at(&self, trunk: NodeId, key: &str, node: NodeId) -> bool {
        self.arena
            .get(node)
            .and_then(|n| n.link.as_ref())
            .is_some_and(|l| l.trunk == Some(trunk) && l.key.as_deref() == Some(key))
    }

    pub(crate) fn ensure_link(&mut self, node: NodeId) -> Result<&mut Link> {
        Ok(self.node_mut(node)?.link.get_or_insert_with(Link::default))
    }

    fn next_watcher_id(&mut self) -> WatcherId {
        self.next_watcher += 1;
        WatcherId(self.next_watcher)
    }

    fn raw_trunk(&self, node: NodeId) -> Option<NodeId> {
        self.arena
            .get(node)
            .and_then(|n| n.link.as_ref())
            .and_then(|l| l.trunk)
    }

    // Walk from `node` to the root, one step per trunk edge.
    fn steps_up(&self, node: NodeId) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut cur = node;
        while let Some(link) = self.arena.get(cur).and_then(|n| n.link.as_ref()) {
            let Some(trunk) = link.trunk else {
                break;
            };
            if steps.len() > self.arena.capacity() {
                break;
            }
            steps.push(Step {
                trunk,
                key: link.key.clone().unwrap_or_default(),
                sentry: link.sentry.clone(),
            });
            cur = trunk;
        }
        steps
    }
}
