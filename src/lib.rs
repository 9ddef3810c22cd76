//! Reactive object graph.
//!
//! Typed nodes own fields described by per-type schemas. Assigning a node
//! into a linking field attaches it as a leaf of the assigning node, forming
//! trees. A change anywhere in a tree is observed by the ancestors' update
//! hooks and autogen fields, and surfaces as a single `gizmo.set` event at
//! the root carrying the dotted path to the changed field.
//!
//! ```
//! use gizmo_graph::{EntryOptions, EventLog, Graph, Spec, TypeOptions};
//! use std::rc::Rc;
//!
//! let log = Rc::new(EventLog::new());
//! let mut graph = Graph::with_events(log.clone());
//! graph.define_type("Box", TypeOptions::new().emitter(true)).unwrap();
//! graph.register("Box", "inner", EntryOptions::new()).unwrap();
//! graph.register("Box", "size", EntryOptions::new().default_value(1)).unwrap();
//!
//! let root = graph.create("Box", &Spec::new()).unwrap();
//! let leaf = graph.create("Box", &Spec::new()).unwrap();
//! let _ = graph.set(root, "inner", leaf).unwrap();
//! log.take();
//!
//! let _ = graph.set(leaf, "size", 2).unwrap();
//! let events = log.take();
//! assert_eq!(events.len(), 1);
//! assert!(events[0].attrs.set.contains_key("inner.size"));
//! ```

pub mod containers;
pub mod error;
pub mod events;
pub mod graph;
pub mod path;
pub mod schema;
pub mod snapshot;
pub mod value;

pub use containers::{GizmoArray, GizmoObject, KeyedMutation};
pub use error::{CycleError, GraphError, Result};
pub use events::{EventAttrs, EventLog, EventSystem, SET_EVENT_TAG};
pub use graph::{Change, DEFAULT_PRIORITY, Graph, NodeId, NodeKind, Rejection, SetOutcome, WatcherId};
pub use path::KeyPath;
pub use schema::{Autogen, EntryOptions, Proxy, Schema, SchemaEntry, TypeOptions, TypeRegistry};
pub use value::{Spec, Value};
