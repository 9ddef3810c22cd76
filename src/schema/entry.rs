//! Field descriptors.

use crate::error::Result;
use crate::graph::{Change, Graph, NodeId};
use crate::value::{Spec, Value};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// Computes a field on every read. Computed fields are never stored.
pub type Getter = Rc<dyn Fn(&Graph, NodeId) -> Value>;

/// Transforms a written value before it is stored.
pub type Generator = Rc<dyn Fn(&Graph, NodeId, Value) -> Value>;

/// Derives the initial value from the construction spec.
pub type Parser = Rc<dyn Fn(&Graph, NodeId, &Spec) -> Value>;

/// Update hook. Receives the node owning the field followed by the change;
/// for direct writes the owner is the change target, for writes deeper in
/// the tree it is the trunk holding the subtree under this field.
pub type SetHook = Rc<dyn Fn(&mut Graph, NodeId, &Change<'_>) -> Result<()>>;

#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Factory(Rc<dyn Fn() -> Value>),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }
}

impl Default for DefaultValue {
    fn default() -> Self {
        DefaultValue::Value(Value::Null)
    }
}

/// When an autogen field is recomputed, keyed by the name of the field that
/// changed (or [`TRUNK_KEY`](super::TRUNK_KEY) when the trunk link changed).
#[derive(Clone, Default)]
pub enum Autogen {
    #[default]
    Off,
    Always,
    Keys(BTreeSet<String>),
    When(Rc<dyn Fn(&str) -> bool>),
}

impl Autogen {
    pub fn on_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Autogen::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn accepts(&self, changed: &str) -> bool {
        match self {
            Autogen::Off => false,
            Autogen::Always => true,
            Autogen::Keys(keys) => keys.contains(changed),
            Autogen::When(pred) => pred(changed),
        }
    }

    pub fn is_on(&self) -> bool {
        !matches!(self, Autogen::Off)
    }
}

impl fmt::Debug for Autogen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Autogen::Off => f.write_str("Off"),
            Autogen::Always => f.write_str("Always"),
            Autogen::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            Autogen::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Whether raw arrays/objects written to a field are wrapped into reactive
/// containers. `Deep` containers also wrap raw values assigned into them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proxy {
    #[default]
    Off,
    Shallow,
    Deep,
}

/// Registration options for one field.
#[derive(Clone, Default)]
pub struct EntryOptions {
    default: DefaultValue,
    spec_key: Option<String>,
    parser: Option<Parser>,
    getter: Option<Getter>,
    generator: Option<Generator>,
    on_set: Option<SetHook>,
    readonly: bool,
    eventable: Option<bool>,
    link: Option<bool>,
    proxy: Proxy,
    autogen: Autogen,
    serializable: Option<bool>,
    serialize_key: Option<String>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Value(value.into());
        self
    }

    pub fn default_factory(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.default = DefaultValue::Factory(Rc::new(f));
        self
    }

    pub fn spec_key(mut self, key: impl Into<String>) -> Self {
        self.spec_key = Some(key.into());
        self
    }

    pub fn parser(mut self, f: impl Fn(&Graph, NodeId, &Spec) -> Value + 'static) -> Self {
        self.parser = Some(Rc::new(f));
        self
    }

    pub fn getter(mut self, f: impl Fn(&Graph, NodeId) -> Value + 'static) -> Self {
        self.getter = Some(Rc::new(f));
        self
    }

    pub fn generator(mut self, f: impl Fn(&Graph, NodeId, Value) -> Value + 'static) -> Self {
        self.generator = Some(Rc::new(f));
        self
    }

    pub fn on_set(
        mut self,
        f: impl Fn(&mut Graph, NodeId, &Change<'_>) -> Result<()> + 'static,
    ) -> Self {
        self.on_set = Some(Rc::new(f));
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn eventable(mut self, eventable: bool) -> Self {
        self.eventable = Some(eventable);
        self
    }

    pub fn link(mut self, link: bool) -> Self {
        self.link = Some(link);
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn autogen(mut self, autogen: Autogen) -> Self {
        self.autogen = autogen;
        self
    }

    pub fn autogen_when(mut self, pred: impl Fn(&str) -> bool + 'static) -> Self {
        self.autogen = Autogen::When(Rc::new(pred));
        self
    }

    pub fn serializable(mut self, serializable: bool) -> Self {
        self.serializable = Some(serializable);
        self
    }

    pub fn serialize_key(mut self, key: impl Into<String>) -> Self {
        self.serialize_key = Some(key.into());
        self
    }
}

/// A registered field.
#[derive(Clone)]
pub struct SchemaEntry {
    pub key: String,
    pub spec_key: String,
    pub default: DefaultValue,
    pub parser: Option<Parser>,
    pub getter: Option<Getter>,
    pub generator: Option<Generator>,
    pub on_set: Option<SetHook>,
    pub readonly: bool,
    pub eventable: bool,
    pub link: bool,
    pub proxy: Proxy,
    pub autogen: Autogen,
    pub serializable: bool,
    pub serialize_key: String,
    pub(crate) autogen_dependents: BTreeSet<String>,
}

impl SchemaEntry {
    pub fn new(key: &str, opts: EntryOptions) -> Self {
        let computed = opts.getter.is_some();
        Self {
            key: key.to_string(),
            spec_key: opts.spec_key.unwrap_or_else(|| key.to_string()),
            default: opts.default,
            parser: opts.parser,
            getter: opts.getter,
            generator: opts.generator,
            on_set: opts.on_set,
            readonly: opts.readonly,
            // Computed fields never surface as events.
            eventable: !computed && opts.eventable.unwrap_or(true),
            link: opts.link.unwrap_or(true),
            proxy: opts.proxy,
            autogen: opts.autogen,
            serializable: opts.serializable.unwrap_or(true),
            serialize_key: opts.serialize_key.unwrap_or_else(|| key.to_string()),
            autogen_dependents: BTreeSet::new(),
        }
    }

    /// The entry shared by every slot of a reactive container.
    pub(crate) fn element(proxy: Proxy) -> Self {
        Self::new("*", EntryOptions::new().proxy(proxy))
    }

    pub fn is_computed(&self) -> bool {
        self.getter.is_some()
    }

    /// Keys whose autogen predicate accepts this entry's key.
    pub fn autogen_dependents(&self) -> &BTreeSet<String> {
        &self.autogen_dependents
    }

    /// Initial value for a node under construction.
    pub fn parse(&self, graph: &Graph, node: NodeId, spec: &Spec) -> Value {
        if let Some(parser) = &self.parser {
            return parser(graph, node, spec);
        }
        match spec.get(&self.spec_key) {
            Some(v) => v.clone(),
            None => self.regenerate(graph, node),
        }
    }

    /// Value after a forced recompute: the generator applied to the default,
    /// or the plain default without a generator.
    pub fn regenerate(&self, graph: &Graph, node: NodeId) -> Value {
        let default = self.default.produce();
        match &self.generator {
            Some(generator) => generator(graph, node, default),
            None => default,
        }
    }
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("key", &self.key)
            .field("readonly", &self.readonly)
            .field("eventable", &self.eventable)
            .field("link", &self.link)
            .field("proxy", &self.proxy)
            .field("autogen", &self.autogen)
            .field("computed", &self.is_computed())
            .field("autogen_dependents", &self.autogen_dependents)
            .finish_non_exhaustive()
    }
}
