//! Workflow graph model.
//!
//! A [`Graph`] is the ComfyUI "API format" workflow: an object keyed by
//! node ID where each value carries a `class_type` and an `inputs` map.
//! Inputs are either literal JSON values or [`Link`]s to another node's
//! output slot.
//!
//! Graphs are values. Every mutation (`add_node`, `remove_node`,
//! `update_node_input`) returns a new [`Graph`] and leaves the receiver
//! untouched, so a graph shared between tasks never changes underneath
//! a reader.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::CoreError;
use crate::schema::SchemaSnapshot;
use crate::types::NodeId;

// ---------------------------------------------------------------------------
// Links and input values
// ---------------------------------------------------------------------------

/// A reference from a node input to an output slot of another node.
///
/// Encoded on the wire as `["<source_node_id>", <output_slot>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub source_node_id: NodeId,
    pub output_slot: u32,
}

impl Link {
    pub fn new(source_node_id: impl Into<NodeId>, output_slot: u32) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            output_slot,
        }
    }
}

/// The value bound to a single node input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// Connection to another node's output.
    Link(Link),
    /// Any literal JSON value (string, number, bool, array, object, null).
    Literal(Value),
}

impl InputValue {
    /// Build a link input.
    pub fn link(source_node_id: impl Into<NodeId>, output_slot: u32) -> Self {
        Self::Link(Link::new(source_node_id, output_slot))
    }

    /// Build an input from anything convertible into JSON.
    ///
    /// Link-shaped values (`["1", 0]`) become [`InputValue::Link`], the
    /// same classification the wire format applies on load.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::from_json(value.into())
    }

    /// Reclassify a hand-built `Literal` that has the wire shape of a link.
    pub fn normalized(self) -> Self {
        match self {
            Self::Literal(value) => Self::from_json(value),
            link => link,
        }
    }

    /// Classify a raw JSON input value.
    ///
    /// A two-element array whose first element is a string and whose
    /// second element is a non-negative integer is a link, matching the
    /// engine's own link detection. Everything else is a literal.
    pub fn from_json(value: Value) -> Self {
        if let Value::Array(items) = &value {
            if let [Value::String(source), slot] = items.as_slice() {
                if let Some(slot) = slot.as_u64().and_then(|s| u32::try_from(s).ok()) {
                    return Self::Link(Link::new(source.clone(), slot));
                }
            }
        }
        Self::Literal(value)
    }

    /// Parse user-supplied text: valid JSON is classified with
    /// [`InputValue::from_json`], anything else becomes a string literal.
    pub fn parse_lenient(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_json(value),
            Err(_) => Self::Literal(Value::String(text.to_string())),
        }
    }

    /// Render back to the wire representation.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Link(link) => Value::Array(vec![
                Value::String(link.source_node_id.clone()),
                Value::from(link.output_slot),
            ]),
            Self::Literal(value) => value.clone(),
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Self::Link(link) => Some(link),
            Self::Literal(_) => None,
        }
    }
}

impl From<Link> for InputValue {
    fn from(link: Link) -> Self {
        Self::Link(link)
    }
}

impl Serialize for InputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Link(link) => (&link.source_node_id, link.output_slot).serialize(serializer),
            Self::Literal(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for InputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}

/// Ordered input map of a node.
pub type Inputs = IndexMap<String, InputValue>;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// One operation in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Engine node type, e.g. `KSampler` or `CLIPTextEncode`.
    pub class_type: String,
    #[serde(default)]
    pub inputs: Inputs,
    /// Editor metadata (`{"title": ...}`) carried through untouched.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Node {
    pub fn new(class_type: impl Into<String>, inputs: Inputs) -> Self {
        Self {
            class_type: class_type.into(),
            inputs,
            meta: None,
        }
    }

    /// Iterate over `(input_name, link)` for every linked input.
    pub fn links(&self) -> impl Iterator<Item = (&str, &Link)> + '_ {
        self.inputs
            .iter()
            .filter_map(|(name, value)| value.as_link().map(|link| (name.as_str(), link)))
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A workflow graph keyed by node ID.
///
/// Equality ignores node order: insertion order is kept only so saved
/// files stay readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: IndexMap<NodeId, Node>,
}

impl Graph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> + Clone + '_ {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.keys().map(String::as_str)
    }

    /// Return a new graph with `node_id` added.
    ///
    /// The class type is checked only when `schema` has been populated;
    /// against an unpopulated snapshot any class type is accepted.
    pub fn add_node(
        &self,
        node_id: impl Into<NodeId>,
        class_type: impl Into<String>,
        inputs: Inputs,
        schema: &SchemaSnapshot,
    ) -> Result<Graph, CoreError> {
        let node_id = node_id.into();
        let class_type = class_type.into();

        if self.nodes.contains_key(&node_id) {
            return Err(CoreError::DuplicateNodeId(node_id));
        }
        if schema.is_populated() && schema.get(&class_type).is_none() {
            return Err(CoreError::UnknownNodeType(class_type));
        }

        let inputs = inputs
            .into_iter()
            .map(|(name, value)| (name, value.normalized()))
            .collect();
        let mut next = self.clone();
        next.nodes.insert(node_id, Node::new(class_type, inputs));
        Ok(next)
    }

    /// Return a new graph without `node_id`.
    ///
    /// Links in other nodes that point at the removed node are left in
    /// place and show up as dangling links on the next validation.
    pub fn remove_node(&self, node_id: &str) -> Result<Graph, CoreError> {
        if !self.nodes.contains_key(node_id) {
            return Err(CoreError::node_not_found(node_id));
        }
        let mut next = self.clone();
        next.nodes.shift_remove(node_id);
        Ok(next)
    }

    /// Return a new graph with one input of `node_id` set to `value`.
    pub fn update_node_input(
        &self,
        node_id: &str,
        input_name: impl Into<String>,
        value: InputValue,
    ) -> Result<Graph, CoreError> {
        let mut next = self.clone();
        let node = next
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoreError::node_not_found(node_id))?;
        node.inputs.insert(input_name.into(), value.normalized());
        Ok(next)
    }

    /// Parse a graph from an API-format JSON value.
    pub fn from_json(value: Value) -> Result<Graph, CoreError> {
        if !value.is_object() {
            return Err(CoreError::Validation(
                "Workflow JSON must be an object keyed by node id".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Render the graph as an API-format JSON value.
    pub fn to_json(&self) -> Value {
        let map = self
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), node_to_json(node)))
            .collect();
        Value::Object(map)
    }
}

fn node_to_json(node: &Node) -> Value {
    let inputs = node
        .inputs
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    let mut obj = serde_json::Map::new();
    obj.insert("class_type".into(), Value::String(node.class_type.clone()));
    obj.insert("inputs".into(), Value::Object(inputs));
    if let Some(meta) = &node.meta {
        obj.insert("_meta".into(), meta.clone());
    }
    Value::Object(obj)
}

/// Build an [`Inputs`] map from `(name, value)` pairs.
pub fn inputs<I, K>(pairs: I) -> Inputs
where
    I: IntoIterator<Item = (K, InputValue)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
