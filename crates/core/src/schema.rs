//! Node-type catalog types.
//!
//! The engine publishes the declared inputs and outputs of every node
//! type it knows (`/object_info`). A [`SchemaSnapshot`] is one immutable,
//! versioned copy of that catalog. Validation always runs against a
//! single snapshot, so a refresh in progress never produces a mix of
//! old and new entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag used for inputs that take one of a fixed list of choices.
pub const COMBO_TYPE: &str = "COMBO";

/// Type tag that matches any other type.
pub const WILDCARD_TYPE: &str = "*";

/// Declared contract of one node input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub required: bool,
    /// Declared type (`MODEL`, `INT`, `COMBO`, ...), when known.
    pub type_tag: Option<String>,
    /// Allowed values for combo inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
}

/// Declared contract of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Required inputs first, then optional ones, each in declared order.
    pub inputs: Vec<InputSpec>,
    /// Output type tags by slot index.
    pub outputs: Vec<String>,
    pub output_names: Vec<String>,
    /// Whether the node produces final artifacts (e.g. `SaveImage`).
    pub output_node: bool,
    pub deprecated: bool,
    pub experimental: bool,
}

impl SchemaEntry {
    /// A bare entry with no inputs or outputs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            category: None,
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_names: Vec::new(),
            output_node: false,
            deprecated: false,
            experimental: false,
        }
    }

    pub fn with_input(mut self, name: &str, type_tag: &str, required: bool) -> Self {
        self.inputs.push(InputSpec {
            name: name.to_string(),
            required,
            type_tag: Some(type_tag.to_string()),
            choices: Vec::new(),
        });
        self
    }

    pub fn with_output(mut self, type_tag: &str) -> Self {
        self.outputs.push(type_tag.to_string());
        self
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &InputSpec> + '_ {
        self.inputs.iter().filter(|i| i.required)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn matches(&self, needle: &str) -> bool {
        let contains = |s: &Option<String>| {
            s.as_deref()
                .is_some_and(|s| s.to_lowercase().contains(needle))
        };
        self.name.to_lowercase().contains(needle)
            || contains(&self.display_name)
            || contains(&self.category)
    }
}

/// Result of looking a node type up in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaLookup {
    Found(Arc<SchemaEntry>),
    /// The catalog has been fetched and does not contain the type.
    Missing,
    /// The catalog has never been fetched.
    Unknown,
}

/// Filter for [`SchemaSnapshot::list`].
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Category prefix, e.g. `loaders` or `image/upscaling`.
    pub category: Option<String>,
    pub output_nodes_only: bool,
    pub include_deprecated: bool,
}

/// One immutable version of the node-type catalog.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    version: u64,
    populated: bool,
    entries: BTreeMap<String, Arc<SchemaEntry>>,
}

impl SchemaSnapshot {
    /// The never-fetched snapshot (version 0). Validation against it is
    /// structural only.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A populated snapshot holding `entries`.
    pub fn new(version: u64, entries: impl IntoIterator<Item = SchemaEntry>) -> Self {
        Self {
            version,
            populated: true,
            entries: entries
                .into_iter()
                .map(|e| (e.name.clone(), Arc::new(e)))
                .collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, class_type: &str) -> Option<&SchemaEntry> {
        self.entries.get(class_type).map(Arc::as_ref)
    }

    pub fn lookup(&self, class_type: &str) -> SchemaLookup {
        match self.entries.get(class_type) {
            Some(entry) => SchemaLookup::Found(Arc::clone(entry)),
            None if self.populated => SchemaLookup::Missing,
            None => SchemaLookup::Unknown,
        }
    }

    /// Case-insensitive substring search over name, display name and
    /// category. Results are sorted by node type name.
    pub fn search(&self, query: &str) -> Vec<&SchemaEntry> {
        let needle = query.trim().to_lowercase();
        self.entries
            .values()
            .filter(|e| needle.is_empty() || e.matches(&needle))
            .map(Arc::as_ref)
            .collect()
    }

    pub fn list(&self, filter: &NodeFilter) -> Vec<&SchemaEntry> {
        self.entries
            .values()
            .filter(|e| filter.include_deprecated || !e.deprecated)
            .filter(|e| !filter.output_nodes_only || e.output_node)
            .filter(|e| match &filter.category {
                Some(prefix) => e
                    .category
                    .as_deref()
                    .is_some_and(|c| c.starts_with(prefix.as_str())),
                None => true,
            })
            .map(Arc::as_ref)
            .collect()
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let mut cats: Vec<&str> = self
            .entries
            .values()
            .filter_map(|e| e.category.as_deref())
            .collect();
        cats.sort_unstable();
        cats.dedup();
        cats
    }
}
