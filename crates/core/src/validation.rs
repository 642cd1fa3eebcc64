//! Graph validation against a schema snapshot.
//!
//! [`validate`] yields a lazy stream of [`Finding`]s. It never mutates
//! the graph and never fails; whether a finding is fatal is the
//! caller's decision. Against an unpopulated snapshot only the
//! structural link checks run.

use std::fmt;

use serde::Serialize;

use crate::graph::{Graph, InputValue, Link, Node};
use crate::schema::{SchemaEntry, SchemaSnapshot, COMBO_TYPE, WILDCARD_TYPE};

/// Why a link could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingReason {
    /// The source node does not exist in the graph.
    MissingSource,
    /// The source node declares fewer outputs than the slot index.
    SlotOutOfRange { output_count: usize },
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    UnknownNodeType {
        node_id: String,
        class_type: String,
    },
    MissingRequiredInput {
        node_id: String,
        input: String,
    },
    UnknownInput {
        node_id: String,
        input: String,
    },
    DanglingLink {
        node_id: String,
        input: String,
        source_node_id: String,
        output_slot: u32,
        reason: DanglingReason,
    },
    TypeMismatch {
        node_id: String,
        input: String,
        expected: String,
        found: String,
    },
}

impl Finding {
    /// Node the finding is attached to.
    pub fn node_id(&self) -> &str {
        match self {
            Self::UnknownNodeType { node_id, .. }
            | Self::MissingRequiredInput { node_id, .. }
            | Self::UnknownInput { node_id, .. }
            | Self::DanglingLink { node_id, .. }
            | Self::TypeMismatch { node_id, .. } => node_id,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNodeType {
                node_id,
                class_type,
            } => write!(f, "Node {node_id}: unknown node type {class_type}"),
            Self::MissingRequiredInput { node_id, input } => {
                write!(f, "Node {node_id}: missing required input {input}")
            }
            Self::UnknownInput { node_id, input } => {
                write!(f, "Node {node_id}: unknown input {input}")
            }
            Self::DanglingLink {
                node_id,
                input,
                source_node_id,
                output_slot,
                reason,
            } => match reason {
                DanglingReason::MissingSource => write!(
                    f,
                    "Node {node_id}.{input}: references non-existent node {source_node_id}"
                ),
                DanglingReason::SlotOutOfRange { output_count } => write!(
                    f,
                    "Node {node_id}.{input}: output slot {output_slot} of node \
                     {source_node_id} is out of range ({output_count} outputs)"
                ),
            },
            Self::TypeMismatch {
                node_id,
                input,
                expected,
                found,
            } => write!(
                f,
                "Node {node_id}.{input}: expected {expected}, linked output is {found}"
            ),
        }
    }
}

/// Check whether an output type can feed an input type.
///
/// Equal tags match, `*` matches anything, an input declared as a
/// comma-separated list accepts any of its members, and combo inputs
/// accept any link (the engine checks the value itself).
pub fn types_compatible(output_type: &str, input_type: &str) -> bool {
    if output_type == input_type || output_type == WILDCARD_TYPE || input_type == WILDCARD_TYPE {
        return true;
    }
    if input_type == COMBO_TYPE {
        return true;
    }
    input_type
        .split(',')
        .map(str::trim)
        .any(|t| t == output_type)
}

/// Lazily validate `graph` against `schema`.
///
/// Findings come out in node insertion order; calling again recomputes
/// the same sequence.
pub fn validate<'a>(
    graph: &'a Graph,
    schema: &'a SchemaSnapshot,
) -> impl Iterator<Item = Finding> + 'a {
    graph
        .iter()
        .flat_map(move |(node_id, node)| node_findings(graph, schema, node_id, node))
}

fn node_findings(
    graph: &Graph,
    schema: &SchemaSnapshot,
    node_id: &str,
    node: &Node,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    let entry = schema.get(&node.class_type);

    if entry.is_none() && schema.is_populated() {
        findings.push(Finding::UnknownNodeType {
            node_id: node_id.to_string(),
            class_type: node.class_type.clone(),
        });
    }

    if let Some(entry) = entry {
        for spec in entry.required_inputs() {
            if !node.inputs.contains_key(&spec.name) {
                findings.push(Finding::MissingRequiredInput {
                    node_id: node_id.to_string(),
                    input: spec.name.clone(),
                });
            }
        }
    }

    for (input, value) in &node.inputs {
        if let Some(entry) = entry {
            if entry.input(input).is_none() {
                findings.push(Finding::UnknownInput {
                    node_id: node_id.to_string(),
                    input: input.clone(),
                });
            }
        }
        if let InputValue::Link(link) = value {
            if let Some(finding) = check_link(graph, schema, node_id, input, link, entry) {
                findings.push(finding);
            }
        }
    }

    findings
}

fn check_link(
    graph: &Graph,
    schema: &SchemaSnapshot,
    node_id: &str,
    input: &str,
    link: &Link,
    entry: Option<&SchemaEntry>,
) -> Option<Finding> {
    let dangling = |reason| Finding::DanglingLink {
        node_id: node_id.to_string(),
        input: input.to_string(),
        source_node_id: link.source_node_id.clone(),
        output_slot: link.output_slot,
        reason,
    };

    let source = match graph.node(&link.source_node_id) {
        Some(source) => source,
        None => return Some(dangling(DanglingReason::MissingSource)),
    };

    // Without the source's schema only existence can be checked.
    let source_entry = schema.get(&source.class_type)?;
    let output_type = match source_entry.outputs.get(link.output_slot as usize) {
        Some(t) => t,
        None => {
            return Some(dangling(DanglingReason::SlotOutOfRange {
                output_count: source_entry.output_count(),
            }))
        }
    };

    let input_type = entry?.input(input)?.type_tag.as_deref()?;
    if types_compatible(output_type, input_type) {
        None
    } else {
        Some(Finding::TypeMismatch {
            node_id: node_id.to_string(),
            input: input.to_string(),
            expected: input_type.to_string(),
            found: output_type.clone(),
        })
    }
}

/// Collected validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub node_count: usize,
    pub schema_version: u64,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn new(graph: &Graph, schema: &SchemaSnapshot) -> Self {
        let findings: Vec<Finding> = validate(graph, schema).collect();
        Self {
            valid: findings.is_empty(),
            node_count: graph.len(),
            schema_version: schema.version(),
            findings,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert_matches::assert_matches;

    use super::*;
    use crate::graph::{inputs, Inputs};

    fn ab_schema() -> SchemaSnapshot {
        SchemaSnapshot::new(
            1,
            [
                SchemaEntry::new("A").with_output("A_OUT"),
                SchemaEntry::new("B").with_input("x", "A_OUT", true),
            ],
        )
    }

    fn ab_graph(slot: u32) -> Graph {
        let schema = ab_schema();
        Graph::new()
            .add_node("1", "A", Inputs::new(), &schema)
            .unwrap()
            .add_node("2", "B", inputs([("x", InputValue::link("1", slot))]), &schema)
            .unwrap()
    }

    // -- Type compatibility -------------------------------------------------

    #[test]
    fn same_types_compatible() {
        assert!(types_compatible("IMAGE", "IMAGE"));
    }

    #[test]
    fn different_types_incompatible() {
        assert!(!types_compatible("IMAGE", "MODEL"));
        assert!(!types_compatible("INT", "FLOAT"));
    }

    #[test]
    fn wildcard_and_lists_compatible() {
        assert!(types_compatible("*", "MODEL"));
        assert!(types_compatible("LATENT", "*"));
        assert!(types_compatible("MASK", "IMAGE,MASK"));
        assert!(types_compatible("STRING", COMBO_TYPE));
    }

    // -- Findings -----------------------------------------------------------

    #[test]
    fn valid_link_has_no_findings() {
        let schema = ab_schema();
        assert_eq!(validate(&ab_graph(0), &schema).count(), 0);
    }

    #[test]
    fn out_of_range_slot_is_single_dangling_link() {
        let schema = ab_schema();
        let graph = ab_graph(5);
        let findings: Vec<_> = validate(&graph, &schema).collect();
        assert_eq!(findings.len(), 1);
        assert_matches!(
            &findings[0],
            Finding::DanglingLink {
                reason: DanglingReason::SlotOutOfRange { output_count: 1 },
                ..
            }
        );
    }

    #[test]
    fn missing_source_is_dangling_even_without_schema() {
        let graph = ab_graph(0).remove_node("1").unwrap();
        let findings: Vec<_> = validate(&graph, &SchemaSnapshot::empty()).collect();
        assert_eq!(findings.len(), 1);
        assert_matches!(
            &findings[0],
            Finding::DanglingLink {
                reason: DanglingReason::MissingSource,
                ..
            }
        );
        assert_eq!(
            findings[0].to_string(),
            "Node 2.x: references non-existent node 1"
        );
    }

    #[test]
    fn unpopulated_schema_skips_slot_and_type_checks() {
        let graph = ab_graph(5);
        assert_eq!(validate(&graph, &SchemaSnapshot::empty()).count(), 0);
    }

    #[test]
    fn missing_required_and_unknown_inputs_reported() {
        let schema = ab_schema();
        let graph = Graph::new()
            .add_node("2", "B", inputs([("y", InputValue::literal(3))]), &schema)
            .unwrap();
        let findings: Vec<_> = validate(&graph, &schema).collect();
        assert_eq!(
            findings,
            vec![
                Finding::MissingRequiredInput {
                    node_id: "2".into(),
                    input: "x".into()
                },
                Finding::UnknownInput {
                    node_id: "2".into(),
                    input: "y".into()
                },
            ]
        );
    }

    #[test]
    fn type_mismatch_reported() {
        let schema = SchemaSnapshot::new(
            1,
            [
                SchemaEntry::new("A").with_output("LATENT"),
                SchemaEntry::new("B").with_input("x", "IMAGE", true),
            ],
        );
        let graph = Graph::from_json(serde_json::json!({
            "1": {"class_type": "A", "inputs": {}},
            "2": {"class_type": "B", "inputs": {"x": ["1", 0]}}
        }))
        .unwrap();
        let findings: Vec<_> = validate(&graph, &schema).collect();
        assert_matches!(
            &findings[..],
            [Finding::TypeMismatch { expected, found, .. }] if expected == "IMAGE" && found == "LATENT"
        );
    }

    #[test]
    fn unknown_node_type_reported_when_schema_populated() {
        let schema = ab_schema();
        let graph = Graph::from_json(serde_json::json!({
            "9": {"class_type": "Mystery", "inputs": {"a": 1}}
        }))
        .unwrap();
        let findings: Vec<_> = validate(&graph, &schema).collect();
        assert_matches!(&findings[..], [Finding::UnknownNodeType { .. }]);
    }

    // -- Properties ---------------------------------------------------------

    #[test]
    fn validation_is_idempotent() {
        let schema = ab_schema();
        let graph = ab_graph(5).remove_node("1").unwrap();
        let first: Vec<_> = validate(&graph, &schema).collect();
        let second: Vec<_> = validate(&graph, &schema).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn add_then_remove_restores_finding_set() {
        let schema = ab_schema();
        let graph = ab_graph(5);
        let before: HashSet<String> = validate(&graph, &schema).map(|f| f.to_string()).collect();

        let after_graph = graph
            .add_node("3", "B", Inputs::new(), &schema)
            .unwrap()
            .remove_node("3")
            .unwrap();
        let after: HashSet<String> = validate(&after_graph, &schema)
            .map(|f| f.to_string())
            .collect();

        assert_eq!(before, after);
        assert_eq!(after_graph, graph);
    }

    #[test]
    fn report_counts_nodes_and_findings() {
        let schema = ab_schema();
        let report = ValidationReport::new(&ab_graph(5), &schema);
        assert!(!report.valid);
        assert_eq!(report.node_count, 2);
        assert_eq!(report.schema_version, 1);
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn finding_serializes_with_kind_tag() {
        let finding = Finding::MissingRequiredInput {
            node_id: "2".into(),
            input: "x".into(),
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "missing_required_input");
        assert_eq!(json["node_id"], "2");
    }
}
