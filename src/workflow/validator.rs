use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::json;

use crate::errors::{ErrorKind, StructuredError};
use crate::manifest::ModelRegistry;

use super::{InputValue, WorkflowGraph};

/// Node classes the execution engine advertises, with how many outputs each
/// produces. Output counts bound the plausible output-index range of
/// references pointing at a node of that class.
#[derive(Clone, Debug, Default)]
pub struct NodeCatalog {
    types: FxHashMap<String, u32>,
}

impl NodeCatalog {
    #[must_use]
    pub fn with_type(mut self, class_type: impl Into<String>, output_count: u32) -> Self {
        self.types.insert(class_type.into(), output_count);
        self
    }

    pub fn insert(&mut self, class_type: impl Into<String>, output_count: u32) {
        self.types.insert(class_type.into(), output_count);
    }

    pub fn contains(&self, class_type: &str) -> bool {
        self.types.contains_key(class_type)
    }

    pub fn output_count(&self, class_type: &str) -> Option<u32> {
        self.types.get(class_type).copied()
    }
}

/// One validation failure. Variants map one-to-one onto the error taxonomy
/// kinds used for reporting.
#[derive(Clone, Debug, PartialEq)]
pub enum Violation {
    EmptyGraph,
    DanglingReference {
        node: String,
        input: String,
        target: String,
    },
    ImplausibleOutputIndex {
        node: String,
        input: String,
        target: String,
        index: u32,
        declared_outputs: u32,
    },
    Cycle {
        nodes: Vec<String>,
    },
    UnknownNodeType {
        node: String,
        class_type: String,
    },
    ModelNotFound {
        node: String,
        input: String,
        filename: String,
    },
}

impl Violation {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Violation::EmptyGraph => ErrorKind::EmptyWorkflow,
            Violation::DanglingReference { .. } => ErrorKind::DanglingReference,
            Violation::ImplausibleOutputIndex { .. } => ErrorKind::DanglingReference,
            Violation::Cycle { .. } => ErrorKind::GraphCycle,
            Violation::UnknownNodeType { .. } => ErrorKind::UnknownNodeType,
            Violation::ModelNotFound { .. } => ErrorKind::ModelNotFound,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        let err = StructuredError::new(self.kind(), self.to_string());
        match self {
            Violation::EmptyGraph => {
                err.with_remediation("supply a graph with at least one node")
            }
            Violation::DanglingReference {
                node,
                input,
                target,
            } => err
                .with_context("node", json!(node))
                .with_context("input", json!(input))
                .with_context("target", json!(target))
                .with_remediation("fix the reference or add the missing node to the graph"),
            Violation::ImplausibleOutputIndex {
                node,
                input,
                target,
                index,
                declared_outputs,
            } => err
                .with_context("node", json!(node))
                .with_context("input", json!(input))
                .with_context("target", json!(target))
                .with_context("index", json!(index))
                .with_context("declared_outputs", json!(declared_outputs))
                .with_remediation("use an output index below the target class's output count"),
            Violation::Cycle { nodes } => err
                .with_context("nodes", json!(nodes))
                .with_remediation("break the cycle; the engine requires an acyclic graph"),
            Violation::UnknownNodeType { node, class_type } => err
                .with_context("node", json!(node))
                .with_context("class_type", json!(class_type))
                .with_remediation("install the missing custom node pack or correct the class name"),
            Violation::ModelNotFound {
                node,
                input,
                filename,
            } => err
                .with_context("node", json!(node))
                .with_context("input", json!(input))
                .with_context("filename", json!(filename))
                .with_remediation("declare the model in the manifest so it can be acquired"),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyGraph => write!(f, "workflow graph contains no nodes"),
            Violation::DanglingReference {
                node,
                input,
                target,
            } => write!(
                f,
                "node {node} input {input} references node {target}, which does not exist"
            ),
            Violation::ImplausibleOutputIndex {
                node,
                input,
                target,
                index,
                declared_outputs,
            } => write!(
                f,
                "node {node} input {input} asks for output {index} of node {target}, which declares only {declared_outputs} output(s)"
            ),
            Violation::Cycle { nodes } => {
                write!(f, "reference cycle between nodes: {}", nodes.join(" -> "))
            }
            Violation::UnknownNodeType { node, class_type } => {
                write!(f, "node {node} uses unknown class_type {class_type}")
            }
            Violation::ModelNotFound {
                node,
                input,
                filename,
            } => write!(
                f,
                "node {node} input {input} references undeclared model file {filename}"
            ),
        }
    }
}

/// Result of a full validation pass. Every check runs to completion; the
/// report carries all violations in a stable order so callers can present
/// them together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn to_structured(&self) -> Vec<StructuredError> {
        self.violations.iter().map(Violation::to_structured).collect()
    }
}

/// Validate `graph` against the engine's node catalog and the declared
/// models. Never short-circuits; the report accumulates reference errors,
/// cycles, unknown classes, and unresolved model files in that order.
pub fn validate(
    graph: &WorkflowGraph,
    catalog: &NodeCatalog,
    registry: &ModelRegistry,
) -> ValidationReport {
    let mut violations = Vec::new();

    if graph.is_empty() {
        violations.push(Violation::EmptyGraph);
    }

    for (node_id, spec) in graph.iter() {
        for (input_name, value) in &spec.inputs {
            if let Some((target, index)) = value.as_reference() {
                match graph.get(target) {
                    None => violations.push(Violation::DanglingReference {
                        node: node_id.clone(),
                        input: input_name.clone(),
                        target: target.to_string(),
                    }),
                    Some(target_spec) => {
                        // Plausibility is only checkable for known classes;
                        // an unknown class is reported once, below.
                        if let Some(outputs) = catalog.output_count(&target_spec.class_type) {
                            if index >= outputs {
                                violations.push(Violation::ImplausibleOutputIndex {
                                    node: node_id.clone(),
                                    input: input_name.clone(),
                                    target: target.to_string(),
                                    index,
                                    declared_outputs: outputs,
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    if let Some(cycle) = find_cycle(graph) {
        violations.push(Violation::Cycle { nodes: cycle });
    }

    for (node_id, spec) in graph.iter() {
        if !catalog.contains(&spec.class_type) {
            violations.push(Violation::UnknownNodeType {
                node: node_id.clone(),
                class_type: spec.class_type.clone(),
            });
        }
    }

    for (node_id, spec) in graph.iter() {
        for (input_name, value) in &spec.inputs {
            if value.is_model_filename() {
                if let Some(filename) = value.as_str() {
                    if registry.by_filename(filename).is_none() {
                        violations.push(Violation::ModelNotFound {
                            node: node_id.clone(),
                            input: input_name.clone(),
                            filename: filename.to_string(),
                        });
                    }
                }
            }
        }
    }

    ValidationReport { violations }
}

/// Iterative DFS cycle search over the reference edges. Edges into missing
/// nodes are skipped here; those are reported as dangling references
/// instead. Returns the node ids along the first cycle found, starting and
/// ending at the same node.
fn find_cycle(graph: &WorkflowGraph) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: FxHashMap<&str, Mark> = FxHashMap::default();
    let mut finished: FxHashSet<&str> = FxHashSet::default();

    for start in graph.node_ids() {
        if finished.contains(start.as_str()) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        let mut stack: Vec<(&str, Vec<&str>)> = vec![(start.as_str(), references_of(graph, start))];
        marks.insert(start.as_str(), Mark::InProgress);
        path.push(start.as_str());

        while let Some((node, edges)) = stack.last_mut() {
            match edges.pop() {
                Some(target) => match marks.get(target) {
                    Some(Mark::InProgress) => {
                        let from = path.iter().position(|n| *n == target).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[from..].iter().map(|n| n.to_string()).collect();
                        cycle.push(target.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(target, Mark::InProgress);
                        path.push(target);
                        let next = references_of(graph, target);
                        stack.push((target, next));
                    }
                },
                None => {
                    marks.insert(*node, Mark::Done);
                    finished.insert(*node);
                    path.pop();
                    stack.pop();
                }
            }
        }
    }
    None
}

fn references_of<'a>(graph: &'a WorkflowGraph, node_id: &str) -> Vec<&'a str> {
    let Some(spec) = graph.get(node_id) else {
        return Vec::new();
    };
    spec.inputs
        .values()
        .filter_map(InputValue::as_reference)
        .map(|(target, _)| target)
        .filter(|target| graph.contains(target))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use serde_json::json;

    fn catalog() -> NodeCatalog {
        NodeCatalog::default()
            .with_type("CheckpointLoader", 3)
            .with_type("KSampler", 1)
            .with_type("VAEDecode", 1)
    }

    fn empty_registry() -> ModelRegistry {
        ModelRegistry::from_manifest(Manifest::default()).unwrap()
    }

    #[test]
    fn mutual_reference_cycle_names_both_nodes() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "a": { "class_type": "KSampler", "inputs": { "in": ["b", 0] } },
            "b": { "class_type": "KSampler", "inputs": { "in": ["a", 0] } }
        }))
        .unwrap();
        let report = validate(&graph, &catalog(), &empty_registry());
        let cycle = report
            .violations
            .iter()
            .find_map(|v| match v {
                Violation::Cycle { nodes } => Some(nodes.clone()),
                _ => None,
            })
            .unwrap();
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "a": { "class_type": "KSampler", "inputs": { "in": ["a", 0] } }
        }))
        .unwrap();
        let report = validate(&graph, &catalog(), &empty_registry());
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::Cycle { nodes } if nodes.contains(&"a".to_string()))));
    }

    #[test]
    fn implausible_output_index_is_reported() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "1": { "class_type": "CheckpointLoader", "inputs": {} },
            "2": { "class_type": "KSampler", "inputs": { "model": ["1", 7] } }
        }))
        .unwrap();
        let report = validate(&graph, &catalog(), &empty_registry());
        assert_eq!(
            report.violations,
            vec![Violation::ImplausibleOutputIndex {
                node: "2".to_string(),
                input: "model".to_string(),
                target: "1".to_string(),
                index: 7,
                declared_outputs: 3,
            }]
        );
    }

    #[test]
    fn clean_graph_yields_empty_report() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "1": { "class_type": "CheckpointLoader", "inputs": {} },
            "2": { "class_type": "KSampler", "inputs": { "model": ["1", 0] } },
            "3": { "class_type": "VAEDecode", "inputs": { "samples": ["2", 0], "vae": ["1", 2] } }
        }))
        .unwrap();
        let report = validate(&graph, &catalog(), &empty_registry());
        assert!(report.is_valid());
        assert!(report.violations.is_empty());
    }

    #[test]
    fn dangling_reference_does_not_skip_other_checks() {
        // The absent node "5" produces exactly one violation; the rest of
        // the graph still validates to completion.
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "1": { "class_type": "CheckpointLoader", "inputs": {} },
            "3": { "class_type": "KSampler", "inputs": { "model": ["1", 0], "latent": ["5", 0] } }
        }))
        .unwrap();
        let report = validate(&graph, &catalog(), &empty_registry());
        assert_eq!(
            report.violations,
            vec![Violation::DanglingReference {
                node: "3".to_string(),
                input: "latent".to_string(),
                target: "5".to_string(),
            }]
        );
    }

    #[test]
    fn empty_graph_is_a_violation() {
        let report = validate(&WorkflowGraph::default(), &catalog(), &empty_registry());
        assert_eq!(report.violations, vec![Violation::EmptyGraph]);
    }

    #[test]
    fn undeclared_model_file_is_reported() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "1": { "class_type": "CheckpointLoader", "inputs": { "ckpt_name": "missing.safetensors" } }
        }))
        .unwrap();
        let report = validate(&graph, &catalog(), &empty_registry());
        assert!(report.violations.iter().any(|v| matches!(
            v,
            Violation::ModelNotFound { filename, .. } if filename == "missing.safetensors"
        )));
    }
}
