use indexmap::IndexMap;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// File extensions treated as model artifact references when they appear as
/// literal input values.
pub const MODEL_FILE_EXTENSIONS: [&str; 6] =
    [".safetensors", ".ckpt", ".pth", ".pt", ".onnx", ".bin"];

/// One input binding: either a plain literal or a `[node-id, output-index]`
/// reference to another node's output.
///
/// The reference shape is checked first during deserialization; any other
/// value, including arrays that do not match it, stays a literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Reference(String, u32),
    Literal(Value),
}

impl InputValue {
    pub fn as_reference(&self) -> Option<(&str, u32)> {
        match self {
            InputValue::Reference(node, index) => Some((node.as_str(), *index)),
            InputValue::Literal(_) => None,
        }
    }

    /// The literal string value, when this input carries one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InputValue::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// True when the literal looks like a model filename.
    pub fn is_model_filename(&self) -> bool {
        self.as_str()
            .is_some_and(|s| MODEL_FILE_EXTENSIONS.iter().any(|ext| s.ends_with(ext)))
    }
}

/// A single node in the graph: its engine class and named input bindings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub class_type: String,
    #[serde(default)]
    pub inputs: IndexMap<String, InputValue>,
    /// Opaque presentation metadata (titles, positions). Passed through
    /// untouched.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Ordered mapping of node-id to spec. Order is the document order of the
/// source JSON and is preserved through validation and reporting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: IndexMap<String, NodeSpec>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("workflow graph is not valid JSON in the expected shape")]
#[diagnostic(
    code(voiceloom::workflow::parse),
    help("Each top-level key must be a node id mapping to {{class_type, inputs}}.")
)]
pub struct GraphParseError(#[from] pub serde_json::Error);

impl WorkflowGraph {
    pub fn from_json_str(raw: &str) -> Result<Self, GraphParseError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn insert(&mut self, node_id: String, spec: NodeSpec) {
        self.nodes.insert(node_id, spec);
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeSpec)> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every literal input across the graph that looks like a model
    /// filename, in document order, deduplicated.
    pub fn model_file_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        for spec in self.nodes.values() {
            for value in spec.inputs.values() {
                if value.is_model_filename() {
                    if let Some(s) = value.as_str() {
                        if !refs.iter().any(|r| r == s) {
                            refs.push(s.to_string());
                        }
                    }
                }
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_shape_parses_as_reference() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "3": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["2", 0], "vae": ["1", 2] }
            }
        }))
        .unwrap();
        let spec = graph.get("3").unwrap();
        assert_eq!(spec.inputs["samples"].as_reference(), Some(("2", 0)));
        assert_eq!(spec.inputs["vae"].as_reference(), Some(("1", 2)));
    }

    #[test]
    fn literals_stay_literals() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "1": {
                "class_type": "CheckpointLoader",
                "inputs": { "ckpt_name": "base.safetensors", "seed": 42 }
            }
        }))
        .unwrap();
        let spec = graph.get("1").unwrap();
        assert!(spec.inputs["ckpt_name"].is_model_filename());
        assert!(spec.inputs["seed"].as_reference().is_none());
    }

    #[test]
    fn model_references_are_collected_once() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "1": { "class_type": "A", "inputs": { "m": "base.safetensors" } },
            "2": { "class_type": "B", "inputs": { "m": "base.safetensors", "v": "vae.pt" } }
        }))
        .unwrap();
        assert_eq!(
            graph.model_file_references(),
            vec!["base.safetensors".to_string(), "vae.pt".to_string()]
        );
    }
}
