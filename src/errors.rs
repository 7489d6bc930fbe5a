//! The structured error contract shared by every component.
//!
//! Presentation layers rely on a stable shape: a machine-readable kind tag,
//! a human-readable message, a context mapping of relevant fields, and an
//! ordered list of suggested remediations. Components keep their own typed
//! error enums internally and convert at the boundary via [`ToStructured`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable kind tag. Serialized names are part of the external contract;
/// renaming a variant here is a breaking change for consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ManifestParse,
    Segmentation,
    UnsupportedDigest,
    ModelDownload,
    GraphCycle,
    EmptyWorkflow,
    UnknownNodeType,
    DanglingReference,
    ModelNotFound,
    VramInsufficient,
    Engine,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::ManifestParse => "manifest_parse",
            ErrorKind::Segmentation => "segmentation",
            ErrorKind::UnsupportedDigest => "unsupported_digest",
            ErrorKind::ModelDownload => "model_download",
            ErrorKind::GraphCycle => "graph_cycle",
            ErrorKind::EmptyWorkflow => "empty_workflow",
            ErrorKind::UnknownNodeType => "unknown_node_type",
            ErrorKind::DanglingReference => "dangling_reference",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::VramInsufficient => "vram_insufficient",
            ErrorKind::Engine => "engine",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// The wire form of any failure this crate reports outward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    /// Relevant fields of the failure (artifact names, node ids, byte
    /// counts). Keys are snake_case.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Suggested fixes, most likely first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediations: Vec<String>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Map::new(),
            remediations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediations.push(remediation.into());
        self
    }

    #[must_use]
    pub fn with_remediations(mut self, remediations: impl IntoIterator<Item = String>) -> Self {
        self.remediations.extend(remediations);
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Conversion from a component's typed error into the shared wire form.
pub trait ToStructured {
    fn to_structured(&self) -> StructuredError;
}

impl std::error::Error for StructuredError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_preserves_remediation_order() {
        let err = StructuredError::new(ErrorKind::ModelDownload, "boom")
            .with_remediation("first")
            .with_remediation("second")
            .with_context("artifact", json!("xtts"));
        assert_eq!(err.remediations, vec!["first", "second"]);
        assert_eq!(err.context["artifact"], json!("xtts"));
    }

    #[test]
    fn kind_tags_are_stable_snake_case() {
        let tag = serde_json::to_value(ErrorKind::VramInsufficient).unwrap();
        assert_eq!(tag, json!("vram_insufficient"));
        let back: ErrorKind = serde_json::from_value(tag).unwrap();
        assert_eq!(back, ErrorKind::VramInsufficient);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = StructuredError::new(ErrorKind::GraphCycle, "cycle between a and b");
        assert_eq!(err.to_string(), "[graph_cycle] cycle between a and b");
    }
}
