//! Model artifact manifest and the in-memory registry built from it.
//!
//! The manifest is an ordered list of artifact records declaring everything a
//! deployment may need: where a file lives relative to the engine root, where
//! to fetch it, how big it is, and the digest that proves integrity. The
//! [`ModelRegistry`] indexes those records and is read-only after load, so it
//! can be shared across download workers without locking.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::checksum::DigestAlgorithm;
use crate::errors::{ErrorKind, StructuredError, ToStructured};
use crate::workflow::WorkflowGraph;

/// One declared model artifact. Immutable during a run; mutated only by
/// re-loading the manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelArtifact {
    pub name: String,
    /// Artifact category (e.g. `tts`, `lipsync`, `checkpoint`, `vae`).
    /// Drives the default destination directory when none is declared.
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    /// Directory relative to the engine root. Empty means "derive from kind".
    #[serde(default)]
    pub destination: String,
    pub url: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(rename = "checksum_type", default)]
    pub digest_algorithm: DigestAlgorithm,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    /// 1 = highest, 5 = lowest. Controls resolve ordering.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_required() -> bool {
    true
}

fn default_priority() -> u8 {
    3
}

impl ModelArtifact {
    /// Full path of the artifact under `engine_root`, falling back to a
    /// per-kind directory when the manifest gave no destination.
    pub fn resolved_destination(&self, engine_root: &Path) -> PathBuf {
        let dir = if self.destination.is_empty() {
            default_destination_for(&self.kind)
        } else {
            self.destination.clone()
        };
        engine_root.join(dir).join(&self.filename)
    }
}

fn default_destination_for(kind: &str) -> String {
    match kind {
        "tts" | "xtts" => "models/xtts".to_string(),
        "lipsync" | "latentsync" => "models/latentsync".to_string(),
        "checkpoint" => "models/checkpoints".to_string(),
        "vae" => "models/vae".to_string(),
        "lora" => "models/loras".to_string(),
        "controlnet" => "models/controlnet".to_string(),
        _ => "models".to_string(),
    }
}

/// Raw manifest document: an ordered sequence of artifact records.
/// Unknown fields are rejected rather than ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub models: Vec<ModelArtifact>,
}

impl Manifest {
    pub fn from_json_str(raw: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Manifest problems. All fail fast: a bad manifest means nothing runs.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("malformed manifest entry")]
    #[diagnostic(
        code(voiceloom::manifest::parse),
        help("Check the manifest for missing required fields or misspelled keys.")
    )]
    Parse(#[from] serde_json::Error),

    #[error("duplicate artifact name in manifest: {name}")]
    #[diagnostic(
        code(voiceloom::manifest::duplicate),
        help("Artifact names must be unique; rename or remove one of the entries.")
    )]
    DuplicateName { name: String },

    #[error("required artifact {name} declares no checksum")]
    #[diagnostic(
        code(voiceloom::manifest::missing_digest),
        help("Required artifacts must carry a digest so downloads can be verified.")
    )]
    MissingDigest { name: String },

    #[error("artifact {name} has priority {priority}; expected 1..=5")]
    #[diagnostic(code(voiceloom::manifest::priority))]
    InvalidPriority { name: String, priority: u8 },
}

impl ToStructured for ManifestError {
    fn to_structured(&self) -> StructuredError {
        let err = StructuredError::new(ErrorKind::ManifestParse, self.to_string());
        match self {
            ManifestError::Parse(e) => err
                .with_context("detail", json!(e.to_string()))
                .with_remediation("validate the manifest against the documented record fields"),
            ManifestError::DuplicateName { name } => err
                .with_context("artifact", json!(name))
                .with_remediation("rename or remove the duplicate entry; ambiguity is never merged"),
            ManifestError::MissingDigest { name } => err
                .with_context("artifact", json!(name))
                .with_remediation("add a checksum and checksum_type to the required artifact"),
            ManifestError::InvalidPriority { name, priority } => err
                .with_context("artifact", json!(name))
                .with_context("priority", json!(priority))
                .with_remediation("use a priority between 1 (high) and 5 (low)"),
        }
    }
}

/// Read-only index of declared artifacts, keyed by name, preserving manifest
/// order.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    artifacts: IndexMap<String, ModelArtifact>,
}

impl ModelRegistry {
    /// Build the registry, enforcing the manifest invariants: unique names,
    /// digests on required artifacts, priorities in range.
    pub fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        let mut artifacts = IndexMap::with_capacity(manifest.models.len());
        for artifact in manifest.models {
            if artifact.required
                && artifact.checksum.as_deref().unwrap_or("").is_empty()
            {
                return Err(ManifestError::MissingDigest {
                    name: artifact.name,
                });
            }
            if !(1..=5).contains(&artifact.priority) {
                return Err(ManifestError::InvalidPriority {
                    priority: artifact.priority,
                    name: artifact.name,
                });
            }
            if artifacts.contains_key(&artifact.name) {
                return Err(ManifestError::DuplicateName {
                    name: artifact.name,
                });
            }
            artifacts.insert(artifact.name.clone(), artifact);
        }
        Ok(Self { artifacts })
    }

    pub fn all(&self) -> impl Iterator<Item = &ModelArtifact> {
        self.artifacts.values()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ModelArtifact> {
        self.artifacts.get(name)
    }

    pub fn by_filename(&self, filename: &str) -> Option<&ModelArtifact> {
        self.artifacts.values().find(|a| a.filename == filename)
    }

    /// Artifacts the validated graph actually references, ordered by priority
    /// then manifest order. Declared-but-unused models are never returned, so
    /// the acquirer never fetches them.
    pub fn required_for(&self, graph: &WorkflowGraph) -> Vec<&ModelArtifact> {
        let refs = graph.model_file_references();
        let mut needed: Vec<&ModelArtifact> = self
            .artifacts
            .values()
            .filter(|a| refs.iter().any(|r| r == &a.filename))
            .collect();
        needed.sort_by_key(|a| a.priority);
        needed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> ModelArtifact {
        ModelArtifact {
            name: name.to_string(),
            kind: "checkpoint".to_string(),
            filename: format!("{name}.safetensors"),
            destination: String::new(),
            url: format!("https://models.example/{name}.safetensors"),
            size_bytes: 1024,
            checksum: Some("abc123".to_string()),
            digest_algorithm: DigestAlgorithm::Sha256,
            version: None,
            description: None,
            required: true,
            priority: 3,
        }
    }

    #[test]
    fn duplicate_names_are_rejected_not_merged() {
        let manifest = Manifest {
            models: vec![artifact("xtts"), artifact("xtts")],
        };
        assert!(matches!(
            ModelRegistry::from_manifest(manifest),
            Err(ManifestError::DuplicateName { name }) if name == "xtts"
        ));
    }

    #[test]
    fn required_artifact_without_digest_is_rejected() {
        let mut a = artifact("latentsync");
        a.checksum = None;
        let manifest = Manifest { models: vec![a] };
        assert!(matches!(
            ModelRegistry::from_manifest(manifest),
            Err(ManifestError::MissingDigest { .. })
        ));
    }

    #[test]
    fn optional_artifact_may_omit_digest() {
        let mut a = artifact("upscaler");
        a.checksum = None;
        a.required = false;
        let registry = ModelRegistry::from_manifest(Manifest { models: vec![a] }).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn destination_defaults_follow_kind() {
        let mut a = artifact("xtts");
        a.kind = "tts".to_string();
        let path = a.resolved_destination(Path::new("/engine"));
        assert_eq!(path, Path::new("/engine/models/xtts/xtts.safetensors"));
    }

    #[test]
    fn explicit_destination_wins() {
        let mut a = artifact("xtts");
        a.destination = "custom/dir".to_string();
        let path = a.resolved_destination(Path::new("/engine"));
        assert_eq!(path, Path::new("/engine/custom/dir/xtts.safetensors"));
    }

    #[test]
    fn unknown_manifest_keys_fail_parse() {
        let raw = r#"{ "models": [], "extra_key": true }"#;
        assert!(matches!(
            Manifest::from_json_str(raw),
            Err(ManifestError::Parse(_))
        ));
    }
}
