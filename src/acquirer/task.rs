use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::errors::{ErrorKind, StructuredError, ToStructured};
use crate::manifest::ModelArtifact;

/// Lifecycle of one artifact's acquisition. Transitions are strictly
/// forward except for the retry edge from `Verifying`/`InProgress` back to
/// `InProgress`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    InProgress,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Verifying => "verifying",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Mutable per-artifact bookkeeping, owned by the acquirer worker driving
/// it and dropped when the run completes.
#[derive(Debug)]
pub struct DownloadTask {
    pub artifact: ModelArtifact,
    pub destination: PathBuf,
    pub state: TaskState,
    pub attempts: u32,
    pub bytes_transferred: u64,
}

impl DownloadTask {
    pub fn new(artifact: ModelArtifact, destination: PathBuf) -> Self {
        Self {
            artifact,
            destination,
            state: TaskState::Pending,
            attempts: 0,
            bytes_transferred: 0,
        }
    }

    /// Path of the in-flight partial file beside the final destination.
    pub fn partial_path(&self) -> PathBuf {
        partial_path_for(&self.destination)
    }
}

pub(super) fn partial_path_for(destination: &std::path::Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Terminal failure of one artifact after the retry budget is spent.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to acquire model {name} after {attempts} attempt(s): {cause}")]
#[diagnostic(
    code(voiceloom::acquirer::download),
    help("Check the artifact URL, network connectivity, and free disk space at the destination.")
)]
pub struct DownloadError {
    pub name: String,
    pub attempts: u32,
    pub cause: String,
}

impl ToStructured for DownloadError {
    fn to_structured(&self) -> StructuredError {
        StructuredError::new(ErrorKind::ModelDownload, self.to_string())
            .with_context("artifact", json!(self.name))
            .with_context("attempts", json!(self.attempts))
            .with_context("cause", json!(self.cause))
            .with_remediations([
                "verify the url in the manifest is still reachable".to_string(),
                "check network connectivity and proxy settings".to_string(),
                "ensure the destination volume has free space".to_string(),
                "re-run resolve; partial downloads resume where they stopped".to_string(),
            ])
    }
}
