use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::errors::{ErrorKind, StructuredError, ToStructured};
use crate::workflow::WorkflowGraph;

/// Everything the engine needs for one dispatch: the validated graph, the
/// text for this segment, and where the resolved model files landed.
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub graph: WorkflowGraph,
    pub text: String,
    /// Model filename to local path, for every artifact the graph uses.
    pub model_paths: IndexMap<String, PathBuf>,
    /// Position of this segment in the run, when the text was segmented.
    pub segment_index: Option<usize>,
}

/// What the engine reports back for one dispatch. Warnings cover optional
/// steps that failed while the primary output still exists.
#[derive(Clone, Debug, Default)]
pub struct EngineResponse {
    /// Named output to produced artifact path.
    pub outputs: IndexMap<String, PathBuf>,
    pub warnings: Vec<StructuredError>,
}

/// Failure reported by the engine, or by the deadline around it. These are
/// always wrapped into the shared error shape before leaving the
/// orchestrator; engine-internal detail never leaks raw.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("engine execution failed{}: {message}", node_suffix(node))]
    #[diagnostic(code(voiceloom::engine::failed))]
    Failed {
        message: String,
        node: Option<String>,
    },

    #[error("engine is unreachable: {0}")]
    #[diagnostic(
        code(voiceloom::engine::unavailable),
        help("Confirm the engine process is running and its endpoint is correct.")
    )]
    Unavailable(String),

    #[error("engine dispatch exceeded {0:?} deadline")]
    #[diagnostic(code(voiceloom::engine::timeout))]
    Timeout(Duration),
}

fn node_suffix(node: &Option<String>) -> String {
    match node {
        Some(node) => format!(" at node {node}"),
        None => String::new(),
    }
}

impl ToStructured for EngineError {
    fn to_structured(&self) -> StructuredError {
        let err = StructuredError::new(ErrorKind::Engine, self.to_string());
        match self {
            EngineError::Failed { node, .. } => {
                let err = match node {
                    Some(node) => err.with_context("node", json!(node)),
                    None => err,
                };
                err.with_remediation("inspect the engine logs for the failing node")
            }
            EngineError::Unavailable(_) => {
                err.with_remediation("start the engine or fix its configured endpoint")
            }
            EngineError::Timeout(_) => err
                .with_remediation("raise dispatch_timeout_secs for long renders")
                .with_remediation("reduce resolution or batch size to shorten execution"),
        }
    }
}

/// The external node-graph execution engine, seen as an opaque, slow,
/// cancellable remote call. Production wires a real client; tests inject
/// fakes.
#[async_trait]
pub trait ExecutionEngine: Send + Sync + fmt::Debug {
    async fn execute(&self, request: DispatchRequest) -> Result<EngineResponse, EngineError>;
}
