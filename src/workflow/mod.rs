//! Declarative workflow graphs and their static validation.
//!
//! A graph is the wire-format mapping of node-id to node spec that the
//! external execution engine consumes. Nothing here executes nodes; this
//! module only parses the structure and proves it is safe to hand over:
//! references resolve, the graph is acyclic, every node class is known to
//! the engine, and every model filename it mentions is declared.

mod graph;
mod validator;

pub use graph::{GraphParseError, InputValue, NodeSpec, WorkflowGraph, MODEL_FILE_EXTENSIONS};
pub use validator::{validate, NodeCatalog, ValidationReport, Violation};
