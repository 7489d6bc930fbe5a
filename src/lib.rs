//! # Voiceloom: Orchestration Core for Media-Generation Pipelines
//!
//! Voiceloom coordinates multi-stage media generation (text-to-speech,
//! lip-sync, video assembly) executed by an external node-graph engine.
//! The engine and the ML models stay external; this crate owns everything
//! that makes a run reliable on constrained hardware:
//!
//! - **Model acquisition**: resumable, retrying, checksum-verified
//!   downloads of the artifacts a workflow needs, with partial-failure
//!   isolation across artifacts.
//! - **Graph validation**: a full-report static check of the declarative
//!   workflow graph before anything is dispatched.
//! - **Resource gating**: a pure VRAM estimate compared against declared
//!   capacity, with an explicit override.
//! - **Text segmentation**: punctuation-aware splitting of long narration
//!   into bounded, overlapping segments.
//!
//! Every failure crosses the crate boundary as a [`errors::StructuredError`]
//! carrying a stable kind tag, context fields, and suggested remediations.
//! Progress is reported as structured [`event_bus::Event`]s; the crate
//! never formats log lines for its consumers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio_util::sync::CancellationToken;
//! use voiceloom::acquirer::{HttpTransport, ModelAcquirer};
//! use voiceloom::config::PipelineConfig;
//! use voiceloom::event_bus::{EventBus, StdOutSink};
//! use voiceloom::manifest::{Manifest, ModelRegistry};
//! use voiceloom::orchestrator::PipelineOrchestrator;
//! use voiceloom::workflow::{NodeCatalog, WorkflowGraph};
//!
//! # async fn demo(engine: Arc<dyn voiceloom::orchestrator::ExecutionEngine>) -> miette::Result<()> {
//! let config = PipelineConfig::default().with_env_overrides();
//! let manifest = Manifest::from_json_str(&std::fs::read_to_string("models.json").unwrap())
//!     .map_err(|e| miette::miette!(e.to_string()))?;
//! let registry = ModelRegistry::from_manifest(manifest)
//!     .map_err(|e| miette::miette!(e.to_string()))?;
//!
//! let bus = EventBus::with_sink(StdOutSink);
//! bus.listen();
//! let emitter = Arc::new(bus.emitter());
//!
//! let transport = Arc::new(HttpTransport::new(Duration::from_secs(10)).unwrap());
//! let acquirer = ModelAcquirer::new(
//!     transport,
//!     emitter.clone(),
//!     config.engine_root.clone(),
//!     config.acquire_settings(),
//! );
//!
//! let catalog = NodeCatalog::default()
//!     .with_type("CheckpointLoader", 3)
//!     .with_type("KSampler", 1);
//! let graph = WorkflowGraph::from_json_str(
//!     &std::fs::read_to_string("workflow.json").unwrap(),
//! )
//! .map_err(|e| miette::miette!(e.to_string()))?;
//!
//! let orchestrator =
//!     PipelineOrchestrator::new(config, registry, catalog, acquirer, engine, emitter);
//! let cancel = CancellationToken::new();
//! let result = orchestrator.run(graph, "Hello, world.", &cancel).await;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod acquirer;
pub mod checksum;
pub mod config;
pub mod errors;
pub mod estimator;
pub mod event_bus;
pub mod manifest;
pub mod orchestrator;
pub mod segmenter;
pub mod workflow;
