//! Top-level run coordination.
//!
//! One run walks a fixed state machine:
//! `Created -> Validating -> ResolvingModels -> EstimatingResources ->
//! (Segmenting) -> Dispatching -> Completed | Failed`.
//!
//! Validation happens before any network or compute side effect; models
//! are resolved only for artifacts the validated graph actually uses; the
//! capacity gate sits in front of dispatch; and long text is segmented and
//! dispatched strictly in order so narration never arrives shuffled.
//! Cancellation is cooperative and checked at every state boundary.

mod engine;

pub use engine::{DispatchRequest, EngineError, EngineResponse, ExecutionEngine};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::acquirer::ModelAcquirer;
use crate::config::PipelineConfig;
use crate::errors::{ErrorKind, StructuredError, ToStructured};
use crate::estimator::{self, EstimateSettings};
use crate::event_bus::{Event, EventEmitter};
use crate::manifest::ModelRegistry;
use crate::segmenter::{self, TextSegment};
use crate::workflow::{self, NodeCatalog, WorkflowGraph};

/// Stage of a run's state machine. Emitted with every transition so sinks
/// can render run progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Created,
    Validating,
    ResolvingModels,
    EstimatingResources,
    Segmenting,
    Dispatching,
    Completed,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStage::Created => "created",
            RunStage::Validating => "validating",
            RunStage::ResolvingModels => "resolving_models",
            RunStage::EstimatingResources => "estimating_resources",
            RunStage::Segmenting => "segmenting",
            RunStage::Dispatching => "dispatching",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Terminal status of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Primary outputs exist but an optional step failed along the way.
    /// Advisory warnings alone, such as a capacity override, do not
    /// downgrade a run.
    PartialFailure,
    Failed,
}

/// What a completed run produced.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub status: RunStatus,
    /// Named output to artifact path. Multi-segment runs prefix names with
    /// the segment index so outputs concatenate in order.
    pub outputs: IndexMap<String, PathBuf>,
    pub duration: Duration,
    /// Non-fatal problems encountered, in occurrence order.
    pub errors: Vec<StructuredError>,
}

/// Coordinates one pipeline run end to end. Construct once per process;
/// each [`run`](PipelineOrchestrator::run) call is an independent run with
/// its own id.
#[derive(Debug)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    registry: ModelRegistry,
    catalog: NodeCatalog,
    acquirer: ModelAcquirer,
    engine: Arc<dyn ExecutionEngine>,
    emitter: Arc<dyn EventEmitter>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        registry: ModelRegistry,
        catalog: NodeCatalog,
        acquirer: ModelAcquirer,
        engine: Arc<dyn ExecutionEngine>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            config,
            registry,
            catalog,
            acquirer,
            engine,
            emitter,
        }
    }

    /// Execute one run. `Ok` is the `Completed` terminal (`Success` or
    /// `PartialFailure`); `Err` is the `Failed` terminal carrying the
    /// triggering error.
    pub async fn run(
        &self,
        graph: WorkflowGraph,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, StructuredError> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut warnings: Vec<StructuredError> = Vec::new();
        // True once an optional step fails; advisory warnings leave it alone.
        let mut degraded = false;

        self.emit_stage(&run_id, RunStage::Created);
        info!(run_id = %run_id, nodes = graph.len(), "run created");

        // Validating: no side effects before the graph proves out.
        self.enter(&run_id, RunStage::Validating, cancel)?;
        let report = workflow::validate(&graph, &self.catalog, &self.registry);
        if !report.is_valid() {
            return Err(self.fail(&run_id, validation_failure(&report)));
        }

        // ResolvingModels: only artifacts the graph actually references.
        self.enter(&run_id, RunStage::ResolvingModels, cancel)?;
        let required: Vec<_> = self
            .registry
            .required_for(&graph)
            .into_iter()
            .cloned()
            .collect();
        let outcome = self
            .acquirer
            .resolve(required, self.config.skip_existing, false, cancel)
            .await;
        if !outcome.is_success() {
            let error = resolve_failure(&outcome.failures);
            return Err(self.fail(&run_id, error));
        }
        for failure in &outcome.failures {
            // Optional artifacts only; required failures returned above.
            warnings.push(failure.error.clone());
            degraded = true;
        }
        let model_paths: IndexMap<String, PathBuf> = outcome
            .successes
            .iter()
            .filter_map(|resolved| {
                self.registry
                    .get(&resolved.name)
                    .map(|artifact| (artifact.filename.clone(), resolved.path.clone()))
            })
            .collect();

        // EstimatingResources: the gate in front of any compute.
        self.enter(&run_id, RunStage::EstimatingResources, cancel)?;
        let settings = EstimateSettings {
            precision: self.config.precision,
            width: self.config.width,
            height: self.config.height,
            batch_size: self.config.batch_size,
        };
        let budget = estimator::estimate(
            &graph,
            &self.registry,
            &settings,
            self.config.vram_capacity_mb,
        );
        match estimator::check_capacity(&budget, self.config.allow_capacity_override) {
            Ok(()) if !budget.fits() => {
                let warning = estimator::CapacityError {
                    required_mb: budget.estimated_usage_mb,
                    available_mb: budget.declared_capacity_mb,
                }
                .to_structured();
                warn!(
                    run_id = %run_id,
                    required_mb = budget.estimated_usage_mb,
                    available_mb = budget.declared_capacity_mb,
                    "capacity override in effect"
                );
                self.emit(Event::warning("capacity", warning.clone()));
                warnings.push(warning);
            }
            Ok(()) => {}
            Err(err) => return Err(self.fail(&run_id, err.to_structured())),
        }

        // Segmenting: entered only when the text exceeds one segment.
        let segments = if text.chars().count() > self.config.max_chars_per_segment {
            self.enter(&run_id, RunStage::Segmenting, cancel)?;
            match segmenter::segment(text, &self.config.segmenter_options()) {
                Ok(segments) => segments,
                Err(err) => return Err(self.fail(&run_id, err.to_structured())),
            }
        } else {
            vec![TextSegment {
                index: 0,
                content: text.to_string(),
                overlap_with_previous_chars: 0,
            }]
        };

        // Dispatching: segments go out strictly in order; segment N+1 is
        // submitted only after N's outputs are back.
        self.enter(&run_id, RunStage::Dispatching, cancel)?;
        let multi_segment = segments.len() > 1;
        let mut outputs: IndexMap<String, PathBuf> = IndexMap::new();
        for segment in segments {
            if cancel.is_cancelled() {
                return Err(self.fail(&run_id, cancelled(&run_id)));
            }
            let request = DispatchRequest {
                graph: graph.clone(),
                text: segment.content.clone(),
                model_paths: model_paths.clone(),
                segment_index: multi_segment.then_some(segment.index),
            };
            let response = tokio::time::timeout(
                self.config.dispatch_timeout(),
                self.engine.execute(request),
            )
            .await
            .unwrap_or(Err(EngineError::Timeout(self.config.dispatch_timeout())));
            match response {
                Ok(response) => {
                    for (name, path) in response.outputs {
                        let key = if multi_segment {
                            format!("segment_{:03}/{name}", segment.index)
                        } else {
                            name
                        };
                        outputs.insert(key, path);
                    }
                    if !response.warnings.is_empty() {
                        degraded = true;
                    }
                    warnings.extend(response.warnings);
                }
                Err(err) => return Err(self.fail(&run_id, err.to_structured())),
            }
        }

        self.emit_stage(&run_id, RunStage::Completed);
        let status = if degraded {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        };
        info!(run_id = %run_id, ?status, outputs = outputs.len(), "run completed");
        Ok(ExecutionResult {
            status,
            outputs,
            duration: started.elapsed(),
            errors: warnings,
        })
    }

    /// Transition into `stage`, honoring cancellation at the boundary.
    fn enter(
        &self,
        run_id: &str,
        stage: RunStage,
        cancel: &CancellationToken,
    ) -> Result<(), StructuredError> {
        if cancel.is_cancelled() {
            return Err(self.fail(run_id, cancelled(run_id)));
        }
        self.emit_stage(run_id, stage);
        Ok(())
    }

    fn fail(&self, run_id: &str, error: StructuredError) -> StructuredError {
        warn!(run_id = %run_id, error = %error, "run failed");
        self.emit_stage(run_id, RunStage::Failed);
        error
    }

    fn emit_stage(&self, run_id: &str, stage: RunStage) {
        self.emit(Event::stage(run_id, stage));
    }

    fn emit(&self, event: Event) {
        if let Err(err) = self.emitter.emit(event) {
            tracing::debug!(error = %err, "event sink unavailable");
        }
    }
}

fn cancelled(run_id: &str) -> StructuredError {
    StructuredError::new(ErrorKind::Cancelled, format!("run {run_id} cancelled"))
        .with_context("run_id", json!(run_id))
}

fn validation_failure(report: &workflow::ValidationReport) -> StructuredError {
    let first_kind = report
        .violations
        .first()
        .map(|v| v.kind())
        .unwrap_or(ErrorKind::UnknownNodeType);
    StructuredError::new(
        first_kind,
        format!(
            "workflow validation failed with {} violation(s)",
            report.violations.len()
        ),
    )
    .with_context("violations", json!(report.to_structured()))
    .with_remediation("fix every reported violation; nothing was dispatched")
}

fn resolve_failure(failures: &[crate::acquirer::FailedArtifact]) -> StructuredError {
    let required: Vec<_> = failures.iter().filter(|f| f.required).collect();
    let names: Vec<&str> = required.iter().map(|f| f.name.as_str()).collect();
    StructuredError::new(
        ErrorKind::ModelDownload,
        format!(
            "{} required artifact(s) could not be acquired: {}",
            required.len(),
            names.join(", ")
        ),
    )
    .with_context(
        "failures",
        json!(required.iter().map(|f| &f.error).collect::<Vec<_>>()),
    )
    .with_remediation("inspect each artifact failure; optional artifacts did not block the run")
}
