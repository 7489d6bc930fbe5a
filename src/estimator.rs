//! VRAM footprint estimation and the capacity gate in front of dispatch.
//!
//! Estimation is a pure function over the validated graph, the registry's
//! per-artifact hints, and the render settings. It never queries hardware;
//! the declared capacity arrives from configuration and the gate merely
//! compares numbers.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::errors::{ErrorKind, StructuredError, ToStructured};
use crate::manifest::{ModelArtifact, ModelRegistry};
use crate::workflow::WorkflowGraph;

/// Fixed cost of the engine process itself before any model loads.
const BASE_ENGINE_OVERHEAD_MB: u64 = 1024;

/// Bytes of working memory per pixel per batch item in the video stage,
/// covering latents plus decode buffers.
const VIDEO_BYTES_PER_PIXEL: u64 = 24;

/// Numeric precision the engine is asked to run models at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Full,
    Half,
}

/// Render settings that influence the memory estimate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimateSettings {
    pub precision: Precision,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
}

impl Default for EstimateSettings {
    fn default() -> Self {
        Self {
            precision: Precision::Full,
            width: 512,
            height: 512,
            batch_size: 1,
        }
    }
}

/// Outcome of estimation, compared against declared capacity by the gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub declared_capacity_mb: u64,
    pub estimated_usage_mb: u64,
}

impl ResourceBudget {
    pub fn margin_mb(&self) -> i64 {
        self.declared_capacity_mb as i64 - self.estimated_usage_mb as i64
    }

    pub fn fits(&self) -> bool {
        self.estimated_usage_mb <= self.declared_capacity_mb
    }
}

/// Estimated usage would exceed what the hardware declares.
#[derive(Debug, Error, Diagnostic)]
#[error("estimated VRAM usage {required_mb} MB exceeds declared capacity {available_mb} MB")]
#[diagnostic(
    code(voiceloom::estimator::insufficient),
    help(
        "Lower the resolution or batch size, switch to half precision, or set the capacity override if you accept the risk of the engine running out of memory."
    )
)]
pub struct CapacityError {
    pub required_mb: u64,
    pub available_mb: u64,
}

impl ToStructured for CapacityError {
    fn to_structured(&self) -> StructuredError {
        StructuredError::new(ErrorKind::VramInsufficient, self.to_string())
            .with_context("required_mb", json!(self.required_mb))
            .with_context("available_mb", json!(self.available_mb))
            .with_remediations([
                "reduce width, height, or batch_size".to_string(),
                "switch precision to half".to_string(),
                "set allow_capacity_override to proceed anyway".to_string(),
            ])
    }
}

/// Nominal resident footprint of one loaded artifact at full precision, in MB.
/// Kind hints cover the stages this pipeline ships; anything else falls back
/// to the declared file size (weights roughly equal resident memory).
fn nominal_footprint_mb(artifact: &ModelArtifact) -> u64 {
    match artifact.kind.as_str() {
        "tts" | "xtts" => 2048,
        "lipsync" | "latentsync" => 5120,
        "checkpoint" => 4096,
        "vae" => 512,
        "controlnet" => 1536,
        "lora" => 256,
        _ => (artifact.size_bytes / (1024 * 1024)).max(256),
    }
}

/// Sum of base engine overhead, per-active-model footprints, and the video
/// stage's resolution/batch term. Pure; identical inputs always produce an
/// identical budget.
pub fn estimate(
    graph: &WorkflowGraph,
    registry: &ModelRegistry,
    settings: &EstimateSettings,
    declared_capacity_mb: u64,
) -> ResourceBudget {
    let mut usage = BASE_ENGINE_OVERHEAD_MB;

    for artifact in registry.required_for(graph) {
        let nominal = nominal_footprint_mb(artifact);
        usage += match settings.precision {
            Precision::Full => nominal,
            Precision::Half => nominal / 2,
        };
    }

    let pixels = settings.width as u64 * settings.height as u64 * settings.batch_size as u64;
    usage += pixels * VIDEO_BYTES_PER_PIXEL / (1024 * 1024);

    ResourceBudget {
        declared_capacity_mb,
        estimated_usage_mb: usage,
    }
}

/// Gate in front of dispatch. With `allow_override` the caller proceeds at
/// their own risk and is expected to surface the returned budget as a
/// warning.
pub fn check_capacity(budget: &ResourceBudget, allow_override: bool) -> Result<(), CapacityError> {
    if budget.fits() || allow_override {
        Ok(())
    } else {
        Err(CapacityError {
            required_mb: budget.estimated_usage_mb,
            available_mb: budget.declared_capacity_mb,
        })
    }
}
