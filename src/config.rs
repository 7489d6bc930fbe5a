//! Validated pipeline configuration with documented defaults.
//!
//! Configuration arrives as JSON (or is constructed programmatically) and
//! deserializes into named, typed fields. Unknown keys fail validation
//! instead of being silently ignored. A handful of operational knobs can
//! also be overridden through the environment, resolved once at load.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acquirer::AcquireSettings;
use crate::estimator::Precision;
use crate::segmenter::SegmenterOptions;

/// Top-level configuration for a pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Root directory of the execution engine; model destinations are
    /// relative to this. Default: `./engine`.
    pub engine_root: PathBuf,
    /// Declared VRAM capacity in MB. Default: 8192.
    pub vram_capacity_mb: u64,
    /// Numeric precision requested from the engine. Default: full.
    pub precision: Precision,
    /// Proceed past the capacity gate when estimation exceeds capacity.
    /// Default: false.
    pub allow_capacity_override: bool,
    /// Run on CPU when no GPU capacity is declared. Default: false.
    pub cpu_fallback: bool,
    /// Output width in pixels. Default: 512.
    pub width: u32,
    /// Output height in pixels. Default: 512.
    pub height: u32,
    /// Frames processed per engine batch. Default: 1.
    pub batch_size: u32,
    /// Text longer than this is segmented before dispatch. Default: 500.
    pub max_chars_per_segment: usize,
    /// Characters of overlap carried into each following segment.
    /// Default: 50.
    pub overlap_chars: usize,
    /// Total download attempts per artifact. Default: 3.
    pub max_retries: u32,
    /// Base seconds between download attempts; doubles per retry.
    /// Default: 2.
    pub retry_delay_secs: u64,
    /// Concurrent download workers. Default: 2.
    pub download_parallelism: usize,
    /// Deadline in seconds for a single chunk read. Default: 30.
    pub chunk_timeout_secs: u64,
    /// Deadline in seconds for one complete download attempt. Default: 600.
    pub attempt_timeout_secs: u64,
    /// Deadline in seconds for the external engine dispatch. Default: 3600.
    pub dispatch_timeout_secs: u64,
    /// Skip downloads when a verified local copy exists. Default: true.
    pub skip_existing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine_root: PathBuf::from("./engine"),
            vram_capacity_mb: 8192,
            precision: Precision::Full,
            allow_capacity_override: false,
            cpu_fallback: false,
            width: 512,
            height: 512,
            batch_size: 1,
            max_chars_per_segment: 500,
            overlap_chars: 50,
            max_retries: 3,
            retry_delay_secs: 2,
            download_parallelism: 2,
            chunk_timeout_secs: 30,
            attempt_timeout_secs: 600,
            dispatch_timeout_secs: 3600,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("configuration is not valid")]
    #[diagnostic(
        code(voiceloom::config::parse),
        help("Unknown keys are rejected; compare against the documented fields.")
    )]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(voiceloom::config::invalid))]
    Invalid(String),
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VOICELOOM_*` environment overrides on top of this config.
    /// Loads `.env` once, same as the rest of the process.
    pub fn with_env_overrides(mut self) -> Self {
        dotenvy::dotenv().ok();
        if let Ok(root) = std::env::var("VOICELOOM_ENGINE_ROOT") {
            self.engine_root = PathBuf::from(root);
        }
        if let Some(capacity) = env_parse("VOICELOOM_VRAM_CAPACITY_MB") {
            self.vram_capacity_mb = capacity;
        }
        if let Some(parallelism) = env_parse("VOICELOOM_DOWNLOAD_PARALLELISM") {
            self.download_parallelism = parallelism;
        }
        if let Some(retries) = env_parse("VOICELOOM_MAX_RETRIES") {
            self.max_retries = retries;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chars_per_segment == 0 {
            return Err(ConfigError::Invalid(
                "max_chars_per_segment must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars_per_segment {
            return Err(ConfigError::Invalid(format!(
                "overlap_chars ({}) must be smaller than max_chars_per_segment ({})",
                self.overlap_chars, self.max_chars_per_segment
            )));
        }
        if self.download_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "download_parallelism must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 || self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(
                "width, height, and batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn acquire_settings(&self) -> AcquireSettings {
        AcquireSettings {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            parallelism: self.download_parallelism,
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    pub fn segmenter_options(&self) -> SegmenterOptions {
        SegmenterOptions {
            max_chars: self.max_chars_per_segment,
            overlap_chars: self.overlap_chars,
            ..SegmenterOptions::default()
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = r#"{ "vram_capacity_mb": 4096, "graphics_card": "big" }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overlap_must_be_smaller_than_segment() {
        let raw = r#"{ "max_chars_per_segment": 50, "overlap_chars": 50 }"#;
        assert!(matches!(
            PipelineConfig::from_json_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = PipelineConfig::from_json_str(r#"{ "vram_capacity_mb": 24576 }"#).unwrap();
        assert_eq!(config.vram_capacity_mb, 24576);
        assert_eq!(config.download_parallelism, 2);
        assert!(config.skip_existing);
    }
}
