//! Shared fixtures: a fake transport, a fake execution engine, and
//! manifest/graph builders used across the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use indexmap::IndexMap;
use serde_json::json;
use sha2::{Digest, Sha256};

use voiceloom::acquirer::{Fetched, Transport, TransportError};
use voiceloom::checksum::DigestAlgorithm;
use voiceloom::manifest::{Manifest, ModelArtifact, ModelRegistry};
use voiceloom::orchestrator::{DispatchRequest, EngineError, EngineResponse, ExecutionEngine};
use voiceloom::workflow::WorkflowGraph;

static TRACING: std::sync::Once = std::sync::Once::new();

/// Install a test subscriber once so `RUST_LOG` works during test runs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn artifact(name: &str, url: &str, payload: &[u8]) -> ModelArtifact {
    ModelArtifact {
        name: name.to_string(),
        kind: "checkpoint".to_string(),
        filename: format!("{name}.safetensors"),
        destination: String::new(),
        url: url.to_string(),
        size_bytes: payload.len() as u64,
        checksum: Some(sha256_hex(payload)),
        digest_algorithm: DigestAlgorithm::Sha256,
        version: None,
        description: None,
        required: true,
        priority: 3,
    }
}

pub fn registry_of(artifacts: Vec<ModelArtifact>) -> ModelRegistry {
    ModelRegistry::from_manifest(Manifest { models: artifacts }).expect("valid manifest")
}

/// Minimal valid graph referencing the given model filenames via loader
/// nodes, wired into a sampler chain.
pub fn graph_with_models(filenames: &[&str]) -> WorkflowGraph {
    let mut doc = serde_json::Map::new();
    for (i, filename) in filenames.iter().enumerate() {
        doc.insert(
            format!("loader_{i}"),
            json!({ "class_type": "CheckpointLoader", "inputs": { "ckpt_name": filename } }),
        );
    }
    doc.insert(
        "sampler".to_string(),
        json!({ "class_type": "KSampler", "inputs": { "model": ["loader_0", 0] } }),
    );
    serde_json::from_value(serde_json::Value::Object(doc)).expect("valid graph")
}

pub fn catalog() -> voiceloom::workflow::NodeCatalog {
    voiceloom::workflow::NodeCatalog::default()
        .with_type("CheckpointLoader", 3)
        .with_type("KSampler", 1)
        .with_type("VAEDecode", 1)
}

#[derive(Debug, Default)]
struct RemoteFile {
    payload: Vec<u8>,
    /// Fetches that fail with a network error before one succeeds.
    failures_remaining: AtomicU32,
}

/// In-memory transport. Counts fetches so tests can assert the
/// zero-network property of the skip-existing path.
#[derive(Debug, Default)]
pub struct FakeTransport {
    files: Mutex<HashMap<String, Arc<RemoteFile>>>,
    calls: AtomicU32,
    last_resume_from: AtomicU64,
    /// When false the server ignores range requests and restarts.
    pub supports_range: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            supports_range: true,
            ..Self::default()
        }
    }

    pub fn serve(&self, url: &str, payload: &[u8]) {
        self.serve_flaky(url, payload, 0);
    }

    /// Serve `payload` after failing the first `failures` fetches.
    pub fn serve_flaky(&self, url: &str, payload: &[u8], failures: u32) {
        self.files.lock().unwrap().insert(
            url.to_string(),
            Arc::new(RemoteFile {
                payload: payload.to_vec(),
                failures_remaining: AtomicU32::new(failures),
            }),
        );
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_resume_from(&self) -> u64 {
        self.last_resume_from.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, url: &str, resume_from: u64) -> Result<Fetched, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_resume_from.store(resume_from, Ordering::SeqCst);

        let file = self
            .files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status { status: 404 })?;

        let remaining = file.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            file.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Network("connection reset".to_string()));
        }

        let start = if self.supports_range {
            (resume_from as usize).min(file.payload.len())
        } else {
            0
        };
        let resumed_from = if self.supports_range { resume_from } else { 0 };
        let chunks: Vec<Result<Bytes, TransportError>> = file.payload[start..]
            .chunks(8 * 1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(Fetched {
            resumed_from,
            total_bytes: Some(file.payload.len() as u64),
            body: Box::pin(stream::iter(chunks)),
        })
    }
}

/// Serves one chunk and then goes quiet, like a connection that stopped
/// sending mid-transfer.
#[derive(Debug, Default)]
pub struct StallingTransport {
    first_chunk: Vec<u8>,
    calls: AtomicU32,
    last_resume_from: AtomicU64,
}

impl StallingTransport {
    pub fn new(first_chunk: &[u8]) -> Self {
        Self {
            first_chunk: first_chunk.to_vec(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_resume_from(&self) -> u64 {
        self.last_resume_from.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StallingTransport {
    async fn fetch(&self, _url: &str, resume_from: u64) -> Result<Fetched, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_resume_from.store(resume_from, Ordering::SeqCst);
        let head: Result<Bytes, TransportError> = Ok(Bytes::copy_from_slice(&self.first_chunk));
        Ok(Fetched {
            resumed_from: resume_from,
            total_bytes: None,
            body: Box::pin(stream::iter(vec![head]).chain(stream::pending())),
        })
    }
}

/// Records every dispatch in order and answers with one named output per
/// segment.
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub requests: Mutex<Vec<DispatchRequest>>,
    pub fail_with: Mutex<Option<String>>,
    pub warnings: Mutex<Vec<voiceloom::errors::StructuredError>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn execute(&self, request: DispatchRequest) -> Result<EngineResponse, EngineError> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(EngineError::Failed {
                message,
                node: Some("sampler".to_string()),
            });
        }
        let index = request.segment_index.unwrap_or(0);
        self.requests.lock().unwrap().push(request);

        let mut outputs = IndexMap::new();
        outputs.insert("audio".to_string(), PathBuf::from(format!("out/{index}.wav")));
        Ok(EngineResponse {
            outputs,
            warnings: self.warnings.lock().unwrap().drain(..).collect(),
        })
    }
}
