//! Resumable, retrying, checksum-verified acquisition of model artifacts.
//!
//! The acquirer is the only component in the crate that performs parallel
//! I/O. Workers run on a bounded pool, no two tasks may write the same
//! destination concurrently, and each artifact fails or succeeds on its
//! own: one bad model never aborts the batch.
//!
//! Transfers land in a `.part` file beside the destination and are renamed
//! into place only after the digest verifies. Interrupted transfers resume
//! from the partial file when the server honors range requests; corrupt
//! transfers are discarded and restarted from scratch.

mod task;
mod transport;

pub use task::{DownloadError, DownloadTask, TaskState};
pub use transport::{ByteStream, Fetched, HttpTransport, Transport, TransportError};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use rustc_hash::FxHashMap;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::{self, DigestError};
use crate::errors::{ErrorKind, StructuredError, ToStructured};
use crate::event_bus::{Event, EventEmitter};
use crate::manifest::{ModelArtifact, ModelRegistry};

use task::partial_path_for;

/// Tunables for acquisition. Defaults match the documented configuration
/// defaults in [`crate::config`].
#[derive(Clone, Debug)]
pub struct AcquireSettings {
    /// Total transfer attempts per artifact.
    pub max_retries: u32,
    /// Base delay between attempts; doubles each retry.
    pub retry_delay: Duration,
    /// Concurrent download workers.
    pub parallelism: usize,
    /// Deadline for a single chunk read.
    pub chunk_timeout: Duration,
    /// Deadline for one complete attempt.
    pub attempt_timeout: Duration,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            parallelism: 2,
            chunk_timeout: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

/// One artifact that ended in `Done`.
#[derive(Clone, Debug)]
pub struct ResolvedArtifact {
    pub name: String,
    pub path: PathBuf,
    pub attempts: u32,
    /// False when the artifact was already present and verified locally.
    pub downloaded: bool,
}

/// One artifact that ended in `Failed`.
#[derive(Clone, Debug)]
pub struct FailedArtifact {
    pub name: String,
    pub required: bool,
    pub error: StructuredError,
}

/// Aggregate result of a resolve pass.
#[derive(Clone, Debug, Default)]
pub struct ResolveOutcome {
    pub successes: Vec<ResolvedArtifact>,
    pub failures: Vec<FailedArtifact>,
}

impl ResolveOutcome {
    /// True when every required artifact resolved. Optional failures are
    /// reported but do not fail the pass.
    pub fn is_success(&self) -> bool {
        !self.failures.iter().any(|f| f.required)
    }
}

/// Local install state of one declared artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallState {
    Missing,
    /// Present on disk; no digest declared to verify against.
    Present,
    Verified,
    Corrupt,
}

#[derive(Clone, Debug)]
pub struct InstallStatus {
    pub name: String,
    pub path: PathBuf,
    pub state: InstallState,
}

/// Drives acquisition of artifacts against an injected [`Transport`].
#[derive(Clone, Debug)]
pub struct ModelAcquirer {
    transport: Arc<dyn Transport>,
    emitter: Arc<dyn EventEmitter>,
    engine_root: PathBuf,
    settings: AcquireSettings,
    // Destination-keyed exclusion: two tasks may never write the same path.
    locks: Arc<Mutex<FxHashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ModelAcquirer {
    pub fn new(
        transport: Arc<dyn Transport>,
        emitter: Arc<dyn EventEmitter>,
        engine_root: impl Into<PathBuf>,
        settings: AcquireSettings,
    ) -> Self {
        Self {
            transport,
            emitter,
            engine_root: engine_root.into(),
            settings,
            locks: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Resolve every artifact in `required`, downloading as needed. Tasks
    /// run on a pool bounded by `parallelism`; results come back in the
    /// input order regardless of completion order.
    pub async fn resolve(
        &self,
        required: Vec<ModelArtifact>,
        skip_existing: bool,
        force: bool,
        cancel: &CancellationToken,
    ) -> ResolveOutcome {
        let semaphore = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let mut join_set = JoinSet::new();

        for (index, artifact) in required.into_iter().enumerate() {
            let acquirer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                // Closed semaphore is unreachable; it lives as long as the set.
                let _permit = semaphore.acquire_owned().await;
                let result = acquirer
                    .resolve_one(artifact.clone(), skip_existing, force, &cancel)
                    .await;
                (index, artifact, result)
            });
        }

        let mut ordered: Vec<(usize, ModelArtifact, Result<ResolvedArtifact, StructuredError>)> =
            Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => ordered.push(entry),
                Err(join_err) => {
                    warn!(error = %join_err, "download worker panicked");
                }
            }
        }
        ordered.sort_by_key(|(index, _, _)| *index);

        let mut outcome = ResolveOutcome::default();
        for (_, artifact, result) in ordered {
            match result {
                Ok(resolved) => outcome.successes.push(resolved),
                Err(error) => {
                    self.emit(Event::warning(&artifact.name, error.clone()));
                    outcome.failures.push(FailedArtifact {
                        name: artifact.name,
                        required: artifact.required,
                        error,
                    });
                }
            }
        }
        outcome
    }

    async fn resolve_one(
        &self,
        artifact: ModelArtifact,
        skip_existing: bool,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<ResolvedArtifact, StructuredError> {
        let destination = artifact.resolved_destination(&self.engine_root);
        let lock = self.lock_for(&destination);
        let _guard = lock.lock().await;

        let mut task = DownloadTask::new(artifact, destination);

        if !force && skip_existing && task.destination.exists() {
            match self.verify_existing(&task).await? {
                true => {
                    debug!(artifact = %task.artifact.name, "local file verified, skipping download");
                    task.state = TaskState::Done;
                    return Ok(ResolvedArtifact {
                        name: task.artifact.name.clone(),
                        path: task.destination.clone(),
                        attempts: 0,
                        downloaded: false,
                    });
                }
                false => {
                    warn!(artifact = %task.artifact.name, "local file failed verification, re-downloading");
                    let _ = tokio::fs::remove_file(&task.destination).await;
                }
            }
        } else if force && task.destination.exists() {
            let _ = tokio::fs::remove_file(&task.destination).await;
        }

        let mut last_cause = String::from("no attempts made");
        while task.attempts < self.settings.max_retries {
            if cancel.is_cancelled() {
                task.state = TaskState::Failed;
                return Err(cancelled_error(&task.artifact.name));
            }
            if task.attempts > 0 {
                let backoff = self
                    .settings
                    .retry_delay
                    .saturating_mul(2u32.saturating_pow(task.attempts - 1));
                tokio::time::sleep(backoff).await;
            }
            task.attempts += 1;
            task.state = TaskState::InProgress;

            let attempt = tokio::time::timeout(
                self.settings.attempt_timeout,
                self.download_attempt(&mut task, cancel),
            )
            .await;

            match attempt {
                Ok(Ok(())) => {
                    task.state = TaskState::Verifying;
                    match self.verify_partial(&task).await? {
                        true => {
                            self.finalize(&task).await.map_err(|e| {
                                io_failure(&task.artifact.name, task.attempts, &e)
                            })?;
                            task.state = TaskState::Done;
                            info!(
                                artifact = %task.artifact.name,
                                attempts = task.attempts,
                                "artifact acquired"
                            );
                            return Ok(ResolvedArtifact {
                                name: task.artifact.name.clone(),
                                path: task.destination.clone(),
                                attempts: task.attempts,
                                downloaded: true,
                            });
                        }
                        false => {
                            // Corrupt partial data is never reused.
                            let _ = tokio::fs::remove_file(task.partial_path()).await;
                            task.bytes_transferred = 0;
                            last_cause = "checksum mismatch after transfer".to_string();
                            debug!(
                                artifact = %task.artifact.name,
                                attempt = task.attempts,
                                "checksum mismatch, restarting from scratch"
                            );
                        }
                    }
                }
                Ok(Err(AttemptFailure::Cancelled)) => {
                    task.state = TaskState::Failed;
                    return Err(cancelled_error(&task.artifact.name));
                }
                Ok(Err(AttemptFailure::Transfer(cause))) => {
                    last_cause = cause;
                    debug!(
                        artifact = %task.artifact.name,
                        attempt = task.attempts,
                        cause = %last_cause,
                        "transfer attempt failed"
                    );
                }
                Err(_) => {
                    last_cause = format!(
                        "attempt exceeded {:?} deadline",
                        self.settings.attempt_timeout
                    );
                }
            }
        }

        task.state = TaskState::Failed;
        Err(DownloadError {
            name: task.artifact.name.clone(),
            attempts: task.attempts,
            cause: last_cause,
        }
        .to_structured())
    }

    /// One streaming attempt into the partial file. On success the partial
    /// file holds the complete resource, unverified.
    async fn download_attempt(
        &self,
        task: &mut DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptFailure> {
        let partial = task.partial_path();
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AttemptFailure::Transfer(e.to_string()))?;
        }

        let existing = match tokio::fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let fetched = self
            .transport
            .fetch(&task.artifact.url, existing)
            .await
            .map_err(|e| AttemptFailure::Transfer(e.to_string()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(fetched.resumed_from > 0)
            .truncate(fetched.resumed_from == 0)
            .open(&partial)
            .await
            .map_err(|e| AttemptFailure::Transfer(e.to_string()))?;

        task.bytes_transferred = fetched.resumed_from;
        let total = fetched.total_bytes.or_else(|| {
            (task.artifact.size_bytes > 0).then_some(task.artifact.size_bytes)
        });

        let mut body = fetched.body;
        loop {
            if cancel.is_cancelled() {
                // Flush what we have; the partial file stays resumable.
                let _ = file.flush().await;
                return Err(AttemptFailure::Cancelled);
            }
            let chunk = match tokio::time::timeout(self.settings.chunk_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(AttemptFailure::Transfer(e.to_string())),
                Ok(None) => break,
                Err(_) => {
                    return Err(AttemptFailure::Transfer(format!(
                        "chunk read exceeded {:?} deadline",
                        self.settings.chunk_timeout
                    )));
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptFailure::Transfer(e.to_string()))?;
            task.bytes_transferred += chunk.len() as u64;
            self.emit(Event::progress(
                &task.artifact.name,
                task.bytes_transferred,
                total,
            ));
        }

        file.flush()
            .await
            .map_err(|e| AttemptFailure::Transfer(e.to_string()))?;
        Ok(())
    }

    async fn finalize(&self, task: &DownloadTask) -> std::io::Result<()> {
        tokio::fs::rename(task.partial_path(), &task.destination).await
    }

    /// Digest check of the finished partial file. `Ok(false)` is a normal
    /// mismatch; unsupported algorithms fail fast without retry.
    async fn verify_partial(&self, task: &DownloadTask) -> Result<bool, StructuredError> {
        self.verify_path(task, task.partial_path()).await
    }

    async fn verify_existing(&self, task: &DownloadTask) -> Result<bool, StructuredError> {
        self.verify_path(task, task.destination.clone()).await
    }

    async fn verify_path(
        &self,
        task: &DownloadTask,
        path: PathBuf,
    ) -> Result<bool, StructuredError> {
        let Some(expected) = task.artifact.checksum.clone() else {
            // Optional artifacts may omit a digest; presence is enough.
            return Ok(true);
        };
        let algorithm = task.artifact.digest_algorithm;
        let name = task.artifact.name.clone();
        let verified = tokio::task::spawn_blocking(move || {
            checksum::verify(&path, &expected, algorithm)
        })
        .await
        .map_err(|e| {
            StructuredError::new(ErrorKind::ModelDownload, e.to_string())
                .with_context("artifact", json!(name.clone()))
        })?;
        match verified {
            Ok(matched) => Ok(matched),
            Err(err @ DigestError::Unsupported { .. }) => Err(err.to_structured()),
            Err(err) => Ok({
                debug!(artifact = %task.artifact.name, error = %err, "digest read failed");
                false
            }),
        }
    }

    /// Install state of every declared artifact, without any network access.
    pub async fn check_installed(&self, registry: &ModelRegistry) -> Vec<InstallStatus> {
        let mut statuses = Vec::with_capacity(registry.len());
        for artifact in registry.all() {
            let path = artifact.resolved_destination(&self.engine_root);
            let state = if !path.exists() {
                InstallState::Missing
            } else {
                match &artifact.checksum {
                    None => InstallState::Present,
                    Some(expected) => {
                        let expected = expected.clone();
                        let algorithm = artifact.digest_algorithm;
                        let target = path.clone();
                        let verified = tokio::task::spawn_blocking(move || {
                            checksum::verify(&target, &expected, algorithm)
                        })
                        .await;
                        match verified {
                            Ok(Ok(true)) => InstallState::Verified,
                            _ => InstallState::Corrupt,
                        }
                    }
                }
            };
            statuses.push(InstallStatus {
                name: artifact.name.clone(),
                path,
                state,
            });
        }
        statuses
    }

    /// Remove leftover `.part` files for the registry's artifacts. Returns
    /// how many files were deleted.
    pub async fn cleanup_partials(&self, registry: &ModelRegistry) -> u32 {
        let mut removed = 0;
        for artifact in registry.all() {
            let partial = partial_path_for(&artifact.resolved_destination(&self.engine_root));
            if tokio::fs::remove_file(&partial).await.is_ok() {
                debug!(path = %partial.display(), "removed stale partial download");
                removed += 1;
            }
        }
        removed
    }

    fn lock_for(&self, destination: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry(destination.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn emit(&self, event: Event) {
        if let Err(err) = self.emitter.emit(event) {
            debug!(error = %err, "event sink unavailable");
        }
    }
}

enum AttemptFailure {
    Transfer(String),
    Cancelled,
}

fn cancelled_error(artifact: &str) -> StructuredError {
    StructuredError::new(
        ErrorKind::Cancelled,
        format!("acquisition of {artifact} cancelled"),
    )
    .with_context("artifact", json!(artifact))
    .with_remediation("re-run resolve; the partial file resumes where it stopped")
}

fn io_failure(artifact: &str, attempts: u32, err: &std::io::Error) -> StructuredError {
    DownloadError {
        name: artifact.to_string(),
        attempts,
        cause: err.to_string(),
    }
    .to_structured()
}
