use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::StructuredError;
use crate::orchestrator::RunStage;

/// Structured observability event emitted by pipeline components.
///
/// The core never formats human-readable log lines for its consumers; it
/// emits these events and leaves rendering to whatever sink is attached
/// (terminal progress bar, JSON log shipper, test collector).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    /// Orchestrator run entered a new stage.
    Stage(StageEvent),
    /// Bytes moved for one artifact download.
    Progress(ProgressEvent),
    /// Non-fatal condition the operator should see (e.g. capacity override).
    Warning(WarningEvent),
    /// Internal diagnostic breadcrumb, mostly for debugging test runs.
    Diagnostic(DiagnosticEvent),
}

impl Event {
    pub fn stage(run_id: impl Into<String>, stage: RunStage) -> Self {
        Event::Stage(StageEvent {
            run_id: run_id.into(),
            stage,
            at: Utc::now(),
        })
    }

    pub fn progress(
        artifact: impl Into<String>,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
    ) -> Self {
        Event::Progress(ProgressEvent {
            artifact: artifact.into(),
            bytes_transferred,
            total_bytes,
            at: Utc::now(),
        })
    }

    pub fn warning(scope: impl Into<String>, error: StructuredError) -> Self {
        Event::Warning(WarningEvent {
            scope: scope.into(),
            error,
            at: Utc::now(),
        })
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    pub fn scope_label(&self) -> &str {
        match self {
            Event::Stage(_) => "stage",
            Event::Progress(_) => "progress",
            Event::Warning(w) => &w.scope,
            Event::Diagnostic(d) => &d.scope,
        }
    }

    /// Normalized JSON schema for log shippers:
    /// `{ "type", "scope", "payload" }`.
    pub fn to_json_value(&self) -> Value {
        let (event_type, payload) = match self {
            Event::Stage(s) => (
                "stage",
                json!({ "run_id": s.run_id, "stage": s.stage, "timestamp": s.at.to_rfc3339() }),
            ),
            Event::Progress(p) => (
                "progress",
                json!({
                    "artifact": p.artifact,
                    "bytes_transferred": p.bytes_transferred,
                    "total_bytes": p.total_bytes,
                    "timestamp": p.at.to_rfc3339(),
                }),
            ),
            Event::Warning(w) => (
                "warning",
                json!({ "error": w.error, "timestamp": w.at.to_rfc3339() }),
            ),
            Event::Diagnostic(d) => ("diagnostic", json!({ "message": d.message })),
        };
        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "payload": payload,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Stage(s) => write!(f, "[{}] stage -> {}", s.run_id, s.stage),
            Event::Progress(p) => match p.total_bytes {
                Some(total) => {
                    write!(f, "[{}] {}/{} bytes", p.artifact, p.bytes_transferred, total)
                }
                None => write!(f, "[{}] {} bytes", p.artifact, p.bytes_transferred),
            },
            Event::Warning(w) => write!(f, "[{}] warning: {}", w.scope, w.error),
            Event::Diagnostic(d) => write!(f, "[{}] {}", d.scope, d.message),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageEvent {
    pub run_id: String,
    pub stage: RunStage,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub artifact: String,
    pub bytes_transferred: u64,
    /// `None` when the remote source did not advertise a content length.
    pub total_bytes: Option<u64>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WarningEvent {
    pub scope: String,
    pub error: StructuredError,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
}
