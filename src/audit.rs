use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::model::Distance;
use crate::util::{ensure_directory, now_utc_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Accept,
    Reject,
}

/// One audit line: a single accept/reject decision made by a pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub stage: String,
    pub decision: AuditDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<String>,
}

impl AuditRecord {
    pub fn new(stage: &str, decision: AuditDecision) -> Self {
        Self {
            timestamp: now_utc_string(),
            stage: stage.to_string(),
            decision,
            reason: None,
            score: None,
            evidence_id: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_score(mut self, score: Distance) -> Self {
        self.score = Some(score.value());
        self
    }

    pub fn with_evidence_id(mut self, evidence_id: &str) -> Self {
        self.evidence_id = Some(evidence_id.to_string());
        self
    }
}

enum AuditSink {
    File(BufWriter<std::fs::File>),
    Memory(Vec<String>),
}

/// Append-only decision log. Appends are serialized through a mutex so the
/// orchestrator can be invoked concurrently for independent requests.
/// A failed append never fails the request; it is reported via tracing.
pub struct AuditLog {
    sink: Mutex<AuditSink>,
}

impl AuditLog {
    pub fn to_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;

        Ok(Self {
            sink: Mutex::new(AuditSink::File(BufWriter::new(file))),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            sink: Mutex::new(AuditSink::Memory(Vec::new())),
        }
    }

    pub fn append(&self, record: AuditRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, stage = %record.stage, "failed to serialize audit record");
                return;
            }
        };

        let Ok(mut sink) = self.sink.lock() else {
            warn!(stage = %record.stage, "audit log mutex poisoned; dropping record");
            return;
        };

        match &mut *sink {
            AuditSink::File(writer) => {
                if let Err(err) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
                    warn!(error = %err, "failed to append audit record");
                }
            }
            AuditSink::Memory(lines) => lines.push(line),
        }
    }

    /// Recorded lines, for tests and the in-memory sink only.
    pub fn lines(&self) -> Vec<String> {
        match self.sink.lock() {
            Ok(sink) => match &*sink {
                AuditSink::Memory(lines) => lines.clone(),
                AuditSink::File(_) => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }
}
