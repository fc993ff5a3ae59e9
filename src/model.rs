use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Retriever scores are distances: lower means more similar. The comparison
/// against the configured threshold lives here so the sign convention cannot
/// be flipped at a call site.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distance(pub f64);

impl Distance {
    pub fn value(self) -> f64 {
        self.0
    }

    pub fn within(self, threshold: Distance) -> bool {
        self.0 <= threshold.0
    }

    pub fn clamp(self, low: f64, high: f64) -> Distance {
        Distance(self.0.clamp(low, high))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub text: String,
    pub source_id: String,
    pub score: Distance,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    Strict,
    Balanced,
}

impl TemplateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Balanced => "balanced",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub similarity_threshold: Distance,
    pub min_chunks_required: usize,
    pub max_chunks_to_generator: usize,
    pub template_mode: TemplateMode,
    pub fidelity_threshold: f64,
    pub require_source_citation: bool,
    pub min_query_chars: usize,
    pub max_query_chars: usize,
    pub generation_timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: Distance(0.35),
            min_chunks_required: 1,
            max_chunks_to_generator: 4,
            template_mode: TemplateMode::Strict,
            fidelity_threshold: 0.3,
            require_source_citation: true,
            min_query_chars: 3,
            max_query_chars: 1000,
            generation_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStatus {
    Success,
    NoRelevantContext,
    RejectedInput,
    GenerationError,
    BlockedOutput,
}

impl GuardStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoRelevantContext => "no_relevant_context",
            Self::RejectedInput => "rejected_input",
            Self::GenerationError => "generation_error",
            Self::BlockedOutput => "blocked_output",
        }
    }
}

/// Terminal outcome of one guarded request. Built exactly once per request;
/// no stage mutates a result it did not construct.
#[derive(Debug, Clone, Serialize)]
pub struct GuardResult {
    pub status: GuardStatus,
    pub answer: Option<String>,
    pub evidence_used: Vec<Evidence>,
    pub fidelity_score: Option<f64>,
    pub cited_source: bool,
    pub reason: Option<String>,
    pub hallucination_flags: Vec<String>,
}

impl GuardResult {
    pub fn rejected_input(reason: String) -> Self {
        Self {
            status: GuardStatus::RejectedInput,
            answer: None,
            evidence_used: Vec::new(),
            fidelity_score: None,
            cited_source: false,
            reason: Some(reason),
            hallucination_flags: Vec::new(),
        }
    }

    pub fn no_relevant_context(answer: String, reason: String) -> Self {
        Self {
            status: GuardStatus::NoRelevantContext,
            answer: Some(answer),
            evidence_used: Vec::new(),
            fidelity_score: None,
            cited_source: false,
            reason: Some(reason),
            hallucination_flags: Vec::new(),
        }
    }

    pub fn generation_error(answer: String, reason: String) -> Self {
        Self {
            status: GuardStatus::GenerationError,
            answer: Some(answer),
            evidence_used: Vec::new(),
            fidelity_score: None,
            cited_source: false,
            reason: Some(reason),
            hallucination_flags: Vec::new(),
        }
    }

    pub fn blocked_output(answer: String, reason: String, fidelity_score: Option<f64>) -> Self {
        Self {
            status: GuardStatus::BlockedOutput,
            answer: Some(answer),
            evidence_used: Vec::new(),
            fidelity_score,
            cited_source: false,
            reason: Some(reason),
            hallucination_flags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSample {
    pub query: String,
    pub evidence_id: String,
    pub score: Distance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PercentileTable {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub sample_count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: PercentileTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCandidate {
    pub name: String,
    pub value: Distance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdEvaluation {
    pub candidate_name: String,
    pub value: Distance,
    pub acceptance_rate: f64,
    pub avg_latency_ms: f64,
    pub retrieved_chunks: usize,
    pub accepted_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub manifest_version: u32,
    pub generated_at: String,
    pub probe_query_count: usize,
    pub probe_k: usize,
    pub sample_count: usize,
    pub global_stats: Option<ScoreDistribution>,
    pub candidates: Vec<ThresholdCandidate>,
    pub evaluations: Vec<ThresholdEvaluation>,
    pub final_recommendation: Option<Distance>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub data_dir: String,
    pub db_path: String,
    pub files_scanned: usize,
    pub documents_ingested: usize,
    pub chunks_written: usize,
    pub embedding_dim: usize,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub db_path: String,
    pub document_count: i64,
    pub chunk_count: i64,
    pub embedded_chunk_count: i64,
    pub embedding_dim: usize,
}
