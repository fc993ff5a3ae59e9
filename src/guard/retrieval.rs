use std::collections::HashSet;

use tracing::info;

use crate::audit::{AuditDecision, AuditLog, AuditRecord};
use crate::model::{Evidence, GuardConfig};

const STAGE: &str = "retrieval_guard";

const MIN_CHUNK_CHARS: usize = 50;
const MIN_ALPHABETIC_RATIO: f64 = 0.5;
const MIN_UNIQUE_WORD_RATIO: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct RetrievalVerdict {
    pub accepted: Vec<Evidence>,
    pub retrieved: usize,
    pub rejected_quality: usize,
    pub rejected_threshold: usize,
}

impl RetrievalVerdict {
    pub fn sufficient(&self, config: &GuardConfig) -> bool {
        self.accepted.len() >= config.min_chunks_required
    }
}

pub struct RetrievalGuard<'a> {
    config: &'a GuardConfig,
}

impl<'a> RetrievalGuard<'a> {
    pub fn new(config: &'a GuardConfig) -> Self {
        Self { config }
    }

    /// Quality filter, then threshold filter, then cap. The retriever's
    /// relative ranking is preserved: surviving chunks keep ascending-score
    /// order and the cap drops the farthest ones.
    pub fn filter(&self, candidates: Vec<Evidence>, audit: &AuditLog) -> RetrievalVerdict {
        let retrieved = candidates.len();
        let mut rejected_quality = 0usize;
        let mut rejected_threshold = 0usize;
        let mut accepted = Vec::<Evidence>::new();

        for evidence in candidates {
            if let Some(reason) = chunk_quality_defect(&evidence.text) {
                rejected_quality += 1;
                audit.append(
                    AuditRecord::new(STAGE, AuditDecision::Reject)
                        .with_reason(reason)
                        .with_score(evidence.score)
                        .with_evidence_id(&evidence.id),
                );
                continue;
            }

            if !evidence.score.within(self.config.similarity_threshold) {
                rejected_threshold += 1;
                audit.append(
                    AuditRecord::new(STAGE, AuditDecision::Reject)
                        .with_reason("score above similarity threshold")
                        .with_score(evidence.score)
                        .with_evidence_id(&evidence.id),
                );
                continue;
            }

            audit.append(
                AuditRecord::new(STAGE, AuditDecision::Accept)
                    .with_score(evidence.score)
                    .with_evidence_id(&evidence.id),
            );
            accepted.push(evidence);
        }

        accepted.sort_by(|left, right| left.score.value().total_cmp(&right.score.value()));
        if accepted.len() > self.config.max_chunks_to_generator {
            for dropped in &accepted[self.config.max_chunks_to_generator..] {
                audit.append(
                    AuditRecord::new(STAGE, AuditDecision::Reject)
                        .with_reason("over max_chunks_to_generator cap")
                        .with_score(dropped.score)
                        .with_evidence_id(&dropped.id),
                );
            }
            accepted.truncate(self.config.max_chunks_to_generator);
        }

        info!(
            retrieved,
            accepted = accepted.len(),
            rejected_quality,
            rejected_threshold,
            threshold = self.config.similarity_threshold.value(),
            "retrieval filtering complete"
        );

        RetrievalVerdict {
            accepted,
            retrieved,
            rejected_quality,
            rejected_threshold,
        }
    }
}

/// Cheap repetition/noise heuristics. Returns the defect name for the audit
/// trail, or None for a usable chunk.
fn chunk_quality_defect(text: &str) -> Option<&'static str> {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_CHUNK_CHARS {
        return Some("chunk text too short");
    }

    let non_space: Vec<char> = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if non_space.is_empty() {
        return Some("chunk text too short");
    }
    let alphabetic = non_space.iter().filter(|c| c.is_alphabetic()).count();
    if (alphabetic as f64) / (non_space.len() as f64) < MIN_ALPHABETIC_RATIO {
        return Some("low alphabetic character ratio");
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if !words.is_empty() {
        let unique: HashSet<String> = words.iter().map(|word| word.to_lowercase()).collect();
        if (unique.len() as f64) / (words.len() as f64) < MIN_UNIQUE_WORD_RATIO {
            return Some("low unique word ratio");
        }
    }

    None
}
