use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::audit::{AuditDecision, AuditLog, AuditRecord};
use crate::guard::patterns::PatternMatcher;
use crate::guard::prompt::REFUSAL_STRING;
use crate::model::{Evidence, GuardConfig};

const STAGE: &str = "output_guard";

/// Closed-class words excluded from the overlap sets. Covers the Portuguese
/// answers the templates produce plus common English fillers.
const STOPWORDS: &[&str] = &[
    "a", "o", "as", "os", "um", "uma", "de", "do", "da", "dos", "das", "em", "no", "na", "nos",
    "nas", "e", "ou", "que", "com", "por", "para", "se", "ao", "à", "é", "são", "foi", "ser",
    "está", "não", "sim", "mais", "como", "base", "fonte", "contexto", "fornecido", "the",
    "an", "of", "in", "on", "and", "or", "is", "are", "was", "to", "for", "with", "that", "this",
];

#[derive(Debug, Clone)]
pub struct OutputVerdict {
    pub ok: bool,
    pub fidelity_score: Option<f64>,
    pub cited_source: bool,
    pub reason: Option<String>,
    pub hallucination_flags: Vec<String>,
}

pub struct OutputGuard<'a> {
    config: &'a GuardConfig,
    unsafe_matcher: &'a dyn PatternMatcher,
}

impl<'a> OutputGuard<'a> {
    pub fn new(config: &'a GuardConfig, unsafe_matcher: &'a dyn PatternMatcher) -> Self {
        Self {
            config,
            unsafe_matcher,
        }
    }

    /// Fidelity, then citation, then hallucination flags, then the safety
    /// screen; the first hard failure wins. The fidelity and hallucination
    /// checks are bag-of-words approximations, not semantic validation; they
    /// catch gross ungrounded output, not paraphrase.
    pub fn validate(
        &self,
        answer: &str,
        evidence: &[Evidence],
        question: &str,
        audit: &AuditLog,
    ) -> OutputVerdict {
        let trimmed = answer.trim();

        // The fixed refusal string is always a valid outcome: it is the
        // honest "not in the evidence" answer the strict template demands.
        if trimmed == REFUSAL_STRING {
            audit.append(
                AuditRecord::new(STAGE, AuditDecision::Accept).with_reason("refusal string"),
            );
            return OutputVerdict {
                ok: true,
                fidelity_score: None,
                cited_source: true,
                reason: None,
                hallucination_flags: Vec::new(),
            };
        }

        if trimmed.is_empty() {
            return self.reject(audit, "empty answer from generator", None);
        }

        let evidence_text = evidence
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<&str>>()
            .join(" ");

        let answer_words = content_words(trimmed);
        if answer_words.is_empty() {
            return self.reject(audit, "answer has no content words", None);
        }
        let evidence_words = content_words(&evidence_text);
        let overlap = answer_words.intersection(&evidence_words).count();
        let fidelity = overlap as f64 / answer_words.len() as f64;

        if fidelity < self.config.fidelity_threshold {
            return self.reject(
                audit,
                &format!(
                    "fidelity {fidelity:.2} below threshold {:.2}",
                    self.config.fidelity_threshold
                ),
                Some(fidelity),
            );
        }

        let cited_source = has_citation_marker(trimmed);
        if self.config.require_source_citation && !cited_source {
            return self.reject(audit, "answer lacks a source citation", Some(fidelity));
        }

        let hallucination_flags = hallucination_candidates(trimmed, &evidence_text, question);
        if !hallucination_flags.is_empty() {
            // Flagged, not rejected: candidate invented facts are surfaced
            // for the operator.
            warn!(
                flags = ?hallucination_flags,
                "unsupported tokens in answer"
            );
        }

        if let Some(pattern) = self.unsafe_matcher.find_match(trimmed) {
            return self.reject(
                audit,
                &format!("unsafe content pattern: \"{pattern}\""),
                Some(fidelity),
            );
        }

        audit.append(AuditRecord::new(STAGE, AuditDecision::Accept));
        info!(
            fidelity = fidelity,
            cited_source,
            flag_count = hallucination_flags.len(),
            "answer validated"
        );

        OutputVerdict {
            ok: true,
            fidelity_score: Some(fidelity),
            cited_source,
            reason: None,
            hallucination_flags,
        }
    }

    fn reject(&self, audit: &AuditLog, reason: &str, fidelity: Option<f64>) -> OutputVerdict {
        audit.append(AuditRecord::new(STAGE, AuditDecision::Reject).with_reason(reason));
        info!(reason = %reason, "answer rejected");
        OutputVerdict {
            ok: false,
            fidelity_score: fidelity,
            cited_source: false,
            reason: Some(reason.to_string()),
            hallucination_flags: Vec::new(),
        }
    }
}

fn has_citation_marker(answer: &str) -> bool {
    let lowered = answer.to_lowercase();
    lowered.contains("fonte:") || lowered.contains("(fonte")
}

fn content_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| word.chars().count() > 1 && !STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn numeric_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9][0-9a-zA-Z.,%]*").expect("numeric token regex"))
}

fn proper_noun_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\p{Lu}\p{Ll}{2,}\b").expect("proper noun regex")
    })
}

/// Numeric and capitalized tokens in the answer that appear in neither the
/// evidence nor the question. Candidate invented facts.
fn hallucination_candidates(answer: &str, evidence_text: &str, question: &str) -> Vec<String> {
    let grounding = format!("{} {}", evidence_text, question).to_lowercase();
    let mut flags = Vec::<String>::new();
    let mut seen = HashSet::<String>::new();

    for capture in numeric_token_regex().find_iter(answer) {
        let token = capture.as_str().trim_matches(|c: char| c == '.' || c == ',');
        let lowered = token.to_lowercase();
        if !grounding.contains(&lowered) && seen.insert(lowered) {
            flags.push(token.to_string());
        }
    }

    for capture in proper_noun_regex().find_iter(answer) {
        let token = capture.as_str();
        let lowered = token.to_lowercase();
        if STOPWORDS.contains(&lowered.as_str()) {
            continue;
        }
        if !grounding.contains(&lowered) && seen.insert(lowered) {
            flags.push(token.to_string());
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::patterns::BlocklistMatcher;
    use crate::model::Distance;

    fn evidence() -> Vec<Evidence> {
        vec![Evidence {
            id: "c-1".to_string(),
            text: "A latência média das APIs é de 150ms em 99% dos casos.".to_string(),
            source_id: "infra.md".to_string(),
            score: Distance(0.15),
        }]
    }

    fn validate(answer: &str) -> OutputVerdict {
        let config = GuardConfig::default();
        let matcher = BlocklistMatcher::unsafe_output_default();
        let audit = AuditLog::in_memory();
        OutputGuard::new(&config, &matcher).validate(
            answer,
            &evidence(),
            "Qual é a latência média das APIs?",
            &audit,
        )
    }

    #[test]
    fn stopword_list_has_no_duplicates() {
        let unique: HashSet<&str> = STOPWORDS.iter().copied().collect();
        assert_eq!(unique.len(), STOPWORDS.len());
    }

    #[test]
    fn grounded_cited_answer_passes() {
        let verdict = validate(
            "✅ Com base no contexto fornecido: a latência média das APIs é de 150ms. (Fonte: infra.md)",
        );
        assert!(verdict.ok);
        assert!(verdict.cited_source);
        assert!(verdict.fidelity_score.expect("fidelity") > 0.3);
        assert!(verdict.hallucination_flags.is_empty());
    }

    #[test]
    fn refusal_string_is_accepted_regardless_of_fidelity() {
        let verdict = validate(REFUSAL_STRING);
        assert!(verdict.ok);
        assert!(verdict.cited_source);
        assert!(verdict.fidelity_score.is_none());
    }

    #[test]
    fn ungrounded_answer_fails_fidelity() {
        let verdict = validate(
            "Unicórnios mágicos voam sobre montanhas púrpuras cantando melodias secretas esquecidas. (Fonte: infra.md)",
        );
        assert!(!verdict.ok);
        assert!(verdict.reason.expect("reason").contains("fidelity"));
    }

    #[test]
    fn missing_citation_is_rejected_when_required() {
        let verdict = validate("A latência média das APIs é de 150ms em 99% dos casos.");
        assert!(!verdict.ok);
        assert!(verdict.reason.expect("reason").contains("citation"));
    }

    #[test]
    fn citation_not_required_when_config_disables_it() {
        let config = GuardConfig {
            require_source_citation: false,
            ..GuardConfig::default()
        };
        let matcher = BlocklistMatcher::unsafe_output_default();
        let audit = AuditLog::in_memory();
        let verdict = OutputGuard::new(&config, &matcher).validate(
            "A latência média das APIs é de 150ms em 99% dos casos.",
            &evidence(),
            "Qual é a latência média das APIs?",
            &audit,
        );
        assert!(verdict.ok);
        assert!(!verdict.cited_source);
    }

    #[test]
    fn unsupported_number_and_name_are_flagged_but_not_rejected() {
        let verdict = validate(
            "Com base no contexto: a latência média das APIs é de 150ms, segundo Roberto, caindo para 42ms. (Fonte: infra.md)",
        );
        assert!(verdict.ok);
        assert!(verdict.hallucination_flags.iter().any(|flag| flag == "42ms"));
        assert!(verdict.hallucination_flags.iter().any(|flag| flag == "Roberto"));
        assert!(!verdict.hallucination_flags.iter().any(|flag| flag.contains("150ms")));
    }

    #[test]
    fn unsafe_pattern_blocks_the_answer() {
        let verdict = validate(
            "A latência média das APIs é de 150ms. <script>alert(1)</script> (Fonte: infra.md)",
        );
        assert!(!verdict.ok);
        assert!(verdict.reason.expect("reason").contains("unsafe content"));
    }
}
