use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{info, warn};

use crate::model::{Distance, ScoreDistribution, ThresholdCandidate, ThresholdEvaluation};
use crate::retriever::Retriever;

/// Acceptance-rate band the recommendation aims for. Tunable: wider bands
/// favor coverage, narrower bands favor precision.
pub(super) const TARGET_ACCEPTANCE_BAND: (f64, f64) = (0.10, 0.30);

/// Distance-style scores live in [0, 2] for normalized embeddings; candidate
/// thresholds outside that domain are clamped.
const CANDIDATE_DOMAIN: (f64, f64) = (0.0, 2.0);

pub(super) fn suggest_candidates(stats: &ScoreDistribution) -> Vec<ThresholdCandidate> {
    let mean = stats.mean;
    let std = stats.std_dev;

    let raw = [
        ("conservative", mean - 2.0 * std),
        ("strict", mean - std),
        ("balanced", mean),
        ("permissive", mean + std),
        ("p10", stats.percentiles.p10),
        ("p25", stats.percentiles.p25),
        ("p50", stats.percentiles.p50),
        ("p75", stats.percentiles.p75),
        ("p90", stats.percentiles.p90),
    ];

    raw.into_iter()
        .map(|(name, value)| ThresholdCandidate {
            name: name.to_string(),
            value: Distance(value).clamp(CANDIDATE_DOMAIN.0, CANDIDATE_DOMAIN.1),
        })
        .collect()
}

/// Empirical pass: rerun the probe set per candidate, apply the
/// `score <= threshold` rule, record pooled acceptance rate and mean
/// wall-clock latency per query. A failing probe query is skipped, same as
/// in the sampling pass; the skips come back as report warnings.
pub(super) fn evaluate(
    candidates: &[ThresholdCandidate],
    probe_queries: &[String],
    retriever: &dyn Retriever,
    k: usize,
) -> (Vec<ThresholdEvaluation>, Vec<String>) {
    let mut evaluations = Vec::<ThresholdEvaluation>::with_capacity(candidates.len());
    let mut failed_queries = BTreeSet::<String>::new();

    for candidate in candidates {
        let mut retrieved = 0usize;
        let mut accepted = 0usize;
        let mut latency_total_ms = 0.0_f64;
        let mut queries_timed = 0usize;

        for query in probe_queries {
            let started = Instant::now();
            let results = match retriever.search(query, k) {
                Ok(results) => results,
                Err(err) => {
                    warn!(query = %query, error = %err, "probe query failed during evaluation; skipping");
                    failed_queries.insert(query.clone());
                    continue;
                }
            };
            latency_total_ms += started.elapsed().as_secs_f64() * 1000.0;
            queries_timed += 1;

            retrieved += results.len();
            accepted += results
                .iter()
                .filter(|evidence| evidence.score.within(candidate.value))
                .count();
        }

        let acceptance_rate = if retrieved > 0 {
            accepted as f64 / retrieved as f64
        } else {
            0.0
        };
        let avg_latency_ms = if queries_timed > 0 {
            latency_total_ms / queries_timed as f64
        } else {
            0.0
        };

        info!(
            candidate = %candidate.name,
            threshold = candidate.value.value(),
            acceptance_rate,
            avg_latency_ms,
            "candidate evaluated"
        );

        evaluations.push(ThresholdEvaluation {
            candidate_name: candidate.name.clone(),
            value: candidate.value,
            acceptance_rate,
            avg_latency_ms,
            retrieved_chunks: retrieved,
            accepted_chunks: accepted,
        });
    }

    let mut warnings = Vec::<String>::new();
    for query in &failed_queries {
        warnings.push(format!(
            "probe query failed during evaluation and was skipped: \"{query}\""
        ));
    }

    (evaluations, warnings)
}

/// Deterministic nearest-target selection: candidates inside the band win;
/// otherwise the candidate closest to the nearest band edge. Ties break by
/// lower latency, then by lower (stricter) threshold. Latency is compared at
/// whole-millisecond granularity so scheduling noise cannot flip a rerun.
pub(super) fn recommend(
    evaluations: &[ThresholdEvaluation],
) -> (Option<Distance>, Vec<String>) {
    if evaluations.is_empty() {
        return (None, vec!["no candidates were evaluated".to_string()]);
    }

    let mut warnings = Vec::<String>::new();
    if evaluations.iter().all(|e| e.acceptance_rate == 0.0) {
        warnings.push(
            "all candidates accept 0% of chunks; every threshold is too strict for this corpus"
                .to_string(),
        );
    } else if evaluations.iter().all(|e| e.acceptance_rate > 0.9) {
        warnings.push(
            "all candidates accept over 90% of chunks; every threshold is too permissive"
                .to_string(),
        );
    }

    let best = evaluations.iter().min_by(|left, right| {
        band_distance(left.acceptance_rate)
            .total_cmp(&band_distance(right.acceptance_rate))
            .then(
                left.avg_latency_ms
                    .round()
                    .total_cmp(&right.avg_latency_ms.round()),
            )
            .then(left.value.value().total_cmp(&right.value.value()))
    });

    (best.map(|evaluation| evaluation.value), warnings)
}

fn band_distance(rate: f64) -> f64 {
    let (low, high) = TARGET_ACCEPTANCE_BAND;
    if rate >= low && rate <= high {
        0.0
    } else if rate < low {
        low - rate
    } else {
        rate - high
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::model::{Evidence, PercentileTable};

    struct GridRetriever;

    impl Retriever for GridRetriever {
        fn search(&self, _query: &str, k: usize) -> Result<Vec<Evidence>> {
            // Fixed score grid: deterministic acceptance per threshold.
            let scores = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
            Ok(scores
                .iter()
                .take(k)
                .enumerate()
                .map(|(index, score)| Evidence {
                    id: format!("c-{index}"),
                    text: "corpo do chunk".to_string(),
                    source_id: "doc.md".to_string(),
                    score: Distance(*score),
                })
                .collect())
        }
    }

    fn stats() -> ScoreDistribution {
        ScoreDistribution {
            sample_count: 100,
            mean: 0.5,
            median: 0.5,
            std_dev: 0.2,
            min: 0.05,
            max: 1.1,
            percentiles: PercentileTable {
                p10: 0.2,
                p25: 0.3,
                p50: 0.5,
                p75: 0.7,
                p90: 0.9,
                p95: 1.0,
            },
        }
    }

    fn probes() -> Vec<String> {
        vec!["primeira consulta".to_string(), "segunda consulta".to_string()]
    }

    #[test]
    fn candidates_cover_statistical_and_percentile_strategies() {
        let candidates = suggest_candidates(&stats());
        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "conservative",
                "strict",
                "balanced",
                "permissive",
                "p10",
                "p25",
                "p50",
                "p75",
                "p90"
            ]
        );

        let by_name = |name: &str| {
            candidates
                .iter()
                .find(|c| c.name == name)
                .expect("candidate")
                .value
                .value()
        };
        assert!((by_name("conservative") - 0.1).abs() < 1e-9);
        assert!((by_name("strict") - 0.3).abs() < 1e-9);
        assert!((by_name("balanced") - 0.5).abs() < 1e-9);
        assert!((by_name("permissive") - 0.7).abs() < 1e-9);
        assert!((by_name("p90") - 0.9).abs() < 1e-9);
    }

    #[test]
    fn negative_candidates_are_clamped_to_domain() {
        let mut tight = stats();
        tight.mean = 0.1;
        tight.std_dev = 0.3;
        let candidates = suggest_candidates(&tight);
        assert!(candidates.iter().all(|c| c.value.value() >= 0.0));
        assert!(candidates.iter().all(|c| c.value.value() <= 2.0));
    }

    #[test]
    fn acceptance_rate_is_monotone_in_the_threshold() {
        let candidates: Vec<ThresholdCandidate> = [0.15, 0.25, 0.35, 0.45, 0.55, 0.70]
            .iter()
            .map(|value| ThresholdCandidate {
                name: format!("t{value}"),
                value: Distance(*value),
            })
            .collect();

        let (evaluations, _) = evaluate(&candidates, &probes(), &GridRetriever, 10);
        for window in evaluations.windows(2) {
            assert!(
                window[1].acceptance_rate >= window[0].acceptance_rate,
                "acceptance must not decrease as the threshold grows"
            );
        }
    }

    #[test]
    fn recommendation_prefers_the_target_band() {
        // 0.1 accepts 10%, 0.3 accepts 30%, 0.9 accepts 90% of the grid.
        let candidates: Vec<ThresholdCandidate> = [0.1, 0.3, 0.9]
            .iter()
            .map(|value| ThresholdCandidate {
                name: format!("t{value}"),
                value: Distance(*value),
            })
            .collect();
        let (evaluations, _) = evaluate(&candidates, &probes(), &GridRetriever, 10);
        let (recommendation, warnings) = recommend(&evaluations);

        let value = recommendation.expect("recommendation").value();
        assert!(value == 0.1 || value == 0.3, "got {value}");
        assert!(warnings.is_empty());
    }

    #[test]
    fn ties_break_by_latency_then_lower_threshold() {
        let evaluation = |name: &str, value: f64, latency: f64| ThresholdEvaluation {
            candidate_name: name.to_string(),
            value: Distance(value),
            acceptance_rate: 0.2,
            avg_latency_ms: latency,
            retrieved_chunks: 100,
            accepted_chunks: 20,
        };

        let (by_latency, _) = recommend(&[
            evaluation("slow", 0.2, 9.0),
            evaluation("fast", 0.4, 2.0),
        ]);
        assert_eq!(by_latency.expect("pick").value(), 0.4);

        let (by_threshold, _) = recommend(&[
            evaluation("loose", 0.4, 3.0),
            evaluation("tight", 0.2, 3.0),
        ]);
        assert_eq!(by_threshold.expect("pick").value(), 0.2);
    }

    #[test]
    fn degenerate_sweeps_carry_warnings_with_a_best_effort_pick() {
        let evaluation = |value: f64, rate: f64| ThresholdEvaluation {
            candidate_name: format!("t{value}"),
            value: Distance(value),
            acceptance_rate: rate,
            avg_latency_ms: 1.0,
            retrieved_chunks: 100,
            accepted_chunks: (rate * 100.0) as usize,
        };

        let (pick, warnings) = recommend(&[evaluation(0.1, 0.0), evaluation(0.2, 0.0)]);
        assert!(pick.is_some());
        assert!(warnings[0].contains("too strict"));

        let (pick, warnings) = recommend(&[evaluation(0.8, 0.95), evaluation(0.9, 0.99)]);
        assert!(pick.is_some());
        assert!(warnings[0].contains("too permissive"));
    }

    #[test]
    fn calibration_is_idempotent_for_a_fixed_retriever() {
        let run = || {
            let candidates = suggest_candidates(&stats());
            let (evaluations, _) = evaluate(&candidates, &probes(), &GridRetriever, 10);
            recommend(&evaluations).0.expect("recommendation").value()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn failing_probe_query_is_skipped_not_fatal() {
        struct FlakyRetriever;
        impl Retriever for FlakyRetriever {
            fn search(&self, query: &str, k: usize) -> Result<Vec<Evidence>> {
                if query.contains("segunda") {
                    anyhow::bail!("index unavailable")
                }
                GridRetriever.search(query, k)
            }
        }

        let candidates = vec![ThresholdCandidate {
            name: "balanced".to_string(),
            value: Distance(0.3),
        }];
        let (evaluations, warnings) = evaluate(&candidates, &probes(), &FlakyRetriever, 10);

        assert_eq!(evaluations.len(), 1);
        // Only the surviving query contributes to the pool.
        assert_eq!(evaluations[0].retrieved_chunks, 10);
        assert_eq!(evaluations[0].accepted_chunks, 3);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("segunda consulta"));
    }
}
