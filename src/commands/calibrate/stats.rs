use anyhow::Result;
use tracing::warn;

use crate::model::{PercentileTable, ScoreDistribution, ScoreSample};
use crate::retriever::Retriever;

/// One probe pass over the retriever: every (query, chunk) pair becomes a
/// sample. Samples are pooled across queries, not aggregated per query.
pub(super) fn collect_samples(
    retriever: &dyn Retriever,
    probe_queries: &[String],
    k: usize,
) -> Result<Vec<ScoreSample>> {
    let mut samples = Vec::<ScoreSample>::new();

    for query in probe_queries {
        let results = match retriever.search(query, k) {
            Ok(results) => results,
            Err(err) => {
                warn!(query = %query, error = %err, "probe query failed; skipping");
                continue;
            }
        };

        for evidence in results {
            samples.push(ScoreSample {
                query: query.clone(),
                evidence_id: evidence.id,
                score: evidence.score,
            });
        }
    }

    Ok(samples)
}

/// Pooled distribution over all samples. Returns None for an empty pool so
/// the caller reports "insufficient data" instead of working with NaNs.
pub(super) fn compute_distribution(samples: &[ScoreSample]) -> Option<ScoreDistribution> {
    if samples.is_empty() {
        return None;
    }

    let mut scores: Vec<f64> = samples.iter().map(|sample| sample.score.value()).collect();
    scores.sort_by(|left, right| left.total_cmp(right));

    let count = scores.len();
    let mean = scores.iter().sum::<f64>() / count as f64;
    let variance = scores
        .iter()
        .map(|score| (score - mean) * (score - mean))
        .sum::<f64>()
        / count as f64;

    Some(ScoreDistribution {
        sample_count: count,
        mean,
        median: percentile(&scores, 50.0),
        std_dev: variance.sqrt(),
        min: scores[0],
        max: scores[count - 1],
        percentiles: PercentileTable {
            p10: percentile(&scores, 10.0),
            p25: percentile(&scores, 25.0),
            p50: percentile(&scores, 50.0),
            p75: percentile(&scores, 75.0),
            p90: percentile(&scores, 90.0),
            p95: percentile(&scores, 95.0),
        },
    })
}

/// Linear interpolation between closest ranks, over a pre-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let low_index = rank.floor() as usize;
    let high_index = rank.ceil() as usize;
    if low_index == high_index {
        return sorted[low_index];
    }

    let fraction = rank - low_index as f64;
    sorted[low_index] + (sorted[high_index] - sorted[low_index]) * fraction
}
