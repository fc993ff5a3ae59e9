use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::CalibrateArgs;
use crate::model::CalibrationReport;
use crate::retriever::Retriever;
use crate::store::SqliteStore;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

use super::advisor;
use super::stats;

const MANIFEST_VERSION: u32 = 1;

/// Built-in probe set for corpora ingested from the infra knowledge base.
/// Supply --probe-file to calibrate against a different corpus.
const DEFAULT_PROBE_QUERIES: [&str; 15] = [
    "Qual é a latência média das APIs?",
    "Como funciona o cache distribuído?",
    "Quantos usuários simultâneos o sistema suporta?",
    "Como foi implementada a arquitetura de microserviços?",
    "Quais tecnologias são usadas para segurança?",
    "Como funciona o sistema de monitoramento?",
    "Onde são enviados os alertas críticos?",
    "Qual é o uptime do serviço?",
    "Como é feito o deployment automático?",
    "Quais métricas de performance são coletadas?",
    "Como funciona a replicação do banco de dados?",
    "Quais são as tecnologias de containerização?",
    "Como é implementado o rate limiting?",
    "Onde ficam centralizados os logs?",
    "Como funciona a autenticação JWT?",
];

pub fn run(args: CalibrateArgs) -> Result<()> {
    let db_path = resolve_db_path(&args);
    let store = SqliteStore::open(&db_path)?;

    let status = store.status(&db_path)?;
    if status.embedded_chunk_count == 0 {
        bail!(
            "evidence store has no embedded chunks: {}; run `ingest` first",
            db_path.display()
        );
    }

    let probe_queries = load_probe_queries(args.probe_file.as_deref())?;
    if probe_queries.is_empty() {
        bail!("probe set is empty; nothing to calibrate against");
    }

    let probe_k = args.probe_k.max(1);
    info!(
        db_path = %db_path.display(),
        probe_query_count = probe_queries.len(),
        probe_k,
        "calibration started"
    );

    let samples = stats::collect_samples(&store as &dyn Retriever, &probe_queries, probe_k)?;
    let global_stats = stats::compute_distribution(&samples);

    let mut warnings = Vec::<String>::new();
    let (candidates, evaluations, final_recommendation) = match &global_stats {
        Some(distribution) => {
            let candidates = advisor::suggest_candidates(distribution);
            let (evaluations, skip_warnings) =
                advisor::evaluate(&candidates, &probe_queries, &store, probe_k);
            let (recommendation, sweep_warnings) = advisor::recommend(&evaluations);
            warnings.extend(skip_warnings);
            warnings.extend(sweep_warnings);
            (candidates, evaluations, recommendation)
        }
        None => {
            warn!("no probe samples collected; score distribution unavailable");
            warnings.push(
                "no probe samples were collected; calibration produced no recommendation"
                    .to_string(),
            );
            (Vec::new(), Vec::new(), None)
        }
    };

    let report = CalibrationReport {
        manifest_version: MANIFEST_VERSION,
        generated_at: now_utc_string(),
        probe_query_count: probe_queries.len(),
        probe_k,
        sample_count: samples.len(),
        global_stats,
        candidates,
        evaluations,
        final_recommendation,
        warnings,
    };

    let manifest_path = args
        .cache_root
        .join("manifests")
        .join(format!("calibration_{}.json", utc_compact_string(Utc::now())));
    write_json_pretty(&manifest_path, &report)?;
    info!(manifest = %manifest_path.display(), "calibration manifest written");

    if args.json {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, &report)
            .context("failed to serialize calibration report")?;
        writeln!(handle)?;
    } else {
        write_text_report(&report, &manifest_path)?;
    }

    Ok(())
}

fn resolve_db_path(args: &CalibrateArgs) -> PathBuf {
    args.db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("evidence.sqlite"))
}

/// One probe query per line; blank lines and `#` comments are skipped.
fn load_probe_queries(probe_file: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = probe_file else {
        return Ok(DEFAULT_PROBE_QUERIES
            .iter()
            .map(|query| query.to_string())
            .collect());
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read probe file: {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn write_text_report(report: &CalibrationReport, manifest_path: &Path) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    writeln!(handle, "Calibration report ({})", report.generated_at)?;
    writeln!(
        handle,
        "  probes: {} queries x k={} -> {} samples",
        report.probe_query_count, report.probe_k, report.sample_count
    )?;

    if let Some(stats) = &report.global_stats {
        writeln!(
            handle,
            "  scores: mean={:.4} median={:.4} std={:.4} min={:.4} max={:.4}",
            stats.mean, stats.median, stats.std_dev, stats.min, stats.max
        )?;
        writeln!(
            handle,
            "  percentiles: p10={:.4} p25={:.4} p50={:.4} p75={:.4} p90={:.4} p95={:.4}",
            stats.percentiles.p10,
            stats.percentiles.p25,
            stats.percentiles.p50,
            stats.percentiles.p75,
            stats.percentiles.p90,
            stats.percentiles.p95
        )?;
    }

    if !report.evaluations.is_empty() {
        writeln!(handle)?;
        writeln!(
            handle,
            "  {:<14} {:>9} {:>12} {:>12} {:>10}",
            "candidate", "threshold", "acceptance", "avg latency", "accepted"
        )?;
        for evaluation in &report.evaluations {
            writeln!(
                handle,
                "  {:<14} {:>9.4} {:>11.1}% {:>10.1}ms {:>4}/{}",
                evaluation.candidate_name,
                evaluation.value.value(),
                evaluation.acceptance_rate * 100.0,
                evaluation.avg_latency_ms,
                evaluation.accepted_chunks,
                evaluation.retrieved_chunks
            )?;
        }
    }

    writeln!(handle)?;
    match report.final_recommendation {
        Some(threshold) => writeln!(
            handle,
            "  recommended threshold: {:.4} (pass as --threshold to `ask`)",
            threshold.value()
        )?,
        None => writeln!(handle, "  no recommendation produced")?,
    }
    for warning in &report.warnings {
        writeln!(handle, "  warning: {warning}")?;
    }
    writeln!(handle, "  manifest: {}", manifest_path.display())?;

    Ok(())
}
