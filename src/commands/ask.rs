use std::io::{self, Write};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::cli::AskArgs;
use crate::generator::OllamaGenerator;
use crate::guard::orchestrator::GuardrailOrchestrator;
use crate::model::{Distance, GuardConfig, GuardResult, GuardStatus};
use crate::store::SqliteStore;

pub fn run(args: AskArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("evidence.sqlite"));
    let store = SqliteStore::open(&db_path)?;

    let config = guard_config(&args);
    let generator =
        OllamaGenerator::new(&args.ollama_url, &args.model, config.generation_timeout_ms)
            .map_err(|err| anyhow!("failed to build generator client: {err}"))?;
    let audit = crate::audit::AuditLog::to_file(&args.cache_root.join("audit.log"))?;

    let orchestrator = GuardrailOrchestrator::new(config, &store, &generator, &audit);
    let result = orchestrator.handle(&args.query);

    info!(
        status = result.status.as_str(),
        evidence_count = result.evidence_used.len(),
        fidelity = ?result.fidelity_score,
        cited_source = result.cited_source,
        "request completed"
    );

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut handle, &result)
            .context("failed to serialize guard result")?;
        writeln!(handle)?;
    } else {
        write_text_result(&mut handle, &result)?;
    }

    Ok(())
}

fn guard_config(args: &AskArgs) -> GuardConfig {
    GuardConfig {
        similarity_threshold: Distance(args.threshold),
        min_chunks_required: args.min_chunks,
        max_chunks_to_generator: args.max_chunks,
        template_mode: args.template_mode,
        fidelity_threshold: args.fidelity_threshold,
        require_source_citation: !args.no_citation_check,
        generation_timeout_ms: args.timeout_ms,
        ..GuardConfig::default()
    }
}

fn write_text_result(handle: &mut impl Write, result: &GuardResult) -> Result<()> {
    if let Some(answer) = &result.answer {
        writeln!(handle, "{answer}")?;
    }

    writeln!(handle)?;
    writeln!(handle, "status: {}", result.status.as_str())?;
    if let Some(reason) = &result.reason {
        writeln!(handle, "reason: {reason}")?;
    }
    if let Some(fidelity) = result.fidelity_score {
        writeln!(handle, "fidelity: {fidelity:.3}")?;
    }
    if result.status == GuardStatus::Success {
        writeln!(
            handle,
            "cited source: {}",
            if result.cited_source { "yes" } else { "no" }
        )?;
    }
    for flag in &result.hallucination_flags {
        writeln!(handle, "unverified term: {flag}")?;
    }
    for evidence in &result.evidence_used {
        writeln!(
            handle,
            "evidence: {} (score {:.4}, fonte: {})",
            evidence.id,
            evidence.score.value(),
            evidence.source_id
        )?;
    }

    Ok(())
}
