use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::embedding::EMBEDDING_DIM;
use crate::model::IngestRunManifest;
use crate::store::SqliteStore;
use crate::util::{now_utc_string, sha256_hex, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

const CHUNK_TARGET_CHARS: usize = 500;
const CHUNK_OVERLAP_CHARS: usize = 80;

pub fn run(args: IngestArgs) -> Result<()> {
    let run_started = Instant::now();
    let run_id = utc_compact_string(Utc::now());

    if !args.data_dir.is_dir() {
        bail!("data directory not found: {}", args.data_dir.display());
    }

    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("evidence.sqlite"));
    if let Some(parent) = db_path.parent() {
        crate::util::ensure_directory(parent)?;
    }
    let store = SqliteStore::open(&db_path)?;

    let mut warnings = Vec::<String>::new();
    let files = collect_source_files(&args.data_dir)?;
    if files.is_empty() {
        warnings.push(format!(
            "no .txt or .md files found under {}",
            args.data_dir.display()
        ));
    }

    let mut documents_ingested = 0usize;
    let mut chunks_written = 0usize;

    for path in &files {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read source file; skipping");
                warnings.push(format!("unreadable file skipped: {}", path.display()));
                continue;
            }
        };

        let source_id = source_id_for(path, &args.data_dir);
        let doc_id = sha256_hex(&source_id);
        let chunks = split_into_chunks(&text, CHUNK_TARGET_CHARS, CHUNK_OVERLAP_CHARS);
        if chunks.is_empty() {
            warn!(path = %path.display(), "source file produced no chunks; skipping");
            warnings.push(format!("empty file skipped: {}", path.display()));
            continue;
        }

        store.upsert_document(&doc_id, &path.display().to_string())?;
        for (seq, chunk_text) in chunks.iter().enumerate() {
            let text_hash = sha256_hex(chunk_text);
            let chunk_id = sha256_hex(&format!("{source_id}#{seq}:{text_hash}"));
            store.upsert_chunk(&chunk_id, &doc_id, &source_id, seq, chunk_text, &text_hash)?;
            chunks_written += 1;
        }
        documents_ingested += 1;

        info!(
            source = %source_id,
            chunk_count = chunks.len(),
            "document ingested"
        );
    }

    let manifest = IngestRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        generated_at: now_utc_string(),
        data_dir: args.data_dir.display().to_string(),
        db_path: db_path.display().to_string(),
        files_scanned: files.len(),
        documents_ingested,
        chunks_written,
        embedding_dim: EMBEDDING_DIM,
        duration_ms: run_started.elapsed().as_millis(),
        warnings: warnings.clone(),
    };

    let manifest_path = args
        .cache_root
        .join("manifests")
        .join(format!("ingest_{run_id}.json"));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        files_scanned = files.len(),
        documents_ingested,
        chunks_written,
        warning_count = warnings.len(),
        manifest = %manifest_path.display(),
        "ingest completed"
    );

    println!(
        "Ingested {documents_ingested} document(s), {chunks_written} chunk(s) -> {}",
        db_path.display()
    );
    for warning in &warnings {
        println!("warning: {warning}");
    }

    Ok(())
}

/// Recursive walk for .txt/.md sources, sorted for reproducible runs.
fn collect_source_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::<PathBuf>::new();
    let mut pending = vec![data_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let extension = path
                .extension()
                .and_then(|value| value.to_str())
                .map(str::to_lowercase);
            if matches!(extension.as_deref(), Some("txt") | Some("md")) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn source_id_for(path: &Path, data_dir: &Path) -> String {
    path.strip_prefix(data_dir)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Sliding-window chunker over char boundaries. Windows end on whitespace
/// when one exists near the target size, so words are not split mid-token.
fn split_into_chunks(text: &str, target_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let target = target_chars.max(1);
    let overlap = overlap_chars.min(target.saturating_sub(1));

    let mut chunks = Vec::<String>::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + target).min(chars.len());
        let end = if hard_end < chars.len() {
            break_on_whitespace(&chars, start, hard_end)
        } else {
            hard_end
        };

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        let mut next_start = end.saturating_sub(overlap).max(start + 1);
        // Snap the overlap window forward to a word boundary; an unbroken
        // token keeps the raw cut so progress is still guaranteed.
        if next_start > 0 && !chars[next_start - 1].is_whitespace() {
            if let Some(offset) = chars[next_start..end]
                .iter()
                .position(|character| character.is_whitespace())
            {
                next_start += offset + 1;
            }
        }
        start = next_start;
    }

    chunks
}

/// Prefers the last whitespace in the back half of the window; falls back to
/// the hard cut when the window is a single unbroken token.
fn break_on_whitespace(chars: &[char], start: usize, hard_end: usize) -> usize {
    let floor = start + (hard_end - start) / 2;
    for index in (floor..hard_end).rev() {
        if chars[index].is_whitespace() {
            return index + 1;
        }
    }
    hard_end
}
