use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::StatusArgs;
use crate::store::SqliteStore;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("evidence.sqlite"));
    let store = SqliteStore::open(&db_path)?;
    let status = store.status(&db_path)?;

    info!(
        db_path = %status.db_path,
        document_count = status.document_count,
        chunk_count = status.chunk_count,
        embedded_chunk_count = status.embedded_chunk_count,
        "status collected"
    );

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut handle, &status)
            .context("failed to serialize index status")?;
        writeln!(handle)?;
    } else {
        writeln!(handle, "Evidence store: {}", status.db_path)?;
        writeln!(handle, "  documents:       {}", status.document_count)?;
        writeln!(handle, "  chunks:          {}", status.chunk_count)?;
        writeln!(handle, "  embedded chunks: {}", status.embedded_chunk_count)?;
        writeln!(handle, "  embedding dim:   {}", status.embedding_dim)?;
    }

    Ok(())
}
