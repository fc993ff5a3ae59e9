use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, params};

use crate::embedding::{
    EMBEDDING_DIM, cosine_similarity, decode_embedding_blob, distance_from_cosine,
    embed_text_local, encode_embedding_blob,
};
use crate::model::{Distance, Evidence, IndexStatus};
use crate::retriever::Retriever;
use crate::util::now_utc_string;

const DB_SCHEMA_VERSION: &str = "0.1.0";

pub struct SqliteStore {
    connection: Connection,
    embedding_dim: usize,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open evidence store: {}", db_path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL")?;

        let store = Self {
            connection,
            embedding_dim: EMBEDDING_DIM,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        let store = Self {
            connection,
            embedding_dim: EMBEDDING_DIM,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS meta(
                  key TEXT PRIMARY KEY,
                  value TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS documents(
                  doc_id TEXT PRIMARY KEY,
                  source_path TEXT NOT NULL,
                  ingested_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS chunks(
                  chunk_id TEXT PRIMARY KEY,
                  doc_id TEXT NOT NULL REFERENCES documents(doc_id),
                  source_id TEXT NOT NULL,
                  seq INTEGER NOT NULL,
                  text TEXT NOT NULL,
                  text_hash TEXT NOT NULL,
                  embedding BLOB,
                  embedding_dim INTEGER,
                  created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);
                ",
            )
            .context("failed to ensure evidence store schema")?;

        self.connection.execute(
            "
            INSERT INTO meta(key, value) VALUES('db_schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value
            ",
            params![DB_SCHEMA_VERSION],
        )?;

        Ok(())
    }

    pub fn upsert_document(&self, doc_id: &str, source_path: &str) -> Result<()> {
        self.connection.execute(
            "
            INSERT INTO documents(doc_id, source_path, ingested_at)
            VALUES(?1, ?2, ?3)
            ON CONFLICT(doc_id) DO UPDATE SET
              source_path=excluded.source_path,
              ingested_at=excluded.ingested_at
            ",
            params![doc_id, source_path, now_utc_string()],
        )?;
        Ok(())
    }

    pub fn upsert_chunk(
        &self,
        chunk_id: &str,
        doc_id: &str,
        source_id: &str,
        seq: usize,
        text: &str,
        text_hash: &str,
    ) -> Result<()> {
        let embedding = embed_text_local(text, self.embedding_dim);
        let blob = encode_embedding_blob(&embedding);

        self.connection.execute(
            "
            INSERT INTO chunks(chunk_id, doc_id, source_id, seq, text, text_hash,
                               embedding, embedding_dim, created_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(chunk_id) DO UPDATE SET
              text=excluded.text,
              text_hash=excluded.text_hash,
              embedding=excluded.embedding,
              embedding_dim=excluded.embedding_dim,
              created_at=excluded.created_at
            ",
            params![
                chunk_id,
                doc_id,
                source_id,
                seq as i64,
                text,
                text_hash,
                blob,
                self.embedding_dim as i64,
                now_utc_string(),
            ],
        )?;
        Ok(())
    }

    pub fn status(&self, db_path: &Path) -> Result<IndexStatus> {
        let document_count: i64 =
            self.connection
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunk_count: i64 =
            self.connection
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let embedded_chunk_count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(IndexStatus {
            db_path: db_path.display().to_string(),
            document_count,
            chunk_count,
            embedded_chunk_count,
            embedding_dim: self.embedding_dim,
        })
    }
}

impl Retriever for SqliteStore {
    fn search(&self, query: &str, k: usize) -> Result<Vec<Evidence>> {
        let query_embedding = embed_text_local(query, self.embedding_dim);

        let mut statement = self.connection.prepare(
            "
            SELECT chunk_id, source_id, text, embedding, embedding_dim
            FROM chunks
            WHERE embedding IS NOT NULL
            ORDER BY chunk_id ASC
            ",
        )?;

        let mut rows = statement.query([])?;
        let mut out = Vec::<Evidence>::new();
        while let Some(row) = rows.next()? {
            let chunk_id: String = row.get(0)?;
            let source_id: String = row.get(1)?;
            let text: String = row.get(2)?;
            let blob: Vec<u8> = row.get(3)?;
            let row_dim = row.get::<_, i64>(4)? as usize;

            if row_dim != self.embedding_dim {
                continue;
            }
            let Some(embedding) = decode_embedding_blob(&blob, row_dim) else {
                continue;
            };

            let cosine = cosine_similarity(&query_embedding, &embedding);
            out.push(Evidence {
                id: chunk_id,
                text,
                source_id,
                score: Distance(distance_from_cosine(cosine)),
            });
        }

        // Nearest first; ties broken by chunk id for stable calibration.
        out.sort_by(|left, right| {
            left.score
                .value()
                .total_cmp(&right.score.value())
                .then(left.id.cmp(&right.id))
        });
        out.truncate(k.max(1));

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::sha256_hex;

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        store.upsert_document("doc-1", "data/infra.md").expect("doc");
        let chunks = [
            ("c-latency", "A latência média das APIs é de 150ms em 99% dos casos."),
            ("c-cache", "O cache distribuído usa Redis com replicação em três zonas."),
            ("c-deploy", "O deployment automático roda via pipeline de CI a cada merge."),
        ];
        for (seq, (chunk_id, text)) in chunks.iter().enumerate() {
            store
                .upsert_chunk(chunk_id, "doc-1", "infra.md", seq, text, &sha256_hex(text))
                .expect("chunk");
        }
        store
    }

    #[test]
    fn search_ranks_matching_chunk_first() {
        let store = seeded_store();
        let results = store
            .search("Qual é a latência média das APIs?", 3)
            .expect("search");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "c-latency");
        assert!(results[0].score.value() < results[1].score.value());
    }

    #[test]
    fn search_is_deterministic() {
        let store = seeded_store();
        let first = store.search("cache distribuído", 3).expect("search");
        let second = store.search("cache distribuído", 3).expect("search");
        let first_ids: Vec<&str> = first.iter().map(|e| e.id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn status_reports_counts() {
        let store = seeded_store();
        let status = store
            .status(std::path::Path::new(":memory:"))
            .expect("status");
        assert_eq!(status.document_count, 1);
        assert_eq!(status.chunk_count, 3);
        assert_eq!(status.embedded_chunk_count, 3);
    }
}
