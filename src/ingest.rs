//! Ingestion pipeline: load, split, embed, index.
//!
//! ```text
//! (file_name, bytes) ─▶ extract::load_documents ─▶ chunk::split_text
//!                                                        │
//!                      VectorIndex::insert ◀── embed ◀───┘
//! ```
//!
//! Each loaded document (a whole file, or one PDF page) becomes one
//! document unit with a fresh UUID and `file_name` / `doc_id` /
//! `page_label` metadata. Embeddings are computed before the index's
//! writer lock is taken, so a slow provider never blocks other writers.
//!
//! Recording File/FileDoc ownership is the caller's job, through
//! [`IngestService::record_or_undo`]; text ingested through
//! [`IngestService::ingest_text`] is deliberately left unowned.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::chunk::split_text;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::extract::{load_documents, ExtractError, LoadedDocument};
use crate::files;
use crate::index::{NewDocument, VectorIndex};
use crate::models::{DocMetadata, IngestedDoc};

pub struct IngestService {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
}

impl IngestService {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            chunking,
        }
    }

    /// Ingest an uploaded file.
    ///
    /// Fails with [`ExtractError`] (inside the `anyhow` chain) when the file
    /// cannot be read or yields no text.
    pub async fn ingest_bin_data(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<IngestedDoc>> {
        let loaded = load_documents(file_name, bytes)?;
        if loaded.is_empty() {
            return Err(ExtractError::Empty(file_name.to_string()).into());
        }
        let docs = self.prepare(file_name, loaded).await?;
        let ingested = self.index.insert(docs).await?;
        tracing::info!(file_name, documents = ingested.len(), "ingested file");
        Ok(ingested)
    }

    /// Ingest raw text under a display name. The result has no owning File.
    pub async fn ingest_text(&self, file_name: &str, text: &str) -> Result<Vec<IngestedDoc>> {
        if text.trim().is_empty() {
            return Err(ExtractError::Empty(file_name.to_string()).into());
        }
        let loaded = vec![LoadedDocument {
            text: text.to_string(),
            page_label: None,
        }];
        let docs = self.prepare(file_name, loaded).await?;
        let ingested = self.index.insert(docs).await?;
        tracing::info!(file_name, documents = ingested.len(), "ingested text");
        Ok(ingested)
    }

    /// Ingest many files with a single index write. Files that cannot be
    /// loaded are skipped with a warning.
    pub async fn bulk_ingest(&self, files: &[(String, Vec<u8>)]) -> Result<Vec<IngestedDoc>> {
        let mut docs = Vec::new();
        for (file_name, bytes) in files {
            match load_documents(file_name, bytes) {
                Ok(loaded) if loaded.is_empty() => {
                    tracing::warn!(file_name = %file_name, "no text extracted; skipped");
                }
                Ok(loaded) => docs.extend(self.prepare(file_name, loaded).await?),
                Err(e) => tracing::warn!(file_name = %file_name, error = %e, "skipped"),
            }
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let ingested = self.index.insert(docs).await?;
        tracing::info!(files = files.len(), documents = ingested.len(), "bulk ingest finished");
        Ok(ingested)
    }

    /// Record File/FileDoc ownership of freshly ingested `docs`. If that
    /// fails the documents are removed from the index again, since unowned
    /// documents are readable by nobody, and the recording error is returned.
    pub async fn record_or_undo(
        &self,
        pool: &SqlitePool,
        docs: &[IngestedDoc],
        default_level: i64,
    ) -> Result<()> {
        let Err(e) = files::record_ingestion(pool, docs, default_level).await else {
            return Ok(());
        };
        tracing::warn!(
            documents = docs.len(),
            error = %e,
            "recording ownership failed; removing documents"
        );
        for doc in docs {
            if let Err(undo) = self.index.delete(&doc.doc_id).await {
                tracing::warn!(doc_id = %doc.doc_id, error = %undo, "rollback delete failed");
            }
        }
        Err(e)
    }

    pub async fn list_ingested(&self) -> Vec<IngestedDoc> {
        self.index.list_documents().await
    }

    /// Remove a document from the index. Unknown ids return `false`.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        self.index.delete(doc_id).await
    }

    /// Split and embed loaded documents into insertable units.
    async fn prepare(&self, file_name: &str, loaded: Vec<LoadedDocument>) -> Result<Vec<NewDocument>> {
        let mut docs = Vec::with_capacity(loaded.len());
        let mut texts = Vec::new();

        for doc in loaded {
            let pieces = split_text(
                &doc.text,
                self.chunking.max_tokens,
                self.chunking.overlap_tokens,
            );
            if pieces.is_empty() {
                continue;
            }
            let doc_id = uuid::Uuid::new_v4().to_string();
            let mut metadata = DocMetadata::new();
            metadata.insert("file_name".to_string(), file_name.to_string());
            metadata.insert("doc_id".to_string(), doc_id.clone());
            if let Some(page) = doc.page_label {
                metadata.insert("page_label".to_string(), page);
            }
            docs.push((doc_id, metadata, pieces.len()));
            texts.extend(pieces);
        }

        let embeddings = self.embedder.embed_texts(&texts).await?;
        if embeddings.len() != texts.len() {
            bail!(
                "embedding provider returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            );
        }

        let mut pairs = texts.into_iter().zip(embeddings);
        Ok(docs
            .into_iter()
            .map(|(doc_id, metadata, count)| NewDocument {
                doc_id,
                metadata,
                nodes: pairs.by_ref().take(count).collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockProvider;
    use tempfile::TempDir;

    async fn service(tmp: &TempDir) -> IngestService {
        let index = Arc::new(VectorIndex::open(tmp.path()).await.unwrap());
        IngestService::new(
            index,
            Arc::new(MockProvider::new(64)),
            ChunkingConfig {
                max_tokens: 8,
                overlap_tokens: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_ingest_file_sets_metadata() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp).await;
        let docs = svc
            .ingest_bin_data("notes.md", b"first paragraph here\n\nsecond paragraph there")
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        let meta = docs[0].doc_metadata.as_ref().unwrap();
        assert_eq!(meta["file_name"], "notes.md");
        assert_eq!(meta["doc_id"], docs[0].doc_id);
        assert!(!meta.contains_key("page_label"));
        assert_eq!(svc.list_ingested().await, docs);
    }

    #[tokio::test]
    async fn test_empty_upload_is_an_extract_error() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp).await;
        let err = svc.ingest_bin_data("blank.txt", b"   ").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ExtractError>(), Some(ExtractError::Empty(_))));
    }

    #[tokio::test]
    async fn test_bulk_ingest_skips_unreadable_files() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp).await;
        let files = vec![
            ("a.txt".to_string(), b"alpha".to_vec()),
            ("b.bin".to_string(), vec![0xff, 0xfe, 0x81]),
            ("c.txt".to_string(), b"gamma".to_vec()),
        ];
        let docs = svc.bulk_ingest(&files).await.unwrap();
        let names: Vec<_> = docs.iter().filter_map(|d| d.file_name()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_failed_recording_removes_documents() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp).await;
        // No migrations: the files table is missing and recording fails.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let files = vec![("a.txt".to_string(), b"alpha".to_vec())];
        let docs = svc.bulk_ingest(&files).await.unwrap();
        assert_eq!(svc.list_ingested().await.len(), 1);

        assert!(svc.record_or_undo(&pool, &docs, 1).await.is_err());
        assert!(svc.list_ingested().await.is_empty());
    }

    #[tokio::test]
    async fn test_recorded_documents_are_kept() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp).await;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let docs = svc.ingest_bin_data("a.txt", b"alpha").await.unwrap();
        svc.record_or_undo(&pool, &docs, 2).await.unwrap();
        assert_eq!(svc.list_ingested().await, docs);
        let file = files::find_file(&pool, "a.txt").await.unwrap().unwrap();
        assert_eq!(file.access_level, 2);
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp).await;
        let docs = svc.ingest_text("memo", "some words").await.unwrap();
        assert!(svc.delete(&docs[0].doc_id).await.unwrap());
        assert!(!svc.delete(&docs[0].doc_id).await.unwrap());
    }
}
