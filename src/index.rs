//! Persisted vector index and document store.
//!
//! Nodes (embedded passages) and the documents that own them are held in
//! memory and written to files under `storage.persist_dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `docstore.json` | documents (id, metadata, node ids) and node texts |
//! | `vector_store.json` | one embedding per node, in insertion order |
//! | `revision` | token replaced on every write |
//! | `.lock` | advisory lock shared by every process using the directory |
//!
//! # Lifecycle
//!
//! [`VectorIndex::open`] either restores both files ([`IndexState::Restored`])
//! or, when neither exists, persists an empty index ([`IndexState::Fresh`]).
//! A store with only one of the files, or with unparseable contents, is
//! rejected rather than silently overwritten.
//!
//! # Durability
//!
//! Each file is replaced atomically (temp file, then rename), the docstore
//! before the vectors. A write interrupted between the two leaves nodes
//! without vectors or vectors without nodes; loading drops those entries,
//! and documents left with no nodes, so the pair always restores.
//!
//! # Concurrency
//!
//! The server and CLI commands may open the same directory at once. Every
//! mutation takes the directory's exclusive file lock, reloads the persisted
//! store, applies the change to that copy, writes it and only then swaps it
//! in, so writers in different processes never overwrite each other and a
//! failed write leaves memory untouched. Within a process a writer mutex
//! serialises mutations. Reads use the in-memory copy and reload it first
//! when another writer has moved the `revision` on.
//!
//! # Search
//!
//! Brute-force cosine similarity over all (or filtered) nodes. Results are
//! ordered by score descending, ties keeping insertion order. Nodes with a
//! similarity of zero or less are not considered matches.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::embedding::cosine_similarity;
use crate::models::{ContextFilter, DocMetadata, IngestedDoc};
use crate::retrieval::sort_by_score;

const DOCSTORE_FILE: &str = "docstore.json";
const VECTOR_STORE_FILE: &str = "vector_store.json";
const REVISION_FILE: &str = "revision";
const LOCK_FILE: &str = ".lock";

/// An embedded passage belonging to one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub node_id: String,
    pub ref_doc_id: String,
    pub text: String,
    pub metadata: DocMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    doc_id: String,
    metadata: DocMetadata,
    node_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocStore {
    documents: Vec<StoredDocument>,
    nodes: HashMap<String, Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    node_id: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VectorStore {
    embeddings: Vec<VectorEntry>,
}

#[derive(Debug, Default)]
struct IndexData {
    docstore: DocStore,
    vectors: VectorStore,
    /// Revision this copy was loaded at or written as.
    revision: Option<String>,
}

/// How the index came to be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Both persisted files were found and loaded.
    Restored,
    /// Nothing was persisted yet; an empty index was created and saved.
    Fresh,
}

/// A document to insert: its id, metadata and embedded passages.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_id: String,
    pub metadata: DocMetadata,
    /// `(text, embedding)` per node.
    pub nodes: Vec<(String, Vec<f32>)>,
}

/// A query hit. `score` is optional so callers can treat unscored hits
/// uniformly with other retrieval backends.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNode {
    pub node: Node,
    pub score: Option<f32>,
}

pub struct VectorIndex {
    persist_dir: PathBuf,
    state: IndexState,
    data: RwLock<IndexData>,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Load the index from `persist_dir`, creating an empty one if the
    /// directory holds no index yet.
    pub async fn open(persist_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(persist_dir)
            .await
            .with_context(|| format!("Failed to create {}", persist_dir.display()))?;

        let lock = StoreLock::acquire(persist_dir, true).await?;
        let (state, data) = match load(persist_dir).await? {
            Some(data) => {
                tracing::info!(
                    path = %persist_dir.display(),
                    documents = data.docstore.documents.len(),
                    nodes = data.vectors.embeddings.len(),
                    "restored vector index"
                );
                (IndexState::Restored, data)
            }
            None => {
                let mut data = IndexData::default();
                data.revision = Some(write_snapshot(persist_dir, &Snapshot::of(&data)?).await?);
                tracing::info!(path = %persist_dir.display(), "created empty vector index");
                (IndexState::Fresh, data)
            }
        };
        drop(lock);

        Ok(Self {
            persist_dir: persist_dir.to_path_buf(),
            state,
            data: RwLock::new(data),
            writer: Mutex::new(()),
        })
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Nearest nodes to `query`, best first, at most `top_k`.
    pub async fn query(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&ContextFilter>,
    ) -> Vec<ScoredNode> {
        self.refresh().await;
        let data = self.data.read().await;
        let mut hits: Vec<ScoredNode> = data
            .vectors
            .embeddings
            .iter()
            .filter_map(|entry| {
                let node = data.docstore.nodes.get(&entry.node_id)?;
                if let Some(f) = filter {
                    if !f.allows(&node.ref_doc_id) {
                        return None;
                    }
                }
                let score = cosine_similarity(query, &entry.embedding);
                (score > 0.0).then(|| ScoredNode {
                    node: node.clone(),
                    score: Some(score),
                })
            })
            .collect();

        sort_by_score(&mut hits);
        hits.truncate(top_k);
        hits
    }

    /// Insert documents and persist. Returns their descriptors in input order.
    pub async fn insert(&self, docs: Vec<NewDocument>) -> Result<Vec<IngestedDoc>> {
        let out = self
            .commit(|data| add_documents(data, docs).map(Some))
            .await?
            .unwrap_or_default();
        tracing::debug!(documents = out.len(), "inserted documents into index");
        Ok(out)
    }

    /// Remove a document and its nodes, then persist.
    ///
    /// Returns `false` without writing when the document is unknown, so
    /// deleting the same id twice is harmless.
    pub async fn delete(&self, doc_id: &str) -> Result<bool> {
        match self.commit(|data| Ok(remove_document(data, doc_id))).await? {
            Some(nodes) => {
                tracing::info!(doc_id, nodes, "deleted document from index");
                Ok(true)
            }
            None => {
                tracing::warn!(doc_id, "delete of unknown document ignored");
                Ok(false)
            }
        }
    }

    /// All documents, in insertion order.
    pub async fn list_documents(&self) -> Vec<IngestedDoc> {
        self.refresh().await;
        let data = self.data.read().await;
        data.docstore
            .documents
            .iter()
            .map(|d| IngestedDoc::new(d.doc_id.clone(), Some(d.metadata.clone())))
            .collect()
    }

    pub async fn get_document(&self, doc_id: &str) -> Option<IngestedDoc> {
        self.refresh().await;
        let data = self.data.read().await;
        data.docstore
            .documents
            .iter()
            .find(|d| d.doc_id == doc_id)
            .map(|d| IngestedDoc::new(d.doc_id.clone(), Some(d.metadata.clone())))
    }

    pub async fn node_count(&self) -> usize {
        self.refresh().await;
        self.data.read().await.vectors.embeddings.len()
    }

    /// Apply `apply` to the persisted store under the directory lock, write
    /// the result and swap it in. `apply` returning `None` means nothing
    /// changed and nothing is written.
    async fn commit<T>(
        &self,
        apply: impl FnOnce(&mut IndexData) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let _w = self.writer.lock().await;
        let _lock = StoreLock::acquire(&self.persist_dir, true).await?;

        let mut candidate = load(&self.persist_dir)
            .await?
            .with_context(|| format!("No index left in {}", self.persist_dir.display()))?;
        let Some(out) = apply(&mut candidate)? else {
            *self.data.write().await = candidate;
            return Ok(None);
        };

        candidate.revision =
            Some(write_snapshot(&self.persist_dir, &Snapshot::of(&candidate)?).await?);
        *self.data.write().await = candidate;
        Ok(Some(out))
    }

    /// Reload from disk if another writer changed the store since this copy
    /// was taken. Failures keep the current copy.
    async fn refresh(&self) {
        let on_disk = read_revision(&self.persist_dir).await;
        if on_disk.is_none() || on_disk == self.data.read().await.revision {
            return;
        }

        let _w = self.writer.lock().await;
        if on_disk == self.data.read().await.revision {
            return;
        }
        let reloaded = async {
            let _lock = StoreLock::acquire(&self.persist_dir, false).await?;
            load(&self.persist_dir).await
        }
        .await;
        match reloaded {
            Ok(Some(data)) => {
                tracing::debug!(path = %self.persist_dir.display(), "reloaded vector index");
                *self.data.write().await = data;
            }
            Ok(None) => {
                tracing::warn!(path = %self.persist_dir.display(), "vector index files vanished")
            }
            Err(e) => tracing::warn!(error = %e, "failed to reload vector index"),
        }
    }
}

/// Validate and append `docs`. Nothing is changed when any document fails.
fn add_documents(data: &mut IndexData, docs: Vec<NewDocument>) -> Result<Vec<IngestedDoc>> {
    let mut dims = data.vectors.embeddings.first().map(|e| e.embedding.len());
    for doc in &docs {
        if data.docstore.documents.iter().any(|d| d.doc_id == doc.doc_id) {
            bail!("document {} already exists", doc.doc_id);
        }
        for (_, embedding) in &doc.nodes {
            match dims {
                Some(d) if d != embedding.len() => bail!(
                    "embedding dimension mismatch: index has {}, got {}",
                    d,
                    embedding.len()
                ),
                None => dims = Some(embedding.len()),
                _ => {}
            }
        }
    }

    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut node_ids = Vec::with_capacity(doc.nodes.len());
        for (text, embedding) in doc.nodes {
            let node_id = uuid::Uuid::new_v4().to_string();
            data.docstore.nodes.insert(
                node_id.clone(),
                Node {
                    node_id: node_id.clone(),
                    ref_doc_id: doc.doc_id.clone(),
                    text,
                    metadata: doc.metadata.clone(),
                },
            );
            data.vectors.embeddings.push(VectorEntry {
                node_id: node_id.clone(),
                embedding,
            });
            node_ids.push(node_id);
        }
        out.push(IngestedDoc::new(doc.doc_id.clone(), Some(doc.metadata.clone())));
        data.docstore.documents.push(StoredDocument {
            doc_id: doc.doc_id,
            metadata: doc.metadata,
            node_ids,
        });
    }
    Ok(out)
}

/// Remove `doc_id` and its nodes. Returns the number of nodes removed, or
/// `None` for an unknown document.
fn remove_document(data: &mut IndexData, doc_id: &str) -> Option<usize> {
    let pos = data
        .docstore
        .documents
        .iter()
        .position(|d| d.doc_id == doc_id)?;

    let doc = data.docstore.documents.remove(pos);
    let removed: HashSet<&str> = doc.node_ids.iter().map(String::as_str).collect();
    for node_id in &doc.node_ids {
        data.docstore.nodes.remove(node_id);
    }
    data.vectors
        .embeddings
        .retain(|e| !removed.contains(e.node_id.as_str()));
    Some(doc.node_ids.len())
}

/// Serialized form of the index.
struct Snapshot {
    docstore: String,
    vectors: String,
}

impl Snapshot {
    fn of(data: &IndexData) -> Result<Self> {
        Ok(Self {
            docstore: serde_json::to_string(&data.docstore)?,
            vectors: serde_json::to_string(&data.vectors)?,
        })
    }
}

/// Exclusive or shared advisory lock on a persist directory, released when
/// dropped.
struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    async fn acquire(persist_dir: &Path, exclusive: bool) -> Result<Self> {
        let path = persist_dir.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let locked = if exclusive {
                FileExt::lock_exclusive(&file)
            } else {
                FileExt::lock_shared(&file)
            };
            locked.with_context(|| format!("Failed to lock {}", path.display()))?;
            Ok(Self { _file: file })
        })
        .await
        .context("index lock task panicked")?
    }
}

/// Read both files, or `None` when neither exists. Call with the directory
/// lock held.
async fn load(persist_dir: &Path) -> Result<Option<IndexData>> {
    let docstore_path = persist_dir.join(DOCSTORE_FILE);
    let vectors_path = persist_dir.join(VECTOR_STORE_FILE);
    let has_docstore = tokio::fs::try_exists(&docstore_path).await?;
    let has_vectors = tokio::fs::try_exists(&vectors_path).await?;

    match (has_docstore, has_vectors) {
        (true, true) => {
            let mut docstore: DocStore = read_json(&docstore_path).await?;
            let mut vectors: VectorStore = read_json(&vectors_path).await?;
            let dropped = reconcile(&mut docstore, &mut vectors);
            if dropped > 0 {
                tracing::warn!(
                    path = %persist_dir.display(),
                    dropped,
                    "dropped index entries left by an interrupted write"
                );
            }
            Ok(Some(IndexData {
                docstore,
                vectors,
                revision: read_revision(persist_dir).await,
            }))
        }
        (false, false) => Ok(None),
        _ => bail!(
            "Incomplete index in {}: expected both {} and {}",
            persist_dir.display(),
            DOCSTORE_FILE,
            VECTOR_STORE_FILE
        ),
    }
}

/// Write the docstore, then the vectors, then a new revision token, which
/// is returned.
async fn write_snapshot(persist_dir: &Path, snapshot: &Snapshot) -> Result<String> {
    write_atomic(&persist_dir.join(DOCSTORE_FILE), &snapshot.docstore).await?;
    write_atomic(&persist_dir.join(VECTOR_STORE_FILE), &snapshot.vectors).await?;
    let revision = uuid::Uuid::new_v4().to_string();
    write_atomic(&persist_dir.join(REVISION_FILE), &revision).await?;
    tracing::debug!(path = %persist_dir.display(), %revision, "persisted vector index");
    Ok(revision)
}

async fn read_revision(persist_dir: &Path) -> Option<String> {
    tokio::fs::read_to_string(persist_dir.join(REVISION_FILE))
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Corrupt index file {}", path.display()))
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Drop vectors whose node is missing, nodes without a vector, and
/// documents that lost all their nodes that way. Returns how many entries
/// were dropped.
fn reconcile(docstore: &mut DocStore, vectors: &mut VectorStore) -> usize {
    let before =
        vectors.embeddings.len() + docstore.nodes.len() + docstore.documents.len();

    vectors
        .embeddings
        .retain(|e| docstore.nodes.contains_key(&e.node_id));
    let embedded: HashSet<&str> = vectors
        .embeddings
        .iter()
        .map(|e| e.node_id.as_str())
        .collect();
    docstore.nodes.retain(|id, _| embedded.contains(id.as_str()));
    docstore.documents.retain_mut(|doc| {
        let had = doc.node_ids.len();
        doc.node_ids.retain(|id| embedded.contains(id.as_str()));
        had == 0 || !doc.node_ids.is_empty()
    });

    before - (vectors.embeddings.len() + docstore.nodes.len() + docstore.documents.len())
}
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(file: &str) -> DocMetadata {
        let mut m = DocMetadata::new();
        m.insert("file_name".into(), file.into());
        m
    }

    fn doc(id: &str, nodes: &[(&str, [f32; 3])]) -> NewDocument {
        NewDocument {
            doc_id: id.into(),
            metadata: meta(&format!("{id}.txt")),
            nodes: nodes
                .iter()
                .map(|(t, v)| (t.to_string(), v.to_vec()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_fresh_then_restored() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        assert_eq!(index.state(), IndexState::Fresh);
        assert!(tmp.path().join(DOCSTORE_FILE).exists());
        assert!(tmp.path().join(VECTOR_STORE_FILE).exists());

        index
            .insert(vec![doc("a", &[("alpha", [1.0, 0.0, 0.0])])])
            .await
            .unwrap();
        drop(index);

        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.state(), IndexState::Restored);
        assert_eq!(reopened.node_count().await, 1);
        assert_eq!(reopened.list_documents().await[0].doc_id, "a");
    }

    #[tokio::test]
    async fn test_half_persisted_store_is_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(DOCSTORE_FILE), "{}").unwrap();
        assert!(VectorIndex::open(tmp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_query_orders_by_score_and_drops_non_matches() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![
                doc("a", &[("weak", [1.0, 1.0, 0.0])]),
                doc("b", &[("strong", [1.0, 0.0, 0.0])]),
                doc("c", &[("orthogonal", [0.0, 0.0, 1.0])]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0, 0.0], 10, None).await;
        let texts: Vec<&str> = hits.iter().map(|h| h.node.text.as_str()).collect();
        assert_eq!(texts, vec!["strong", "weak"]);

        let top1 = index.query(&[1.0, 0.0, 0.0], 1, None).await;
        assert_eq!(top1.len(), 1);
        assert_eq!(top1[0].node.ref_doc_id, "b");
    }

    #[tokio::test]
    async fn test_equal_scores_keep_insertion_order() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![
                doc("first", &[("one", [0.0, 1.0, 0.0])]),
                doc("second", &[("two", [0.0, 1.0, 0.0])]),
            ])
            .await
            .unwrap();
        let hits = index.query(&[0.0, 1.0, 0.0], 5, None).await;
        assert_eq!(hits[0].node.ref_doc_id, "first");
        assert_eq!(hits[1].node.ref_doc_id, "second");
    }

    #[tokio::test]
    async fn test_filter_restricts_documents() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![
                doc("a", &[("a1", [1.0, 0.0, 0.0])]),
                doc("b", &[("b1", [1.0, 0.1, 0.0])]),
            ])
            .await
            .unwrap();

        let only_b = ContextFilter::only(vec!["b".into()]);
        let hits = index.query(&[1.0, 0.0, 0.0], 5, Some(&only_b)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.ref_doc_id, "b");

        let nothing = ContextFilter::only(vec![]);
        assert!(index.query(&[1.0, 0.0, 0.0], 5, Some(&nothing)).await.is_empty());

        let unrestricted = ContextFilter::default();
        assert_eq!(index.query(&[1.0, 0.0, 0.0], 5, Some(&unrestricted)).await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![doc("a", &[("x", [1.0, 0.0, 0.0]), ("y", [0.0, 1.0, 0.0])])])
            .await
            .unwrap();

        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert_eq!(index.node_count().await, 0);
        assert!(index.get_document("a").await.is_none());

        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        assert!(reopened.list_documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_write_is_reconciled_on_open() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![doc("a", &[("alpha", [1.0, 0.0, 0.0])])])
            .await
            .unwrap();
        let docstore_a = std::fs::read(tmp.path().join(DOCSTORE_FILE)).unwrap();
        let vectors_a = std::fs::read(tmp.path().join(VECTOR_STORE_FILE)).unwrap();
        index
            .insert(vec![doc("b", &[("beta", [0.0, 1.0, 0.0])])])
            .await
            .unwrap();
        let docstore_ab = std::fs::read(tmp.path().join(DOCSTORE_FILE)).unwrap();
        drop(index);

        // Vectors written, docstore not: "b" has vectors but no nodes.
        std::fs::write(tmp.path().join(DOCSTORE_FILE), &docstore_a).unwrap();
        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        let ids: Vec<String> = reopened.list_documents().await.into_iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(reopened.node_count().await, 1);
        drop(reopened);

        // Docstore written, vectors not: "b" has nodes but no vectors.
        std::fs::write(tmp.path().join(DOCSTORE_FILE), &docstore_ab).unwrap();
        std::fs::write(tmp.path().join(VECTOR_STORE_FILE), &vectors_a).unwrap();
        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        let ids: Vec<String> = reopened.list_documents().await.into_iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(reopened.query(&[0.0, 1.0, 0.0], 5, None).await.is_empty());

        // The next write persists the repaired pair.
        reopened
            .insert(vec![doc("c", &[("gamma", [0.0, 0.0, 1.0])])])
            .await
            .unwrap();
        assert_eq!(reopened.node_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_index_unchanged() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![doc("a", &[("alpha", [1.0, 0.0, 0.0])])])
            .await
            .unwrap();

        // A directory in the way of the temp file makes the write fail.
        let blocker = tmp.path().join(format!("{DOCSTORE_FILE}.tmp"));
        std::fs::create_dir(&blocker).unwrap();
        assert!(index
            .insert(vec![doc("b", &[("beta", [0.0, 1.0, 0.0])])])
            .await
            .is_err());
        assert!(index.get_document("b").await.is_none());
        assert!(index.query(&[0.0, 1.0, 0.0], 5, None).await.is_empty());

        assert!(index.delete("a").await.is_err());
        assert!(index.get_document("a").await.is_some());

        std::fs::remove_dir(&blocker).unwrap();
        index
            .insert(vec![doc("c", &[("gamma", [0.0, 0.0, 1.0])])])
            .await
            .unwrap();
        drop(index);

        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        let ids: Vec<String> = reopened.list_documents().await.into_iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_writers_sharing_a_directory_keep_each_others_documents() {
        let tmp = TempDir::new().unwrap();
        let server = VectorIndex::open(tmp.path()).await.unwrap();
        let cli = VectorIndex::open(tmp.path()).await.unwrap();

        cli.insert(vec![doc("from_cli", &[("cli", [1.0, 0.0, 0.0])])])
            .await
            .unwrap();
        server
            .insert(vec![doc("from_upload", &[("upload", [0.0, 1.0, 0.0])])])
            .await
            .unwrap();

        // The first writer sees the second one's document without reopening.
        assert!(cli.get_document("from_upload").await.is_some());
        assert_eq!(cli.query(&[0.0, 1.0, 0.0], 5, None).await.len(), 1);

        drop(server);
        drop(cli);
        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        let ids: Vec<String> = reopened.list_documents().await.into_iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec!["from_cli", "from_upload"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_without_mutation() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path()).await.unwrap();
        index
            .insert(vec![doc("a", &[("x", [1.0, 0.0, 0.0])])])
            .await
            .unwrap();
        let bad = NewDocument {
            doc_id: "b".into(),
            metadata: DocMetadata::new(),
            nodes: vec![("y".into(), vec![1.0, 0.0])],
        };
        assert!(index.insert(vec![bad]).await.is_err());
        assert_eq!(index.list_documents().await.len(), 1);
    }
}
