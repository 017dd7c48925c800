//! Implementations of the `authrag` CLI commands.
//!
//! Each `run_*` function opens what it needs from the config, prints a
//! human-readable result to stdout and closes the pool before returning.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::index::{IndexState, VectorIndex};
use crate::ingest::IngestService;
use crate::retrieval::ChunksService;
use crate::{db, files, migrate, users};

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;

    let index = VectorIndex::open(&config.storage.persist_dir).await?;
    let state = match index.state() {
        IndexState::Restored => "restored",
        IndexState::Fresh => "created",
    };

    println!("Database initialized successfully.");
    println!(
        "Index {} at {} ({} nodes).",
        state,
        config.storage.persist_dir.display(),
        index.node_count().await
    );
    Ok(())
}

/// Ingest files and directories (recursively) and record their ownership.
///
/// New files get `access_level`, or `[ingest].default_access_level` when not
/// given. An explicit `access_level` is also applied to files that were
/// already registered.
pub async fn run_ingest(config: &Config, paths: &[PathBuf], access_level: Option<i64>) -> Result<()> {
    let inputs = collect_files(paths)?;
    if inputs.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let index = Arc::new(VectorIndex::open(&config.storage.persist_dir).await?);
    let embedder = create_provider(&config.embedding)?;
    let service = IngestService::new(index, embedder, config.chunking.clone());

    let docs = service.bulk_ingest(&inputs).await?;
    let level = access_level.unwrap_or(config.ingest.default_access_level);
    service.record_or_undo(&pool, &docs, level).await?;

    let names: BTreeSet<&str> = docs.iter().filter_map(|d| d.file_name()).collect();
    if access_level.is_some() {
        for name in &names {
            files::update_access_level(&pool, name, level).await?;
        }
    }
    pool.close().await;

    println!("files scanned: {}", inputs.len());
    println!("files ingested: {}", names.len());
    println!("documents indexed: {}", docs.len());
    println!("ok");
    Ok(())
}

/// Read every regular file under `paths`. The File name is the file's base
/// name, as it would be for an upload.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    for root in paths {
        if !root.exists() {
            bail!("path does not exist: {}", root.display());
        }
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = base_name(entry.path()) else {
                continue;
            };
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            out.push((name, bytes));
        }
    }
    Ok(out)
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
}

pub async fn run_user_add(config: &Config, username: &str, password: &str, access_level: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let created = users::create_user(&pool, username, password, access_level).await?;
    pool.close().await;

    match created {
        Some(user) => {
            println!("created user {} (access level {})", user.username, user.access_level);
            Ok(())
        }
        None => bail!("username already registered: {}", username),
    }
}

pub async fn run_files(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let all = files::list_files(&pool).await?;

    if all.is_empty() {
        println!("No files.");
        pool.close().await;
        return Ok(());
    }

    println!("{:<40} {:<6} DOCS", "FILE", "LEVEL");
    for file in &all {
        let docs = files::doc_ids_of(&pool, file.id).await?;
        println!("{:<40} {:<6} {}", file.file_name, file.access_level, docs.len());
    }
    pool.close().await;
    Ok(())
}

/// Print the chunks most relevant to `text`, ignoring access levels.
pub async fn run_chunks(config: &Config, text: &str, limit: Option<usize>) -> Result<()> {
    if text.trim().is_empty() {
        bail!("text must not be empty");
    }
    let index = Arc::new(VectorIndex::open(&config.storage.persist_dir).await?);
    let embedder = create_provider(&config.embedding)?;
    let service = ChunksService::new(index, embedder, config.retrieval.most_relevant_window);

    let limit = limit.unwrap_or(config.retrieval.chunks_limit);
    let chunks = service.retrieve_relevant(text, limit, None).await?;
    if chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let meta = chunk.document.doc_metadata.as_ref();
        let file = meta.and_then(|m| m.get("file_name")).map_or("-", String::as_str);
        let page = meta.and_then(|m| m.get("page_label")).map_or("-", String::as_str);
        println!("{}. [{:.2}] {} (page {})", i + 1, chunk.score, file, page);
        println!("    doc: {}", chunk.document.doc_id);
        println!("    > {}", preview(&chunk.text, 160));
        println!();
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_chars() {
        assert_eq!(preview("a  b\n c", 10), "a b c");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }

    #[test]
    fn test_hidden_files_are_skipped() {
        assert_eq!(base_name(Path::new("/x/.DS_Store")), None);
        assert_eq!(base_name(Path::new("/x/A.txt")).as_deref(), Some("A.txt"));
    }
}
