//! File ownership records: which source file each indexed document came
//! from and the access level that file requires.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{File, IngestedDoc};

fn file_from_row(row: &SqliteRow) -> File {
    File {
        id: row.get("id"),
        file_name: row.get("file_name"),
        access_level: row.get("access_level"),
    }
}

/// Link freshly ingested documents to their File rows.
///
/// The File named by each document's `file_name` metadata is created with
/// `default_level` on first sight and reused afterwards. Every document gets
/// one FileDoc row. The whole batch commits or rolls back together, so a
/// failed insert never leaves a File without its documents.
pub async fn record_ingestion(
    pool: &SqlitePool,
    docs: &[IngestedDoc],
    default_level: i64,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for doc in docs {
        let Some(file_name) = doc.file_name() else {
            tracing::warn!(doc_id = %doc.doc_id, "document has no file_name; not recorded");
            continue;
        };

        // Write first: a deferred transaction that starts with a read cannot
        // wait for the write lock held by another connection.
        let inserted = sqlx::query(
            "INSERT INTO files (file_name, access_level) VALUES (?, ?) \
             ON CONFLICT(file_name) DO NOTHING",
        )
        .bind(file_name)
        .bind(default_level)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 1 {
            tracing::info!(file_name, access_level = default_level, "registered file");
        }

        let file_id: i64 = sqlx::query_scalar("SELECT id FROM files WHERE file_name = ?")
            .bind(file_name)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO file_docs (file_id, doc_id) VALUES (?, ?)")
            .bind(file_id)
            .bind(&doc.doc_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_files(pool: &SqlitePool) -> Result<Vec<File>> {
    let rows = sqlx::query("SELECT id, file_name, access_level FROM files ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(file_from_row).collect())
}

pub async fn find_file(pool: &SqlitePool, file_name: &str) -> Result<Option<File>> {
    let row = sqlx::query("SELECT id, file_name, access_level FROM files WHERE file_name = ?")
        .bind(file_name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(file_from_row))
}

pub async fn doc_ids_of(pool: &SqlitePool, file_id: i64) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT doc_id FROM file_docs WHERE file_id = ? ORDER BY id")
        .bind(file_id)
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn update_access_level(
    pool: &SqlitePool,
    file_name: &str,
    access_level: i64,
) -> Result<Option<File>> {
    let done = sqlx::query("UPDATE files SET access_level = ? WHERE file_name = ?")
        .bind(access_level)
        .bind(file_name)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Ok(None);
    }
    find_file(pool, file_name).await
}

/// Delete a File and, by cascade, its FileDoc rows. Returns the doc ids that
/// were linked so the caller can drop them from the index, or `None` if no
/// such file exists.
pub async fn delete_file(pool: &SqlitePool, file_name: &str) -> Result<Option<Vec<String>>> {
    let mut tx = pool.begin().await?;

    // RETURNING order is unspecified; link ids restore ingestion order.
    let mut links: Vec<(i64, String)> = sqlx::query_as(
        "DELETE FROM file_docs \
         WHERE file_id = (SELECT id FROM files WHERE file_name = ?) \
         RETURNING id, doc_id",
    )
    .bind(file_name)
    .fetch_all(&mut *tx)
    .await?;
    links.sort_by_key(|(id, _)| *id);
    let doc_ids: Vec<String> = links.into_iter().map(|(_, doc_id)| doc_id).collect();

    let done = sqlx::query("DELETE FROM files WHERE file_name = ?")
        .bind(file_name)
        .execute(&mut *tx)
        .await?;
    if done.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    tx.commit().await?;
    tracing::info!(file_name, documents = doc_ids.len(), "deleted file");
    Ok(Some(doc_ids))
}

/// Drop the FileDoc row of a single document. The File itself is kept even
/// if this was its last document.
pub async fn forget_doc(pool: &SqlitePool, doc_id: &str) -> Result<bool> {
    let done = sqlx::query("DELETE FROM file_docs WHERE doc_id = ?")
        .bind(doc_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocMetadata;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn doc(id: &str, file: Option<&str>) -> IngestedDoc {
        let meta = file.map(|f| {
            let mut m = DocMetadata::new();
            m.insert("file_name".into(), f.into());
            m
        });
        IngestedDoc::new(id, meta)
    }

    #[tokio::test]
    async fn test_first_ingestion_creates_file_with_default_level() {
        let pool = pool().await;
        record_ingestion(&pool, &[doc("d1", Some("A.txt")), doc("d2", Some("A.txt"))], 1)
            .await
            .unwrap();

        let files = list_files(&pool).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "A.txt");
        assert_eq!(files[0].access_level, 1);
        assert_eq!(doc_ids_of(&pool, files[0].id).await.unwrap(), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_reingestion_reuses_file_and_keeps_level() {
        let pool = pool().await;
        record_ingestion(&pool, &[doc("d1", Some("A.txt"))], 1).await.unwrap();
        update_access_level(&pool, "A.txt", 3).await.unwrap();
        record_ingestion(&pool, &[doc("d2", Some("A.txt"))], 1).await.unwrap();

        let file = find_file(&pool, "A.txt").await.unwrap().unwrap();
        assert_eq!(file.access_level, 3);
        assert_eq!(doc_ids_of(&pool, file.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_orphan_file() {
        let pool = pool().await;
        record_ingestion(&pool, &[doc("dup", Some("A.txt"))], 1).await.unwrap();

        // "dup" violates the unique doc_id after B.txt was inserted.
        let err = record_ingestion(&pool, &[doc("d9", Some("B.txt")), doc("dup", Some("B.txt"))], 1).await;
        assert!(err.is_err());
        assert!(find_file(&pool, "B.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_file_cascades() {
        let pool = pool().await;
        record_ingestion(&pool, &[doc("d1", Some("A.txt")), doc("d2", Some("A.txt"))], 1)
            .await
            .unwrap();

        let removed = delete_file(&pool, "A.txt").await.unwrap().unwrap();
        assert_eq!(removed, vec!["d1", "d2"]);

        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_docs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 0);
        assert!(delete_file(&pool, "A.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_ingestions_on_shared_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = crate::config::parse_config(&format!(
            "[db]\npath = \"{}\"\n\n[storage]\npersist_dir = \"{}\"\n\n[auth]\nsecret = \"s\"\n",
            tmp.path().join("authrag.sqlite").display(),
            tmp.path().join("index").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..25 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                // Every fifth upload re-uses a file name.
                let name = format!("file{}.txt", i % 20);
                record_ingestion(&pool, &[doc(&format!("d{i}"), Some(&name))], 1).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(list_files(&pool).await.unwrap().len(), 20);
        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_docs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(links, 25);

        let mut removed = delete_file(&pool, "file0.txt").await.unwrap().unwrap();
        removed.sort();
        assert_eq!(removed, vec!["d0", "d20"]);
    }

    #[tokio::test]
    async fn test_docs_without_file_name_are_skipped() {
        let pool = pool().await;
        record_ingestion(&pool, &[doc("t1", None)], 1).await.unwrap();
        assert!(list_files(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forget_doc() {
        let pool = pool().await;
        record_ingestion(&pool, &[doc("d1", Some("A.txt"))], 1).await.unwrap();
        assert!(forget_doc(&pool, "d1").await.unwrap());
        assert!(!forget_doc(&pool, "d1").await.unwrap());
        assert!(find_file(&pool, "A.txt").await.unwrap().is_some());
    }
}
