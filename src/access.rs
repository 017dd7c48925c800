//! Access control over indexed documents.
//!
//! A document is readable by a user when the File that owns it carries a
//! level the user's level satisfies under the configured [`AccessPolicy`].
//! Documents with no owning File (text ingestion) are never accessible.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

pub use crate::config::AccessPolicy;
use crate::models::User;

impl AccessPolicy {
    pub fn permits(self, user_level: i64, file_level: i64) -> bool {
        match self {
            AccessPolicy::Exact => user_level == file_level,
            AccessPolicy::AtLeast => user_level >= file_level,
        }
    }
}

/// Candidate ids split by whether the user may read them. Both lists keep
/// the candidate order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPartition {
    pub accessible: Vec<String>,
    pub inaccessible: Vec<String>,
}

/// Owning File level for each of `doc_ids` that has one.
async fn levels_of(pool: &SqlitePool, doc_ids: &[String]) -> Result<HashMap<String, i64>> {
    if doc_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let ids_json = serde_json::to_string(doc_ids)?;
    let rows = sqlx::query(
        r#"
        SELECT fd.doc_id AS doc_id, f.access_level AS access_level
        FROM file_docs fd
        JOIN files f ON f.id = fd.file_id
        WHERE fd.doc_id IN (SELECT value FROM json_each(?))
        "#,
    )
    .bind(ids_json)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("doc_id"), row.get::<i64, _>("access_level")))
        .collect())
}

/// The subset of `candidates` the user may read, in candidate order.
pub async fn accessible_doc_ids(
    pool: &SqlitePool,
    user: &User,
    candidates: &[String],
    policy: AccessPolicy,
) -> Result<Vec<String>> {
    Ok(partition(pool, user, candidates, policy).await?.accessible)
}

pub async fn partition(
    pool: &SqlitePool,
    user: &User,
    candidates: &[String],
    policy: AccessPolicy,
) -> Result<AccessPartition> {
    let levels = levels_of(pool, candidates).await?;
    let mut out = AccessPartition::default();
    for id in candidates {
        let readable = levels
            .get(id)
            .is_some_and(|&level| policy.permits(user.access_level, level));
        if readable {
            out.accessible.push(id.clone());
        } else {
            out.inaccessible.push(id.clone());
        }
    }
    Ok(out)
}

/// Level of the File owning `doc_id`, or `None` for unowned documents.
pub async fn access_level_of(pool: &SqlitePool, doc_id: &str) -> Result<Option<i64>> {
    let level = sqlx::query_scalar(
        r#"
        SELECT f.access_level
        FROM file_docs fd
        JOIN files f ON f.id = fd.file_id
        WHERE fd.doc_id = ?
        "#,
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await?;
    Ok(level)
}

/// The earliest-registered user holding exactly `access_level`.
pub async fn username_at_level(pool: &SqlitePool, access_level: i64) -> Result<Option<String>> {
    let name = sqlx::query_scalar(
        "SELECT username FROM users WHERE access_level = ? ORDER BY id LIMIT 1",
    )
    .bind(access_level)
    .fetch_optional(pool)
    .await?;
    Ok(name)
}

pub async fn has_access_to_doc(
    pool: &SqlitePool,
    user: &User,
    doc_id: &str,
    policy: AccessPolicy,
) -> Result<bool> {
    Ok(access_level_of(pool, doc_id)
        .await?
        .is_some_and(|level| policy.permits(user.access_level, level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{record_ingestion, update_access_level};
    use crate::models::{DocMetadata, IngestedDoc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let doc = |id: &str, file: &str| {
            let mut m = DocMetadata::new();
            m.insert("file_name".into(), file.into());
            IngestedDoc::new(id, Some(m))
        };
        record_ingestion(
            &pool,
            &[doc("l1a", "one.txt"), doc("l1b", "one.txt"), doc("l2a", "two.txt")],
            1,
        )
        .await
        .unwrap();
        update_access_level(&pool, "two.txt", 2).await.unwrap();
        pool
    }

    fn user(id: i64, level: i64) -> User {
        User {
            id,
            username: format!("u{id}"),
            hashed_password: String::new(),
            access_level: level,
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exact_policy_preserves_candidate_order() {
        let pool = seeded().await;
        let got = accessible_doc_ids(&pool, &user(1, 1), &ids(&["l2a", "l1b", "l1a"]), AccessPolicy::Exact)
            .await
            .unwrap();
        assert_eq!(got, ids(&["l1b", "l1a"]));
    }

    #[tokio::test]
    async fn test_equal_levels_see_same_documents() {
        let pool = seeded().await;
        let candidates = ids(&["l1a", "l2a", "l1b", "orphan"]);
        let a = accessible_doc_ids(&pool, &user(1, 2), &candidates, AccessPolicy::Exact).await.unwrap();
        let b = accessible_doc_ids(&pool, &user(9, 2), &candidates, AccessPolicy::Exact).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, ids(&["l2a"]));
    }

    #[tokio::test]
    async fn test_unowned_documents_are_inaccessible() {
        let pool = seeded().await;
        let part = partition(&pool, &user(1, 1), &ids(&["orphan", "l1a"]), AccessPolicy::AtLeast)
            .await
            .unwrap();
        assert_eq!(part.accessible, ids(&["l1a"]));
        assert_eq!(part.inaccessible, ids(&["orphan"]));
        assert_eq!(access_level_of(&pool, "orphan").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_at_least_policy() {
        let pool = seeded().await;
        let got = accessible_doc_ids(&pool, &user(1, 2), &ids(&["l1a", "l2a"]), AccessPolicy::AtLeast)
            .await
            .unwrap();
        assert_eq!(got, ids(&["l1a", "l2a"]));
        assert!(has_access_to_doc(&pool, &user(1, 2), "l1a", AccessPolicy::AtLeast).await.unwrap());
        assert!(!has_access_to_doc(&pool, &user(1, 2), "l1a", AccessPolicy::Exact).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let pool = seeded().await;
        let got = accessible_doc_ids(&pool, &user(1, 7), &ids(&["l1a"]), AccessPolicy::Exact).await.unwrap();
        assert!(got.is_empty());
        assert!(accessible_doc_ids(&pool, &user(1, 1), &[], AccessPolicy::Exact).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_username_at_level_picks_earliest() {
        let pool = seeded().await;
        crate::users::create_user(&pool, "first", "pw", 1).await.unwrap();
        crate::users::create_user(&pool, "second", "pw", 1).await.unwrap();
        assert_eq!(username_at_level(&pool, 1).await.unwrap().as_deref(), Some("first"));
        assert_eq!(username_at_level(&pool, 5).await.unwrap(), None);
    }
}
