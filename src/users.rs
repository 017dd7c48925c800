//! User accounts in the credential store.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::auth;
use crate::models::User;

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        hashed_password: row.get("hashed_password"),
        access_level: row.get("access_level"),
    }
}

/// Register a user. Returns `None` when the username is already taken, in
/// which case nothing is written.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
    access_level: i64,
) -> Result<Option<User>> {
    let hashed = auth::hash_password(password)?;

    let result = sqlx::query(
        "INSERT INTO users (username, hashed_password, access_level) VALUES (?, ?, ?)",
    )
    .bind(username)
    .bind(&hashed)
    .bind(access_level)
    .execute(pool)
    .await;

    match result {
        Ok(done) => {
            tracing::info!(username, access_level, "registered user");
            Ok(Some(User {
                id: done.last_insert_rowid(),
                username: username.to_string(),
                hashed_password: hashed,
                access_level,
            }))
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, username, hashed_password, access_level FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows =
        sqlx::query("SELECT id, username, hashed_password, access_level FROM users ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows.iter().map(user_from_row).collect())
}

/// Check a username/password pair. Unknown users and wrong passwords are
/// indistinguishable to the caller.
pub async fn authenticate(pool: &SqlitePool, username: &str, password: &str) -> Result<Option<User>> {
    let Some(user) = find_by_username(pool, username).await? else {
        return Ok(None);
    };
    if auth::verify_password(password, &user.hashed_password) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

pub async fn update_access_level(
    pool: &SqlitePool,
    username: &str,
    access_level: i64,
) -> Result<Option<User>> {
    let done = sqlx::query("UPDATE users SET access_level = ? WHERE username = ?")
        .bind(access_level)
        .bind(username)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Ok(None);
    }
    find_by_username(pool, username).await
}

pub async fn delete_user(pool: &SqlitePool, username: &str) -> Result<bool> {
    let done = sqlx::query("DELETE FROM users WHERE username = ?")
        .bind(username)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}
