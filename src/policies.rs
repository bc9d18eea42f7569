//! Metadata-store access for policies, chunks, and their lifecycle.
//!
//! All writes that belong to one ingest go through a single sqlx
//! transaction owned by the caller; the functions here accept any executor
//! so they work both inside and outside a transaction.

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{Policy, PolicyChunk, PolicyStatus};

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|e| Error::Provider(format!("invalid stored date {:?}: {}", s, e)))
}

fn policy_from_row(row: &SqliteRow) -> Result<Policy> {
    let effective_from: String = row.get("effective_from");
    let effective_to: Option<String> = row.get("effective_to");
    let status: String = row.get("status");
    let tags_json: String = row.get("tags_json");

    Ok(Policy {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        file_path: row.get("file_path"),
        uploaded_by: row.get("uploaded_by"),
        effective_from: parse_date(&effective_from)?,
        effective_to: effective_to.as_deref().map(parse_date).transpose()?,
        status: PolicyStatus::parse(&status)
            .ok_or_else(|| Error::Provider(format!("invalid stored status {:?}", status)))?,
        tags: serde_json::from_str(&tags_json).unwrap_or(serde_json::json!({})),
        dedup_hash: row.get("dedup_hash"),
    })
}

pub async fn insert_policy<'e, E>(executor: E, policy: &Policy) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO policies (id, name, version, file_path, uploaded_by,
            effective_from, effective_to, status, tags_json, dedup_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&policy.id)
    .bind(&policy.name)
    .bind(&policy.version)
    .bind(&policy.file_path)
    .bind(&policy.uploaded_by)
    .bind(policy.effective_from.format(DATE_FMT).to_string())
    .bind(
        policy
            .effective_to
            .map(|d| d.format(DATE_FMT).to_string()),
    )
    .bind(policy.status.as_str())
    .bind(policy.tags.to_string())
    .bind(&policy.dedup_hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn insert_chunk<'e, E>(executor: E, chunk: &PolicyChunk) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO policy_chunks (id, policy_id, chunk_index, text, section_name,
            vector_key, word_count, char_count, page_number)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.policy_id)
    .bind(chunk.chunk_index)
    .bind(&chunk.text)
    .bind(&chunk.section_name)
    .bind(&chunk.vector_key)
    .bind(chunk.word_count)
    .bind(chunk.char_count)
    .bind(chunk.page_number)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn get_policy(pool: &SqlitePool, id: &str) -> Result<Option<Policy>> {
    let row = sqlx::query("SELECT * FROM policies WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(policy_from_row).transpose()
}

/// Like [`get_policy`], but a missing row is an error.
pub async fn require_policy(pool: &SqlitePool, id: &str) -> Result<Policy> {
    get_policy(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("policy {}", id)))
}

/// Ids of all policies currently eligible for retrieval.
pub async fn active_policy_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM policies WHERE status = 'active'")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn list_policies(pool: &SqlitePool, status: Option<PolicyStatus>) -> Result<Vec<Policy>> {
    let rows = match status {
        Some(s) => {
            sqlx::query("SELECT * FROM policies WHERE status = ? ORDER BY name, version")
                .bind(s.as_str())
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT * FROM policies ORDER BY name, version")
                .fetch_all(pool)
                .await?
        }
    };
    rows.iter().map(policy_from_row).collect()
}

/// Transition a policy's lifecycle status, optionally closing its validity
/// window at the same time.
pub async fn set_status<'e, E>(
    executor: E,
    id: &str,
    status: PolicyStatus,
    effective_to: Option<NaiveDate>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = match effective_to {
        Some(date) => {
            sqlx::query("UPDATE policies SET status = ?, effective_to = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(date.format(DATE_FMT).to_string())
                .bind(id)
                .execute(executor)
                .await?
        }
        None => {
            sqlx::query("UPDATE policies SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(executor)
                .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("policy {}", id)));
    }
    Ok(())
}

pub async fn chunk_count(pool: &SqlitePool, policy_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policy_chunks WHERE policy_id = ?")
        .bind(policy_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn chunks_for_policy(pool: &SqlitePool, policy_id: &str) -> Result<Vec<PolicyChunk>> {
    let rows = sqlx::query(
        "SELECT * FROM policy_chunks WHERE policy_id = ? ORDER BY chunk_index",
    )
    .bind(policy_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PolicyChunk {
            id: row.get("id"),
            policy_id: row.get("policy_id"),
            chunk_index: row.get("chunk_index"),
            text: row.get("text"),
            section_name: row.get("section_name"),
            vector_key: row.get("vector_key"),
            word_count: row.get("word_count"),
            char_count: row.get("char_count"),
            page_number: row.get("page_number"),
        })
        .collect())
}
