//! Query audit trail.
//!
//! Every answered question is recorded with who asked, what was answered,
//! and which sources backed it. Recording is best effort: the composer
//! never fails an answer because the log write failed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Confidence, SourceCitation};

/// One audit record for an answered question.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub id: String,
    pub user_id: String,
    pub user_role: String,
    pub service_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub confidence: Option<Confidence>,
    pub created_at: DateTime<Utc>,
}

impl QueryLogEntry {
    pub fn new(
        user_id: &str,
        user_role: &str,
        service_id: Option<&str>,
        question: &str,
        answer: &str,
        sources: Vec<SourceCitation>,
        confidence: Confidence,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            user_role: user_role.to_string(),
            service_id: service_id.map(str::to_string),
            question: question.to_string(),
            answer: answer.to_string(),
            sources,
            confidence: Some(confidence),
            created_at: Utc::now(),
        }
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &QueryLogEntry) -> Result<()>;
}

/// Audit sink backed by the `query_logs` table.
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, entry: &QueryLogEntry) -> Result<()> {
        let sources_json = serde_json::to_string(&entry.sources).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO query_logs (id, user_id, user_role, service_id, question,
                answer, sources_json, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.user_role)
        .bind(&entry.service_id)
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(sources_json)
        .bind(entry.confidence.map(|c| c.as_str()))
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> QueryLogEntry {
    let sources_json: String = row.get("sources_json");
    let confidence: Option<String> = row.get("confidence");
    let created_at: i64 = row.get("created_at");

    QueryLogEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        user_role: row.get("user_role"),
        service_id: row.get("service_id"),
        question: row.get("question"),
        answer: row.get("answer"),
        sources: serde_json::from_str(&sources_json).unwrap_or_default(),
        confidence: confidence.as_deref().and_then(Confidence::parse),
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
    }
}

/// Most recent log entries for a user, newest first.
pub async fn logs_for_user(
    pool: &SqlitePool,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueryLogEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM query_logs WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(entry_from_row).collect())
}

/// Most recent log entries for a service, newest first.
pub async fn logs_for_service(
    pool: &SqlitePool,
    service_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueryLogEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM query_logs WHERE service_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
    )
    .bind(service_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(entry_from_row).collect())
}
