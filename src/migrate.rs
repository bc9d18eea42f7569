use sqlx::SqlitePool;

use crate::error::Result;

/// Create the metadata schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS policies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            file_path TEXT NOT NULL,
            uploaded_by TEXT,
            effective_from TEXT NOT NULL,
            effective_to TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            tags_json TEXT NOT NULL DEFAULT '{}',
            dedup_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk rows are owned by their policy and cascade with it. The vector
    // key is the only link to the vector store and must stay unique.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS policy_chunks (
            id TEXT PRIMARY KEY,
            policy_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            section_name TEXT,
            vector_key TEXT NOT NULL UNIQUE,
            word_count INTEGER NOT NULL,
            char_count INTEGER NOT NULL,
            page_number INTEGER,
            UNIQUE(policy_id, chunk_index),
            FOREIGN KEY (policy_id) REFERENCES policies(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_role TEXT NOT NULL,
            service_id TEXT,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            sources_json TEXT NOT NULL,
            confidence TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_policies_name ON policies(name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_policies_status ON policies(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_policy_id ON policy_chunks(policy_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_logs_user ON query_logs(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_logs_service ON query_logs(service_id)")
        .execute(pool)
        .await?;

    Ok(())
}
