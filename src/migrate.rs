use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Timestamps are unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            title TEXT,
            description TEXT,
            client_country TEXT,
            category_label TEXT,
            subcategory_label TEXT,
            team_name TEXT,
            published_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_relevance (
            job_id TEXT PRIMARY KEY,
            score REAL NOT NULL,
            category TEXT NOT NULL,
            reasoning TEXT NOT NULL DEFAULT '',
            technology_match TEXT NOT NULL DEFAULT '',
            portfolio_match TEXT NOT NULL DEFAULT '',
            project_match TEXT NOT NULL DEFAULT '',
            location_match TEXT NOT NULL DEFAULT '',
            closest_profile_name TEXT NOT NULL DEFAULT '',
            tags_json TEXT,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            job_id TEXT PRIMARY KEY,
            proposal_text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cron_state (
            name TEXT PRIMARY KEY,
            watermark INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_published_at ON jobs(published_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
