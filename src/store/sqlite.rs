//! SQLite-backed [`JobStore`].
//!
//! Wraps a [`SqlitePool`]. Each call checks out its own connection; the
//! relevance upsert runs inside a transaction.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{from_millis, to_millis, JobStore};
use crate::error::PipelineError;
use crate::models::{JobRecord, MatchScore, Proposal, RelevanceCategory};

const WATERMARK_KEY: &str = "jobs";
const RELEVANCE_OVERRIDE_KEY: &str = "relevance_override";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> JobRecord {
    let published: Option<i64> = row.get("published_at");
    JobRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        client_country: row.get("client_country"),
        category_label: row.get("category_label"),
        subcategory_label: row.get("subcategory_label"),
        team_name: row.get("team_name"),
        published_at: published.and_then(from_millis),
    }
}

fn persistence(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Persistence(err.to_string())
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, title, description, client_country, category_label,
                              subcategory_label, team_name, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                client_country = excluded.client_country,
                category_label = excluded.category_label,
                subcategory_label = excluded.subcategory_label,
                team_name = excluded.team_name,
                published_at = excluded.published_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.client_country)
        .bind(&job.category_label)
        .bind(&job.subcategory_label)
        .bind(&job.team_name)
        .bind(job.published_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            "SELECT id, title, description, client_country, category_label, subcategory_label, team_name, published_at FROM jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_job))
    }

    async fn latest_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        // SQLite sorts NULL lowest, so untimed jobs come last under DESC.
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, client_country, category_label,
                   subcategory_label, team_name, published_at
            FROM jobs
            ORDER BY published_at DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    async fn get_relevance(&self, job_id: &str) -> Result<Option<MatchScore>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, score, category, reasoning, technology_match, portfolio_match,
                   project_match, location_match, closest_profile_name, tags_json
            FROM job_relevance WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let category: String = row.get("category");
        let tags_json: Option<String> = row.get("tags_json");
        let tags: BTreeSet<String> = match tags_json {
            Some(text) => serde_json::from_str(&text)
                .with_context(|| format!("corrupt tags_json for job {}", job_id))?,
            None => BTreeSet::new(),
        };

        Ok(Some(MatchScore {
            job_id: row.get("job_id"),
            score: row.get("score"),
            category: RelevanceCategory::parse(&category).unwrap_or(RelevanceCategory::Irrelevant),
            reasoning: row.get("reasoning"),
            technology_match: row.get("technology_match"),
            portfolio_match: row.get("portfolio_match"),
            project_match: row.get("project_match"),
            location_match: row.get("location_match"),
            closest_profile_name: row.get("closest_profile_name"),
            tags,
        }))
    }

    async fn upsert_relevance(&self, score: &MatchScore) -> Result<()> {
        let tags_json = if score.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&score.tags)?)
        };

        // Dropping the transaction without commit rolls it back.
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
            .bind(&score.job_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence)?;
        if count == 0 {
            return Err(PipelineError::job_not_found(&score.job_id).into());
        }

        sqlx::query(
            r#"
            INSERT INTO job_relevance (job_id, score, category, reasoning, technology_match,
                                       portfolio_match, project_match, location_match,
                                       closest_profile_name, tags_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                score = excluded.score,
                category = excluded.category,
                reasoning = excluded.reasoning,
                technology_match = excluded.technology_match,
                portfolio_match = excluded.portfolio_match,
                project_match = excluded.project_match,
                location_match = excluded.location_match,
                closest_profile_name = excluded.closest_profile_name,
                tags_json = excluded.tags_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&score.job_id)
        .bind(score.score)
        .bind(score.category.as_str())
        .bind(&score.reasoning)
        .bind(&score.technology_match)
        .bind(&score.portfolio_match)
        .bind(&score.project_match)
        .bind(&score.location_match)
        .bind(&score.closest_profile_name)
        .bind(&tags_json)
        .bind(now_ms())
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;

        tx.commit().await.map_err(persistence)?;
        Ok(())
    }

    async fn get_proposal(&self, job_id: &str) -> Result<Option<Proposal>> {
        let row = sqlx::query("SELECT job_id, proposal_text FROM proposals WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Proposal {
            job_id: r.get("job_id"),
            text: r.get("proposal_text"),
        }))
    }

    async fn upsert_proposal(&self, proposal: &Proposal) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO proposals (job_id, proposal_text, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                proposal_text = excluded.proposal_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&proposal.job_id)
        .bind(&proposal.text)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn update_proposal(&self, proposal: &Proposal) -> Result<()> {
        let result =
            sqlx::query("UPDATE proposals SET proposal_text = ?, updated_at = ? WHERE job_id = ?")
                .bind(&proposal.text)
                .bind(now_ms())
                .bind(&proposal.job_id)
                .execute(&self.pool)
                .await
                .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::proposal_not_found(&proposal.job_id).into());
        }
        Ok(())
    }

    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT watermark FROM cron_state WHERE name = ?")
                .bind(WATERMARK_KEY)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(from_millis))
    }

    async fn advance_watermark(&self, candidate: DateTime<Utc>) -> Result<DateTime<Utc>> {
        sqlx::query(
            r#"
            INSERT INTO cron_state (name, watermark, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                watermark = excluded.watermark,
                updated_at = excluded.updated_at
            WHERE excluded.watermark > cron_state.watermark
            "#,
        )
        .bind(WATERMARK_KEY)
        .bind(to_millis(candidate))
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        self.get_watermark()
            .await?
            .ok_or_else(|| anyhow!("watermark missing after advance"))
    }

    async fn reset_watermark(&self) -> Result<()> {
        sqlx::query("DELETE FROM cron_state WHERE name = ?")
            .bind(WATERMARK_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn relevance_override(&self) -> Result<Option<bool>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(RELEVANCE_OVERRIDE_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.map(|v| v == "true"))
    }

    async fn set_relevance_override(&self, value: Option<bool>) -> Result<()> {
        match value {
            Some(enabled) => {
                sqlx::query(
                    r#"
                    INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(RELEVANCE_OVERRIDE_KEY)
                .bind(if enabled { "true" } else { "false" })
                .bind(now_ms())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM settings WHERE key = ?")
                    .bind(RELEVANCE_OVERRIDE_KEY)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
