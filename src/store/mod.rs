//! Storage abstraction for jobs, relevance results, proposals and the
//! cron watermark.
//!
//! The [`JobStore`] trait is the seam between the pipeline and the
//! relational store. [`sqlite::SqliteStore`] backs the CLI;
//! [`memory::InMemoryStore`] backs tests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_job`](JobStore::upsert_job) | Insert or update a job posting |
//! | [`get_job`](JobStore::get_job) | Load one job |
//! | [`latest_jobs`](JobStore::latest_jobs) | Most recent jobs, newest first |
//! | [`upsert_relevance`](JobStore::upsert_relevance) | Create or overwrite a job's MatchScore |
//! | [`upsert_proposal`](JobStore::upsert_proposal) | Create or overwrite a proposal |
//! | [`update_proposal`](JobStore::update_proposal) | Overwrite an existing proposal only |
//! | [`advance_watermark`](JobStore::advance_watermark) | Move the watermark forward, never back |
//! | [`set_relevance_override`](JobStore::set_relevance_override) | Persist the manual relevance switch |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{JobRecord, MatchScore, Proposal};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Up to `limit` jobs ordered by publication time, newest first. Jobs
    /// without a timestamp sort last.
    async fn latest_jobs(&self, limit: usize) -> Result<Vec<JobRecord>>;

    async fn get_relevance(&self, job_id: &str) -> Result<Option<MatchScore>>;

    /// Create or overwrite the MatchScore for `score.job_id` atomically.
    ///
    /// Fails with [`PipelineError::NotFound`](crate::error::PipelineError)
    /// when the job does not exist; nothing is written in that case.
    async fn upsert_relevance(&self, score: &MatchScore) -> Result<()>;

    async fn get_proposal(&self, job_id: &str) -> Result<Option<Proposal>>;

    async fn upsert_proposal(&self, proposal: &Proposal) -> Result<()>;

    /// Overwrite an existing proposal. Fails with `NotFound` if there is
    /// none.
    async fn update_proposal(&self, proposal: &Proposal) -> Result<()>;

    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>>;

    /// Set the watermark to `max(current, candidate)` and return the
    /// stored value.
    async fn advance_watermark(&self, candidate: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Operator reset. The next cron run bootstraps.
    async fn reset_watermark(&self) -> Result<()>;

    async fn relevance_override(&self) -> Result<Option<bool>>;

    /// `None` clears the override so the schedule applies again.
    async fn set_relevance_override(&self, value: Option<bool>) -> Result<()>;
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
