//! In-memory [`JobStore`] for tests.
//!
//! `HashMap`s behind `std::sync::RwLock`. Timestamps are truncated to
//! milliseconds on write so both backends behave identically.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{from_millis, to_millis, JobStore};
use crate::error::PipelineError;
use crate::models::{JobRecord, MatchScore, Proposal};

#[derive(Default)]
struct State {
    jobs: HashMap<String, JobRecord>,
    relevance: HashMap<String, MatchScore>,
    proposals: HashMap<String, Proposal>,
    watermark_ms: Option<i64>,
    relevance_override: Option<bool>,
}

pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = JobRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.write() {
            for mut job in jobs {
                job.published_at = job.published_at.map(truncate);
                state.jobs.insert(job.id.clone(), job);
            }
        }
        store
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(ts)).unwrap_or(ts)
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn upsert_job(&self, job: &JobRecord) -> Result<()> {
        let mut job = job.clone();
        job.published_at = job.published_at.map(truncate);
        self.write()?.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        Ok(self.read()?.jobs.get(id).cloned())
    }

    async fn latest_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let state = self.read()?;
        let mut jobs: Vec<JobRecord> = state.jobs.values().cloned().collect();
        // Descending; None is smallest so it lands last.
        jobs.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn get_relevance(&self, job_id: &str) -> Result<Option<MatchScore>> {
        Ok(self.read()?.relevance.get(job_id).cloned())
    }

    async fn upsert_relevance(&self, score: &MatchScore) -> Result<()> {
        let mut state = self.write()?;
        if !state.jobs.contains_key(&score.job_id) {
            return Err(PipelineError::job_not_found(&score.job_id).into());
        }
        state.relevance.insert(score.job_id.clone(), score.clone());
        Ok(())
    }

    async fn get_proposal(&self, job_id: &str) -> Result<Option<Proposal>> {
        Ok(self.read()?.proposals.get(job_id).cloned())
    }

    async fn upsert_proposal(&self, proposal: &Proposal) -> Result<()> {
        self.write()?
            .proposals
            .insert(proposal.job_id.clone(), proposal.clone());
        Ok(())
    }

    async fn update_proposal(&self, proposal: &Proposal) -> Result<()> {
        let mut state = self.write()?;
        match state.proposals.get_mut(&proposal.job_id) {
            Some(existing) => {
                existing.text = proposal.text.clone();
                Ok(())
            }
            None => Err(PipelineError::proposal_not_found(&proposal.job_id).into()),
        }
    }

    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.watermark_ms.and_then(from_millis))
    }

    async fn advance_watermark(&self, candidate: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut state = self.write()?;
        let candidate = to_millis(candidate);
        let next = state.watermark_ms.map_or(candidate, |cur| cur.max(candidate));
        state.watermark_ms = Some(next);
        from_millis(next).ok_or_else(|| anyhow!("watermark out of range: {}", next))
    }

    async fn reset_watermark(&self) -> Result<()> {
        self.write()?.watermark_ms = None;
        Ok(())
    }

    async fn relevance_override(&self) -> Result<Option<bool>> {
        Ok(self.read()?.relevance_override)
    }

    async fn set_relevance_override(&self, value: Option<bool>) -> Result<()> {
        self.write()?.relevance_override = value;
        Ok(())
    }
}
