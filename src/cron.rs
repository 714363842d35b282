//! Incremental scoring of newly published jobs.
//!
//! Each run fetches the most recent jobs, keeps those published after the
//! stored watermark, scores them in bounded concurrent batches and then
//! advances the watermark. Batch failures are reported, not propagated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{Config, CronConfig};
use crate::models::{JobOutcome, JobRecord};
use crate::schedule::RelevanceGate;
use crate::scoring::BatchScorer;
use crate::store::JobStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BatchResult {
    Completed { outcomes: Vec<JobOutcome> },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch: usize,
    pub job_ids: Vec<String>,
    #[serde(flatten)]
    pub result: BatchResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronSummary {
    pub run_id: Uuid,
    pub skipped: bool,
    pub fetched: usize,
    pub new_jobs: usize,
    pub batches: Vec<BatchReport>,
    pub watermark: Option<DateTime<Utc>>,
}

impl CronSummary {
    fn skipped(run_id: Uuid, watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            run_id,
            skipped: true,
            fetched: 0,
            new_jobs: 0,
            batches: Vec::new(),
            watermark,
        }
    }

    pub fn failed_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.result, BatchResult::Failed { .. }))
            .count()
    }
}

/// Pick the jobs newer than `watermark` from a newest-first list.
///
/// Without a watermark every job is new. Otherwise the scan skips jobs with
/// no timestamp and stops at the first job at or before the watermark.
/// Also returns the newest timestamp among the selected jobs.
pub fn select_new_jobs(
    jobs: Vec<JobRecord>,
    watermark: Option<DateTime<Utc>>,
) -> (Vec<JobRecord>, Option<DateTime<Utc>>) {
    let selected: Vec<JobRecord> = match watermark {
        None => jobs,
        Some(mark) => {
            let mut selected = Vec::new();
            for job in jobs {
                match job.published_at {
                    None => continue,
                    Some(t) if t <= mark => break,
                    Some(_) => selected.push(job),
                }
            }
            selected
        }
    };
    let newest = selected.iter().filter_map(|j| j.published_at).max();
    (selected, newest)
}

pub struct CronScheduler {
    store: Arc<dyn JobStore>,
    scorer: Arc<BatchScorer>,
    gate: Arc<RelevanceGate>,
    config: CronConfig,
}

impl CronScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        scorer: Arc<BatchScorer>,
        gate: Arc<RelevanceGate>,
        config: CronConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            gate,
            config,
        }
    }

    pub async fn run_once(&self) -> Result<CronSummary> {
        let run_id = Uuid::new_v4();
        let watermark = self.store.get_watermark().await?;

        if !self.gate.is_enabled().await? {
            tracing::info!(%run_id, "relevance checking is off; cron run skipped");
            return Ok(CronSummary::skipped(run_id, watermark));
        }

        let jobs = self.store.latest_jobs(self.config.fetch_limit).await?;
        let fetched = jobs.len();
        let (new_jobs, newest) = select_new_jobs(jobs, watermark);
        tracing::info!(%run_id, fetched, new = new_jobs.len(), ?watermark, "cron run started");

        let ids: Vec<String> = new_jobs.into_iter().map(|j| j.id).collect();
        let batches = self.run_batches(&ids).await;

        let watermark = match newest {
            Some(candidate) => Some(self.store.advance_watermark(candidate).await?),
            None => watermark,
        };

        let summary = CronSummary {
            run_id,
            skipped: false,
            fetched,
            new_jobs: ids.len(),
            batches,
            watermark,
        };
        tracing::info!(
            %run_id,
            batches = summary.batches.len(),
            failed = summary.failed_batches(),
            watermark = ?summary.watermark,
            "cron run finished"
        );
        Ok(summary)
    }

    async fn run_batches(&self, ids: &[String]) -> Vec<BatchReport> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let timeout = Duration::from_secs(self.config.batch_timeout_secs);
        let mut tasks = JoinSet::new();
        let mut reports: Vec<BatchReport> = Vec::new();

        for (n, chunk) in ids.chunks(self.config.batch_size.max(1)).enumerate() {
            let job_ids = chunk.to_vec();
            reports.push(BatchReport {
                batch: n,
                job_ids: job_ids.clone(),
                result: BatchResult::Failed {
                    error: "batch task panicked".to_string(),
                },
            });
            let scorer = self.scorer.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, scorer.score_batch(&job_ids)).await {
                        Ok(Ok(outcomes)) => BatchResult::Completed { outcomes },
                        Ok(Err(e)) => BatchResult::Failed {
                            error: format!("{:#}", e),
                        },
                        Err(_) => BatchResult::Failed {
                            error: format!("timed out after {}s", timeout.as_secs()),
                        },
                    },
                    Err(e) => BatchResult::Failed {
                        error: e.to_string(),
                    },
                };
                (n, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((n, result)) => {
                    if let BatchResult::Failed { error } = &result {
                        tracing::error!(batch = n, %error, "scoring batch failed");
                    }
                    if let Some(report) = reports.get_mut(n) {
                        report.result = result;
                    }
                }
                Err(e) => tracing::error!(error = %e, "scoring batch task aborted"),
            }
        }

        reports
    }
}

/// `jobfit cron run`
pub async fn run_cron(config: &Config) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    app.ensure_index().await;
    let summary = app.cron.run_once().await?;

    println!("run_id: {}", summary.run_id);
    if summary.skipped {
        println!("status: skipped (relevance checking is off)");
    } else {
        println!("fetched: {}", summary.fetched);
        println!("new_jobs: {}", summary.new_jobs);
        for report in &summary.batches {
            match &report.result {
                BatchResult::Completed { outcomes } => {
                    for outcome in outcomes {
                        println!("  {}: {}", outcome.job_id, outcome.status);
                    }
                }
                BatchResult::Failed { error } => {
                    println!("  batch {} [{}] failed: {}", report.batch, report.job_ids.join(", "), error);
                }
            }
        }
    }
    print_watermark(summary.watermark);
    app.close().await;
    Ok(())
}

/// `jobfit cron status`
pub async fn run_status(config: &Config) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    print_watermark(app.store.get_watermark().await?);
    app.close().await;
    Ok(())
}

/// `jobfit cron reset`
pub async fn run_reset(config: &Config) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    app.store.reset_watermark().await?;
    println!("watermark: reset");
    app.close().await;
    Ok(())
}

fn print_watermark(watermark: Option<DateTime<Utc>>) {
    match watermark {
        Some(t) => println!("watermark: {}", t.to_rfc3339()),
        None => println!("watermark: none"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(id: &str, minute: Option<u32>) -> JobRecord {
        JobRecord {
            id: id.into(),
            title: None,
            description: None,
            client_country: None,
            category_label: None,
            subcategory_label: None,
            team_name: None,
            published_at: minute.map(|m| Utc.with_ymd_and_hms(2024, 5, 1, 12, m, 0).unwrap()),
        }
    }

    fn ids(jobs: &[JobRecord]) -> Vec<&str> {
        jobs.iter().map(|j| j.id.as_str()).collect()
    }

    #[test]
    fn test_bootstrap_takes_everything() {
        let jobs = vec![at("c", Some(30)), at("b", Some(20)), at("a", None)];
        let (new, newest) = select_new_jobs(jobs, None);
        assert_eq!(ids(&new), vec!["c", "b", "a"]);
        assert_eq!(newest, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()));
    }

    #[test]
    fn test_strictly_newer_and_stop_at_watermark() {
        let mark = Utc.with_ymd_and_hms(2024, 5, 1, 12, 20, 0).unwrap();
        let jobs = vec![
            at("e", Some(40)),
            at("x", None),
            at("d", Some(30)),
            at("c", Some(20)),
            at("late", Some(25)),
        ];
        let (new, newest) = select_new_jobs(jobs, Some(mark));
        assert_eq!(ids(&new), vec!["e", "d"]);
        assert_eq!(newest, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 40, 0).unwrap()));
    }

    #[test]
    fn test_nothing_new() {
        let mark = Utc.with_ymd_and_hms(2024, 5, 1, 12, 50, 0).unwrap();
        let (new, newest) = select_new_jobs(vec![at("a", Some(50))], Some(mark));
        assert!(new.is_empty());
        assert_eq!(newest, None);
    }
}
