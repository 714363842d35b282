//! Batch relevance scoring.
//!
//! One generation call scores up to `max_batch_size` jobs. Each job in a
//! batch ends with its own [`JobOutcome`]; a failure for one job never
//! aborts the others.

pub mod parse;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::{Config, GenerationConfig, ScoringConfig};
use crate::error::PipelineError;
use crate::generation::{CompletionRequest, Generator};
use crate::models::{JobOutcome, JobRecord, JobStatus};
use crate::retrieve::Retriever;
use crate::store::JobStore;

use self::parse::{apply_agency_override, model_category, normalize_record, parse_response, record_id};

const SYSTEM_PROMPT: &str = r#"You are an expert job matching agent for a technology company. For each job provided, analyze it against the retrieved company context (team profiles, past projects, company background) that follows it.

Score each job on this scale:
- 0.0-0.29: Irrelevant
- 0.3-0.49: Low
- 0.5-0.79: Medium
- 0.8-1.0: Strong

AGENCY CHECK: if the client states that agencies may not apply (for example "no agencies" or "individual freelancers only"), say so in the reasoning.

Location: prefer clients from North America, Western Europe and Australia, and note the fit in location_match.

closest_profile_name is the single team member whose profile best fits the job, or 'General Company Profile' when no individual stands out.

Return one JSON object per job in a JSON array, with these fields:
[
  {
    "id": "<job id exactly as given>",
    "score": <number between 0 and 1>,
    "category": "Strong" | "Medium" | "Low" | "Irrelevant",
    "reasoning": "<short explanation>",
    "technology_match": "<how our technologies match>",
    "portfolio_match": "<how our portfolio matches>",
    "project_match": "<closest past project>",
    "location_match": "<client location fit>",
    "closest_profile_name": "<profile name>",
    "tags": ["<short keyword>", "..."]
  }
]

STRICTLY RETURN ONLY THE JSON ARRAY (LIST) OF OBJECTS WITH NO OTHER TEXT."#;

pub struct BatchScorer {
    store: Arc<dyn JobStore>,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    config: ScoringConfig,
    temperature: f32,
    max_tokens: u32,
}

impl BatchScorer {
    pub fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self::with_settings(
            config.scoring.clone(),
            &config.generation,
            store,
            retriever,
            generator,
        )
    }

    pub fn with_settings(
        config: ScoringConfig,
        generation: &GenerationConfig,
        store: Arc<dyn JobStore>,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            store,
            retriever,
            generator,
            config,
            temperature: generation.scoring_temperature,
            max_tokens: generation.scoring_max_tokens,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// Score one batch. Outcomes are returned in input order.
    pub async fn score_batch(&self, job_ids: &[String]) -> Result<Vec<JobOutcome>> {
        if job_ids.is_empty() || job_ids.len() > self.config.max_batch_size {
            return Err(PipelineError::InvalidBatch(format!(
                "batch of {} jobs; expected 1..={}",
                job_ids.len(),
                self.config.max_batch_size
            ))
            .into());
        }

        let mut outcomes: Vec<Option<JobOutcome>> = vec![None; job_ids.len()];
        let mut loaded: Vec<(usize, JobRecord)> = Vec::new();
        for (i, id) in job_ids.iter().enumerate() {
            match self.store.get_job(id).await {
                Ok(Some(job)) => loaded.push((i, job)),
                Ok(None) => {
                    outcomes[i] = Some(JobOutcome::new(id, JobStatus::LoadFailed).with_detail("job not found"));
                }
                Err(e) => {
                    tracing::error!(job_id = %id, error = %format!("{:#}", e), "failed to load job");
                    outcomes[i] = Some(JobOutcome::new(id, JobStatus::LoadFailed).with_detail(format!("{:#}", e)));
                }
            }
        }

        if loaded.is_empty() {
            tracing::warn!(?job_ids, "no job in batch could be loaded");
            return Ok(outcomes.into_iter().flatten().collect());
        }

        let mut contexts = Vec::with_capacity(loaded.len());
        for (_, job) in &loaded {
            contexts.push(self.retriever.scoring_context(job).await);
        }
        let jobs: Vec<&JobRecord> = loaded.iter().map(|(_, job)| job).collect();
        let request = CompletionRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: build_batch_prompt(&jobs, &contexts),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let records = match self.generator.complete(&request).await {
            Ok(text) => parse_response(&text)
                .records()
                .map_err(|reason| PipelineError::MalformedResponse(reason).to_string()),
            Err(e) => Err(format!("{:#}", e)),
        };
        let records = match records {
            Ok(records) => records,
            Err(reason) => {
                tracing::error!(%reason, "scoring analysis failed");
                for (i, job) in &loaded {
                    outcomes[*i] = Some(JobOutcome::new(&job.id, JobStatus::AnalysisFailed).with_detail(reason.clone()));
                }
                return Ok(outcomes.into_iter().flatten().collect());
            }
        };

        let mut by_id = HashMap::new();
        for record in records {
            match record_id(&record) {
                Some(id) => {
                    by_id.entry(id).or_insert(record);
                }
                None => tracing::warn!("scoring record without id ignored"),
            }
        }

        for (i, job) in &loaded {
            let Some(record) = by_id.get(&job.id) else {
                tracing::warn!(job_id = %job.id, "job missing from scoring response");
                outcomes[*i] = Some(JobOutcome::new(&job.id, JobStatus::AnalysisMissing));
                continue;
            };
            let initial = model_category(record);
            let mut score = normalize_record(&job.id, record);
            apply_agency_override(&self.config.agency_markers, job, initial, &mut score);
            outcomes[*i] = Some(match self.store.upsert_relevance(&score).await {
                Ok(()) => {
                    tracing::info!(job_id = %job.id, score = score.score, category = %score.category, "relevance stored");
                    JobOutcome::new(&job.id, JobStatus::Success)
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %format!("{:#}", e), "failed to store relevance");
                    JobOutcome::new(&job.id, JobStatus::ProcessingError).with_detail(format!("{:#}", e))
                }
            });
        }

        Ok(outcomes.into_iter().flatten().collect())
    }
}

fn or_unspecified(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => "Not specified",
    }
}

pub fn build_batch_prompt(jobs: &[&JobRecord], contexts: &[String]) -> String {
    let mut prompt = String::from("Based on the following information, analyze the jobs:\n");
    for (i, (job, context)) in jobs.iter().zip(contexts).enumerate() {
        let posted = job.published_at.map(|t| t.to_rfc3339());
        prompt.push_str(&format!("\n--- Job {} ---\n", i + 1));
        prompt.push_str(&format!("JOB ID: {}\n", job.id));
        prompt.push_str(context);
        prompt.push_str("JOB DETAILS:\n");
        prompt.push_str(&format!("  Title: {}\n", or_unspecified(job.title.as_deref())));
        prompt.push_str(&format!("  Description: {}\n", or_unspecified(job.description.as_deref())));
        prompt.push_str(&format!("  Client Country: {}\n", or_unspecified(job.client_country.as_deref())));
        prompt.push_str(&format!("  Category: {}\n", or_unspecified(job.category_label.as_deref())));
        prompt.push_str(&format!("  Subcategory: {}\n", or_unspecified(job.subcategory_label.as_deref())));
        prompt.push_str(&format!("  Job Posted On: {}\n", or_unspecified(posted.as_deref())));
    }
    prompt
}

/// `jobfit score`: score the given jobs in batches of `max_batch_size`.
pub async fn run_score(config: &Config, job_ids: &[String], force: bool) -> Result<()> {
    if job_ids.is_empty() {
        bail!("No job ids given");
    }
    let app = crate::app::App::from_config(config).await?;
    let status = app.relevance_gate.status().await?;
    if !status.enabled && !force {
        return Err(PipelineError::RelevanceDisabled.into());
    }
    app.ensure_index().await;

    for batch in job_ids.chunks(app.scorer.max_batch_size()) {
        for outcome in app.scorer.score_batch(batch).await? {
            match &outcome.detail {
                Some(detail) => println!("{}: {} ({})", outcome.job_id, outcome.status, detail),
                None => println!("{}: {}", outcome.job_id, outcome.status),
            }
        }
    }
    app.close().await;
    Ok(())
}
