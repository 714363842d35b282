//! Proposal drafting for a single job.
//!
//! A fixed, single-pass pipeline over a [`PipelineContext`]:
//!
//! ```text
//! FetchJob → LoadTemplate → RetrieveContext → Synthesize → Done
//! ```
//!
//! There is no branching and no retry. A missing job ends the run with
//! `NotFound`; a failed generation call yields [`GENERATION_FAILED`] as the
//! proposal text instead of an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::error::PipelineError;
use crate::generation::{CompletionRequest, Generator};
use crate::models::{JobRecord, MatchScore, Proposal};
use crate::retrieve::Retriever;
use crate::store::JobStore;

pub const GENERATION_FAILED: &str = "Error: Could not generate proposal content.";

/// Profile name the scorer uses when no individual stands out.
pub const AGENCY_PROFILE: &str = "General Company Profile";

pub const DEFAULT_TEMPLATE: &str = "Hi {{client_name}},\n\n{{introduction}}\n\nWhat I Can Offer for Your Project:\n\nAfter reviewing your project description, I believe I’m well-equipped to provide exactly what you’re looking for. Here’s how I can help:\n{{offer_section}}\n\n{{skills}}\n\n{{projects}}\n\n{{next_steps}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchJob,
    LoadTemplate,
    RetrieveContext,
    Synthesize,
    Done,
}

impl Stage {
    pub fn next(self) -> Stage {
        match self {
            Stage::FetchJob => Stage::LoadTemplate,
            Stage::LoadTemplate => Stage::RetrieveContext,
            Stage::RetrieveContext => Stage::Synthesize,
            Stage::Synthesize | Stage::Done => Stage::Done,
        }
    }
}

/// State carried through one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub job_id: String,
    pub job: Option<JobRecord>,
    pub relevance: Option<MatchScore>,
    pub template: Option<String>,
    pub context: Option<String>,
    pub proposal: Option<String>,
}

impl PipelineContext {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalOutcome {
    pub proposal: Proposal,
    /// The proposal was already stored and returned as is.
    pub existed: bool,
    pub saved: bool,
}

pub struct ProposalPipeline {
    store: Arc<dyn JobStore>,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    template_path: Option<PathBuf>,
    temperature: f32,
    max_tokens: u32,
}

impl ProposalPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            store,
            retriever,
            generator,
            template_path: config.proposal.template_path.clone(),
            temperature: config.generation.proposal_temperature,
            max_tokens: config.generation.proposal_max_tokens,
        }
    }

    /// Run every stage in order for `job_id`.
    pub async fn run(&self, job_id: &str) -> Result<PipelineContext> {
        let mut ctx = PipelineContext::new(job_id);
        let mut stage = Stage::FetchJob;
        while stage != Stage::Done {
            tracing::debug!(job_id, ?stage, "proposal stage");
            self.step(stage, &mut ctx).await?;
            stage = stage.next();
        }
        Ok(ctx)
    }

    async fn step(&self, stage: Stage, ctx: &mut PipelineContext) -> Result<()> {
        match stage {
            Stage::FetchJob => {
                let job = self
                    .store
                    .get_job(&ctx.job_id)
                    .await?
                    .ok_or_else(|| PipelineError::job_not_found(&ctx.job_id))?;
                ctx.relevance = self.store.get_relevance(&ctx.job_id).await?;
                ctx.job = Some(job);
            }
            Stage::LoadTemplate => {
                ctx.template = Some(load_template(self.template_path.as_deref()));
            }
            Stage::RetrieveContext => {
                let (title, description) = match &ctx.job {
                    Some(job) => (job.title_or_na().to_string(), job.description_or_na().to_string()),
                    None => ("N/A".to_string(), "N/A".to_string()),
                };
                ctx.context = Some(self.retriever.assemble_context(&title, &description).await);
            }
            Stage::Synthesize => {
                let prompt = build_prompt(ctx);
                let request = CompletionRequest {
                    system: None,
                    prompt,
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                };
                let text = match self.generator.complete(&request).await {
                    Ok(text) => text.trim().to_string(),
                    Err(e) => {
                        tracing::error!(job_id = %ctx.job_id, error = %format!("{:#}", e), "proposal generation failed");
                        GENERATION_FAILED.to_string()
                    }
                };
                ctx.proposal = Some(text);
            }
            Stage::Done => {}
        }
        Ok(())
    }

    /// Return the stored proposal, or generate and store one. With
    /// `overwrite`, always regenerate. A failed generation is returned but
    /// not stored.
    pub async fn generate_proposal(&self, job_id: &str, overwrite: bool) -> Result<ProposalOutcome> {
        let existing = self.store.get_proposal(job_id).await?;
        if let Some(proposal) = existing.as_ref().filter(|_| !overwrite) {
            tracing::info!(job_id, "returning existing proposal");
            return Ok(ProposalOutcome {
                proposal: proposal.clone(),
                existed: true,
                saved: false,
            });
        }

        let ctx = self.run(job_id).await?;
        let text = ctx.proposal.unwrap_or_else(|| GENERATION_FAILED.to_string());
        let proposal = Proposal {
            job_id: job_id.to_string(),
            text,
        };

        if proposal.text == GENERATION_FAILED {
            return Ok(ProposalOutcome {
                proposal,
                existed: false,
                saved: false,
            });
        }

        self.store.upsert_proposal(&proposal).await?;
        tracing::info!(job_id, overwritten = existing.is_some(), "proposal saved");
        Ok(ProposalOutcome {
            proposal,
            existed: false,
            saved: true,
        })
    }

    /// Replace the text of an existing proposal.
    pub async fn save_proposal(&self, job_id: &str, text: &str) -> Result<Proposal> {
        let proposal = Proposal {
            job_id: job_id.to_string(),
            text: text.to_string(),
        };
        self.store.update_proposal(&proposal).await?;
        Ok(proposal)
    }
}

/// Read the template. A missing file falls back to [`DEFAULT_TEMPLATE`];
/// any other read error yields an empty template.
pub fn load_template(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_TEMPLATE.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "template not found; using default");
            DEFAULT_TEMPLATE.to_string()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "cannot read template");
            String::new()
        }
    }
}

fn relevance_guidance(relevance: Option<&MatchScore>) -> String {
    let Some(score) = relevance else {
        return String::new();
    };
    let mut info = format!("Relevance Score: {:.2}\n", score.score);
    let name = score.closest_profile_name.trim();
    if !name.is_empty() {
        info.push_str(&format!("Closest Matching Profile: {}\n", name));
        let guideline = if name == AGENCY_PROFILE {
            "Write from the perspective of our agency, highlighting the team's combined strength."
                .to_string()
        } else {
            format!(
                "Tailor the proposal to feature the expertise of {} as the key expert.",
                name
            )
        };
        info.push_str(&format!("Guideline: {}\n", guideline));
    }
    info
}

pub fn build_prompt(ctx: &PipelineContext) -> String {
    let (title, description) = match &ctx.job {
        Some(job) => (job.title_or_na(), job.description_or_na()),
        None => ("N/A", "N/A"),
    };
    format!(
        r#"You write proposals for a technology consultancy. Draft a proposal for the job below, grounded in our retrieved experience.

1. JOB DETAILS
- Job Title: {title}
- Job Description: {description}

2. INTERNAL CONTEXT AND GUIDELINES
{guidance}---
Our Relevant Experience (retrieved from the knowledge base):
{context}
---

3. TASK
Write the final proposal text. Follow the template for structure and flow, but do not output template placeholders such as {{{{introduction}}}} or the template's section titles.

Instructions:
- Use the past projects as concrete evidence. Explain how each one (its tech stack or AI capabilities) shows we can deliver this client's needs instead of listing them.
- Keep the tone confident, professional and plain. Prefer simple, technical vocabulary.
- Follow the perspective guideline (agency voice or a named expert) exactly.
- Output only the clean proposal text, ready to send, concise and in template order.

Proposal template:
{template}

Write the proposal now:
"#,
        title = title,
        description = description,
        guidance = relevance_guidance(ctx.relevance.as_ref()),
        context = ctx.context.as_deref().unwrap_or(crate::retrieve::NO_CONTEXT),
        template = ctx.template.as_deref().unwrap_or(""),
    )
}

/// `jobfit proposal generate`
pub async fn run_generate(config: &Config, job_id: &str, overwrite: bool) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    app.ensure_index().await;
    let outcome = app.proposals.generate_proposal(job_id, overwrite).await?;
    if outcome.existed {
        eprintln!("Proposal already exists; use --overwrite to regenerate.");
    } else if !outcome.saved {
        eprintln!("Generation failed; nothing was saved.");
    }
    println!("{}", outcome.proposal.text);
    app.close().await;
    Ok(())
}

/// `jobfit proposal show`
pub async fn run_show(config: &Config, job_id: &str) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    let proposal = app
        .store
        .get_proposal(job_id)
        .await?
        .ok_or_else(|| PipelineError::proposal_not_found(job_id))?;
    println!("{}", proposal.text);
    app.close().await;
    Ok(())
}

/// `jobfit proposal save`
pub async fn run_save(config: &Config, job_id: &str, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let app = crate::app::App::from_config(config).await?;
    app.proposals.save_proposal(job_id, text.trim()).await?;
    println!("saved: {}", job_id);
    app.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, IndexConfig, RetrievalConfig};
    use crate::embedding::DisabledEmbedder;
    use crate::index::VectorIndex;
    use crate::models::RelevanceCategory;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedGenerator {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => Err(PipelineError::Upstream("timeout".into()).into()),
            }
        }
    }

    fn job() -> JobRecord {
        JobRecord {
            id: "j1".into(),
            title: Some("RAG chatbot for clinic".into()),
            description: Some("Need LangChain + FAISS".into()),
            client_country: None,
            category_label: None,
            subcategory_label: None,
            team_name: None,
            published_at: None,
        }
    }

    fn pipeline(
        tmp: &TempDir,
        store: Arc<InMemoryStore>,
        reply: Option<&str>,
    ) -> (ProposalPipeline, Arc<ScriptedGenerator>) {
        let index = Arc::new(VectorIndex::new(
            IndexConfig {
                data_dir: tmp.path().join("rag"),
                index_file: "vector_store.idx".into(),
                metadata_file: "metadata.json".into(),
                digest_file: "file_hashes.json".into(),
            },
            vec![],
            ChunkingConfig::default(),
            Arc::new(DisabledEmbedder),
        ));
        let retriever = Arc::new(Retriever::new(index, RetrievalConfig::default()));
        let generator = Arc::new(ScriptedGenerator {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        });
        let pipeline = ProposalPipeline {
            store,
            retriever,
            generator: generator.clone(),
            template_path: Some(tmp.path().join("missing_template.md")),
            temperature: 0.5,
            max_tokens: 2048,
        };
        (pipeline, generator)
    }

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::FetchJob;
        let mut seen = vec![stage];
        while stage != Stage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::FetchJob,
                Stage::LoadTemplate,
                Stage::RetrieveContext,
                Stage::Synthesize,
                Stage::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, generator) = pipeline(&tmp, Arc::new(InMemoryStore::new()), Some("x"));
        let err = pipeline.run("nope").await.unwrap_err();
        assert!(PipelineError::is_not_found(&err));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_uses_default_template_and_sentinel_context() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::with_jobs(vec![job()]));
        let (pipeline, generator) = pipeline(&tmp, store, Some("  Dear client...  "));
        let ctx = pipeline.run("j1").await.unwrap();
        assert_eq!(ctx.proposal.as_deref(), Some("Dear client..."));
        assert_eq!(ctx.template.as_deref(), Some(DEFAULT_TEMPLATE));
        assert_eq!(ctx.context.as_deref(), Some(crate::retrieve::NO_CONTEXT));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("- Job Title: RAG chatbot for clinic"));
        assert!(prompts[0].contains("{{introduction}}"));
    }

    #[tokio::test]
    async fn test_generation_failure_yields_placeholder_and_is_not_saved() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::with_jobs(vec![job()]));
        let (pipeline, _) = pipeline(&tmp, store.clone(), None);
        let outcome = pipeline.generate_proposal("j1", false).await.unwrap();
        assert_eq!(outcome.proposal.text, GENERATION_FAILED);
        assert!(!outcome.saved);
        assert!(store.get_proposal("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_proposal_returned_unless_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::with_jobs(vec![job()]));
        store
            .upsert_proposal(&Proposal {
                job_id: "j1".into(),
                text: "old".into(),
            })
            .await
            .unwrap();
        let (pipeline, generator) = pipeline(&tmp, store.clone(), Some("new"));

        let outcome = pipeline.generate_proposal("j1", false).await.unwrap();
        assert!(outcome.existed);
        assert_eq!(outcome.proposal.text, "old");
        assert!(generator.prompts.lock().unwrap().is_empty());

        let outcome = pipeline.generate_proposal("j1", true).await.unwrap();
        assert!(outcome.saved);
        assert_eq!(store.get_proposal("j1").await.unwrap().unwrap().text, "new");
    }

    #[tokio::test]
    async fn test_save_requires_existing_proposal() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::with_jobs(vec![job()]));
        let (pipeline, _) = pipeline(&tmp, store, Some("x"));
        let err = pipeline.save_proposal("j1", "edited").await.unwrap_err();
        assert!(PipelineError::is_not_found(&err));
    }

    #[test]
    fn test_guidance_agency_vs_expert() {
        let mut score = MatchScore {
            job_id: "j1".into(),
            score: 0.856,
            category: RelevanceCategory::Strong,
            reasoning: String::new(),
            technology_match: String::new(),
            portfolio_match: String::new(),
            project_match: String::new(),
            location_match: String::new(),
            closest_profile_name: AGENCY_PROFILE.into(),
            tags: Default::default(),
        };
        let text = relevance_guidance(Some(&score));
        assert!(text.starts_with("Relevance Score: 0.86\n"));
        assert!(text.contains("perspective of our agency"));

        score.closest_profile_name = "Alice Khan".into();
        let text = relevance_guidance(Some(&score));
        assert!(text.contains("feature the expertise of Alice Khan as the key expert"));
        assert_eq!(relevance_guidance(None), "");
    }

    #[test]
    fn test_template_read_paths() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(load_template(None), DEFAULT_TEMPLATE);
        assert_eq!(
            load_template(Some(&tmp.path().join("nope.md"))),
            DEFAULT_TEMPLATE
        );
        let path = tmp.path().join("t.md");
        std::fs::write(&path, "Hello {{client_name}}").unwrap();
        assert_eq!(load_template(Some(&path)), "Hello {{client_name}}");
        // A directory is not readable as a file.
        assert_eq!(load_template(Some(tmp.path())), "");
    }
}
