//! Query the index and render retrieved chunks as prompt context.
//!
//! Two renderings exist: the sectioned block used for proposal drafting and
//! the per-job snippet block used by the batch scorer. Index failures are
//! logged and rendered as "no context"; they never abort a caller.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::index::VectorIndex;
use crate::models::{ChunkBody, JobRecord, RetrievalResult, SourceKind};

/// Rendered when nothing relevant is retrieved.
pub const NO_CONTEXT: &str =
    "No specifically relevant profiles or projects were found in our knowledge base.";

pub struct Retriever {
    index: Arc<VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    async fn search(&self, query: &str, k: usize) -> Vec<RetrievalResult> {
        match self.index.query(query, k).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "retrieval failed; continuing without context");
                Vec::new()
            }
        }
    }

    /// Sectioned context for proposal drafting.
    pub async fn assemble_context(&self, job_title: &str, job_description: &str) -> String {
        let query = format!("Job Title: {}. Description: {}", job_title, job_description);
        let results = self.search(&query, self.config.proposal_k).await;
        for kind in SourceKind::ALL {
            let names: Vec<&str> = results
                .iter()
                .filter(|r| r.kind == kind)
                .take(self.config.per_kind_limit)
                .map(|r| r.body.label())
                .collect();
            if !names.is_empty() {
                tracing::debug!(%kind, ?names, "retrieved for proposal");
            }
        }
        render_sections(&results, self.config.per_kind_limit)
    }

    /// Snippet block for one job in a scoring prompt.
    pub async fn scoring_context(&self, job: &JobRecord) -> String {
        let query = format!("{}\n{}", job.title_or_na(), job.description_or_na());
        let results = self.search(&query, self.config.scoring_k).await;
        render_scoring_block(&job.id, &results)
    }
}

/// Group results by kind in a fixed order, at most `per_kind_limit` per
/// section, rank order preserved within a section.
pub fn render_sections(results: &[RetrievalResult], per_kind_limit: usize) -> String {
    let sections: Vec<String> = SourceKind::ALL
        .iter()
        .filter_map(|kind| {
            let items: Vec<String> = results
                .iter()
                .filter(|r| r.kind == *kind)
                .take(per_kind_limit)
                .map(|r| r.body.render_for_prompt())
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(format!("--- {} ---\n{}", kind.section_title(), items.join("\n")))
            }
        })
        .collect();

    if sections.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        sections.join("\n\n")
    }
}

pub fn render_scoring_block(job_id: &str, results: &[RetrievalResult]) -> String {
    let mut block = format!("--- Retrieved Context for Job {} ---\n", job_id);
    if results.is_empty() {
        block.push_str(
            "No specific context snippets retrieved for this job. Analyze based on general knowledge if applicable, or indicate lack of specific company fit.\n",
        );
    }
    for (n, result) in results.iter().enumerate() {
        let text = match &result.body {
            ChunkBody::Passage { text } => text.clone(),
            other => other.render_for_prompt(),
        };
        block.push_str(&format!(
            "Context Snippet {} (Source: {}):\n{}\n---\n",
            n + 1,
            result.kind,
            text
        ));
    }
    block.push_str(&format!("--- End of Retrieved Context for Job {} ---\n", job_id));
    block
}
