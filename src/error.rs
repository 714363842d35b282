//! Error taxonomy for the pipeline.
//!
//! Functions return `anyhow::Result` like the rest of the crate. A
//! [`PipelineError`] is attached wherever a caller needs to branch on the
//! failure class; recover it with [`PipelineError::classify`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("relevance checking is disabled")]
    RelevanceDisabled,
}

impl PipelineError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            entity: "job",
            id: id.into(),
        }
    }

    pub fn proposal_not_found(id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            entity: "proposal",
            id: id.into(),
        }
    }

    /// Find the first `PipelineError` in an error chain.
    pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
        err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
    }

    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(Self::classify(err), Some(PipelineError::NotFound { .. }))
    }
}
