//! Core data models shared by the index, the scorer and the proposal
//! pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of knowledge file a chunk came from. Decides the chunking
/// strategy and the section a retrieved chunk is rendered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Profile,
    Project,
    CompanyProfile,
    IndividualProfile,
}

impl SourceKind {
    /// Fixed rendering order for assembled context.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Profile,
        SourceKind::IndividualProfile,
        SourceKind::Project,
        SourceKind::CompanyProfile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Profile => "profile",
            SourceKind::Project => "project",
            SourceKind::CompanyProfile => "company_profile",
            SourceKind::IndividualProfile => "individual_profile",
        }
    }

    pub fn section_title(&self) -> &'static str {
        match self {
            SourceKind::Profile => "RELEVANT TEAM PROFILES",
            SourceKind::IndividualProfile => "RELEVANT TEAM MEMBER NOTES",
            SourceKind::Project => "RELEVANT PAST PROJECTS",
            SourceKind::CompanyProfile => "RELEVANT COMPANY BACKGROUND",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Front-matter fields of a team member record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub name: String,
    pub role: Option<String>,
    pub description: String,
    #[serde(default)]
    pub core_expertise: Vec<String>,
    /// Every other key from the record, verbatim.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Front-matter fields of a past-project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFields {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub ai_capabilities: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Per-kind chunk payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "snake_case")]
pub enum ChunkBody {
    Profile(ProfileFields),
    Project(ProjectFields),
    Passage { text: String },
}

impl ChunkBody {
    /// Render the chunk as an indented bullet for a prompt context block.
    pub fn render_for_prompt(&self) -> String {
        match self {
            ChunkBody::Profile(p) => format!(
                "- Name: {}\n  Role: {}\n  Expertise: {}",
                p.name,
                p.role.as_deref().unwrap_or("N/A"),
                p.core_expertise.join(", ")
            ),
            ChunkBody::Project(p) => format!(
                "- Project: {}\n  Domain: {}\n  Description: {}\n  Tech Stack Used: {}\n  Key AI Capabilities: {}",
                p.name,
                p.domain.join(", "),
                p.description,
                p.tech_stack.join(", "),
                p.ai_capabilities.join(", ")
            ),
            ChunkBody::Passage { text } => format!("- {}", text.trim()),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &str {
        match self {
            ChunkBody::Profile(p) => &p.name,
            ChunkBody::Project(p) => &p.name,
            ChunkBody::Passage { .. } => "passage",
        }
    }
}

/// A retrievable unit of the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub kind: SourceKind,
    pub embedding_text: String,
    pub body: ChunkBody,
}

/// One nearest-neighbor hit. `distance` is squared Euclidean; lower is
/// closer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub source: String,
    pub kind: SourceKind,
    pub distance: f32,
    pub embedding_text: String,
    pub body: ChunkBody,
}

/// The subset of a job posting the pipeline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client_country: Option<String>,
    #[serde(default)]
    pub category_label: Option<String>,
    #[serde(default)]
    pub subcategory_label: Option<String>,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default, alias = "publishedDateTime")]
    pub published_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn title_or_na(&self) -> &str {
        self.title.as_deref().unwrap_or("N/A")
    }

    pub fn description_or_na(&self) -> &str {
        self.description.as_deref().unwrap_or("N/A")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelevanceCategory {
    Strong,
    Medium,
    Low,
    Irrelevant,
}

impl RelevanceCategory {
    /// Band a clamped score: [0,0.3) Irrelevant, [0.3,0.5) Low,
    /// [0.5,0.8) Medium, [0.8,1] Strong.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RelevanceCategory::Strong
        } else if score >= 0.5 {
            RelevanceCategory::Medium
        } else if score >= 0.3 {
            RelevanceCategory::Low
        } else {
            RelevanceCategory::Irrelevant
        }
    }

    /// Case-insensitive parse of a model-supplied label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "strong" => Some(RelevanceCategory::Strong),
            "medium" => Some(RelevanceCategory::Medium),
            "low" => Some(RelevanceCategory::Low),
            "irrelevant" => Some(RelevanceCategory::Irrelevant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelevanceCategory::Strong => "Strong",
            RelevanceCategory::Medium => "Medium",
            RelevanceCategory::Low => "Low",
            RelevanceCategory::Irrelevant => "Irrelevant",
        }
    }
}

impl fmt::Display for RelevanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted relevance assessment for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub job_id: String,
    pub score: f64,
    pub category: RelevanceCategory,
    pub reasoning: String,
    pub technology_match: String,
    pub portfolio_match: String,
    pub project_match: String,
    pub location_match: String,
    pub closest_profile_name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub job_id: String,
    pub text: String,
}

/// Per-job result of a scoring batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    #[serde(rename = "Success")]
    Success,
    #[serde(rename = "Load Failed")]
    LoadFailed,
    #[serde(rename = "Analysis Missing")]
    AnalysisMissing,
    #[serde(rename = "Analysis Failed")]
    AnalysisFailed,
    #[serde(rename = "Processing Error")]
    ProcessingError,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "Success",
            JobStatus::LoadFailed => "Load Failed",
            JobStatus::AnalysisMissing => "Analysis Missing",
            JobStatus::AnalysisFailed => "Analysis Failed",
            JobStatus::ProcessingError => "Processing Error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobOutcome {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bands() {
        assert_eq!(RelevanceCategory::from_score(0.0), RelevanceCategory::Irrelevant);
        assert_eq!(RelevanceCategory::from_score(0.29), RelevanceCategory::Irrelevant);
        assert_eq!(RelevanceCategory::from_score(0.3), RelevanceCategory::Low);
        assert_eq!(RelevanceCategory::from_score(0.49), RelevanceCategory::Low);
        assert_eq!(RelevanceCategory::from_score(0.5), RelevanceCategory::Medium);
        assert_eq!(RelevanceCategory::from_score(0.79), RelevanceCategory::Medium);
        assert_eq!(RelevanceCategory::from_score(0.8), RelevanceCategory::Strong);
        assert_eq!(RelevanceCategory::from_score(1.0), RelevanceCategory::Strong);
    }

    #[test]
    fn test_category_parse_is_lenient() {
        assert_eq!(RelevanceCategory::parse(" strong "), Some(RelevanceCategory::Strong));
        assert_eq!(RelevanceCategory::parse("MEDIUM"), Some(RelevanceCategory::Medium));
        assert_eq!(RelevanceCategory::parse("Excellent"), None);
    }

    #[test]
    fn test_chunk_body_roundtrips_through_json() {
        let chunk = Chunk {
            id: "projects_0".into(),
            source: "projects".into(),
            kind: SourceKind::Project,
            embedding_text: "Project: A. Description: d".into(),
            body: ChunkBody::Project(ProjectFields {
                name: "A".into(),
                description: "d".into(),
                domain: vec!["health".into()],
                tech_stack: vec!["rust".into()],
                ai_capabilities: vec![],
                extra: BTreeMap::from([("year".to_string(), serde_json::json!(2023))]),
            }),
        };
        let text = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&text).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_render_project_for_prompt() {
        let body = ChunkBody::Project(ProjectFields {
            name: "Clinic Bot".into(),
            description: "Triage assistant".into(),
            domain: vec!["Healthcare".into()],
            tech_stack: vec!["Python".into(), "FastAPI".into()],
            ai_capabilities: vec!["RAG".into()],
            extra: BTreeMap::new(),
        });
        let text = body.render_for_prompt();
        assert!(text.starts_with("- Project: Clinic Bot\n"));
        assert!(text.contains("  Tech Stack Used: Python, FastAPI"));
        assert!(text.contains("  Key AI Capabilities: RAG"));
    }

    #[test]
    fn test_job_record_accepts_upstream_timestamp_key() {
        let job: JobRecord = serde_json::from_str(
            r#"{"id":"~01","title":"T","publishedDateTime":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(job.published_at.is_some());
        assert_eq!(job.description_or_na(), "N/A");
    }

    #[test]
    fn test_job_status_serializes_as_label() {
        let outcome = JobOutcome::new("1", JobStatus::LoadFailed);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "Load Failed");
        assert!(json.get("detail").is_none());
    }
}
