//! Parsing and repair of the scorer's model output.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::models::{JobRecord, MatchScore, RelevanceCategory};

pub const AGENCY_TAG: &str = "Agencies disallowed";

/// Score and category forced onto non-Strong jobs that turn agencies away.
pub const AGENCY_OVERRIDE_SCORE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The whole response was a JSON array, or an object with a `results`
    /// array.
    Direct(Vec<Value>),
    /// The array was cut out of surrounding text.
    Extracted(Vec<Value>),
    Failed { reason: String },
}

impl ParseOutcome {
    pub fn records(self) -> Result<Vec<Value>, String> {
        match self {
            ParseOutcome::Direct(records) | ParseOutcome::Extracted(records) => Ok(records),
            ParseOutcome::Failed { reason } => Err(reason),
        }
    }
}

fn as_records(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

pub fn parse_response(text: &str) -> ParseOutcome {
    let trimmed = text.trim();
    if let Some(records) = serde_json::from_str(trimmed).ok().and_then(as_records) {
        return ParseOutcome::Direct(records);
    }
    extract_array(trimmed)
}

/// Parse the text between the first `[` and the last `]`.
pub fn extract_array(text: &str) -> ParseOutcome {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return ParseOutcome::Failed {
            reason: "no JSON array in response".to_string(),
        };
    };
    if end < start {
        return ParseOutcome::Failed {
            reason: "no JSON array in response".to_string(),
        };
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => ParseOutcome::Extracted(items),
        Ok(_) => ParseOutcome::Failed {
            reason: "extracted text is not an array".to_string(),
        },
        Err(e) => ParseOutcome::Failed {
            reason: format!("invalid JSON: {}", e),
        },
    }
}

/// The job id a record refers to. Models sometimes emit numeric ids.
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(record: &Value, key: &str, default: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

fn score_field(record: &Value) -> f64 {
    let raw = match record.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn tags_field(record: &Value) -> BTreeSet<String> {
    match record.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// The category the model itself assigned. Missing or unrecognized labels
/// count as Irrelevant.
pub fn model_category(record: &Value) -> RelevanceCategory {
    record
        .get("category")
        .and_then(Value::as_str)
        .and_then(RelevanceCategory::parse)
        .unwrap_or(RelevanceCategory::Irrelevant)
}

/// Build a [`MatchScore`] from one model record.
///
/// A recognized label that disagrees with the score band is replaced by the
/// band. A missing or unrecognized label stays Irrelevant whatever the score.
pub fn normalize_record(job_id: &str, record: &Value) -> MatchScore {
    let score = score_field(record);
    let claimed = record
        .get("category")
        .and_then(Value::as_str)
        .and_then(RelevanceCategory::parse);
    let category = match claimed {
        Some(claimed) => {
            let banded = RelevanceCategory::from_score(score);
            if claimed != banded {
                tracing::warn!(job_id, score, %claimed, category = %banded, "category disagrees with score; using score band");
            }
            banded
        }
        None => {
            if let Some(label) = record.get("category") {
                tracing::warn!(job_id, %label, "unrecognized category; using Irrelevant");
            }
            RelevanceCategory::Irrelevant
        }
    };

    MatchScore {
        job_id: job_id.to_string(),
        score,
        category,
        reasoning: text_field(record, "reasoning", "No reasoning provided"),
        technology_match: text_field(record, "technology_match", ""),
        portfolio_match: text_field(record, "portfolio_match", ""),
        project_match: text_field(record, "project_match", ""),
        location_match: text_field(record, "location_match", ""),
        closest_profile_name: text_field(record, "closest_profile_name", "Analysis Incomplete"),
        tags: tags_field(record),
    }
}

/// Whether the posting turns agencies away.
pub fn disallows_agencies(markers: &[String], job: &JobRecord) -> bool {
    let haystack = format!(
        "{}\n{}",
        job.title.as_deref().unwrap_or(""),
        job.description.as_deref().unwrap_or("")
    )
    .to_lowercase();
    markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .any(|m| !m.is_empty() && haystack.contains(&m))
}

/// Apply the agency rule. `initial` is the category the model assigned
/// before any adjustment. Returns `true` when the rule matched.
pub fn apply_agency_override(
    markers: &[String],
    job: &JobRecord,
    initial: RelevanceCategory,
    score: &mut MatchScore,
) -> bool {
    if !disallows_agencies(markers, job) {
        return false;
    }
    if initial == RelevanceCategory::Strong {
        score.category = initial;
        score.tags.insert(AGENCY_TAG.to_string());
    } else {
        score.score = AGENCY_OVERRIDE_SCORE;
        score.category = RelevanceCategory::Irrelevant;
        score.tags.remove(AGENCY_TAG);
    }
    tracing::info!(job_id = %score.job_id, category = %score.category, "agency restriction applied");
    true
}
