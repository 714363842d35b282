//! Loading job postings into the store.
//!
//! Job discovery happens elsewhere; this module accepts an exported JSON
//! file, either an array of jobs or an object with a `jobs` array.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::config::Config;
use crate::models::JobRecord;

pub fn parse_jobs(text: &str) -> Result<Vec<JobRecord>> {
    let value: Value = serde_json::from_str(text).context("Job file is not valid JSON")?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("jobs") {
            Some(Value::Array(items)) => items,
            _ => bail!("Expected a JSON array of jobs or an object with a 'jobs' array"),
        },
        _ => bail!("Expected a JSON array of jobs or an object with a 'jobs' array"),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, mut item)| {
            // Numeric ids are common in exports.
            if let Some(id) = item.get("id").and_then(Value::as_i64) {
                item["id"] = Value::String(id.to_string());
            }
            serde_json::from_value(item).with_context(|| format!("Invalid job at position {}", i))
        })
        .collect()
}

/// `jobfit jobs import <file>`
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let jobs = parse_jobs(&text)?;

    let app = crate::app::App::from_config(config).await?;
    for job in &jobs {
        app.store.upsert_job(job).await?;
    }
    tracing::info!(count = jobs.len(), path = %path.display(), "jobs imported");
    println!("imported: {}", jobs.len());
    app.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array_and_wrapped() {
        let jobs = parse_jobs(
            r#"[{"id": 17, "title": "RAG bot", "publishedDateTime": "2024-05-01T12:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(jobs[0].id, "17");
        assert!(jobs[0].published_at.is_some());
        assert!(jobs[0].description.is_none());

        let jobs = parse_jobs(r#"{"jobs": [{"id": "a"}, {"id": "b"}]}"#).unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(parse_jobs("42").is_err());
        assert!(parse_jobs(r#"{"items": []}"#).is_err());
        assert!(parse_jobs(r#"[{"title": "no id"}]"#).is_err());
    }
}
