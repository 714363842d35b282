//! Knowledge-file chunker.
//!
//! Two strategies, picked by [`SourceKind`]:
//!
//! - **Structured** (`profile`, `project`): the file is a sequence of YAML
//!   front-matter records separated by `---` lines. Each record becomes one
//!   chunk whose embedding text is `"<Kind>: <name>. Description: <description>"`
//!   and whose body keeps every parsed field. Records that fail to parse are
//!   logged and skipped.
//! - **Free text** (`company_profile`, `individual_profile`): recursive
//!   splitting over a priority list of separators into windows of at most
//!   `chunk_size` characters, carrying up to `chunk_overlap` characters across
//!   each cut. Separators stay attached to the text that follows them, so a
//!   heading always opens its window.
//!
//! Chunk ids are `<source>_<i>` (or `<source>_<block>_<i>` for per-person
//! blocks) and are stable for identical input.

use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result};

use crate::config::{ChunkingConfig, SourceConfig};
use crate::models::{Chunk, ChunkBody, ProfileFields, ProjectFields, SourceKind};

const RECORD_SEPARATOR: &str = "\n---\n";
const PERSON_SEPARATOR: &str = "\n- name:";

const COMPANY_SEPARATORS: &[&str] = &["\n# ", "\n## ", "\n### ", "\n#### ", "\n\n", "\n", " ", ""];
const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Read a source file. A missing file is `Ok(None)`.
pub fn read_source(source: &SourceConfig) -> Result<Option<String>> {
    match std::fs::read_to_string(&source.path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| {
            format!("Failed to read source '{}': {}", source.name, source.path.display())
        }),
    }
}

/// Chunk every configured source, in config order.
pub fn chunk_sources(sources: &[SourceConfig], chunking: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let mut all = Vec::new();
    for source in sources {
        let Some(text) = read_source(source)? else {
            tracing::warn!(source = %source.name, path = %source.path.display(), "source file not found; skipping");
            continue;
        };
        let chunks = chunk_source(source, &text, chunking);
        tracing::info!(source = %source.name, kind = %source.kind, chunks = chunks.len(), "chunked source");
        all.extend(chunks);
    }
    Ok(all)
}

pub fn chunk_source(source: &SourceConfig, text: &str, chunking: &ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match source.kind {
        SourceKind::Profile | SourceKind::Project => chunk_records(&source.name, source.kind, text),
        SourceKind::CompanyProfile => {
            let splitter = RecursiveSplitter::new(COMPANY_SEPARATORS, chunking);
            passages(&source.name, source.kind, splitter.split(text), None)
        }
        SourceKind::IndividualProfile => {
            let splitter = RecursiveSplitter::new(DEFAULT_SEPARATORS, chunking);
            let mut chunks = Vec::new();
            for (block_idx, block) in text.split(PERSON_SEPARATOR).enumerate() {
                let block = block.trim();
                if block.is_empty() {
                    continue;
                }
                let person = if block_idx == 0 {
                    block.to_string()
                } else {
                    format!("- name: {}", block)
                };
                chunks.extend(passages(
                    &source.name,
                    source.kind,
                    splitter.split(&person),
                    Some(block_idx),
                ));
            }
            chunks
        }
    }
}

fn passages(source: &str, kind: SourceKind, windows: Vec<String>, block: Option<usize>) -> Vec<Chunk> {
    windows
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: match block {
                Some(b) => format!("{}_{}_{}", source, b, i),
                None => format!("{}_{}", source, i),
            },
            source: source.to_string(),
            kind,
            embedding_text: text.clone(),
            body: ChunkBody::Passage { text },
        })
        .collect()
}

// ============ Structured records ============

fn chunk_records(source: &str, kind: SourceKind, text: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for (i, record) in text.trim().split(RECORD_SEPARATOR).enumerate() {
        if record.trim().is_empty() {
            continue;
        }
        match parse_record(kind, record) {
            Ok((embedding_text, body)) => {
                tracing::debug!(source, id = i, name = body.label(), "parsed record");
                chunks.push(Chunk {
                    id: format!("{}_{}", source, i),
                    source: source.to_string(),
                    kind,
                    embedding_text,
                    body,
                });
            }
            Err(e) => {
                tracing::warn!(source, record = i + 1, error = %format!("{:#}", e), "skipping malformed record");
            }
        }
    }
    chunks
}

fn parse_record(kind: SourceKind, record: &str) -> Result<(String, ChunkBody)> {
    let mut fields = front_matter(record)?;

    let kind_label = match kind {
        SourceKind::Profile => "Profile",
        _ => "Project",
    };
    let name = fields
        .remove("name")
        .and_then(scalar_text)
        .unwrap_or_else(|| format!("Unnamed {}", kind.as_str()));
    let description = fields
        .remove("description")
        .and_then(scalar_text)
        .unwrap_or_else(|| "No description provided.".to_string());
    let embedding_text = format!("{}: {}. Description: {}", kind_label, name, description);

    let body = match kind {
        SourceKind::Profile => ChunkBody::Profile(ProfileFields {
            name,
            role: fields.remove("role").and_then(scalar_text),
            description,
            core_expertise: text_list(fields.remove("core_expertise")),
            extra: fields,
        }),
        _ => ChunkBody::Project(ProjectFields {
            name,
            description,
            domain: text_list(fields.remove("domain")),
            tech_stack: text_list(fields.remove("tech_stack")),
            ai_capabilities: text_list(fields.remove("ai_capabilities")),
            extra: fields,
        }),
    };
    Ok((embedding_text, body))
}

/// First YAML document of a record, as a JSON object.
fn front_matter(record: &str) -> Result<BTreeMap<String, serde_json::Value>> {
    use serde::Deserialize;

    let document = serde_yaml::Deserializer::from_str(record)
        .next()
        .ok_or_else(|| anyhow::anyhow!("record has no YAML document"))?;
    let yaml = serde_yaml::Value::deserialize(document).context("invalid YAML front matter")?;
    let json = serde_json::to_value(&yaml).context("front matter is not representable as JSON")?;
    match json {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => anyhow::bail!("front matter must be a mapping, got {}", json_kind(&other)),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "a mapping",
    }
}

fn scalar_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// A list-valued key may be a YAML list or a comma-separated string.
fn text_list(value: Option<serde_json::Value>) -> Vec<String> {
    match value {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items.into_iter().filter_map(scalar_text).collect(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => vec![other.to_string()],
    }
}

// ============ Recursive splitting ============

/// Size-bounded splitter with overlap. Lengths are counted in characters.
pub struct RecursiveSplitter<'a> {
    separators: &'a [&'a str],
    chunk_size: usize,
    chunk_overlap: usize,
}

impl<'a> RecursiveSplitter<'a> {
    pub fn new(separators: &'a [&'a str], chunking: &ChunkingConfig) -> Self {
        Self {
            separators,
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, self.separators)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Use the first separator present in the text; finer ones are kept
        // for pieces that are still too long.
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut windows = Vec::new();
        let mut fitting: Vec<String> = Vec::new();
        for piece in split_keep_start(text, separator) {
            if char_len(&piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                windows.extend(self.merge(&fitting));
                fitting.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    windows.push(trimmed.to_string());
                }
            } else {
                windows.extend(self.split_with(&piece, finer));
            }
        }
        if !fitting.is_empty() {
            windows.extend(self.merge(&fitting));
        }
        windows
    }

    /// Greedily pack pieces into windows, keeping a tail of at most
    /// `chunk_overlap` characters as the start of the next window.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_window(&mut windows, &current);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }
        push_window(&mut windows, &current);
        windows
    }
}

fn push_window(windows: &mut Vec<String>, pieces: &VecDeque<&str>) {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// Split on `separator`, attaching each separator to the piece after it.
/// An empty separator splits into characters.
fn split_keep_start(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(text[start..idx].to_string());
        start = idx;
    }
    pieces.push(text[start..].to_string());
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source(name: &str, kind: SourceKind) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            path: PathBuf::from(format!("{}.md", name)),
            kind,
        }
    }

    fn chunking(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    const PROFILES: &str = "name: Alice Khan
role: ML Engineer
description: Builds retrieval systems
core_expertise: [Python, LangChain, FAISS]
linkedin: https://example.com/alice
---
name: [unclosed
---
name: Bilal
description: Frontend lead
core_expertise: React, TypeScript ,  Next.js
";

    #[test]
    fn test_structured_records_and_malformed_skip() {
        let chunks = chunk_source(&source("profiles", SourceKind::Profile), PROFILES, &chunking(800, 100));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "profiles_0");
        assert_eq!(chunks[1].id, "profiles_2");
        assert_eq!(
            chunks[0].embedding_text,
            "Profile: Alice Khan. Description: Builds retrieval systems"
        );
        match &chunks[0].body {
            ChunkBody::Profile(p) => {
                assert_eq!(p.role.as_deref(), Some("ML Engineer"));
                assert_eq!(p.core_expertise, vec!["Python", "LangChain", "FAISS"]);
                assert_eq!(p.extra["linkedin"], "https://example.com/alice");
            }
            other => panic!("unexpected body {:?}", other),
        }
        match &chunks[1].body {
            ChunkBody::Profile(p) => {
                assert_eq!(p.core_expertise, vec!["React", "TypeScript", "Next.js"]);
                assert!(p.role.is_none());
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_structured_defaults() {
        let chunks = chunk_source(
            &source("projects", SourceKind::Project),
            "tech_stack: [Rust]\n",
            &chunking(800, 100),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].embedding_text,
            "Project: Unnamed project. Description: No description provided."
        );
    }

    #[test]
    fn test_non_mapping_record_skipped() {
        let chunks = chunk_source(
            &source("projects", SourceKind::Project),
            "just a sentence\n---\nname: Real\ndescription: ok\n",
            &chunking(800, 100),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "projects_1");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        for kind in SourceKind::ALL {
            assert!(chunk_source(&source("s", kind), "  \n ", &chunking(800, 100)).is_empty());
        }
    }

    #[test]
    fn test_short_passage_single_chunk() {
        let chunks = chunk_source(
            &source("company", SourceKind::CompanyProfile),
            "We build AI products.",
            &chunking(800, 100),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "company_0");
        assert_eq!(chunks[0].embedding_text, "We build AI products.");
    }

    #[test]
    fn test_windows_bounded_with_overlap() {
        let text = (0..300).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let windows = RecursiveSplitter::new(DEFAULT_SEPARATORS, &chunking(100, 20)).split(&text);
        assert!(windows.len() > 5);
        for w in &windows {
            assert!(char_len(w) <= 100, "window too long: {}", char_len(w));
        }
        for pair in windows.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].split(' ').any(|w| w == first_word),
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_no_text_lost() {
        let text = (0..120).map(|i| format!("token{}", i)).collect::<Vec<_>>().join(" ");
        let windows = RecursiveSplitter::new(DEFAULT_SEPARATORS, &chunking(60, 10)).split(&text);
        for i in 0..120 {
            let token = format!("token{}", i);
            assert!(
                windows.iter().any(|w| w.split(' ').any(|t| t == token)),
                "{} missing",
                token
            );
        }
    }

    #[test]
    fn test_company_headings_open_windows() {
        let text = format!(
            "# About\n{}\n## Services\n{}",
            "We are a small studio. ".repeat(3),
            "We ship RAG systems. ".repeat(3)
        );
        let windows = RecursiveSplitter::new(COMPANY_SEPARATORS, &chunking(90, 10)).split(&text);
        assert!(windows[0].starts_with("# About"));
        assert!(windows.iter().any(|w| w.starts_with("## Services")));
    }

    #[test]
    fn test_individual_profiles_split_per_person() {
        let text = "- name: Alice\n  role: Data scientist\n- name: Bob\n  role: DevOps";
        let chunks = chunk_source(
            &source("people", SourceKind::IndividualProfile),
            text,
            &chunking(800, 100),
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "people_0_0");
        assert_eq!(chunks[1].id, "people_1_0");
        assert!(chunks[1].embedding_text.starts_with("- name: Bob"));
        assert!(chunks[0].embedding_text.contains("Data scientist"));
    }

    #[test]
    fn test_split_keep_start() {
        assert_eq!(split_keep_start("a\n\nb\n\nc", "\n\n"), vec!["a", "\n\nb", "\n\nc"]);
        assert_eq!(split_keep_start("ab", ""), vec!["a", "b"]);
        assert_eq!(split_keep_start("\n\nx", "\n\n"), vec!["\n\nx"]);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta. ".repeat(80);
        let a = chunk_source(&source("c", SourceKind::CompanyProfile), &text, &chunking(200, 30));
        let b = chunk_source(&source("c", SourceKind::CompanyProfile), &text, &chunking(200, 30));
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let src = SourceConfig {
            name: "ghost".into(),
            path: PathBuf::from("/definitely/not/here.md"),
            kind: SourceKind::Project,
        };
        assert!(read_source(&src).unwrap().is_none());
    }
}
