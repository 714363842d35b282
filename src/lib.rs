//! # jobfit
//!
//! Retrieval-grounded job relevance scoring and proposal drafting.
//!
//! A small knowledge base (team profiles, past projects, company background)
//! is chunked, embedded and kept in a content-addressed vector index. Job
//! postings are scored against it in batches, either on demand or by an
//! incremental cron run, and proposals are drafted from the same context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ Source files │──▶│ Chunk+Embed │──▶│ VectorIndex │
//! │ (front matter)│   │  (gated)    │   │  (on disk)  │
//! └──────────────┘   └─────────────┘   └──────┬──────┘
//!                                             │ Retriever
//!                      ┌──────────────────────┼──────────────┐
//!                      ▼                      ▼              ▼
//!               ┌────────────┐        ┌─────────────┐  ┌──────────┐
//!               │  Proposal  │        │ BatchScorer │◀─│   Cron   │
//!               │  pipeline  │        │             │  │watermark │
//!               └─────┬──────┘        └──────┬──────┘  └────┬─────┘
//!                     └───────────┬──────────┴──────────────┘
//!                                 ▼
//!                           ┌──────────┐
//!                           │  SQLite  │
//!                           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Component wiring for CLI commands |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`jobs`] | Importing job postings |
//! | [`models`] | Core data types |
//! | [`error`] | Failure classes callers branch on |
//! | [`chunk`] | Splitting source documents into chunks |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Text-generation provider abstraction |
//! | [`index`] | Vector index and its rebuild gate |
//! | [`retrieve`] | Querying the index and rendering prompt context |
//! | [`proposal`] | Four-stage proposal pipeline |
//! | [`scoring`] | Batch relevance scoring and output repair |
//! | [`cron`] | Incremental scoring of new jobs |
//! | [`schedule`] | The relevance on/off switch |
//! | [`store`] | Persistence trait with SQLite and in-memory backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod chunk;
pub mod config;
pub mod cron;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod proposal;
pub mod retrieve;
pub mod schedule;
pub mod scoring;
pub mod store;
