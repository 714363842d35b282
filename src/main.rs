//! # jobfit CLI
//!
//! ## Usage
//!
//! ```bash
//! jobfit --config ./config/jobfit.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jobfit init` | Create the SQLite database and run schema migrations |
//! | `jobfit jobs import <file>` | Load job postings from a JSON export |
//! | `jobfit index status\|rebuild\|query` | Inspect, rebuild or query the knowledge index |
//! | `jobfit proposal generate\|show\|save` | Draft, print or replace a job's proposal |
//! | `jobfit score <ids>...` | Score jobs for relevance in batches |
//! | `jobfit cron run\|status\|reset` | Incremental scoring of new jobs |
//! | `jobfit relevance status\|enable\|disable\|auto` | The relevance on/off switch |
//!
//! ## Examples
//!
//! ```bash
//! jobfit init
//! jobfit jobs import ./jobs.json
//! jobfit index rebuild
//! jobfit score 1021 1022 1023 --force
//! jobfit proposal generate 1021
//! jobfit cron run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use jobfit::{config, cron, index, jobs, logging, migrate, proposal, schedule, scoring};

/// jobfit: retrieval-grounded job relevance scoring and proposal drafting.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/jobfit.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "jobfit",
    about = "Retrieval-grounded job relevance scoring and proposal drafting",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jobfit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Manage stored job postings.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Inspect and maintain the knowledge index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Draft, show and edit proposals.
    Proposal {
        #[command(subcommand)]
        action: ProposalAction,
    },

    /// Score jobs for relevance.
    ///
    /// Jobs are sent in batches of `[scoring].max_batch_size`. Refuses to
    /// run while relevance checking is off unless `--force` is given.
    Score {
        /// Job ids to score.
        #[arg(required = true)]
        ids: Vec<String>,

        /// Score even when relevance checking is switched off.
        #[arg(long)]
        force: bool,
    },

    /// Incremental scoring of newly published jobs.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },

    /// Control the relevance on/off switch.
    Relevance {
        #[command(subcommand)]
        action: RelevanceAction,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// Import jobs from a JSON file (an array, or an object with `jobs`).
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Show whether the index is current and what it holds.
    Status,
    /// Rebuild the index from the configured sources.
    Rebuild,
    /// Print the nearest chunks for a query.
    Query {
        /// Query text.
        query: String,

        /// Number of results.
        #[arg(long, default_value_t = 8)]
        k: usize,
    },
}

#[derive(Subcommand)]
enum ProposalAction {
    /// Generate a proposal, or print the stored one.
    Generate {
        job_id: String,

        /// Regenerate even if a proposal is already stored.
        #[arg(long)]
        overwrite: bool,
    },
    /// Print the stored proposal.
    Show { job_id: String },
    /// Replace the stored proposal with the contents of a file.
    Save {
        job_id: String,

        /// File holding the new proposal text.
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// Score jobs published since the last run.
    Run,
    /// Print the watermark.
    Status,
    /// Clear the watermark; the next run rescans from scratch.
    Reset,
}

#[derive(Subcommand)]
enum RelevanceAction {
    /// Show the effective switch state and where it comes from.
    Status,
    /// Force relevance checking on.
    Enable,
    /// Force relevance checking off.
    Disable,
    /// Drop the manual override; config and schedule decide.
    Auto,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Jobs { action } => match action {
            JobsAction::Import { file } => jobs::run_import(&cfg, &file).await?,
        },
        Commands::Index { action } => match action {
            IndexAction::Status => index::run_status(&cfg).await?,
            IndexAction::Rebuild => index::run_rebuild(&cfg).await?,
            IndexAction::Query { query, k } => index::run_query(&cfg, &query, k).await?,
        },
        Commands::Proposal { action } => match action {
            ProposalAction::Generate { job_id, overwrite } => {
                proposal::run_generate(&cfg, &job_id, overwrite).await?
            }
            ProposalAction::Show { job_id } => proposal::run_show(&cfg, &job_id).await?,
            ProposalAction::Save { job_id, file } => {
                proposal::run_save(&cfg, &job_id, &file).await?
            }
        },
        Commands::Score { ids, force } => scoring::run_score(&cfg, &ids, force).await?,
        Commands::Cron { action } => match action {
            CronAction::Run => cron::run_cron(&cfg).await?,
            CronAction::Status => cron::run_status(&cfg).await?,
            CronAction::Reset => cron::run_reset(&cfg).await?,
        },
        Commands::Relevance { action } => match action {
            RelevanceAction::Status => schedule::run_status(&cfg).await?,
            RelevanceAction::Enable => schedule::run_set(&cfg, Some(true)).await?,
            RelevanceAction::Disable => schedule::run_set(&cfg, Some(false)).await?,
            RelevanceAction::Auto => schedule::run_set(&cfg, None).await?,
        },
    }

    Ok(())
}
