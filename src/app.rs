//! Wiring of the pipeline components from a [`Config`].
//!
//! Every CLI command builds one [`App`]; the components share the SQLite
//! pool, the index and the provider clients through `Arc`s.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::cron::CronScheduler;
use crate::embedding::create_embedder;
use crate::generation::create_generators;
use crate::index::{IndexState, VectorIndex};
use crate::proposal::ProposalPipeline;
use crate::retrieve::Retriever;
use crate::schedule::RelevanceGate;
use crate::scoring::BatchScorer;
use crate::store::sqlite::SqliteStore;
use crate::store::JobStore;
use crate::{db, migrate};

pub struct App {
    pool: SqlitePool,
    pub store: Arc<dyn JobStore>,
    pub index: Arc<VectorIndex>,
    pub retriever: Arc<Retriever>,
    pub proposals: ProposalPipeline,
    pub scorer: Arc<BatchScorer>,
    pub relevance_gate: Arc<RelevanceGate>,
    pub cron: CronScheduler,
}

impl App {
    /// Open the database (migrating it if needed) and build every component.
    /// Provider clients are created here, so a missing API key fails now.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::new(pool.clone()));

        let embedder = create_embedder(&config.embedding)?;
        let (scoring_generator, proposal_generator) = create_generators(&config.generation)?;

        let index = Arc::new(VectorIndex::from_config(config, embedder));
        let retriever = Arc::new(Retriever::new(index.clone(), config.retrieval.clone()));
        let relevance_gate = Arc::new(RelevanceGate::from_config(&config.relevance, store.clone())?);

        let proposals = ProposalPipeline::new(
            config,
            store.clone(),
            retriever.clone(),
            proposal_generator,
        );
        let scorer = Arc::new(BatchScorer::new(
            config,
            store.clone(),
            retriever.clone(),
            scoring_generator,
        ));
        let cron = CronScheduler::new(
            store.clone(),
            scorer.clone(),
            relevance_gate.clone(),
            config.cron.clone(),
        );

        Ok(Self {
            pool,
            store,
            index,
            retriever,
            proposals,
            scorer,
            relevance_gate,
            cron,
        })
    }

    /// Load or build the index before serving retrieval. Failure leaves
    /// retrieval returning no context.
    pub async fn ensure_index(&self) -> IndexState {
        let state = self.index.ensure_ready().await;
        if let IndexState::Unavailable { reason } = &state {
            eprintln!("warning: knowledge index unavailable: {}", reason);
        }
        state
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
