use std::sync::Arc;

use crate::config::Config;
use crate::error::TutorResult;

pub mod feedback_service;
pub mod lesson_service;
pub mod progression_service;
pub mod question_generator;
pub mod rounding;
pub mod snapshot_store;
pub mod verifier;

use feedback_service::FeedbackService;
use progression_service::ProgressionEngine;
use question_generator::QuestionGenerator;
use snapshot_store::{InMemorySnapshotStore, RedisSnapshotStore, SnapshotStore};
use verifier::Verifier;

/// Shared, immutable per-process state. Learner state is never held here; it is
/// loaded from `store` at the start of each turn.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SnapshotStore>,
    pub engine: ProgressionEngine,
    pub generator: QuestionGenerator,
    pub verifier: Verifier,
    pub feedback: FeedbackService,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn SnapshotStore> = match &config.redis_uri {
            Some(uri) => Arc::new(RedisSnapshotStore::connect(uri, config.snapshot_ttl_seconds).await?),
            None => {
                tracing::warn!("REDIS_URI not set, lesson snapshots are kept in memory");
                Arc::new(InMemorySnapshotStore::new(config.snapshot_ttl_seconds))
            }
        };
        Ok(Self::with_store(config, store)?)
    }

    pub fn in_memory(config: Config) -> TutorResult<Self> {
        let store = Arc::new(InMemorySnapshotStore::new(config.snapshot_ttl_seconds));
        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: Arc<dyn SnapshotStore>) -> TutorResult<Self> {
        let engine = ProgressionEngine::standard()?;
        let generator = QuestionGenerator::new(config.generation_retry_budget);
        let feedback = FeedbackService::new(&config);

        tracing::info!(
            "Lesson engine ready: {} stages, {} store, AI feedback {}",
            engine.catalog().len(),
            store.name(),
            if feedback.ai_enabled() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            store,
            engine,
            generator,
            verifier: Verifier::new(),
            feedback,
        })
    }
}
