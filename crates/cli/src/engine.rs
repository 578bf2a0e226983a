//! Composition root: one instance of every collaborator, wired once.

use anyhow::{Context, Result};
use conductor_core::cache::CacheManager;
use conductor_core::memory::SqliteLearningStore;
use conductor_core::risk::{CheckpointManager, RiskAssessor};
use conductor_core::skills::{load_catalog, HandlerRegistry, HeuristicCritic, PatternGuardrails};
use conductor_core::state::{get_runtime_path, ConductorDb};
use conductor_core::swarm::{Coordinator, EventSink, ExecutionPipeline, SwarmEvent};
use conductor_core::tools::{GitVcs, NoopVcs, TokioProcessRunner, VersionControl};
use conductor_core::EngineConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const HANDLER_CATALOG: &str = "handlers.json";

pub struct Engine {
    pub workdir: PathBuf,
    pub cache: Arc<CacheManager>,
    pub risk: Arc<RiskAssessor>,
    pub checkpoints: Arc<CheckpointManager>,
    pub pipeline: Arc<ExecutionPipeline>,
    pub coordinator: Coordinator,
    background: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn build(workdir: &Path) -> Result<Self> {
        let runtime_dir = get_runtime_path();
        std::fs::create_dir_all(&runtime_dir)
            .with_context(|| format!("Failed to create runtime dir: {:?}", runtime_dir))?;

        let config = EngineConfig::load();
        let background = CancellationToken::new();
        let mut tasks = Vec::new();

        let cache = Arc::new(CacheManager::from_config(&config.cache, &runtime_dir));
        tasks.push(Arc::clone(&cache).spawn_cleanup(
            Duration::from_secs(config.cache.cleanup_interval_secs.max(1)),
            background.clone(),
        ));

        let db = ConductorDb::open()?;
        let learning = Arc::new(SqliteLearningStore::new(&db));

        let vcs: Arc<dyn VersionControl> = if GitVcs::is_repository(workdir) {
            Arc::new(GitVcs)
        } else {
            tracing::debug!(workdir = %workdir.display(), "Not a git repository, stash snapshots disabled");
            Arc::new(NoopVcs)
        };
        let checkpoints = Arc::new(CheckpointManager::new(runtime_dir.join("checkpoints"), vcs));
        match checkpoints.load_history() {
            Ok(n) => tracing::debug!(checkpoints = n, "Checkpoint history loaded"),
            Err(e) => tracing::warn!(error = %e, "Failed to load checkpoint history"),
        }

        let risk = Arc::new(RiskAssessor::new().with_critical_globs(&config.risk.extra_critical_globs));
        let registry = load_handlers(&runtime_dir.join(HANDLER_CATALOG));

        let (tx, rx) = mpsc::channel(256);
        tasks.push(spawn_event_logger(rx));
        let events = EventSink::new(tx);

        let pipeline = Arc::new(
            ExecutionPipeline::new(Arc::new(registry), learning)
                .with_config(config.pipeline.clone())
                .with_cache(Arc::clone(&cache))
                .with_risk_assessor(Arc::clone(&risk))
                .with_checkpoints(Arc::clone(&checkpoints))
                .with_guardrails(Arc::new(PatternGuardrails::new()))
                .with_critic(Arc::new(HeuristicCritic::new(config.pipeline.critic_threshold)))
                .with_events(events.clone()),
        );
        let coordinator = Coordinator::new(config.coordinator.clone(), pipeline.clone())
            .with_events(events);

        Ok(Self {
            workdir: workdir.to_path_buf(),
            cache,
            risk,
            checkpoints,
            pipeline,
            coordinator,
            background,
            tasks,
        })
    }

    /// Stop background tasks; the cache persists on the way out
    pub async fn shutdown(self) {
        let Self {
            background,
            tasks,
            pipeline,
            coordinator,
            ..
        } = self;
        // The event logger ends once every sender is gone
        drop(coordinator);
        drop(pipeline);
        background.cancel();
        for task in tasks {
            let _ = task.await;
        }
    }
}

fn load_handlers(path: &Path) -> HandlerRegistry {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "No handler catalog, only cached results can be served");
        return HandlerRegistry::new();
    }
    match load_catalog(path, Arc::new(TokioProcessRunner)) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load handler catalog");
            HandlerRegistry::new()
        }
    }
}

fn spawn_event_logger(mut rx: mpsc::Receiver<SwarmEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(kind = ?event.kind, agent = %event.agent, data = ?event.data, "event");
        }
    })
}
