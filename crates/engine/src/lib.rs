// ── Aria Engine ──────────────────────────────────────────────────────────
// Runtime control plane for a long-lived autonomous agent population:
// circuit-breaking transport, agent pool governance, session lifecycle,
// cron scheduling, and the tool-calling chat engine. This file is the
// composition root — every other module is wired together exactly once,
// here, in `EngineState::bootstrap`.

pub mod accounting;
pub mod artifacts;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pool;
pub mod repository;
pub mod scheduler;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

use std::sync::Arc;

use crate::accounting::DailyTokenTracker;
use crate::artifacts::ArtifactStore;
use crate::chat::ChatEngine;
use crate::config::RuntimeConfig;
use crate::error::EngineResult;
use crate::llm::LlmGatewayClient;
use crate::orchestrator::WorkCycleOrchestrator;
use crate::pool::AgentPool;
use crate::repository::{sqlite::SqliteRepository, Repository};
use crate::scheduler::{CronScheduler, JobAction};
use crate::session::SessionManager;
use crate::tools::ToolRegistry;
use crate::transport::Transport;

/// Every long-lived component, constructed once at process start and held
/// for the process lifetime. CLI commands and the scheduler's registered
/// actions all reach the store, transport, and chat engine through this.
pub struct EngineState {
    pub config: RuntimeConfig,
    pub repo: Arc<dyn Repository>,
    pub transport: Arc<Transport>,
    pub llm: Arc<LlmGatewayClient>,
    pub tools: Arc<ToolRegistry>,
    pub artifacts: Arc<ArtifactStore>,
    pub tracker: Arc<DailyTokenTracker>,
    pub pool: Arc<AgentPool>,
    pub sessions: Arc<SessionManager>,
    pub chat: Arc<ChatEngine>,
    pub orchestrator: Arc<WorkCycleOrchestrator>,
    pub scheduler: Arc<CronScheduler>,
}

impl EngineState {
    /// Builds every component from a single `RuntimeConfig`, opens the
    /// store (creating it on first run), registers the default tool
    /// catalog, and registers the work-cycle orchestrator under the
    /// `work_cycle` cron action key. Does not start the scheduler's tick
    /// loop — call `EngineState::run` for that once the caller is ready.
    pub fn bootstrap(config: RuntimeConfig) -> EngineResult<Arc<Self>> {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open(&config.store_path)?);
        let transport = Arc::new(Transport::new(&config)?);
        let llm = Arc::new(LlmGatewayClient::new(transport.clone(), config.llm_gateway_url.clone(), config.llm_gateway_token.clone()));
        let artifacts = Arc::new(ArtifactStore::new(config.artifact_root.clone())?);

        let mut tools = ToolRegistry::new();
        crate::tools::builtins::register_defaults(&mut tools, artifacts.clone());
        let tools = Arc::new(tools);

        let tracker = Arc::new(DailyTokenTracker::new());
        let pool = Arc::new(AgentPool::new(repo.clone(), &config));
        let sessions = Arc::new(SessionManager::new(repo.clone(), &config));
        let chat = Arc::new(ChatEngine::new(repo.clone(), llm.clone(), tools.clone(), tracker.clone(), &config));
        let orchestrator = Arc::new(WorkCycleOrchestrator::new(
            repo.clone(),
            sessions.clone(),
            chat.clone(),
            llm.clone(),
            artifacts.clone(),
            pool.clone(),
            &config,
        ));

        let mut scheduler = CronScheduler::new(repo.clone(), &config);
        scheduler.register_action("work_cycle", orchestrator.clone() as Arc<dyn JobAction>);
        let scheduler = Arc::new(scheduler);

        Ok(Arc::new(EngineState {
            config,
            repo,
            transport,
            llm,
            tools,
            artifacts,
            tracker,
            pool,
            sessions,
            chat,
            orchestrator,
            scheduler,
        }))
    }

    /// Runs the scheduler's tick loop until `shutdown` reports `true`.
    /// Returns once the scheduler has stopped dispatching new work; any
    /// in-flight job bodies finish on their own tasks.
    pub async fn run(self: Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) {
        if !self.config.scheduler_enabled {
            log::info!("scheduler disabled by configuration, idling");
            return;
        }
        self.scheduler.clone().run(shutdown).await;
    }
}
