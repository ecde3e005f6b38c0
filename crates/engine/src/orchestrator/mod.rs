// ── Work-Cycle Orchestrator ──────────────────────────────────────────────
// The periodic self-maintenance routine: health probe, active-goal
// check, one progress step on the highest-priority goal, activity log,
// heartbeat, structured artifact write. Registered with the cron scheduler
// under the `work_cycle` action key.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::artifacts::ArtifactStore;
use crate::chat::{ChatEngine, ChatOptions, NullSink};
use crate::config::RuntimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::llm::LlmGatewayClient;
use crate::pool::AgentPool;
use crate::repository::Repository;
use crate::scheduler::JobAction;
use crate::session::SessionManager;
use crate::types::{
    normalize_heartbeat_details, order_goals_by_priority, ActivityLogEntry, AgentType, HeartbeatRecord,
    HeartbeatStatus, ScheduledJob, SessionType,
};

/// The sub-agent type the work cycle delegates a security-sweep task to
/// once per cycle, gated the same way any other spawn-as-fallback is: a
/// `spawn_gate()` check against the primary breaker, then the pool's
/// per-type ceiling. Not configurable — a single hardcoded delegate type
/// keeps this the minimal demonstration of the cascade guard, rather than
/// a general-purpose delegation framework.
const DELEGATE_TYPE: AgentType = AgentType::SubDevsecops;

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub degraded: bool,
    pub goal_id: Option<String>,
    pub heartbeat_status: HeartbeatStatus,
    pub summary: String,
    /// `agent_id` of the sub-agent spawned this cycle to run the security
    /// sweep, or `None` if the cycle was degraded or the per-type ceiling
    /// was already reached.
    pub delegated_agent_id: Option<String>,
}

pub struct WorkCycleOrchestrator {
    repo: Arc<dyn Repository>,
    sessions: Arc<SessionManager>,
    chat: Arc<ChatEngine>,
    llm: Arc<LlmGatewayClient>,
    artifacts: Arc<ArtifactStore>,
    pool: Arc<AgentPool>,
    primary_model: String,
    context_window: u32,
    force_degraded: bool,
}

impl WorkCycleOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        sessions: Arc<SessionManager>,
        chat: Arc<ChatEngine>,
        llm: Arc<LlmGatewayClient>,
        artifacts: Arc<ArtifactStore>,
        pool: Arc<AgentPool>,
        config: &RuntimeConfig,
    ) -> Self {
        let primary_model = config.llm_fallback_chain.first().cloned().unwrap_or_else(|| "unknown".to_string());
        WorkCycleOrchestrator {
            repo,
            sessions,
            chat,
            llm,
            artifacts,
            pool,
            primary_model,
            context_window: config.context_window_for(SessionType::Cron),
            force_degraded: config.force_degraded_mode,
        }
    }

    /// Attempts to spawn this cycle's `sub-devsecops` helper, gated by the
    /// caller-supplied `degraded` flag (already reflects `spawn_gate` on the
    /// primary LLM breaker — spawning behind an already-open circuit is
    /// guaranteed to be futile) and by the pool's per-type ceiling.
    /// A ceiling hit is not an error — the cycle simply delegates nothing
    /// this round; any other pool failure propagates.
    fn maybe_delegate(&self, degraded: bool) -> EngineResult<Option<String>> {
        if degraded {
            return Ok(None);
        }
        let prefix = DELEGATE_TYPE.prefix();
        let next_n = self.repo.count_non_disabled_by_prefix(prefix)? + 1;
        let candidate_id = format!("{prefix}-{next_n}");
        match self.pool.spawn_agent(
            candidate_id,
            DELEGATE_TYPE,
            &self.primary_model,
            Some("You are a devsecops sub-agent delegated one security-sweep task per work cycle.".to_string()),
        ) {
            Ok(agent) => {
                self.pool.bind_task(&agent.agent_id)?;
                self.pool.release(&agent.agent_id, true)?;
                Ok(Some(agent.agent_id))
            }
            Err(EngineError::Ceiling(detail)) => {
                log::info!("work cycle: {prefix} delegation skipped, {detail}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Runs one work cycle for `agent_id`. Never returns `Err` for a
    /// degraded primary LLM — that is the expected steady-state failure
    /// mode this component exists to absorb; only store/artifact failures
    /// propagate.
    pub async fn run_cycle(&self, agent_id: &str) -> EngineResult<CycleOutcome> {
        let started = Utc::now();
        let degraded = self.force_degraded || self.llm.breaker(&self.primary_model).spawn_gate().is_err();

        let goals = order_goals_by_priority(self.repo.list_active_goals()?);
        let top_goal = goals.into_iter().next();
        let goal_id = top_goal.as_ref().map(|g| g.goal_id.clone());

        let summary = if degraded {
            "degraded: primary llm circuit breaker open, skipping goal progress".to_string()
        } else if let Some(goal) = &top_goal {
            let session = self.sessions.get_or_create_session(agent_id, SessionType::Cron)?;
            let system_prompt = format!(
                "You are the autonomous work-cycle agent. Make one concrete unit of progress on the active goal \"{}\": {}",
                goal.title, goal.description
            );
            let opts = ChatOptions::default();
            match self
                .chat
                .run_turn(&session, Some(&system_prompt), "Continue work on the current goal. Report what you did.", self.context_window, &opts, &NullSink)
                .await
            {
                Ok(outcome) => outcome.final_content,
                Err(e) => format!("work cycle chat turn failed: {e}"),
            }
        } else {
            "no active goals".to_string()
        };

        let delegated_agent_id = self.maybe_delegate(degraded)?;

        let finished = Utc::now();
        let heartbeat_status = if degraded { HeartbeatStatus::Degraded } else { HeartbeatStatus::Ok };
        let heartbeat = HeartbeatRecord {
            beat_number: 0,
            job_name: "work_cycle".to_string(),
            status: heartbeat_status,
            details: normalize_heartbeat_details(
                serde_json::json!({ "goal_id": goal_id, "summary": summary, "delegated_agent_id": delegated_agent_id }),
            ),
            executed_at: finished,
            duration_ms: (finished - started).num_milliseconds().max(0),
        };
        self.repo.insert_heartbeat(&heartbeat)?;

        self.repo.insert_activity(&ActivityLogEntry {
            action: "work_cycle".to_string(),
            skill: None,
            details: serde_json::json!({ "goal_id": goal_id, "degraded": degraded, "delegated_agent_id": delegated_agent_id }),
            success: !degraded,
            error_message: None,
            created_at: finished,
        })?;

        let artifact_path = format!("{}.json", finished.format("%Y%m%dT%H%M%S%.f"));
        let artifact_body = serde_json::to_vec(&serde_json::json!({
            "agent_id": agent_id,
            "goal_id": goal_id,
            "degraded": degraded,
            "summary": summary,
            "delegated_agent_id": delegated_agent_id,
            "executed_at": finished.to_rfc3339(),
        }))?;
        self.artifacts.write("work_cycles", &artifact_path, &artifact_body)?;

        Ok(CycleOutcome { degraded, goal_id, heartbeat_status, summary, delegated_agent_id })
    }
}

/// Registers under the `work_cycle` cron action key. `agent_id`
/// defaults to `"main"`; a job's `params` may override it to run the cycle
/// on behalf of a different agent.
#[async_trait]
impl JobAction for WorkCycleOrchestrator {
    async fn execute(&self, job: &ScheduledJob) -> EngineResult<serde_json::Value> {
        let agent_id = job.params.get("agent_id").and_then(|v| v.as_str()).unwrap_or("main");
        let outcome = self.run_cycle(agent_id).await?;
        Ok(serde_json::json!({
            "degraded": outcome.degraded,
            "goal_id": outcome.goal_id,
            "summary": outcome.summary,
            "delegated_agent_id": outcome.delegated_agent_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::DailyTokenTracker;
    use crate::repository::sqlite::SqliteRepository;
    use crate::tools::ToolRegistry;
    use crate::transport::Transport;
    use crate::types::{Goal, GoalStatus};

    fn orchestrator_with_config(
        config: crate::config::RuntimeConfig,
    ) -> (WorkCycleOrchestrator, Arc<dyn Repository>, Arc<AgentPool>, Arc<LlmGatewayClient>) {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let transport = Arc::new(Transport::new(&config).unwrap());
        let llm = Arc::new(LlmGatewayClient::new(transport, config.llm_gateway_url.clone(), config.llm_gateway_token.clone()));
        let tools = Arc::new(ToolRegistry::new());
        let tracker = Arc::new(DailyTokenTracker::new());
        let chat = Arc::new(ChatEngine::new(repo.clone(), llm.clone(), tools, tracker, &config));
        let sessions = Arc::new(SessionManager::new(repo.clone(), &config));
        let artifacts = Arc::new(ArtifactStore::new(tempfile::tempdir().unwrap().into_path()).unwrap());
        let pool = Arc::new(AgentPool::new(repo.clone(), &config));
        let orchestrator = WorkCycleOrchestrator::new(repo.clone(), sessions, chat, llm.clone(), artifacts, pool.clone(), &config);
        (orchestrator, repo, pool, llm)
    }

    fn orchestrator(force_degraded: bool) -> (WorkCycleOrchestrator, Arc<dyn Repository>) {
        let mut config = crate::config::test_defaults();
        config.force_degraded_mode = force_degraded;
        let (orchestrator, repo, _pool, _llm) = orchestrator_with_config(config);
        (orchestrator, repo)
    }

    fn make_goal(id: &str, priority: i64) -> Goal {
        let now = Utc::now();
        Goal {
            goal_id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            status: GoalStatus::Active,
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn cycle_with_no_goals_reports_no_active_goals() {
        let (orchestrator, _repo) = orchestrator(false);
        let outcome = orchestrator.run_cycle("main").await.unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.goal_id, None);
        assert_eq!(outcome.heartbeat_status, HeartbeatStatus::Ok);
        assert_eq!(outcome.summary, "no active goals");
    }

    #[tokio::test]
    async fn forced_degraded_mode_skips_chat_engine_but_still_reports_top_goal() {
        let (orchestrator, repo) = orchestrator(true);
        repo.upsert_goal(&make_goal("low", 1)).unwrap();
        repo.upsert_goal(&make_goal("high", 9)).unwrap();

        let outcome = orchestrator.run_cycle("main").await.unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.goal_id, Some("high".to_string()));
        assert_eq!(outcome.heartbeat_status, HeartbeatStatus::Degraded);
        assert!(outcome.summary.starts_with("degraded"));
        assert_eq!(outcome.delegated_agent_id, None);
    }

    #[tokio::test]
    async fn delegation_stops_once_the_per_type_ceiling_is_reached() {
        let mut config = crate::config::test_defaults();
        config.max_sub_agents_per_type = vec![("sub-devsecops".to_string(), 3)];
        let (orchestrator, _repo, _pool, _llm) = orchestrator_with_config(config);

        let mut delegated = Vec::new();
        for _ in 0..10 {
            let outcome = orchestrator.run_cycle("main").await.unwrap();
            delegated.push(outcome.delegated_agent_id);
        }

        let spawned: Vec<_> = delegated.into_iter().flatten().collect();
        assert_eq!(spawned.len(), 3, "ceiling of 3 must cap delegation across 10 cycles");
        assert_eq!(spawned.iter().collect::<std::collections::HashSet<_>>().len(), 3);
    }

    #[tokio::test]
    async fn forced_degraded_mode_never_delegates_even_with_ceiling_headroom() {
        let mut config = crate::config::test_defaults();
        config.force_degraded_mode = true;
        config.max_sub_agents_per_type = vec![("sub-devsecops".to_string(), 10)];
        let (orchestrator, _repo, _pool, _llm) = orchestrator_with_config(config);

        for _ in 0..5 {
            let outcome = orchestrator.run_cycle("main").await.unwrap();
            assert_eq!(outcome.delegated_agent_id, None);
        }
    }

    /// Scenario A end to end: a genuinely tripped primary-model breaker (not
    /// the synthetic `force_degraded` flag) must independently put the cycle
    /// into degraded mode, skip the chat engine, and skip delegation — with
    /// an active goal present, so there is real work the cycle would
    /// otherwise attempt.
    #[tokio::test]
    async fn real_breaker_trip_forces_degraded_mode_and_blocks_delegation() {
        let mut config = crate::config::test_defaults();
        config.max_sub_agents_per_type = vec![("sub-devsecops".to_string(), 3)];
        let (orchestrator, repo, pool, llm) = orchestrator_with_config(config.clone());
        repo.upsert_goal(&make_goal("ship-the-feature", 9)).unwrap();

        let breaker = llm.breaker(config.llm_fallback_chain.first().unwrap());
        for _ in 0..config.cb_threshold {
            breaker.record_failure();
        }
        assert!(breaker.check().is_err(), "breaker must be open before exercising the cycle");

        let outcome = orchestrator.run_cycle("main").await.unwrap();

        assert!(outcome.degraded, "an open primary breaker must force degraded mode");
        assert_eq!(outcome.goal_id, Some("ship-the-feature".to_string()), "the active goal is still reported");
        assert_eq!(outcome.heartbeat_status, HeartbeatStatus::Degraded);
        assert!(outcome.summary.starts_with("degraded"));
        assert_eq!(outcome.delegated_agent_id, None, "a spawn behind the same open breaker must not happen");
        assert_eq!(pool.list_live().len(), 0, "no sub-agent may exist after a degraded cycle");
    }
}
