// ── Agent Pool ───────────────────────────────────────────────────────────
// Roster of live agents; the last-resort cascade guard. The scheduler and
// chat engine must still consult circuit breakers first, but this is the
// hard wall: no caller can ever push the population past its ceilings by
// racing this component.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::repository::Repository;
use crate::types::{Agent, AgentStatus, AgentType};

pub struct AgentPool {
    repo: Arc<dyn Repository>,
    live: Mutex<HashMap<String, Agent>>,
    max_concurrent_agents: usize,
    max_sub_agents_per_type: Vec<(String, u32)>,
    failure_threshold: u32,
}

impl AgentPool {
    pub fn new(repo: Arc<dyn Repository>, config: &RuntimeConfig) -> Self {
        AgentPool {
            repo,
            live: Mutex::new(HashMap::new()),
            max_concurrent_agents: config.max_concurrent_agents,
            max_sub_agents_per_type: config.max_sub_agents_per_type.clone(),
            failure_threshold: config.agent_failure_threshold,
        }
    }

    fn sub_agent_ceiling(&self, type_prefix: &str) -> Option<u32> {
        self.max_sub_agents_per_type.iter().find(|(p, _)| p == type_prefix).map(|(_, c)| *c)
    }

    fn type_prefix(agent_id: &str) -> &str {
        agent_id.rsplit_once('-').map(|(prefix, _)| prefix).unwrap_or(agent_id)
    }

    /// Ceiling A (concurrent in-memory) then Ceiling B (per-type
    /// persisted), in that order, so the cheaper in-memory check
    /// short-circuits before any store round trip.
    pub fn spawn_agent(
        &self,
        agent_id: impl Into<String>,
        agent_type: AgentType,
        model: impl Into<String>,
        system_prompt: Option<String>,
    ) -> EngineResult<Agent> {
        let agent_id = agent_id.into();

        {
            let live = self.live.lock();
            if live.len() >= self.max_concurrent_agents {
                return Err(EngineError::ceiling("pool full"));
            }
        }

        let type_prefix = Self::type_prefix(&agent_id);
        if let Some(ceiling) = self.sub_agent_ceiling(type_prefix) {
            // The count-then-insert window is protected by holding the pool
            // lock across both the store read and the in-memory insert
            // below; two concurrent spawns for the same prefix cannot both
            // observe `count == ceiling - 1`.
            let mut live = self.live.lock();
            let count = self.repo.count_non_disabled_by_prefix(type_prefix)?;
            if count >= ceiling {
                return Err(EngineError::ceiling("sub-agent ceiling reached"));
            }
            if live.len() >= self.max_concurrent_agents {
                return Err(EngineError::ceiling("pool full"));
            }
            let mut agent = Agent::new(agent_id.clone(), agent_type, model);
            agent.system_prompt = system_prompt;
            self.repo.upsert_agent(&agent)?;
            live.insert(agent_id, agent.clone());
            return Ok(agent);
        }

        let mut live = self.live.lock();
        if live.len() >= self.max_concurrent_agents {
            return Err(EngineError::ceiling("pool full"));
        }
        let mut agent = Agent::new(agent_id.clone(), agent_type, model);
        agent.system_prompt = system_prompt;
        self.repo.upsert_agent(&agent)?;
        live.insert(agent_id, agent.clone());
        Ok(agent)
    }

    pub fn terminate_agent(&self, agent_id: &str, reason: &str) -> EngineResult<()> {
        self.repo.set_agent_status(agent_id, AgentStatus::Disabled)?;
        self.live.lock().remove(agent_id);
        log::info!("agent {agent_id} terminated: {reason}");
        Ok(())
    }

    pub fn bind_task(&self, agent_id: &str) -> EngineResult<()> {
        let mut live = self.live.lock();
        let agent = live.get_mut(agent_id).ok_or_else(|| EngineError::contract(format!("unknown agent {agent_id}")))?;
        if agent.status == AgentStatus::Disabled {
            return Err(EngineError::contract(format!("agent {agent_id} is disabled")));
        }
        agent.status = AgentStatus::Busy;
        agent.last_active_at = Utc::now();
        self.repo.set_agent_status(agent_id, AgentStatus::Busy)?;
        Ok(())
    }

    pub fn release(&self, agent_id: &str, success: bool) -> EngineResult<()> {
        let failures = self.repo.record_agent_outcome(agent_id, success)?;
        let mut live = self.live.lock();
        if let Some(agent) = live.get_mut(agent_id) {
            agent.update_pheromone(success);
            agent.last_active_at = Utc::now();
            if success {
                agent.consecutive_failures = 0;
                agent.status = AgentStatus::Idle;
            } else {
                agent.consecutive_failures = failures;
                agent.status =
                    if failures >= self.failure_threshold { AgentStatus::Failed } else { AgentStatus::Idle };
            }
        }
        if !success && failures >= self.failure_threshold {
            self.repo.set_agent_status(agent_id, AgentStatus::Failed)?;
        }
        Ok(())
    }

    pub fn list_live(&self) -> Vec<Agent> {
        self.live.lock().values().cloned().collect()
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.live.lock().get(agent_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::SqliteRepository;

    fn pool_with_ceiling(max_concurrent: usize, sub_ceiling: u32) -> AgentPool {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let config = RuntimeConfig {
            max_concurrent_agents: max_concurrent,
            max_sub_agents_per_type: vec![("sub-devsecops".to_string(), sub_ceiling)],
            ..crate::config::test_defaults()
        };
        AgentPool::new(repo, &config)
    }

    #[test]
    fn spawn_at_cap_minus_one_succeeds_at_cap_fails() {
        let pool = pool_with_ceiling(2, 100);
        pool.spawn_agent("main", AgentType::Main, "m", None).unwrap();
        pool.spawn_agent("sub-social-1", AgentType::SubSocial, "m", None).unwrap();
        let result = pool.spawn_agent("sub-social-2", AgentType::SubSocial, "m", None);
        assert!(result.is_err());
    }

    #[test]
    fn per_type_ceiling_blocks_after_limit_reached() {
        let pool = pool_with_ceiling(100, 3);
        for n in 1..=3 {
            pool.spawn_agent(format!("sub-devsecops-{n}"), AgentType::SubDevsecops, "m", None).unwrap();
        }
        let result = pool.spawn_agent("sub-devsecops-4", AgentType::SubDevsecops, "m", None);
        assert!(result.is_err());
    }

    #[test]
    fn release_after_threshold_failures_marks_failed() {
        let pool = pool_with_ceiling(10, 10);
        pool.spawn_agent("sub-devsecops-1", AgentType::SubDevsecops, "m", None).unwrap();
        pool.bind_task("sub-devsecops-1").unwrap();
        pool.release("sub-devsecops-1", false).unwrap();
        pool.bind_task("sub-devsecops-1").unwrap();
        pool.release("sub-devsecops-1", false).unwrap();
        pool.bind_task("sub-devsecops-1").unwrap();
        pool.release("sub-devsecops-1", false).unwrap();
        let agent = pool.get("sub-devsecops-1").unwrap();
        assert_eq!(agent.status, AgentStatus::Failed);
    }

    #[test]
    fn terminate_is_terminal() {
        let pool = pool_with_ceiling(10, 10);
        pool.spawn_agent("sub-devsecops-1", AgentType::SubDevsecops, "m", None).unwrap();
        pool.terminate_agent("sub-devsecops-1", "manual").unwrap();
        assert!(pool.get("sub-devsecops-1").is_none());
    }
}
