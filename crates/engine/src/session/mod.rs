// ── Session Manager ──────────────────────────────────────────────────────
// Owns the session lifecycle across restarts; answers "which session do I
// use?" for work cycles and interactive traffic. All mutation goes through
// the repository — no derived session state is cached here longer than the
// lifetime of a single call, so `get_stats` is always store-truth (an
// in-memory `len(sessions) - stale_count` heuristic is exactly the kind of
// drift this component exists to prevent).

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::EngineResult;
use crate::repository::{Repository, RequestContext, SessionStats};
use crate::types::{Session, SessionMetadata, SessionStatus, SessionType};

pub struct SessionManager {
    repo: Arc<dyn Repository>,
    idle_timeout_minutes: i64,
    sub_agent_stale_hours: i64,
}

impl SessionManager {
    pub fn new(repo: Arc<dyn Repository>, config: &RuntimeConfig) -> Self {
        SessionManager {
            repo,
            idle_timeout_minutes: config.idle_timeout_minutes,
            sub_agent_stale_hours: config.sub_agent_stale_hours,
        }
    }

    /// Reuses an existing active session of the same `(agent_id,
    /// session_type)` if one exists; otherwise creates one. Idempotent
    /// under repeated calls within the session's active lifetime.
    pub fn get_or_create_session(&self, agent_id: &str, session_type: SessionType) -> EngineResult<Session> {
        if let Some(existing) = self.repo.find_active_session(agent_id, session_type)? {
            return Ok(existing);
        }
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            session_type,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            ended_at: None,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: SessionMetadata::default(),
        };
        self.repo.create_session(&session)?;
        Ok(session)
    }

    pub fn close_session(&self, session_id: &str, reason: &str) -> EngineResult<()> {
        self.repo.close_session(session_id, reason, Utc::now())
    }

    /// Closes sessions whose `updated_at` is older than `idle_minutes`.
    /// Returns the number closed.
    pub fn close_idle_sessions(&self, idle_minutes: i64) -> EngineResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::minutes(idle_minutes);
        let idle = self.repo.list_idle_sessions(cutoff)?;
        for session in &idle {
            self.repo.close_session(&session.session_id, "idle_timeout", Utc::now())?;
        }
        Ok(idle.len() as u64)
    }

    pub fn close_idle_sessions_default(&self) -> EngineResult<u64> {
        self.close_idle_sessions(self.idle_timeout_minutes)
    }

    /// Wall-clock prune: closes sessions whose `created_at` predates the
    /// cutoff and whose `agent_id` begins with `sub-`. Activity does not
    /// reset the clock — a sub-agent burning tokens in a retry loop is
    /// pruned anyway.
    pub fn close_stale_subagent_sessions(&self, stale_hours: i64) -> EngineResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::hours(stale_hours);
        let stale = self.repo.list_stale_subagent_sessions(cutoff)?;
        for session in &stale {
            self.repo.close_session(&session.session_id, "stale_subagent", Utc::now())?;
        }
        Ok(stale.len() as u64)
    }

    pub fn close_stale_subagent_sessions_default(&self) -> EngineResult<u64> {
        self.close_stale_subagent_sessions(self.sub_agent_stale_hours)
    }

    pub fn get_stats(&self) -> EngineResult<SessionStats> {
        self.repo.get_session_stats()
    }

    pub fn delete_session(&self, session_id: &str, ctx: &RequestContext) -> EngineResult<()> {
        self.repo.delete_session(session_id, ctx)
    }

    pub fn get_session(&self, session_id: &str) -> EngineResult<Option<Session>> {
        self.repo.get_session(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::SqliteRepository;

    fn manager() -> SessionManager {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let config = crate::config::test_defaults();
        SessionManager::new(repo, &config)
    }

    #[test]
    fn get_or_create_session_is_idempotent() {
        let mgr = manager();
        let first = mgr.get_or_create_session("main", SessionType::Interactive).unwrap();
        let second = mgr.get_or_create_session("main", SessionType::Interactive).unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn close_session_is_idempotent() {
        let mgr = manager();
        let session = mgr.get_or_create_session("main", SessionType::Interactive).unwrap();
        mgr.close_session(&session.session_id, "test").unwrap();
        mgr.close_session(&session.session_id, "test_again").unwrap();
        let fetched = mgr.get_session(&session.session_id).unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Ended);
    }

    #[test]
    fn closing_ended_session_leaves_a_fresh_get_or_create_to_make_a_new_one() {
        let mgr = manager();
        let first = mgr.get_or_create_session("main", SessionType::Cron).unwrap();
        mgr.close_session(&first.session_id, "done").unwrap();
        let second = mgr.get_or_create_session("main", SessionType::Cron).unwrap();
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn close_idle_sessions_never_closes_an_unmarked_main_session() {
        let mgr = manager();
        let session = mgr.get_or_create_session("main", SessionType::Interactive).unwrap();
        // Backdate without a `:cron:`/`:subagent:`/`:run:` marker in the id —
        // this is exactly the session `delete_session` refuses to delete.
        let closed = mgr.close_idle_sessions(-1).unwrap();
        assert_eq!(closed, 0);
        let fetched = mgr.get_session(&session.session_id).unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Active);
    }
}
