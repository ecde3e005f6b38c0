// ── Repository ───────────────────────────────────────────────────────────
// Typed operations over the external store. Every other component
// talks to persistence exclusively through this trait — no raw SQL escapes
// the `repository` module boundary.

pub mod schema;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::types::{Agent, ActivityLogEntry, Goal, HeartbeatRecord, Message, ScheduledJob, Session, SessionType};

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub active_sessions: i64,
    pub by_agent: Vec<(String, i64)>,
    pub by_type: Vec<(String, i64)>,
}

/// Identity of the caller issuing a `delete_session` request, carried as an
/// explicit ambient context rather than looked up from a global — see the
/// composition-root note in the top-level design.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub current_session_id: Option<String>,
}

/// Typed store operations. Methods are synchronous — the backing SQLite
/// connection is local and fast enough that a brief lock hold inside an
/// async caller is preferable to the bookkeeping of marshalling every call
/// through `spawn_blocking`, matching how the rest of the ambient stack
/// treats the store.
pub trait Repository: Send + Sync {
    // Agents
    fn upsert_agent(&self, agent: &Agent) -> EngineResult<()>;
    fn get_agent(&self, agent_id: &str) -> EngineResult<Option<Agent>>;
    fn count_non_disabled_by_prefix(&self, type_prefix: &str) -> EngineResult<u32>;
    fn set_agent_status(&self, agent_id: &str, status: crate::types::AgentStatus) -> EngineResult<()>;
    fn record_agent_outcome(&self, agent_id: &str, success: bool) -> EngineResult<u32>;

    // Sessions
    fn create_session(&self, session: &Session) -> EngineResult<()>;
    fn get_session(&self, session_id: &str) -> EngineResult<Option<Session>>;
    fn find_active_session(&self, agent_id: &str, session_type: SessionType) -> EngineResult<Option<Session>>;
    fn touch_session(&self, session_id: &str, now: DateTime<Utc>) -> EngineResult<()>;
    fn close_session(&self, session_id: &str, reason: &str, now: DateTime<Utc>) -> EngineResult<()>;
    fn list_idle_sessions(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Session>>;
    fn list_stale_subagent_sessions(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Session>>;
    fn get_session_stats(&self) -> EngineResult<SessionStats>;
    fn delete_session(&self, session_id: &str, ctx: &RequestContext) -> EngineResult<()>;

    // Messages
    fn append_message(&self, message: &Message) -> EngineResult<()>;
    fn list_recent_messages(&self, session_id: &str, limit: u32) -> EngineResult<Vec<Message>>;
    fn prune_messages(&self, session_id: &str, keep_latest: u32) -> EngineResult<u64>;

    // Cron jobs
    fn create_job(&self, job: &ScheduledJob) -> EngineResult<()>;
    fn get_job(&self, job_id: &str) -> EngineResult<Option<ScheduledJob>>;
    fn get_due_jobs(&self, now: DateTime<Utc>) -> EngineResult<Vec<ScheduledJob>>;
    fn record_job_dispatch(
        &self,
        job_id: &str,
        status: crate::types::JobStatus,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<()>;

    // Heartbeats / activity log
    fn insert_heartbeat(&self, record: &HeartbeatRecord) -> EngineResult<i64>;
    fn insert_activity(&self, entry: &ActivityLogEntry) -> EngineResult<()>;

    // Goals
    fn upsert_goal(&self, goal: &Goal) -> EngineResult<()>;
    /// Active goals ordered by the single canonical sort — descending
    /// priority, `created_at` descending as tiebreaker.
    fn list_active_goals(&self) -> EngineResult<Vec<Goal>>;
    fn set_goal_status(&self, goal_id: &str, status: crate::types::GoalStatus) -> EngineResult<()>;
}
