// ── Repository: SQLite Implementation ───────────────────────────────────
// One connection behind a lock: a single local SQLite file, no connection
// pool. The concurrency model sizes the *logical* worker pool separately;
// the sole writer against this file is always this process.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{EngineError, EngineResult};
use crate::types::{
    Agent, AgentStatus, AgentType, ActivityLogEntry, Goal, GoalStatus, HeartbeatRecord, HeartbeatStatus, JobStatus,
    Message, Role, ScheduledJob, Session, SessionMetadata, SessionStatus, SessionTarget, SessionType, ToolCall,
    ToolResult,
};

use super::{schema, Repository, RequestContext, SessionStats};

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::bootstrap(&conn)?;
        Ok(SqliteRepository { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::bootstrap(&conn)?;
        Ok(SqliteRepository { conn: Mutex::new(conn) })
    }
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::contract(format!("invalid timestamp {raw}: {e}")))
}

fn agent_status_str(s: AgentStatus) -> &'static str {
    match s {
        AgentStatus::Idle => "idle",
        AgentStatus::Busy => "busy",
        AgentStatus::Failed => "failed",
        AgentStatus::Disabled => "disabled",
    }
}

fn agent_status_from_str(s: &str) -> AgentStatus {
    match s {
        "busy" => AgentStatus::Busy,
        "failed" => AgentStatus::Failed,
        "disabled" => AgentStatus::Disabled,
        _ => AgentStatus::Idle,
    }
}

fn agent_type_str(t: AgentType) -> &'static str {
    t.prefix()
}

fn agent_type_from_str(s: &str) -> AgentType {
    AgentType::from_prefix(s).unwrap_or(AgentType::Main)
}

fn row_to_agent(row: &Row) -> rusqlite::Result<(String, String, String, Option<String>, Option<String>, String, u32, f64, u64, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

impl Repository for SqliteRepository {
    fn upsert_agent(&self, agent: &Agent) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runtime_agents
                (agent_id, agent_type, model, fallback_model, system_prompt, status, consecutive_failures, pheromone_score, timeout_seconds, last_active_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(agent_id) DO UPDATE SET
                agent_type=excluded.agent_type, model=excluded.model, fallback_model=excluded.fallback_model,
                system_prompt=excluded.system_prompt, status=excluded.status,
                consecutive_failures=excluded.consecutive_failures, pheromone_score=excluded.pheromone_score,
                timeout_seconds=excluded.timeout_seconds, last_active_at=excluded.last_active_at",
            params![
                agent.agent_id,
                agent_type_str(agent.agent_type),
                agent.model,
                agent.fallback_model,
                agent.system_prompt,
                agent_status_str(agent.status),
                agent.consecutive_failures,
                agent.pheromone_score,
                agent.timeout_seconds as i64,
                to_rfc3339(agent.last_active_at),
            ],
        )?;
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> EngineResult<Option<Agent>> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT agent_id, agent_type, model, fallback_model, system_prompt, status, consecutive_failures, pheromone_score, timeout_seconds, last_active_at
                 FROM runtime_agents WHERE agent_id = ?1",
                params![agent_id],
                row_to_agent,
            )
            .optional()?;
        match result {
            None => Ok(None),
            Some((agent_id, agent_type, model, fallback_model, system_prompt, status, consecutive_failures, pheromone_score, timeout_seconds, last_active_at)) => {
                Ok(Some(Agent {
                    agent_id,
                    agent_type: agent_type_from_str(&agent_type),
                    model,
                    fallback_model,
                    system_prompt,
                    status: agent_status_from_str(&status),
                    consecutive_failures,
                    pheromone_score,
                    timeout_seconds,
                    last_active_at: parse_dt(&last_active_at)?,
                }))
            }
        }
    }

    fn count_non_disabled_by_prefix(&self, type_prefix: &str) -> EngineResult<u32> {
        let conn = self.conn.lock();
        let pattern = format!("{type_prefix}-%");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runtime_agents WHERE agent_id LIKE ?1 AND status != 'disabled'",
            params![pattern],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runtime_agents SET status = ?1 WHERE agent_id = ?2",
            params![agent_status_str(status), agent_id],
        )?;
        Ok(())
    }

    fn record_agent_outcome(&self, agent_id: &str, success: bool) -> EngineResult<u32> {
        let conn = self.conn.lock();
        if success {
            conn.execute(
                "UPDATE runtime_agents SET consecutive_failures = 0, status = 'idle' WHERE agent_id = ?1",
                params![agent_id],
            )?;
            Ok(0)
        } else {
            conn.execute(
                "UPDATE runtime_agents SET consecutive_failures = consecutive_failures + 1 WHERE agent_id = ?1",
                params![agent_id],
            )?;
            let failures: i64 = conn.query_row(
                "SELECT consecutive_failures FROM runtime_agents WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )?;
            Ok(failures as u32)
        }
    }

    fn create_session(&self, session: &Session) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runtime_sessions
                (session_id, agent_id, session_type, status, created_at, updated_at, ended_at, message_count, total_tokens, total_cost, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session.session_id,
                session.agent_id,
                session.session_type.as_str(),
                session_status_str(session.status),
                to_rfc3339(session.created_at),
                to_rfc3339(session.updated_at),
                session.ended_at.map(to_rfc3339),
                session.message_count,
                session.total_tokens,
                session.total_cost,
                serde_json::to_string(&session.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> EngineResult<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT session_id, agent_id, session_type, status, created_at, updated_at, ended_at, message_count, total_tokens, total_cost, metadata
             FROM runtime_sessions WHERE session_id = ?1",
            params![session_id],
            row_to_session,
        )
        .optional()?
        .transpose()
    }

    fn find_active_session(&self, agent_id: &str, session_type: SessionType) -> EngineResult<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT session_id, agent_id, session_type, status, created_at, updated_at, ended_at, message_count, total_tokens, total_cost, metadata
             FROM runtime_sessions WHERE agent_id = ?1 AND session_type = ?2 AND status = 'active'
             ORDER BY updated_at DESC LIMIT 1",
            params![agent_id, session_type.as_str()],
            row_to_session,
        )
        .optional()?
        .transpose()
    }

    fn touch_session(&self, session_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runtime_sessions SET updated_at = ?1 WHERE session_id = ?2",
            params![to_rfc3339(now), session_id],
        )?;
        Ok(())
    }

    fn close_session(&self, session_id: &str, reason: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let conn = self.conn.lock();
        let existing_metadata: Option<String> = conn
            .query_row("SELECT metadata FROM runtime_sessions WHERE session_id = ?1", params![session_id], |r| r.get(0))
            .optional()?;
        let Some(raw) = existing_metadata else { return Ok(()) };
        let mut metadata: SessionMetadata = serde_json::from_str(&raw).unwrap_or_default();
        metadata.ended = true;
        metadata.end_reason = reason.to_string();
        conn.execute(
            "UPDATE runtime_sessions SET status = 'ended', ended_at = ?1, metadata = ?2 WHERE session_id = ?3",
            params![to_rfc3339(now), serde_json::to_string(&metadata)?, session_id],
        )?;
        Ok(())
    }

    /// Same protection rule `delete_session` applies: a `main`-agent
    /// session whose `session_id` carries none of the `:cron:`/
    /// `:subagent:`/`:run:` markers is excluded from the candidate set —
    /// idle prune must not be able to close what explicit deletion refuses
    /// to touch.
    fn list_idle_sessions(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, agent_id, session_type, status, created_at, updated_at, ended_at, message_count, total_tokens, total_cost, metadata
             FROM runtime_sessions
             WHERE status = 'active' AND updated_at < ?1
               AND (agent_id != 'main'
                    OR session_id LIKE '%:cron:%'
                    OR session_id LIKE '%:subagent:%'
                    OR session_id LIKE '%:run:%')",
        )?;
        let rows = stmt.query_map(params![to_rfc3339(cutoff)], row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().collect()
    }

    fn list_stale_subagent_sessions(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, agent_id, session_type, status, created_at, updated_at, ended_at, message_count, total_tokens, total_cost, metadata
             FROM runtime_sessions WHERE status = 'active' AND created_at < ?1 AND agent_id LIKE 'sub-%'",
        )?;
        let rows = stmt.query_map(params![to_rfc3339(cutoff)], row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().collect()
    }

    fn get_session_stats(&self) -> EngineResult<SessionStats> {
        let conn = self.conn.lock();
        let total_sessions: i64 = conn.query_row("SELECT COUNT(*) FROM runtime_sessions", [], |r| r.get(0))?;
        let active_sessions: i64 =
            conn.query_row("SELECT COUNT(*) FROM runtime_sessions WHERE status = 'active'", [], |r| r.get(0))?;

        let mut by_agent = Vec::new();
        let mut stmt = conn.prepare("SELECT agent_id, COUNT(*) FROM runtime_sessions GROUP BY agent_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            by_agent.push(row?);
        }

        let mut by_type = Vec::new();
        let mut stmt = conn.prepare("SELECT session_type, COUNT(*) FROM runtime_sessions GROUP BY session_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            by_type.push(row?);
        }

        Ok(SessionStats { total_sessions, active_sessions, by_agent, by_type })
    }

    fn delete_session(&self, session_id: &str, ctx: &RequestContext) -> EngineResult<()> {
        if ctx.current_session_id.as_deref() == Some(session_id) {
            return Err(EngineError::contract("cannot delete the caller's own current session"));
        }
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row("SELECT agent_id, session_id FROM runtime_sessions WHERE session_id = ?1", params![session_id], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .optional()?;
        let Some((agent_id, key)) = row else { return Ok(()) };
        if agent_id == "main" && ![":cron:", ":subagent:", ":run:"].iter().any(|marker| key.contains(marker)) {
            return Err(EngineError::contract("refusing to delete a protected main-agent session"));
        }
        conn.execute("DELETE FROM runtime_messages WHERE session_id = ?1", params![session_id])?;
        conn.execute("DELETE FROM runtime_sessions WHERE session_id = ?1", params![session_id])?;
        Ok(())
    }

    fn append_message(&self, message: &Message) -> EngineResult<()> {
        let conn = self.conn.lock();
        let ended: Option<String> =
            conn.query_row("SELECT status FROM runtime_sessions WHERE session_id = ?1", params![message.session_id], |r| r.get(0)).optional()?;
        if ended.as_deref() == Some("ended") {
            return Err(EngineError::contract("session is ended; no further messages may be appended"));
        }
        conn.execute(
            "INSERT INTO runtime_messages
                (id, session_id, role, content, thinking, tool_calls, tool_results, model, tokens_input, tokens_output, cost, latency_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content,
                message.thinking,
                serde_json::to_string(&message.tool_calls)?,
                serde_json::to_string(&message.tool_results)?,
                message.model,
                message.tokens_input,
                message.tokens_output,
                message.cost,
                message.latency_ms,
                to_rfc3339(message.created_at),
            ],
        )?;
        conn.execute(
            "UPDATE runtime_sessions SET message_count = message_count + 1,
                total_tokens = total_tokens + ?1, total_cost = total_cost + ?2, updated_at = ?3
             WHERE session_id = ?4",
            params![
                message.tokens_input + message.tokens_output,
                message.cost,
                to_rfc3339(message.created_at),
                message.session_id
            ],
        )?;
        Ok(())
    }

    fn list_recent_messages(&self, session_id: &str, limit: u32) -> EngineResult<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, thinking, tool_calls, tool_results, model, tokens_input, tokens_output, cost, latency_ms, created_at
             FROM runtime_messages WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit], row_to_message)?;
        let mut out = rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().collect::<EngineResult<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }

    fn prune_messages(&self, session_id: &str, keep_latest: u32) -> EngineResult<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM runtime_messages WHERE session_id = ?1 AND id NOT IN (
                SELECT id FROM runtime_messages WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2
             )",
            params![session_id, keep_latest],
        )?;
        Ok(deleted as u64)
    }

    fn create_job(&self, job: &ScheduledJob) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runtime_cron_jobs
                (job_id, name, schedule_expression, action, enabled, next_run_at, last_run_at, last_status, run_count, success_count, fail_count, max_duration_seconds, session_target, params)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.job_id,
                job.name,
                job.schedule_expression,
                job.action,
                job.enabled,
                job.next_run_at.map(to_rfc3339),
                job.last_run_at.map(to_rfc3339),
                job.last_status.map(job_status_str),
                job.run_count,
                job.success_count,
                job.fail_count,
                job.max_duration_seconds as i64,
                session_target_str(job.session_target),
                serde_json::to_string(&job.params)?,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> EngineResult<Option<ScheduledJob>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT job_id, name, schedule_expression, action, enabled, next_run_at, last_run_at, last_status, run_count, success_count, fail_count, max_duration_seconds, session_target, params
             FROM runtime_cron_jobs WHERE job_id = ?1",
            params![job_id],
            row_to_job,
        )
        .optional()?
        .transpose()
    }

    fn get_due_jobs(&self, now: DateTime<Utc>) -> EngineResult<Vec<ScheduledJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, name, schedule_expression, action, enabled, next_run_at, last_run_at, last_status, run_count, success_count, fail_count, max_duration_seconds, session_target, params
             FROM runtime_cron_jobs WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC",
        )?;
        let rows = stmt.query_map(params![to_rfc3339(now)], row_to_job)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().collect()
    }

    fn record_job_dispatch(
        &self,
        job_id: &str,
        status: JobStatus,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        let success_delta = if status == JobStatus::Ok { 1 } else { 0 };
        let fail_delta = if status == JobStatus::Error { 1 } else { 0 };
        conn.execute(
            "UPDATE runtime_cron_jobs SET
                last_run_at = ?1, last_status = ?2, next_run_at = ?3,
                run_count = run_count + 1, success_count = success_count + ?4, fail_count = fail_count + ?5
             WHERE job_id = ?6",
            params![to_rfc3339(now), job_status_str(status), to_rfc3339(next_run_at), success_delta, fail_delta, job_id],
        )?;
        Ok(())
    }

    fn insert_heartbeat(&self, record: &HeartbeatRecord) -> EngineResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO domain_heartbeats (job_name, status, details, executed_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.job_name,
                heartbeat_status_str(record.status),
                serde_json::to_string(&record.details)?,
                to_rfc3339(record.executed_at),
                record.duration_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_activity(&self, entry: &ActivityLogEntry) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO domain_activity_log (action, skill, details, success, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.action,
                entry.skill,
                serde_json::to_string(&entry.details)?,
                entry.success,
                entry.error_message,
                to_rfc3339(entry.created_at),
            ],
        )?;
        Ok(())
    }

    fn upsert_goal(&self, goal: &Goal) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO domain_goals (goal_id, title, description, status, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(goal_id) DO UPDATE SET
                title=excluded.title, description=excluded.description, status=excluded.status,
                priority=excluded.priority, updated_at=excluded.updated_at",
            params![
                goal.goal_id,
                goal.title,
                goal.description,
                goal_status_str(goal.status),
                goal.priority,
                to_rfc3339(goal.created_at),
                to_rfc3339(goal.updated_at),
            ],
        )?;
        Ok(())
    }

    fn list_active_goals(&self) -> EngineResult<Vec<Goal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT goal_id, title, description, status, priority, created_at, updated_at
             FROM domain_goals WHERE status = 'active'
             ORDER BY priority DESC, created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_goal)?;
        let goals = rows.collect::<rusqlite::Result<Vec<_>>>()?.into_iter().collect::<EngineResult<Vec<_>>>()?;
        // The store-level ORDER BY already matches crate::types::order_goals_by_priority;
        // re-applying it here would be redundant, but both must stay in lockstep.
        Ok(goals)
    }

    fn set_goal_status(&self, goal_id: &str, status: GoalStatus) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE domain_goals SET status = ?1, updated_at = ?2 WHERE goal_id = ?3",
            params![goal_status_str(status), to_rfc3339(Utc::now()), goal_id],
        )?;
        Ok(())
    }
}

fn session_status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Active => "active",
        SessionStatus::Ended => "ended",
    }
}

fn session_type_from_str(s: &str) -> SessionType {
    match s {
        "cron" => SessionType::Cron,
        "subagent" => SessionType::Subagent,
        "run" => SessionType::Run,
        _ => SessionType::Interactive,
    }
}

fn job_status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Ok => "ok",
        JobStatus::Error => "error",
        JobStatus::Skipped => "skipped",
    }
}

fn job_status_from_str(s: &str) -> JobStatus {
    match s {
        "error" => JobStatus::Error,
        "skipped" => JobStatus::Skipped,
        _ => JobStatus::Ok,
    }
}

fn session_target_str(t: SessionTarget) -> &'static str {
    match t {
        SessionTarget::Shared => "shared",
        SessionTarget::Isolated => "isolated",
        SessionTarget::ReuseByKey => "reuse_by_key",
    }
}

fn session_target_from_str(s: &str) -> SessionTarget {
    match s {
        "isolated" => SessionTarget::Isolated,
        "reuse_by_key" => SessionTarget::ReuseByKey,
        _ => SessionTarget::Shared,
    }
}

fn heartbeat_status_str(s: HeartbeatStatus) -> &'static str {
    match s {
        HeartbeatStatus::Ok => "ok",
        HeartbeatStatus::Degraded => "degraded",
        HeartbeatStatus::Error => "error",
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        "system" => Role::System,
        _ => Role::User,
    }
}

fn goal_status_str(s: GoalStatus) -> &'static str {
    match s {
        GoalStatus::Active => "active",
        GoalStatus::Done => "done",
        GoalStatus::Abandoned => "abandoned",
    }
}

fn goal_status_from_str(s: &str) -> GoalStatus {
    match s {
        "done" => GoalStatus::Done,
        "abandoned" => GoalStatus::Abandoned,
        _ => GoalStatus::Active,
    }
}

fn row_to_goal(row: &Row) -> rusqlite::Result<EngineResult<Goal>> {
    let goal_id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let description: String = row.get(2)?;
    let status: String = row.get(3)?;
    let priority: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok((|| {
        Ok(Goal {
            goal_id,
            title,
            description,
            status: goal_status_from_str(&status),
            priority,
            created_at: parse_dt(&created_at)?,
            updated_at: parse_dt(&updated_at)?,
        })
    })())
}

fn row_to_session(row: &Row) -> rusqlite::Result<EngineResult<Session>> {
    let session_id: String = row.get(0)?;
    let agent_id: String = row.get(1)?;
    let session_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    let ended_at: Option<String> = row.get(6)?;
    let message_count: i64 = row.get(7)?;
    let total_tokens: i64 = row.get(8)?;
    let total_cost: f64 = row.get(9)?;
    let metadata_raw: String = row.get(10)?;

    Ok((|| {
        Ok(Session {
            session_id,
            agent_id,
            session_type: session_type_from_str(&session_type),
            status: if status == "ended" { SessionStatus::Ended } else { SessionStatus::Active },
            created_at: parse_dt(&created_at)?,
            updated_at: parse_dt(&updated_at)?,
            ended_at: ended_at.map(|s| parse_dt(&s)).transpose()?,
            message_count,
            total_tokens,
            total_cost,
            metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
        })
    })())
}

fn row_to_message(row: &Row) -> rusqlite::Result<EngineResult<Message>> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let thinking: Option<String> = row.get(4)?;
    let tool_calls_raw: String = row.get(5)?;
    let tool_results_raw: String = row.get(6)?;
    let model: Option<String> = row.get(7)?;
    let tokens_input: i64 = row.get(8)?;
    let tokens_output: i64 = row.get(9)?;
    let cost: f64 = row.get(10)?;
    let latency_ms: i64 = row.get(11)?;
    let created_at: String = row.get(12)?;

    Ok((|| {
        let tool_calls: Vec<ToolCall> = serde_json::from_str(&tool_calls_raw)?;
        let tool_results: Vec<ToolResult> = serde_json::from_str(&tool_results_raw)?;
        Ok(Message {
            id,
            session_id,
            role: role_from_str(&role),
            content,
            thinking,
            tool_calls,
            tool_results,
            model,
            tokens_input,
            tokens_output,
            cost,
            latency_ms,
            created_at: parse_dt(&created_at)?,
        })
    })())
}

fn row_to_job(row: &Row) -> rusqlite::Result<EngineResult<ScheduledJob>> {
    let job_id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let schedule_expression: String = row.get(2)?;
    let action: String = row.get(3)?;
    let enabled: bool = row.get(4)?;
    let next_run_at: Option<String> = row.get(5)?;
    let last_run_at: Option<String> = row.get(6)?;
    let last_status: Option<String> = row.get(7)?;
    let run_count: i64 = row.get(8)?;
    let success_count: i64 = row.get(9)?;
    let fail_count: i64 = row.get(10)?;
    let max_duration_seconds: i64 = row.get(11)?;
    let session_target: String = row.get(12)?;
    let params_raw: String = row.get(13)?;

    Ok((|| {
        Ok(ScheduledJob {
            job_id,
            name,
            schedule_expression,
            action,
            enabled,
            next_run_at: next_run_at.map(|s| parse_dt(&s)).transpose()?,
            last_run_at: last_run_at.map(|s| parse_dt(&s)).transpose()?,
            last_status: last_status.map(|s| job_status_from_str(&s)),
            run_count,
            success_count,
            fail_count,
            max_duration_seconds: max_duration_seconds as u64,
            session_target: session_target_from_str(&session_target),
            params: serde_json::from_str(&params_raw)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentType;

    fn repo() -> SqliteRepository {
        SqliteRepository::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_and_get_agent_round_trips() {
        let repo = repo();
        let agent = Agent::new("sub-devsecops-1", AgentType::SubDevsecops, "gpt-4o");
        repo.upsert_agent(&agent).unwrap();
        let fetched = repo.get_agent("sub-devsecops-1").unwrap().unwrap();
        assert_eq!(fetched.agent_id, "sub-devsecops-1");
        assert_eq!(fetched.model, "gpt-4o");
        assert_eq!(fetched.status, AgentStatus::Idle);
    }

    #[test]
    fn count_non_disabled_by_prefix_excludes_disabled() {
        let repo = repo();
        let mut a1 = Agent::new("sub-devsecops-1", AgentType::SubDevsecops, "m");
        let a2 = Agent::new("sub-devsecops-2", AgentType::SubDevsecops, "m");
        a1.status = AgentStatus::Disabled;
        repo.upsert_agent(&a1).unwrap();
        repo.upsert_agent(&a2).unwrap();
        assert_eq!(repo.count_non_disabled_by_prefix("sub-devsecops").unwrap(), 1);
    }

    #[test]
    fn ended_session_rejects_new_messages() {
        let repo = repo();
        let now = Utc::now();
        let session = Session {
            session_id: "s1".to_string(),
            agent_id: "main".to_string(),
            session_type: SessionType::Interactive,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            ended_at: None,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: SessionMetadata::default(),
        };
        repo.create_session(&session).unwrap();
        repo.close_session("s1", "test", now).unwrap();

        let message = Message {
            id: "m1".to_string(),
            session_id: "s1".to_string(),
            role: Role::User,
            content: "hi".to_string(),
            thinking: None,
            tool_calls: vec![],
            tool_results: vec![],
            model: None,
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            latency_ms: 0,
            created_at: now,
        };
        let result = repo.append_message(&message);
        assert!(result.is_err());
    }

    #[test]
    fn prune_messages_keeps_only_the_most_recent() {
        let repo = repo();
        let now = Utc::now();
        let session = Session {
            session_id: "s1".to_string(),
            agent_id: "main".to_string(),
            session_type: SessionType::Cron,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            ended_at: None,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: SessionMetadata::default(),
        };
        repo.create_session(&session).unwrap();

        for n in 0..5 {
            let message = Message {
                id: format!("m{n}"),
                session_id: "s1".to_string(),
                role: Role::User,
                content: format!("message {n}"),
                thinking: None,
                tool_calls: vec![],
                tool_results: vec![],
                model: None,
                tokens_input: 0,
                tokens_output: 0,
                cost: 0.0,
                latency_ms: 0,
                created_at: now + chrono::Duration::milliseconds(n),
            };
            repo.append_message(&message).unwrap();
        }

        let deleted = repo.prune_messages("s1", 2).unwrap();
        assert_eq!(deleted, 3);

        let remaining = repo.list_recent_messages("s1", 10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].content, "message 3");
        assert_eq!(remaining[1].content, "message 4");
    }

    #[test]
    fn list_active_goals_sorts_by_priority_then_recency() {
        let repo = repo();
        let now = Utc::now();
        let make = |id: &str, priority: i64, age_secs: i64| Goal {
            goal_id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            status: GoalStatus::Active,
            priority,
            created_at: now - chrono::Duration::seconds(age_secs),
            updated_at: now,
        };
        repo.upsert_goal(&make("low", 1, 0)).unwrap();
        repo.upsert_goal(&make("old-high", 5, 100)).unwrap();
        repo.upsert_goal(&make("new-high", 5, 0)).unwrap();
        let goals = repo.list_active_goals().unwrap();
        assert_eq!(goals.iter().map(|g| g.goal_id.as_str()).collect::<Vec<_>>(), vec!["new-high", "old-high", "low"]);
    }

    #[test]
    fn delete_session_refuses_callers_own_session() {
        let repo = repo();
        let ctx = RequestContext { current_session_id: Some("s1".to_string()) };
        let result = repo.delete_session("s1", &ctx);
        assert!(result.is_err());
    }

    fn idle_candidate(session_id: &str, agent_id: &str, updated_at: DateTime<Utc>) -> Session {
        Session {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            session_type: SessionType::Interactive,
            status: SessionStatus::Active,
            created_at: updated_at,
            updated_at,
            ended_at: None,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: SessionMetadata::default(),
        }
    }

    #[test]
    fn list_idle_sessions_excludes_unmarked_main_agent_session() {
        let repo = repo();
        let old = Utc::now() - chrono::Duration::minutes(60);
        repo.create_session(&idle_candidate("main-plain", "main", old)).unwrap();
        repo.create_session(&idle_candidate("main-cron:cron:1", "main", old)).unwrap();
        repo.create_session(&idle_candidate("sub-devsecops-1-sess", "sub-devsecops-1", old)).unwrap();

        let idle = repo.list_idle_sessions(Utc::now() - chrono::Duration::minutes(30)).unwrap();
        let ids: Vec<&str> = idle.iter().map(|s| s.session_id.as_str()).collect();

        assert!(!ids.contains(&"main-plain"), "unmarked main-agent session must not be an idle-prune candidate");
        assert!(ids.contains(&"main-cron:cron:1"), "marked main-agent session is a legitimate candidate");
        assert!(ids.contains(&"sub-devsecops-1-sess"), "sub-agent sessions are always candidates");
    }
}
