// ── Repository: Schema Bootstrap ────────────────────────────────────────
// DDL for the three logical schemas named in the external-interface contract:
// `domain` (activity log, heartbeats), `runtime` (sessions, messages, cron
// jobs, agents), `llm_gateway` (opaque, not modeled here — owned by the
// gateway service). SQLite has no native schema namespaces, so each logical
// schema is a table-name prefix; no table is left unprefixed.
//
// Migrations are idempotent: `CREATE TABLE IF NOT EXISTS` / `ALTER TABLE ...
// ADD COLUMN` guarded by a `PRAGMA table_info` check. Never edit a shipped
// statement in place — append a new one.

use rusqlite::Connection;

use crate::error::EngineResult;

pub fn bootstrap(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA foreign_keys=ON;

        CREATE TABLE IF NOT EXISTS runtime_agents (
            agent_id            TEXT PRIMARY KEY,
            agent_type          TEXT NOT NULL,
            model               TEXT NOT NULL,
            fallback_model      TEXT,
            system_prompt       TEXT,
            status              TEXT NOT NULL DEFAULT 'idle',
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            pheromone_score     REAL NOT NULL DEFAULT 0.5,
            timeout_seconds     INTEGER NOT NULL DEFAULT 120,
            last_active_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runtime_sessions (
            session_id   TEXT PRIMARY KEY,
            agent_id     TEXT NOT NULL,
            session_type TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'active',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            ended_at     TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            total_tokens  INTEGER NOT NULL DEFAULT 0,
            total_cost    REAL NOT NULL DEFAULT 0,
            metadata      TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_runtime_sessions_agent_type
            ON runtime_sessions(agent_id, session_type, status);

        CREATE TABLE IF NOT EXISTS runtime_messages (
            id           TEXT PRIMARY KEY,
            session_id   TEXT NOT NULL REFERENCES runtime_sessions(session_id),
            role         TEXT NOT NULL,
            content      TEXT NOT NULL,
            thinking     TEXT,
            tool_calls   TEXT NOT NULL DEFAULT '[]',
            tool_results TEXT NOT NULL DEFAULT '[]',
            model        TEXT,
            tokens_input  INTEGER NOT NULL DEFAULT 0,
            tokens_output INTEGER NOT NULL DEFAULT 0,
            cost          REAL NOT NULL DEFAULT 0,
            latency_ms    INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runtime_messages_session_created
            ON runtime_messages(session_id, created_at);

        CREATE TABLE IF NOT EXISTS runtime_cron_jobs (
            job_id              TEXT PRIMARY KEY,
            name                TEXT NOT NULL,
            schedule_expression TEXT NOT NULL,
            action              TEXT NOT NULL,
            enabled             INTEGER NOT NULL DEFAULT 1,
            next_run_at         TEXT,
            last_run_at         TEXT,
            last_status         TEXT,
            run_count           INTEGER NOT NULL DEFAULT 0,
            success_count       INTEGER NOT NULL DEFAULT 0,
            fail_count          INTEGER NOT NULL DEFAULT 0,
            max_duration_seconds INTEGER NOT NULL DEFAULT 300,
            session_target      TEXT NOT NULL DEFAULT 'shared',
            params              TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_runtime_cron_jobs_due
            ON runtime_cron_jobs(enabled, next_run_at);

        CREATE TABLE IF NOT EXISTS domain_heartbeats (
            beat_number  INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name     TEXT NOT NULL,
            status       TEXT NOT NULL,
            details      TEXT NOT NULL DEFAULT '{}',
            executed_at  TEXT NOT NULL,
            duration_ms  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS domain_goals (
            goal_id     TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL DEFAULT 'active',
            priority    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_domain_goals_status_priority
            ON domain_goals(status, priority DESC, created_at DESC);

        CREATE TABLE IF NOT EXISTS domain_activity_log (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            action        TEXT NOT NULL,
            skill         TEXT,
            details       TEXT NOT NULL DEFAULT '{}',
            success       INTEGER NOT NULL,
            error_message TEXT,
            created_at    TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
