// ── Cron Scheduler ───────────────────────────────────────────────────────
// Single-threaded tick loop at 1-second granularity: reads due jobs,
// dispatches each to a bounded worker pool (max concurrency M), advances
// `next_run_at`, and emits a heartbeat. Dispatch is non-blocking — the
// scheduler keeps ticking while workers run job bodies to completion.

pub mod expression;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::repository::Repository;
use crate::types::{normalize_heartbeat_details, HeartbeatRecord, HeartbeatStatus, JobStatus, ScheduledJob, SessionTarget};

/// A registered handler for one cron action key. Implementations live in
/// the orchestrator/chat-engine wiring at the composition root — the
/// scheduler itself knows nothing about work cycles or chat sessions.
#[async_trait]
pub trait JobAction: Send + Sync {
    async fn execute(&self, job: &ScheduledJob) -> EngineResult<serde_json::Value>;
}

pub struct CronScheduler {
    repo: Arc<dyn Repository>,
    actions: HashMap<String, Arc<dyn JobAction>>,
    workers: Arc<Semaphore>,
    tick: StdDuration,
}

/// Parameters accepted when creating a job. `action` may arrive under the
/// alias `type` — untrusted LLM tool-call payloads frequently invent
/// aliases for canonical fields.
#[derive(Debug, Clone, Default)]
pub struct NewJobRequest {
    pub name: String,
    pub schedule_expression: String,
    pub action: Option<String>,
    pub type_alias: Option<String>,
    pub max_duration_seconds: Option<u64>,
    pub session_target: Option<SessionTarget>,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl CronScheduler {
    pub fn new(repo: Arc<dyn Repository>, config: &RuntimeConfig) -> Self {
        CronScheduler {
            repo,
            actions: HashMap::new(),
            workers: Arc::new(Semaphore::new(config.scheduler_workers)),
            tick: StdDuration::from_secs(config.scheduler_tick_secs),
        }
    }

    pub fn register_action(&mut self, key: impl Into<String>, handler: Arc<dyn JobAction>) {
        self.actions.insert(key.into(), handler);
    }

    /// Normalizes `action`/`type` aliasing, rejects a job with neither, and
    /// preserves unknown extra keys in `params` (logging a warning rather
    /// than failing the request).
    pub fn create_job(&self, req: NewJobRequest) -> EngineResult<ScheduledJob> {
        let action = req
            .action
            .or(req.type_alias)
            .ok_or_else(|| EngineError::contract("action (or type) is required"))?;

        if !crate::types::KNOWN_ACTIONS.contains(&action.as_str()) {
            log::warn!("job {} registered with unrecognized action key {action}", req.name);
        }

        let now = Utc::now();
        let next_run_at = expression::compute_next_run(&req.schedule_expression, now);
        let job = ScheduledJob {
            job_id: Uuid::new_v4().to_string(),
            name: req.name,
            schedule_expression: req.schedule_expression,
            action,
            enabled: true,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            last_status: None,
            run_count: 0,
            success_count: 0,
            fail_count: 0,
            max_duration_seconds: req.max_duration_seconds.unwrap_or(300),
            session_target: req.session_target.unwrap_or(SessionTarget::Shared),
            params: req.params,
        };
        self.repo.create_job(&job)?;
        Ok(job)
    }

    /// Runs the tick loop until `shutdown` resolves. Each tick reads due
    /// jobs in `next_run_at` order, dispatches what the worker pool has
    /// capacity for, and defers the rest to the next tick.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once().await {
                        log::error!("scheduler tick failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick_once(&self) -> EngineResult<()> {
        let now = Utc::now();
        let due = self.repo.get_due_jobs(now)?;

        for job in due {
            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                self.defer(&job, now)?;
                continue;
            };

            let Some(handler) = self.actions.get(&job.action).cloned() else {
                self.repo.record_job_dispatch(
                    &job.job_id,
                    JobStatus::Error,
                    expression::compute_next_run(&job.schedule_expression, now),
                    now,
                )?;
                log::warn!("job {} dispatch failed: unknown_action {}", job.job_id, job.action);
                drop(permit);
                continue;
            };

            let repo = self.repo.clone();
            let job_for_task = job.clone();
            let max_duration = StdDuration::from_secs(job.max_duration_seconds.max(1));

            tokio::spawn(async move {
                let _permit = permit;
                let started = Utc::now();
                let outcome = tokio::time::timeout(max_duration, handler.execute(&job_for_task)).await;

                let (status, details) = match outcome {
                    Ok(Ok(value)) => (JobStatus::Ok, value),
                    Ok(Err(e)) => (JobStatus::Error, serde_json::json!({"error": e.to_string()})),
                    Err(_) => (JobStatus::Error, serde_json::json!({"error": "deadline_exceeded"})),
                };

                let finished = Utc::now();
                let next_run_at = expression::compute_next_run(&job_for_task.schedule_expression, finished);
                if let Err(e) = repo.record_job_dispatch(&job_for_task.job_id, status, next_run_at, finished) {
                    log::error!("failed to record dispatch for job {}: {e}", job_for_task.job_id);
                }

                let heartbeat = HeartbeatRecord {
                    beat_number: 0,
                    job_name: job_for_task.name.clone(),
                    status: match status {
                        JobStatus::Ok => HeartbeatStatus::Ok,
                        JobStatus::Error => HeartbeatStatus::Error,
                        JobStatus::Skipped => HeartbeatStatus::Degraded,
                    },
                    details: normalize_heartbeat_details(details),
                    executed_at: finished,
                    duration_ms: (finished - started).num_milliseconds().max(0),
                };
                if let Err(e) = repo.insert_heartbeat(&heartbeat) {
                    log::error!("failed to record heartbeat for job {}: {e}", job_for_task.job_id);
                }
            });
        }

        Ok(())
    }

    /// A job that is due but finds the worker pool saturated is deferred to
    /// the next tick without advancing `next_run_at`. If it has missed its
    /// due time by more than one full interval, it is logged `skipped` and
    /// rescheduled from now.
    fn defer(&self, job: &ScheduledJob, now: chrono::DateTime<Utc>) -> EngineResult<()> {
        let Some(due_at) = job.next_run_at else { return Ok(()) };
        let interval = expression::interval_duration(&job.schedule_expression);
        if now - due_at > interval {
            log::warn!("job {} skipped: missed due time by more than one interval", job.job_id);
            let next_run_at = expression::compute_next_run(&job.schedule_expression, now);
            self.repo.record_job_dispatch(&job.job_id, JobStatus::Skipped, next_run_at, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::SqliteRepository;

    fn scheduler() -> CronScheduler {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let config = crate::config::test_defaults();
        CronScheduler::new(repo, &config)
    }

    #[test]
    fn create_job_accepts_type_alias_for_action() {
        let scheduler = scheduler();
        let req = NewJobRequest {
            name: "check".to_string(),
            schedule_expression: "every 30m".to_string(),
            action: None,
            type_alias: Some("heartbeat".to_string()),
            ..Default::default()
        };
        let job = scheduler.create_job(req).unwrap();
        assert_eq!(job.action, "heartbeat");
    }

    #[test]
    fn create_job_without_action_or_type_fails() {
        let scheduler = scheduler();
        let req = NewJobRequest {
            name: "check".to_string(),
            schedule_expression: "every 30m".to_string(),
            ..Default::default()
        };
        let result = scheduler.create_job(req);
        assert!(result.is_err());
    }
}
