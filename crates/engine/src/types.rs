// ── Aria Engine: Pure Data Types ────────────────────────────────────────────
// Plain struct/enum definitions with no I/O and no side effects. Repository
// and component modules convert to/from SQLite rows; nothing here knows
// about storage.

use serde::{Deserialize, Serialize};

// ── Agent ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Main,
    SubDevsecops,
    SubSocial,
    SubOrchestrator,
    SubAria,
}

impl AgentType {
    /// Parse the `<type>` prefix split off an `agent_id` on its last `-`.
    /// Returns `None` for ids with no recognized sub-agent prefix (e.g. `main`).
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "main" => Some(AgentType::Main),
            "sub-devsecops" => Some(AgentType::SubDevsecops),
            "sub-social" => Some(AgentType::SubSocial),
            "sub-orchestrator" => Some(AgentType::SubOrchestrator),
            "sub-aria" => Some(AgentType::SubAria),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            AgentType::Main => "main",
            AgentType::SubDevsecops => "sub-devsecops",
            AgentType::SubSocial => "sub-social",
            AgentType::SubOrchestrator => "sub-orchestrator",
            AgentType::SubAria => "sub-aria",
        }
    }

    pub fn is_sub_agent(&self) -> bool {
        !matches!(self, AgentType::Main)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub model: String,
    pub fallback_model: Option<String>,
    pub system_prompt: Option<String>,
    pub status: AgentStatus,
    pub consecutive_failures: u32,
    /// Task-routing affinity in `[0, 1]`, default 0.5. Updated by an
    /// exponential moving average on task outcome — see DESIGN.md for why
    /// this rule was chosen.
    pub pheromone_score: f64,
    pub timeout_seconds: u64,
    pub last_active_at: chrono::DateTime<chrono::Utc>,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType, model: impl Into<String>) -> Self {
        Agent {
            agent_id: agent_id.into(),
            agent_type,
            model: model.into(),
            fallback_model: None,
            system_prompt: None,
            status: AgentStatus::Idle,
            consecutive_failures: 0,
            pheromone_score: 0.5,
            timeout_seconds: 120,
            last_active_at: chrono::Utc::now(),
        }
    }

    /// Exponential moving average update of the pheromone score.
    /// `alpha = 0.2`; outcome is 1.0 on success, 0.0 on failure. See
    /// DESIGN.md for why this rule was chosen over alternatives.
    pub fn update_pheromone(&mut self, success: bool) {
        const ALPHA: f64 = 0.2;
        let outcome = if success { 1.0 } else { 0.0 };
        self.pheromone_score = (self.pheromone_score + ALPHA * (outcome - self.pheromone_score))
            .clamp(0.0, 1.0);
    }
}

// ── Session ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Interactive,
    Cron,
    Subagent,
    Run,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Interactive => "interactive",
            SessionType::Cron => "cron",
            SessionType::Subagent => "subagent",
            SessionType::Run => "run",
        }
    }

    /// The session-key marker protected sessions must carry.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            SessionType::Cron => Some(":cron:"),
            SessionType::Subagent => Some(":subagent:"),
            SessionType::Run => Some(":run:"),
            SessionType::Interactive => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub end_reason: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        SessionMetadata { ended: false, end_reason: String::new(), extra: serde_json::Map::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub message_count: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub metadata: SessionMetadata,
}

// ── Message ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON arguments as emitted by the model (raw string, parsed lazily).
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    pub model: Option<String>,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost: f64,
    pub latency_ms: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ── Scheduled Job ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionTarget {
    Shared,
    Isolated,
    ReuseByKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub name: String,
    pub schedule_expression: String,
    pub action: String,
    pub enabled: bool,
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_status: Option<JobStatus>,
    pub run_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    pub max_duration_seconds: u64,
    pub session_target: SessionTarget,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Cron job action keys. Unknown keys fail dispatch with `unknown_action` —
/// see `scheduler::dispatch`.
pub const KNOWN_ACTIONS: &[&str] = &[
    "work_cycle",
    "hourly_goal_check",
    "six_hour_review",
    "morning_checkin",
    "social_post",
    "telegram_poll",
    "heartbeat",
];

// ── Heartbeat ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub beat_number: i64,
    pub job_name: String,
    pub status: HeartbeatStatus,
    /// Always an object on the wire — see `normalize_heartbeat_details`.
    pub details: serde_json::Value,
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: i64,
}

/// Normalize arbitrary heartbeat `details` input into an object, wrapping
/// non-object scalars/arrays as `{"raw": <value>}`.
pub fn normalize_heartbeat_details(details: serde_json::Value) -> serde_json::Value {
    match details {
        serde_json::Value::Object(_) => details,
        other => serde_json::json!({ "raw": other }),
    }
}

// ── Activity log ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub action: String,
    pub skill: Option<String>,
    pub details: serde_json::Value,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ── Tool catalog (chat engine) ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ── Goal (work-cycle orchestrator) ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Done,
    Abandoned,
}

/// A self-maintenance goal the orchestrator works toward one progress step
/// at a time. Both the goal-list view and the prompt-assembly view must
/// sort these the same way — descending `priority`, `created_at` descending
/// as tiebreaker — so `ordered` is the single place that ordering
/// is implemented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: String,
    pub title: String,
    pub description: String,
    pub status: GoalStatus,
    /// Higher number = higher priority.
    pub priority: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// The single sort used by both the goal-list view and the prompt-assembly
/// view. A discrepancy between the two is an incident — routing both
/// through this function makes that discrepancy structurally impossible.
pub fn order_goals_by_priority(mut goals: Vec<Goal>) -> Vec<Goal> {
    goals.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| b.created_at.cmp(&a.created_at)));
    goals
}

// ── LLM fallback chain ──────────────────────────────────────────────────

/// One entry in the configured model fallback chain. Ordering is
/// configured, not prescribed — operators choose which model to try first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub model: String,
    /// `true` for a locally-hosted model; informational only (the chain
    /// itself carries no routing logic based on this flag beyond what a
    /// caller chooses to do with it).
    pub is_local: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_prefix_round_trips() {
        for t in [
            AgentType::Main,
            AgentType::SubDevsecops,
            AgentType::SubSocial,
            AgentType::SubOrchestrator,
            AgentType::SubAria,
        ] {
            assert_eq!(AgentType::from_prefix(t.prefix()), Some(t));
        }
        assert_eq!(AgentType::from_prefix("sub-unknown"), None);
    }

    #[test]
    fn pheromone_moves_toward_outcome_and_stays_bounded() {
        let mut a = Agent::new("main", AgentType::Main, "gpt-4o");
        assert_eq!(a.pheromone_score, 0.5);
        for _ in 0..100 {
            a.update_pheromone(true);
        }
        assert!(a.pheromone_score > 0.99 && a.pheromone_score <= 1.0);
        for _ in 0..100 {
            a.update_pheromone(false);
        }
        assert!(a.pheromone_score < 0.01 && a.pheromone_score >= 0.0);
    }

    #[test]
    fn order_goals_by_priority_breaks_ties_by_created_at_desc() {
        let now = chrono::Utc::now();
        let make = |id: &str, priority: i64, age_secs: i64| Goal {
            goal_id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            status: GoalStatus::Active,
            priority,
            created_at: now - chrono::Duration::seconds(age_secs),
            updated_at: now,
        };
        let goals = vec![make("low", 1, 0), make("old-high", 5, 100), make("new-high", 5, 0)];
        let ordered = order_goals_by_priority(goals);
        assert_eq!(ordered.iter().map(|g| g.goal_id.as_str()).collect::<Vec<_>>(), vec!["new-high", "old-high", "low"]);
    }

    #[test]
    fn normalize_heartbeat_details_wraps_scalars_only() {
        assert_eq!(
            normalize_heartbeat_details(serde_json::json!("ok")),
            serde_json::json!({"raw": "ok"})
        );
        assert_eq!(
            normalize_heartbeat_details(serde_json::json!(["a", "b"])),
            serde_json::json!({"raw": ["a", "b"]})
        );
        let obj = serde_json::json!({"k": "v"});
        assert_eq!(normalize_heartbeat_details(obj.clone()), obj);
        assert_eq!(normalize_heartbeat_details(serde_json::Value::Null), serde_json::json!({"raw": null}));
    }
}
