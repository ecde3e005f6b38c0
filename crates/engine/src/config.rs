// ── Aria Engine: Configuration ──────────────────────────────────────────────
// Environment-first configuration: a single typed struct built once at
// startup and threaded through the composition root rather than read ad
// hoc from `std::env` at call sites.

use std::path::PathBuf;

use rand::Rng;

use crate::error::{EngineError, EngineResult};

/// Ceiling A — the in-memory concurrent agent cap.
pub const DEFAULT_MAX_CONCURRENT_AGENTS: usize = 20;

/// Ceiling B — per-type persisted sub-agent caps, keyed by `agent_id` prefix.
pub fn default_max_sub_agents_per_type() -> Vec<(String, u32)> {
    vec![
        ("sub-devsecops".to_string(), 10),
        ("sub-social".to_string(), 10),
        ("sub-orchestrator".to_string(), 5),
        ("sub-aria".to_string(), 5),
    ]
}

pub const DEFAULT_CB_THRESHOLD: u32 = 5;
pub const DEFAULT_CB_RESET_AFTER_SECS: u64 = 60;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 200;
pub const DEFAULT_RETRY_CAP_MS: u64 = 10_000;

pub const DEFAULT_SCHEDULER_TICK_SECS: u64 = 1;
pub const DEFAULT_SCHEDULER_WORKERS: usize = 4;

pub const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 30;
pub const DEFAULT_SUB_AGENT_STALE_HOURS: i64 = 1;

pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 10;
pub const DEFAULT_AGENT_FAILURE_THRESHOLD: u32 = 3;

/// Context-window caps for message-history assembly. Cron and
/// subagent sessions are long-lived and reused across many work cycles, so
/// they keep a shorter tail than interactive sessions, pruned to the most
/// recent N messages.
pub const DEFAULT_CHAT_SESSION_MAX_MESSAGES: u32 = 40;
pub const DEFAULT_CRON_SESSION_KEEP_MESSAGES: u32 = 20;

/// Runtime configuration assembled once at process start and passed
/// explicitly into every component that needs it — no global lookup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub store_path: PathBuf,
    pub llm_gateway_url: String,
    pub llm_gateway_token: String,
    pub llm_fallback_chain: Vec<String>,

    pub artifact_root: PathBuf,

    pub max_concurrent_agents: usize,
    pub max_sub_agents_per_type: Vec<(String, u32)>,
    pub agent_failure_threshold: u32,

    pub cb_threshold: u32,
    pub cb_reset_after_secs: u64,

    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,

    pub scheduler_tick_secs: u64,
    pub scheduler_workers: usize,
    pub scheduler_enabled: bool,

    pub idle_timeout_minutes: i64,
    pub sub_agent_stale_hours: i64,

    pub max_tool_iterations: u32,
    pub chat_session_max_messages: u32,
    pub cron_session_keep_messages: u32,

    /// Feature toggle: when false, the orchestrator never polls an
    /// external poll-style integration action (`telegram_poll`); the action
    /// still dispatches but is a documented no-op.
    pub telegram_polling_enabled: bool,
    /// Feature toggle: force all work cycles into degraded mode regardless
    /// of circuit breaker state, for maintenance windows.
    pub force_degraded_mode: bool,
}

impl RuntimeConfig {
    /// Build configuration from the process environment, falling back to
    /// documented defaults. Never panics: callers get a `Contract` error
    /// describing exactly which variable is missing or malformed.
    pub fn from_env() -> EngineResult<Self> {
        let store_path = std::env::var("ARIA_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir().join("aria.sqlite3"));

        let llm_gateway_url = std::env::var("ARIA_LLM_GATEWAY_URL")
            .map_err(|_| EngineError::contract("ARIA_LLM_GATEWAY_URL is required"))?;

        let llm_gateway_token = std::env::var("ARIA_LLM_GATEWAY_TOKEN")
            .map_err(|_| EngineError::contract("ARIA_LLM_GATEWAY_TOKEN is required"))?;

        let llm_fallback_chain = std::env::var("ARIA_LLM_FALLBACK_CHAIN")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|| vec!["local/llama-3.1-8b".to_string(), "openai/gpt-4o-mini".to_string()]);

        if llm_fallback_chain.is_empty() {
            return Err(EngineError::contract("ARIA_LLM_FALLBACK_CHAIN must name at least one model"));
        }

        let artifact_root = std::env::var("ARIA_ARTIFACT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir().join("artifacts"));

        let max_concurrent_agents = env_usize("ARIA_MAX_CONCURRENT_AGENTS", DEFAULT_MAX_CONCURRENT_AGENTS)?;
        let agent_failure_threshold = env_u32("ARIA_AGENT_FAILURE_THRESHOLD", DEFAULT_AGENT_FAILURE_THRESHOLD)?;

        let cb_threshold = env_u32("ARIA_CB_THRESHOLD", DEFAULT_CB_THRESHOLD)?;
        let cb_reset_after_secs = env_u64("ARIA_CB_RESET_AFTER_SECS", DEFAULT_CB_RESET_AFTER_SECS)?;

        let retry_attempts = env_u32("ARIA_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?;
        let retry_base_ms = env_u64("ARIA_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)?;
        let retry_cap_ms = env_u64("ARIA_RETRY_CAP_MS", DEFAULT_RETRY_CAP_MS)?;

        let scheduler_tick_secs = env_u64("ARIA_SCHEDULER_TICK_SECS", DEFAULT_SCHEDULER_TICK_SECS)?;
        let scheduler_workers = env_usize("ARIA_SCHEDULER_WORKERS", DEFAULT_SCHEDULER_WORKERS)?;
        let scheduler_enabled = env_bool("ARIA_SCHEDULER_ENABLED", true)?;

        let idle_timeout_minutes = env_i64("ARIA_IDLE_TIMEOUT_MINUTES", DEFAULT_IDLE_TIMEOUT_MINUTES)?;
        let sub_agent_stale_hours = env_i64("ARIA_SUB_AGENT_STALE_HOURS", DEFAULT_SUB_AGENT_STALE_HOURS)?;

        let max_tool_iterations = env_u32("ARIA_MAX_TOOL_ITERATIONS", DEFAULT_MAX_TOOL_ITERATIONS)?;
        let chat_session_max_messages = env_u32("ARIA_CHAT_SESSION_MAX_MESSAGES", DEFAULT_CHAT_SESSION_MAX_MESSAGES)?;
        let cron_session_keep_messages = env_u32("ARIA_CRON_SESSION_KEEP_MESSAGES", DEFAULT_CRON_SESSION_KEEP_MESSAGES)?;

        let telegram_polling_enabled = env_bool("ARIA_TELEGRAM_POLLING_ENABLED", false)?;
        let force_degraded_mode = env_bool("ARIA_FORCE_DEGRADED_MODE", false)?;

        Ok(RuntimeConfig {
            store_path,
            llm_gateway_url,
            llm_gateway_token,
            llm_fallback_chain,
            artifact_root,
            max_concurrent_agents,
            max_sub_agents_per_type: default_max_sub_agents_per_type(),
            agent_failure_threshold,
            cb_threshold,
            cb_reset_after_secs,
            retry_attempts,
            retry_base_ms,
            retry_cap_ms,
            scheduler_tick_secs,
            scheduler_workers,
            scheduler_enabled,
            idle_timeout_minutes,
            sub_agent_stale_hours,
            max_tool_iterations,
            chat_session_max_messages,
            cron_session_keep_messages,
            telegram_polling_enabled,
            force_degraded_mode,
        })
    }

    /// Session-type-aware context-window cap used when assembling the LLM
    /// request's message history.
    pub fn context_window_for(&self, session_type: crate::types::SessionType) -> u32 {
        use crate::types::SessionType;
        match session_type {
            SessionType::Cron | SessionType::Subagent => self.cron_session_keep_messages,
            SessionType::Interactive | SessionType::Run => self.chat_session_max_messages,
        }
    }

    pub fn sub_agent_ceiling(&self, type_prefix: &str) -> Option<u32> {
        self.max_sub_agents_per_type
            .iter()
            .find(|(prefix, _)| prefix == type_prefix)
            .map(|(_, ceiling)| *ceiling)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("aria")
}

/// Default location for the bootstrap-generated config file, overridable via
/// `ARIA_CONFIG_FILE`.
pub fn default_config_file_path() -> PathBuf {
    default_data_dir().join("aria.env")
}

fn env_usize(key: &str, default: usize) -> EngineResult<usize> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| EngineError::contract(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> EngineResult<u32> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| EngineError::contract(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> EngineResult<u64> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| EngineError::contract(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> EngineResult<i64> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| EngineError::contract(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> EngineResult<bool> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(EngineError::contract(format!("{key} must be a boolean"))),
        },
        Err(_) => Ok(default),
    }
}

/// Generates a configuration file with a random bearer-token placeholder if
/// one does not already exist at `path`. First-run bootstrap only: never
/// overwrites an existing file, never logs the generated secret.
pub fn bootstrap_config_file(path: &std::path::Path) -> EngineResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let token = generate_secret(32);
    let contents = format!(
        "# Generated by aria on first run. Replace ARIA_LLM_GATEWAY_TOKEN before production use.\n\
         ARIA_LLM_GATEWAY_URL=http://127.0.0.1:4000\n\
         ARIA_LLM_GATEWAY_TOKEN={token}\n\
         ARIA_STORE_PATH={}\n",
        default_data_dir().join("aria.sqlite3").display()
    );
    std::fs::write(path, contents)?;
    restrict_to_owner(path)?;
    Ok(true)
}

/// Restricts the generated config file to owner read/write (0600) on Unix,
/// since it carries a bearer-token placeholder. No-op on other platforms —
/// there is no equivalent single-call permission bit to set there.
#[cfg(unix)]
fn restrict_to_owner(path: &std::path::Path) -> EngineResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &std::path::Path) -> EngineResult<()> {
    Ok(())
}

fn generate_secret(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// Builds a fully-populated `RuntimeConfig` for tests across the crate, so
/// adding a field only means updating this one function rather than every
/// call site's literal.
#[cfg(test)]
pub fn test_defaults() -> RuntimeConfig {
    RuntimeConfig {
        store_path: PathBuf::from("/tmp/x.sqlite3"),
        llm_gateway_url: "http://x".to_string(),
        llm_gateway_token: "t".to_string(),
        llm_fallback_chain: vec!["a".to_string()],
        artifact_root: PathBuf::from("/tmp/artifacts"),
        max_concurrent_agents: DEFAULT_MAX_CONCURRENT_AGENTS,
        max_sub_agents_per_type: default_max_sub_agents_per_type(),
        agent_failure_threshold: DEFAULT_AGENT_FAILURE_THRESHOLD,
        cb_threshold: DEFAULT_CB_THRESHOLD,
        cb_reset_after_secs: DEFAULT_CB_RESET_AFTER_SECS,
        retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        retry_base_ms: DEFAULT_RETRY_BASE_MS,
        retry_cap_ms: DEFAULT_RETRY_CAP_MS,
        scheduler_tick_secs: DEFAULT_SCHEDULER_TICK_SECS,
        scheduler_workers: DEFAULT_SCHEDULER_WORKERS,
        scheduler_enabled: true,
        idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
        sub_agent_stale_hours: DEFAULT_SUB_AGENT_STALE_HOURS,
        max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        chat_session_max_messages: DEFAULT_CHAT_SESSION_MAX_MESSAGES,
        cron_session_keep_messages: DEFAULT_CRON_SESSION_KEEP_MESSAGES,
        telegram_polling_enabled: false,
        force_degraded_mode: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_agent_ceiling_lookup_matches_defaults() {
        let cfg = test_defaults();
        assert_eq!(cfg.sub_agent_ceiling("sub-devsecops"), Some(10));
        assert_eq!(cfg.sub_agent_ceiling("sub-orchestrator"), Some(5));
        assert_eq!(cfg.sub_agent_ceiling("main"), None);
    }

    #[test]
    fn bootstrap_config_file_does_not_overwrite_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aria.env");
        std::fs::write(&path, "KEEP=1\n").unwrap();
        let created = bootstrap_config_file(&path).unwrap();
        assert!(!created);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "KEEP=1\n");
    }

    #[test]
    fn bootstrap_config_file_writes_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aria.env");
        let created = bootstrap_config_file(&path).unwrap();
        assert!(created);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("ARIA_LLM_GATEWAY_TOKEN="));
    }

    #[cfg(unix)]
    #[test]
    fn bootstrap_config_file_is_owner_only_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aria.env");
        bootstrap_config_file(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
