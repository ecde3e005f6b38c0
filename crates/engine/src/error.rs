// ── Aria Engine: Error Types ────────────────────────────────────────────────
// Single canonical error enum for the control plane, built with `thiserror`.
//
// Design rules:
//   • Variants map 1:1 onto the error taxonomy the runtime propagates across
//     layers (Transient / CbOpen / Contract / Ceiling / Cancelled / Fatal),
//     plus a handful of domain variants used for `#[from]` conversions at
//     the I/O boundary.
//   • No variant carries secret material (API keys, bearer tokens) in its
//     message.
//   • `EngineError` → `String` is provided via `Display` so CLI command
//     boundaries can map to process exit codes without boilerplate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer). Treated as transient and
    /// retried by Transport before being surfaced.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A transient failure absorbed/retried by Transport. Surfaced only
    /// once retries are exhausted.
    #[error("Transient failure calling {endpoint}: {message}")]
    Transient { endpoint: String, message: String },

    /// The circuit breaker for `endpoint` is open; the call was never
    /// attempted. Not retried locally — callers choose a degraded path.
    #[error("Circuit breaker open for {endpoint}: {detail}")]
    CbOpen { endpoint: String, detail: String },

    /// Malformed input: invalid JSON, missing required argument, unknown
    /// action key. Not retried; surfaced verbatim to the caller.
    #[error("Contract violation: {0}")]
    Contract(String),

    /// A governed ceiling was hit (pool full, per-type sub-agent cap
    /// reached). Not retried; caller backs off or accepts degradation.
    #[error("Ceiling reached: {0}")]
    Ceiling(String),

    /// Operation was cancelled — deadline exceeded or explicit abort.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Unrecoverable invariant breach. Terminates the worker that raised
    /// it; the scheduler/pool/session manager keep running.
    #[error("Fatal: {0}")]
    Fatal(String),

    /// LLM-gateway-level failure (distinct from transport-level `Network`
    /// errors — this is a well-formed error response from the gateway).
    #[error("LLM gateway error: {0}")]
    Llm(String),

    /// Tool execution failure.
    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Engine or agent configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication / authorization failure. Fatal, not retried, and
    /// never counted toward circuit-breaker failure accounting.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into(), message: message.into() }
    }

    pub fn cb_open(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CbOpen { endpoint: endpoint.into(), detail: detail.into() }
    }

    pub fn ceiling(message: impl Into<String>) -> Self {
        Self::Ceiling(message.into())
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// The stable reason string carried on the chat engine's `error` event.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::CbOpen { .. } => "cb_open",
            EngineError::Ceiling(_) => "cap_exceeded",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Llm(_) => "llm_unavailable",
            EngineError::Tool { .. } => "tool_error",
            _ => "internal",
        }
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
