// ── Transport ────────────────────────────────────────────────────────────
// Every outbound HTTP call (store REST facade, LLM gateway) passes through
// here. Transport owns one `reqwest::Client` and a map of per-endpoint
// circuit breakers; endpoint helper methods built on top of it must not
// bypass the retry wrapper.

pub mod circuit_breaker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use reqwest::{Method, StatusCode};

use crate::config::RuntimeConfig;
use crate::error::{EngineError, EngineResult};
use circuit_breaker::CircuitBreaker;

pub use circuit_breaker::CircuitState;

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: bytes::Bytes,
}

/// Retry/backoff parameters, cloned from `RuntimeConfig` at construction so
/// `Transport` is usable without holding a reference to the config.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl RetryPolicy {
    /// Full-jitter exponential backoff: `random(0, min(cap, base * 2^attempt))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.cap_ms);
        let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
        Duration::from_millis(jittered)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Honor a numeric `Retry-After` (seconds); `None` if absent or expressed
/// as an HTTP date, in which case the caller falls back to computed backoff.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub struct Transport {
    client: reqwest::Client,
    retry: RetryPolicy,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    cb_threshold: u32,
    cb_reset_after_secs: u64,
}

impl Transport {
    pub fn new(config: &RuntimeConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(EngineError::Network)?;
        Ok(Transport {
            client,
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                base_ms: config.retry_base_ms,
                cap_ms: config.retry_cap_ms,
            },
            breakers: RwLock::new(HashMap::new()),
            cb_threshold: config.cb_threshold,
            cb_reset_after_secs: config.cb_reset_after_secs,
        })
    }

    /// Fetches (creating on first use) the circuit breaker for `endpoint_name`.
    pub fn breaker(&self, endpoint_name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(endpoint_name) {
            return existing.clone();
        }
        let mut write = self.breakers.write();
        write
            .entry(endpoint_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint_name, self.cb_threshold, self.cb_reset_after_secs)))
            .clone()
    }

    /// Retry-wrapped, circuit-breaker-gated HTTP call. Retries on transport
    /// errors and 5xx up to `retry.attempts` times with full-jitter
    /// exponential backoff; never retries 4xx. Auth failures (401/403) are
    /// fatal and are not counted toward circuit-breaker accounting.
    pub async fn request(
        &self,
        endpoint_name: &str,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        timeout: Duration,
        headers: Option<reqwest::header::HeaderMap>,
    ) -> EngineResult<TransportResponse> {
        let cb = self.breaker(endpoint_name);
        cb.check()?;

        let mut last_err: Option<EngineError> = None;
        for attempt in 0..self.retry.attempts {
            let mut req = self.client.request(method.clone(), url).timeout(timeout);
            if let Some(h) = headers.clone() {
                req = req.headers(h);
            }
            if let Some(b) = &body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(EngineError::Auth(format!("{endpoint_name} returned {status}")));
                    }

                    if status.is_success() {
                        cb.record_success();
                        let body = resp.bytes().await.map_err(EngineError::Network)?;
                        return Ok(TransportResponse { status: status.as_u16(), body });
                    }

                    if is_retryable_status(status) && attempt + 1 < self.retry.attempts {
                        let wait = parse_retry_after(resp.headers()).unwrap_or_else(|| self.retry.delay_for_attempt(attempt));
                        last_err = Some(EngineError::Transient {
                            endpoint: endpoint_name.to_string(),
                            message: format!("http {status}"),
                        });
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    // Non-retryable 4xx, or retries exhausted on a 5xx.
                    let body = resp.bytes().await.unwrap_or_default();
                    cb.record_failure();
                    return Err(EngineError::Transient {
                        endpoint: endpoint_name.to_string(),
                        message: format!("http {status}: {}", String::from_utf8_lossy(&body)),
                    });
                }
                Err(e) => {
                    last_err = Some(EngineError::Transient { endpoint: endpoint_name.to_string(), message: e.to_string() });
                    if attempt + 1 < self.retry.attempts {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        continue;
                    }
                }
            }
        }

        cb.record_failure();
        Err(last_err.unwrap_or_else(|| EngineError::Transient {
            endpoint: endpoint_name.to_string(),
            message: "retries exhausted".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_never_exceeds_cap() {
        let policy = RetryPolicy { attempts: 5, base_ms: 200, cap_ms: 10_000 };
        for attempt in 0..10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay.as_millis() <= 10_000);
        }
    }

    #[test]
    fn retryable_status_is_5xx_only() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::OK));
    }
}
