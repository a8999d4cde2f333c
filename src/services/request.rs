// src/services/request.rs

//! Request engine: one logical upstream request with retries, adaptive
//! rate-limit backoff, jitter and cancellation.
//!
//! ```text
//! Idle → Sending ─┬─ success ─────────────────────────→ Ok(body)
//!                 ├─ transport error / 5xx → sleep base*n → Sending
//!                 ├─ rate limited → backoff×factor, sleep → Sending
//!                 ├─ 404 / other status / bad JSON / business error → Err
//!                 └─ attempts exhausted → Err
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, jittered, pause_duration};
use super::transport::{ApiRequest, Transport};
use crate::error::FetchError;
use crate::models::{BusinessConfig, Config, PauseRange};

/// Attempt budget of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Transport retry `n` sleeps `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

/// How a parsed body's business code reads.
#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    Success,
    RateLimited,
    Rejected { code: String, message: String },
}

/// Business status interpretation.
#[derive(Debug, Clone)]
struct StatusRules {
    code_field: String,
    message_field: String,
    success: HashSet<String>,
    rate_limit: HashSet<String>,
}

impl StatusRules {
    fn from_config(config: &BusinessConfig) -> Self {
        Self {
            code_field: config.code_field.clone(),
            message_field: config.message_field.clone(),
            success: config.success_codes.iter().cloned().collect(),
            rate_limit: config.rate_limit_codes.iter().cloned().collect(),
        }
    }

    /// Bodies without a code field (static resources, bare lists) pass.
    fn classify(&self, body: &Value) -> Verdict {
        let code = match body.get(&self.code_field) {
            None | Some(Value::Null) => return Verdict::Success,
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
        };

        if self.success.contains(&code) {
            Verdict::Success
        } else if self.rate_limit.contains(&code) {
            Verdict::RateLimited
        } else {
            let message = body
                .get(&self.message_field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Verdict::Rejected { code, message }
        }
    }
}

/// What one attempt concluded.
enum Attempt {
    Done(Result<Value, FetchError>),
    Transient(String),
    Throttled,
}

/// Counters for run summaries.
#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    transport_retries: AtomicU64,
    rate_limit_signals: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub requests: u64,
    pub transport_retries: u64,
    pub rate_limit_signals: u64,
    pub failures: u64,
}

/// Shared request engine. One instance per run; share it through `Arc`.
pub struct RequestEngine {
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    rules: StatusRules,
    jitter_ratio: f64,
    cancel: CancellationToken,
    counters: Counters,
}

impl RequestEngine {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            transport,
            backoff: Backoff::from_config(&config.backoff),
            rules: StatusRules::from_config(&config.business),
            jitter_ratio: config.backoff.jitter_ratio,
            cancel: CancellationToken::new(),
            counters: Counters::default(),
        }
    }

    /// Tie the engine to an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            transport_retries: self.counters.transport_retries.load(Ordering::Relaxed),
            rate_limit_signals: self.counters.rate_limit_signals.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Execute `request` until it succeeds or the policy gives up.
    ///
    /// Returns the parsed JSON body of the successful response.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        policy: RetryPolicy,
    ) -> Result<Value, FetchError> {
        let result = self.run(request, policy).await;
        if let Err(e) = &result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            log::debug!("{} failed: {} ({})", request.url, e, e.kind());
        }
        result
    }

    async fn run(&self, request: &ApiRequest, policy: RetryPolicy) -> Result<Value, FetchError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let delay = match self.attempt(request).await? {
                Attempt::Done(result) => return result,
                Attempt::Transient(message) => {
                    log::warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        request.url,
                        attempt,
                        max_attempts,
                        message
                    );
                    if attempt >= max_attempts {
                        return Err(FetchError::Transport {
                            attempts: attempt,
                            message,
                        });
                    }
                    self.counters
                        .transport_retries
                        .fetch_add(1, Ordering::Relaxed);
                    policy.base_delay * attempt
                }
                Attempt::Throttled => {
                    self.counters
                        .rate_limit_signals
                        .fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff.on_rate_limited();
                    log::warn!(
                        "Rate limited on {} (attempt {}/{}), backing off {:?}",
                        request.url,
                        attempt,
                        max_attempts,
                        delay
                    );
                    if attempt >= max_attempts {
                        return Err(FetchError::RateLimited { attempts: attempt });
                    }
                    delay
                }
            };

            self.sleep(jittered(delay, self.jitter_ratio)).await?;
        }
    }

    /// Send once and classify the outcome.
    async fn attempt(&self, request: &ApiRequest) -> Result<Attempt, FetchError> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            sent = self.transport.send(request) => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => return Ok(Attempt::Transient(e.message)),
        };

        match response.status {
            200..=299 => {}
            404 => return Ok(Attempt::Done(Err(FetchError::NotFound))),
            429 => return Ok(Attempt::Throttled),
            500..=599 => return Ok(Attempt::Transient(format!("HTTP {}", response.status))),
            status => return Ok(Attempt::Done(Err(FetchError::Status(status)))),
        }

        let body: Value = match serde_json::from_str(&response.body) {
            Ok(body) => body,
            Err(e) => {
                return Ok(Attempt::Done(Err(FetchError::MalformedResponse {
                    message: e.to_string(),
                })));
            }
        };

        Ok(match self.rules.classify(&body) {
            Verdict::Success => {
                self.backoff.on_success();
                Attempt::Done(Ok(body))
            }
            Verdict::RateLimited => Attempt::Throttled,
            Verdict::Rejected { code, message } => {
                Attempt::Done(Err(FetchError::Upstream { code, message }))
            }
        })
    }

    /// Polite randomized pause between pages or entities.
    pub async fn pause(&self, range: PauseRange) -> Result<(), FetchError> {
        self.sleep(pause_duration(range)).await
    }

    async fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
