// SPDX-License-Identifier: Apache-2.0
use std::{collections::HashSet, future::Future, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::kind::{classify, is_retryable, ErrorKind};

/// One failed attempt recorded by the retry engine.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub index: u32,
    pub message: String,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Surfaced once the retry budget is exhausted or the failure is
/// non-retryable. Carries the full list of prior failed attempts for
/// diagnostics (§4.2) — the human-facing message should come from
/// `kind.user_message()`, never from `message` (§7).
#[derive(Debug, Error)]
#[error("{}", kind.user_message())]
pub struct RetryError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: Vec<RetryAttempt>,
}

/// Retry engine configuration (§4.2). Defaults match the spec's documented
/// defaults: 3 attempts, 1s base delay, 15s max delay, 15s total timeout.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub total_timeout: Duration,
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            total_timeout: Duration::from_secs(15),
            retryable_kinds: default_retryable_kinds(),
        }
    }
}

fn default_retryable_kinds() -> HashSet<ErrorKind> {
    [
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::ConnectionReset,
        ErrorKind::DnsResolution,
        ErrorKind::Unknown,
    ]
    .into_iter()
    .collect()
}

/// The outcome of a successful retried operation: the value plus however
/// many failed attempts preceded it (0 if it succeeded on the first try).
pub struct Retried<T> {
    pub value: T,
    pub attempts: Vec<RetryAttempt>,
}

/// Drive `op` under `cfg` (§4.2).
///
/// `op` returns `Result<T, String>` — the raw error text, classified via
/// C1 at each failure. Attempt 0 runs immediately; on failure, a
/// non-retryable kind or an exhausted time/attempt budget stops the loop
/// and surfaces a [`RetryError`] carrying every failed attempt recorded
/// so far.
pub async fn retry<T, F, Fut>(cfg: &RetryConfig, mut op: F) -> Result<Retried<T>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let start = std::time::Instant::now();
    let mut attempts = Vec::new();

    for attempt_index in 0..cfg.max_attempts {
        match op().await {
            Ok(value) => return Ok(Retried { value, attempts }),
            Err(message) => {
                let kind = classify(&message);
                let elapsed = start.elapsed();
                attempts.push(RetryAttempt {
                    index: attempt_index,
                    message: message.clone(),
                    elapsed,
                    timestamp: Utc::now(),
                });

                if !is_retryable_for(&cfg.retryable_kinds, kind) {
                    return Err(RetryError {
                        kind,
                        message,
                        attempts,
                    });
                }

                let is_last_attempt = attempt_index + 1 >= cfg.max_attempts;
                if is_last_attempt {
                    return Err(RetryError {
                        kind,
                        message,
                        attempts,
                    });
                }

                let next_delay = cfg
                    .base_delay
                    .saturating_mul(1u32 << attempt_index.min(20))
                    .min(cfg.max_delay);
                if elapsed + next_delay > cfg.total_timeout {
                    return Err(RetryError {
                        kind,
                        message,
                        attempts,
                    });
                }

                tokio::time::sleep(next_delay).await;
            }
        }
    }

    unreachable!("loop always returns within max_attempts iterations")
}

/// `retryable_kinds` is the caller-chosen allowed set; a kind must also be
/// retryable in the absolute sense (§3's retryable subset) to be retried.
/// In practice callers pass `default_retryable_kinds()` or a subset of it,
/// so this is a defense against a misconfigured caller passing a
/// non-retryable kind into `retryable_kinds`.
fn is_retryable_for(allowed: &HashSet<ErrorKind>, kind: ErrorKind) -> bool {
    allowed.contains(&kind) && is_retryable(kind)
}
