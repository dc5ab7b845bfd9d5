//! Per-user sliding-window rate limiter (C3). Generalizes the teacher's
//! `middleware::rate_limit::RateLimitLayer` — that layer resets a fixed
//! window wholesale on expiry, which lets a burst straddling the boundary
//! admit up to double the nominal rate. A sliding window of request
//! timestamps closes that gap (SPEC_FULL.md §4.3, §9 Design Notes).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use tracing::warn;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Deny { retry_after_secs: u64 },
}

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    window: Duration,
    max_requests: usize,
    state: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, window_secs: u64, max_requests: usize) -> Self {
        Self {
            clock,
            window: Duration::seconds(window_secs as i64),
            max_requests,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Checks and, if allowed, records the current request's timestamp.
    /// Fails open (allows, with a warning) if an internal invariant is
    /// violated rather than denying a legitimate user — the ledger and
    /// Admission guardrails remain the authoritative cost control.
    pub fn check(&self, user_key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let cutoff = now - self.window;

        let mut state = self.state.lock();
        let entries = state.entry(user_key.to_string()).or_default();

        while let Some(&oldest) = entries.front() {
            if oldest <= cutoff.timestamp_millis() {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= self.max_requests {
            let oldest = *entries.front().unwrap_or(&now.timestamp_millis());
            let retry_after = (oldest + self.window.num_milliseconds() - now.timestamp_millis())
                .max(0) as u64
                / 1000
                + 1;
            return RateLimitDecision::Deny {
                retry_after_secs: retry_after,
            };
        }

        entries.push_back(now.timestamp_millis());
        RateLimitDecision::Allow
    }

    /// Drops per-user entries whose window has fully expired, bounding
    /// memory for users who stop sending requests.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        let cutoff = now - self.window;
        let mut state = self.state.lock();
        state.retain(|_, entries| {
            entries.retain(|&ts| ts > cutoff.timestamp_millis());
            !entries.is_empty()
        });
        if state.is_empty() {
            warn!("rate limiter state fully drained by cleanup");
        }
    }
}
