//! Sliding-window limiter for provider requests and tokens.
//!
//! One limiter is shared by every call to the same provider so that indexing
//! and query-time requests draw from the same budget.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
const SAFETY_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// A single request can never fit in the token budget.
    #[error("request cost {cost} exceeds the per-minute token limit {limit}")]
    CostExceedsLimit { cost: u64, limit: u64 },
}

/// Usage within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub requests_in_window: usize,
    pub tokens_in_window: u64,
    pub rpm_limit: u32,
    pub tpm_limit: Option<u64>,
}

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    token_sum: u64,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while self
            .requests
            .front()
            .is_some_and(|&t| now.duration_since(t) >= WINDOW)
        {
            self.requests.pop_front();
        }
        while let Some(&(t, cost)) = self.tokens.front()
            && now.duration_since(t) >= WINDOW
        {
            self.token_sum -= cost;
            self.tokens.pop_front();
        }
    }

    fn expires_in(now: Instant, at: Instant) -> Duration {
        WINDOW.saturating_sub(now.duration_since(at))
    }

    /// Time until a request of `cost` fits, or `None` if it fits now.
    fn required_wait(
        &self,
        now: Instant,
        rpm: u32,
        tpm: Option<u64>,
        cost: u64,
    ) -> Option<Duration> {
        let mut wait = Duration::ZERO;

        if self.requests.len() >= rpm as usize {
            let excess = self.requests.len() + 1 - rpm as usize;
            if let Some(&t) = self.requests.get(excess - 1) {
                wait = wait.max(Self::expires_in(now, t));
            }
        }

        if let Some(limit) = tpm
            && self.token_sum + cost > limit
        {
            let mut remaining = self.token_sum;
            for &(t, c) in &self.tokens {
                remaining -= c;
                if remaining + cost <= limit {
                    wait = wait.max(Self::expires_in(now, t));
                    break;
                }
            }
        }

        (!wait.is_zero()).then_some(wait)
    }

    fn record(&mut self, now: Instant, cost: u64) {
        self.requests.push_back(now);
        if cost > 0 {
            self.tokens.push_back((now, cost));
            self.token_sum += cost;
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    rpm: u32,
    tpm: Option<u64>,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// `rpm` is clamped to at least one request per minute.
    #[must_use]
    pub fn new(rpm: u32, tpm: Option<u64>) -> Self {
        Self {
            rpm: rpm.max(1),
            tpm,
            window: Mutex::new(Window::default()),
        }
    }

    /// Wait until a request of `cost` tokens fits in both budgets, then record it.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::CostExceedsLimit`] when `cost` alone exceeds
    /// the token limit.
    pub async fn acquire(&self, cost: u64) -> Result<(), RateLimitError> {
        if let Some(limit) = self.tpm
            && cost > limit
        {
            return Err(RateLimitError::CostExceedsLimit { cost, limit });
        }

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now);
                match window.required_wait(now, self.rpm, self.tpm, cost) {
                    None => {
                        window.record(now, cost);
                        return Ok(());
                    }
                    Some(wait) => wait,
                }
            };
            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                cost,
                "rate limit reached, waiting"
            );
            tokio::time::sleep(wait + SAFETY_MARGIN).await;
        }
    }

    /// Whether a request of `cost` would be admitted right now.
    pub async fn can_admit(&self, cost: u64) -> bool {
        if self.tpm.is_some_and(|limit| cost > limit) {
            return false;
        }
        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.prune(now);
        window.required_wait(now, self.rpm, self.tpm, cost).is_none()
    }

    pub async fn stats(&self) -> RateLimitStats {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        RateLimitStats {
            requests_in_window: window.requests.len(),
            tokens_in_window: window.token_sum,
            rpm_limit: self.rpm,
            tpm_limit: self.tpm,
        }
    }
}
