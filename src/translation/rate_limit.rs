/*!
 * Request and token throughput governor.
 *
 * All workers share one `RateGovernor`. Each grant is logged with its time and
 * token debit; a request is admitted only when the log entries younger than
 * the window leave room for one more request and its tokens. Waiters queue on
 * a FIFO turnstile so grants follow arrival order.
 *
 * A request whose tokens alone exceed the per-window budget is admitted as
 * soon as the window holds no other tokens, so it can never wait forever.
 */

use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Default accounting window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Longest single sleep while waiting, so the stop flag is seen promptly
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Throughput ceilings per window; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimits {
    pub requests_per_window: Option<u32>,
    pub tokens_per_window: Option<u64>,
}

impl RateLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn per_minute(rpm: Option<u32>, tpm: Option<u64>) -> Self {
        Self {
            requests_per_window: rpm.filter(|v| *v > 0),
            tokens_per_window: tpm.filter(|v| *v > 0),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.requests_per_window.is_none() && self.tokens_per_window.is_none()
    }
}

/// Proof of admission returned by [`RateGovernor::acquire`]
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    /// Instant the window was debited
    pub granted_at: Instant,
    pub tokens: u64,
    /// Time spent waiting for the grant
    pub waited: Duration,
}

#[derive(Debug, Default)]
struct WindowLog {
    grants: VecDeque<(Instant, u64)>,
    tokens: u64,
}

impl WindowLog {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, tokens)) = self.grants.front() {
            if now.duration_since(at) < window {
                break;
            }
            self.grants.pop_front();
            self.tokens -= tokens;
        }
    }

    /// Debit the window or report how long until the oldest grant expires.
    fn try_grant(&mut self, now: Instant, tokens: u64, limits: &RateLimits, window: Duration) -> Result<(), Duration> {
        let request_ok = limits
            .requests_per_window
            .is_none_or(|limit| self.grants.len() < limit as usize);
        let tokens_ok = limits
            .tokens_per_window
            .is_none_or(|limit| self.tokens == 0 || self.tokens + tokens <= limit);

        if request_ok && tokens_ok {
            self.grants.push_back((now, tokens));
            self.tokens += tokens;
            return Ok(());
        }

        let wait = self
            .grants
            .front()
            .map(|&(at, _)| (at + window).saturating_duration_since(now))
            .unwrap_or(window);
        Err(wait.max(Duration::from_millis(1)))
    }
}

/// Shared request/token gate for all workers.
#[derive(Debug)]
pub struct RateGovernor {
    limits: RateLimits,
    window: Duration,
    log: Mutex<WindowLog>,
    turnstile: tokio::sync::Mutex<()>,
    granted: AtomicU64,
}

impl RateGovernor {
    pub fn new(limits: RateLimits, window: Duration) -> Self {
        Self {
            limits,
            window,
            log: Mutex::new(WindowLog::default()),
            turnstile: tokio::sync::Mutex::new(()),
            granted: AtomicU64::new(0),
        }
    }

    /// Governor with a one-minute window
    pub fn per_minute(limits: RateLimits) -> Self {
        Self::new(limits, DEFAULT_WINDOW)
    }

    pub fn unlimited() -> Self {
        Self::per_minute(RateLimits::unlimited())
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Total grants so far
    pub fn granted_count(&self) -> u64 {
        self.granted.load(Ordering::SeqCst)
    }

    /// Wait until a request of `tokens` fits the window, then debit it.
    ///
    /// Returns `None` only if `stop` is raised while waiting.
    pub async fn acquire(&self, tokens: u64, stop: &AtomicBool) -> Option<Permit> {
        let started = Instant::now();

        if self.limits.is_unlimited() {
            self.granted.fetch_add(1, Ordering::SeqCst);
            return Some(Permit {
                granted_at: started,
                tokens,
                waited: Duration::ZERO,
            });
        }

        let _turn = self.turnstile.lock().await;
        loop {
            if stop.load(Ordering::SeqCst) {
                return None;
            }

            let outcome = {
                let mut log = self.log.lock();
                let now = Instant::now();
                log.prune(now, self.window);
                log.try_grant(now, tokens, &self.limits, self.window).map(|()| now)
            };

            match outcome {
                Ok(granted_at) => {
                    self.granted.fetch_add(1, Ordering::SeqCst);
                    return Some(Permit {
                        granted_at,
                        tokens,
                        waited: granted_at.duration_since(started),
                    });
                }
                Err(wait) => {
                    debug!("Rate window full, waiting {:?} for {} tokens", wait, tokens);
                    tokio::time::sleep(wait.min(POLL_INTERVAL)).await;
                }
            }
        }
    }
}
