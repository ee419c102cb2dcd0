//! Process-wide limiter in front of the classifier.
//!
//! Two rules apply to every call: a minimum spacing between consecutive
//! calls, and a reservoir of calls that refills to full once per window.
//! Waiters are served in arrival order.

use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    pub min_interval: Duration,
    pub reservoir: u32,
    pub refill_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(6000),
            reservoir: 10,
            refill_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    last_call: Option<Instant>,
    remaining: u32,
    window_start: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let config = LimiterConfig {
            reservoir: config.reservoir.max(1),
            ..config
        };
        Self {
            state: Mutex::new(LimiterState {
                last_call: None,
                remaining: config.reservoir,
                window_start: Instant::now(),
            }),
            config,
        }
    }

    /// Waits for a slot and consumes it.
    pub async fn acquire(&self) {
        // Holding the lock while sleeping queues later callers behind us
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            self.refill(&mut state, now);

            if state.remaining == 0 {
                let next_window = state.window_start + self.config.refill_interval;
                debug!("Classifier reservoir empty; waiting {:?}", next_window - now);
                sleep_until(next_window).await;
                continue;
            }

            if let Some(last) = state.last_call {
                let next_slot = last + self.config.min_interval;
                if now < next_slot {
                    sleep_until(next_slot).await;
                    continue;
                }
            }

            state.remaining -= 1;
            state.last_call = Some(now);
            return;
        }
    }

    /// Slots left in the current window.
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        state.remaining
    }

    fn refill(&self, state: &mut LimiterState, now: Instant) {
        let interval = self.config.refill_interval;
        if interval.is_zero() {
            state.remaining = self.config.reservoir;
            return;
        }

        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= interval {
            let into_window = elapsed.as_nanos() % interval.as_nanos();
            state.window_start = now - Duration::from_nanos(into_window as u64);
            state.remaining = self.config.reservoir;
        }
    }
}
