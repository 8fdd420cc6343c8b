use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core::time::Duration;
use ohno::app_err;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "rate_limit";

/// Calls allowed per rolling window when the upstream has not told us better.
const DEFAULT_CEILING: u32 = 5000;

/// Length of the rolling quota window, in seconds.
const DEFAULT_WINDOW_SECS: i64 = 3600;

/// When the remaining budget drops to this level or below, stop issuing calls
/// until the window resets.
const DEFAULT_RESERVE: u32 = 10;

/// Minimum spacing between consecutive upstream calls.
const DEFAULT_MIN_SPACING: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct State {
    remaining: u32,
    reset_at: DateTime<Utc>,
    last_call: Option<tokio::time::Instant>,
}

/// Current rate limiter view, for progress display.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterSnapshot {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Paces every upstream API call.
///
/// Tracks the remaining call budget locally, preferring the authoritative
/// values reported by response headers via [`RateLimiter::observe`]. When the
/// budget falls to the reserve threshold, [`RateLimiter::acquire`] parks
/// callers until the window resets. Independently of the budget, consecutive
/// calls are spaced at least `min_spacing` apart.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<State>,
    ceiling: u32,
    window: ChronoDuration,
    reserve: u32,
    min_spacing: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_CEILING,
            ChronoDuration::seconds(DEFAULT_WINDOW_SECS),
            DEFAULT_RESERVE,
            DEFAULT_MIN_SPACING,
        )
    }

    /// Construct with explicit limits. Production uses [`RateLimiter::new`];
    /// this exists so tests can run with tiny budgets and spacings.
    #[must_use]
    pub fn with_limits(ceiling: u32, window: ChronoDuration, reserve: u32, min_spacing: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                remaining: ceiling,
                reset_at: Utc::now() + window,
                last_call: None,
            }),
            ceiling,
            window,
            reserve,
            min_spacing,
        }
    }

    /// Wait until the next upstream call is allowed, then consume one unit of
    /// budget.
    ///
    /// Returns an error promptly when `cancel` fires, including while parked
    /// waiting for a window reset.
    pub async fn acquire(&self, cancel: &CancellationToken) -> crate::Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(app_err!("collection cancelled"));
            }

            // Decide how long to wait without holding the lock across the
            // sleep, so observe() can still update the budget meanwhile.
            let wait = {
                let mut state = self.state.lock().await;
                let now = Utc::now();

                if now >= state.reset_at {
                    state.remaining = self.ceiling;
                    state.reset_at = now + self.window;
                }

                if state.remaining <= self.reserve {
                    let until_reset = (state.reset_at - now).to_std().unwrap_or(Duration::ZERO);
                    log::debug!(
                        target: LOG_TARGET,
                        "budget exhausted ({} remaining), pausing {:.1}s until reset",
                        state.remaining,
                        until_reset.as_secs_f64()
                    );
                    Some(until_reset)
                } else if let Some(last) = state.last_call
                    && last.elapsed() < self.min_spacing
                {
                    Some(self.min_spacing - last.elapsed())
                } else {
                    state.remaining = state.remaining.saturating_sub(1);
                    state.last_call = Some(tokio::time::Instant::now());
                    None
                }
            };

            let Some(wait) = wait else {
                return Ok(());
            };

            tokio::select! {
                () = cancel.cancelled() => return Err(app_err!("collection cancelled")),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Fold the upstream's authoritative quota view into the local state.
    ///
    /// The upstream is the source of truth; local bookkeeping only bridges
    /// the gap between responses.
    pub async fn observe(&self, remaining: u32, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.remaining = remaining;
        state.reset_at = reset_at;
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.state.lock().await;
        RateLimiterSnapshot {
            remaining: state.remaining,
            reset_at: state.reset_at,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
