//! Time source for operation timestamps and simulated stage latency.
//!
//! Every operation reads "now" and pauses through a [`Clock`] so that
//! production code runs against the real clock while tests swap in a
//! [`ManualClock`] whose sleeps complete instantly by advancing virtual time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Abstraction over wall-clock time and suspension, injected into operations.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the caller for `duration` of this clock's time.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by `chrono::Utc` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` returns immediately after moving the clock forward, so elapsed
/// times computed from `now()` reflect the simulated latency exactly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `by`. Durations too large for chrono are ignored.
    pub fn advance(&self, by: Duration) {
        if let Ok(step) = TimeDelta::from_std(by) {
            let mut now = self.now.lock();
            *now += step;
        }
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Pacing
// ---------------------------------------------------------------------------

/// Maps simulated production minutes onto real pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Milliseconds of pause per simulated minute of stage work.
    pub millis_per_minute: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            millis_per_minute: 1000,
        }
    }
}

impl PacingConfig {
    /// Pause for `minutes` of simulated work, never longer than `cap`.
    #[must_use]
    pub fn pause_for(&self, minutes: u32, cap: Duration) -> Duration {
        let millis = u64::from(minutes).saturating_mul(self.millis_per_minute);
        Duration::from_millis(millis).min(cap)
    }
}

/// Clock plus pacing shared by every operation built from the same factory.
#[derive(Clone)]
pub struct ExecutionEnv {
    pub clock: Arc<dyn Clock>,
    pub pacing: PacingConfig,
}

impl ExecutionEnv {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, pacing: PacingConfig) -> Self {
        Self { clock, pacing }
    }

    /// Real clock, default pacing.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), PacingConfig::default())
    }
}

impl std::fmt::Debug for ExecutionEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEnv")
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}
