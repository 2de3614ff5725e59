//! Throttle signal tracking
//!
//! A shared, process-wide fact base for throttling signals observed by
//! callers. Any caller that sees a rate-limit rejection records it here; the
//! rate controller reads the per-source state to decide admission. The
//! tracker applies no policy of its own.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Number of recent operation outcomes kept per source
const OUTCOME_WINDOW: usize = 10;

/// Per-source throttle facts.
#[derive(Debug, Clone)]
pub struct ThrottleState {
    /// Outcome of the most recent operations, newest last.
    /// `true` means the operation was throttled.
    pub recent_throttled: VecDeque<bool>,
    /// Most recent server-supplied retry-after hint, if any
    pub retry_after: Option<Duration>,
    /// When the last throttle was observed
    pub last_throttle_at: Option<Instant>,
    /// Execution time of the last successful operation
    pub last_execution_time: Option<Duration>,
    /// Total throttles observed on this source
    pub total_throttled: u64,
    /// Total successes observed on this source
    pub total_succeeded: u64,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self {
            recent_throttled: VecDeque::with_capacity(OUTCOME_WINDOW),
            retry_after: None,
            last_throttle_at: None,
            last_execution_time: None,
            total_throttled: 0,
            total_succeeded: 0,
        }
    }
}

impl ThrottleState {
    fn push_outcome(&mut self, throttled: bool) {
        if self.recent_throttled.len() == OUTCOME_WINDOW {
            self.recent_throttled.pop_front();
        }
        self.recent_throttled.push_back(throttled);
    }

    /// Whether the most recent operation on this source was throttled
    pub fn last_was_throttled(&self) -> bool {
        self.recent_throttled.back().copied().unwrap_or(false)
    }

    /// Fraction of the recent window that was throttled (0.0 when empty)
    pub fn recent_throttle_ratio(&self) -> f64 {
        if self.recent_throttled.is_empty() {
            return 0.0;
        }
        let throttled = self.recent_throttled.iter().filter(|&&t| t).count();
        throttled as f64 / self.recent_throttled.len() as f64
    }
}

/// Shared sink for throttle signals, keyed by source name.
#[derive(Debug, Default)]
pub struct ThrottleTracker {
    states: RwLock<HashMap<String, ThrottleState>>,
}

impl ThrottleTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a throttling response observed on `source`
    pub fn record_throttle(&self, source: &str, retry_after: Option<Duration>) {
        let mut states = self.states.write();
        let state = states.entry(source.to_string()).or_default();
        state.push_outcome(true);
        state.retry_after = retry_after;
        state.last_throttle_at = Some(Instant::now());
        state.total_throttled += 1;
    }

    /// Record a successful batch on `source` with its execution time
    pub fn record_success(&self, source: &str, execution_time: Duration) {
        let mut states = self.states.write();
        let state = states.entry(source.to_string()).or_default();
        state.push_outcome(false);
        state.last_execution_time = Some(execution_time);
        state.total_succeeded += 1;
    }

    /// Current throttle state for `source` (default state if never observed)
    pub fn state(&self, source: &str) -> ThrottleState {
        self.states
            .read()
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget all recorded signals
    pub fn reset(&self) {
        self.states.write().clear();
    }
}
