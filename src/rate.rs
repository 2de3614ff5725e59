//! Adaptive admission control
//!
//! Converts observed throttle signals and batch execution times into a
//! per-source concurrency ceiling using AIMD (Additive Increase
//! Multiplicative Decrease) with deliberate hysteresis: the ceiling drops
//! multiplicatively the moment a throttle is seen and climbs back one step
//! at a time, only after a run of demonstrably healthy batches and a minimum
//! interval. Throttling penalties on the remote platform are multi-minute
//! lockouts, so the controller under-uses capacity rather than risking one.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Smoothing factor for the execution-time baseline EWMA
const BASELINE_ALPHA: f64 = 0.2;

/// Aggressiveness preset supplying the controller's numeric constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RatePreset {
    /// Small ceilings, slow climb. For orgs with tight platform limits.
    Conservative,
    /// Sensible middle ground (default).
    Balanced,
    /// Larger ceilings, quick climb. For orgs with generous limits.
    Aggressive,
}

impl Default for RatePreset {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Controller constants. Built from a preset; any explicitly set field
/// overrides the preset default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateControlConfig {
    /// Ceiling a fresh source starts at
    pub initial_ceiling: usize,
    /// Ceiling is never raised above this
    pub max_ceiling: usize,
    /// Multiplier applied to the ceiling on each throttle (0 < f < 1)
    pub decrease_factor: f64,
    /// A successful batch counts as "good" when its execution time is below
    /// `baseline * execution_time_ceiling_factor`
    pub execution_time_ceiling_factor: f64,
    /// Consecutive good batches required before the ceiling may rise
    pub stabilization_batches: u32,
    /// Minimum time between two ceiling increases
    pub min_increase_interval: Duration,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self::from_preset(RatePreset::Balanced)
    }
}

impl RateControlConfig {
    /// Build the configuration a preset specifies
    pub fn from_preset(preset: RatePreset) -> Self {
        match preset {
            RatePreset::Conservative => Self {
                initial_ceiling: 2,
                max_ceiling: 8,
                decrease_factor: 0.5,
                execution_time_ceiling_factor: 1.5,
                stabilization_batches: 10,
                min_increase_interval: Duration::from_secs(60),
            },
            RatePreset::Balanced => Self {
                initial_ceiling: 4,
                max_ceiling: 16,
                decrease_factor: 0.5,
                execution_time_ceiling_factor: 2.0,
                stabilization_batches: 5,
                min_increase_interval: Duration::from_secs(30),
            },
            RatePreset::Aggressive => Self {
                initial_ceiling: 8,
                max_ceiling: 32,
                decrease_factor: 0.75,
                execution_time_ceiling_factor: 2.5,
                stabilization_batches: 3,
                min_increase_interval: Duration::from_secs(10),
            },
        }
    }

    /// Override the initial ceiling
    pub fn with_initial_ceiling(mut self, ceiling: usize) -> Self {
        self.initial_ceiling = ceiling;
        self
    }

    /// Override the maximum ceiling
    pub fn with_max_ceiling(mut self, ceiling: usize) -> Self {
        self.max_ceiling = ceiling;
        self
    }

    /// Override the decrease factor
    pub fn with_decrease_factor(mut self, factor: f64) -> Self {
        self.decrease_factor = factor;
        self
    }

    /// Override the execution-time ceiling factor
    pub fn with_execution_time_ceiling_factor(mut self, factor: f64) -> Self {
        self.execution_time_ceiling_factor = factor;
        self
    }

    /// Override the stabilization batch count
    pub fn with_stabilization_batches(mut self, batches: u32) -> Self {
        self.stabilization_batches = batches;
        self
    }

    /// Override the minimum increase interval
    pub fn with_min_increase_interval(mut self, interval: Duration) -> Self {
        self.min_increase_interval = interval;
        self
    }

    fn validate(&self) -> bool {
        self.initial_ceiling >= 1
            && self.max_ceiling >= self.initial_ceiling
            && self.decrease_factor > 0.0
            && self.decrease_factor < 1.0
            && self.execution_time_ceiling_factor >= 1.0
            && self.stabilization_batches >= 1
    }
}

/// Per-source controller state.
#[derive(Debug)]
struct SourceRate {
    ceiling: usize,
    stabilization_count: u32,
    /// Clock for the increase interval; starts at state creation
    last_increase: Instant,
    /// EWMA of successful-batch execution time, in microseconds
    baseline_us: Option<f64>,
}

impl SourceRate {
    fn new(initial_ceiling: usize) -> Self {
        Self {
            ceiling: initial_ceiling,
            stabilization_count: 0,
            last_increase: Instant::now(),
            baseline_us: None,
        }
    }
}

/// Snapshot of one source's controller state, for diagnostics.
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    /// Current concurrency ceiling
    pub ceiling: usize,
    /// Good batches accumulated toward the next increase
    pub stabilization_count: u32,
    /// Current execution-time baseline, if any samples were seen
    pub baseline: Option<Duration>,
}

/// AIMD concurrency controller, keyed by source name.
#[derive(Debug)]
pub struct AdaptiveRateController {
    config: RateControlConfig,
    sources: RwLock<HashMap<String, SourceRate>>,
}

impl AdaptiveRateController {
    /// Create a controller with the given constants.
    ///
    /// Invalid constants (zero ceilings, decrease factor outside (0, 1),
    /// execution-time factor below 1) fall back to the Balanced preset.
    pub fn new(config: RateControlConfig) -> Self {
        let config = if config.validate() {
            config
        } else {
            warn!("invalid rate control constants, falling back to Balanced preset");
            RateControlConfig::default()
        };
        Self {
            config,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Create a controller from a preset with no overrides
    pub fn from_preset(preset: RatePreset) -> Self {
        Self::new(RateControlConfig::from_preset(preset))
    }

    /// The constants this controller runs with
    pub fn config(&self) -> &RateControlConfig {
        &self.config
    }

    /// The number of concurrent operations currently permitted on `source`
    pub fn ceiling(&self, source: &str) -> usize {
        self.sources
            .read()
            .get(source)
            .map(|s| s.ceiling)
            .unwrap_or(self.config.initial_ceiling)
    }

    /// Diagnostics snapshot for `source`
    pub fn snapshot(&self, source: &str) -> RateSnapshot {
        let sources = self.sources.read();
        match sources.get(source) {
            Some(s) => RateSnapshot {
                ceiling: s.ceiling,
                stabilization_count: s.stabilization_count,
                baseline: s.baseline_us.map(|us| Duration::from_micros(us as u64)),
            },
            None => RateSnapshot {
                ceiling: self.config.initial_ceiling,
                stabilization_count: 0,
                baseline: None,
            },
        }
    }

    /// React to a throttle signal on `source`: multiplicative decrease,
    /// stabilization counter reset.
    pub fn on_throttle(&self, source: &str) {
        let mut sources = self.sources.write();
        let state = sources
            .entry(source.to_string())
            .or_insert_with(|| SourceRate::new(self.config.initial_ceiling));

        let previous = state.ceiling;
        state.ceiling = ((state.ceiling as f64 * self.config.decrease_factor).floor() as usize).max(1);
        state.stabilization_count = 0;
        warn!(
            source,
            previous,
            ceiling = state.ceiling,
            "throttle observed, concurrency ceiling lowered"
        );
    }

    /// React to a successful batch on `source`. Good batches accumulate
    /// toward an additive increase; a batch above the execution-time ceiling
    /// is treated as a throttle-grade signal and lowers the ceiling
    /// multiplicatively.
    pub fn on_success(&self, source: &str, execution_time: Duration) {
        let sample_us = execution_time.as_micros() as f64;
        let mut sources = self.sources.write();
        let state = sources
            .entry(source.to_string())
            .or_insert_with(|| SourceRate::new(self.config.initial_ceiling));

        // Judge the sample against the baseline as it stood before this batch.
        let good = match state.baseline_us {
            Some(baseline) => sample_us <= baseline * self.config.execution_time_ceiling_factor,
            // First sample establishes the baseline and counts as good.
            None => true,
        };

        state.baseline_us = Some(match state.baseline_us {
            Some(baseline) => baseline + BASELINE_ALPHA * (sample_us - baseline),
            None => sample_us,
        });

        if !good {
            let previous = state.ceiling;
            state.ceiling =
                ((state.ceiling as f64 * self.config.decrease_factor).floor() as usize).max(1);
            state.stabilization_count = 0;
            debug!(
                source,
                previous,
                ceiling = state.ceiling,
                execution_ms = execution_time.as_millis() as u64,
                "slow batch, concurrency ceiling lowered"
            );
            return;
        }

        state.stabilization_count += 1;
        if state.stabilization_count >= self.config.stabilization_batches
            && state.last_increase.elapsed() >= self.config.min_increase_interval
            && state.ceiling < self.config.max_ceiling
        {
            state.ceiling += 1;
            state.stabilization_count = 0;
            state.last_increase = Instant::now();
            debug!(source, ceiling = state.ceiling, "concurrency ceiling raised");
        }
    }

    /// Forget all per-source state, returning every ceiling to its initial value
    pub fn reset(&self) {
        self.sources.write().clear();
    }
}
