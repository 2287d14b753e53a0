//! Per-round and cumulative metrics for the dispatch engine.
//!
//! [`RoundMetrics`] is recorded by every successful or fatal
//! [`step_wait()`](crate::VecEngine::step_wait); [`EngineTotals`]
//! accumulates over the engine's lifetime.

use std::time::Duration;

/// Timing collected for one `step_async`/`step_wait` round.
///
/// All durations are in microseconds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoundMetrics {
    /// Wall-clock time from dispatch to the end of the drain.
    pub total_us: u64,
    /// Slowest single instance step.
    pub max_step_us: u64,
    /// Mean instance step time.
    pub mean_step_us: u64,
    /// Number of instances stepped in the round.
    pub instances: usize,
    /// Number of instances that failed in the round.
    pub faults: usize,
}

impl RoundMetrics {
    pub(crate) fn from_steps(total: Duration, steps: &[Duration], faults: usize) -> Self {
        let max = steps.iter().max().copied().unwrap_or_default();
        let sum: Duration = steps.iter().sum();
        let mean = if steps.is_empty() {
            Duration::ZERO
        } else {
            sum / steps.len() as u32
        };
        Self {
            total_us: total.as_micros() as u64,
            max_step_us: max.as_micros() as u64,
            mean_step_us: mean.as_micros() as u64,
            instances: steps.len(),
            faults,
        }
    }

    /// Fraction of the round spent in the slowest step. Close to 1.0
    /// means the round was bound by one straggler.
    pub fn straggler_ratio(&self) -> f64 {
        if self.total_us == 0 {
            return 0.0;
        }
        self.max_step_us as f64 / self.total_us as f64
    }
}

/// Cumulative counters over the engine's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineTotals {
    /// Rounds drained by `step_wait`.
    pub rounds: u64,
    /// Instance steps executed by workers.
    pub steps: u64,
    /// Single-slot resets (`reset_at_index` and `reset_start_level`).
    pub single_resets: u64,
    /// Full resets after the first.
    pub full_resets: u64,
    /// Instance failures observed.
    pub faults: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = RoundMetrics::default();
        assert_eq!(m.total_us, 0);
        assert_eq!(m.max_step_us, 0);
        assert_eq!(m.instances, 0);
        assert_eq!(m.straggler_ratio(), 0.0);
        assert_eq!(EngineTotals::default().rounds, 0);
    }

    #[test]
    fn from_steps_aggregates() {
        let steps = [
            Duration::from_micros(100),
            Duration::from_micros(300),
            Duration::from_micros(200),
        ];
        let m = RoundMetrics::from_steps(Duration::from_micros(600), &steps, 1);
        assert_eq!(m.max_step_us, 300);
        assert_eq!(m.mean_step_us, 200);
        assert_eq!(m.instances, 3);
        assert_eq!(m.faults, 1);
        assert!((m.straggler_ratio() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn from_steps_handles_empty_round() {
        let m = RoundMetrics::from_steps(Duration::from_micros(5), &[], 0);
        assert_eq!(m.mean_step_us, 0);
        assert_eq!(m.instances, 0);
    }
}
