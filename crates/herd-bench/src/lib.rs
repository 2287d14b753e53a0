//! Benchmark profiles for the Herd vectorized driver.
//!
//! - [`counter_profile`]: `n` zero-cost counter instances, measuring pure
//!   dispatch overhead
//! - [`loaded_profile`]: counter instances that sleep inside `step`,
//!   measuring how well the pool overlaps work

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::time::Duration;

use herd_engine::{ConfigError, Registry, VecConfig, VecEngine};
use herd_test_utils::{schema, CounterGame};

/// Variant name registered by every profile.
pub const VARIANT: &str = "counter";

/// Build an engine of `envs` counter instances with no step cost.
pub fn counter_profile(envs: usize, threads: usize, seed: u64) -> Result<VecEngine, ConfigError> {
    build(envs, threads, seed, None)
}

/// Build an engine whose instances sleep for `step_cost` every step.
pub fn loaded_profile(
    envs: usize,
    threads: usize,
    seed: u64,
    step_cost: Duration,
) -> Result<VecEngine, ConfigError> {
    build(envs, threads, seed, Some(step_cost))
}

fn build(
    envs: usize,
    threads: usize,
    seed: u64,
    step_cost: Option<Duration>,
) -> Result<VecEngine, ConfigError> {
    let registry = Registry::new().with(VARIANT, move || {
        let game = CounterGame::new(VARIANT).with_episode_len(64);
        Box::new(match step_cost {
            Some(cost) => game.with_step_delay(cost),
            None => game,
        })
    });
    let config = VecConfig {
        num_threads: Some(threads),
        rand_seed: seed,
        num_levels: 200,
        ..VecConfig::new(envs, VARIANT, schema())
    };
    log::debug!("bench profile: {envs} envs, {threads} threads, cost {step_cost:?}");
    VecEngine::new(config, registry)
}

/// Deterministic action pattern for round `round`.
pub fn actions(envs: usize, round: usize) -> Vec<i32> {
    (0..envs).map(|i| ((i + round) % 16) as i32).collect()
}
