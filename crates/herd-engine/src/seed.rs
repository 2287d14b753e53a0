//! Deterministic level seed generator.
//!
//! A seeded ChaCha8 stream drawing uniformly from a [`LevelRange`].
//! Identical base seed, range, instance count and joint-game grouping
//! always reproduce the identical per-slot assignment.

use herd_core::{LevelRange, LevelSeed};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Reproducible source of level seeds.
#[derive(Clone, Debug)]
pub struct SeedGenerator {
    rng: ChaCha8Rng,
    range: LevelRange,
    drawn: u64,
}

impl SeedGenerator {
    /// Create a generator over `range` seeded from `base_seed`.
    pub fn new(base_seed: u64, range: LevelRange) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(base_seed),
            range,
            drawn: 0,
        }
    }

    /// Draw the next level seed.
    pub fn next_level_seed(&mut self) -> LevelSeed {
        self.drawn += 1;
        LevelSeed(self.rng.random_range(self.range.low()..self.range.high()))
    }

    /// Draw one seed per slot, where each run of `joint_games`
    /// consecutive slots shares a single draw.
    ///
    /// `joint_games` of zero is treated as one.
    pub fn assign(&mut self, env_count: usize, joint_games: usize) -> Vec<LevelSeed> {
        let group = joint_games.max(1);
        let mut seeds = Vec::with_capacity(env_count);
        let mut current = LevelSeed(self.range.low());
        for slot in 0..env_count {
            if slot % group == 0 {
                current = self.next_level_seed();
            }
            seeds.push(current);
        }
        seeds
    }

    /// The range seeds are drawn from.
    pub fn range(&self) -> LevelRange {
        self.range
    }

    /// Number of seeds drawn so far.
    pub fn drawn(&self) -> u64 {
        self.drawn
    }
}
