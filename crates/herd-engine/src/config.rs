//! Driver configuration, validation, and construction errors.
//!
//! [`VecConfig`] carries the recognised options: instance count, level
//! range, base seed, worker count, joint-game grouping, the initial
//! variant, and the tensor schema. [`validate()`](VecConfig::validate)
//! checks every structural invariant before any thread or instance is
//! created.

use std::error::Error;
use std::fmt;

use herd_core::{LevelRange, SpaceSchema};

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while constructing a [`VecEngine`](crate::VecEngine).
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// `env_count` is zero.
    NoEnvs,
    /// An explicit worker count of zero was requested.
    NoThreads,
    /// `num_joint_games` is zero.
    NoJointGames,
    /// `env_count` is not a multiple of `num_joint_games`.
    JointGamesMismatch {
        /// Configured instance count.
        env_count: usize,
        /// Configured joint-game group size.
        num_joint_games: usize,
    },
    /// `start_level + num_levels` does not fit the seed domain.
    InvalidLevelRange {
        /// Configured start level.
        start_level: u32,
        /// Configured level count.
        num_levels: u32,
    },
    /// The tensor schema failed validation.
    InvalidSchema {
        /// Description of the validation failure.
        reason: String,
    },
    /// The initial variant is not registered.
    UnknownVariant {
        /// The requested variant name.
        variant: String,
    },
    /// An instance failed to initialise during construction.
    InstanceInit {
        /// Slot index of the failing instance.
        index: usize,
        /// Description of the failure.
        reason: String,
    },
    /// A worker thread could not be spawned.
    ThreadSpawnFailed {
        /// Description of which thread failed.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEnvs => write!(f, "env_count must be at least 1"),
            Self::NoThreads => write!(f, "num_threads must be at least 1"),
            Self::NoJointGames => write!(f, "num_joint_games must be at least 1"),
            Self::JointGamesMismatch {
                env_count,
                num_joint_games,
            } => write!(
                f,
                "env_count {env_count} is not a multiple of num_joint_games {num_joint_games}"
            ),
            Self::InvalidLevelRange {
                start_level,
                num_levels,
            } => write!(
                f,
                "start_level {start_level} + num_levels {num_levels} exceeds the seed domain"
            ),
            Self::InvalidSchema { reason } => write!(f, "invalid schema: {reason}"),
            Self::UnknownVariant { variant } => write!(f, "unknown variant '{variant}'"),
            Self::InstanceInit { index, reason } => {
                write!(f, "instance {index} failed to initialise: {reason}")
            }
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
        }
    }
}

impl Error for ConfigError {}

// ── VecConfig ──────────────────────────────────────────────────────

/// Complete configuration for constructing a [`VecEngine`](crate::VecEngine).
#[derive(Clone, Debug)]
pub struct VecConfig {
    /// Number of simulation instances. Must be at least 1.
    pub env_count: usize,
    /// Number of distinct levels. `0` = unbounded.
    pub num_levels: u32,
    /// First level seed of the bounded range.
    pub start_level: u32,
    /// Base seed of the level seed generator.
    pub rand_seed: u64,
    /// Worker thread count. `None` = auto-detect (see
    /// [`resolved_thread_count`](Self::resolved_thread_count)).
    pub num_threads: Option<usize>,
    /// Number of consecutive instances that share one seed draw. Default: 1.
    pub num_joint_games: usize,
    /// Registered variant every slot starts as.
    pub variant: String,
    /// Per-instance tensor schema.
    pub schema: SpaceSchema,
}

impl VecConfig {
    /// Configuration with defaults for everything but the essentials.
    pub fn new(env_count: usize, variant: impl Into<String>, schema: SpaceSchema) -> Self {
        Self {
            env_count,
            num_levels: 0,
            start_level: 0,
            rand_seed: 0,
            num_threads: None,
            num_joint_games: 1,
            variant: variant.into(),
            schema,
        }
    }

    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.env_count == 0 {
            return Err(ConfigError::NoEnvs);
        }
        if self.num_threads == Some(0) {
            return Err(ConfigError::NoThreads);
        }
        if self.num_joint_games == 0 {
            return Err(ConfigError::NoJointGames);
        }
        if self.env_count % self.num_joint_games != 0 {
            return Err(ConfigError::JointGamesMismatch {
                env_count: self.env_count,
                num_joint_games: self.num_joint_games,
            });
        }
        self.level_range()?;
        self.schema
            .validate()
            .map_err(|reason| ConfigError::InvalidSchema { reason })?;
        Ok(())
    }

    /// The level range implied by `start_level` and `num_levels`.
    pub fn level_range(&self) -> Result<LevelRange, ConfigError> {
        LevelRange::from_levels(self.start_level, self.num_levels).ok_or(
            ConfigError::InvalidLevelRange {
                start_level: self.start_level,
                num_levels: self.num_levels,
            },
        )
    }

    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Auto-detection uses `available_parallelism`, clamped to `[1, 64]`
    /// and never more than `env_count` (extra workers would only park).
    pub fn resolved_thread_count(&self) -> usize {
        match self.num_threads {
            Some(n) => n.max(1),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                cpus.clamp(1, 64).min(self.env_count.max(1))
            }
        }
    }
}
