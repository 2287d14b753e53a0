//! Herd: a vectorized driver for many independent simulation instances.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Herd sub-crates. For most users, adding `herd` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use herd::prelude::*;
//!
//! // A minimal instance: the observation is the step counter.
//! struct Ticker {
//!     tick: i32,
//! }
//!
//! impl Instance for Ticker {
//!     fn variant(&self) -> &str { "ticker" }
//!     fn init(&mut self, _ctx: &InitContext<'_>) -> Result<(), InstanceError> {
//!         self.tick = 0;
//!         Ok(())
//!     }
//!     fn step(&mut self, action: i32, out: StepOutput<'_>) -> Result<(), InstanceError> {
//!         self.tick += 1;
//!         *out.reward = action as f32;
//!         *out.done = self.tick == 10;
//!         self.observe(out.obs);
//!         Ok(())
//!     }
//!     fn observe(&self, obs: &mut [Vec<u8>]) {
//!         obs[0].copy_from_slice(&self.tick.to_le_bytes());
//!     }
//!     fn render(&mut self, _mode: &str, _target: &mut Vec<u8>) -> bool { false }
//! }
//!
//! let schema = SpaceSchema {
//!     observation: vec![SpaceDescriptor::boxed("tick", ScalarType::I32, &[], 0.0, 10.0)],
//!     ..SpaceSchema::default()
//! };
//! let registry = Registry::new().with("ticker", || Box::new(Ticker { tick: 0 }));
//! let mut engine = VecEngine::new(VecConfig::new(4, "ticker", schema), registry).unwrap();
//!
//! let mut obs = SlotBuffers::batch(engine.schema(), engine.num_envs());
//! engine.reset(&mut obs).unwrap();
//!
//! let bufs = StepBuffers::for_schema(engine.schema(), engine.num_envs());
//! engine.step_async(&[1, 2, 3, 4], bufs).unwrap();
//! let bufs = engine.step_wait().unwrap();
//! assert_eq!(bufs.rewards, vec![1.0, 2.0, 3.0, 4.0]);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `herd-core` | Instance contract, schema, buffers, errors, level seeds |
//! | [`engine`] | `herd-engine` | Vectorized engine, registry, seeding, mixtures |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and the instance contract (`herd-core`).
///
/// Contains [`types::Instance`], the tensor schema, the buffer types and
/// the error enums.
pub use herd_core as types;

/// The dispatch engine (`herd-engine`).
///
/// [`engine::VecEngine`] steps a vector of instances on a worker pool;
/// [`engine::MixtureEngine`] resamples variants at episode boundaries.
pub use herd_engine as engine;

/// Common imports for typical Herd usage.
///
/// ```rust
/// use herd::prelude::*;
/// ```
pub mod prelude {
    // Instance contract
    pub use herd_core::{InitContext, Instance, StepOutput};

    // Schema and buffers
    pub use herd_core::{
        LevelRange, LevelSeed, ScalarType, SlotBuffers, SpaceDescriptor, SpaceKind, SpaceSchema,
        StepBuffers,
    };

    // Errors
    pub use herd_core::{InstanceError, VecError};
    pub use herd_engine::{ConfigError, DispatchError, MixtureStepError};

    // Engine
    pub use herd_engine::{
        MixtureEngine, Registry, RoundMetrics, ShutdownReport, VariantMix, VecConfig, VecEngine,
    };
}
