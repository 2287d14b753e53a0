//! Dispatch engine driving a vector of Herd simulation instances.
//!
//! [`VecEngine`] owns a fixed set of instances and a fixed worker pool.
//! The caller drives rounds with [`step_async`](VecEngine::step_async)
//! and [`step_wait`](VecEngine::step_wait); in between, instances are
//! moved through a mutex-guarded pending queue to the workers and back.
//! [`MixtureEngine`] layers per-episode variant resampling on top.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
mod handoff;
pub mod metrics;
pub mod mixture;
mod pool;
pub mod registry;
pub mod seed;
pub mod vectorized;

pub use config::{ConfigError, VecConfig};
pub use handoff::SlotState;
pub use metrics::{EngineTotals, RoundMetrics};
pub use mixture::{MixtureEngine, MixtureStep, MixtureStepError, VariantMix};
pub use registry::{InstanceFactory, Registry};
pub use seed::SeedGenerator;
pub use vectorized::{DispatchError, ShutdownReport, VecEngine};
