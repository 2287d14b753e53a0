//! Core types and traits for the Herd vectorized simulation driver.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the contract between the driver and the simulations it owns: level
//! seed types, space descriptors, caller-owned buffer types, the
//! [`Instance`] trait, and the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod error;
pub mod id;
pub mod space;
pub mod traits;

pub use buffer::{SlotBuffers, StepBuffers};
pub use error::{InstanceError, VecError};
pub use id::{LevelRange, LevelSeed};
pub use space::{ScalarType, SpaceDescriptor, SpaceKind, SpaceSchema};
pub use traits::{InitContext, Instance, StepOutput};
