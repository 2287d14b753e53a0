//! The contract every simulation instance fulfils.
//!
//! The driver treats an instance as a black box reached only through
//! [`Instance`]. Exclusive access is guaranteed by ownership: an
//! instance is moved to a worker for a step and moved back afterwards,
//! so implementations need `Send` but never `Sync` or internal locking.

use crate::error::InstanceError;
use crate::id::{LevelRange, LevelSeed};

/// Everything an instance needs to start (or restart) a level.
#[derive(Clone, Copy, Debug)]
pub struct InitContext<'a> {
    /// Slot index the instance occupies.
    pub slot: usize,
    /// Registered variant name the instance was created as.
    pub variant: &'a str,
    /// Seed of the first level to play.
    pub level_seed: LevelSeed,
    /// Range subsequent levels must be drawn from when an episode ends.
    pub levels: LevelRange,
}

/// Destination of one step's results.
///
/// `obs` and `info` hold one buffer per schema entry, in schema order.
pub struct StepOutput<'a> {
    /// Observation tensors after the step.
    pub obs: &'a mut [Vec<u8>],
    /// Info tensors describing the step.
    pub info: &'a mut [Vec<u8>],
    /// Reward earned by the step.
    pub reward: &'a mut f32,
    /// Whether the step ended the episode.
    pub done: &'a mut bool,
}

/// One independent, stateful simulation.
pub trait Instance: Send {
    /// Registered variant name of this instance.
    fn variant(&self) -> &str;

    /// (Re)initialise to the first state of the level selected by `ctx`.
    fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), InstanceError>;

    /// Advance one step with `action` and write the results into `out`.
    ///
    /// Instances that auto-reset at episode end write the first
    /// observation of the next episode and set `done`.
    fn step(&mut self, action: i32, out: StepOutput<'_>) -> Result<(), InstanceError>;

    /// Write the current observation without changing state.
    fn observe(&self, obs: &mut [Vec<u8>]);

    /// Render into `target`. Returns `false` if `mode` is unsupported.
    fn render(&mut self, mode: &str, target: &mut Vec<u8>) -> bool;
}

// Compile-time assertion: boxed instances can cross threads.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send + ?Sized>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<Box<dyn Instance>>();
    }
};
