//! Caller-owned output buffers.
//!
//! Buffers are allocated by the caller (helpers here size them from a
//! [`SpaceSchema`]) and lent to the driver for the duration of one
//! operation. For asynchronous steps the caller moves a [`StepBuffers`]
//! into the driver and gets the same allocation back, filled in place,
//! when the round completes.

use smallvec::SmallVec;

use crate::space::SpaceSchema;

/// Output tensors for a single instance: one byte buffer per observation
/// space and one per info space, in schema order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlotBuffers {
    /// One buffer per [`SpaceSchema::observation`] entry.
    pub obs: SmallVec<[Vec<u8>; 2]>,
    /// One buffer per [`SpaceSchema::info`] entry.
    pub info: SmallVec<[Vec<u8>; 4]>,
}

impl SlotBuffers {
    /// Zero-filled buffers sized from `schema`.
    pub fn for_schema(schema: &SpaceSchema) -> Self {
        Self {
            obs: schema.observation.iter().map(|s| s.allocate()).collect(),
            info: schema.info.iter().map(|s| s.allocate()).collect(),
        }
    }

    /// One `SlotBuffers` per instance.
    pub fn batch(schema: &SpaceSchema, count: usize) -> Vec<Self> {
        (0..count).map(|_| Self::for_schema(schema)).collect()
    }
}

/// Everything one round of steps writes: per-slot tensors plus the
/// reward and done vectors, all indexed by slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepBuffers {
    /// Per-slot observation and info tensors.
    pub slots: Vec<SlotBuffers>,
    /// Per-slot reward of the last step.
    pub rewards: Vec<f32>,
    /// Per-slot episode-end flag of the last step.
    pub dones: Vec<bool>,
}

impl StepBuffers {
    /// Zero-filled buffers for `count` instances.
    pub fn for_schema(schema: &SpaceSchema, count: usize) -> Self {
        Self {
            slots: SlotBuffers::batch(schema, count),
            rewards: vec![0.0; count],
            dones: vec![false; count],
        }
    }

    /// Number of slots the buffers cover.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffers cover no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
