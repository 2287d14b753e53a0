//! Test utilities and scripted instances for Herd development.
//!
//! Every fixture implements [`Instance`](herd_core::Instance) against the
//! shared [`schema()`]: a three-element `i32` observation
//! `[slot, level_seed, tick]`, a `level_seed` info scalar and a 2x2 RGB
//! render target.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{
    ConcurrencyProbe, CounterGame, FaultMode, FaultyGame, Gate, GateHandle, GatedGame, ProbeGame,
};

use herd_core::{ScalarType, SpaceDescriptor, SpaceSchema};

/// Render mode supported by every fixture.
pub const RGB_MODE: &str = "rgb_array";

/// The schema every fixture writes.
pub fn schema() -> SpaceSchema {
    let max = i32::MAX as f32;
    SpaceSchema {
        observation: vec![SpaceDescriptor::boxed(
            "state",
            ScalarType::I32,
            &[3],
            0.0,
            max,
        )],
        action: vec![SpaceDescriptor::discrete("action", 16)],
        render: vec![SpaceDescriptor::boxed(
            "rgb",
            ScalarType::U8,
            &[2, 2, 3],
            0.0,
            255.0,
        )],
        info: vec![SpaceDescriptor::boxed(
            "level_seed",
            ScalarType::I32,
            &[],
            0.0,
            max,
        )],
    }
}

/// Decode a little-endian `i32` tensor.
pub fn read_i32s(buf: &[u8]) -> Vec<i32> {
    buf.chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Overwrite `buf` with `values` encoded as little-endian `i32`s.
pub fn write_i32s(buf: &mut Vec<u8>, values: &[i32]) {
    buf.clear();
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_valid() {
        let schema = schema();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.observation[0].byte_len(), 12);
        assert_eq!(schema.info[0].byte_len(), 4);
    }

    #[test]
    fn i32_codec_round_trip() {
        let mut buf = Vec::new();
        write_i32s(&mut buf, &[1, -2, i32::MAX]);
        assert_eq!(buf.len(), 12);
        assert_eq!(read_i32s(&buf), vec![1, -2, i32::MAX]);
    }
}
