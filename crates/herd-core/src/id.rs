//! Level seed identifiers and the level range they are drawn from.

use std::fmt;

/// Seed selecting the procedurally generated level an instance plays.
///
/// Seeds are kept within `0..=i32::MAX` so they round-trip through
/// 32-bit signed info buffers without loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelSeed(pub u32);

impl fmt::Display for LevelSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LevelSeed {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Half-open range `[low, high)` of level seeds an instance may play.
///
/// Built from the `start_level` / `num_levels` pair of the driver
/// configuration. `num_levels == 0` selects the unbounded range
/// `[0, i32::MAX)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LevelRange {
    low: u32,
    high: u32,
}

impl LevelRange {
    /// Exclusive upper bound used for the unbounded range.
    pub const UNBOUNDED_HIGH: u32 = i32::MAX as u32;

    /// The unbounded range `[0, i32::MAX)`.
    pub const fn unbounded() -> Self {
        Self {
            low: 0,
            high: Self::UNBOUNDED_HIGH,
        }
    }

    /// Build the range from a start level and a level count.
    ///
    /// Returns `None` if `start_level + num_levels` exceeds
    /// [`UNBOUNDED_HIGH`](Self::UNBOUNDED_HIGH).
    pub fn from_levels(start_level: u32, num_levels: u32) -> Option<Self> {
        if num_levels == 0 {
            return Some(Self::unbounded());
        }
        let high = start_level.checked_add(num_levels)?;
        if high > Self::UNBOUNDED_HIGH {
            return None;
        }
        Some(Self {
            low: start_level,
            high,
        })
    }

    /// Inclusive lower bound.
    pub fn low(&self) -> u32 {
        self.low
    }

    /// Exclusive upper bound.
    pub fn high(&self) -> u32 {
        self.high
    }

    /// Number of distinct seeds in the range.
    pub fn len(&self) -> u32 {
        self.high - self.low
    }

    /// Always `false`: constructors reject empty ranges.
    pub fn is_empty(&self) -> bool {
        self.high == self.low
    }

    /// Whether `seed` lies inside the range.
    pub fn contains(&self, seed: LevelSeed) -> bool {
        seed.0 >= self.low && seed.0 < self.high
    }

    /// Whether this is the unbounded range.
    pub fn is_unbounded(&self) -> bool {
        *self == Self::unbounded()
    }
}

impl Default for LevelRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Display for LevelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}
