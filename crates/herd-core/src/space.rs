//! Space descriptors: the per-index schema agreed on at construction.
//!
//! A [`SpaceSchema`] lists one [`SpaceDescriptor`] per observation,
//! action, render and info tensor. The driver never inspects tensor
//! contents; it uses the schema only to count and size buffers.

use smallvec::SmallVec;

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Unsigned 8-bit integer (pixels, flags).
    U8,
    /// Signed 32-bit integer (discrete actions, level seeds).
    I32,
    /// 32-bit float.
    F32,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I32 | Self::F32 => 4,
        }
    }
}

/// Value domain of a tensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpaceKind {
    /// Bounded box, every element in `[low, high]`.
    Box {
        /// Lower bound of every element.
        low: f32,
        /// Upper bound of every element.
        high: f32,
    },
    /// Discrete choice in `0..n`.
    Discrete {
        /// Number of choices.
        n: u32,
    },
}

/// Shape, dtype and domain of one named tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct SpaceDescriptor {
    /// Name of the tensor (e.g. `"rgb"`, `"level_seed"`).
    pub name: String,
    /// Value domain.
    pub kind: SpaceKind,
    /// Element type.
    pub dtype: ScalarType,
    /// Dimensions, outermost first. An empty shape is a scalar.
    pub shape: SmallVec<[usize; 4]>,
}

impl SpaceDescriptor {
    /// A bounded box tensor.
    pub fn boxed(
        name: impl Into<String>,
        dtype: ScalarType,
        shape: &[usize],
        low: f32,
        high: f32,
    ) -> Self {
        Self {
            name: name.into(),
            kind: SpaceKind::Box { low, high },
            dtype,
            shape: SmallVec::from_slice(shape),
        }
    }

    /// A scalar discrete tensor with `n` choices, stored as `I32`.
    pub fn discrete(name: impl Into<String>, n: u32) -> Self {
        Self {
            name: name.into(),
            kind: SpaceKind::Discrete { n },
            dtype: ScalarType::I32,
            shape: SmallVec::new(),
        }
    }

    /// Number of elements (product of the shape; 1 for scalars).
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of bytes needed to hold one tensor of this space.
    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dtype.size_bytes()
    }

    /// Zero-filled buffer sized for this space.
    pub fn allocate(&self) -> Vec<u8> {
        vec![0u8; self.byte_len()]
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("space name must not be empty".into());
        }
        if self.shape.contains(&0) {
            return Err(format!("space '{}' has a zero-sized dimension", self.name));
        }
        match self.kind {
            SpaceKind::Box { low, high } => {
                if low.is_nan() || high.is_nan() || low > high {
                    return Err(format!(
                        "space '{}' has invalid bounds [{low}, {high}]",
                        self.name
                    ));
                }
            }
            SpaceKind::Discrete { n } => {
                if n == 0 {
                    return Err(format!("discrete space '{}' has no choices", self.name));
                }
            }
        }
        Ok(())
    }
}

/// The complete per-instance tensor schema.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpaceSchema {
    /// Observation tensors written by `init`/`step`/`observe`.
    pub observation: Vec<SpaceDescriptor>,
    /// Action tensors consumed by `step`.
    pub action: Vec<SpaceDescriptor>,
    /// Render targets written by `render`.
    pub render: Vec<SpaceDescriptor>,
    /// Info tensors written by `step`.
    pub info: Vec<SpaceDescriptor>,
}

impl SpaceSchema {
    /// Validate every descriptor and require at least one observation.
    pub fn validate(&self) -> Result<(), String> {
        if self.observation.is_empty() {
            return Err("schema declares no observation spaces".into());
        }
        for group in [&self.observation, &self.action, &self.render, &self.info] {
            for space in group {
                space.validate()?;
            }
            for (i, a) in group.iter().enumerate() {
                if group[i + 1..].iter().any(|b| b.name == a.name) {
                    return Err(format!("duplicate space name '{}'", a.name));
                }
            }
        }
        Ok(())
    }

    /// Index of the observation space called `name`.
    pub fn observation_index(&self, name: &str) -> Option<usize> {
        self.observation.iter().position(|s| s.name == name)
    }

    /// Index of the info space called `name`.
    pub fn info_index(&self, name: &str) -> Option<usize> {
        self.info.iter().position(|s| s.name == name)
    }
}
