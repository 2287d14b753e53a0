//! Per-episode variant resampling over a [`VecEngine`].
//!
//! A [`VariantMix`] is a weighted distribution over registered variant
//! names. [`MixtureEngine`] draws a variant for every slot on reset and
//! again for each slot whose episode ends, swapping the instance in
//! through [`VecEngine::reset_at_index`].

use std::error::Error;
use std::fmt;

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use herd_core::{SlotBuffers, StepBuffers, VecError};

use crate::vectorized::{DispatchError, VecEngine};

/// Stream id separating mixture draws from level seed draws on the
/// same base seed.
const MIX_STREAM: u64 = 1;

// ── VariantMix ─────────────────────────────────────────────────────

/// Weighted distribution over variant names.
#[derive(Clone, Debug)]
pub struct VariantMix {
    names: Vec<String>,
    weights: Vec<f64>,
    index: WeightedIndex<f64>,
}

impl VariantMix {
    /// Mix over `names` with the given (unnormalised) weights.
    ///
    /// # Errors
    ///
    /// [`VecError::InvalidArgument`] if `names` is empty, the lengths
    /// differ, or the weights are not a valid distribution.
    pub fn new<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        weights: &[f64],
    ) -> Result<Self, VecError> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(VecError::invalid_argument("variant mix needs at least one name"));
        }
        let (weights, index) = Self::build(names.len(), weights)?;
        Ok(Self {
            names,
            weights,
            index,
        })
    }

    /// Equal weight on every name.
    pub fn uniform<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self, VecError> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let weights = vec![1.0; names.len()];
        Self::new(names, &weights)
    }

    /// Replace the weights. The number of weights must not change.
    pub fn update_weights(&mut self, weights: &[f64]) -> Result<(), VecError> {
        let (weights, index) = Self::build(self.names.len(), weights)?;
        self.weights = weights;
        self.index = index;
        Ok(())
    }

    fn build(len: usize, weights: &[f64]) -> Result<(Vec<f64>, WeightedIndex<f64>), VecError> {
        if weights.len() != len {
            return Err(VecError::invalid_argument(format!(
                "got {} weights for {len} variants",
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(VecError::invalid_argument(format!(
                "weight {w} is not a finite non-negative number"
            )));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(VecError::invalid_argument("weights sum to zero"));
        }
        let normalised: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let index = WeightedIndex::new(&normalised)
            .map_err(|e| VecError::invalid_argument(format!("invalid weights: {e}")))?;
        Ok((normalised, index))
    }

    /// Draw one variant name.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.names[self.index.sample(rng)]
    }

    /// Variant names, in the order the weights refer to.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Normalised weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

// ── MixtureEngine ──────────────────────────────────────────────────

/// Result of one [`MixtureEngine::step`].
#[derive(Debug)]
pub struct MixtureStep {
    /// Filled step buffers. Observations of finished slots already show
    /// the first state of the newly drawn variant.
    pub buffers: StepBuffers,
    /// Variant each slot's step was taken on.
    pub variants: Vec<String>,
    /// Variant a finished slot switched to; `None` for slots still
    /// mid-episode.
    pub next_variants: Vec<Option<String>>,
}

/// Failure of one [`MixtureEngine::step`].
#[derive(Debug)]
pub enum MixtureStepError {
    /// The round was never dispatched; the caller's buffers are inside.
    Refused(DispatchError),
    /// The round ran but failed, or reinstalling a finished slot failed.
    Round(VecError),
}

impl MixtureStepError {
    /// The underlying engine error.
    pub fn error(&self) -> &VecError {
        match self {
            Self::Refused(refused) => &refused.error,
            Self::Round(error) => error,
        }
    }

    /// Buffers handed back by a refused dispatch.
    pub fn into_buffers(self) -> Option<StepBuffers> {
        match self {
            Self::Refused(refused) => Some(refused.into_buffers()),
            Self::Round(_) => None,
        }
    }
}

impl fmt::Display for MixtureStepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused(refused) => write!(f, "{refused}"),
            Self::Round(error) => write!(f, "mixture round failed: {error}"),
        }
    }
}

impl Error for MixtureStepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Refused(refused) => Some(refused),
            Self::Round(error) => Some(error),
        }
    }
}

impl From<DispatchError> for MixtureStepError {
    fn from(refused: DispatchError) -> Self {
        Self::Refused(refused)
    }
}

impl From<VecError> for MixtureStepError {
    fn from(error: VecError) -> Self {
        Self::Round(error)
    }
}

/// A [`VecEngine`] whose slots draw a fresh variant from a
/// [`VariantMix`] at every episode boundary.
pub struct MixtureEngine {
    engine: VecEngine,
    mix: VariantMix,
    rng: ChaCha8Rng,
    current: Vec<String>,
}

impl MixtureEngine {
    /// Wrap `engine`. Every name in `mix` must be registered.
    pub fn new(engine: VecEngine, mix: VariantMix) -> Result<Self, VecError> {
        if let Some(missing) = mix.names().iter().find(|n| !engine.registry().contains(n)) {
            return Err(VecError::NotFound {
                variant: missing.clone(),
            });
        }
        let mut rng = ChaCha8Rng::seed_from_u64(engine.config().rand_seed);
        rng.set_stream(MIX_STREAM);
        let current = (0..engine.num_envs())
            .map(|i| engine.variant(i).unwrap_or_default().to_string())
            .collect();
        Ok(Self {
            engine,
            mix,
            rng,
            current,
        })
    }

    /// Draw a variant for every slot, install it, and write the first
    /// observations into `obs`.
    pub fn reset(&mut self, obs: &mut [SlotBuffers]) -> Result<(), VecError> {
        for index in 0..self.engine.num_envs() {
            let name = self.mix.sample(&mut self.rng).to_string();
            self.engine.reset_at_index(obs, index, Some(&name))?;
            self.current[index] = name;
        }
        log::debug!("mixture reset: {:?}", self.current);
        self.engine.observe(obs)
    }

    /// Run one round, then resample and reinstall every finished slot.
    ///
    /// A refused dispatch returns `buffers` inside
    /// [`MixtureStepError::Refused`].
    pub fn step(
        &mut self,
        actions: &[i32],
        buffers: StepBuffers,
    ) -> Result<MixtureStep, MixtureStepError> {
        self.engine.step_async(actions, buffers)?;
        let mut buffers = self.engine.step_wait()?;

        let variants = self.current.clone();
        let mut next_variants = vec![None; variants.len()];
        for (index, next) in next_variants.iter_mut().enumerate() {
            if !buffers.dones[index] {
                continue;
            }
            let name = self.mix.sample(&mut self.rng).to_string();
            self.engine
                .reset_at_index(&mut buffers.slots, index, Some(&name))?;
            self.current[index] = name.clone();
            *next = Some(name);
        }
        Ok(MixtureStep {
            buffers,
            variants,
            next_variants,
        })
    }

    /// Replace the mixture weights for subsequent draws.
    pub fn update_weights(&mut self, weights: &[f64]) -> Result<(), VecError> {
        self.mix.update_weights(weights)
    }

    /// The current mixture.
    pub fn mix(&self) -> &VariantMix {
        &self.mix
    }

    /// Variant currently installed in each slot.
    pub fn current_variants(&self) -> &[String] {
        &self.current
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &VecEngine {
        &self.engine
    }

    /// The wrapped engine, mutably.
    pub fn engine_mut(&mut self) -> &mut VecEngine {
        &mut self.engine
    }

    /// Unwrap into the inner engine.
    pub fn into_inner(self) -> VecEngine {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VecConfig;
    use crate::registry::Registry;
    use herd_test_utils::{read_i32s, schema, CounterGame};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for name in ["coinrun", "bigfish", "ninja"] {
            registry.register(name, move || {
                Box::new(CounterGame::new(name).with_episode_len(2))
            });
        }
        registry
    }

    fn mixture(weights: &[f64]) -> MixtureEngine {
        let config = VecConfig {
            num_threads: Some(2),
            rand_seed: 11,
            ..VecConfig::new(4, "coinrun", schema())
        };
        let engine = VecEngine::new(config, registry()).unwrap();
        let mix = VariantMix::new(["coinrun", "bigfish", "ninja"], weights).unwrap();
        MixtureEngine::new(engine, mix).unwrap()
    }

    #[test]
    fn weights_are_normalised() {
        let mix = VariantMix::new(["a", "b"], &[1.0, 3.0]).unwrap();
        assert_eq!(mix.weights(), &[0.25, 0.75]);
        let uniform = VariantMix::uniform(["a", "b", "c", "d"]).unwrap();
        assert!(uniform.weights().iter().all(|w| (*w - 0.25).abs() < 1e-12));
    }

    #[test]
    fn invalid_weights_rejected() {
        assert!(VariantMix::new(Vec::<String>::new(), &[]).is_err());
        assert!(VariantMix::new(["a"], &[1.0, 1.0]).is_err());
        assert!(VariantMix::new(["a", "b"], &[0.0, 0.0]).is_err());
        assert!(VariantMix::new(["a", "b"], &[-1.0, 2.0]).is_err());

        let mut mix = VariantMix::uniform(["a", "b"]).unwrap();
        assert!(mix.update_weights(&[1.0]).is_err());
        assert_eq!(mix.weights(), &[0.5, 0.5]);
        mix.update_weights(&[0.0, 2.0]).unwrap();
        assert_eq!(mix.weights(), &[0.0, 1.0]);
    }

    #[test]
    fn degenerate_mix_always_samples_one_name() {
        let mix = VariantMix::new(["a", "b", "c"], &[0.0, 1.0, 0.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..100).all(|_| mix.sample(&mut rng) == "b"));
    }

    #[test]
    fn unregistered_mix_name_rejected() {
        let config = VecConfig::new(2, "coinrun", schema());
        let engine = VecEngine::new(config, registry()).unwrap();
        let mix = VariantMix::uniform(["coinrun", "chaser"]).unwrap();
        match MixtureEngine::new(engine, mix) {
            Err(VecError::NotFound { variant }) => assert_eq!(variant, "chaser"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("mixture accepted an unregistered variant"),
        }
    }

    #[test]
    fn reset_installs_sampled_variants() {
        let mut mixture = mixture(&[0.0, 0.0, 1.0]);
        let mut obs = SlotBuffers::batch(mixture.engine().schema(), 4);
        mixture.reset(&mut obs).unwrap();
        assert!(mixture.current_variants().iter().all(|v| v == "ninja"));
        assert!((0..4).all(|i| mixture.engine().variant(i) == Some("ninja")));
    }

    #[test]
    fn finished_slots_switch_variant() {
        let mut mixture = mixture(&[1.0, 0.0, 0.0]);
        let mut obs = SlotBuffers::batch(mixture.engine().schema(), 4);
        mixture.reset(&mut obs).unwrap();
        mixture.update_weights(&[0.0, 1.0, 0.0]).unwrap();

        let bufs = StepBuffers::for_schema(mixture.engine().schema(), 4);
        let first = mixture.step(&[1; 4], bufs).unwrap();
        assert!(first.next_variants.iter().all(Option::is_none));
        assert!(first.variants.iter().all(|v| v == "coinrun"));

        let second = mixture.step(&[1; 4], first.buffers).unwrap();
        assert_eq!(second.buffers.dones, vec![true; 4]);
        assert!(second.variants.iter().all(|v| v == "coinrun"));
        assert!(second
            .next_variants
            .iter()
            .all(|v| v.as_deref() == Some("bigfish")));
        for slot in &second.buffers.slots {
            assert_eq!(read_i32s(&slot.obs[0])[2], 0);
        }
        assert!((0..4).all(|i| mixture.engine().variant(i) == Some("bigfish")));
    }

    #[test]
    fn refused_step_hands_back_buffers() {
        let mut mixture = mixture(&[1.0, 0.0, 0.0]);
        let mut obs = SlotBuffers::batch(mixture.engine().schema(), 4);
        mixture.reset(&mut obs).unwrap();

        let mut bufs = StepBuffers::for_schema(mixture.engine().schema(), 4);
        bufs.rewards[2] = 42.0;
        let refused = mixture.step(&[1; 3], bufs.clone()).unwrap_err();
        assert!(matches!(refused.error(), VecError::InvalidArgument { .. }));
        assert_eq!(refused.into_buffers(), Some(bufs.clone()));

        assert!(!mixture.engine().is_awaiting(0));
        let step = mixture.step(&[1; 4], bufs).unwrap();
        assert_eq!(step.buffers.rewards, vec![1.0; 4]);
    }

    #[test]
    fn sampling_is_reproducible() {
        let draws = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mix = VariantMix::uniform(["a", "b", "c"]).unwrap();
            (0..32).map(|_| mix.sample(&mut rng).to_string()).collect::<Vec<_>>()
        };
        assert_eq!(draws(5), draws(5));
    }
}
