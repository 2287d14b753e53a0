//! The controller: a vector of instances stepped by a worker pool.
//!
//! [`VecEngine`] owns N [`Instance`]s, the shared [`Handoff`] unit and a
//! fixed [`WorkerPool`]. A round is one [`step_async()`](VecEngine::step_async)
//! followed by one [`step_wait()`](VecEngine::step_wait):
//!
//! ```text
//! Caller thread                         Workers
//!   step_async(actions, buffers)
//!     validate (no mutation on error)
//!     move instance + action + slot buffers into claims
//!     handoff.dispatch(claims) ───────────▶ next() → step() → release()
//!   ... caller does other work ...
//!   step_wait()
//!     handoff.wait_all() ◀──────────────── slot_released
//!     reinstall instances, reassemble buffers
//! ```
//!
//! # Ownership model
//!
//! While a slot is queued or in flight its instance and output buffers
//! live inside the claim, not in the engine. `render`, `observe` and
//! `reset` require every slot to be home, so they refuse to run while a
//! round is in flight. `reset_at_index` may run mid-round: it waits for
//! just the targeted slot to come back.
//!
//! # Failures
//!
//! Instance errors and panics are caught on the worker and carried back
//! in the claim. The round still drains completely; then the engine is
//! poisoned and every later operation returns the same
//! [`VecError::Fatal`]. Shutdown and drop still join all workers.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use herd_core::{
    InitContext, Instance, InstanceError, LevelRange, LevelSeed, SlotBuffers, SpaceSchema,
    StepBuffers, StepOutput, VecError,
};

use crate::config::{ConfigError, VecConfig};
use crate::handoff::{Claim, Handoff, SlotState};
use crate::metrics::{EngineTotals, RoundMetrics};
use crate::pool::{Task, WorkerPool};
use crate::registry::Registry;
use crate::seed::SeedGenerator;

// Compile-time assertion: the engine can be moved to another thread.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<VecEngine>();
    }
};

// ── Error / report types ───────────────────────────────────────────

/// A refused [`VecEngine::step_async`] call.
///
/// Carries the caller's buffers back untouched alongside the reason.
#[derive(Debug)]
pub struct DispatchError {
    /// Why the round was not dispatched.
    pub error: VecError,
    /// The buffers passed to `step_async`.
    pub buffers: StepBuffers,
}

impl DispatchError {
    /// Recover the buffers for reuse.
    pub fn into_buffers(self) -> StepBuffers {
        self.buffers
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step_async refused: {}", self.error)
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Report from [`VecEngine::shutdown`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Slots still queued or in flight when shutdown began.
    pub in_flight: usize,
    /// Number of worker threads joined cleanly.
    pub workers_joined: usize,
    /// Number of instances released.
    pub instances_released: usize,
}

// ── StepJob ────────────────────────────────────────────────────────

/// Everything a worker needs to step one slot, moved in by value.
pub(crate) struct StepJob {
    instance: Box<dyn Instance>,
    action: i32,
    slot: SlotBuffers,
    reward: f32,
    done: bool,
    outcome: Result<(), InstanceError>,
    elapsed: Duration,
}

impl Task for StepJob {
    fn run(&mut self) {
        let start = Instant::now();
        let Self {
            instance,
            action,
            slot,
            reward,
            done,
            ..
        } = self;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            instance.step(
                *action,
                StepOutput {
                    obs: slot.obs.as_mut_slice(),
                    info: slot.info.as_mut_slice(),
                    reward,
                    done,
                },
            )
        }));
        self.outcome = result.unwrap_or_else(|payload| {
            Err(InstanceError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        });
        self.elapsed = start.elapsed();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A slot's share of a round once its instance is back home.
struct SlotResult {
    slot: SlotBuffers,
    reward: f32,
    done: bool,
    outcome: Result<(), InstanceError>,
    elapsed: Duration,
}

impl StepJob {
    fn split(self) -> (Box<dyn Instance>, SlotResult) {
        (
            self.instance,
            SlotResult {
                slot: self.slot,
                reward: self.reward,
                done: self.done,
                outcome: self.outcome,
                elapsed: self.elapsed,
            },
        )
    }
}

struct Round {
    started: Instant,
    results: Vec<Option<SlotResult>>,
}

// ── VecEngine ──────────────────────────────────────────────────────

/// Vectorized driver owning N simulation instances and a worker pool.
///
/// Created from a [`VecConfig`] and a [`Registry`] via
/// [`new()`](VecEngine::new). Drive it from a single thread:
///
/// ```ignore
/// let mut engine = VecEngine::new(config, registry)?;
/// let mut obs = SlotBuffers::batch(engine.schema(), engine.num_envs());
/// engine.reset(&mut obs)?;
/// let mut bufs = StepBuffers::for_schema(engine.schema(), engine.num_envs());
/// for _ in 0..1000 {
///     engine.step_async(&actions, bufs)?;
///     bufs = engine.step_wait()?;
/// }
/// ```
pub struct VecEngine {
    instances: Vec<Option<Box<dyn Instance>>>,
    variants: Vec<String>,
    level_seeds: Vec<LevelSeed>,
    handoff: Arc<Handoff<StepJob>>,
    pool: WorkerPool<StepJob>,
    round: Option<Round>,
    seeds: SeedGenerator,
    registry: Registry,
    config: VecConfig,
    levels: LevelRange,
    first_reset: bool,
    poisoned: Option<VecError>,
    shut_down: bool,
    last_round: RoundMetrics,
    totals: EngineTotals,
}

impl VecEngine {
    /// Validate `config`, create and initialise every instance, and
    /// spawn the worker pool.
    ///
    /// Level seeds are assigned so that each run of `num_joint_games`
    /// consecutive slots shares one draw. On return nothing is queued
    /// and every worker is parked.
    pub fn new(config: VecConfig, registry: Registry) -> Result<Self, ConfigError> {
        config.validate()?;
        let levels = config.level_range()?;
        let n = config.env_count;

        let mut seeds = SeedGenerator::new(config.rand_seed, levels);
        let level_seeds = seeds.assign(n, config.num_joint_games);

        let mut instances = Vec::with_capacity(n);
        for (index, &level_seed) in level_seeds.iter().enumerate() {
            let mut instance =
                registry
                    .create(&config.variant)
                    .map_err(|_| ConfigError::UnknownVariant {
                        variant: config.variant.clone(),
                    })?;
            let ctx = InitContext {
                slot: index,
                variant: &config.variant,
                level_seed,
                levels,
            };
            instance
                .init(&ctx)
                .map_err(|e| ConfigError::InstanceInit {
                    index,
                    reason: e.to_string(),
                })?;
            instances.push(Some(instance));
        }

        let handoff = Arc::new(Handoff::new(n));
        debug_assert_eq!(handoff.slot_count(), n);
        let pool = WorkerPool::spawn(config.resolved_thread_count(), Arc::clone(&handoff))?;
        log::debug!(
            "engine up: {n} x '{}' on {} workers, levels {levels}, seed {}",
            config.variant,
            pool.worker_count(),
            config.rand_seed
        );

        Ok(Self {
            instances,
            variants: vec![config.variant.clone(); n],
            level_seeds,
            handoff,
            pool,
            round: None,
            seeds,
            registry,
            config,
            levels,
            first_reset: true,
            poisoned: None,
            shut_down: false,
            last_round: RoundMetrics::default(),
            totals: EngineTotals::default(),
        })
    }

    // ── Lifecycle operations ───────────────────────────────────────

    /// Bring every instance to its first-level state and write the
    /// initial observations into `obs`, one entry per slot.
    ///
    /// The first call only observes: construction already initialised
    /// every instance. Later calls draw fresh level seeds (honouring
    /// the joint-game grouping) and re-initialise every slot.
    ///
    /// # Errors
    ///
    /// [`VecError::InvalidState`] while a round is in flight;
    /// [`VecError::InvalidArgument`] if `obs` does not have one entry per
    /// slot with one buffer per observation space.
    pub fn reset(&mut self, obs: &mut [SlotBuffers]) -> Result<(), VecError> {
        self.check_usable()?;
        self.check_idle("reset")?;
        self.check_obs_buffers(obs)?;

        if self.first_reset {
            self.first_reset = false;
        } else {
            let seeds = self
                .seeds
                .assign(self.num_envs(), self.config.num_joint_games);
            for (index, level_seed) in seeds.into_iter().enumerate() {
                self.init_slot(index, level_seed)?;
            }
            self.totals.full_resets += 1;
        }

        for (instance, slot) in self.instances.iter().zip(obs.iter_mut()) {
            if let Some(instance) = instance {
                instance.observe(slot.obs.as_mut_slice());
            }
        }
        Ok(())
    }

    /// Dispatch one step of every instance and return immediately.
    ///
    /// `actions[i]` is applied to slot `i`; `buffers` is moved in and
    /// split per slot so each worker writes its own slot in place.
    /// Collect the filled buffers with [`step_wait()`](Self::step_wait).
    ///
    /// # Errors
    ///
    /// Validation happens before any instance is moved. On error nothing
    /// is queued and `buffers` is handed back inside [`DispatchError`]:
    /// [`VecError::InvalidState`] if the previous round has not been
    /// drained, [`VecError::InvalidArgument`] on any count mismatch.
    pub fn step_async(&mut self, actions: &[i32], buffers: StepBuffers) -> Result<(), DispatchError> {
        if let Err(error) = self.check_dispatch(actions, &buffers) {
            return Err(DispatchError { error, buffers });
        }

        let StepBuffers {
            slots,
            rewards,
            dones,
        } = buffers;
        let instances: Vec<Box<dyn Instance>> =
            self.instances.iter_mut().filter_map(Option::take).collect();
        debug_assert_eq!(instances.len(), actions.len());

        let claims: Vec<Claim<StepJob>> = instances
            .into_iter()
            .zip(slots)
            .zip(rewards.into_iter().zip(dones))
            .zip(actions)
            .enumerate()
            .map(|(index, (((instance, slot), (reward, done)), &action))| Claim {
                index,
                payload: StepJob {
                    instance,
                    action,
                    slot,
                    reward,
                    done,
                    outcome: Ok(()),
                    elapsed: Duration::ZERO,
                },
            })
            .collect();

        let started = Instant::now();
        if let Err((refused, claims)) = self.handoff.dispatch(claims) {
            let buffers = self.restore(claims);
            return Err(DispatchError {
                error: VecError::invalid_state(refused.to_string()),
                buffers,
            });
        }
        log::trace!("dispatched round of {}", self.num_envs());

        self.round = Some(Round {
            started,
            results: (0..self.num_envs()).map(|_| None).collect(),
        });
        Ok(())
    }

    /// Block until every slot dispatched by the matching
    /// [`step_async()`](Self::step_async) has finished, then return the
    /// filled buffers.
    ///
    /// # Errors
    ///
    /// [`VecError::InvalidState`] if no round is in flight;
    /// [`VecError::Fatal`] if any instance failed during the round (the
    /// round is still fully drained first) or the engine was already
    /// poisoned.
    pub fn step_wait(&mut self) -> Result<StepBuffers, VecError> {
        let Some(mut round) = self.round.take() else {
            return Err(self.poisoned.clone().unwrap_or_else(|| {
                VecError::invalid_state("step_wait called with no round in flight")
            }));
        };

        for claim in self.handoff.wait_all() {
            let (instance, result) = claim.payload.split();
            self.instances[claim.index] = Some(instance);
            round.results[claim.index] = Some(result);
        }

        let n = self.num_envs();
        let mut buffers = StepBuffers {
            slots: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            dones: Vec::with_capacity(n),
        };
        let mut step_times = Vec::with_capacity(n);
        let mut first_fault = None;
        let mut faults = 0;
        for (index, result) in round.results.into_iter().enumerate() {
            let Some(result) = result else {
                return Err(VecError::invalid_state(format!(
                    "slot {index} was not returned by its worker"
                )));
            };
            if let Err(error) = result.outcome {
                faults += 1;
                if first_fault.is_none() {
                    first_fault = Some(VecError::Fatal { index, error });
                }
            }
            buffers.slots.push(result.slot);
            buffers.rewards.push(result.reward);
            buffers.dones.push(result.done);
            step_times.push(result.elapsed);
        }

        self.last_round = RoundMetrics::from_steps(round.started.elapsed(), &step_times, faults);
        self.totals.rounds += 1;
        self.totals.steps += step_times.len() as u64;
        self.totals.faults += faults as u64;
        log::trace!(
            "round drained in {}us (slowest step {}us)",
            self.last_round.total_us,
            self.last_round.max_step_us
        );

        if let Some(fault) = first_fault {
            self.poison(fault);
        }
        match &self.poisoned {
            Some(err) => Err(err.clone()),
            None => Ok(buffers),
        }
    }

    /// Render every instance into `targets`, one buffer per slot.
    ///
    /// Returns `Ok(false)` if any instance does not support `mode`.
    ///
    /// # Errors
    ///
    /// [`VecError::InvalidState`] while a round is in flight;
    /// [`VecError::InvalidArgument`] if `targets` is not one per slot.
    pub fn render(&mut self, mode: &str, targets: &mut [Vec<u8>]) -> Result<bool, VecError> {
        self.check_usable()?;
        self.check_idle("render")?;
        if targets.len() != self.num_envs() {
            return Err(VecError::invalid_argument(format!(
                "render targets has {} entries, expected {}",
                targets.len(),
                self.num_envs()
            )));
        }
        let mut supported = true;
        for (instance, target) in self.instances.iter_mut().flatten().zip(targets.iter_mut()) {
            supported &= instance.render(mode, target);
        }
        Ok(supported)
    }

    /// Write the current observation of every instance into `obs`
    /// without changing any state.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`reset()`](Self::reset).
    pub fn observe(&self, obs: &mut [SlotBuffers]) -> Result<(), VecError> {
        self.check_usable()?;
        self.check_idle("observe")?;
        self.check_obs_buffers(obs)?;
        for (instance, slot) in self.instances.iter().zip(obs.iter_mut()) {
            if let Some(instance) = instance {
                instance.observe(slot.obs.as_mut_slice());
            }
        }
        Ok(())
    }

    /// Replace or re-initialise the instance at `index` with a freshly
    /// drawn level seed, and write its first observation into
    /// `obs[index]`.
    ///
    /// With `variant = Some(name)` a new instance is built through the
    /// registry; `None` keeps the current instance. If the slot is in
    /// flight, this blocks until its step finishes. That step's output
    /// is kept and still returned by the pending `step_wait`. Other slots
    /// are not touched.
    ///
    /// # Errors
    ///
    /// [`VecError::NotFound`] for an unknown variant (the slot keeps its
    /// previous instance); [`VecError::InvalidArgument`] for a bad index
    /// or buffer count.
    pub fn reset_at_index(
        &mut self,
        obs: &mut [SlotBuffers],
        index: usize,
        variant: Option<&str>,
    ) -> Result<(), VecError> {
        self.check_usable()?;
        self.check_index(index)?;
        self.check_obs_buffers(obs)?;
        let replacement = variant.map(|name| self.registry.create(name)).transpose()?;

        self.reclaim(index)?;
        let level_seed = self.seeds.next_level_seed();
        if let Some(instance) = replacement {
            log::debug!(
                "slot {index}: '{}' -> '{}'",
                self.variants[index],
                instance.variant()
            );
            self.variants[index] = instance.variant().to_string();
            self.instances[index] = Some(instance);
        }
        self.init_slot(index, level_seed)?;
        if let Some(instance) = &self.instances[index] {
            instance.observe(obs[index].obs.as_mut_slice());
        }
        self.totals.single_resets += 1;
        Ok(())
    }

    /// Re-initialise the instance at `index` on the given level, keeping
    /// its variant. Blocks like [`reset_at_index()`](Self::reset_at_index)
    /// if the slot is in flight. No seed is drawn from the generator.
    pub fn reset_start_level(&mut self, index: usize, level_seed: LevelSeed) -> Result<(), VecError> {
        self.check_usable()?;
        self.check_index(index)?;
        if level_seed.0 > LevelRange::UNBOUNDED_HIGH {
            return Err(VecError::invalid_argument(format!(
                "level seed {level_seed} exceeds {}",
                LevelRange::UNBOUNDED_HIGH
            )));
        }
        self.reclaim(index)?;
        self.init_slot(index, level_seed)?;
        self.totals.single_resets += 1;
        Ok(())
    }

    /// Stop the pool: wake every worker, let queued and in-flight steps
    /// finish, join every thread, then release every instance.
    ///
    /// Idempotent; also run by `Drop`. Afterwards every operation
    /// returns [`VecError::InvalidState`].
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        let start = Instant::now();
        let in_flight = self.handoff.awaiting_count();
        let workers_joined = self.pool.shutdown();

        for claim in self.handoff.wait_all() {
            let (instance, _) = claim.payload.split();
            self.instances[claim.index] = Some(instance);
        }
        self.round = None;
        self.shut_down = true;
        let instances_released = self.instances.iter_mut().filter_map(Option::take).count();

        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            in_flight,
            workers_joined,
            instances_released,
        };
        log::debug!("engine shut down: {report:?}");
        report
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Number of instances.
    pub fn num_envs(&self) -> usize {
        self.config.env_count
    }

    /// Number of worker threads (0 after shutdown).
    pub fn num_threads(&self) -> usize {
        self.pool.worker_count()
    }

    /// The tensor schema agreed at construction.
    pub fn schema(&self) -> &SpaceSchema {
        &self.config.schema
    }

    /// The configuration the engine was built from.
    pub fn config(&self) -> &VecConfig {
        &self.config
    }

    /// Range level seeds are drawn from.
    pub fn level_range(&self) -> LevelRange {
        self.levels
    }

    /// The instance registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Variant name occupying slot `index`.
    pub fn variant(&self, index: usize) -> Option<&str> {
        self.variants.get(index).map(String::as_str)
    }

    /// Level seed slot `index` was last initialised with.
    pub fn level_seed(&self, index: usize) -> Option<LevelSeed> {
        self.level_seeds.get(index).copied()
    }

    /// Level seeds of every slot, in slot order.
    pub fn level_seeds(&self) -> &[LevelSeed] {
        &self.level_seeds
    }

    /// Handoff state of slot `index`.
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.handoff.state_of(index)
    }

    /// Whether slot `index` is queued or in flight.
    pub fn is_awaiting(&self, index: usize) -> bool {
        self.slot_state(index).is_some_and(SlotState::is_awaiting)
    }

    /// Number of slots queued or in flight.
    pub fn awaiting_count(&self) -> usize {
        self.handoff.awaiting_count()
    }

    /// Number of claims waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.handoff.queued_count()
    }

    /// Whether a `step_async` has not yet been matched by `step_wait`.
    pub fn round_in_flight(&self) -> bool {
        self.round.is_some()
    }

    /// Metrics of the most recently drained round.
    pub fn last_round_metrics(&self) -> &RoundMetrics {
        &self.last_round
    }

    /// Lifetime counters.
    pub fn totals(&self) -> &EngineTotals {
        &self.totals
    }

    /// The fatal error that poisoned the engine, if any.
    pub fn poisoned(&self) -> Option<&VecError> {
        self.poisoned.as_ref()
    }

    // ── Internals ──────────────────────────────────────────────────

    fn check_usable(&self) -> Result<(), VecError> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        if self.shut_down || self.handoff.is_shutdown() {
            return Err(VecError::invalid_state("engine is shut down"));
        }
        Ok(())
    }

    fn check_idle(&self, op: &str) -> Result<(), VecError> {
        if self.round.is_some() {
            return Err(VecError::invalid_state(format!(
                "{op} called while a round is in flight"
            )));
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), VecError> {
        if index >= self.num_envs() {
            return Err(VecError::invalid_argument(format!(
                "index {index} out of range (num_envs={})",
                self.num_envs()
            )));
        }
        Ok(())
    }

    fn check_obs_buffers(&self, obs: &[SlotBuffers]) -> Result<(), VecError> {
        let n = self.num_envs();
        if obs.len() != n {
            return Err(VecError::invalid_argument(format!(
                "observation buffers has {} entries, expected {n}",
                obs.len()
            )));
        }
        let expected = self.config.schema.observation.len();
        if let Some((i, slot)) = obs.iter().enumerate().find(|(_, s)| s.obs.len() != expected) {
            return Err(VecError::invalid_argument(format!(
                "slot {i} has {} observation buffers, schema declares {expected}",
                slot.obs.len()
            )));
        }
        Ok(())
    }

    fn check_dispatch(&self, actions: &[i32], buffers: &StepBuffers) -> Result<(), VecError> {
        self.check_usable()?;
        if self.round.is_some() || self.handoff.awaiting_count() > 0 {
            return Err(VecError::invalid_state(
                "step_async called before the previous round was drained by step_wait",
            ));
        }
        let n = self.num_envs();
        for (what, len) in [
            ("actions", actions.len()),
            ("slot buffers", buffers.slots.len()),
            ("rewards", buffers.rewards.len()),
            ("dones", buffers.dones.len()),
        ] {
            if len != n {
                return Err(VecError::invalid_argument(format!(
                    "{what} has {len} entries, expected {n}"
                )));
            }
        }
        let schema = &self.config.schema;
        for (i, slot) in buffers.slots.iter().enumerate() {
            if slot.obs.len() != schema.observation.len() || slot.info.len() != schema.info.len() {
                return Err(VecError::invalid_argument(format!(
                    "slot {i} has {} obs / {} info buffers, schema declares {} / {}",
                    slot.obs.len(),
                    slot.info.len(),
                    schema.observation.len(),
                    schema.info.len()
                )));
            }
        }
        debug_assert!(self.instances.iter().all(Option::is_some));
        Ok(())
    }

    /// Bring slot `index` home, waiting for its step if it is in flight.
    fn reclaim(&mut self, index: usize) -> Result<(), VecError> {
        if self.instances[index].is_some() {
            return Ok(());
        }
        if self.is_awaiting(index) {
            log::trace!("slot {index} in flight; waiting to reclaim");
        }
        let job = self.handoff.wait_slot(index).ok_or_else(|| {
            VecError::invalid_state(format!("slot {index} is neither home nor in flight"))
        })?;
        let (instance, result) = job.split();
        self.instances[index] = Some(instance);
        if let Some(round) = &mut self.round {
            round.results[index] = Some(result);
        }
        Ok(())
    }

    fn init_slot(&mut self, index: usize, level_seed: LevelSeed) -> Result<(), VecError> {
        let levels = self.levels;
        let variant = self.variants[index].clone();
        let Some(instance) = self.instances[index].as_mut() else {
            return Err(VecError::invalid_state(format!("slot {index} is not home")));
        };
        let ctx = InitContext {
            slot: index,
            variant: &variant,
            level_seed,
            levels,
        };
        if let Err(error) = instance.init(&ctx) {
            self.totals.faults += 1;
            let fatal = VecError::Fatal { index, error };
            self.poison(fatal.clone());
            return Err(fatal);
        }
        self.level_seeds[index] = level_seed;
        Ok(())
    }

    /// Restore instances from refused claims and rebuild the caller's buffers.
    fn restore(&mut self, claims: Vec<Claim<StepJob>>) -> StepBuffers {
        let mut buffers = StepBuffers::default();
        for claim in claims {
            let (instance, result) = claim.payload.split();
            self.instances[claim.index] = Some(instance);
            buffers.slots.push(result.slot);
            buffers.rewards.push(result.reward);
            buffers.dones.push(result.done);
        }
        buffers
    }

    fn poison(&mut self, err: VecError) {
        if self.poisoned.is_none() {
            log::warn!("engine poisoned: {err}");
            self.poisoned = Some(err);
        }
    }
}

impl Drop for VecEngine {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_test_utils::{read_i32s, schema, CounterGame, FaultMode, FaultyGame, RGB_MODE};

    fn registry() -> Registry {
        Registry::new()
            .with("counter", || Box::new(CounterGame::new("counter")))
            .with("bigfish", || Box::new(CounterGame::new("bigfish")))
    }

    fn config(n: usize, threads: usize) -> VecConfig {
        VecConfig {
            num_threads: Some(threads),
            num_levels: 100,
            rand_seed: 7,
            ..VecConfig::new(n, "counter", schema())
        }
    }

    fn engine(n: usize, threads: usize) -> VecEngine {
        VecEngine::new(config(n, threads), registry()).unwrap()
    }

    fn run_round(engine: &mut VecEngine, actions: &[i32]) -> Result<StepBuffers, VecError> {
        let bufs = StepBuffers::for_schema(engine.schema(), engine.num_envs());
        engine.step_async(actions, bufs).map_err(|e| e.error)?;
        engine.step_wait()
    }

    #[test]
    fn construction_spawns_idle_pool() {
        let engine = engine(4, 2);
        assert_eq!(engine.num_envs(), 4);
        assert_eq!(engine.num_threads(), 2);
        assert_eq!(engine.awaiting_count(), 0);
        assert_eq!(engine.queued_count(), 0);
        assert!(!engine.round_in_flight());
        assert!((0..4).all(|i| engine.variant(i) == Some("counter")));
    }

    #[test]
    fn unknown_initial_variant_rejected() {
        let mut config = config(2, 1);
        config.variant = "ninja".into();
        match VecEngine::new(config, registry()) {
            Err(ConfigError::UnknownVariant { variant }) => assert_eq!(variant, "ninja"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("engine built with an unregistered variant"),
        }
    }

    #[test]
    fn reset_writes_initial_observations() {
        let mut engine = engine(3, 2);
        let mut obs = SlotBuffers::batch(engine.schema(), 3);
        engine.reset(&mut obs).unwrap();
        for (i, slot) in obs.iter().enumerate() {
            let state = read_i32s(&slot.obs[0]);
            assert_eq!(state[0], i as i32);
            assert_eq!(state[1] as u32, engine.level_seed(i).unwrap().0);
            assert_eq!(state[2], 0);
        }
        assert_eq!(engine.totals().full_resets, 0);
    }

    #[test]
    fn second_reset_draws_new_levels() {
        let mut engine = engine(4, 2);
        let mut obs = SlotBuffers::batch(engine.schema(), 4);
        engine.reset(&mut obs).unwrap();
        let before = engine.level_seeds().to_vec();
        engine.reset(&mut obs).unwrap();
        assert_eq!(engine.totals().full_resets, 1);
        assert!(engine.level_seeds().iter().all(|s| s.0 < 100));
        assert_ne!(before, engine.level_seeds());
    }

    #[test]
    fn round_applies_each_action_to_its_slot() {
        let mut engine = engine(4, 2);
        let bufs = run_round(&mut engine, &[3, 1, 4, 1]).unwrap();
        assert_eq!(bufs.rewards, vec![3.0, 1.0, 4.0, 1.0]);
        assert_eq!(bufs.dones, vec![false; 4]);
        for (i, slot) in bufs.slots.iter().enumerate() {
            assert_eq!(read_i32s(&slot.obs[0])[0], i as i32);
            assert_eq!(read_i32s(&slot.obs[0])[2], 1);
            assert_eq!(
                read_i32s(&slot.info[0])[0] as u32,
                engine.level_seed(i).unwrap().0
            );
        }
        assert_eq!(engine.awaiting_count(), 0);
        assert_eq!(engine.queued_count(), 0);
        assert_eq!(engine.totals().rounds, 1);
        assert_eq!(engine.totals().steps, 4);
        assert_eq!(engine.last_round_metrics().instances, 4);
    }

    #[test]
    fn second_step_async_refused_and_returns_buffers() {
        let mut engine = engine(2, 1);
        let bufs = StepBuffers::for_schema(engine.schema(), 2);
        engine.step_async(&[3, 9], bufs).unwrap();

        let extra = StepBuffers::for_schema(engine.schema(), 2);
        let refused = engine.step_async(&[5, 5], extra.clone()).unwrap_err();
        assert!(matches!(refused.error, VecError::InvalidState { .. }));
        assert_eq!(refused.into_buffers(), extra);

        let bufs = engine.step_wait().unwrap();
        assert_eq!(bufs.rewards, vec![3.0, 9.0]);
        assert_eq!(bufs.dones, vec![false, false]);
        for slot in &bufs.slots {
            assert_eq!(read_i32s(&slot.obs[0])[2], 1);
        }
        assert_eq!(engine.totals().rounds, 1);
    }

    #[test]
    fn mismatched_counts_refused_without_dispatch() {
        let mut engine = engine(3, 2);
        let bufs = StepBuffers::for_schema(engine.schema(), 3);
        let refused = engine.step_async(&[1, 2], bufs).unwrap_err();
        assert!(matches!(refused.error, VecError::InvalidArgument { .. }));
        assert_eq!(engine.awaiting_count(), 0);
        assert!(!engine.round_in_flight());

        let mut bufs = refused.into_buffers();
        bufs.slots[1].obs.clear();
        let refused = engine.step_async(&[1, 2, 3], bufs).unwrap_err();
        assert!(matches!(refused.error, VecError::InvalidArgument { .. }));

        let mut obs = SlotBuffers::batch(engine.schema(), 2);
        assert!(matches!(
            engine.reset(&mut obs),
            Err(VecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn step_wait_without_round_is_invalid_state() {
        let mut engine = engine(2, 1);
        assert!(matches!(
            engine.step_wait(),
            Err(VecError::InvalidState { .. })
        ));
    }

    #[test]
    fn render_reports_unsupported_modes() {
        let mut engine = engine(3, 1);
        let mut targets = vec![Vec::new(); 3];
        assert_eq!(engine.render(RGB_MODE, &mut targets), Ok(true));
        assert_eq!(targets[2], vec![2u8; 12]);
        assert_eq!(engine.render("ansi", &mut targets), Ok(false));
        assert!(matches!(
            engine.render(RGB_MODE, &mut targets[..2]),
            Err(VecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn render_and_observe_refused_mid_round() {
        let mut engine = engine(2, 1);
        let bufs = StepBuffers::for_schema(engine.schema(), 2);
        engine.step_async(&[0, 0], bufs).unwrap();

        let mut targets = vec![Vec::new(); 2];
        assert!(matches!(
            engine.render(RGB_MODE, &mut targets),
            Err(VecError::InvalidState { .. })
        ));
        let mut obs = SlotBuffers::batch(engine.schema(), 2);
        assert!(matches!(
            engine.observe(&mut obs),
            Err(VecError::InvalidState { .. })
        ));
        assert!(engine.step_wait().is_ok());
        assert!(engine.observe(&mut obs).is_ok());
    }

    #[test]
    fn reset_at_index_swaps_variant() {
        let mut engine = engine(3, 2);
        let mut obs = SlotBuffers::batch(engine.schema(), 3);
        engine.reset(&mut obs).unwrap();
        let before = engine.level_seeds().to_vec();
        let drawn = engine.seeds.drawn();

        engine.reset_at_index(&mut obs, 1, Some("bigfish")).unwrap();
        assert_eq!(engine.seeds.drawn(), drawn + 1);
        assert_eq!(engine.level_seeds()[0], before[0]);
        assert_eq!(engine.level_seeds()[2], before[2]);
        assert_eq!(engine.variant(1), Some("bigfish"));
        assert_eq!(engine.variant(0), Some("counter"));
        let state = read_i32s(&obs[1].obs[0]);
        assert_eq!(state[0], 1);
        assert_eq!(state[1] as u32, engine.level_seed(1).unwrap().0);
        assert_eq!(engine.totals().single_resets, 1);
    }

    #[test]
    fn reset_at_index_unknown_variant_keeps_slot() {
        let mut engine = engine(2, 1);
        let mut obs = SlotBuffers::batch(engine.schema(), 2);
        let seed = engine.level_seed(0);
        assert_eq!(
            engine.reset_at_index(&mut obs, 0, Some("ninja")),
            Err(VecError::NotFound {
                variant: "ninja".into()
            })
        );
        assert_eq!(engine.variant(0), Some("counter"));
        assert_eq!(engine.level_seed(0), seed);
        assert!(matches!(
            engine.reset_at_index(&mut obs, 2, None),
            Err(VecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn reset_at_index_mid_round_keeps_round_output() {
        let mut engine = engine(3, 1);
        let bufs = StepBuffers::for_schema(engine.schema(), 3);
        engine.step_async(&[5, 6, 7], bufs).unwrap();

        let mut obs = SlotBuffers::batch(engine.schema(), 3);
        engine.reset_at_index(&mut obs, 2, None).unwrap();
        assert_eq!(read_i32s(&obs[2].obs[0])[2], 0);

        let bufs = engine.step_wait().unwrap();
        assert_eq!(bufs.rewards, vec![5.0, 6.0, 7.0]);
        assert_eq!(read_i32s(&bufs.slots[2].obs[0])[2], 1);
    }

    #[test]
    fn reset_start_level_keeps_variant() {
        let mut engine = engine(2, 1);
        let mut obs = SlotBuffers::batch(engine.schema(), 2);
        engine.reset_at_index(&mut obs, 0, Some("bigfish")).unwrap();
        let drawn = engine.seeds.drawn();

        engine.reset_start_level(0, LevelSeed(1234)).unwrap();
        assert_eq!(engine.level_seed(0), Some(LevelSeed(1234)));
        assert_eq!(engine.variant(0), Some("bigfish"));
        assert_eq!(engine.seeds.drawn(), drawn);

        engine.observe(&mut obs).unwrap();
        assert_eq!(read_i32s(&obs[0].obs[0])[1], 1234);
        assert!(matches!(
            engine.reset_start_level(0, LevelSeed(u32::MAX)),
            Err(VecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn joint_games_share_level_seeds() {
        let config = VecConfig {
            num_joint_games: 2,
            num_levels: 0,
            ..config(6, 2)
        };
        let engine = VecEngine::new(config, registry()).unwrap();
        let seeds = engine.level_seeds();
        assert_eq!(seeds[0], seeds[1]);
        assert_eq!(seeds[2], seeds[3]);
        assert_eq!(seeds[4], seeds[5]);
    }

    fn faulty_engine(mode: FaultMode) -> VecEngine {
        let registry = Registry::new().with("faulty", move || {
            Box::new(FaultyGame::new("faulty", mode, 1, 0))
        });
        let config = VecConfig {
            num_threads: Some(2),
            ..VecConfig::new(3, "faulty", schema())
        };
        VecEngine::new(config, registry).unwrap()
    }

    #[test]
    fn step_error_poisons_after_full_drain() {
        let mut engine = faulty_engine(FaultMode::StepError);
        let err = run_round(&mut engine, &[0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            VecError::Fatal {
                index: 1,
                error: InstanceError::Failed { .. }
            }
        ));
        assert_eq!(engine.awaiting_count(), 0);
        assert_eq!(engine.last_round_metrics().faults, 1);

        let mut obs = SlotBuffers::batch(engine.schema(), 3);
        assert_eq!(engine.reset(&mut obs), Err(err.clone()));
        assert_eq!(engine.poisoned(), Some(&err));
        assert_eq!(engine.shutdown().workers_joined, 2);
    }

    #[test]
    fn step_panic_is_contained() {
        let mut engine = faulty_engine(FaultMode::StepPanic);
        match run_round(&mut engine, &[0, 0, 0]) {
            Err(VecError::Fatal {
                index: 1,
                error: InstanceError::Panicked { message },
            }) => assert!(message.contains("slot 1")),
            other => panic!("expected a contained panic, got {other:?}"),
        }
        assert!(engine.step_wait().unwrap_err().is_fatal());
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let mut engine = engine(4, 3);
        let report = engine.shutdown();
        assert_eq!(report.workers_joined, 3);
        assert_eq!(report.instances_released, 4);
        assert_eq!(report.in_flight, 0);
        assert_eq!(engine.shutdown(), ShutdownReport::default());
        assert_eq!(engine.num_threads(), 0);

        let mut obs = SlotBuffers::batch(engine.schema(), 4);
        assert!(matches!(
            engine.reset(&mut obs),
            Err(VecError::InvalidState { .. })
        ));
    }

    #[test]
    fn shutdown_mid_round_completes_in_flight_work() {
        let mut engine = engine(4, 2);
        let bufs = StepBuffers::for_schema(engine.schema(), 4);
        engine.step_async(&[1; 4], bufs).unwrap();
        let report = engine.shutdown();
        assert_eq!(report.workers_joined, 2);
        assert_eq!(report.instances_released, 4);
        assert_eq!(engine.awaiting_count(), 0);
    }
}
