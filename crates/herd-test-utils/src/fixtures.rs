//! Scripted instances for driver testing.
//!
//! - [`CounterGame`]: deterministic episodes of fixed length, reward
//!   equal to the action, auto re-initialisation on a fresh level.
//! - [`ProbeGame`]: a [`CounterGame`] that reports overlapping steps to a
//!   shared [`ConcurrencyProbe`].
//! - [`GatedGame`]: blocks one slot's step until the test opens its gate.
//! - [`FaultyGame`]: errors or panics on a chosen slot after N calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use herd_core::{InitContext, Instance, InstanceError, LevelRange, LevelSeed, StepOutput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{write_i32s, RGB_MODE};

// ── CounterGame ────────────────────────────────────────────────────

/// Deterministic instance with fixed-length episodes.
///
/// Each step earns `action as f32`. After `episode_len` steps the episode
/// ends: `done` is set and the game re-initialises itself on a level
/// drawn from its own seeded stream within the configured range. The
/// `level_seed` info tensor reports the level the step was played on.
pub struct CounterGame {
    variant: String,
    slot: usize,
    level_seed: LevelSeed,
    levels: LevelRange,
    tick: u32,
    episode_len: u32,
    episodes: u32,
    inits: u32,
    rng: ChaCha8Rng,
    step_delay: Option<Duration>,
    drops: Option<Arc<AtomicUsize>>,
}

impl CounterGame {
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            slot: 0,
            level_seed: LevelSeed(0),
            levels: LevelRange::unbounded(),
            tick: 0,
            episode_len: 5,
            episodes: 0,
            inits: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
            step_delay: None,
            drops: None,
        }
    }

    pub fn with_episode_len(mut self, len: u32) -> Self {
        self.episode_len = len.max(1);
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Increment `counter` when this instance is dropped.
    pub fn with_drop_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.drops = Some(counter);
        self
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn level_seed(&self) -> LevelSeed {
        self.level_seed
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    pub fn inits(&self) -> u32 {
        self.inits
    }

    fn write_state(&self, obs: &mut [Vec<u8>]) {
        if let Some(state) = obs.first_mut() {
            write_i32s(
                state,
                &[self.slot as i32, self.level_seed.0 as i32, self.tick as i32],
            );
        }
    }
}

impl Instance for CounterGame {
    fn variant(&self) -> &str {
        &self.variant
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), InstanceError> {
        self.slot = ctx.slot;
        self.level_seed = ctx.level_seed;
        self.levels = ctx.levels;
        self.tick = 0;
        self.inits += 1;
        self.rng = ChaCha8Rng::seed_from_u64(u64::from(ctx.level_seed.0));
        Ok(())
    }

    fn step(&mut self, action: i32, out: StepOutput<'_>) -> Result<(), InstanceError> {
        if let Some(delay) = self.step_delay {
            thread::sleep(delay);
        }
        let played = self.level_seed;
        self.tick += 1;
        *out.reward = action as f32;
        *out.done = self.tick >= self.episode_len;
        if *out.done {
            self.episodes += 1;
            self.tick = 0;
            self.level_seed = LevelSeed(self.rng.random_range(self.levels.low()..self.levels.high()));
        }
        if let Some(info) = out.info.first_mut() {
            write_i32s(info, &[played.0 as i32]);
        }
        self.write_state(out.obs);
        Ok(())
    }

    fn observe(&self, obs: &mut [Vec<u8>]) {
        self.write_state(obs);
    }

    fn render(&mut self, mode: &str, target: &mut Vec<u8>) -> bool {
        if mode != RGB_MODE {
            return false;
        }
        target.clear();
        target.resize(12, self.slot as u8);
        true
    }
}

impl Drop for CounterGame {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ── ProbeGame ──────────────────────────────────────────────────────

/// Shared record of step concurrency across a batch of [`ProbeGame`]s.
#[derive(Clone)]
pub struct ConcurrencyProbe {
    inner: Arc<ProbeState>,
}

struct ProbeState {
    entered: Vec<AtomicBool>,
    active: AtomicUsize,
    peak: AtomicUsize,
    overlaps: AtomicUsize,
    steps: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new(slots: usize) -> Self {
        Self {
            inner: Arc::new(ProbeState {
                entered: (0..slots).map(|_| AtomicBool::new(false)).collect(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                overlaps: AtomicUsize::new(0),
                steps: AtomicUsize::new(0),
            }),
        }
    }

    /// Highest number of steps observed running at once.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Times a slot was entered while already being stepped.
    pub fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    pub fn steps(&self) -> usize {
        self.inner.steps.load(Ordering::SeqCst)
    }

    fn enter(&self, slot: usize) {
        if let Some(flag) = self.inner.entered.get(slot) {
            if flag.swap(true, Ordering::SeqCst) {
                self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, slot: usize) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.steps.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = self.inner.entered.get(slot) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// A [`CounterGame`] whose steps are recorded by a [`ConcurrencyProbe`].
pub struct ProbeGame {
    game: CounterGame,
    probe: ConcurrencyProbe,
    hold: Duration,
}

impl ProbeGame {
    pub fn new(variant: impl Into<String>, probe: ConcurrencyProbe, hold: Duration) -> Self {
        Self {
            game: CounterGame::new(variant),
            probe,
            hold,
        }
    }
}

impl Instance for ProbeGame {
    fn variant(&self) -> &str {
        self.game.variant()
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), InstanceError> {
        self.game.init(ctx)
    }

    fn step(&mut self, action: i32, out: StepOutput<'_>) -> Result<(), InstanceError> {
        let slot = self.game.slot();
        self.probe.enter(slot);
        thread::sleep(self.hold);
        let result = self.game.step(action, out);
        self.probe.exit(slot);
        result
    }

    fn observe(&self, obs: &mut [Vec<u8>]) {
        self.game.observe(obs);
    }

    fn render(&mut self, mode: &str, target: &mut Vec<u8>) -> bool {
        self.game.render(mode, target)
    }
}

// ── GatedGame ──────────────────────────────────────────────────────

/// Instance-side half of a gate: announces entry, then waits for release.
#[derive(Clone)]
pub struct Gate {
    slot: usize,
    entered: Sender<usize>,
    release: Receiver<()>,
}

/// Test-side half of a gate.
pub struct GateHandle {
    entered: Receiver<usize>,
    release: Sender<()>,
}

impl Gate {
    /// A gate that blocks steps of `slot` only.
    pub fn new(slot: usize) -> (Gate, GateHandle) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        (
            Gate {
                slot,
                entered: entered_tx,
                release: release_rx,
            },
            GateHandle {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl GateHandle {
    /// Wait until the gated slot has started a step.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        match self.entered.recv_timeout(timeout) {
            Ok(_) => true,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Let one blocked step finish.
    pub fn open(&self) {
        let _ = self.release.send(());
    }
}

/// A [`CounterGame`] whose steps on the gated slot block until released.
pub struct GatedGame {
    game: CounterGame,
    gate: Gate,
}

impl GatedGame {
    pub fn new(variant: impl Into<String>, gate: Gate) -> Self {
        Self {
            game: CounterGame::new(variant),
            gate,
        }
    }
}

impl Instance for GatedGame {
    fn variant(&self) -> &str {
        self.game.variant()
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), InstanceError> {
        self.game.init(ctx)
    }

    fn step(&mut self, action: i32, out: StepOutput<'_>) -> Result<(), InstanceError> {
        if self.game.slot() == self.gate.slot {
            let _ = self.gate.entered.send(self.gate.slot);
            let _ = self.gate.release.recv();
        }
        self.game.step(action, out)
    }

    fn observe(&self, obs: &mut [Vec<u8>]) {
        self.game.observe(obs);
    }

    fn render(&mut self, mode: &str, target: &mut Vec<u8>) -> bool {
        self.game.render(mode, target)
    }
}

// ── FaultyGame ─────────────────────────────────────────────────────

/// How a [`FaultyGame`] misbehaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultMode {
    /// `step` returns an error.
    StepError,
    /// `step` panics.
    StepPanic,
    /// `init` returns an error.
    InitError,
}

/// A [`CounterGame`] that fails on one slot once `after` calls of the
/// faulting operation have succeeded there.
pub struct FaultyGame {
    game: CounterGame,
    mode: FaultMode,
    slot: usize,
    after: u32,
    calls: u32,
}

impl FaultyGame {
    pub fn new(variant: impl Into<String>, mode: FaultMode, slot: usize, after: u32) -> Self {
        Self {
            game: CounterGame::new(variant),
            mode,
            slot,
            after,
            calls: 0,
        }
    }

    fn trips(&mut self, slot: usize) -> bool {
        if slot != self.slot {
            return false;
        }
        self.calls += 1;
        self.calls > self.after
    }
}

impl Instance for FaultyGame {
    fn variant(&self) -> &str {
        self.game.variant()
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<(), InstanceError> {
        if self.mode == FaultMode::InitError && self.trips(ctx.slot) {
            return Err(InstanceError::failed(format!(
                "init refused on slot {}",
                ctx.slot
            )));
        }
        self.game.init(ctx)
    }

    fn step(&mut self, action: i32, out: StepOutput<'_>) -> Result<(), InstanceError> {
        let slot = self.game.slot();
        let mode = self.mode;
        match mode {
            FaultMode::StepError if self.trips(slot) => {
                Err(InstanceError::failed(format!("step failed on slot {slot}")))
            }
            FaultMode::StepPanic if self.trips(slot) => {
                panic!("step panicked on slot {slot}")
            }
            _ => self.game.step(action, out),
        }
    }

    fn observe(&self, obs: &mut [Vec<u8>]) {
        self.game.observe(obs);
    }

    fn render(&mut self, mode: &str, target: &mut Vec<u8>) -> bool {
        self.game.render(mode, target)
    }
}
