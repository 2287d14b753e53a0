//! Integration test: shutdown safety, fault containment and seed
//! reproducibility.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use herd_core::{InstanceError, LevelSeed, SlotBuffers, StepBuffers, VecError};
use herd_engine::{Registry, VecConfig, VecEngine};
use herd_test_utils::{read_i32s, schema, CounterGame, FaultMode, FaultyGame};
use proptest::prelude::*;

fn counting_engine(envs: usize, threads: usize, drops: &Arc<AtomicUsize>) -> VecEngine {
    let drops = Arc::clone(drops);
    let registry = Registry::new().with("counter", move || {
        Box::new(
            CounterGame::new("counter")
                .with_step_delay(Duration::from_millis(15))
                .with_drop_counter(Arc::clone(&drops)),
        )
    });
    let config = VecConfig {
        num_threads: Some(threads),
        ..VecConfig::new(envs, "counter", schema())
    };
    VecEngine::new(config, registry).unwrap()
}

fn faulty_engine(mode: FaultMode, slot: usize, after: u32) -> VecEngine {
    let registry = Registry::new().with("faulty", move || {
        Box::new(FaultyGame::new("faulty", mode, slot, after))
    });
    let config = VecConfig {
        num_threads: Some(2),
        ..VecConfig::new(4, "faulty", schema())
    };
    VecEngine::new(config, registry).unwrap()
}

// ── Shutdown ───────────────────────────────────────────────────────

#[test]
fn drop_mid_round_releases_every_instance() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut engine = counting_engine(6, 2, &drops);
    let bufs = StepBuffers::for_schema(engine.schema(), 6);
    engine.step_async(&[0; 6], bufs).unwrap();
    drop(engine);
    assert_eq!(drops.load(Ordering::SeqCst), 6);
}

#[test]
fn explicit_shutdown_reports_and_releases() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut engine = counting_engine(5, 3, &drops);
    let bufs = StepBuffers::for_schema(engine.schema(), 5);
    engine.step_async(&[0; 5], bufs).unwrap();

    let report = engine.shutdown();
    assert_eq!(report.workers_joined, 3);
    assert_eq!(report.instances_released, 5);
    assert_eq!(drops.load(Ordering::SeqCst), 5);

    drop(engine);
    assert_eq!(drops.load(Ordering::SeqCst), 5);
}

#[test]
fn replaced_instances_are_dropped_immediately() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut engine = counting_engine(2, 1, &drops);
    let mut obs = SlotBuffers::batch(engine.schema(), 2);
    engine.reset_at_index(&mut obs, 0, Some("counter")).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

// ── Fault containment ──────────────────────────────────────────────

#[test]
fn panicking_instance_poisons_engine_after_drain() {
    let mut engine = faulty_engine(FaultMode::StepPanic, 2, 1);
    let mut bufs = StepBuffers::for_schema(engine.schema(), 4);
    engine.step_async(&[1; 4], bufs).unwrap();
    bufs = engine.step_wait().unwrap();

    engine.step_async(&[1; 4], bufs).unwrap();
    let err = engine.step_wait().unwrap_err();
    assert!(matches!(
        err,
        VecError::Fatal {
            index: 2,
            error: InstanceError::Panicked { .. }
        }
    ));
    assert_eq!(engine.awaiting_count(), 0);
    assert_eq!(engine.totals().faults, 1);

    let bufs = StepBuffers::for_schema(engine.schema(), 4);
    let refused = engine.step_async(&[0; 4], bufs).unwrap_err();
    assert_eq!(refused.error, err);
    let mut obs = SlotBuffers::batch(engine.schema(), 4);
    assert_eq!(engine.reset_at_index(&mut obs, 0, None), Err(err.clone()));
    assert_eq!(engine.reset_start_level(0, LevelSeed(1)), Err(err));

    assert_eq!(engine.shutdown().workers_joined, 2);
}

#[test]
fn failing_reinit_is_fatal() {
    let mut engine = faulty_engine(FaultMode::InitError, 0, 1);
    let mut obs = SlotBuffers::batch(engine.schema(), 4);
    let err = engine.reset_at_index(&mut obs, 0, None).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(engine.poisoned(), Some(&err));
    assert_eq!(engine.reset(&mut obs), Err(err));
}

// ── Reproducibility ────────────────────────────────────────────────

fn rollout(seed: u64, envs: usize, joint: usize) -> (Vec<LevelSeed>, Vec<Vec<i32>>) {
    let registry = Registry::new().with("counter", || {
        Box::new(CounterGame::new("counter").with_episode_len(2))
    });
    let config = VecConfig {
        num_threads: Some(2),
        num_levels: 50,
        start_level: 10,
        rand_seed: seed,
        num_joint_games: joint,
        ..VecConfig::new(envs, "counter", schema())
    };
    let mut engine = VecEngine::new(config, registry).unwrap();
    let initial = engine.level_seeds().to_vec();

    let mut played = Vec::new();
    let mut bufs = StepBuffers::for_schema(engine.schema(), envs);
    for _ in 0..5 {
        engine.step_async(&vec![0; envs], bufs).unwrap();
        bufs = engine.step_wait().unwrap();
        played.push(bufs.slots.iter().map(|s| read_i32s(&s.info[0])[0]).collect());
    }
    (initial, played)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn identical_config_reproduces_levels(seed in any::<u64>(), groups in 1usize..4, joint in 1usize..3) {
        let envs = groups * joint;
        let (seeds_a, played_a) = rollout(seed, envs, joint);
        let (seeds_b, played_b) = rollout(seed, envs, joint);
        prop_assert_eq!(&seeds_a, &seeds_b);
        prop_assert_eq!(played_a, played_b);
        for s in &seeds_a {
            prop_assert!((10..60).contains(&s.0));
        }
        for group in seeds_a.chunks(joint) {
            prop_assert!(group.iter().all(|s| *s == group[0]));
        }
    }
}
