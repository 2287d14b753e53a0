//! End-to-end vectorized rollout example.
//!
//! Demonstrates: build profile → reset → step_async/step_wait loop →
//! per-slot reset → mixture resampling → shutdown.
//!
//! Run with `RUST_LOG=debug` to see engine lifecycle logging.

use herd_bench::{actions, counter_profile};
use herd_core::{SlotBuffers, StepBuffers};
use herd_engine::{MixtureEngine, VariantMix};

fn main() {
    env_logger::init();
    println!("=== Herd Vectorized Rollout ===\n");

    let envs = 8;
    let mut engine = counter_profile(envs, 4, 42).unwrap();
    println!(
        "{} instances on {} workers, levels {}",
        engine.num_envs(),
        engine.num_threads(),
        engine.level_range()
    );

    let mut obs = SlotBuffers::batch(engine.schema(), envs);
    engine.reset(&mut obs).unwrap();

    let mut bufs = StepBuffers::for_schema(engine.schema(), envs);
    let mut episodes = 0;
    let mut total_reward = 0.0f32;
    for round in 0..256 {
        engine.step_async(&actions(envs, round), bufs).unwrap();
        bufs = engine.step_wait().unwrap();
        total_reward += bufs.rewards.iter().sum::<f32>();
        episodes += bufs.dones.iter().filter(|d| **d).count();

        if round % 64 == 0 || round == 255 {
            let m = engine.last_round_metrics();
            println!(
                "  round {:>3}: total_reward={:>8.1}, episodes={:>3}, round={:>6}μs, slowest step={:>5}μs",
                round + 1,
                total_reward,
                episodes,
                m.total_us,
                m.max_step_us,
            );
        }
    }

    println!("\nResetting slot 3 onto a fresh level");
    engine.reset_at_index(&mut obs, 3, None).unwrap();
    println!("  slot 3 now on level {:?}", engine.level_seed(3));

    println!("\nMixture over one variant with per-episode resampling");
    let mix = VariantMix::uniform([herd_bench::VARIANT]).unwrap();
    let mut mixture = MixtureEngine::new(engine, mix).unwrap();
    mixture.reset(&mut obs).unwrap();
    let mut bufs = StepBuffers::for_schema(mixture.engine().schema(), envs);
    let mut switches = 0;
    for round in 0..128 {
        let step = mixture.step(&actions(envs, round), bufs).unwrap();
        switches += step.next_variants.iter().flatten().count();
        bufs = step.buffers;
    }
    println!("  {switches} variant draws at episode boundaries");

    let mut engine = mixture.into_inner();
    let totals = engine.totals().clone();
    let report = engine.shutdown();
    println!(
        "\nDone: {} rounds, {} steps, {} single resets; joined {} workers in {}ms",
        totals.rounds, totals.steps, totals.single_resets, report.workers_joined, report.total_ms
    );
}
