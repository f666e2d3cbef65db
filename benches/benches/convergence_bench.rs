//! # Convergence Benchmarks
//!
//! Measures a full move of the default 18-actuator rig on the simulated bus:
//! leg by leg, whole body, and legs on separate threads.
//!
//! Run: `cargo bench --bench convergence_bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId};
use hexa_actuator::{EventSink, Motion, Position, SharedBus, SimulatedBus};
use hexa_convergence::{ConvergenceController, RigConfig};

fn rig_bus(rig: &RigConfig, step: u16) -> SharedBus<SimulatedBus> {
    let mut sim = SimulatedBus::ax12a();
    for id in rig.actuator_ids().expect("default rig ids") {
        sim.add_servo(id, Position::new(0));
        sim.set_motion(id, Motion::Step(step));
    }
    SharedBus::new(sim)
}

/// Benchmark a move of the default rig
fn bench_rig_move(c: &mut Criterion) {
    let mut group = c.benchmark_group("rig_move");

    let rig = RigConfig::default();
    let command = rig.move_command().expect("default move");
    let controller = ConvergenceController::default();

    for step in [500u16, 100, 25] {
        group.bench_with_input(BenchmarkId::new("legs", step), &step, |b, &step| {
            b.iter(|| {
                let bus = rig_bus(&rig, step);
                let legs = rig.build_groups(&bus, &EventSink::with_history(0)).expect("legs");
                black_box(controller.run_groups(&legs, command).expect("converged"))
            })
        });

        group.bench_with_input(BenchmarkId::new("whole_body", step), &step, |b, &step| {
            b.iter(|| {
                let bus = rig_bus(&rig, step);
                let body = rig.whole_body(&bus, &EventSink::with_history(0)).expect("body");
                black_box(controller.run_group(&body, command).expect("converged"))
            })
        });

        group.bench_with_input(BenchmarkId::new("legs_concurrent", step), &step, |b, &step| {
            b.iter(|| {
                let bus = rig_bus(&rig, step);
                let legs = rig.build_groups(&bus, &EventSink::with_history(0)).expect("legs");
                black_box(controller.run_groups_concurrently(&legs, command).expect("converged"))
            })
        });
    }

    group.finish();
}

/// Benchmark event sink overhead per proxy call
fn bench_event_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_history");

    let rig = RigConfig::default();
    let command = rig.move_command().expect("default move");
    let controller = ConvergenceController::default();

    for history in [0usize, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, &history| {
            b.iter(|| {
                let bus = rig_bus(&rig, 100);
                let body = rig.whole_body(&bus, &EventSink::with_history(history)).expect("body");
                black_box(controller.run_group(&body, command).expect("converged"))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rig_move, bench_event_history);
criterion_main!(benches);
