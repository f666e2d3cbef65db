//! # Retry Benchmarks
//!
//! Measures the cost of the retry loop against a flaky simulated bus.
//!
//! Run: `cargo bench --bench retry_bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId};
use hexa_actuator::{
    ActuatorError, ActuatorId, EventSink, FaultRule, Position, RegisterMap, ServoActuator, ServoConfig,
    SharedBus, SimulatedBus,
};
use hexa_convergence::{RetryPolicy, Watchdog};

/// Benchmark the bare retry loop
fn bench_retry_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_loop");
    let policy = RetryPolicy::forever();
    let watchdog = Watchdog::unbounded();

    for failures in [0u32, 1, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(failures), &failures, |b, &failures| {
            b.iter(|| {
                let mut left = failures;
                let done = policy.run(&watchdog, || {
                    if left > 0 {
                        left -= 1;
                        Err(ActuatorError::transport("timeout"))
                    } else {
                        Ok(())
                    }
                });
                black_box(done)
            })
        });
    }

    group.finish();
}

/// Benchmark a proxy set_goal through a bus that drops the first N writes
fn bench_flaky_set_goal(c: &mut Criterion) {
    let mut group = c.benchmark_group("flaky_set_goal");
    let policy = RetryPolicy::forever();
    let watchdog = Watchdog::unbounded();
    let id = ActuatorId::new(1).expect("valid id");
    let goal = RegisterMap::ax12a().goal_position;

    for failures in [0u32, 5, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(failures), &failures, |b, &failures| {
            b.iter(|| {
                let sim = SimulatedBus::ax12a()
                    .with_servo(id, Position::new(0))
                    .with_fault(FaultRule::transport().on(id).at(goal).times(failures));
                let servo = ServoActuator::new(id, SharedBus::new(sim), ServoConfig::default(), EventSink::with_history(0));
                black_box(policy.run(&watchdog, || servo.set_goal(Position::new(500))))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_retry_loop, bench_flaky_set_goal);
criterion_main!(benches);
