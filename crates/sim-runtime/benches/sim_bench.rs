use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use sim_core::{PeriodOutcome, SimulationParameters, SimulationState};

fn params(target: i64) -> SimulationParameters {
    SimulationParameters::new(
        Decimal::new(10_000, 0),
        Decimal::new(1_000, 2),
        Decimal::new(1_500, 2),
        Decimal::new(target, 0),
        Decimal::new(10, 2),
    )
    .unwrap()
}

fn bench_step(c: &mut Criterion) {
    let p = params(1_000_000);
    let state = SimulationState::initial(&p);
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    c.bench_function("sim_step", |b| {
        b.iter(|| black_box(sim_core::step(black_box(state), &p, &mut rng)))
    });
}

fn bench_run(c: &mut Criterion) {
    c.bench_function("sim 240 months", |b| {
        b.iter(|| {
            let summary = sim_runtime::run_to_completion(
                params(1_000_000_000),
                ChaCha8Rng::seed_from_u64(42),
                Some(240),
                sim_runtime::CallbackSink(|o: &PeriodOutcome| {
                    black_box(o);
                }),
            );
            black_box(summary)
        })
    });
}

criterion_group!(benches, bench_step, bench_run);
criterion_main!(benches);
