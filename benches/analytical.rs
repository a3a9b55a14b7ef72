use criterion::{criterion_group, criterion_main, Criterion};
use dosesol::prelude::*;
use dosesol::{LocalCache, NoCache};
use std::hint::black_box;

fn regimen() -> (IntakeEvent, ParameterSetEvent) {
    let intake = IntakeEvent::new(0.0, 500.0, AbsorptionModel::Infusion, 12.0, 1.5, 201);
    let parameters = ParameterSetEvent::new([
        (ParameterId::CL, 3.0),
        (ParameterId::Q, 8.0),
        (ParameterId::V1, 20.0),
        (ParameterId::V2, 32.0),
    ]);
    (intake, parameters)
}

fn steady_dosing<C: ExponentialCache>(
    calculator: &mut IntakeIntervalCalculator<TwoCompartmentInfusionMacro, C>,
    n: usize,
) {
    let (intake, parameters) = regimen();
    let mut residuals = vec![0.0; 2];
    for _ in 0..n {
        let prediction = calculator
            .calculate_intake_points(&intake, &parameters, &residuals, false)
            .unwrap();
        residuals = prediction.into_residuals();
    }
    black_box(residuals);
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("infusion 50 intakes cached", |b| {
        b.iter(|| {
            let mut calculator = IntakeIntervalCalculator::<
                TwoCompartmentInfusionMacro,
                LocalCache,
            >::with_cache(LocalCache::new());
            steady_dosing(&mut calculator, black_box(50));
        })
    });

    c.bench_function("infusion 50 intakes uncached", |b| {
        b.iter(|| {
            let mut calculator =
                IntakeIntervalCalculator::<TwoCompartmentInfusionMacro, NoCache>::with_cache(
                    NoCache,
                );
            steady_dosing(&mut calculator, black_box(50));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
