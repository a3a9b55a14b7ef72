//! Tests built on a synthetic asymptotic model: each intake moves the
//! residual a fixed fraction of the way towards the dose, which gives simple
//! closed-form oracles for residual propagation and steady state.

use dosesol::prelude::*;
use dosesol::simulator::{MultiCompConcentrations, PrecomputedExponentials, Residuals};
use nalgebra::DVector;

use approx::assert_relative_eq;

/// Piecewise-linear single-compartment model converging towards the dose.
///
/// Over one interval the concentration ramps from the incoming residual up
/// to `lastC = r0 + (D - r0) * R` at `tPeak`, down again over the middle
/// phase, and back up to `lastC` at the end of the interval, so the residual
/// sequence satisfies `r_{n+1} = r_n + (D - r_n) * R`.
#[derive(Debug, Clone)]
struct PkAsymptotic {
    d: f64,
    r: f64,
    t_peak: f64,
    int: f64,
    nb_points: usize,
}

const EXP_TIMES: usize = 0;

impl PkAsymptotic {
    fn compute(&self, exponentials: &PrecomputedExponentials, in_residuals: &[f64]) -> Vec<f64> {
        let times = exponentials.term(EXP_TIMES);
        let r0 = in_residuals[0];
        let last_c = r0 + (self.d - r0) * self.r;
        let diff = last_c - r0;
        times
            .iter()
            .map(|t| {
                if *t <= self.t_peak {
                    r0 + diff * (t / self.t_peak)
                } else if *t <= self.int - self.t_peak {
                    last_c - diff * (t - self.t_peak) / (self.int - 2.0 * self.t_peak)
                } else {
                    r0 + diff * (t - self.int + self.t_peak) / self.t_peak
                }
            })
            .collect()
    }
}

impl AnalyticalModel for PkAsymptotic {
    const RESIDUAL_SIZE: usize = 1;
    type Times = PeakTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[ParameterId::TestR, ParameterId::TestT]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let r = parameters
            .value(ParameterId::TestR)
            .ok_or_else(|| DosesolError::BadParameters("missing TestR".into()))?;
        let t_peak = parameters
            .value(ParameterId::TestT)
            .ok_or_else(|| DosesolError::BadParameters("missing TestT".into()))?;
        if !intake.dose().is_finite() || intake.dose() < 0.0 {
            return Err(DosesolError::BadParameters("the dose is invalid".into()));
        }
        if !r.is_finite() || !t_peak.is_finite() {
            return Err(DosesolError::BadParameters(
                "the convergence rate or peak time is invalid".into(),
            ));
        }
        Ok(PkAsymptotic {
            d: intake.dose(),
            r,
            t_peak,
            int: intake.interval(),
            nb_points: intake.nb_points(),
        })
    }

    fn times(&self) -> PeakTimes {
        PeakTimes::new(self.t_peak)
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        // no exponential decay here, the sample times are the only input
        let mut exponentials = PrecomputedExponentials::new(1);
        exponentials.set(EXP_TIMES, times.clone());
        exponentials
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        _is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        let concentrations = self.compute(exponentials, in_residuals);
        let residuals = vec![concentrations[self.nb_points - 1]];
        Ok((vec![concentrations], residuals))
    }

    fn compute_concentration(
        &self,
        _at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        _is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        let concentrations = self.compute(exponentials, in_residuals);
        Ok((vec![concentrations[0]], vec![concentrations[1]]))
    }
}

fn intake(nb_points: usize) -> IntakeEvent {
    IntakeEvent::new(0.0, 20.0, AbsorptionModel::Intravascular, 24.0, 0.0, nb_points)
}

fn parameters() -> ParameterSetEvent {
    ParameterSetEvent::new([(ParameterId::TestR, 0.25), (ParameterId::TestT, 2.0)])
}

#[test]
fn residual_sequence_matches_the_recurrence() {
    let mut calculator = IntakeIntervalCalculator::<PkAsymptotic>::new();
    let dose = 20.0;
    let rate = 0.25;

    let mut residual = 0.0;
    let mut expected = 0.0;
    for _ in 0..50 {
        let prediction = calculator
            .calculate_intake_points(&intake(25), &parameters(), &[residual], false)
            .unwrap();
        expected += (dose - expected) * rate;
        residual = prediction.residuals()[0];
        assert_relative_eq!(residual, expected, max_relative = 1e-12);
    }

    // converged towards the dose
    assert_relative_eq!(residual, dose, max_relative = 1e-5);
}

#[test]
fn steady_state_is_reached_monotonically() {
    let mut calculator = IntakeIntervalCalculator::<PkAsymptotic>::new();
    let mut previous = 0.0;
    for _ in 0..30 {
        let prediction = calculator
            .calculate_intake_points(&intake(25), &parameters(), &[previous], false)
            .unwrap();
        let residual = prediction.residuals()[0];
        assert!(residual > previous);
        assert!(residual < 20.0);
        previous = residual;
    }
}

#[test]
fn boundary_point_counts_have_closed_form_times() {
    let mut calculator = IntakeIntervalCalculator::<PkAsymptotic>::new();

    let one = calculator
        .calculate_intake_points(&intake(1), &parameters(), &[0.0], false)
        .unwrap();
    assert_eq!(one.times(), &[24.0]);

    let two = calculator
        .calculate_intake_points(&intake(2), &parameters(), &[0.0], false)
        .unwrap();
    assert_eq!(two.times(), &[0.0, 24.0]);

    let three = calculator
        .calculate_intake_points(&intake(3), &parameters(), &[0.0], false)
        .unwrap();
    assert_eq!(three.times(), &[0.0, 12.0, 24.0]);
}

#[test]
fn single_point_residual_equals_full_curve_residual() {
    let mut calculator = IntakeIntervalCalculator::<PkAsymptotic>::new();
    let full = calculator
        .calculate_intake_points(&intake(25), &parameters(), &[3.0], false)
        .unwrap();
    let single = calculator
        .calculate_intake_single_point(&intake(25), &parameters(), &[3.0], 0.0, false)
        .unwrap();
    assert_relative_eq!(
        single.residuals()[0],
        full.residuals()[0],
        max_relative = 1e-9
    );
    assert_relative_eq!(
        single.concentration(),
        full.concentrations(0)[0],
        max_relative = 1e-9
    );
}

#[test]
fn peak_is_sampled_at_the_requested_time() {
    let mut calculator = IntakeIntervalCalculator::<PkAsymptotic>::new();
    let prediction = calculator
        .calculate_intake_points(&intake(24), &parameters(), &[0.0], false)
        .unwrap();
    // the first phase ends exactly at tPeak where the curve tops out
    let times = prediction.times();
    let curve = prediction.concentrations(0);
    let peak_value = curve.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let at_peak_time = times
        .iter()
        .position(|t| (*t - 2.0).abs() < 1e-12)
        .expect("tPeak must be sampled");
    assert_relative_eq!(curve[at_peak_time], peak_value, max_relative = 1e-12);
}
