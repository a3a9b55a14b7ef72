//! The analytical calculator: per-model kernels and the generic driver.
//!
//! Every call runs the same sequence: validate the inputs and derive the
//! micro-constants (building the per-call kernel), select the pertinent
//! times, resolve the exponential terms through the cache, combine residuals,
//! dose and exponentials into concentrations, and finally extract and check
//! the outgoing residuals. Kernels are plain values built per call, so a
//! calculator carries no mutable state besides its cache.

pub mod one_compartment_models;
pub mod three_compartment_models;
pub mod two_compartment_models;

use std::marker::PhantomData;

use nalgebra::{dvector, DVector};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::data::{IntakeEvent, ParameterId, ParameterSetEvent};
use crate::error::DosesolError;
use crate::simulator::cache::{CacheKey, ExponentialCache, LocalCache};
use crate::simulator::pertinent_times::PertinentTimes;
use crate::simulator::{MultiCompConcentrations, PrecomputedExponentials, Residuals, TimeOffsets};

pub use one_compartment_models::*;
pub use three_compartment_models::*;
pub use two_compartment_models::*;

/// Closed-form kernel of one absorption model.
///
/// A kernel is built per call by [validate](AnalyticalModel::validate), which
/// checks the inputs and derives the micro-constants (rate constants, roots
/// of the characteristic polynomial). All remaining methods are pure
/// functions of the kernel, so a kernel never outlives the call it was built
/// for and two calls can never observe each other's state.
pub trait AnalyticalModel: Sized {
    /// Number of compartments carried in the residual vector.
    const RESIDUAL_SIZE: usize;

    /// Strategy selecting the pertinent times for this model.
    type Times: PertinentTimes;

    /// The parameter ids this model requires.
    fn parameters_id() -> &'static [ParameterId];

    /// Check the inputs and derive the kernel for one call.
    ///
    /// Fails with [DosesolError::BadParameters] when a required parameter is
    /// missing, non-finite, or outside its validity domain. No computation is
    /// attempted on failure.
    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError>;

    /// The pertinent-times strategy of this kernel.
    fn times(&self) -> Self::Times;

    /// Compute one exponential vector per named decay rate, aligned with
    /// `times`.
    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials;

    /// Full-curve compute: per-compartment concentrations over the pertinent
    /// times, plus the outgoing residuals.
    ///
    /// When `is_all` is false only the central compartment curve is filled;
    /// the residuals always cover every compartment.
    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError>;

    /// Single-point compute: concentrations at the query time (first entry of
    /// the 2-point exponentials) plus the residuals at the interval boundary
    /// (second entry).
    fn compute_concentration(
        &self,
        at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError>;
}

/// Concentration curves over one intake interval, with the residuals to carry
/// into the next intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalPrediction {
    times: TimeOffsets,
    concentrations: MultiCompConcentrations,
    residuals: Residuals,
}

impl IntervalPrediction {
    /// Sample times, shifted by the intake's offset within the timeline.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Concentration curve of one compartment (empty unless requested with
    /// `is_all` for compartments beyond the central one).
    pub fn concentrations(&self, compartment: usize) -> &[f64] {
        &self.concentrations[compartment]
    }

    /// All per-compartment curves.
    pub fn all_concentrations(&self) -> &MultiCompConcentrations {
        &self.concentrations
    }

    /// Outgoing residuals, one per compartment.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Consume the prediction, keeping only the outgoing residuals.
    pub fn into_residuals(self) -> Residuals {
        self.residuals
    }
}

/// Concentration at a single query time, with the residuals at the interval
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPrediction {
    concentrations: Vec<f64>,
    residuals: Residuals,
}

impl PointPrediction {
    /// Concentration of the central compartment at the query time.
    pub fn concentration(&self) -> f64 {
        self.concentrations[0]
    }

    /// Per-compartment concentrations at the query time (length 1 unless
    /// requested with `is_all`).
    pub fn concentrations(&self) -> &[f64] {
        &self.concentrations
    }

    /// Residuals at the interval boundary, one per compartment.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Consume the prediction, keeping only the outgoing residuals.
    pub fn into_residuals(self) -> Residuals {
        self.residuals
    }
}

/// Object-safe face of a calculator, so concrete models can be boxed behind a
/// registry keyed by absorption model.
pub trait IntakeCalculator {
    /// Number of compartments in the residual vectors.
    fn residual_size(&self) -> usize;

    /// The parameter ids the underlying model requires.
    fn parameters_id(&self) -> &'static [ParameterId];

    /// Compute the whole curve over the intake interval.
    fn calculate_intake_points(
        &mut self,
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<IntervalPrediction, DosesolError>;

    /// Compute the concentration at one query time within the interval, plus
    /// the residuals at the interval boundary.
    fn calculate_intake_single_point(
        &mut self,
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
        in_residuals: &[f64],
        at_time: f64,
        is_all: bool,
    ) -> Result<PointPrediction, DosesolError>;
}

/// Generic driver running the call sequence for one kernel type.
///
/// The cache is the only state; it is supplied at construction and owned
/// exclusively by this calculator (use
/// [SharedCache](crate::simulator::cache::SharedCache) to pool one cache
/// across calculators).
pub struct IntakeIntervalCalculator<M: AnalyticalModel, C: ExponentialCache = LocalCache> {
    cache: C,
    model: PhantomData<M>,
}

impl<M: AnalyticalModel> IntakeIntervalCalculator<M, LocalCache> {
    /// Create a calculator with its own private cache.
    pub fn new() -> Self {
        Self::with_cache(LocalCache::new())
    }
}

impl<M: AnalyticalModel> Default for IntakeIntervalCalculator<M, LocalCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: AnalyticalModel, C: ExponentialCache> IntakeIntervalCalculator<M, C> {
    /// Create a calculator around an injected cache.
    pub fn with_cache(cache: C) -> Self {
        IntakeIntervalCalculator {
            cache,
            model: PhantomData,
        }
    }

    /// Borrow the cache (e.g. to read hit counters).
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Compute the whole curve over the intake interval.
    pub fn calculate_intake_points(
        &mut self,
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<IntervalPrediction, DosesolError> {
        let model = M::validate(intake, parameters)?;
        check_residual_count(in_residuals, M::RESIDUAL_SIZE)?;

        let nb_points = intake.nb_points();
        let mut times = DVector::zeros(nb_points);
        model.times().calculate_times(intake, nb_points, &mut times);

        let key = CacheKey::new(intake.interval(), parameters, nb_points);
        let exponentials = match self.cache.get(&key) {
            Some(exponentials) => exponentials,
            None => {
                let exponentials = model.compute_exponentials(&times);
                self.cache.insert(key, exponentials.clone());
                exponentials
            }
        };

        let (concentrations, residuals) =
            model.compute_concentrations(&exponentials, in_residuals, is_all)?;
        check_residuals(&residuals)?;

        let times = times.iter().map(|t| t + intake.offset_time()).collect();
        Ok(IntervalPrediction {
            times,
            concentrations,
            residuals,
        })
    }

    /// Compute the concentration at `at_time` within the interval, plus the
    /// residuals at the interval boundary.
    ///
    /// The query time is not part of the cache key, so this path recomputes
    /// its two exponential samples on every call.
    pub fn calculate_intake_single_point(
        &mut self,
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
        in_residuals: &[f64],
        at_time: f64,
        is_all: bool,
    ) -> Result<PointPrediction, DosesolError> {
        let model = M::validate(intake, parameters)?;
        check_residual_count(in_residuals, M::RESIDUAL_SIZE)?;

        let times = dvector![at_time, intake.interval()];
        let exponentials = model.compute_exponentials(&times);

        let (concentrations, residuals) =
            model.compute_concentration(at_time, &exponentials, in_residuals, is_all)?;
        check_residuals(&residuals)?;

        Ok(PointPrediction {
            concentrations,
            residuals,
        })
    }
}

impl<M: AnalyticalModel, C: ExponentialCache> IntakeCalculator
    for IntakeIntervalCalculator<M, C>
{
    fn residual_size(&self) -> usize {
        M::RESIDUAL_SIZE
    }

    fn parameters_id(&self) -> &'static [ParameterId] {
        M::parameters_id()
    }

    fn calculate_intake_points(
        &mut self,
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<IntervalPrediction, DosesolError> {
        IntakeIntervalCalculator::calculate_intake_points(
            self,
            intake,
            parameters,
            in_residuals,
            is_all,
        )
    }

    fn calculate_intake_single_point(
        &mut self,
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
        in_residuals: &[f64],
        at_time: f64,
        is_all: bool,
    ) -> Result<PointPrediction, DosesolError> {
        IntakeIntervalCalculator::calculate_intake_single_point(
            self,
            intake,
            parameters,
            in_residuals,
            at_time,
            is_all,
        )
    }
}

fn check_residual_count(in_residuals: &[f64], expected: usize) -> Result<(), DosesolError> {
    if in_residuals.len() != expected {
        error!(
            got = in_residuals.len(),
            expected, "input residual count does not match the model"
        );
        return Err(DosesolError::BadParameters(format!(
            "expected {} input residuals, got {}",
            expected,
            in_residuals.len()
        )));
    }
    Ok(())
}

/// Outgoing residuals must be finite and non-negative for every model.
fn check_residuals(residuals: &[f64]) -> Result<(), DosesolError> {
    for (compartment, residual) in residuals.iter().enumerate() {
        if !residual.is_finite() || *residual < 0.0 {
            error!(compartment, residual, "invalid outgoing residual");
            return Err(DosesolError::BadConcentration(format!(
                "the residual of compartment {} is invalid ({})",
                compartment, residual
            )));
        }
    }
    Ok(())
}

/// Fetch a required parameter, failing with [DosesolError::BadParameters]
/// when absent.
pub fn required_parameter(
    parameters: &ParameterSetEvent,
    id: ParameterId,
) -> Result<f64, DosesolError> {
    parameters.value(id).ok_or_else(|| {
        error!(parameter = %id, "missing required parameter");
        DosesolError::BadParameters(format!("missing required parameter {}", id))
    })
}

/// A value that must be finite (doses, rates of the test models).
pub fn check_valid_value(value: f64, name: &str) -> Result<(), DosesolError> {
    if value.is_nan() {
        error!(name, "value is NaN");
        return Err(DosesolError::BadParameters(format!("{} is NaN", name)));
    }
    if value.is_infinite() {
        error!(name, "value is infinite");
        return Err(DosesolError::BadParameters(format!("{} is infinite", name)));
    }
    Ok(())
}

/// A value that must be finite and non-negative (doses, infusion durations,
/// characteristic roots).
pub fn check_positive_value(value: f64, name: &str) -> Result<(), DosesolError> {
    check_valid_value(value, name)?;
    if value < 0.0 {
        error!(name, value, "value is negative");
        return Err(DosesolError::BadParameters(format!(
            "{} is negative ({})",
            name, value
        )));
    }
    Ok(())
}

/// A value that must be finite and strictly positive (volumes, rate
/// constants, bioavailability).
pub fn check_strictly_positive_value(value: f64, name: &str) -> Result<(), DosesolError> {
    check_valid_value(value, name)?;
    if value <= 0.0 {
        error!(name, value, "value is not greater than zero");
        return Err(DosesolError::BadParameters(format!(
            "{} is not greater than zero ({})",
            name, value
        )));
    }
    Ok(())
}

/// A denominator of a closed-form coefficient: exactly zero means degenerate
/// characteristic roots, reported as [DosesolError::BadConcentration].
pub fn check_divider(value: f64, name: &str) -> Result<(), DosesolError> {
    if value == 0.0 {
        error!(name, "dividing by zero");
        return Err(DosesolError::BadConcentration(format!(
            "{}: dividing by zero",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AbsorptionModel;

    fn bolus_intake(nb_points: usize) -> IntakeEvent {
        IntakeEvent::new(
            0.0,
            200.0,
            AbsorptionModel::Intravascular,
            12.0,
            0.0,
            nb_points,
        )
    }

    fn bolus_parameters() -> ParameterSetEvent {
        ParameterSetEvent::new([(ParameterId::V, 20.0), (ParameterId::Ke, 0.1)])
    }

    #[test]
    fn identical_intakes_share_one_cache_entry() {
        let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let intake = bolus_intake(25);
        let first = calculator
            .calculate_intake_points(&intake, &bolus_parameters(), &[0.0], false)
            .unwrap();
        // a second parameter set with equal values, built independently
        let second = calculator
            .calculate_intake_points(&intake, &bolus_parameters(), first.residuals(), false)
            .unwrap();
        assert_eq!(calculator.cache().hits(), 1);
        assert_eq!(calculator.cache().misses(), 1);
        assert_eq!(calculator.cache().len(), 1);
        assert!(second.residuals()[0] > first.residuals()[0]);
    }

    #[test]
    fn output_times_carry_the_intake_offset() {
        let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let intake = IntakeEvent::new(48.0, 200.0, AbsorptionModel::Intravascular, 12.0, 0.0, 3);
        let prediction = calculator
            .calculate_intake_points(&intake, &bolus_parameters(), &[0.0], false)
            .unwrap();
        assert_eq!(prediction.times(), &[48.0, 54.0, 60.0]);
    }

    #[test]
    fn residual_count_mismatch_is_rejected() {
        let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let result = calculator.calculate_intake_points(
            &bolus_intake(5),
            &bolus_parameters(),
            &[0.0, 0.0],
            false,
        );
        assert!(matches!(result, Err(DosesolError::BadParameters(_))));
    }

    #[test]
    fn negative_incoming_residual_yields_bad_concentration() {
        let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let intake = IntakeEvent::new(0.0, 0.0, AbsorptionModel::Intravascular, 12.0, 0.0, 5);
        let result =
            calculator.calculate_intake_points(&intake, &bolus_parameters(), &[-5.0], false);
        assert!(matches!(result, Err(DosesolError::BadConcentration(_))));
    }
}
