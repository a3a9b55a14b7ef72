//! The analytical intake-interval calculation engine.
//!
//! Given one [IntakeEvent](crate::data::IntakeEvent), a
//! [ParameterSetEvent](crate::data::ParameterSetEvent) and the residuals
//! carried over from the previous intake, the engine produces per-compartment
//! concentration curves over a set of pertinent times and the residuals to
//! carry into the next intake. Exponential terms shared between intakes with
//! identical interval, parameters and point count are memoized in an
//! [ExponentialCache](cache::ExponentialCache).

pub mod cache;
pub mod calculator;
pub mod pertinent_times;
pub mod registry;

use nalgebra::DVector;

/// Concentration curve of a single compartment, aligned with the times vector.
pub type Concentrations = Vec<f64>;

/// Per-compartment concentration curves, outer index = compartment.
pub type MultiCompConcentrations = Vec<Concentrations>;

/// Per-compartment concentrations (or amounts) carried across an intake
/// boundary, one entry per compartment of the model.
pub type Residuals = Vec<f64>;

/// Time offsets (hours) of the computed samples, relative to the timeline.
pub type TimeOffsets = Vec<f64>;

/// Positions used by the single-point call mode: the query time and the end
/// of the interval, in that order in the 2-point times vector.
pub(crate) const AT_TIME: usize = 0;
pub(crate) const AT_END_INTERVAL: usize = 1;

/// Precomputed exponential terms for one intake computation.
///
/// One vector per named decay rate of the model (e.g. `{Ke}`, or
/// `{Alpha, Beta, Gamma}`), each aligned with the pertinent-times vector.
/// Models address their terms through a `#[repr(usize)]` enum cast to an
/// index, so the container itself stays model-agnostic and cacheable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrecomputedExponentials {
    terms: Vec<DVector<f64>>,
}

impl PrecomputedExponentials {
    /// Create an empty container sized for `nb_terms` exponential terms.
    pub fn new(nb_terms: usize) -> Self {
        PrecomputedExponentials {
            terms: vec![DVector::zeros(0); nb_terms],
        }
    }

    /// Store the vector of one exponential term.
    pub fn set(&mut self, term: usize, values: DVector<f64>) {
        self.terms[term] = values;
    }

    /// Get the vector of one exponential term.
    pub fn term(&self, term: usize) -> &DVector<f64> {
        &self.terms[term]
    }

    /// Number of terms the container was sized for.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the container holds no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}
