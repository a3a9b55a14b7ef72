use thiserror::Error;

/// Errors produced while computing concentrations for one intake interval.
///
/// The two variants map onto the two failure classes of the analytical
/// calculators: inputs rejected before any computation starts, and outputs
/// rejected because the closed-form algebra broke down or produced a
/// physically invalid value. Callers must discard any partial output when an
/// error is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DosesolError {
    /// A required parameter is missing, non-finite, or outside its validity
    /// domain (e.g. a non-positive volume). Detected during validation, before
    /// any concentration is computed.
    #[error("bad parameters: {0}")]
    BadParameters(String),

    /// The computation produced an invalid concentration: a negative outgoing
    /// residual, or a denominator of a closed-form coefficient evaluated to
    /// exactly zero (degenerate characteristic roots).
    #[error("bad concentration: {0}")]
    BadConcentration(String),
}
