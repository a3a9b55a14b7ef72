//! Input event types consumed by the intake interval calculators.
//!
//! An intake computation takes three inputs: an [IntakeEvent] describing the
//! dosing cycle, a [ParameterSetEvent] carrying the resolved parameter values
//! for that cycle, and the residual concentrations carried over from the
//! previous cycle. The extraction of these events from a treatment timeline
//! is the job of upstream components; here they are plain immutable values.

pub mod event;
pub mod parameters;

pub use event::{AbsorptionModel, IntakeEvent};
pub use parameters::{Parameter, ParameterId, ParameterSetEvent};
