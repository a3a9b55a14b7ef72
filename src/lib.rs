//! dosesol - analytical intake-interval concentration prediction.
//!
//! Given a dosing intake (dose, interval, absorption model), the resolved
//! pharmacokinetic parameters for that intake, and the residual
//! concentrations carried over from the previous intake, the calculators in
//! this crate produce per-compartment concentration curves from the
//! closed-form solutions of the linear one-, two- and three-compartment
//! models, and the residuals to carry into the next intake.
//!
//! Exponential terms are memoized across intakes sharing the same interval,
//! parameter values and point count, so steady dosing schedules only pay for
//! the exponentials once.
//!
//! ```
//! use dosesol::prelude::*;
//!
//! let intake = IntakeEvent::new(0.0, 200.0, AbsorptionModel::Intravascular, 12.0, 0.0, 25);
//! let parameters = ParameterSetEvent::new([(ParameterId::CL, 2.0), (ParameterId::V, 40.0)]);
//!
//! let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMacro>::new();
//! let prediction = calculator
//!     .calculate_intake_points(&intake, &parameters, &[0.0], false)
//!     .unwrap();
//!
//! // thread the residuals into the next intake
//! let next = calculator
//!     .calculate_intake_points(&intake, &parameters, prediction.residuals(), false)
//!     .unwrap();
//! assert!(next.residuals()[0] > prediction.residuals()[0]);
//! ```

pub mod data;
pub mod error;
pub mod simulator;

pub use crate::data::{AbsorptionModel, IntakeEvent, Parameter, ParameterId, ParameterSetEvent};
pub use crate::error::DosesolError;
pub use crate::simulator::cache::{
    CacheKey, ExponentialCache, LocalCache, NoCache, SharedCache,
};
pub use crate::simulator::calculator::{
    AnalyticalModel, IntakeCalculator, IntakeIntervalCalculator, IntervalPrediction,
    PointPrediction,
};
pub use crate::simulator::pertinent_times::{
    InfusionTimes, PeakTimes, PertinentTimes, StandardTimes,
};
pub use crate::simulator::registry::{default_collection, PkModel, PkModelCollection};
pub use crate::simulator::PrecomputedExponentials;

pub mod prelude {
    pub mod data {
        pub use crate::data::{
            AbsorptionModel, IntakeEvent, Parameter, ParameterId, ParameterSetEvent,
        };
    }
    pub mod simulator {
        pub use crate::simulator::cache::{
            CacheKey, ExponentialCache, LocalCache, NoCache, SharedCache,
        };
        pub use crate::simulator::calculator::{
            AnalyticalModel, IntakeCalculator, IntakeIntervalCalculator, IntervalPrediction,
            PointPrediction,
        };
        pub use crate::simulator::pertinent_times::{
            InfusionTimes, PeakTimes, PertinentTimes, StandardTimes,
        };
    }
    pub mod models {
        pub use crate::simulator::calculator::{
            OneCompartmentBolusMacro, OneCompartmentBolusMicro, OneCompartmentExtraMacro,
            OneCompartmentExtraMicro, OneCompartmentInfusionMacro, OneCompartmentInfusionMicro,
            ThreeCompartmentBolusMacro, ThreeCompartmentBolusMicro, ThreeCompartmentExtraMacro,
            ThreeCompartmentExtraMicro, ThreeCompartmentInfusionMacro,
            ThreeCompartmentInfusionMicro, TwoCompartmentBolusMacro, TwoCompartmentBolusMicro,
            TwoCompartmentExtraMacro, TwoCompartmentExtraMicro, TwoCompartmentInfusionMacro,
            TwoCompartmentInfusionMicro,
        };
    }

    pub use crate::data::*;
    pub use crate::error::DosesolError;
    pub use crate::simulator::registry::{
        default_collection, default_populate, PkModel, PkModelCollection,
    };
    pub use self::models::*;
    pub use self::simulator::*;
}
