use std::fmt;

use serde::{Deserialize, Serialize};

/// Way a dose is administered.
///
/// The absorption model selects which family of closed-form calculators is
/// able to handle an intake: intravascular bolus, extravascular (oral, with a
/// depot compartment), or constant-rate infusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbsorptionModel {
    /// Instantaneous input into the central compartment (IV bolus)
    Intravascular,
    /// First-order absorption through a depot compartment (e.g. oral)
    Extravascular,
    /// Constant-rate input over `infusion_duration` hours
    Infusion,
}

/// One discrete dosing event and the interval until the next dose.
///
/// An [IntakeEvent] carries everything a calculator needs to know about a
/// single cycle: the dose, the interval, the route, the infusion duration
/// (meaningful for [AbsorptionModel::Infusion] only), the number of sample
/// points requested within the interval, and the offset of the intake within
/// the overall timeline. It is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEvent {
    offset_time: f64,
    dose: f64,
    route: AbsorptionModel,
    interval: f64,
    infusion_duration: f64,
    nb_points: usize,
}

impl IntakeEvent {
    /// Create a new intake event
    ///
    /// # Arguments
    ///
    /// * `offset_time` - Offset of this intake within the timeline (hours)
    /// * `dose` - Quantity of drug administered
    /// * `route` - Route of administration
    /// * `interval` - Time until the next intake (hours)
    /// * `infusion_duration` - Duration of the infusion (hours); 0 unless the
    ///   route is [AbsorptionModel::Infusion]
    /// * `nb_points` - Number of sample points to compute within the interval
    pub fn new(
        offset_time: f64,
        dose: f64,
        route: AbsorptionModel,
        interval: f64,
        infusion_duration: f64,
        nb_points: usize,
    ) -> Self {
        IntakeEvent {
            offset_time,
            dose,
            route,
            interval,
            infusion_duration,
            nb_points,
        }
    }

    /// Get the offset of this intake within the timeline (hours)
    pub fn offset_time(&self) -> f64 {
        self.offset_time
    }

    /// Get the administered dose
    pub fn dose(&self) -> f64 {
        self.dose
    }

    /// Get the route of administration
    pub fn route(&self) -> AbsorptionModel {
        self.route
    }

    /// Get the time until the next intake (hours)
    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Get the infusion duration (hours)
    pub fn infusion_duration(&self) -> f64 {
        self.infusion_duration
    }

    /// Get the number of sample points requested within the interval
    pub fn nb_points(&self) -> usize {
        self.nb_points
    }
}

impl fmt::Display for IntakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.route {
            AbsorptionModel::Infusion => write!(
                f,
                "Infusion of {:.2} over {:.2} h at offset {:.2} h, interval {:.2} h",
                self.dose, self.infusion_duration, self.offset_time, self.interval
            ),
            _ => write!(
                f,
                "Dose of {:.2} at offset {:.2} h, interval {:.2} h",
                self.dose, self.offset_time, self.interval
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intake_event_accessors() {
        let intake = IntakeEvent::new(24.0, 250.0, AbsorptionModel::Infusion, 12.0, 1.5, 251);
        assert_eq!(intake.offset_time(), 24.0);
        assert_eq!(intake.dose(), 250.0);
        assert_eq!(intake.route(), AbsorptionModel::Infusion);
        assert_eq!(intake.interval(), 12.0);
        assert_eq!(intake.infusion_duration(), 1.5);
        assert_eq!(intake.nb_points(), 251);
    }

    #[test]
    fn intake_event_serde_round_trip() {
        let intake = IntakeEvent::new(0.0, 400.0, AbsorptionModel::Extravascular, 24.0, 0.0, 25);
        let json = serde_json::to_string(&intake).unwrap();
        let back: IntakeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(intake, back);
    }
}
