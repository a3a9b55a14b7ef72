//! Selection of the sampling times within one intake interval.
//!
//! Each calculator family picks the strategy that matches the shape of its
//! concentration curve: bolus and extravascular models sample linearly,
//! infusion models densify the infusion phase, and peaked curves sample the
//! three phases around the peak proportionally.

use nalgebra::DVector;

use crate::data::IntakeEvent;

/// Strategy deciding which time offsets within the interval are worth
/// sampling.
///
/// `calculate_times` fills a caller-allocated vector of length `nb_points`
/// with offsets in hours spanning `[0, interval]`, monotonically
/// non-decreasing. `nb_points >= 1` is a precondition; there is no error
/// path.
pub trait PertinentTimes {
    /// Fill `times` with `nb_points` offsets for the given intake.
    fn calculate_times(&self, intake: &IntakeEvent, nb_points: usize, times: &mut DVector<f64>);
}

/// Linear spacing over the whole interval.
///
/// Used by the bolus and extravascular calculators. A single point samples
/// the end of the interval (residual-only queries).
pub struct StandardTimes;

impl PertinentTimes for StandardTimes {
    fn calculate_times(&self, intake: &IntakeEvent, nb_points: usize, times: &mut DVector<f64>) {
        let interval = intake.interval();
        if nb_points == 1 {
            times[0] = interval;
            return;
        }
        for i in 0..nb_points {
            times[i] = i as f64 / (nb_points - 1) as f64 * interval;
        }
    }
}

/// Spacing split at the end of the infusion.
///
/// Used by the infusion calculators: at least two points cover the infusion
/// phase, the rest are spread linearly over the post-infusion phase, keeping
/// the time deltas as even as possible.
pub struct InfusionTimes;

impl PertinentTimes for InfusionTimes {
    fn calculate_times(&self, intake: &IntakeEvent, nb_points: usize, times: &mut DVector<f64>) {
        let interval = intake.interval();
        let infusion_time = intake.infusion_duration().min(interval);

        if nb_points == 1 {
            times[0] = interval;
            return;
        }
        if nb_points == 2 {
            times[0] = 0.0;
            times[1] = interval;
            return;
        }

        let post_time = interval - infusion_time;
        let nb_infus = nb_points
            .min(2.max((infusion_time / interval * nb_points as f64) as usize));
        let nb_post = nb_points - nb_infus;

        for i in 0..nb_infus {
            times[i] = i as f64 / (nb_infus - 1) as f64 * infusion_time;
        }
        for i in 0..nb_post {
            times[i + nb_infus] = infusion_time + (i + 1) as f64 / nb_post as f64 * post_time;
        }
    }
}

/// Three-phase spacing around a concentration peak.
///
/// Splits the interval into `[0, tPeak]`, `(tPeak, interval - tPeak)` and
/// `[interval - tPeak, interval]`, allocating points proportionally to phase
/// duration with a minimum of two points in the peak-adjacent phases.
pub struct PeakTimes {
    t_peak: f64,
}

impl PeakTimes {
    /// Create the strategy for a curve peaking at `t_peak` hours.
    pub fn new(t_peak: f64) -> Self {
        PeakTimes { t_peak }
    }
}

impl PertinentTimes for PeakTimes {
    fn calculate_times(&self, intake: &IntakeEvent, nb_points: usize, times: &mut DVector<f64>) {
        let interval = intake.interval();

        if nb_points == 1 {
            times[0] = interval;
            return;
        }
        if nb_points == 2 {
            times[0] = 0.0;
            times[1] = interval;
            return;
        }
        if nb_points == 3 {
            times[0] = 0.0;
            times[1] = interval / 2.0;
            times[2] = interval;
            return;
        }

        let t_peak = self.t_peak;
        let middle_time = interval - 2.0 * t_peak;

        let nb_before_peak = nb_points
            .min(2.max((t_peak / interval * nb_points as f64) as usize));
        let nb_middle = nb_points.saturating_sub(2 * nb_before_peak);

        for i in 0..nb_before_peak {
            times[i] = i as f64 / (nb_before_peak - 1) as f64 * t_peak;
        }
        for i in 0..nb_middle {
            times[i + nb_before_peak] =
                t_peak + (i + 1) as f64 / (nb_middle + 1) as f64 * middle_time;
        }
        for i in 0..nb_before_peak {
            times[i + nb_before_peak + nb_middle] =
                interval - t_peak + i as f64 / (nb_before_peak - 1) as f64 * t_peak;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AbsorptionModel;
    use approx::assert_relative_eq;

    fn intake(interval: f64, infusion_duration: f64, nb_points: usize) -> IntakeEvent {
        let route = if infusion_duration > 0.0 {
            AbsorptionModel::Infusion
        } else {
            AbsorptionModel::Intravascular
        };
        IntakeEvent::new(0.0, 100.0, route, interval, infusion_duration, nb_points)
    }

    fn times_of(strategy: &dyn PertinentTimes, intake: &IntakeEvent, nb_points: usize) -> Vec<f64> {
        let mut times = DVector::zeros(nb_points);
        strategy.calculate_times(intake, nb_points, &mut times);
        times.iter().copied().collect()
    }

    #[test]
    fn standard_boundary_cases() {
        let event = intake(12.0, 0.0, 1);
        assert_eq!(times_of(&StandardTimes, &event, 1), vec![12.0]);
        assert_eq!(times_of(&StandardTimes, &event, 2), vec![0.0, 12.0]);
        assert_eq!(times_of(&StandardTimes, &event, 3), vec![0.0, 6.0, 12.0]);
    }

    #[test]
    fn standard_is_linear() {
        let event = intake(24.0, 0.0, 25);
        let times = times_of(&StandardTimes, &event, 25);
        for (i, t) in times.iter().enumerate() {
            assert_relative_eq!(*t, i as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn peak_boundary_cases() {
        let event = intake(12.0, 0.0, 1);
        let strategy = PeakTimes::new(1.5);
        assert_eq!(times_of(&strategy, &event, 1), vec![12.0]);
        assert_eq!(times_of(&strategy, &event, 2), vec![0.0, 12.0]);
        assert_eq!(times_of(&strategy, &event, 3), vec![0.0, 6.0, 12.0]);
    }

    #[test]
    fn peak_phases_are_monotonic_and_span_interval() {
        let event = intake(12.0, 0.0, 20);
        let strategy = PeakTimes::new(2.0);
        let times = times_of(&strategy, &event, 20);
        assert_eq!(times.len(), 20);
        assert_eq!(times[0], 0.0);
        assert_relative_eq!(times[19], 12.0, epsilon = 1e-12);
        for w in times.windows(2) {
            assert!(w[1] >= w[0], "times must be non-decreasing: {:?}", times);
        }
        // the peak itself is one of the sampled points
        assert!(times.iter().any(|t| (t - 2.0).abs() < 1e-12));
    }

    #[test]
    fn infusion_densifies_infusion_phase() {
        let event = intake(12.0, 1.0, 12);
        let times = times_of(&InfusionTimes, &event, 12);
        assert_eq!(times[0], 0.0);
        assert_relative_eq!(times[11], 12.0, epsilon = 1e-12);
        // at least two samples inside [0, Tinf]
        assert!(times.iter().filter(|t| **t <= 1.0).count() >= 2);
        for w in times.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn infusion_boundary_cases() {
        let event = intake(8.0, 2.0, 1);
        assert_eq!(times_of(&InfusionTimes, &event, 1), vec![8.0]);
        assert_eq!(times_of(&InfusionTimes, &event, 2), vec![0.0, 8.0]);
    }
}
