//! One-compartment closed-form kernels: bolus, extravascular and infusion.

use nalgebra::DVector;

use crate::data::{IntakeEvent, ParameterId, ParameterSetEvent};
use crate::error::DosesolError;
use crate::simulator::pertinent_times::{InfusionTimes, StandardTimes};
use crate::simulator::{MultiCompConcentrations, PrecomputedExponentials, Residuals, AT_END_INTERVAL, AT_TIME};

use super::{
    check_divider, check_positive_value, check_strictly_positive_value, required_parameter,
    AnalyticalModel,
};

const EXP_KE: usize = 0;
const EXP_KA: usize = 1;

/// One-compartment IV bolus, micro-parameterized (V, Ke).
///
/// Central concentration over the interval:
/// `C(t) = (D/V + r0) * exp(-Ke*t)`.
#[derive(Debug, Clone)]
pub struct OneCompartmentBolusMicro {
    d: f64,
    v: f64,
    ke: f64,
    nb_points: usize,
}

impl OneCompartmentBolusMicro {
    fn with_micro(
        intake: &IntakeEvent,
        v: f64,
        ke: f64,
        checked: impl FnOnce() -> Result<(), DosesolError>,
    ) -> Result<Self, DosesolError> {
        check_positive_value(intake.dose(), "the dose")?;
        checked()?;
        check_strictly_positive_value(intake.interval(), "the interval")?;
        Ok(OneCompartmentBolusMicro {
            d: intake.dose(),
            v,
            ke,
            nb_points: intake.nb_points(),
        })
    }

    fn compute(&self, exponentials: &PrecomputedExponentials, in_residuals: &[f64]) -> DVector<f64> {
        exponentials.term(EXP_KE) * (self.d / self.v + in_residuals[0])
    }
}

impl AnalyticalModel for OneCompartmentBolusMicro {
    const RESIDUAL_SIZE: usize = 1;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[ParameterId::V, ParameterId::Ke]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let v = required_parameter(parameters, ParameterId::V)?;
        let ke = required_parameter(parameters, ParameterId::Ke)?;
        Self::with_micro(intake, v, ke, || {
            check_strictly_positive_value(v, "V")?;
            check_strictly_positive_value(ke, "Ke")
        })
    }

    fn times(&self) -> StandardTimes {
        StandardTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        let mut exponentials = PrecomputedExponentials::new(1);
        exponentials.set(EXP_KE, times.map(|t| (-self.ke * t).exp()));
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
        Ok((vec![concentrations.as_slice().to_vec()], residuals))
    }

    fn compute_concentration(
        &self,
        _at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        _is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        let concentrations = self.compute(exponentials, in_residuals);
        Ok((
            vec![concentrations[AT_TIME]],
            vec![concentrations[AT_END_INTERVAL]],
        ))
    }
}

/// One-compartment IV bolus, macro-parameterized (CL, V); `Ke = CL/V`.
#[derive(Debug, Clone)]
pub struct OneCompartmentBolusMacro(OneCompartmentBolusMicro);

impl AnalyticalModel for OneCompartmentBolusMacro {
    const RESIDUAL_SIZE: usize = 1;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[ParameterId::CL, ParameterId::V]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let cl = required_parameter(parameters, ParameterId::CL)?;
        let v = required_parameter(parameters, ParameterId::V)?;
        let micro = OneCompartmentBolusMicro::with_micro(intake, v, cl / v, || {
            check_strictly_positive_value(cl, "the clearance")?;
            check_strictly_positive_value(v, "V")
        })?;
        Ok(OneCompartmentBolusMacro(micro))
    }

    fn times(&self) -> StandardTimes {
        StandardTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        self.0.compute_exponentials(times)
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        self.0
            .compute_concentrations(exponentials, in_residuals, is_all)
    }

    fn compute_concentration(
        &self,
        at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        self.0
            .compute_concentration(at_time, exponentials, in_residuals, is_all)
    }
}

/// One-compartment extravascular, micro-parameterized (V, Ke, Ka, F).
///
/// Two compartments: central (index 0) and drug depot (index 1). The depot
/// receives `F*D/V` at the start of the interval and empties with rate `Ka`.
#[derive(Debug, Clone)]
pub struct OneCompartmentExtraMicro {
    d: f64,
    f: f64,
    ka: f64,
    v: f64,
    ke: f64,
    nb_points: usize,
}

impl OneCompartmentExtraMicro {
    fn with_micro(
        intake: &IntakeEvent,
        v: f64,
        ke: f64,
        ka: f64,
        f: f64,
        checked: impl FnOnce() -> Result<(), DosesolError>,
    ) -> Result<Self, DosesolError> {
        check_positive_value(intake.dose(), "the dose")?;
        checked()?;
        check_strictly_positive_value(ka, "Ka")?;
        check_strictly_positive_value(f, "F")?;
        check_strictly_positive_value(intake.interval(), "the interval")?;
        Ok(OneCompartmentExtraMicro {
            d: intake.dose(),
            f,
            ka,
            v,
            ke,
            nb_points: intake.nb_points(),
        })
    }

    fn compute(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
    ) -> Result<(DVector<f64>, DVector<f64>), DosesolError> {
        let exp_ke = exponentials.term(EXP_KE);
        let exp_ka = exponentials.term(EXP_KA);

        let resid1 = in_residuals[0];
        let resid2 = in_residuals[1] + self.f * self.d / self.v;
        // degenerate when the absorption and elimination rates coincide
        check_divider(self.ke - self.ka, "Ka equals Ke")?;
        let part2 = self.ka * resid2 / (-self.ka + self.ke);

        let concentrations1 = exp_ke * resid1 + (exp_ka - exp_ke) * part2;
        let concentrations2 = exp_ka * resid2;
        Ok((concentrations1, concentrations2))
    }
}

impl AnalyticalModel for OneCompartmentExtraMicro {
    const RESIDUAL_SIZE: usize = 2;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::V,
            ParameterId::Ke,
            ParameterId::Ka,
            ParameterId::F,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let v = required_parameter(parameters, ParameterId::V)?;
        let ke = required_parameter(parameters, ParameterId::Ke)?;
        let ka = required_parameter(parameters, ParameterId::Ka)?;
        let f = required_parameter(parameters, ParameterId::F)?;
        Self::with_micro(intake, v, ke, ka, f, || {
            check_strictly_positive_value(v, "V")?;
            check_strictly_positive_value(ke, "Ke")
        })
    }

    fn times(&self) -> StandardTimes {
        StandardTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        let mut exponentials = PrecomputedExponentials::new(2);
        exponentials.set(EXP_KE, times.map(|t| (-self.ke * t).exp()));
        exponentials.set(EXP_KA, times.map(|t| (-self.ka * t).exp()));
        exponentials
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        let (concentrations1, concentrations2) = self.compute(exponentials, in_residuals)?;
        let last = self.nb_points - 1;
        let residuals = vec![concentrations1[last], concentrations2[last]];
        let mut concentrations = vec![concentrations1.as_slice().to_vec(), Vec::new()];
        if is_all {
            concentrations[1] = concentrations2.as_slice().to_vec();
        }
        Ok((concentrations, residuals))
    }

    fn compute_concentration(
        &self,
        _at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        let (concentrations1, concentrations2) = self.compute(exponentials, in_residuals)?;
        let mut concentrations = vec![concentrations1[AT_TIME]];
        if is_all {
            concentrations.push(concentrations2[AT_TIME]);
        }
        let residuals = vec![
            concentrations1[AT_END_INTERVAL],
            concentrations2[AT_END_INTERVAL],
        ];
        Ok((concentrations, residuals))
    }
}

/// One-compartment extravascular, macro-parameterized (CL, V, Ka, F);
/// `Ke = CL/V`.
#[derive(Debug, Clone)]
pub struct OneCompartmentExtraMacro(OneCompartmentExtraMicro);

impl AnalyticalModel for OneCompartmentExtraMacro {
    const RESIDUAL_SIZE: usize = 2;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::CL,
            ParameterId::V,
            ParameterId::Ka,
            ParameterId::F,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let cl = required_parameter(parameters, ParameterId::CL)?;
        let v = required_parameter(parameters, ParameterId::V)?;
        let ka = required_parameter(parameters, ParameterId::Ka)?;
        let f = required_parameter(parameters, ParameterId::F)?;
        let micro = OneCompartmentExtraMicro::with_micro(intake, v, cl / v, ka, f, || {
            check_strictly_positive_value(cl, "the clearance")?;
            check_strictly_positive_value(v, "V")
        })?;
        Ok(OneCompartmentExtraMacro(micro))
    }

    fn times(&self) -> StandardTimes {
        StandardTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        self.0.compute_exponentials(times)
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        self.0
            .compute_concentrations(exponentials, in_residuals, is_all)
    }

    fn compute_concentration(
        &self,
        at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        self.0
            .compute_concentration(at_time, exponentials, in_residuals, is_all)
    }
}

/// One-compartment constant-rate infusion, micro-parameterized (Ke, V).
///
/// The time axis splits at the end of the infusion: accumulation towards
/// `D/(Tinf*Ke*V)` while infusing, pure exponential decay afterwards.
#[derive(Debug, Clone)]
pub struct OneCompartmentInfusionMicro {
    d: f64,
    v: f64,
    ke: f64,
    tinf: f64,
    int: f64,
    nb_points: usize,
}

impl OneCompartmentInfusionMicro {
    fn with_micro(
        intake: &IntakeEvent,
        v: f64,
        ke: f64,
        checked: impl FnOnce() -> Result<(), DosesolError>,
    ) -> Result<Self, DosesolError> {
        check_positive_value(intake.dose(), "the dose")?;
        checked()?;
        check_strictly_positive_value(intake.infusion_duration(), "the infusion time")?;
        check_strictly_positive_value(intake.interval(), "the interval")?;
        Ok(OneCompartmentInfusionMicro {
            d: intake.dose(),
            v,
            ke,
            tinf: intake.infusion_duration(),
            int: intake.interval(),
            nb_points: intake.nb_points(),
        })
    }

    fn compute(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        force_size: usize,
    ) -> DVector<f64> {
        let exp_ke = exponentials.term(EXP_KE);
        let part1 = self.d / (self.tinf * self.ke * self.v);

        let mut concentrations = exp_ke * in_residuals[0];

        if force_size != 0 {
            let during =
                (-exp_ke.rows(0, force_size)).add_scalar(1.0) * part1;
            let mut head = concentrations.rows_mut(0, force_size);
            head += &during;
        }

        let rest = concentrations.len() - force_size;
        let after = exp_ke.rows(force_size, rest) * (part1 * ((self.ke * self.tinf).exp() - 1.0));
        let mut tail = concentrations.rows_mut(force_size, rest);
        tail += &after;

        concentrations
    }
}

impl AnalyticalModel for OneCompartmentInfusionMicro {
    const RESIDUAL_SIZE: usize = 1;
    type Times = InfusionTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[ParameterId::Ke, ParameterId::V]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let ke = required_parameter(parameters, ParameterId::Ke)?;
        let v = required_parameter(parameters, ParameterId::V)?;
        Self::with_micro(intake, v, ke, || {
            check_strictly_positive_value(v, "V")?;
            check_strictly_positive_value(ke, "Ke")
        })
    }

    fn times(&self) -> InfusionTimes {
        InfusionTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        let mut exponentials = PrecomputedExponentials::new(1);
        exponentials.set(EXP_KE, times.map(|t| (-self.ke * t).exp()));
        exponentials
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        _is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        let force_size = ((self.tinf / self.int * self.nb_points as f64).ceil() as usize)
            .min(self.nb_points);
        let concentrations = self.compute(exponentials, in_residuals, force_size);
        let residuals = vec![concentrations[self.nb_points - 1]];
        Ok((vec![concentrations.as_slice().to_vec()], residuals))
    }

    fn compute_concentration(
        &self,
        at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        _is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        let force_size = if at_time < self.tinf { 1 } else { 0 };
        let concentrations = self.compute(exponentials, in_residuals, force_size);
        Ok((
            vec![concentrations[AT_TIME]],
            vec![concentrations[AT_END_INTERVAL]],
        ))
    }
}

/// One-compartment constant-rate infusion, macro-parameterized (CL, V);
/// `Ke = CL/V`.
#[derive(Debug, Clone)]
pub struct OneCompartmentInfusionMacro(OneCompartmentInfusionMicro);

impl AnalyticalModel for OneCompartmentInfusionMacro {
    const RESIDUAL_SIZE: usize = 1;
    type Times = InfusionTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[ParameterId::CL, ParameterId::V]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let cl = required_parameter(parameters, ParameterId::CL)?;
        let v = required_parameter(parameters, ParameterId::V)?;
        let micro = OneCompartmentInfusionMicro::with_micro(intake, v, cl / v, || {
            check_strictly_positive_value(cl, "the clearance")?;
            check_strictly_positive_value(v, "V")
        })?;
        Ok(OneCompartmentInfusionMacro(micro))
    }

    fn times(&self) -> InfusionTimes {
        InfusionTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        self.0.compute_exponentials(times)
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        self.0
            .compute_concentrations(exponentials, in_residuals, is_all)
    }

    fn compute_concentration(
        &self,
        at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        self.0
            .compute_concentration(at_time, exponentials, in_residuals, is_all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AbsorptionModel;
    use crate::simulator::calculator::IntakeIntervalCalculator;
    use approx::assert_relative_eq;

    #[test]
    fn bolus_residual_matches_closed_form() {
        // half-life equal to the interval
        let interval = 12.0;
        let ke = 2.0_f64.ln() / interval;
        let dose = 200000.0;
        let intake = IntakeEvent::new(0.0, dose, AbsorptionModel::Intravascular, interval, 0.0, 251);
        let parameters =
            ParameterSetEvent::new([(ParameterId::V, 1.0), (ParameterId::Ke, ke)]);

        let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let prediction = calculator
            .calculate_intake_points(&intake, &parameters, &[0.0], false)
            .unwrap();

        let expected = dose * (-ke * interval).exp();
        assert_relative_eq!(prediction.residuals()[0], expected, max_relative = 1e-9);
        // half-life: the residual is half the starting concentration
        assert_relative_eq!(prediction.residuals()[0], dose / 2.0, max_relative = 1e-9);
    }

    #[test]
    fn bolus_macro_equals_micro() {
        let intake = IntakeEvent::new(0.0, 750.0, AbsorptionModel::Intravascular, 24.0, 0.0, 25);
        let micro_parameters =
            ParameterSetEvent::new([(ParameterId::V, 30.0), (ParameterId::Ke, 0.08)]);
        let macro_parameters =
            ParameterSetEvent::new([(ParameterId::CL, 2.4), (ParameterId::V, 30.0)]);

        let mut micro = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let mut macr = IntakeIntervalCalculator::<OneCompartmentBolusMacro>::new();
        let micro_prediction = micro
            .calculate_intake_points(&intake, &micro_parameters, &[0.0], false)
            .unwrap();
        let macro_prediction = macr
            .calculate_intake_points(&intake, &macro_parameters, &[0.0], false)
            .unwrap();

        for (a, b) in micro_prediction
            .concentrations(0)
            .iter()
            .zip(macro_prediction.concentrations(0))
        {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn extra_depot_empties_into_central() {
        let intake = IntakeEvent::new(0.0, 400.0, AbsorptionModel::Extravascular, 24.0, 0.0, 49);
        let parameters = ParameterSetEvent::new([
            (ParameterId::V, 20.0),
            (ParameterId::Ke, 0.1),
            (ParameterId::Ka, 1.2),
            (ParameterId::F, 0.8),
        ]);

        let mut calculator = IntakeIntervalCalculator::<OneCompartmentExtraMicro>::new();
        let prediction = calculator
            .calculate_intake_points(&intake, &parameters, &[0.0, 0.0], true)
            .unwrap();

        // central starts empty, rises, and is non-zero at the end
        assert_eq!(prediction.concentrations(0)[0], 0.0);
        let peak = prediction
            .concentrations(0)
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(peak > prediction.concentrations(0)[0]);
        assert!(prediction.residuals()[0] > 0.0);

        // depot holds F*D/V at t=0 and decays with Ka
        let depot0 = prediction.concentrations(1)[0];
        assert_relative_eq!(depot0, 0.8 * 400.0 / 20.0, max_relative = 1e-12);
        let expected_depot_end = depot0 * (-1.2_f64 * 24.0).exp();
        assert_relative_eq!(
            prediction.residuals()[1],
            expected_depot_end,
            max_relative = 1e-9
        );
    }

    #[test]
    fn extra_rejects_equal_absorption_and_elimination() {
        let intake = IntakeEvent::new(0.0, 400.0, AbsorptionModel::Extravascular, 24.0, 0.0, 5);
        let parameters = ParameterSetEvent::new([
            (ParameterId::V, 20.0),
            (ParameterId::Ke, 0.5),
            (ParameterId::Ka, 0.5),
            (ParameterId::F, 1.0),
        ]);

        let mut calculator = IntakeIntervalCalculator::<OneCompartmentExtraMicro>::new();
        let result = calculator.calculate_intake_points(&intake, &parameters, &[0.0, 0.0], false);
        assert!(matches!(result, Err(DosesolError::BadConcentration(_))));
    }

    #[test]
    fn infusion_reaches_expected_end_of_infusion_concentration() {
        let interval = 12.0;
        let tinf = 2.0;
        let ke = 0.25;
        let v = 10.0;
        let dose = 500.0;
        let intake = IntakeEvent::new(0.0, dose, AbsorptionModel::Infusion, interval, tinf, 240);
        let parameters = ParameterSetEvent::new([(ParameterId::Ke, ke), (ParameterId::V, v)]);

        let mut calculator = IntakeIntervalCalculator::<OneCompartmentInfusionMicro>::new();
        let prediction = calculator
            .calculate_intake_points(&intake, &parameters, &[0.0], false)
            .unwrap();

        // C(Tinf) = D/(Tinf*Ke*V) * (1 - exp(-Ke*Tinf))
        let expected_peak = dose / (tinf * ke * v) * (1.0 - (-ke * tinf).exp());
        let peak = prediction
            .concentrations(0)
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        assert_relative_eq!(peak, expected_peak, max_relative = 1e-6);

        // end of interval: decayed from the peak over (interval - Tinf)
        let expected_end = expected_peak * (-ke * (interval - tinf)).exp();
        assert_relative_eq!(prediction.residuals()[0], expected_end, max_relative = 1e-9);
    }

    #[test]
    fn infusion_rejects_zero_infusion_time() {
        let intake = IntakeEvent::new(0.0, 500.0, AbsorptionModel::Infusion, 12.0, 0.0, 5);
        let parameters =
            ParameterSetEvent::new([(ParameterId::Ke, 0.25), (ParameterId::V, 10.0)]);
        let mut calculator = IntakeIntervalCalculator::<OneCompartmentInfusionMicro>::new();
        let result = calculator.calculate_intake_points(&intake, &parameters, &[0.0], false);
        assert!(matches!(result, Err(DosesolError::BadParameters(_))));
    }

    #[test]
    fn missing_parameter_is_rejected() {
        let intake = IntakeEvent::new(0.0, 200.0, AbsorptionModel::Intravascular, 12.0, 0.0, 5);
        let parameters = ParameterSetEvent::new([(ParameterId::V, 20.0)]);
        let mut calculator = IntakeIntervalCalculator::<OneCompartmentBolusMicro>::new();
        let result = calculator.calculate_intake_points(&intake, &parameters, &[0.0], false);
        assert!(matches!(result, Err(DosesolError::BadParameters(_))));
    }
}
