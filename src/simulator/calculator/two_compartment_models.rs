//! Two-compartment closed-form kernels: bolus, extravascular and infusion.
//!
//! The characteristic rates `Alpha` and `Beta` are the roots of the
//! quadratic `x^2 - sumK*x + K21*Ke`, obtained through the discriminant
//! `rootK = sqrt(sumK^2 - 4*K21*Ke)` with `sumK = Ke + K12 + K21`.

use nalgebra::DVector;

use crate::data::{IntakeEvent, ParameterId, ParameterSetEvent};
use crate::error::DosesolError;
use crate::simulator::pertinent_times::{InfusionTimes, StandardTimes};
use crate::simulator::{
    MultiCompConcentrations, PrecomputedExponentials, Residuals, AT_END_INTERVAL, AT_TIME,
};

use super::{
    check_divider, check_positive_value, check_strictly_positive_value, required_parameter,
    AnalyticalModel,
};

const EXP_ALPHA: usize = 0;
const EXP_BETA: usize = 1;
const EXP_KA: usize = 2;

// infusion-specific terms
const EXP_ALPHA_INF: usize = 2;
const EXP_BETA_INF: usize = 3;
const EXP_BETA_INF2: usize = 4;
const EXP_ROOT: usize = 5;
const EXP_ALPHA_POST_INF: usize = 6;
const EXP_BETA_POST_INF: usize = 7;

/// Derived two-compartment distribution constants.
#[derive(Debug, Clone, Copy)]
struct TwoCompRates {
    ke: f64,
    k12: f64,
    k21: f64,
    sum_k: f64,
    root_k: f64,
    alpha: f64,
    beta: f64,
}

impl TwoCompRates {
    fn derive(ke: f64, k12: f64, k21: f64) -> Self {
        let sum_k = ke + k12 + k21;
        let root_k = ((sum_k * sum_k) - 4.0 * k21 * ke).sqrt();
        TwoCompRates {
            ke,
            k12,
            k21,
            sum_k,
            root_k,
            alpha: (sum_k + root_k) / 2.0,
            beta: (sum_k - root_k) / 2.0,
        }
    }

    fn check(&self) -> Result<(), DosesolError> {
        check_strictly_positive_value(self.ke, "Ke")?;
        check_strictly_positive_value(self.k12, "K12")?;
        check_strictly_positive_value(self.k21, "K21")?;
        check_positive_value(self.alpha, "Alpha")?;
        check_positive_value(self.beta, "Beta")
    }
}

/// Two-compartment IV bolus, micro-parameterized (V1, Ke, K12, K21).
#[derive(Debug, Clone)]
pub struct TwoCompartmentBolusMicro {
    d: f64,
    v1: f64,
    rates: TwoCompRates,
    nb_points: usize,
}

impl TwoCompartmentBolusMicro {
    fn with_micro(
        intake: &IntakeEvent,
        v1: f64,
        rates: TwoCompRates,
        checked: impl FnOnce() -> Result<(), DosesolError>,
    ) -> Result<Self, DosesolError> {
        check_positive_value(intake.dose(), "the dose")?;
        checked()?;
        rates.check()?;
        check_strictly_positive_value(intake.interval(), "the interval")?;
        Ok(TwoCompartmentBolusMicro {
            d: intake.dose(),
            v1,
            rates,
            nb_points: intake.nb_points(),
        })
    }

    fn compute(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
    ) -> Result<(DVector<f64>, DVector<f64>), DosesolError> {
        let r = &self.rates;
        let resid1 = in_residuals[0] + self.d / self.v1;
        let resid2 = in_residuals[1];

        check_divider(r.root_k, "rootK")?;
        let a = (r.k12 - r.k21 + r.ke + r.root_k) * resid1 - 2.0 * r.k21 * resid2;
        let b = (-r.k12 + r.k21 - r.ke + r.root_k) * resid1 + 2.0 * r.k21 * resid2;
        let a2 = -2.0 * r.k12 * resid1 + (-r.k12 + r.k21 - r.ke + r.root_k) * resid2;
        let b2 = 2.0 * r.k12 * resid1 + (r.k12 - r.k21 + r.ke + r.root_k) * resid2;

        let exp_alpha = exponentials.term(EXP_ALPHA);
        let exp_beta = exponentials.term(EXP_BETA);
        let concentrations1 = (exp_alpha * a + exp_beta * b) / (2.0 * r.root_k);
        let concentrations2 = (exp_alpha * a2 + exp_beta * b2) / (2.0 * r.root_k);
        Ok((concentrations1, concentrations2))
    }
}

impl AnalyticalModel for TwoCompartmentBolusMicro {
    const RESIDUAL_SIZE: usize = 2;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::V1,
            ParameterId::Ke,
            ParameterId::K12,
            ParameterId::K21,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let v1 = required_parameter(parameters, ParameterId::V1)?;
        let ke = required_parameter(parameters, ParameterId::Ke)?;
        let k12 = required_parameter(parameters, ParameterId::K12)?;
        let k21 = required_parameter(parameters, ParameterId::K21)?;
        Self::with_micro(intake, v1, TwoCompRates::derive(ke, k12, k21), || {
            check_strictly_positive_value(v1, "V1")
        })
    }

    fn times(&self) -> StandardTimes {
        StandardTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        let mut exponentials = PrecomputedExponentials::new(2);
        exponentials.set(EXP_ALPHA, times.map(|t| (-self.rates.alpha * t).exp()));
        exponentials.set(EXP_BETA, times.map(|t| (-self.rates.beta * t).exp()));
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

/// Two-compartment IV bolus, macro-parameterized (CL, Q, V1, V2);
/// `Ke = CL/V1`, `K12 = Q/V1`, `K21 = Q/V2`.
#[derive(Debug, Clone)]
pub struct TwoCompartmentBolusMacro(TwoCompartmentBolusMicro);

impl AnalyticalModel for TwoCompartmentBolusMacro {
    const RESIDUAL_SIZE: usize = 2;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::CL,
            ParameterId::Q,
            ParameterId::V1,
            ParameterId::V2,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let cl = required_parameter(parameters, ParameterId::CL)?;
        let q = required_parameter(parameters, ParameterId::Q)?;
        let v1 = required_parameter(parameters, ParameterId::V1)?;
        let v2 = required_parameter(parameters, ParameterId::V2)?;
        let rates = TwoCompRates::derive(cl / v1, q / v1, q / v2);
        let micro = TwoCompartmentBolusMicro::with_micro(intake, v1, rates, || {
            check_strictly_positive_value(cl, "the clearance")?;
            check_strictly_positive_value(q, "Q")?;
            check_strictly_positive_value(v1, "V1")?;
            check_strictly_positive_value(v2, "V2")
        })?;
        Ok(TwoCompartmentBolusMacro(micro))
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

/// Two-compartment extravascular, micro-parameterized
/// (V1, Ke, K12, K21, Ka, F).
///
/// Three compartments: central, peripheral and drug depot. The depot receives
/// `F*D/V1` at the start of the interval.
#[derive(Debug, Clone)]
pub struct TwoCompartmentExtraMicro {
    d: f64,
    f: f64,
    v1: f64,
    ka: f64,
    rates: TwoCompRates,
    nb_points: usize,
}

impl TwoCompartmentExtraMicro {
    fn with_micro(
        intake: &IntakeEvent,
        v1: f64,
        ka: f64,
        f: f64,
        rates: TwoCompRates,
        checked: impl FnOnce() -> Result<(), DosesolError>,
    ) -> Result<Self, DosesolError> {
        check_positive_value(intake.dose(), "the dose")?;
        checked()?;
        check_strictly_positive_value(ka, "Ka")?;
        check_strictly_positive_value(f, "F")?;
        rates.check()?;
        check_strictly_positive_value(intake.interval(), "the interval")?;
        Ok(TwoCompartmentExtraMicro {
            d: intake.dose(),
            f,
            v1,
            ka,
            rates,
            nb_points: intake.nb_points(),
        })
    }

    fn compute(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
    ) -> Result<(DVector<f64>, DVector<f64>, DVector<f64>), DosesolError> {
        let r = &self.rates;
        let ka = self.ka;
        let (ke, k12, k21, root_k) = (r.ke, r.k12, r.k21, r.root_k);

        let resid1 = in_residuals[0];
        let resid2 = in_residuals[1];
        let resid3 = in_residuals[2] + self.f * self.d / self.v1;
        let sum_resid13 = resid1 + resid3;
        let sum_k12_k21 = k12 + k21;
        let sum_k21_ke = k21 + ke;
        let diff_k21_ka = k21 - ka;
        let diff_k21_ke = k21 - ke;
        let pow_diff_k21_ke = diff_k21_ke.powi(2);

        // coefficients of compartment 1
        let a = k12.powi(3) * ka * resid1
            + diff_k21_ka
                * (pow_diff_k21_ke * (-ke * resid1 + ka * sum_resid13)
                    + ((ka - ke) * (ke * resid1 - k21 * (resid1 + 2.0 * resid2))
                        + ka * (-k21 + ke) * resid3)
                        * root_k)
            + k12.powi(2)
                * (k21 * (-ke * resid1 + ka * (3.0 * resid1 + resid3))
                    + ka * (-ka * sum_resid13 + resid1 * (3.0 * ke + root_k)))
            + k12
                * (k21.powi(2) * (3.0 * ka * resid1 - 2.0 * ke * resid1 + 2.0 * ka * resid3)
                    - k21
                        * (2.0 * ka.powi(2) * sum_resid13 - 2.0 * ka * ke * sum_resid13
                            + ka * (2.0 * resid2 + resid3) * root_k
                            + ke * resid1 * (2.0 * ke + root_k))
                    - ka * (ka * sum_resid13 * (2.0 * ke + root_k)
                        - ke * resid1 * (3.0 * ke + 2.0 * root_k)));

        let b = k12.powi(3) * ka * resid1
            + diff_k21_ka
                * (pow_diff_k21_ke * (-ke * resid1 + ka * sum_resid13)
                    + ((ka - ke) * (-ke * resid1 + k21 * (resid1 + 2.0 * resid2))
                        + ka * diff_k21_ke * resid3)
                        * root_k)
            + k12.powi(2)
                * (k21 * (-ke * resid1 + ka * (3.0 * resid1 + resid3))
                    - ka * (ka * sum_resid13 + resid1 * (-3.0 * ke + root_k)))
            + k12
                * (k21.powi(2) * (3.0 * ka * resid1 - 2.0 * ke * resid1 + 2.0 * ka * resid3)
                    + ka * (ke * resid1 * (3.0 * ke - 2.0 * root_k)
                        - ka * sum_resid13 * (2.0 * ke - root_k))
                    + k21
                        * (-2.0 * ka.powi(2) * sum_resid13
                            + 2.0 * ka * ke * sum_resid13
                            + ka * (2.0 * resid2 + resid3) * root_k
                            + ke * resid1 * (-2.0 * ke + root_k)));

        let c = -2.0
            * diff_k21_ka
            * ka
            * (k12.powi(2) + pow_diff_k21_ke + 2.0 * k12 * sum_k21_ke)
            * resid3;

        let divider = ((sum_k12_k21 - 2.0 * ka + ke) * root_k).powi(2)
            - (k12.powi(2) + pow_diff_k21_ke + 2.0 * k12 * sum_k21_ke).powi(2);
        check_divider(divider, "the compartment 1 divider")?;

        let exp_alpha = exponentials.term(EXP_ALPHA);
        let exp_beta = exponentials.term(EXP_BETA);
        let exp_ka = exponentials.term(EXP_KA);

        let concentrations1 =
            (exp_beta * b + exp_alpha * a + exp_ka * c) * (-2.0 / divider);

        // coefficients of compartment 2
        let a2 = -(k12.powi(2) + pow_diff_k21_ke + 2.0 * k12 * sum_k21_ke)
            * (diff_k21_ka * (ka - ke) * resid2 + k12 * ka * (resid2 + resid3))
            + ((k12 * ka + diff_k21_ka * (ka - ke))
                * (2.0 * k12 * resid1 + (k12 - diff_k21_ke) * resid2)
                + k12 * ka * (sum_k12_k21 - 2.0 * ka + ke) * resid3)
                * root_k;

        let b2 = -(k12.powi(2) + pow_diff_k21_ke + 2.0 * k12 * sum_k21_ke)
            * (diff_k21_ka * (ka - ke) * resid2 + k12 * ka * (resid2 + resid3))
            - ((k12 * ka + diff_k21_ka * (ka - ke))
                * (2.0 * k12 * resid1 + (k12 - diff_k21_ke) * resid2)
                + k12 * ka * (sum_k12_k21 - 2.0 * ka + ke) * resid3)
                * root_k;

        let c2 = 2.0
            * k12
            * ka
            * (k12.powi(2) + pow_diff_k21_ke + 2.0 * k12 * sum_k21_ke)
            * resid3;

        let divider2 = -(k12.powi(2) + pow_diff_k21_ke + 2.0 * k12 * sum_k21_ke).powi(2)
            + (sum_k12_k21 - 2.0 * ka + ke).powi(2) * root_k.powi(2);
        check_divider(divider2, "the compartment 2 divider")?;

        let concentrations2 =
            (exp_beta * b2 + exp_alpha * a2 + exp_ka * c2) * (2.0 / divider2);
        let concentrations3 = exp_ka * resid3;

        Ok((concentrations1, concentrations2, concentrations3))
    }
}

impl AnalyticalModel for TwoCompartmentExtraMicro {
    const RESIDUAL_SIZE: usize = 3;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::V1,
            ParameterId::Ke,
            ParameterId::K12,
            ParameterId::K21,
            ParameterId::Ka,
            ParameterId::F,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let v1 = required_parameter(parameters, ParameterId::V1)?;
        let ke = required_parameter(parameters, ParameterId::Ke)?;
        let k12 = required_parameter(parameters, ParameterId::K12)?;
        let k21 = required_parameter(parameters, ParameterId::K21)?;
        let ka = required_parameter(parameters, ParameterId::Ka)?;
        let f = required_parameter(parameters, ParameterId::F)?;
        Self::with_micro(intake, v1, ka, f, TwoCompRates::derive(ke, k12, k21), || {
            check_strictly_positive_value(v1, "V1")
        })
    }

    fn times(&self) -> StandardTimes {
        StandardTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        let mut exponentials = PrecomputedExponentials::new(3);
        exponentials.set(EXP_ALPHA, times.map(|t| (-self.rates.alpha * t).exp()));
        exponentials.set(EXP_BETA, times.map(|t| (-self.rates.beta * t).exp()));
        exponentials.set(EXP_KA, times.map(|t| (-self.ka * t).exp()));
        exponentials
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        let (concentrations1, concentrations2, concentrations3) =
            self.compute(exponentials, in_residuals)?;
        let last = self.nb_points - 1;
        let residuals = vec![
            concentrations1[last],
            concentrations2[last],
            concentrations3[last],
        ];
        let mut concentrations = vec![concentrations1.as_slice().to_vec(), Vec::new(), Vec::new()];
        if is_all {
            concentrations[1] = concentrations2.as_slice().to_vec();
            concentrations[2] = concentrations3.as_slice().to_vec();
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
        let (concentrations1, concentrations2, concentrations3) =
            self.compute(exponentials, in_residuals)?;
        let mut concentrations = vec![concentrations1[AT_TIME]];
        if is_all {
            concentrations.push(concentrations2[AT_TIME]);
            concentrations.push(concentrations3[AT_TIME]);
        }
        let residuals = vec![
            concentrations1[AT_END_INTERVAL],
            concentrations2[AT_END_INTERVAL],
            concentrations3[AT_END_INTERVAL],
        ];
        Ok((concentrations, residuals))
    }
}

/// Two-compartment extravascular, macro-parameterized
/// (CL, V1, Q, V2, Ka, F).
#[derive(Debug, Clone)]
pub struct TwoCompartmentExtraMacro(TwoCompartmentExtraMicro);

impl AnalyticalModel for TwoCompartmentExtraMacro {
    const RESIDUAL_SIZE: usize = 3;
    type Times = StandardTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::CL,
            ParameterId::V1,
            ParameterId::Q,
            ParameterId::V2,
            ParameterId::Ka,
            ParameterId::F,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let cl = required_parameter(parameters, ParameterId::CL)?;
        let v1 = required_parameter(parameters, ParameterId::V1)?;
        let q = required_parameter(parameters, ParameterId::Q)?;
        let v2 = required_parameter(parameters, ParameterId::V2)?;
        let ka = required_parameter(parameters, ParameterId::Ka)?;
        let f = required_parameter(parameters, ParameterId::F)?;
        let rates = TwoCompRates::derive(cl / v1, q / v1, q / v2);
        let micro = TwoCompartmentExtraMicro::with_micro(intake, v1, ka, f, rates, || {
            check_strictly_positive_value(cl, "the clearance")?;
            check_strictly_positive_value(q, "Q")?;
            check_strictly_positive_value(v1, "V1")?;
            check_strictly_positive_value(v2, "V2")
        })?;
        Ok(TwoCompartmentExtraMacro(micro))
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

/// Two-compartment constant-rate infusion, micro-parameterized
/// (V1, Ke, K12, K21).
///
/// While infusing, the dose contributes accumulation terms; afterwards the
/// decay is keyed off the residual state frozen at the end of the infusion
/// (`residInf1`/`residInf2`).
#[derive(Debug, Clone)]
pub struct TwoCompartmentInfusionMicro {
    d: f64,
    v1: f64,
    rates: TwoCompRates,
    divider: f64,
    tinf: f64,
    int: f64,
    nb_points: usize,
    post_infusion: bool,
}

impl TwoCompartmentInfusionMicro {
    fn with_micro(
        intake: &IntakeEvent,
        v1: f64,
        rates: TwoCompRates,
        checked: impl FnOnce() -> Result<(), DosesolError>,
    ) -> Result<Self, DosesolError> {
        check_positive_value(intake.dose(), "the dose")?;
        checked()?;
        rates.check()?;
        check_strictly_positive_value(intake.infusion_duration(), "the infusion time")?;
        check_strictly_positive_value(intake.interval(), "the interval")?;
        let divider = rates.root_k * (-rates.sum_k + rates.root_k) * (rates.sum_k + rates.root_k);
        Ok(TwoCompartmentInfusionMicro {
            d: intake.dose(),
            v1,
            rates,
            divider,
            tinf: intake.infusion_duration(),
            int: intake.interval(),
            nb_points: intake.nb_points(),
            post_infusion: intake.interval() > intake.infusion_duration(),
        })
    }

    fn compute(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        force_size: usize,
    ) -> Result<(DVector<f64>, DVector<f64>), DosesolError> {
        let r = &self.rates;
        let (ke, k12, k21) = (r.ke, r.k12, r.k21);
        let (sum_k, root_k) = (r.sum_k, r.root_k);
        check_divider(self.divider, "the infusion divider")?;
        check_divider(root_k, "rootK")?;

        let exp_alpha = exponentials.term(EXP_ALPHA);
        let exp_beta = exponentials.term(EXP_BETA);
        let exp_alpha_inf = exponentials.term(EXP_ALPHA_INF);
        let exp_beta_inf = exponentials.term(EXP_BETA_INF);
        let exp_beta_inf2 = exponentials.term(EXP_BETA_INF2);
        let exp_root = exponentials.term(EXP_ROOT);
        let exp_alpha_post = exponentials.term(EXP_ALPHA_POST_INF);
        let exp_beta_post = exponentials.term(EXP_BETA_POST_INF);

        let resid1 = in_residuals[0];
        let resid2 = in_residuals[1];
        let delta_d = (self.d / self.v1) / self.tinf;
        let tinf = self.tinf;

        // state at the end of the infusion, starting from an empty system
        let resid_inf1 = (2.0 * delta_d * (r.beta * tinf).exp() * k21
            * ((-r.beta * tinf).exp() * (-k12 - k21 + ke - root_k)
                + (-2.0 * r.beta * tinf).exp() * (k12 + k21 - ke + root_k)
                + (root_k * tinf - r.alpha * tinf).exp() * (k12 + k21 - ke - root_k)
                + (-r.alpha * tinf - r.beta * tinf).exp() * (-k12 - k21 + ke + root_k)))
            / self.divider;
        let resid_inf2 = (2.0 * delta_d * (r.beta * tinf).exp() * k12
            * ((-r.beta * tinf).exp() * (-sum_k - root_k)
                + (-2.0 * r.beta * tinf).exp() * (sum_k + root_k)
                + (root_k * tinf - r.alpha * tinf).exp() * (sum_k - root_k)
                + (-r.alpha * tinf - r.beta * tinf).exp() * (-sum_k + root_k)))
            / self.divider;

        let a = (k12 - k21 + ke + root_k) * resid1 - 2.0 * k21 * resid2;
        let b = (-k12 + k21 - ke + root_k) * resid1 + 2.0 * k21 * resid2;
        let a2 = -2.0 * k12 * resid1 + (-k12 + k21 - ke + root_k) * resid2;
        let b2 = 2.0 * k12 * resid1 + (k12 - k21 + ke + root_k) * resid2;
        let a_inf = -k12 - k21 + ke - root_k;
        let b_inf = k12 + k21 - ke - root_k;
        let a_post_inf = (k12 - k21 + ke + root_k) * resid_inf1 - 2.0 * k21 * resid_inf2;
        let b_post_inf = (-k12 + k21 - ke + root_k) * resid_inf1 + 2.0 * k21 * resid_inf2;
        let a2_post_inf = -2.0 * k12 * resid_inf1 + (-k12 + k21 - ke + root_k) * resid_inf2;
        let b2_post_inf = 2.0 * k12 * resid_inf1 + (k12 - k21 + ke + root_k) * resid_inf2;

        // decay of the incoming residuals
        let mut concentrations1 = (exp_alpha * a + exp_beta * b) / (2.0 * root_k);
        let mut concentrations2 = (exp_alpha * a2 + exp_beta * b2) / (2.0 * root_k);

        if force_size != 0 {
            // during the infusion the dose adds accumulation terms
            let p1p1 = exp_beta_inf.rows(0, force_size) * (2.0 * delta_d * k21);
            let p1p2 = (exp_beta.rows(0, force_size) - exp_beta_inf2.rows(0, force_size)) * a_inf;
            let p1p3 = (exp_root
                .rows(0, force_size)
                .component_div(&exp_alpha_inf.rows(0, force_size))
                - exp_alpha
                    .rows(0, force_size)
                    .component_div(&exp_beta_inf.rows(0, force_size)))
                * b_inf;
            let during1 = p1p1.component_mul(&(p1p2 + p1p3)) / self.divider;
            let mut head1 = concentrations1.rows_mut(0, force_size);
            head1 += &during1;

            let p2p1 = exp_beta_inf.rows(0, force_size) * (2.0 * delta_d * k12);
            let p2p2 = exp_beta.rows(0, force_size) * (-sum_k - root_k)
                + exp_beta_inf2.rows(0, force_size) * (sum_k + root_k)
                + exp_root
                    .rows(0, force_size)
                    .component_div(&exp_alpha_inf.rows(0, force_size))
                    * (sum_k - root_k)
                + exp_alpha
                    .rows(0, force_size)
                    .component_div(&exp_beta_inf.rows(0, force_size))
                    * (-sum_k + root_k);
            let during2 = p2p1.component_mul(&p2p2) / self.divider;
            let mut head2 = concentrations2.rows_mut(0, force_size);
            head2 += &during2;
        }

        if self.post_infusion {
            // after the infusion the dose decays from the state frozen at Tinf
            let rest = concentrations1.len() - force_size;
            let after1 = (exp_alpha_post.rows(force_size, rest) * a_post_inf
                + exp_beta_post.rows(force_size, rest) * b_post_inf)
                / (2.0 * root_k);
            let mut tail1 = concentrations1.rows_mut(force_size, rest);
            tail1 += &after1;

            let after2 = (exp_alpha_post.rows(force_size, rest) * a2_post_inf
                + exp_beta_post.rows(force_size, rest) * b2_post_inf)
                / (2.0 * root_k);
            let mut tail2 = concentrations2.rows_mut(force_size, rest);
            tail2 += &after2;
        }

        Ok((concentrations1, concentrations2))
    }
}

impl AnalyticalModel for TwoCompartmentInfusionMicro {
    const RESIDUAL_SIZE: usize = 2;
    type Times = InfusionTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::V1,
            ParameterId::Ke,
            ParameterId::K12,
            ParameterId::K21,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let v1 = required_parameter(parameters, ParameterId::V1)?;
        let ke = required_parameter(parameters, ParameterId::Ke)?;
        let k12 = required_parameter(parameters, ParameterId::K12)?;
        let k21 = required_parameter(parameters, ParameterId::K21)?;
        Self::with_micro(intake, v1, TwoCompRates::derive(ke, k12, k21), || {
            check_strictly_positive_value(v1, "V1")
        })
    }

    fn times(&self) -> InfusionTimes {
        InfusionTimes
    }

    fn compute_exponentials(&self, times: &DVector<f64>) -> PrecomputedExponentials {
        let r = &self.rates;
        let mut exponentials = PrecomputedExponentials::new(8);
        exponentials.set(EXP_ALPHA, times.map(|t| (-r.alpha * t).exp()));
        exponentials.set(EXP_BETA, times.map(|t| (-r.beta * t).exp()));
        exponentials.set(EXP_ALPHA_INF, times.map(|t| (r.alpha * t).exp()));
        exponentials.set(EXP_BETA_INF, times.map(|t| (r.beta * t).exp()));
        exponentials.set(EXP_BETA_INF2, times.map(|t| (-2.0 * r.beta * t).exp()));
        exponentials.set(EXP_ROOT, times.map(|t| (r.root_k * t).exp()));
        let tinf = self.tinf;
        exponentials.set(
            EXP_ALPHA_POST_INF,
            times.map(|t| (-r.alpha * (t - tinf)).exp()),
        );
        exponentials.set(
            EXP_BETA_POST_INF,
            times.map(|t| (-r.beta * (t - tinf)).exp()),
        );
        exponentials
    }

    fn compute_concentrations(
        &self,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(MultiCompConcentrations, Residuals), DosesolError> {
        let force_size = if self.nb_points == 2 {
            ((self.tinf / self.int * self.nb_points as f64).ceil() as usize).min(self.nb_points)
        } else {
            self.nb_points
                .min(2.max((self.tinf / self.int * self.nb_points as f64) as usize))
        };
        let (concentrations1, concentrations2) =
            self.compute(exponentials, in_residuals, force_size)?;
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
        at_time: f64,
        exponentials: &PrecomputedExponentials,
        in_residuals: &[f64],
        is_all: bool,
    ) -> Result<(Vec<f64>, Residuals), DosesolError> {
        let force_size = if at_time <= self.tinf {
            if self.post_infusion {
                1
            } else {
                2
            }
        } else {
            0
        };
        let (concentrations1, concentrations2) =
            self.compute(exponentials, in_residuals, force_size)?;
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

/// Two-compartment constant-rate infusion, macro-parameterized
/// (CL, V1, Q, V2).
#[derive(Debug, Clone)]
pub struct TwoCompartmentInfusionMacro(TwoCompartmentInfusionMicro);

impl AnalyticalModel for TwoCompartmentInfusionMacro {
    const RESIDUAL_SIZE: usize = 2;
    type Times = InfusionTimes;

    fn parameters_id() -> &'static [ParameterId] {
        &[
            ParameterId::CL,
            ParameterId::V1,
            ParameterId::Q,
            ParameterId::V2,
        ]
    }

    fn validate(
        intake: &IntakeEvent,
        parameters: &ParameterSetEvent,
    ) -> Result<Self, DosesolError> {
        let cl = required_parameter(parameters, ParameterId::CL)?;
        let v1 = required_parameter(parameters, ParameterId::V1)?;
        let q = required_parameter(parameters, ParameterId::Q)?;
        let v2 = required_parameter(parameters, ParameterId::V2)?;
        let rates = TwoCompRates::derive(cl / v1, q / v1, q / v2);
        let micro = TwoCompartmentInfusionMicro::with_micro(intake, v1, rates, || {
            check_strictly_positive_value(cl, "the clearance")?;
            check_strictly_positive_value(q, "Q")?;
            check_strictly_positive_value(v1, "V1")?;
            check_strictly_positive_value(v2, "V2")
        })?;
        Ok(TwoCompartmentInfusionMacro(micro))
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
