//! Pharmacokinetic model registry.
//!
//! A [PkModel] groups, under one id, the calculators of every route of
//! administration for one body model (e.g. `linear.2comp.macro` wires the
//! two-compartment bolus, extravascular and infusion calculators). The
//! [PkModelCollection] resolves an id coming from a drug-model definition
//! into the [PkModel] able to create calculators for it.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::data::AbsorptionModel;
use crate::simulator::calculator::{
    IntakeCalculator, IntakeIntervalCalculator, OneCompartmentBolusMacro,
    OneCompartmentBolusMicro, OneCompartmentExtraMacro, OneCompartmentExtraMicro,
    OneCompartmentInfusionMacro, OneCompartmentInfusionMicro, ThreeCompartmentBolusMacro,
    ThreeCompartmentBolusMicro, ThreeCompartmentExtraMacro, ThreeCompartmentExtraMicro,
    ThreeCompartmentInfusionMacro, ThreeCompartmentInfusionMicro, TwoCompartmentBolusMacro,
    TwoCompartmentBolusMicro, TwoCompartmentExtraMacro, TwoCompartmentExtraMicro,
    TwoCompartmentInfusionMacro, TwoCompartmentInfusionMicro,
};

type CalculatorFactory = fn() -> Box<dyn IntakeCalculator + Send>;

/// One body model: an id plus a calculator factory per supported route.
pub struct PkModel {
    id: String,
    factories: HashMap<AbsorptionModel, CalculatorFactory>,
}

impl PkModel {
    /// Create an empty model with the given id (unique within a collection).
    pub fn new(id: impl Into<String>) -> Self {
        PkModel {
            id: id.into(),
            factories: HashMap::new(),
        }
    }

    /// The model id (e.g. `linear.2comp.macro`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register the calculator factory of one route.
    ///
    /// Returns false if the route already had a factory (the new one
    /// replaces it).
    pub fn add_calculator_factory(
        &mut self,
        route: AbsorptionModel,
        factory: CalculatorFactory,
    ) -> bool {
        self.factories.insert(route, factory).is_none()
    }

    /// The routes this model can compute.
    pub fn available_routes(&self) -> Vec<AbsorptionModel> {
        let mut routes: Vec<AbsorptionModel> = self.factories.keys().copied().collect();
        routes.sort_by_key(|route| *route as usize);
        routes
    }

    /// Create a fresh calculator (with its own cache) for one route.
    pub fn create_calculator(
        &self,
        route: AbsorptionModel,
    ) -> Option<Box<dyn IntakeCalculator + Send>> {
        self.factories.get(&route).map(|factory| factory())
    }
}

/// A set of [PkModel]s, looked up by id.
#[derive(Default)]
pub struct PkModelCollection {
    models: Vec<PkModel>,
}

impl PkModelCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        PkModelCollection::default()
    }

    /// Add a model. Returns false (and rejects it) if the id is taken.
    pub fn add_pk_model(&mut self, model: PkModel) -> bool {
        if self.get_pk_model_from_id(model.id()).is_some() {
            return false;
        }
        self.models.push(model);
        true
    }

    /// Find a model by id.
    pub fn get_pk_model_from_id(&self, id: &str) -> Option<&PkModel> {
        self.models.iter().find(|model| model.id() == id)
    }

    /// Ids of every registered model.
    pub fn ids(&self) -> Vec<&str> {
        self.models.iter().map(|model| model.id()).collect()
    }
}

fn boxed<M>() -> Box<dyn IntakeCalculator + Send>
where
    M: super::calculator::AnalyticalModel + Send + 'static,
{
    Box::new(IntakeIntervalCalculator::<M>::new())
}

/// `linear.1comp.micro`: one-compartment calculators on (V, Ke).
pub fn one_compartment_micro() -> PkModel {
    let mut model = PkModel::new("linear.1comp.micro");
    model.add_calculator_factory(AbsorptionModel::Intravascular, boxed::<OneCompartmentBolusMicro>);
    model.add_calculator_factory(AbsorptionModel::Extravascular, boxed::<OneCompartmentExtraMicro>);
    model.add_calculator_factory(AbsorptionModel::Infusion, boxed::<OneCompartmentInfusionMicro>);
    model
}

/// `linear.1comp.macro`: one-compartment calculators on (CL, V).
pub fn one_compartment_macro() -> PkModel {
    let mut model = PkModel::new("linear.1comp.macro");
    model.add_calculator_factory(AbsorptionModel::Intravascular, boxed::<OneCompartmentBolusMacro>);
    model.add_calculator_factory(AbsorptionModel::Extravascular, boxed::<OneCompartmentExtraMacro>);
    model.add_calculator_factory(AbsorptionModel::Infusion, boxed::<OneCompartmentInfusionMacro>);
    model
}

/// `linear.2comp.micro`: two-compartment calculators on (V1, Ke, K12, K21).
pub fn two_compartment_micro() -> PkModel {
    let mut model = PkModel::new("linear.2comp.micro");
    model.add_calculator_factory(AbsorptionModel::Intravascular, boxed::<TwoCompartmentBolusMicro>);
    model.add_calculator_factory(AbsorptionModel::Extravascular, boxed::<TwoCompartmentExtraMicro>);
    model.add_calculator_factory(AbsorptionModel::Infusion, boxed::<TwoCompartmentInfusionMicro>);
    model
}

/// `linear.2comp.macro`: two-compartment calculators on (CL, Q, V1, V2).
pub fn two_compartment_macro() -> PkModel {
    let mut model = PkModel::new("linear.2comp.macro");
    model.add_calculator_factory(AbsorptionModel::Intravascular, boxed::<TwoCompartmentBolusMacro>);
    model.add_calculator_factory(AbsorptionModel::Extravascular, boxed::<TwoCompartmentExtraMacro>);
    model.add_calculator_factory(AbsorptionModel::Infusion, boxed::<TwoCompartmentInfusionMacro>);
    model
}

/// `linear.3comp.micro`: three-compartment calculators on the micro-constants.
pub fn three_compartment_micro() -> PkModel {
    let mut model = PkModel::new("linear.3comp.micro");
    model.add_calculator_factory(
        AbsorptionModel::Intravascular,
        boxed::<ThreeCompartmentBolusMicro>,
    );
    model.add_calculator_factory(
        AbsorptionModel::Extravascular,
        boxed::<ThreeCompartmentExtraMicro>,
    );
    model.add_calculator_factory(
        AbsorptionModel::Infusion,
        boxed::<ThreeCompartmentInfusionMicro>,
    );
    model
}

/// `linear.3comp.macro`: three-compartment calculators on
/// (CL, Q2, Q3, V1, V2, V3).
pub fn three_compartment_macro() -> PkModel {
    let mut model = PkModel::new("linear.3comp.macro");
    model.add_calculator_factory(
        AbsorptionModel::Intravascular,
        boxed::<ThreeCompartmentBolusMacro>,
    );
    model.add_calculator_factory(
        AbsorptionModel::Extravascular,
        boxed::<ThreeCompartmentExtraMacro>,
    );
    model.add_calculator_factory(
        AbsorptionModel::Infusion,
        boxed::<ThreeCompartmentInfusionMacro>,
    );
    model
}

/// Populate a collection with every linear model shipped by the crate.
pub fn default_populate(collection: &mut PkModelCollection) {
    collection.add_pk_model(one_compartment_micro());
    collection.add_pk_model(one_compartment_macro());
    collection.add_pk_model(two_compartment_micro());
    collection.add_pk_model(two_compartment_macro());
    collection.add_pk_model(three_compartment_micro());
    collection.add_pk_model(three_compartment_macro());
}

lazy_static! {
    static ref DEFAULT_COLLECTION: PkModelCollection = {
        let mut collection = PkModelCollection::new();
        default_populate(&mut collection);
        collection
    };
}

/// The collection of every linear model shipped by the crate.
pub fn default_collection() -> &'static PkModelCollection {
    &DEFAULT_COLLECTION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{IntakeEvent, ParameterId, ParameterSetEvent};

    #[test]
    fn default_collection_contains_all_linear_models() {
        let collection = default_collection();
        for id in [
            "linear.1comp.micro",
            "linear.1comp.macro",
            "linear.2comp.micro",
            "linear.2comp.macro",
            "linear.3comp.micro",
            "linear.3comp.macro",
        ] {
            let model = collection.get_pk_model_from_id(id);
            assert!(model.is_some(), "{} is missing", id);
            assert_eq!(model.unwrap().available_routes().len(), 3);
        }
    }

    #[test]
    fn duplicate_model_id_is_rejected() {
        let mut collection = PkModelCollection::new();
        assert!(collection.add_pk_model(one_compartment_micro()));
        assert!(!collection.add_pk_model(one_compartment_micro()));
    }

    #[test]
    fn created_calculator_computes() {
        let model = one_compartment_macro();
        let mut calculator = model
            .create_calculator(AbsorptionModel::Intravascular)
            .unwrap();
        assert_eq!(calculator.residual_size(), 1);
        assert_eq!(
            calculator.parameters_id(),
            &[ParameterId::CL, ParameterId::V]
        );

        let intake = IntakeEvent::new(0.0, 100.0, AbsorptionModel::Intravascular, 12.0, 0.0, 5);
        let parameters =
            ParameterSetEvent::new([(ParameterId::CL, 2.0), (ParameterId::V, 40.0)]);
        let prediction = calculator
            .calculate_intake_points(&intake, &parameters, &[0.0], false)
            .unwrap();
        assert_eq!(prediction.concentrations(0).len(), 5);
    }
}
