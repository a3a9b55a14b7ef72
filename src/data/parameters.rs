use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a pharmacokinetic parameter.
///
/// Covers the macro-parameters found in drug-model definitions (CL, V, Q...)
/// and the micro-constants the calculators consume directly (Ke, K12...).
/// `TestR` and `TestT` belong to the asymptotic model used by the test
/// harnesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParameterId {
    V,
    V1,
    V2,
    V3,
    CL,
    Q,
    Q2,
    Q3,
    Ka,
    Ke,
    K12,
    K21,
    K13,
    K31,
    F,
    TestR,
    TestT,
}

impl ParameterId {
    /// The canonical string id, as used in drug-model definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterId::V => "V",
            ParameterId::V1 => "V1",
            ParameterId::V2 => "V2",
            ParameterId::V3 => "V3",
            ParameterId::CL => "CL",
            ParameterId::Q => "Q",
            ParameterId::Q2 => "Q2",
            ParameterId::Q3 => "Q3",
            ParameterId::Ka => "Ka",
            ParameterId::Ke => "Ke",
            ParameterId::K12 => "K12",
            ParameterId::K21 => "K21",
            ParameterId::K13 => "K13",
            ParameterId::K31 => "K31",
            ParameterId::F => "F",
            ParameterId::TestR => "TestR",
            ParameterId::TestT => "TestT",
        }
    }
}

impl FromStr for ParameterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V" => Ok(ParameterId::V),
            "V1" => Ok(ParameterId::V1),
            "V2" => Ok(ParameterId::V2),
            "V3" => Ok(ParameterId::V3),
            "CL" => Ok(ParameterId::CL),
            "Q" => Ok(ParameterId::Q),
            "Q2" => Ok(ParameterId::Q2),
            "Q3" => Ok(ParameterId::Q3),
            "Ka" => Ok(ParameterId::Ka),
            "Ke" => Ok(ParameterId::Ke),
            "K12" => Ok(ParameterId::K12),
            "K21" => Ok(ParameterId::K21),
            "K13" => Ok(ParameterId::K13),
            "K31" => Ok(ParameterId::K31),
            "F" => Ok(ParameterId::F),
            "TestR" => Ok(ParameterId::TestR),
            "TestT" => Ok(ParameterId::TestT),
            _ => Err(format!("unknown parameter id: {}", s)),
        }
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single resolved parameter: an id and its numeric value for one intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    id: ParameterId,
    value: f64,
}

impl Parameter {
    /// Create a new parameter
    pub fn new(id: ParameterId, value: f64) -> Self {
        Parameter { id, value }
    }

    /// Get the parameter id
    pub fn id(&self) -> ParameterId {
        self.id
    }

    /// Get the resolved value
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// The set of resolved parameter values for exactly one intake.
///
/// Construction is order-independent: parameters are sorted by id internally,
/// so iteration order is deterministic regardless of how the set was built.
/// Different intakes of the same treatment may carry different resolved
/// values (covariate-dependent); the set is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSetEvent {
    parameters: Vec<Parameter>,
}

impl ParameterSetEvent {
    /// Build a parameter set from (id, value) pairs.
    ///
    /// A duplicated id keeps the last value supplied.
    pub fn new(values: impl IntoIterator<Item = (ParameterId, f64)>) -> Self {
        let mut parameters: Vec<Parameter> =
            values.into_iter().map(|(id, v)| Parameter::new(id, v)).collect();
        parameters.sort_by_key(|p| p.id());
        parameters.dedup_by(|later, earlier| {
            if later.id() == earlier.id() {
                earlier.value = later.value;
                true
            } else {
                false
            }
        });
        ParameterSetEvent { parameters }
    }

    /// Look up the resolved value of a parameter.
    pub fn value(&self, id: ParameterId) -> Option<f64> {
        self.parameters
            .binary_search_by_key(&id, |p| p.id())
            .ok()
            .map(|i| self.parameters[i].value())
    }

    /// Number of parameters in the set.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Iterate over the parameters in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_order_independent() {
        let a = ParameterSetEvent::new([(ParameterId::V, 50.0), (ParameterId::CL, 3.2)]);
        let b = ParameterSetEvent::new([(ParameterId::CL, 3.2), (ParameterId::V, 50.0)]);
        assert_eq!(a, b);
        assert_eq!(a.value(ParameterId::CL), Some(3.2));
        assert_eq!(a.value(ParameterId::V), Some(50.0));
        assert_eq!(a.value(ParameterId::Ka), None);
    }

    #[test]
    fn duplicate_id_keeps_last_value() {
        let set = ParameterSetEvent::new([(ParameterId::Ke, 0.1), (ParameterId::Ke, 0.2)]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.value(ParameterId::Ke), Some(0.2));
    }

    #[test]
    fn id_string_round_trip() {
        for id in [
            ParameterId::V,
            ParameterId::CL,
            ParameterId::Ka,
            ParameterId::K31,
            ParameterId::TestT,
        ] {
            assert_eq!(id.as_str().parse::<ParameterId>().unwrap(), id);
        }
        assert!("Vmax".parse::<ParameterId>().is_err());
    }
}
