use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// The classes the animal classifier was trained on.
///
/// Variant order is the model's output order: the score at index `i` belongs to
/// the `i`-th variant. Reordering variants silently breaks every prediction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnimalClass {
    Cat,
    Cow,
    Dog,
    Elephant,
    Horse,
}

impl AnimalClass {
    /// Number of labels, and so the expected length of a model output vector.
    pub const LEN: usize = <AnimalClass as strum::EnumCount>::COUNT;

    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub prediction: AnimalClass,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn labels_follow_model_output_order() {
        let labels: Vec<&str> = AnimalClass::iter().map(AnimalClass::label).collect();
        assert_eq!(labels, ["cat", "cow", "dog", "elephant", "horse"]);
        assert_eq!(AnimalClass::LEN, 5);
    }

    #[test]
    fn index_lookup_is_bounded() {
        assert_eq!(AnimalClass::from_index(0), Some(AnimalClass::Cat));
        assert_eq!(AnimalClass::from_index(4), Some(AnimalClass::Horse));
        assert_eq!(AnimalClass::from_index(5), None);
    }

    #[test]
    fn string_forms_agree() {
        for class in AnimalClass::iter() {
            assert_eq!(class.to_string(), class.label());
            assert_eq!(AnimalClass::from_str(class.label()).unwrap(), class);
        }
    }

    #[test]
    fn prediction_serializes_as_bare_label() {
        let body = serde_json::to_value(PredictionResponse {
            prediction: AnimalClass::Elephant,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "prediction": "elephant" }));
    }

    #[test]
    fn error_serializes_with_error_key() {
        let body = serde_json::to_value(ErrorResponse::new("Empty filename")).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Empty filename" }));
    }
}
