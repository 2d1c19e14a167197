//! Patient records: the raw, per-request input to the feature encoder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One patient's clinical input.
///
/// Values are keyed by schema field name so the encoder can stay
/// schema-driven. Fields a schema does not use are simply ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(default)]
    numeric: BTreeMap<String, f64>,
    #[serde(default)]
    categorical: BTreeMap<String, String>,
}

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numeric(mut self, field: impl Into<String>, value: f64) -> Self {
        self.set_numeric(field, value);
        self
    }

    pub fn with_category(mut self, field: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.set_category(field, value);
        self
    }

    pub fn set_numeric(&mut self, field: impl Into<String>, value: f64) {
        self.numeric.insert(field.into(), value);
    }

    pub fn set_category(&mut self, field: impl Into<String>, value: impl AsRef<str>) {
        self.categorical
            .insert(field.into(), value.as_ref().to_string());
    }

    pub fn numeric(&self, field: &str) -> Option<f64> {
        self.numeric.get(field).copied()
    }

    pub fn category(&self, field: &str) -> Option<&str> {
        self.categorical.get(field).map(String::as_str)
    }
}

/// Patient sex as collected by the intake form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

/// Yes / no / unknown answer used by fracture history and steroid use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Yes,
    No,
    Unknown,
}

/// Diabetes history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiabetesHistory {
    /// Diabetes history other than type 2.
    YesOther,
    YesType2,
    No,
    Unknown,
}

impl Sex {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

impl Presence {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }
}

impl DiabetesHistory {
    pub fn code(&self) -> &'static str {
        match self {
            Self::YesOther => "yes_other",
            Self::YesType2 => "yes_type2",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }
}

macro_rules! impl_code_traits {
    ($($ty:ty),*) => {
        $(
            impl AsRef<str> for $ty {
                fn as_ref(&self) -> &str {
                    self.code()
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.code())
                }
            }
        )*
    };
}

impl_code_traits!(Sex, Presence, DiabetesHistory);
