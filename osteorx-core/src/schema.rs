//! Feature schema: the ordered, named columns a classifier is fit on.
//!
//! The column list is derived, never hand-written: numeric fields first in
//! declaration order, then one indicator column per non-reference level of
//! each categorical field. Training and inference both go through the same
//! [`FeatureSchema`], so the two can never drift apart.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A numeric input field that passes through the encoder unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericField {
    pub name: String,
    /// Header of the column holding this field in training CSVs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One level of a categorical domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryLevel {
    pub code: String,
    /// Alternative spellings accepted for this level (e.g. intake-sheet labels).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// A categorical field expanded into indicator columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    pub levels: Vec<CategoryLevel>,
    /// Level that gets no indicator column.
    pub reference: String,
}

/// Ordered numeric + categorical fields of a classifier's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub name: String,
    pub numeric: Vec<NumericField>,
    #[serde(default)]
    pub categorical: Vec<CategoricalField>,
}

/// Built-in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPreset {
    /// Bone density, bone turnover and renal markers plus history flags.
    #[default]
    Clinical,
    /// Pre-treatment labs from the retrospective one-year cohort sheet.
    RetrospectiveLab,
}

impl NumericField {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_column: None,
            unit: None,
        }
    }

    pub fn with_source(mut self, column: &str) -> Self {
        self.source_column = Some(column.to_string());
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

impl CategoryLevel {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Whether `value` names this level, by code or alias.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.trim();
        self.code == value || self.aliases.iter().any(|a| a == value)
    }
}

impl CategoricalField {
    pub fn new(name: &str, levels: Vec<CategoryLevel>, reference: &str) -> Self {
        Self {
            name: name.to_string(),
            source_column: None,
            levels,
            reference: reference.to_string(),
        }
    }

    pub fn with_source(mut self, column: &str) -> Self {
        self.source_column = Some(column.to_string());
        self
    }

    /// Resolve a raw value to the code of the level it names.
    pub fn resolve(&self, value: &str) -> Option<&str> {
        self.levels
            .iter()
            .find(|level| level.matches(value))
            .map(|level| level.code.as_str())
    }

    /// Levels that get an indicator column, in domain order.
    pub fn indicator_levels(&self) -> impl Iterator<Item = &CategoryLevel> {
        self.levels.iter().filter(|l| l.code != self.reference)
    }

    pub fn indicator_column(&self, level: &CategoryLevel) -> String {
        format!("{}_{}", self.name, level.code)
    }

    /// Comma-separated codes, for error messages.
    pub fn domain_description(&self) -> String {
        self.levels
            .iter()
            .map(|l| l.code.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FeatureSchema {
    /// Ordered column names of the encoded feature vector.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.numeric.iter().map(|f| f.name.clone()).collect();
        for field in &self.categorical {
            columns.extend(field.indicator_levels().map(|l| field.indicator_column(l)));
        }
        columns
    }

    pub fn width(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|f| f.indicator_levels().count())
                .sum::<usize>()
    }

    /// Stable identifier of the encoding: columns plus categorical domains.
    ///
    /// Aliases and source-column names are excluded since they do not change
    /// the encoded vector.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for column in self.columns() {
            hasher.update(column.as_bytes());
            hasher.update([0u8]);
        }
        for field in &self.categorical {
            hasher.update(field.name.as_bytes());
            hasher.update(b"=");
            for level in &field.levels {
                hasher.update(level.code.as_bytes());
                hasher.update(b"|");
            }
            hasher.update(b"ref:");
            hasher.update(field.reference.as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    pub fn numeric_field(&self, name: &str) -> Option<&NumericField> {
        self.numeric.iter().find(|f| f.name == name)
    }

    pub fn categorical_field(&self, name: &str) -> Option<&CategoricalField> {
        self.categorical.iter().find(|f| f.name == name)
    }

    /// Schema used by the pretrained clinical model.
    pub fn clinical() -> Self {
        let presence = || {
            vec![
                CategoryLevel::new("yes").with_aliases(&["あり"]),
                CategoryLevel::new("no").with_aliases(&["なし"]),
                CategoryLevel::new("unknown").with_aliases(&["不明"]),
            ]
        };

        Self {
            name: "clinical".to_string(),
            numeric: vec![
                NumericField::new("age").with_source("年齢").with_unit("years"),
                NumericField::new("lumbar_yam")
                    .with_source("腰椎YAM")
                    .with_unit("%"),
                NumericField::new("femoral_neck_yam")
                    .with_source("大腿骨頸部YAM")
                    .with_unit("%"),
                NumericField::new("tracp5b")
                    .with_source("TRACP5b")
                    .with_unit("mU/dL"),
                NumericField::new("egfr")
                    .with_source("eGFR")
                    .with_unit("mL/min"),
            ],
            categorical: vec![
                CategoricalField::new(
                    "sex",
                    vec![
                        CategoryLevel::new("female").with_aliases(&["女"]),
                        CategoryLevel::new("male").with_aliases(&["男"]),
                    ],
                    "female",
                )
                .with_source("性別"),
                CategoricalField::new("fracture_history", presence(), "yes").with_source("骨折歴"),
                CategoricalField::new("steroid_use", presence(), "yes")
                    .with_source("ステロイド使用"),
                CategoricalField::new(
                    "diabetes",
                    vec![
                        CategoryLevel::new("yes_other"),
                        CategoryLevel::new("yes_type2").with_aliases(&["あり(2型)"]),
                        CategoryLevel::new("no").with_aliases(&["なし"]),
                        CategoryLevel::new("unknown").with_aliases(&["不明"]),
                    ],
                    "yes_other",
                )
                .with_source("糖尿病既往"),
            ],
        }
    }

    /// Schema of the retrospective cohort sheet used for retraining.
    pub fn retrospective_lab() -> Self {
        Self {
            name: "retrospective_lab".to_string(),
            numeric: vec![
                NumericField::new("age").with_source("年齢").with_unit("years"),
                NumericField::new("lumbar_yam")
                    .with_source("投与前 腰椎 YAM値(%)")
                    .with_unit("%"),
                NumericField::new("tracp5b")
                    .with_source("投与前 Tracp 5b値(mU/dL)")
                    .with_unit("mU/dL"),
                NumericField::new("egfr")
                    .with_source("投与前 eGFR値(mL/min)")
                    .with_unit("mL/min"),
                NumericField::new("calcium")
                    .with_source("投与前 Ca値(mg/dl)")
                    .with_unit("mg/dL"),
                NumericField::new("albumin")
                    .with_source("投与前 ALB値(g/dl)")
                    .with_unit("g/dL"),
            ],
            categorical: Vec::new(),
        }
    }
}

impl SchemaPreset {
    pub fn schema(&self) -> FeatureSchema {
        match self {
            Self::Clinical => FeatureSchema::clinical(),
            Self::RetrospectiveLab => FeatureSchema::retrospective_lab(),
        }
    }
}

impl fmt::Display for SchemaPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clinical => write!(f, "clinical"),
            Self::RetrospectiveLab => write!(f, "retrospective_lab"),
        }
    }
}
