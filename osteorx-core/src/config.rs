//! Configuration system for osteorx.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/osteorx/config.toml` and/or `.osteorx/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schema::SchemaPreset;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsteoConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub forest: ForestConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub explain: ExplainConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Where the fitted model lives and which feature schema it uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub schema: SchemaPreset,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            schema: SchemaPreset::default(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/osteorx-model.json")
}

/// Number of candidate features examined per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    #[default]
    Sqrt,
    Log2,
    All,
    Fixed(usize),
}

impl MaxFeatures {
    /// Resolve against the number of feature columns; always at least 1.
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            Self::Sqrt => (n_features as f64).sqrt() as usize,
            Self::Log2 => (n_features as f64).log2() as usize,
            Self::All => n_features,
            Self::Fixed(k) => (*k).min(n_features),
        };
        n.max(1)
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    #[serde(default)]
    pub max_features: MaxFeatures,
    #[serde(default = "default_true")]
    pub bootstrap: bool,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: MaxFeatures::default(),
            bootstrap: true,
            random_state: default_random_state(),
        }
    }
}

fn default_n_estimators() -> usize {
    100
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_random_state() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Training CSV layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Header of the column holding the prescribed drug.
    #[serde(default = "default_label_column")]
    pub label_column: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub encoding: CsvEncoding,
}

/// Text encoding of training CSVs. A byte-order mark overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CsvEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// Windows code page 932, the usual export encoding of Japanese spreadsheets.
    #[serde(rename = "shift_jis", alias = "cp932", alias = "sjis", alias = "shift-jis")]
    ShiftJis,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            label_column: default_label_column(),
            delimiter: default_delimiter(),
            encoding: CsvEncoding::default(),
        }
    }
}

fn default_label_column() -> String {
    "使用骨粗鬆症薬名①(メイン)".to_string()
}

fn default_delimiter() -> char {
    ','
}

/// Attribution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How many features the attribution chart shows.
    #[serde(default = "default_top_features")]
    pub top_features: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_features: default_top_features(),
        }
    }
}

fn default_top_features() -> usize {
    10
}

/// PDF report settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_font_dir")]
    pub font_dir: PathBuf,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_report_title")]
    pub title: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            font_dir: default_font_dir(),
            font_family: default_font_family(),
            title: default_report_title(),
        }
    }
}

fn default_font_dir() -> PathBuf {
    PathBuf::from("/usr/share/fonts/truetype/liberation")
}

fn default_font_family() -> String {
    "LiberationSans".to_string()
}

fn default_report_title() -> String {
    "Osteoporosis Medication Selection Support Report".to_string()
}

impl OsteoConfig {
    /// Reject values the trainer or report cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.forest.n_estimators == 0 {
            return Err(invalid("forest.n_estimators", "must be at least 1"));
        }
        if self.forest.min_samples_split < 2 {
            return Err(invalid("forest.min_samples_split", "must be at least 2"));
        }
        if self.forest.min_samples_leaf == 0 {
            return Err(invalid("forest.min_samples_leaf", "must be at least 1"));
        }
        if self.forest.max_depth == Some(0) {
            return Err(invalid("forest.max_depth", "must be at least 1 when set"));
        }
        if self.forest.max_features == MaxFeatures::Fixed(0) {
            return Err(invalid("forest.max_features", "fixed count must be at least 1"));
        }
        if self.explain.top_features == 0 {
            return Err(invalid("explain.top_features", "must be at least 1"));
        }
        if !self.data.delimiter.is_ascii() {
            return Err(invalid("data.delimiter", "must be a single ASCII character"));
        }
        if self.data.label_column.trim().is_empty() {
            return Err(invalid("data.label_column", "must not be empty"));
        }
        Ok(())
    }

    /// Serialize as pretty TOML, as written by `config init`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `OSTEORX_`)
/// 3. Workspace-local config (`.osteorx/config.toml`)
/// 4. User config (`~/.config/osteorx/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&OsteoConfig>,
) -> Result<OsteoConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(OsteoConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // OSTEORX_FOREST__N_ESTIMATORS, OSTEORX_MODEL__SCHEMA, etc.
    figment = figment.merge(Env::prefixed("OSTEORX_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: OsteoConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    tracing::debug!(
        schema = %config.model.schema,
        model = %config.model.path.display(),
        "configuration loaded"
    );
    Ok(config)
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".osteorx").join("config.toml")
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "osteorx", "osteorx")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Check whether any osteorx configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
