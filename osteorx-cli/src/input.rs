//! Patient input flags and their plausibility checks.

use clap::{Args, ValueEnum};
use osteorx_core::{DiabetesHistory, PatientRecord, Presence, Sex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("{field} = {value} is outside the accepted range {range}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: String,
    },
}

/// One patient's values. Defaults are the intake form's defaults.
#[derive(Args, Debug, Clone)]
pub struct PatientArgs {
    /// Age in years (40-100)
    #[arg(long, default_value_t = 75.0)]
    pub age: f64,

    #[arg(long, value_enum, default_value_t = SexArg::Male)]
    pub sex: SexArg,

    /// Lumbar spine BMD, % of young adult mean (10-120)
    #[arg(long, default_value_t = 60.0)]
    pub lumbar_yam: f64,

    /// Femoral neck BMD, % of young adult mean (10-120)
    #[arg(long, default_value_t = 58.0)]
    pub femoral_neck_yam: f64,

    /// TRACP-5b in mU/dL (>= 0)
    #[arg(long, default_value_t = 400.0)]
    pub tracp5b: f64,

    /// eGFR in mL/min/1.73m² (>= 5)
    #[arg(long, default_value_t = 65.0)]
    pub egfr: f64,

    /// Serum calcium in mg/dL (6-12)
    #[arg(long, default_value_t = 9.5)]
    pub calcium: f64,

    /// Serum albumin in g/dL (2-5)
    #[arg(long, default_value_t = 4.0)]
    pub albumin: f64,

    #[arg(long, value_enum, default_value_t = PresenceArg::Yes)]
    pub fracture_history: PresenceArg,

    #[arg(long, value_enum, default_value_t = PresenceArg::Yes)]
    pub steroid_use: PresenceArg,

    #[arg(long, value_enum, default_value_t = DiabetesArg::YesType2)]
    pub diabetes: DiabetesArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SexArg {
    Female,
    Male,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceArg {
    Yes,
    No,
    Unknown,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiabetesArg {
    #[value(name = "yes_other")]
    YesOther,
    #[value(name = "yes_type2")]
    YesType2,
    No,
    Unknown,
}

impl From<SexArg> for Sex {
    fn from(arg: SexArg) -> Self {
        match arg {
            SexArg::Female => Sex::Female,
            SexArg::Male => Sex::Male,
        }
    }
}

impl From<PresenceArg> for Presence {
    fn from(arg: PresenceArg) -> Self {
        match arg {
            PresenceArg::Yes => Presence::Yes,
            PresenceArg::No => Presence::No,
            PresenceArg::Unknown => Presence::Unknown,
        }
    }
}

impl From<DiabetesArg> for DiabetesHistory {
    fn from(arg: DiabetesArg) -> Self {
        match arg {
            DiabetesArg::YesOther => DiabetesHistory::YesOther,
            DiabetesArg::YesType2 => DiabetesHistory::YesType2,
            DiabetesArg::No => DiabetesHistory::No,
            DiabetesArg::Unknown => DiabetesHistory::Unknown,
        }
    }
}

fn check(field: &'static str, value: f64, min: f64, max: Option<f64>) -> Result<(), InputError> {
    let in_range = value.is_finite() && value >= min && max.is_none_or(|m| value <= m);
    if in_range {
        return Ok(());
    }
    let range = match max {
        Some(max) => format!("{min}-{max}"),
        None => format!(">= {min}"),
    };
    Err(InputError::OutOfRange {
        field,
        value,
        range,
    })
}

impl PatientArgs {
    pub fn validate(&self) -> Result<(), InputError> {
        check("age", self.age, 40.0, Some(100.0))?;
        check("lumbar_yam", self.lumbar_yam, 10.0, Some(120.0))?;
        check("femoral_neck_yam", self.femoral_neck_yam, 10.0, Some(120.0))?;
        check("tracp5b", self.tracp5b, 0.0, None)?;
        check("egfr", self.egfr, 5.0, None)?;
        check("calcium", self.calcium, 6.0, Some(12.0))?;
        check("albumin", self.albumin, 2.0, Some(5.0))?;
        Ok(())
    }

    /// Validated record carrying every field of both built-in schemas.
    pub fn to_record(&self) -> Result<PatientRecord, InputError> {
        self.validate()?;
        Ok(PatientRecord::new()
            .with_numeric("age", self.age)
            .with_numeric("lumbar_yam", self.lumbar_yam)
            .with_numeric("femoral_neck_yam", self.femoral_neck_yam)
            .with_numeric("tracp5b", self.tracp5b)
            .with_numeric("egfr", self.egfr)
            .with_numeric("calcium", self.calcium)
            .with_numeric("albumin", self.albumin)
            .with_category("sex", Sex::from(self.sex))
            .with_category("fracture_history", Presence::from(self.fracture_history))
            .with_category("steroid_use", Presence::from(self.steroid_use))
            .with_category("diabetes", DiabetesHistory::from(self.diabetes)))
    }
}
