//! Presentation of a recommendation: terminal text and PDF summary.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use genpdf::elements::{Break, Paragraph};
use genpdf::style::{Style, StyledString};
use genpdf::{Document, SimplePageDecorator};
use osteorx_core::config::ReportConfig;
use osteorx_core::{FeatureSchema, PatientRecord};
use osteorx_ml::{FeatureContribution, Recommendation};
use thiserror::Error;

pub const DISCLAIMER: &str =
    "This result is a prediction by an AI model and does not replace clinical judgement.";

const BAR_WIDTH: usize = 30;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to load font family '{family}' from {}: {message}", dir.display())]
    Font {
        dir: PathBuf,
        family: String,
        message: String,
    },

    #[error("Failed to render PDF: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn percent(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

/// One text bar per contribution, scaled to the largest magnitude.
pub fn attribution_bars(contributions: &[FeatureContribution]) -> Vec<String> {
    let max = contributions
        .iter()
        .map(|c| c.contribution.abs())
        .fold(0.0_f64, f64::max);
    let name_width = contributions
        .iter()
        .map(|c| c.feature.chars().count())
        .max()
        .unwrap_or(0);

    contributions
        .iter()
        .map(|c| {
            let len = if max > 0.0 {
                ((c.contribution.abs() / max) * BAR_WIDTH as f64).round() as usize
            } else {
                0
            };
            let mark = if c.contribution >= 0.0 { "+" } else { "-" };
            format!(
                "{:<name_width$}  {:>8}  {:>+8.4}  {}",
                c.feature,
                c.value,
                c.contribution,
                mark.repeat(len)
            )
        })
        .collect()
}

/// The record's values for the fields `schema` feeds to the model, in
/// schema order. Fields the model does not use are left out.
pub fn input_lines(record: &PatientRecord, schema: &FeatureSchema) -> Vec<String> {
    let numeric = schema.numeric.iter().filter_map(|field| {
        let value = record.numeric(&field.name)?;
        Some(match &field.unit {
            Some(unit) => format!("{}: {value} {unit}", field.name),
            None => format!("{}: {value}", field.name),
        })
    });
    let categorical = schema.categorical.iter().filter_map(|field| {
        record
            .category(&field.name)
            .map(|value| format!("{}: {value}", field.name))
    });
    numeric.chain(categorical).collect()
}

/// Ranked probability table, top contributions and the disclaimer.
pub fn render_text(rec: &Recommendation) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Recommended medication: {} ({})",
        rec.top_class,
        percent(rec.top_probability)
    );
    let _ = writeln!(out);

    let ranked = rec.distribution.ranked();
    let label_width = ranked
        .iter()
        .map(|c| c.label.chars().count())
        .max()
        .unwrap_or(0)
        .max("Medication".len());
    let _ = writeln!(out, "{:>4}  {:<label_width$}  {:>8}", "Rank", "Medication", "Prob.");
    for (i, class) in ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4}  {:<label_width$}  {:>8}",
            i + 1,
            class.label,
            percent(class.probability)
        );
    }

    if let Some(attribution) = &rec.attribution {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Top {} factors for {} (baseline {}, prediction {})",
            rec.top_contributions.len(),
            attribution.target_class,
            percent(attribution.baseline),
            percent(attribution.prediction)
        );
        for line in attribution_bars(&rec.top_contributions) {
            let _ = writeln!(out, "  {line}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{DISCLAIMER}");
    out
}

/// Write a one-document PDF summary of `rec` for `record`, listing only the
/// inputs `schema` uses.
pub fn write_pdf(
    rec: &Recommendation,
    record: &PatientRecord,
    schema: &FeatureSchema,
    config: &ReportConfig,
    path: &Path,
) -> Result<(), ReportError> {
    let font_family = genpdf::fonts::from_files(&config.font_dir, &config.font_family, None)
        .map_err(|e| ReportError::Font {
            dir: config.font_dir.clone(),
            family: config.font_family.clone(),
            message: e.to_string(),
        })?;

    let mut doc = Document::new(font_family);
    doc.set_title(config.title.clone());

    let mut decorator = SimplePageDecorator::new();
    decorator.set_margins(30);
    doc.set_page_decorator(decorator);

    let heading = Style::new().bold().with_font_size(14);
    doc.push(Paragraph::new(StyledString::new(
        config.title.clone(),
        Style::new().bold().with_font_size(18),
    )));
    doc.push(Break::new(1));

    doc.push(Paragraph::new(StyledString::new(
        format!(
            "Recommended medication: {} ({})",
            rec.top_class,
            percent(rec.top_probability)
        ),
        heading,
    )));
    doc.push(Break::new(1));

    doc.push(Paragraph::new(StyledString::new("Probability by medication", heading)));
    for (i, class) in rec.distribution.ranked().iter().enumerate() {
        doc.push(Paragraph::new(format!(
            "{}. {}: {}",
            i + 1,
            class.label,
            percent(class.probability)
        )));
    }
    doc.push(Break::new(1));

    doc.push(Paragraph::new(StyledString::new("Patient input", heading)));
    for line in input_lines(record, schema) {
        doc.push(Paragraph::new(line));
    }
    doc.push(Break::new(1));

    if rec.attribution.is_some() {
        doc.push(Paragraph::new(StyledString::new(
            "Main contributing factors",
            heading,
        )));
        for c in &rec.top_contributions {
            doc.push(Paragraph::new(format!(
                "{} (value {}): {:+.4}",
                c.feature, c.value, c.contribution
            )));
        }
        doc.push(Break::new(1));
    }

    doc.push(Paragraph::new(StyledString::new(
        DISCLAIMER,
        Style::new().italic(),
    )));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    doc.render_to_file(path)
        .map_err(|e| ReportError::Render(e.to_string()))?;
    tracing::info!(path = %path.display(), "PDF report written");
    Ok(())
}
