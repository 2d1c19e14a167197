//! CSV training-data ingestion.
//!
//! Columns are looked up by each field's `source_column` first, then by its
//! name. Cells that cannot be used (blank, non-numeric in a numeric column)
//! become missing values; such rows are dropped later by the classifier's
//! cleaning step.
//!
//! Input is decoded with the configured [`CsvEncoding`] unless the file starts
//! with a byte-order mark.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use encoding_rs::{Encoding, SHIFT_JIS};
use encoding_rs_io::DecodeReaderBytesBuilder;
use osteorx_core::{CsvEncoding, FeatureSchema, PatientRecord, encode_lenient};
use tracing::info;

use crate::classifier::LabeledSample;
use crate::error::MlError;

/// `None` passes UTF-8 through undecoded so invalid bytes still surface as
/// CSV errors.
fn text_encoding(encoding: CsvEncoding) -> Option<&'static Encoding> {
    match encoding {
        CsvEncoding::Utf8 => None,
        CsvEncoding::ShiftJis => Some(SHIFT_JIS),
    }
}

/// Parse CSV rows into labeled samples encoded with `schema`.
pub fn read_samples<R: Read>(
    reader: R,
    schema: &FeatureSchema,
    label_column: &str,
    delimiter: u8,
    encoding: CsvEncoding,
) -> Result<Vec<LabeledSample>, MlError> {
    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(text_encoding(encoding))
        .bom_sniffing(true)
        .strip_bom(true)
        .build(reader);
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(decoded);

    let headers: HashMap<String, usize> = csv
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_string(), i))
        .collect();
    let column = |source: Option<&str>, name: &str| -> Result<usize, MlError> {
        source
            .and_then(|s| headers.get(s))
            .or_else(|| headers.get(name))
            .copied()
            .ok_or_else(|| match source {
                Some(s) => MlError::dataset(format!("missing column '{s}' (field '{name}')")),
                None => MlError::dataset(format!("missing column '{name}'")),
            })
    };

    let numeric: Vec<(&str, usize)> = schema
        .numeric
        .iter()
        .map(|f| column(f.source_column.as_deref(), &f.name).map(|i| (f.name.as_str(), i)))
        .collect::<Result<_, MlError>>()?;
    let categorical: Vec<(&str, usize)> = schema
        .categorical
        .iter()
        .map(|f| column(f.source_column.as_deref(), &f.name).map(|i| (f.name.as_str(), i)))
        .collect::<Result<_, MlError>>()?;
    let label_idx = column(None, label_column)?;

    let mut samples = Vec::new();
    for (line, row) in csv.records().enumerate() {
        let row = row?;
        let cell = |i: usize| row.get(i).map(str::trim).unwrap_or("");

        let mut record = PatientRecord::new();
        for &(name, idx) in &numeric {
            if let Ok(v) = cell(idx).parse::<f64>() {
                if v.is_finite() {
                    record.set_numeric(name, v);
                }
            }
        }
        for &(name, idx) in &categorical {
            let value = cell(idx);
            if !value.is_empty() {
                record.set_category(name, value);
            }
        }

        let features = encode_lenient(&record, schema)
            .map_err(|e| MlError::dataset(format!("row {}: {e}", line + 2)))?;
        let label = Some(cell(label_idx))
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        samples.push(LabeledSample { features, label });
    }
    Ok(samples)
}

/// Read a training CSV from disk.
pub fn load_csv(
    path: &Path,
    schema: &FeatureSchema,
    label_column: &str,
    delimiter: char,
    encoding: CsvEncoding,
) -> Result<Vec<LabeledSample>, MlError> {
    let delimiter = u8::try_from(delimiter)
        .map_err(|_| MlError::dataset(format!("delimiter '{delimiter}' is not a single byte")))?;
    let file = File::open(path)?;
    let samples = read_samples(file, schema, label_column, delimiter, encoding)?;
    info!(
        path = %path.display(),
        rows = samples.len(),
        schema = %schema.name,
        ?encoding,
        "Training data loaded"
    );
    Ok(samples)
}
