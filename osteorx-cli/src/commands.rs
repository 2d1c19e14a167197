//! Subcommand handlers.

use std::path::{Path, PathBuf};

use osteorx_core::config::{OsteoConfig, config_exists, load_config, workspace_config_path};
use osteorx_core::{FeatureSchema, SchemaPreset};
use osteorx_ml::{
    ClassifierModel, ForestParams, RecommendOptions, load_csv, load_model, recommend, save_model,
};

use crate::report;
use crate::{Commands, ConfigAction, RecommendArgs, SchemaArg};

pub fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            data,
            output,
            label_column,
            schema,
        } => handle_train(workspace, &data, output, label_column, schema),
        Commands::Recommend(args) => handle_recommend(workspace, *args),
        Commands::Schema { schema } => handle_schema(workspace, schema),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<OsteoConfig> {
    if !config_exists(Some(workspace)) {
        tracing::debug!("No configuration file found, using defaults and environment");
    }
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn active_schema(config: &OsteoConfig, arg: Option<SchemaArg>) -> FeatureSchema {
    arg.map(SchemaPreset::from)
        .unwrap_or(config.model.schema)
        .schema()
}

/// Relative paths from config are taken relative to the workspace.
fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn train(
    config: &OsteoConfig,
    schema: &FeatureSchema,
    data: &Path,
    label_column: Option<&str>,
) -> anyhow::Result<ClassifierModel> {
    let label_column = label_column.unwrap_or(&config.data.label_column);
    let samples = load_csv(
        data,
        schema,
        label_column,
        config.data.delimiter,
        config.data.encoding,
    )?;
    let model = ClassifierModel::fit(schema, samples, &ForestParams::from(&config.forest))?;
    Ok(model)
}

fn handle_train(
    workspace: &Path,
    data: &Path,
    output: Option<PathBuf>,
    label_column: Option<String>,
    schema: Option<SchemaArg>,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let schema = active_schema(&config, schema);
    let model = train(&config, &schema, data, label_column.as_deref())?;

    let output = output.unwrap_or_else(|| resolve(workspace, &config.model.path));
    let model_id = save_model(&model, &output)?;

    let summary = model.summary();
    println!("Trained on schema '{}' ({} columns)", schema.name, schema.width());
    println!(
        "Rows: {} read, {} used, {} dropped (missing values)",
        summary.rows_total, summary.rows_used, summary.rows_dropped
    );
    println!("Classes:");
    for (label, count) in &summary.class_counts {
        println!("  {label:<30} {count:>5}");
    }
    println!("Model {} saved to {}", model_id, output.display());
    Ok(())
}

fn handle_recommend(workspace: &Path, args: RecommendArgs) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let schema = active_schema(&config, args.schema);
    let record = args.patient.to_record()?;

    let model = match &args.data {
        Some(data) => train(&config, &schema, data, args.label_column.as_deref())?,
        None => {
            let path = args
                .model
                .clone()
                .unwrap_or_else(|| resolve(workspace, &config.model.path));
            load_model(&path, &schema)?
        }
    };

    let mut options = RecommendOptions::from(&config.explain);
    if args.no_explain {
        options.explain = false;
    }
    if let Some(top) = args.top {
        options.top_features = top.get();
    }

    let rec = recommend(&model, &record, options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rec)?);
    } else {
        print!("{}", report::render_text(&rec));
    }

    if let Some(pdf) = &args.pdf {
        report::write_pdf(&rec, &record, model.schema(), &config.report, pdf)?;
        if !args.json {
            println!("PDF report written to {}", pdf.display());
        }
    }
    Ok(())
}

fn handle_schema(workspace: &Path, schema: Option<SchemaArg>) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let schema = active_schema(&config, schema);
    println!(
        "Schema '{}' (fingerprint {}, {} columns)",
        schema.name,
        schema.fingerprint(),
        schema.width()
    );
    for (i, column) in schema.columns().iter().enumerate() {
        println!("  {:>2}  {}", i, column);
    }
    for field in &schema.categorical {
        println!(
            "  {}: {} (reference: {})",
            field.name,
            field.domain_description(),
            field.reference
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&config_path, OsteoConfig::default().to_toml()?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let ws = Path::new("/srv/osteorx");
        assert_eq!(
            resolve(ws, Path::new("models/m.json")),
            PathBuf::from("/srv/osteorx/models/m.json")
        );
        assert_eq!(
            resolve(ws, Path::new("/tmp/m.json")),
            PathBuf::from("/tmp/m.json")
        );
    }

    #[test]
    fn test_active_schema_prefers_flag() {
        let config = OsteoConfig::default();
        assert_eq!(active_schema(&config, None).name, FeatureSchema::clinical().name);
        assert_eq!(
            active_schema(&config, Some(SchemaArg::RetrospectiveLab)).width(),
            6
        );
    }

    #[test]
    fn test_config_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        handle_config(ConfigAction::Init, dir.path()).unwrap();
        let path = workspace_config_path(dir.path());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("n_estimators = 100"));

        std::fs::write(&path, "[forest]\nn_estimators = 7\n").unwrap();
        handle_config(ConfigAction::Init, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[forest]\nn_estimators = 7\n"
        );
    }
}
