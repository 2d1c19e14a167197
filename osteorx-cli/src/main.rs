//! osteorx CLI: osteoporosis medication selection support from the terminal.
//!
//! Trains the drug classifier from a retrospective CSV, recommends a
//! medication for one patient with the contributing factors, and renders the
//! result as a text report, JSON or a PDF summary.

mod commands;
mod input;
mod report;

use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use input::PatientArgs;

/// osteorx: osteoporosis medication selection support
#[derive(Parser, Debug)]
#[command(name = "osteorx", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train the classifier from a CSV and save the model
    Train {
        /// Training CSV with a header row
        #[arg(short, long)]
        data: PathBuf,

        /// Where to write the model (defaults to model.path from config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column holding the prescribed drug
        #[arg(long)]
        label_column: Option<String>,

        /// Feature schema to encode with
        #[arg(long, value_enum)]
        schema: Option<SchemaArg>,
    },
    /// Recommend a medication for one patient
    Recommend(Box<RecommendArgs>),
    /// Print the columns of the active feature schema
    Schema {
        #[arg(long, value_enum)]
        schema: Option<SchemaArg>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct RecommendArgs {
    /// Saved model to load (defaults to model.path from config)
    #[arg(short, long, conflicts_with = "data")]
    model: Option<PathBuf>,

    /// Retrain in memory from this CSV instead of loading a saved model
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Column holding the prescribed drug (with --data)
    #[arg(long, requires = "data")]
    label_column: Option<String>,

    #[arg(long, value_enum)]
    schema: Option<SchemaArg>,

    /// Number of contributing factors to show (at least 1)
    #[arg(long)]
    top: Option<NonZeroUsize>,

    /// Skip the attribution step
    #[arg(long)]
    no_explain: bool,

    /// Also write a PDF report to this path
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Print the recommendation as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    patient: PatientArgs,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaArg {
    Clinical,
    #[value(name = "retrospective_lab")]
    RetrospectiveLab,
}

impl From<SchemaArg> for osteorx_core::SchemaPreset {
    fn from(arg: SchemaArg) -> Self {
        match arg {
            SchemaArg::Clinical => Self::Clinical,
            SchemaArg::RetrospectiveLab => Self::RetrospectiveLab,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "osteorx", "osteorx")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "osteorx.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_recommend_rejects_model_with_data() {
        let parsed = Cli::try_parse_from([
            "osteorx",
            "recommend",
            "--model",
            "m.json",
            "--data",
            "train.csv",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_recommend_rejects_zero_top() {
        let parsed = Cli::try_parse_from(["osteorx", "recommend", "--top", "0"]);
        assert!(parsed.is_err());
        let parsed = Cli::try_parse_from(["osteorx", "recommend", "--top", "1"]);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_recommend_flags_parse() {
        let cli = Cli::try_parse_from([
            "osteorx",
            "-v",
            "recommend",
            "--schema",
            "retrospective_lab",
            "--top",
            "5",
            "--no-explain",
            "--json",
            "--age",
            "82",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Recommend(args) = cli.command else {
            panic!("expected recommend");
        };
        assert_eq!(args.schema, Some(SchemaArg::RetrospectiveLab));
        assert_eq!(args.top.map(NonZeroUsize::get), Some(5));
        assert!(args.no_explain && args.json);
        assert_eq!(args.patient.age, 82.0);
    }
}
