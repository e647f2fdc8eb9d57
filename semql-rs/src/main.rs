//! semql CLI - compile semantic queries to SQL
//!
//! Usage:
//!   semql compile --model <file|dir> --query <request.json> [--columns]
//!   semql validate --model <file|dir>

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use semql::config::{load_model, load_request_from_file};
use semql::SemqlError;

#[derive(Parser)]
#[command(name = "semql")]
#[command(about = "Compile semantic-layer queries to fan-out-safe BigQuery SQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query request to SQL
    Compile {
        /// Model file, or a directory of .yml/.yaml/.json model files
        #[arg(short, long)]
        model: PathBuf,

        /// JSON query request
        #[arg(short, long)]
        query: PathBuf,

        /// Also print the output columns as JSON
        #[arg(long)]
        columns: bool,
    },

    /// Load a model and report what it defines
    Validate {
        /// Model file, or a directory of model files
        #[arg(short, long)]
        model: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Compile {
            model,
            query,
            columns,
        } => cmd_compile(model, query, columns),
        Commands::Validate { model } => cmd_validate(model),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn cmd_compile(model: PathBuf, query: PathBuf, columns: bool) -> Result<(), SemqlError> {
    let model = load_model(&model)?;
    let request = load_request_from_file(&query)?;
    info!(query = %query.display(), "compiling");

    let compiled = model.generator().compile(&request)?;
    println!("{}", compiled.sql);
    if columns {
        let json = serde_json::to_string_pretty(&compiled.columns)
            .map_err(|e| SemqlError::Config(format!("cannot serialize columns: {e}")))?;
        println!("{json}");
    }
    Ok(())
}

fn cmd_validate(model: PathBuf) -> Result<(), SemqlError> {
    let model = load_model(&model)?;
    let registry = &model.registry;
    println!(
        "ok: {} tables, {} relationships",
        registry.tables().count(),
        registry.relationships().len()
    );
    Ok(())
}
