use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use aip_metadata_backfill::app::{App, ProgressSink};
use aip_metadata_backfill::config::ConfigLoader;
use aip_metadata_backfill::db::DescriptiveDb;
use aip_metadata_backfill::error::{BackfillError, ErrorKind};
use aip_metadata_backfill::output::{ConsoleOutput, JsonOutput, OutputMode};
use aip_metadata_backfill::storage_service::StorageHttpClient;
use aip_metadata_backfill::store::ManifestCache;

#[derive(Parser)]
#[command(name = "aip-backfill")]
#[command(
    about = "Backfill legacy AtoM digital-object properties from Archivematica AIP METS files"
)]
#[command(version, author)]
struct Cli {
    /// Path to the JSON configuration (defaults to ./aip-backfill.json)
    #[arg(long)]
    config: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BackfillError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BackfillError) -> u8 {
    match error.kind() {
        ErrorKind::Configuration => 2,
        ErrorKind::SetupConnectivity => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let storage = StorageHttpClient::new(&config.storage_service)?;
    let db = DescriptiveDb::connect(&config.database)?;
    let cache = ManifestCache::new(config.cache_dir.clone());
    let mut app = App::new(db, storage, cache);

    app.preflight()?;

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Text => &ConsoleOutput,
        OutputMode::Json => &JsonOutput,
    };
    let summary = app.run(sink)?;

    match output_mode {
        OutputMode::Text => ConsoleOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
    }

    if config.delete_temporary_files {
        app.teardown(sink)?;
    }
    Ok(())
}
