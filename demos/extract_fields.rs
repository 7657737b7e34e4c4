use clap::Parser;
use std::path::{Path, PathBuf};

use env_logger::Env;
use fieldmap::{ContextError, EngineConfiguration, ErrorKind, FieldCoordinate};

#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct CliArguments {
    /// The document to read the fields from.
    #[arg(short = 'p', long = "pdf", value_name = "pdf_file")]
    pdf_path: PathBuf,
    /// A JSON array of field coordinates.
    #[arg(short = 'c', long = "coordinates", value_name = "json_file")]
    coordinates_path: PathBuf,
    #[arg(long = "configuration", value_name = "json_file")]
    configuration_path: Option<PathBuf>,
}

fn main() {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    if let Err(error) = fallible_main() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

fn fallible_main() -> Result<(), ContextError> {
    let arguments = CliArguments::parse();
    log::debug!("{:?}", arguments);

    let configuration = match &arguments.configuration_path {
        Some(configuration_path) => EngineConfiguration::from_path(configuration_path)?,
        None => EngineConfiguration::default(),
    };
    let pdf_bytes = std::fs::read(&arguments.pdf_path).map_err(|error| {
        ContextError::with_error(
            ErrorKind::UnreadablePdf,
            format!("Failed to read {:?}", arguments.pdf_path),
            &error,
        )
    })?;
    let coordinates: Vec<FieldCoordinate> = read_json(&arguments.coordinates_path)?;

    let extraction = fieldmap::extraction::extract(&pdf_bytes, &coordinates, &configuration)?;
    let output = serde_json::to_string_pretty(&extraction).map_err(|error| {
        ContextError::with_error(
            ErrorKind::Rendering,
            "Failed to serialize the extraction",
            &error,
        )
    })?;
    println!("{}", output);

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ContextError> {
    let contents = std::fs::read_to_string(path).map_err(|error| {
        ContextError::with_error(
            ErrorKind::Configuration,
            format!("Failed to read {:?}", path),
            &error,
        )
    })?;
    serde_json::from_str(&contents).map_err(|error| {
        ContextError::with_error(
            ErrorKind::Configuration,
            format!("Failed to parse {:?}", path),
            &error,
        )
    })
}
