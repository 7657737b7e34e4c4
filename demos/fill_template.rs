use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use env_logger::Env;
use fieldmap::{ContextError, EngineConfiguration, ErrorKind, FieldCoordinate, FieldValue};

#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct CliArguments {
    #[arg(short = 't', long = "template", value_name = "pdf_file")]
    template_path: PathBuf,
    /// A JSON array of field coordinates.
    #[arg(short = 'c', long = "coordinates", value_name = "json_file")]
    coordinates_path: PathBuf,
    /// A JSON object from field identifiers to texts.
    #[arg(short = 'v', long = "values", value_name = "json_file")]
    values_path: PathBuf,
    #[arg(short = 'o', long = "output", value_name = "file_path")]
    output_file_path: PathBuf,
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

    let template = std::fs::read(&arguments.template_path).map_err(|error| {
        ContextError::with_error(
            ErrorKind::MissingTemplate,
            format!("Failed to read {:?}", arguments.template_path),
            &error,
        )
    })?;
    let coordinates: Vec<FieldCoordinate> = read_json(&arguments.coordinates_path)?;
    let texts: BTreeMap<String, String> = read_json(&arguments.values_path)?;
    let values: BTreeMap<String, FieldValue> = texts
        .into_iter()
        .map(|(field_id, text)| (field_id, FieldValue::Text(text)))
        .collect();

    let filled = fieldmap::fill::fill(
        &template,
        &coordinates,
        &values,
        &EngineConfiguration::default(),
    )?;
    for warning in &filled.warnings {
        log::warn!("{:?}", warning);
    }
    std::fs::write(&arguments.output_file_path, &filled.pdf_bytes).map_err(|error| {
        ContextError::with_error(
            ErrorKind::Rendering,
            "Failed to save the output file",
            &error,
        )
    })?;
    log::info!(
        "Saved the output file to the path: {:?}",
        arguments.output_file_path
    );

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
