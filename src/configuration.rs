use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ErrorKind};

/// The tunables of the engine. Every field is optional in the JSON representation and
/// falls back to the value the mapping tool and the damage report templates were built around.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfiguration {
    /// Where the SQLite database lives, `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// How long a connection waits for the write lock held by another one.
    pub busy_timeout_millis: u64,
    /// The zoom factor of the mapping preview, used by the scaled hypotheses.
    pub scale_factor: f64,
    /// The largest font size used when writing text into a box.
    pub font_size: f64,
    /// The distance between two baselines, relative to the font size.
    pub line_spacing: f64,
    /// The horizontal inset of the text from the left border of its box.
    pub text_padding: f64,
    /// The minimum number of digits of an allocated document number.
    pub number_width: usize,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        EngineConfiguration {
            database_path: None,
            busy_timeout_millis: 5000,
            scale_factor: 2.0,
            font_size: 10.0,
            line_spacing: 1.15,
            text_padding: 1.5,
            number_width: 2,
        }
    }
}

impl EngineConfiguration {
    pub fn from_path(configuration_file_path: &Path) -> Result<Self, ContextError> {
        let configuration_file_contents = std::fs::read_to_string(configuration_file_path)
            .map_err(|error| {
                ContextError::with_error(
                    ErrorKind::Configuration,
                    format!(
                        "Failed to read the configuration file {:?}",
                        configuration_file_path
                    ),
                    &error,
                )
            })?;
        let configuration: EngineConfiguration =
            serde_json::from_str(&configuration_file_contents).map_err(|error| {
                ContextError::with_error(
                    ErrorKind::Configuration,
                    format!(
                        "Failed to parse the configuration file {:?}",
                        configuration_file_path
                    ),
                    &error,
                )
            })?;
        configuration.validate()?;

        Ok(configuration)
    }

    /// Rejects values that would make the hypotheses or the layout degenerate.
    pub fn validate(&self) -> Result<(), ContextError> {
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(ContextError::with_context(
                ErrorKind::Configuration,
                format!("The scale factor {} must be positive", self.scale_factor),
            ));
        }
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(ContextError::with_context(
                ErrorKind::Configuration,
                format!("The font size {} must be positive", self.font_size),
            ));
        }
        if !(self.line_spacing.is_finite() && self.line_spacing >= 1.0) {
            return Err(ContextError::with_context(
                ErrorKind::Configuration,
                format!("The line spacing {} must be at least 1", self.line_spacing),
            ));
        }
        if !(self.text_padding.is_finite() && self.text_padding >= 0.0) {
            return Err(ContextError::with_context(
                ErrorKind::Configuration,
                format!("The text padding {} must not be negative", self.text_padding),
            ));
        }

        Ok(())
    }

    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.busy_timeout_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn partial_configuration_keeps_the_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"fontSize": 8.5, "databasePath": "fields.sqlite"}}"#).unwrap();

        let configuration = EngineConfiguration::from_path(file.path()).unwrap();

        assert_eq!(configuration.font_size, 8.5);
        assert_eq!(configuration.database_path, Some(PathBuf::from("fields.sqlite")));
        assert_eq!(configuration.scale_factor, 2.0);
        assert_eq!(configuration.number_width, 2);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scaleFactor": 0}}"#).unwrap();

        let error = EngineConfiguration::from_path(file.path()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);

        let error = EngineConfiguration::from_path(Path::new("does/not/exist.json")).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);
    }
}
