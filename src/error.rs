// #![deny(clippy::unwrap_used, clippy::expect_used)]

use serde::{Deserialize, Serialize};

/// The family an error belongs to, so that callers can react to it without parsing the message.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A bounding box with a non-positive or non-finite extent, a zero page or a duplicated field.
    InvalidGeometry,
    /// Coordinates were written against a template version which does not exist.
    UnknownTemplate,
    /// A template version (or the active one of a kind) was requested but is absent.
    MissingTemplate,
    /// The PDF parser is unable to open the document.
    UnreadablePdf,
    /// The numbering series has never been provisioned.
    NoSeriesConfigured,
    /// The datastore refused or failed an operation.
    Storage,
    /// A configuration file could not be read or parsed.
    Configuration,
    /// The filled document could not be assembled or serialized.
    Rendering,
}

/// A struct that represents an error with a context and possibly the propagated source error.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextError {
    pub kind: ErrorKind,
    pub context: String,
    pub source_error: Option<String>,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_error {
            Some(source_error) => write!(
                formatter,
                "{}: {}",
                self.context,
                minimize_first_letter(source_error.to_string()),
            ),
            None => write!(formatter, "{}", self.context),
        }
    }
}

impl std::error::Error for ContextError {}

impl ContextError {
    /// Create a new `ContextError` of the given kind with the given context.
    pub fn with_context<S: Into<String>>(kind: ErrorKind, context: S) -> ContextError {
        ContextError {
            kind,
            context: context.into(),
            source_error: None,
        }
    }

    /// Create a new `ContextError` of the given kind with the given context and source error.
    pub fn with_error<S: Into<String>>(
        kind: ErrorKind,
        context: S,
        error: &dyn std::error::Error,
    ) -> ContextError {
        ContextError {
            kind,
            context: context.into(),
            source_error: Some(error.to_string()),
        }
    }

    /// Shorthand for a datastore failure, by far the most common propagated error.
    pub(crate) fn storage<S: Into<String>>(context: S, error: &rusqlite::Error) -> ContextError {
        ContextError::with_error(ErrorKind::Storage, context, error)
    }
}

/// Minimizes the first letter of a string, it is used for standardizing the error message.
fn minimize_first_letter(string: String) -> String {
    let mut characters = string.chars();
    match characters.next() {
        None => String::new(),
        Some(character) => character.to_lowercase().chain(characters).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_context_and_minimized_source() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "Disk is full");
        let error = ContextError::with_error(ErrorKind::Storage, "Failed to save", &source);

        assert_eq!(error.to_string(), "Failed to save: disk is full");
        assert_eq!(error.kind, ErrorKind::Storage);
    }

    #[test]
    fn display_without_source_is_the_context() {
        let error = ContextError::with_context(ErrorKind::MissingTemplate, "No active template");

        assert_eq!(error.to_string(), "No active template");
        assert!(error.source_error.is_none());
    }
}
