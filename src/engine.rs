use std::collections::BTreeMap;

use crate::configuration::EngineConfiguration;
use crate::error::ContextError;
use crate::extraction::{extract, Extraction};
use crate::fill::{fill, Filled};
use crate::model::{DocumentKind, DocumentNumber, FieldValue};
use crate::store::Store;

/// Which template's coordinates an extraction reads a document with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSelector {
    Version(i64),
    /// The active template of the kind at the time of the call.
    Active(DocumentKind),
}

/// The entry point wiring the datastore to extraction and fill.
pub struct Engine {
    store: Store,
    configuration: EngineConfiguration,
}

impl Engine {
    /// Opens the datastore described by the configuration.
    pub fn new(configuration: EngineConfiguration) -> Result<Engine, ContextError> {
        configuration.validate()?;
        let store = Store::open(&configuration)?;

        Ok(Engine {
            store,
            configuration,
        })
    }

    pub fn with_store(store: Store, configuration: EngineConfiguration) -> Engine {
        Engine {
            store,
            configuration,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn configuration(&self) -> &EngineConfiguration {
        &self.configuration
    }

    /// Reads the fields of a foreign document with the coordinates of the selected template.
    /// A template without coordinates yields an empty extraction.
    pub fn extract(
        &self,
        pdf_bytes: &[u8],
        selector: TemplateSelector,
    ) -> Result<Extraction, ContextError> {
        let version = match selector {
            TemplateSelector::Version(version) => {
                self.store.template_metadata(version)?;
                version
            }
            TemplateSelector::Active(kind) => self.store.active_template(kind)?.version,
        };
        let coordinates = self.store.load_coordinates(version)?;
        log::debug!(
            "Extracting with {} coordinates of template version {}",
            coordinates.len(),
            version
        );

        extract(pdf_bytes, &coordinates, &self.configuration)
    }

    /// Draws the values onto a copy of the template version.
    pub fn fill(
        &self,
        template_version: i64,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<Filled, ContextError> {
        let template = self.store.template(template_version)?;
        let coordinates = self.store.load_coordinates(template_version)?;

        fill(&template.file_data, &coordinates, values, &self.configuration)
    }

    /// Allocates the next number of the series, writes it into `number_field` and fills the
    /// template with it. The number is consumed even when the fill fails afterwards.
    pub fn fill_numbered(
        &mut self,
        template_version: i64,
        series: &str,
        number_field: &str,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<(DocumentNumber, Filled), ContextError> {
        // Fail before consuming a number when the template is missing
        self.store.template_metadata(template_version)?;

        let document_number = self.store.allocate(series)?;
        let mut values = values.clone();
        values.insert(
            number_field.to_string(),
            FieldValue::Text(document_number.to_string()),
        );

        let filled = self.fill(template_version, &values).map_err(|error| {
            log::warn!(
                "The document number {} was allocated but the fill failed",
                document_number
            );
            ContextError::with_context(
                error.kind,
                format!("Failed to fill {}: {}", document_number, error),
            )
        })?;

        Ok((document_number, filled))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}
