use rusqlite::{params, OptionalExtension as _, Row};
use time::OffsetDateTime;

use super::{invalid_column, timestamp, timestamp_column, Store};
use crate::error::{ContextError, ErrorKind};
use crate::model::{DocumentKind, TemplateUpload, TemplateVersion};

const TEMPLATE_COLUMNS: &str =
    "version, kind, file_data, num_pages, is_active, filename, uploaded_by, uploaded_at, notes";
const METADATA_COLUMNS: &str =
    "version, kind, X'', num_pages, is_active, filename, uploaded_by, uploaded_at, notes";

impl Store {
    /// Stores a new template binary and returns its version, which is never reused.
    /// When `activate` is set, every other template of the same kind is deactivated in the same transaction.
    pub fn register_template(
        &mut self,
        kind: DocumentKind,
        file_data: &[u8],
        num_pages: u32,
        activate: bool,
    ) -> Result<i64, ContextError> {
        self.insert_template(
            &TemplateUpload {
                kind,
                file_data: file_data.to_vec(),
                filename: None,
                uploaded_by: None,
                notes: None,
            },
            num_pages,
            activate,
        )
    }

    /// Registers an uploaded template, deriving its page count from the PDF itself.
    pub fn upload_template(
        &mut self,
        upload: &TemplateUpload,
        activate: bool,
    ) -> Result<i64, ContextError> {
        let document = lopdf::Document::load_mem(&upload.file_data).map_err(|error| {
            ContextError::with_error(
                ErrorKind::UnreadablePdf,
                format!("Unable to open the uploaded template {:?}", upload.filename),
                &error,
            )
        })?;
        let num_pages = document.get_pages().len() as u32;

        self.insert_template(upload, num_pages, activate)
    }

    fn insert_template(
        &mut self,
        upload: &TemplateUpload,
        num_pages: u32,
        activate: bool,
    ) -> Result<i64, ContextError> {
        if num_pages == 0 {
            return Err(ContextError::with_context(
                ErrorKind::UnreadablePdf,
                "A template must have at least one page",
            ));
        }

        let transaction = self
            .connection
            .transaction()
            .map_err(|error| ContextError::storage("Failed to begin the transaction", &error))?;
        if activate {
            transaction
                .execute(
                    "UPDATE templates SET is_active = 0 WHERE kind = ?1 AND is_active = 1",
                    params![upload.kind.as_str()],
                )
                .map_err(|error| {
                    ContextError::storage("Failed to deactivate the previous templates", &error)
                })?;
        }
        transaction
            .execute(
                "INSERT INTO templates
                    (kind, file_data, num_pages, is_active, filename, uploaded_by, uploaded_at, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    upload.kind.as_str(),
                    upload.file_data,
                    num_pages,
                    activate,
                    upload.filename,
                    upload.uploaded_by,
                    timestamp(OffsetDateTime::now_utc()),
                    upload.notes,
                ],
            )
            .map_err(|error| ContextError::storage("Failed to insert the template", &error))?;
        let version = transaction.last_insert_rowid();
        transaction
            .commit()
            .map_err(|error| ContextError::storage("Failed to commit the template", &error))?;

        log::info!(
            "Registered {} template version {} ({} pages, active: {})",
            upload.kind.as_str(),
            version,
            num_pages,
            activate
        );

        Ok(version)
    }

    /// Makes the given version the active one of its kind.
    pub fn activate_template(&mut self, version: i64) -> Result<(), ContextError> {
        let kind = self.template_metadata(version)?.kind;

        let transaction = self
            .connection
            .transaction()
            .map_err(|error| ContextError::storage("Failed to begin the transaction", &error))?;
        transaction
            .execute(
                "UPDATE templates SET is_active = 0 WHERE kind = ?1 AND is_active = 1",
                params![kind.as_str()],
            )
            .map_err(|error| {
                ContextError::storage("Failed to deactivate the previous templates", &error)
            })?;
        transaction
            .execute(
                "UPDATE templates SET is_active = 1 WHERE version = ?1",
                params![version],
            )
            .map_err(|error| ContextError::storage("Failed to activate the template", &error))?;
        transaction
            .commit()
            .map_err(|error| ContextError::storage("Failed to commit the activation", &error))?;

        log::info!("Activated {} template version {}", kind.as_str(), version);

        Ok(())
    }

    /// The active template of the given kind, binary included.
    pub fn active_template(&self, kind: DocumentKind) -> Result<TemplateVersion, ContextError> {
        self.connection
            .query_row(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE kind = ?1 AND is_active = 1"
                ),
                params![kind.as_str()],
                template_from_row,
            )
            .optional()
            .map_err(|error| ContextError::storage("Failed to query the active template", &error))?
            .ok_or(ContextError::with_context(
                ErrorKind::MissingTemplate,
                format!("No {} template is active", kind.as_str()),
            ))
    }

    /// The template with the given version, binary included.
    pub fn template(&self, version: i64) -> Result<TemplateVersion, ContextError> {
        self.find_template(version, TEMPLATE_COLUMNS)?
            .ok_or(ContextError::with_context(
                ErrorKind::MissingTemplate,
                format!("The template version {} does not exist", version),
            ))
    }

    /// The template with the given version, without its binary.
    pub fn template_metadata(&self, version: i64) -> Result<TemplateVersion, ContextError> {
        self.find_template(version, METADATA_COLUMNS)?
            .ok_or(ContextError::with_context(
                ErrorKind::MissingTemplate,
                format!("The template version {} does not exist", version),
            ))
    }

    /// All the templates of a kind without their binaries, newest first.
    pub fn list_templates(&self, kind: DocumentKind) -> Result<Vec<TemplateVersion>, ContextError> {
        let mut statement = self
            .connection
            .prepare(&format!(
                "SELECT {METADATA_COLUMNS} FROM templates WHERE kind = ?1 ORDER BY version DESC"
            ))
            .map_err(|error| ContextError::storage("Failed to prepare the template list", &error))?;
        let rows = statement
            .query_map(params![kind.as_str()], template_from_row)
            .map_err(|error| ContextError::storage("Failed to list the templates", &error))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|error| ContextError::storage("Failed to read a template row", &error))
    }

    pub(crate) fn template_exists(&self, version: i64) -> Result<bool, ContextError> {
        self.connection
            .query_row(
                "SELECT 1 FROM templates WHERE version = ?1",
                params![version],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|error| ContextError::storage("Failed to look up the template", &error))
    }

    fn find_template(
        &self,
        version: i64,
        columns: &str,
    ) -> Result<Option<TemplateVersion>, ContextError> {
        self.connection
            .query_row(
                &format!("SELECT {columns} FROM templates WHERE version = ?1"),
                params![version],
                template_from_row,
            )
            .optional()
            .map_err(|error| ContextError::storage("Failed to query the template", &error))
    }
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<TemplateVersion> {
    let kind: String = row.get(1)?;

    Ok(TemplateVersion {
        version: row.get(0)?,
        kind: DocumentKind::parse(&kind).ok_or_else(|| invalid_column(1, &kind))?,
        file_data: row.get(2)?,
        num_pages: row.get(3)?,
        is_active: row.get(4)?,
        filename: row.get(5)?,
        uploaded_by: row.get(6)?,
        uploaded_at: timestamp_column(row, 7)?,
        notes: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activating_a_template_supersedes_only_its_own_kind() {
        let mut store = Store::open_in_memory().unwrap();
        let first = store
            .register_template(DocumentKind::DamageReport, b"%PDF-first", 2, true)
            .unwrap();
        let rental = store
            .register_template(DocumentKind::RentalAgreement, b"%PDF-rental", 1, true)
            .unwrap();
        let second = store
            .register_template(DocumentKind::DamageReport, b"%PDF-second", 3, true)
            .unwrap();

        assert!(second > first);
        let active = store.active_template(DocumentKind::DamageReport).unwrap();
        assert_eq!(active.version, second);
        assert_eq!(active.file_data, b"%PDF-second");
        assert_eq!(active.num_pages, 3);
        assert!(!store.template(first).unwrap().is_active);
        assert_eq!(
            store.active_template(DocumentKind::RentalAgreement).unwrap().version,
            rental
        );

        store.activate_template(first).unwrap();
        assert_eq!(
            store.active_template(DocumentKind::DamageReport).unwrap().version,
            first
        );
        assert!(!store.template(second).unwrap().is_active);
    }

    #[test]
    fn inactive_registration_keeps_the_current_active_template() {
        let mut store = Store::open_in_memory().unwrap();
        let active = store
            .register_template(DocumentKind::DamageReport, b"%PDF-a", 1, true)
            .unwrap();
        store
            .register_template(DocumentKind::DamageReport, b"%PDF-b", 1, false)
            .unwrap();

        assert_eq!(
            store.active_template(DocumentKind::DamageReport).unwrap().version,
            active
        );
        let listed = store.list_templates(DocumentKind::DamageReport).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].version > listed[1].version);
        assert!(listed.iter().all(|template| template.file_data.is_empty()));
    }

    #[test]
    fn missing_templates_are_reported() {
        let store = Store::open_in_memory().unwrap();

        let error = store.active_template(DocumentKind::DamageReport).unwrap_err();
        assert_eq!(error.kind, ErrorKind::MissingTemplate);
        assert_eq!(store.template(42).unwrap_err().kind, ErrorKind::MissingTemplate);
    }

    #[test]
    fn unreadable_uploads_are_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let upload = TemplateUpload {
            kind: DocumentKind::DamageReport,
            file_data: b"definitely not a pdf".to_vec(),
            filename: Some("dr.pdf".into()),
            uploaded_by: Some("admin".into()),
            notes: None,
        };

        let error = store.upload_template(&upload, true).unwrap_err();
        assert_eq!(error.kind, ErrorKind::UnreadablePdf);
    }
}
