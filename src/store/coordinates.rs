use std::collections::HashSet;

use rusqlite::{params, Row, TransactionBehavior};
use time::OffsetDateTime;

use super::{invalid_column, timestamp, Store};
use crate::error::{ContextError, ErrorKind};
use crate::model::{FieldCoordinate, FieldType};

impl Store {
    /// Replaces every coordinate mapped against the template version with the given ones and
    /// appends one history entry per coordinate. Returns the number of coordinates saved.
    ///
    /// The whole set is validated before anything is written: a single malformed box rejects the
    /// call. Writing the history is best effort and never fails the save.
    pub fn save_coordinates(
        &mut self,
        template_version: i64,
        coordinates: &[FieldCoordinate],
        mapped_by: &str,
    ) -> Result<usize, ContextError> {
        let mut field_ids = HashSet::new();
        for coordinate in coordinates {
            coordinate.validate()?;
            if !field_ids.insert(coordinate.field_id.as_str()) {
                return Err(ContextError::with_context(
                    ErrorKind::InvalidGeometry,
                    format!("The field {:?} is mapped twice", coordinate.field_id),
                ));
            }
            // Zero is what records deserialized without a version carry
            if coordinate.template_version != 0 && coordinate.template_version != template_version {
                return Err(ContextError::with_context(
                    ErrorKind::InvalidGeometry,
                    format!(
                        "The field {:?} belongs to template version {}, not {}",
                        coordinate.field_id, coordinate.template_version, template_version
                    ),
                ));
            }
        }
        if !self.template_exists(template_version)? {
            return Err(ContextError::with_context(
                ErrorKind::UnknownTemplate,
                format!("The template version {} does not exist", template_version),
            ));
        }

        let coordinates: Vec<FieldCoordinate> = coordinates
            .iter()
            .map(|coordinate| coordinate.clone().with_template_version(template_version))
            .collect();

        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| ContextError::storage("Failed to begin the transaction", &error))?;
        transaction
            .execute(
                "DELETE FROM field_coordinates WHERE template_version = ?1",
                params![template_version],
            )
            .map_err(|error| {
                ContextError::storage("Failed to clear the previous coordinates", &error)
            })?;
        {
            let mut statement = transaction
                .prepare(
                    "INSERT INTO field_coordinates
                        (template_version, field_id, x, y, width, height, page, field_type, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(|error| {
                    ContextError::storage("Failed to prepare the coordinate insertion", &error)
                })?;
            let updated_at = timestamp(OffsetDateTime::now_utc());
            for coordinate in &coordinates {
                statement
                    .execute(params![
                        template_version,
                        coordinate.field_id,
                        coordinate.x,
                        coordinate.y,
                        coordinate.width,
                        coordinate.height,
                        coordinate.page,
                        coordinate.field_type().as_str(),
                        updated_at,
                    ])
                    .map_err(|error| {
                        ContextError::storage(
                            format!("Failed to save the coordinate {:?}", coordinate.field_id),
                            &error,
                        )
                    })?;
            }
        }
        transaction
            .commit()
            .map_err(|error| ContextError::storage("Failed to commit the coordinates", &error))?;

        log::info!(
            "Saved {} coordinates for template version {} (mapped by {})",
            coordinates.len(),
            template_version,
            mapped_by
        );
        self.record_session(template_version, &coordinates, mapped_by);

        Ok(coordinates.len())
    }

    /// The coordinates currently mapped against the template version, ordered by page and field.
    /// A version nobody has mapped yet simply has no coordinates.
    pub fn load_coordinates(
        &self,
        template_version: i64,
    ) -> Result<Vec<FieldCoordinate>, ContextError> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT field_id, x, y, width, height, page, field_type, template_version
                 FROM field_coordinates WHERE template_version = ?1
                 ORDER BY page, field_id",
            )
            .map_err(|error| ContextError::storage("Failed to prepare the coordinate query", &error))?;
        let rows = statement
            .query_map(params![template_version], coordinate_from_row)
            .map_err(|error| ContextError::storage("Failed to load the coordinates", &error))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|error| ContextError::storage("Failed to read a coordinate row", &error))
    }
}

fn coordinate_from_row(row: &Row<'_>) -> rusqlite::Result<FieldCoordinate> {
    let field_type: String = row.get(6)?;
    let field_type = FieldType::parse(&field_type).ok_or_else(|| invalid_column(6, &field_type))?;

    Ok(FieldCoordinate::new(
        row.get::<_, String>(0)?,
        [row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?],
        row.get(5)?,
        field_type,
        row.get(7)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentKind;

    fn store_with_template() -> (Store, i64) {
        let mut store = Store::open_in_memory().unwrap();
        let version = store
            .register_template(DocumentKind::RentalAgreement, b"%PDF-1.5", 2, true)
            .unwrap();
        (store, version)
    }

    #[test]
    fn saving_replaces_the_previous_mapping() {
        let (mut store, version) = store_with_template();
        let first = vec![
            FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, version),
            FieldCoordinate::new("vehiclePlate", [292.0, 182.5, 60.0, 10.0], 1, FieldType::Text, version),
        ];
        let second = vec![FieldCoordinate::new(
            "clientName",
            [14.0, 131.0, 90.0, 11.0],
            1,
            FieldType::Text,
            version,
        )];

        assert_eq!(store.save_coordinates(version, &first, "mapper").unwrap(), 2);
        assert_eq!(store.save_coordinates(version, &second, "mapper").unwrap(), 1);

        assert_eq!(store.load_coordinates(version).unwrap(), second);
    }

    #[test]
    fn unversioned_records_are_bound_to_the_target_version() {
        let (mut store, version) = store_with_template();
        let coordinate: FieldCoordinate = serde_json::from_str(
            r#"{"field_id": "damage_photo_1", "x": 10, "y": 20, "width": 100, "height": 80, "page": 2}"#,
        )
        .unwrap();

        store.save_coordinates(version, &[coordinate], "mapper").unwrap();

        let loaded = store.load_coordinates(version).unwrap();
        assert_eq!(loaded[0].template_version, version);
        assert_eq!(loaded[0].field_type(), FieldType::Image);
        assert_eq!(loaded[0].page, 2);
    }

    #[test]
    fn invalid_saves_write_nothing() {
        let (mut store, version) = store_with_template();
        let valid = FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, version);
        let flat = FieldCoordinate::new("contractNumber", [14.0, 97.0, 40.0, 0.0], 1, FieldType::Text, version);

        let error = store
            .save_coordinates(version, &[valid.clone(), flat], "mapper")
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidGeometry);

        let error = store
            .save_coordinates(version, &[valid.clone(), valid.clone()], "mapper")
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidGeometry);

        let error = store.save_coordinates(version + 1, &[valid], "mapper").unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidGeometry);

        assert!(store.load_coordinates(version).unwrap().is_empty());
        assert!(store.history_for(version).unwrap().is_empty());
    }

    #[test]
    fn unknown_templates_are_rejected() {
        let (mut store, version) = store_with_template();
        let coordinate = FieldCoordinate::new("clientName", [12.0, 130.0, 92.5, 10.5], 1, FieldType::Text, 0);

        let error = store
            .save_coordinates(version + 10, &[coordinate], "mapper")
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::UnknownTemplate);
    }

    #[test]
    fn unmapped_versions_have_no_coordinates() {
        let (store, version) = store_with_template();

        assert!(store.load_coordinates(version).unwrap().is_empty());
        assert!(store.load_coordinates(version + 100).unwrap().is_empty());
    }
}
