use rusqlite::{params, OptionalExtension as _, Row, TransactionBehavior};
use time::OffsetDateTime;

use super::{invalid_column, timestamp, timestamp_column, Store};
use crate::error::ContextError;
use crate::model::{FieldCoordinate, FieldType, MappingHistoryEntry};

const HISTORY_COLUMNS: &str =
    "id, session, template_version, field_id, x, y, width, height, page, field_type, mapped_by, mapped_at";

impl Store {
    /// Appends a mapping session and its entries. A failure is logged and never reaches the caller,
    /// the coordinates themselves are already committed at this point.
    pub(crate) fn record_session(
        &mut self,
        template_version: i64,
        coordinates: &[FieldCoordinate],
        mapped_by: &str,
    ) {
        if let Err(error) = self.record(template_version, coordinates, mapped_by) {
            log::warn!(
                "Failed to record the mapping history of template version {}: {}",
                template_version,
                error
            );
        }
    }

    /// Appends one history entry per coordinate under a new session, returning the session id.
    pub fn record(
        &mut self,
        template_version: i64,
        coordinates: &[FieldCoordinate],
        mapped_by: &str,
    ) -> Result<i64, ContextError> {
        let mapped_at = timestamp(OffsetDateTime::now_utc());

        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| ContextError::storage("Failed to begin the transaction", &error))?;
        transaction
            .execute(
                "INSERT INTO mapping_sessions (template_version, mapped_by, mapped_at, field_count)
                 VALUES (?1, ?2, ?3, ?4)",
                params![template_version, mapped_by, mapped_at, coordinates.len() as i64],
            )
            .map_err(|error| ContextError::storage("Failed to open the mapping session", &error))?;
        let session = transaction.last_insert_rowid();
        {
            let mut statement = transaction
                .prepare(
                    "INSERT INTO mapping_history
                        (session, template_version, field_id, x, y, width, height, page, field_type, mapped_by, mapped_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )
                .map_err(|error| {
                    ContextError::storage("Failed to prepare the history insertion", &error)
                })?;
            for coordinate in coordinates {
                statement
                    .execute(params![
                        session,
                        template_version,
                        coordinate.field_id,
                        coordinate.x,
                        coordinate.y,
                        coordinate.width,
                        coordinate.height,
                        coordinate.page,
                        coordinate.field_type().as_str(),
                        mapped_by,
                        mapped_at,
                    ])
                    .map_err(|error| {
                        ContextError::storage("Failed to append a history entry", &error)
                    })?;
            }
        }
        transaction
            .commit()
            .map_err(|error| ContextError::storage("Failed to commit the history", &error))?;

        log::debug!(
            "Recorded mapping session {} with {} entries for template version {}",
            session,
            coordinates.len(),
            template_version
        );

        Ok(session)
    }

    /// Every history entry of the template version, in the order they were appended.
    pub fn history_for(
        &self,
        template_version: i64,
    ) -> Result<Vec<MappingHistoryEntry>, ContextError> {
        let mut statement = self
            .connection
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM mapping_history
                 WHERE template_version = ?1 ORDER BY id"
            ))
            .map_err(|error| ContextError::storage("Failed to prepare the history query", &error))?;
        let rows = statement
            .query_map(params![template_version], history_from_row)
            .map_err(|error| ContextError::storage("Failed to load the history", &error))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|error| ContextError::storage("Failed to read a history row", &error))
    }

    /// The coordinates as they were saved by the last mapping session at or before the given instant.
    /// Nothing had been mapped yet when the result is empty.
    pub fn snapshot_at(
        &self,
        template_version: i64,
        at: OffsetDateTime,
    ) -> Result<Vec<FieldCoordinate>, ContextError> {
        let session: Option<i64> = self
            .connection
            .query_row(
                "SELECT id FROM mapping_sessions
                 WHERE template_version = ?1 AND mapped_at <= ?2
                 ORDER BY mapped_at DESC, id DESC LIMIT 1",
                params![template_version, timestamp(at)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|error| ContextError::storage("Failed to find the mapping session", &error))?;
        let Some(session) = session else {
            return Ok(Vec::new());
        };

        let mut statement = self
            .connection
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM mapping_history WHERE session = ?1 ORDER BY id"
            ))
            .map_err(|error| ContextError::storage("Failed to prepare the snapshot query", &error))?;
        let rows = statement
            .query_map(params![session], history_from_row)
            .map_err(|error| ContextError::storage("Failed to load the snapshot", &error))?;
        let entries = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| ContextError::storage("Failed to read a history row", &error))?;

        Ok(entries.iter().map(MappingHistoryEntry::coordinate).collect())
    }
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<MappingHistoryEntry> {
    let field_type: String = row.get(9)?;

    Ok(MappingHistoryEntry {
        id: row.get(0)?,
        session: row.get(1)?,
        template_version: row.get(2)?,
        field_id: row.get(3)?,
        x: row.get(4)?,
        y: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        page: row.get(8)?,
        field_type: FieldType::parse(&field_type).ok_or_else(|| invalid_column(9, &field_type))?,
        mapped_by: row.get(10)?,
        mapped_at: timestamp_column(row, 11)?,
    })
}
