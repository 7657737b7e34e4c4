//! The SQLite-backed persistence of templates, coordinates, mapping history and numbering counters.
//!
//! Every table lives in the same database so that a single connection can write coordinates and
//! their history, and so that the numbering counters can be serialized through the database write lock.

mod coordinates;
mod history;
mod numbering;
mod templates;

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::configuration::EngineConfiguration;
use crate::error::ContextError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS templates (
        version INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        file_data BLOB NOT NULL,
        num_pages INTEGER NOT NULL CHECK (num_pages > 0),
        is_active INTEGER NOT NULL DEFAULT 0,
        filename TEXT,
        uploaded_by TEXT,
        uploaded_at INTEGER NOT NULL,
        notes TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS templates_single_active
        ON templates (kind) WHERE is_active = 1;

    CREATE TABLE IF NOT EXISTS field_coordinates (
        template_version INTEGER NOT NULL REFERENCES templates (version) ON DELETE RESTRICT,
        field_id TEXT NOT NULL,
        x REAL NOT NULL,
        y REAL NOT NULL,
        width REAL NOT NULL CHECK (width > 0),
        height REAL NOT NULL CHECK (height > 0),
        page INTEGER NOT NULL CHECK (page > 0),
        field_type TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (template_version, field_id)
    );

    CREATE TABLE IF NOT EXISTS mapping_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        template_version INTEGER NOT NULL REFERENCES templates (version) ON DELETE RESTRICT,
        mapped_by TEXT NOT NULL,
        mapped_at INTEGER NOT NULL,
        field_count INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS mapping_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session INTEGER NOT NULL REFERENCES mapping_sessions (id) ON DELETE RESTRICT,
        template_version INTEGER NOT NULL REFERENCES templates (version) ON DELETE RESTRICT,
        field_id TEXT NOT NULL,
        x REAL NOT NULL,
        y REAL NOT NULL,
        width REAL NOT NULL,
        height REAL NOT NULL,
        page INTEGER NOT NULL,
        field_type TEXT NOT NULL,
        mapped_by TEXT NOT NULL,
        mapped_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS mapping_history_by_version
        ON mapping_history (template_version, id);
    CREATE TRIGGER IF NOT EXISTS mapping_history_no_update
        BEFORE UPDATE ON mapping_history
        BEGIN SELECT RAISE(ABORT, 'the mapping history is append-only'); END;
    CREATE TRIGGER IF NOT EXISTS mapping_history_no_delete
        BEFORE DELETE ON mapping_history
        BEGIN SELECT RAISE(ABORT, 'the mapping history is append-only'); END;

    CREATE TABLE IF NOT EXISTS numbering_counters (
        series TEXT PRIMARY KEY,
        prefix TEXT NOT NULL,
        current_year INTEGER NOT NULL,
        current_number INTEGER NOT NULL CHECK (current_number >= 0),
        updated_at INTEGER NOT NULL
    );
";

/// The handle to the datastore. Each handle owns its own connection: concurrent callers open
/// one store each against the same database file.
pub struct Store {
    connection: Connection,
    /// The zero-padding applied to allocated document numbers.
    number_width: usize,
}

impl Store {
    /// Opens the database described by the configuration, in memory when no path is given.
    pub fn open(configuration: &EngineConfiguration) -> Result<Store, ContextError> {
        let connection = match &configuration.database_path {
            Some(database_path) => Connection::open(database_path).map_err(|error| {
                ContextError::storage(
                    format!("Failed to open the database {:?}", database_path),
                    &error,
                )
            })?,
            None => Connection::open_in_memory().map_err(|error| {
                ContextError::storage("Failed to open the in-memory database", &error)
            })?,
        };
        connection
            .busy_timeout(configuration.busy_timeout())
            .map_err(|error| ContextError::storage("Failed to set the busy timeout", &error))?;

        Store::initialize(connection, configuration.number_width)
    }

    /// Opens the database file at the given path with the default configuration.
    pub fn open_path(database_path: &Path) -> Result<Store, ContextError> {
        Store::open(&EngineConfiguration {
            database_path: Some(database_path.to_path_buf()),
            ..EngineConfiguration::default()
        })
    }

    /// Opens a private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> Result<Store, ContextError> {
        Store::open(&EngineConfiguration::default())
    }

    fn initialize(connection: Connection, number_width: usize) -> Result<Store, ContextError> {
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|error| ContextError::storage("Failed to enable foreign keys", &error))?;
        connection
            .execute_batch(SCHEMA)
            .map_err(|error| ContextError::storage("Failed to create the schema", &error))?;

        Ok(Store {
            connection,
            number_width,
        })
    }
}

/// The current time as stored in the database, in microseconds since the epoch.
pub(crate) fn timestamp(date: OffsetDateTime) -> i64 {
    (date.unix_timestamp_nanos() / 1_000) as i64
}

/// Reads a stored timestamp column back into a date.
pub(crate) fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<OffsetDateTime> {
    let microseconds: i64 = row.get(index)?;
    OffsetDateTime::from_unix_timestamp_nanos(microseconds as i128 * 1_000).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(error))
    })
}

/// Converts a text column that failed to parse into the error `rusqlite` expects from row mappers.
pub(crate) fn invalid_column(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("Unexpected value {:?}", value).into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_survive_the_round_trip_at_microsecond_precision() {
        let date = OffsetDateTime::from_unix_timestamp(1_760_000_000).unwrap()
            + time::Duration::microseconds(123_456);
        let connection = Connection::open_in_memory().unwrap();

        let read = connection
            .query_row("SELECT ?1", [timestamp(date)], |row| timestamp_column(row, 0))
            .unwrap();
        assert_eq!(read, date);
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let directory = tempfile::tempdir().unwrap();
        let database_path = directory.path().join("fields.sqlite");

        Store::open_path(&database_path).unwrap();
        Store::open_path(&database_path).unwrap();
    }
}
