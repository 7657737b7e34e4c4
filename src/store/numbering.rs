use rusqlite::{params, OptionalExtension as _, TransactionBehavior};
use time::OffsetDateTime;

use super::{timestamp, Store};
use crate::error::{ContextError, ErrorKind};
use crate::model::DocumentNumber;

/// The counter state a series moves to when a number is drawn in `year`.
/// The counter only restarts when the calendar moves forward, a clock running behind never rewinds it.
fn advance(current_year: i32, current_number: i64, year: i32) -> (i32, i64) {
    if year > current_year {
        (year, 1)
    } else {
        (current_year, current_number + 1)
    }
}

impl Store {
    /// Creates or overwrites the counter of a series. `current_number` is the last number already
    /// issued, so the next allocation in `year` yields `current_number + 1`.
    pub fn provision_series(
        &mut self,
        series: &str,
        prefix: &str,
        year: i32,
        current_number: i64,
    ) -> Result<(), ContextError> {
        if current_number < 0 {
            return Err(ContextError::with_context(
                ErrorKind::Configuration,
                format!(
                    "The series {:?} cannot start from the negative number {}",
                    series, current_number
                ),
            ));
        }

        self.connection
            .execute(
                "INSERT INTO numbering_counters (series, prefix, current_year, current_number, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (series) DO UPDATE SET
                    prefix = excluded.prefix,
                    current_year = excluded.current_year,
                    current_number = excluded.current_number,
                    updated_at = excluded.updated_at",
                params![
                    series,
                    prefix,
                    year,
                    current_number,
                    timestamp(OffsetDateTime::now_utc())
                ],
            )
            .map_err(|error| {
                ContextError::storage(format!("Failed to provision the series {:?}", series), &error)
            })?;

        log::info!(
            "Provisioned the series {:?} at {}{}/{}",
            series,
            prefix,
            current_number,
            year
        );

        Ok(())
    }

    /// Draws the next number of the series for the current UTC year.
    pub fn allocate(&mut self, series: &str) -> Result<DocumentNumber, ContextError> {
        self.allocate_at(series, OffsetDateTime::now_utc().year())
    }

    /// Draws the next number of the series as if the current year were `year`.
    ///
    /// The read and the increment happen inside a single immediate transaction, so that concurrent
    /// callers on other connections queue on the database write lock and never observe the same counter.
    pub fn allocate_at(&mut self, series: &str, year: i32) -> Result<DocumentNumber, ContextError> {
        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|error| {
                ContextError::storage("Failed to lock the numbering counters", &error)
            })?;

        let counter: Option<(String, i32, i64)> = transaction
            .query_row(
                "SELECT prefix, current_year, current_number FROM numbering_counters WHERE series = ?1",
                params![series],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|error| ContextError::storage("Failed to read the numbering counter", &error))?;
        let Some((prefix, current_year, current_number)) = counter else {
            return Err(ContextError::with_context(
                ErrorKind::NoSeriesConfigured,
                format!("The numbering series {:?} has not been provisioned", series),
            ));
        };

        if year < current_year {
            log::warn!(
                "The clock reports {} but the series {:?} is already in {}",
                year,
                series,
                current_year
            );
        }
        let (year, number) = advance(current_year, current_number, year);

        transaction
            .execute(
                "UPDATE numbering_counters
                 SET current_year = ?1, current_number = ?2, updated_at = ?3
                 WHERE series = ?4",
                params![year, number, timestamp(OffsetDateTime::now_utc()), series],
            )
            .map_err(|error| ContextError::storage("Failed to advance the numbering counter", &error))?;
        transaction
            .commit()
            .map_err(|error| ContextError::storage("Failed to commit the numbering counter", &error))?;

        let document_number = DocumentNumber {
            prefix,
            year,
            number,
            width: self.number_width,
        };
        log::info!("Allocated {} from the series {:?}", document_number, series);

        Ok(document_number)
    }

    /// The number the next allocation in `year` would yield, without consuming it.
    pub fn peek_next(&self, series: &str, year: i32) -> Result<DocumentNumber, ContextError> {
        let (prefix, current_year, current_number): (String, i32, i64) = self
            .connection
            .query_row(
                "SELECT prefix, current_year, current_number FROM numbering_counters WHERE series = ?1",
                params![series],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|error| ContextError::storage("Failed to read the numbering counter", &error))?
            .ok_or(ContextError::with_context(
                ErrorKind::NoSeriesConfigured,
                format!("The numbering series {:?} has not been provisioned", series),
            ))?;
        let (year, number) = advance(current_year, current_number, year);

        Ok(DocumentNumber {
            prefix,
            year,
            number,
            width: self.number_width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_restart_only_when_the_year_moves_forward() {
        assert_eq!(advance(2025, 41, 2025), (2025, 42));
        assert_eq!(advance(2025, 99, 2026), (2026, 1));
        assert_eq!(advance(2026, 3, 2025), (2026, 4));
    }

    #[test]
    fn allocation_continues_from_the_provisioned_number() {
        let mut store = Store::open_in_memory().unwrap();
        store.provision_series("DR", "DR", 2025, 41).unwrap();

        assert_eq!(store.peek_next("DR", 2025).unwrap().to_string(), "DR42/2025");
        assert_eq!(store.allocate_at("DR", 2025).unwrap().to_string(), "DR42/2025");
        assert_eq!(store.allocate_at("DR", 2025).unwrap().to_string(), "DR43/2025");
        assert_eq!(store.peek_next("DR", 2025).unwrap().number, 44);
    }

    #[test]
    fn fresh_series_start_at_one() {
        let mut store = Store::open_in_memory().unwrap();
        store.provision_series("RA", "RA", 2025, 0).unwrap();

        let number = store.allocate_at("RA", 2025).unwrap();
        assert_eq!(number.number, 1);
        assert_eq!(number.to_string(), "RA01/2025");
    }

    #[test]
    fn unprovisioned_series_are_rejected() {
        let mut store = Store::open_in_memory().unwrap();

        let error = store.allocate_at("DR", 2025).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NoSeriesConfigured);
        let error = store.peek_next("DR", 2025).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NoSeriesConfigured);
    }

    #[test]
    fn negative_starting_points_are_rejected() {
        let mut store = Store::open_in_memory().unwrap();

        let error = store.provision_series("DR", "DR", 2025, -1).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);
    }
}
