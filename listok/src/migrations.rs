use std::time::Instant;

use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use crate::elapsed_ms;
use crate::error::Result;
use crate::legacy::{KeyValueStore, LegacyTripLog};
use crate::types::{ShoppingTrip, now_millis};

/// `store_meta` key recording when legacy history was imported.
pub const LEGACY_MIGRATION_MARKER: &str = "legacy_history_migrated_at";

/// Versioned schema, tracked through SQLite's `user_version`.
pub fn schema_migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            r#"
            CREATE TABLE trips (
                id TEXT PRIMARY KEY,
                date INTEGER NOT NULL,
                store_name TEXT NOT NULL,
                data TEXT NOT NULL
            );
            "#,
        ),
        M::up(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trips_date ON trips(date);

            -- One-off markers (legacy import, etc.)
            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        ),
    ])
}

/// Bring a database up to the latest schema version.
pub fn apply_schema(conn: &mut Connection) -> Result<()> {
    schema_migrations().to_latest(conn)?;
    Ok(())
}

/// Outcome of a legacy import attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyMigration {
    /// Marker present and no blob left to merge
    AlreadyMigrated,
    /// No legacy blob and no earlier import
    NoLegacyData,
    /// Blob imported and removed. `skipped` counts IDs already in the store.
    Migrated { inserted: usize, skipped: usize },
    /// Blob did not parse; left in place
    Unreadable,
}

/// Timestamp (ms) of the first completed legacy import, if any.
pub fn migration_marker(conn: &Connection) -> Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![LEGACY_MIGRATION_MARKER],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Check if a legacy blob is waiting to be imported.
pub fn needs_legacy_migration(legacy: &dyn KeyValueStore) -> Result<bool> {
    Ok(LegacyTripLog::new(legacy).raw()?.is_some())
}

/// Import the legacy history blob into the `trips` table.
///
/// Trips are inserted keyed by their own ID and never overwrite an existing
/// row, so re-running the import cannot duplicate or clobber records. A blob
/// that shows up after an earlier import (an old client kept writing to it)
/// is merged the same way. The marker is written in the same transaction as
/// the inserts and keeps the time of the first import; the blob is removed
/// only after commit.
pub fn migrate_legacy_history(
    conn: &mut Connection,
    legacy: &dyn KeyValueStore,
) -> Result<LegacyMigration> {
    let start = Instant::now();
    let log = LegacyTripLog::new(legacy);
    let marker = migration_marker(conn)?;

    let Some(blob) = log.raw()? else {
        return Ok(match marker {
            Some(_) => LegacyMigration::AlreadyMigrated,
            None => LegacyMigration::NoLegacyData,
        });
    };

    let trips: Vec<ShoppingTrip> = match serde_json::from_str(&blob) {
        Ok(trips) => trips,
        Err(e) => {
            warn!(
                "[Migration] Legacy history is unreadable, leaving it in place: {}",
                e
            );
            return Ok(LegacyMigration::Unreadable);
        }
    };

    match marker {
        Some(first) => info!(
            "[Migration] Legacy history reappeared after import at {}, merging {} trips",
            first,
            trips.len()
        ),
        None => info!("[Migration] Importing {} legacy trips", trips.len()),
    }

    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO trips (id, date, store_name, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO NOTHING",
        )?;
        for trip in &trips {
            let data = serde_json::to_string(trip)?;
            inserted += stmt.execute(params![trip.id, trip.date, trip.store_name, data])?;
        }
    }
    tx.execute(
        "INSERT OR IGNORE INTO store_meta (key, value) VALUES (?1, ?2)",
        params![LEGACY_MIGRATION_MARKER, now_millis().to_string()],
    )?;
    tx.commit()?;

    log.clear()?;

    let skipped = trips.len() - inserted;
    info!(
        "[Migration] Legacy import complete: {} inserted, {} already present ({} ms)",
        inserted,
        skipped,
        elapsed_ms(start)
    );

    Ok(LegacyMigration::Migrated { inserted, skipped })
}
