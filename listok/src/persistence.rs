//! # Trip Store
//!
//! Durable storage of completed shopping trips in SQLite.
//!
//! ## Layout
//!
//! - `trips`: one row per trip, keyed by trip ID. The full trip is stored
//!   as JSON in `data`; `date` and `store_name` are copied out for ordering.
//! - `store_meta`: one-off markers, currently the legacy import marker.
//!
//! ## Legacy data
//!
//! Trips written by older clients live in a single JSON blob in a key-value
//! store. The first history read of each store lifetime imports that blob
//! (see [`crate::migrations::migrate_legacy_history`]).
//!
//! The store is constructed once by the host and shared by reference; it
//! serializes access to its connection internally.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Local, TimeZone};
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::ListokConfig;
use crate::error::{ListokError, Result};
use crate::history;
use crate::legacy::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use crate::migrations::{self, LegacyMigration};
use crate::types::{CategoryTotal, ItemPricePoint, ShoppingTrip, TripDigest, WeekBucket};

/// Persistent store of completed trips.
pub struct TripStore {
    /// Database connection
    db: Mutex<Connection>,

    /// Database path (":memory:" for in-memory stores)
    db_path: String,

    /// Legacy key-value store checked for pre-existing history
    legacy: Arc<dyn KeyValueStore>,

    /// Set once the legacy import has been attempted this lifetime
    legacy_checked: AtomicBool,
}

impl TripStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (creating or upgrading) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, legacy: Arc<dyn KeyValueStore>) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.to_string_lossy().into_owned(), legacy)
    }

    /// Create an in-memory database with no legacy data (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_legacy(Arc::new(MemoryKeyValueStore::new()))
    }

    /// Create an in-memory database backed by the given legacy store.
    pub fn in_memory_with_legacy(legacy: Arc<dyn KeyValueStore>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, ":memory:".to_string(), legacy)
    }

    /// Open the store described by `config`.
    pub fn from_config(config: &ListokConfig) -> Result<Self> {
        let legacy: Arc<dyn KeyValueStore> = match &config.legacy_dir {
            Some(dir) => Arc::new(FileKeyValueStore::open(dir)?),
            None => Arc::new(MemoryKeyValueStore::new()),
        };
        Self::open(&config.db_path, legacy)
    }

    fn with_connection(
        mut conn: Connection,
        db_path: String,
        legacy: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        migrations::apply_schema(&mut conn)?;
        info!("[TripStore] Opened {}", db_path);

        Ok(Self {
            db: Mutex::new(conn),
            db_path,
            legacy,
            legacy_checked: AtomicBool::new(false),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| ListokError::Internal("trip store lock poisoned".to_string()))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert or replace a trip, keyed by its ID.
    ///
    /// No shape validation happens here; callers build well-formed trips.
    pub fn save_trip(&self, trip: &ShoppingTrip) -> Result<()> {
        let data = serde_json::to_string(trip)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trips (id, date, store_name, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                store_name = excluded.store_name,
                data = excluded.data",
            params![trip.id, trip.date, trip.store_name, data],
        )?;
        debug!(
            "[TripStore] Saved trip {} ({} items, {:.2} spent)",
            trip.id,
            trip.items.len(),
            trip.total_spent
        );
        Ok(())
    }

    // ========================================================================
    // Legacy Import
    // ========================================================================

    /// Run the legacy import if it has not been attempted this lifetime.
    ///
    /// Failures are logged and treated as "no legacy data".
    pub fn migrate_legacy(&self) -> Option<LegacyMigration> {
        let mut conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("[TripStore] Skipping legacy import: {}", e);
                return None;
            }
        };
        self.migrate_locked(&mut conn)
    }

    fn migrate_locked(&self, conn: &mut Connection) -> Option<LegacyMigration> {
        // Checked under the connection lock so concurrent readers run it once
        if self.legacy_checked.swap(true, Ordering::SeqCst) {
            return None;
        }
        match migrations::migrate_legacy_history(conn, self.legacy.as_ref()) {
            Ok(outcome) => {
                debug!("[TripStore] Legacy import: {:?}", outcome);
                Some(outcome)
            }
            Err(e) => {
                warn!("[TripStore] Legacy import failed: {}", e);
                None
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All trips, newest first. Runs the legacy import check first.
    ///
    /// Read failures are logged and yield an empty list.
    pub fn get_history(&self) -> Vec<ShoppingTrip> {
        match self.try_get_history() {
            Ok(trips) => trips,
            Err(e) => {
                warn!("[TripStore] Failed to read history: {}", e);
                Vec::new()
            }
        }
    }

    /// Fallible variant of [`get_history`](Self::get_history).
    pub fn try_get_history(&self) -> Result<Vec<ShoppingTrip>> {
        let mut conn = self.conn()?;
        self.migrate_locked(&mut conn);

        let mut stmt = conn.prepare("SELECT id, data FROM trips ORDER BY date DESC, id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut trips = Vec::new();
        for row in rows {
            let (id, data) = row?;
            match serde_json::from_str::<ShoppingTrip>(&data) {
                Ok(trip) => trips.push(trip),
                Err(e) => warn!("[TripStore] Skipping unreadable trip {}: {}", id, e),
            }
        }
        Ok(trips)
    }

    /// Look up one trip by ID.
    pub fn get_trip(&self, id: &str) -> Result<Option<ShoppingTrip>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM trips WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Number of stored trips.
    pub fn trip_count(&self) -> Result<u32> {
        let conn = self.conn()?;
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM trips", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Derived Views
    // ========================================================================

    /// Every purchased item as a unit-price point, oldest first.
    pub fn get_all_items_flat(&self) -> Vec<ItemPricePoint> {
        history::flatten_items(&self.get_history())
    }

    /// Item names grouped by local Sunday-aligned week, newest week first.
    pub fn get_weekly_item_data(&self) -> Vec<WeekBucket> {
        self.get_weekly_item_data_in(&Local)
    }

    /// [`get_weekly_item_data`](Self::get_weekly_item_data) in an explicit time zone.
    pub fn get_weekly_item_data_in<Tz: TimeZone>(&self, tz: &Tz) -> Vec<WeekBucket> {
        history::bucket_by_week(&self.get_history(), tz)
    }

    /// Distinct normalized product names, sorted.
    pub fn product_names(&self) -> Vec<String> {
        history::product_names(&self.get_history())
    }

    /// Unit-price history of one product, oldest first.
    pub fn price_history(&self, product: &str) -> Vec<ItemPricePoint> {
        history::price_history(&self.get_history(), product)
    }

    /// Spend per category across all trips, largest first.
    pub fn spend_by_category(&self) -> Vec<CategoryTotal> {
        history::spend_by_category(&self.get_history())
    }

    /// Digests of the `limit` most recent trips.
    pub fn recent_trip_digests(&self, limit: usize) -> Vec<TripDigest> {
        history::recent_digests(&self.get_history(), limit)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::{LEGACY_HISTORY_KEY, LegacyTripLog};
    use crate::types::{ItemCategory, ShoppingItem};
    use tempfile::TempDir;

    fn sample_trip(id: &str, date: i64) -> ShoppingTrip {
        let mut milk = ShoppingItem::new("Milk", 3.5);
        milk.category = ItemCategory::assigned("Dairy");
        let bread = ShoppingItem::new("Bread", 2.0);
        let items = vec![bread, milk];
        ShoppingTrip {
            id: id.to_string(),
            store_name: "Trader Joe's".to_string(),
            date,
            budget: 50.0,
            total_spent: crate::types::total_spent(&items),
            items,
        }
    }

    #[test]
    fn test_create_store() {
        let store = TripStore::in_memory().unwrap();
        assert_eq!(store.trip_count().unwrap(), 0);
        assert!(store.get_history().is_empty());
    }

    #[test]
    fn test_save_and_read_back() {
        let store = TripStore::in_memory().unwrap();
        let trip = sample_trip("t1", 1_000);
        store.save_trip(&trip).unwrap();

        assert_eq!(store.get_trip("t1").unwrap(), Some(trip.clone()));
        assert_eq!(store.get_history(), vec![trip]);
        assert_eq!(store.get_trip("missing").unwrap(), None);
    }

    #[test]
    fn test_save_is_upsert() {
        let store = TripStore::in_memory().unwrap();
        let mut trip = sample_trip("t1", 1_000);
        store.save_trip(&trip).unwrap();
        trip.date = 2_000;
        store.save_trip(&trip).unwrap();

        assert_eq!(store.trip_count().unwrap(), 1);
        assert_eq!(store.get_history()[0].date, 2_000);
    }

    #[test]
    fn test_history_newest_first_flat_oldest_first() {
        let store = TripStore::in_memory().unwrap();
        for (id, date) in [("b", 2_000), ("c", 3_000), ("a", 1_000)] {
            store.save_trip(&sample_trip(id, date)).unwrap();
        }

        let dates: Vec<i64> = store.get_history().iter().map(|t| t.date).collect();
        assert_eq!(dates, vec![3_000, 2_000, 1_000]);

        let flat = store.get_all_items_flat();
        assert_eq!(flat.len(), 6);
        assert!(flat.windows(2).all(|w| w[0].date <= w[1].date));
    }

    #[test]
    fn test_unreadable_row_is_skipped() {
        let store = TripStore::in_memory().unwrap();
        store.save_trip(&sample_trip("good", 1)).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO trips (id, date, store_name, data) VALUES ('bad', 2, 'x', 'nope')",
                [],
            )
            .unwrap();

        let history = store.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "good");
    }

    #[test]
    fn test_legacy_import_on_first_read() {
        let legacy = Arc::new(MemoryKeyValueStore::new());
        LegacyTripLog::new(legacy.as_ref())
            .save_trip(&sample_trip("a", 10))
            .unwrap();

        let store = TripStore::in_memory_with_legacy(legacy.clone()).unwrap();
        let history = store.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "a");
        assert_eq!(legacy.get_item(LEGACY_HISTORY_KEY).unwrap(), None);

        // Second read and explicit call do not re-run the import
        assert_eq!(store.get_history().len(), 1);
        assert_eq!(store.migrate_legacy(), None);
        assert_eq!(store.trip_count().unwrap(), 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("trips.db");
        let legacy: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());

        {
            let store = TripStore::open(&db_path, legacy.clone()).unwrap();
            store.save_trip(&sample_trip("t1", 5)).unwrap();
        }

        let store = TripStore::open(&db_path, legacy).unwrap();
        assert_eq!(store.trip_count().unwrap(), 1);
        assert_eq!(store.get_history()[0].items.len(), 2);
    }
}
