//! Trip session workflow.
//!
//! A session moves `Setup -> Active -> Finished | Cancelled`. While active it
//! owns the live [`ItemList`]; adding an item inserts a pending placeholder
//! and hands it to the [`EnrichmentCoordinator`] without waiting.

use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::enrichment::EnrichmentCoordinator;
use crate::error::{ListokError, Result};
use crate::item_list::ItemList;
use crate::persistence::TripStore;
use crate::types::{BudgetStatus, BudgetSummary, ShoppingItem, ShoppingTrip, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SessionState {
    Setup,
    Active,
    Finished,
    Cancelled,
}

/// Result of a successful [`TripSession::finish`].
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    Saved(ShoppingTrip),
    /// Nothing was bought; no record written
    Cancelled,
}

/// Parse a user-entered amount. Rejects blanks, NaN and infinities.
fn parse_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// One shopping trip from setup to completion.
pub struct TripSession {
    state: SessionState,
    store_name: String,
    budget: f64,
    items: ItemList,
    store: Arc<TripStore>,
    enrichment: Arc<EnrichmentCoordinator>,
    /// Assigned on the first finish attempt and reused by retries
    pending_trip_id: Option<String>,
}

impl TripSession {
    pub fn new(store: Arc<TripStore>, enrichment: Arc<EnrichmentCoordinator>) -> Self {
        Self {
            state: SessionState::Setup,
            store_name: String::new(),
            budget: 0.0,
            items: ItemList::new(),
            store,
            enrichment,
            pending_trip_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Setup -> Active. Returns `false` and stays in Setup on invalid input.
    pub fn start(&mut self, store_name: &str, budget: &str) -> bool {
        if self.state != SessionState::Setup {
            return false;
        }
        let store_name = store_name.trim();
        let Some(budget) = parse_amount(budget).filter(|b| *b > 0.0) else {
            return false;
        };
        if store_name.is_empty() {
            return false;
        }

        self.store_name = store_name.to_string();
        self.budget = budget;
        self.state = SessionState::Active;
        info!(
            "[Session] Started trip at {:?} with budget {:.2}",
            self.store_name, self.budget
        );
        true
    }

    /// Active -> Cancelled. Items are dropped, nothing is persisted.
    pub fn cancel(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        for item in self.items.snapshot() {
            self.enrichment.discard(&item.id);
        }
        self.items.clear();
        self.state = SessionState::Cancelled;
        info!("[Session] Cancelled trip at {:?}", self.store_name);
        true
    }

    /// Persist the trip and move to Finished.
    ///
    /// An empty trip is cancelled instead. On a save failure the session
    /// stays Active with its items intact; calling again retries with the
    /// same trip ID.
    pub fn finish(&mut self) -> Result<FinishOutcome> {
        if self.state != SessionState::Active {
            return Err(ListokError::InvalidState(format!(
                "cannot finish a trip in state {:?}",
                self.state
            )));
        }

        let items = self.items.snapshot();
        if items.is_empty() {
            self.state = SessionState::Cancelled;
            info!("[Session] Finished with no items, trip cancelled");
            return Ok(FinishOutcome::Cancelled);
        }

        let trip = ShoppingTrip {
            id: self
                .pending_trip_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone(),
            store_name: self.store_name.clone(),
            date: now_millis(),
            budget: self.budget,
            total_spent: crate::types::total_spent(&items),
            items,
        };

        match self.store.save_trip(&trip) {
            Ok(()) => {
                self.state = SessionState::Finished;
                info!(
                    "[Session] Saved trip {} ({} items, {:.2} of {:.2})",
                    trip.id,
                    trip.items.len(),
                    trip.total_spent,
                    trip.budget
                );
                Ok(FinishOutcome::Saved(trip))
            }
            Err(e) => {
                warn!("[Session] Failed to save trip {}: {}", trip.id, e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Add a pending item and start its enrichment.
    ///
    /// Returns the new item's ID, or `None` when the session is not active or
    /// the input is rejected.
    pub fn add_item(&mut self, name: &str, price: &str) -> Option<String> {
        if self.state != SessionState::Active {
            return None;
        }
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let price = parse_amount(price).filter(|p| *p >= 0.0)?;

        let item = ShoppingItem::new(name, price);
        let id = item.id.clone();
        self.items.push_front(item);
        self.enrichment.enrich(&self.items, &id, name);
        debug!("[Session] Added {:?} at {:.2} as {}", name, price, id);
        Some(id)
    }

    /// Remove an item. Any enrichment still running for it is discarded.
    pub fn remove_item(&mut self, id: &str) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let removed = self.items.remove(id).is_some();
        self.enrichment.discard(id);
        removed
    }

    /// Current items, newest first.
    pub fn items(&self) -> Vec<ShoppingItem> {
        self.items.snapshot()
    }

    /// Shared handle to the live list.
    pub fn item_list(&self) -> &ItemList {
        &self.items
    }

    // ========================================================================
    // Totals
    // ========================================================================

    pub fn total_spent(&self) -> f64 {
        self.items.total_spent()
    }

    /// Budget minus spend. Negative when over budget.
    pub fn remaining(&self) -> f64 {
        self.budget - self.total_spent()
    }

    pub fn budget_summary(&self) -> BudgetSummary {
        BudgetSummary::new(self.budget, self.total_spent())
    }

    pub fn budget_status(&self) -> BudgetStatus {
        self.budget_summary().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Handle;

    fn session() -> TripSession {
        let store = Arc::new(TripStore::in_memory().unwrap());
        let enrichment = Arc::new(EnrichmentCoordinator::offline(Handle::current()));
        TripSession::new(store, enrichment)
    }

    #[tokio::test]
    async fn test_start_validation() {
        let mut s = session();
        assert!(!s.start("  ", "50"));
        assert!(!s.start("Aldi", ""));
        assert!(!s.start("Aldi", "abc"));
        assert!(!s.start("Aldi", "0"));
        assert!(!s.start("Aldi", "-5"));
        assert!(!s.start("Aldi", "NaN"));
        assert_eq!(s.state(), SessionState::Setup);

        assert!(s.start(" Aldi ", "50"));
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.store_name(), "Aldi");
        assert!(!s.start("Lidl", "10"));
    }

    #[tokio::test]
    async fn test_add_item_validation() {
        let mut s = session();
        assert_eq!(s.add_item("Milk", "3.5"), None);

        s.start("Aldi", "50");
        assert_eq!(s.add_item("", "3.5"), None);
        assert_eq!(s.add_item("Milk", ""), None);
        assert_eq!(s.add_item("Milk", "-1"), None);
        assert_eq!(s.add_item("Milk", "inf"), None);
        assert!(s.items().is_empty());

        assert!(s.add_item("Water", "0").is_some());
        assert_eq!(s.items().len(), 1);
    }

    #[tokio::test]
    async fn test_totals_follow_add_and_remove() {
        let mut s = session();
        s.start("Aldi", "10");
        let milk = s.add_item("Milk", "3.5").unwrap();
        s.add_item("Cheese", "8").unwrap();
        assert_eq!(s.total_spent(), 11.5);
        assert_eq!(s.remaining(), -1.5);
        assert_eq!(s.budget_status(), BudgetStatus::Over);

        assert!(s.remove_item(&milk));
        assert!(!s.remove_item(&milk));
        assert_eq!(s.total_spent(), 8.0);
        assert_eq!(s.budget_status(), BudgetStatus::Approaching);
    }

    enum Step {
        Add(&'static str, &'static str),
        /// Remove the item at this position in the list, newest first
        Remove(usize),
        RemoveMissing,
    }

    #[tokio::test]
    async fn test_total_matches_item_sum_after_every_step() {
        use Step::*;
        let steps = [
            Add("Milk", "3.49"),
            Add("Bread", "2.10"),
            Add("Eggs", "0.01"),
            Remove(1),
            Add("Tea", "0"),
            Add("Rice", "12.99"),
            RemoveMissing,
            Remove(0),
            Add("Soap", "1.30"),
            Add("Apples", "4.75"),
            Remove(3),
            Remove(0),
            Add("Butter", "2.89"),
            Remove(2),
            Remove(0),
            Remove(0),
            Add("Cheese", "8"),
        ];

        let mut s = session();
        s.start("Aldi", "40");
        let mut expected: Vec<(String, f64)> = Vec::new();

        for (n, step) in steps.iter().enumerate() {
            match *step {
                Add(name, price) => {
                    let id = s.add_item(name, price).unwrap();
                    expected.insert(0, (id, price.parse().unwrap()));
                }
                Remove(index) => {
                    let (id, _) = expected.remove(index);
                    assert!(s.remove_item(&id), "step {n}");
                }
                RemoveMissing => assert!(!s.remove_item("not-listed"), "step {n}"),
            }

            let listed: Vec<String> = s.items().into_iter().map(|item| item.id).collect();
            let tracked: Vec<String> = expected.iter().map(|(id, _)| id.clone()).collect();
            assert_eq!(listed, tracked, "step {n}");

            let from_items: f64 = s.items().iter().map(|item| item.line_total()).sum();
            let from_steps: f64 = expected.iter().map(|(_, price)| price).sum();
            assert!((s.total_spent() - from_items).abs() < 1e-9, "step {n}");
            assert!((s.total_spent() - from_steps).abs() < 1e-9, "step {n}");
            assert!((s.remaining() - (40.0 - from_steps)).abs() < 1e-9, "step {n}");
        }
    }

    #[tokio::test]
    async fn test_finish_requires_active() {
        let mut s = session();
        assert!(matches!(s.finish(), Err(ListokError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_retried_finish_reuses_trip_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("trips.db");
        let legacy = Arc::new(crate::legacy::MemoryKeyValueStore::new());
        let store = Arc::new(TripStore::open(&db_path, legacy).unwrap());
        let enrichment = Arc::new(EnrichmentCoordinator::offline(Handle::current()));
        let mut s = TripSession::new(store, enrichment);
        s.start("Aldi", "10");
        s.add_item("Milk", "3").unwrap();

        let other = rusqlite::Connection::open(&db_path).unwrap();
        other.execute_batch("DROP TABLE trips").unwrap();
        assert!(s.finish().is_err());
        let first_id = s.pending_trip_id.clone().unwrap();

        other
            .execute_batch(
                "CREATE TABLE trips (id TEXT PRIMARY KEY, date INTEGER NOT NULL,
                 store_name TEXT NOT NULL, data TEXT NOT NULL)",
            )
            .unwrap();

        match s.finish().unwrap() {
            FinishOutcome::Saved(trip) => assert_eq!(trip.id, first_id),
            FinishOutcome::Cancelled => panic!("trip with items was cancelled"),
        }
    }

    #[tokio::test]
    async fn test_cancel_drops_items() {
        let mut s = session();
        s.start("Aldi", "10");
        s.add_item("Milk", "3").unwrap();
        assert!(s.cancel());
        assert_eq!(s.state(), SessionState::Cancelled);
        assert!(s.items().is_empty());
        assert_eq!(s.add_item("Bread", "2"), None);
    }
}
