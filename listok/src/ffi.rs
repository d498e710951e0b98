//! FFI bindings for mobile platforms (iOS/Android).
//!
//! [`ListokHandle`] is the single object a host app holds. It owns the tokio
//! runtime that enrichment and generation requests run on, the trip store,
//! and at most one trip session. All exported methods are synchronous.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, info};
use tokio::runtime::{Builder, Runtime};

use crate::config::{GeminiConfig, ListokConfig};
use crate::enrichment::{Categorizer, EnrichmentCoordinator, IconGenerator};
use crate::error::{ListokError, OptionExt};
use crate::http::GeminiClient;
use crate::insights;
use crate::persistence::TripStore;
use crate::session::{FinishOutcome, SessionState, TripSession};
use crate::types::{
    BudgetSummary, CategoryTotal, ItemPricePoint, ShoppingItem, ShoppingTrip, WeekBucket,
    WeeklySummary,
};
use crate::{elapsed_ms, init_logging};

const RUNTIME_WORKER_THREADS: usize = 2;

/// Host-facing entry point.
#[derive(uniffi::Object)]
pub struct ListokHandle {
    runtime: Runtime,
    store: Arc<TripStore>,
    enrichment: Arc<EnrichmentCoordinator>,
    gemini: Option<GeminiClient>,
    session: Mutex<Option<TripSession>>,
}

impl ListokHandle {
    /// Build a handle from a full configuration.
    pub fn with_config(config: &ListokConfig) -> Result<Self, ListokError> {
        init_logging();
        let start = Instant::now();

        let runtime = Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKER_THREADS)
            .thread_name("listok-worker")
            .enable_all()
            .build()?;

        let store = Arc::new(TripStore::from_config(config)?);

        let gemini = config.gemini.as_ref().map(GeminiClient::new).transpose()?;
        let enrichment = match &gemini {
            Some(client) => {
                let client = Arc::new(client.clone());
                let categorizer: Arc<dyn Categorizer> = client.clone();
                let icons: Arc<dyn IconGenerator> = client;
                EnrichmentCoordinator::new(
                    categorizer,
                    icons,
                    runtime.handle().clone(),
                    config.enrichment_timeout,
                )
            }
            None => EnrichmentCoordinator::offline(runtime.handle().clone()),
        };

        info!(
            "[ListokHandle] Ready (db: {}, ai: {}) ({} ms)",
            store.db_path(),
            gemini.is_some(),
            elapsed_ms(start)
        );

        Ok(Self {
            runtime,
            store,
            enrichment: Arc::new(enrichment),
            gemini,
            session: Mutex::new(None),
        })
    }

    fn session(&self) -> MutexGuard<'_, Option<TripSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[uniffi::export]
impl ListokHandle {
    /// Open the store at `db_path`. A blank `api_key` runs without AI enrichment.
    #[uniffi::constructor]
    pub fn open(
        db_path: String,
        legacy_dir: Option<String>,
        api_key: Option<String>,
    ) -> Result<Arc<Self>, ListokError> {
        let config = ListokConfig {
            db_path: PathBuf::from(db_path),
            legacy_dir: legacy_dir.map(PathBuf::from),
            gemini: api_key
                .filter(|key| !key.trim().is_empty())
                .map(GeminiConfig::new),
            ..ListokConfig::default()
        };
        Self::with_config(&config).map(Arc::new)
    }

    /// Open using `LISTOK_*` / `GEMINI_*` environment variables.
    #[uniffi::constructor]
    pub fn from_env() -> Result<Arc<Self>, ListokError> {
        let config = ListokConfig::from_env()?;
        Self::with_config(&config).map(Arc::new)
    }

    // ========================================================================
    // History
    // ========================================================================

    pub fn history(&self) -> Vec<ShoppingTrip> {
        self.store.get_history()
    }

    pub fn trip(&self, id: String) -> Result<Option<ShoppingTrip>, ListokError> {
        self.store.get_trip(&id)
    }

    pub fn trip_count(&self) -> Result<u32, ListokError> {
        self.store.trip_count()
    }

    pub fn items_flat(&self) -> Vec<ItemPricePoint> {
        self.store.get_all_items_flat()
    }

    pub fn weekly_item_data(&self) -> Vec<WeekBucket> {
        self.store.get_weekly_item_data()
    }

    pub fn product_names(&self) -> Vec<String> {
        self.store.product_names()
    }

    pub fn price_history(&self, product: String) -> Vec<ItemPricePoint> {
        self.store.price_history(&product)
    }

    pub fn spend_by_category(&self) -> Vec<CategoryTotal> {
        self.store.spend_by_category()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Start a new trip. Fails (returns `false`) while another trip is active
    /// or when the input is invalid.
    pub fn start_trip(&self, store_name: String, budget: String) -> bool {
        let mut guard = self.session();
        if guard
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Active)
        {
            debug!("[ListokHandle] start_trip ignored, a trip is already active");
            return false;
        }

        let mut session = TripSession::new(Arc::clone(&self.store), Arc::clone(&self.enrichment));
        let started = session.start(&store_name, &budget);
        if started {
            *guard = Some(session);
        }
        started
    }

    pub fn session_state(&self) -> SessionState {
        self.session()
            .as_ref()
            .map_or(SessionState::Setup, TripSession::state)
    }

    pub fn add_item(&self, name: String, price: String) -> Option<String> {
        self.session().as_mut()?.add_item(&name, &price)
    }

    pub fn remove_item(&self, id: String) -> bool {
        self.session()
            .as_mut()
            .is_some_and(|s| s.remove_item(&id))
    }

    pub fn active_items(&self) -> Vec<ShoppingItem> {
        self.session()
            .as_ref()
            .map(TripSession::items)
            .unwrap_or_default()
    }

    /// Running totals, while a trip is active.
    pub fn budget_summary(&self) -> Option<BudgetSummary> {
        self.session()
            .as_ref()
            .filter(|s| s.state() == SessionState::Active)
            .map(TripSession::budget_summary)
    }

    /// Save the active trip. `None` when the trip had no items and was cancelled.
    pub fn finish_trip(&self) -> Result<Option<ShoppingTrip>, ListokError> {
        let mut guard = self.session();
        let session = guard.as_mut().ok_or_invalid_state("no trip in progress")?;
        match session.finish()? {
            FinishOutcome::Saved(trip) => Ok(Some(trip)),
            FinishOutcome::Cancelled => Ok(None),
        }
    }

    pub fn cancel_trip(&self) -> bool {
        self.session().as_mut().is_some_and(TripSession::cancel)
    }

    /// Block until every enrichment task started so far has settled.
    pub fn wait_for_enrichment(&self) {
        self.runtime.block_on(self.enrichment.wait_idle());
    }

    // ========================================================================
    // Insights
    // ========================================================================

    /// Advice on recent spending. `None` without history or without an API key.
    pub fn spending_insight(&self) -> Option<String> {
        let client = self.gemini.as_ref()?;
        self.runtime
            .block_on(insights::spending_insight(client, &self.store))
    }

    /// Summaries of each week of purchases. Empty without an API key.
    pub fn weekly_summaries(&self) -> Vec<WeeklySummary> {
        let Some(client) = self.gemini.as_ref() else {
            return Vec::new();
        };
        let weeks = self.store.get_weekly_item_data();
        self.runtime
            .block_on(insights::weekly_summaries(client, &weeks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handle(tmp: &TempDir) -> Arc<ListokHandle> {
        let db = tmp.path().join("listok.db");
        ListokHandle::open(db.to_string_lossy().into_owned(), None, None).unwrap()
    }

    #[test]
    fn test_trip_through_handle() {
        let tmp = TempDir::new().unwrap();
        let handle = handle(&tmp);

        assert!(handle.add_item("Milk".into(), "3.5".into()).is_none());
        assert!(handle.start_trip("Aldi".into(), "20".into()));
        assert!(!handle.start_trip("Lidl".into(), "20".into()));

        let milk = handle.add_item("Milk".into(), "3.5".into()).unwrap();
        handle.add_item("Bread".into(), "2".into()).unwrap();
        handle.wait_for_enrichment();

        let items = handle.active_items();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.category.as_str() == "Other"));
        assert_eq!(handle.budget_summary().unwrap().spent, 5.5);

        assert!(handle.remove_item(milk));
        let trip = handle.finish_trip().unwrap().unwrap();
        assert_eq!(trip.items.len(), 1);
        assert_eq!(handle.session_state(), SessionState::Finished);
        assert_eq!(handle.history(), vec![trip]);
        assert!(handle.budget_summary().is_none());

        // A new trip may start once the previous one is finished
        assert!(handle.start_trip("Lidl".into(), "15".into()));
        assert_eq!(handle.finish_trip().unwrap(), None);
        assert_eq!(handle.trip_count().unwrap(), 1);
    }

    #[test]
    fn test_finish_without_trip() {
        let tmp = TempDir::new().unwrap();
        let handle = handle(&tmp);
        assert!(matches!(
            handle.finish_trip(),
            Err(ListokError::InvalidState(_))
        ));
        assert!(!handle.cancel_trip());
        assert_eq!(handle.spending_insight(), None);
        assert!(handle.weekly_summaries().is_empty());
    }
}
