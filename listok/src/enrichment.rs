//! Background enrichment of newly added items.
//!
//! Each item gets one task that asks the [`Categorizer`] and the
//! [`IconGenerator`] concurrently and merges both answers into the live
//! [`ItemList`] in a single update keyed by item ID. Failures never reach the
//! caller: the item falls back to the "Other" category with no icon.
//!
//! Tasks are not cancelled when their item is removed. Removal marks the ID
//! as discarded and the late result is dropped.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{Shared, join_all};
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::elapsed_ms;
use crate::error::{ListokError, Result};
use crate::item_list::ItemList;
use crate::types::{FALLBACK_CATEGORY, ItemCategory, PENDING_CATEGORY};

/// Assigns a category label to an item name.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, item_name: &str) -> Result<String>;
}

/// Produces an icon (data URI or URL) for an item name.
#[async_trait]
pub trait IconGenerator: Send + Sync {
    /// `Ok(None)` when no icon could be produced.
    async fn generate_icon(&self, item_name: &str) -> Result<Option<String>>;
}

/// Collaborator used when no generation API is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineEnricher;

#[async_trait]
impl Categorizer for OfflineEnricher {
    async fn categorize(&self, _item_name: &str) -> Result<String> {
        Ok(FALLBACK_CATEGORY.to_string())
    }
}

#[async_trait]
impl IconGenerator for OfflineEnricher {
    async fn generate_icon(&self, _item_name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Resolves once the task it belongs to has settled (or been dropped).
type Settled = Shared<oneshot::Receiver<()>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deregisters a task when it finishes, panics or is dropped unpolled.
struct InFlightGuard {
    id: String,
    in_flight: Arc<Mutex<HashMap<String, Settled>>>,
    discarded: Arc<Mutex<HashSet<String>>>,
    // Dropped after `drop` runs, so waiters wake only once the map is updated
    _settled: oneshot::Sender<()>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut tasks = lock(&self.in_flight);
        tasks.remove(&self.id);
        lock(&self.discarded).remove(&self.id);
    }
}

/// Runs and tracks one enrichment task per item.
pub struct EnrichmentCoordinator {
    categorizer: Arc<dyn Categorizer>,
    icons: Arc<dyn IconGenerator>,
    runtime: Handle,
    timeout: Option<Duration>,
    /// Item ID -> completion signal, for every task that has not settled
    in_flight: Arc<Mutex<HashMap<String, Settled>>>,
    discarded: Arc<Mutex<HashSet<String>>>,
}

impl EnrichmentCoordinator {
    pub fn new(
        categorizer: Arc<dyn Categorizer>,
        icons: Arc<dyn IconGenerator>,
        runtime: Handle,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            categorizer,
            icons,
            runtime,
            timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            discarded: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Coordinator that assigns "Other" to everything.
    pub fn offline(runtime: Handle) -> Self {
        let offline = Arc::new(OfflineEnricher);
        Self::new(offline.clone(), offline, runtime, None)
    }

    /// Start enrichment for item `id` in `items`. Returns immediately.
    pub fn enrich(&self, items: &ItemList, id: &str, name: &str) {
        let items = items.clone();
        let name = name.to_string();
        let categorizer = Arc::clone(&self.categorizer);
        let icons = Arc::clone(&self.icons);
        let timeout = self.timeout;
        let discarded = Arc::clone(&self.discarded);

        let (settled_tx, settled_rx) = oneshot::channel();
        lock(&self.in_flight).insert(id.to_string(), settled_rx.shared());
        let guard = InFlightGuard {
            id: id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
            discarded: Arc::clone(&self.discarded),
            _settled: settled_tx,
        };

        self.runtime.spawn(async move {
            let start = Instant::now();
            let outcome = within(timeout, async {
                tokio::try_join!(categorizer.categorize(&name), icons.generate_icon(&name))
            })
            .await;

            if lock(&discarded).contains(&guard.id) {
                debug!("[Enrichment] Dropping result for removed item {}", guard.id);
            } else {
                merge_outcome(&items, &guard.id, &name, outcome);
            }
            debug!(
                "[Enrichment] Settled {} ({} ms)",
                guard.id,
                elapsed_ms(start)
            );
            drop(guard);
        });
    }

    /// Drop any late result for `id`. No-op when nothing is in flight for it.
    pub fn discard(&self, id: &str) {
        let tasks = lock(&self.in_flight);
        if tasks.contains_key(id) {
            lock(&self.discarded).insert(id.to_string());
        }
    }

    /// Number of tasks that have not settled yet.
    pub fn pending_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Wait until every task started so far, and any started meanwhile, has settled.
    ///
    /// Tasks stay tracked while this waits, so [`discard`](Self::discard) and
    /// [`pending_count`](Self::pending_count) keep working.
    pub async fn wait_idle(&self) {
        loop {
            let waiting: Vec<Settled> = lock(&self.in_flight).values().cloned().collect();
            if waiting.is_empty() {
                return;
            }
            // Err only means the sender was dropped, which is how tasks signal
            join_all(waiting).await;
        }
    }
}

async fn within<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ListokError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Apply a settled enrichment result to item `id`, if it is still listed.
fn merge_outcome(
    items: &ItemList,
    id: &str,
    name: &str,
    outcome: Result<(String, Option<String>)>,
) {
    let applied = match outcome {
        Ok((label, image)) => {
            let label = label.trim();
            // The pending sentinel would read back as unsettled after a reload
            let category = if label.is_empty() || label == PENDING_CATEGORY {
                ItemCategory::fallback()
            } else {
                ItemCategory::assigned(label)
            };
            items.update(id, |item| {
                item.category = category;
                if item.image_url.is_none() {
                    item.image_url = image;
                }
            })
        }
        Err(e) => {
            warn!("[Enrichment] Failed for {:?}: {}", name, e);
            items.update(id, |item| {
                if item.category.is_pending() {
                    item.category = ItemCategory::fallback();
                }
            })
        }
    };

    if !applied {
        debug!("[Enrichment] Item {} no longer listed", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShoppingItem;

    struct Fixed;

    #[async_trait]
    impl Categorizer for Fixed {
        async fn categorize(&self, _item_name: &str) -> Result<String> {
            Ok(" Dairy ".to_string())
        }
    }

    #[async_trait]
    impl IconGenerator for Fixed {
        async fn generate_icon(&self, _item_name: &str) -> Result<Option<String>> {
            Ok(Some("data:image/png;base64,AA==".to_string()))
        }
    }

    fn listed(items: &ItemList, name: &str) -> String {
        let item = ShoppingItem::new(name, 1.0);
        let id = item.id.clone();
        items.push_front(item);
        id
    }

    #[tokio::test]
    async fn test_success_sets_both_fields() {
        let coordinator =
            EnrichmentCoordinator::new(Arc::new(Fixed), Arc::new(Fixed), Handle::current(), None);
        let items = ItemList::new();
        let id = listed(&items, "Milk");

        coordinator.enrich(&items, &id, "Milk");
        coordinator.wait_idle().await;

        let item = items.get(&id).unwrap();
        assert_eq!(item.category, ItemCategory::assigned("Dairy"));
        assert_eq!(item.image_url.as_deref(), Some("data:image/png;base64,AA=="));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_assigns_fallback() {
        let coordinator = EnrichmentCoordinator::offline(Handle::current());
        let items = ItemList::new();
        let id = listed(&items, "Tea");

        coordinator.enrich(&items, &id, "Tea");
        coordinator.wait_idle().await;

        let item = items.get(&id).unwrap();
        assert_eq!(item.category.as_str(), "Other");
        assert_eq!(item.image_url, None);
    }

    #[test]
    fn test_merge_failure_keeps_assigned_category() {
        let items = ItemList::new();
        let id = listed(&items, "Rice");
        items.update(&id, |item| item.category = ItemCategory::assigned("Pantry"));

        merge_outcome(
            &items,
            &id,
            "Rice",
            Err(ListokError::Timeout(Duration::from_secs(1))),
        );
        assert_eq!(items.get(&id).unwrap().category, ItemCategory::assigned("Pantry"));
    }

    #[test]
    fn test_merge_blank_label_falls_back() {
        let items = ItemList::new();
        let id = listed(&items, "Thing");
        merge_outcome(&items, &id, "Thing", Ok(("  ".to_string(), None)));
        assert_eq!(items.get(&id).unwrap().category, ItemCategory::fallback());
    }

    #[test]
    fn test_merge_pending_sentinel_label_falls_back() {
        let items = ItemList::new();
        let id = listed(&items, "Mystery");
        merge_outcome(&items, &id, "Mystery", Ok(("Loading...".to_string(), None)));

        let item = items.get(&id).unwrap();
        assert_eq!(item.category, ItemCategory::fallback());

        // Survives a serialize/deserialize cycle as a settled category
        let json = serde_json::to_string(&item).unwrap();
        let reloaded: ShoppingItem = serde_json::from_str(&json).unwrap();
        assert!(!reloaded.category.is_pending());
    }

    #[test]
    fn test_merge_for_missing_item_is_noop() {
        let items = ItemList::new();
        merge_outcome(&items, "gone", "Gone", Ok(("Dairy".to_string(), None)));
        assert!(items.is_empty());
    }
}
