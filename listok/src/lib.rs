//! Listok - grocery budget tracking core
//!
//! This crate provides:
//! - SQLite persistence of completed shopping trips, with a one-time import
//!   of history written by the legacy single-blob layout
//! - A trip session workflow with a live, budget-tracked item list
//! - Background AI enrichment (category + icon) merged into the list by item ID
//! - A Gemini HTTP client for enrichment and spending insights
//! - UniFFI bindings for iOS/Android

use std::time::Instant;

pub mod config;
pub mod error;
pub use config::{ConfigError, GeminiConfig, ListokConfig};
pub use error::{ListokError, Result};

// Shared data types
pub mod types;
pub use types::{
    BudgetStatus, BudgetSummary, CategoryTotal, ItemCategory, ItemPricePoint, ShoppingItem,
    ShoppingTrip, TripDigest, WeekBucket, WeeklySummary,
};

// Persistence layer with SQLite storage
pub mod history;
pub mod legacy;
pub mod migrations;
pub mod persistence;
pub use legacy::{FileKeyValueStore, KeyValueStore, LegacyTripLog, MemoryKeyValueStore};
pub use migrations::LegacyMigration;
pub use persistence::TripStore;

// Active trip workflow
pub mod enrichment;
pub mod item_list;
pub mod session;
pub use enrichment::{Categorizer, EnrichmentCoordinator, IconGenerator, OfflineEnricher};
pub use item_list::ItemList;
pub use session::{FinishOutcome, SessionState, TripSession};

// Generation API client and insights
pub mod http;
pub mod insights;
pub use http::GeminiClient;
pub use insights::{SpendingSummarizer, WeeklySummarizer};

// FFI bindings for mobile platforms
pub mod ffi;
pub use ffi::ListokHandle;

uniffi::setup_scaffolding!();

/// Helper to calculate elapsed milliseconds from an Instant
#[inline]
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("listok"),
    );
}

#[cfg(not(target_os = "android"))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}
