//! Shopping data types shared by persistence, the session workflow and FFI.
//!
//! Field names serialize in camelCase so that trips written by older clients
//! into the legacy key-value blob deserialize without any translation.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category text written for an item whose enrichment has not settled yet.
pub const PENDING_CATEGORY: &str = "Loading...";

/// Category applied when enrichment fails.
pub const FALLBACK_CATEGORY: &str = "Other";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a millisecond timestamp into a local date-time.
///
/// Out-of-range timestamps clamp to the Unix epoch.
pub fn local_datetime(millis: i64) -> DateTime<Local> {
    datetime_in(millis, &Local)
}

pub(crate) fn datetime_in<Tz: TimeZone>(millis: i64, tz: &Tz) -> DateTime<Tz> {
    DateTime::from_timestamp_millis(millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(tz)
}

// ============================================================================
// Items
// ============================================================================

/// Category of a shopping item.
///
/// Serialized as a bare string: `Pending` becomes the legacy `"Loading..."`
/// sentinel, anything else is the assigned label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(from = "String", into = "String")]
pub enum ItemCategory {
    Pending,
    Assigned { label: String },
}

impl ItemCategory {
    pub fn assigned(label: impl Into<String>) -> Self {
        ItemCategory::Assigned {
            label: label.into(),
        }
    }

    pub fn fallback() -> Self {
        Self::assigned(FALLBACK_CATEGORY)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ItemCategory::Pending)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemCategory::Pending => PENDING_CATEGORY,
            ItemCategory::Assigned { label } => label,
        }
    }
}

impl From<String> for ItemCategory {
    fn from(value: String) -> Self {
        if value == PENDING_CATEGORY {
            ItemCategory::Pending
        } else {
            ItemCategory::Assigned { label: value }
        }
    }
}

impl From<ItemCategory> for String {
    fn from(value: ItemCategory) -> Self {
        match value {
            ItemCategory::Pending => PENDING_CATEGORY.to_string(),
            ItemCategory::Assigned { label } => label,
        }
    }
}

fn default_quantity() -> u32 {
    1
}

/// One line entry of a shopping trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    /// Unique item ID (UUID v4), the only key used to merge enrichment results
    pub id: String,
    pub name: String,
    /// Unit price as entered
    pub price: f64,
    pub category: ItemCategory,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Creation time in ms since epoch
    pub timestamp: i64,
    /// Generated icon (data URI or URL), set at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ShoppingItem {
    /// Create a placeholder item: fresh ID, quantity 1, category pending.
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            price,
            category: ItemCategory::Pending,
            quantity: 1,
            timestamp: now_millis(),
            image_url: None,
        }
    }

    /// `price * quantity`.
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }

    /// Price normalized per unit. A zero quantity is treated as one.
    pub fn unit_price(&self) -> f64 {
        self.price / f64::from(self.quantity.max(1))
    }
}

/// Sum of `price * quantity` over the given items.
pub fn total_spent<'a>(items: impl IntoIterator<Item = &'a ShoppingItem>) -> f64 {
    items.into_iter().map(ShoppingItem::line_total).sum()
}

// ============================================================================
// Trips
// ============================================================================

/// A completed shopping trip. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingTrip {
    pub id: String,
    pub store_name: String,
    /// Completion time in ms since epoch
    pub date: i64,
    pub budget: f64,
    /// Newest-first snapshot of the trip's items
    pub items: Vec<ShoppingItem>,
    /// Frozen at save time
    pub total_spent: f64,
}

impl ShoppingTrip {
    /// Budget minus spend. Negative when over budget.
    pub fn savings(&self) -> f64 {
        self.budget - self.total_spent
    }

    pub fn is_over_budget(&self) -> bool {
        self.savings() < 0.0
    }
}

// ============================================================================
// Derived Views
// ============================================================================

/// One purchase of a product, normalized to a unit price.
/// Sorted oldest first when returned from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct ItemPricePoint {
    pub name: String,
    pub unit_price: f64,
    /// Trip date in ms since epoch
    pub date: i64,
    pub store: String,
}

/// Item names bought during one Sunday-aligned calendar week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct WeekBucket {
    /// Display label of the week's Sunday, e.g. "Mar 2, 2025"
    pub label: String,
    /// ISO date of the week's Sunday (bucket key)
    pub week_start: String,
    pub items: Vec<String>,
}

/// AI-generated summary of one week of purchases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct WeeklySummary {
    pub week: String,
    pub summary: String,
}

/// Compact trip description handed to the spending-insight generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct TripDigest {
    /// Local date, `YYYY-MM-DD`
    pub date: String,
    pub store: String,
    pub total: f64,
    pub budget: f64,
}

impl From<&ShoppingTrip> for TripDigest {
    fn from(trip: &ShoppingTrip) -> Self {
        Self {
            date: local_datetime(trip.date).format("%Y-%m-%d").to_string(),
            store: trip.store_name.clone(),
            total: trip.total_spent,
            budget: trip.budget,
        }
    }
}

/// Spend attributed to one category across trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
}

// ============================================================================
// Budget
// ============================================================================

/// How close the running spend is to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    /// 75% or less used
    UnderBudget,
    /// More than 75% used
    Approaching,
    /// More than 90% used
    Near,
    /// Budget reached or exceeded
    Over,
}

impl BudgetStatus {
    pub fn from_percent(percent_used: f64) -> Self {
        if percent_used >= 100.0 {
            BudgetStatus::Over
        } else if percent_used > 90.0 {
            BudgetStatus::Near
        } else if percent_used > 75.0 {
            BudgetStatus::Approaching
        } else {
            BudgetStatus::UnderBudget
        }
    }
}

/// Running totals of an active trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub budget: f64,
    pub spent: f64,
    /// May be negative
    pub remaining: f64,
    /// Clamped to 0..=100
    pub percent_used: f64,
    pub status: BudgetStatus,
}

impl BudgetSummary {
    pub fn new(budget: f64, spent: f64) -> Self {
        let percent_used = if budget > 0.0 {
            (spent / budget * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };
        Self {
            budget,
            spent,
            remaining: budget - spent,
            percent_used,
            status: BudgetStatus::from_percent(percent_used),
        }
    }
}
