//! Spending and weekly-summary insights over trip history.

use async_trait::async_trait;
use log::warn;

use crate::error::Result;
use crate::persistence::TripStore;
use crate::types::{TripDigest, WeekBucket, WeeklySummary};

/// Text shown when the insight collaborator fails.
pub const INSIGHT_FALLBACK: &str = "Great job tracking your expenses!";

/// Number of most recent trips handed to the spending insight.
pub const INSIGHT_TRIP_WINDOW: usize = 5;

/// Writes a short advice text about recent spending.
#[async_trait]
pub trait SpendingSummarizer: Send + Sync {
    async fn summarize_spending(&self, trips: &[TripDigest]) -> Result<String>;
}

/// Writes one summary per week of purchases.
#[async_trait]
pub trait WeeklySummarizer: Send + Sync {
    async fn summarize_weeks(&self, weeks: &[WeekBucket]) -> Result<Vec<WeeklySummary>>;
}

/// Advice on the most recent trips.
///
/// `None` when there is no history; the fallback text when the collaborator fails.
pub async fn spending_insight(
    summarizer: &dyn SpendingSummarizer,
    store: &TripStore,
) -> Option<String> {
    let digests = store.recent_trip_digests(INSIGHT_TRIP_WINDOW);
    if digests.is_empty() {
        return None;
    }
    match summarizer.summarize_spending(&digests).await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("[Insights] Spending insight failed: {}", e);
            Some(INSIGHT_FALLBACK.to_string())
        }
    }
}

/// Per-week summaries. Empty input or a failed request yields no summaries.
pub async fn weekly_summaries(
    summarizer: &dyn WeeklySummarizer,
    weeks: &[WeekBucket],
) -> Vec<WeeklySummary> {
    if weeks.is_empty() {
        return Vec::new();
    }
    match summarizer.summarize_weeks(weeks).await {
        Ok(summaries) => summaries,
        Err(e) => {
            warn!("[Insights] Weekly summaries failed: {}", e);
            Vec::new()
        }
    }
}
