//! Read-side projections over trip history.
//!
//! Everything here is computed on read from the full trip list and never
//! persisted. Input trips are expected newest-first, as returned by
//! [`TripStore::get_history`](crate::TripStore::get_history).

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate, TimeZone};

use crate::types::{
    CategoryTotal, FALLBACK_CATEGORY, ItemPricePoint, ShoppingTrip, TripDigest, WeekBucket,
    datetime_in,
};

/// Normalized product key: trimmed and lowercased.
pub fn normalize_product_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Every item of every trip as a unit-price point, oldest first.
pub fn flatten_items(trips: &[ShoppingTrip]) -> Vec<ItemPricePoint> {
    let mut points: Vec<ItemPricePoint> = trips
        .iter()
        .flat_map(|trip| {
            trip.items.iter().map(move |item| ItemPricePoint {
                name: item.name.clone(),
                unit_price: item.unit_price(),
                date: trip.date,
                store: trip.store_name.clone(),
            })
        })
        .collect();

    // Stable: purchases from the same trip keep their relative order
    points.sort_by_key(|p| p.date);
    points
}

/// Distinct normalized product names, sorted.
pub fn product_names(trips: &[ShoppingTrip]) -> Vec<String> {
    trips
        .iter()
        .flat_map(|trip| trip.items.iter())
        .map(|item| normalize_product_name(&item.name))
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Unit-price history of one product (matched on the normalized name), oldest first.
pub fn price_history(trips: &[ShoppingTrip], product: &str) -> Vec<ItemPricePoint> {
    let wanted = normalize_product_name(product);
    flatten_items(trips)
        .into_iter()
        .filter(|p| normalize_product_name(&p.name) == wanted)
        .collect()
}

/// Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Group item names by the Sunday-aligned week of their trip date.
///
/// Trips are visited newest-first; names keep trip order within a week.
/// Buckets are keyed by the full date of the week's Sunday, so the same
/// month/day in different years never collide.
pub fn bucket_by_week<Tz: TimeZone>(trips: &[ShoppingTrip], tz: &Tz) -> Vec<WeekBucket> {
    let mut ordered: Vec<&ShoppingTrip> = trips.iter().collect();
    ordered.sort_by(|a, b| b.date.cmp(&a.date));

    let mut buckets: Vec<WeekBucket> = Vec::new();
    let mut index: HashMap<NaiveDate, usize> = HashMap::new();

    for trip in ordered {
        let sunday = week_start(datetime_in(trip.date, tz).date_naive());
        let slot = *index.entry(sunday).or_insert_with(|| {
            buckets.push(WeekBucket {
                label: sunday.format("%b %-d, %Y").to_string(),
                week_start: sunday.format("%Y-%m-%d").to_string(),
                items: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[slot]
            .items
            .extend(trip.items.iter().map(|item| item.name.clone()));
    }

    buckets
}

/// Spend per category across all trips, largest first.
///
/// Items persisted before their category settled count as the fallback category.
pub fn spend_by_category(trips: &[ShoppingTrip]) -> Vec<CategoryTotal> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for item in trips.iter().flat_map(|trip| trip.items.iter()) {
        let category = if item.category.is_pending() {
            FALLBACK_CATEGORY
        } else {
            item.category.as_str()
        };
        *totals.entry(category.to_string()).or_default() += item.line_total();
    }

    let mut result: Vec<CategoryTotal> = totals
        .into_iter()
        .map(|(category, total)| CategoryTotal { category, total })
        .collect();
    result.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then_with(|| a.category.cmp(&b.category))
    });
    result
}

/// Digests of the `limit` most recent trips.
pub fn recent_digests(trips: &[ShoppingTrip], limit: usize) -> Vec<TripDigest> {
    let mut ordered: Vec<&ShoppingTrip> = trips.iter().collect();
    ordered.sort_by(|a, b| b.date.cmp(&a.date));
    ordered.into_iter().take(limit).map(TripDigest::from).collect()
}
