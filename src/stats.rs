use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::filters::{PanelColumn, REGION_FIELD, RESIDENCE_COLUMN};
use crate::storage::PanelStore;

/// Observed value -> number of panels carrying it.
pub type ValueCounts = BTreeMap<String, u64>;

/// Per-attribute value counts, kept in aggregation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsMap {
    entries: IndexMap<String, ValueCounts>,
}

impl StatsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attribute: impl Into<String>, counts: ValueCounts) {
        self.entries.insert(attribute.into(), counts);
    }

    pub fn get(&self, attribute: &str) -> Option<&ValueCounts> {
        self.entries.get(attribute)
    }

    pub fn distinct_values(&self, attribute: &str) -> usize {
        self.get(attribute).map_or(0, |counts| counts.len())
    }

    /// An attribute needs at least two distinct values to be worth charting.
    pub fn is_chartable(&self, attribute: &str) -> bool {
        self.distinct_values(attribute) >= 2
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueCounts)> {
        self.entries.iter().map(|(name, counts)| (name.as_str(), counts))
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renames in place; the entry keeps its position.
    fn rename(&mut self, from: &str, to: &str) {
        let Some(index) = self.entries.get_index_of(from) else {
            return;
        };
        if let Some((_, counts)) = self.entries.shift_remove_index(index) {
            self.entries.shift_insert(index, to.to_string(), counts);
        }
    }

    fn retain_non_empty(&mut self) {
        self.entries.retain(|_, counts| !counts.is_empty());
    }
}

/// Count categorical attribute values over the given panels.
///
/// Storage failures degrade to an empty map; charts fall back to defaults.
pub async fn aggregate_stats(store: &dyn PanelStore, panel_ids: &[String]) -> StatsMap {
    if panel_ids.is_empty() {
        return StatsMap::new();
    }

    let records = match store.fetch_attributes(panel_ids).await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Stats aggregation failed, continuing without stats: {}", e);
            return StatsMap::new();
        }
    };

    let mut stats = StatsMap::new();
    for column in PanelColumn::ALL {
        let mut counts = ValueCounts::new();
        for record in &records {
            match record.value(column) {
                Some(value) if !value.trim().is_empty() => {
                    *counts.entry(value.to_string()).or_insert(0) += 1;
                }
                _ => {}
            }
        }
        stats.insert(column.as_str(), counts);
    }

    stats.rename(RESIDENCE_COLUMN, REGION_FIELD);
    stats.retain_non_empty();

    tracing::debug!(
        "Aggregated {} attributes over {} panels",
        stats.len(),
        records.len()
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PanelQuery;
    use crate::storage::tests::seeded_store;
    use crate::storage::{MemberRow, PanelRecord, StorageError, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PanelStore for CountingStore {
        async fn search_panels(&self, _query: &PanelQuery) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn fetch_attributes(&self, _panel_ids: &[String]) -> StorageResult<Vec<PanelRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "connection reset",
                )))
            } else {
                Ok(Vec::new())
            }
        }

        async fn list_members(&self) -> StorageResult<Vec<MemberRow>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn empty_ids_skip_storage() {
        let store = CountingStore { calls: AtomicUsize::new(0), fail: false };
        let stats = aggregate_stats(&store, &[]).await;

        assert!(stats.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn storage_failure_yields_empty_stats() {
        let store = CountingStore { calls: AtomicUsize::new(0), fail: true };
        let stats = aggregate_stats(&store, &["p1".to_string()]).await;

        assert!(stats.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn counts_values_and_renames_residence() {
        let (_dir, store) = seeded_store().await;
        let ids: Vec<String> = ["p1", "p2", "p3"].iter().map(|s| s.to_string()).collect();

        let stats = aggregate_stats(&store, &ids).await;

        assert_eq!(stats.get("age_group").unwrap().get("30s"), Some(&2));
        assert_eq!(stats.get("age_group").unwrap().get("20s"), Some(&1));
        assert_eq!(stats.get("region").unwrap().get("Seoul"), Some(&2));
        assert!(stats.get("residence").is_none());
        // null marital status and blank car brand leave nothing to count
        assert!(stats.get("marital_status").is_none());
        assert!(stats.get("car_brand").is_none());
        assert_eq!(stats.distinct_values("occupation"), 1);
        assert!(!stats.is_chartable("occupation"));
        assert!(stats.is_chartable("gender"));

        let order: Vec<&str> = stats.attributes().collect();
        assert_eq!(order, vec!["age_group", "gender", "region", "occupation", "phone_brand"]);
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut stats = StatsMap::new();
        stats.insert("gender", ValueCounts::from([("female".to_string(), 2)]));
        stats.insert("age_group", ValueCounts::from([("30s".to_string(), 1)]));

        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(json, r#"{"gender":{"female":2},"age_group":{"30s":1}}"#);
    }

    #[test]
    fn rename_keeps_position() {
        let mut stats = StatsMap::new();
        stats.insert("age_group", ValueCounts::from([("30s".to_string(), 1)]));
        stats.insert("residence", ValueCounts::from([("Seoul".to_string(), 3)]));
        stats.insert("gender", ValueCounts::from([("male".to_string(), 1)]));

        stats.rename(RESIDENCE_COLUMN, REGION_FIELD);
        stats.rename("missing", "still_missing");

        let order: Vec<&str> = stats.attributes().collect();
        assert_eq!(order, vec!["age_group", "region", "gender"]);
        assert_eq!(stats.get("region").unwrap().get("Seoul"), Some(&3));
        assert!(stats.get("residence").is_none());
    }
}
