// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::*;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A [SampleStorage] keeping rows in process memory, indexed by timestamp.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    rows: RwLock<BTreeMap<i64, Vec<SampleRow>>>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail as unavailable, or recover.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of calls served (or refused) so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn begin_call(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("storage is unavailable"));
        }
        Ok(())
    }

    /// Collects the distinct values `f` extracts from the rows in `window`.
    fn scan<T, I>(
        &self,
        window: TimeWindow,
        selector: Option<&Selector>,
        mut f: impl FnMut(&SampleRow) -> I,
    ) -> BTreeSet<T>
    where
        T: Ord,
        I: IntoIterator<Item = T>,
    {
        let rows = self.rows.read();
        rows.range(window.start..window.end.max(window.start))
            .flat_map(|(_, rows)| rows)
            .filter(|row| selector.map_or(true, |selector| selector.matches(&row.kind, &row.labels)))
            .flat_map(|row| f(row))
            .collect()
    }
}

#[async_trait]
impl SampleStorage for InMemoryStorage {
    async fn append_rows(&self, rows: Vec<SampleRow>) -> Result<(), StoreError> {
        self.begin_call()?;
        let mut stored = self.rows.write();
        for row in rows {
            stored.entry(row.timestamp).or_default().push(row);
        }
        Ok(())
    }

    async fn query_range(
        &self,
        selector: &Selector,
        window: TimeWindow,
    ) -> Result<Vec<SampleRow>, StoreError> {
        self.begin_call()?;
        let rows = self.rows.read();
        Ok(rows
            .range(window.start..window.end.max(window.start))
            .flat_map(|(_, rows)| rows)
            .filter(|row| selector.matches(&row.kind, &row.labels))
            .cloned()
            .collect())
    }

    async fn query_at(
        &self,
        selector: &Selector,
        timestamp: i64,
    ) -> Result<Vec<SampleRow>, StoreError> {
        self.begin_call()?;
        let rows = self.rows.read();
        for (_, rows) in rows.range(..=timestamp).rev() {
            let selected: Vec<SampleRow> = rows
                .iter()
                .filter(|row| selector.matches(&row.kind, &row.labels))
                .cloned()
                .collect();
            if !selected.is_empty() {
                return Ok(selected);
            }
        }
        Ok(Vec::new())
    }

    async fn distinct_label_names(
        &self,
        window: TimeWindow,
        selector: Option<&Selector>,
    ) -> Result<Vec<String>, StoreError> {
        self.begin_call()?;
        let names = self.scan(window, selector, |row| {
            row.labels
                .iter()
                .map(|label| label.name.clone())
                .collect::<Vec<_>>()
        });
        Ok(names.into_iter().collect())
    }

    async fn distinct_label_values(
        &self,
        name: &str,
        window: TimeWindow,
        selector: Option<&Selector>,
    ) -> Result<Vec<String>, StoreError> {
        self.begin_call()?;
        let values = self.scan(window, selector, |row| row.labels.get(name).map(str::to_owned));
        Ok(values.into_iter().collect())
    }

    async fn distinct_sample_kinds(&self, window: TimeWindow) -> Result<Vec<SampleKind>, StoreError> {
        self.begin_call()?;
        let kinds = self.scan(window, None, |row| Some(row.kind.clone()));
        Ok(kinds.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::stacktrace_key;

    fn row(name: &str, job: &str, timestamp: i64, value: i64) -> SampleRow {
        SampleRow {
            labels: LabelSet::from_pairs([("job", job)]).unwrap(),
            stacktrace: stacktrace_key(&[]),
            kind: SampleKind {
                name: name.into(),
                ..Default::default()
            },
            timestamp,
            value,
        }
    }

    #[tokio::test]
    async fn query_at_picks_the_latest_instant() {
        let storage = InMemoryStorage::new();
        storage
            .append_rows(vec![
                row("allocs", "a", 10, 1),
                row("allocs", "a", 20, 2),
                row("cpu", "a", 25, 3),
                row("allocs", "b", 30, 4),
            ])
            .await
            .unwrap();

        let selector = Selector::parse(r#"allocs{job="a"}"#).unwrap();
        let rows = storage.query_at(&selector, 29).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 2);
        assert_eq!(storage.query_at(&selector, 20).await.unwrap()[0].value, 2);
        assert_eq!(storage.query_at(&selector, 19).await.unwrap()[0].value, 1);
        assert!(storage.query_at(&selector, 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn range_is_half_open() {
        let storage = InMemoryStorage::new();
        storage
            .append_rows((0..5).map(|t| row("allocs", "a", t, t)).collect())
            .await
            .unwrap();
        let selector = Selector::parse("allocs").unwrap();
        let rows = storage
            .query_range(&selector, TimeWindow::new(1, 4).unwrap())
            .await
            .unwrap();
        let timestamps: Vec<_> = rows.iter().map(|row| row.timestamp).collect();
        assert_eq!(timestamps, [1, 2, 3]);
    }

    #[tokio::test]
    async fn distinct_metadata() {
        let storage = InMemoryStorage::new();
        storage
            .append_rows(vec![
                row("allocs", "b", 1, 1),
                row("allocs", "a", 1, 1),
                row("cpu", "c", 2, 1),
            ])
            .await
            .unwrap();
        let window = TimeWindow::new(0, 10).unwrap();
        assert_eq!(storage.distinct_label_names(window, None).await.unwrap(), ["job"]);
        assert_eq!(
            storage.distinct_label_values("job", window, None).await.unwrap(),
            ["a", "b", "c"]
        );
        let cpu = Selector::parse("cpu").unwrap();
        assert_eq!(
            storage
                .distinct_label_values("job", window, Some(&cpu))
                .await
                .unwrap(),
            ["c"]
        );
        let kinds = storage.distinct_sample_kinds(window).await.unwrap();
        let names: Vec<_> = kinds.iter().map(|kind| kind.name.as_str()).collect();
        assert_eq!(names, ["allocs", "cpu"]);
    }
}
