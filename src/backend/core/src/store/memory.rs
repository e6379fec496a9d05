//! In-memory repository, used by tests and single-process deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Record, Repository, SortOrder};
use crate::error::Result;

/// A table held in a `HashMap`. Upserts are atomic under the write lock.
pub struct InMemoryRepository<T: Record> {
    rows: RwLock<HashMap<T::Key, T>>,
}

impl<T: Record> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Record> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl<T: Record> Repository<T> for InMemoryRepository<T> {
    async fn upsert(&self, record: T) -> Result<T> {
        let mut rows = self.rows.write();
        let stored = match rows.get(&record.key()) {
            Some(existing) => T::merge(existing, record),
            None => record,
        };
        rows.insert(stored.key(), stored.clone());
        Ok(stored)
    }

    async fn find_one(&self, filter: &T::Filter) -> Result<Option<T>> {
        Ok(self.find_many(filter, SortOrder::Descending).await?.into_iter().next())
    }

    async fn find_many(&self, filter: &T::Filter, order: SortOrder) -> Result<Vec<T>> {
        let mut matched: Vec<T> = self
            .rows
            .read()
            .values()
            .filter(|row| row.matches(filter))
            .cloned()
            .collect();

        matched.sort_by_key(|row| row.sort_key());
        if order == SortOrder::Descending {
            matched.reverse();
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConfigFilter, JobConfigRecord};
    use crate::jobs::JobPriority;
    use chrono::{Duration, Utc};

    fn record(name: &str, retry_limit: u32, age_secs: i64) -> JobConfigRecord {
        JobConfigRecord {
            name: name.to_string(),
            priority: JobPriority::Normal,
            metadata: serde_json::Value::Null,
            retry_limit: Some(retry_limit),
            schedule: None,
            circuit_breaker_threshold: None,
            circuit_breaker_timeout_ms: None,
            updated_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let repo = InMemoryRepository::new();
        repo.upsert(record("a", 1, 0)).await.unwrap();
        repo.upsert(record("a", 2, 0)).await.unwrap();
        assert_eq!(repo.len(), 1);

        let found = repo.find_one(&ConfigFilter::name("a")).await.unwrap().unwrap();
        assert_eq!(found.retry_limit, Some(2));
    }

    #[tokio::test]
    async fn test_find_many_orders_by_sort_key() {
        let repo = InMemoryRepository::new();
        repo.upsert(record("old", 0, 60)).await.unwrap();
        repo.upsert(record("new", 0, 1)).await.unwrap();

        let newest_first = repo.find_many(&ConfigFilter::all(), SortOrder::Descending).await.unwrap();
        assert_eq!(newest_first[0].name, "new");

        let oldest_first = repo.find_many(&ConfigFilter::all(), SortOrder::Ascending).await.unwrap();
        assert_eq!(oldest_first[0].name, "old");
        assert!(repo.find_one(&ConfigFilter::name("missing")).await.unwrap().is_none());
    }
}
