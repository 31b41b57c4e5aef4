//! In-memory view of the last remote state observed by the poll loops.
//!
//! Entries live in a single `watch` cell, so every mutation is applied and
//! published in one step and subscribers always receive a whole collection.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};

/// A value that can be stored in a [`RemoteStateCache`].
pub trait Cached: Clone + Send + Sync + 'static {
    type Key: Ord + Clone + Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Grouping key (usually the owning project) used by scoped operations.
    fn scope(&self) -> &str;
}

#[derive(Debug, Clone)]
struct Observed<V> {
    value: V,
    observed_at: SystemTime,
}

type Entries<V> = BTreeMap<<V as Cached>::Key, Observed<V>>;

pub struct RemoteStateCache<V: Cached> {
    entries: watch::Sender<Entries<V>>,
}

impl<V: Cached> Default for RemoteStateCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Cached> RemoteStateCache<V> {
    pub fn new() -> Self {
        let (entries, _) = watch::channel(BTreeMap::new());
        Self { entries }
    }

    pub fn upsert(&self, value: V) {
        let now = SystemTime::now();
        self.entries.send_modify(|entries| {
            entries.insert(
                value.key(),
                Observed {
                    value,
                    observed_at: now,
                },
            );
        });
    }

    pub fn upsert_all<I>(&self, values: I)
    where
        I: IntoIterator<Item = V>,
    {
        let now = SystemTime::now();
        let values: Vec<V> = values.into_iter().collect();
        self.entries.send_modify(|entries| {
            for value in values {
                entries.insert(
                    value.key(),
                    Observed {
                        value,
                        observed_at: now,
                    },
                );
            }
        });
    }

    /// Drop every entry belonging to `scope` and insert `values` in its place.
    /// Returns the entries that were replaced, read in the same step.
    pub fn replace_scope<I>(&self, scope: &str, values: I) -> Vec<V>
    where
        I: IntoIterator<Item = V>,
    {
        let now = SystemTime::now();
        let values: Vec<V> = values.into_iter().collect();
        let mut previous = Vec::new();
        self.entries.send_modify(|entries| {
            entries.retain(|_, observed| {
                if observed.value.scope() == scope {
                    previous.push(observed.value.clone());
                    false
                } else {
                    true
                }
            });
            for value in values {
                entries.insert(
                    value.key(),
                    Observed {
                        value,
                        observed_at: now,
                    },
                );
            }
        });
        previous
    }

    pub fn get(&self, key: &V::Key) -> Option<V> {
        self.entries.borrow().get(key).map(|o| o.value.clone())
    }

    pub fn observed_at(&self, key: &V::Key) -> Option<SystemTime> {
        self.entries.borrow().get(key).map(|o| o.observed_at)
    }

    pub fn list(&self, scope: Option<&str>) -> Vec<V> {
        self.entries
            .borrow()
            .values()
            .filter(|o| scope.is_none_or(|s| o.value.scope() == s))
            .map(|o| o.value.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn contains_scope(&self, scope: &str) -> bool {
        self.entries
            .borrow()
            .values()
            .any(|o| o.value.scope() == scope)
    }

    /// Returns the evicted value, if any. Subscribers are only notified on change.
    pub fn remove(&self, key: &V::Key) -> Option<V> {
        let mut removed = None;
        self.entries.send_if_modified(|entries| {
            removed = entries.remove(key).map(|o| o.value);
            removed.is_some()
        });
        removed
    }

    /// Returns how many entries were evicted.
    pub fn remove_by_scope(&self, scope: &str) -> usize {
        let mut count = 0;
        self.entries.send_if_modified(|entries| {
            let before = entries.len();
            entries.retain(|_, observed| observed.value.scope() != scope);
            count = before - entries.len();
            count > 0
        });
        count
    }

    /// Live view of the whole collection: the current snapshot first, then one
    /// item per published change.
    pub fn subscribe(&self) -> impl Stream<Item = Vec<V>> + Send + 'static {
        WatchStream::new(self.entries.subscribe())
            .map(|entries| entries.into_values().map(|o| o.value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        scope: String,
        id: u32,
        label: String,
    }

    impl Cached for Entry {
        type Key = (String, u32);

        fn key(&self) -> Self::Key {
            (self.scope.clone(), self.id)
        }

        fn scope(&self) -> &str {
            &self.scope
        }
    }

    fn entry(scope: &str, id: u32, label: &str) -> Entry {
        Entry {
            scope: scope.to_string(),
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn upsert_replaces_by_key() {
        let cache = RemoteStateCache::new();
        cache.upsert(entry("p1", 1, "old"));
        cache.upsert(entry("p1", 1, "new"));
        assert_eq!(cache.len(), 1);
        let got = cache.get(&("p1".to_string(), 1)).unwrap();
        assert_eq!(got.label, "new");
        assert!(cache.observed_at(&("p1".to_string(), 1)).is_some());
    }

    #[test]
    fn missing_key_is_absent_not_error() {
        let cache: RemoteStateCache<Entry> = RemoteStateCache::new();
        assert!(cache.get(&("p1".to_string(), 42)).is_none());
        assert!(cache.remove(&("p1".to_string(), 42)).is_none());
    }

    #[test]
    fn list_filters_by_scope() {
        let cache = RemoteStateCache::new();
        cache.upsert_all(vec![entry("a", 1, "x"), entry("b", 2, "y"), entry("a", 3, "z")]);
        assert_eq!(cache.list(None).len(), 3);
        let scoped = cache.list(Some("a"));
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().all(|p| p.scope == "a"));
    }

    #[test]
    fn replace_scope_supersedes_previous_entries() {
        let cache = RemoteStateCache::new();
        cache.upsert_all(vec![entry("a", 1, "x"), entry("a", 2, "y"), entry("b", 1, "z")]);
        let previous = cache.replace_scope("a", vec![entry("a", 3, "fresh")]);
        assert_eq!(previous, vec![entry("a", 1, "x"), entry("a", 2, "y")]);
        let a = cache.list(Some("a"));
        assert_eq!(a, vec![entry("a", 3, "fresh")]);
        assert_eq!(cache.list(Some("b")).len(), 1);
    }

    #[test]
    fn remove_by_scope_reports_count() {
        let cache = RemoteStateCache::new();
        cache.upsert_all(vec![entry("a", 1, "x"), entry("a", 2, "y"), entry("b", 1, "z")]);
        assert_eq!(cache.remove_by_scope("a"), 2);
        assert_eq!(cache.remove_by_scope("a"), 0);
        assert!(!cache.contains_scope("a"));
        assert!(cache.contains_scope("b"));
    }

    #[tokio::test]
    async fn new_subscriber_gets_latest_collection_first() {
        let cache = RemoteStateCache::new();
        cache.upsert(entry("a", 1, "x"));
        let mut stream = Box::pin(cache.subscribe());
        let first = stream.next().await.unwrap();
        assert_eq!(first, vec![entry("a", 1, "x")]);
    }

    #[tokio::test]
    async fn batch_update_is_delivered_whole() {
        let cache = RemoteStateCache::new();
        let mut stream = Box::pin(cache.subscribe());
        assert!(stream.next().await.unwrap().is_empty());

        cache.upsert_all(vec![entry("a", 1, "x"), entry("a", 2, "y"), entry("a", 3, "z")]);
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.len(), 3);
    }

    #[tokio::test]
    async fn removing_nothing_does_not_publish() {
        let cache = RemoteStateCache::new();
        cache.upsert(entry("a", 1, "x"));
        let mut rx = cache.entries.subscribe();
        rx.borrow_and_update();
        cache.remove_by_scope("missing");
        assert!(!rx.has_changed().unwrap());
        cache.remove(&("a".to_string(), 1));
        assert!(rx.has_changed().unwrap());
    }
}
