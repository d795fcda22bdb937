//! Provides a single-flight cache in front of a [ResourceProvider].
//!
//! The cache keeps one **slot** per resource key. A slot is an async mutex which guards the last
//! known value of its key (or nothing, if the key hasn't been loaded yet). Each operation first
//! acquires the slot of its key and then talks to the provider while still holding it. This
//! yields two guarantees:
//!
//! * At most one load or store is in flight for any key. If many callers ask for a key which isn't
//!   cached yet, the first one loads it and all others wait for the slot - once they acquire it,
//!   they find the freshly loaded value and never touch the provider.
//! * Reads and writes of a single key are totally ordered, while distinct keys proceed fully
//!   concurrently.
//!
//! Slots are created lazily and never removed - neither are cached values evicted. The cache is
//! therefore meant for a bounded set of keys which lives as long as the process.
//!
//! Writes have a subtle but important behavior: A write always goes to the provider. However, it
//! only updates the cache if the key is already cached. An uncached key stays uncached, so that
//! the next read pulls whatever the provider now considers the current value.
//!
//! All provider faults (errors and panics) are caught and reported as failed responses:
//! a failed load yields [ErrorKind::InternalError], a failed store
//! [ErrorKind::ResourceUpdateFailed].
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::metrics::{CacheMetrics, Watch};
use crate::provider::ResourceProvider;
use crate::request::{AddOrUpdateRequest, GetRequest};
use crate::response::{AddOrUpdateResponse, ErrorKind, GetResponse};
use crate::service::ApiService;

/// Guards the cached value of a single key.
type Slot<V> = Arc<tokio::sync::Mutex<Option<V>>>;

/// Serializes all access to a resource key and remembers the last known value.
pub struct SingleFlightCache<V> {
    provider: Arc<dyn ResourceProvider<V>>,
    slots: std::sync::Mutex<HashMap<String, Slot<V>>>,
    entries: AtomicUsize,
    metrics: CacheMetrics,
}

impl<V> SingleFlightCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new and empty cache in front of the given provider.
    pub fn new(provider: Arc<dyn ResourceProvider<V>>) -> Self {
        SingleFlightCache {
            provider,
            slots: std::sync::Mutex::new(HashMap::new()),
            entries: AtomicUsize::new(0),
            metrics: CacheMetrics::default(),
        }
    }

    /// Obtains the slot for the given key, creating it if necessary.
    ///
    /// The table lock is only held for the lookup itself and never across an await point.
    fn slot(&self, key: &str) -> Slot<V> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }

        let slot: Slot<V> = Arc::new(tokio::sync::Mutex::new(None));
        let _ = slots.insert(key.to_owned(), slot.clone());
        slot
    }

    /// Returns the value for the given key.
    ///
    /// If the key is cached, the cached value is returned. Otherwise it is loaded from the
    /// provider and cached. If the provider fails, nothing is cached and a failure carrying
    /// [ErrorKind::InternalError] is returned.
    pub async fn get(&self, key: &str) -> GetResponse<V> {
        let slot = self.slot(key);
        let mut entry = slot.lock().await;

        if let Some(value) = entry.as_ref() {
            self.metrics.hits.inc();
            return GetResponse::ok(value.clone());
        }

        self.metrics.misses.inc();
        log::debug!("Cache miss for '{}' - loading it from the provider...", key);

        let watch = Watch::start();
        let result = AssertUnwindSafe(self.provider.load(key))
            .catch_unwind()
            .await;
        self.metrics.provider_latency.add(watch.micros());

        match result {
            Ok(Ok(value)) => {
                *entry = Some(value.clone());
                let _ = self.entries.fetch_add(1, Ordering::Relaxed);
                GetResponse::ok(value)
            }
            Ok(Err(error)) => {
                self.metrics.load_failures.inc();
                log::warn!("Failed to load '{}': {:#}", key, error);
                GetResponse::failure(ErrorKind::InternalError)
            }
            Err(_) => {
                self.metrics.load_failures.inc();
                log::warn!("The provider panicked while loading '{}'.", key);
                GetResponse::failure(ErrorKind::InternalError)
            }
        }
    }

    /// Stores a new value for the given key.
    ///
    /// The value is always handed to the provider. The cache is only updated if the key was
    /// already cached - an uncached key will be loaded by the next [get](SingleFlightCache::get).
    /// If the provider fails, the cache is left untouched and a failure carrying
    /// [ErrorKind::ResourceUpdateFailed] is returned.
    pub async fn add_or_update(&self, key: &str, value: V) -> AddOrUpdateResponse {
        let slot = self.slot(key);
        let mut entry = slot.lock().await;

        self.metrics.stores.inc();

        let watch = Watch::start();
        let result = AssertUnwindSafe(self.provider.store(key, value.clone()))
            .catch_unwind()
            .await;
        self.metrics.provider_latency.add(watch.micros());

        match result {
            Ok(Ok(())) => {
                if let Some(cached) = entry.as_mut() {
                    *cached = value;
                }
                AddOrUpdateResponse::ok()
            }
            Ok(Err(error)) => {
                self.metrics.store_failures.inc();
                log::warn!("Failed to store '{}': {:#}", key, error);
                AddOrUpdateResponse::failure(ErrorKind::ResourceUpdateFailed)
            }
            Err(_) => {
                self.metrics.store_failures.inc();
                log::warn!("The provider panicked while storing '{}'.", key);
                AddOrUpdateResponse::failure(ErrorKind::ResourceUpdateFailed)
            }
        }
    }

    /// Returns the cached value for the given key without ever consulting the provider.
    ///
    /// Note that this waits for any operation currently in flight for this key.
    pub async fn cached(&self, key: &str) -> Option<V> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()?;

        let entry = slot.lock().await;
        entry.clone()
    }

    /// Returns the number of cached entries.
    ///
    /// Keys which failed to load or which have only been written are not counted.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Determines if no entry is cached at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of keys for which a lock has been created so far.
    ///
    /// This is at least [len](SingleFlightCache::len), as failed loads and writes of uncached
    /// keys also create a lock.
    pub fn num_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Provides access to the metrics of this cache.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[async_trait]
impl<V> ApiService<V> for SingleFlightCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get_resource(&self, request: GetRequest) -> GetResponse<V> {
        self.get(&request.resource_id).await
    }

    async fn add_or_update_resource(&self, request: AddOrUpdateRequest<V>) -> AddOrUpdateResponse {
        self.add_or_update(&request.resource_id, request.value).await
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::SingleFlightCache;
    use crate::provider::{FnResourceProvider, ResourceProvider};
    use crate::response::ErrorKind;
    use crate::testing::{test_async, test_async_multi_threaded, CountingProvider};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache_for(provider: &Arc<CountingProvider>) -> SingleFlightCache<i32> {
        let provider: Arc<dyn ResourceProvider<i32>> = provider.clone();
        SingleFlightCache::new(provider)
    }

    #[test]
    fn concurrent_misses_collapse_into_a_single_load() {
        test_async_multi_threaded(async {
            let provider = Arc::new(CountingProvider::with_delay(7, Duration::from_millis(50)));
            let cache = Arc::new(cache_for(&provider));

            let mut tasks = Vec::new();
            for _ in 0..16 {
                let cache = cache.clone();
                tasks.push(tokio::spawn(async move { cache.get("key").await }));
            }

            for task in tasks {
                let response = task.await.unwrap();
                assert_eq!(response.success, true);
                assert_eq!(response.value, Some(7));
            }

            assert_eq!(provider.loads(), 1);
            assert_eq!(cache.metrics().misses.get(), 1);
            assert_eq!(cache.metrics().hits.get(), 15);
        });
    }

    #[test]
    fn cached_keys_never_hit_the_provider_again() {
        test_async(async {
            let provider = Arc::new(CountingProvider::new(1));
            let cache = cache_for(&provider);

            for _ in 0..5 {
                assert_eq!(cache.get("key").await.value, Some(1));
            }
            assert_eq!(provider.loads(), 1);
        });
    }

    #[test]
    fn distinct_keys_are_loaded_independently() {
        test_async_multi_threaded(async {
            let provider = Arc::new(CountingProvider::with_delay(3, Duration::from_millis(200)));
            let cache = Arc::new(cache_for(&provider));

            let started = std::time::Instant::now();
            let mut tasks = Vec::new();
            for key in ["a", "b", "c", "d"] {
                let cache = cache.clone();
                tasks.push(tokio::spawn(async move { cache.get(key).await }));
            }
            for task in tasks {
                assert_eq!(task.await.unwrap().success, true);
            }

            // Four sequential loads would take at least 800ms...
            assert_eq!(started.elapsed() < Duration::from_millis(700), true);
            assert_eq!(provider.loads(), 4);
            assert_eq!(cache.num_keys(), 4);
        });
    }

    #[test]
    fn reads_and_writes_of_a_key_never_overlap() {
        test_async_multi_threaded(async {
            let provider = Arc::new(CountingProvider::with_delay(1, Duration::from_millis(20)));
            let cache = Arc::new(cache_for(&provider));

            let mut tasks = Vec::new();
            for value in 0..10 {
                let cache = cache.clone();
                tasks.push(tokio::spawn(async move {
                    if value % 2 == 0 {
                        cache.get("key").await.success
                    } else {
                        cache.add_or_update("key", value).await.success
                    }
                }));
            }
            for task in tasks {
                assert_eq!(task.await.unwrap(), true);
            }

            assert_eq!(provider.max_in_flight(), 1);
            assert_eq!(provider.loads(), 1);
            assert_eq!(provider.stores(), 5);
        });
    }

    #[test]
    fn only_cached_entries_are_counted() {
        test_async(async {
            let provider = Arc::new(CountingProvider::new(1));
            let cache = cache_for(&provider);
            assert_eq!(cache.is_empty(), true);

            // Neither a write of an uncached key nor a failed load yields an entry...
            assert_eq!(cache.add_or_update("a", 1).await.success, true);
            provider.fail_loads.store(true, Ordering::SeqCst);
            assert_eq!(cache.get("b").await.success, false);
            assert_eq!(cache.num_keys(), 2);
            assert_eq!(cache.len(), 0);

            provider.fail_loads.store(false, Ordering::SeqCst);
            assert_eq!(cache.get("a").await.value, Some(1));
            assert_eq!(cache.get("b").await.value, Some(1));
            assert_eq!(cache.get("b").await.value, Some(1));
            assert_eq!(cache.add_or_update("b", 3).await.success, true);
            assert_eq!(cache.len(), 2);
            assert_eq!(cache.is_empty(), false);
        });
    }

    #[test]
    fn writing_an_uncached_key_does_not_cache_it() {
        test_async(async {
            let provider = Arc::new(CountingProvider::new(1));
            let cache = cache_for(&provider);

            assert_eq!(cache.add_or_update("key", 10).await.success, true);
            assert_eq!(provider.stores(), 1);
            assert_eq!(provider.stored_value("key"), Some(10));
            assert_eq!(cache.cached("key").await, None);

            // The next read pulls the fresh value from the provider and caches it...
            assert_eq!(cache.get("key").await.value, Some(10));
            assert_eq!(provider.loads(), 1);
            assert_eq!(cache.cached("key").await, Some(10));
        });
    }

    #[test]
    fn writing_a_cached_key_updates_the_cache() {
        test_async(async {
            let provider = Arc::new(CountingProvider::new(1));
            let cache = cache_for(&provider);

            assert_eq!(cache.get("key").await.value, Some(1));
            assert_eq!(cache.add_or_update("key", 20).await.success, true);

            assert_eq!(cache.get("key").await.value, Some(20));
            assert_eq!(provider.loads(), 1);
            assert_eq!(provider.stores(), 1);
        });
    }

    #[test]
    fn failed_loads_are_reported_and_not_cached() {
        test_async(async {
            let provider = Arc::new(CountingProvider::new(1));
            let cache = cache_for(&provider);

            provider.fail_loads.store(true, Ordering::SeqCst);
            let response = cache.get("key").await;
            assert_eq!(response.success, false);
            assert_eq!(response.value, None);
            assert_eq!(response.error, Some(ErrorKind::InternalError));
            assert_eq!(cache.cached("key").await, None);

            // Once the provider recovers, the key is loaded again...
            provider.fail_loads.store(false, Ordering::SeqCst);
            assert_eq!(cache.get("key").await.value, Some(1));
            assert_eq!(provider.loads(), 2);
            assert_eq!(cache.metrics().load_failures.get(), 1);
        });
    }

    #[test]
    fn failed_stores_leave_the_cache_untouched() {
        test_async(async {
            let provider = Arc::new(CountingProvider::new(1));
            let cache = cache_for(&provider);

            assert_eq!(cache.get("key").await.value, Some(1));

            provider.fail_stores.store(true, Ordering::SeqCst);
            let response = cache.add_or_update("key", 5).await;
            assert_eq!(response.success, false);
            assert_eq!(response.error, Some(ErrorKind::ResourceUpdateFailed));

            assert_eq!(cache.get("key").await.value, Some(1));
            assert_eq!(cache.metrics().store_failures.get(), 1);
        });
    }

    #[test]
    fn panicking_providers_are_contained() {
        test_async(async {
            let provider: Arc<dyn ResourceProvider<i32>> = Arc::new(FnResourceProvider::new(
                |key: &str| -> anyhow::Result<i32> { panic!("Cannot load {}", key) },
                |key: &str, _value: i32| -> anyhow::Result<()> { panic!("Cannot store {}", key) },
            ));
            let cache = SingleFlightCache::new(provider);

            assert_eq!(
                cache.get("key").await.error,
                Some(ErrorKind::InternalError)
            );
            assert_eq!(
                cache.add_or_update("key", 1).await.error,
                Some(ErrorKind::ResourceUpdateFailed)
            );

            // The slot has been released properly and is still usable...
            assert_eq!(cache.cached("key").await, None);
        });
    }
}
