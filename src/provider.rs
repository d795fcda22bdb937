//! Defines the resource provider which is shielded by Callisto.
//!
//! A [ResourceProvider] is the authoritative source of a keyed resource. It might be slow,
//! remote or fail at any time - the [cache](crate::cache) takes care of all of this, so a
//! provider implementation can be as straightforward as possible.
//!
//! For simple cases (and tests), [FnResourceProvider] wraps a pair of closures.
//!
//! # Examples
//!
//! ```
//! # use callisto::provider::{FnResourceProvider, ResourceProvider};
//! # #[tokio::main]
//! # async fn main() {
//! let provider = FnResourceProvider::new(
//!     |key: &str| -> anyhow::Result<usize> { Ok(key.len()) },
//!     |_key: &str, _value: usize| -> anyhow::Result<()> {
//!         Err(anyhow::anyhow!("This provider is read-only!"))
//!     },
//! );
//!
//! assert_eq!(provider.load("hello").await.unwrap(), 5);
//! assert_eq!(provider.store("hello", 3).await.is_err(), true);
//! # }
//! ```
use async_trait::async_trait;

/// Supplies and persists the values of a keyed resource.
#[async_trait]
pub trait ResourceProvider<V>: Send + Sync {
    /// Loads the current value for the given key.
    async fn load(&self, key: &str) -> anyhow::Result<V>;

    /// Stores a new value for the given key.
    async fn store(&self, key: &str, value: V) -> anyhow::Result<()>;
}

/// Provides a [ResourceProvider] which delegates to two closures.
pub struct FnResourceProvider<L, S> {
    load: L,
    store: S,
}

impl<L, S> FnResourceProvider<L, S> {
    /// Creates a new provider using the given closures to load and store values.
    pub fn new(load: L, store: S) -> Self {
        FnResourceProvider { load, store }
    }
}

#[async_trait]
impl<V, L, S> ResourceProvider<V> for FnResourceProvider<L, S>
where
    V: Send + 'static,
    L: Fn(&str) -> anyhow::Result<V> + Send + Sync,
    S: Fn(&str, V) -> anyhow::Result<()> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<V> {
        (self.load)(key)
    }

    async fn store(&self, key: &str, value: V) -> anyhow::Result<()> {
        (self.store)(key, value)
    }
}
