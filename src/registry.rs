//! Provides a tiny container which keeps one façade per resource type.
//!
//! Each resource type is named by an explicit [TypeToken] which is declared by the application,
//! most probably as a constant. The token carries the value type of its façade, so that lookups
//! are type checked at compile time. Registering a second façade for a token isn't possible -
//! [Registry::get_or_insert_with] hands out the existing one instead.
//!
//! Also the registry keeps the central **is_running** flag which is toggled to *false* once
//! [Registry::terminate] is invoked. Background tasks (like the config monitor or the throttle
//! housekeeping) stop once this flag is cleared.
//!
//! # Examples
//!
//! ```
//! # use callisto::clock::SystemClock;
//! # use callisto::facade::Facade;
//! # use callisto::provider::{FnResourceProvider, ResourceProvider};
//! # use callisto::registry::{Registry, TypeToken};
//! # use std::sync::Arc;
//! const SCORES: TypeToken<i64> = TypeToken::new("scores");
//!
//! let registry = Registry::new();
//! let provider: Arc<dyn ResourceProvider<i64>> = Arc::new(FnResourceProvider::new(
//!     |_key: &str| -> anyhow::Result<i64> { Ok(0) },
//!     |_key: &str, _value: i64| -> anyhow::Result<()> { Ok(()) },
//! ));
//!
//! let facade = registry
//!     .get_or_insert_with(&SCORES, || Arc::new(Facade::builder(provider.clone()).build()))
//!     .unwrap();
//!
//! // The same token always yields the same instance...
//! let same = registry.require(&SCORES).unwrap();
//! assert_eq!(Arc::ptr_eq(&facade, &same), true);
//!
//! // Once terminated, all façades are released...
//! registry.terminate();
//! assert_eq!(registry.find(&SCORES).is_none(), true);
//! assert_eq!(registry.is_running(), false);
//! ```
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::config::Config;
use crate::facade::Facade;

/// Names a resource type and the value type of its façade.
pub struct TypeToken<V> {
    name: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> TypeToken<V> {
    /// Creates a new token with the given name.
    ///
    /// The name has to be unique within a registry.
    pub const fn new(name: &'static str) -> Self {
        TypeToken {
            name,
            _value: PhantomData,
        }
    }

    /// Returns the name of this token.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<V> fmt::Debug for TypeToken<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.name)
    }
}

/// Keeps all façades of an application in a single place.
pub struct Registry {
    facades: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
    config: OnceLock<Arc<Config>>,
    is_running: AtomicBool,
}

impl Registry {
    /// Creates a new and empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Registry {
            facades: Mutex::new(HashMap::new()),
            config: OnceLock::new(),
            is_running: AtomicBool::new(true),
        })
    }

    fn facades(&self) -> MutexGuard<'_, HashMap<&'static str, Arc<dyn Any + Send + Sync>>> {
        self.facades
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the façade for the given token or creates and registers it using the factory.
    ///
    /// Fails if the registry is already terminated or if the name of the token is already used
    /// by a token with another value type.
    pub fn get_or_insert_with<V, F>(
        &self,
        token: &TypeToken<V>,
        factory: F,
    ) -> anyhow::Result<Arc<Facade<V>>>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> Arc<Facade<V>>,
    {
        if !self.is_running() {
            return Err(anyhow::anyhow!(
                "Cannot provide the façade for '{}' as the registry has been terminated.",
                token.name
            ));
        }

        let mut facades = self.facades();
        if let Some(existing) = facades.get(token.name) {
            return downcast(token, existing.clone());
        }

        let facade = factory();
        let _ = facades.insert(token.name, facade.clone());
        log::info!("Registered the façade for '{}'.", token.name);

        Ok(facade)
    }

    /// Tries to resolve a previously registered façade.
    ///
    /// Yields **None** if no façade is registered for the token (or if its name is in use by a
    /// token of another value type).
    pub fn find<V>(&self, token: &TypeToken<V>) -> Option<Arc<Facade<V>>>
    where
        V: Send + Sync + 'static,
    {
        let existing = self.facades().get(token.name).cloned()?;
        downcast(token, existing).ok()
    }

    /// Resolves a previously registered façade or fails with a descriptive error.
    pub fn require<V>(&self, token: &TypeToken<V>) -> anyhow::Result<Arc<Facade<V>>>
    where
        V: Send + Sync + 'static,
    {
        if !self.is_running() {
            return Err(anyhow::anyhow!(
                "The façade for '{}' has been requested but the registry is already terminated.",
                token.name
            ));
        }

        let existing = self.facades().get(token.name).cloned().ok_or_else(|| {
            anyhow::anyhow!("No façade has been registered for '{}'.", token.name)
        })?;

        downcast(token, existing)
    }

    /// Makes the given config available via [Registry::config].
    ///
    /// A registry can only ever hold a single config.
    pub fn install_config(&self, config: Arc<Config>) -> anyhow::Result<()> {
        self.config
            .set(config)
            .map_err(|_| anyhow::anyhow!("A config has already been installed."))
    }

    /// Returns the config if one has been installed.
    pub fn config(&self) -> Option<Arc<Config>> {
        self.config.get().cloned()
    }

    /// Determines if the registry is still running or if [Registry::terminate] has already been
    /// called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the registry.
    ///
    /// This will immediately release all façades and stop all background tasks (sooner or
    /// later).
    pub fn terminate(&self) {
        self.facades().clear();
        self.is_running.store(false, Ordering::Release);
    }
}

fn downcast<V>(
    token: &TypeToken<V>,
    facade: Arc<dyn Any + Send + Sync>,
) -> anyhow::Result<Arc<Facade<V>>>
where
    V: Send + Sync + 'static,
{
    facade.downcast::<Facade<V>>().map_err(|_| {
        anyhow::anyhow!(
            "The name '{}' is already in use by a façade of another type ({} was requested).",
            token.name,
            std::any::type_name::<V>()
        )
    })
}
