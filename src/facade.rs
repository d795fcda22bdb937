//! Provides the façade which callers use to read and write resources.
//!
//! A [Facade] stacks the layers of this library: each call first passes the
//! [throttle](crate::throttle), which counts it against the calling client, and then the
//! [single-flight cache](crate::cache), which only consults the provider if needed:
//!
//! ```text
//! caller -> ThrottlingService -> SingleFlightCache -> ResourceProvider
//! ```
//!
//! # Examples
//!
//! ```
//! # use callisto::clock::SystemClock;
//! # use callisto::facade::create_api_service;
//! # use callisto::provider::{FnResourceProvider, ResourceProvider};
//! # use callisto::response::ErrorKind;
//! # use callisto::throttle::ThrottleSettings;
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() {
//! let provider: Arc<dyn ResourceProvider<String>> = Arc::new(FnResourceProvider::new(
//!     |key: &str| -> anyhow::Result<String> { Ok(key.to_uppercase()) },
//!     |_key: &str, _value: String| -> anyhow::Result<()> { Ok(()) },
//! ));
//! let settings = ThrottleSettings {
//!     interval: Duration::from_secs(60),
//!     max_requests_per_client: 2,
//!     ban_timeout: Duration::from_secs(60),
//! };
//! let facade = create_api_service(settings, provider, Arc::new(SystemClock));
//!
//! assert_eq!(facade.get("hello", "10.0.0.1").await.value, Some("HELLO".to_owned()));
//! assert_eq!(facade.get("hello", "10.0.0.1").await.success, true);
//!
//! // The third call within a minute exceeds the limit...
//! let response = facade.get("hello", "10.0.0.1").await;
//! assert_eq!(response.error, Some(ErrorKind::RateLimitExceeded));
//! # }
//! ```
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;

use crate::cache::SingleFlightCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::provider::ResourceProvider;
use crate::registry::{Registry, TypeToken};
use crate::request::{AddOrUpdateRequest, GetRequest};
use crate::response::{AddOrUpdateResponse, GetResponse};
use crate::service::ApiService;
use crate::throttle::{ThrottleSettings, ThrottlingService};

/// Combines a throttle and a single-flight cache in front of a resource provider.
pub struct Facade<V> {
    service: ThrottlingService<SingleFlightCache<V>>,
}

impl<V> Facade<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a builder for a façade in front of the given provider.
    pub fn builder(provider: Arc<dyn ResourceProvider<V>>) -> FacadeBuilder<V> {
        FacadeBuilder::new(provider)
    }

    /// Reads the given resource on behalf of the given client.
    pub async fn get(&self, resource_id: &str, client_id: &str) -> GetResponse<V> {
        self.service
            .throttle(client_id, GetResponse::failure, || {
                self.service.inner().get(resource_id)
            })
            .await
    }

    /// Adds or updates the given resource on behalf of the given client.
    pub async fn add_or_update(
        &self,
        resource_id: &str,
        client_id: &str,
        value: V,
    ) -> AddOrUpdateResponse {
        self.service
            .throttle(client_id, AddOrUpdateResponse::failure, || {
                self.service.inner().add_or_update(resource_id, value)
            })
            .await
    }

    /// Provides access to the throttle (e.g. to inspect its metrics or to update its settings).
    pub fn throttle(&self) -> &ThrottlingService<SingleFlightCache<V>> {
        &self.service
    }

    /// Provides access to the cache.
    pub fn cache(&self) -> &SingleFlightCache<V> {
        self.service.inner()
    }
}

#[async_trait]
impl<V> ApiService<V> for Facade<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get_resource(&self, request: GetRequest) -> GetResponse<V> {
        self.service.get_resource(request).await
    }

    async fn add_or_update_resource(&self, request: AddOrUpdateRequest<V>) -> AddOrUpdateResponse {
        self.service.add_or_update_resource(request).await
    }
}

/// Assembles a [Facade].
///
/// By default, the [default settings](ThrottleSettings::default) and the [SystemClock] are used
/// and no housekeeping is scheduled.
pub struct FacadeBuilder<V> {
    provider: Arc<dyn ResourceProvider<V>>,
    settings: ThrottleSettings,
    clock: Arc<dyn Clock>,
    housekeeping: Option<Duration>,
}

impl<V> FacadeBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new builder for the given provider.
    pub fn new(provider: Arc<dyn ResourceProvider<V>>) -> Self {
        FacadeBuilder {
            provider,
            settings: ThrottleSettings::default(),
            clock: Arc::new(SystemClock),
            housekeeping: None,
        }
    }

    /// Specifies the throttle settings to use.
    ///
    /// Note that when [installing](FacadeBuilder::install) into a registry with a config, the
    /// settings found in the config take precedence.
    pub fn settings(mut self, settings: ThrottleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Specifies the time source of the throttle.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Periodically drops expired bans and windows once the façade has been installed.
    ///
    /// See [ThrottlingService::sweep].
    pub fn housekeeping(mut self, interval: Duration) -> Self {
        self.housekeeping = Some(interval);
        self
    }

    /// Builds a standalone façade.
    pub fn build(self) -> Facade<V> {
        Facade {
            service: ThrottlingService::new(
                SingleFlightCache::new(self.provider),
                self.settings,
                self.clock,
            ),
        }
    }

    /// Builds the façade and registers it for the given token.
    ///
    /// If the registry provides a config, its **throttle** section is applied and followed for
    /// changes. If [housekeeping](FacadeBuilder::housekeeping) is enabled, a background task
    /// sweeps the throttle state. Both tasks end within one of their polling intervals once the
    /// registry is terminated or the façade is dropped.
    ///
    /// If a façade is already registered for this token, it is returned unchanged. Note that
    /// this has to be invoked within a tokio runtime.
    pub fn install(
        mut self,
        registry: &Arc<Registry>,
        token: &TypeToken<V>,
    ) -> anyhow::Result<Arc<Facade<V>>> {
        let config = registry.config();
        if let Some(config) = &config {
            match ThrottleSettings::from_config(&config.current()) {
                Ok(Some(settings)) => self.settings = settings,
                Ok(None) => (),
                Err(error) => log::error!(
                    "Ignoring the throttle settings of the config for '{}': {:#}",
                    token.name(),
                    error
                ),
            }
        }

        let housekeeping = self.housekeeping;
        let mut created = false;
        let facade = registry.get_or_insert_with(token, || {
            created = true;
            Arc::new(self.build())
        })?;

        if !created {
            log::debug!(
                "A façade for '{}' is already present - using the existing one.",
                token.name()
            );
            return Ok(facade);
        }

        if let Some(config) = config {
            follow_config(registry.clone(), config, Arc::downgrade(&facade), token.name());
        }
        if let Some(interval) = housekeeping {
            run_housekeeping(registry.clone(), Arc::downgrade(&facade), interval);
        }

        Ok(facade)
    }
}

/// Creates a standalone façade which throttles calls using the given settings and clock.
pub fn create_api_service<V>(
    settings: ThrottleSettings,
    provider: Arc<dyn ResourceProvider<V>>,
    clock: Arc<dyn Clock>,
) -> Arc<Facade<V>>
where
    V: Clone + Send + Sync + 'static,
{
    Arc::new(
        FacadeBuilder::new(provider)
            .settings(settings)
            .clock(clock)
            .build(),
    )
}

/// Determines how often the config follower checks if it is still needed while no change arrives.
const FOLLOWER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Applies the throttle settings of the config whenever it changes.
fn follow_config<V>(
    registry: Arc<Registry>,
    config: Arc<Config>,
    facade: Weak<Facade<V>>,
    name: &'static str,
) where
    V: Clone + Send + Sync + 'static,
{
    let mut config_changed = config.notifier();
    crate::spawn!(async move {
        while registry.is_running() {
            match tokio::time::timeout(FOLLOWER_POLL_INTERVAL, config_changed.recv()).await {
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => (),
                Ok(Err(RecvError::Closed)) => return,
                Err(_) if facade.strong_count() == 0 => return,
                Err(_) => continue,
            }

            let throttle = match facade.upgrade() {
                Some(current) => current,
                None => return,
            };

            match ThrottleSettings::from_config(&config.current()) {
                Ok(Some(settings)) => {
                    if *throttle.throttle().settings() != settings {
                        throttle.throttle().update_settings(settings);
                    }
                }
                Ok(None) => log::info!(
                    "Config does not contain a 'throttle' object. Keeping the settings for '{}'.",
                    name
                ),
                Err(error) => log::error!(
                    "Not going to update the throttle settings for '{}': {:#}",
                    name,
                    error
                ),
            }
        }
    });
}

/// Periodically sweeps the throttle state of the given façade.
fn run_housekeeping<V>(registry: Arc<Registry>, facade: Weak<Facade<V>>, interval: Duration)
where
    V: Clone + Send + Sync + 'static,
{
    crate::spawn!(async move {
        while registry.is_running() {
            tokio::time::sleep(interval).await;

            match facade.upgrade() {
                Some(current) => {
                    let dropped = current.throttle().sweep();
                    if dropped > 0 {
                        log::debug!("Dropped {} expired throttle entries.", dropped);
                    }
                }
                None => return,
            }
        }
    });
}
