//! Provides a decorator which limits the number of calls per client and bans abusive clients.
//!
//! A [ThrottlingService] wraps an inner [ApiService] (usually a
//! [SingleFlightCache](crate::cache::SingleFlightCache)). Each call names a client (its network
//! address) and is counted within a **fixed window** of that client. The window starts with the
//! first call and is reset once it is older than the configured **interval**.
//!
//! If a call would push the count of its window beyond **max_requests_per_client**, the client
//! is banned for **ban_timeout** and the call is rejected with [ErrorKind::RateLimitExceeded].
//! All subsequent calls are rejected with [ErrorKind::ClientBanned] until the ban expires. Note
//! that a rejected call never reaches the inner service and a banned client doesn't even count
//! against its window.
//!
//! The bookkeeping of a client (ban check, window update and possibly issuing a ban) happens in
//! a single critical section, so that concurrent calls of one client are counted exactly and
//! never admit more than the permitted number of calls.
//!
//! # Configuration
//! The settings can be provided in code or read from the system config:
//!
//! ```yaml
//! throttle:
//!     # Specifies the length of a counting window. Supports common suffixes like: ms, s, m, h, d
//!     interval: 1m
//!     # Specifies the number of calls a client may perform within one window.
//!     max_requests_per_client: 100
//!     # Specifies how long a client is banned once it exceeded its limit.
//!     ban_timeout: 5m
//! ```
//!
//! Missing keys fall back to their defaults, invalid values reject the whole section.
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use yaml_rust::Yaml;

use crate::clock::{elapsed, plus, Clock};
use crate::config::Handle;
use crate::fmt::{format_duration, parse_duration};
use crate::metrics::ThrottleMetrics;
use crate::request::{AddOrUpdateRequest, GetRequest};
use crate::response::{AddOrUpdateResponse, ErrorKind, GetResponse};
use crate::service::ApiService;

/// Determines how many calls a client may perform and what happens if it exceeds this limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// The length of a counting window.
    pub interval: Duration,

    /// The number of calls a client may perform within one window.
    pub max_requests_per_client: u32,

    /// The duration of a ban.
    pub ban_timeout: Duration,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        ThrottleSettings {
            interval: Duration::from_secs(60),
            max_requests_per_client: 100,
            ban_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl ThrottleSettings {
    /// Reads the **throttle** section of the given config.
    ///
    /// Returns **None** if the config has no such section.
    pub fn from_config(config: &Handle) -> anyhow::Result<Option<ThrottleSettings>> {
        let section = config.query("throttle");
        if section.is_badvalue() || section.is_null() {
            return Ok(None);
        }
        if section.as_hash().is_none() {
            return Err(anyhow::anyhow!("The config entry 'throttle' must be an object."));
        }

        let defaults = ThrottleSettings::default();
        Ok(Some(ThrottleSettings {
            interval: read_duration(&section["interval"], "throttle.interval")?
                .unwrap_or(defaults.interval),
            max_requests_per_client: read_limit(
                &section["max_requests_per_client"],
                "throttle.max_requests_per_client",
            )?
            .unwrap_or(defaults.max_requests_per_client),
            ban_timeout: read_duration(&section["ban_timeout"], "throttle.ban_timeout")?
                .unwrap_or(defaults.ban_timeout),
        }))
    }
}

fn read_duration(value: &Yaml, name: &str) -> anyhow::Result<Option<Duration>> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::String(text) => parse_duration(text)
            .map(Some)
            .with_context(|| format!("Invalid value for '{}'.", name)),
        Yaml::Integer(millis) if *millis >= 0 => Ok(Some(Duration::from_millis(*millis as u64))),
        _ => Err(anyhow::anyhow!(
            "'{}' must be a duration like '30s' or '1m'.",
            name
        )),
    }
}

fn read_limit(value: &Yaml, name: &str) -> anyhow::Result<Option<u32>> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(limit) => u32::try_from(*limit)
            .map(Some)
            .with_context(|| format!("'{}' must be a non-negative number.", name)),
        _ => Err(anyhow::anyhow!("'{}' must be a number.", name)),
    }
}

/// The counting window of a client.
#[derive(Debug, Copy, Clone)]
struct Window {
    count: u32,
    start: DateTime<Utc>,
}

/// Contains the bookkeeping of all known clients.
#[derive(Default)]
struct Clients {
    windows: HashMap<String, Window>,
    bans: HashMap<String, DateTime<Utc>>,
}

/// The outcome of counting a call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Admission {
    Admitted,
    Banned,
    LimitExceeded,
}

/// Counts the calls per client and rejects calls of clients which exceeded their limit.
pub struct ThrottlingService<S> {
    inner: S,
    clock: Arc<dyn Clock>,
    settings: ArcSwap<ThrottleSettings>,
    clients: Mutex<Clients>,
    metrics: ThrottleMetrics,
}

impl<S> ThrottlingService<S> {
    /// Wraps the given service using the given settings and time source.
    pub fn new(inner: S, settings: ThrottleSettings, clock: Arc<dyn Clock>) -> Self {
        ThrottlingService {
            inner,
            clock,
            settings: ArcSwap::from_pointee(settings),
            clients: Mutex::new(Clients::default()),
            metrics: ThrottleMetrics::default(),
        }
    }

    /// Provides access to the wrapped service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the currently active settings.
    pub fn settings(&self) -> Arc<ThrottleSettings> {
        self.settings.load_full()
    }

    /// Replaces the active settings.
    ///
    /// Existing windows and bans are kept. The new interval and limit apply to the next call
    /// of each client, a new ban timeout only applies to bans issued from now on.
    pub fn update_settings(&self, settings: ThrottleSettings) {
        log::info!(
            "Throttling clients to {} call(s) per {} (ban timeout: {}).",
            settings.max_requests_per_client,
            format_duration(settings.interval),
            format_duration(settings.ban_timeout)
        );
        self.settings.store(Arc::new(settings));
    }

    /// Provides access to the metrics of this throttle.
    pub fn metrics(&self) -> &ThrottleMetrics {
        &self.metrics
    }

    fn clients(&self) -> std::sync::MutexGuard<'_, Clients> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts a call of the given client and determines if it may pass.
    fn admit(&self, client: &str) -> Admission {
        let now = self.clock.now();
        let settings = self.settings.load();
        let mut guard = self.clients();
        let clients = &mut *guard;

        if let Some(expiration) = clients.bans.get(client).copied() {
            if now < expiration {
                return Admission::Banned;
            }
            let _ = clients.bans.remove(client);
        }

        let window = clients
            .windows
            .entry(client.to_owned())
            .or_insert(Window {
                count: 0,
                start: now,
            });

        if elapsed(window.start, now) > settings.interval {
            *window = Window {
                count: 1,
                start: now,
            };
            return Admission::Admitted;
        }

        let count = window.count.saturating_add(1);
        if count > settings.max_requests_per_client {
            let expiration = plus(now, settings.ban_timeout);
            let _ = clients.bans.insert(client.to_owned(), expiration);
            log::info!(
                "Client {} exceeded {} call(s) within {} and is banned until {}.",
                client,
                settings.max_requests_per_client,
                format_duration(settings.interval),
                expiration.to_rfc3339()
            );
            return Admission::LimitExceeded;
        }

        window.count = count;
        Admission::Admitted
    }

    /// Runs the given action on behalf of the given client, unless the client is throttled.
    ///
    /// If the client is banned or just exceeded its limit, the action is never invoked. Instead
    /// the given **reject** constructor is used to build the failure response.
    pub async fn throttle<R, F, Fut>(
        &self,
        client: &str,
        reject: fn(ErrorKind) -> R,
        action: F,
    ) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        match self.admit(client) {
            Admission::Admitted => {
                self.metrics.admitted.inc();
                action().await
            }
            Admission::Banned => {
                self.metrics.rejected_banned.inc();
                log::debug!("Rejecting a call of the banned client {}.", client);
                reject(ErrorKind::ClientBanned)
            }
            Admission::LimitExceeded => {
                self.metrics.rejected_limit.inc();
                reject(ErrorKind::RateLimitExceeded)
            }
        }
    }

    /// Determines if the given client is currently banned.
    pub fn is_banned(&self, client: &str) -> bool {
        let now = self.clock.now();
        self.clients()
            .bans
            .get(client)
            .map(|expiration| now < *expiration)
            .unwrap_or(false)
    }

    /// Returns the number of clients for which a window is tracked.
    pub fn num_clients(&self) -> usize {
        self.clients().windows.len()
    }

    /// Drops all expired bans and windows.
    ///
    /// This has no observable effect on throttling: an expired ban is discarded on the next call
    /// anyway and a missing window behaves just like an expired one. However, it keeps the
    /// bookkeeping from growing with every client ever seen. Returns the number of dropped
    /// entries.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let interval = self.settings.load().interval;
        let mut guard = self.clients();
        let clients = &mut *guard;

        let before = clients.bans.len() + clients.windows.len();
        clients.bans.retain(|_, expiration| now < *expiration);

        let bans = &clients.bans;
        clients.windows.retain(|client, window| {
            bans.contains_key(client) || elapsed(window.start, now) <= interval
        });

        before - clients.bans.len() - clients.windows.len()
    }
}

#[async_trait]
impl<V, S> ApiService<V> for ThrottlingService<S>
where
    V: Send + 'static,
    S: ApiService<V>,
{
    async fn get_resource(&self, request: GetRequest) -> GetResponse<V> {
        let client = request.client_address.clone();
        self.throttle(&client, GetResponse::failure, || {
            self.inner.get_resource(request)
        })
        .await
    }

    async fn add_or_update_resource(&self, request: AddOrUpdateRequest<V>) -> AddOrUpdateResponse {
        let client = request.client_address.clone();
        self.throttle(&client, AddOrUpdateResponse::failure, || {
            self.inner.add_or_update_resource(request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::{Clock, ManualClock};
    use crate::config::Config;
    use crate::request::{AddOrUpdateRequest, GetRequest};
    use crate::response::{AddOrUpdateResponse, ErrorKind, GetResponse};
    use crate::service::ApiService;
    use crate::testing::{test_async, test_async_multi_threaded};
    use crate::throttle::{ThrottleSettings, ThrottlingService};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers every read with 1 and counts all calls which made it through the throttle.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApiService<i32> for Echo {
        async fn get_resource(&self, _request: GetRequest) -> GetResponse<i32> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            GetResponse::ok(1)
        }

        async fn add_or_update_resource(
            &self,
            _request: AddOrUpdateRequest<i32>,
        ) -> AddOrUpdateResponse {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            AddOrUpdateResponse::ok()
        }
    }

    fn settings() -> ThrottleSettings {
        ThrottleSettings {
            interval: Duration::from_secs(60),
            max_requests_per_client: 2,
            ban_timeout: Duration::from_secs(60),
        }
    }

    fn throttle(clock: &Arc<ManualClock>) -> ThrottlingService<Echo> {
        let clock: Arc<dyn Clock> = clock.clone();
        ThrottlingService::new(Echo::default(), settings(), clock)
    }

    fn get(client: &str) -> GetRequest {
        GetRequest::new(client, "test@example.com", "id1")
    }

    #[test]
    fn exceeding_the_limit_bans_the_client() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = throttle(&clock);

            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);

            let response = throttle.get_resource(get("127.0.0.1")).await;
            assert_eq!(response.success, false);
            assert_eq!(response.value, None);
            assert_eq!(response.error, Some(ErrorKind::RateLimitExceeded));
            assert_eq!(throttle.is_banned("127.0.0.1"), true);

            // While banned, calls are rejected right away...
            let response = throttle
                .add_or_update_resource(AddOrUpdateRequest::new("127.0.0.1", "", "id1", 5))
                .await;
            assert_eq!(response.error, Some(ErrorKind::ClientBanned));

            // ...and none of the rejected calls reached the inner service...
            assert_eq!(throttle.inner().calls.load(Ordering::SeqCst), 2);
            assert_eq!(throttle.metrics().admitted.get(), 2);
            assert_eq!(throttle.metrics().rejected_limit.get(), 1);
            assert_eq!(throttle.metrics().rejected_banned.get(), 1);
        });
    }

    #[test]
    fn bans_expire_together_with_the_window() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = throttle(&clock);

            for _ in 0..3 {
                let _ = throttle.get_resource(get("127.0.0.1")).await;
            }
            assert_eq!(throttle.is_banned("127.0.0.1"), true);

            clock.advance(Duration::from_secs(2 * 60));
            assert_eq!(throttle.is_banned("127.0.0.1"), false);
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
        });
    }

    #[test]
    fn an_expired_ban_within_a_full_window_bans_again() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = ThrottlingService::new(
                Echo::default(),
                ThrottleSettings {
                    interval: Duration::from_secs(10 * 60),
                    max_requests_per_client: 2,
                    ban_timeout: Duration::from_secs(60),
                },
                clock.clone(),
            );

            for _ in 0..3 {
                let _ = throttle.get_resource(get("127.0.0.1")).await;
            }

            // The ban is over, but the window still holds two calls...
            clock.advance(Duration::from_secs(61));
            assert_eq!(
                throttle.get_resource(get("127.0.0.1")).await.error,
                Some(ErrorKind::RateLimitExceeded)
            );
        });
    }

    #[test]
    fn banned_calls_do_not_touch_the_window() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = ThrottlingService::new(
                Echo::default(),
                ThrottleSettings {
                    interval: Duration::from_secs(60),
                    max_requests_per_client: 2,
                    ban_timeout: Duration::from_secs(120),
                },
                clock.clone(),
            );

            for _ in 0..3 {
                let _ = throttle.get_resource(get("127.0.0.1")).await;
            }

            // The window has expired, but the client is still banned...
            clock.set(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(90));
            assert_eq!(
                throttle.get_resource(get("127.0.0.1")).await.error,
                Some(ErrorKind::ClientBanned)
            );

            // ...once the ban is over, a fresh window starts with the next call. Had the banned
            // call above opened a window at t=90, the second call here would be rejected.
            clock.set(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(130));
            assert_eq!(
                throttle.get_resource(get("127.0.0.1")).await.error_kind(),
                ErrorKind::None
            );
            clock.advance(Duration::from_secs(1));
            assert_eq!(
                throttle.get_resource(get("127.0.0.1")).await.error_kind(),
                ErrorKind::None
            );
            clock.advance(Duration::from_secs(1));
            assert_eq!(
                throttle.get_resource(get("127.0.0.1")).await.error,
                Some(ErrorKind::RateLimitExceeded)
            );
            assert_eq!(throttle.inner().calls.load(Ordering::SeqCst), 4);
        });
    }

    #[test]
    fn windows_reset_only_once_the_interval_is_exceeded() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = throttle(&clock);

            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);

            // Exactly at the end of the interval, the window is still active...
            clock.advance(Duration::from_secs(60));
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);

            // ...once exceeded, the window starts over with this call.
            clock.advance(Duration::from_millis(1));
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
            assert_eq!(
                throttle.get_resource(get("127.0.0.1")).await.error,
                Some(ErrorKind::RateLimitExceeded)
            );
        });
    }

    #[test]
    fn clients_are_counted_separately() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = throttle(&clock);

            for client in ["127.0.0.1", "127.0.0.2", "127.0.0.1", "127.0.0.2"] {
                assert_eq!(throttle.get_resource(get(client)).await.success, true);
            }
            assert_eq!(throttle.num_clients(), 2);
            assert_eq!(throttle.is_banned("127.0.0.1"), false);
            assert_eq!(throttle.is_banned("127.0.0.2"), false);
        });
    }

    #[test]
    fn concurrent_calls_never_exceed_the_limit() {
        test_async_multi_threaded(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = Arc::new(ThrottlingService::new(
                Echo::default(),
                ThrottleSettings {
                    interval: Duration::from_secs(60),
                    max_requests_per_client: 10,
                    ban_timeout: Duration::from_secs(60),
                },
                clock.clone(),
            ));

            let mut tasks = Vec::new();
            for _ in 0..64 {
                let throttle = throttle.clone();
                tasks.push(tokio::spawn(async move {
                    throttle.get_resource(get("127.0.0.1")).await
                }));
            }

            let mut succeeded = 0;
            let mut exceeded = 0;
            for task in tasks {
                match task.await.unwrap().error_kind() {
                    ErrorKind::None => succeeded += 1,
                    ErrorKind::RateLimitExceeded => exceeded += 1,
                    _ => (),
                }
            }

            assert_eq!(succeeded, 10);
            assert_eq!(exceeded, 1);
            assert_eq!(throttle.inner().calls.load(Ordering::SeqCst), 10);
        });
    }

    #[test]
    fn sweeping_drops_expired_state_only() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = throttle(&clock);

            for _ in 0..3 {
                let _ = throttle.get_resource(get("127.0.0.1")).await;
            }
            let _ = throttle.get_resource(get("127.0.0.2")).await;
            assert_eq!(throttle.sweep(), 0);

            clock.advance(Duration::from_secs(2 * 60));
            // One ban and two windows are gone...
            assert_eq!(throttle.sweep(), 3);
            assert_eq!(throttle.num_clients(), 0);
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
        });
    }

    #[test]
    fn settings_can_be_updated() {
        test_async(async {
            let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
            let throttle = throttle(&clock);

            let mut settings = settings();
            settings.max_requests_per_client = 3;
            throttle.update_settings(settings);
            assert_eq!(throttle.settings().max_requests_per_client, 3);

            for _ in 0..3 {
                assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, true);
            }
            assert_eq!(throttle.get_resource(get("127.0.0.1")).await.success, false);
        });
    }

    #[test]
    fn settings_are_read_from_the_config() {
        let config = Config::new("settings.yml");
        config
            .load_from_string(
                "
throttle:
    interval: 30s
    max_requests_per_client: 5
",
                None,
            )
            .unwrap();
        assert_eq!(
            ThrottleSettings::from_config(&config.current()).unwrap(),
            Some(ThrottleSettings {
                interval: Duration::from_secs(30),
                max_requests_per_client: 5,
                ban_timeout: ThrottleSettings::default().ban_timeout,
            })
        );

        config.load_from_string("other: 42", None).unwrap();
        assert_eq!(
            ThrottleSettings::from_config(&config.current()).unwrap(),
            None
        );

        config
            .load_from_string("throttle:\n    interval: soon", None)
            .unwrap();
        assert_eq!(
            ThrottleSettings::from_config(&config.current()).is_err(),
            true
        );

        config
            .load_from_string("throttle:\n    max_requests_per_client: -1", None)
            .unwrap();
        assert_eq!(
            ThrottleSettings::from_config(&config.current()).is_err(),
            true
        );
    }
}
