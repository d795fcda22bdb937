//! Callisto is a library which shields expensive, keyed resource providers from duplicate work
//! and from abusive clients.
//!
//! # Introduction
//! Many services wrap a **resource provider** which is slow or expensive to call: a remote
//! API, a database which has to compute a large document or a file system which lives on the
//! other end of a network. Two things tend to go wrong with such providers: many callers ask for
//! the same resource at the same time (and all of them hit the provider), and single clients ask
//! way too often.
//!
//! **Callisto** puts two layers in front of such a provider:
//! * A **single-flight cache** ([cache]) which serializes all access to a resource key and
//!   remembers the last known value. Concurrent readers of a missing key collapse into a single
//!   provider call, all others wait for it and then observe the loaded value.
//! * A **throttle** ([throttle]) which counts the calls of each client within a fixed window.
//!   Once a client exceeds the permitted number of calls, it is banned for a configurable
//!   period and all of its calls are rejected without touching the cache or the provider.
//!
//! Both layers are combined into a [Facade](facade::Facade) which offers a simple `get` and
//! `add_or_update` API. Every call yields a structured response (see [response]) - faults of
//! the provider never escape as panics or errors.
//!
//! # Features
//! * **100% Async/Await** - everything builds upon [tokio](https://tokio.rs/). A provider may
//!   perform arbitrary I/O without blocking other keys.
//! * **Exact limits** - the bookkeeping of a client is updated atomically, so that a burst of
//!   concurrent calls can never sneak past the configured limit.
//! * **Reload-aware config** - the throttle settings can be loaded from **config/settings.yml**
//!   and are picked up again once the file changes (see [config]).
//! * **Deterministic time** - all time based decisions use an injected [Clock](clock::Clock),
//!   so that tests can fast-forward through ban periods.
//!
//! # Examples
//! A short example of how to set up the library can be found here: [Builder](builder::Builder).
//! A standalone façade can be created via [create_api_service](facade::create_api_service).
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod cache;
pub mod clock;
pub mod config;
pub mod facade;
pub mod fmt;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod request;
pub mod response;
pub mod service;
pub mod throttle;

/// Contains the version of the Callisto library.
pub const CALLISTO_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Callisto build being used.
pub const CALLISTO_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// library, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests and embedding applications might call this several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            // Another logger has already been installed by the embedding application...
            log::debug!("Not installing the Callisto logger: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate callisto;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
