//! Provides a builder which can be used to setup and initialize the library.
//!
//! This creates the [Registry](crate::registry::Registry) which keeps all façades of an
//! application. As Callisto provides some optional parts, a builder permits to selectively
//! enable or disable them.
//!
//! # Example
//! Setting up the library with all features enabled:
//! ```no_run
//! # use callisto::builder::Builder;
//! # use callisto::facade::Facade;
//! # use callisto::provider::{FnResourceProvider, ResourceProvider};
//! # use callisto::registry::TypeToken;
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! const DOCUMENTS: TypeToken<String> = TypeToken::new("documents");
//!
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the registry...
//!     let registry = Builder::new().enable_all().build().await;
//!
//!     // Install a façade for each resource type...
//!     let provider: Arc<dyn ResourceProvider<String>> = Arc::new(FnResourceProvider::new(
//!         |key: &str| -> anyhow::Result<String> { Ok(format!("Contents of {}", key)) },
//!         |_key: &str, _value: String| -> anyhow::Result<()> { Ok(()) },
//!     ));
//!     let documents = Facade::builder(provider)
//!         .housekeeping(Duration::from_secs(60))
//!         .install(&registry, &DOCUMENTS)
//!         .unwrap();
//!
//!     let response = documents.get("readme", "10.0.0.1").await;
//!     assert_eq!(response.success, true);
//! }
//! ```
use std::sync::Arc;

use crate::registry::Registry;
use crate::{init_logging, CALLISTO_REVISION, CALLISTO_VERSION};

/// Initializes the library by creating a registry and setting up the enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    setup_config: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            setup_config: false,
        }
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.setup_config = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a [Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// Façades installed into the registry will then pick up their throttle settings from
    /// there. For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Builds the [Registry](crate::registry::Registry) with all enabled components being set up.
    pub async fn build(self) -> Arc<Registry> {
        let registry = Registry::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. CALLISTO (v {} - rev {}) starting up...",
            CALLISTO_VERSION,
            CALLISTO_REVISION
        );

        if self.setup_config {
            let _ = crate::config::install(registry.clone()).await;
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;

    #[test]
    fn components_are_only_set_up_if_enabled() {
        crate::testing::test_async(async {
            let registry = Builder::new().build().await;
            assert_eq!(registry.config().is_none(), true);
            assert_eq!(registry.is_running(), true);

            let registry = Builder::new()
                .enable_all()
                .disable_logging()
                .build()
                .await;
            assert_eq!(registry.config().is_some(), true);
        });
    }
}
