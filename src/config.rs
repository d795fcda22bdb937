//! Contains the system configuration.
//!
//! Provides access to the system configuration which is loaded from the **config/settings.yml**
//! file. Note that we observe this file for changes and reload it once a change is detected.
//! Therefore each user of the config should attach itself to the [Config::notifier] and
//! re-process the config once a change message is received. This is how installed façades pick
//! up new [throttle settings](crate::throttle::ThrottleSettings) without a restart.
//!
//! Note that the **Config** itself can be obtained from the [Registry](crate::registry::Registry)
//! once and then kept around. However, a handle obtained via **Config::current()** should not be
//! stored, as it will not be updated once a new config has been loaded.
//!
//! # Examples
//!
//! Reading the config:
//! ```
//! # use callisto::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! throttle:
//!     interval: 1m
//!     max_requests_per_client: 100
//! ", None).unwrap();
//!
//! let handle = config.current();
//! assert_eq!(handle.query("throttle.interval").as_str(), Some("1m"));
//! assert_eq!(handle.query("throttle.max_requests_per_client").as_i64(), Some(100));
//! assert_eq!(handle.query("throttle.unknown").is_badvalue(), true);
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::registry::Registry;

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `registry.config()`.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be stored or kept around for long, as it will not be updated
/// if the underlying config changed.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will neither load the file nor install a change listener. This is done by
    /// [install].
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// As within docker, the file is presented as volume, we check that it is a file, as an
    /// unmounted docker volume is always presented as directory.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally called by the library and should not be invoked manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                log::info!("Config file doesn't exist or is an unmounted docker volume - skipping config load.");
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Writes the given config to disk.
    ///
    /// The data is validated first, so that a malformed config is never written. Note that the
    /// change is picked up by the change monitor which has been started by [install].
    pub async fn store(&self, config: &str) -> anyhow::Result<()> {
        log::info!(
            "Programmatically updating the config file {}...",
            &self.filename
        );

        if let Err(error) = YamlLoader::load_from_str(config) {
            return Err(anyhow::anyhow!("Cannot parse config data: {}", error));
        }

        tokio::fs::write(&self.filename, config)
            .await
            .context("Failed to write to config file!")?;
        log::info!("Config has been updated successfully!");

        Ok(())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk. A malformed config is rejected and leaves the current config
    /// untouched.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = YamlLoader::load_from_str(data).map_err(|error| {
            anyhow::anyhow!("Cannot parse config file {}: {}", &self.filename, error)
        })?;

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            docs.swap_remove(0)
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dot separated path like **throttle.interval** within the current config.
    ///
    /// Returns **Yaml::BadValue** if no such entry exists.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |element, key| &element[key])
    }
}

/// Creates and installs a **Config** for the given registry.
///
/// This will read its contents from **config/settings.yml** and also install a change listener
/// for this file. Note that this listener will only watch the "last modified" date of the file
/// and will not perform a structural comparison.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(registry: Arc<Registry>) -> Arc<Config> {
    // Create the "config" directory in case it doesn't exist...
    let path = Path::new("config").to_path_buf();
    if let Err(error) = tokio::fs::create_dir_all(path.clone()).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    if let Err(error) = registry.install_config(config.clone()) {
        log::error!("{:#}", error);
    }

    run_config_change_monitor(registry, config.clone());

    config
}

#[cfg(test)]
fn run_config_change_monitor(_registry: Arc<Registry>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(registry: Arc<Registry>, config: Arc<Config>) {
    crate::spawn!(async move {
        while registry.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let last_modified = config.last_modified().await;
            let last_loaded = config.config.load().1;

            // Reload if a file is present and newer than the one previously loaded...
            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
