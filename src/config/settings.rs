use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use toml_edit::{DocumentMut, Item, Table};

use crate::capture::{CaptureMode, CaptureTiming};
use crate::store::DEFAULT_CHECKPOINT_EVERY;
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub capture: CaptureConfig,
    pub store: StoreConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Mode used when `record` is not given one
    pub default_mode: CaptureMode,
    pub debounce: Duration,
    pub frame_interval: Duration,
    pub paint_watchdog: Duration,
    /// Re-fetch interval for change detection on recorded URLs
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Persist a live session every N appends
    pub checkpoint_every: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let timing = CaptureTiming::default();
        Self {
            capture: CaptureConfig {
                default_mode: CaptureMode::Debounced,
                debounce: timing.debounce,
                frame_interval: timing.frame_interval,
                paint_watchdog: timing.paint_watchdog,
                poll_interval: Duration::from_millis(500),
            },
            store: StoreConfig {
                checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            },
            fetch: FetchConfig {
                timeout: Duration::from_secs(30),
                user_agent: format!("domreel/{}", env!("CARGO_PKG_VERSION")),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCaptureConfig {
    pub default_mode: Option<CaptureMode>,
    pub debounce_ms: Option<u64>,
    pub frame_interval_ms: Option<u64>,
    pub paint_watchdog_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlStoreConfig {
    pub checkpoint_every: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlFetchConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub capture: Option<TomlCaptureConfig>,
    pub store: Option<TomlStoreConfig>,
    pub fetch: Option<TomlFetchConfig>,
}

impl Config {
    /// Load configuration from file, merging with defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        Self::load_from(&config_file)
    }

    /// Load from an explicit path. A missing or malformed file yields the
    /// defaults; malformed files are logged.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Config::default();

        let Ok(contents) = fs::read_to_string(path) else {
            return config;
        };
        match toml::from_str::<TomlConfig>(&contents) {
            Ok(toml_config) => config.merge(toml_config),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring malformed config file");
            }
        }
        config
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(capture) = toml_config.capture {
            if let Some(mode) = capture.default_mode {
                self.capture.default_mode = mode;
            }
            if let Some(ms) = capture.debounce_ms {
                self.capture.debounce = Duration::from_millis(ms);
            }
            if let Some(ms) = capture.frame_interval_ms {
                // A zero period would make the frame clock panic.
                self.capture.frame_interval = Duration::from_millis(ms.max(1));
            }
            if let Some(ms) = capture.paint_watchdog_ms {
                self.capture.paint_watchdog = Duration::from_millis(ms);
            }
            if let Some(ms) = capture.poll_interval_ms {
                self.capture.poll_interval = Duration::from_millis(ms.max(1));
            }
        }

        if let Some(store) = toml_config.store {
            if let Some(every) = store.checkpoint_every {
                self.store.checkpoint_every = every.max(1);
            }
        }

        if let Some(fetch) = toml_config.fetch {
            if let Some(secs) = fetch.timeout_secs {
                self.fetch.timeout = Duration::from_secs(secs);
            }
            if let Some(user_agent) = fetch.user_agent {
                self.fetch.user_agent = user_agent;
            }
        }
    }

    /// Create the default config file with example content
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::debug!(error = %err, "could not create config directory");
                return;
            }
        }
        if let Err(err) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::debug!(error = %err, "could not write example config");
        }
    }

    pub fn capture_timing(&self) -> CaptureTiming {
        CaptureTiming {
            debounce: self.capture.debounce,
            frame_interval: self.capture.frame_interval,
            paint_watchdog: self.capture.paint_watchdog,
        }
    }
}

/// Save the default capture mode to the config file.
pub fn save_default_mode(mode: CaptureMode) -> std::io::Result<()> {
    save_default_mode_at(&config_path(), mode)
}

/// Set `[capture].default_mode` in the file at `config_file`, preserving
/// everything else in it.
pub fn save_default_mode_at(config_file: &Path, mode: CaptureMode) -> std::io::Result<()> {
    // Read existing config or start with empty document
    let contents = if config_file.exists() {
        fs::read_to_string(config_file)?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = contents
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    if !doc.contains_key("capture") {
        doc["capture"] = Item::Table(Table::new());
    }
    doc["capture"]["default_mode"] = toml_edit::value(mode.as_str());

    if let Some(parent) = config_file.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(config_file, doc.to_string())?;

    Ok(())
}
