//! Runtime configuration for photo-sorter.
//!
//! A single `Config` is built at startup (defaults, then an optional YAML file, then
//! command-line overrides) and shared by `Arc` with every component.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default file name looked up when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "photo-sorter.yaml";

/// The public Nominatim instance, which allows at most one request per second
pub const PUBLIC_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

/// Shortest delay ever used against the public instance
pub const PUBLIC_GEOCODER_MIN_INTERVAL_MS: u64 = 1100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watched directory
    pub input_dir: PathBuf,
    /// Root of the `ByDate` and `ByLocation` trees
    pub output_dir: PathBuf,
    /// Base URL of the Nominatim-compatible reverse geocoding service
    pub geocoder_url: String,
    /// Identifying User-Agent sent with every geocoding request
    pub user_agent: String,
    /// Delay imposed before each geocoding request, in milliseconds
    pub geocode_interval_ms: u64,
    /// Timeout for a single geocoding request, in seconds
    pub geocode_timeout_secs: u64,
    /// How many times to try opening a new file before processing it anyway
    pub readable_attempts: u32,
    /// Pause between two open attempts, in milliseconds
    pub readable_delay_ms: u64,
    /// Files processed at once within one batch (backlog or one archive)
    pub max_concurrency: usize,
    /// Deepest archive nesting that is still expanded
    pub max_archive_depth: u32,
    /// Upper bound on the bytes extracted from a single archive
    pub max_extracted_bytes: u64,
    /// Where archive workspaces are created; the system temp directory when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            geocoder_url: PUBLIC_GEOCODER_URL.to_string(),
            user_agent: format!("photo-sorter/{}", env!("CARGO_PKG_VERSION")),
            geocode_interval_ms: PUBLIC_GEOCODER_MIN_INTERVAL_MS,
            geocode_timeout_secs: 10,
            readable_attempts: 10,
            readable_delay_ms: 1000,
            max_concurrency: 8,
            max_archive_depth: 4,
            max_extracted_bytes: 4 * 1024 * 1024 * 1024,
            temp_dir: None,
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Delay before each geocoding request.
    ///
    /// Never below 1.1 s when the public Nominatim host is configured; other services may
    /// use any interval.
    pub fn geocode_interval(&self) -> Duration {
        let mut interval_ms = self.geocode_interval_ms;
        if self.uses_public_geocoder() && interval_ms < PUBLIC_GEOCODER_MIN_INTERVAL_MS {
            warn!(
                "geocode_interval_ms {} is below the public service limit, using {}",
                interval_ms, PUBLIC_GEOCODER_MIN_INTERVAL_MS
            );
            interval_ms = PUBLIC_GEOCODER_MIN_INTERVAL_MS;
        }
        Duration::from_millis(interval_ms)
    }

    fn uses_public_geocoder(&self) -> bool {
        let public_host = Url::parse(PUBLIC_GEOCODER_URL)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        let configured_host = Url::parse(&self.geocoder_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase));
        public_host.is_some() && public_host == configured_host
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }

    pub fn readable_delay(&self) -> Duration {
        Duration::from_millis(self.readable_delay_ms)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
