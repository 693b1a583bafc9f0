use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use log::{debug, info};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// ConfigFile: deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub catalog: Option<String>,
    pub isolation: Option<Isolation>,
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub listing: ListingConfigFile,
    #[serde(default)]
    pub http: HttpConfigFile,
    #[serde(default)]
    pub enrich: EnrichConfigFile,
    #[serde(default)]
    pub runtime: RuntimeConfigFile,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ListingConfigFile {
    pub page_size: Option<usize>,
    pub paged_filtering: Option<bool>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct HttpConfigFile {
    pub timeout_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct EnrichConfigFile {
    pub poster_url: Option<String>,
    pub subtitle_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfigFile {
    pub poll_interval_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

/// Where the listing backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Worker thread in the UI process.
    Thread,
    /// Separate fetch process forked at startup.
    Process,
}

// ---------------------------------------------------------------------------
// Config: resolved (all fields concrete)
// ---------------------------------------------------------------------------

pub struct Config {
    pub catalog: String,
    pub isolation: Isolation,
    pub download_dir: PathBuf,
    pub listing: ListingConfig,
    pub http_timeout: Duration,
    pub enrich: EnrichConfig,
    pub runtime: RuntimeConfig,
}

pub struct ListingConfig {
    pub page_size: usize,
    pub paged_filtering: bool,
}

pub struct EnrichConfig {
    pub poster_url: Option<String>,
    pub subtitle_url: Option<String>,
    pub cache_dir: PathBuf,
}

pub struct RuntimeConfig {
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(
        &mut self,
        catalog: Option<String>,
        isolation: Option<Isolation>,
        download_dir: Option<PathBuf>,
    ) {
        if let Some(ref v) = catalog {
            debug!("config: CLI override catalog={v}");
            self.catalog = catalog;
        }
        if let Some(v) = isolation {
            debug!("config: CLI override isolation={v:?}");
            self.isolation = isolation;
        }
        if let Some(ref v) = download_dir {
            debug!("config: CLI override download_dir={}", v.display());
            self.download_dir = download_dir;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields.
    pub fn resolve(self) -> Config {
        let config = Config {
            catalog: self.catalog.unwrap_or_else(|| "catalog.toml".into()),
            isolation: self.isolation.unwrap_or(Isolation::Thread),
            download_dir: self.download_dir.unwrap_or_else(|| PathBuf::from("downloads")),
            listing: ListingConfig {
                page_size: self.listing.page_size.unwrap_or(20).max(1),
                paged_filtering: self.listing.paged_filtering.unwrap_or(false),
            },
            http_timeout: Duration::from_millis(self.http.timeout_ms.unwrap_or(10_000)),
            enrich: EnrichConfig {
                poster_url: self.enrich.poster_url,
                subtitle_url: self.enrich.subtitle_url,
                cache_dir: self.enrich.cache_dir.unwrap_or_else(default_cache_dir),
            },
            runtime: RuntimeConfig {
                poll_interval: Duration::from_millis(
                    self.runtime.poll_interval_ms.unwrap_or(50).max(1),
                ),
                shutdown_grace: Duration::from_millis(
                    self.runtime.shutdown_grace_ms.unwrap_or(2000),
                ),
            },
        };
        info!(
            "config: resolved catalog={}, isolation={:?}, download_dir={}, \
             page_size={}, paged_filtering={}, http_timeout={}ms, \
             poster_url={:?}, subtitle_url={:?}, cache_dir={}, \
             poll_interval={}ms, shutdown_grace={}ms",
            config.catalog,
            config.isolation,
            config.download_dir.display(),
            config.listing.page_size,
            config.listing.paged_filtering,
            config.http_timeout.as_millis(),
            config.enrich.poster_url,
            config.enrich.subtitle_url,
            config.enrich.cache_dir.display(),
            config.runtime.poll_interval.as_millis(),
            config.runtime.shutdown_grace.as_millis(),
        );
        config
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .map(|d| d.join("series-list"))
        .unwrap_or_else(|| std::env::temp_dir().join("series-list"))
}

/// Resolve the XDG config path for series-list.
fn config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config"))
        })?;
    Some(config_dir.join("series-list").join("config.toml"))
}

/// Load config file. Returns `ConfigFile::default()` if no file exists.
/// Returns an error if the file exists but cannot be parsed.
pub fn load_config() -> anyhow::Result<ConfigFile> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            info!("config: no HOME or XDG_CONFIG_HOME set, using defaults");
            return Ok(ConfigFile::default());
        }
    };
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!("config: loaded from {}", path.display());
            let cfg: ConfigFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}
