//! Configuration for wozmap-harvest
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`WOZMAP_RATE_LIMIT`, `WOZMAP_BATCH_SIZE`,
//!    `WOZMAP_WORKERS`, `WOZMAP_ROOT_FOLDER`)
//! 3. TOML configuration file (`--config`, or `wozmap-harvest.toml` in the user or
//!    system config directory)
//! 4. Built-in defaults
//!
//! Command-line and environment values arrive together through clap; the TOML file
//! and defaults are merged here.

use crate::checkpoint::CHECKPOINT_FILE_NAME;
use crate::error::{HarvestError, HarvestResult};
use crate::services::locatieserver_client::DEFAULT_LOCATIESERVER_URL;
use crate::services::wozloket_client::DEFAULT_WOZLOKET_URL;
use crate::services::HttpSettings;
use crate::workflow::{BackoffPolicy, HarvestSettings};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wozmap_common::config::{
    find_config_file, get_user_agent, load_toml_file, resolve_root_folder, LoggingConfig,
    ROOT_FOLDER_ENV,
};

/// Module name used to locate the config file
pub const MODULE_NAME: &str = "wozmap-harvest";

/// Default output dataset file name (inside the root folder)
pub const DEFAULT_OUTPUT_FILE: &str = "woz_history.parquet";

/// TOML configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Data root folder (output and checkpoint default here)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub harvest: HarvestSection,

    #[serde(default)]
    pub upstream: UpstreamSection,
}

/// `[harvest]` table
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestSection {
    /// Outbound requests per second across all workers
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per step before an item is given up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

/// `[upstream]` table
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_locatieserver_url")]
    pub locatieserver_url: String,

    #[serde(default = "default_wozloket_url")]
    pub wozloket_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            locatieserver_url: default_locatieserver_url(),
            wozloket_url: default_wozloket_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_rate_limit() -> u32 {
    5
}

fn default_batch_size() -> usize {
    500
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_progress_interval_secs() -> u64 {
    30
}

fn default_locatieserver_url() -> String {
    DEFAULT_LOCATIESERVER_URL.to_string()
}

fn default_wozloket_url() -> String {
    DEFAULT_WOZLOKET_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Values given on the command line (or through their environment variables)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub rate_limit: Option<u32>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub resume: bool,
    pub config: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
}

/// Upstream endpoints and transport settings
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub locatieserver_url: String,
    pub wozloket_url: String,
    pub http: HttpSettings,
}

/// Fully resolved configuration of one harvest run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub root_folder: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    pub rate_limit: NonZeroU32,
    pub settings: HarvestSettings,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

impl HarvestConfig {
    /// Load the TOML file (if any) and merge it with `cli`
    pub fn load(cli: &CliOverrides) -> HarvestResult<Self> {
        let toml = load_toml_config(cli.config.as_deref())?;
        Self::resolve(cli, toml)
    }

    /// Merge command-line values over the TOML file and defaults
    pub fn resolve(cli: &CliOverrides, toml: TomlConfig) -> HarvestResult<Self> {
        let root_folder = resolve_root_folder(
            cli.root_folder.as_deref(),
            ROOT_FOLDER_ENV,
            toml.root_folder.as_deref(),
        );

        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| root_folder.join(DEFAULT_OUTPUT_FILE));
        let checkpoint = cli
            .checkpoint
            .clone()
            .unwrap_or_else(|| default_checkpoint_path(&output));

        let harvest = toml.harvest;
        let rate_limit = cli.rate_limit.unwrap_or(harvest.rate_limit);
        let batch_size = cli.batch_size.unwrap_or(harvest.batch_size);
        let workers = cli.workers.unwrap_or(harvest.workers);

        let rate_limit = NonZeroU32::new(rate_limit).ok_or_else(|| {
            HarvestError::Config("rate limit must be at least 1 request/s".to_string())
        })?;
        if batch_size == 0 {
            return Err(HarvestError::Config("batch size must be at least 1".to_string()));
        }
        if workers == 0 {
            return Err(HarvestError::Config("workers must be at least 1".to_string()));
        }
        if harvest.max_attempts == 0 {
            return Err(HarvestError::Config("max_attempts must be at least 1".to_string()));
        }
        if harvest.backoff_initial_ms > harvest.backoff_max_ms {
            return Err(HarvestError::Config(format!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                harvest.backoff_initial_ms, harvest.backoff_max_ms
            )));
        }
        if harvest.progress_interval_secs == 0 {
            return Err(HarvestError::Config(
                "progress_interval_secs must be at least 1".to_string(),
            ));
        }
        if output == checkpoint {
            return Err(HarvestError::Config(format!(
                "output and checkpoint both point at {}",
                output.display()
            )));
        }

        let upstream = toml.upstream;
        Ok(Self {
            root_folder,
            input: cli.input.clone(),
            output,
            checkpoint,
            rate_limit,
            settings: HarvestSettings {
                batch_size,
                workers,
                backoff: BackoffPolicy {
                    max_attempts: harvest.max_attempts,
                    initial: Duration::from_millis(harvest.backoff_initial_ms),
                    max: Duration::from_millis(harvest.backoff_max_ms),
                },
                progress_interval: Duration::from_secs(harvest.progress_interval_secs),
                resume: cli.resume,
            },
            upstream: UpstreamConfig {
                locatieserver_url: upstream.locatieserver_url,
                wozloket_url: upstream.wozloket_url,
                http: HttpSettings {
                    user_agent: get_user_agent(),
                    request_timeout: Duration::from_secs(upstream.request_timeout_secs),
                    connect_timeout: Duration::from_secs(upstream.connect_timeout_secs),
                },
            },
            logging: toml.logging,
        })
    }
}

/// `harvest-checkpoint.json` next to the output dataset
pub fn default_checkpoint_path(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) => parent.join(CHECKPOINT_FILE_NAME),
        None => PathBuf::from(CHECKPOINT_FILE_NAME),
    }
}

/// Explicit `--config` must exist; otherwise the standard location is optional
fn load_toml_config(explicit: Option<&Path>) -> HarvestResult<TomlConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(HarvestError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            Ok(load_toml_file(path)?)
        }
        None => match find_config_file(MODULE_NAME) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Using config file");
                Ok(load_toml_file(&path)?)
            }
            None => Ok(TomlConfig::default()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(root: &Path) -> CliOverrides {
        CliOverrides {
            input: PathBuf::from("addresses.csv"),
            resume: true,
            root_folder: Some(root.to_path_buf()),
            ..CliOverrides::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config =
            HarvestConfig::resolve(&cli(Path::new("/data/wozmap")), TomlConfig::default())
                .unwrap();

        assert_eq!(config.rate_limit.get(), 5);
        assert_eq!(config.settings.batch_size, 500);
        assert_eq!(config.settings.workers, 4);
        assert_eq!(config.settings.backoff, BackoffPolicy::default());
        assert_eq!(config.output, PathBuf::from("/data/wozmap/woz_history.parquet"));
        assert_eq!(config.checkpoint, PathBuf::from("/data/wozmap/harvest-checkpoint.json"));
        assert_eq!(config.upstream.locatieserver_url, DEFAULT_LOCATIESERVER_URL);
        assert!(config.settings.resume);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml: TomlConfig = toml::from_str(
            r#"
            [harvest]
            rate_limit = 10
            batch_size = 100
            workers = 8
            "#,
        )
        .unwrap();
        let overrides = CliOverrides {
            rate_limit: Some(2),
            ..cli(Path::new("/data"))
        };

        let config = HarvestConfig::resolve(&overrides, toml).unwrap();
        assert_eq!(config.rate_limit.get(), 2);
        assert_eq!(config.settings.batch_size, 100);
        assert_eq!(config.settings.workers, 8);
    }

    #[test]
    fn test_full_toml() {
        let toml: TomlConfig = toml::from_str(
            r#"
            root_folder = "/srv/wozmap"

            [logging]
            level = "debug"

            [harvest]
            max_attempts = 3
            backoff_initial_ms = 500
            backoff_max_ms = 4000
            progress_interval_secs = 10

            [upstream]
            locatieserver_url = "http://localhost:8081"
            wozloket_url = "http://localhost:8082"
            request_timeout_secs = 30
            "#,
        )
        .unwrap();
        let overrides = CliOverrides {
            input: PathBuf::from("a.csv"),
            resume: false,
            ..CliOverrides::default()
        };

        let config = HarvestConfig::resolve(&overrides, toml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.settings.backoff.max_attempts, 3);
        assert_eq!(config.settings.backoff.initial, Duration::from_millis(500));
        assert_eq!(config.settings.progress_interval, Duration::from_secs(10));
        assert_eq!(config.upstream.wozloket_url, "http://localhost:8082");
        assert_eq!(config.upstream.http.request_timeout, Duration::from_secs(30));
        assert_eq!(config.upstream.http.connect_timeout, Duration::from_secs(5));
        assert!(!config.settings.resume);
    }

    #[test]
    fn test_validation() {
        let root = Path::new("/data");
        for overrides in [
            CliOverrides { rate_limit: Some(0), ..cli(root) },
            CliOverrides { batch_size: Some(0), ..cli(root) },
            CliOverrides { workers: Some(0), ..cli(root) },
        ] {
            assert!(matches!(
                HarvestConfig::resolve(&overrides, TomlConfig::default()),
                Err(HarvestError::Config(_))
            ));
        }

        let toml: TomlConfig =
            toml::from_str("[harvest]\nbackoff_initial_ms = 9000\nbackoff_max_ms = 10").unwrap();
        assert!(HarvestConfig::resolve(&cli(root), toml).is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let overrides = CliOverrides {
            config: Some(dir.path().join("missing.toml")),
            ..cli(dir.path())
        };
        assert!(matches!(
            HarvestConfig::load(&overrides),
            Err(HarvestError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_config_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "[harvest]\nworkers = 2\n").unwrap();
        let overrides = CliOverrides {
            config: Some(path),
            ..cli(dir.path())
        };

        let config = HarvestConfig::load(&overrides).unwrap();
        assert_eq!(config.settings.workers, 2);
    }

    #[test]
    fn test_checkpoint_beside_custom_output() {
        let overrides = CliOverrides {
            output: Some(PathBuf::from("/exports/woz.parquet")),
            ..cli(Path::new("/data"))
        };
        let config = HarvestConfig::resolve(&overrides, TomlConfig::default()).unwrap();
        assert_eq!(config.checkpoint, PathBuf::from("/exports/harvest-checkpoint.json"));
    }
}
