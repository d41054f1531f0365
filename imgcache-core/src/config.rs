//! Cache configuration and its loader.
//!
//! Sources, lowest to highest precedence: compiled defaults, a TOML file
//! (`--config`, `IMGCACHE_CONFIG`, or the first default location that
//! exists), then `IMGCACHE_*` environment variables (a `.env` file is loaded
//! first when present).

use std::{env, fs, path::PathBuf, time::Duration};

use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("imgcache.toml"),
        PathBuf::from("config/imgcache.toml"),
    ]
});

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 12;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime settings for an [`ImageDownloader`](crate::ImageDownloader).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Disk tier root. `None` disables the disk tier entirely.
    pub disk_dir: Option<PathBuf>,
    /// Accepted for compatibility, not enforced.
    pub allow_cache: bool,
    /// Accepted for compatibility, not enforced (0 = unbounded).
    pub count_limit: usize,
    /// Accepted for compatibility, not enforced (0 = unbounded).
    pub total_cost_limit: usize,
    /// Fail a download whose image could not be written to disk.
    pub strict_disk_writes: bool,
    /// Upper bound on concurrent network fetches across all keys.
    pub max_concurrent_fetches: usize,
    pub request_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disk_dir: None,
            allow_cache: true,
            count_limit: 0,
            total_cost_limit: 0,
            strict_disk_writes: true,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// Memory-only configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_disk_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    pub fn with_strict_disk_writes(mut self, strict: bool) -> Self {
        self.strict_disk_writes = strict;
        self
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigLoadError> {
        let file: FileConfig =
            toml::from_str(contents).map_err(|source| ConfigLoadError::Parse {
                path: None,
                source,
            })?;
        let mut config = Self::default();
        file.apply(&mut config)?;
        Ok(config)
    }
}

/// `<platform cache dir>/images`, e.g. `~/.cache/imgcache/images`.
pub fn default_disk_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "imgcache", "imgcache")
        .map(|dirs| dirs.cache_dir().join("images"))
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file {} does not exist", .path.display())]
    MissingConfig { path: PathBuf },
    #[error("failed to read config file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config (file: {path:?})")]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

/// Result of [`ConfigLoader::load`].
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: CacheConfig,
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Fill `disk_dir` from [`default_disk_dir`] when no source sets it.
    pub default_disk_dir: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_default_disk_dir(mut self, enabled: bool) -> Self {
        self.options.default_disk_dir = enabled;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env_config = EnvConfig::gather();
        let mut config = CacheConfig::default();

        let config_path = self.resolve_config_path(&env_config)?;
        let mut disk_disabled = false;
        if let Some(path) = &config_path {
            let contents =
                fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
                    path: path.clone(),
                    source,
                })?;
            let file: FileConfig =
                toml::from_str(&contents).map_err(|source| {
                    ConfigLoadError::Parse {
                        path: Some(path.clone()),
                        source,
                    }
                })?;
            disk_disabled = file.disable_disk == Some(true);
            file.apply(&mut config)?;
        }

        env_config.apply(&mut config)?;

        if config.disk_dir.is_none()
            && !disk_disabled
            && self.options.default_disk_dir
        {
            config.disk_dir = default_disk_dir();
        }

        Ok(ConfigLoad {
            config,
            config_path,
            env_file_loaded,
        })
    }

    fn resolve_config_path(
        &self,
        env_config: &EnvConfig,
    ) -> Result<Option<PathBuf>, ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        match explicit {
            Some(path) if path.exists() => Ok(Some(path)),
            Some(path) => Err(ConfigLoadError::MissingConfig { path }),
            None => Ok(DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned()),
        }
    }
}

/// On-disk TOML shape. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    disk_dir: Option<PathBuf>,
    disable_disk: Option<bool>,
    allow_cache: Option<bool>,
    count_limit: Option<usize>,
    total_cost_limit: Option<usize>,
    strict_disk_writes: Option<bool>,
    max_concurrent_fetches: Option<usize>,
    request_timeout: Option<String>,
}

impl FileConfig {
    fn apply(self, config: &mut CacheConfig) -> Result<(), ConfigLoadError> {
        if let Some(dir) = self.disk_dir {
            config.disk_dir = Some(dir);
        }
        if self.disable_disk == Some(true) {
            config.disk_dir = None;
        }
        if let Some(v) = self.allow_cache {
            config.allow_cache = v;
        }
        if let Some(v) = self.count_limit {
            config.count_limit = v;
        }
        if let Some(v) = self.total_cost_limit {
            config.total_cost_limit = v;
        }
        if let Some(v) = self.strict_disk_writes {
            config.strict_disk_writes = v;
        }
        if let Some(v) = self.max_concurrent_fetches {
            config.max_concurrent_fetches = positive("max_concurrent_fetches", v)?;
        }
        if let Some(raw) = self.request_timeout {
            config.request_timeout = parse_duration("request_timeout", &raw)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EnvConfig {
    config_path: Option<PathBuf>,
    disk_dir: Option<String>,
    strict_disk_writes: Option<String>,
    max_concurrent_fetches: Option<String>,
    request_timeout: Option<String>,
}

impl EnvConfig {
    fn gather() -> Self {
        Self {
            config_path: env_path("IMGCACHE_CONFIG"),
            disk_dir: env_string("IMGCACHE_DISK_DIR"),
            strict_disk_writes: env_string("IMGCACHE_STRICT_DISK_WRITES"),
            max_concurrent_fetches: env_string("IMGCACHE_MAX_CONCURRENT_FETCHES"),
            request_timeout: env_string("IMGCACHE_REQUEST_TIMEOUT"),
        }
    }

    fn apply(self, config: &mut CacheConfig) -> Result<(), ConfigLoadError> {
        if let Some(dir) = self.disk_dir {
            config.disk_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = self.strict_disk_writes {
            config.strict_disk_writes =
                parse_bool("IMGCACHE_STRICT_DISK_WRITES", &raw)?;
        }
        if let Some(raw) = self.max_concurrent_fetches {
            let value = raw.parse::<usize>().map_err(|e| {
                ConfigLoadError::InvalidValue {
                    field: "IMGCACHE_MAX_CONCURRENT_FETCHES".into(),
                    message: e.to_string(),
                }
            })?;
            config.max_concurrent_fetches =
                positive("IMGCACHE_MAX_CONCURRENT_FETCHES", value)?;
        }
        if let Some(raw) = self.request_timeout {
            config.request_timeout =
                parse_duration("IMGCACHE_REQUEST_TIMEOUT", &raw)?;
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigLoadError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigLoadError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|e| {
        ConfigLoadError::InvalidValue {
            field: field.to_string(),
            message: e.to_string(),
        }
    })
}

fn positive(field: &str, value: usize) -> Result<usize, ConfigLoadError> {
    if value == 0 {
        return Err(ConfigLoadError::InvalidValue {
            field: field.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{CacheConfig, ConfigLoadError, ConfigLoader, EnvConfig};
    use std::{path::PathBuf, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn defaults_are_strict_and_memory_only() {
        let config = CacheConfig::default();
        assert!(config.allow_cache);
        assert_eq!(config.count_limit, 0);
        assert_eq!(config.total_cost_limit, 0);
        assert!(config.strict_disk_writes);
        assert_eq!(config.disk_dir, None);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = CacheConfig::from_toml_str(
            r#"
            disk_dir = "/var/cache/imgs"
            strict_disk_writes = false
            max_concurrent_fetches = 4
            request_timeout = "1m 30s"
            count_limit = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.disk_dir, Some(PathBuf::from("/var/cache/imgs")));
        assert!(!config.strict_disk_writes);
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.count_limit, 200);
    }

    #[test]
    fn disable_disk_wins_over_disk_dir() {
        let config = CacheConfig::from_toml_str(
            "disk_dir = \"/tmp/x\"\ndisable_disk = true\n",
        )
        .unwrap();
        assert_eq!(config.disk_dir, None);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err =
            CacheConfig::from_toml_str("max_concurrent_fetches = 0").unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidValue { .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CacheConfig::from_toml_str("disk_directory = \"/x\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn bad_timeout_is_reported() {
        let err =
            CacheConfig::from_toml_str("request_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidValue { field, .. } if field == "request_timeout"));
    }

    #[test]
    fn loader_reads_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imgcache.toml");
        std::fs::write(&path, "disk_dir = \"/srv/images\"\n").unwrap();

        let load = ConfigLoader::new()
            .with_config_path(&path)
            .with_env_file(dir.path().join("missing.env"))
            .load()
            .unwrap();
        assert_eq!(load.config_path.as_deref(), Some(path.as_path()));
        assert!(!load.env_file_loaded);
        assert_eq!(load.config.disk_dir, Some(PathBuf::from("/srv/images")));
    }

    #[test]
    fn loader_rejects_missing_explicit_file() {
        let dir = tempdir().unwrap();
        let err = ConfigLoader::new()
            .with_config_path(dir.path().join("nope.toml"))
            .with_env_file(dir.path().join("missing.env"))
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn env_values_override_file_values() {
        let mut config =
            CacheConfig::from_toml_str("disk_dir = \"/from/file\"\nstrict_disk_writes = true\n")
                .unwrap();
        EnvConfig {
            disk_dir: Some("/from/env".into()),
            strict_disk_writes: Some("no".into()),
            max_concurrent_fetches: Some("3".into()),
            request_timeout: Some("250ms".into()),
            ..EnvConfig::default()
        }
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.disk_dir, Some(PathBuf::from("/from/env")));
        assert!(!config.strict_disk_writes);
        assert_eq!(config.max_concurrent_fetches, 3);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn env_rejects_unparseable_values() {
        let mut config = CacheConfig::default();
        let err = EnvConfig {
            strict_disk_writes: Some("sometimes".into()),
            ..EnvConfig::default()
        }
        .apply(&mut config)
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidValue { field, .. } if field == "IMGCACHE_STRICT_DISK_WRITES"));

        let err = EnvConfig {
            max_concurrent_fetches: Some("many".into()),
            ..EnvConfig::default()
        }
        .apply(&mut config)
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidValue { .. }));
    }

    #[test]
    fn disabled_disk_is_not_refilled_with_the_default_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imgcache.toml");
        std::fs::write(&path, "disable_disk = true\n").unwrap();

        let load = ConfigLoader::new()
            .with_config_path(&path)
            .with_env_file(dir.path().join("missing.env"))
            .with_default_disk_dir(true)
            .load()
            .unwrap();
        assert_eq!(load.config.disk_dir, None);
    }
}
