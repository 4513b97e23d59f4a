use crate::export::NodeListVersion;
use crate::sink::{WriterOptions, MAX_BATCH_POINTS};
use dotenvy::dotenv;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const CONFIG_PATH_KEY: &str = "MESHMON_CONFIG_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown node list version {0}; expected 1 or 2")]
    UnknownNodesVersion(u64),
    #[error("unknown database backend {0:?}; expected none, influxdb, timescale or logfile")]
    UnknownBackend(String),
    #[error("invalid duration {value:?} for {key}")]
    InvalidDuration { key: &'static str, value: String },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} is required by the selected database backend")]
    Missing(&'static str),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{key} must be at most {max} for the selected database backend")]
    TooLarge { key: &'static str, max: usize },
    #[error("failed to load settings file {path}: {reason}")]
    Settings { path: PathBuf, reason: String },
}

/// JSON settings file. Every entry is optional and only applies when the matching
/// `MESHMON_*` variable is unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(default)]
    pub state_path: Option<String>,
    #[serde(default)]
    pub save_interval: Option<String>,
    #[serde(default)]
    pub offline_after: Option<String>,
    #[serde(default)]
    pub prune_after: Option<String>,
    #[serde(default)]
    pub nodes_version: Option<u64>,
    #[serde(default)]
    pub nodes_path: Option<String>,
    #[serde(default)]
    pub graph_path: Option<String>,
    #[serde(default)]
    pub db_backend: Option<String>,
    #[serde(default)]
    pub influx_address: Option<String>,
    #[serde(default)]
    pub influx_database: Option<String>,
    #[serde(default)]
    pub influx_username: Option<String>,
    #[serde(default)]
    pub influx_password: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub db_pool_size: Option<u32>,
    #[serde(default)]
    pub logfile_path: Option<String>,
    #[serde(default)]
    pub delete_interval: Option<String>,
    #[serde(default)]
    pub delete_after: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_timeout: Option<String>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub write_retries: Option<u32>,
    #[serde(default)]
    pub write_backoff: Option<String>,
    #[serde(default)]
    pub stdin_feed: Option<bool>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings_error = |reason: String| ConfigError::Settings {
            path: path.to_path_buf(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|err| settings_error(err.to_string()))?;
        let mut bytes = contents.into_bytes();
        simd_json::serde::from_slice(&mut bytes).map_err(|err| settings_error(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesConfig {
    /// Internal snapshot used for warm restarts. `None` disables load and save.
    pub state_path: Option<PathBuf>,
    pub save_interval: Duration,
    pub offline_after: Duration,
    /// Zero means the registry default.
    pub prune_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub nodes_version: NodeListVersion,
    pub nodes_path: Option<PathBuf>,
    pub graph_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Influx {
        address: String,
        database: String,
        username: Option<String>,
        password: Option<String>,
    },
    Timescale {
        url: String,
        pool_size: u32,
    },
    LogFile {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub backend: BackendConfig,
    pub delete_interval: Duration,
    pub delete_after: Duration,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub queue_capacity: usize,
    pub write_retries: u32,
    pub write_backoff: Duration,
}

impl DatabaseConfig {
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            batch_size: self.batch_size,
            batch_timeout: self.batch_timeout,
            queue_capacity: self.queue_capacity,
            max_retries: self.write_retries,
            retry_backoff: self.write_backoff,
            delete_interval: self.delete_interval,
            delete_after: self.delete_after,
            ..WriterOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub nodes: NodesConfig,
    pub exports: ExportConfig,
    /// `None` when no time-series backend is configured.
    pub database: Option<DatabaseConfig>,
    /// Read newline-delimited announcements from stdin.
    pub stdin_feed: bool,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let settings = match env_value(CONFIG_PATH_KEY) {
            Some(path) => SettingsFile::load(Path::new(&path))?,
            None => SettingsFile::default(),
        };
        Self::from_lookup(env_value, settings)
    }

    /// Builds the configuration from a key lookup, falling back to `settings` and then to the
    /// defaults.
    pub fn from_lookup<F>(lookup: F, settings: SettingsFile) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup, settings };
        let file = &source.settings;

        let nodes = NodesConfig {
            state_path: source
                .string("MESHMON_STATE_PATH", file.state_path.as_ref())
                .map(PathBuf::from),
            save_interval: source.duration(
                "MESHMON_SAVE_INTERVAL",
                file.save_interval.as_ref(),
                Duration::from_secs(5),
            )?,
            offline_after: source.duration(
                "MESHMON_OFFLINE_AFTER",
                file.offline_after.as_ref(),
                Duration::from_secs(10 * 60),
            )?,
            prune_after: source.duration(
                "MESHMON_PRUNE_AFTER",
                file.prune_after.as_ref(),
                crate::registry::DEFAULT_PRUNE_AFTER,
            )?,
        };
        if nodes.save_interval.is_zero() {
            return Err(ConfigError::Zero("MESHMON_SAVE_INTERVAL"));
        }

        let nodes_version: u64 = source.number("MESHMON_NODES_VERSION", file.nodes_version, 2)?;
        let exports = ExportConfig {
            nodes_version: NodeListVersion::try_from(nodes_version)?,
            nodes_path: source
                .string("MESHMON_NODES_PATH", file.nodes_path.as_ref())
                .map(PathBuf::from),
            graph_path: source
                .string("MESHMON_GRAPH_PATH", file.graph_path.as_ref())
                .map(PathBuf::from),
        };

        let database = source.database()?;
        let stdin_feed = match source.string("MESHMON_STDIN_FEED", None) {
            Some(raw) => parse_bool("MESHMON_STDIN_FEED", &raw)?,
            None => file.stdin_feed.unwrap_or(false),
        };
        let otlp_endpoint = (source.lookup)("OTEL_EXPORTER_OTLP_ENDPOINT")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            nodes,
            exports,
            database,
            stdin_feed,
            otlp_endpoint,
        })
    }
}

struct Source<F> {
    lookup: F,
    settings: SettingsFile,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, file: Option<&String>) -> Option<String> {
        (self.lookup)(key)
            .or_else(|| file.cloned())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn duration(
        &self,
        key: &'static str,
        file: Option<&String>,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        match self.string(key, file) {
            Some(raw) => parse_duration(&raw).ok_or(ConfigError::InvalidDuration { key, value: raw }),
            None => Ok(default),
        }
    }

    fn number<T: FromStr>(
        &self,
        key: &'static str,
        file: Option<T>,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.string(key, None) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
            None => Ok(file.unwrap_or(default)),
        }
    }

    fn database(&self) -> Result<Option<DatabaseConfig>, ConfigError> {
        let file = &self.settings;
        let backend_name = self
            .string("MESHMON_DB_BACKEND", file.db_backend.as_ref())
            .unwrap_or_else(|| "none".to_string())
            .to_ascii_lowercase();

        let backend = match backend_name.as_str() {
            "none" => return Ok(None),
            "influxdb" | "influx" => BackendConfig::Influx {
                address: self
                    .string("MESHMON_INFLUX_ADDRESS", file.influx_address.as_ref())
                    .unwrap_or_else(|| "http://127.0.0.1:8086".to_string()),
                database: self
                    .string("MESHMON_INFLUX_DATABASE", file.influx_database.as_ref())
                    .unwrap_or_else(|| "meshmon".to_string()),
                username: self.string("MESHMON_INFLUX_USERNAME", file.influx_username.as_ref()),
                password: self.string("MESHMON_INFLUX_PASSWORD", file.influx_password.as_ref()),
            },
            "timescale" | "postgres" => {
                let url = self
                    .string("MESHMON_DATABASE_URL", file.database_url.as_ref())
                    .ok_or(ConfigError::Missing("MESHMON_DATABASE_URL"))?;
                let pool_size = self.number("MESHMON_DB_POOL_SIZE", file.db_pool_size, 5)?;
                if pool_size == 0 {
                    return Err(ConfigError::Zero("MESHMON_DB_POOL_SIZE"));
                }
                BackendConfig::Timescale {
                    url: normalize_database_url(url),
                    pool_size,
                }
            }
            "logfile" => BackendConfig::LogFile {
                path: self
                    .string("MESHMON_LOGFILE_PATH", file.logfile_path.as_ref())
                    .map(PathBuf::from)
                    .ok_or(ConfigError::Missing("MESHMON_LOGFILE_PATH"))?,
            },
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let database = DatabaseConfig {
            backend,
            delete_interval: self.duration(
                "MESHMON_DELETE_INTERVAL",
                file.delete_interval.as_ref(),
                Duration::from_secs(60 * 60),
            )?,
            delete_after: self.duration(
                "MESHMON_DELETE_AFTER",
                file.delete_after.as_ref(),
                Duration::from_secs(7 * 24 * 60 * 60),
            )?,
            batch_size: self.number("MESHMON_BATCH_SIZE", file.batch_size, 500)?,
            batch_timeout: self.duration(
                "MESHMON_BATCH_TIMEOUT",
                file.batch_timeout.as_ref(),
                Duration::from_secs(5),
            )?,
            queue_capacity: self.number("MESHMON_QUEUE_CAPACITY", file.queue_capacity, 1000)?,
            write_retries: self.number("MESHMON_WRITE_RETRIES", file.write_retries, 5)?,
            write_backoff: self.duration(
                "MESHMON_WRITE_BACKOFF",
                file.write_backoff.as_ref(),
                Duration::from_secs(1),
            )?,
        };

        if database.batch_size == 0 {
            return Err(ConfigError::Zero("MESHMON_BATCH_SIZE"));
        }
        if matches!(database.backend, BackendConfig::Timescale { .. })
            && database.batch_size > MAX_BATCH_POINTS
        {
            return Err(ConfigError::TooLarge {
                key: "MESHMON_BATCH_SIZE",
                max: MAX_BATCH_POINTS,
            });
        }
        if database.queue_capacity == 0 {
            return Err(ConfigError::Zero("MESHMON_QUEUE_CAPACITY"));
        }
        if database.delete_interval.is_zero() {
            return Err(ConfigError::Zero("MESHMON_DELETE_INTERVAL"));
        }
        if database.batch_timeout.is_zero() {
            return Err(ConfigError::Zero("MESHMON_BATCH_TIMEOUT"));
        }
        Ok(Some(database))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}

/// Parses `<int><unit>` with units `s m h d w y`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let unit = raw.chars().last()?;
    let amount: u64 = raw[..raw.len() - unit.len_utf8()].trim().parse().ok()?;
    let scale: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        'y' => 365 * 24 * 60 * 60,
        _ => return None,
    };
    amount.checked_mul(scale).map(Duration::from_secs)
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_input() {
        let config = Config::from_lookup(lookup(&[]), SettingsFile::default()).unwrap();
        assert_eq!(config.nodes.state_path, None);
        assert_eq!(config.nodes.save_interval, Duration::from_secs(5));
        assert_eq!(config.nodes.offline_after, Duration::from_secs(600));
        assert_eq!(config.nodes.prune_after, Duration::from_secs(7 * 86_400));
        assert_eq!(config.exports.nodes_version, NodeListVersion::V2);
        assert!(config.database.is_none());
        assert!(!config.stdin_feed);
    }

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("1w"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("1y"), Some(Duration::from_secs(31_536_000)));
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn env_wins_over_settings_file() {
        let settings = SettingsFile {
            save_interval: Some("30s".to_string()),
            offline_after: Some("1h".to_string()),
            ..Default::default()
        };
        let config =
            Config::from_lookup(lookup(&[("MESHMON_SAVE_INTERVAL", "10s")]), settings).unwrap();
        assert_eq!(config.nodes.save_interval, Duration::from_secs(10));
        assert_eq!(config.nodes.offline_after, Duration::from_secs(3600));
    }

    #[test]
    fn zero_prune_is_kept_for_registry_default() {
        let config =
            Config::from_lookup(lookup(&[("MESHMON_PRUNE_AFTER", "0")]), SettingsFile::default())
                .unwrap();
        assert!(config.nodes.prune_after.is_zero());
    }

    #[test]
    fn unknown_nodes_version_is_fatal() {
        let err = Config::from_lookup(lookup(&[("MESHMON_NODES_VERSION", "3")]), SettingsFile::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNodesVersion(3)));
    }

    #[test]
    fn unknown_backend_is_fatal() {
        let err = Config::from_lookup(lookup(&[("MESHMON_DB_BACKEND", "graphite")]), SettingsFile::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(name) if name == "graphite"));
    }

    #[test]
    fn timescale_requires_url_and_normalizes_it() {
        let err = Config::from_lookup(lookup(&[("MESHMON_DB_BACKEND", "timescale")]), SettingsFile::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("MESHMON_DATABASE_URL")));

        let config = Config::from_lookup(
            lookup(&[
                ("MESHMON_DB_BACKEND", "timescale"),
                ("MESHMON_DATABASE_URL", "postgresql+psycopg://mesh@db/mesh"),
            ]),
            SettingsFile::default(),
        )
        .unwrap();
        let database = config.database.unwrap();
        assert_eq!(
            database.backend,
            BackendConfig::Timescale {
                url: "postgresql://mesh@db/mesh".to_string(),
                pool_size: 5,
            }
        );
        let options = database.writer_options();
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.batch_timeout, Duration::from_secs(5));
        assert_eq!(options.delete_interval, Duration::from_secs(3600));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Config::from_lookup(
            lookup(&[("MESHMON_DB_BACKEND", "influxdb"), ("MESHMON_BATCH_SIZE", "0")]),
            SettingsFile::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Zero("MESHMON_BATCH_SIZE")));
    }

    #[test]
    fn timescale_batch_size_fits_one_insert() {
        let timescale = |batch_size: &'static str| {
            Config::from_lookup(
                lookup(&[
                    ("MESHMON_DB_BACKEND", "timescale"),
                    ("MESHMON_DATABASE_URL", "postgres://mesh@db/mesh"),
                    ("MESHMON_BATCH_SIZE", batch_size),
                ]),
                SettingsFile::default(),
            )
        };
        let err = timescale("20000").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooLarge {
                key: "MESHMON_BATCH_SIZE",
                max: 16_383
            }
        ));

        let config = timescale("16383").unwrap();
        assert_eq!(config.database.unwrap().batch_size, 16_383);

        let influx = Config::from_lookup(
            lookup(&[("MESHMON_DB_BACKEND", "influxdb"), ("MESHMON_BATCH_SIZE", "20000")]),
            SettingsFile::default(),
        )
        .unwrap();
        assert_eq!(influx.database.unwrap().batch_size, 20_000);
    }

    #[test]
    fn invalid_number_names_the_key() {
        let err = Config::from_lookup(
            lookup(&[("MESHMON_DB_BACKEND", "influxdb"), ("MESHMON_QUEUE_CAPACITY", "lots")]),
            SettingsFile::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid value \"lots\" for MESHMON_QUEUE_CAPACITY");
    }

    #[test]
    fn settings_file_selects_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshmon.json");
        std::fs::write(
            &path,
            r#"{"db_backend": "logfile", "logfile_path": "/tmp/points.log", "nodes_version": 1, "stdin_feed": true}"#,
        )
        .unwrap();
        let settings = SettingsFile::load(&path).unwrap();
        let config = Config::from_lookup(lookup(&[]), settings).unwrap();
        assert_eq!(config.exports.nodes_version, NodeListVersion::V1);
        assert!(config.stdin_feed);
        assert_eq!(
            config.database.unwrap().backend,
            BackendConfig::LogFile {
                path: PathBuf::from("/tmp/points.log")
            }
        );
    }

    #[test]
    fn settings_file_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meshmon.json");
        std::fs::write(&path, r#"{"save_intervall": "5s"}"#).unwrap();
        assert!(matches!(
            SettingsFile::load(&path),
            Err(ConfigError::Settings { .. })
        ));
    }
}
