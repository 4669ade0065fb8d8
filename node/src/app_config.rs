use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use poet_crypto::HashKind;
use poet_prover::{DEFAULT_CHALLENGE_COUNT, MAX_N};
use poet_service::{ServiceConfig, NO_BROADCAST};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

/// Resolved node configuration: file, then `POET_*` environment, then CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // Prover
    pub n: u32,
    pub hash_function: HashKind,
    pub challenge_count: usize,

    // Rounds
    pub round_duration_secs: u64,
    pub data_dir: PathBuf,

    // Broadcasting
    pub broadcast_target: String,
    pub broadcast_timeout_ms: u64,

    // Observability
    pub metrics_enabled: bool,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            n: 3,
            hash_function: HashKind::Sha256,
            challenge_count: DEFAULT_CHALLENGE_COUNT,
            round_duration_secs: 30,
            data_dir: default_data_dir(),
            broadcast_target: NO_BROADCAST.to_string(),
            broadcast_timeout_ms: 3000,
            metrics_enabled: false,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("poet"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("poet").join("poet.toml"))
}

impl AppConfig {
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            default_config_path().filter(|path| path.exists())
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("POET"));
        let config = builder.build()?;

        let defaults = Self::default();
        let hash_function = match get_string_value(&config, &["hash_function", "hash"]) {
            Some(value) => value
                .parse()
                .with_context(|| format!("invalid hash_function '{value}'"))?,
            None => defaults.hash_function,
        };

        Ok(Self {
            config_path: resolved_path,
            n: get_parsed_value(&config, &["n"])?.unwrap_or(defaults.n),
            hash_function,
            challenge_count: get_parsed_value(&config, &["challenge_count"])?
                .unwrap_or(defaults.challenge_count),
            round_duration_secs: get_parsed_value(&config, &["round_duration_secs"])?
                .unwrap_or(defaults.round_duration_secs),
            data_dir: get_string_value(&config, &["data_dir"])
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            broadcast_target: get_string_value(&config, &["broadcast_target"])
                .unwrap_or(defaults.broadcast_target),
            broadcast_timeout_ms: get_parsed_value(&config, &["broadcast_timeout_ms"])?
                .unwrap_or(defaults.broadcast_timeout_ms),
            metrics_enabled: get_bool_value(&config, &["metrics_enabled"], defaults.metrics_enabled),
            log_level: get_string_value(&config, &["log_level"]).unwrap_or(defaults.log_level),
            log_format: get_string_value(&config, &["log_format"]).unwrap_or(defaults.log_format),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 || self.n > MAX_N {
            anyhow::bail!("n must be between 1 and {MAX_N}, got {}", self.n);
        }
        if self.round_duration_secs == 0 {
            anyhow::bail!("round_duration_secs must be greater than zero");
        }
        if self.challenge_count == 0 {
            anyhow::bail!("challenge_count must be greater than zero");
        }
        if self.broadcast_timeout_ms == 0 {
            anyhow::bail!("broadcast_timeout_ms must be greater than zero");
        }
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("data_dir must not be empty");
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "invalid log_level '{}'; expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            );
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            anyhow::bail!(
                "invalid log_format '{}'; expected pretty or json",
                self.log_format
            );
        }
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            n: self.n,
            hash: self.hash_function,
            round_duration: Duration::from_secs(self.round_duration_secs),
            challenge_count: self.challenge_count,
            data_dir: self.data_dir.clone(),
        }
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_parsed_value<T>(config: &Config, keys: &[&str]) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get_string_value(config, keys) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value '{raw}' for {}", keys[0])),
        None => Ok(None),
    }
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

pub fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

pub fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = PathBuf::from(data_dir);
    }
    if let Some(n) = matches.get_one::<u32>("n") {
        config.n = *n;
    }
    if let Some(hash) = matches.get_one::<HashKind>("hash") {
        config.hash_function = *hash;
    }
    if let Some(secs) = matches.get_one::<u64>("round-duration") {
        config.round_duration_secs = *secs;
    }
    if let Some(count) = matches.get_one::<usize>("challenge-count") {
        config.challenge_count = *count;
    }
    if let Some(target) = matches.get_one::<String>("broadcast-target") {
        config.broadcast_target = target.clone();
    }
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }
    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }
    if matches.get_flag("metrics") {
        config.metrics_enabled = true;
    }
}

/// Path of the label store used by a standalone `prove` run.
pub fn standalone_label_path(data_dir: &Path, statement_hex: &str) -> PathBuf {
    data_dir
        .join("labels")
        .join(format!("standalone-{statement_hex}.labels"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poet.toml");
        fs::write(
            &path,
            r#"
n = 12
hash_function = "blake3"
round_duration_secs = 5
challenge_count = 40
data_dir = "/tmp/poet-test"
broadcast_target = "http://127.0.0.1:9999/proofs"
log_format = "json"
metrics_enabled = true
"#,
        )
        .unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();
        assert_eq!(config.n, 12);
        assert_eq!(config.hash_function, HashKind::Blake3);
        assert_eq!(config.round_duration_secs, 5);
        assert_eq!(config.challenge_count, 40);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/poet-test"));
        assert_eq!(config.broadcast_target, "http://127.0.0.1:9999/proofs");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "json");
        assert!(config.metrics_enabled);
        config.validate().unwrap();

        let service = config.service_config();
        assert_eq!(service.round_duration, Duration::from_secs(5));
        assert_eq!(service.n, 12);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn unknown_hash_function_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poet.toml");
        fs::write(&path, "hash_function = \"md5\"\n").unwrap();
        assert!(AppConfig::load(path.to_str()).is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            AppConfig {
                n: 0,
                ..Default::default()
            },
            AppConfig {
                n: MAX_N + 1,
                ..Default::default()
            },
            AppConfig {
                round_duration_secs: 0,
                ..Default::default()
            },
            AppConfig {
                log_level: "verbose".into(),
                ..Default::default()
            },
            AppConfig {
                log_format: "xml".into(),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
        AppConfig::default().validate().unwrap();
    }
}
