use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub persistence: PersistenceConfig,
    pub reviewers: BTreeMap<String, Vec<String>>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub gateway_token: SecretString,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_decision_attempts: u32,
    pub overdue_scan_interval_secs: u64,
    pub overdue_batch_size: u32,
    pub list_limit_default: u32,
    pub list_limit_max: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub transient_retry_attempts: u32,
    pub transient_retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub gateway_token: Option<String>,
    pub max_decision_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://signoff.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                gateway_token: String::new().into(),
            },
            engine: EngineConfig::default(),
            persistence: PersistenceConfig::default(),
            reviewers: BTreeMap::new(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_decision_attempts: 3,
            overdue_scan_interval_secs: 60,
            overdue_batch_size: 500,
            list_limit_default: 100,
            list_limit_max: 500,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { transient_retry_attempts: 3, transient_retry_base_delay_ms: 50 }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("signoff.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(gateway_token_value) = server.gateway_token {
                self.server.gateway_token = secret_value(gateway_token_value);
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_decision_attempts) = engine.max_decision_attempts {
                self.engine.max_decision_attempts = max_decision_attempts;
            }
            if let Some(overdue_scan_interval_secs) = engine.overdue_scan_interval_secs {
                self.engine.overdue_scan_interval_secs = overdue_scan_interval_secs;
            }
            if let Some(overdue_batch_size) = engine.overdue_batch_size {
                self.engine.overdue_batch_size = overdue_batch_size;
            }
            if let Some(list_limit_default) = engine.list_limit_default {
                self.engine.list_limit_default = list_limit_default;
            }
            if let Some(list_limit_max) = engine.list_limit_max {
                self.engine.list_limit_max = list_limit_max;
            }
        }

        if let Some(persistence) = patch.persistence {
            if let Some(attempts) = persistence.transient_retry_attempts {
                self.persistence.transient_retry_attempts = attempts;
            }
            if let Some(delay) = persistence.transient_retry_base_delay_ms {
                self.persistence.transient_retry_base_delay_ms = delay;
            }
        }

        if let Some(reviewers) = patch.reviewers {
            self.reviewers = reviewers;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SIGNOFF_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SIGNOFF_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SIGNOFF_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_PORT") {
            self.server.port = parse_u16("SIGNOFF_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_SERVER_GATEWAY_TOKEN") {
            self.server.gateway_token = secret_value(value);
        }

        if let Some(value) = read_env("SIGNOFF_ENGINE_MAX_DECISION_ATTEMPTS") {
            self.engine.max_decision_attempts =
                parse_u32("SIGNOFF_ENGINE_MAX_DECISION_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_ENGINE_OVERDUE_SCAN_INTERVAL_SECS") {
            self.engine.overdue_scan_interval_secs =
                parse_u64("SIGNOFF_ENGINE_OVERDUE_SCAN_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_ENGINE_OVERDUE_BATCH_SIZE") {
            self.engine.overdue_batch_size =
                parse_u32("SIGNOFF_ENGINE_OVERDUE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_ENGINE_LIST_LIMIT_DEFAULT") {
            self.engine.list_limit_default =
                parse_u32("SIGNOFF_ENGINE_LIST_LIMIT_DEFAULT", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_ENGINE_LIST_LIMIT_MAX") {
            self.engine.list_limit_max = parse_u32("SIGNOFF_ENGINE_LIST_LIMIT_MAX", &value)?;
        }

        if let Some(value) = read_env("SIGNOFF_PERSISTENCE_TRANSIENT_RETRY_ATTEMPTS") {
            self.persistence.transient_retry_attempts =
                parse_u32("SIGNOFF_PERSISTENCE_TRANSIENT_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SIGNOFF_PERSISTENCE_TRANSIENT_RETRY_BASE_DELAY_MS") {
            self.persistence.transient_retry_base_delay_ms =
                parse_u64("SIGNOFF_PERSISTENCE_TRANSIENT_RETRY_BASE_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("SIGNOFF_LOGGING_LEVEL").or_else(|| read_env("SIGNOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SIGNOFF_LOGGING_FORMAT").or_else(|| read_env("SIGNOFF_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(gateway_token) = overrides.gateway_token {
            self.server.gateway_token = secret_value(gateway_token);
        }
        if let Some(max_decision_attempts) = overrides.max_decision_attempts {
            self.engine.max_decision_attempts = max_decision_attempts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_engine(&self.engine)?;
        validate_persistence(&self.persistence)?;
        validate_reviewers(&self.reviewers)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.gateway_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.gateway_token is required. Set it to the shared secret your API gateway sends \
             in `x-signoff-gateway-token` (or export SIGNOFF_SERVER_GATEWAY_TOKEN)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if !(1..=10).contains(&engine.max_decision_attempts) {
        return Err(ConfigError::Validation(
            "engine.max_decision_attempts must be in range 1..=10".to_string(),
        ));
    }

    if engine.overdue_scan_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.overdue_scan_interval_secs must be greater than zero".to_string(),
        ));
    }

    if engine.overdue_batch_size == 0 {
        return Err(ConfigError::Validation(
            "engine.overdue_batch_size must be greater than zero".to_string(),
        ));
    }

    if engine.list_limit_default == 0 || engine.list_limit_default > engine.list_limit_max {
        return Err(ConfigError::Validation(format!(
            "engine.list_limit_default must be in range 1..={} (engine.list_limit_max)",
            engine.list_limit_max
        )));
    }

    Ok(())
}

fn validate_persistence(persistence: &PersistenceConfig) -> Result<(), ConfigError> {
    if persistence.transient_retry_attempts == 0 {
        return Err(ConfigError::Validation(
            "persistence.transient_retry_attempts must be greater than zero (1 disables retries)"
                .to_string(),
        ));
    }

    if persistence.transient_retry_base_delay_ms > 10_000 {
        return Err(ConfigError::Validation(
            "persistence.transient_retry_base_delay_ms must be at most 10000".to_string(),
        ));
    }

    Ok(())
}

fn validate_reviewers(reviewers: &BTreeMap<String, Vec<String>>) -> Result<(), ConfigError> {
    for (item_type, ids) in reviewers {
        if item_type.trim().is_empty() {
            return Err(ConfigError::Validation(
                "reviewers keys must be item types or `*`".to_string(),
            ));
        }
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "reviewers.{item_type} contains a blank reviewer id"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    engine: Option<EnginePatch>,
    persistence: Option<PersistencePatch>,
    reviewers: Option<BTreeMap<String, Vec<String>>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    gateway_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_decision_attempts: Option<u32>,
    overdue_scan_interval_secs: Option<u64>,
    overdue_batch_size: Option<u32>,
    list_limit_default: Option<u32>,
    list_limit_max: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PersistencePatch {
    transient_retry_attempts: Option<u32>,
    transient_retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SIGNOFF_GATEWAY_TOKEN", "gw-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("signoff.toml");
            fs::write(
                &path,
                r#"
[server]
gateway_token = "${TEST_SIGNOFF_GATEWAY_TOKEN}"

[reviewers]
invoice = ["finance-lead", "controller"]
"*" = ["ops-oncall"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.server.gateway_token.expose_secret() == "gw-from-env",
                "gateway token should be loaded from environment",
            )?;
            ensure(
                config.reviewers.get("invoice").map(Vec::len) == Some(2),
                "reviewer table should be read from file",
            )?;
            ensure(config.reviewers.contains_key("*"), "wildcard reviewers should be kept")?;
            Ok(())
        })();

        clear_vars(&["TEST_SIGNOFF_GATEWAY_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIGNOFF_SERVER_GATEWAY_TOKEN", "gw-test");
        env::set_var("SIGNOFF_LOG_LEVEL", "warn");
        env::set_var("SIGNOFF_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["SIGNOFF_SERVER_GATEWAY_TOKEN", "SIGNOFF_LOG_LEVEL", "SIGNOFF_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIGNOFF_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SIGNOFF_SERVER_GATEWAY_TOKEN", "gw-from-env");
        env::set_var("SIGNOFF_ENGINE_MAX_DECISION_ATTEMPTS", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("signoff.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
gateway_token = "gw-from-file"
port = 9090

[engine]
max_decision_attempts = 2
overdue_scan_interval_secs = 30

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.server.gateway_token.expose_secret() == "gw-from-env",
                "env gateway token should win over file and defaults",
            )?;
            ensure(config.server.port == 9090, "file port should win over default")?;
            ensure(
                config.engine.max_decision_attempts == 5,
                "env attempts should win over file",
            )?;
            ensure(
                config.engine.overdue_scan_interval_secs == 30,
                "file scan interval should win over default",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "SIGNOFF_DATABASE_URL",
            "SIGNOFF_SERVER_GATEWAY_TOKEN",
            "SIGNOFF_ENGINE_MAX_DECISION_ATTEMPTS",
        ]);
        result
    }

    #[test]
    fn missing_gateway_token_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("server.gateway_token")
            );
            ensure(has_message, "validation failure should mention server.gateway_token")
        })();

        result
    }

    #[test]
    fn engine_bounds_are_validated() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIGNOFF_SERVER_GATEWAY_TOKEN", "gw-test");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    max_decision_attempts: Some(11),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .err()
            .ok_or_else(|| "11 attempts should be rejected".to_string())?;
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message)
                        if message.contains("engine.max_decision_attempts")
                ),
                "validation failure should mention engine.max_decision_attempts",
            )?;

            env::set_var("SIGNOFF_ENGINE_OVERDUE_SCAN_INTERVAL_SECS", "soon");
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "non-numeric interval should be rejected".to_string())?;
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { .. }),
                "bad numeric env values should report the offending key",
            )
        })();

        clear_vars(&["SIGNOFF_SERVER_GATEWAY_TOKEN", "SIGNOFF_ENGINE_OVERDUE_SCAN_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIGNOFF_SERVER_GATEWAY_TOKEN", "gw-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("gw-secret-value"),
                "debug output should not contain the gateway token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(config.engine.max_decision_attempts == 3, "default attempts should be 3")?;
            Ok(())
        })();

        clear_vars(&["SIGNOFF_SERVER_GATEWAY_TOKEN"]);
        result
    }
}
