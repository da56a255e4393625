use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Sources {
    doc: Option<Value>,
    path: Option<PathBuf>,
}

impl Sources {
    fn detect() -> Self {
        let path = detect_config_path();
        let doc = load_config_file_doc(path.as_deref());
        Self { doc, path }
    }

    fn of(&self, key_path: &str, env_keys: &[&str]) -> String {
        field_source(key_path, env_keys, self.doc.as_ref(), self.path.as_deref())
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let sources = Sources::detect();
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |key: &str, value: &str, env_keys: &[&str]| {
        lines.push(render_line(key, value, sources.of(key, env_keys)));
    };

    push("database.url", &config.database.url, &["SIGNOFF_DATABASE_URL"]);
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
    );

    push("server.bind_address", &config.server.bind_address, &["SIGNOFF_SERVER_BIND_ADDRESS"]);
    push("server.port", &config.server.port.to_string(), &["SIGNOFF_SERVER_PORT"]);
    push(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        &["SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    );
    push(
        "server.gateway_token",
        &redact_token(config.server.gateway_token.expose_secret()),
        &["SIGNOFF_SERVER_GATEWAY_TOKEN"],
    );

    push(
        "engine.max_decision_attempts",
        &config.engine.max_decision_attempts.to_string(),
        &["SIGNOFF_ENGINE_MAX_DECISION_ATTEMPTS"],
    );
    push(
        "engine.overdue_scan_interval_secs",
        &config.engine.overdue_scan_interval_secs.to_string(),
        &["SIGNOFF_ENGINE_OVERDUE_SCAN_INTERVAL_SECS"],
    );
    push(
        "engine.overdue_batch_size",
        &config.engine.overdue_batch_size.to_string(),
        &["SIGNOFF_ENGINE_OVERDUE_BATCH_SIZE"],
    );
    push(
        "engine.list_limit_default",
        &config.engine.list_limit_default.to_string(),
        &["SIGNOFF_ENGINE_LIST_LIMIT_DEFAULT"],
    );
    push(
        "engine.list_limit_max",
        &config.engine.list_limit_max.to_string(),
        &["SIGNOFF_ENGINE_LIST_LIMIT_MAX"],
    );

    push(
        "persistence.transient_retry_attempts",
        &config.persistence.transient_retry_attempts.to_string(),
        &["SIGNOFF_PERSISTENCE_TRANSIENT_RETRY_ATTEMPTS"],
    );
    push(
        "persistence.transient_retry_base_delay_ms",
        &config.persistence.transient_retry_base_delay_ms.to_string(),
        &["SIGNOFF_PERSISTENCE_TRANSIENT_RETRY_BASE_DELAY_MS"],
    );

    for (item_type, reviewers) in &config.reviewers {
        push(&format!("reviewers.{item_type}"), &reviewers.join(", "), &[]);
    }

    push("logging.level", &config.logging.level, &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"]);
    push(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
    );

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("signoff.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/signoff.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

/// Reviewer keys may themselves contain dots, so only the first segment is treated as a table.
fn contains_path(root: &Value, key_path: &str) -> bool {
    let Some((table, key)) = key_path.split_once('.') else {
        return root.get(key_path).is_some();
    };
    root.get(table).and_then(|section| section.get(key)).is_some()
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows only enough of the token to tell two deployments apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
