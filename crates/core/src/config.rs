use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::confidence::{BlendWeights, ConfidenceThresholds};
use crate::reliability::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "hagglz.toml";
pub const NESTED_CONFIG_FILE: &str = "config/hagglz.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub negotiation: NegotiationConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NegotiationConfig {
    pub auto_min: f64,
    pub supervised_min: f64,
    pub classification_weight: f64,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub call_timeout_ms: u64,
    pub retrieval_k: usize,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub embedding_dimensions: usize,
    pub feedback_max_conflict_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// `local` runs the keyword classifier and hashing embedder in-process;
/// `http` talks to an OpenAI-compatible endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Local,
    Http,
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
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub auto_min: Option<f64>,
    pub supervised_min: Option<f64>,
    pub server_port: Option<u16>,
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

/// Immutable policy the orchestrator runs with, derived once from `AppConfig`.
#[derive(Clone, Debug, PartialEq)]
pub struct NegotiationSettings {
    pub thresholds: ConfidenceThresholds,
    pub weights: BlendWeights,
    pub retry: RetryPolicy,
    pub retrieval_k: usize,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            thresholds: ConfidenceThresholds::default(),
            weights: BlendWeights::default(),
            retry: RetryPolicy::default(),
            retrieval_k: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://hagglz.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            negotiation: NegotiationConfig {
                auto_min: ConfidenceThresholds::DEFAULT_AUTO_MIN,
                supervised_min: ConfidenceThresholds::DEFAULT_SUPERVISED_MIN,
                classification_weight: BlendWeights::DEFAULT_CLASSIFICATION_WEIGHT,
                retry_attempts: 3,
                backoff_base_ms: 200,
                backoff_max_ms: 5_000,
                call_timeout_ms: 10_000,
                retrieval_k: 5,
            },
            memory: MemoryConfig { embedding_dimensions: 256, feedback_max_conflict_retries: 16 },
            llm: LlmConfig {
                provider: LlmProvider::Local,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected local|http)"
            ))),
        }
    }
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn negotiation_settings(&self) -> Result<NegotiationSettings, ConfigError> {
        let negotiation = &self.negotiation;
        let thresholds =
            ConfidenceThresholds::new(negotiation.auto_min, negotiation.supervised_min)
                .map_err(|error| ConfigError::Validation(error.to_string()))?;
        let weights = BlendWeights::new(negotiation.classification_weight)
            .map_err(|error| ConfigError::Validation(error.to_string()))?;

        Ok(NegotiationSettings {
            thresholds,
            weights,
            retry: RetryPolicy {
                attempts: negotiation.retry_attempts,
                backoff_base: Duration::from_millis(negotiation.backoff_base_ms),
                backoff_max: Duration::from_millis(negotiation.backoff_max_ms),
                call_timeout: Duration::from_millis(negotiation.call_timeout_ms),
            },
            retrieval_k: negotiation.retrieval_k,
        })
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

        if let Some(negotiation) = patch.negotiation {
            let target = &mut self.negotiation;
            if let Some(auto_min) = negotiation.auto_min {
                target.auto_min = auto_min;
            }
            if let Some(supervised_min) = negotiation.supervised_min {
                target.supervised_min = supervised_min;
            }
            if let Some(weight) = negotiation.classification_weight {
                target.classification_weight = weight;
            }
            if let Some(retry_attempts) = negotiation.retry_attempts {
                target.retry_attempts = retry_attempts;
            }
            if let Some(backoff_base_ms) = negotiation.backoff_base_ms {
                target.backoff_base_ms = backoff_base_ms;
            }
            if let Some(backoff_max_ms) = negotiation.backoff_max_ms {
                target.backoff_max_ms = backoff_max_ms;
            }
            if let Some(call_timeout_ms) = negotiation.call_timeout_ms {
                target.call_timeout_ms = call_timeout_ms;
            }
            if let Some(retrieval_k) = negotiation.retrieval_k {
                target.retrieval_k = retrieval_k;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(dimensions) = memory.embedding_dimensions {
                self.memory.embedding_dimensions = dimensions;
            }
            if let Some(retries) = memory.feedback_max_conflict_retries {
                self.memory.feedback_max_conflict_retries = retries;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
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
        if let Some(value) = read_env("HAGGLZ_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HAGGLZ_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("HAGGLZ_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("HAGGLZ_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_AUTO_MIN") {
            self.negotiation.auto_min = parse_env("HAGGLZ_NEGOTIATION_AUTO_MIN", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_SUPERVISED_MIN") {
            self.negotiation.supervised_min =
                parse_env("HAGGLZ_NEGOTIATION_SUPERVISED_MIN", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_CLASSIFICATION_WEIGHT") {
            self.negotiation.classification_weight =
                parse_env("HAGGLZ_NEGOTIATION_CLASSIFICATION_WEIGHT", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_RETRY_ATTEMPTS") {
            self.negotiation.retry_attempts =
                parse_env("HAGGLZ_NEGOTIATION_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_BACKOFF_BASE_MS") {
            self.negotiation.backoff_base_ms =
                parse_env("HAGGLZ_NEGOTIATION_BACKOFF_BASE_MS", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_BACKOFF_MAX_MS") {
            self.negotiation.backoff_max_ms =
                parse_env("HAGGLZ_NEGOTIATION_BACKOFF_MAX_MS", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_CALL_TIMEOUT_MS") {
            self.negotiation.call_timeout_ms =
                parse_env("HAGGLZ_NEGOTIATION_CALL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_NEGOTIATION_RETRIEVAL_K") {
            self.negotiation.retrieval_k = parse_env("HAGGLZ_NEGOTIATION_RETRIEVAL_K", &value)?;
        }

        if let Some(value) = read_env("HAGGLZ_MEMORY_EMBEDDING_DIMENSIONS") {
            self.memory.embedding_dimensions =
                parse_env("HAGGLZ_MEMORY_EMBEDDING_DIMENSIONS", &value)?;
        }

        if let Some(value) = read_env("HAGGLZ_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HAGGLZ_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HAGGLZ_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("HAGGLZ_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("HAGGLZ_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = value;
        }
        if let Some(value) = read_env("HAGGLZ_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("HAGGLZ_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAGGLZ_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HAGGLZ_SERVER_PORT") {
            self.server.port = parse_env("HAGGLZ_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HAGGLZ_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("HAGGLZ_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("HAGGLZ_LOGGING_LEVEL").or_else(|| read_env("HAGGLZ_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HAGGLZ_LOGGING_FORMAT").or_else(|| read_env("HAGGLZ_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(auto_min) = overrides.auto_min {
            self.negotiation.auto_min = auto_min;
        }
        if let Some(supervised_min) = overrides.supervised_min {
            self.negotiation.supervised_min = supervised_min;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_negotiation(&self.negotiation)?;
        validate_memory(&self.memory)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(CONFIG_FILE_NAME), PathBuf::from(NESTED_CONFIG_FILE)]
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

fn validate_negotiation(negotiation: &NegotiationConfig) -> Result<(), ConfigError> {
    ConfidenceThresholds::new(negotiation.auto_min, negotiation.supervised_min)
        .map_err(|_| {
            ConfigError::Validation(
                "negotiation thresholds must satisfy 0 <= supervised_min <= auto_min <= 1"
                    .to_string(),
            )
        })?;
    BlendWeights::new(negotiation.classification_weight).map_err(|_| {
        ConfigError::Validation(
            "negotiation.classification_weight must be in range 0.0..=1.0".to_string(),
        )
    })?;

    if negotiation.retry_attempts == 0 || negotiation.retry_attempts > 10 {
        return Err(ConfigError::Validation(
            "negotiation.retry_attempts must be in range 1..=10".to_string(),
        ));
    }
    if negotiation.backoff_base_ms > negotiation.backoff_max_ms {
        return Err(ConfigError::Validation(
            "negotiation.backoff_base_ms must not exceed negotiation.backoff_max_ms".to_string(),
        ));
    }
    if negotiation.call_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "negotiation.call_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if negotiation.retrieval_k == 0 {
        return Err(ConfigError::Validation(
            "negotiation.retrieval_k must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if memory.embedding_dimensions == 0 || memory.embedding_dimensions > 8_192 {
        return Err(ConfigError::Validation(
            "memory.embedding_dimensions must be in range 1..=8192".to_string(),
        ));
    }
    if memory.feedback_max_conflict_retries == 0 {
        return Err(ConfigError::Validation(
            "memory.feedback_max_conflict_retries must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.provider == LlmProvider::Http {
        let base_url = llm.base_url.as_deref().map(str::trim).unwrap_or_default();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must be an http(s) URL for the http provider".to_string(),
            ));
        }
        let missing_key = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the http provider".to_string(),
            ));
        }
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

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    negotiation: Option<NegotiationPatch>,
    memory: Option<MemoryPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NegotiationPatch {
    auto_min: Option<f64>,
    supervised_min: Option<f64>,
    classification_weight: Option<f64>,
    retry_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
    retrieval_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    embedding_dimensions: Option<usize>,
    feedback_max_conflict_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
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
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

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
    fn defaults_produce_documented_negotiation_settings() -> Result<(), String> {
        let settings = AppConfig::default()
            .negotiation_settings()
            .map_err(|err| format!("settings failed: {err}"))?;

        ensure(settings.thresholds.auto_min() == 0.8, "auto_min default is 0.8")?;
        ensure(settings.thresholds.supervised_min() == 0.5, "supervised_min default is 0.5")?;
        ensure(settings.retry.attempts == 3, "three attempts by default")?;
        ensure(settings.retry.backoff_base == Duration::from_millis(200), "200ms backoff base")?;
        ensure(settings.retrieval_k == 5, "top five retrieval by default")?;
        ensure(
            (settings.weights.classification_weight() - 0.4).abs() < f64::EPSILON,
            "classification weighted 0.4",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_HAGGLZ_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("hagglz.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "http"
base_url = "https://llm.internal.example"
api_key = "${TEST_HAGGLZ_LLM_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::Http, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_HAGGLZ_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLZ_LOG_LEVEL", "warn");
        env::set_var("HAGGLZ_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["HAGGLZ_LOG_LEVEL", "HAGGLZ_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLZ_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("HAGGLZ_NEGOTIATION_RETRY_ATTEMPTS", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("hagglz.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[negotiation]
auto_min = 0.9
supervised_min = 0.6
retry_attempts = 2

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
            ensure(config.negotiation.retry_attempts == 5, "env retry attempts should beat file")?;
            ensure(config.negotiation.auto_min == 0.9, "file auto_min should beat default")?;
            ensure(config.negotiation.supervised_min == 0.6, "file supervised_min applies")
        })();

        clear_vars(&["HAGGLZ_DATABASE_URL", "HAGGLZ_NEGOTIATION_RETRY_ATTEMPTS"]);
        result
    }

    #[test]
    fn inverted_thresholds_fail_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                auto_min: Some(0.4),
                supervised_min: Some(0.7),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };

        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("supervised_min")),
            "validation failure should mention the threshold invariant",
        )
    }

    #[test]
    fn invalid_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLZ_NEGOTIATION_RETRIEVAL_K", "many");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "HAGGLZ_NEGOTIATION_RETRIEVAL_K",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override failure".to_string()),
        };

        clear_vars(&["HAGGLZ_NEGOTIATION_RETRIEVAL_K"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLZ_LLM_PROVIDER", "http");
        env::set_var("HAGGLZ_LLM_BASE_URL", "https://llm.internal.example");
        env::set_var("HAGGLZ_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["HAGGLZ_LLM_PROVIDER", "HAGGLZ_LLM_BASE_URL", "HAGGLZ_LLM_API_KEY"]);
        result
    }

    #[test]
    fn http_provider_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAGGLZ_LLM_PROVIDER", "http");
        env::set_var("HAGGLZ_LLM_BASE_URL", "https://llm.internal.example");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => {
                ensure(message.contains("llm.api_key"), "error should mention llm.api_key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected validation failure".to_string()),
        };

        clear_vars(&["HAGGLZ_LLM_PROVIDER", "HAGGLZ_LLM_BASE_URL"]);
        result
    }
}
