use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hagglz_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One rendered setting: dotted key, display value, environment variable.
type Setting = (&'static str, String, &'static str);

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in settings(&config) {
        let source =
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        ("database.url", config.database.url.clone(), "HAGGLZ_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "HAGGLZ_DATABASE_MAX_CONNECTIONS",
        ),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "HAGGLZ_DATABASE_TIMEOUT_SECS"),
        ("negotiation.auto_min", config.negotiation.auto_min.to_string(), "HAGGLZ_NEGOTIATION_AUTO_MIN"),
        (
            "negotiation.supervised_min",
            config.negotiation.supervised_min.to_string(),
            "HAGGLZ_NEGOTIATION_SUPERVISED_MIN",
        ),
        (
            "negotiation.classification_weight",
            config.negotiation.classification_weight.to_string(),
            "HAGGLZ_NEGOTIATION_CLASSIFICATION_WEIGHT",
        ),
        (
            "negotiation.retry_attempts",
            config.negotiation.retry_attempts.to_string(),
            "HAGGLZ_NEGOTIATION_RETRY_ATTEMPTS",
        ),
        (
            "negotiation.backoff_base_ms",
            config.negotiation.backoff_base_ms.to_string(),
            "HAGGLZ_NEGOTIATION_BACKOFF_BASE_MS",
        ),
        (
            "negotiation.backoff_max_ms",
            config.negotiation.backoff_max_ms.to_string(),
            "HAGGLZ_NEGOTIATION_BACKOFF_MAX_MS",
        ),
        (
            "negotiation.call_timeout_ms",
            config.negotiation.call_timeout_ms.to_string(),
            "HAGGLZ_NEGOTIATION_CALL_TIMEOUT_MS",
        ),
        (
            "negotiation.retrieval_k",
            config.negotiation.retrieval_k.to_string(),
            "HAGGLZ_NEGOTIATION_RETRIEVAL_K",
        ),
        (
            "memory.embedding_dimensions",
            config.memory.embedding_dimensions.to_string(),
            "HAGGLZ_MEMORY_EMBEDDING_DIMENSIONS",
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), "HAGGLZ_LLM_PROVIDER"),
        ("llm.model", config.llm.model.clone(), "HAGGLZ_LLM_MODEL"),
        ("llm.embedding_model", config.llm.embedding_model.clone(), "HAGGLZ_LLM_EMBEDDING_MODEL"),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "HAGGLZ_LLM_BASE_URL",
        ),
        ("llm.api_key", api_key, "HAGGLZ_LLM_API_KEY"),
        ("server.bind_address", config.server.bind_address.clone(), "HAGGLZ_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "HAGGLZ_SERVER_PORT"),
        ("logging.level", config.logging.level.clone(), "HAGGLZ_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "HAGGLZ_LOGGING_FORMAT"),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a vendor prefix such as `sk-` and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        if prefix.len() <= 4 {
            return format!("{prefix}-***");
        }
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret, render_line};

    #[test]
    fn secrets_keep_only_a_short_prefix() {
        assert_eq!(redact_secret("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_secret("averylongprefix-abcdef"), "<redacted>");
        assert_eq!(redact_secret("plain"), "<redacted>");
        assert_eq!(redact_secret("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc: Value = "[negotiation]\nauto_min = 0.85\n".parse().expect("toml");
        assert!(contains_path(&doc, "negotiation.auto_min"));
        assert!(!contains_path(&doc, "negotiation.supervised_min"));
        assert_eq!(
            render_line("negotiation.auto_min", "0.85", "default".to_string()),
            "- negotiation.auto_min = 0.85 (source: default)"
        );
    }
}
