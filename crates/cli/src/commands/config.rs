use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use docgenie_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let database = &config.database;
    let llm = &config.llm;
    let store = &config.knowledge_store;
    let capture = &config.change_capture;

    vec![
        Field::new("database.url", "DOCGENIE_DATABASE_URL", &database.url),
        Field::new(
            "database.max_connections",
            "DOCGENIE_DATABASE_MAX_CONNECTIONS",
            database.max_connections.to_string(),
        ),
        Field::new("llm.provider", "DOCGENIE_LLM_PROVIDER", format!("{:?}", llm.provider)),
        Field::new("llm.model", "DOCGENIE_LLM_MODEL", &llm.model),
        Field::new("llm.base_url", "DOCGENIE_LLM_BASE_URL", unset_or(llm.base_url.as_deref())),
        Field::new("llm.api_key", "DOCGENIE_LLM_API_KEY", redact(llm.api_key.as_ref())),
        Field::new("llm.max_retries", "DOCGENIE_LLM_MAX_RETRIES", llm.max_retries.to_string()),
        Field::new(
            "server.bind_address",
            "DOCGENIE_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Field::new("server.port", "DOCGENIE_SERVER_PORT", config.server.port.to_string()),
        Field::new(
            "knowledge_store.provider",
            "DOCGENIE_KNOWLEDGE_STORE_PROVIDER",
            format!("{:?}", store.provider),
        ),
        Field::new(
            "knowledge_store.index_host",
            "DOCGENIE_KNOWLEDGE_STORE_INDEX_HOST",
            unset_or(store.index_host.as_deref()),
        ),
        Field::new(
            "knowledge_store.api_key",
            "DOCGENIE_KNOWLEDGE_STORE_API_KEY",
            redact(store.api_key.as_ref()),
        ),
        Field::new(
            "knowledge_store.embedding_model",
            "DOCGENIE_KNOWLEDGE_STORE_EMBEDDING_MODEL",
            &store.embedding_model,
        ),
        Field::new(
            "change_capture.enabled",
            "DOCGENIE_CHANGE_CAPTURE_ENABLED",
            capture.enabled.to_string(),
        ),
        Field::new(
            "change_capture.connect_url",
            "DOCGENIE_CHANGE_CAPTURE_CONNECT_URL",
            &capture.connect_url,
        ),
        Field::new("change_capture.bus_url", "DOCGENIE_CHANGE_CAPTURE_BUS_URL", &capture.bus_url),
        Field::new(
            "change_capture.consumer_group",
            "DOCGENIE_CHANGE_CAPTURE_CONSUMER_GROUP",
            &capture.consumer_group,
        ),
        Field::new("logging.level", "DOCGENIE_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "DOCGENIE_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("docgenie.toml"), PathBuf::from("config/docgenie.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

fn unset_or(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value =
            "[knowledge_store]\nindex_host = \"https://idx\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "knowledge_store.index_host"));
        assert!(!contains_path(&doc, "knowledge_store.api_key"));
        assert!(!contains_path(&doc, "llm.model"));
    }

    #[test]
    fn secrets_never_render() {
        let key = SecretString::from("pc-live-123".to_string());
        let blank = SecretString::from("  ".to_string());
        assert_eq!(redact(Some(&key)), "<redacted>");
        assert_eq!(redact(Some(&blank)), "<empty>");
        assert_eq!(redact(None), "<unset>");
    }
}
