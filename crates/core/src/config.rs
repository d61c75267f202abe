use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::knowledge::{DEFAULT_EMBED_BATCH_SIZE, DEFAULT_SEARCH_TOP_K, DEFAULT_UPSERT_BATCH_SIZE};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub knowledge_store: KnowledgeStoreConfig,
    pub change_capture: ChangeCaptureConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct KnowledgeStoreConfig {
    pub provider: KnowledgeProvider,
    pub api_key: Option<SecretString>,
    pub index_host: Option<String>,
    pub embed_url: String,
    pub embedding_model: String,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    pub search_top_k: usize,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChangeCaptureConfig {
    pub enabled: bool,
    pub connect_url: String,
    pub bus_url: String,
    pub consumer_group: String,
    pub poll_timeout_ms: u64,
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeProvider {
    Memory,
    Pinecone,
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
    pub server_port: Option<u16>,
    pub knowledge_provider: Option<KnowledgeProvider>,
    pub change_capture_enabled: Option<bool>,
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
                url: "sqlite://docgenie.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8888,
                graceful_shutdown_secs: 15,
            },
            knowledge_store: KnowledgeStoreConfig {
                provider: KnowledgeProvider::Memory,
                api_key: None,
                index_host: None,
                embed_url: "https://api.pinecone.io/embed".to_string(),
                embedding_model: "multilingual-e5-large".to_string(),
                embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
                upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
                search_top_k: DEFAULT_SEARCH_TOP_K,
                timeout_secs: 30,
            },
            change_capture: ChangeCaptureConfig {
                enabled: true,
                connect_url: "http://connect:8083".to_string(),
                bus_url: "http://kafka-rest:8082".to_string(),
                consumer_group: "database-change-monitor".to_string(),
                poll_timeout_ms: 1_000,
                shutdown_timeout_secs: 5,
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
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for KnowledgeProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "pinecone" => Ok(Self::Pinecone),
            other => Err(ConfigError::Validation(format!(
                "unsupported knowledge store provider `{other}` (expected memory|pinecone)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("docgenie.toml"));
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
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
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

        if let Some(store) = patch.knowledge_store {
            if let Some(provider) = store.provider {
                self.knowledge_store.provider = provider;
            }
            if let Some(api_key) = store.api_key {
                self.knowledge_store.api_key = Some(secret_value(api_key));
            }
            if let Some(index_host) = store.index_host {
                self.knowledge_store.index_host = Some(index_host);
            }
            if let Some(embed_url) = store.embed_url {
                self.knowledge_store.embed_url = embed_url;
            }
            if let Some(embedding_model) = store.embedding_model {
                self.knowledge_store.embedding_model = embedding_model;
            }
            if let Some(embed_batch_size) = store.embed_batch_size {
                self.knowledge_store.embed_batch_size = embed_batch_size;
            }
            if let Some(upsert_batch_size) = store.upsert_batch_size {
                self.knowledge_store.upsert_batch_size = upsert_batch_size;
            }
            if let Some(search_top_k) = store.search_top_k {
                self.knowledge_store.search_top_k = search_top_k;
            }
            if let Some(timeout_secs) = store.timeout_secs {
                self.knowledge_store.timeout_secs = timeout_secs;
            }
        }

        if let Some(capture) = patch.change_capture {
            if let Some(enabled) = capture.enabled {
                self.change_capture.enabled = enabled;
            }
            if let Some(connect_url) = capture.connect_url {
                self.change_capture.connect_url = connect_url;
            }
            if let Some(bus_url) = capture.bus_url {
                self.change_capture.bus_url = bus_url;
            }
            if let Some(consumer_group) = capture.consumer_group {
                self.change_capture.consumer_group = consumer_group;
            }
            if let Some(poll_timeout_ms) = capture.poll_timeout_ms {
                self.change_capture.poll_timeout_ms = poll_timeout_ms;
            }
            if let Some(shutdown_timeout_secs) = capture.shutdown_timeout_secs {
                self.change_capture.shutdown_timeout_secs = shutdown_timeout_secs;
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
        if let Some(value) = read_env("DOCGENIE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DOCGENIE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("DOCGENIE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DOCGENIE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("DOCGENIE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DOCGENIE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("DOCGENIE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("DOCGENIE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("DOCGENIE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("DOCGENIE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("DOCGENIE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DOCGENIE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("DOCGENIE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("DOCGENIE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DOCGENIE_SERVER_PORT") {
            self.server.port = parse_u16("DOCGENIE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DOCGENIE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("DOCGENIE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("DOCGENIE_KNOWLEDGE_STORE_PROVIDER") {
            self.knowledge_store.provider = value.parse()?;
        }
        if let Some(value) = read_env("DOCGENIE_KNOWLEDGE_STORE_API_KEY") {
            self.knowledge_store.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("DOCGENIE_KNOWLEDGE_STORE_INDEX_HOST") {
            self.knowledge_store.index_host = Some(value);
        }
        if let Some(value) = read_env("DOCGENIE_KNOWLEDGE_STORE_EMBED_URL") {
            self.knowledge_store.embed_url = value;
        }
        if let Some(value) = read_env("DOCGENIE_KNOWLEDGE_STORE_EMBEDDING_MODEL") {
            self.knowledge_store.embedding_model = value;
        }
        if let Some(value) = read_env("DOCGENIE_KNOWLEDGE_STORE_SEARCH_TOP_K") {
            self.knowledge_store.search_top_k =
                parse_usize("DOCGENIE_KNOWLEDGE_STORE_SEARCH_TOP_K", &value)?;
        }

        if let Some(value) = read_env("DOCGENIE_CHANGE_CAPTURE_ENABLED") {
            self.change_capture.enabled = parse_bool("DOCGENIE_CHANGE_CAPTURE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("DOCGENIE_CHANGE_CAPTURE_CONNECT_URL") {
            self.change_capture.connect_url = value;
        }
        if let Some(value) = read_env("DOCGENIE_CHANGE_CAPTURE_BUS_URL") {
            self.change_capture.bus_url = value;
        }
        if let Some(value) = read_env("DOCGENIE_CHANGE_CAPTURE_CONSUMER_GROUP") {
            self.change_capture.consumer_group = value;
        }

        let log_level =
            read_env("DOCGENIE_LOGGING_LEVEL").or_else(|| read_env("DOCGENIE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DOCGENIE_LOGGING_FORMAT").or_else(|| read_env("DOCGENIE_LOG_FORMAT"));
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
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(provider) = overrides.knowledge_provider {
            self.knowledge_store.provider = provider;
        }
        if let Some(enabled) = overrides.change_capture_enabled {
            self.change_capture.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_knowledge_store(&self.knowledge_store)?;
        validate_change_capture(&self.change_capture)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("docgenie.toml"), PathBuf::from("config/docgenie.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
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

fn validate_knowledge_store(store: &KnowledgeStoreConfig) -> Result<(), ConfigError> {
    if store.embed_batch_size == 0 || store.upsert_batch_size == 0 || store.search_top_k == 0 {
        return Err(ConfigError::Validation(
            "knowledge_store batch sizes and search_top_k must be greater than zero".to_string(),
        ));
    }

    if store.provider == KnowledgeProvider::Pinecone {
        let missing_key = store
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "knowledge_store.api_key is required for the pinecone provider".to_string(),
            ));
        }
        match &store.index_host {
            Some(host) if is_http_url(host) => {}
            _ => {
                return Err(ConfigError::Validation(
                    "knowledge_store.index_host must be an http(s) URL for the pinecone provider"
                        .to_string(),
                ))
            }
        }
        if !is_http_url(&store.embed_url) {
            return Err(ConfigError::Validation(
                "knowledge_store.embed_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_change_capture(capture: &ChangeCaptureConfig) -> Result<(), ConfigError> {
    if !capture.enabled {
        return Ok(());
    }

    if !is_http_url(&capture.connect_url) || !is_http_url(&capture.bus_url) {
        return Err(ConfigError::Validation(
            "change_capture connect_url and bus_url must start with http:// or https://"
                .to_string(),
        ));
    }

    if capture.consumer_group.trim().is_empty() {
        return Err(ConfigError::Validation(
            "change_capture.consumer_group must not be empty".to_string(),
        ));
    }

    if capture.poll_timeout_ms == 0 || capture.poll_timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "change_capture.poll_timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if capture.shutdown_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "change_capture.shutdown_timeout_secs must be greater than zero".to_string(),
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    knowledge_store: Option<KnowledgeStorePatch>,
    change_capture: Option<ChangeCapturePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeStorePatch {
    provider: Option<KnowledgeProvider>,
    api_key: Option<String>,
    index_host: Option<String>,
    embed_url: Option<String>,
    embedding_model: Option<String>,
    embed_batch_size: Option<usize>,
    upsert_batch_size: Option<usize>,
    search_top_k: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeCapturePatch {
    enabled: Option<bool>,
    connect_url: Option<String>,
    bus_url: Option<String>,
    consumer_group: Option<String>,
    poll_timeout_ms: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
