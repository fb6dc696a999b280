use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eta::DEFAULT_AVERAGE_SPEED_KMH;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Chat transport credentials. The transport stays disabled while `bot_token` is unset.
///
/// With `webhook_url` set the bot is pushed updates on `POST /webhook`, authenticated by
/// `webhook_secret`; without it the server long-polls `getUpdates`.
#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: Option<SecretString>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<SecretString>,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
}

pub const DEFAULT_TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";

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
pub struct AgentConfig {
    /// Session entries replayed into each model call.
    pub history_window: usize,
    /// Session entries kept for display and audit.
    pub history_retention: usize,
    pub average_speed_kmh: f64,
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

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "open_ai",
            Self::Ollama => "ollama",
        }
    }

    /// OpenAI-compatible API root used when `llm.base_url` is not set.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(self) -> bool {
        matches!(self, Self::Groq | Self::OpenAi)
    }
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
    pub telegram_bot_token: Option<String>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://convoy.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: None,
                webhook_url: None,
                webhook_secret: None,
                api_base_url: DEFAULT_TELEGRAM_API_BASE_URL.to_string(),
                poll_timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3-70b-8192".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            agent: AgentConfig {
                history_window: 10,
                history_retention: 200,
                average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
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
            "groq" => Ok(Self::Groq),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected groq|openai|ollama)"
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

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("convoy.toml"));
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

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = Some(secret_value(bot_token));
            }
            if let Some(webhook_url) = telegram.webhook_url {
                self.telegram.webhook_url = Some(webhook_url);
            }
            if let Some(webhook_secret) = telegram.webhook_secret {
                self.telegram.webhook_secret = Some(secret_value(webhook_secret));
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
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

        if let Some(agent) = patch.agent {
            if let Some(history_window) = agent.history_window {
                self.agent.history_window = history_window;
            }
            if let Some(history_retention) = agent.history_retention {
                self.agent.history_retention = history_retention;
            }
            if let Some(average_speed_kmh) = agent.average_speed_kmh {
                self.agent.average_speed_kmh = average_speed_kmh;
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
        if let Some(value) = read_env("CONVOY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONVOY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CONVOY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONVOY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONVOY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONVOY_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONVOY_TELEGRAM_WEBHOOK_URL") {
            self.telegram.webhook_url = Some(value);
        }
        if let Some(value) = read_env("CONVOY_TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONVOY_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("CONVOY_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs = parse_u64("CONVOY_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONVOY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CONVOY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONVOY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CONVOY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONVOY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONVOY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONVOY_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CONVOY_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CONVOY_AGENT_HISTORY_WINDOW") {
            self.agent.history_window = parse_usize("CONVOY_AGENT_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("CONVOY_AGENT_HISTORY_RETENTION") {
            self.agent.history_retention = parse_usize("CONVOY_AGENT_HISTORY_RETENTION", &value)?;
        }
        if let Some(value) = read_env("CONVOY_AGENT_AVERAGE_SPEED_KMH") {
            self.agent.average_speed_kmh = parse_f64("CONVOY_AGENT_AVERAGE_SPEED_KMH", &value)?;
        }

        if let Some(value) = read_env("CONVOY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONVOY_SERVER_PORT") {
            self.server.port = parse_u16("CONVOY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONVOY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONVOY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("CONVOY_LOGGING_LEVEL").or_else(|| read_env("CONVOY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONVOY_LOGGING_FORMAT").or_else(|| read_env("CONVOY_LOG_FORMAT"));
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
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = Some(secret_value(bot_token));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("convoy.toml"), PathBuf::from("config/convoy.toml")]
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

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    if let Some(token) = &telegram.bot_token {
        let token = token.expose_secret();
        let well_formed = token
            .split_once(':')
            .map(|(bot_id, secret)| {
                !bot_id.is_empty()
                    && bot_id.chars().all(|ch| ch.is_ascii_digit())
                    && !secret.trim().is_empty()
            })
            .unwrap_or(false);
        if !well_formed {
            return Err(ConfigError::Validation(
                "telegram.bot_token must look like `<bot id>:<secret>`. Get it from @BotFather > /mybots > API Token".to_string(),
            ));
        }
    }

    if let Some(webhook_url) = &telegram.webhook_url {
        if !webhook_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "telegram.webhook_url must start with https:// (Telegram only delivers to TLS endpoints)"
                    .to_string(),
            ));
        }
        if telegram.bot_token.is_none() {
            return Err(ConfigError::Validation(
                "telegram.webhook_url is set but telegram.bot_token is missing".to_string(),
            ));
        }
        if telegram.webhook_secret.is_none() {
            return Err(ConfigError::Validation(
                "telegram.webhook_url is set but telegram.webhook_secret is missing; \
                 Telegram echoes it in X-Telegram-Bot-Api-Secret-Token"
                    .to_string(),
            ));
        }
    }

    if let Some(secret) = &telegram.webhook_secret {
        let secret = secret.expose_secret();
        let allowed = secret.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if secret.is_empty() || secret.len() > 256 || !allowed {
            return Err(ConfigError::Validation(
                "telegram.webhook_secret must be 1..=256 characters of A-Z, a-z, 0-9, `_` or `-`"
                    .to_string(),
            ));
        }
    }

    if !telegram.api_base_url.starts_with("http://") && !telegram.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "telegram.api_base_url must be an http(s) URL".to_string(),
        ));
    }

    if telegram.poll_timeout_secs == 0 || telegram.poll_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 1..=60".to_string(),
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

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for groq/openai providers (set CONVOY_LLM_API_KEY)"
                    .to_string(),
            ));
        }
    }

    let base_url = llm.effective_base_url();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.history_window == 0 {
        return Err(ConfigError::Validation(
            "agent.history_window must be greater than zero".to_string(),
        ));
    }

    if agent.history_retention < agent.history_window {
        return Err(ConfigError::Validation(format!(
            "agent.history_retention ({}) must be at least agent.history_window ({})",
            agent.history_retention, agent.history_window
        )));
    }

    if !(agent.average_speed_kmh.is_finite() && agent.average_speed_kmh > 0.0) {
        return Err(ConfigError::Validation(
            "agent.average_speed_kmh must be a positive number".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

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

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
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
struct TelegramPatch {
    bot_token: Option<String>,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
    api_base_url: Option<String>,
    poll_timeout_secs: Option<u64>,
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
struct AgentPatch {
    history_window: Option<usize>,
    history_retention: Option<usize>,
    average_speed_kmh: Option<f64>,
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
    fn defaults_validate_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.agent.history_window == 10, "default replay window should be 10")?;
        ensure(config.agent.average_speed_kmh == 60.0, "default speed should be 60 km/h")?;
        ensure(config.telegram.bot_token.is_none(), "chat transport should start disabled")?;
        ensure(
            config.llm.effective_base_url() == "http://localhost:11434/v1",
            "ollama should default to the local endpoint",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CONVOY_GROQ_KEY", "gsk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("convoy.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "groq"
api_key = "${TEST_CONVOY_GROQ_KEY}"

[agent]
history_window = 6
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::Groq, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "gsk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.agent.history_window == 6, "window should come from file")?;
            ensure(
                config.llm.effective_base_url() == "https://api.groq.com/openai/v1",
                "groq should default to its hosted endpoint",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_CONVOY_GROQ_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONVOY_LOG_LEVEL", "warn");
        env::set_var("CONVOY_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CONVOY_LOG_LEVEL", "CONVOY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONVOY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CONVOY_SERVER_PORT", "9100");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("convoy.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 9000

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
            ensure(config.server.port == 9100, "env port should win over file")?;
            Ok(())
        })();

        clear_vars(&["CONVOY_DATABASE_URL", "CONVOY_SERVER_PORT"]);
        result
    }

    #[test]
    fn hosted_provider_without_key_fails_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONVOY_LLM_PROVIDER", "groq");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["CONVOY_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn malformed_bot_token_and_window_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONVOY_TELEGRAM_BOT_TOKEN", "not-a-token");
        let token_error = AppConfig::load(LoadOptions::default());
        clear_vars(&["CONVOY_TELEGRAM_BOT_TOKEN"]);

        ensure(
            matches!(
                token_error,
                Err(ConfigError::Validation(ref message)) if message.contains("telegram.bot_token")
            ),
            "malformed bot token should be rejected",
        )?;

        env::set_var("CONVOY_AGENT_HISTORY_WINDOW", "500");
        let window_error = AppConfig::load(LoadOptions::default());
        clear_vars(&["CONVOY_AGENT_HISTORY_WINDOW"]);

        ensure(
            matches!(
                window_error,
                Err(ConfigError::Validation(ref message)) if message.contains("history_retention")
            ),
            "window larger than retention should be rejected",
        )?;

        env::set_var("CONVOY_AGENT_AVERAGE_SPEED_KMH", "fast");
        let speed_error = AppConfig::load(LoadOptions::default());
        clear_vars(&["CONVOY_AGENT_AVERAGE_SPEED_KMH"]);

        ensure(
            matches!(speed_error, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "CONVOY_AGENT_AVERAGE_SPEED_KMH"),
            "unparseable speed should name the env key",
        )
    }

    #[test]
    fn webhook_requires_a_well_formed_secret() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let vars = [
            "CONVOY_TELEGRAM_BOT_TOKEN",
            "CONVOY_TELEGRAM_WEBHOOK_URL",
            "CONVOY_TELEGRAM_WEBHOOK_SECRET",
        ];

        env::set_var("CONVOY_TELEGRAM_BOT_TOKEN", "123456:bot-secret-value");
        env::set_var("CONVOY_TELEGRAM_WEBHOOK_URL", "https://fleet.example.com/webhook");
        let missing = AppConfig::load(LoadOptions::default());

        env::set_var("CONVOY_TELEGRAM_WEBHOOK_SECRET", "has spaces");
        let malformed = AppConfig::load(LoadOptions::default());

        env::set_var("CONVOY_TELEGRAM_WEBHOOK_SECRET", "fleet_hook-42");
        let accepted = AppConfig::load(LoadOptions::default());
        clear_vars(&vars);

        ensure(
            matches!(missing, Err(ConfigError::Validation(ref message)) if message.contains("webhook_secret is missing")),
            "webhook url without a secret should be rejected",
        )?;
        ensure(
            matches!(malformed, Err(ConfigError::Validation(ref message)) if message.contains("1..=256")),
            "secret outside the allowed charset should be rejected",
        )?;
        let config = accepted.map_err(|err| format!("config load failed: {err}"))?;
        ensure(
            config.telegram.webhook_secret.as_ref().map(|secret| secret.expose_secret().to_owned())
                == Some("fleet_hook-42".to_owned()),
            "secret should be loaded from env",
        )?;
        ensure(
            config.telegram.api_base_url == "https://api.telegram.org",
            "bot api base url should default to telegram",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONVOY_TELEGRAM_BOT_TOKEN", "123456:bot-secret-value");
        env::set_var("CONVOY_LLM_API_KEY", "gsk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("bot-secret-value"), "debug output should not contain bot token")?;
            ensure(!debug.contains("gsk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["CONVOY_TELEGRAM_BOT_TOKEN", "CONVOY_LLM_API_KEY"]);
        result
    }
}
