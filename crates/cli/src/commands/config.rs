use std::env;
use std::fs;
use std::path::Path;

use convoy_core::config::{resolve_config_path, AppConfig};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    match load_config("config") {
        Ok(config) => CommandResult::success("config", render(&config)),
        Err(failure) => failure,
    }
}

/// One line per effective setting with the layer it came from. Secrets never appear in clear.
pub fn render(config: &AppConfig) -> String {
    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let bot_token = config
        .telegram
        .bot_token
        .as_ref()
        .map(|token| redact_bot_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: String, env_keys: &[&str]| {
        lines.push(render_line(key, &value, source(key, env_keys)));
    };

    push("database.url", config.database.url.clone(), &["CONVOY_DATABASE_URL"]);
    push(
        "database.max_connections",
        config.database.max_connections.to_string(),
        &["CONVOY_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        &["CONVOY_DATABASE_TIMEOUT_SECS"],
    );
    push("telegram.bot_token", bot_token, &["CONVOY_TELEGRAM_BOT_TOKEN"]);
    push(
        "telegram.webhook_url",
        config.telegram.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        &["CONVOY_TELEGRAM_WEBHOOK_URL"],
    );
    let webhook_secret =
        if config.telegram.webhook_secret.is_some() { "<redacted>" } else { "<unset>" };
    push("telegram.webhook_secret", webhook_secret.to_string(), &["CONVOY_TELEGRAM_WEBHOOK_SECRET"]);
    push(
        "telegram.api_base_url",
        config.telegram.api_base_url.clone(),
        &["CONVOY_TELEGRAM_API_BASE_URL"],
    );
    push(
        "telegram.poll_timeout_secs",
        config.telegram.poll_timeout_secs.to_string(),
        &["CONVOY_TELEGRAM_POLL_TIMEOUT_SECS"],
    );
    push("llm.provider", config.llm.provider.as_str().to_string(), &["CONVOY_LLM_PROVIDER"]);
    push("llm.model", config.llm.model.clone(), &["CONVOY_LLM_MODEL"]);
    push("llm.base_url", config.llm.effective_base_url().to_string(), &["CONVOY_LLM_BASE_URL"]);
    push("llm.api_key", llm_api_key.to_string(), &["CONVOY_LLM_API_KEY"]);
    push("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["CONVOY_LLM_TIMEOUT_SECS"]);
    push("llm.max_retries", config.llm.max_retries.to_string(), &["CONVOY_LLM_MAX_RETRIES"]);
    push(
        "agent.history_window",
        config.agent.history_window.to_string(),
        &["CONVOY_AGENT_HISTORY_WINDOW"],
    );
    push(
        "agent.history_retention",
        config.agent.history_retention.to_string(),
        &["CONVOY_AGENT_HISTORY_RETENTION"],
    );
    push(
        "agent.average_speed_kmh",
        config.agent.average_speed_kmh.to_string(),
        &["CONVOY_AGENT_AVERAGE_SPEED_KMH"],
    );
    push(
        "server.bind_address",
        config.server.bind_address.clone(),
        &["CONVOY_SERVER_BIND_ADDRESS"],
    );
    push("server.port", config.server.port.to_string(), &["CONVOY_SERVER_PORT"]);
    push(
        "server.graceful_shutdown_secs",
        config.server.graceful_shutdown_secs.to_string(),
        &["CONVOY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    );
    push(
        "logging.level",
        config.logging.level.clone(),
        &["CONVOY_LOGGING_LEVEL", "CONVOY_LOG_LEVEL"],
    );
    push(
        "logging.format",
        format!("{:?}", config.logging.format).to_lowercase(),
        &["CONVOY_LOGGING_FORMAT", "CONVOY_LOG_FORMAT"],
    );

    lines.join("\n")
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

/// Keeps the public bot id and hides the secret half of a `<bot id>:<secret>` token.
fn redact_bot_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source, redact_bot_token};

    #[test]
    fn bot_token_keeps_only_the_bot_id() {
        assert_eq!(redact_bot_token("123456:AA-secret"), "123456:***");
        assert_eq!(redact_bot_token("   "), "<empty>");
        assert_eq!(redact_bot_token("opaque"), "<redacted>");
    }

    #[test]
    fn file_source_requires_the_full_key_path() {
        let doc: Value = "[llm]\nmodel = \"llama3\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
        assert_eq!(
            field_source("llm.model", &["CONVOY_TEST_UNSET_KEY"], Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(field_source("server.port", &[], Some(&doc), None), "default");
    }
}
