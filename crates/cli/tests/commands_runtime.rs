use std::env;
use std::sync::{Mutex, OnceLock};

use convoy_cli::commands::{ask, config, doctor, exit, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    let db = TempDatabase::new();
    with_env(&[("CONVOY_DATABASE_URL", db.url())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, exit::OK, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_when_api_key_missing() {
    let db = TempDatabase::new();
    with_env(&[("CONVOY_DATABASE_URL", db.url()), ("CONVOY_LLM_PROVIDER", "groq")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, exit::CONFIG, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let db = TempDatabase::new();
    with_env(&[("CONVOY_DATABASE_URL", db.url())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, exit::OK, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(
            first_payload["message"],
            "demo fleet ready: 5 users, 3 trips (3 created this run)"
        );

        let second = seed::run();
        assert_eq!(second.exit_code, exit::OK, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(
            second_payload["message"],
            "demo fleet ready: 5 users, 3 trips (0 created this run)"
        );
    });
}

#[test]
fn doctor_flags_pending_migrations_until_migrate_runs() {
    let db = TempDatabase::new();
    with_env(&[("CONVOY_DATABASE_URL", db.url())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, exit::CHECKS_FAILED);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        let database = find_check(&report, "database_readiness");
        assert_eq!(database["status"], "fail");
        assert!(database["details"].as_str().unwrap_or_default().contains("convoy migrate"));

        assert_eq!(migrate::run().exit_code, exit::OK);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, exit::OK);
        assert_eq!(parse_payload(&after.output)["overall_status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("CONVOY_LLM_PROVIDER", "openai-ish")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, exit::CHECKS_FAILED);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_readiness"));
    });
}

#[test]
fn config_redacts_secrets_and_attributes_sources() {
    let db = TempDatabase::new();
    with_env(
        &[
            ("CONVOY_DATABASE_URL", db.url()),
            ("CONVOY_TELEGRAM_BOT_TOKEN", "123456:super-secret"),
            ("CONVOY_LLM_PROVIDER", "groq"),
            ("CONVOY_LLM_API_KEY", "gsk-very-secret"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, exit::OK);

            let payload = parse_payload(&result.output);
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains(
                "- telegram.bot_token = 123456:*** (source: env (CONVOY_TELEGRAM_BOT_TOKEN))"
            ));
            assert!(
                message.contains("- llm.api_key = <redacted> (source: env (CONVOY_LLM_API_KEY))")
            );
            assert!(message.contains("- server.port = 8000 (source: default)"));
            assert!(!message.contains("super-secret"));
            assert!(!message.contains("gsk-very-secret"));
        },
    );
}

#[test]
fn ask_rejects_unknown_roles_before_calling_the_model() {
    let db = TempDatabase::new();
    with_env(&[("CONVOY_DATABASE_URL", db.url())], || {
        let result = ask::run("pilot", 1, "hello");
        assert_eq!(result.exit_code, exit::INVALID_INPUT);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

struct TempDatabase {
    _dir: tempfile::TempDir,
    url: String,
}

impl TempDatabase {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("convoy.db").display());
        Self { _dir: dir, url }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn find_check<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .expect("check present in report")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "CONVOY_DATABASE_URL",
        "CONVOY_DATABASE_MAX_CONNECTIONS",
        "CONVOY_DATABASE_TIMEOUT_SECS",
        "CONVOY_TELEGRAM_BOT_TOKEN",
        "CONVOY_TELEGRAM_WEBHOOK_URL",
        "CONVOY_TELEGRAM_WEBHOOK_SECRET",
        "CONVOY_TELEGRAM_API_BASE_URL",
        "CONVOY_TELEGRAM_POLL_TIMEOUT_SECS",
        "CONVOY_LLM_PROVIDER",
        "CONVOY_LLM_API_KEY",
        "CONVOY_LLM_BASE_URL",
        "CONVOY_LLM_MODEL",
        "CONVOY_LLM_TIMEOUT_SECS",
        "CONVOY_LLM_MAX_RETRIES",
        "CONVOY_AGENT_HISTORY_WINDOW",
        "CONVOY_AGENT_HISTORY_RETENTION",
        "CONVOY_AGENT_AVERAGE_SPEED_KMH",
        "CONVOY_SERVER_BIND_ADDRESS",
        "CONVOY_SERVER_PORT",
        "CONVOY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CONVOY_LOGGING_LEVEL",
        "CONVOY_LOGGING_FORMAT",
        "CONVOY_LOG_LEVEL",
        "CONVOY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
