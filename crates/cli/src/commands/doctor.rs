use convoy_core::config::AppConfig;
use convoy_db::{connect_with_settings, migrations};
use serde::Serialize;

use crate::commands::{exit, load_config, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code =
        if report.overall_status == CheckStatus::Pass { exit::OK } else { exit::CHECKS_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match load_config("doctor") {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_credentials(&config));
            checks.push(check_chat_transport(&config));
            checks.push(check_database_readiness(&config));
        }
        Err(failure) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: failure_message(&failure),
            });
            for name in ["llm_credentials", "chat_transport", "database_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn failure_message(failure: &CommandResult) -> String {
    serde_json::from_str::<serde_json::Value>(&failure.output)
        .ok()
        .and_then(|payload| payload["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| failure.output.clone())
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let provider = config.llm.provider;
    let details = if provider.requires_api_key() {
        format!(
            "{} api key present; endpoint {}",
            provider.as_str(),
            config.llm.effective_base_url()
        )
    } else {
        format!(
            "{} needs no api key; endpoint {}",
            provider.as_str(),
            config.llm.effective_base_url()
        )
    };
    DoctorCheck { name: "llm_credentials", status: CheckStatus::Pass, details }
}

fn check_chat_transport(config: &AppConfig) -> DoctorCheck {
    let details = match (&config.telegram.bot_token, &config.telegram.webhook_url) {
        (Some(_), Some(url)) => format!("bot token set; webhook target {url}"),
        (Some(_), None) => format!(
            "bot token set; no webhook url, long-polling {} every {}s",
            config.telegram.api_base_url, config.telegram.poll_timeout_secs
        ),
        (None, _) => "no bot token; chat adapter disabled, HTTP API only".to_string(),
    };
    DoctorCheck { name: "chat_transport", status: CheckStatus::Pass, details }
}

fn check_database_readiness(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_readiness",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let pending = migrations::pending_count(&pool)
            .await
            .map_err(|error| format!("failed to inspect migrations: {error}"));
        pool.close().await;
        pending
    });

    match result {
        Ok(0) => DoctorCheck {
            name: "database_readiness",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`; schema up to date", config.database.url),
        },
        Ok(pending) => DoctorCheck {
            name: "database_readiness",
            status: CheckStatus::Fail,
            details: format!("{pending} pending migration(s); run `convoy migrate`"),
        },
        Err(error) => {
            DoctorCheck { name: "database_readiness", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
