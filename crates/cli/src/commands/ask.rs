use std::sync::Arc;

use convoy_agent::roles::user_with_role;
use convoy_agent::{
    Agent, AgentSettings, LlmClient, OpenAiCompatibleClient, TripLifecycle, TurnStatus,
};
use convoy_core::domain::user::{Role, UserId};
use convoy_db::{connect_with_settings, migrations, FleetStore, SqlFleetStore};
use serde_json::json;

use crate::commands::{exit, load_config, runtime, CommandResult};

/// Runs one agent turn against the configured database and model.
pub fn run(role: &str, user: i64, message: &str) -> CommandResult {
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let llm: Arc<dyn LlmClient> = match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            return CommandResult::failure("ask", "llm_setup", error.to_string(), exit::CONFIG);
        }
    };
    let runtime = match runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(
                    "ask",
                    "db_connectivity",
                    error.to_string(),
                    exit::DB_CONNECTIVITY,
                );
            }
        };
        if let Err(error) = migrations::run_pending(&pool).await {
            return CommandResult::failure(
                "ask",
                "migration",
                error.to_string(),
                exit::PERSISTENCE,
            );
        }

        let store: Arc<dyn FleetStore> = Arc::new(SqlFleetStore::new(pool.clone()));
        let result =
            ask_with(store, llm, AgentSettings::from(&config.agent), role, user, message).await;
        pool.close().await;
        result
    })
}

pub async fn ask_with(
    store: Arc<dyn FleetStore>,
    llm: Arc<dyn LlmClient>,
    settings: AgentSettings,
    role: &str,
    user: i64,
    message: &str,
) -> CommandResult {
    let Some(role) = Role::parse(role) else {
        return CommandResult::failure(
            "ask",
            "invalid_input",
            format!("unknown role `{role}` (expected driver|manager|shipper|consignee)"),
            exit::INVALID_INPUT,
        );
    };
    if message.trim().is_empty() {
        return CommandResult::failure(
            "ask",
            "invalid_input",
            "message must not be empty",
            exit::INVALID_INPUT,
        );
    }

    let principal = match user_with_role(store.as_ref(), UserId(user), role).await {
        Ok(Ok(principal)) => principal,
        Ok(Err(violation)) => {
            return CommandResult::failure(
                "ask",
                "invalid_input",
                violation.to_string(),
                exit::INVALID_INPUT,
            );
        }
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "persistence",
                error.to_string(),
                exit::PERSISTENCE,
            );
        }
    };

    let lifecycle = TripLifecycle::without_audit(store.clone());
    let mut agent = Agent::new(role, principal.id, store, lifecycle, llm, settings);
    let reply = agent.handle_message(message).await;

    match reply.status {
        TurnStatus::ModelUnavailable => {
            CommandResult::failure("ask", "llm_unavailable", reply.text, exit::LLM_UNAVAILABLE)
        }
        TurnStatus::PersistenceFailure => {
            CommandResult::failure("ask", "persistence", reply.text, exit::PERSISTENCE)
        }
        _ => CommandResult::success_with_details(
            "ask",
            reply.text.clone(),
            Some(json!({
                "role": role.as_str(),
                "user_id": principal.id,
                "turn_status": reply.status,
                "tool": reply.tool,
                "correlation_id": reply.correlation_id,
            })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use convoy_agent::{AgentSettings, ScriptedLlmClient};
    use convoy_db::{DemoFleetDataset, InMemoryFleetStore};
    use serde_json::Value;

    use super::ask_with;
    use crate::commands::exit;

    async fn demo_store() -> Arc<InMemoryFleetStore> {
        let store = Arc::new(InMemoryFleetStore::new());
        DemoFleetDataset::load(store.as_ref()).await.expect("demo fleet loads");
        store
    }

    fn payload(output: &str) -> Value {
        serde_json::from_str(output).expect("json output")
    }

    #[tokio::test]
    async fn tool_turn_reports_status_and_tool() {
        let store = demo_store().await;
        let llm = Arc::new(ScriptedLlmClient::new([
            "Tool: get_shipment_status\nParameters: trip_id=2",
        ]));

        let result =
            ask_with(store, llm, AgentSettings::default(), "shipper", 4, "where is trip 2?").await;

        assert_eq!(result.exit_code, exit::OK);
        let payload = payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(payload["details"]["turn_status"], "tool_completed");
        assert_eq!(payload["details"]["tool"], "get_shipment_status");
    }

    #[tokio::test]
    async fn wrong_role_for_user_is_invalid_input() {
        let store = demo_store().await;
        let llm = Arc::new(ScriptedLlmClient::default());

        let result =
            ask_with(store, llm.clone(), AgentSettings::default(), "manager", 4, "hi").await;

        assert_eq!(result.exit_code, exit::INVALID_INPUT);
        assert_eq!(payload(&result.output)["message"], "User #4 is not a manager.");
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn model_outage_maps_to_its_own_exit_code() {
        let store = demo_store().await;
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_failure("connection refused");

        let result = ask_with(store, llm, AgentSettings::default(), "driver", 2, "status?").await;

        assert_eq!(result.exit_code, exit::LLM_UNAVAILABLE);
        assert_eq!(payload(&result.output)["error_class"], "llm_unavailable");
    }
}
