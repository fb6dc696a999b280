use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use convoy_core::config::AgentConfig;
use convoy_core::domain::user::{Role, UserId};
use convoy_core::eta::DEFAULT_AVERAGE_SPEED_KMH;
use convoy_db::FleetStore;

use crate::conversation::ConversationSession;
use crate::dispatcher::{DispatchOutcome, ToolDispatcher};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::lifecycle::TripLifecycle;
use crate::llm::{ChatMessage, LlmClient};
use crate::parser::{parse_response, ParsedResponse, PARAMETERS_MARKER, TOOL_MARKER};
use crate::roles;
use crate::tools::{ToolContext, ToolRegistry};

pub const MODEL_UNAVAILABLE_REPLY: &str =
    "Sorry, I couldn't reach the assistant right now. Please try again.";

#[derive(Clone, Debug, PartialEq)]
pub struct AgentSettings {
    pub history_window: usize,
    pub history_retention: usize,
    pub average_speed_kmh: f64,
    pub guardrails: GuardrailPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            history_window: ConversationSession::DEFAULT_WINDOW,
            history_retention: ConversationSession::DEFAULT_RETENTION,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            guardrails: GuardrailPolicy::default(),
        }
    }
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            history_window: config.history_window,
            history_retention: config.history_retention,
            average_speed_kmh: config.average_speed_kmh,
            guardrails: GuardrailPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Plain model text.
    Replied,
    ToolCompleted,
    /// The model named an unknown tool; its raw text was returned.
    UnresolvableTool,
    InvalidParameter,
    /// Answered by a guardrail without calling the model.
    Guarded,
    PersistenceFailure,
    ModelUnavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub text: String,
    pub status: TurnStatus,
    pub tool: Option<String>,
    pub correlation_id: String,
}

/// One role's assistant for one principal. Owns that principal's session.
pub struct Agent {
    role: Role,
    principal: UserId,
    registry: ToolRegistry,
    session: ConversationSession,
    dispatcher: ToolDispatcher,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn FleetStore>,
    lifecycle: TripLifecycle,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(
        role: Role,
        principal: UserId,
        store: Arc<dyn FleetStore>,
        lifecycle: TripLifecycle,
        llm: Arc<dyn LlmClient>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            role,
            principal,
            registry: roles::registry(role),
            session: ConversationSession::new(settings.history_window, settings.history_retention),
            dispatcher: ToolDispatcher,
            llm,
            store,
            lifecycle,
            settings,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn principal(&self) -> UserId {
        self.principal
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// System instructions: role text, the registry's catalogue, and the wire format.
    pub fn instructions(&self) -> String {
        format!(
            "{role_text}\n\n\
             You have access to the following tools:\n{catalogue}\n\n\
             When the user asks you to perform an action, use the appropriate tool.\n\
             If you need to use a tool, respond with the tool name and the parameters in this format:\n\n\
             {TOOL_MARKER} <tool_name>\n\
             {PARAMETERS_MARKER} <parameter1>=<value1>, <parameter2>=<value2>, ...\n\n\
             For example:\n{example}\n\n\
             If you don't need to use a tool, just respond normally.",
            role_text = roles::system_text(self.role),
            catalogue = self.registry.catalogue(),
            example = roles::example_call(self.role).to_wire(),
        )
    }

    /// The messages for the next model call: instructions then the recent window.
    pub fn prompt(&self) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.instructions())];
        messages.extend(
            self.session.recent().map(|turn| ChatMessage::new(turn.role.as_str(), turn.content.clone())),
        );
        messages
    }

    /// Runs one turn. Never fails: every error category ends in a reply.
    pub async fn handle_message(&mut self, text: &str) -> TurnReply {
        let correlation_id = Uuid::new_v4().to_string();
        info!(
            event_name = "agent.turn.started",
            correlation_id = %correlation_id,
            role = %self.role,
            user_id = %self.principal,
            "agent turn started"
        );

        let reply = self.run_turn(text, &correlation_id).await;
        info!(
            event_name = "agent.turn.finished",
            correlation_id = %correlation_id,
            role = %self.role,
            user_id = %self.principal,
            status = ?reply.status,
            tool = reply.tool.as_deref().unwrap_or(""),
            "agent turn finished"
        );
        reply
    }

    async fn run_turn(&mut self, text: &str, correlation_id: &str) -> TurnReply {
        let reply = |text: String, status: TurnStatus, tool: Option<String>| TurnReply {
            text,
            status,
            tool,
            correlation_id: correlation_id.to_owned(),
        };

        match self.settings.guardrails.screen(self.role, text, self.store.as_ref()).await {
            Ok(GuardrailDecision::Allow) => {}
            Ok(GuardrailDecision::Deny { reason_code, user_message }) => {
                info!(
                    event_name = "agent.turn.guarded",
                    correlation_id,
                    reason_code,
                    "message answered by guardrail"
                );
                self.session.push_user(text);
                self.session.push_assistant(user_message.clone());
                return reply(user_message, TurnStatus::Guarded, None);
            }
            Err(error) => {
                warn!(
                    event_name = "agent.turn.guard_failed",
                    correlation_id,
                    error = %error,
                    "guardrail lookup failed"
                );
                self.session.push_user(text);
                return reply(
                    ToolDispatcher::PERSISTENCE_FAILURE_REPLY.to_owned(),
                    TurnStatus::PersistenceFailure,
                    None,
                );
            }
        }

        self.session.push_user(text);
        let completion = match self.llm.complete(&self.prompt()).await {
            Ok(completion) => completion,
            Err(error) => {
                warn!(
                    event_name = "agent.llm.failed",
                    correlation_id,
                    error = %error,
                    "model call failed"
                );
                return reply(MODEL_UNAVAILABLE_REPLY.to_owned(), TurnStatus::ModelUnavailable, None);
            }
        };
        self.session.push_assistant(completion.clone());

        let call = match parse_response(&completion) {
            ParsedResponse::PlainText { content } => {
                return reply(content, TurnStatus::Replied, None);
            }
            ParsedResponse::ToolCall(call) => call,
        };

        let context = ToolContext::new(self.store.clone(), self.lifecycle.clone(), self.principal)
            .with_correlation_id(correlation_id)
            .with_average_speed(self.settings.average_speed_kmh);
        match self.dispatcher.dispatch(&self.registry, &context, &call, &mut self.session).await {
            DispatchOutcome::Completed { tool, output } => {
                reply(output, TurnStatus::ToolCompleted, Some(tool))
            }
            DispatchOutcome::UnresolvableTool { name } => {
                reply(completion, TurnStatus::UnresolvableTool, Some(name))
            }
            DispatchOutcome::InvalidParameter { tool, error } => reply(
                format!("I couldn't run {tool}: {error}"),
                TurnStatus::InvalidParameter,
                Some(tool),
            ),
            DispatchOutcome::Failed { tool, .. } => reply(
                ToolDispatcher::PERSISTENCE_FAILURE_REPLY.to_owned(),
                TurnStatus::PersistenceFailure,
                Some(tool),
            ),
        }
    }
}

type AgentKey = (Role, UserId);

/// One agent per (role, principal), created on first use.
///
/// Each agent sits behind its own async mutex so turns for one principal run one at a time while
/// different principals proceed in parallel.
pub struct AgentDirectory {
    store: Arc<dyn FleetStore>,
    lifecycle: TripLifecycle,
    llm: Arc<dyn LlmClient>,
    settings: AgentSettings,
    agents: Mutex<HashMap<AgentKey, Arc<Mutex<Agent>>>>,
}

impl AgentDirectory {
    pub fn new(
        store: Arc<dyn FleetStore>,
        lifecycle: TripLifecycle,
        llm: Arc<dyn LlmClient>,
        settings: AgentSettings,
    ) -> Self {
        Self { store, lifecycle, llm, settings, agents: Mutex::new(HashMap::new()) }
    }

    pub async fn agent(&self, role: Role, principal: UserId) -> Arc<Mutex<Agent>> {
        let mut agents = self.agents.lock().await;
        agents
            .entry((role, principal))
            .or_insert_with(|| {
                Arc::new(Mutex::new(Agent::new(
                    role,
                    principal,
                    self.store.clone(),
                    self.lifecycle.clone(),
                    self.llm.clone(),
                    self.settings.clone(),
                )))
            })
            .clone()
    }

    pub async fn handle_message(&self, role: Role, principal: UserId, text: &str) -> TurnReply {
        let agent = self.agent(role, principal).await;
        let mut agent = agent.lock().await;
        agent.handle_message(text).await
    }

    /// Drops every agent held for `principal`, e.g. after a role change.
    pub async fn forget(&self, principal: UserId) -> usize {
        let mut agents = self.agents.lock().await;
        let before = agents.len();
        agents.retain(|(_, user), _| *user != principal);
        before - agents.len()
    }

    pub async fn len(&self) -> usize {
        self.agents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use convoy_core::domain::user::{Role, UserId};
    use convoy_db::InMemoryFleetStore;

    use super::{Agent, AgentDirectory, AgentSettings, TurnStatus, MODEL_UNAVAILABLE_REPLY};
    use crate::conversation::TurnRole;
    use crate::lifecycle::TripLifecycle;
    use crate::llm::ScriptedLlmClient;

    fn agent(role: Role, llm: Arc<ScriptedLlmClient>, settings: AgentSettings) -> Agent {
        let store = Arc::new(InMemoryFleetStore::new());
        Agent::new(role, UserId(1), store.clone(), TripLifecycle::without_audit(store), llm, settings)
    }

    #[test]
    fn instructions_carry_catalogue_and_wire_format() {
        let agent = agent(Role::Driver, Arc::new(ScriptedLlmClient::default()), AgentSettings::default());
        let instructions = agent.instructions();

        assert!(instructions.contains("- update_trip_status(status: trip status, notes?: text)"));
        assert!(instructions.contains("Tool: <tool_name>"));
        assert!(instructions.contains("Parameters: status=at_pickup"));
        assert!(!instructions.contains("create_new_trip"));
    }

    #[tokio::test]
    async fn plain_reply_is_returned_and_recorded() {
        let llm = Arc::new(ScriptedLlmClient::new(["Drive safe!"]));
        let mut agent = agent(Role::Driver, llm.clone(), AgentSettings::default());

        let reply = agent.handle_message("thanks").await;

        assert_eq!(reply.status, TurnStatus::Replied);
        assert_eq!(reply.text, "Drive safe!");
        let roles = agent.session().turns().map(|turn| turn.role).collect::<Vec<_>>();
        assert_eq!(roles, vec![TurnRole::User, TurnRole::Assistant]);
        assert_eq!(llm.prompts()[0].last().map(|m| m.content.as_str()), Some("thanks"));
    }

    #[tokio::test]
    async fn prompt_replays_only_the_window() {
        let llm = Arc::new(ScriptedLlmClient::new(["one", "two", "three"]));
        let settings = AgentSettings { history_window: 2, ..AgentSettings::default() };
        let mut agent = agent(Role::Shipper, llm.clone(), settings);

        for text in ["a", "b", "c"] {
            agent.handle_message(text).await;
        }

        let last_prompt = llm.prompts().pop().expect("prompt");
        assert_eq!(last_prompt.len(), 3, "system text plus a two-turn window");
        assert_eq!(last_prompt[1].content, "two");
        assert_eq!(last_prompt[2].content, "c");
    }

    #[tokio::test]
    async fn model_failure_keeps_user_turn_and_session_survives() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_failure("timeout");
        llm.push_reply("Back online.");
        let mut agent = agent(Role::Consignee, llm, AgentSettings::default());

        let failed = agent.handle_message("where is my cargo?").await;
        assert_eq!(failed.status, TurnStatus::ModelUnavailable);
        assert_eq!(failed.text, MODEL_UNAVAILABLE_REPLY);
        assert_eq!(agent.session().len(), 1);

        let recovered = agent.handle_message("hello?").await;
        assert_eq!(recovered.text, "Back online.");
        assert_eq!(agent.session().len(), 3);
    }

    #[tokio::test]
    async fn directory_keeps_one_agent_per_role_and_principal() {
        let store = Arc::new(InMemoryFleetStore::new());
        let llm = Arc::new(ScriptedLlmClient::new(["hi", "hello"]));
        let directory = AgentDirectory::new(
            store.clone(),
            TripLifecycle::without_audit(store),
            llm,
            AgentSettings::default(),
        );

        directory.handle_message(Role::Driver, UserId(1), "first").await;
        directory.handle_message(Role::Driver, UserId(1), "second").await;
        assert_eq!(directory.len().await, 1);

        let agent = directory.agent(Role::Driver, UserId(1)).await;
        assert_eq!(agent.lock().await.session().len(), 4);

        directory.agent(Role::Manager, UserId(1)).await;
        assert_eq!(directory.forget(UserId(1)).await, 2);
        assert!(directory.is_empty().await);
    }
}
