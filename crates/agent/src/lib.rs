//! Conversational agents for the convoy fleet workflow.
//!
//! One turn runs a fixed loop:
//! 1. **Session** (`conversation`) - append the user's text to the principal's bounded history
//! 2. **Model call** (`llm`) - role prompt + tool catalogue + recent history, text out
//! 3. **Parse** (`parser`) - pure syntactic split into a tool call or plain text
//! 4. **Dispatch** (`dispatcher`) - validate against the role's registry, coerce, execute
//! 5. **Lifecycle** (`lifecycle`) - mutating tools commit through the trip state machine
//!
//! Role behaviour lives entirely in the registries built by `roles`; the control flow is shared.
//!
//! The model never mutates state directly. It can only name a registered tool, and the tool
//! decides what a request means for the domain.

pub mod conversation;
pub mod dispatcher;
pub mod format;
pub mod guardrails;
pub mod lifecycle;
pub mod llm;
pub mod notify;
pub mod parser;
pub mod roles;
pub mod runtime;
pub mod tools;

pub use conversation::{ConversationSession, Turn, TurnRole};
pub use dispatcher::{DispatchOutcome, ParameterError, ToolDispatcher};
pub use lifecycle::{LifecycleError, TripLifecycle};
pub use llm::{ChatMessage, LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlmClient};
pub use notify::{NoopNotifier, NoticeKind, Notifier, RecordingNotifier};
pub use parser::{parse_response, ParsedResponse, ToolCall};
pub use runtime::{Agent, AgentDirectory, AgentSettings, TurnReply, TurnStatus};
pub use tools::{ParamKind, ParamSpec, ParamValue, Tool, ToolArgs, ToolContext, ToolError, ToolRegistry};
