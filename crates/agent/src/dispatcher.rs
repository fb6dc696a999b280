use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use convoy_core::domain::trip::TripStatus;

use crate::conversation::ConversationSession;
use crate::parser::ToolCall;
use crate::tools::{ParamKind, ParamSpec, ParamValue, ToolArgs, ToolContext, ToolError, ToolRegistry};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct ParameterError {
    pub parameter: String,
    pub reason: String,
}

impl ParameterError {
    fn missing(parameter: &str) -> Self {
        Self {
            parameter: parameter.to_owned(),
            reason: format!("missing required parameter `{parameter}`"),
        }
    }

    fn invalid(parameter: &str, value: &str, expected: &str) -> Self {
        Self {
            parameter: parameter.to_owned(),
            reason: format!("invalid value `{value}` for `{parameter}` (expected {expected})"),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The tool ran; `output` is the user-facing reply, domain refusals included.
    Completed { tool: String, output: String },
    /// No tool by that name. Nothing ran and nothing was written.
    UnresolvableTool { name: String },
    /// Coercion failed before the tool ran.
    InvalidParameter { tool: String, error: ParameterError },
    /// The tool's writes were abandoned. The only turn-fatal outcome.
    Failed { tool: String, error: ToolError },
}

impl DispatchOutcome {
    pub fn is_turn_fatal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Validates a parsed call against a registry and runs it.
///
/// Role differences live in the registry; this control flow is shared by every agent.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToolDispatcher;

impl ToolDispatcher {
    pub const PERSISTENCE_FAILURE_REPLY: &'static str =
        "Sorry, I couldn't save that change. Please try again.";

    /// Runs `call` and records its result in `session` as a system turn.
    ///
    /// Unresolvable calls leave the session alone; the caller decides what to show instead.
    pub async fn dispatch(
        &self,
        registry: &ToolRegistry,
        context: &ToolContext,
        call: &ToolCall,
        session: &mut ConversationSession,
    ) -> DispatchOutcome {
        let correlation_id = context.correlation_id.as_str();
        let Some(tool) = registry.get(&call.name) else {
            warn!(
                event_name = "agent.tool.unresolvable",
                correlation_id,
                tool = %call.name,
                "model named a tool outside the registry"
            );
            return DispatchOutcome::UnresolvableTool { name: call.name.clone() };
        };

        let args = match bind_arguments(tool.parameters(), &call.parameters) {
            Ok(args) => args,
            Err(error) => {
                info!(
                    event_name = "agent.tool.invalid_parameter",
                    correlation_id,
                    tool = tool.name(),
                    parameter = %error.parameter,
                    "tool parameters rejected"
                );
                session.push_system(format!("Tool error: {}: {error}", tool.name()));
                return DispatchOutcome::InvalidParameter { tool: tool.name().to_owned(), error };
            }
        };

        for unknown in call.parameters.keys() {
            if !tool.parameters().iter().any(|spec| spec.name == unknown.as_str()) {
                debug!(
                    event_name = "agent.tool.unknown_parameter",
                    correlation_id,
                    tool = tool.name(),
                    parameter = %unknown,
                    "ignoring undeclared parameter"
                );
            }
        }

        match tool.execute(context, args).await {
            Ok(output) => {
                info!(
                    event_name = "agent.tool.completed",
                    correlation_id,
                    tool = tool.name(),
                    "tool completed"
                );
                session.push_system(format!("Tool result: {output}"));
                DispatchOutcome::Completed { tool: tool.name().to_owned(), output }
            }
            Err(ToolError::MissingArgument(parameter)) => {
                let error = ParameterError::missing(parameter);
                session.push_system(format!("Tool error: {}: {error}", tool.name()));
                DispatchOutcome::InvalidParameter { tool: tool.name().to_owned(), error }
            }
            Err(failure) => {
                error!(
                    event_name = "agent.tool.failed",
                    correlation_id,
                    tool = tool.name(),
                    error = %failure,
                    "tool failed; writes abandoned"
                );
                session.push_system(format!(
                    "Tool failure: {}: {}",
                    tool.name(),
                    Self::PERSISTENCE_FAILURE_REPLY
                ));
                DispatchOutcome::Failed { tool: tool.name().to_owned(), error: failure }
            }
        }
    }
}

/// Coerces raw string parameters to the declared contract, in declaration order.
///
/// Blank values count as absent. Undeclared keys are ignored.
pub fn bind_arguments(
    specs: &[ParamSpec],
    supplied: &IndexMap<String, String>,
) -> Result<ToolArgs, ParameterError> {
    let mut args = ToolArgs::default();
    for spec in specs {
        let raw = supplied.get(spec.name).map(|value| value.trim()).filter(|value| !value.is_empty());
        let Some(raw) = raw else {
            if spec.required {
                return Err(ParameterError::missing(spec.name));
            }
            continue;
        };
        args.insert(spec.name, coerce(spec, raw)?);
    }
    Ok(args)
}

fn coerce(spec: &ParamSpec, raw: &str) -> Result<ParamValue, ParameterError> {
    match spec.kind {
        ParamKind::Integer => raw
            .parse::<i64>()
            .map(ParamValue::Integer)
            .map_err(|_| ParameterError::invalid(spec.name, raw, "an integer")),
        ParamKind::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(ParamValue::Float)
            .ok_or_else(|| ParameterError::invalid(spec.name, raw, "a number")),
        ParamKind::Text => Ok(ParamValue::Text(raw.to_owned())),
        ParamKind::TripStatus => TripStatus::parse(raw).map(ParamValue::Status).ok_or_else(|| {
            let allowed =
                TripStatus::ALL.iter().map(|status| status.as_str()).collect::<Vec<_>>().join(", ");
            ParameterError::invalid(spec.name, raw, &format!("one of: {allowed}"))
        }),
    }
}
