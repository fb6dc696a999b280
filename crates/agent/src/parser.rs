//! Tool-call extraction from free-form model replies.
//!
//! The wire contract is two lines anywhere in the reply:
//!
//! ```text
//! Tool: update_trip_status
//! Parameters: status=at_pickup, notes=arrived
//! ```
//!
//! Parameters are split naively on `,` and then on the first `=`. A value containing a comma is
//! therefore cut short. Keys keep the order the model wrote them in; a repeated key keeps its
//! first position and its last value.

use indexmap::IndexMap;

pub const TOOL_MARKER: &str = "Tool:";
pub const PARAMETERS_MARKER: &str = "Parameters:";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub parameters: IndexMap<String, String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parameters: IndexMap::new() }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Renders the call in the two-line wire format.
    pub fn to_wire(&self) -> String {
        let parameters = self
            .parameters
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{TOOL_MARKER} {}\n{PARAMETERS_MARKER} {parameters}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedResponse {
    ToolCall(ToolCall),
    PlainText { content: String },
}

impl ParsedResponse {
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall(_))
    }
}

/// Splits a model reply into a tool call or plain text. Never fails.
///
/// Both marker lines must be present; a reply with only `Tool:` is plain text. Marker lines are
/// matched at the start of a line and the first match of each wins.
pub fn parse_response(text: &str) -> ParsedResponse {
    let plain = || ParsedResponse::PlainText { content: text.to_owned() };
    if !text.contains(TOOL_MARKER) {
        return plain();
    }

    let mut tool_line = None;
    let mut parameters_line = None;
    for line in text.trim().lines() {
        if tool_line.is_none() {
            tool_line = line.strip_prefix(TOOL_MARKER);
        }
        if parameters_line.is_none() {
            parameters_line = line.strip_prefix(PARAMETERS_MARKER);
        }
    }

    match (tool_line, parameters_line) {
        (Some(name), Some(parameters)) => ParsedResponse::ToolCall(ToolCall {
            name: name.trim().to_owned(),
            parameters: parse_parameters(parameters),
        }),
        _ => plain(),
    }
}

/// `k1=v1, k2=v2` into a map. Segments without `=` are dropped.
pub fn parse_parameters(raw: &str) -> IndexMap<String, String> {
    let mut parameters = IndexMap::new();
    for segment in raw.trim().split(',') {
        if let Some((key, value)) = segment.split_once('=') {
            parameters.insert(key.trim().to_owned(), value.trim().to_owned());
        }
    }
    parameters
}
