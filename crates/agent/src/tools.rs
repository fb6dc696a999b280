use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use convoy_core::domain::trip::TripStatus;
use convoy_core::domain::user::UserId;
use convoy_core::eta::DEFAULT_AVERAGE_SPEED_KMH;
use convoy_db::{FleetStore, RepositoryError};

use crate::lifecycle::{LifecycleError, TripLifecycle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Float,
    Text,
    /// One of the stable trip status strings.
    TripStatus,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::TripStatus => "trip status",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: false }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Status(TripStatus),
}

/// Arguments after coercion. Only declared parameters that were supplied are present.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<&'static str, ParamValue>,
}

impl ToolArgs {
    pub fn insert(&mut self, name: &'static str, value: ParamValue) {
        self.values.insert(name, value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn integer(&self, name: &'static str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self, name: &'static str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &'static str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn status(&self, name: &'static str) -> Option<TripStatus> {
        match self.values.get(name) {
            Some(ParamValue::Status(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn require_integer(&self, name: &'static str) -> Result<i64, ToolError> {
        self.integer(name).ok_or(ToolError::MissingArgument(name))
    }

    pub fn require_float(&self, name: &'static str) -> Result<f64, ToolError> {
        self.float(name).ok_or(ToolError::MissingArgument(name))
    }

    pub fn require_text(&self, name: &'static str) -> Result<&str, ToolError> {
        self.text(name).ok_or(ToolError::MissingArgument(name))
    }

    pub fn require_status(&self, name: &'static str) -> Result<TripStatus, ToolError> {
        self.status(name).ok_or(ToolError::MissingArgument(name))
    }
}

/// Failures a tool cannot turn into a reply for the user.
///
/// Domain violations are not here: tools answer those with text.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing argument `{0}`")]
    MissingArgument(&'static str),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

/// What a tool may touch while it runs: the store, the lifecycle service, and who is asking.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Arc<dyn FleetStore>,
    pub lifecycle: TripLifecycle,
    pub actor: UserId,
    pub correlation_id: String,
    pub average_speed_kmh: f64,
}

impl ToolContext {
    pub fn new(store: Arc<dyn FleetStore>, lifecycle: TripLifecycle, actor: UserId) -> Self {
        Self {
            store,
            lifecycle,
            actor,
            correlation_id: String::new(),
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_average_speed(mut self, average_speed_kmh: f64) -> Self {
        self.average_speed_kmh = average_speed_kmh;
        self
    }

    pub fn store(&self) -> &dyn FleetStore {
        self.store.as_ref()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> &'static [ParamSpec] {
        &[]
    }
    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError>;
}

/// Renders a lifecycle result: domain violations become the reply, storage failures propagate.
pub fn settle<T>(
    result: Result<T, LifecycleError>,
    render: impl FnOnce(T) -> String,
) -> Result<String, ToolError> {
    match result {
        Ok(value) => Ok(render(value)),
        Err(LifecycleError::Domain(violation)) => Ok(violation.to_string()),
        Err(LifecycleError::Persistence(error)) => Err(ToolError::Persistence(error)),
    }
}

/// The closed set of tools one role may call, in catalogue order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    /// Adds a tool. A second tool with the same name replaces the first in place.
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let name = tool.name();
        match self.index.get(name) {
            Some(&position) => self.tools[position] = Box::new(tool),
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(Box::new(tool));
            }
        }
    }

    pub fn with<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&position| self.tools[position].as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One line per tool for the model prompt: `- name(param: kind, optional?: kind): description`.
    pub fn catalogue(&self) -> String {
        self.tools
            .iter()
            .map(|tool| {
                let parameters = tool
                    .parameters()
                    .iter()
                    .map(|spec| {
                        let marker = if spec.required { "" } else { "?" };
                        format!("{}{marker}: {}", spec.name, spec.kind.as_str())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}({parameters}): {}", tool.name(), tool.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolRegistry};

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            self.0
        }

        fn parameters(&self) -> &'static [ParamSpec] {
            const PARAMS: &[ParamSpec] = &[
                ParamSpec::required("message", ParamKind::Text),
                ParamSpec::optional("times", ParamKind::Integer),
            ];
            PARAMS
        }

        async fn execute(&self, _context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
            Ok(args.require_text("message")?.to_owned())
        }
    }

    struct Ping;

    #[async_trait]
    impl Tool for Ping {
        fn name(&self) -> &'static str {
            "ping"
        }

        fn description(&self) -> &'static str {
            "Check the agent is alive"
        }

        async fn execute(&self, _context: &ToolContext, _args: ToolArgs) -> Result<String, ToolError> {
            Ok("pong".to_owned())
        }
    }

    #[test]
    fn lookup_is_exact_and_case_sensitive() {
        let registry = ToolRegistry::default().with(Ping);
        assert!(registry.get("ping").is_some());
        assert!(registry.get("Ping").is_none());
        assert!(registry.get("ping ").is_none());
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let registry = ToolRegistry::default().with(Echo("first")).with(Ping).with(Echo("second"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["echo", "ping"]);
        assert_eq!(registry.get("echo").map(|tool| tool.description()), Some("second"));
    }

    #[test]
    fn catalogue_lists_parameters_in_declared_order() {
        let registry = ToolRegistry::default().with(Echo("Repeat a message")).with(Ping);
        assert_eq!(
            registry.catalogue(),
            "- echo(message: text, times?: integer): Repeat a message\n\
             - ping(): Check the agent is alive"
        );
    }
}
