use async_trait::async_trait;
use thiserror::Error;

use convoy_core::domain::trip::TripId;
use convoy_core::domain::user::Role;

use crate::events::Sender;
use crate::keyboards::ReplyMessage;

pub const STATUS_USAGE: &str = "Please provide a valid trip ID: /status [trip_id]";
pub const SET_ROLE_USAGE: &str =
    "Please provide a valid role: /set_role [driver|manager|shipper|consignee]";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPayload {
    pub chat_id: i64,
    pub sender: Sender,
    /// Command name without the slash or `@bot` suffix, lowercased.
    pub command: String,
    pub args: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    /// `None` when the argument is missing or not a number.
    Status { trip_id: Option<TripId> },
    SetRole { role: Option<Role> },
    Unknown { name: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("not a command: {0}")]
    NotACommand(String),
}

#[derive(Debug, Error)]
pub enum CommandRouteError {
    #[error("command service failed: {0}")]
    Service(String),
}

/// Splits `/name@bot args` into its lowercased name and trimmed argument text.
pub fn split_command(text: &str) -> Result<(String, String), CommandParseError> {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix('/') else {
        return Err(CommandParseError::NotACommand(trimmed.to_owned()));
    };
    let (head, args) = match body.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (body, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    if name.is_empty() {
        return Err(CommandParseError::NotACommand(trimmed.to_owned()));
    }
    Ok((name, args.to_owned()))
}

pub fn classify_command(name: &str, args: &str) -> ChatCommand {
    let first_arg = args.split_whitespace().next();
    match name {
        "start" => ChatCommand::Start,
        "help" => ChatCommand::Help,
        "status" => ChatCommand::Status {
            trip_id: first_arg
                .filter(|arg| arg.bytes().all(|byte| byte.is_ascii_digit()))
                .and_then(|arg| arg.parse().ok())
                .map(TripId),
        },
        "set_role" => ChatCommand::SetRole { role: first_arg.and_then(Role::parse) },
        _ => ChatCommand::Unknown { name: name.to_owned() },
    }
}

#[async_trait]
pub trait ChatCommandService: Send + Sync {
    async fn start(&self, payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError>;

    async fn help(&self, payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError>;

    async fn status(
        &self,
        trip_id: TripId,
        payload: &CommandPayload,
    ) -> Result<ReplyMessage, CommandRouteError>;

    async fn set_role(
        &self,
        role: Role,
        payload: &CommandPayload,
    ) -> Result<ReplyMessage, CommandRouteError>;
}

pub struct CommandRouter<S> {
    service: S,
}

impl<S> CommandRouter<S>
where
    S: ChatCommandService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub async fn route(&self, payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError> {
        match classify_command(&payload.command, &payload.args) {
            ChatCommand::Start => self.service.start(payload).await,
            ChatCommand::Help => self.service.help(payload).await,
            ChatCommand::Status { trip_id: Some(trip_id) } => {
                self.service.status(trip_id, payload).await
            }
            ChatCommand::Status { trip_id: None } => Ok(ReplyMessage::text(STATUS_USAGE)),
            ChatCommand::SetRole { role: Some(role) } => self.service.set_role(role, payload).await,
            ChatCommand::SetRole { role: None } => Ok(ReplyMessage::text(SET_ROLE_USAGE)),
            ChatCommand::Unknown { name } => Ok(ReplyMessage::text(format!(
                "Unsupported command `/{name}`. Try /help."
            ))),
        }
    }
}

/// Per-role usage text for `/help`.
pub fn help_text(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Driver) => {
            "Here's how to use this bot as a driver:\n\n\
             - You'll receive trip assignments with pickup and delivery details\n\
             - Use the quick reply buttons to update your status\n\
             - Report issues using the 'Report Issue' button\n\
             - Share your location when prompted\n\
             - You can also ask me questions about your trips"
        }
        Some(Role::Manager) => {
            "Here's how to use this bot as a manager:\n\n\
             - You can check the status of any shipment using /status [trip_id]\n\
             - You can ask me about active trips, trip details, and issues\n\
             - You can send messages to drivers and resolve issues\n\
             - You can create new trip assignments"
        }
        Some(Role::Shipper) => {
            "Here's how to use this bot as a shipper:\n\n\
             - You can check the status of your shipments using /status [trip_id]\n\
             - You can ask me about your shipments, their status, and driver locations\n\
             - You can send messages to drivers and managers"
        }
        Some(Role::Consignee) => {
            "Here's how to use this bot as a consignee:\n\n\
             - You can check the status of incoming shipments using /status [trip_id]\n\
             - You can ask me about your incoming shipments, their status, and ETAs\n\
             - You can send messages to drivers and shippers"
        }
        None => "Please use /start to set your role first.",
    }
}

/// Answers every command with its usage text; used when no store is wired.
#[derive(Default)]
pub struct NoopChatCommandService;

#[async_trait]
impl ChatCommandService for NoopChatCommandService {
    async fn start(&self, _payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError> {
        Ok(ReplyMessage::text("Welcome to the Logistics AI Bot."))
    }

    async fn help(&self, _payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError> {
        Ok(ReplyMessage::text(help_text(None)))
    }

    async fn status(
        &self,
        trip_id: TripId,
        _payload: &CommandPayload,
    ) -> Result<ReplyMessage, CommandRouteError> {
        Ok(ReplyMessage::text(format!("Trip #{trip_id} not found.")))
    }

    async fn set_role(
        &self,
        role: Role,
        _payload: &CommandPayload,
    ) -> Result<ReplyMessage, CommandRouteError> {
        Ok(ReplyMessage::text(format!("Your role has been set to {role}. You can now use the bot.")))
    }
}
