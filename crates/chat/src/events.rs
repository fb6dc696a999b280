use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use convoy_core::domain::user::NewUser;
use convoy_db::RepositoryError;

use crate::{
    commands::{
        split_command, CommandParseError, CommandPayload, CommandRouteError, CommandRouter,
        NoopChatCommandService,
    },
    keyboards::ReplyMessage,
};

/// Reply sent when a handler fails; internals stay in the logs.
pub const HANDLER_FAILURE_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again later.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sender {
    pub external_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Sender {
    pub fn with_id(external_id: impl Into<String>) -> Self {
        Self { external_id: external_id.into(), ..Self::default() }
    }

    /// Profile fields for an upsert; the role is left for the user to pick.
    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            external_id: self.external_id.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone_number: None,
            role: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatEnvelope {
    pub update_id: i64,
    pub event: ChatEvent,
}

impl ChatEnvelope {
    pub fn correlation_id(&self) -> String {
        format!("update-{}", self.update_id)
    }

    /// Chat to answer in, when the update came from one.
    pub fn chat_id(&self) -> Option<i64> {
        match &self.event {
            ChatEvent::Command(payload) => Some(payload.chat_id),
            ChatEvent::Text(event) => Some(event.chat_id),
            ChatEvent::Location(event) => Some(event.chat_id),
            ChatEvent::Callback(event) => Some(event.chat_id),
            ChatEvent::Unsupported { .. } => None,
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match &self.event {
            ChatEvent::Command(payload) => Some(&payload.sender),
            ChatEvent::Text(event) => Some(&event.sender),
            ChatEvent::Location(event) => Some(&event.sender),
            ChatEvent::Callback(event) => Some(&event.sender),
            ChatEvent::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    Command(CommandPayload),
    Text(TextMessageEvent),
    Location(SharedLocationEvent),
    Callback(CallbackQueryEvent),
    Unsupported { kind: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Command(_) => ChatEventType::Command,
            Self::Text(_) => ChatEventType::Text,
            Self::Location(_) => ChatEventType::Location,
            Self::Callback(_) => ChatEventType::Callback,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    /// Text starting with `/` becomes a command; everything else stays text.
    pub fn from_text(chat_id: i64, sender: Sender, text: &str) -> Self {
        match split_command(text) {
            Ok((command, args)) => Self::Command(CommandPayload { chat_id, sender, command, args }),
            Err(CommandParseError::NotACommand(_)) => {
                Self::Text(TextMessageEvent { chat_id, sender, text: text.to_owned() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Command,
    Text,
    Location,
    Callback,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub chat_id: i64,
    pub sender: Sender,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SharedLocationEvent {
    pub chat_id: i64,
    pub sender: Sender,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackQueryEvent {
    pub chat_id: i64,
    pub sender: Sender,
    pub query_id: String,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(ReplyMessage),
    Processed,
    Ignored,
}

impl HandlerResult {
    pub fn into_reply(self) -> Option<ReplyMessage> {
        match self {
            Self::Responded(reply) => Some(reply),
            Self::Processed | Self::Ignored => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    Route(#[from] CommandRouteError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
    #[error("chat handler failure: {0}")]
    Service(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn default_dispatcher() -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(NoopChatCommandService));
    dispatcher.register(TextMessageHandler::new(NoopTextMessageService));
    dispatcher.register(LocationHandler::new(NoopLocationService));
    dispatcher.register(CallbackHandler::new(NoopCallbackService));
    dispatcher
}

pub struct CommandHandler<S> {
    router: CommandRouter<S>,
}

impl<S> CommandHandler<S>
where
    S: crate::commands::ChatCommandService,
{
    pub fn new(service: S) -> Self {
        Self { router: CommandRouter::new(service) }
    }
}

#[async_trait]
impl<S> EventHandler for CommandHandler<S>
where
    S: crate::commands::ChatCommandService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Command
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Command(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.router.route(payload).await?;
        Ok(HandlerResult::Responded(message))
    }
}

#[async_trait]
pub trait TextMessageService: Send + Sync {
    async fn handle_text(
        &self,
        event: &TextMessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<ReplyMessage>, EventHandlerError>;
}

pub struct TextMessageHandler<S> {
    service: S,
}

impl<S> TextMessageHandler<S>
where
    S: TextMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for TextMessageHandler<S>
where
    S: TextMessageService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Text
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Text(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.text.trim().is_empty() {
            return Ok(HandlerResult::Processed);
        }

        let message = self.service.handle_text(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

pub struct NoopTextMessageService;

#[async_trait]
impl TextMessageService for NoopTextMessageService {
    async fn handle_text(
        &self,
        _event: &TextMessageEvent,
        _ctx: &EventContext,
    ) -> Result<Option<ReplyMessage>, EventHandlerError> {
        Ok(Some(ReplyMessage::text("Please use /start to set your role first.")))
    }
}

#[async_trait]
pub trait LocationService: Send + Sync {
    async fn handle_location(
        &self,
        event: &SharedLocationEvent,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError>;
}

pub struct LocationHandler<S> {
    service: S,
}

impl<S> LocationHandler<S>
where
    S: LocationService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for LocationHandler<S>
where
    S: LocationService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Location
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Location(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.service.handle_location(event, ctx).await?;
        Ok(HandlerResult::Responded(message))
    }
}

pub struct NoopLocationService;

#[async_trait]
impl LocationService for NoopLocationService {
    async fn handle_location(
        &self,
        _event: &SharedLocationEvent,
        _ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        Ok(ReplyMessage::text("Location received, but you're not registered as a driver."))
    }
}

#[async_trait]
pub trait CallbackService: Send + Sync {
    async fn handle_callback(
        &self,
        event: &CallbackQueryEvent,
        ctx: &EventContext,
    ) -> Result<Option<ReplyMessage>, EventHandlerError>;
}

pub struct CallbackHandler<S> {
    service: S,
}

impl<S> CallbackHandler<S>
where
    S: CallbackService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for CallbackHandler<S>
where
    S: CallbackService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Callback
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Callback(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.service.handle_callback(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

pub struct NoopCallbackService;

#[async_trait]
impl CallbackService for NoopCallbackService {
    async fn handle_callback(
        &self,
        _event: &CallbackQueryEvent,
        _ctx: &EventContext,
    ) -> Result<Option<ReplyMessage>, EventHandlerError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        default_dispatcher, ChatEnvelope, ChatEvent, ChatEventType, EventContext, EventDispatcher,
        HandlerResult, Sender,
    };

    fn envelope(event: ChatEvent) -> ChatEnvelope {
        ChatEnvelope { update_id: 10, event }
    }

    #[test]
    fn slash_text_becomes_a_command() {
        let event = ChatEvent::from_text(1, Sender::with_id("9"), "/status 4");
        assert_eq!(event.event_type(), ChatEventType::Command);

        let event = ChatEvent::from_text(1, Sender::with_id("9"), "where is trip 4?");
        assert_eq!(event.event_type(), ChatEventType::Text);
    }

    #[tokio::test]
    async fn default_dispatcher_registers_every_supported_kind() {
        let dispatcher = default_dispatcher();
        assert_eq!(dispatcher.handler_count(), 4);

        let result = dispatcher
            .dispatch(
                &envelope(ChatEvent::Unsupported { kind: "edited_message".to_owned() }),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn command_is_routed_to_the_command_handler() {
        let dispatcher = default_dispatcher();
        let result = dispatcher
            .dispatch(
                &envelope(ChatEvent::from_text(1, Sender::with_id("9"), "/help")),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");

        let reply = result.into_reply().expect("help replies");
        assert!(reply.text.contains("/start"));
    }

    #[tokio::test]
    async fn blank_text_is_processed_silently() {
        let dispatcher = default_dispatcher();
        let result = dispatcher
            .dispatch(
                &envelope(ChatEvent::from_text(1, Sender::with_id("9"), "   ")),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Processed);
    }

    #[tokio::test]
    async fn empty_dispatcher_ignores_everything() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(
                &envelope(ChatEvent::from_text(1, Sender::with_id("9"), "hi")),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);
    }

    #[test]
    fn envelope_exposes_chat_and_sender() {
        let envelope = envelope(ChatEvent::from_text(55, Sender::with_id("9"), "hi"));
        assert_eq!(envelope.chat_id(), Some(55));
        assert_eq!(envelope.sender().map(|s| s.external_id.as_str()), Some("9"));
        assert_eq!(envelope.correlation_id(), "update-10");
    }
}
