//! Telegram Bot API plumbing: the HTTP client, the outbound notifier and the long-poll transport.
//!
//! Webhook mode registers `setWebhook` once at startup and answers updates inline on
//! `POST /webhook`. Without a webhook URL the server drives [`LongPollTransport`] through the
//! [`crate::runner::UpdateRunner`] instead. Both modes push stored notifications through
//! [`TelegramNotifier`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use convoy_agent::{NoticeKind, Notifier};
use convoy_core::config::TelegramConfig;
use convoy_core::domain::notification::Notification;
use convoy_db::FleetStore;

use crate::events::ChatEnvelope;
use crate::keyboards::{trip_confirmation, ReplyMessage};
use crate::runner::{TransportError, UpdateTransport};
use crate::update::{SendMessage, Update};

/// Update kinds the bot handles; everything else is filtered out server side.
const ALLOWED_UPDATES: [&str; 2] = ["message", "callback_query"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BotApiError {
    #[error("bot client misconfigured: {0}")]
    Configuration(String),
    #[error("bot API request failed: {0}")]
    Transport(String),
    #[error("bot API rejected {method} ({status}): {description}")]
    Rejected { method: String, status: u16, description: String },
}

/// The Bot API calls convoy makes.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, BotApiError>;
    async fn send_message(&self, message: &SendMessage) -> Result<(), BotApiError>;
    async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), BotApiError>;
    async fn delete_webhook(&self) -> Result<(), BotApiError>;
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiReply<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    secret_token: &'a str,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct DeleteWebhook {
    drop_pending_updates: bool,
}

/// `https://api.telegram.org/bot<token>/<method>` over reqwest.
///
/// The token only ever appears in request URLs; errors are stripped of their URL before they are
/// logged or returned.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TelegramClient")
            .field("api_base_url", &self.api_base_url)
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

impl TelegramClient {
    pub fn from_config(config: &TelegramConfig) -> Result<Self, BotApiError> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| BotApiError::Configuration("telegram.bot_token is not set".to_owned()))?;
        // Long polls hold the request open for `poll_timeout_secs`.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 10))
            .build()
            .map_err(|error| BotApiError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            bot_token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base_url, self.bot_token.expose_secret())
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, BotApiError>
    where
        P: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            .map_err(|error| BotApiError::Transport(error.without_url().to_string()))?;
        let status = response.status();
        debug!(event_name = "chat.telegram.response", method, status = %status, "bot API replied");

        let reply = response.json::<ApiReply<T>>().await.map_err(|error| {
            BotApiError::Transport(format!("undecodable {method} reply: {}", error.without_url()))
        })?;
        if !reply.ok {
            return Err(BotApiError::Rejected {
                method: method.to_owned(),
                status: status.as_u16(),
                description: reply.description.unwrap_or_default(),
            });
        }
        reply
            .result
            .ok_or_else(|| BotApiError::Transport(format!("{method} reply had no result")))
    }
}

/// One undecodable update must not wedge the offset, so entries are decoded one by one.
fn decode_updates(raw: Vec<Value>) -> Vec<Update> {
    raw.into_iter()
        .filter_map(|value| {
            let update_id = value.get("update_id").and_then(Value::as_i64)?;
            match serde_json::from_value::<Update>(value) {
                Ok(update) => Some(update),
                Err(error) => {
                    warn!(
                        event_name = "ingress.chat.malformed_update",
                        update_id,
                        error = %error,
                        "skipping undecodable update"
                    );
                    Some(Update { update_id, message: None, callback_query: None })
                }
            }
        })
        .collect()
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, BotApiError> {
        let raw: Vec<Value> = self
            .call(
                "getUpdates",
                &GetUpdates { offset, timeout: timeout_secs, allowed_updates: &ALLOWED_UPDATES },
            )
            .await?;
        Ok(decode_updates(raw))
    }

    async fn send_message(&self, message: &SendMessage) -> Result<(), BotApiError> {
        self.call::<_, Value>("sendMessage", message).await.map(|_| ())
    }

    async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), BotApiError> {
        self.call::<_, bool>(
            "setWebhook",
            &SetWebhook { url, secret_token, allowed_updates: &ALLOWED_UPDATES },
        )
        .await
        .map(|_| ())
    }

    async fn delete_webhook(&self) -> Result<(), BotApiError> {
        self.call::<_, bool>("deleteWebhook", &DeleteWebhook { drop_pending_updates: false })
            .await
            .map(|_| ())
    }
}

/// Private chats share the user's Telegram id, which is what `external_id` stores.
fn chat_id_for(external_id: &str) -> Option<i64> {
    external_id.parse().ok()
}

/// Delivers stored notifications as Telegram messages.
///
/// Assignment notices carry the Confirm Trip button. Recipients without a numeric Telegram id
/// (API-created users) keep the stored row only.
pub struct TelegramNotifier {
    api: Arc<dyn BotApi>,
    store: Arc<dyn FleetStore>,
}

impl TelegramNotifier {
    pub fn new(api: Arc<dyn BotApi>, store: Arc<dyn FleetStore>) -> Self {
        Self { api, store }
    }

    fn reply_for(notification: &Notification, kind: NoticeKind) -> ReplyMessage {
        let reply = ReplyMessage::text(notification.message.clone());
        match (kind, notification.trip_id) {
            (NoticeKind::Assignment, Some(trip_id)) => reply.with_markup(trip_confirmation(trip_id)),
            _ => reply,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn publish(&self, notification: &Notification, kind: NoticeKind) {
        let recipient = match self.store.find_user(notification.recipient_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => return,
            Err(error) => {
                warn!(
                    event_name = "chat.notification.delivery_failed",
                    notification_id = %notification.id,
                    error = %error,
                    "recipient lookup failed"
                );
                return;
            }
        };
        let Some(chat_id) = chat_id_for(&recipient.external_id) else {
            debug!(
                event_name = "chat.notification.not_reachable",
                notification_id = %notification.id,
                recipient_id = %recipient.id,
                "recipient has no telegram chat"
            );
            return;
        };

        let message = SendMessage::new(chat_id, Self::reply_for(notification, kind));
        match self.api.send_message(&message).await {
            Ok(()) => info!(
                event_name = "chat.notification.delivered",
                notification_id = %notification.id,
                recipient_id = %recipient.id,
                kind = ?kind,
                "notification delivered"
            ),
            Err(error) => warn!(
                event_name = "chat.notification.delivery_failed",
                notification_id = %notification.id,
                recipient_id = %recipient.id,
                error = %error,
                "notification stored but not delivered"
            ),
        }
    }
}

#[derive(Default)]
struct PollState {
    offset: Option<i64>,
    buffered: VecDeque<Update>,
}

/// `getUpdates` long polling as an [`UpdateTransport`].
///
/// Acknowledging an update moves the offset past it, so Telegram drops it on the next poll.
pub struct LongPollTransport {
    api: Arc<dyn BotApi>,
    timeout_secs: u64,
    state: Mutex<PollState>,
}

impl LongPollTransport {
    pub fn new(api: Arc<dyn BotApi>, timeout_secs: u64) -> Self {
        Self { api, timeout_secs, state: Mutex::new(PollState::default()) }
    }

    pub async fn offset(&self) -> Option<i64> {
        self.state.lock().await.offset
    }
}

#[async_trait]
impl UpdateTransport for LongPollTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // getUpdates is refused while a webhook is registered.
        self.api
            .delete_webhook()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))
    }

    async fn next_update(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut state = self.state.lock().await;
        loop {
            if let Some(update) = state.buffered.pop_front() {
                return Ok(Some(update.into_envelope()));
            }
            let batch = self
                .api
                .get_updates(state.offset, self.timeout_secs)
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            debug!(event_name = "ingress.chat.polled", received = batch.len(), "long poll returned");
            state.buffered.extend(batch);
        }
    }

    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let next = update_id + 1;
        if state.offset.map_or(true, |offset| offset < next) {
            state.offset = Some(next);
        }
        Ok(())
    }

    async fn deliver(&self, chat_id: i64, reply: &ReplyMessage) -> Result<(), TransportError> {
        self.api
            .send_message(&SendMessage::new(chat_id, reply.clone()))
            .await
            .map_err(|error| TransportError::Deliver(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCall {
    GetUpdates { offset: Option<i64> },
    SendMessage(SendMessage),
    SetWebhook { url: String, secret_token: String },
    DeleteWebhook,
}

/// Replays scripted `getUpdates` batches and records every call.
///
/// Once the script runs dry `get_updates` fails, which ends a runner with no retries left.
#[derive(Debug, Default)]
pub struct ScriptedBotApi {
    batches: StdMutex<VecDeque<Result<Vec<Value>, BotApiError>>>,
    calls: StdMutex<Vec<BotCall>>,
    fail_sends: StdMutex<bool>,
}

impl ScriptedBotApi {
    pub fn push_batch(&self, updates: Vec<Value>) {
        lock(&self.batches).push_back(Ok(updates));
    }

    pub fn push_failure(&self, error: BotApiError) {
        lock(&self.batches).push_back(Err(error));
    }

    pub fn fail_sends(&self, fail: bool) {
        *lock(&self.fail_sends) = fail;
    }

    pub fn calls(&self) -> Vec<BotCall> {
        lock(&self.calls).clone()
    }

    pub fn sent_messages(&self) -> Vec<SendMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BotCall::SendMessage(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BotCall) {
        lock(&self.calls).push(call);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl BotApi for ScriptedBotApi {
    async fn get_updates(
        &self,
        offset: Option<i64>,
        _timeout_secs: u64,
    ) -> Result<Vec<Update>, BotApiError> {
        self.record(BotCall::GetUpdates { offset });
        let next = lock(&self.batches).pop_front();
        match next {
            Some(Ok(raw)) => Ok(decode_updates(raw)),
            Some(Err(error)) => Err(error),
            None => Err(BotApiError::Transport("no scripted updates left".to_owned())),
        }
    }

    async fn send_message(&self, message: &SendMessage) -> Result<(), BotApiError> {
        self.record(BotCall::SendMessage(message.clone()));
        if *lock(&self.fail_sends) {
            return Err(BotApiError::Rejected {
                method: "sendMessage".to_owned(),
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_owned(),
            });
        }
        Ok(())
    }

    async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), BotApiError> {
        self.record(BotCall::SetWebhook {
            url: url.to_owned(),
            secret_token: secret_token.to_owned(),
        });
        Ok(())
    }

    async fn delete_webhook(&self) -> Result<(), BotApiError> {
        self.record(BotCall::DeleteWebhook);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use convoy_agent::{NoticeKind, Notifier};
    use convoy_core::config::TelegramConfig;
    use convoy_core::domain::notification::NewNotification;
    use convoy_core::domain::trip::TripId;
    use convoy_core::domain::user::{NewUser, Role};
    use convoy_db::{FleetStore, InMemoryFleetStore};

    use super::{
        BotApi, BotApiError, BotCall, LongPollTransport, ScriptedBotApi, TelegramClient,
        TelegramNotifier,
    };
    use crate::events::{default_dispatcher, ChatEvent};
    use crate::keyboards::ReplyMarkup;
    use crate::runner::{ReconnectPolicy, UpdateRunner, UpdateTransport};

    fn config(base_url: &str) -> TelegramConfig {
        TelegramConfig {
            bot_token: Some(SecretString::from("123:abc".to_owned())),
            webhook_url: None,
            webhook_secret: None,
            api_base_url: base_url.to_owned(),
            poll_timeout_secs: 1,
        }
    }

    fn text_update(update_id: i64, chat_id: i64, text: &str) -> serde_json::Value {
        json!({
            "update_id": update_id,
            "message": {"chat": {"id": chat_id}, "from": {"id": chat_id}, "text": text}
        })
    }

    #[tokio::test]
    async fn client_posts_to_the_token_path_and_unwraps_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/getUpdates"))
            .and(body_partial_json(json!({"offset": 7, "timeout": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [text_update(7, 55, "/help"), {"update_id": 8, "message": "garbled"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/setWebhook"))
            .and(body_partial_json(json!({
                "url": "https://fleet.example/webhook",
                "secret_token": "s3cret"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .mount(&server)
            .await;

        let client = TelegramClient::from_config(&config(&server.uri())).expect("client");
        let envelopes = client
            .get_updates(Some(7), 1)
            .await
            .expect("updates")
            .into_iter()
            .map(|update| update.into_envelope())
            .collect::<Vec<_>>();
        assert_eq!(envelopes.iter().map(|e| e.update_id).collect::<Vec<_>>(), vec![7, 8]);
        assert!(matches!(envelopes[0].event, ChatEvent::Command(_)));
        assert!(matches!(envelopes[1].event, ChatEvent::Unsupported { .. }));

        client.set_webhook("https://fleet.example/webhook", "s3cret").await.expect("webhook set");
    }

    #[tokio::test]
    async fn client_surfaces_api_rejections_without_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::from_config(&config(&server.uri())).expect("client");
        let error = client
            .send_message(&crate::update::SendMessage::new(
                1,
                crate::keyboards::ReplyMessage::text("hi"),
            ))
            .await
            .expect_err("rejected");

        assert_eq!(
            error,
            BotApiError::Rejected {
                method: "sendMessage".to_owned(),
                status: 400,
                description: "Bad Request: chat not found".to_owned(),
            }
        );
        assert!(!format!("{client:?}").contains("abc"));
    }

    #[test]
    fn client_requires_a_bot_token() {
        let mut config = config("https://api.telegram.org");
        config.bot_token = None;
        assert!(matches!(
            TelegramClient::from_config(&config),
            Err(BotApiError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn assignment_notices_carry_the_confirm_button() {
        let store = Arc::new(InMemoryFleetStore::new());
        let driver = store
            .upsert_user(NewUser {
                external_id: "9001".to_owned(),
                role: Some(Role::Driver),
                ..NewUser::default()
            })
            .await
            .expect("driver");
        let api_user = store
            .upsert_user(NewUser { external_id: "api-7".to_owned(), ..NewUser::default() })
            .await
            .expect("api user");
        let api = Arc::new(ScriptedBotApi::default());
        let notifier = TelegramNotifier::new(api.clone(), store.clone());

        let assigned = store
            .create_notification(NewNotification::for_trip(
                driver.id,
                TripId(12),
                "You have been assigned to Trip #12",
                Utc::now(),
            ))
            .await
            .expect("notice");
        notifier.publish(&assigned, NoticeKind::Assignment).await;
        let unreachable = store
            .create_notification(NewNotification::for_trip(api_user.id, TripId(12), "hi", Utc::now()))
            .await
            .expect("notice");
        notifier.publish(&unreachable, NoticeKind::Message).await;

        let sent = api.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 9001);
        assert_eq!(sent[0].text, "You have been assigned to Trip #12");
        let Some(ReplyMarkup::Inline { inline_keyboard }) = &sent[0].reply_markup else {
            panic!("expected inline keyboard, got {:?}", sent[0].reply_markup);
        };
        assert_eq!(inline_keyboard[0][0].text, "Confirm Trip");
        assert_eq!(inline_keyboard[0][0].callback_data, "confirm_trip_12");
    }

    #[tokio::test]
    async fn blocked_recipients_do_not_fail_publishing() {
        let store = Arc::new(InMemoryFleetStore::new());
        let shipper = store
            .upsert_user(NewUser { external_id: "42".to_owned(), ..NewUser::default() })
            .await
            .expect("shipper");
        let api = Arc::new(ScriptedBotApi::default());
        api.fail_sends(true);
        let notice = store
            .create_notification(NewNotification::for_trip(shipper.id, TripId(3), "late", Utc::now()))
            .await
            .expect("notice");

        TelegramNotifier::new(api.clone(), store.clone())
            .publish(&notice, NoticeKind::TripUpdate)
            .await;

        assert_eq!(api.sent_messages().len(), 1);
        assert!(api.sent_messages()[0].reply_markup.is_none());
    }

    #[tokio::test]
    async fn long_poll_advances_the_offset_past_acknowledged_updates() {
        let api = Arc::new(ScriptedBotApi::default());
        api.push_batch(vec![text_update(40, 1, "hello"), text_update(41, 1, "again")]);
        api.push_batch(vec![text_update(42, 1, "third")]);
        let transport = LongPollTransport::new(api.clone(), 30);

        transport.connect().await.expect("connect");
        for expected in [40, 41, 42] {
            let envelope = transport.next_update().await.expect("poll").expect("update");
            assert_eq!(envelope.update_id, expected);
            transport.acknowledge(envelope.update_id).await.expect("ack");
        }
        assert_eq!(transport.offset().await, Some(43));
        transport.acknowledge(10).await.expect("stale ack");
        assert_eq!(transport.offset().await, Some(43));

        assert_eq!(
            api.calls(),
            vec![
                BotCall::DeleteWebhook,
                BotCall::GetUpdates { offset: None },
                BotCall::GetUpdates { offset: Some(42) },
            ]
        );
    }

    #[tokio::test]
    async fn runner_answers_polled_updates_through_send_message() {
        let api = Arc::new(ScriptedBotApi::default());
        api.push_batch(vec![text_update(1, 314, "/set_role pilot")]);
        api.push_batch(vec![]);
        let transport = Arc::new(LongPollTransport::new(api.clone(), 30));
        let runner = UpdateRunner::new(
            transport.clone(),
            Arc::new(default_dispatcher()),
            ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner ends once the script is exhausted");

        let sent = api.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 314);
        assert!(sent[0].text.starts_with("Please provide a valid role"));
        assert_eq!(transport.offset().await, Some(2));
    }
}
