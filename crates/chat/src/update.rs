use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{CallbackQueryEvent, ChatEnvelope, ChatEvent, Sender, SharedLocationEvent};
use crate::keyboards::{ReplyMarkup, ReplyMessage};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("malformed update payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<UpdateUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub location: Option<SharedLocation>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UpdateUser {
    fn sender(&self) -> Sender {
        Sender {
            external_id: self.id.to_string(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SharedLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: UpdateUser,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

pub fn parse_update(body: &str) -> Result<ChatEnvelope, UpdateError> {
    let update: Update = serde_json::from_str(body)?;
    Ok(update.into_envelope())
}

impl Update {
    pub fn into_envelope(self) -> ChatEnvelope {
        let event = match (self.message, self.callback_query) {
            (_, Some(query)) => callback_event(query),
            (Some(message), None) => message_event(message),
            (None, None) => ChatEvent::Unsupported { kind: "empty".to_owned() },
        };
        ChatEnvelope { update_id: self.update_id, event }
    }
}

fn message_event(message: Message) -> ChatEvent {
    let Some(from) = &message.from else {
        return ChatEvent::Unsupported { kind: "anonymous_message".to_owned() };
    };
    let chat_id = message.chat.id;
    let sender = from.sender();

    if let Some(location) = message.location {
        return ChatEvent::Location(SharedLocationEvent {
            chat_id,
            sender,
            latitude: location.latitude,
            longitude: location.longitude,
        });
    }
    match message.text {
        Some(text) => ChatEvent::from_text(chat_id, sender, &text),
        None => ChatEvent::Unsupported { kind: "non_text_message".to_owned() },
    }
}

fn callback_event(query: CallbackQuery) -> ChatEvent {
    let Some(data) = query.data else {
        return ChatEvent::Unsupported { kind: "callback_without_data".to_owned() };
    };
    // Private chats share the user's id when the originating message is gone.
    let chat_id = query.message.as_ref().map(|message| message.chat.id).unwrap_or(query.from.id);
    ChatEvent::Callback(CallbackQueryEvent {
        chat_id,
        sender: query.from.sender(),
        query_id: query.id,
        data,
    })
}

/// Bot API `sendMessage` call, usable as a webhook response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SendMessage {
    pub method: &'static str,
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ReplyMarkup>,
}

impl SendMessage {
    pub fn new(chat_id: i64, reply: ReplyMessage) -> Self {
        Self { method: "sendMessage", chat_id, text: reply.text, reply_markup: reply.reply_markup }
    }
}
