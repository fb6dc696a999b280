//! Chat transport adapter for convoy.
//!
//! - **Updates** (`update`) - Telegram-shaped update JSON into [`events::ChatEnvelope`]
//! - **Events** (`events`) - routes envelopes to per-kind handlers
//! - **Commands** (`commands`) - `/start`, `/help`, `/status <trip_id>`, `/set_role <role>`
//! - **Keyboards** (`keyboards`) - reply text plus quick-reply and inline keyboards
//! - **Service** (`service`) - the store- and agent-backed implementation of the handlers
//! - **Runner** (`runner`) - pull loop over an [`runner::UpdateTransport`] with reconnects
//! - **Telegram** (`telegram`) - Bot API client, outbound notifier and long-poll transport
//!
//! # Architecture
//!
//! ```text
//! Update JSON → ChatEnvelope → EventDispatcher → Handlers → FleetChatService
//!                                                              ├─ TripLifecycle (quick replies)
//!                                                              └─ AgentDirectory (free text)
//!                                  ReplyMessage ←──────────────┘
//! ```

pub mod commands;
pub mod events;
pub mod keyboards;
pub mod runner;
pub mod service;
pub mod telegram;
pub mod update;

pub use events::{ChatEnvelope, ChatEvent, EventDispatcher, HandlerResult};
pub use keyboards::ReplyMessage;
pub use runner::{ReconnectPolicy, UpdateRunner};
pub use service::{fleet_dispatcher, FleetChatService};
pub use telegram::{BotApi, LongPollTransport, TelegramClient, TelegramNotifier};
pub use update::{parse_update, UpdateError};
