//! Pull loop for transports that hand us updates one at a time (Telegram long polling).
//!
//! Each update is acknowledged before it is handled, so a handler that keeps failing cannot
//! wedge the stream. Transport failures reconnect with capped exponential backoff; a connection
//! that handled at least one update earns a fresh retry budget.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{ChatEnvelope, EventContext, EventDispatcher, HANDLER_FAILURE_REPLY};
use crate::keyboards::ReplyMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("chat transport failed to connect: {0}")]
    Connect(String),
    #[error("chat transport poll failed: {0}")]
    Receive(String),
    #[error("chat transport delivery failed: {0}")]
    Deliver(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 8, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// Source of chat updates and sink for replies.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `None` once the stream is closed.
    async fn next_update(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn deliver(&self, chat_id: i64, reply: &ReplyMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

pub struct UpdateRunner {
    transport: Arc<dyn UpdateTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl UpdateRunner {
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Runs until the transport closes its stream or the retry budget is spent.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            let mut handled = 0_usize;
            let error = match self.pump(attempt, &mut handled).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            if handled > 0 {
                attempt = 0;
            }
            warn!(
                event_name = "ingress.chat.transport_failed",
                attempt,
                handled,
                max_retries = self.reconnect_policy.max_retries,
                error = %error,
                "chat transport failed"
            );
            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    event_name = "ingress.chat.transport_abandoned",
                    max_retries = self.reconnect_policy.max_retries,
                    "chat transport retries exhausted; webhook and API keep serving"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn pump(&self, attempt: u32, handled: &mut usize) -> Result<(), TransportError> {
        self.transport.connect().await?;
        info!(event_name = "ingress.chat.transport_connected", attempt, "chat transport connected");

        while let Some(envelope) = self.transport.next_update().await? {
            self.handle(envelope).await?;
            *handled += 1;
        }
        info!(event_name = "ingress.chat.transport_closed", handled = *handled, "chat stream closed");
        if let Err(error) = self.transport.disconnect().await {
            debug!(event_name = "ingress.chat.disconnect_failed", error = %error, "disconnect failed");
        }
        Ok(())
    }

    async fn handle(&self, envelope: ChatEnvelope) -> Result<(), TransportError> {
        let context = EventContext { correlation_id: envelope.correlation_id() };
        info!(
            event_name = "ingress.chat.update_received",
            update_id = envelope.update_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %context.correlation_id,
            "received chat update"
        );
        self.transport.acknowledge(envelope.update_id).await?;

        let reply = match self.dispatcher.dispatch(&envelope, &context).await {
            Ok(result) => result.into_reply(),
            Err(error) => {
                warn!(
                    event_name = "ingress.chat.dispatch_failed",
                    update_id = envelope.update_id,
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "event dispatch failed"
                );
                Some(ReplyMessage::text(HANDLER_FAILURE_REPLY))
            }
        };

        let (Some(reply), Some(chat_id)) = (reply, envelope.chat_id()) else {
            return Ok(());
        };
        // A user who blocked the bot must not recycle the connection.
        if let Err(error) = self.transport.deliver(chat_id, &reply).await {
            warn!(
                event_name = "ingress.chat.delivery_failed",
                update_id = envelope.update_id,
                correlation_id = %context.correlation_id,
                chat_id,
                error = %error,
                "reply not delivered"
            );
        }
        Ok(())
    }
}
