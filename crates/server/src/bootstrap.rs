use std::sync::Arc;

use convoy_agent::{
    AgentDirectory, AgentSettings, LlmClient, LlmError, OpenAiCompatibleClient, TripLifecycle,
};
use convoy_chat::telegram::BotApiError;
use convoy_chat::{
    fleet_dispatcher, BotApi, EventDispatcher, FleetChatService, LongPollTransport,
    ReconnectPolicy, TelegramClient, TelegramNotifier, UpdateRunner,
};
use convoy_core::config::{AppConfig, ConfigError, TelegramConfig};
use convoy_db::{connect_with_settings, migrations, DbPool, FleetStore, SqlFleetStore};
use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<dyn FleetStore>,
    pub lifecycle: TripLifecycle,
    pub agents: Arc<AgentDirectory>,
    pub chat: Arc<EventDispatcher>,
    pub bot: Option<Arc<dyn BotApi>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("telegram setup failed: {0}")]
    Telegram(#[from] BotApiError),
}

/// How chat updates reach the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatMode {
    /// No bot token: only the JSON API is served.
    Disabled,
    /// Telegram pushes to `POST /webhook`.
    Webhook,
    /// The server pulls with `getUpdates`.
    LongPoll,
}

impl ChatMode {
    pub fn from_config(config: &TelegramConfig) -> Self {
        match (&config.bot_token, &config.webhook_url) {
            (None, _) => Self::Disabled,
            (Some(_), Some(_)) => Self::Webhook,
            (Some(_), None) => Self::LongPoll,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Webhook => "webhook",
            Self::LongPoll => "long_poll",
        }
    }
}

/// The running chat ingress. Long-poll mode owns the runner task.
#[derive(Clone, Debug)]
pub struct ChatTransport {
    mode: ChatMode,
    poller: Option<Arc<JoinHandle<()>>>,
}

impl ChatTransport {
    pub fn idle(mode: ChatMode) -> Self {
        Self { mode, poller: None }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    /// `None` unless long polling was started.
    pub fn poller_running(&self) -> Option<bool> {
        self.poller.as_ref().map(|poller| !poller.is_finished())
    }

    pub fn stop(&self) {
        if let Some(poller) = &self.poller {
            poller.abort();
        }
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        chat_mode = ChatMode::from_config(&config.telegram).as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    let store: Arc<dyn FleetStore> = Arc::new(SqlFleetStore::new(db_pool.clone()));
    let bot: Option<Arc<dyn BotApi>> = match config.telegram.bot_token {
        Some(_) => Some(Arc::new(TelegramClient::from_config(&config.telegram)?)),
        None => None,
    };

    Ok(assemble(config, db_pool, store, llm, bot))
}

/// Wires the services on top of an already prepared store, model client and bot client.
pub fn assemble(
    config: AppConfig,
    db_pool: DbPool,
    store: Arc<dyn FleetStore>,
    llm: Arc<dyn LlmClient>,
    bot: Option<Arc<dyn BotApi>>,
) -> Application {
    let mut lifecycle = TripLifecycle::new(store.clone(), Arc::new(TracingAuditSink));
    if let Some(bot) = &bot {
        lifecycle =
            lifecycle.with_notifier(Arc::new(TelegramNotifier::new(bot.clone(), store.clone())));
    }
    let agents = Arc::new(AgentDirectory::new(
        store.clone(),
        lifecycle.clone(),
        llm,
        AgentSettings::from(&config.agent),
    ));
    let chat_service = FleetChatService::new(store.clone(), lifecycle.clone(), agents.clone());

    Application {
        config,
        db_pool,
        store,
        lifecycle,
        agents,
        chat: Arc::new(fleet_dispatcher(chat_service)),
        bot,
    }
}

/// Registers the webhook, or starts long polling when no webhook URL is configured.
pub async fn start_chat_transport(app: &Application) -> Result<ChatTransport, BootstrapError> {
    let telegram = &app.config.telegram;
    let mode = ChatMode::from_config(telegram);
    let Some(bot) = app.bot.clone() else {
        if mode != ChatMode::Disabled {
            warn!(
                event_name = "system.bootstrap.chat_unwired",
                correlation_id = "bootstrap",
                "bot token configured but no bot client assembled"
            );
        }
        return Ok(ChatTransport::idle(ChatMode::Disabled));
    };

    match (mode, &telegram.webhook_url, &telegram.webhook_secret) {
        (ChatMode::Webhook, Some(url), Some(secret)) => {
            bot.set_webhook(url, secret.expose_secret()).await?;
            info!(
                event_name = "system.bootstrap.webhook_registered",
                correlation_id = "bootstrap",
                webhook_url = %url,
                "telegram webhook registered"
            );
            Ok(ChatTransport::idle(ChatMode::Webhook))
        }
        (ChatMode::Webhook, _, _) => Err(BotApiError::Configuration(
            "telegram.webhook_url requires telegram.webhook_secret".to_owned(),
        )
        .into()),
        (ChatMode::Disabled, _, _) => Ok(ChatTransport::idle(ChatMode::Disabled)),
        (ChatMode::LongPoll, _, _) => {
            let transport = Arc::new(LongPollTransport::new(bot, telegram.poll_timeout_secs));
            let runner = UpdateRunner::new(transport, app.chat.clone(), ReconnectPolicy::default());
            let poller = tokio::spawn(async move {
                if let Err(error) = runner.start().await {
                    warn!(
                        event_name = "ingress.chat.runner_failed",
                        correlation_id = "poller",
                        error = %error,
                        "long-poll runner stopped"
                    );
                }
            });
            info!(
                event_name = "system.bootstrap.long_poll_started",
                correlation_id = "bootstrap",
                poll_timeout_secs = telegram.poll_timeout_secs,
                "telegram long polling started"
            );
            Ok(ChatTransport { mode: ChatMode::LongPoll, poller: Some(Arc::new(poller)) })
        }
    }
}
