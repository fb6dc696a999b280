//! `GET /health`: ready only when the database answers, the schema is current and the chat
//! ingress that was configured is actually running.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use convoy_db::{migrations, DbPool};
use serde::Serialize;

use crate::bootstrap::{ChatMode, ChatTransport};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    chat: ChatTransport,
}

impl HealthState {
    pub fn new(db_pool: DbPool, chat: ChatTransport) -> Self {
        Self { db_pool, chat }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Ready, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Degraded, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: CheckStatus,
    pub database: HealthCheck,
    pub migrations: HealthCheck,
    pub chat: HealthCheck,
    pub chat_mode: &'static str,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let migrations = migrations_check(&state.db_pool).await;
    let chat = chat_check(&state.chat);
    let ready = [&database, &migrations, &chat]
        .into_iter()
        .all(|check| check.status == CheckStatus::Ready);

    let payload = HealthResponse {
        status: if ready { CheckStatus::Ready } else { CheckStatus::Degraded },
        database,
        migrations,
        chat,
        chat_mode: state.chat.mode().as_str(),
        checked_at: Utc::now().to_rfc3339(),
    };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn migrations_check(pool: &DbPool) -> HealthCheck {
    match migrations::pending_count(pool).await {
        Ok(0) => HealthCheck::ready("schema is current"),
        Ok(pending) => HealthCheck::degraded(format!("{pending} migration(s) pending")),
        Err(error) => HealthCheck::degraded(format!("migration state unreadable: {error}")),
    }
}

fn chat_check(chat: &ChatTransport) -> HealthCheck {
    match (chat.mode(), chat.poller_running()) {
        (ChatMode::Disabled, _) => HealthCheck::ready("no bot token; chat ingress off"),
        (ChatMode::Webhook, _) => HealthCheck::ready("webhook registered"),
        (ChatMode::LongPoll, Some(true)) => HealthCheck::ready("long-poll runner active"),
        (ChatMode::LongPoll, _) => HealthCheck::degraded("long-poll runner stopped"),
    }
}
