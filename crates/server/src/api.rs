//! JSON surface over the fleet store, the trip lifecycle, the role agents and the chat webhook.
//!
//! Status writes never touch the trip row directly; they go through [`TripLifecycle`] so the
//! completed-trip guard and stakeholder fan-out apply here exactly as they do in chat.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use convoy_agent::roles::user_with_role;
use convoy_agent::{AgentDirectory, LifecycleError, NoticeKind, TripLifecycle, TurnReply};
use convoy_chat::events::{EventContext, HANDLER_FAILURE_REPLY};
use convoy_chat::update::SendMessage;
use convoy_chat::{parse_update, EventDispatcher, ReplyMessage};
use convoy_core::domain::issue::{Issue, IssueId};
use convoy_core::domain::location::{Location, NewLocation};
use convoy_core::domain::notification::{NewNotification, Notification, NotificationId};
use convoy_core::domain::status_update::StatusUpdate;
use convoy_core::domain::trip::{Coordinates, NewTrip, Trip, TripAssignment, TripId, TripStatus};
use convoy_core::domain::user::{NewUser, Role, User, UserId};
use convoy_core::errors::{ApplicationError, DomainError, InterfaceError};
use convoy_core::flows::TransitionRequest;
use convoy_db::{FleetStore, RepositoryError};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bootstrap::Application;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Telegram echoes the `secret_token` given to `setWebhook` in this header.
pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn FleetStore>,
    lifecycle: TripLifecycle,
    agents: Arc<AgentDirectory>,
    chat: Arc<EventDispatcher>,
    webhook_secret: Option<SecretString>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn FleetStore>,
        lifecycle: TripLifecycle,
        agents: Arc<AgentDirectory>,
        chat: Arc<EventDispatcher>,
    ) -> Self {
        Self { store, lifecycle, agents, chat, webhook_secret: None }
    }

    /// `POST /webhook` answers 404 until a secret is set.
    pub fn with_webhook_secret(mut self, secret: SecretString) -> Self {
        self.webhook_secret = Some(secret);
        self
    }

    pub fn from_application(app: &Application) -> Self {
        let state =
            Self::new(app.store.clone(), app.lifecycle.clone(), app.agents.clone(), app.chat.clone());
        match (&app.config.telegram.webhook_url, &app.config.telegram.webhook_secret) {
            (Some(_), Some(secret)) => state.with_webhook_secret(secret.clone()),
            _ => state,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/notifications", get(list_notifications))
        .route("/trips", post(create_trip))
        .route("/trips/{id}", get(get_trip).put(assign_trip))
        .route("/trips/{id}/status-updates", get(list_status_updates))
        .route("/status-updates", post(create_status_update))
        .route("/locations", post(record_location))
        .route("/issues", post(report_issue))
        .route("/issues/{id}/resolve", post(resolve_issue))
        .route("/notifications", post(create_notification))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .route("/agent/{role}/{user_id}/query", post(query_agent))
        .route("/webhook", post(chat_webhook))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    correlation_id: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_owned(),
        })
    }

    fn domain(violation: DomainError, correlation_id: &str) -> Self {
        Self(ApplicationError::from(violation).into_interface(correlation_id))
    }

    fn lifecycle(error: LifecycleError, correlation_id: &str) -> Self {
        Self(error.into_application().into_interface(correlation_id))
    }

    fn persistence(error: RepositoryError, correlation_id: &str) -> Self {
        let correlation_id = correlation_id.to_owned();
        match error {
            RepositoryError::NotFound(message) => Self(InterfaceError::NotFound { message, correlation_id }),
            RepositoryError::Conflict(message) => Self(InterfaceError::Conflict { message, correlation_id }),
            other => {
                warn!(
                    event_name = "api.persistence_failed",
                    correlation_id = %correlation_id,
                    error = %other,
                    "store call failed"
                );
                Self(InterfaceError::ServiceUnavailable { message: other.to_string(), correlation_id })
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self.0 {
            InterfaceError::BadRequest { ref message, .. } => (StatusCode::BAD_REQUEST, Some(message.clone())),
            InterfaceError::NotFound { ref message, .. } => (StatusCode::NOT_FOUND, Some(message.clone())),
            InterfaceError::Conflict { ref message, .. } => (StatusCode::CONFLICT, Some(message.clone())),
            // Store and transport details stay in the logs.
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn require_text(value: &str, field: &str, correlation_id: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty"), correlation_id));
    }
    Ok(())
}

async fn load_user(state: &ApiState, id: UserId, correlation_id: &str) -> ApiResult<User> {
    state
        .store
        .find_user(id)
        .await
        .map_err(|error| ApiError::persistence(error, correlation_id))?
        .ok_or_else(|| ApiError::domain(DomainError::UserNotFound(id), correlation_id))
}

async fn load_trip(state: &ApiState, id: TripId, correlation_id: &str) -> ApiResult<Trip> {
    state
        .store
        .find_trip(id)
        .await
        .map_err(|error| ApiError::persistence(error, correlation_id))?
        .ok_or_else(|| ApiError::domain(DomainError::TripNotFound(id), correlation_id))
}

/// Every named party must exist and hold the slot's role.
async fn check_parties(
    state: &ApiState,
    parties: [(Role, Option<UserId>); 4],
    correlation_id: &str,
) -> ApiResult<()> {
    for (role, id) in parties {
        let Some(id) = id else { continue };
        user_with_role(state.store.as_ref(), id, role)
            .await
            .map_err(|error| ApiError::persistence(error, correlation_id))?
            .map_err(|violation| ApiError::domain(violation, correlation_id))?;
    }
    Ok(())
}

async fn notify_assigned_driver(state: &ApiState, trip: &Trip, correlation_id: &str) {
    let Some(driver) = trip.driver_id else { return };
    let notice = NewNotification::for_trip(
        driver,
        trip.id,
        format!("You have been assigned to Trip #{}", trip.id),
        Utc::now(),
    );
    if let Err(error) = state.lifecycle.notify(notice, NoticeKind::Assignment).await {
        warn!(
            event_name = "api.trip.driver_notice_failed",
            correlation_id,
            trip_id = %trip.id,
            error = %error,
            "could not notify assigned driver"
        );
    }
}

async fn create_user(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(user): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let correlation_id = correlation_id(&headers);
    require_text(&user.external_id, "external_id", &correlation_id)?;

    let user = state
        .store
        .upsert_user(user)
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    let correlation_id = correlation_id(&headers);
    Ok(Json(load_user(&state, UserId(id), &correlation_id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct NotificationFilter {
    #[serde(default)]
    unread_only: bool,
}

async fn list_notifications(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(filter): Query<NotificationFilter>,
) -> ApiResult<Json<Vec<Notification>>> {
    let correlation_id = correlation_id(&headers);
    let user = load_user(&state, UserId(id), &correlation_id).await?;
    let notifications = state
        .store
        .list_notifications(user.id, filter.unread_only)
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    Ok(Json(notifications))
}

async fn create_trip(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(trip): Json<NewTrip>,
) -> ApiResult<(StatusCode, Json<Trip>)> {
    let correlation_id = correlation_id(&headers);
    require_text(&trip.pickup_address, "pickup_address", &correlation_id)?;
    require_text(&trip.delivery_address, "delivery_address", &correlation_id)?;
    require_text(&trip.cargo_description, "cargo_description", &correlation_id)?;
    check_parties(
        &state,
        [
            (Role::Driver, trip.driver_id),
            (Role::Shipper, trip.shipper_id),
            (Role::Consignee, trip.consignee_id),
            (Role::Manager, trip.manager_id),
        ],
        &correlation_id,
    )
    .await?;

    let trip = state
        .store
        .create_trip(trip)
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    info!(
        event_name = "api.trip.created",
        correlation_id = %correlation_id,
        trip_id = %trip.id,
        "trip created"
    );
    notify_assigned_driver(&state, &trip, &correlation_id).await;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<Trip>> {
    let correlation_id = correlation_id(&headers);
    Ok(Json(load_trip(&state, TripId(id), &correlation_id).await?))
}

async fn assign_trip(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(assignment): Json<TripAssignment>,
) -> ApiResult<Json<Trip>> {
    let correlation_id = correlation_id(&headers);
    if assignment.is_empty() {
        return Err(ApiError::bad_request(
            "assignment must name at least one party",
            &correlation_id,
        ));
    }

    let current = load_trip(&state, TripId(id), &correlation_id).await?;
    if current.status.is_terminal() {
        return Err(ApiError::domain(
            DomainError::TerminalTrip { trip_id: current.id },
            &correlation_id,
        ));
    }
    check_parties(
        &state,
        [
            (Role::Driver, assignment.driver_id),
            (Role::Shipper, assignment.shipper_id),
            (Role::Consignee, assignment.consignee_id),
            (Role::Manager, assignment.manager_id),
        ],
        &correlation_id,
    )
    .await?;

    let new_driver = assignment.driver_id.filter(|driver| current.driver_id != Some(*driver));
    let trip = state
        .store
        .update_trip_assignment(current.id, assignment)
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    if new_driver.is_some() {
        notify_assigned_driver(&state, &trip, &correlation_id).await;
    }
    Ok(Json(trip))
}

async fn list_status_updates(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<StatusUpdate>>> {
    let correlation_id = correlation_id(&headers);
    let trip = load_trip(&state, TripId(id), &correlation_id).await?;
    let history = state
        .store
        .list_status_updates(trip.id)
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    trip_id: TripId,
    actor_id: UserId,
    status: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransitionResponse {
    trip: Trip,
    status_update: StatusUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    issue: Option<Issue>,
    notified: usize,
}

async fn create_status_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<StatusUpdateRequest>,
) -> ApiResult<(StatusCode, Json<TransitionResponse>)> {
    let correlation_id = correlation_id(&headers);
    let status = TripStatus::parse(&request.status).ok_or_else(|| {
        ApiError::bad_request(format!("Invalid status: {}", request.status), &correlation_id)
    })?;
    let actor = load_user(&state, request.actor_id, &correlation_id).await?;

    let mut transition = TransitionRequest::new(status, actor.id);
    if let Some(notes) = request.notes.filter(|notes| !notes.trim().is_empty()) {
        transition = transition.with_notes(notes);
    }
    let committed = state
        .lifecycle
        .transition(request.trip_id, transition, None, &correlation_id)
        .await
        .map_err(|error| ApiError::lifecycle(error, &correlation_id))?;

    Ok((
        StatusCode::CREATED,
        Json(TransitionResponse {
            notified: committed.notifications.len(),
            trip: committed.trip,
            status_update: committed.status_update,
            issue: committed.issue,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct LocationRequest {
    trip_id: TripId,
    latitude: f64,
    longitude: f64,
}

async fn record_location(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<LocationRequest>,
) -> ApiResult<(StatusCode, Json<Location>)> {
    let correlation_id = correlation_id(&headers);
    if !(-90.0..=90.0).contains(&request.latitude) || !(-180.0..=180.0).contains(&request.longitude)
    {
        return Err(ApiError::bad_request("coordinates are out of range", &correlation_id));
    }
    let trip = load_trip(&state, request.trip_id, &correlation_id).await?;

    let location = state
        .store
        .record_location(NewLocation {
            trip_id: trip.id,
            coordinates: Coordinates::new(request.latitude, request.longitude),
            recorded_at: Utc::now(),
        })
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(location)))
}

#[derive(Debug, Deserialize)]
struct IssueRequest {
    trip_id: TripId,
    reporter_id: UserId,
    description: String,
}

async fn report_issue(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<IssueRequest>,
) -> ApiResult<(StatusCode, Json<TransitionResponse>)> {
    let correlation_id = correlation_id(&headers);
    require_text(&request.description, "description", &correlation_id)?;
    let reporter = load_user(&state, request.reporter_id, &correlation_id).await?;

    let committed = state
        .lifecycle
        .report_issue(request.trip_id, reporter.id, request.description.trim(), &correlation_id)
        .await
        .map_err(|error| ApiError::lifecycle(error, &correlation_id))?;

    Ok((
        StatusCode::CREATED,
        Json(TransitionResponse {
            notified: committed.notifications.len(),
            trip: committed.trip,
            status_update: committed.status_update,
            issue: committed.issue,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    actor_id: UserId,
}

async fn resolve_issue(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<Issue>> {
    let correlation_id = correlation_id(&headers);
    let actor = load_user(&state, request.actor_id, &correlation_id).await?;

    let resolved = state
        .lifecycle
        .resolve_issue(IssueId(id), actor.id, &correlation_id)
        .await
        .map_err(|error| ApiError::lifecycle(error, &correlation_id))?;
    Ok(Json(resolved.issue))
}

#[derive(Debug, Deserialize)]
struct NotificationRequest {
    recipient_id: UserId,
    #[serde(default)]
    trip_id: Option<TripId>,
    message: String,
}

async fn create_notification(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<NotificationRequest>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    let correlation_id = correlation_id(&headers);
    require_text(&request.message, "message", &correlation_id)?;
    let recipient = load_user(&state, request.recipient_id, &correlation_id).await?;
    if let Some(trip_id) = request.trip_id {
        load_trip(&state, trip_id, &correlation_id).await?;
    }

    let notification = state
        .lifecycle
        .notify(
            NewNotification {
                recipient_id: recipient.id,
                trip_id: request.trip_id,
                message: request.message,
                created_at: Utc::now(),
            },
            NoticeKind::Message,
        )
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(notification)))
}

async fn mark_notification_read(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<Notification>> {
    let correlation_id = correlation_id(&headers);
    let notification = state
        .store
        .mark_notification_read(NotificationId(id))
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?;
    Ok(Json(notification))
}

#[derive(Debug, Deserialize)]
struct AgentQuery {
    message: String,
}

async fn query_agent(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((role, user_id)): Path<(String, i64)>,
    Json(query): Json<AgentQuery>,
) -> ApiResult<Json<TurnReply>> {
    let correlation_id = correlation_id(&headers);
    let role = Role::parse(&role)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown role: {role}"), &correlation_id))?;
    require_text(&query.message, "message", &correlation_id)?;
    let principal = user_with_role(state.store.as_ref(), UserId(user_id), role)
        .await
        .map_err(|error| ApiError::persistence(error, &correlation_id))?
        .map_err(|violation| ApiError::domain(violation, &correlation_id))?;

    let reply = state.agents.handle_message(role, principal.id, &query.message).await;
    info!(
        event_name = "api.agent.replied",
        correlation_id = %correlation_id,
        turn_correlation_id = %reply.correlation_id,
        role = role.as_str(),
        status = ?reply.status,
        "agent query answered"
    );
    Ok(Json(reply))
}

fn webhook_authorized(expected: &SecretString, headers: &HeaderMap) -> bool {
    let Some(presented) = headers.get(WEBHOOK_SECRET_HEADER) else {
        return false;
    };
    let expected = expected.expose_secret().as_bytes();
    let presented = presented.as_bytes();
    // Constant time over equal-length inputs.
    expected.len() == presented.len()
        && expected.iter().zip(presented).fold(0_u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

/// Answers a chat update inline: the reply goes back as the webhook response body.
async fn chat_webhook(State(state): State<ApiState>, headers: HeaderMap, body: String) -> Response {
    let Some(secret) = &state.webhook_secret else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !webhook_authorized(secret, &headers) {
        warn!(event_name = "ingress.chat.unauthorized", "webhook call without a valid secret token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let envelope = match parse_update(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(event_name = "ingress.chat.malformed_update", error = %error, "rejected webhook body");
            return ApiError::bad_request(error.to_string(), "webhook").into_response();
        }
    };
    let context = EventContext { correlation_id: envelope.correlation_id() };
    info!(
        event_name = "ingress.chat.update_received",
        update_id = envelope.update_id,
        event_type = ?envelope.event.event_type(),
        correlation_id = %context.correlation_id,
        "received chat update"
    );

    let reply = match state.chat.dispatch(&envelope, &context).await {
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

    match (reply, envelope.chat_id()) {
        (Some(reply), Some(chat_id)) => Json(SendMessage::new(chat_id, reply)).into_response(),
        _ => StatusCode::OK.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use convoy_agent::{
        AgentDirectory, AgentSettings, NoticeKind, RecordingNotifier, ScriptedLlmClient,
        TripLifecycle,
    };
    use convoy_chat::{fleet_dispatcher, FleetChatService};
    use convoy_core::domain::trip::{TripId, TripStatus};
    use convoy_core::domain::user::UserId;
    use convoy_db::{DemoFleetDataset, FleetStore, InMemoryFleetStore};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState, CORRELATION_HEADER, WEBHOOK_SECRET_HEADER};

    const SECRET: &str = "s3cret-token";

    struct Fixture {
        store: Arc<InMemoryFleetStore>,
        llm: Arc<ScriptedLlmClient>,
        notifier: RecordingNotifier,
        state: ApiState,
        app: Router,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryFleetStore::new());
        DemoFleetDataset::load(store.as_ref()).await.expect("demo fleet loads");
        let llm = Arc::new(ScriptedLlmClient::default());
        let notifier = RecordingNotifier::default();
        let lifecycle =
            TripLifecycle::without_audit(store.clone()).with_notifier(Arc::new(notifier.clone()));
        let agents = Arc::new(AgentDirectory::new(
            store.clone(),
            lifecycle.clone(),
            llm.clone(),
            AgentSettings::default(),
        ));
        let chat = Arc::new(fleet_dispatcher(FleetChatService::new(
            store.clone(),
            lifecycle.clone(),
            agents.clone(),
        )));
        let state = ApiState::new(store.clone(), lifecycle, agents, chat)
            .with_webhook_secret(SecretString::from(SECRET.to_owned()));
        let app = router(state.clone());
        Fixture { store, llm, notifier, state, app }
    }

    async fn post_webhook(app: &Router, secret: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(CORRELATION_HEADER, "req-1")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            request = request.header(WEBHOOK_SECRET_HEADER, secret);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body.to_owned())).expect("request"))
            .await
            .expect("router answers");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).expect("request"))
            .await
            .expect("router answers");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    #[tokio::test]
    async fn users_round_trip_through_the_store() {
        let fixture = fixture().await;

        let (status, created) = call(
            &fixture.app,
            "POST",
            "/users",
            Some(json!({"external_id": "tg-77", "first_name": "Rosa", "role": "driver"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["role"], "driver");

        let (status, fetched) =
            call(&fixture.app, "GET", &format!("/users/{}", created["id"]), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["external_id"], "tg-77");

        let (status, missing) = call(&fixture.app, "GET", "/users/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing["detail"], "User #404 not found.");
    }

    #[tokio::test]
    async fn trip_creation_checks_party_roles_and_notifies_the_driver() {
        let fixture = fixture().await;
        let trip = json!({
            "pickup_address": "Port of Tacoma",
            "delivery_address": "Spokane DC",
            "cargo_description": "Pallets",
            "driver_id": 4,
        });

        let (status, body) = call(&fixture.app, "POST", "/trips", Some(trip.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "User #4 is not a driver.");

        let mut trip = trip;
        trip["driver_id"] = json!(3);
        trip["shipper_id"] = json!(4);
        let (status, created) = call(&fixture.app, "POST", "/trips", Some(trip)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "assigned");

        let inbox = fixture.store.list_notifications(UserId(3), true).await.expect("inbox");
        assert!(inbox.iter().any(|n| n.message == format!("You have been assigned to Trip #{}", created["id"])));
    }

    #[tokio::test]
    async fn status_updates_go_through_the_lifecycle() {
        let fixture = fixture().await;

        let (status, body) = call(
            &fixture.app,
            "POST",
            "/status-updates",
            Some(json!({"trip_id": 2, "actor_id": 2, "status": "at_destination"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["trip"]["status"], "at_destination");
        assert!(body["notified"].as_u64().unwrap_or_default() >= 1);

        let (status, history) = call(&fixture.app, "GET", "/trips/2/status-updates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["status"], "at_destination");

        let (status, body) = call(
            &fixture.app,
            "POST",
            "/status-updates",
            Some(json!({"trip_id": 2, "actor_id": 2, "status": "teleported"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid status: teleported");
    }

    #[tokio::test]
    async fn completed_trips_reject_status_and_assignment_changes() {
        let fixture = fixture().await;

        let (status, body) = call(
            &fixture.app,
            "POST",
            "/status-updates",
            Some(json!({"trip_id": 1, "actor_id": 2, "status": "in_transit"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Trip #1 is already completed and can no longer be updated.");

        let (status, _) =
            call(&fixture.app, "PUT", "/trips/1", Some(json!({"driver_id": 3}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let trip = fixture.store.find_trip(TripId(1)).await.expect("read").expect("trip");
        assert_eq!(trip.status, TripStatus::Completed);
        assert_eq!(trip.driver_id, Some(UserId(2)));
    }

    #[tokio::test]
    async fn issues_are_reported_then_resolved_once() {
        let fixture = fixture().await;

        let (status, reported) = call(
            &fixture.app,
            "POST",
            "/issues",
            Some(json!({"trip_id": 2, "reporter_id": 2, "description": "flat tire"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(reported["trip"]["status"], "issue_reported");
        let issue_id = reported["issue"]["id"].as_i64().expect("issue id");

        let uri = format!("/issues/{issue_id}/resolve");
        let (status, resolved) = call(&fixture.app, "POST", &uri, Some(json!({"actor_id": 1}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], "resolved");

        let (status, _) = call(&fixture.app, "POST", &uri, Some(json!({"actor_id": 1}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn notifications_can_be_sent_listed_and_read() {
        let fixture = fixture().await;

        let (status, sent) = call(
            &fixture.app,
            "POST",
            "/notifications",
            Some(json!({"recipient_id": 5, "trip_id": 2, "message": "Dock 4 is ready"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, unread) =
            call(&fixture.app, "GET", "/users/5/notifications?unread_only=true", None).await;
        assert!(unread.as_array().expect("list").iter().any(|n| n["message"] == "Dock 4 is ready"));

        let (status, read) =
            call(&fixture.app, "POST", &format!("/notifications/{}/read", sent["id"]), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["is_read"], true);

        let (status, _) = call(&fixture.app, "POST", "/notifications/9999/read", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn locations_are_range_checked() {
        let fixture = fixture().await;

        let (status, _) = call(
            &fixture.app,
            "POST",
            "/locations",
            Some(json!({"trip_id": 2, "latitude": 123.0, "longitude": 0.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, location) = call(
            &fixture.app,
            "POST",
            "/locations",
            Some(json!({"trip_id": 2, "latitude": 47.5, "longitude": -122.2})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(location["coordinates"]["latitude"], 47.5);
    }

    #[tokio::test]
    async fn agent_query_requires_the_matching_role() {
        let fixture = fixture().await;
        fixture.llm.push_reply("Tool: get_shipment_status\nParameters: trip_id=2");

        let (status, reply) = call(
            &fixture.app,
            "POST",
            "/agent/shipper/4/query",
            Some(json!({"message": "where is shipment 2?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["status"], "tool_completed");
        assert!(reply["text"].as_str().unwrap_or_default().contains("in_transit"));

        let (status, _) = call(
            &fixture.app,
            "POST",
            "/agent/manager/4/query",
            Some(json!({"message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            call(&fixture.app, "POST", "/agent/pilot/4/query", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_answers_with_a_send_message_call() {
        let fixture = fixture().await;
        let update = json!({
            "update_id": 10,
            "message": {"chat": {"id": 555}, "from": {"id": 9001}, "text": "/start"}
        });

        let (status, body) = post_webhook(&fixture.app, Some(SECRET), &update.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["method"], "sendMessage");
        assert_eq!(body["chat_id"], 555);
        assert!(body["reply_markup"]["inline_keyboard"].is_array());

        let ignored = json!({"update_id": 11, "edited_message": {}}).to_string();
        let (status, body) = post_webhook(&fixture.app, Some(SECRET), &ignored).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);

        let (status, _) = post_webhook(&fixture.app, Some(SECRET), "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_calls_without_the_secret_token() {
        let fixture = fixture().await;
        let update = json!({
            "update_id": 12,
            "message": {"chat": {"id": 556}, "from": {"id": 9002}, "text": "/start"}
        })
        .to_string();

        let (status, body) = post_webhook(&fixture.app, None, &update).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, Value::Null);
        let (status, _) = post_webhook(&fixture.app, Some("s3cret-tokeX"), &update).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = post_webhook(&fixture.app, Some("s3cret"), &update).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let sender = fixture.store.find_user_by_external_id("9002").await.expect("lookup");
        assert!(sender.is_none());
    }

    #[tokio::test]
    async fn webhook_is_absent_without_a_configured_secret() {
        let fixture = fixture().await;
        let mut state = fixture.state.clone();
        state.webhook_secret = None;
        let app = router(state);

        let (status, _) = post_webhook(&app, Some(SECRET), r#"{"update_id": 1}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stored_notifications_are_handed_to_the_notifier() {
        let fixture = fixture().await;

        let (status, created) = call(
            &fixture.app,
            "POST",
            "/trips",
            Some(json!({
                "pickup_address": "Port of Tacoma",
                "delivery_address": "Spokane DC",
                "cargo_description": "Pallets",
                "driver_id": 3,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(
            &fixture.app,
            "POST",
            "/notifications",
            Some(json!({"recipient_id": 5, "message": "Dock 4 is ready"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let published = fixture
            .notifier
            .published()
            .into_iter()
            .map(|(notification, kind)| (notification.recipient_id, notification.message, kind))
            .collect::<Vec<_>>();
        assert_eq!(
            published,
            vec![
                (
                    UserId(3),
                    format!("You have been assigned to Trip #{}", created["id"]),
                    NoticeKind::Assignment,
                ),
                (UserId(5), "Dock 4 is ready".to_owned(), NoticeKind::Message),
            ]
        );
    }
}
