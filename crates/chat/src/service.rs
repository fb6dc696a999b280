use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use convoy_agent::format;
use convoy_agent::{AgentDirectory, LifecycleError, NoticeKind, TripLifecycle};
use convoy_core::domain::location::NewLocation;
use convoy_core::domain::notification::NewNotification;
use convoy_core::domain::trip::{Coordinates, Trip, TripId, TripStatus};
use convoy_core::domain::user::{Role, User, UserId};
use convoy_core::flows::TransitionRequest;
use convoy_db::{active_trip_for_driver, FleetStore, RepositoryError};

use crate::commands::{help_text, ChatCommandService, CommandPayload, CommandRouteError};
use crate::events::{
    CallbackHandler, CallbackQueryEvent, CallbackService, CommandHandler, EventContext,
    EventDispatcher, EventHandlerError, LocationHandler, LocationService, Sender,
    SharedLocationEvent, TextMessageEvent, TextMessageHandler, TextMessageService,
};
use crate::keyboards::{
    driver_keyboard, keyboard_for, location_request, role_picker, survey, trip_confirmation,
    CallbackAction, QuickReply, ReplyMessage,
};

const NO_ROLE_REPLY: &str = "Please use /start to set your role first.";

/// Chat front end over the fleet store, the trip lifecycle and the per-user agents.
///
/// Quick replies, shared locations and callbacks are handled directly; any other text goes to
/// the sender's agent. Cheap to clone; clones share the pending-issue prompts.
#[derive(Clone)]
pub struct FleetChatService {
    store: Arc<dyn FleetStore>,
    lifecycle: TripLifecycle,
    agents: Arc<AgentDirectory>,
    /// Drivers who pressed "Report Issue"; their next text is the description.
    pending_issues: Arc<Mutex<HashMap<UserId, TripId>>>,
}

impl FleetChatService {
    pub fn new(
        store: Arc<dyn FleetStore>,
        lifecycle: TripLifecycle,
        agents: Arc<AgentDirectory>,
    ) -> Self {
        Self { store, lifecycle, agents, pending_issues: Arc::new(Mutex::new(HashMap::new())) }
    }

    async fn principal(&self, sender: &Sender) -> Result<User, RepositoryError> {
        self.store.upsert_user(sender.to_new_user()).await
    }

    async fn assign_role(&self, sender: &Sender, role: Role) -> Result<ReplyMessage, RepositoryError> {
        let user = self.principal(sender).await?;
        let user = self.store.set_user_role(user.id, role).await?;
        let dropped = self.agents.forget(user.id).await;
        info!(
            event_name = "chat.user.role_set",
            user_id = %user.id,
            role = %role,
            dropped_agents = dropped,
            "user role set"
        );

        let follow_up = match role {
            Role::Driver => "As a driver, you can use these quick reply buttons:".to_owned(),
            other => format!(
                "As a {other}, you can ask me questions about your shipments and I'll help you manage them."
            ),
        };
        Ok(ReplyMessage::text(format!(
            "Your role has been set to {role}. You can now use the bot.\n\n{follow_up}"
        ))
        .with_optional_markup(keyboard_for(Some(role))))
    }

    /// Best-effort fan-out outside a status change.
    async fn notify_stakeholders(&self, trip: &Trip, actor: &User, message: String, ctx: &EventContext) {
        let created_at = Utc::now();
        for recipient in trip.stakeholders(Some(actor.id)) {
            let notification = NewNotification::for_trip(recipient, trip.id, message.clone(), created_at);
            if let Err(error) = self.lifecycle.notify(notification, NoticeKind::TripUpdate).await {
                warn!(
                    event_name = "chat.notification.failed",
                    correlation_id = %ctx.correlation_id,
                    trip_id = %trip.id,
                    recipient_id = %recipient,
                    error = %error,
                    "stakeholder notification failed"
                );
            }
        }
    }

    async fn quick_reply(
        &self,
        user: &User,
        trip: &Trip,
        reply: QuickReply,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        if let Some((status, notes)) = reply.transition() {
            let mut request = TransitionRequest::new(status, user.id);
            if let Some(notes) = notes {
                request = request.with_notes(notes);
            }
            let committed = match self
                .lifecycle
                .transition(trip.id, request, reply.announcement(trip.id), &ctx.correlation_id)
                .await
            {
                Ok(committed) => committed,
                Err(error) => return settle(error),
            };

            let text = format!("Status updated to: {}", committed.trip.status);
            if committed.trip.status == TripStatus::Completed {
                return Ok(ReplyMessage::text(format!(
                    "{text}\n\nThanks for completing the delivery! How was your experience?"
                ))
                .with_markup(survey(trip.id)));
            }
            return Ok(ReplyMessage::text(text));
        }

        match reply {
            QuickReply::OnSchedule => {
                if let Some(message) = reply.announcement(trip.id) {
                    self.notify_stakeholders(trip, user, message, ctx).await;
                }
                Ok(ReplyMessage::text("Thanks for confirming you're on schedule."))
            }
            QuickReply::ReportIssue => {
                self.pending_issues.lock().await.insert(user.id, trip.id);
                Ok(ReplyMessage::text("Please describe the issue you're experiencing:"))
            }
            QuickReply::ShareLocation => Ok(ReplyMessage::text("Please share your current location:")
                .with_markup(location_request())),
            _ => {
                let details = ReplyMessage::text(format::trip_summary("Trip", trip));
                Ok(if trip.status == TripStatus::Assigned {
                    details.with_markup(trip_confirmation(trip.id))
                } else {
                    details
                })
            }
        }
    }

    async fn report_pending_issue(
        &self,
        user: &User,
        trip_id: TripId,
        description: &str,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        match self.lifecycle.report_issue(trip_id, user.id, description, &ctx.correlation_id).await {
            Ok(_) => Ok(ReplyMessage::text("Issue reported. Thank you for letting us know.")
                .with_optional_markup(keyboard_for(user.role))),
            Err(error) => settle(error),
        }
    }

    async fn confirm_trip(
        &self,
        user: &User,
        trip_id: TripId,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        let trip = self.store.find_trip(trip_id).await?;
        let Some(trip) = trip.filter(|trip| trip.is_party(Role::Driver, user.id)) else {
            return Ok(ReplyMessage::text(format!(
                "Trip #{trip_id} not found or not assigned to you."
            )));
        };
        if trip.status != TripStatus::Assigned {
            return Ok(ReplyMessage::text(format!("Trip #{trip_id} is already {}.", trip.status)));
        }

        let request = TransitionRequest::new(TripStatus::Assigned, user.id)
            .with_notes("Trip confirmed by driver");
        let announcement = format!("Driver has confirmed Trip #{trip_id}");
        match self
            .lifecycle
            .transition(trip_id, request, Some(announcement), &ctx.correlation_id)
            .await
        {
            Ok(_) => Ok(ReplyMessage::text(format!(
                "Trip #{trip_id} confirmed. You will receive updates and can use the quick reply \
                 buttons to report your status."
            ))),
            Err(error) => settle(error),
        }
    }
}

/// Domain violations are answered in chat; persistence failures fail the handler.
fn settle(error: LifecycleError) -> Result<ReplyMessage, EventHandlerError> {
    match error {
        LifecycleError::Domain(violation) => Ok(ReplyMessage::text(violation.to_string())),
        LifecycleError::Persistence(error) => Err(EventHandlerError::Persistence(error)),
    }
}

fn route_error(error: RepositoryError) -> CommandRouteError {
    CommandRouteError::Service(error.to_string())
}

#[async_trait]
impl ChatCommandService for FleetChatService {
    async fn start(&self, payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError> {
        let user = self.principal(&payload.sender).await.map_err(route_error)?;
        let name = user.first_name.clone().unwrap_or_else(|| user.display_name());

        let Some(role) = user.role else {
            return Ok(ReplyMessage::text(format!(
                "Hello {name}! Welcome to the Logistics AI Bot.\n\nPlease select your role:"
            ))
            .with_markup(role_picker()));
        };
        Ok(ReplyMessage::text(format!(
            "Hello {name}! Welcome to the Logistics AI Bot.\n\n\
             I'm here to help you manage your logistics operations.\n\n\
             You are registered as a {role}.\n\n\
             If you're a driver, you'll receive trip assignments and can update your status.\n\
             If you're a manager, shipper, or consignee, you'll receive updates about your shipments."
        ))
        .with_optional_markup(keyboard_for(Some(role))))
    }

    async fn help(&self, payload: &CommandPayload) -> Result<ReplyMessage, CommandRouteError> {
        let user = self.principal(&payload.sender).await.map_err(route_error)?;
        Ok(ReplyMessage::text(help_text(user.role)))
    }

    async fn status(
        &self,
        trip_id: TripId,
        payload: &CommandPayload,
    ) -> Result<ReplyMessage, CommandRouteError> {
        let user = self.principal(&payload.sender).await.map_err(route_error)?;
        let Some(role) = user.role else {
            return Ok(ReplyMessage::text(NO_ROLE_REPLY));
        };
        let trip = self.store.find_trip(trip_id).await.map_err(route_error)?;
        let Some(trip) =
            trip.filter(|trip| role == Role::Manager || trip.is_party(role, user.id))
        else {
            return Ok(ReplyMessage::text(format!("Trip #{trip_id} not found.")));
        };

        let mut text = format!(
            "Trip #{} Status:\n\nCurrent status: {}\nPickup: {}\nDelivery: {}\nCargo: {}",
            trip.id, trip.status, trip.pickup_address, trip.delivery_address, trip.cargo_description
        );
        let updates = self.store.list_status_updates(trip_id).await.map_err(route_error)?;
        if let Some(latest) = updates.first() {
            text.push_str(&format!("\n\nLast update: {}", format::timestamp(latest.recorded_at)));
            if let Some(notes) = latest.notes.as_deref().filter(|notes| !notes.is_empty()) {
                text.push_str(&format!("\nNotes: {notes}"));
            }
        }
        if let Some(location) = self.store.latest_location(trip_id).await.map_err(route_error)? {
            text.push_str(&format!(
                "\n\nLast known location: {}, {}\nLocation time: {}",
                location.coordinates.latitude,
                location.coordinates.longitude,
                format::timestamp(location.recorded_at)
            ));
        }
        Ok(ReplyMessage::text(text))
    }

    async fn set_role(
        &self,
        role: Role,
        payload: &CommandPayload,
    ) -> Result<ReplyMessage, CommandRouteError> {
        self.assign_role(&payload.sender, role).await.map_err(route_error)
    }
}

#[async_trait]
impl TextMessageService for FleetChatService {
    async fn handle_text(
        &self,
        event: &TextMessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<ReplyMessage>, EventHandlerError> {
        let user = self.principal(&event.sender).await?;

        if user.role == Some(Role::Driver) {
            if let Some(reply) = QuickReply::parse(&event.text) {
                if let Some(trip) = active_trip_for_driver(self.store.as_ref(), user.id).await? {
                    debug!(
                        event_name = "chat.quick_reply.received",
                        correlation_id = %ctx.correlation_id,
                        trip_id = %trip.id,
                        button = reply.label(),
                        "driver quick reply"
                    );
                    return self.quick_reply(&user, &trip, reply, ctx).await.map(Some);
                }
            }
        }

        let pending = self.pending_issues.lock().await.remove(&user.id);
        if let Some(trip_id) = pending {
            return self.report_pending_issue(&user, trip_id, &event.text, ctx).await.map(Some);
        }

        let Some(role) = user.role else {
            return Ok(Some(ReplyMessage::text(NO_ROLE_REPLY)));
        };
        let turn = self.agents.handle_message(role, user.id, &event.text).await;
        info!(
            event_name = "chat.agent.replied",
            correlation_id = %ctx.correlation_id,
            turn_correlation_id = %turn.correlation_id,
            role = %role,
            user_id = %user.id,
            status = ?turn.status,
            "agent reply ready"
        );
        Ok(Some(ReplyMessage::text(turn.text)))
    }
}

#[async_trait]
impl LocationService for FleetChatService {
    async fn handle_location(
        &self,
        event: &SharedLocationEvent,
        ctx: &EventContext,
    ) -> Result<ReplyMessage, EventHandlerError> {
        let user = self.principal(&event.sender).await?;
        if user.role != Some(Role::Driver) {
            return Ok(ReplyMessage::text(
                "Location received, but you're not registered as a driver.",
            ));
        }
        let Some(trip) = active_trip_for_driver(self.store.as_ref(), user.id).await? else {
            return Ok(ReplyMessage::text("You don't have any active trips to update location for.")
                .with_markup(driver_keyboard()));
        };

        self.store
            .record_location(NewLocation {
                trip_id: trip.id,
                coordinates: Coordinates::new(event.latitude, event.longitude),
                recorded_at: Utc::now(),
            })
            .await?;
        info!(
            event_name = "chat.location.recorded",
            correlation_id = %ctx.correlation_id,
            trip_id = %trip.id,
            user_id = %user.id,
            "driver location recorded"
        );
        let notice = format!(
            "Driver location updated for Trip #{}: {}, {}",
            trip.id, event.latitude, event.longitude
        );
        self.notify_stakeholders(&trip, &user, notice, ctx).await;

        Ok(ReplyMessage::text("Location received and saved. Thank you!")
            .with_markup(driver_keyboard()))
    }
}

#[async_trait]
impl CallbackService for FleetChatService {
    async fn handle_callback(
        &self,
        event: &CallbackQueryEvent,
        ctx: &EventContext,
    ) -> Result<Option<ReplyMessage>, EventHandlerError> {
        let Some(action) = CallbackAction::parse(&event.data) else {
            debug!(
                event_name = "chat.callback.unrecognized",
                correlation_id = %ctx.correlation_id,
                data = %event.data,
                "ignoring callback payload"
            );
            return Ok(None);
        };

        match action {
            CallbackAction::SetRole(role) => {
                self.assign_role(&event.sender, role).await.map(Some).map_err(Into::into)
            }
            CallbackAction::ConfirmTrip(trip_id) => {
                let user = self.principal(&event.sender).await?;
                self.confirm_trip(&user, trip_id, ctx).await.map(Some)
            }
            CallbackAction::Survey { rating, trip_id } => {
                info!(
                    event_name = "chat.survey.recorded",
                    correlation_id = %ctx.correlation_id,
                    trip_id = %trip_id,
                    rating = rating.as_str(),
                    external_id = %event.sender.external_id,
                    "delivery survey answered"
                );
                Ok(Some(ReplyMessage::text(format!(
                    "Thank you for your feedback! You rated this trip as: {}",
                    rating.as_str()
                ))))
            }
        }
    }
}

/// Dispatcher with every chat event kind routed to `service`.
pub fn fleet_dispatcher(service: FleetChatService) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(service.clone()));
    dispatcher.register(TextMessageHandler::new(service.clone()));
    dispatcher.register(LocationHandler::new(service.clone()));
    dispatcher.register(CallbackHandler::new(service));
    dispatcher
}
