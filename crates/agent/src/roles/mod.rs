//! Per-role tool catalogues. Roles differ only in which tools their registry holds.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use convoy_core::domain::notification::NewNotification;
use convoy_core::domain::trip::{Trip, TripId};
use convoy_core::domain::user::{Role, User, UserId};
use convoy_core::errors::DomainError;
use convoy_db::{FleetStore, RepositoryError};

use crate::notify::NoticeKind;
use crate::parser::ToolCall;
use crate::tools::{ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolRegistry};

pub mod consignee;
pub mod driver;
pub mod manager;
pub mod shipments;
pub mod shipper;

pub fn registry(role: Role) -> ToolRegistry {
    match role {
        Role::Driver => driver::registry(),
        Role::Manager => manager::registry(),
        Role::Shipper => shipper::registry(),
        Role::Consignee => consignee::registry(),
    }
}

/// Role-specific opening of the system prompt.
pub fn system_text(role: Role) -> &'static str {
    match role {
        Role::Driver => {
            "You are an assistant for truck drivers using a fleet logistics system. \
             Help drivers follow their current trip, update its status, share their location \
             and report problems on the road."
        }
        Role::Manager => {
            "You are an assistant for fleet managers using a fleet logistics system. \
             Help managers oversee active trips, review status and location history, \
             resolve reported issues, create new trips and message drivers."
        }
        Role::Shipper => {
            "You are an assistant for shippers using a fleet logistics system. \
             Help shippers track their shipments, see where the driver is and when the cargo \
             will arrive, review reported issues and contact the driver or manager."
        }
        Role::Consignee => {
            "You are an assistant for consignees using a fleet logistics system. \
             Help consignees follow incoming shipments, check estimated arrival against the \
             delivery window and contact the driver or shipper."
        }
    }
}

/// The sample call shown to the model next to the wire format.
pub fn example_call(role: Role) -> ToolCall {
    match role {
        Role::Driver => ToolCall::new("update_trip_status")
            .with_parameter("status", "at_pickup")
            .with_parameter("notes", "Just arrived at the pickup location"),
        Role::Manager => ToolCall::new("get_trip_details").with_parameter("trip_id", "123"),
        Role::Shipper | Role::Consignee => {
            ToolCall::new("get_shipment_status").with_parameter("trip_id", "123")
        }
    }
}

/// How a role refers to a trip in replies.
pub(crate) fn trip_label(role: Role) -> &'static str {
    match role {
        Role::Shipper | Role::Consignee => "Shipment",
        Role::Driver | Role::Manager => "Trip",
    }
}

pub(crate) fn no_access(trip_id: TripId) -> String {
    format!("Shipment #{trip_id} not found or you don't have access to it.")
}

pub(crate) async fn find_user(
    store: &dyn FleetStore,
    id: Option<UserId>,
) -> Result<Option<User>, RepositoryError> {
    match id {
        Some(id) => store.find_user(id).await,
        None => Ok(None),
    }
}

/// A trip the actor may see in `role`. Managers see every trip; other parties only their own.
pub(crate) async fn visible_trip(
    context: &ToolContext,
    role: Role,
    trip_id: TripId,
) -> Result<Option<Trip>, RepositoryError> {
    let trip = context.store().find_trip(trip_id).await?;
    Ok(trip.filter(|trip| role == Role::Manager || trip.is_party(role, context.actor)))
}

/// Looks up `id` and checks it holds `role`.
pub async fn user_with_role(
    store: &dyn FleetStore,
    id: UserId,
    role: Role,
) -> Result<Result<User, DomainError>, RepositoryError> {
    Ok(match store.find_user(id).await? {
        Some(user) if user.has_role(role) => Ok(user),
        Some(_) => Err(DomainError::InvalidAssignment { user_id: id, expected: role }),
        None => Err(DomainError::UserNotFound(id)),
    })
}

const MESSAGE_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("trip_id", ParamKind::Integer),
    ParamSpec::required("message", ParamKind::Text),
];

/// `send_message_to_<party>`: one notification to another party on a trip.
pub struct SendMessage {
    pub name: &'static str,
    pub description: &'static str,
    pub sender: Role,
    pub recipient: Role,
}

#[async_trait]
impl Tool for SendMessage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        MESSAGE_PARAMS
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip_id = TripId(args.require_integer("trip_id")?);
        let message = args.require_text("message")?;
        let label = trip_label(self.sender);

        let Some(trip) = visible_trip(context, self.sender, trip_id).await? else {
            return Ok(match self.sender {
                Role::Manager => DomainError::TripNotFound(trip_id).to_string(),
                _ => no_access(trip_id),
            });
        };
        let Some(recipient) = trip.party(self.recipient) else {
            return Ok(format!("No {} assigned to Trip #{trip_id}.", self.recipient));
        };

        context
            .lifecycle
            .notify(
                NewNotification::for_trip(
                    recipient,
                    trip_id,
                    format!("Message from {}: {message}", self.sender),
                    Utc::now(),
                ),
                NoticeKind::Message,
            )
            .await?;
        info!(
            event_name = "agent.message.sent",
            correlation_id = %context.correlation_id,
            trip_id = %trip_id,
            sender = %self.sender,
            recipient = %self.recipient,
            "party message queued"
        );
        Ok(format!("Message sent to the {} of {label} #{trip_id}.", self.recipient))
    }
}
