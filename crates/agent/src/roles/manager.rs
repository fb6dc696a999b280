use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use convoy_core::domain::issue::{IssueId, IssueStatus};
use convoy_core::domain::notification::NewNotification;
use convoy_core::domain::trip::{NewTrip, Trip, TripId, TripQuery};
use convoy_core::domain::user::{Role, User, UserId};
use convoy_core::errors::DomainError;

use super::{find_user, user_with_role, SendMessage};
use crate::format;
use crate::notify::NoticeKind;
use crate::tools::{settle, ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolRegistry};

pub fn registry() -> ToolRegistry {
    ToolRegistry::default()
        .with(GetAllActiveTrips)
        .with(GetTripDetails)
        .with(GetTripStatusHistory)
        .with(GetTripLocationHistory)
        .with(GetTripIssues)
        .with(ResolveIssue)
        .with(SendMessage {
            name: "send_message_to_driver",
            description: "Send a message to the driver of a specific trip",
            sender: Role::Manager,
            recipient: Role::Driver,
        })
        .with(CreateNewTrip)
}

const LOCATION_HISTORY_LIMIT: usize = 10;

const TRIP_ID: &[ParamSpec] = &[ParamSpec::required("trip_id", ParamKind::Integer)];

async fn load_trip(context: &ToolContext, args: &ToolArgs) -> Result<Result<Trip, String>, ToolError> {
    let trip_id = TripId(args.require_integer("trip_id")?);
    Ok(context
        .store()
        .find_trip(trip_id)
        .await?
        .ok_or_else(|| DomainError::TripNotFound(trip_id).to_string()))
}

pub struct GetAllActiveTrips;

#[async_trait]
impl Tool for GetAllActiveTrips {
    fn name(&self) -> &'static str {
        "get_all_active_trips"
    }

    fn description(&self) -> &'static str {
        "Get all active trips managed by this manager"
    }

    async fn execute(&self, context: &ToolContext, _args: ToolArgs) -> Result<String, ToolError> {
        let trips = context
            .store()
            .list_trips(TripQuery::active().for_party(Role::Manager, context.actor))
            .await?;
        if trips.is_empty() {
            return Ok("You don't have any active trips at the moment.".to_owned());
        }

        let mut entries = Vec::with_capacity(trips.len());
        for trip in &trips {
            let driver = find_user(context.store(), trip.driver_id).await?;
            entries.push(format!(
                "Trip #{}:\n- Status: {}\n- Driver: {}\n- Pickup: {}\n- Delivery: {}",
                trip.id,
                trip.status,
                driver.as_ref().map(User::display_name).unwrap_or_else(|| "Not assigned".to_owned()),
                trip.pickup_address,
                trip.delivery_address
            ));
        }
        Ok(format!("Your active trips:\n\n{}", entries.join("\n\n")))
    }
}

pub struct GetTripDetails;

#[async_trait]
impl Tool for GetTripDetails {
    fn name(&self) -> &'static str {
        "get_trip_details"
    }

    fn description(&self) -> &'static str {
        "Get detailed information about a specific trip: driver, cargo, status, location and open issues"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match load_trip(context, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let store = context.store();

        let mut lines = vec![format!("Trip #{} Details:", trip.id), String::new()];
        lines.push(match find_user(store, trip.driver_id).await? {
            Some(driver) => format!("Driver: {}", format::contact(&driver)),
            None => "No driver assigned yet.".to_owned(),
        });
        lines.push(String::new());
        lines.push(format!("Pickup: {}", trip.pickup_address));
        lines.push(format!("Delivery: {}", trip.delivery_address));
        lines.extend(format::cargo_lines(&trip));
        lines.push(String::new());

        lines.push(format!("Current status: {}", trip.status));
        if let Some(update) = store.list_status_updates(trip.id).await?.into_iter().next() {
            lines.push(format!("Last update: {}", format::timestamp(update.recorded_at)));
            if let Some(notes) = update.notes {
                lines.push(format!("Notes: {notes}"));
            }
        }
        lines.push(String::new());

        match store.latest_location(trip.id).await? {
            Some(location) => {
                lines.extend(format::location_lines(&trip, &location, context.average_speed_kmh))
            }
            None => lines.push("No location data available.".to_owned()),
        }
        lines.push(String::new());

        let open = store
            .list_issues(trip.id)
            .await?
            .into_iter()
            .filter(|issue| issue.status != IssueStatus::Resolved)
            .collect::<Vec<_>>();
        if open.is_empty() {
            lines.push("No open issues.".to_owned());
        } else {
            lines.push("Open issues:".to_owned());
            for issue in open {
                lines.push(format!(
                    "- #{} {} (reported at {})",
                    issue.id,
                    issue.description,
                    format::timestamp(issue.created_at)
                ));
            }
        }
        Ok(lines.join("\n"))
    }
}

pub struct GetTripStatusHistory;

#[async_trait]
impl Tool for GetTripStatusHistory {
    fn name(&self) -> &'static str {
        "get_trip_status_history"
    }

    fn description(&self) -> &'static str {
        "Get the status history of a specific trip"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match load_trip(context, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let updates = context.store().list_status_updates(trip.id).await?;
        if updates.is_empty() {
            return Ok(format!("No status updates found for Trip #{}.", trip.id));
        }

        let mut entries = Vec::with_capacity(updates.len());
        for update in &updates {
            let actor = context.store().find_user(update.actor_id).await?;
            let mut entry = format!(
                "{} - {}\nUpdated by: {}",
                format::timestamp(update.recorded_at),
                update.status,
                format::person(actor.as_ref())
            );
            if let Some(notes) = &update.notes {
                entry.push_str(&format!("\nNotes: {notes}"));
            }
            entries.push(entry);
        }
        Ok(format!("Status history for Trip #{}:\n\n{}", trip.id, entries.join("\n\n")))
    }
}

pub struct GetTripLocationHistory;

#[async_trait]
impl Tool for GetTripLocationHistory {
    fn name(&self) -> &'static str {
        "get_trip_location_history"
    }

    fn description(&self) -> &'static str {
        "Get the most recent location points of a specific trip"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match load_trip(context, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let locations =
            context.store().list_locations(trip.id, Some(LOCATION_HISTORY_LIMIT)).await?;
        if locations.is_empty() {
            return Ok(format!("No location data found for Trip #{}.", trip.id));
        }

        let entries = locations
            .iter()
            .map(|location| {
                format!(
                    "{}\nLatitude: {}\nLongitude: {}",
                    format::timestamp(location.recorded_at),
                    location.coordinates.latitude,
                    location.coordinates.longitude
                )
            })
            .collect::<Vec<_>>();
        Ok(format!("Location history for Trip #{}:\n\n{}", trip.id, entries.join("\n\n")))
    }
}

pub struct GetTripIssues;

#[async_trait]
impl Tool for GetTripIssues {
    fn name(&self) -> &'static str {
        "get_trip_issues"
    }

    fn description(&self) -> &'static str {
        "Get all issues reported for a specific trip"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match load_trip(context, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let issues = context.store().list_issues(trip.id).await?;
        if issues.is_empty() {
            return Ok(format!("No issues reported for Trip #{}.", trip.id));
        }

        let mut entries = Vec::with_capacity(issues.len());
        for issue in &issues {
            let reporter = context.store().find_user(issue.reporter_id).await?;
            entries.push(format::issue_entry(issue, reporter.as_ref()));
        }
        Ok(format!("Issues for Trip #{}:\n\n{}", trip.id, entries.join("\n\n")))
    }
}

pub struct ResolveIssue;

#[async_trait]
impl Tool for ResolveIssue {
    fn name(&self) -> &'static str {
        "resolve_issue"
    }

    fn description(&self) -> &'static str {
        "Mark an issue as resolved and notify the trip's driver. The trip status is not changed"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::required("issue_id", ParamKind::Integer)];
        PARAMS
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let issue_id = IssueId(args.require_integer("issue_id")?);
        settle(
            context.lifecycle.resolve_issue(issue_id, context.actor, &context.correlation_id).await,
            |_| format!("Issue #{issue_id} has been marked as resolved."),
        )
    }
}

pub struct CreateNewTrip;

impl CreateNewTrip {
    async fn party(
        context: &ToolContext,
        args: &ToolArgs,
        name: &'static str,
        role: Role,
    ) -> Result<Result<Option<User>, String>, ToolError> {
        let Some(id) = args.integer(name) else {
            return Ok(Ok(None));
        };
        Ok(user_with_role(context.store(), UserId(id), role)
            .await?
            .map(Some)
            .map_err(|violation| violation.to_string()))
    }
}

#[async_trait]
impl Tool for CreateNewTrip {
    fn name(&self) -> &'static str {
        "create_new_trip"
    }

    fn description(&self) -> &'static str {
        "Create a new trip. Without driver_id an available driver is assigned automatically"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("pickup_address", ParamKind::Text),
            ParamSpec::required("delivery_address", ParamKind::Text),
            ParamSpec::required("cargo_description", ParamKind::Text),
            ParamSpec::optional("driver_id", ParamKind::Integer),
            ParamSpec::optional("shipper_id", ParamKind::Integer),
            ParamSpec::optional("consignee_id", ParamKind::Integer),
        ];
        PARAMS
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let pickup_address = args.require_text("pickup_address")?;
        let delivery_address = args.require_text("delivery_address")?;
        let cargo_description = args.require_text("cargo_description")?;

        let driver = match Self::party(context, &args, "driver_id", Role::Driver).await? {
            Ok(Some(driver)) => Some(driver),
            Ok(None) => context.store().find_available_driver().await?,
            Err(reply) => return Ok(reply),
        };
        let shipper = match Self::party(context, &args, "shipper_id", Role::Shipper).await? {
            Ok(shipper) => shipper,
            Err(reply) => return Ok(reply),
        };
        let consignee = match Self::party(context, &args, "consignee_id", Role::Consignee).await? {
            Ok(consignee) => consignee,
            Err(reply) => return Ok(reply),
        };

        let trip = context
            .store()
            .create_trip(NewTrip {
                driver_id: driver.as_ref().map(|driver| driver.id),
                shipper_id: shipper.map(|shipper| shipper.id),
                consignee_id: consignee.map(|consignee| consignee.id),
                manager_id: Some(context.actor),
                pickup_address: pickup_address.to_owned(),
                delivery_address: delivery_address.to_owned(),
                cargo_description: cargo_description.to_owned(),
                ..NewTrip::default()
            })
            .await?;

        let mut reply = format!(
            "Success: New trip created with ID #{}. The trip will transport {cargo_description} \
             from {pickup_address} to {delivery_address}.",
            trip.id
        );
        match &driver {
            Some(driver) => {
                let notice = NewNotification::for_trip(
                    driver.id,
                    trip.id,
                    format!("You have been assigned to Trip #{}", trip.id),
                    Utc::now(),
                );
                if let Err(error) = context.lifecycle.notify(notice, NoticeKind::Assignment).await {
                    warn!(
                        event_name = "agent.trip.assignment_notice_failed",
                        correlation_id = %context.correlation_id,
                        trip_id = %trip.id,
                        error = %error,
                        "trip created but driver notice was not stored"
                    );
                }
                reply.push_str(&format!(
                    " Trip assigned to driver {} (ID: {}).",
                    driver.display_name(),
                    driver.id
                ));
            }
            None => reply.push_str(" No available drivers found. The trip is unassigned."),
        }
        Ok(reply)
    }
}
