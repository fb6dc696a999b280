use async_trait::async_trait;
use chrono::Utc;

use convoy_core::domain::location::NewLocation;
use convoy_core::domain::trip::{Coordinates, Trip, TripQuery};
use convoy_core::domain::user::Role;
use convoy_core::flows::TransitionRequest;
use convoy_db::{active_trip_for_driver, RepositoryError};

use crate::format;
use crate::tools::{settle, ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolRegistry};

pub fn registry() -> ToolRegistry {
    ToolRegistry::default()
        .with(GetCurrentTrip)
        .with(UpdateTripStatus)
        .with(ReportIssue)
        .with(UpdateLocation)
        .with(GetTripHistory)
}

const HISTORY_LIMIT: usize = 5;

async fn active_trip(context: &ToolContext) -> Result<Option<Trip>, RepositoryError> {
    active_trip_for_driver(context.store(), context.actor).await
}

pub struct GetCurrentTrip;

#[async_trait]
impl Tool for GetCurrentTrip {
    fn name(&self) -> &'static str {
        "get_current_trip"
    }

    fn description(&self) -> &'static str {
        "Get the current active trip for the driver"
    }

    async fn execute(&self, context: &ToolContext, _args: ToolArgs) -> Result<String, ToolError> {
        Ok(match active_trip(context).await? {
            Some(trip) => format::trip_summary("Trip", &trip),
            None => "You don't have any active trips at the moment.".to_owned(),
        })
    }
}

pub struct UpdateTripStatus;

#[async_trait]
impl Tool for UpdateTripStatus {
    fn name(&self) -> &'static str {
        "update_trip_status"
    }

    fn description(&self) -> &'static str {
        "Update the status of the current trip. Available statuses: at_pickup, loading, \
         in_transit, delayed, issue_reported, at_destination, unloading, completed"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("status", ParamKind::TripStatus),
            ParamSpec::optional("notes", ParamKind::Text),
        ];
        PARAMS
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let status = args.require_status("status")?;
        let Some(trip) = active_trip(context).await? else {
            return Ok("You don't have any active trips to update.".to_owned());
        };

        let mut request = TransitionRequest::new(status, context.actor);
        if let Some(notes) = args.text("notes") {
            request = request.with_notes(notes);
        }
        settle(
            context.lifecycle.transition(trip.id, request, None, &context.correlation_id).await,
            |committed| format!("Trip status updated to: {}", committed.trip.status),
        )
    }
}

pub struct ReportIssue;

#[async_trait]
impl Tool for ReportIssue {
    fn name(&self) -> &'static str {
        "report_issue"
    }

    fn description(&self) -> &'static str {
        "Report an issue with the current trip"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::required("description", ParamKind::Text)];
        PARAMS
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let description = args.require_text("description")?;
        let Some(trip) = active_trip(context).await? else {
            return Ok("You don't have any active trips to report issues for.".to_owned());
        };

        settle(
            context
                .lifecycle
                .report_issue(trip.id, context.actor, description, &context.correlation_id)
                .await,
            |_| format!("Issue reported: {description}"),
        )
    }
}

pub struct UpdateLocation;

#[async_trait]
impl Tool for UpdateLocation {
    fn name(&self) -> &'static str {
        "update_location"
    }

    fn description(&self) -> &'static str {
        "Update the current location of the driver"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("latitude", ParamKind::Float),
            ParamSpec::required("longitude", ParamKind::Float),
        ];
        PARAMS
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let latitude = args.require_float("latitude")?;
        let longitude = args.require_float("longitude")?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Ok(format!(
                "Coordinates {latitude}, {longitude} are out of range. Latitude must be within \
                 -90..90 and longitude within -180..180."
            ));
        }
        let Some(trip) = active_trip(context).await? else {
            return Ok("You don't have any active trips to update location for.".to_owned());
        };

        context
            .store()
            .record_location(NewLocation {
                trip_id: trip.id,
                coordinates: Coordinates::new(latitude, longitude),
                recorded_at: Utc::now(),
            })
            .await?;
        Ok(format!("Location updated: {latitude}, {longitude}"))
    }
}

pub struct GetTripHistory;

#[async_trait]
impl Tool for GetTripHistory {
    fn name(&self) -> &'static str {
        "get_trip_history"
    }

    fn description(&self) -> &'static str {
        "Get the history of trips for the driver"
    }

    async fn execute(&self, context: &ToolContext, _args: ToolArgs) -> Result<String, ToolError> {
        let trips = context
            .store()
            .list_trips(TripQuery::all().for_party(Role::Driver, context.actor).limit(HISTORY_LIMIT))
            .await?;
        if trips.is_empty() {
            return Ok("You don't have any trip history.".to_owned());
        }

        let entries = trips
            .iter()
            .map(|trip| {
                format!(
                    "Trip #{}:\n- Status: {}\n- Pickup: {}\n- Delivery: {}\n- Created: {}",
                    trip.id,
                    trip.status,
                    trip.pickup_address,
                    trip.delivery_address,
                    trip.created_at.format("%Y-%m-%d")
                )
            })
            .collect::<Vec<_>>();
        Ok(format!("Your recent trips:\n\n{}", entries.join("\n\n")))
    }
}
