//! Tools shared by the shipper and consignee catalogues. Each is scoped to trips where the actor
//! fills `party`.

use async_trait::async_trait;

use convoy_core::domain::trip::{Trip, TripId, TripQuery};
use convoy_core::domain::user::Role;

use super::{find_user, no_access, visible_trip};
use crate::format;
use crate::tools::{ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError};

pub(crate) const TRIP_ID: &[ParamSpec] = &[ParamSpec::required("trip_id", ParamKind::Integer)];

pub(crate) async fn party_trip(
    context: &ToolContext,
    party: Role,
    args: &ToolArgs,
) -> Result<Result<Trip, String>, ToolError> {
    let trip_id = TripId(args.require_integer("trip_id")?);
    Ok(visible_trip(context, party, trip_id).await?.ok_or_else(|| no_access(trip_id)))
}

pub struct ListShipments {
    pub name: &'static str,
    pub description: &'static str,
    pub party: Role,
    pub include_completed: bool,
    pub heading: &'static str,
    pub empty: &'static str,
}

#[async_trait]
impl Tool for ListShipments {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    async fn execute(&self, context: &ToolContext, _args: ToolArgs) -> Result<String, ToolError> {
        let query = if self.include_completed { TripQuery::all() } else { TripQuery::active() };
        let trips = context.store().list_trips(query.for_party(self.party, context.actor)).await?;
        if trips.is_empty() {
            return Ok(self.empty.to_owned());
        }

        let entries =
            trips.iter().map(|trip| format::trip_summary("Shipment", trip)).collect::<Vec<_>>();
        Ok(format!("{}\n\n{}", self.heading, entries.join("\n\n")))
    }
}

pub struct ShipmentDetails {
    pub party: Role,
}

#[async_trait]
impl Tool for ShipmentDetails {
    fn name(&self) -> &'static str {
        "get_shipment_details"
    }

    fn description(&self) -> &'static str {
        "Get detailed information about a specific shipment"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match party_trip(context, self.party, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let store = context.store();

        let mut lines = vec![
            format!("Shipment #{} Details:", trip.id),
            String::new(),
            format!("Status: {}", trip.status),
            String::new(),
        ];
        for (role, missing) in [
            (Role::Driver, "No driver assigned yet."),
            (Role::Manager, "No manager assigned."),
            (Role::Shipper, "No shipper assigned."),
            (Role::Consignee, "No consignee assigned."),
        ] {
            if role == self.party {
                continue;
            }
            lines.push(match find_user(store, trip.party(role)).await? {
                Some(user) => format!("{}: {}", role.title(), format::contact(&user)),
                None => missing.to_owned(),
            });
        }
        lines.push(String::new());

        lines.push(format!("Pickup: {}", trip.pickup_address));
        if let Some(window) = format::window(trip.pickup_window_start, trip.pickup_window_end) {
            lines.push(format!("Pickup window: {window}"));
        }
        lines.push(format!("Delivery: {}", trip.delivery_address));
        if let Some(window) = format::window(trip.delivery_window_start, trip.delivery_window_end) {
            lines.push(format!("Delivery window: {window}"));
        }
        lines.push(String::new());
        lines.extend(format::cargo_lines(&trip));
        Ok(lines.join("\n"))
    }
}

pub struct ShipmentStatus {
    pub party: Role,
}

#[async_trait]
impl Tool for ShipmentStatus {
    fn name(&self) -> &'static str {
        "get_shipment_status"
    }

    fn description(&self) -> &'static str {
        "Get the current status of a specific shipment, with the driver's last location and ETA"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match party_trip(context, self.party, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let store = context.store();

        let mut lines = vec![
            format!("Shipment #{} Status:", trip.id),
            String::new(),
            format!("Current status: {}", trip.status),
        ];
        if let Some(update) = store.list_status_updates(trip.id).await?.into_iter().next() {
            let actor = store.find_user(update.actor_id).await?;
            lines.push(format!("Last update: {}", format::timestamp(update.recorded_at)));
            lines.push(format!("Updated by: {}", format::person(actor.as_ref())));
            if let Some(notes) = update.notes {
                lines.push(format!("Notes: {notes}"));
            }
        }
        if let Some(location) = store.latest_location(trip.id).await? {
            lines.push(String::new());
            lines.extend(format::location_lines(&trip, &location, context.average_speed_kmh));
        }
        Ok(lines.join("\n"))
    }
}

pub struct DriverLocation {
    pub party: Role,
}

#[async_trait]
impl Tool for DriverLocation {
    fn name(&self) -> &'static str {
        "get_driver_location"
    }

    fn description(&self) -> &'static str {
        "Get the current location of the driver for a specific shipment"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match party_trip(context, self.party, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        if trip.driver_id.is_none() {
            return Ok(format!("Shipment #{} does not have a driver assigned.", trip.id));
        }
        let Some(location) = context.store().latest_location(trip.id).await? else {
            return Ok(format!("No location data available for Shipment #{}.", trip.id));
        };

        let mut lines = vec![format!("Driver location for Shipment #{}:", trip.id), String::new()];
        lines.extend(format::location_lines(&trip, &location, context.average_speed_kmh));
        Ok(lines.join("\n"))
    }
}

pub struct ShipmentIssues {
    pub party: Role,
}

#[async_trait]
impl Tool for ShipmentIssues {
    fn name(&self) -> &'static str {
        "get_shipment_issues"
    }

    fn description(&self) -> &'static str {
        "Get all issues reported for a specific shipment"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match party_trip(context, self.party, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        let issues = context.store().list_issues(trip.id).await?;
        if issues.is_empty() {
            return Ok(format!("No issues reported for Shipment #{}.", trip.id));
        }

        let mut entries = Vec::with_capacity(issues.len());
        for issue in &issues {
            let reporter = context.store().find_user(issue.reporter_id).await?;
            entries.push(format::issue_entry(issue, reporter.as_ref()));
        }
        Ok(format!("Issues for Shipment #{}:\n\n{}", trip.id, entries.join("\n\n")))
    }
}
