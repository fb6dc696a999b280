use async_trait::async_trait;

use convoy_core::domain::user::Role;
use convoy_core::eta::estimate_arrival;

use super::shipments::{party_trip, DriverLocation, ListShipments, ShipmentDetails, ShipmentStatus, TRIP_ID};
use super::SendMessage;
use crate::format;
use crate::tools::{ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolRegistry};

pub fn registry() -> ToolRegistry {
    ToolRegistry::default()
        .with(ListShipments {
            name: "get_all_incoming_shipments",
            description: "Get all incoming shipments that have not been delivered yet",
            party: Role::Consignee,
            include_completed: false,
            heading: "Your incoming shipments:",
            empty: "You don't have any incoming shipments at the moment.",
        })
        .with(ShipmentDetails { party: Role::Consignee })
        .with(ShipmentStatus { party: Role::Consignee })
        .with(DriverLocation { party: Role::Consignee })
        .with(EstimatedArrival)
        .with(SendMessage {
            name: "send_message_to_driver",
            description: "Send a message to the driver of a specific shipment",
            sender: Role::Consignee,
            recipient: Role::Driver,
        })
        .with(SendMessage {
            name: "send_message_to_shipper",
            description: "Send a message to the shipper of a specific shipment",
            sender: Role::Consignee,
            recipient: Role::Shipper,
        })
}

pub struct EstimatedArrival;

#[async_trait]
impl Tool for EstimatedArrival {
    fn name(&self) -> &'static str {
        "get_estimated_arrival"
    }

    fn description(&self) -> &'static str {
        "Get the estimated arrival time of a shipment and whether it is early, on time or late"
    }

    fn parameters(&self) -> &'static [ParamSpec] {
        TRIP_ID
    }

    async fn execute(&self, context: &ToolContext, args: ToolArgs) -> Result<String, ToolError> {
        let trip = match party_trip(context, Role::Consignee, &args).await? {
            Ok(trip) => trip,
            Err(reply) => return Ok(reply),
        };
        if trip.driver_id.is_none() {
            return Ok(format!("Shipment #{} does not have a driver assigned.", trip.id));
        }
        let Some(location) = context.store().latest_location(trip.id).await? else {
            return Ok(format!("No location data available for Shipment #{}.", trip.id));
        };
        if trip.delivery.is_none() {
            return Ok(format!("Delivery coordinates not available for Shipment #{}.", trip.id));
        }
        let Some(eta) = estimate_arrival(trip.delivery, Some(&location), context.average_speed_kmh)
        else {
            return Ok(format!("Unable to calculate ETA for Shipment #{}.", trip.id));
        };

        let mut lines = vec![format!("Estimated arrival for Shipment #{}:", trip.id), String::new()];
        lines.extend(format::arrival_lines(&trip, eta, &location));
        Ok(lines.join("\n"))
    }
}
