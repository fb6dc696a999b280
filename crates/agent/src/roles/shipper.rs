use convoy_core::domain::user::Role;

use super::shipments::{DriverLocation, ListShipments, ShipmentDetails, ShipmentIssues, ShipmentStatus};
use super::SendMessage;
use crate::tools::ToolRegistry;

pub fn registry() -> ToolRegistry {
    ToolRegistry::default()
        .with(ListShipments {
            name: "get_all_shipments",
            description: "Get all shipments for this shipper",
            party: Role::Shipper,
            include_completed: true,
            heading: "Your shipments:",
            empty: "You don't have any shipments at the moment.",
        })
        .with(ShipmentDetails { party: Role::Shipper })
        .with(ShipmentStatus { party: Role::Shipper })
        .with(DriverLocation { party: Role::Shipper })
        .with(ShipmentIssues { party: Role::Shipper })
        .with(SendMessage {
            name: "send_message_to_driver",
            description: "Send a message to the driver of a specific shipment",
            sender: Role::Shipper,
            recipient: Role::Driver,
        })
        .with(SendMessage {
            name: "send_message_to_manager",
            description: "Send a message to the manager of a specific shipment",
            sender: Role::Shipper,
            recipient: Role::Manager,
        })
}
