//! Plain-text rendering shared by the role tools. Replies go to chat verbatim.

use chrono::{DateTime, Utc};

use convoy_core::domain::issue::Issue;
use convoy_core::domain::location::Location;
use convoy_core::domain::trip::Trip;
use convoy_core::domain::user::User;
use convoy_core::eta::{estimate_arrival, punctuality};

pub fn timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M").to_string()
}

pub fn window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<String> {
    match (start, end) {
        (Some(start), Some(end)) => Some(format!("{} to {}", timestamp(start), timestamp(end))),
        _ => None,
    }
}

pub fn person(user: Option<&User>) -> String {
    user.map(User::display_name).unwrap_or_else(|| "Unknown user".to_owned())
}

/// `Name (phone)` or just the name.
pub fn contact(user: &User) -> String {
    match user.phone_number.as_deref().filter(|phone| !phone.trim().is_empty()) {
        Some(phone) => format!("{} ({phone})", user.display_name()),
        None => user.display_name(),
    }
}

fn measure(value: Option<f64>, unit: &str) -> String {
    value.map(|value| format!("{value} {unit}")).unwrap_or_else(|| "not specified".to_owned())
}

/// Short listing entry: `<label> #id` then status, route and cargo.
pub fn trip_summary(label: &str, trip: &Trip) -> String {
    let mut lines = vec![
        format!("{label} #{}:", trip.id),
        format!("- Status: {}", trip.status),
        format!("- Pickup: {}", trip.pickup_address),
        format!("- Delivery: {}", trip.delivery_address),
        format!("- Cargo: {}", trip.cargo_description),
    ];
    if let Some(pickup) = window(trip.pickup_window_start, trip.pickup_window_end) {
        lines.push(format!("- Pickup window: {pickup}"));
    }
    if let Some(delivery) = window(trip.delivery_window_start, trip.delivery_window_end) {
        lines.push(format!("- Delivery window: {delivery}"));
    }
    lines.join("\n")
}

pub fn cargo_lines(trip: &Trip) -> Vec<String> {
    vec![
        format!("Cargo: {}", trip.cargo_description),
        format!("Weight: {}", measure(trip.cargo_weight, "kg")),
        format!("Volume: {}", measure(trip.cargo_volume, "m³")),
    ]
}

pub fn location_lines(trip: &Trip, location: &Location, average_speed_kmh: f64) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Last known location: {}, {}",
            location.coordinates.latitude, location.coordinates.longitude
        ),
        format!("Location time: {}", timestamp(location.recorded_at)),
    ];
    if let Some(eta) = estimate_arrival(trip.delivery, Some(location), average_speed_kmh) {
        lines.push(format!("Estimated arrival: {}", timestamp(eta)));
    }
    lines
}

/// Arrival estimate plus punctuality against the delivery window, when one is set.
pub fn arrival_lines(trip: &Trip, eta: DateTime<Utc>, location: &Location) -> Vec<String> {
    let mut lines = vec![
        format!("ETA: {}", timestamp(eta)),
        format!("Current status: {}", trip.status),
        format!("Last location update: {}", timestamp(location.recorded_at)),
    ];
    if let Some(scheduled) = window(trip.delivery_window_start, trip.delivery_window_end) {
        lines.push(format!("Scheduled delivery window: {scheduled}"));
        lines.push(format!(
            "The driver is expected to arrive {}.",
            punctuality(trip, eta).label()
        ));
    }
    lines
}

pub fn issue_entry(issue: &Issue, reporter: Option<&User>) -> String {
    let mut lines = vec![
        format!("Issue #{}:", issue.id),
        format!("Status: {}", issue.status),
        format!("Reported by: {}", person(reporter)),
        format!("Time: {}", timestamp(issue.created_at)),
        format!("Description: {}", issue.description),
    ];
    if let Some(resolved_at) = issue.resolved_at {
        lines.push(format!("Resolved at: {}", timestamp(resolved_at)));
    }
    lines.join("\n")
}
