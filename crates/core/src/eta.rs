//! Great-circle arrival estimates for the trip read path.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::location::Location;
use crate::domain::trip::{Coordinates, Trip};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 60.0;

/// Haversine distance between two points, in kilometres.
pub fn distance_km(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (to.longitude - from.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Estimated arrival: the location's timestamp plus travel time at `average_speed_kmh`.
/// `None` when the destination or the current position is unknown.
pub fn estimate_arrival(
    destination: Option<Coordinates>,
    current: Option<&Location>,
    average_speed_kmh: f64,
) -> Option<DateTime<Utc>> {
    let destination = destination?;
    let current = current?;
    if !(average_speed_kmh.is_finite() && average_speed_kmh > 0.0) {
        return None;
    }

    let hours = distance_km(current.coordinates, destination) / average_speed_kmh;
    let millis = (hours * 3_600_000.0).round();
    if !millis.is_finite() {
        return None;
    }
    Some(current.recorded_at + Duration::milliseconds(millis as i64))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Punctuality {
    Early,
    OnTime,
    Late,
}

impl Punctuality {
    pub fn label(self) -> &'static str {
        match self {
            Self::Early => "EARLY",
            Self::OnTime => "ON TIME",
            Self::Late => "LATE",
        }
    }
}

/// Compares an estimate with the trip's delivery window. Missing bounds never trigger.
pub fn punctuality(trip: &Trip, eta: DateTime<Utc>) -> Punctuality {
    if trip.delivery_window_start.is_some_and(|start| eta < start) {
        return Punctuality::Early;
    }
    if trip.delivery_window_end.is_some_and(|end| eta > end) {
        return Punctuality::Late;
    }
    Punctuality::OnTime
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{distance_km, estimate_arrival, punctuality, Punctuality};
    use crate::domain::location::{Location, LocationId};
    use crate::domain::trip::{Coordinates, Trip, TripId, TripStatus};

    fn location_at(latitude: f64, longitude: f64) -> Location {
        Location {
            id: LocationId(1),
            trip_id: TripId(1),
            coordinates: Coordinates::new(latitude, longitude),
            recorded_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("valid time"),
        }
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let distance = distance_km(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0));
        assert!((distance - 111.19).abs() < 0.01, "got {distance}");
        assert_eq!(distance_km(Coordinates::new(48.1, 11.5), Coordinates::new(48.1, 11.5)), 0.0);
    }

    #[test]
    fn arrival_adds_travel_time_to_the_fix_timestamp() {
        let current = location_at(0.0, 0.0);
        let eta = estimate_arrival(Some(Coordinates::new(1.0, 0.0)), Some(&current), 60.0)
            .expect("estimate available");

        let travel = eta - current.recorded_at;
        assert!(travel > Duration::minutes(110) && travel < Duration::minutes(113));
    }

    #[test]
    fn arrival_is_unknown_without_destination_or_fix() {
        let current = location_at(0.0, 0.0);
        assert_eq!(estimate_arrival(None, Some(&current), 60.0), None);
        assert_eq!(estimate_arrival(Some(Coordinates::new(1.0, 1.0)), None, 60.0), None);
        assert_eq!(estimate_arrival(Some(Coordinates::new(1.0, 1.0)), Some(&current), 0.0), None);
    }

    #[test]
    fn punctuality_is_judged_against_the_delivery_window() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 14, 0, 0).single().expect("valid time");
        let end = start + Duration::hours(2);
        let trip = Trip {
            id: TripId(1),
            driver_id: None,
            shipper_id: None,
            consignee_id: None,
            manager_id: None,
            pickup_address: String::new(),
            delivery_address: String::new(),
            pickup: None,
            delivery: None,
            pickup_window_start: None,
            pickup_window_end: None,
            delivery_window_start: Some(start),
            delivery_window_end: Some(end),
            cargo_description: String::new(),
            cargo_weight: None,
            cargo_volume: None,
            status: TripStatus::InTransit,
            created_at: start,
            updated_at: start,
        };

        assert_eq!(punctuality(&trip, start - Duration::minutes(1)), Punctuality::Early);
        assert_eq!(punctuality(&trip, start + Duration::hours(1)), Punctuality::OnTime);
        assert_eq!(punctuality(&trip, end + Duration::minutes(1)), Punctuality::Late);
        assert_eq!(Punctuality::OnTime.label(), "ON TIME");
    }
}
