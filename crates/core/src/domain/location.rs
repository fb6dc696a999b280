use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::row_id;
use crate::domain::trip::{Coordinates, TripId};

row_id!(LocationId);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub trip_id: TripId,
    pub coordinates: Coordinates,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub trip_id: TripId,
    pub coordinates: Coordinates,
    pub recorded_at: DateTime<Utc>,
}
