use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::row_id;
use crate::domain::trip::{TripId, TripStatus};
use crate::domain::user::UserId;

row_id!(StatusUpdateId);

/// Append-only record of one trip status write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: StatusUpdateId,
    pub trip_id: TripId,
    pub actor_id: UserId,
    pub status: TripStatus,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatusUpdate {
    pub trip_id: TripId,
    pub actor_id: UserId,
    pub status: TripStatus,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
