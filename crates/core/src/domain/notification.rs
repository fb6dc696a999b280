use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::row_id;
use crate::domain::trip::TripId;
use crate::domain::user::UserId;

row_id!(NotificationId);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub trip_id: Option<TripId>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub trip_id: Option<TripId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn for_trip(
        recipient_id: UserId,
        trip_id: TripId,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { recipient_id, trip_id: Some(trip_id), message: message.into(), created_at }
    }
}
