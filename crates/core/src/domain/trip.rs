use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::row_id;
use crate::domain::user::{Role, UserId};

row_id!(TripId);

/// Lifecycle status of a trip. The string forms are persisted and sent over the wire verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Assigned,
    AtPickup,
    Loading,
    InTransit,
    Delayed,
    IssueReported,
    AtDestination,
    Unloading,
    Completed,
}

impl TripStatus {
    pub const ALL: [TripStatus; 9] = [
        TripStatus::Assigned,
        TripStatus::AtPickup,
        TripStatus::Loading,
        TripStatus::InTransit,
        TripStatus::Delayed,
        TripStatus::IssueReported,
        TripStatus::AtDestination,
        TripStatus::Unloading,
        TripStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::AtPickup => "at_pickup",
            Self::Loading => "loading",
            Self::InTransit => "in_transit",
            Self::Delayed => "delayed",
            Self::IssueReported => "issue_reported",
            Self::AtDestination => "at_destination",
            Self::Unloading => "unloading",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|status| status.as_str() == normalized)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Assigned => "Assigned",
            Self::AtPickup => "At Pickup",
            Self::Loading => "Loading",
            Self::InTransit => "In Transit",
            Self::Delayed => "Delayed",
            Self::IssueReported => "Issue Reported",
            Self::AtDestination => "At Destination",
            Self::Unloading => "Unloading",
            Self::Completed => "Completed",
        }
    }

    /// `completed` is the only terminal status; nothing moves a trip out of it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        Some(Self { latitude: latitude?, longitude: longitude? })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub driver_id: Option<UserId>,
    pub shipper_id: Option<UserId>,
    pub consignee_id: Option<UserId>,
    pub manager_id: Option<UserId>,
    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup: Option<Coordinates>,
    pub delivery: Option<Coordinates>,
    pub pickup_window_start: Option<DateTime<Utc>>,
    pub pickup_window_end: Option<DateTime<Utc>>,
    pub delivery_window_start: Option<DateTime<Utc>>,
    pub delivery_window_end: Option<DateTime<Utc>>,
    pub cargo_description: String,
    pub cargo_weight: Option<f64>,
    pub cargo_volume: Option<f64>,
    pub status: TripStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// The user filling `role` on this trip, if the slot is staffed.
    pub fn party(&self, role: Role) -> Option<UserId> {
        match role {
            Role::Driver => self.driver_id,
            Role::Manager => self.manager_id,
            Role::Shipper => self.shipper_id,
            Role::Consignee => self.consignee_id,
        }
    }

    pub fn is_party(&self, role: Role, user: UserId) -> bool {
        self.party(role) == Some(user)
    }

    /// Non-driver parties in notification order, skipping empty slots and `exclude`.
    pub fn stakeholders(&self, exclude: Option<UserId>) -> Vec<UserId> {
        let mut recipients = Vec::with_capacity(3);
        for candidate in [self.manager_id, self.shipper_id, self.consignee_id].into_iter().flatten()
        {
            if Some(candidate) != exclude && !recipients.contains(&candidate) {
                recipients.push(candidate);
            }
        }
        recipients
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTrip {
    #[serde(default)]
    pub driver_id: Option<UserId>,
    #[serde(default)]
    pub shipper_id: Option<UserId>,
    #[serde(default)]
    pub consignee_id: Option<UserId>,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    pub pickup_address: String,
    pub delivery_address: String,
    #[serde(default)]
    pub pickup: Option<Coordinates>,
    #[serde(default)]
    pub delivery: Option<Coordinates>,
    #[serde(default)]
    pub pickup_window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_window_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_window_end: Option<DateTime<Utc>>,
    pub cargo_description: String,
    #[serde(default)]
    pub cargo_weight: Option<f64>,
    #[serde(default)]
    pub cargo_volume: Option<f64>,
}

/// Staffing changes for an existing trip; `None` leaves the slot untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripAssignment {
    #[serde(default)]
    pub driver_id: Option<UserId>,
    #[serde(default)]
    pub shipper_id: Option<UserId>,
    #[serde(default)]
    pub consignee_id: Option<UserId>,
    #[serde(default)]
    pub manager_id: Option<UserId>,
}

impl TripAssignment {
    pub fn is_empty(&self) -> bool {
        self.driver_id.is_none()
            && self.shipper_id.is_none()
            && self.consignee_id.is_none()
            && self.manager_id.is_none()
    }
}

/// Read predicate for trip listings. Results are ordered newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TripQuery {
    pub party: Option<(Role, UserId)>,
    pub include_completed: bool,
    pub limit: Option<usize>,
}

impl TripQuery {
    pub fn all() -> Self {
        Self { party: None, include_completed: true, limit: None }
    }

    pub fn active() -> Self {
        Self { party: None, include_completed: false, limit: None }
    }

    pub fn for_party(mut self, role: Role, user: UserId) -> Self {
        self.party = Some((role, user));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, trip: &Trip) -> bool {
        if !self.include_completed && trip.status.is_terminal() {
            return false;
        }
        match self.party {
            Some((role, user)) => trip.is_party(role, user),
            None => true,
        }
    }
}
