use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::issue::{IssueId, NewIssue};
use crate::domain::status_update::NewStatusUpdate;
use crate::domain::trip::{TripId, TripStatus};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub new_status: TripStatus,
    pub notes: Option<String>,
    pub actor: UserId,
    pub requested_at: DateTime<Utc>,
}

impl TransitionRequest {
    pub fn new(new_status: TripStatus, actor: UserId) -> Self {
        Self { new_status, notes: None, actor, requested_at: Utc::now() }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.requested_at = requested_at;
        self
    }
}

/// Everything a caller must persist for an accepted transition, as one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub trip_id: TripId,
    pub from: TripStatus,
    pub to: TripStatus,
    pub status_update: NewStatusUpdate,
    /// Stakeholders to notify: non-null manager/shipper/consignee, minus the actor.
    pub notify: Vec<UserId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    pub issue: NewIssue,
    pub transition: TransitionOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueResolution {
    pub issue_id: IssueId,
    pub resolved_at: DateTime<Utc>,
    pub notify_driver: Option<UserId>,
}
