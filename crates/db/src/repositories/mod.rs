use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use convoy_core::domain::issue::{Issue, IssueId, NewIssue};
use convoy_core::domain::location::{Location, NewLocation};
use convoy_core::domain::notification::{NewNotification, Notification, NotificationId};
use convoy_core::domain::status_update::{NewStatusUpdate, StatusUpdate};
use convoy_core::domain::trip::{NewTrip, Trip, TripAssignment, TripId, TripQuery, TripStatus};
use convoy_core::domain::user::{NewUser, Role, User, UserId};

pub mod fleet;
pub mod memory;

pub use fleet::SqlFleetStore;
pub use memory::InMemoryFleetStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// The write lost against the current row state (completed trip, resolved issue).
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// One accepted status transition, persisted all-or-nothing.
///
/// The trip row is only updated while its stored status is not terminal; otherwise the whole
/// unit is rejected with [`RepositoryError::Conflict`] and nothing is written.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionCommit {
    pub trip_id: TripId,
    pub status_update: NewStatusUpdate,
    pub issue: Option<NewIssue>,
    pub notifications: Vec<NewNotification>,
}

impl TransitionCommit {
    pub fn status(&self) -> TripStatus {
        self.status_update.status
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommittedTransition {
    pub trip: Trip,
    pub status_update: StatusUpdate,
    pub issue: Option<Issue>,
    pub notifications: Vec<Notification>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueResolutionCommit {
    pub issue_id: IssueId,
    pub resolved_at: DateTime<Utc>,
    pub notification: Option<NewNotification>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedResolution {
    pub issue: Issue,
    pub notification: Option<Notification>,
}

/// Read/write access to the fleet records.
///
/// History reads (`list_*`) return newest first. Multi-row writes are exposed only as the
/// `commit_*` units so callers cannot leave a transition half applied.
#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError>;
    /// Inserts or refreshes the profile keyed by `external_id`. A `None` role keeps the stored one.
    async fn upsert_user(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn set_user_role(&self, id: UserId, role: Role) -> Result<User, RepositoryError>;
    /// Lowest-id driver with no non-completed trip.
    async fn find_available_driver(&self) -> Result<Option<User>, RepositoryError>;

    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>, RepositoryError>;
    async fn create_trip(&self, trip: NewTrip) -> Result<Trip, RepositoryError>;
    async fn list_trips(&self, query: TripQuery) -> Result<Vec<Trip>, RepositoryError>;
    async fn update_trip_assignment(
        &self,
        id: TripId,
        assignment: TripAssignment,
    ) -> Result<Trip, RepositoryError>;

    async fn list_status_updates(&self, trip: TripId)
        -> Result<Vec<StatusUpdate>, RepositoryError>;
    async fn record_location(&self, location: NewLocation) -> Result<Location, RepositoryError>;
    async fn list_locations(
        &self,
        trip: TripId,
        limit: Option<usize>,
    ) -> Result<Vec<Location>, RepositoryError>;
    async fn latest_location(&self, trip: TripId) -> Result<Option<Location>, RepositoryError> {
        Ok(self.list_locations(trip, Some(1)).await?.into_iter().next())
    }
    async fn find_issue(&self, id: IssueId) -> Result<Option<Issue>, RepositoryError>;
    async fn list_issues(&self, trip: TripId) -> Result<Vec<Issue>, RepositoryError>;

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError>;
    async fn list_notifications(
        &self,
        recipient: UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, RepositoryError>;
    async fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> Result<Notification, RepositoryError>;

    async fn commit_transition(
        &self,
        commit: TransitionCommit,
    ) -> Result<CommittedTransition, RepositoryError>;
    async fn commit_issue_resolution(
        &self,
        commit: IssueResolutionCommit,
    ) -> Result<CommittedResolution, RepositoryError>;
}

/// The trip a driver is working on: their newest trip that is not completed.
pub async fn active_trip_for_driver<S>(
    store: &S,
    driver: UserId,
) -> Result<Option<Trip>, RepositoryError>
where
    S: FleetStore + ?Sized,
{
    let trips = store.list_trips(TripQuery::active().for_party(Role::Driver, driver).limit(1)).await?;
    Ok(trips.into_iter().next())
}
