use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use convoy_core::domain::issue::{Issue, IssueId, IssueStatus};
use convoy_core::domain::location::{Location, LocationId, NewLocation};
use convoy_core::domain::notification::{NewNotification, Notification, NotificationId};
use convoy_core::domain::status_update::{StatusUpdate, StatusUpdateId};
use convoy_core::domain::trip::{NewTrip, Trip, TripAssignment, TripId, TripQuery, TripStatus};
use convoy_core::domain::user::{NewUser, Role, User, UserId};

use super::{
    CommittedResolution, CommittedTransition, FleetStore, IssueResolutionCommit, RepositoryError,
    TransitionCommit,
};

#[derive(Default)]
struct FleetState {
    users: Vec<User>,
    trips: Vec<Trip>,
    status_updates: Vec<StatusUpdate>,
    locations: Vec<Location>,
    issues: Vec<Issue>,
    notifications: Vec<Notification>,
}

impl FleetState {
    fn next_id(len: usize) -> i64 {
        i64::try_from(len).unwrap_or(i64::MAX - 1) + 1
    }

    fn push_notification(&mut self, notification: NewNotification) -> Notification {
        let stored = Notification {
            id: NotificationId(Self::next_id(self.notifications.len())),
            recipient_id: notification.recipient_id,
            trip_id: notification.trip_id,
            message: notification.message,
            is_read: false,
            created_at: notification.created_at,
        };
        self.notifications.push(stored.clone());
        stored
    }
}

/// Process-local store. One lock guards every table, so each `commit_*` is trivially atomic.
#[derive(Default)]
pub struct InMemoryFleetStore {
    state: RwLock<FleetState>,
    reject_writes: AtomicBool,
}

impl InMemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail as if the database were unavailable.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn ensure_writable(&self) -> Result<(), RepositoryError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

fn newest_first<T, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K) {
    items.sort_by(|left, right| key(right).cmp(&key(left)));
}

#[async_trait::async_trait]
impl FleetStore for InMemoryFleetStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|user| user.external_id == external_id).cloned())
    }

    async fn upsert_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(existing) =
            state.users.iter_mut().find(|stored| stored.external_id == user.external_id)
        {
            existing.username = user.username.or(existing.username.take());
            existing.first_name = user.first_name.or(existing.first_name.take());
            existing.last_name = user.last_name.or(existing.last_name.take());
            existing.phone_number = user.phone_number.or(existing.phone_number.take());
            existing.role = user.role.or(existing.role);
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let stored = User {
            id: UserId(FleetState::next_id(state.users.len())),
            external_id: user.external_id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        state.users.push(stored.clone());
        Ok(stored)
    }

    async fn set_user_role(&self, id: UserId, role: Role) -> Result<User, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .iter_mut()
            .find(|user| user.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))?;
        user.role = Some(role);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn find_available_driver(&self) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        let busy = |driver: UserId| {
            state
                .trips
                .iter()
                .any(|trip| trip.driver_id == Some(driver) && !trip.status.is_terminal())
        };
        Ok(state
            .users
            .iter()
            .filter(|user| user.has_role(Role::Driver) && !busy(user.id))
            .min_by_key(|user| user.id)
            .cloned())
    }

    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.trips.iter().find(|trip| trip.id == id).cloned())
    }

    async fn create_trip(&self, trip: NewTrip) -> Result<Trip, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        let stored = Trip {
            id: TripId(FleetState::next_id(state.trips.len())),
            driver_id: trip.driver_id,
            shipper_id: trip.shipper_id,
            consignee_id: trip.consignee_id,
            manager_id: trip.manager_id,
            pickup_address: trip.pickup_address,
            delivery_address: trip.delivery_address,
            pickup: trip.pickup,
            delivery: trip.delivery,
            pickup_window_start: trip.pickup_window_start,
            pickup_window_end: trip.pickup_window_end,
            delivery_window_start: trip.delivery_window_start,
            delivery_window_end: trip.delivery_window_end,
            cargo_description: trip.cargo_description,
            cargo_weight: trip.cargo_weight,
            cargo_volume: trip.cargo_volume,
            status: TripStatus::Assigned,
            created_at: now,
            updated_at: now,
        };
        state.trips.push(stored.clone());
        Ok(stored)
    }

    async fn list_trips(&self, query: TripQuery) -> Result<Vec<Trip>, RepositoryError> {
        let state = self.state.read().await;
        let mut trips =
            state.trips.iter().filter(|trip| query.matches(trip)).cloned().collect::<Vec<_>>();
        newest_first(&mut trips, |trip| (trip.created_at, trip.id));
        if let Some(limit) = query.limit {
            trips.truncate(limit);
        }
        Ok(trips)
    }

    async fn update_trip_assignment(
        &self,
        id: TripId,
        assignment: TripAssignment,
    ) -> Result<Trip, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let trip = state
            .trips
            .iter_mut()
            .find(|trip| trip.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("trip {id}")))?;

        if let Some(driver_id) = assignment.driver_id {
            trip.driver_id = Some(driver_id);
        }
        if let Some(shipper_id) = assignment.shipper_id {
            trip.shipper_id = Some(shipper_id);
        }
        if let Some(consignee_id) = assignment.consignee_id {
            trip.consignee_id = Some(consignee_id);
        }
        if let Some(manager_id) = assignment.manager_id {
            trip.manager_id = Some(manager_id);
        }
        trip.updated_at = Utc::now();
        Ok(trip.clone())
    }

    async fn list_status_updates(
        &self,
        trip: TripId,
    ) -> Result<Vec<StatusUpdate>, RepositoryError> {
        let state = self.state.read().await;
        let mut updates = state
            .status_updates
            .iter()
            .filter(|update| update.trip_id == trip)
            .cloned()
            .collect::<Vec<_>>();
        newest_first(&mut updates, |update| (update.recorded_at, update.id));
        Ok(updates)
    }

    async fn record_location(&self, location: NewLocation) -> Result<Location, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        if !state.trips.iter().any(|trip| trip.id == location.trip_id) {
            return Err(RepositoryError::NotFound(format!("trip {}", location.trip_id)));
        }
        let stored = Location {
            id: LocationId(FleetState::next_id(state.locations.len())),
            trip_id: location.trip_id,
            coordinates: location.coordinates,
            recorded_at: location.recorded_at,
        };
        state.locations.push(stored.clone());
        Ok(stored)
    }

    async fn list_locations(
        &self,
        trip: TripId,
        limit: Option<usize>,
    ) -> Result<Vec<Location>, RepositoryError> {
        let state = self.state.read().await;
        let mut locations = state
            .locations
            .iter()
            .filter(|location| location.trip_id == trip)
            .cloned()
            .collect::<Vec<_>>();
        newest_first(&mut locations, |location| (location.recorded_at, location.id));
        if let Some(limit) = limit {
            locations.truncate(limit);
        }
        Ok(locations)
    }

    async fn find_issue(&self, id: IssueId) -> Result<Option<Issue>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.issues.iter().find(|issue| issue.id == id).cloned())
    }

    async fn list_issues(&self, trip: TripId) -> Result<Vec<Issue>, RepositoryError> {
        let state = self.state.read().await;
        let mut issues =
            state.issues.iter().filter(|issue| issue.trip_id == trip).cloned().collect::<Vec<_>>();
        newest_first(&mut issues, |issue| (issue.created_at, issue.id));
        Ok(issues)
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        Ok(state.push_notification(notification))
    }

    async fn list_notifications(
        &self,
        recipient: UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let state = self.state.read().await;
        let mut notifications = state
            .notifications
            .iter()
            .filter(|notification| notification.recipient_id == recipient)
            .filter(|notification| !unread_only || !notification.is_read)
            .cloned()
            .collect::<Vec<_>>();
        newest_first(&mut notifications, |notification| (notification.created_at, notification.id));
        Ok(notifications)
    }

    async fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> Result<Notification, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let notification = state
            .notifications
            .iter_mut()
            .find(|notification| notification.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("notification {id}")))?;
        notification.is_read = true;
        Ok(notification.clone())
    }

    async fn commit_transition(
        &self,
        commit: TransitionCommit,
    ) -> Result<CommittedTransition, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;

        let status = commit.status();
        let recorded_at = commit.status_update.recorded_at;
        let trip = {
            let trip = state
                .trips
                .iter_mut()
                .find(|trip| trip.id == commit.trip_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("trip {}", commit.trip_id)))?;
            if trip.status.is_terminal() {
                return Err(RepositoryError::Conflict(format!(
                    "trip {} is already completed",
                    commit.trip_id
                )));
            }
            trip.status = status;
            trip.updated_at = recorded_at;
            trip.clone()
        };

        let status_update = StatusUpdate {
            id: StatusUpdateId(FleetState::next_id(state.status_updates.len())),
            trip_id: commit.status_update.trip_id,
            actor_id: commit.status_update.actor_id,
            status: commit.status_update.status,
            notes: commit.status_update.notes,
            recorded_at,
        };
        state.status_updates.push(status_update.clone());

        let issue = commit.issue.map(|issue| {
            let stored = Issue {
                id: IssueId(FleetState::next_id(state.issues.len())),
                trip_id: issue.trip_id,
                reporter_id: issue.reporter_id,
                description: issue.description,
                status: IssueStatus::Open,
                created_at: issue.reported_at,
                updated_at: issue.reported_at,
                resolved_at: None,
            };
            state.issues.push(stored.clone());
            stored
        });

        let notifications = commit
            .notifications
            .into_iter()
            .map(|notification| state.push_notification(notification))
            .collect();

        Ok(CommittedTransition { trip, status_update, issue, notifications })
    }

    async fn commit_issue_resolution(
        &self,
        commit: IssueResolutionCommit,
    ) -> Result<CommittedResolution, RepositoryError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;

        let issue = {
            let issue = state
                .issues
                .iter_mut()
                .find(|issue| issue.id == commit.issue_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("issue {}", commit.issue_id)))?;
            if issue.is_resolved() {
                return Err(RepositoryError::Conflict(format!(
                    "issue {} is already resolved",
                    commit.issue_id
                )));
            }
            issue.status = IssueStatus::Resolved;
            issue.resolved_at = Some(commit.resolved_at);
            issue.updated_at = commit.resolved_at;
            issue.clone()
        };

        let notification =
            commit.notification.map(|notification| state.push_notification(notification));
        Ok(CommittedResolution { issue, notification })
    }
}
