use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use convoy_core::domain::issue::{Issue, IssueId, IssueStatus};
use convoy_core::domain::location::{Location, LocationId, NewLocation};
use convoy_core::domain::notification::{NewNotification, Notification, NotificationId};
use convoy_core::domain::status_update::{StatusUpdate, StatusUpdateId};
use convoy_core::domain::trip::{
    Coordinates, NewTrip, Trip, TripAssignment, TripId, TripQuery, TripStatus,
};
use convoy_core::domain::user::{NewUser, Role, User, UserId};

use super::{
    CommittedResolution, CommittedTransition, FleetStore, IssueResolutionCommit, RepositoryError,
    TransitionCommit,
};
use crate::DbPool;

const USER_COLUMNS: &str = "id, external_id, username, first_name, last_name, phone_number, role,
    created_at, updated_at";

const TRIP_COLUMNS: &str = "id, driver_id, shipper_id, consignee_id, manager_id,
    pickup_address, delivery_address, pickup_latitude, pickup_longitude,
    delivery_latitude, delivery_longitude, pickup_window_start, pickup_window_end,
    delivery_window_start, delivery_window_end, cargo_description, cargo_weight, cargo_volume,
    status, created_at, updated_at";

const ISSUE_COLUMNS: &str =
    "id, trip_id, reporter_id, description, status, created_at, updated_at, resolved_at";

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, trip_id, message, is_read, created_at";

pub struct SqlFleetStore {
    pool: DbPool,
}

impl SqlFleetStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_user(&self, column: &str, value: &str) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?");
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.map(user_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl FleetStore for SqlFleetStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.map(user_from_row).transpose()
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.fetch_user("external_id", external_id).await
    }

    async fn upsert_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let now = timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO users (
                external_id, username, first_name, last_name, phone_number, role,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(external_id) DO UPDATE SET
                username = COALESCE(excluded.username, users.username),
                first_name = COALESCE(excluded.first_name, users.first_name),
                last_name = COALESCE(excluded.last_name, users.last_name),
                phone_number = COALESCE(excluded.phone_number, users.phone_number),
                role = COALESCE(excluded.role, users.role),
                updated_at = excluded.updated_at",
        )
        .bind(&user.external_id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.role.map(Role::as_str))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.fetch_user("external_id", &user.external_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("user `{}`", user.external_id)))
    }

    async fn set_user_role(&self, id: UserId, role: Role) -> Result<User, RepositoryError> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(timestamp(Utc::now()))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {id}")));
        }

        self.find_user(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("user {id}")))
    }

    async fn find_available_driver(&self) -> Result<Option<User>, RepositoryError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u
             WHERE u.role = 'driver'
               AND NOT EXISTS (
                   SELECT 1 FROM trips t WHERE t.driver_id = u.id AND t.status <> 'completed'
               )
             ORDER BY u.id ASC
             LIMIT 1"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(user_from_row).transpose()
    }

    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>, RepositoryError> {
        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.map(trip_from_row).transpose()
    }

    async fn create_trip(&self, trip: NewTrip) -> Result<Trip, RepositoryError> {
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            "INSERT INTO trips (
                driver_id, shipper_id, consignee_id, manager_id,
                pickup_address, delivery_address,
                pickup_latitude, pickup_longitude, delivery_latitude, delivery_longitude,
                pickup_window_start, pickup_window_end, delivery_window_start, delivery_window_end,
                cargo_description, cargo_weight, cargo_volume,
                status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trip.driver_id.map(|id| id.0))
        .bind(trip.shipper_id.map(|id| id.0))
        .bind(trip.consignee_id.map(|id| id.0))
        .bind(trip.manager_id.map(|id| id.0))
        .bind(&trip.pickup_address)
        .bind(&trip.delivery_address)
        .bind(trip.pickup.map(|point| point.latitude))
        .bind(trip.pickup.map(|point| point.longitude))
        .bind(trip.delivery.map(|point| point.latitude))
        .bind(trip.delivery.map(|point| point.longitude))
        .bind(trip.pickup_window_start.map(timestamp))
        .bind(trip.pickup_window_end.map(timestamp))
        .bind(trip.delivery_window_start.map(timestamp))
        .bind(trip.delivery_window_end.map(timestamp))
        .bind(&trip.cargo_description)
        .bind(trip.cargo_weight)
        .bind(trip.cargo_volume)
        .bind(TripStatus::Assigned.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = TripId(result.last_insert_rowid());
        self.find_trip(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("trip {id}")))
    }

    async fn list_trips(&self, query: TripQuery) -> Result<Vec<Trip>, RepositoryError> {
        let mut clauses = Vec::new();
        if let Some((role, _)) = query.party {
            clauses.push(format!("{} = ?", party_column(role)));
        }
        if !query.include_completed {
            clauses.push("status <> 'completed'".to_owned());
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = query.limit.map(|limit| format!("LIMIT {limit}")).unwrap_or_default();
        let sql = format!(
            "SELECT {TRIP_COLUMNS} FROM trips {filter} ORDER BY created_at DESC, id DESC {limit}"
        );

        let mut statement = sqlx::query(&sql);
        if let Some((_, user)) = query.party {
            statement = statement.bind(user.0);
        }
        let rows = statement.fetch_all(&self.pool).await?;
        rows.into_iter().map(trip_from_row).collect()
    }

    async fn update_trip_assignment(
        &self,
        id: TripId,
        assignment: TripAssignment,
    ) -> Result<Trip, RepositoryError> {
        let result = sqlx::query(
            "UPDATE trips SET
                driver_id = COALESCE(?, driver_id),
                shipper_id = COALESCE(?, shipper_id),
                consignee_id = COALESCE(?, consignee_id),
                manager_id = COALESCE(?, manager_id),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(assignment.driver_id.map(|id| id.0))
        .bind(assignment.shipper_id.map(|id| id.0))
        .bind(assignment.consignee_id.map(|id| id.0))
        .bind(assignment.manager_id.map(|id| id.0))
        .bind(timestamp(Utc::now()))
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("trip {id}")));
        }

        self.find_trip(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("trip {id}")))
    }

    async fn list_status_updates(
        &self,
        trip: TripId,
    ) -> Result<Vec<StatusUpdate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, trip_id, actor_id, status, notes, recorded_at
             FROM status_updates
             WHERE trip_id = ?
             ORDER BY recorded_at DESC, id DESC",
        )
        .bind(trip.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(status_update_from_row).collect()
    }

    async fn record_location(&self, location: NewLocation) -> Result<Location, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO locations (trip_id, latitude, longitude, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(location.trip_id.0)
        .bind(location.coordinates.latitude)
        .bind(location.coordinates.longitude)
        .bind(timestamp(location.recorded_at))
        .execute(&self.pool)
        .await?;

        Ok(Location {
            id: LocationId(result.last_insert_rowid()),
            trip_id: location.trip_id,
            coordinates: location.coordinates,
            recorded_at: location.recorded_at,
        })
    }

    async fn list_locations(
        &self,
        trip: TripId,
        limit: Option<usize>,
    ) -> Result<Vec<Location>, RepositoryError> {
        let limit = limit.map(|limit| format!("LIMIT {limit}")).unwrap_or_default();
        let sql = format!(
            "SELECT id, trip_id, latitude, longitude, recorded_at
             FROM locations
             WHERE trip_id = ?
             ORDER BY recorded_at DESC, id DESC {limit}"
        );
        let rows = sqlx::query(&sql).bind(trip.0).fetch_all(&self.pool).await?;
        rows.into_iter().map(location_from_row).collect()
    }

    async fn find_issue(&self, id: IssueId) -> Result<Option<Issue>, RepositoryError> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.map(issue_from_row).transpose()
    }

    async fn list_issues(&self, trip: TripId) -> Result<Vec<Issue>, RepositoryError> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE trip_id = ? ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql).bind(trip.0).fetch_all(&self.pool).await?;
        rows.into_iter().map(issue_from_row).collect()
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let stored = insert_notification(&mut tx, notification).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_notifications(
        &self,
        recipient: UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let unread = if unread_only { "AND is_read = 0" } else { "" };
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ? {unread}
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql).bind(recipient.0).fetch_all(&self.pool).await?;
        rows.into_iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> Result<Notification, RepositoryError> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("notification {id}")));
        }

        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_one(&self.pool).await?;
        notification_from_row(row)
    }

    async fn commit_transition(
        &self,
        commit: TransitionCommit,
    ) -> Result<CommittedTransition, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let recorded_at = commit.status_update.recorded_at;

        let updated = sqlx::query(
            "UPDATE trips SET status = ?, updated_at = ? WHERE id = ? AND status <> 'completed'",
        )
        .bind(commit.status().as_str())
        .bind(timestamp(recorded_at))
        .bind(commit.trip_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM trips WHERE id = ?")
                .bind(commit.trip_id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Err(if exists {
                RepositoryError::Conflict(format!("trip {} is already completed", commit.trip_id))
            } else {
                RepositoryError::NotFound(format!("trip {}", commit.trip_id))
            });
        }

        let update = commit.status_update;
        let inserted = sqlx::query(
            "INSERT INTO status_updates (trip_id, actor_id, status, notes, recorded_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(update.trip_id.0)
        .bind(update.actor_id.0)
        .bind(update.status.as_str())
        .bind(&update.notes)
        .bind(timestamp(update.recorded_at))
        .execute(&mut *tx)
        .await?;
        let status_update = StatusUpdate {
            id: StatusUpdateId(inserted.last_insert_rowid()),
            trip_id: update.trip_id,
            actor_id: update.actor_id,
            status: update.status,
            notes: update.notes,
            recorded_at: update.recorded_at,
        };

        let issue = match commit.issue {
            Some(issue) => {
                let reported_at = timestamp(issue.reported_at);
                let inserted = sqlx::query(
                    "INSERT INTO issues (
                        trip_id, reporter_id, description, status, created_at, updated_at
                     ) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(issue.trip_id.0)
                .bind(issue.reporter_id.0)
                .bind(&issue.description)
                .bind(IssueStatus::Open.as_str())
                .bind(&reported_at)
                .bind(&reported_at)
                .execute(&mut *tx)
                .await?;
                Some(Issue {
                    id: IssueId(inserted.last_insert_rowid()),
                    trip_id: issue.trip_id,
                    reporter_id: issue.reporter_id,
                    description: issue.description,
                    status: IssueStatus::Open,
                    created_at: issue.reported_at,
                    updated_at: issue.reported_at,
                    resolved_at: None,
                })
            }
            None => None,
        };

        let mut notifications = Vec::with_capacity(commit.notifications.len());
        for notification in commit.notifications {
            notifications.push(insert_notification(&mut tx, notification).await?);
        }

        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?");
        let trip = trip_from_row(sqlx::query(&sql).bind(commit.trip_id.0).fetch_one(&mut *tx).await?)?;

        tx.commit().await?;
        Ok(CommittedTransition { trip, status_update, issue, notifications })
    }

    async fn commit_issue_resolution(
        &self,
        commit: IssueResolutionCommit,
    ) -> Result<CommittedResolution, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let resolved_at = timestamp(commit.resolved_at);

        let updated = sqlx::query(
            "UPDATE issues SET status = 'resolved', resolved_at = ?, updated_at = ?
             WHERE id = ? AND status <> 'resolved'",
        )
        .bind(&resolved_at)
        .bind(&resolved_at)
        .bind(commit.issue_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM issues WHERE id = ?")
                .bind(commit.issue_id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Err(if exists {
                RepositoryError::Conflict(format!("issue {} is already resolved", commit.issue_id))
            } else {
                RepositoryError::NotFound(format!("issue {}", commit.issue_id))
            });
        }

        let notification = match commit.notification {
            Some(notification) => Some(insert_notification(&mut tx, notification).await?),
            None => None,
        };

        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?");
        let issue =
            issue_from_row(sqlx::query(&sql).bind(commit.issue_id.0).fetch_one(&mut *tx).await?)?;

        tx.commit().await?;
        Ok(CommittedResolution { issue, notification })
    }
}

async fn insert_notification(
    tx: &mut Transaction<'_, Sqlite>,
    notification: NewNotification,
) -> Result<Notification, RepositoryError> {
    let inserted = sqlx::query(
        "INSERT INTO notifications (recipient_id, trip_id, message, is_read, created_at)
         VALUES (?, ?, ?, 0, ?)",
    )
    .bind(notification.recipient_id.0)
    .bind(notification.trip_id.map(|id| id.0))
    .bind(&notification.message)
    .bind(timestamp(notification.created_at))
    .execute(&mut **tx)
    .await?;

    Ok(Notification {
        id: NotificationId(inserted.last_insert_rowid()),
        recipient_id: notification.recipient_id,
        trip_id: notification.trip_id,
        message: notification.message,
        is_read: false,
        created_at: notification.created_at,
    })
}

fn party_column(role: Role) -> &'static str {
    match role {
        Role::Driver => "driver_id",
        Role::Manager => "manager_id",
        Role::Shipper => "shipper_id",
        Role::Consignee => "consignee_id",
    }
}

fn user_from_row(row: SqliteRow) -> Result<User, RepositoryError> {
    let role = row
        .try_get::<Option<String>, _>("role")?
        .map(|value| {
            Role::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown user role `{value}`")))
        })
        .transpose()?;

    Ok(User {
        id: UserId(row.try_get("id")?),
        external_id: row.try_get("external_id")?,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone_number: row.try_get("phone_number")?,
        role,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn trip_from_row(row: SqliteRow) -> Result<Trip, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TripStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown trip status `{status_raw}`")))?;

    Ok(Trip {
        id: TripId(row.try_get("id")?),
        driver_id: row.try_get::<Option<i64>, _>("driver_id")?.map(UserId),
        shipper_id: row.try_get::<Option<i64>, _>("shipper_id")?.map(UserId),
        consignee_id: row.try_get::<Option<i64>, _>("consignee_id")?.map(UserId),
        manager_id: row.try_get::<Option<i64>, _>("manager_id")?.map(UserId),
        pickup_address: row.try_get("pickup_address")?,
        delivery_address: row.try_get("delivery_address")?,
        pickup: Coordinates::from_parts(
            row.try_get("pickup_latitude")?,
            row.try_get("pickup_longitude")?,
        ),
        delivery: Coordinates::from_parts(
            row.try_get("delivery_latitude")?,
            row.try_get("delivery_longitude")?,
        ),
        pickup_window_start: parse_optional_timestamp(
            "pickup_window_start",
            row.try_get("pickup_window_start")?,
        )?,
        pickup_window_end: parse_optional_timestamp(
            "pickup_window_end",
            row.try_get("pickup_window_end")?,
        )?,
        delivery_window_start: parse_optional_timestamp(
            "delivery_window_start",
            row.try_get("delivery_window_start")?,
        )?,
        delivery_window_end: parse_optional_timestamp(
            "delivery_window_end",
            row.try_get("delivery_window_end")?,
        )?,
        cargo_description: row.try_get("cargo_description")?,
        cargo_weight: row.try_get("cargo_weight")?,
        cargo_volume: row.try_get("cargo_volume")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn status_update_from_row(row: SqliteRow) -> Result<StatusUpdate, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TripStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown status update status `{status_raw}`"))
    })?;

    Ok(StatusUpdate {
        id: StatusUpdateId(row.try_get("id")?),
        trip_id: TripId(row.try_get("trip_id")?),
        actor_id: UserId(row.try_get("actor_id")?),
        status,
        notes: row.try_get("notes")?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}

fn location_from_row(row: SqliteRow) -> Result<Location, RepositoryError> {
    Ok(Location {
        id: LocationId(row.try_get("id")?),
        trip_id: TripId(row.try_get("trip_id")?),
        coordinates: Coordinates::new(row.try_get("latitude")?, row.try_get("longitude")?),
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}

fn issue_from_row(row: SqliteRow) -> Result<Issue, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = IssueStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown issue status `{status_raw}`")))?;

    Ok(Issue {
        id: IssueId(row.try_get("id")?),
        trip_id: TripId(row.try_get("trip_id")?),
        reporter_id: UserId(row.try_get("reporter_id")?),
        description: row.try_get("description")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
    })
}

fn notification_from_row(row: SqliteRow) -> Result<Notification, RepositoryError> {
    Ok(Notification {
        id: NotificationId(row.try_get("id")?),
        recipient_id: UserId(row.try_get("recipient_id")?),
        trip_id: row.try_get::<Option<i64>, _>("trip_id")?.map(TripId),
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

/// Fixed-width UTC form so lexical order in SQLite matches chronological order.
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
