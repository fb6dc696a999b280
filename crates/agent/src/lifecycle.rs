use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use convoy_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use convoy_core::domain::issue::IssueId;
use convoy_core::domain::notification::{NewNotification, Notification};
use convoy_core::domain::trip::{Trip, TripId, TripStatus};
use convoy_core::domain::user::UserId;
use convoy_core::errors::{ApplicationError, DomainError};
use convoy_core::flows::{TransitionRequest, TripStateMachine};
use convoy_db::{
    CommittedResolution, CommittedTransition, FleetStore, IssueResolutionCommit,
    RepositoryError, TransitionCommit,
};

use crate::notify::{NoopNotifier, NoticeKind, Notifier};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(#[source] RepositoryError),
}

impl LifecycleError {
    pub fn into_application(self) -> ApplicationError {
        match self {
            Self::Domain(violation) => ApplicationError::Domain(violation),
            Self::Persistence(error) => ApplicationError::Persistence(error.to_string()),
        }
    }

    fn audit_outcome(&self) -> AuditOutcome {
        match self {
            Self::Domain(_) => AuditOutcome::Rejected,
            Self::Persistence(_) => AuditOutcome::Failed,
        }
    }
}

/// Default fan-out text for a transition.
pub fn status_announcement(trip_id: TripId, status: TripStatus, notes: Option<&str>) -> String {
    match notes.filter(|notes| !notes.trim().is_empty()) {
        Some(notes) => format!("Trip #{trip_id} status updated to {status}: {notes}"),
        None => format!("Trip #{trip_id} status updated to {status}"),
    }
}

/// Applies trip state machine decisions to the store.
///
/// Every method loads what it needs, lets [`TripStateMachine`] decide, and commits the whole
/// decision (status, history row, issue, notifications) as one store unit. Audit events and
/// outbound notices follow the commit, never precede it.
#[derive(Clone)]
pub struct TripLifecycle {
    store: Arc<dyn FleetStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    machine: TripStateMachine,
}

impl TripLifecycle {
    pub fn new(store: Arc<dyn FleetStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit, notifier: Arc::new(NoopNotifier), machine: TripStateMachine }
    }

    pub fn without_audit(store: Arc<dyn FleetStore>) -> Self {
        Self::new(store, Arc::new(NoopAuditSink))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Stores one notification, then hands it to the notifier.
    pub async fn notify(
        &self,
        notice: NewNotification,
        kind: NoticeKind,
    ) -> Result<Notification, RepositoryError> {
        let notification = self.store.create_notification(notice).await?;
        self.notifier.publish(&notification, kind).await;
        Ok(notification)
    }

    pub async fn transition(
        &self,
        trip_id: TripId,
        request: TransitionRequest,
        announcement: Option<String>,
        correlation_id: &str,
    ) -> Result<CommittedTransition, LifecycleError> {
        let trip = self.load_trip(trip_id).await?;
        let actor = request.actor;
        let requested = request.new_status;
        let outcome = match self.machine.transition(&trip, request) {
            Ok(outcome) => outcome,
            Err(rejection) => {
                let event = self.event(
                    &trip,
                    correlation_id,
                    actor,
                    "trip.transition_rejected",
                    AuditOutcome::Rejected,
                );
                self.audit.emit(event.with_metadata("requested", requested.as_str()));
                return Err(DomainError::from(rejection).into());
            }
        };

        let message = announcement.unwrap_or_else(|| {
            status_announcement(trip_id, outcome.to, outcome.status_update.notes.as_deref())
        });
        let created_at = outcome.status_update.recorded_at;
        let commit = TransitionCommit {
            trip_id,
            notifications: outcome
                .notify
                .iter()
                .map(|recipient| {
                    NewNotification::for_trip(*recipient, trip_id, message.clone(), created_at)
                })
                .collect(),
            status_update: outcome.status_update,
            issue: None,
        };

        let committed = match self.commit(commit, correlation_id).await {
            Ok(committed) => committed,
            Err(error) => {
                let event_type = match error {
                    LifecycleError::Domain(_) => "trip.transition_rejected",
                    LifecycleError::Persistence(_) => "trip.transition_failed",
                };
                let event =
                    self.event(&trip, correlation_id, actor, event_type, error.audit_outcome());
                self.audit.emit(event.with_metadata("requested", requested.as_str()));
                return Err(error);
            }
        };
        let applied = self.event(
            &trip,
            correlation_id,
            actor,
            "trip.transition_applied",
            AuditOutcome::Success,
        );
        self.audit.emit(
            applied
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", committed.trip.status.as_str())
                .with_metadata("notify", committed.notifications.len().to_string()),
        );
        info!(
            event_name = "trip.transition.committed",
            correlation_id,
            trip_id = %trip_id,
            from = %outcome.from,
            to = %committed.trip.status,
            notified = committed.notifications.len(),
            "trip transition committed"
        );
        self.publish_all(&committed.notifications).await;
        Ok(committed)
    }

    /// Opens an issue and moves the trip to `issue_reported` in one unit.
    pub async fn report_issue(
        &self,
        trip_id: TripId,
        reporter: UserId,
        description: &str,
        correlation_id: &str,
    ) -> Result<CommittedTransition, LifecycleError> {
        let trip = self.load_trip(trip_id).await?;
        let report = match self.machine.report_issue(&trip, reporter, description, Utc::now()) {
            Ok(report) => report,
            Err(rejection) => {
                self.audit.emit(self.event(
                    &trip,
                    correlation_id,
                    reporter,
                    "trip.issue_rejected",
                    AuditOutcome::Rejected,
                ));
                return Err(DomainError::from(rejection).into());
            }
        };

        let transition = report.transition;
        let message = status_announcement(
            trip_id,
            transition.to,
            transition.status_update.notes.as_deref(),
        );
        let created_at = transition.status_update.recorded_at;
        let commit = TransitionCommit {
            trip_id,
            notifications: transition
                .notify
                .iter()
                .map(|recipient| {
                    NewNotification::for_trip(*recipient, trip_id, message.clone(), created_at)
                })
                .collect(),
            status_update: transition.status_update,
            issue: Some(report.issue),
        };

        let committed = match self.commit(commit, correlation_id).await {
            Ok(committed) => committed,
            Err(error) => {
                let event_type = match error {
                    LifecycleError::Domain(_) => "trip.issue_rejected",
                    LifecycleError::Persistence(_) => "trip.issue_failed",
                };
                self.audit.emit(self.event(
                    &trip,
                    correlation_id,
                    reporter,
                    event_type,
                    error.audit_outcome(),
                ));
                return Err(error);
            }
        };
        self.audit.emit(self.event(
            &committed.trip,
            correlation_id,
            reporter,
            "trip.issue_reported",
            AuditOutcome::Success,
        ));
        info!(
            event_name = "trip.issue.reported",
            correlation_id,
            trip_id = %trip_id,
            issue_id = ?committed.issue.as_ref().map(|issue| issue.id),
            "issue reported"
        );
        self.publish_all(&committed.notifications).await;
        Ok(committed)
    }

    /// Resolves an issue once and tells the trip's driver. The trip status is left untouched.
    pub async fn resolve_issue(
        &self,
        issue_id: IssueId,
        actor: UserId,
        correlation_id: &str,
    ) -> Result<CommittedResolution, LifecycleError> {
        let issue = self
            .store
            .find_issue(issue_id)
            .await
            .map_err(LifecycleError::Persistence)?
            .ok_or(DomainError::IssueNotFound(issue_id))?;
        let trip =
            self.store.find_trip(issue.trip_id).await.map_err(LifecycleError::Persistence)?;

        let resolution = self
            .machine
            .resolve_issue(&issue, trip.as_ref(), Utc::now())
            .map_err(DomainError::from)?;
        let commit = IssueResolutionCommit {
            issue_id,
            resolved_at: resolution.resolved_at,
            notification: resolution.notify_driver.map(|driver| NewNotification::for_trip(
                driver,
                issue.trip_id,
                format!("Your reported issue has been resolved: {}", issue.description),
                resolution.resolved_at,
            )),
        };

        let resolved = self.store.commit_issue_resolution(commit).await.map_err(|error| {
            match error {
                RepositoryError::Conflict(_) => {
                    LifecycleError::Domain(DomainError::IssueAlreadyResolved { issue_id })
                }
                RepositoryError::NotFound(_) => {
                    LifecycleError::Domain(DomainError::IssueNotFound(issue_id))
                }
                other => LifecycleError::Persistence(other),
            }
        })?;

        if let Some(trip) = &trip {
            let event = self.event(
                trip,
                correlation_id,
                actor,
                "trip.issue_resolved",
                AuditOutcome::Success,
            );
            self.audit.emit(event.with_metadata("issue_id", issue_id.to_string()));
        }
        info!(
            event_name = "trip.issue.resolved",
            correlation_id,
            issue_id = %issue_id,
            driver_notified = resolved.notification.is_some(),
            "issue resolved"
        );
        if let Some(notification) = &resolved.notification {
            self.notifier.publish(notification, NoticeKind::TripUpdate).await;
        }
        Ok(resolved)
    }

    async fn load_trip(&self, trip_id: TripId) -> Result<Trip, LifecycleError> {
        self.store
            .find_trip(trip_id)
            .await
            .map_err(LifecycleError::Persistence)?
            .ok_or_else(|| DomainError::TripNotFound(trip_id).into())
    }

    async fn commit(
        &self,
        commit: TransitionCommit,
        correlation_id: &str,
    ) -> Result<CommittedTransition, LifecycleError> {
        let trip_id = commit.trip_id;
        self.store.commit_transition(commit).await.map_err(|error| match error {
            RepositoryError::Conflict(_) => {
                LifecycleError::Domain(DomainError::TerminalTrip { trip_id })
            }
            RepositoryError::NotFound(_) => LifecycleError::Domain(DomainError::TripNotFound(trip_id)),
            other => {
                warn!(
                    event_name = "trip.transition.persist_failed",
                    correlation_id,
                    trip_id = %trip_id,
                    error = %other,
                    "transition commit failed"
                );
                LifecycleError::Persistence(other)
            }
        })
    }

    async fn publish_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.notifier.publish(notification, NoticeKind::TripUpdate).await;
        }
    }

    fn event(
        &self,
        trip: &Trip,
        correlation_id: &str,
        actor: UserId,
        event_type: &str,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(
            Some(trip.id),
            correlation_id,
            event_type,
            AuditCategory::Lifecycle,
            actor.to_string(),
            outcome,
        )
        .with_metadata("status", trip.status.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use convoy_core::audit::{AuditOutcome, InMemoryAuditSink};
    use convoy_core::domain::issue::IssueStatus;
    use convoy_core::domain::trip::{NewTrip, TripId, TripStatus};
    use convoy_core::domain::user::{NewUser, Role, UserId};
    use convoy_core::errors::DomainError;
    use convoy_core::flows::TransitionRequest;
    use convoy_db::{FleetStore, InMemoryFleetStore};

    use super::{status_announcement, LifecycleError, TripLifecycle};
    use crate::notify::{NoticeKind, RecordingNotifier};

    struct Fixture {
        store: Arc<InMemoryFleetStore>,
        lifecycle: TripLifecycle,
        audit: InMemoryAuditSink,
        driver: UserId,
        manager: UserId,
        shipper: UserId,
        trip: TripId,
    }

    async fn user(store: &InMemoryFleetStore, external_id: &str, role: Role) -> UserId {
        store
            .upsert_user(NewUser {
                external_id: external_id.to_owned(),
                role: Some(role),
                ..NewUser::default()
            })
            .await
            .expect("user")
            .id
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryFleetStore::new());
        let driver = user(&store, "driver", Role::Driver).await;
        let manager = user(&store, "manager", Role::Manager).await;
        let shipper = user(&store, "shipper", Role::Shipper).await;
        let trip = store
            .create_trip(NewTrip {
                driver_id: Some(driver),
                manager_id: Some(manager),
                shipper_id: Some(shipper),
                pickup_address: "Dock 2".to_owned(),
                delivery_address: "Pier 4".to_owned(),
                cargo_description: "pallets".to_owned(),
                ..NewTrip::default()
            })
            .await
            .expect("trip")
            .id;

        let audit = InMemoryAuditSink::default();
        let lifecycle = TripLifecycle::new(store.clone(), Arc::new(audit.clone()));
        Fixture { store, lifecycle, audit, driver, manager, shipper, trip }
    }

    #[test]
    fn announcement_includes_notes_when_present() {
        assert_eq!(
            status_announcement(TripId(4), TripStatus::Delayed, Some("traffic")),
            "Trip #4 status updated to delayed: traffic"
        );
        assert_eq!(
            status_announcement(TripId(4), TripStatus::Loading, Some("  ")),
            "Trip #4 status updated to loading"
        );
    }

    #[tokio::test]
    async fn transition_commits_update_and_notifies_stakeholders() {
        let fx = fixture().await;

        let committed = fx
            .lifecycle
            .transition(
                fx.trip,
                TransitionRequest::new(TripStatus::AtPickup, fx.driver).with_notes("arrived"),
                None,
                "corr-1",
            )
            .await
            .expect("transition");

        assert_eq!(committed.trip.status, TripStatus::AtPickup);
        assert_eq!(committed.status_update.notes.as_deref(), Some("arrived"));
        let recipients =
            committed.notifications.iter().map(|n| n.recipient_id).collect::<Vec<_>>();
        assert_eq!(recipients, vec![fx.manager, fx.shipper]);
        assert_eq!(
            committed.notifications[0].message,
            format!("Trip #{} status updated to at_pickup: arrived", fx.trip)
        );

        let events = fx.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "trip.transition_applied");
        assert_eq!(events[0].correlation_id, "corr-1");
    }

    #[tokio::test]
    async fn completed_trip_rejects_without_writes() {
        let fx = fixture().await;
        fx.lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::Completed, fx.driver), None, "c")
            .await
            .expect("complete");
        let history_before = fx.store.list_status_updates(fx.trip).await.expect("history").len();

        let error = fx
            .lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::InTransit, fx.driver), None, "c")
            .await
            .expect_err("terminal trip");

        assert!(matches!(
            error,
            LifecycleError::Domain(DomainError::TerminalTrip { trip_id }) if trip_id == fx.trip
        ));
        let trip = fx.store.find_trip(fx.trip).await.expect("find").expect("trip");
        assert_eq!(trip.status, TripStatus::Completed);
        assert_eq!(
            fx.store.list_status_updates(fx.trip).await.expect("history").len(),
            history_before
        );
    }

    #[tokio::test]
    async fn caller_announcement_replaces_default_text() {
        let fx = fixture().await;

        let committed = fx
            .lifecycle
            .transition(
                fx.trip,
                TransitionRequest::new(TripStatus::InTransit, fx.driver),
                Some("Driver has departed".to_owned()),
                "c",
            )
            .await
            .expect("transition");

        assert!(committed.notifications.iter().all(|n| n.message == "Driver has departed"));
    }

    #[tokio::test]
    async fn report_then_resolve_issue_keeps_trip_in_issue_reported() {
        let fx = fixture().await;

        let reported = fx
            .lifecycle
            .report_issue(fx.trip, fx.driver, "flat tire", "c")
            .await
            .expect("report");
        let issue = reported.issue.expect("issue row");
        assert_eq!(issue.status, IssueStatus::Open);
        assert_eq!(reported.trip.status, TripStatus::IssueReported);
        assert_eq!(reported.status_update.notes.as_deref(), Some("Issue reported: flat tire"));

        let resolved =
            fx.lifecycle.resolve_issue(issue.id, fx.manager, "c").await.expect("resolve");
        assert_eq!(resolved.issue.status, IssueStatus::Resolved);
        assert!(resolved.issue.resolved_at.is_some());
        let notice = resolved.notification.expect("driver notice");
        assert_eq!(notice.recipient_id, fx.driver);
        assert_eq!(notice.message, "Your reported issue has been resolved: flat tire");

        let trip = fx.store.find_trip(fx.trip).await.expect("find").expect("trip");
        assert_eq!(trip.status, TripStatus::IssueReported);

        let again = fx.lifecycle.resolve_issue(issue.id, fx.manager, "c").await;
        assert!(matches!(
            again,
            Err(LifecycleError::Domain(DomainError::IssueAlreadyResolved { .. }))
        ));
    }

    #[tokio::test]
    async fn store_failure_is_persistence_not_domain() {
        let fx = fixture().await;
        fx.store.reject_writes(true);

        let error = fx
            .lifecycle
            .report_issue(fx.trip, fx.driver, "flat tire", "c")
            .await
            .expect_err("writes rejected");

        assert!(matches!(error, LifecycleError::Persistence(_)));
        fx.store.reject_writes(false);
        assert!(fx.store.list_issues(fx.trip).await.expect("issues").is_empty());
    }

    #[tokio::test]
    async fn failed_commit_audits_failure_instead_of_success() {
        let fx = fixture().await;
        fx.store.reject_writes(true);

        let error = fx
            .lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::Loading, fx.driver), None, "c-9")
            .await
            .expect_err("writes rejected");
        assert!(matches!(error, LifecycleError::Persistence(_)));

        let events = fx.audit.events();
        assert!(events.iter().all(|event| event.event_type != "trip.transition_applied"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "trip.transition_failed");
        assert_eq!(events[0].outcome, AuditOutcome::Failed);
        assert_eq!(events[0].correlation_id, "c-9");
        assert_eq!(events[0].metadata.get("requested").map(String::as_str), Some("loading"));
    }

    #[tokio::test]
    async fn terminal_trip_audits_rejection() {
        let fx = fixture().await;
        fx.lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::Completed, fx.driver), None, "c")
            .await
            .expect("complete");

        fx.lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::Loading, fx.driver), None, "c")
            .await
            .expect_err("terminal trip");

        let outcomes = fx
            .audit
            .events()
            .into_iter()
            .map(|event| (event.event_type, event.outcome))
            .collect::<Vec<_>>();
        assert_eq!(
            outcomes,
            vec![
                ("trip.transition_applied".to_owned(), AuditOutcome::Success),
                ("trip.transition_rejected".to_owned(), AuditOutcome::Rejected),
            ]
        );
    }

    #[tokio::test]
    async fn committed_notifications_reach_the_notifier() {
        let fx = fixture().await;
        let notifier = RecordingNotifier::default();
        let lifecycle = fx.lifecycle.clone().with_notifier(Arc::new(notifier.clone()));

        let committed = lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::Loading, fx.driver), None, "c")
            .await
            .expect("transition");

        let published = notifier.published();
        assert_eq!(published.len(), committed.notifications.len());
        assert!(published.iter().all(|(_, kind)| *kind == NoticeKind::TripUpdate));
        assert_eq!(
            published.iter().map(|(n, _)| n.id).collect::<Vec<_>>(),
            committed.notifications.iter().map(|n| n.id).collect::<Vec<_>>()
        );

        fx.store.reject_writes(true);
        lifecycle
            .transition(fx.trip, TransitionRequest::new(TripStatus::InTransit, fx.driver), None, "c")
            .await
            .expect_err("writes rejected");
        assert_eq!(notifier.published().len(), committed.notifications.len());
    }

    #[tokio::test]
    async fn unknown_trip_and_issue_are_domain_errors() {
        let fx = fixture().await;

        let missing_trip = fx
            .lifecycle
            .transition(TripId(999), TransitionRequest::new(TripStatus::Loading, fx.driver), None, "c")
            .await;
        assert!(matches!(missing_trip, Err(LifecycleError::Domain(DomainError::TripNotFound(_)))));

        let missing_issue = fx
            .lifecycle
            .resolve_issue(convoy_core::domain::issue::IssueId(42), fx.manager, "c")
            .await;
        assert!(matches!(
            missing_issue,
            Err(LifecycleError::Domain(DomainError::IssueNotFound(_)))
        ));
    }
}
