use thiserror::Error;

use crate::domain::issue::{Issue, IssueId, NewIssue};
use crate::domain::status_update::NewStatusUpdate;
use crate::domain::trip::{Trip, TripId, TripStatus};
use crate::domain::user::UserId;
use crate::flows::states::{IssueReport, IssueResolution, TransitionOutcome, TransitionRequest};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("trip #{trip_id} is already completed")]
    TerminalTrip { trip_id: TripId },
    #[error("issue #{issue_id} has already been resolved")]
    IssueAlreadyResolved { issue_id: IssueId },
}

/// Trip lifecycle rules. Pure: it decides and describes, callers persist and audit.
///
/// Any status may follow any non-terminal status; `completed` accepts nothing further. Reporting
/// an issue is the compound form of a transition to `issue_reported`, and resolving an issue
/// leaves the trip status where it is.
#[derive(Clone, Copy, Debug, Default)]
pub struct TripStateMachine;

impl TripStateMachine {
    pub fn transition(
        &self,
        trip: &Trip,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, TransitionError> {
        if trip.status.is_terminal() {
            return Err(TransitionError::TerminalTrip { trip_id: trip.id });
        }

        Ok(TransitionOutcome {
            trip_id: trip.id,
            from: trip.status,
            to: request.new_status,
            notify: trip.stakeholders(Some(request.actor)),
            status_update: NewStatusUpdate {
                trip_id: trip.id,
                actor_id: request.actor,
                status: request.new_status,
                notes: request.notes,
                recorded_at: request.requested_at,
            },
        })
    }

    pub fn report_issue(
        &self,
        trip: &Trip,
        reporter: UserId,
        description: &str,
        reported_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<IssueReport, TransitionError> {
        let request = TransitionRequest::new(TripStatus::IssueReported, reporter)
            .with_notes(format!("Issue reported: {description}"))
            .at(reported_at);
        let transition = self.transition(trip, request)?;

        Ok(IssueReport {
            issue: NewIssue {
                trip_id: trip.id,
                reporter_id: reporter,
                description: description.to_owned(),
                reported_at,
            },
            transition,
        })
    }

    /// `trip` is the issue's trip when it still resolves; its driver is told about the fix.
    pub fn resolve_issue(
        &self,
        issue: &Issue,
        trip: Option<&Trip>,
        resolved_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<IssueResolution, TransitionError> {
        if issue.is_resolved() {
            return Err(TransitionError::IssueAlreadyResolved { issue_id: issue.id });
        }

        Ok(IssueResolution {
            issue_id: issue.id,
            resolved_at,
            notify_driver: trip.and_then(|trip| trip.driver_id),
        })
    }
}
