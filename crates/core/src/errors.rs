use thiserror::Error;

use crate::domain::issue::IssueId;
use crate::domain::trip::TripId;
use crate::domain::user::{Role, UserId};
use crate::flows::TransitionError;

/// Violations that are meaningful to the end user and are shown to them verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Trip #{0} not found.")]
    TripNotFound(TripId),
    #[error("Issue #{0} not found.")]
    IssueNotFound(IssueId),
    #[error("User #{0} not found.")]
    UserNotFound(UserId),
    #[error("You don't have access to Trip #{trip_id}.")]
    NotAuthorized { trip_id: TripId },
    #[error("Trip #{trip_id} is already completed and can no longer be updated.")]
    TerminalTrip { trip_id: TripId },
    #[error("Issue #{issue_id} is already resolved.")]
    IssueAlreadyResolved { issue_id: IssueId },
    #[error("You don't have any active trips to update.")]
    NoActiveTrip,
    #[error("User #{user_id} is not a {expected}.")]
    InvalidAssignment { user_id: UserId, expected: Role },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<TransitionError> for DomainError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::TerminalTrip { trip_id } => Self::TerminalTrip { trip_id },
            TransitionError::IssueAlreadyResolved { issue_id } => {
                Self::IssueAlreadyResolved { issue_id }
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Only persistence failures abandon a turn; everything else is recovered locally.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "The record is in a state that does not allow this change.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(
                error @ (DomainError::TripNotFound(_)
                | DomainError::IssueNotFound(_)
                | DomainError::UserNotFound(_)
                | DomainError::NoActiveTrip),
            ) => Self::NotFound { message: error.to_string(), correlation_id },
            ApplicationError::Domain(
                error @ (DomainError::TerminalTrip { .. }
                | DomainError::IssueAlreadyResolved { .. }),
            ) => Self::Conflict { message: error.to_string(), correlation_id },
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
