pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod eta;
pub mod flows;

pub use domain::issue::{Issue, IssueId, IssueStatus, NewIssue};
pub use domain::location::{Location, LocationId, NewLocation};
pub use domain::notification::{NewNotification, Notification, NotificationId};
pub use domain::status_update::{NewStatusUpdate, StatusUpdate, StatusUpdateId};
pub use domain::trip::{
    Coordinates, NewTrip, Trip, TripAssignment, TripId, TripQuery, TripStatus,
};
pub use domain::user::{NewUser, Role, User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{TransitionError, TransitionOutcome, TransitionRequest, TripStateMachine};
