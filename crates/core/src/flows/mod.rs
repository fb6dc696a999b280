pub mod engine;
pub mod states;

pub use engine::{TransitionError, TripStateMachine};
pub use states::{IssueReport, IssueResolution, TransitionOutcome, TransitionRequest};
