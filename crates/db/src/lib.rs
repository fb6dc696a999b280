pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{DemoFleetDataset, SeedResult, VerificationResult};
pub use repositories::{
    active_trip_for_driver, CommittedResolution, CommittedTransition, FleetStore,
    InMemoryFleetStore, IssueResolutionCommit, RepositoryError, SqlFleetStore, TransitionCommit,
};
