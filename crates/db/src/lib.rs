pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod session;

pub use connection::{connect_with_settings, ping, DbPool};
pub use fixtures::{DemoDataset, SeedResult, VerificationResult};
pub use repositories::{RepositoryError, RetailRepositories};
pub use session::{
    FileSessionStore, InMemorySessionStore, SessionRecord, SessionStore, SessionStoreError,
    SessionTurn, StepSummary,
};
