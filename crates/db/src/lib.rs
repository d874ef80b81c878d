pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{practice_today, DemoPractice, SeedResult};
pub use repositories::{
    InMemorySessionRepository, RepositoryError, SessionRepository, SqlAuditSink,
    SqlAvailabilityStore, SqlSessionRepository,
};
