//! Persistence layer: libSQL-backed storage for onboarding records and pets.

pub mod gateway;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use gateway::ProfileGateway;
pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
