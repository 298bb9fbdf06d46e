//! Persistent store for nodes, status history, derived series,
//! notifications and API keys.
//!
//! Single backend: SQLite via sqlx with WAL journaling, so readers stay
//! concurrent with the ingest writer. Every multi-row write happens inside
//! one transaction; the node row and its history point in particular are
//! never visible apart.

pub mod error;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use schema::{
    ApiKeyRow, NodeHistoryRow, NodeRow, ServiceHistoryRow, ServiceStatusRow, SweepResultRow,
    TimeseriesMetricRow,
};
pub use sqlite::SqliteStore;
