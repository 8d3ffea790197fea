//! opsflow State Store
//!
//! Durable record of cloud resources, their dependency edges, operation
//! history with per-operation logs, advisory resource locks and an audit
//! trail, kept in a local SQLite database.
//!
//! ```text
//! resources ──< dependencies >── resources
//! operations ──< operation_logs
//! resource_locks   audit_events   schema_meta
//! ```

pub mod error;
pub mod model;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use model::{
    AuditEvent, CacheStats, DependencyEdge, DependencyType, LogEntry, LogLevel, NewOperation,
    OperationMode, OperationRecord, OperationStatus, OperationSummary, ResourceFilter,
    ResourceRecord, ResourceScope, ResourceStatus, canonical_id, saturating_add, saturating_sub,
    span_from_secs,
};
pub use store::StateStore;
