//! Sqlite persistence for the flowchart data model plus the append-only
//! run event log (C1).

pub mod connection;
pub mod error;
pub mod events;
pub mod repositories;

pub use connection::{DatabaseConnection, DatabasePool};
pub use error::{Result, StoreError};
pub use events::{EventLog, EventPriority, RunEvent, RunEventRecord};
pub use repositories::{
    EdgeRepository, FlowchartRepository, NodeRepository, RagAuditRepository, RagSourceRepository, RunNodeRepository,
    RunRepository,
};
