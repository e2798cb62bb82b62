pub mod flowchart_repo;
pub mod node_repo;
pub mod rag_repo;
pub mod run_repo;

pub use flowchart_repo::FlowchartRepository;
pub use node_repo::{EdgeRepository, NodeRepository};
pub use rag_repo::{RagAuditRepository, RagSourceRepository};
pub use run_repo::{RunNodeRepository, RunRepository};
