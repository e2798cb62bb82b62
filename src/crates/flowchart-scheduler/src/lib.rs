//! The Flowchart Scheduler (C6): loads a persisted flowchart, runs the
//! C7 preflight checks, and drives node admission/dispatch/routing to
//! completion.
//!
//! Owns no application wiring of its own — it is generic over
//! [`dispatch::NodeDispatch`] so the concrete `node-engine` handler
//! backends (which need live task/memory/rag/plan collaborators) are
//! composed by the caller, not by this crate.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod outputs;
pub mod preflight;
pub mod run;

pub use config::RuntimeContext;
pub use dispatch::NodeDispatch;
pub use error::{Result, SchedulerError};
pub use outputs::{prefetch_outputs, PrefetchedOutputs};
pub use run::{RunHandle, Scheduler};
