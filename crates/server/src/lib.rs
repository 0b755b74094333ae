//! Plate-solve orchestration and catalog matching for skycat.
//!
//! This crate provides:
//! - The admission gate bounding concurrent solver submissions
//! - The plate-solve workflow driven by durable submit and monitor tasks
//! - The worker pool, task watchdog and stale submission reaper
//! - Catalog matching against the solved footprint
//! - Bulk operations, catalog import and the HTTP operator surface

pub mod admission;
pub mod bulk;
pub mod catalog_import;
pub mod error;
pub mod handlers;
pub mod matcher;
pub mod metrics;
pub mod reaper;
pub mod routes;
pub mod state;
pub mod worker;
pub mod workflow;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, TaskRegistry};
pub use worker::WorkerPool;
pub use workflow::{SolveRequestOutcome, Workflow, WorkflowError};
