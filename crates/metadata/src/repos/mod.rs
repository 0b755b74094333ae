//! Repository traits for metadata operations.

pub mod catalogs;
pub mod images;
pub mod leases;
pub mod matches;
pub mod tasks;

pub use catalogs::CatalogRepo;
pub use images::{ImageRepo, SubmissionReservation};
pub use leases::LeaseRepo;
pub use matches::MatchRepo;
pub use tasks::{TaskKind, TaskRepo, TaskState};
