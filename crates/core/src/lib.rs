//! Core domain types and shared logic for the skycat plate-solve engine.
//!
//! This crate defines the data model used across all other crates:
//! - Astrometry status machine, providers and match provenance
//! - Reference catalog identifiers and designation normalization
//! - Spherical geometry helpers
//! - FITS header cards and the TAN/TAN-SIP world coordinate system
//! - Configuration

pub mod astrometry;
pub mod catalog;
pub mod config;
pub mod error;
pub mod header;
pub mod sphere;
pub mod wcs;

pub use astrometry::{
    AstrometryStatus, AstrometrySummary, Calibration, HintValue, MatchSource, ProviderKind,
    SolveHints,
};
pub use catalog::{CatalogKind, normalize_designation};
pub use error::{Error, Result};
pub use header::{HeaderCards, HeaderValue};
pub use sphere::angular_separation;
pub use wcs::Wcs;
