//! Plate-solve lifecycle types.
//!
//! These are the values persisted alongside an image record: the astrometry
//! status machine, the provider that handled a run, match provenance, and the
//! summary parameters a solved image carries.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Astrometry status of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AstrometryStatus {
    /// Never submitted.
    None,
    /// Reserved by admission and uploaded (or being uploaded).
    Submitted,
    /// The solver created a job for the submission.
    Processing,
    /// Calibration written.
    Solved,
    /// Solver failure, poll timeout, upload error or reaped.
    Failed,
}

impl AstrometryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Submitted => "SUBMITTED",
            Self::Processing => "PROCESSING",
            Self::Solved => "SOLVED",
            Self::Failed => "FAILED",
        }
    }

    /// Check if the image is currently with the external solver.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::Processing)
    }

    /// Check if a new submission may start from this status.
    ///
    /// SOLVED only restarts when the caller forces a re-solve.
    pub fn can_submit(&self, force: bool) -> bool {
        match self {
            Self::None | Self::Failed => true,
            Self::Solved => force,
            Self::Submitted | Self::Processing => false,
        }
    }
}

impl fmt::Display for AstrometryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AstrometryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "SUBMITTED" => Ok(Self::Submitted),
            "PROCESSING" => Ok(Self::Processing),
            "SOLVED" => Ok(Self::Solved),
            "FAILED" => Ok(Self::Failed),
            other => Err(Error::InvalidValue {
                field: "astrometry_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Plate-solving backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The shared public nova.astrometry.net service.
    #[default]
    Nova,
    /// A locally hosted service speaking the same protocol.
    Local,
}

impl ProviderKind {
    /// Value stored in the image record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nova => "NOVA",
            Self::Local => "LOCAL",
        }
    }

    /// Whether positional and scale hints are forwarded to the solver.
    ///
    /// The public service always solves blind.
    pub fn accepts_hints(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOVA" => Ok(Self::Nova),
            "LOCAL" => Ok(Self::Local),
            _ => Err(Error::InvalidValue {
                field: "provider",
                value: s.to_string(),
            }),
        }
    }
}

/// Provenance of an image/catalog association.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchSource {
    /// Computed by the catalog matcher; replaced on every re-match.
    Automatic,
    /// Added by a user.
    Manual,
    /// Derived from the image's own header (e.g. an OBJECT card).
    Header,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::Manual => "MANUAL",
            Self::Header => "HEADER",
        }
    }
}

impl FromStr for MatchSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTOMATIC" => Ok(Self::Automatic),
            "MANUAL" => Ok(Self::Manual),
            "HEADER" => Ok(Self::Header),
            other => Err(Error::InvalidValue {
                field: "match_source",
                value: other.to_string(),
            }),
        }
    }
}

/// Source label written when the solver produced the calibration.
pub const PLATE_SOLVE_SOURCE_SOLVER: &str = "SOLVER";

/// Summary parameters needed to build a WCS for an image.
///
/// All fields are optional until the image is solved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AstrometrySummary {
    pub ra_center_degrees: Option<f64>,
    pub dec_center_degrees: Option<f64>,
    pub field_radius_degrees: Option<f64>,
    pub pixel_scale_arcsec: Option<f64>,
    pub rotation_degrees: Option<f64>,
    pub width_pixels: Option<u32>,
    pub height_pixels: Option<u32>,
    /// +1 or -1.
    pub parity: Option<i32>,
}

impl AstrometrySummary {
    /// Center coordinates if both are known.
    pub fn center(&self) -> Option<(f64, f64)> {
        match (self.ra_center_degrees, self.dec_center_degrees) {
            (Some(ra), Some(dec)) => Some((ra, dec)),
            _ => None,
        }
    }
}

/// Calibration result reported by the solver for a successful job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub ra: f64,
    pub dec: f64,
    pub radius: f64,
    pub pixscale: f64,
    pub orientation: f64,
    pub parity: f64,
}

impl Calibration {
    /// Parity as the +1/-1 integer stored with the image.
    pub fn parity_sign(&self) -> i32 {
        if self.parity < 0.0 { -1 } else { 1 }
    }

    /// Orientation normalized into [0, 360).
    pub fn rotation_degrees(&self) -> f64 {
        self.orientation.rem_euclid(360.0)
    }
}

/// Solver hint value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    Number(f64),
    Text(String),
}

/// Positional and scale hints forwarded to the solver with an upload.
///
/// Keys follow the astrometry.net upload arguments (`center_ra`, `center_dec`,
/// `radius`, `scale_units`, `scale_lower`, `scale_upper`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolveHints(BTreeMap<String, HintValue>);

impl SolveHints {
    /// Hints for a blind solve.
    pub fn blind() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn set_number(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), HintValue::Number(value));
    }

    pub fn set_text(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), HintValue::Text(value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&HintValue> {
        self.0.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(HintValue::Number(v)) => Some(*v),
            _ => None,
        }
    }

    /// Overlay `other` on top of these hints.
    pub fn merge(&mut self, other: &SolveHints) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HintValue)> {
        self.0.iter()
    }
}
