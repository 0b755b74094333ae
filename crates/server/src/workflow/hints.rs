//! Solver hints derived from an image's previous state.

use skycat_core::{AstrometryStatus, SolveHints};
use skycat_metadata::models::ImageRow;

/// Search radius used when the image has a center but no field radius.
pub const DEFAULT_HINT_RADIUS_DEGREES: f64 = 5.0;

/// Build hints from the image as it was before submission.
///
/// A previous failure means the stored position may be what misled the
/// solver, so the retry is blind.
pub fn solve_hints(previous: &ImageRow) -> SolveHints {
    let mut hints = SolveHints::blind();
    if previous.status().ok() == Some(AstrometryStatus::Failed) {
        tracing::info!(image_id = previous.image_id, "Previous attempt failed, solving blind");
        return hints;
    }

    if let (Some(ra), Some(dec)) = (previous.ra_center_degrees, previous.dec_center_degrees) {
        hints.set_number("center_ra", ra);
        hints.set_number("center_dec", dec);
        hints.set_number(
            "radius",
            previous
                .field_radius_degrees
                .unwrap_or(DEFAULT_HINT_RADIUS_DEGREES),
        );
    }

    if let Some(scale) = previous.pixel_scale_arcsec {
        hints.set_text("scale_units", "arcsecperpix");
        hints.set_number("scale_lower", scale * 0.9);
        hints.set_number("scale_upper", scale * 1.1);
    }
    hints
}
