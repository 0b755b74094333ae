//! Spherical geometry on the celestial sphere. Angles are in degrees.

/// Great-circle distance between two sky positions, in degrees.
///
/// Uses the Vincenty formulation, which stays accurate for both tiny and
/// near-antipodal separations.
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let dra = ra2 - ra1;
    let (sin_d1, cos_d1) = dec1.sin_cos();
    let (sin_d2, cos_d2) = dec2.sin_cos();
    let (sin_dra, cos_dra) = dra.sin_cos();

    let num1 = cos_d2 * sin_dra;
    let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
    let denom = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

    num1.hypot(num2).atan2(denom).to_degrees()
}

/// Wrap a right ascension into [0, 360).
pub fn normalize_ra(ra: f64) -> f64 {
    let wrapped = ra.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Declination band `[dec - r, dec + r]` clamped to the poles.
///
/// Any point within `radius` of `dec` has a declination inside this band, so it
/// is a safe pre-filter for radius queries.
pub fn declination_band(dec: f64, radius: f64) -> (f64, f64) {
    ((dec - radius).max(-90.0), (dec + radius).min(90.0))
}
