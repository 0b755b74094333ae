//! Gnomonic (TAN) projection with a linear CD transform.

use crate::error::{Error, Result};
use crate::sphere::normalize_ra;

/// Determinants below this are treated as singular.
const MIN_DETERMINANT: f64 = 1e-30;

/// Linear part of a TAN WCS.
///
/// Pixel coordinates are zero-based. Intermediate world coordinates are in
/// degrees with the first axis increasing toward east (increasing RA).
#[derive(Debug, Clone, PartialEq)]
pub struct TanProjection {
    /// Reference point on sky (RA, Dec) in degrees.
    pub crval: [f64; 2],
    /// Reference pixel.
    pub crpix: [f64; 2],
    /// Degrees per pixel; `cd[0] = [cd1_1, cd1_2]`, `cd[1] = [cd2_1, cd2_2]`.
    pub cd: [[f64; 2]; 2],
    cd_inv: [[f64; 2]; 2],
}

impl TanProjection {
    /// Build a projection, rejecting singular CD matrices.
    pub fn new(crval: [f64; 2], crpix: [f64; 2], cd: [[f64; 2]; 2]) -> Result<Self> {
        let values = [
            crval[0], crval[1], crpix[0], crpix[1], cd[0][0], cd[0][1], cd[1][0], cd[1][1],
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidValue {
                field: "wcs",
                value: "non-finite parameter".to_string(),
            });
        }
        if !(-90.0..=90.0).contains(&crval[1]) {
            return Err(Error::InvalidValue {
                field: "dec_center_degrees",
                value: crval[1].to_string(),
            });
        }

        let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
        if det.abs() < MIN_DETERMINANT {
            return Err(Error::DegenerateTransform(det));
        }
        let inv_det = 1.0 / det;
        let cd_inv = [
            [cd[1][1] * inv_det, -cd[0][1] * inv_det],
            [-cd[1][0] * inv_det, cd[0][0] * inv_det],
        ];

        Ok(Self {
            crval,
            crpix,
            cd,
            cd_inv,
        })
    }

    /// Pixel offset from the reference pixel to intermediate coordinates.
    pub fn offset_to_intermediate(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.cd[0][0] * u + self.cd[0][1] * v,
            self.cd[1][0] * u + self.cd[1][1] * v,
        )
    }

    /// Intermediate coordinates back to a pixel offset (closed form).
    pub fn intermediate_to_offset(&self, xi: f64, eta: f64) -> (f64, f64) {
        (
            self.cd_inv[0][0] * xi + self.cd_inv[0][1] * eta,
            self.cd_inv[1][0] * xi + self.cd_inv[1][1] * eta,
        )
    }

    /// Deproject intermediate coordinates (degrees) to (RA, Dec) in degrees.
    pub fn intermediate_to_sky(&self, xi: f64, eta: f64) -> (f64, f64) {
        let (xi, eta) = (xi.to_radians(), eta.to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());

        let rho = xi.hypot(eta);
        if rho == 0.0 {
            return (normalize_ra(self.crval[0]), self.crval[1]);
        }

        let c = rho.atan();
        let (sin_c, cos_c) = c.sin_cos();
        let (sin_d0, cos_d0) = dec0.sin_cos();

        let dec = (cos_c * sin_d0 + eta * sin_c * cos_d0 / rho).clamp(-1.0, 1.0).asin();
        let ra = ra0 + (xi * sin_c).atan2(rho * cos_d0 * cos_c - eta * sin_d0 * sin_c);

        (normalize_ra(ra.to_degrees()), dec.to_degrees())
    }

    /// Project (RA, Dec) in degrees onto the tangent plane.
    ///
    /// Fails for points 90 degrees or more from the reference point.
    pub fn sky_to_intermediate(&self, ra: f64, dec: f64) -> Result<(f64, f64)> {
        let (ra_r, dec_r) = (ra.to_radians(), dec.to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let (sin_d, cos_d) = dec_r.sin_cos();
        let (sin_d0, cos_d0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = (ra_r - ra0).sin_cos();

        let cos_c = sin_d0 * sin_d + cos_d0 * cos_d * cos_dra;
        if cos_c <= 1e-9 || !cos_c.is_finite() {
            return Err(Error::NotProjectable { ra, dec });
        }

        let xi = cos_d * sin_dra / cos_c;
        let eta = (cos_d0 * sin_d - sin_d0 * cos_d * cos_dra) / cos_c;
        Ok((xi.to_degrees(), eta.to_degrees()))
    }

    /// Approximate pixel scale in degrees per pixel.
    pub fn pixel_scale(&self) -> f64 {
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        det.abs().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection() -> TanProjection {
        let scale = 2.0 / 3600.0;
        TanProjection::new([10.0, 41.0], [500.0, 500.0], [[-scale, 0.0], [0.0, -scale]]).unwrap()
    }

    #[test]
    fn reference_point_round_trips() {
        let p = projection();
        let (xi, eta) = p.sky_to_intermediate(10.0, 41.0).unwrap();
        assert!(xi.abs() < 1e-12 && eta.abs() < 1e-12);
        let (ra, dec) = p.intermediate_to_sky(0.0, 0.0);
        assert!((ra - 10.0).abs() < 1e-12 && (dec - 41.0).abs() < 1e-12);
    }

    #[test]
    fn intermediate_round_trip() {
        let p = projection();
        for (xi, eta) in [(0.3, -0.2), (-0.5, 0.5), (1.0, 0.0), (0.0, -2.0)] {
            let (ra, dec) = p.intermediate_to_sky(xi, eta);
            let (xi2, eta2) = p.sky_to_intermediate(ra, dec).unwrap();
            assert!((xi - xi2).abs() < 1e-9, "{xi} vs {xi2}");
            assert!((eta - eta2).abs() < 1e-9, "{eta} vs {eta2}");
        }
    }

    #[test]
    fn far_hemisphere_is_not_projectable() {
        let p = projection();
        assert!(matches!(
            p.sky_to_intermediate(190.0, -41.0),
            Err(Error::NotProjectable { .. })
        ));
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let err = TanProjection::new([0.0, 0.0], [0.0, 0.0], [[1.0, 2.0], [2.0, 4.0]]).unwrap_err();
        assert!(matches!(err, Error::DegenerateTransform(_)));
    }

    #[test]
    fn inverse_matrix_undoes_forward() {
        let p = TanProjection::new([0.0, 0.0], [0.0, 0.0], [[1e-4, 3e-5], [-2e-5, 1.2e-4]]).unwrap();
        let (xi, eta) = p.offset_to_intermediate(123.0, -45.0);
        let (u, v) = p.intermediate_to_offset(xi, eta);
        assert!((u - 123.0).abs() < 1e-9 && (v + 45.0).abs() < 1e-9);
    }
}
