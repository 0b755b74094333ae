//! World coordinate system model for solved images.
//!
//! A [`Wcs`] maps zero-based pixel coordinates (origin top-left, y down) to
//! equatorial coordinates in degrees and back. It is built either from the
//! summary parameters of a solve or from a full FITS TAN/TAN-SIP header.

mod sip;
mod tan;

pub use sip::SipDistortion;
pub use tan::TanProjection;

use crate::astrometry::AstrometrySummary;
use crate::error::{Error, Result};
use crate::header::HeaderCards;

/// Pixel <-> sky mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    tan: TanProjection,
    sip: Option<SipDistortion>,
}

impl Wcs {
    /// Build the linear model from summary parameters.
    ///
    /// The reference pixel is the image center. Increasing x moves toward
    /// decreasing RA for parity +1 (increasing RA for -1); increasing y always
    /// moves toward decreasing declination. Missing rotation is taken as 0 and
    /// missing parity as +1.
    pub fn from_summary(summary: &AstrometrySummary) -> Result<Self> {
        let ra = summary
            .ra_center_degrees
            .ok_or(Error::MissingParameter("ra_center_degrees"))?;
        let dec = summary
            .dec_center_degrees
            .ok_or(Error::MissingParameter("dec_center_degrees"))?;
        let pixel_scale = summary
            .pixel_scale_arcsec
            .ok_or(Error::MissingParameter("pixel_scale_arcsec"))?;
        let width = summary
            .width_pixels
            .ok_or(Error::MissingParameter("width_pixels"))?;
        let height = summary
            .height_pixels
            .ok_or(Error::MissingParameter("height_pixels"))?;
        if width == 0 || height == 0 {
            return Err(Error::InvalidValue {
                field: "image dimensions",
                value: format!("{width}x{height}"),
            });
        }

        let parity = match summary.parity.unwrap_or(1) {
            p if p < 0 => -1.0,
            _ => 1.0,
        };
        let scale = pixel_scale / 3600.0;
        let (sin_a, cos_a) = summary.rotation_degrees.unwrap_or(0.0).to_radians().sin_cos();

        let s_x = -scale * parity;
        let s_y = -scale;
        let cd = [[s_x * cos_a, -s_y * sin_a], [s_x * sin_a, s_y * cos_a]];

        let tan = TanProjection::new(
            [ra, dec],
            [width as f64 / 2.0, height as f64 / 2.0],
            cd,
        )?;
        Ok(Self { tan, sip: None })
    }

    /// Build a model from FITS header cards (TAN, optionally with SIP terms).
    pub fn from_header(cards: &HeaderCards) -> Result<Self> {
        for (axis, expected) in [("CTYPE1", "RA---TAN"), ("CTYPE2", "DEC--TAN")] {
            if let Some(ctype) = cards.get_str(axis)
                && !ctype.starts_with(expected)
            {
                return Err(Error::UnsupportedProjection(ctype.to_string()));
            }
        }

        let number = |key: &'static str| -> Result<f64> {
            match cards.get(key) {
                None => Err(Error::MissingParameter(key)),
                Some(value) => value
                    .as_f64()
                    .ok_or_else(|| Error::InvalidHeader(format!("{key} is not numeric"))),
            }
        };
        let optional = |key: &'static str, default: f64| -> Result<f64> {
            if cards.contains(key) { number(key) } else { Ok(default) }
        };

        let crval = [number("CRVAL1")?, number("CRVAL2")?];
        // FITS pixels are one-based.
        let crpix = [number("CRPIX1")? - 1.0, number("CRPIX2")? - 1.0];

        let cd = if cards.contains("CD1_1") || cards.contains("CD2_2") {
            [
                [optional("CD1_1", 0.0)?, optional("CD1_2", 0.0)?],
                [optional("CD2_1", 0.0)?, optional("CD2_2", 0.0)?],
            ]
        } else {
            let cdelt1 = number("CDELT1")?;
            let cdelt2 = number("CDELT2")?;
            if cards.contains("PC1_1") || cards.contains("PC2_2") {
                [
                    [
                        cdelt1 * optional("PC1_1", 1.0)?,
                        cdelt1 * optional("PC1_2", 0.0)?,
                    ],
                    [
                        cdelt2 * optional("PC2_1", 0.0)?,
                        cdelt2 * optional("PC2_2", 1.0)?,
                    ],
                ]
            } else {
                let (sin_r, cos_r) = optional("CROTA2", 0.0)?.to_radians().sin_cos();
                [
                    [cdelt1 * cos_r, -cdelt2 * sin_r],
                    [cdelt1 * sin_r, cdelt2 * cos_r],
                ]
            }
        };

        let tan = TanProjection::new(crval, crpix, cd)?;
        let sip = SipDistortion::from_header(cards)?;
        Ok(Self { tan, sip })
    }

    /// Build the best available model for an image.
    ///
    /// Precedence: the solver's distortion solution, then a WCS in the image's
    /// own header, then the summary parameters. A distortion solution that is
    /// present but unusable is an error rather than a silent fallback.
    pub fn for_image(
        summary: &AstrometrySummary,
        distortion: Option<&HeaderCards>,
        raw_header: Option<&HeaderCards>,
    ) -> Result<Self> {
        if let Some(cards) = distortion {
            return Self::from_header(cards);
        }
        if let Some(cards) = raw_header
            && cards.has_celestial_wcs()
            && let Ok(wcs) = Self::from_header(cards)
        {
            return Ok(wcs);
        }
        Self::from_summary(summary)
    }

    /// Project a sky position (degrees) to pixel coordinates.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> Result<(f64, f64)> {
        let (xi, eta) = self.tan.sky_to_intermediate(ra, dec)?;
        let (mut u, mut v) = self.tan.intermediate_to_offset(xi, eta);
        if let Some(sip) = &self.sip {
            (u, v) = sip.undistort(u, v);
        }
        let (x, y) = (u + self.tan.crpix[0], v + self.tan.crpix[1]);
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::NotProjectable { ra, dec });
        }
        Ok((x, y))
    }

    /// Deproject pixel coordinates to (RA, Dec) in degrees.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let (mut u, mut v) = (x - self.tan.crpix[0], y - self.tan.crpix[1]);
        if let Some(sip) = &self.sip {
            (u, v) = sip.distort(u, v);
        }
        let (xi, eta) = self.tan.offset_to_intermediate(u, v);
        self.tan.intermediate_to_sky(xi, eta)
    }

    /// Whether a sky position lands inside a `width` x `height` image grown by
    /// `margin` pixels on every side. Unprojectable positions are outside.
    pub fn contains(&self, ra: f64, dec: f64, width: f64, height: f64, margin: f64) -> Result<bool> {
        let (x, y) = self.sky_to_pixel(ra, dec)?;
        Ok((-margin..=width + margin).contains(&x) && (-margin..=height + margin).contains(&y))
    }

    /// Reference sky point (RA, Dec) in degrees.
    pub fn reference(&self) -> (f64, f64) {
        (self.tan.crval[0], self.tan.crval[1])
    }

    /// Approximate pixel scale in arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        self.tan.pixel_scale() * 3600.0
    }

    pub fn has_distortion(&self) -> bool {
        self.sip.is_some()
    }
}
