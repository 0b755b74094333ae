//! SIP (Simple Imaging Polynomial) distortion terms.

use crate::error::{Error, Result};
use crate::header::HeaderCards;

/// Highest polynomial order accepted from a header.
const MAX_ORDER: u32 = 9;

/// Fixed-point refinement steps used when the header has no inverse terms.
const INVERSE_ITERATIONS: usize = 20;

/// One distortion polynomial: sum of `coef * u^p * v^q`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polynomial {
    terms: Vec<(i32, i32, f64)>,
}

impl Polynomial {
    /// Read `{prefix}_p_q` coefficients up to `{prefix}_ORDER`.
    fn from_header(cards: &HeaderCards, prefix: &str) -> Result<Option<Self>> {
        let Some(order) = cards.get_f64(&format!("{prefix}_ORDER")) else {
            return Ok(None);
        };
        if order < 0.0 || order > MAX_ORDER as f64 || order.fract() != 0.0 {
            return Err(Error::InvalidHeader(format!(
                "{prefix}_ORDER out of range: {order}"
            )));
        }
        let order = order as i32;

        let mut terms = Vec::new();
        for p in 0..=order {
            for q in 0..=(order - p) {
                let key = format!("{prefix}_{p}_{q}");
                if let Some(value) = cards.get(&key) {
                    let coef = value.as_f64().ok_or_else(|| {
                        Error::InvalidHeader(format!("{key} is not numeric"))
                    })?;
                    if coef != 0.0 {
                        terms.push((p, q, coef));
                    }
                }
            }
        }
        Ok(Some(Self { terms }))
    }

    pub fn eval(&self, u: f64, v: f64) -> f64 {
        self.terms
            .iter()
            .map(|&(p, q, c)| c * u.powi(p) * v.powi(q))
            .sum()
    }
}

/// Forward distortion (`A`, `B`) and optional solver-provided inverse (`AP`, `BP`).
#[derive(Debug, Clone, PartialEq)]
pub struct SipDistortion {
    a: Polynomial,
    b: Polynomial,
    inverse: Option<(Polynomial, Polynomial)>,
}

impl SipDistortion {
    /// Parse SIP terms. Returns `None` when the header carries no `A_ORDER`.
    pub fn from_header(cards: &HeaderCards) -> Result<Option<Self>> {
        let a = Polynomial::from_header(cards, "A")?;
        let b = Polynomial::from_header(cards, "B")?;
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => return Ok(None),
            _ => {
                return Err(Error::InvalidHeader(
                    "SIP header needs both A_ORDER and B_ORDER".to_string(),
                ));
            }
        };

        let ap = Polynomial::from_header(cards, "AP")?;
        let bp = Polynomial::from_header(cards, "BP")?;
        let inverse = match (ap, bp) {
            (Some(ap), Some(bp)) => Some((ap, bp)),
            _ => None,
        };

        Ok(Some(Self { a, b, inverse }))
    }

    /// Distort a pixel offset from the reference pixel.
    pub fn distort(&self, u: f64, v: f64) -> (f64, f64) {
        (u + self.a.eval(u, v), v + self.b.eval(u, v))
    }

    /// Recover the pixel offset from a distorted offset.
    pub fn undistort(&self, up: f64, vp: f64) -> (f64, f64) {
        if let Some((ap, bp)) = &self.inverse {
            return (up + ap.eval(up, vp), vp + bp.eval(up, vp));
        }

        let (mut u, mut v) = (up, vp);
        for _ in 0..INVERSE_ITERATIONS {
            u = up - self.a.eval(u, v);
            v = vp - self.b.eval(u, v);
        }
        (u, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards(pairs: &[(&str, f64)]) -> HeaderCards {
        let mut cards = HeaderCards::new();
        for (k, v) in pairs {
            cards.set_float(k, *v);
        }
        cards
    }

    #[test]
    fn missing_terms_mean_no_distortion() {
        assert!(SipDistortion::from_header(&HeaderCards::new()).unwrap().is_none());
    }

    #[test]
    fn one_sided_terms_are_rejected() {
        let c = cards(&[("A_ORDER", 2.0), ("A_2_0", 1e-6)]);
        assert!(SipDistortion::from_header(&c).is_err());
    }

    #[test]
    fn iterative_inverse_recovers_offset() {
        let c = cards(&[
            ("A_ORDER", 2.0),
            ("B_ORDER", 2.0),
            ("A_2_0", 2e-6),
            ("A_1_1", -1e-6),
            ("B_0_2", 1.5e-6),
        ]);
        let sip = SipDistortion::from_header(&c).unwrap().unwrap();
        assert!(sip.inverse.is_none());

        let (up, vp) = sip.distort(400.0, -300.0);
        assert!((up - 400.0).abs() > 0.1);
        let (u, v) = sip.undistort(up, vp);
        assert!((u - 400.0).abs() < 1e-6);
        assert!((v + 300.0).abs() < 1e-6);
    }
}
