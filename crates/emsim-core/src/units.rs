//! Physical constants and frequency helpers.

use std::f64::consts::PI;

/// Magnetic permeability of free space (H/m).
pub const MU_0: f64 = 4.0e-7 * PI;

/// Angular frequency for a frequency in Hz.
#[inline]
pub fn omega(frequency: f64) -> f64 {
    2.0 * PI * frequency
}

/// Skin depth (m) of a plane wave in a homogeneous half-space.
pub fn skin_depth(frequency: f64, sigma: f64) -> f64 {
    (2.0 / (omega(frequency) * MU_0 * sigma)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omega() {
        assert!((omega(1.0) - 2.0 * PI).abs() < 1e-15);
        assert!((omega(0.0)).abs() < 1e-15);
    }

    #[test]
    fn test_skin_depth_rule_of_thumb() {
        // delta ~ 503 * sqrt(rho / f)
        let delta = skin_depth(100.0, 0.1);
        let approx = 503.0 * (10.0_f64 / 100.0).sqrt();
        assert!(
            (delta - approx).abs() / approx < 1e-3,
            "skin depth {} (expected ~{})",
            delta,
            approx
        );
    }
}
