//! Stateless, reproducible random vectors.
//!
//! Sensitivity checks (finite-difference order tests, adjoint identities)
//! need random models, perturbations and data-space vectors that are the same
//! on every run and independent of how work is split across threads. Each
//! value is a hash of `(seed, stream, index)` so vectors can be generated in
//! any order.
//!
//! # Algorithm
//!
//! SplitMix64 mixes the coordinates; Gaussian values use the Box-Muller
//! transform on two uniform values.

use std::f64::consts::PI;

use nalgebra::DVector;

use crate::C64;

/// SplitMix64 finalizer.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Mix a seed with a stream and an element index.
#[inline]
pub fn combine_indices(seed: u64, stream: u32, index: u32) -> u64 {
    // Spread the two indices over different bit patterns.
    seed ^ (stream as u64).wrapping_mul(0x517cc1b727220a95)
        ^ (index as u64).wrapping_mul(0x5851f42d4c957f2d)
}

/// Uniform value in [0, 1).
///
/// ```
/// use emsim_core::rng::uniform;
///
/// let value = uniform(42, 0, 0);
/// assert!((0.0..1.0).contains(&value));
/// assert_eq!(uniform(42, 0, 0), value);
/// ```
#[inline]
pub fn uniform(seed: u64, stream: u32, index: u32) -> f64 {
    let hash = splitmix64(combine_indices(seed, stream, index));
    // Upper 53 bits fill the f64 mantissa.
    (hash >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Standard normal value.
#[inline]
pub fn gaussian(seed: u64, stream: u32, index: u32) -> f64 {
    let u1 = uniform(seed, stream, index.wrapping_mul(2)).max(1e-10);
    let u2 = uniform(seed, stream, index.wrapping_mul(2).wrapping_add(1));
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Vector of `n` uniform values in [0, 1).
pub fn uniform_vector(seed: u64, n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| uniform(seed, 0, i as u32))
}

/// Vector of `n` standard normal values.
pub fn gaussian_vector(seed: u64, n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| gaussian(seed, 1, i as u32))
}

/// Complex vector with independent standard normal real and imaginary parts.
pub fn complex_vector(seed: u64, n: usize) -> DVector<C64> {
    DVector::from_fn(n, |i, _| {
        C64::new(gaussian(seed, 2, i as u32), gaussian(seed, 3, i as u32))
    })
}
