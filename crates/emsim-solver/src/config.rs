//! Problem configuration.

use serde::{Deserialize, Serialize};

use emsim_core::MU_0;

/// Controls how frequencies are distributed over threads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Process frequencies on the rayon thread pool.
    pub enabled: bool,
    /// Minimum number of frequencies to go parallel (below this, sequential is faster).
    pub min_frequencies: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_frequencies: 2,
        }
    }
}

impl ParallelConfig {
    /// Sequential execution regardless of the number of frequencies.
    pub fn sequential() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the minimum parallel threshold.
    pub fn with_min_frequencies(mut self, min: usize) -> Self {
        self.min_frequencies = min;
        self
    }

    /// Whether `n_frequencies` frequencies should be processed in parallel.
    pub fn use_parallel(&self, n_frequencies: usize) -> bool {
        self.enabled && n_frequencies >= self.min_frequencies && rayon::current_num_threads() > 1
    }
}

/// Settings shared by every formulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemConfig {
    /// Left-multiply the b and j systems so they become complex symmetric.
    pub make_symmetric: bool,
    /// Magnetic permeability (H/m), constant over the mesh.
    pub mu: f64,
    pub parallel: ParallelConfig,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            make_symmetric: false,
            mu: MU_0,
            parallel: ParallelConfig::default(),
        }
    }
}

impl ProblemConfig {
    pub fn with_symmetric(mut self, make_symmetric: bool) -> Self {
        self.make_symmetric = make_symmetric;
        self
    }

    pub fn with_mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProblemConfig::default();
        assert!(!config.make_symmetric);
        assert_eq!(config.mu, MU_0);
        assert!(config.parallel.enabled);
    }

    #[test]
    fn test_builders() {
        let config = ProblemConfig::default()
            .with_symmetric(true)
            .with_mu(2.0 * MU_0)
            .with_parallel(ParallelConfig::sequential().with_min_frequencies(8));
        assert!(config.make_symmetric);
        assert_eq!(config.mu, 2.0 * MU_0);
        assert!(!config.parallel.enabled);
        assert_eq!(config.parallel.min_frequencies, 8);
        assert!(!config.parallel.use_parallel(100));
    }

    #[test]
    fn test_json_roundtrip_with_missing_fields() {
        let config: ProblemConfig = serde_json::from_str(r#"{"make_symmetric": true}"#).unwrap();
        assert!(config.make_symmetric);
        assert_eq!(config.mu, MU_0);
        assert_eq!(config.parallel, ParallelConfig::default());

        let json = serde_json::to_string(&config).unwrap();
        let back: ProblemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
