//! Sources, receivers and the survey that groups them by frequency.

mod receiver;
mod source;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use emsim_core::{GridLocation, MassLocation};

use crate::C64;
use crate::error::{Error, Result};

pub use receiver::{PointReceiver, Receiver};
pub use source::{
    DerivMode, EquationLayout, MagDipole, RawVec, ScaledCurrent, Source, SourceContext,
    SourceTerms,
};

/// A field quantity that can be requested from a fields container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Phi,
    E,
    B,
    H,
    J,
}

impl Quantity {
    pub fn name(&self) -> &'static str {
        match self {
            Quantity::Phi => "phi",
            Quantity::E => "e",
            Quantity::B => "b",
            Quantity::H => "h",
            Quantity::J => "j",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "phi" => Ok(Quantity::Phi),
            "e" => Ok(Quantity::E),
            "b" => Ok(Quantity::B),
            "h" => Ok(Quantity::H),
            "j" => Ok(Quantity::J),
            other => Err(Error::InvalidArgument(format!(
                "unknown field quantity '{}'",
                other
            ))),
        }
    }
}

/// Which part of the complex projected field a receiver records.
///
/// Forward: `d = Re(P f)` or `d = Im(P f)`. Adjoint: the seed is `Pᵀ w` or
/// `i Pᵀ w`, and the model-space result is accumulated as `Re(x)` or `-Re(x)`.
/// Since `Im(z) = -Re(i z)`, both directions stay consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Real,
    Imag,
}

impl Component {
    /// Real data from a complex projected field.
    pub fn take(&self, z: &DVector<C64>) -> DVector<f64> {
        match self {
            Component::Real => z.map(|c| c.re),
            Component::Imag => z.map(|c| c.im),
        }
    }

    /// Complex adjoint seed from a back-projected real data vector.
    pub fn adjoint_seed(&self, ptw: &DVector<f64>) -> DVector<C64> {
        match self {
            Component::Real => ptw.map(|x| C64::new(x, 0.0)),
            Component::Imag => ptw.map(|x| C64::new(0.0, x)),
        }
    }

    /// Model-space contribution from a complex adjoint result.
    pub fn accumulate(&self, x: &DVector<C64>) -> DVector<f64> {
        match self {
            Component::Real => x.map(|c| c.re),
            Component::Imag => x.map(|c| -c.re),
        }
    }
}

impl FromStr for Component {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "real" | "re" => Ok(Component::Real),
            "imag" | "im" => Ok(Component::Imag),
            other => Err(Error::InvalidArgument(format!(
                "unknown component '{}' (expected real or imag)",
                other
            ))),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Real => write!(f, "real"),
            Component::Imag => write!(f, "imag"),
        }
    }
}

/// Cartesian direction of a receiver or dipole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    X,
    Y,
    Z,
}

impl Orientation {
    /// Cartesian axis index: 0 for x, 1 for y, 2 for z.
    pub fn axis(&self) -> usize {
        match self {
            Orientation::X => 0,
            Orientation::Y => 1,
            Orientation::Z => 2,
        }
    }

    /// Grid location of this component for a field stored on edges or faces.
    pub fn grid_location(&self, loc: MassLocation) -> GridLocation {
        match (loc, self) {
            (MassLocation::Edges, Orientation::X) => GridLocation::EdgeX,
            (MassLocation::Edges, Orientation::Y) => GridLocation::EdgeY,
            (MassLocation::Edges, Orientation::Z) => GridLocation::EdgeZ,
            (MassLocation::Faces, Orientation::X) => GridLocation::FaceX,
            (MassLocation::Faces, Orientation::Y) => GridLocation::FaceY,
            (MassLocation::Faces, Orientation::Z) => GridLocation::FaceZ,
        }
    }
}

/// The sources of an experiment, grouped by frequency on demand.
#[derive(Debug)]
pub struct Survey {
    sources: Vec<Arc<dyn Source>>,
    frequencies: Vec<f64>,
    /// `offsets[src][rx]` is the first data index of receiver `rx` of source `src`.
    offsets: Vec<Vec<usize>>,
    n_data: usize,
}

impl Survey {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Result<Self> {
        let mut frequencies = Vec::new();
        for src in &sources {
            let f = src.frequency();
            if !(f.is_finite() && f > 0.0) {
                return Err(Error::InvalidArgument(format!(
                    "source frequency must be positive, got {}",
                    f
                )));
            }
            if !frequencies.contains(&f) {
                frequencies.push(f);
            }
        }
        frequencies.sort_by(|a, b| a.total_cmp(b));

        let mut offsets = Vec::with_capacity(sources.len());
        let mut n_data = 0;
        for src in &sources {
            let mut per_rx = Vec::with_capacity(src.receivers().len());
            for rx in src.receivers() {
                per_rx.push(n_data);
                n_data += rx.n_data();
            }
            offsets.push(per_rx);
        }

        Ok(Self {
            sources,
            frequencies,
            offsets,
            n_data,
        })
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    pub fn source(&self, index: usize) -> Result<&dyn Source> {
        self.sources
            .get(index)
            .map(|s| s.as_ref())
            .ok_or_else(|| Error::InvalidArgument(format!("no source with index {}", index)))
    }

    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }

    /// Distinct source frequencies in ascending order.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Indices of the sources operating at `frequency`, in survey order.
    pub fn sources_at_frequency(&self, frequency: f64) -> Vec<usize> {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.frequency() == frequency)
            .map(|(i, _)| i)
            .collect()
    }

    /// Total number of data, ordered by source, then receiver, then location.
    pub fn n_data(&self) -> usize {
        self.n_data
    }

    /// Range of data indices belonging to receiver `rx` of source `src`.
    pub fn data_range(&self, src: usize, rx: usize) -> std::ops::Range<usize> {
        let start = self.offsets[src][rx];
        start..start + self.sources[src].receivers()[rx].n_data()
    }
}

/// A data vector with keyed access by (source, receiver).
#[derive(Debug, Clone)]
pub struct SurveyData {
    survey: Arc<Survey>,
    values: DVector<f64>,
}

impl SurveyData {
    pub fn new(survey: Arc<Survey>, values: DVector<f64>) -> Result<Self> {
        if values.len() != survey.n_data() {
            return Err(Error::DimensionMismatch {
                expected: survey.n_data(),
                actual: values.len(),
            });
        }
        Ok(Self { survey, values })
    }

    pub fn zeros(survey: Arc<Survey>) -> Self {
        let values = DVector::zeros(survey.n_data());
        Self { survey, values }
    }

    fn checked_range(&self, src: usize, rx: usize) -> Result<std::ops::Range<usize>> {
        let n_rx = self
            .survey
            .sources()
            .get(src)
            .map(|s| s.receivers().len())
            .ok_or_else(|| Error::InvalidArgument(format!("no source with index {}", src)))?;
        if rx >= n_rx {
            return Err(Error::InvalidArgument(format!(
                "source {} has no receiver {}",
                src, rx
            )));
        }
        Ok(self.survey.data_range(src, rx))
    }

    /// Data recorded by receiver `rx` of source `src`.
    pub fn get(&self, src: usize, rx: usize) -> Result<&[f64]> {
        let range = self.checked_range(src, rx)?;
        Ok(&self.values.as_slice()[range])
    }

    pub fn set(&mut self, src: usize, rx: usize, data: &[f64]) -> Result<()> {
        let range = self.checked_range(src, rx)?;
        if data.len() != range.len() {
            return Err(Error::DimensionMismatch {
                expected: range.len(),
                actual: data.len(),
            });
        }
        self.values.as_mut_slice()[range].copy_from_slice(data);
        Ok(())
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn into_values(self) -> DVector<f64> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn point_rx(n: usize, component: Component) -> Arc<dyn Receiver> {
        let locations = (0..n).map(|i| [i as f64, 0.0, 0.0]).collect();
        Arc::new(PointReceiver::new(
            locations,
            Quantity::B,
            Orientation::Z,
            component,
        ))
    }

    fn dipole(frequency: f64, receivers: Vec<Arc<dyn Receiver>>) -> Arc<dyn Source> {
        Arc::new(MagDipole::new(frequency, [0.0; 3], Orientation::Z, 1.0, receivers))
    }

    fn survey() -> Survey {
        Survey::new(vec![
            dipole(100.0, vec![point_rx(2, Component::Real), point_rx(3, Component::Imag)]),
            dipole(10.0, vec![point_rx(1, Component::Real)]),
            dipole(100.0, vec![point_rx(4, Component::Imag)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_quantity_from_str() {
        assert_eq!("b".parse::<Quantity>().unwrap(), Quantity::B);
        assert_eq!("phi".parse::<Quantity>().unwrap(), Quantity::Phi);
        assert!(matches!(
            "x".parse::<Quantity>(),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(Quantity::H.to_string(), "h");
    }

    #[test]
    fn test_component_convention() {
        let z = dvector![C64::new(1.0, 2.0), C64::new(-3.0, 4.0)];
        assert_eq!(Component::Real.take(&z), dvector![1.0, -3.0]);
        assert_eq!(Component::Imag.take(&z), dvector![2.0, 4.0]);

        // <w, Im(z)> == accumulate(<seed(w), z>) for the imaginary part.
        let w = dvector![0.5, -1.5];
        let seed = Component::Imag.adjoint_seed(&w);
        let x = dvector![seed.dot(&z)];
        let lhs = w.dot(&Component::Imag.take(&z));
        assert!((Component::Imag.accumulate(&x)[0] - lhs).abs() < 1e-14);
        assert_eq!("imag".parse::<Component>().unwrap(), Component::Imag);
    }

    #[test]
    fn test_frequencies_sorted_and_unique() {
        let survey = survey();
        assert_eq!(survey.frequencies(), &[10.0, 100.0]);
        assert_eq!(survey.sources_at_frequency(100.0), vec![0, 2]);
        assert_eq!(survey.sources_at_frequency(10.0), vec![1]);
        assert!(survey.sources_at_frequency(5.0).is_empty());
    }

    #[test]
    fn test_data_layout() {
        let survey = survey();
        assert_eq!(survey.n_data(), 10);
        assert_eq!(survey.data_range(0, 1), 2..5);
        assert_eq!(survey.data_range(1, 0), 5..6);
        assert_eq!(survey.data_range(2, 0), 6..10);
    }

    #[test]
    fn test_survey_data_access() {
        let survey = Arc::new(survey());
        let mut data = SurveyData::zeros(Arc::clone(&survey));
        data.set(0, 1, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(data.get(0, 1).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(data.values()[4], 3.0);
        assert!(data.set(0, 1, &[1.0]).is_err());
        assert!(data.get(5, 0).is_err());
        assert!(data.get(1, 1).is_err());
        assert!(SurveyData::new(survey, DVector::zeros(3)).is_err());
    }

    #[test]
    fn test_rejects_bad_frequency() {
        let result = Survey::new(vec![dipole(0.0, vec![])]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
