use std::fmt;
use std::sync::OnceLock;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use emsim_core::sparse::{spmv, spmv_t};
use emsim_core::{Discretization, MassLocation};

use super::{Component, Orientation, Quantity, Source};
use crate::C64;
use crate::error::{Error, Result};

/// Records one component of one field quantity.
///
/// Fields are complex and live on edges or faces depending on the
/// formulation; `loc` tells the receiver where the field it is given lives.
pub trait Receiver: Send + Sync + fmt::Debug {
    fn quantity(&self) -> Quantity;

    fn component(&self) -> Component;

    fn orientation(&self) -> Orientation;

    /// Number of data this receiver produces.
    fn n_data(&self) -> usize;

    /// Projection `P` from the field at `loc` to the receiver locations.
    fn projection(&self, disc: &dyn Discretization, loc: MassLocation) -> Result<&CscMatrix<f64>>;

    /// `Re(P f)` or `Im(P f)`.
    fn project_field(
        &self,
        disc: &dyn Discretization,
        loc: MassLocation,
        f: &DVector<C64>,
    ) -> Result<DVector<f64>> {
        let p = self.projection(disc, loc)?;
        if f.len() != p.ncols() {
            return Err(Error::DimensionMismatch {
                expected: p.ncols(),
                actual: f.len(),
            });
        }
        Ok(self.component().take(&spmv(p, f)))
    }

    /// Sensitivity of the data to a field perturbation `df`.
    fn project_field_deriv(
        &self,
        disc: &dyn Discretization,
        loc: MassLocation,
        df: &DVector<C64>,
    ) -> Result<DVector<f64>> {
        self.project_field(disc, loc, df)
    }

    /// Complex adjoint seed `Pᵀ w` (real) or `i Pᵀ w` (imag) for data-space `w`.
    fn project_field_deriv_adjoint(
        &self,
        disc: &dyn Discretization,
        loc: MassLocation,
        w: &DVector<f64>,
    ) -> Result<DVector<C64>> {
        let p = self.projection(disc, loc)?;
        if w.len() != p.nrows() {
            return Err(Error::DimensionMismatch {
                expected: p.nrows(),
                actual: w.len(),
            });
        }
        Ok(self.component().adjoint_seed(&spmv_t(p, w)))
    }

    /// Data of the analytic primary field of `source`, added to the projected
    /// discrete field. Model independent, so it never enters `J`.
    fn primary_data(&self, _source: &dyn Source, _mu: f64) -> Option<DVector<f64>> {
        None
    }
}

/// Trilinear point measurements of one vector component.
///
/// The projection is built on first use and reused afterwards, so a receiver
/// belongs to a single mesh.
#[derive(Debug)]
pub struct PointReceiver {
    locations: Vec<[f64; 3]>,
    quantity: Quantity,
    orientation: Orientation,
    component: Component,
    on_edges: OnceLock<CscMatrix<f64>>,
    on_faces: OnceLock<CscMatrix<f64>>,
}

impl PointReceiver {
    pub fn new(
        locations: Vec<[f64; 3]>,
        quantity: Quantity,
        orientation: Orientation,
        component: Component,
    ) -> Self {
        Self {
            locations,
            quantity,
            orientation,
            component,
            on_edges: OnceLock::new(),
            on_faces: OnceLock::new(),
        }
    }

    pub fn locations(&self) -> &[[f64; 3]] {
        &self.locations
    }
}

impl Receiver for PointReceiver {
    fn quantity(&self) -> Quantity {
        self.quantity
    }

    fn component(&self) -> Component {
        self.component
    }

    fn orientation(&self) -> Orientation {
        self.orientation
    }

    fn n_data(&self) -> usize {
        self.locations.len()
    }

    fn primary_data(&self, source: &dyn Source, mu: f64) -> Option<DVector<f64>> {
        source
            .primary_field(self.quantity, self.orientation, &self.locations, mu)
            .map(|f| self.component.take(&f))
    }

    fn projection(&self, disc: &dyn Discretization, loc: MassLocation) -> Result<&CscMatrix<f64>> {
        let cell = match loc {
            MassLocation::Edges => &self.on_edges,
            MassLocation::Faces => &self.on_faces,
        };
        if cell.get().is_none() {
            let p = disc.interpolation_matrix(&self.locations, self.orientation.grid_location(loc))?;
            // Concurrent first uses build the same matrix; either copy may win.
            let _ = cell.set(p);
        }
        let p = cell
            .get()
            .ok_or_else(|| Error::InvalidArgument("receiver projection unavailable".to_string()))?;
        if p.ncols() != disc.n_at(loc) {
            return Err(Error::DimensionMismatch {
                expected: disc.n_at(loc),
                actual: p.ncols(),
            });
        }
        Ok(p)
    }
}
