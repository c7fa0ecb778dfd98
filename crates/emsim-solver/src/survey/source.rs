use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;
use num_traits::Zero;

use emsim_core::sparse::{spmv, spmv_t};
use emsim_core::{ComplexOperator, Discretization, MassLocation, omega};

use super::{Orientation, Quantity, Receiver};
use crate::C64;
use crate::error::{Error, Result};
use crate::model::ModelOperators;

/// Where the magnetic and electric source terms live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EquationLayout {
    /// e on edges, b on faces: `S_m` on faces, `S_e` on edges.
    Eb,
    /// h on edges, j on faces: `S_m` on edges, `S_e` on faces.
    Hj,
}

impl EquationLayout {
    pub fn s_m_location(&self) -> MassLocation {
        match self {
            EquationLayout::Eb => MassLocation::Faces,
            EquationLayout::Hj => MassLocation::Edges,
        }
    }

    pub fn s_e_location(&self) -> MassLocation {
        match self {
            EquationLayout::Eb => MassLocation::Edges,
            EquationLayout::Hj => MassLocation::Faces,
        }
    }
}

/// Forward (model perturbation in) or adjoint (source-space vector in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivMode {
    Forward,
    Adjoint,
}

/// What a source needs to evaluate itself for one formulation and model.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub ops: &'a ModelOperators,
    pub layout: EquationLayout,
    pub frequency: f64,
}

impl SourceContext<'_> {
    pub fn n_s_m(&self) -> usize {
        self.ops.discretization().n_at(self.layout.s_m_location())
    }

    pub fn n_s_e(&self) -> usize {
        self.ops.discretization().n_at(self.layout.s_e_location())
    }
}

/// Magnetic (`S_m`) and electric (`S_e`) source terms of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTerms {
    pub s_m: DVector<C64>,
    pub s_e: DVector<C64>,
}

impl SourceTerms {
    pub fn zeros(ctx: &SourceContext<'_>) -> Self {
        Self {
            s_m: DVector::zeros(ctx.n_s_m()),
            s_e: DVector::zeros(ctx.n_s_e()),
        }
    }

    pub fn has_s_m(&self) -> bool {
        self.s_m.iter().any(|v| !v.is_zero())
    }

    pub fn has_s_e(&self) -> bool {
        self.s_e.iter().any(|v| !v.is_zero())
    }
}

/// A transmitter at one frequency together with its receivers.
///
/// The derivative hooks return `None` when the term does not depend on the
/// model, which the kernels treat as an algebraic zero.
pub trait Source: Send + Sync + fmt::Debug {
    fn frequency(&self) -> f64;

    fn receivers(&self) -> &[Arc<dyn Receiver>];

    fn eval(&self, ctx: &SourceContext<'_>) -> Result<SourceTerms>;

    /// `dS_m/dm · v` (forward) or `(dS_m/dm)ᵀ · v` (adjoint).
    fn s_m_deriv(
        &self,
        _ctx: &SourceContext<'_>,
        _v: &DVector<C64>,
        _mode: DerivMode,
    ) -> Result<Option<DVector<C64>>> {
        Ok(None)
    }

    /// `dS_e/dm · v` (forward) or `(dS_e/dm)ᵀ · v` (adjoint).
    fn s_e_deriv(
        &self,
        _ctx: &SourceContext<'_>,
        _v: &DVector<C64>,
        _mode: DerivMode,
    ) -> Result<Option<DVector<C64>>> {
        Ok(None)
    }

    /// Analytic primary `quantity` along `orientation` at `points`, for
    /// sources whose discrete fields hold only the remainder.
    fn primary_field(
        &self,
        _quantity: Quantity,
        _orientation: Orientation,
        _points: &[[f64; 3]],
        _mu: f64,
    ) -> Option<DVector<C64>> {
        None
    }
}

fn check_len(expected: usize, v: &DVector<C64>) -> Result<()> {
    if v.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

/// User-supplied source vectors for one equation layout.
#[derive(Debug)]
pub struct RawVec {
    frequency: f64,
    layout: EquationLayout,
    s_m: DVector<C64>,
    s_e: DVector<C64>,
    receivers: Vec<Arc<dyn Receiver>>,
}

impl RawVec {
    pub fn new(
        frequency: f64,
        layout: EquationLayout,
        s_m: DVector<C64>,
        s_e: DVector<C64>,
        receivers: Vec<Arc<dyn Receiver>>,
    ) -> Self {
        Self {
            frequency,
            layout,
            s_m,
            s_e,
            receivers,
        }
    }
}

impl Source for RawVec {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn receivers(&self) -> &[Arc<dyn Receiver>] {
        &self.receivers
    }

    fn eval(&self, ctx: &SourceContext<'_>) -> Result<SourceTerms> {
        if ctx.layout != self.layout {
            return Err(Error::InvalidArgument(format!(
                "raw source vectors are laid out for {:?}, the formulation needs {:?}",
                self.layout, ctx.layout
            )));
        }
        check_len(ctx.n_s_m(), &self.s_m)?;
        check_len(ctx.n_s_e(), &self.s_e)?;
        Ok(SourceTerms {
            s_m: self.s_m.clone(),
            s_e: self.s_e.clone(),
        })
    }
}

/// Point magnetic dipole of moment `m` in a whole space of permeability μ.
///
/// The static dipole field is split off as a primary, `b_p = ∇×a_p` with
/// `a_p = μ/4π · m×R/|R|³`, and the discrete system solves only for the
/// induced remainder, driven by `S_m = -iω b_p`. With b on faces the flux is
/// the curl of `a_p` sampled on edges; with b on edges it is the weak curl
/// `Cᵀ M_f a_p` of `a_p` sampled on faces. Either way the discrete flux is
/// divergence free, so the remainder vanishes as ωσ → 0. Receivers add the
/// analytic primary at their locations.
#[derive(Debug)]
pub struct MagDipole {
    frequency: f64,
    location: [f64; 3],
    orientation: Orientation,
    moment: f64,
    receivers: Vec<Arc<dyn Receiver>>,
}

impl MagDipole {
    pub fn new(
        frequency: f64,
        location: [f64; 3],
        orientation: Orientation,
        moment: f64,
        receivers: Vec<Arc<dyn Receiver>>,
    ) -> Self {
        Self {
            frequency,
            location,
            orientation,
            moment,
            receivers,
        }
    }

    fn moment_vector(&self) -> [f64; 3] {
        let mut m = [0.0; 3];
        m[self.orientation.axis()] = self.moment;
        m
    }

    /// Offset from the dipole and its length; `None` at the dipole itself.
    fn offset(&self, r: [f64; 3]) -> Option<([f64; 3], f64)> {
        let d = [
            r[0] - self.location[0],
            r[1] - self.location[1],
            r[2] - self.location[2],
        ];
        let dist = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        (dist > 0.0).then_some((d, dist))
    }

    /// Vector potential `a_p` at `r`; zero at the dipole.
    pub fn vector_potential(&self, r: [f64; 3], mu: f64) -> [f64; 3] {
        let Some((d, dist)) = self.offset(r) else {
            return [0.0; 3];
        };
        let m = self.moment_vector();
        let scale = mu / (4.0 * PI * dist.powi(3));
        [
            scale * (m[1] * d[2] - m[2] * d[1]),
            scale * (m[2] * d[0] - m[0] * d[2]),
            scale * (m[0] * d[1] - m[1] * d[0]),
        ]
    }

    /// Static flux density `b_p` at `r`; zero at the dipole.
    pub fn flux_density(&self, r: [f64; 3], mu: f64) -> [f64; 3] {
        let Some((d, dist)) = self.offset(r) else {
            return [0.0; 3];
        };
        let m = self.moment_vector();
        let unit = d.map(|x| x / dist);
        let m_r = unit[0] * m[0] + unit[1] * m[1] + unit[2] * m[2];
        let scale = mu / (4.0 * PI * dist.powi(3));
        [0, 1, 2].map(|a| scale * (3.0 * unit[a] * m_r - m[a]))
    }

    /// `a_p` sampled component-wise at the edges or faces, in unknown order.
    fn sample_potential(
        &self,
        disc: &dyn Discretization,
        loc: MassLocation,
        mu: f64,
    ) -> DVector<C64> {
        let mut values = Vec::with_capacity(disc.n_at(loc));
        for orientation in [Orientation::X, Orientation::Y, Orientation::Z] {
            let axis = orientation.axis();
            values.extend(
                disc.grid_points(orientation.grid_location(loc))
                    .into_iter()
                    .map(|p| C64::new(self.vector_potential(p, mu)[axis], 0.0)),
            );
        }
        DVector::from_vec(values)
    }
}

impl Source for MagDipole {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn receivers(&self) -> &[Arc<dyn Receiver>] {
        &self.receivers
    }

    fn eval(&self, ctx: &SourceContext<'_>) -> Result<SourceTerms> {
        let ops = ctx.ops;
        let disc = ops.discretization();
        let flux = match ctx.layout {
            EquationLayout::Eb => {
                let a = self.sample_potential(disc, MassLocation::Edges, ops.mu());
                spmv(ops.curl(), &a)
            }
            EquationLayout::Hj => {
                let a = self.sample_potential(disc, MassLocation::Faces, ops.mu());
                spmv_t(ops.curl(), &spmv(ops.mf(), &a))
            }
        };
        check_len(ctx.n_s_m(), &flux)?;

        let mut terms = SourceTerms::zeros(ctx);
        terms.s_m = flux * C64::new(0.0, -omega(ctx.frequency));
        Ok(terms)
    }

    fn primary_field(
        &self,
        quantity: Quantity,
        orientation: Orientation,
        points: &[[f64; 3]],
        mu: f64,
    ) -> Option<DVector<C64>> {
        let scale = match quantity {
            Quantity::B => 1.0,
            Quantity::H => 1.0 / mu,
            _ => return None,
        };
        let axis = orientation.axis();
        Some(DVector::from_iterator(
            points.len(),
            points
                .iter()
                .map(|&p| C64::new(scale * self.flux_density(p, mu)[axis], 0.0)),
        ))
    }
}

/// Electric source `S_e = M_σ e_p` driven by a fixed primary field `e_p`.
///
/// Typical of primary/secondary splits: the source term scales with the
/// model conductivity, so its derivative is non-zero.
#[derive(Debug)]
pub struct ScaledCurrent {
    frequency: f64,
    location: MassLocation,
    primary: DVector<C64>,
    receivers: Vec<Arc<dyn Receiver>>,
}

impl ScaledCurrent {
    pub fn new(
        frequency: f64,
        location: MassLocation,
        primary: DVector<C64>,
        receivers: Vec<Arc<dyn Receiver>>,
    ) -> Self {
        Self {
            frequency,
            location,
            primary,
            receivers,
        }
    }

    fn check_layout(&self, ctx: &SourceContext<'_>) -> Result<()> {
        if ctx.layout.s_e_location() != self.location {
            return Err(Error::InvalidArgument(format!(
                "scaled current lives on {:?} but the formulation expects S_e on {:?}",
                self.location,
                ctx.layout.s_e_location()
            )));
        }
        check_len(ctx.n_s_e(), &self.primary)
    }
}

impl Source for ScaledCurrent {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn receivers(&self) -> &[Arc<dyn Receiver>] {
        &self.receivers
    }

    fn eval(&self, ctx: &SourceContext<'_>) -> Result<SourceTerms> {
        self.check_layout(ctx)?;
        let mut terms = SourceTerms::zeros(ctx);
        terms.s_e = spmv(&ctx.ops.mass_sigma(self.location)?, &self.primary);
        Ok(terms)
    }

    fn s_e_deriv(
        &self,
        ctx: &SourceContext<'_>,
        v: &DVector<C64>,
        mode: DerivMode,
    ) -> Result<Option<DVector<C64>>> {
        self.check_layout(ctx)?;
        let deriv = ctx.ops.mass_sigma_deriv(self.location, &self.primary)?;
        let out = match mode {
            DerivMode::Forward => {
                check_len(deriv.ncols(), v)?;
                deriv.apply(v)
            }
            DerivMode::Adjoint => {
                check_len(deriv.nrows(), v)?;
                deriv.apply_transpose(v)
            }
        };
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyMap;
    use emsim_core::{Discretization, ExpMap, TensorMesh, rng};

    fn ops() -> ModelOperators {
        let disc: Arc<dyn Discretization> = Arc::new(TensorMesh::uniform(10.0, [3, 3, 3]).unwrap());
        let n = disc.n_cells();
        let m = rng::uniform_vector(8, n).map(|x| -3.0 + x);
        ModelOperators::new(
            disc,
            &PropertyMap::Conductivity(Box::new(ExpMap::new(n))),
            &m,
            emsim_core::MU_0,
        )
        .unwrap()
    }

    #[test]
    fn test_dipole_flux_is_divergence_free() {
        let ops = ops();
        let mesh = TensorMesh::uniform(10.0, [3, 3, 3]).unwrap();
        let src = MagDipole::new(100.0, [1.0, -2.0, 0.5], Orientation::X, 2.0, vec![]);

        // b on faces: the flux out of every (equal-sided) cell cancels.
        let eb = SourceContext {
            ops: &ops,
            layout: EquationLayout::Eb,
            frequency: 100.0,
        };
        let terms = src.eval(&eb).unwrap();
        assert!(!terms.has_s_e());
        assert_eq!(terms.s_m.len(), mesh.n_faces());
        let s = &terms.s_m;
        let n = 3;
        let [nfx, nfy, _] = mesh.n_faces_per_dir();
        let fx = |i: usize, j: usize, k: usize| i + (n + 1) * (j + n * k);
        let fy = |i: usize, j: usize, k: usize| nfx + i + n * (j + (n + 1) * k);
        let fz = |i: usize, j: usize, k: usize| nfx + nfy + i + n * (j + n * k);
        let scale = s.camax();
        assert!(scale > 0.0);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let div = s[fx(i + 1, j, k)] - s[fx(i, j, k)] + s[fy(i, j + 1, k)]
                        - s[fy(i, j, k)]
                        + s[fz(i, j, k + 1)]
                        - s[fz(i, j, k)];
                    assert!(div.norm() < 1e-12 * scale, "cell ({i}, {j}, {k}): {div}");
                }
            }
        }

        // b on edges: the weak divergence Gᵀ S_m vanishes at every node.
        let hj = SourceContext {
            layout: EquationLayout::Hj,
            ..eb
        };
        let terms = src.eval(&hj).unwrap();
        assert_eq!(terms.s_m.len(), mesh.n_edges());
        let div = spmv_t(mesh.nodal_grad(), &terms.s_m);
        assert!(div.camax() < 1e-11 * terms.s_m.camax());
    }

    #[test]
    fn test_dipole_primary_field() {
        let mu = emsim_core::MU_0;
        let src = MagDipole::new(10.0, [0.0, 0.0, 5.0], Orientation::Z, 3.0, vec![]);
        let points = [[0.0, 0.0, 15.0], [10.0, 0.0, 5.0], [0.0, 0.0, 5.0]];

        let bz = src
            .primary_field(Quantity::B, Orientation::Z, &points, mu)
            .unwrap();
        let on_axis = mu * 3.0 * 2.0 / (4.0 * PI * 1000.0);
        let broadside = -mu * 3.0 / (4.0 * PI * 1000.0);
        assert!((bz[0].re - on_axis).abs() < 1e-12 * on_axis);
        assert!((bz[1].re - broadside).abs() < 1e-12 * on_axis);
        assert_eq!(bz[2], C64::new(0.0, 0.0));

        let hz = src
            .primary_field(Quantity::H, Orientation::Z, &points, mu)
            .unwrap();
        assert!((hz[0].re * mu - on_axis).abs() < 1e-12 * on_axis);

        let bx = src
            .primary_field(Quantity::B, Orientation::X, &points, mu)
            .unwrap();
        assert!(bx[0].norm() < 1e-12 * on_axis);
        assert!(src
            .primary_field(Quantity::E, Orientation::Z, &points, mu)
            .is_none());
        assert!(src
            .primary_field(Quantity::J, Orientation::Z, &points, mu)
            .is_none());
    }

    #[test]
    fn test_raw_vec_layout_checked() {
        let ops = ops();
        let ctx = SourceContext {
            ops: &ops,
            layout: EquationLayout::Eb,
            frequency: 1.0,
        };
        let src = RawVec::new(
            1.0,
            EquationLayout::Eb,
            DVector::zeros(ctx.n_s_m()),
            rng::complex_vector(1, ctx.n_s_e()),
            vec![],
        );
        assert!(src.eval(&ctx).unwrap().has_s_e());

        let hj = SourceContext {
            layout: EquationLayout::Hj,
            ..ctx
        };
        assert!(matches!(src.eval(&hj), Err(Error::InvalidArgument(_))));
        assert!(src
            .s_m_deriv(&ctx, &DVector::zeros(3), DerivMode::Forward)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_scaled_current_deriv_adjoint() {
        let ops = ops();
        let ctx = SourceContext {
            ops: &ops,
            layout: EquationLayout::Hj,
            frequency: 10.0,
        };
        let src = ScaledCurrent::new(
            10.0,
            MassLocation::Faces,
            rng::complex_vector(2, ctx.n_s_e()),
            vec![],
        );
        let v = rng::complex_vector(3, ops.n_params());
        let w = rng::complex_vector(4, ctx.n_s_e());
        let fwd = src.s_e_deriv(&ctx, &v, DerivMode::Forward).unwrap().unwrap();
        let adj = src.s_e_deriv(&ctx, &w, DerivMode::Adjoint).unwrap().unwrap();
        let lhs = w.dot(&fwd);
        let rhs = adj.dot(&v);
        assert!((lhs - rhs).norm() < 1e-10 * lhs.norm());

        let eb = SourceContext {
            layout: EquationLayout::Eb,
            ..ctx
        };
        assert!(src.eval(&eb).is_err());
    }
}
