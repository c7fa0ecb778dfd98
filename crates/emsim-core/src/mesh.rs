//! 3D tensor-product mesh with staggered (Yee-style) grid locations.
//!
//! Cells, nodes, edges and faces are numbered with x varying fastest, then y,
//! then z. Edges and faces are stored as three consecutive blocks (x, y and z
//! oriented), so a vector living on edges has length `nEx + nEy + nEz`.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sparse;

/// A location on the staggered grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridLocation {
    CellCenter,
    Node,
    EdgeX,
    EdgeY,
    EdgeZ,
    FaceX,
    FaceY,
    FaceZ,
}

impl GridLocation {
    /// Short name used in log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CellCenter => "CC",
            Self::Node => "N",
            Self::EdgeX => "Ex",
            Self::EdgeY => "Ey",
            Self::EdgeZ => "Ez",
            Self::FaceX => "Fx",
            Self::FaceY => "Fy",
            Self::FaceZ => "Fz",
        }
    }
}

impl std::fmt::Display for GridLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A rectilinear 3D mesh defined by cell widths along each axis.
#[derive(Debug, Clone)]
pub struct TensorMesh {
    h: [Vec<f64>; 3],
    origin: [f64; 3],
    edge_curl: CscMatrix<f64>,
    nodal_grad: CscMatrix<f64>,
    ave_e2cc: CscMatrix<f64>,
    ave_f2cc: CscMatrix<f64>,
    cell_volumes: DVector<f64>,
}

/// Cell widths `[(cs, npad, -factor), (cs, ncore), (cs, npad, factor)]`.
///
/// Padding cells grow geometrically away from the core region.
pub fn padded_widths(cs: f64, ncore: usize, npad: usize, factor: f64) -> Vec<f64> {
    let pad: Vec<f64> = (1..=npad).map(|k| cs * factor.powi(k as i32)).collect();
    let mut widths: Vec<f64> = pad.iter().rev().copied().collect();
    widths.extend(std::iter::repeat(cs).take(ncore));
    widths.extend(pad);
    widths
}

#[inline]
fn index3(i: usize, j: usize, k: usize, ni: usize, nj: usize) -> usize {
    i + ni * (j + nj * k)
}

/// Linear interpolation weights on a sorted 1D grid, clamped to its ends.
fn interp_weights_1d(grid: &[f64], x: f64) -> [(usize, f64); 2] {
    let n = grid.len();
    if n == 1 {
        return [(0, 1.0), (0, 0.0)];
    }
    let x = x.clamp(grid[0], grid[n - 1]);
    let upper = grid.partition_point(|&g| g <= x).clamp(1, n - 1);
    let lower = upper - 1;
    let w = (x - grid[lower]) / (grid[upper] - grid[lower]);
    [(lower, 1.0 - w), (upper, w)]
}

impl TensorMesh {
    /// Create a mesh from cell widths along x, y and z and its origin (lowest corner).
    pub fn new(h: [Vec<f64>; 3], origin: [f64; 3]) -> Result<Self> {
        for (axis, widths) in h.iter().enumerate() {
            if widths.is_empty() {
                return Err(Error::InvalidMesh(format!("axis {} has no cells", axis)));
            }
            if let Some(w) = widths.iter().find(|w| **w <= 0.0 || !w.is_finite()) {
                return Err(Error::InvalidMesh(format!(
                    "axis {} has a non-positive cell width {}",
                    axis, w
                )));
            }
        }

        let empty = || sparse::from_triplets(0, 0, &[]);
        let mut mesh = Self {
            h,
            origin,
            edge_curl: empty(),
            nodal_grad: empty(),
            ave_e2cc: empty(),
            ave_f2cc: empty(),
            cell_volumes: DVector::zeros(0),
        };
        mesh.cell_volumes = mesh.build_cell_volumes();
        mesh.edge_curl = mesh.build_edge_curl();
        mesh.nodal_grad = mesh.build_nodal_grad();
        mesh.ave_e2cc = mesh.build_ave_e2cc();
        mesh.ave_f2cc = mesh.build_ave_f2cc();
        Ok(mesh)
    }

    /// Mesh with geometric padding on every side, centred on the origin.
    pub fn padded(cs: f64, ncore: [usize; 3], npad: usize, factor: f64) -> Result<Self> {
        let h = [
            padded_widths(cs, ncore[0], npad, factor),
            padded_widths(cs, ncore[1], npad, factor),
            padded_widths(cs, ncore[2], npad, factor),
        ];
        let origin = [
            -h[0].iter().sum::<f64>() / 2.0,
            -h[1].iter().sum::<f64>() / 2.0,
            -h[2].iter().sum::<f64>() / 2.0,
        ];
        Self::new(h, origin)
    }

    /// Uniform mesh with `n` cells of width `cs` along each axis, centred on the origin.
    pub fn uniform(cs: f64, n: [usize; 3]) -> Result<Self> {
        Self::padded(cs, n, 0, 1.0)
    }

    /// Cell widths along `axis`.
    pub fn h(&self, axis: usize) -> &[f64] {
        &self.h[axis]
    }

    /// Lowest corner of the mesh.
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Number of cells along each axis.
    pub fn shape_cells(&self) -> [usize; 3] {
        [self.h[0].len(), self.h[1].len(), self.h[2].len()]
    }

    pub fn n_cells(&self) -> usize {
        let [nx, ny, nz] = self.shape_cells();
        nx * ny * nz
    }

    pub fn n_nodes(&self) -> usize {
        let [nx, ny, nz] = self.shape_cells();
        (nx + 1) * (ny + 1) * (nz + 1)
    }

    /// Number of x-, y- and z-oriented edges.
    pub fn n_edges_per_dir(&self) -> [usize; 3] {
        let [nx, ny, nz] = self.shape_cells();
        [
            nx * (ny + 1) * (nz + 1),
            (nx + 1) * ny * (nz + 1),
            (nx + 1) * (ny + 1) * nz,
        ]
    }

    pub fn n_edges(&self) -> usize {
        self.n_edges_per_dir().iter().sum()
    }

    /// Number of x-, y- and z-normal faces.
    pub fn n_faces_per_dir(&self) -> [usize; 3] {
        let [nx, ny, nz] = self.shape_cells();
        [
            (nx + 1) * ny * nz,
            nx * (ny + 1) * nz,
            nx * ny * (nz + 1),
        ]
    }

    pub fn n_faces(&self) -> usize {
        self.n_faces_per_dir().iter().sum()
    }

    /// Node coordinates along `axis`.
    pub fn vector_nodes(&self, axis: usize) -> Vec<f64> {
        let mut nodes = Vec::with_capacity(self.h[axis].len() + 1);
        let mut x = self.origin[axis];
        nodes.push(x);
        for w in &self.h[axis] {
            x += w;
            nodes.push(x);
        }
        nodes
    }

    /// Cell-centre coordinates along `axis`.
    pub fn vector_cc(&self, axis: usize) -> Vec<f64> {
        self.vector_nodes(axis)
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect()
    }

    /// Coordinates of every cell centre, x fastest.
    pub fn cell_centers(&self) -> Vec<[f64; 3]> {
        self.grid_points(GridLocation::CellCenter)
    }

    /// Coordinates of the points of `loc`, x fastest.
    ///
    /// For an edge or face component the points are the midpoints of that
    /// block; concatenating the X, Y and Z blocks gives every edge (face) in
    /// unknown order.
    pub fn grid_points(&self, loc: GridLocation) -> Vec<[f64; 3]> {
        let ([gx, gy, gz], _) = self.location_grid(loc);
        let mut points = Vec::with_capacity(gx.len() * gy.len() * gz.len());
        for &z in &gz {
            for &y in &gy {
                for &x in &gx {
                    points.push([x, y, z]);
                }
            }
        }
        points
    }

    pub fn cell_volumes(&self) -> &DVector<f64> {
        &self.cell_volumes
    }

    /// Discrete curl mapping edges to faces (nF × nE).
    pub fn edge_curl(&self) -> &CscMatrix<f64> {
        &self.edge_curl
    }

    /// Discrete gradient mapping nodes to edges (nE × nN).
    pub fn nodal_grad(&self) -> &CscMatrix<f64> {
        &self.nodal_grad
    }

    /// Averaging from edges to cell centres (nC × nE), 1/4 per edge component.
    pub fn ave_e2cc(&self) -> &CscMatrix<f64> {
        &self.ave_e2cc
    }

    /// Averaging from faces to cell centres (nC × nF), 1/2 per face component.
    pub fn ave_f2cc(&self) -> &CscMatrix<f64> {
        &self.ave_f2cc
    }

    /// Grid coordinates along x, y, z and the global column offset of `loc`.
    fn location_grid(&self, loc: GridLocation) -> ([Vec<f64>; 3], usize) {
        let n = |a| self.vector_nodes(a);
        let c = |a| self.vector_cc(a);
        let [nex, ney, _] = self.n_edges_per_dir();
        let [nfx, nfy, _] = self.n_faces_per_dir();
        match loc {
            GridLocation::CellCenter => ([c(0), c(1), c(2)], 0),
            GridLocation::Node => ([n(0), n(1), n(2)], 0),
            GridLocation::EdgeX => ([c(0), n(1), n(2)], 0),
            GridLocation::EdgeY => ([n(0), c(1), n(2)], nex),
            GridLocation::EdgeZ => ([n(0), n(1), c(2)], nex + ney),
            GridLocation::FaceX => ([n(0), c(1), c(2)], 0),
            GridLocation::FaceY => ([c(0), n(1), c(2)], nfx),
            GridLocation::FaceZ => ([c(0), c(1), n(2)], nfx + nfy),
        }
    }

    /// Total number of unknowns of the family `loc` belongs to.
    pub fn n_location(&self, loc: GridLocation) -> usize {
        match loc {
            GridLocation::CellCenter => self.n_cells(),
            GridLocation::Node => self.n_nodes(),
            GridLocation::EdgeX | GridLocation::EdgeY | GridLocation::EdgeZ => self.n_edges(),
            GridLocation::FaceX | GridLocation::FaceY | GridLocation::FaceZ => self.n_faces(),
        }
    }

    /// Trilinear interpolation from grid location `loc` to arbitrary points.
    ///
    /// The result has one row per point and `n_location(loc)` columns. Points
    /// outside the grid are clamped onto it.
    pub fn interpolation_matrix(
        &self,
        points: &[[f64; 3]],
        loc: GridLocation,
    ) -> Result<CscMatrix<f64>> {
        if let Some(p) = points.iter().find(|p| p.iter().any(|v| !v.is_finite())) {
            return Err(Error::InvalidArgument(format!(
                "interpolation point {:?} is not finite",
                p
            )));
        }

        let (grid, offset) = self.location_grid(loc);
        let (gx, gy) = (grid[0].len(), grid[1].len());
        let mut triplets = Vec::with_capacity(points.len() * 8);

        for (row, p) in points.iter().enumerate() {
            let wx = interp_weights_1d(&grid[0], p[0]);
            let wy = interp_weights_1d(&grid[1], p[1]);
            let wz = interp_weights_1d(&grid[2], p[2]);
            for &(iz, az) in &wz {
                for &(iy, ay) in &wy {
                    for &(ix, ax) in &wx {
                        let w = ax * ay * az;
                        if w != 0.0 {
                            triplets.push((row, offset + index3(ix, iy, iz, gx, gy), w));
                        }
                    }
                }
            }
        }

        Ok(sparse::from_triplets(
            points.len(),
            self.n_location(loc),
            &triplets,
        ))
    }

    fn build_cell_volumes(&self) -> DVector<f64> {
        let [nx, ny, nz] = self.shape_cells();
        let mut vol = DVector::zeros(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    vol[index3(i, j, k, nx, ny)] = self.h[0][i] * self.h[1][j] * self.h[2][k];
                }
            }
        }
        vol
    }

    fn edge_index(&self) -> impl Fn(usize, usize, usize, usize) -> usize {
        let [nx, ny, _] = self.shape_cells();
        let [nex, ney, _] = self.n_edges_per_dir();
        move |dir, i, j, k| match dir {
            0 => index3(i, j, k, nx, ny + 1),
            1 => nex + index3(i, j, k, nx + 1, ny),
            _ => nex + ney + index3(i, j, k, nx + 1, ny + 1),
        }
    }

    fn face_index(&self) -> impl Fn(usize, usize, usize, usize) -> usize {
        let [nx, ny, _] = self.shape_cells();
        let [nfx, nfy, _] = self.n_faces_per_dir();
        move |dir, i, j, k| match dir {
            0 => index3(i, j, k, nx + 1, ny),
            1 => nfx + index3(i, j, k, nx, ny + 1),
            _ => nfx + nfy + index3(i, j, k, nx, ny),
        }
    }

    fn build_edge_curl(&self) -> CscMatrix<f64> {
        let [nx, ny, nz] = self.shape_cells();
        let [hx, hy, hz] = [&self.h[0], &self.h[1], &self.h[2]];
        let e = self.edge_index();
        let f = self.face_index();
        let mut t = Vec::with_capacity(4 * self.n_faces());

        // (curl E)_x = dEz/dy - dEy/dz
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..=nx {
                    let row = f(0, i, j, k);
                    t.push((row, e(2, i, j + 1, k), 1.0 / hy[j]));
                    t.push((row, e(2, i, j, k), -1.0 / hy[j]));
                    t.push((row, e(1, i, j, k + 1), -1.0 / hz[k]));
                    t.push((row, e(1, i, j, k), 1.0 / hz[k]));
                }
            }
        }
        // (curl E)_y = dEx/dz - dEz/dx
        for k in 0..nz {
            for j in 0..=ny {
                for i in 0..nx {
                    let row = f(1, i, j, k);
                    t.push((row, e(0, i, j, k + 1), 1.0 / hz[k]));
                    t.push((row, e(0, i, j, k), -1.0 / hz[k]));
                    t.push((row, e(2, i + 1, j, k), -1.0 / hx[i]));
                    t.push((row, e(2, i, j, k), 1.0 / hx[i]));
                }
            }
        }
        // (curl E)_z = dEy/dx - dEx/dy
        for k in 0..=nz {
            for j in 0..ny {
                for i in 0..nx {
                    let row = f(2, i, j, k);
                    t.push((row, e(1, i + 1, j, k), 1.0 / hx[i]));
                    t.push((row, e(1, i, j, k), -1.0 / hx[i]));
                    t.push((row, e(0, i, j + 1, k), -1.0 / hy[j]));
                    t.push((row, e(0, i, j, k), 1.0 / hy[j]));
                }
            }
        }

        sparse::from_triplets(self.n_faces(), self.n_edges(), &t)
    }

    fn build_nodal_grad(&self) -> CscMatrix<f64> {
        let [nx, ny, nz] = self.shape_cells();
        let e = self.edge_index();
        let node = |i, j, k| index3(i, j, k, nx + 1, ny + 1);
        let mut t = Vec::with_capacity(2 * self.n_edges());

        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    if i < nx {
                        let w = 1.0 / self.h[0][i];
                        t.push((e(0, i, j, k), node(i + 1, j, k), w));
                        t.push((e(0, i, j, k), node(i, j, k), -w));
                    }
                    if j < ny {
                        let w = 1.0 / self.h[1][j];
                        t.push((e(1, i, j, k), node(i, j + 1, k), w));
                        t.push((e(1, i, j, k), node(i, j, k), -w));
                    }
                    if k < nz {
                        let w = 1.0 / self.h[2][k];
                        t.push((e(2, i, j, k), node(i, j, k + 1), w));
                        t.push((e(2, i, j, k), node(i, j, k), -w));
                    }
                }
            }
        }

        sparse::from_triplets(self.n_edges(), self.n_nodes(), &t)
    }

    fn build_ave_e2cc(&self) -> CscMatrix<f64> {
        let [nx, ny, nz] = self.shape_cells();
        let e = self.edge_index();
        let mut t = Vec::with_capacity(12 * self.n_cells());

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let row = index3(i, j, k, nx, ny);
                    for a in 0..2 {
                        for b in 0..2 {
                            t.push((row, e(0, i, j + a, k + b), 0.25));
                            t.push((row, e(1, i + a, j, k + b), 0.25));
                            t.push((row, e(2, i + a, j + b, k), 0.25));
                        }
                    }
                }
            }
        }

        sparse::from_triplets(self.n_cells(), self.n_edges(), &t)
    }

    fn build_ave_f2cc(&self) -> CscMatrix<f64> {
        let [nx, ny, nz] = self.shape_cells();
        let f = self.face_index();
        let mut t = Vec::with_capacity(6 * self.n_cells());

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let row = index3(i, j, k, nx, ny);
                    for a in 0..2 {
                        t.push((row, f(0, i + a, j, k), 0.5));
                        t.push((row, f(1, i, j + a, k), 0.5));
                        t.push((row, f(2, i, j, k + a), 0.5));
                    }
                }
            }
        }

        sparse::from_triplets(self.n_cells(), self.n_faces(), &t)
    }
}
