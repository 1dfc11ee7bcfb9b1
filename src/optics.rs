//! Closed-form linear transfer maps.
//!
//! Every map is a 7×7 matrix acting on `(x, px, y, py, tau, p, 1)`; the last
//! coordinate is homogeneous so offsets can be expressed as matrix products.
//! Batched builders broadcast all of their inputs against each other and then
//! evaluate one matrix per sample.

use crate::batch::{broadcast_shape_of, Batched};
use crate::error::Result;
use crate::{Float, Matrix7, ELECTRON_MASS_EV};
use itertools::izip;

// below this |k l^2| the Taylor candidates replace the closed forms
#[cfg(feature = "dprec")]
const SERIES_THRESHOLD: Float = 1e-4;
#[cfg(not(feature = "dprec"))]
const SERIES_THRESHOLD: Float = 1e-2;

/// Principal solutions of Hill's equation `u'' + k u = 0` over a length `l`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HillSolution {
    /// Cos-like solution, `u(0) = 1, u'(0) = 0`.
    pub c: Float,
    /// Sin-like solution, `u(0) = 0, u'(0) = 1`.
    pub s: Float,
    /// `(1 - c) / k`
    pub d: Float,
    /// `(l - s) / k`
    pub f: Float,
}

#[inline(always)]
fn select(cond: bool, a: HillSolution, b: HillSolution) -> HillSolution {
    if cond {
        a
    } else {
        b
    }
}

/// Evaluate the trigonometric, hyperbolic and series candidates and pick the
/// one valid for the sign and magnitude of `k`. Well defined for `k = 0` and
/// `l = 0`.
#[inline(always)]
pub fn hill_solution(k: Float, l: Float) -> HillSolution {
    let kl2 = k * l * l;
    let sqrt_k = k.abs().sqrt();
    let phi = sqrt_k * l;

    let (sin_phi, cos_phi) = phi.sin_cos();
    let s_trig = sin_phi / sqrt_k;
    let trig = HillSolution {
        c: cos_phi,
        s: s_trig,
        d: (1.0 - cos_phi) / k,
        f: (l - s_trig) / k,
    };

    let cosh_phi = phi.cosh();
    let s_hyp = phi.sinh() / sqrt_k;
    let hyp = HillSolution {
        c: cosh_phi,
        s: s_hyp,
        d: (1.0 - cosh_phi) / k,
        f: (l - s_hyp) / k,
    };

    let l2 = l * l;
    let series = HillSolution {
        c: 1.0 - kl2 / 2.0 + kl2 * kl2 / 24.0,
        s: l * (1.0 - kl2 / 6.0 + kl2 * kl2 / 120.0),
        d: l2 * (0.5 - kl2 / 24.0 + kl2 * kl2 / 720.0),
        f: l2 * l * (1.0 / 6.0 - kl2 / 120.0 + kl2 * kl2 / 5040.0),
    };

    select(
        kl2.abs() < SERIES_THRESHOLD,
        series,
        select(k > 0.0, trig, hyp),
    )
}

/// `1 / gamma^2` and `beta` of the reference particle. A zero energy is
/// treated as `1 / gamma^2 = 1`.
#[inline(always)]
pub fn relativistic_factors(energy: Float) -> (Float, Float) {
    let gamma = energy / ELECTRON_MASS_EV;
    let igamma2 = if gamma != 0.0 {
        1.0 / (gamma * gamma)
    } else {
        1.0
    };
    (igamma2, (1.0 - igamma2).sqrt())
}

/// Rotation of the transverse planes by `angle` around the design axis.
pub fn rotation_matrix(angle: Float) -> Matrix7 {
    let (sn, cs) = angle.sin_cos();
    let mut tm = Matrix7::identity();
    tm[(0, 0)] = cs;
    tm[(0, 2)] = sn;
    tm[(1, 1)] = cs;
    tm[(1, 3)] = sn;
    tm[(2, 0)] = -sn;
    tm[(2, 2)] = cs;
    tm[(3, 1)] = -sn;
    tm[(3, 3)] = cs;
    tm
}

/// Conjugate `r` with the tilt rotation, `Rot^T · R · Rot`. A zero tilt is an
/// exact identity operation.
#[inline(always)]
pub fn rotate(r: &Matrix7, tilt: Float) -> Matrix7 {
    let rot = rotation_matrix(tilt);
    rot.transpose() * r * rot
}

/// Entry and exit translations for an element offset by `(dx, dy)`.
pub fn misalignment_matrices(offset: [Float; 2]) -> (Matrix7, Matrix7) {
    let mut entry = Matrix7::identity();
    entry[(0, 6)] = -offset[0];
    entry[(2, 6)] = -offset[1];
    let mut exit = Matrix7::identity();
    exit[(0, 6)] = offset[0];
    exit[(2, 6)] = offset[1];
    (entry, exit)
}

/// Thin edge focusing of a bending magnet pole face rotated by `edge`.
pub fn dipole_edge_matrix(hx: Float, edge: Float) -> Matrix7 {
    let mut tm = Matrix7::identity();
    let focus = hx * edge.tan();
    tm[(1, 0)] = focus;
    tm[(3, 2)] = -focus;
    tm
}

/// Single-sample map of a drift.
pub fn drift(length: Float, energy: Float) -> Matrix7 {
    let (igamma2, beta) = relativistic_factors(energy);
    let mut tm = Matrix7::identity();
    tm[(0, 1)] = length;
    tm[(2, 3)] = length;
    tm[(4, 5)] = -length / (beta * beta) * igamma2;
    tm
}

/// Single-sample map of a combined-function magnet: quadrupole strength `k1`,
/// horizontal curvature `hx`, tilted by `tilt`.
pub fn rmatrix(length: Float, k1: Float, hx: Float, tilt: Float, energy: Float) -> Matrix7 {
    let (igamma2, beta) = relativistic_factors(energy);

    let kx2 = k1 + hx * hx;
    let ky2 = -k1;
    let x = hill_solution(kx2, length);
    let y = hill_solution(ky2, length);

    let mut tm = Matrix7::identity();
    tm[(0, 0)] = x.c;
    tm[(0, 1)] = x.s;
    tm[(0, 5)] = hx * x.d / beta;
    tm[(1, 0)] = -kx2 * x.s;
    tm[(1, 1)] = x.c;
    tm[(1, 5)] = x.s * hx / beta;
    tm[(2, 2)] = y.c;
    tm[(2, 3)] = y.s;
    tm[(3, 2)] = -ky2 * y.s;
    tm[(3, 3)] = y.c;

    // path length dependence on the transverse coordinates
    tm[(4, 0)] = x.s * hx / beta;
    tm[(4, 1)] = hx * x.d / beta;
    tm[(4, 5)] = hx * hx * x.f / (beta * beta) - length / (beta * beta) * igamma2;

    rotate(&tm, tilt)
}

/// Batched [`rmatrix`]. The output shape is the broadcast of all input shapes.
pub fn base_rmatrix(
    length: &Batched<Float>,
    k1: &Batched<Float>,
    hx: &Batched<Float>,
    tilt: &Batched<Float>,
    energy: &Batched<Float>,
) -> Result<Batched<Matrix7>> {
    let shape = broadcast_shape_of(&[
        length.shape(),
        k1.shape(),
        hx.shape(),
        tilt.shape(),
        energy.shape(),
    ])?;
    let length = length.broadcast_to(&shape)?;
    let k1 = k1.broadcast_to(&shape)?;
    let hx = hx.broadcast_to(&shape)?;
    let tilt = tilt.broadcast_to(&shape)?;
    let energy = energy.broadcast_to(&shape)?;

    let maps = izip!(
        length.iter(),
        k1.iter(),
        hx.iter(),
        tilt.iter(),
        energy.iter()
    )
    .map(|(&l, &k, &h, &t, &e)| rmatrix(l, k, h, t, e))
    .collect();
    Batched::from_vec(shape, maps)
}

/// Batched [`drift`].
pub fn drift_matrix(length: &Batched<Float>, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
    length.zip_map(energy, |&l, &e| drift(l, e))
}

/// Conjugate every map with the entry/exit translations of `misalignment`.
/// An all-zero misalignment returns the maps unchanged.
pub fn misalign(
    maps: Batched<Matrix7>,
    misalignment: &Batched<[Float; 2]>,
) -> Result<Batched<Matrix7>> {
    if misalignment.iter().all(|m| m[0] == 0.0 && m[1] == 0.0) {
        return Ok(maps);
    }
    maps.zip_map(misalignment, |r, &offset| {
        let (entry, exit) = misalignment_matrices(offset);
        exit * r * entry
    })
}

/// `R_n · … · R_1` for maps given in tracking order.
pub fn chain(maps: &[Batched<Matrix7>]) -> Result<Batched<Matrix7>> {
    maps.iter()
        .try_fold(Batched::scalar(Matrix7::identity()), |total, next| {
            next.zip_map(&total, |r, acc| r * acc)
        })
}
