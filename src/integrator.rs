//! Symplectic particle integrator.
//!
//! Particles are converted to local coordinates `(x, px, y, py, z, pz)`,
//! where `pz` is the relative momentum deviation and `z` the longitudinal
//! position, pushed through the element in `num_steps` kicks and converted
//! back. Each step is exact for the momentum the particle carries, so the
//! chromatic terms the linear map drops are kept.

use crate::batch::{broadcast_shape_of, Batched};
use crate::beam::{Moments, ParticleBeam};
use crate::error::{Result, TrackError};
use crate::optics::hill_solution;
use crate::{Float, Vector7, ELECTRON_MASS_EV, PRTL_CHUNK_SIZE};
use itertools::izip;
use rayon::prelude::*;

/// One particle in the local convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalCoordinates {
    pub x: Float,
    pub px: Float,
    pub y: Float,
    pub py: Float,
    pub z: Float,
    pub pz: Float,
}

/// Reference momentum `p0 c` in eV for a reference energy in eV.
#[inline(always)]
pub fn reference_momentum(energy: Float) -> Float {
    (energy * energy - ELECTRON_MASS_EV * ELECTRON_MASS_EV).sqrt()
}

/// Convert `(x, px, y, py, tau, p, 1)` to local coordinates.
#[inline(always)]
pub fn to_local(p: &Vector7, p0c: Float) -> LocalCoordinates {
    let m2 = ELECTRON_MASS_EV * ELECTRON_MASS_EV;
    let e0 = (p0c * p0c + m2).sqrt();
    let e = e0 + p[5] * p0c;
    let momentum = (e * e - m2).sqrt();
    let beta = momentum / e;
    LocalCoordinates {
        x: p[0],
        px: p[1],
        y: p[2],
        py: p[3],
        z: -beta * p[4],
        pz: (momentum - p0c) / p0c,
    }
}

/// Inverse of [`to_local`]. The homogeneous coordinate is reset to one.
#[inline(always)]
pub fn from_local(c: &LocalCoordinates, p0c: Float) -> Vector7 {
    let m2 = ELECTRON_MASS_EV * ELECTRON_MASS_EV;
    let e0 = (p0c * p0c + m2).sqrt();
    let momentum = (1.0 + c.pz) * p0c;
    let e = (momentum * momentum + m2).sqrt();
    let beta = momentum / e;
    Vector7::from_column_slice(&[c.x, c.px, c.y, c.py, -c.z / beta, (e - e0) / p0c, 1.0])
}

/// Move a particle from the lab frame into the frame of an element shifted
/// by `offset` and rolled by `tilt`.
#[inline(always)]
pub fn offset_particle_set(c: &mut LocalCoordinates, offset: [Float; 2], tilt: Float) {
    let (s, co) = tilt.sin_cos();
    let xi = c.x - offset[0];
    let yi = c.y - offset[1];
    let (px, py) = (c.px, c.py);
    c.x = xi * co + yi * s;
    c.y = -xi * s + yi * co;
    c.px = px * co + py * s;
    c.py = -px * s + py * co;
}

/// Inverse of [`offset_particle_set`].
#[inline(always)]
pub fn offset_particle_unset(c: &mut LocalCoordinates, offset: [Float; 2], tilt: Float) {
    let (s, co) = tilt.sin_cos();
    let (x, y, px, py) = (c.x, c.y, c.px, c.py);
    c.x = x * co - y * s + offset[0];
    c.y = x * s + y * co + offset[1];
    c.px = px * co - py * s;
    c.py = px * s + py * co;
}

/// `sqrt(1 + x) - 1` without cancellation for small `x`.
#[inline(always)]
fn sqrt_one(x: Float) -> Float {
    let sq = (1.0 + x).sqrt();
    x / (1.0 + sq)
}

/// Path length correction of a particle with momentum deviation `pz` over a
/// step `ds`, switching to a series expansion at low deviation.
#[inline(always)]
pub fn low_energy_z_correction(pz: Float, p0c: Float, ds: Float) -> Float {
    let mass = ELECTRON_MASS_EV;
    let p = (1.0 + pz) * p0c;
    let beta = p / (p * p + mass * mass).sqrt();
    let e_tot = (p0c * p0c + mass * mass).sqrt();
    let beta0 = p0c / e_tot;
    let mass_ratio2 = (mass / e_tot).powi(2);

    let evaluation = mass * (beta0 * pz).powi(2);
    if evaluation < 3e-7 * e_tot {
        ds * pz
            * (1.0 - 1.5 * pz * beta0 * beta0
                + pz * pz * beta0 * beta0 * (2.0 * beta0 * beta0 - mass_ratio2 / 2.0))
            * mass_ratio2
    } else {
        ds * (beta - beta0) / beta0
    }
}

/// Field free drift of length `length`, exact in the transverse angles.
#[inline(always)]
pub fn exact_drift(c: &mut LocalCoordinates, length: Float, p0c: Float) {
    let mass = ELECTRON_MASS_EV;
    let p = 1.0 + c.pz;
    let px = c.px / p;
    let py = c.py / p;
    let pxy2 = px * px + py * py;
    let pl = (1.0 - pxy2).sqrt();
    c.x += length * px / pl;
    c.y += length * py / pl;
    // beta / beta0 - 1 / pl, rearranged around two small quantities
    let beta_term =
        sqrt_one(mass * mass * (2.0 * c.pz + c.pz * c.pz) / ((p0c * p).powi(2) + mass * mass));
    c.z += length * (beta_term + sqrt_one(-pxy2) / pl);
}

/// Transverse map and path length coefficients of one quadrupole plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadrupoleCoefficients {
    /// `[[a11, a12], [a21, a22]]` acting on `(u, pu)`.
    pub map: [[Float; 2]; 2],
    /// `z += c1 u^2 + c2 u pu + c3 pu^2`
    pub dz: [Float; 3],
}

/// Coefficients for `u'' - k u = 0` over `l` at relative momentum `rel_p`.
/// Positive `k` defocuses.
#[inline(always)]
pub fn quadrupole_coefficients(k: Float, l: Float, rel_p: Float) -> QuadrupoleCoefficients {
    let h = hill_solution(-k, l);
    let (c, s) = (h.c, h.s);
    QuadrupoleCoefficients {
        map: [[c, s / rel_p], [k * s * rel_p, c]],
        dz: [
            k * (-c * s + l) / 4.0,
            -k * s * s / (2.0 * rel_p),
            -(c * s + l) / (4.0 * rel_p * rel_p),
        ],
    }
}

/// One thick quadrupole step of length `step` with geometric strength `k1`.
#[inline(always)]
pub fn quadrupole_step(c: &mut LocalCoordinates, k1: Float, step: Float, p0c: Float) {
    let rel_p = 1.0 + c.pz;
    let k = k1 / rel_p;

    // horizontal plane focuses for positive k1
    let tx = quadrupole_coefficients(-k, step, rel_p);
    let ty = quadrupole_coefficients(k, step, rel_p);

    let (x, px, y, py) = (c.x, c.px, c.y, c.py);
    c.z += tx.dz[0] * x * x + tx.dz[1] * x * px + tx.dz[2] * px * px;
    c.z += ty.dz[0] * y * y + ty.dz[1] * y * py + ty.dz[2] * py * py;

    c.x = tx.map[0][0] * x + tx.map[0][1] * px;
    c.px = tx.map[1][0] * x + tx.map[1][1] * px;
    c.y = ty.map[0][0] * y + ty.map[0][1] * py;
    c.py = ty.map[1][0] * y + ty.map[1][1] * py;

    c.z += low_energy_z_correction(c.pz, p0c, step);
}

/// Parameters of a quadrupole for one batch entry.
#[derive(Debug, Clone, Copy)]
struct QuadSlice {
    length: Float,
    k1: Float,
    offset: [Float; 2],
    tilt: Float,
    p0c: Float,
}

fn quadrupole_particle(p: &mut Vector7, q: &QuadSlice, num_steps: usize) {
    let mut c = to_local(p, q.p0c);
    offset_particle_set(&mut c, q.offset, q.tilt);
    let step = q.length / num_steps as Float;
    for _ in 0..num_steps {
        quadrupole_step(&mut c, q.k1, step, q.p0c);
    }
    offset_particle_unset(&mut c, q.offset, q.tilt);
    *p = from_local(&c, q.p0c);
}

/// Track a particle beam through a (possibly misaligned and tilted)
/// quadrupole in `num_steps` equal steps.
pub fn track_quadrupole(
    beam: &ParticleBeam,
    length: &Batched<Float>,
    k1: &Batched<Float>,
    misalignment: &Batched<[Float; 2]>,
    tilt: &Batched<Float>,
    num_steps: usize,
) -> Result<ParticleBeam> {
    if num_steps == 0 {
        return Err(TrackError::invalid_configuration(
            "the integrator needs at least one step",
        ));
    }
    let energy = Moments::energy(beam);
    let shape = broadcast_shape_of(&[
        beam.batch_shape(),
        energy.shape(),
        length.shape(),
        k1.shape(),
        misalignment.shape(),
        tilt.shape(),
    ])?;
    let mut particles = beam.particles().broadcast_to(&shape)?;
    let energy = energy.broadcast_to(&shape)?;
    let length = length.broadcast_to(&shape)?;
    let k1 = k1.broadcast_to(&shape)?;
    let misalignment = misalignment.broadcast_to(&shape)?;
    let tilt = tilt.broadcast_to(&shape)?;

    for (ensemble, &e, &l, &k, &offset, &t) in izip!(
        particles.as_mut_slice().iter_mut(),
        energy.iter(),
        length.iter(),
        k1.iter(),
        misalignment.iter(),
        tilt.iter()
    ) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(ensemble.len(), beam.num_particles());
        }
        let q = QuadSlice {
            length: l,
            k1: k,
            offset,
            tilt: t,
            p0c: reference_momentum(e),
        };
        ensemble.par_chunks_mut(PRTL_CHUNK_SIZE).for_each(|chunk| {
            for p in chunk.iter_mut() {
                quadrupole_particle(p, &q, num_steps);
            }
        });
    }

    beam.with_particles(particles)
}

/// Track a particle beam through a field free drift.
pub fn track_drift(beam: &ParticleBeam, length: &Batched<Float>) -> Result<ParticleBeam> {
    let energy = Moments::energy(beam);
    let shape = broadcast_shape_of(&[beam.batch_shape(), energy.shape(), length.shape()])?;
    let mut particles = beam.particles().broadcast_to(&shape)?;
    let energy = energy.broadcast_to(&shape)?;
    let length = length.broadcast_to(&shape)?;

    for (ensemble, &e, &l) in izip!(
        particles.as_mut_slice().iter_mut(),
        energy.iter(),
        length.iter()
    ) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(ensemble.len(), beam.num_particles());
        }
        let p0c = reference_momentum(e);
        ensemble.par_chunks_mut(PRTL_CHUNK_SIZE).for_each(|chunk| {
            for p in chunk.iter_mut() {
                let mut c = to_local(p, p0c);
                exact_drift(&mut c, l, p0c);
                *p = from_local(&c, p0c);
            }
        });
    }

    beam.with_particles(particles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optics;
    use crate::E_TOL;
    use approx::assert_abs_diff_eq;

    fn particle(v: [Float; 6]) -> Vector7 {
        Vector7::from_column_slice(&[v[0], v[1], v[2], v[3], v[4], v[5], 1.0])
    }

    #[test]
    fn local_round_trip() {
        let p0c = reference_momentum(1e8);
        let p = particle([1e-3, -2e-4, 5e-4, 1e-4, 1e-5, 2e-3]);
        let back = from_local(&to_local(&p, p0c), p0c);
        for i in 0..7 {
            assert_abs_diff_eq!(back[i], p[i], epsilon = E_TOL);
        }
    }

    #[test]
    fn offset_particle_set_then_unset_is_identity() {
        let mut c = LocalCoordinates {
            x: 1e-3,
            px: 2e-4,
            y: -3e-4,
            py: 1e-5,
            z: 0.0,
            pz: 0.0,
        };
        let orig = c;
        offset_particle_set(&mut c, [1e-4, -2e-4], 0.3);
        assert!((c.x - orig.x).abs() > 1e-6);
        offset_particle_unset(&mut c, [1e-4, -2e-4], 0.3);
        assert_abs_diff_eq!(c.x, orig.x, epsilon = E_TOL);
        assert_abs_diff_eq!(c.y, orig.y, epsilon = E_TOL);
        assert_abs_diff_eq!(c.px, orig.px, epsilon = E_TOL);
        assert_abs_diff_eq!(c.py, orig.py, epsilon = E_TOL);
    }

    #[test]
    fn z_correction_is_continuous_across_branches() {
        let p0c = reference_momentum(1e8);
        let ds = 0.5;
        // straddle the switch from the series to the closed form
        let e_tot = (p0c * p0c + ELECTRON_MASS_EV * ELECTRON_MASS_EV).sqrt();
        let beta0 = p0c / e_tot;
        let pz_switch = (3e-7 * e_tot / ELECTRON_MASS_EV).sqrt() / beta0;
        let below = low_energy_z_correction(pz_switch * 0.99999, p0c, ds);
        let above = low_energy_z_correction(pz_switch * 1.00001, p0c, ds);
        assert!((below - above).abs() < 1e-4 * below.abs());
        assert_eq!(low_energy_z_correction(0.0, p0c, ds), 0.0);
    }

    #[test]
    fn drift_is_exact_for_paraxial_particles() {
        let p0c = reference_momentum(1e8);
        let mut c = LocalCoordinates {
            x: 1e-3,
            px: 1e-4,
            y: 0.0,
            py: -1e-4,
            z: 0.0,
            pz: 0.0,
        };
        exact_drift(&mut c, 2.0, p0c);
        assert_abs_diff_eq!(c.x, 1e-3 + 2.0 * 1e-4, epsilon = 1e-10);
        assert_abs_diff_eq!(c.y, -2.0 * 1e-4, epsilon = 1e-10);
    }

    #[test]
    fn single_step_matches_matrix_on_momentum() {
        // an on-momentum particle sees the linear transverse map exactly
        let p0c = reference_momentum(1e9);
        let k1 = 3.0;
        let l = 0.2;
        let mut c = LocalCoordinates {
            x: 1e-4,
            px: 1e-5,
            y: -1e-4,
            py: 2e-5,
            z: 0.0,
            pz: 0.0,
        };
        quadrupole_step(&mut c, k1, l, p0c);
        let tm = optics::rmatrix(l, k1, 0.0, 0.0, 1e9);
        let v = tm * particle([1e-4, 1e-5, -1e-4, 2e-5, 0.0, 0.0]);
        assert_abs_diff_eq!(c.x, v[0], epsilon = E_TOL);
        assert_abs_diff_eq!(c.px, v[1], epsilon = E_TOL);
        assert_abs_diff_eq!(c.y, v[2], epsilon = E_TOL);
        assert_abs_diff_eq!(c.py, v[3], epsilon = E_TOL);
    }

    #[test]
    fn quadrupole_coefficients_are_symplectic_and_finite_at_zero() {
        for &k in [-3.0, 0.0, 1e-9, 2.5].iter() {
            let q = quadrupole_coefficients(k, 0.4, 1.01);
            let det = q.map[0][0] * q.map[1][1] - q.map[0][1] * q.map[1][0];
            assert_abs_diff_eq!(det, 1.0, epsilon = 1e-10);
            assert!(q.dz.iter().all(|v| v.is_finite()));
        }
        let q = quadrupole_coefficients(0.0, 0.4, 1.0);
        assert_eq!(q.map, [[1.0, 0.4], [0.0, 1.0]]);
        assert_eq!(q.dz[0], 0.0);
    }

    #[test]
    fn zero_steps_is_rejected() {
        let beam = ParticleBeam::new(
            Batched::scalar(vec![particle([0.0; 6])]),
            Batched::scalar(1e8),
            Batched::scalar(vec![0.0]),
        )
        .unwrap();
        let res = track_quadrupole(
            &beam,
            &Batched::scalar(0.1),
            &Batched::scalar(1.0),
            &Batched::scalar([0.0, 0.0]),
            &Batched::scalar(0.0),
            0,
        );
        assert!(matches!(res, Err(TrackError::InvalidConfiguration(_))));
    }

    #[test]
    fn batched_quadrupole_broadcasts_strengths() {
        let beam = ParticleBeam::new(
            Batched::scalar(vec![particle([1e-4, 0.0, 1e-4, 0.0, 0.0, 0.0])]),
            Batched::scalar(1e8),
            Batched::scalar(vec![0.0]),
        )
        .unwrap();
        let out = track_quadrupole(
            &beam,
            &Batched::scalar(0.2),
            &Batched::from(vec![-4.0, 0.0, 4.0]),
            &Batched::scalar([0.0, 0.0]),
            &Batched::scalar(0.0),
            5,
        )
        .unwrap();
        assert_eq!(out.batch_shape(), &[3]);
        let xs: Vec<Float> = out.particles().iter().map(|e| e[0][0]).collect();
        // defocusing, free, focusing
        assert!(xs[0] > xs[1]);
        assert!(xs[2] < xs[1]);
        assert_abs_diff_eq!(xs[1], 1e-4, epsilon = E_TOL);
    }
}
