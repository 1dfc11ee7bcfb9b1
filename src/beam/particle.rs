use super::{BeamParameters, Moments, ParameterBeam};
use crate::batch::{broadcast_shape_of, Batched};
use crate::error::{Result, TrackError};
use crate::{Float, Matrix6, Matrix7, Vector6, Vector7, PRTL_CHUNK_SIZE};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Ensemble of macro particles. Every batch entry holds the same number of
/// particles, each a homogeneous 7-vector `(x, px, y, py, tau, p, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleBeam {
    shape: Vec<usize>,
    num_particles: usize,
    particles: Batched<Vec<Vector7>>,
    particle_charges: Batched<Vec<Float>>,
    energy: Batched<Float>,
}

impl ParticleBeam {
    pub fn new(
        particles: Batched<Vec<Vector7>>,
        energy: Batched<Float>,
        particle_charges: Batched<Vec<Float>>,
    ) -> Result<Self> {
        let num_particles = particles.iter().next().map_or(0, |p| p.len());
        if particles.iter().any(|p| p.len() != num_particles) {
            return Err(TrackError::invalid_configuration(
                "every batch entry must hold the same number of particles",
            ));
        }
        if particle_charges.iter().any(|q| q.len() != num_particles) {
            return Err(TrackError::invalid_configuration(format!(
                "expected {} particle charges per batch entry",
                num_particles
            )));
        }
        let shape = broadcast_shape_of(&[
            particles.shape(),
            energy.shape(),
            particle_charges.shape(),
        ])?;
        Ok(ParticleBeam {
            particles: particles.broadcast_to(&shape)?,
            particle_charges: particle_charges.broadcast_to(&shape)?,
            energy: energy.broadcast_to(&shape)?,
            num_particles,
            shape,
        })
    }

    /// Draw `num_particles` particles per batch entry from the Gaussian
    /// described by `params`.
    pub fn from_parameters<R: Rng>(
        num_particles: usize,
        params: &BeamParameters,
        rng: &mut R,
    ) -> Result<Self> {
        let m = params.moments()?;
        ParticleBeam::sample(
            &m.shape,
            &m.mu,
            &m.cov,
            m.energy,
            &m.total_charge,
            num_particles,
            rng,
        )
    }

    /// Each particle is `mu + L z` with `z` six standard normals and `L` a
    /// factor of the full covariance, so cross-plane correlations survive.
    pub(crate) fn sample<R: Rng>(
        shape: &[usize],
        mu: &[Vector6],
        cov: &[Matrix6],
        energy: Batched<Float>,
        total_charge: &Batched<Float>,
        num_particles: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if num_particles == 0 {
            return Err(TrackError::invalid_configuration(
                "a particle beam needs at least one particle",
            ));
        }

        let mut particles = Vec::with_capacity(mu.len());
        for (m, c) in mu.iter().zip(cov.iter()) {
            let l = covariance_factor(c);
            let ensemble: Vec<Vector7> = (0..num_particles)
                .map(|_| {
                    let z = Vector6::from_fn(|_, _| rng.sample::<Float, _>(StandardNormal));
                    let x = m + l * z;
                    Vector7::from_column_slice(&[x[0], x[1], x[2], x[3], x[4], x[5], 1.0])
                })
                .collect();
            particles.push(ensemble);
        }

        let n = num_particles as Float;
        let particle_charges = total_charge.map(|&q| vec![q / n; num_particles]);
        Ok(ParticleBeam {
            particles: Batched::from_vec(shape.to_vec(), particles)?,
            particle_charges,
            energy,
            num_particles,
            shape: shape.to_vec(),
        })
    }

    pub fn batch_shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    /// Full shape of the particle array: batch shape, then `[N, 7]`.
    pub fn particles_shape(&self) -> Vec<usize> {
        let mut shape = self.shape.clone();
        shape.push(self.num_particles);
        shape.push(7);
        shape
    }

    pub fn particles(&self) -> &Batched<Vec<Vector7>> {
        &self.particles
    }

    pub fn particle_charges(&self) -> &Batched<Vec<Float>> {
        &self.particle_charges
    }

    /// Multiply every particle with the map of its batch entry.
    pub fn transform(&self, maps: &Batched<Matrix7>) -> Result<ParticleBeam> {
        let shape = broadcast_shape_of(&[&self.shape, maps.shape()])?;
        let maps = maps.broadcast_to(&shape)?;
        let mut particles = self.particles.broadcast_to(&shape)?;

        for (tm, ensemble) in maps.iter().zip(particles.as_mut_slice().iter_mut()) {
            ensemble.par_chunks_mut(PRTL_CHUNK_SIZE).for_each(|chunk| {
                for p in chunk.iter_mut() {
                    *p = tm * *p;
                }
            });
        }

        Ok(ParticleBeam {
            particles,
            particle_charges: self.particle_charges.broadcast_to(&shape)?,
            energy: self.energy.broadcast_to(&shape)?,
            num_particles: self.num_particles,
            shape,
        })
    }

    /// Replace the coordinates while keeping charges and energy. Used by the
    /// integrator, which updates particles in place per batch entry.
    pub(crate) fn with_particles(&self, particles: Batched<Vec<Vector7>>) -> Result<ParticleBeam> {
        let shape = particles.shape().to_vec();
        Ok(ParticleBeam {
            particle_charges: self.particle_charges.broadcast_to(&shape)?,
            energy: self.energy.broadcast_to(&shape)?,
            num_particles: self.num_particles,
            particles,
            shape,
        })
    }

    /// Prepend `extra` batch dimensions, copying the ensemble into every new
    /// entry.
    pub fn broadcast(&self, extra: &[usize]) -> ParticleBeam {
        let mut shape = extra.to_vec();
        shape.extend_from_slice(&self.shape);
        ParticleBeam {
            particles: self.particles.broadcast(extra),
            particle_charges: self.particle_charges.broadcast(extra),
            energy: self.energy.broadcast(extra),
            num_particles: self.num_particles,
            shape,
        }
    }

    /// Reduce the ensemble to its mean and (N-1 normalised) covariance.
    pub fn as_parameter_beam(&self) -> Result<ParameterBeam> {
        ParameterBeam::new(self.mu(), self.cov(), self.energy.clone(), self.total_charge())
    }
}

/// A matrix `L` with `L L^T = c`. Cholesky when `c` is positive definite;
/// a singular covariance (a zero sigma, a fully correlated pair) falls back
/// to the eigen decomposition with negative rounding noise clamped to zero.
fn covariance_factor(c: &Matrix6) -> Matrix6 {
    if let Some(chol) = c.cholesky() {
        return chol.l();
    }
    let eigen = c.symmetric_eigen();
    let roots = eigen.eigenvalues.map(|v| v.max(0.0).sqrt());
    eigen.eigenvectors * Matrix6::from_diagonal(&roots)
}

fn ensemble_mean(ensemble: &[Vector7]) -> Vector6 {
    let mut sum = Vector6::zeros();
    for p in ensemble.iter() {
        sum += p.fixed_rows::<6>(0);
    }
    sum / (ensemble.len().max(1) as Float)
}

fn ensemble_cov(ensemble: &[Vector7]) -> Matrix6 {
    let mean = ensemble_mean(ensemble);
    let mut cov = Matrix6::zeros();
    for p in ensemble.iter() {
        let d: Vector6 = p.fixed_rows::<6>(0) - mean;
        cov += d * d.transpose();
    }
    cov / (ensemble.len().saturating_sub(1).max(1) as Float)
}

impl Moments for ParticleBeam {
    fn mu(&self) -> Batched<Vector6> {
        self.particles.map(|e| ensemble_mean(e))
    }

    fn cov(&self) -> Batched<Matrix6> {
        self.particles.map(|e| ensemble_cov(e))
    }

    fn energy(&self) -> &Batched<Float> {
        &self.energy
    }

    fn total_charge(&self) -> Batched<Float> {
        self.particle_charges.map(|q| q.iter().sum())
    }
}
