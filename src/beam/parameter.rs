use super::{BeamParameters, Moments, ParticleBeam};
use crate::batch::{broadcast_shape_of, Batched};
use crate::error::Result;
use crate::{Float, Matrix6, Matrix7, Vector6};
use itertools::izip;
use rand::Rng;

/// Gaussian beam described by its first and second moments. Tracking through a
/// linear map is exact for this representation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBeam {
    shape: Vec<usize>,
    mu: Batched<Vector6>,
    cov: Batched<Matrix6>,
    energy: Batched<Float>,
    total_charge: Batched<Float>,
}

impl ParameterBeam {
    /// Build a beam from explicit moments. All inputs are broadcast to one
    /// batch shape.
    pub fn new(
        mu: Batched<Vector6>,
        cov: Batched<Matrix6>,
        energy: Batched<Float>,
        total_charge: Batched<Float>,
    ) -> Result<Self> {
        let shape = broadcast_shape_of(&[
            mu.shape(),
            cov.shape(),
            energy.shape(),
            total_charge.shape(),
        ])?;
        Ok(ParameterBeam {
            mu: mu.broadcast_to(&shape)?,
            cov: cov.broadcast_to(&shape)?,
            energy: energy.broadcast_to(&shape)?,
            total_charge: total_charge.broadcast_to(&shape)?,
            shape,
        })
    }

    pub fn from_parameters(params: &BeamParameters) -> Result<Self> {
        let m = params.moments()?;
        Ok(ParameterBeam {
            mu: Batched::from_vec(m.shape.clone(), m.mu)?,
            cov: Batched::from_vec(m.shape.clone(), m.cov)?,
            energy: m.energy,
            total_charge: m.total_charge,
            shape: m.shape,
        })
    }

    pub fn batch_shape(&self) -> &[usize] {
        &self.shape
    }

    /// Propagate the moments through one map per sample:
    /// `mu' = R mu + t`, `cov' = R cov R^T`.
    pub fn transform(&self, maps: &Batched<Matrix7>) -> Result<ParameterBeam> {
        let shape = broadcast_shape_of(&[&self.shape, maps.shape()])?;
        let maps = maps.broadcast_to(&shape)?;
        let mu = self.mu.broadcast_to(&shape)?;
        let cov = self.cov.broadcast_to(&shape)?;

        let mut new_mu = Vec::with_capacity(maps.len());
        let mut new_cov = Vec::with_capacity(maps.len());
        for (tm, m, c) in izip!(maps.iter(), mu.iter(), cov.iter()) {
            let r: Matrix6 = tm.fixed_view::<6, 6>(0, 0).into_owned();
            let t: Vector6 = tm.fixed_view::<6, 1>(0, 6).into_owned();
            new_mu.push(r * m + t);
            new_cov.push(r * c * r.transpose());
        }

        Ok(ParameterBeam {
            mu: Batched::from_vec(shape.clone(), new_mu)?,
            cov: Batched::from_vec(shape.clone(), new_cov)?,
            energy: self.energy.broadcast_to(&shape)?,
            total_charge: self.total_charge.broadcast_to(&shape)?,
            shape,
        })
    }

    /// Prepend `extra` batch dimensions, copying the beam into every new entry.
    pub fn broadcast(&self, extra: &[usize]) -> ParameterBeam {
        let mut shape = extra.to_vec();
        shape.extend_from_slice(&self.shape);
        ParameterBeam {
            mu: self.mu.broadcast(extra),
            cov: self.cov.broadcast(extra),
            energy: self.energy.broadcast(extra),
            total_charge: self.total_charge.broadcast(extra),
            shape,
        }
    }

    /// Sample `num_particles` particles per batch entry from this Gaussian.
    pub fn as_particle_beam<R: Rng>(
        &self,
        num_particles: usize,
        rng: &mut R,
    ) -> Result<ParticleBeam> {
        ParticleBeam::sample(
            &self.shape,
            self.mu.as_slice(),
            self.cov.as_slice(),
            self.energy.clone(),
            &self.total_charge,
            num_particles,
            rng,
        )
    }
}

impl Moments for ParameterBeam {
    fn mu(&self) -> Batched<Vector6> {
        self.mu.clone()
    }

    fn cov(&self) -> Batched<Matrix6> {
        self.cov.clone()
    }

    fn energy(&self) -> &Batched<Float> {
        &self.energy
    }

    fn total_charge(&self) -> Batched<Float> {
        self.total_charge.clone()
    }
}
