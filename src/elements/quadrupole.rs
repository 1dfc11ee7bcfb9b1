use super::{conform, generate_name, require_particles, split_count, TrackingMethod};
use crate::batch::{broadcast_shape_of, Batched};
use crate::beam::{Beam, Moments};
use crate::error::{Result, TrackError};
use crate::{integrator, optics, Float, Matrix7};

/// Quadrupole magnet. Positive `k1` focuses horizontally.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrupole {
    name: String,
    shape: Vec<usize>,
    length: Batched<Float>,
    k1: Batched<Float>,
    misalignment: Batched<[Float; 2]>,
    tilt: Batched<Float>,
    num_steps: usize,
    tracking_method: TrackingMethod,
}

impl Quadrupole {
    pub fn new(length: impl Into<Batched<Float>>, k1: impl Into<Batched<Float>>) -> Result<Self> {
        let mut quad = Quadrupole {
            name: generate_name(),
            shape: Vec::new(),
            length: length.into(),
            k1: k1.into(),
            misalignment: Batched::scalar([0.0, 0.0]),
            tilt: Batched::scalar(0.0),
            num_steps: 1,
            tracking_method: TrackingMethod::Matrix,
        };
        quad.unify()?;
        Ok(quad)
    }

    // bring every parameter onto the broadcast shape of all of them
    fn unify(&mut self) -> Result<()> {
        let shape = broadcast_shape_of(&[
            self.length.shape(),
            self.k1.shape(),
            self.misalignment.shape(),
            self.tilt.shape(),
        ])?;
        self.length = self.length.broadcast_to(&shape)?;
        self.k1 = self.k1.broadcast_to(&shape)?;
        self.misalignment = self.misalignment.broadcast_to(&shape)?;
        self.tilt = self.tilt.broadcast_to(&shape)?;
        self.shape = shape;
        Ok(())
    }

    /// Transverse offset `(dx, dy)` in metres.
    pub fn with_misalignment(mut self, misalignment: Batched<[Float; 2]>) -> Result<Self> {
        self.misalignment = misalignment;
        self.unify()?;
        Ok(self)
    }

    /// Roll angle around the design axis in radians.
    pub fn with_tilt(mut self, tilt: impl Into<Batched<Float>>) -> Result<Self> {
        self.tilt = tilt.into();
        self.unify()?;
        Ok(self)
    }

    pub fn with_num_steps(mut self, num_steps: usize) -> Result<Self> {
        self.set_num_steps(num_steps)?;
        Ok(self)
    }

    pub fn with_tracking_method(mut self, method: TrackingMethod) -> Self {
        self.tracking_method = method;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn batch_shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn length(&self) -> &Batched<Float> {
        &self.length
    }

    pub fn k1(&self) -> &Batched<Float> {
        &self.k1
    }

    pub fn misalignment(&self) -> &Batched<[Float; 2]> {
        &self.misalignment
    }

    pub fn tilt(&self) -> &Batched<Float> {
        &self.tilt
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn tracking_method(&self) -> TrackingMethod {
        self.tracking_method
    }

    pub fn set_length(&mut self, length: impl Into<Batched<Float>>) -> Result<()> {
        self.length = conform(length.into(), &self.shape, "length")?;
        Ok(())
    }

    pub fn set_k1(&mut self, k1: impl Into<Batched<Float>>) -> Result<()> {
        self.k1 = conform(k1.into(), &self.shape, "k1")?;
        Ok(())
    }

    pub fn set_misalignment(&mut self, misalignment: Batched<[Float; 2]>) -> Result<()> {
        self.misalignment = conform(misalignment, &self.shape, "misalignment")?;
        Ok(())
    }

    pub fn set_tilt(&mut self, tilt: impl Into<Batched<Float>>) -> Result<()> {
        self.tilt = conform(tilt.into(), &self.shape, "tilt")?;
        Ok(())
    }

    pub fn set_num_steps(&mut self, num_steps: usize) -> Result<()> {
        if num_steps == 0 {
            return Err(TrackError::invalid_configuration(format!(
                "`{}` needs at least one integration step",
                self.name
            )));
        }
        self.num_steps = num_steps;
        Ok(())
    }

    pub fn set_tracking_method(&mut self, method: TrackingMethod) {
        self.tracking_method = method;
    }

    pub fn transfer_map(&self, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
        let maps = optics::base_rmatrix(
            &self.length,
            &self.k1,
            &Batched::scalar(0.0),
            &self.tilt,
            energy,
        )?;
        optics::misalign(maps, &self.misalignment)
    }

    pub fn track(&self, beam: &Beam) -> Result<Beam> {
        match self.tracking_method {
            TrackingMethod::Matrix => beam.transform(&self.transfer_map(beam.energy())?),
            TrackingMethod::Integrator => {
                let particles = require_particles(beam, &self.name)?;
                Ok(Beam::Particle(integrator::track_quadrupole(
                    particles,
                    &self.length,
                    &self.k1,
                    &self.misalignment,
                    &self.tilt,
                    self.num_steps,
                )?))
            }
        }
    }

    /// Pieces keep `k1`, misalignment, tilt and the step count.
    pub fn split(&self, resolution: Float) -> Result<Vec<Quadrupole>> {
        let n = split_count(&self.length, resolution)?;
        let mut piece = self.clone();
        piece.length = self.length.map(|l| l / n as Float);
        Ok(vec![piece; n])
    }

    pub fn broadcast(&self, extra: &[usize]) -> Quadrupole {
        let mut shape = extra.to_vec();
        shape.extend_from_slice(&self.shape);
        Quadrupole {
            name: self.name.clone(),
            shape,
            length: self.length.broadcast(extra),
            k1: self.k1.broadcast(extra),
            misalignment: self.misalignment.broadcast(extra),
            tilt: self.tilt.broadcast(extra),
            num_steps: self.num_steps,
            tracking_method: self.tracking_method,
        }
    }
}
