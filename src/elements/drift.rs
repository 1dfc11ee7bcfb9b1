use super::{conform, generate_name, require_particles, split_count, TrackingMethod};
use crate::batch::Batched;
use crate::beam::{Beam, Moments};
use crate::error::Result;
use crate::{integrator, optics, Float, Matrix7};

/// Field free section.
#[derive(Debug, Clone, PartialEq)]
pub struct Drift {
    name: String,
    length: Batched<Float>,
    tracking_method: TrackingMethod,
}

impl Drift {
    pub fn new(length: impl Into<Batched<Float>>) -> Self {
        Drift {
            name: generate_name(),
            length: length.into(),
            tracking_method: TrackingMethod::Matrix,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tracking_method(mut self, method: TrackingMethod) -> Self {
        self.tracking_method = method;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> &Batched<Float> {
        &self.length
    }

    pub fn set_length(&mut self, length: impl Into<Batched<Float>>) -> Result<()> {
        self.length = conform(length.into(), self.length.shape(), "length")?;
        Ok(())
    }

    pub fn batch_shape(&self) -> &[usize] {
        self.length.shape()
    }

    pub fn tracking_method(&self) -> TrackingMethod {
        self.tracking_method
    }

    pub fn set_tracking_method(&mut self, method: TrackingMethod) {
        self.tracking_method = method;
    }

    pub fn transfer_map(&self, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
        optics::drift_matrix(&self.length, energy)
    }

    pub fn track(&self, beam: &Beam) -> Result<Beam> {
        match self.tracking_method {
            TrackingMethod::Matrix => beam.transform(&self.transfer_map(beam.energy())?),
            TrackingMethod::Integrator => {
                let particles = require_particles(beam, &self.name)?;
                Ok(Beam::Particle(integrator::track_drift(particles, &self.length)?))
            }
        }
    }

    pub fn split(&self, resolution: Float) -> Result<Vec<Drift>> {
        let n = split_count(&self.length, resolution)?;
        let piece = self.length.map(|l| l / n as Float);
        Ok((0..n)
            .map(|_| Drift {
                name: self.name.clone(),
                length: piece.clone(),
                tracking_method: self.tracking_method,
            })
            .collect())
    }

    pub fn broadcast(&self, extra: &[usize]) -> Drift {
        Drift {
            name: self.name.clone(),
            length: self.length.broadcast(extra),
            tracking_method: self.tracking_method,
        }
    }
}
