//! Batched beam representations.
//!
//! A beam is either a Gaussian approximation (mean and covariance, see
//! [`ParameterBeam`]) or an ensemble of macro particles ([`ParticleBeam`]).
//! Both expose the same statistical moments through [`Moments`].

pub mod parameter;
pub mod particle;

pub use parameter::ParameterBeam;
pub use particle::ParticleBeam;

use crate::batch::{broadcast_shape_of, Batched};
use crate::error::Result;
use crate::optics::relativistic_factors;
use crate::{Float, Matrix6, Matrix7, Vector6, ELECTRON_MASS_EV};
use itertools::izip;

/// Moments of a Gaussian beam, the input of both beam factories. Every field
/// is batched; the beam takes the broadcast shape of all fields.
///
/// `cor_x`, `cor_y` and `cor_tau` are the off-diagonal covariance entries
/// `<x px>`, `<y py>` and `<tau p>`.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamParameters {
    pub mu_x: Batched<Float>,
    pub mu_px: Batched<Float>,
    pub mu_y: Batched<Float>,
    pub mu_py: Batched<Float>,
    pub sigma_x: Batched<Float>,
    pub sigma_px: Batched<Float>,
    pub sigma_y: Batched<Float>,
    pub sigma_py: Batched<Float>,
    pub sigma_tau: Batched<Float>,
    pub sigma_p: Batched<Float>,
    pub cor_x: Batched<Float>,
    pub cor_y: Batched<Float>,
    pub cor_tau: Batched<Float>,
    /// Reference energy in eV.
    pub energy: Batched<Float>,
    /// Total charge in C.
    pub total_charge: Batched<Float>,
}

impl Default for BeamParameters {
    fn default() -> Self {
        BeamParameters {
            mu_x: Batched::scalar(0.0),
            mu_px: Batched::scalar(0.0),
            mu_y: Batched::scalar(0.0),
            mu_py: Batched::scalar(0.0),
            sigma_x: Batched::scalar(175.9e-6),
            sigma_px: Batched::scalar(4e-7),
            sigma_y: Batched::scalar(175.9e-6),
            sigma_py: Batched::scalar(4e-7),
            sigma_tau: Batched::scalar(1e-6),
            sigma_p: Batched::scalar(1e-6),
            cor_x: Batched::scalar(0.0),
            cor_y: Batched::scalar(0.0),
            cor_tau: Batched::scalar(0.0),
            energy: Batched::scalar(1e8),
            total_charge: Batched::scalar(0.0),
        }
    }
}

/// Per-sample mean and covariance assembled from [`BeamParameters`].
pub(crate) struct Moments6 {
    pub shape: Vec<usize>,
    pub mu: Vec<Vector6>,
    pub cov: Vec<Matrix6>,
    pub energy: Batched<Float>,
    pub total_charge: Batched<Float>,
}

impl BeamParameters {
    fn fields(&self) -> [&Batched<Float>; 15] {
        [
            &self.mu_x,
            &self.mu_px,
            &self.mu_y,
            &self.mu_py,
            &self.sigma_x,
            &self.sigma_px,
            &self.sigma_y,
            &self.sigma_py,
            &self.sigma_tau,
            &self.sigma_p,
            &self.cor_x,
            &self.cor_y,
            &self.cor_tau,
            &self.energy,
            &self.total_charge,
        ]
    }

    pub fn batch_shape(&self) -> Result<Vec<usize>> {
        let shapes: Vec<&[usize]> = self.fields().iter().map(|f| f.shape()).collect();
        broadcast_shape_of(&shapes)
    }

    pub(crate) fn moments(&self) -> Result<Moments6> {
        let shape = self.batch_shape()?;
        let mut b = Vec::with_capacity(15);
        for field in self.fields().iter() {
            b.push(field.broadcast_to(&shape)?);
        }
        let energy = b[13].clone();
        let total_charge = b[14].clone();

        let mu = izip!(b[0].iter(), b[1].iter(), b[2].iter(), b[3].iter())
            .map(|(&x, &px, &y, &py)| Vector6::new(x, px, y, py, 0.0, 0.0))
            .collect();

        let mut cov = vec![Matrix6::zeros(); b[4].len()];
        for (c, sx, spx, sy, spy, st, sp) in izip!(
            cov.iter_mut(),
            b[4].iter(),
            b[5].iter(),
            b[6].iter(),
            b[7].iter(),
            b[8].iter(),
            b[9].iter()
        ) {
            c[(0, 0)] = sx * sx;
            c[(1, 1)] = spx * spx;
            c[(2, 2)] = sy * sy;
            c[(3, 3)] = spy * spy;
            c[(4, 4)] = st * st;
            c[(5, 5)] = sp * sp;
        }
        for (c, cx, cy, ct) in izip!(cov.iter_mut(), b[10].iter(), b[11].iter(), b[12].iter()) {
            c[(0, 1)] = *cx;
            c[(1, 0)] = *cx;
            c[(2, 3)] = *cy;
            c[(3, 2)] = *cy;
            c[(4, 5)] = *ct;
            c[(5, 4)] = *ct;
        }

        Ok(Moments6 {
            shape,
            mu,
            cov,
            energy,
            total_charge,
        })
    }
}

/// Statistical moments shared by both beam representations. Everything is
/// derived from the mean, the covariance and the reference energy.
pub trait Moments {
    fn mu(&self) -> Batched<Vector6>;
    fn cov(&self) -> Batched<Matrix6>;
    fn energy(&self) -> &Batched<Float>;
    fn total_charge(&self) -> Batched<Float>;

    fn mu_x(&self) -> Batched<Float> {
        self.mu().map(|m| m[0])
    }
    fn mu_px(&self) -> Batched<Float> {
        self.mu().map(|m| m[1])
    }
    fn mu_y(&self) -> Batched<Float> {
        self.mu().map(|m| m[2])
    }
    fn mu_py(&self) -> Batched<Float> {
        self.mu().map(|m| m[3])
    }
    fn mu_tau(&self) -> Batched<Float> {
        self.mu().map(|m| m[4])
    }
    fn mu_p(&self) -> Batched<Float> {
        self.mu().map(|m| m[5])
    }

    fn sigma_x(&self) -> Batched<Float> {
        self.cov().map(|c| c[(0, 0)].sqrt())
    }
    fn sigma_px(&self) -> Batched<Float> {
        self.cov().map(|c| c[(1, 1)].sqrt())
    }
    fn sigma_y(&self) -> Batched<Float> {
        self.cov().map(|c| c[(2, 2)].sqrt())
    }
    fn sigma_py(&self) -> Batched<Float> {
        self.cov().map(|c| c[(3, 3)].sqrt())
    }
    fn sigma_tau(&self) -> Batched<Float> {
        self.cov().map(|c| c[(4, 4)].sqrt())
    }
    fn sigma_p(&self) -> Batched<Float> {
        self.cov().map(|c| c[(5, 5)].sqrt())
    }
    fn sigma_xpx(&self) -> Batched<Float> {
        self.cov().map(|c| c[(0, 1)])
    }
    fn sigma_ypy(&self) -> Batched<Float> {
        self.cov().map(|c| c[(2, 3)])
    }

    /// Geometric emittance of the horizontal plane.
    fn emittance_x(&self) -> Batched<Float> {
        self.cov().map(|c| plane_emittance(c, 0))
    }
    /// Geometric emittance of the vertical plane.
    fn emittance_y(&self) -> Batched<Float> {
        self.cov().map(|c| plane_emittance(c, 2))
    }
    fn normalized_emittance_x(&self) -> Result<Batched<Float>> {
        normalize(self.emittance_x(), self.energy())
    }
    fn normalized_emittance_y(&self) -> Result<Batched<Float>> {
        normalize(self.emittance_y(), self.energy())
    }

    /// Twiss beta. Undefined (non-finite) for a zero emittance.
    fn beta_x(&self) -> Batched<Float> {
        self.cov().map(|c| c[(0, 0)] / plane_emittance(c, 0))
    }
    fn beta_y(&self) -> Batched<Float> {
        self.cov().map(|c| c[(2, 2)] / plane_emittance(c, 2))
    }
    /// Twiss alpha. Undefined (non-finite) for a zero emittance.
    fn alpha_x(&self) -> Batched<Float> {
        self.cov().map(|c| -c[(0, 1)] / plane_emittance(c, 0))
    }
    fn alpha_y(&self) -> Batched<Float> {
        self.cov().map(|c| -c[(2, 3)] / plane_emittance(c, 2))
    }

    fn relativistic_gamma(&self) -> Batched<Float> {
        self.energy().map(|e| e / ELECTRON_MASS_EV)
    }
    fn relativistic_beta(&self) -> Batched<Float> {
        self.energy().map(|&e| relativistic_factors(e).1)
    }
}

fn plane_emittance(c: &Matrix6, first: usize) -> Float {
    let det = c[(first, first)] * c[(first + 1, first + 1)] - c[(first, first + 1)].powi(2);
    det.max(0.0).sqrt()
}

fn normalize(emittance: Batched<Float>, energy: &Batched<Float>) -> Result<Batched<Float>> {
    let gamma_beta = energy.map(|&e| e / ELECTRON_MASS_EV * relativistic_factors(e).1);
    emittance.zip_map(&gamma_beta, |eps, gb| eps * gb)
}

/// Either of the two beam representations.
#[derive(Debug, Clone, PartialEq)]
pub enum Beam {
    Parameter(ParameterBeam),
    Particle(ParticleBeam),
}

impl Beam {
    pub fn batch_shape(&self) -> &[usize] {
        match self {
            Beam::Parameter(beam) => beam.batch_shape(),
            Beam::Particle(beam) => beam.batch_shape(),
        }
    }

    /// Short name of the representation, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Beam::Parameter(_) => "ParameterBeam",
            Beam::Particle(_) => "ParticleBeam",
        }
    }

    /// Apply one linear map per batch sample.
    pub fn transform(&self, maps: &Batched<Matrix7>) -> Result<Beam> {
        Ok(match self {
            Beam::Parameter(beam) => Beam::Parameter(beam.transform(maps)?),
            Beam::Particle(beam) => Beam::Particle(beam.transform(maps)?),
        })
    }

    pub fn broadcast(&self, extra: &[usize]) -> Beam {
        match self {
            Beam::Parameter(beam) => Beam::Parameter(beam.broadcast(extra)),
            Beam::Particle(beam) => Beam::Particle(beam.broadcast(extra)),
        }
    }

    pub fn as_particle_beam(&self) -> Option<&ParticleBeam> {
        match self {
            Beam::Particle(beam) => Some(beam),
            Beam::Parameter(_) => None,
        }
    }

    pub fn as_parameter_beam(&self) -> Option<&ParameterBeam> {
        match self {
            Beam::Parameter(beam) => Some(beam),
            Beam::Particle(_) => None,
        }
    }
}

impl Moments for Beam {
    fn mu(&self) -> Batched<Vector6> {
        match self {
            Beam::Parameter(beam) => beam.mu(),
            Beam::Particle(beam) => beam.mu(),
        }
    }

    fn cov(&self) -> Batched<Matrix6> {
        match self {
            Beam::Parameter(beam) => beam.cov(),
            Beam::Particle(beam) => beam.cov(),
        }
    }

    fn energy(&self) -> &Batched<Float> {
        match self {
            Beam::Parameter(beam) => Moments::energy(beam),
            Beam::Particle(beam) => Moments::energy(beam),
        }
    }

    fn total_charge(&self) -> Batched<Float> {
        match self {
            Beam::Parameter(beam) => beam.total_charge(),
            Beam::Particle(beam) => beam.total_charge(),
        }
    }
}

impl From<ParameterBeam> for Beam {
    fn from(beam: ParameterBeam) -> Self {
        Beam::Parameter(beam)
    }
}

impl From<ParticleBeam> for Beam {
    fn from(beam: ParticleBeam) -> Self {
        Beam::Particle(beam)
    }
}
