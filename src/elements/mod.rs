//! Beamline elements.
//!
//! Every kind is a plain struct of batched parameters. [`Element`] is the
//! closed set of kinds a segment can hold and dispatches to them by `match`.

pub mod custom;
pub mod dipole;
pub mod drift;
pub mod marker;
pub mod quadrupole;

pub use custom::CustomTransferMap;
pub use dipole::Dipole;
pub use drift::Drift;
pub use marker::Marker;
pub use quadrupole::Quadrupole;

use crate::batch::Batched;
use crate::beam::{Beam, ParticleBeam};
use crate::error::{Result, TrackError};
use crate::{Float, Matrix7};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

static UNNAMED_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Unique name for an element constructed without one.
pub fn generate_name() -> String {
    let n = UNNAMED_COUNT.fetch_add(1, Ordering::Relaxed);
    format!("unnamed_element_{}", n)
}

/// How an element propagates a beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMethod {
    /// Linear transfer map.
    #[default]
    Matrix,
    /// Step-wise symplectic integration of every particle.
    Integrator,
}

impl FromStr for TrackingMethod {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "matrix" | "cheetah" => Ok(TrackingMethod::Matrix),
            "integrator" | "bmadx" => Ok(TrackingMethod::Integrator),
            other => Err(TrackError::invalid_configuration(format!(
                "unknown tracking method `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for TrackingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMethod::Matrix => write!(f, "matrix"),
            TrackingMethod::Integrator => write!(f, "integrator"),
        }
    }
}

/// Number of pieces `split` cuts a batched length into.
pub(crate) fn split_count(length: &Batched<Float>, resolution: Float) -> Result<usize> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(TrackError::invalid_configuration(format!(
            "split resolution must be positive and finite, got {}",
            resolution
        )));
    }
    let longest = length.iter().fold(0.0 as Float, |acc, l| acc.max(l.abs()));
    Ok(((longest / resolution).ceil() as usize).max(1))
}

/// Broadcast a replacement value onto the existing shape of a field.
pub(crate) fn conform<T: Clone>(
    value: Batched<T>,
    shape: &[usize],
    field: &str,
) -> Result<Batched<T>> {
    value.broadcast_to(shape).map_err(|_| {
        TrackError::invalid_configuration(format!(
            "`{}` of shape {:?} does not fit the element batch shape {:?}",
            field,
            value.shape(),
            shape
        ))
    })
}

/// The integrator only runs on particle ensembles.
pub(crate) fn require_particles<'a>(beam: &'a Beam, element: &str) -> Result<&'a ParticleBeam> {
    beam.as_particle_beam().ok_or_else(|| {
        TrackError::capability_mismatch(format!(
            "`{}` uses the integrator, which needs a ParticleBeam, got a {}",
            element,
            beam.kind()
        ))
    })
}

fn matrix_only(kind: &str, method: TrackingMethod) -> Result<()> {
    match method {
        TrackingMethod::Matrix => Ok(()),
        TrackingMethod::Integrator => Err(TrackError::invalid_configuration(format!(
            "{} has no integrator",
            kind
        ))),
    }
}

/// Any element a segment can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Drift(Drift),
    Quadrupole(Quadrupole),
    Dipole(Dipole),
    Marker(Marker),
    CustomTransferMap(CustomTransferMap),
}

impl Element {
    pub fn name(&self) -> &str {
        match self {
            Element::Drift(e) => e.name(),
            Element::Quadrupole(e) => e.name(),
            Element::Dipole(e) => e.name(),
            Element::Marker(e) => e.name(),
            Element::CustomTransferMap(e) => e.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Element::Drift(_) => "Drift",
            Element::Quadrupole(_) => "Quadrupole",
            Element::Dipole(_) => "Dipole",
            Element::Marker(_) => "Marker",
            Element::CustomTransferMap(_) => "CustomTransferMap",
        }
    }

    pub fn length(&self) -> Batched<Float> {
        match self {
            Element::Drift(e) => e.length().clone(),
            Element::Quadrupole(e) => e.length().clone(),
            Element::Dipole(e) => e.length().clone(),
            Element::Marker(_) => Batched::scalar(0.0),
            Element::CustomTransferMap(e) => e.length().clone(),
        }
    }

    pub fn batch_shape(&self) -> &[usize] {
        match self {
            Element::Drift(e) => e.batch_shape(),
            Element::Quadrupole(e) => e.batch_shape(),
            Element::Dipole(e) => e.batch_shape(),
            Element::Marker(_) => &[],
            Element::CustomTransferMap(e) => e.batch_shape(),
        }
    }

    pub fn tracking_method(&self) -> TrackingMethod {
        match self {
            Element::Drift(e) => e.tracking_method(),
            Element::Quadrupole(e) => e.tracking_method(),
            _ => TrackingMethod::Matrix,
        }
    }

    /// Switch the tracking path. Kinds without an integrator only accept
    /// [`TrackingMethod::Matrix`].
    pub fn set_tracking_method(&mut self, method: TrackingMethod) -> Result<()> {
        match self {
            Element::Drift(e) => {
                e.set_tracking_method(method);
                Ok(())
            }
            Element::Quadrupole(e) => {
                e.set_tracking_method(method);
                Ok(())
            }
            other => matrix_only(other.kind(), method),
        }
    }

    /// Linear map for a beam of reference energy `energy`.
    pub fn transfer_map(&self, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
        match self {
            Element::Drift(e) => e.transfer_map(energy),
            Element::Quadrupole(e) => e.transfer_map(energy),
            Element::Dipole(e) => e.transfer_map(energy),
            Element::Marker(e) => Ok(e.transfer_map(energy)),
            Element::CustomTransferMap(e) => e.transfer_map(energy),
        }
    }

    /// Track `beam` through the element, returning a new beam.
    pub fn track(&self, beam: &Beam) -> Result<Beam> {
        match self {
            Element::Drift(e) => e.track(beam),
            Element::Quadrupole(e) => e.track(beam),
            Element::Dipole(e) => e.track(beam),
            Element::Marker(_) => Ok(beam.clone()),
            Element::CustomTransferMap(e) => e.track(beam),
        }
    }

    /// Cut the element into pieces no longer than `resolution`.
    pub fn split(&self, resolution: Float) -> Result<Vec<Element>> {
        Ok(match self {
            Element::Drift(e) => e.split(resolution)?.into_iter().map(Element::from).collect(),
            Element::Quadrupole(e) => e.split(resolution)?.into_iter().map(Element::from).collect(),
            Element::Dipole(e) => e.split(resolution)?.into_iter().map(Element::from).collect(),
            Element::Marker(_) | Element::CustomTransferMap(_) => {
                split_count(&self.length(), resolution)?;
                vec![self.clone()]
            }
        })
    }

    /// Copy of the element with `extra` prepended to every parameter shape.
    pub fn broadcast(&self, extra: &[usize]) -> Element {
        match self {
            Element::Drift(e) => Element::Drift(e.broadcast(extra)),
            Element::Quadrupole(e) => Element::Quadrupole(e.broadcast(extra)),
            Element::Dipole(e) => Element::Dipole(e.broadcast(extra)),
            Element::Marker(e) => Element::Marker(e.clone()),
            Element::CustomTransferMap(e) => Element::CustomTransferMap(e.broadcast(extra)),
        }
    }

    /// Fully described by its transfer map, so it can be fused with its
    /// neighbours.
    pub fn is_skippable(&self) -> bool {
        self.tracking_method() == TrackingMethod::Matrix
    }

    /// Whether the element acts on the beam beyond a plain drift. Used for
    /// display only.
    pub fn is_active(&self) -> bool {
        match self {
            Element::Drift(_) | Element::Marker(_) => false,
            Element::Quadrupole(e) => e.k1().any_nonzero(),
            Element::Dipole(e) => e.angle().any_nonzero(),
            Element::CustomTransferMap(_) => true,
        }
    }
}

impl From<Drift> for Element {
    fn from(e: Drift) -> Self {
        Element::Drift(e)
    }
}

impl From<Quadrupole> for Element {
    fn from(e: Quadrupole) -> Self {
        Element::Quadrupole(e)
    }
}

impl From<Dipole> for Element {
    fn from(e: Dipole) -> Self {
        Element::Dipole(e)
    }
}

impl From<Marker> for Element {
    fn from(e: Marker) -> Self {
        Element::Marker(e)
    }
}

impl From<CustomTransferMap> for Element {
    fn from(e: CustomTransferMap) -> Self {
        Element::CustomTransferMap(e)
    }
}
