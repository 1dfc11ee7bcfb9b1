//! TOML description of a beam and the lattice it is tracked through.
//!
//! ```toml
//! [beam]
//! kind = "particle"
//! num_particles = 10000
//! energy = 1e8
//! sigma_x = [1e-5, 2e-5]
//!
//! [[lattice]]
//! type = "quadrupole"
//! name = "Q1"
//! length = 0.2
//! k1 = 4.2
//! tracking_method = "integrator"
//! num_steps = 10
//! ```
//!
//! Every numeric parameter is either a scalar or a nested array, whose nesting
//! gives the batch shape.

use crate::batch::Batched;
use crate::beam::{Beam, BeamParameters, ParameterBeam, ParticleBeam};
use crate::elements::{
    CustomTransferMap, Dipole, Drift, Element, Marker, Quadrupole, TrackingMethod,
};
use crate::error::{Result, TrackError};
use crate::segment::Segment;
use crate::{Float, Matrix7};
use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs;

#[derive(Deserialize)]
pub struct Config {
    pub beam: BeamConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub lattice: Vec<ElementConfig>,
}

impl Config {
    pub fn new() -> anyhow::Result<Config> {
        Config::from_file("config.toml")
    }

    pub fn from_file(path: &str) -> anyhow::Result<Config> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Could not open the {} file", path))?;
        Config::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Config> {
        toml::from_str(contents).with_context(|| "Could not parse Config file")
    }

    /// Assemble the lattice into a segment, split to `split_resolution` when
    /// one is given.
    pub fn build_segment(&self) -> Result<Segment> {
        let elements = self
            .lattice
            .iter()
            .map(|e| e.build())
            .collect::<Result<Vec<_>>>()?;
        let mut segment = Segment::new(elements);
        if let Some(name) = &self.segment.name {
            segment = segment.with_name(name.clone());
        }
        match self.segment.split_resolution {
            Some(resolution) => segment.split(resolution),
            None => Ok(segment),
        }
    }
}

#[derive(Deserialize, Default)]
pub struct SegmentConfig {
    pub name: Option<String>,
    pub split_resolution: Option<Float>,
}

/// Scalar or arbitrarily nested list of numbers.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum BatchValue {
    Scalar(Float),
    List(Vec<BatchValue>),
}

impl BatchValue {
    fn collect(&self, depth: usize, shape: &mut Vec<usize>, data: &mut Vec<Float>) -> Result<()> {
        match self {
            BatchValue::Scalar(v) => {
                if depth != shape.len() {
                    return Err(ragged());
                }
                data.push(*v);
            }
            BatchValue::List(items) => {
                if depth == shape.len() {
                    if !data.is_empty() {
                        return Err(ragged());
                    }
                    shape.push(items.len());
                } else if shape[depth] != items.len() {
                    return Err(ragged());
                }
                for item in items.iter() {
                    item.collect(depth + 1, shape, data)?;
                }
            }
        }
        Ok(())
    }

    pub fn to_batched(&self) -> Result<Batched<Float>> {
        let mut shape = Vec::new();
        let mut data = Vec::new();
        self.collect(0, &mut shape, &mut data)?;
        // an empty list never reaches a scalar to fix the full depth
        if data.len() != shape.iter().product::<usize>() {
            return Err(ragged());
        }
        Batched::from_vec(shape, data)
    }

    /// Read the innermost `inner` dimensions as one entity and batch over the
    /// rest.
    fn grouped(&self, inner: &[usize], field: &str) -> Result<(Vec<usize>, Vec<Float>)> {
        let flat = self.to_batched()?;
        let shape = flat.shape().to_vec();
        let split = shape.len().checked_sub(inner.len());
        match split {
            Some(at) if &shape[at..] == inner => Ok((shape[..at].to_vec(), flat.into_vec())),
            _ => Err(TrackError::invalid_configuration(format!(
                "`{}` must end in dimensions {:?}, got shape {:?}",
                field, inner, shape
            ))),
        }
    }

    pub fn to_offsets(&self) -> Result<Batched<[Float; 2]>> {
        let (shape, data) = self.grouped(&[2], "misalignment")?;
        let pairs = data.chunks(2).map(|c| [c[0], c[1]]).collect();
        Batched::from_vec(shape, pairs)
    }

    pub fn to_matrices(&self) -> Result<Batched<Matrix7>> {
        let (shape, data) = self.grouped(&[7, 7], "transfer_map")?;
        let maps = data.chunks(49).map(Matrix7::from_row_slice).collect();
        Batched::from_vec(shape, maps)
    }
}

fn ragged() -> TrackError {
    TrackError::invalid_configuration("nested arrays must be rectangular")
}

fn batched_or(value: &Option<BatchValue>, default: Float) -> Result<Batched<Float>> {
    match value {
        Some(v) => v.to_batched(),
        None => Ok(Batched::scalar(default)),
    }
}

fn tracking_method(method: &Option<String>) -> Result<TrackingMethod> {
    match method {
        Some(m) => m.parse(),
        None => Ok(TrackingMethod::Matrix),
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BeamKind {
    #[default]
    Parameter,
    Particle,
}

fn default_num_particles() -> usize {
    100_000
}

#[derive(Deserialize)]
pub struct BeamConfig {
    #[serde(default)]
    pub kind: BeamKind,
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    #[serde(default)]
    pub seed: u64,
    pub mu_x: Option<BatchValue>,
    pub mu_px: Option<BatchValue>,
    pub mu_y: Option<BatchValue>,
    pub mu_py: Option<BatchValue>,
    pub sigma_x: Option<BatchValue>,
    pub sigma_px: Option<BatchValue>,
    pub sigma_y: Option<BatchValue>,
    pub sigma_py: Option<BatchValue>,
    pub sigma_tau: Option<BatchValue>,
    pub sigma_p: Option<BatchValue>,
    pub cor_x: Option<BatchValue>,
    pub cor_y: Option<BatchValue>,
    pub cor_tau: Option<BatchValue>,
    pub energy: Option<BatchValue>,
    pub total_charge: Option<BatchValue>,
}

impl BeamConfig {
    pub fn parameters(&self) -> Result<BeamParameters> {
        let d = BeamParameters::default();
        let pick = |value: &Option<BatchValue>, default: Batched<Float>| match value {
            Some(v) => v.to_batched(),
            None => Ok(default),
        };
        Ok(BeamParameters {
            mu_x: pick(&self.mu_x, d.mu_x)?,
            mu_px: pick(&self.mu_px, d.mu_px)?,
            mu_y: pick(&self.mu_y, d.mu_y)?,
            mu_py: pick(&self.mu_py, d.mu_py)?,
            sigma_x: pick(&self.sigma_x, d.sigma_x)?,
            sigma_px: pick(&self.sigma_px, d.sigma_px)?,
            sigma_y: pick(&self.sigma_y, d.sigma_y)?,
            sigma_py: pick(&self.sigma_py, d.sigma_py)?,
            sigma_tau: pick(&self.sigma_tau, d.sigma_tau)?,
            sigma_p: pick(&self.sigma_p, d.sigma_p)?,
            cor_x: pick(&self.cor_x, d.cor_x)?,
            cor_y: pick(&self.cor_y, d.cor_y)?,
            cor_tau: pick(&self.cor_tau, d.cor_tau)?,
            energy: pick(&self.energy, d.energy)?,
            total_charge: pick(&self.total_charge, d.total_charge)?,
        })
    }

    pub fn build(&self) -> Result<Beam> {
        let params = self.parameters()?;
        Ok(match self.kind {
            BeamKind::Parameter => Beam::Parameter(ParameterBeam::from_parameters(&params)?),
            BeamKind::Particle => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                Beam::Particle(ParticleBeam::from_parameters(
                    self.num_particles,
                    &params,
                    &mut rng,
                )?)
            }
        })
    }
}

#[derive(Deserialize)]
pub struct DriftConfig {
    pub name: Option<String>,
    pub length: BatchValue,
    pub tracking_method: Option<String>,
}

fn default_num_steps() -> usize {
    1
}

#[derive(Deserialize)]
pub struct QuadrupoleConfig {
    pub name: Option<String>,
    pub length: BatchValue,
    pub k1: Option<BatchValue>,
    pub misalignment: Option<BatchValue>,
    pub tilt: Option<BatchValue>,
    #[serde(default = "default_num_steps")]
    pub num_steps: usize,
    pub tracking_method: Option<String>,
}

#[derive(Deserialize)]
pub struct DipoleConfig {
    pub name: Option<String>,
    pub length: BatchValue,
    pub angle: Option<BatchValue>,
    pub k1: Option<BatchValue>,
    pub e1: Option<BatchValue>,
    pub e2: Option<BatchValue>,
    pub tilt: Option<BatchValue>,
    pub tracking_method: Option<String>,
}

#[derive(Deserialize)]
pub struct MarkerConfig {
    pub name: Option<String>,
    pub tracking_method: Option<String>,
}

#[derive(Deserialize)]
pub struct CustomTransferMapConfig {
    pub name: Option<String>,
    pub length: Option<BatchValue>,
    pub transfer_map: BatchValue,
    pub tracking_method: Option<String>,
}

/// One lattice entry, tagged by `type`.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementConfig {
    Drift(DriftConfig),
    Quadrupole(QuadrupoleConfig),
    Dipole(DipoleConfig),
    Marker(MarkerConfig),
    CustomTransferMap(CustomTransferMapConfig),
}

impl ElementConfig {
    pub fn name(&self) -> Option<&str> {
        match self {
            ElementConfig::Drift(c) => c.name.as_deref(),
            ElementConfig::Quadrupole(c) => c.name.as_deref(),
            ElementConfig::Dipole(c) => c.name.as_deref(),
            ElementConfig::Marker(c) => c.name.as_deref(),
            ElementConfig::CustomTransferMap(c) => c.name.as_deref(),
        }
    }

    fn tracking_method(&self) -> Result<TrackingMethod> {
        match self {
            ElementConfig::Drift(c) => tracking_method(&c.tracking_method),
            ElementConfig::Quadrupole(c) => tracking_method(&c.tracking_method),
            ElementConfig::Dipole(c) => tracking_method(&c.tracking_method),
            ElementConfig::Marker(c) => tracking_method(&c.tracking_method),
            ElementConfig::CustomTransferMap(c) => tracking_method(&c.tracking_method),
        }
    }

    pub fn build(&self) -> Result<Element> {
        let mut element: Element = match self {
            ElementConfig::Drift(c) => Drift::new(c.length.to_batched()?).into(),
            ElementConfig::Quadrupole(c) => {
                let mut quad = Quadrupole::new(c.length.to_batched()?, batched_or(&c.k1, 0.0)?)?
                    .with_tilt(batched_or(&c.tilt, 0.0)?)?
                    .with_num_steps(c.num_steps)?;
                if let Some(m) = &c.misalignment {
                    quad = quad.with_misalignment(m.to_offsets()?)?;
                }
                quad.into()
            }
            ElementConfig::Dipole(c) => {
                Dipole::new(c.length.to_batched()?, batched_or(&c.angle, 0.0)?)?
                    .with_k1(batched_or(&c.k1, 0.0)?)?
                    .with_edges(batched_or(&c.e1, 0.0)?, batched_or(&c.e2, 0.0)?)?
                    .with_tilt(batched_or(&c.tilt, 0.0)?)?
                    .into()
            }
            ElementConfig::Marker(_) => Marker::new().into(),
            ElementConfig::CustomTransferMap(c) => {
                CustomTransferMap::new(c.transfer_map.to_matrices()?)
                    .with_length(batched_or(&c.length, 0.0)?)?
                    .into()
            }
        };
        element.set_tracking_method(self.tracking_method()?)?;
        if let Some(name) = self.name() {
            element = rename(element, name);
        }
        Ok(element)
    }
}

fn rename(element: Element, name: &str) -> Element {
    match element {
        Element::Drift(e) => e.with_name(name).into(),
        Element::Quadrupole(e) => e.with_name(name).into(),
        Element::Dipole(e) => e.with_name(name).into(),
        Element::Marker(e) => e.with_name(name).into(),
        Element::CustomTransferMap(e) => e.with_name(name).into(),
    }
}
