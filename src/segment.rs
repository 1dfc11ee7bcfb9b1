//! Ordered composition of elements.

use crate::batch::Batched;
use crate::beam::{Beam, Moments};
use crate::elements::{generate_name, Element};
use crate::error::{Result, TrackError};
use crate::{optics, Float, Matrix7};
use tracing::debug;

/// A named line of elements, tracked in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    name: String,
    elements: Vec<Element>,
}

impl Segment {
    pub fn new(elements: Vec<Element>) -> Self {
        Segment {
            name: generate_name(),
            elements,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.elements
            .iter()
            .position(|e| e.name() == name)
            .ok_or_else(|| {
                TrackError::lookup_failure(format!("no element `{}` in `{}`", name, self.name))
            })
    }

    pub fn element(&self, name: &str) -> Result<&Element> {
        let i = self.position(name)?;
        Ok(&self.elements[i])
    }

    pub fn element_mut(&mut self, name: &str) -> Result<&mut Element> {
        let i = self.position(name)?;
        Ok(&mut self.elements[i])
    }

    /// Sum of the member lengths, broadcast over their batch shapes.
    pub fn length(&self) -> Result<Batched<Float>> {
        self.elements
            .iter()
            .try_fold(Batched::scalar(0.0), |total, e| {
                total.zip_map(&e.length(), |a, b| a + b)
            })
    }

    pub fn is_skippable(&self) -> bool {
        self.elements.iter().all(|e| e.is_skippable())
    }

    /// Product of all member maps. Every member must be matrix tracked.
    pub fn transfer_map(&self, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
        if let Some(e) = self.elements.iter().find(|e| !e.is_skippable()) {
            return Err(TrackError::invalid_configuration(format!(
                "`{}` in `{}` is not matrix tracked, the segment has no single transfer map",
                e.name(),
                self.name
            )));
        }
        fused_map(&self.elements, energy)
    }

    /// Track `beam` through every element. Consecutive matrix tracked
    /// elements are multiplied into one map and applied once.
    pub fn track(&self, beam: &Beam) -> Result<Beam> {
        let mut beam = beam.clone();
        let mut run_start = 0;
        for (i, e) in self.elements.iter().enumerate() {
            if e.is_skippable() {
                continue;
            }
            beam = self.track_run(&self.elements[run_start..i], beam)?;
            debug!(element = e.name(), kind = e.kind(), "integrating");
            beam = e.track(&beam)?;
            run_start = i + 1;
        }
        self.track_run(&self.elements[run_start..], beam)
    }

    fn track_run(&self, run: &[Element], beam: Beam) -> Result<Beam> {
        match run {
            [] => Ok(beam),
            [single] => {
                debug!(element = single.name(), kind = single.kind(), "tracking");
                single.track(&beam)
            }
            _ => {
                debug!(
                    segment = self.name.as_str(),
                    first = run[0].name(),
                    elements = run.len(),
                    "tracking fused run"
                );
                let tm = fused_map(run, beam.energy())?;
                beam.transform(&tm)
            }
        }
    }

    /// Elements from `start` through `end`, both included.
    pub fn subcell(&self, start: &str, end: &str) -> Result<Segment> {
        let first = self.position(start)?;
        let last = self.position(end)?;
        if last < first {
            return Err(TrackError::lookup_failure(format!(
                "`{}` comes before `{}` in `{}`",
                end, start, self.name
            )));
        }
        Ok(Segment {
            name: format!("{}_{}_{}", self.name, start, end),
            elements: self.elements[first..=last].to_vec(),
        })
    }

    /// Copy of the segment with `extra` prepended to every element's
    /// parameter shapes.
    pub fn broadcast(&self, extra: &[usize]) -> Segment {
        Segment {
            name: self.name.clone(),
            elements: self.elements.iter().map(|e| e.broadcast(extra)).collect(),
        }
    }

    /// Split every member, keeping the order.
    pub fn split(&self, resolution: Float) -> Result<Segment> {
        let mut elements = Vec::new();
        for e in self.elements.iter() {
            elements.extend(e.split(resolution)?);
        }
        Ok(Segment {
            name: self.name.clone(),
            elements,
        })
    }
}

fn fused_map(elements: &[Element], energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
    let mut maps = Vec::with_capacity(elements.len());
    for e in elements.iter() {
        maps.push(e.transfer_map(energy)?);
    }
    optics::chain(&maps)
}
