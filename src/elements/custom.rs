use super::{generate_name, Element};
use crate::batch::{broadcast_shape_of, Batched};
use crate::beam::{Beam, Moments};
use crate::error::{Result, TrackError};
use crate::{optics, Float, Matrix7};

/// Element defined directly by its 7x7 transfer map. The map does not depend
/// on the beam energy.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomTransferMap {
    name: String,
    shape: Vec<usize>,
    length: Batched<Float>,
    transfer_map: Batched<Matrix7>,
}

impl CustomTransferMap {
    pub fn new(transfer_map: Batched<Matrix7>) -> Self {
        CustomTransferMap {
            name: generate_name(),
            shape: transfer_map.shape().to_vec(),
            length: Batched::from_elem(transfer_map.shape(), 0.0),
            transfer_map,
        }
    }

    /// Length the map spans along the design orbit.
    pub fn with_length(mut self, length: impl Into<Batched<Float>>) -> Result<Self> {
        let length = length.into();
        let shape = broadcast_shape_of(&[length.shape(), &self.shape])?;
        self.length = length.broadcast_to(&shape)?;
        self.transfer_map = self.transfer_map.broadcast_to(&shape)?;
        self.shape = shape;
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Collapse a run of matrix tracked elements into one map evaluated at
    /// `energy`. The length is the sum of the member lengths.
    pub fn from_merging(elements: &[Element], energy: &Batched<Float>) -> Result<Self> {
        let mut maps = Vec::with_capacity(elements.len());
        let mut length = Batched::scalar(0.0);
        for e in elements.iter() {
            if !e.is_skippable() {
                return Err(TrackError::invalid_configuration(format!(
                    "`{}` is not matrix tracked and cannot be merged",
                    e.name()
                )));
            }
            maps.push(e.transfer_map(energy)?);
            length = length.zip_map(&e.length(), |a, b| a + b)?;
        }
        CustomTransferMap::new(optics::chain(&maps)?).with_length(length)
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

    pub fn transfer_map(&self, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
        self.transfer_map.zip_map(energy, |m, _| *m)
    }

    pub fn track(&self, beam: &Beam) -> Result<Beam> {
        beam.transform(&self.transfer_map(beam.energy())?)
    }

    pub fn broadcast(&self, extra: &[usize]) -> CustomTransferMap {
        let mut shape = extra.to_vec();
        shape.extend_from_slice(&self.shape);
        CustomTransferMap {
            name: self.name.clone(),
            shape,
            length: self.length.broadcast(extra),
            transfer_map: self.transfer_map.broadcast(extra),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{Drift, Quadrupole, TrackingMethod};
    use crate::E_TOL;
    use approx::assert_abs_diff_eq;

    #[test]
    fn map_is_energy_independent() {
        let mut tm = Matrix7::identity();
        tm[(0, 1)] = 3.0;
        let custom = CustomTransferMap::new(Batched::scalar(tm));
        let maps = custom.transfer_map(&Batched::from(vec![1e7, 1e9])).unwrap();
        assert_eq!(maps.shape(), &[2]);
        assert_eq!(maps.as_slice()[0], maps.as_slice()[1]);
        assert_eq!(custom.length().as_slice(), &[0.0]);
    }

    #[test]
    fn merging_matches_sequential_maps() {
        let energy = Batched::scalar(1e8);
        let elements = vec![
            Element::from(Drift::new(0.5)),
            Element::from(Quadrupole::new(0.2, 3.0).unwrap()),
            Element::from(Drift::new(0.25)),
        ];
        let merged = CustomTransferMap::from_merging(&elements, &energy).unwrap();
        assert_abs_diff_eq!(merged.length().as_slice()[0], 0.95, epsilon = E_TOL);

        let maps: Vec<_> = elements.iter().map(|e| e.transfer_map(&energy).unwrap()).collect();
        let expected = optics::chain(&maps).unwrap();
        assert_eq!(merged.transfer_map(&energy).unwrap(), expected);
    }

    #[test]
    fn merging_refuses_integrator_elements() {
        let elements = vec![Element::from(
            Drift::new(0.5).with_tracking_method(TrackingMethod::Integrator),
        )];
        let res = CustomTransferMap::from_merging(&elements, &Batched::scalar(1e8));
        assert!(matches!(res, Err(TrackError::InvalidConfiguration(_))));
    }
}
