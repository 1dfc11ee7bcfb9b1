use super::{conform, generate_name, split_count};
use crate::batch::{broadcast_shape_of, Batched};
use crate::beam::{Beam, Moments};
use crate::error::Result;
use crate::{optics, Float, Matrix7};
use itertools::izip;
use tracing::warn;

/// Sector bending magnet with optional gradient and pole face rotations.
/// Fringe fields are not modelled; the edges act as thin focusing kicks.
#[derive(Debug, Clone, PartialEq)]
pub struct Dipole {
    name: String,
    shape: Vec<usize>,
    length: Batched<Float>,
    angle: Batched<Float>,
    k1: Batched<Float>,
    e1: Batched<Float>,
    e2: Batched<Float>,
    tilt: Batched<Float>,
}

impl Dipole {
    pub fn new(
        length: impl Into<Batched<Float>>,
        angle: impl Into<Batched<Float>>,
    ) -> Result<Self> {
        let mut dipole = Dipole {
            name: generate_name(),
            shape: Vec::new(),
            length: length.into(),
            angle: angle.into(),
            k1: Batched::scalar(0.0),
            e1: Batched::scalar(0.0),
            e2: Batched::scalar(0.0),
            tilt: Batched::scalar(0.0),
        };
        dipole.unify()?;
        Ok(dipole)
    }

    fn unify(&mut self) -> Result<()> {
        let shape = broadcast_shape_of(&[
            self.length.shape(),
            self.angle.shape(),
            self.k1.shape(),
            self.e1.shape(),
            self.e2.shape(),
            self.tilt.shape(),
        ])?;
        for field in [
            &mut self.length,
            &mut self.angle,
            &mut self.k1,
            &mut self.e1,
            &mut self.e2,
            &mut self.tilt,
        ] {
            *field = field.broadcast_to(&shape)?;
        }
        self.shape = shape;
        Ok(())
    }

    pub fn with_k1(mut self, k1: impl Into<Batched<Float>>) -> Result<Self> {
        self.k1 = k1.into();
        self.unify()?;
        Ok(self)
    }

    /// Entry and exit pole face angles.
    pub fn with_edges(
        mut self,
        e1: impl Into<Batched<Float>>,
        e2: impl Into<Batched<Float>>,
    ) -> Result<Self> {
        self.e1 = e1.into();
        self.e2 = e2.into();
        self.unify()?;
        Ok(self)
    }

    pub fn with_tilt(mut self, tilt: impl Into<Batched<Float>>) -> Result<Self> {
        self.tilt = tilt.into();
        self.unify()?;
        Ok(self)
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

    pub fn angle(&self) -> &Batched<Float> {
        &self.angle
    }

    pub fn k1(&self) -> &Batched<Float> {
        &self.k1
    }

    pub fn e1(&self) -> &Batched<Float> {
        &self.e1
    }

    pub fn e2(&self) -> &Batched<Float> {
        &self.e2
    }

    pub fn tilt(&self) -> &Batched<Float> {
        &self.tilt
    }

    pub fn set_angle(&mut self, angle: impl Into<Batched<Float>>) -> Result<()> {
        self.angle = conform(angle.into(), &self.shape, "angle")?;
        Ok(())
    }

    pub fn set_k1(&mut self, k1: impl Into<Batched<Float>>) -> Result<()> {
        self.k1 = conform(k1.into(), &self.shape, "k1")?;
        Ok(())
    }

    /// Curvature `angle / length`; zero for a zero-length magnet.
    pub fn hx(&self) -> Result<Batched<Float>> {
        self.length
            .zip_map(&self.angle, |&l, &a| if l != 0.0 { a / l } else { 0.0 })
    }

    pub fn transfer_map(&self, energy: &Batched<Float>) -> Result<Batched<Matrix7>> {
        if self
            .length
            .iter()
            .zip(self.angle.iter())
            .any(|(&l, &a)| l == 0.0 && a != 0.0)
        {
            warn!(
                "dipole `{}` bends with zero length, treating it as straight",
                self.name
            );
        }

        let hx = self.hx()?;
        let shape = broadcast_shape_of(&[&self.shape, energy.shape()])?;
        let length = self.length.broadcast_to(&shape)?;
        let k1 = self.k1.broadcast_to(&shape)?;
        let hx = hx.broadcast_to(&shape)?;
        let e1 = self.e1.broadcast_to(&shape)?;
        let e2 = self.e2.broadcast_to(&shape)?;
        let tilt = self.tilt.broadcast_to(&shape)?;
        let energy = energy.broadcast_to(&shape)?;

        let maps = izip!(
            length.iter(),
            k1.iter(),
            hx.iter(),
            e1.iter(),
            e2.iter(),
            tilt.iter(),
            energy.iter()
        )
        .map(|(&l, &k, &h, &a, &b, &t, &e)| {
            let body = optics::rmatrix(l, k, h, 0.0, e);
            let edged = optics::dipole_edge_matrix(h, b) * body * optics::dipole_edge_matrix(h, a);
            optics::rotate(&edged, t)
        })
        .collect();
        Batched::from_vec(shape, maps)
    }

    pub fn track(&self, beam: &Beam) -> Result<Beam> {
        beam.transform(&self.transfer_map(beam.energy())?)
    }

    /// The bend is shared out evenly; the entry edge stays on the first piece
    /// and the exit edge on the last.
    pub fn split(&self, resolution: Float) -> Result<Vec<Dipole>> {
        let n = split_count(&self.length, resolution)?;
        let mut piece = self.clone();
        piece.length = self.length.map(|l| l / n as Float);
        piece.angle = self.angle.map(|a| a / n as Float);
        let no_edge = Batched::zeros(&self.shape);

        Ok((0..n)
            .map(|i| {
                let mut p = piece.clone();
                if i != 0 {
                    p.e1 = no_edge.clone();
                }
                if i != n - 1 {
                    p.e2 = no_edge.clone();
                }
                p
            })
            .collect())
    }

    pub fn broadcast(&self, extra: &[usize]) -> Dipole {
        let mut shape = extra.to_vec();
        shape.extend_from_slice(&self.shape);
        Dipole {
            name: self.name.clone(),
            shape,
            length: self.length.broadcast(extra),
            angle: self.angle.broadcast(extra),
            k1: self.k1.broadcast(extra),
            e1: self.e1.broadcast(extra),
            e2: self.e2.broadcast(extra),
            tilt: self.tilt.broadcast(extra),
        }
    }
}
