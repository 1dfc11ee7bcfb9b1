use super::generate_name;
use crate::batch::Batched;
use crate::{Float, Matrix7};

/// Zero length placeholder that leaves the beam untouched. Useful as a named
/// anchor for `Segment::subcell`.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    name: String,
}

impl Marker {
    pub fn new() -> Self {
        Marker {
            name: generate_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity, one per energy sample.
    pub fn transfer_map(&self, energy: &Batched<Float>) -> Batched<Matrix7> {
        energy.map(|_| Matrix7::identity())
    }
}

impl Default for Marker {
    fn default() -> Self {
        Marker::new()
    }
}
