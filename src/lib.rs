pub mod batch;
pub mod beam;
pub mod config;
pub mod elements;
pub mod error;
pub mod integrator;
pub mod optics;
pub mod segment;

pub use batch::Batched;
pub use beam::{Beam, BeamParameters, Moments, ParameterBeam, ParticleBeam};
pub use config::Config;
pub use elements::{
    CustomTransferMap, Dipole, Drift, Element, Marker, Quadrupole, TrackingMethod,
};
pub use error::{Result, TrackError};
pub use segment::Segment;

use anyhow::Context;
use nalgebra::{SMatrix, SVector};
use tracing::{info, warn};

// We use a type alias for f64/Float to easily support
// double and single precision.
#[cfg(feature = "dprec")]
pub type Float = f64;

#[cfg(not(feature = "dprec"))]
pub type Float = f32;

/// Homogeneous transfer map acting on `(x, px, y, py, tau, p, 1)`.
pub type Matrix7 = SMatrix<Float, 7, 7>;
/// One particle, `(x, px, y, py, tau, p, 1)`.
pub type Vector7 = SVector<Float, 7>;
/// Covariance of the six phase space coordinates.
pub type Matrix6 = SMatrix<Float, 6, 6>;
pub type Vector6 = SVector<Float, 6>;

/// Electron rest energy in eV.
pub const ELECTRON_MASS_EV: Float = 510998.95;

pub const PRTL_CHUNK_SIZE: usize = 1024;

#[cfg(all(test, feature = "dprec"))]
pub(crate) const E_TOL: Float = 1e-12;

#[cfg(all(test, not(feature = "dprec")))]
pub(crate) const E_TOL: Float = 1e-5;

/// Track the configured beam through the configured lattice and report the
/// beam moments before and after.
pub fn run(cfg: Config) -> anyhow::Result<Beam> {
    let beam = cfg
        .beam
        .build()
        .context("Could not build the beam from the config")?;
    info!(
        kind = beam.kind(),
        shape = ?beam.batch_shape(),
        "initialized beam"
    );
    log_moments("incoming", &beam);

    let segment = cfg
        .build_segment()
        .context("Could not build the lattice from the config")?;
    if segment.is_empty() {
        warn!("the lattice is empty, the beam passes unchanged");
    }
    info!(
        segment = segment.name(),
        elements = segment.len(),
        "tracking"
    );

    let out = segment
        .track(&beam)
        .with_context(|| format!("Tracking through `{}` failed", segment.name()))?;
    log_moments("outgoing", &out);
    Ok(out)
}

fn log_moments(label: &str, beam: &Beam) {
    info!(
        beam = label,
        mu_x = ?beam.mu_x().as_slice(),
        mu_y = ?beam.mu_y().as_slice(),
        sigma_x = ?beam.sigma_x().as_slice(),
        sigma_y = ?beam.sigma_y().as_slice(),
        emittance_x = ?beam.emittance_x().as_slice(),
        emittance_y = ?beam.emittance_y().as_slice(),
        "moments"
    );
}

#[cfg(test)]
pub(crate) fn build_test_beam() -> Beam {
    Beam::from(
        ParameterBeam::from_parameters(&BeamParameters {
            sigma_x: Batched::scalar(1e-5),
            sigma_y: Batched::scalar(2e-5),
            ..Default::default()
        })
        .unwrap(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_tracks_configured_line() {
        let cfg = Config::from_toml_str(
            r#"
            [beam]
            sigma_x = 1e-5

            [[lattice]]
            type = "quadrupole"
            length = 0.2
            k1 = 4.2

            [[lattice]]
            type = "drift"
            length = 1.0
            "#,
        )
        .unwrap();
        let out = run(cfg).unwrap();
        assert!(out.sigma_x().as_slice()[0] > 0.0);
    }

    #[test]
    fn run_reports_tracking_errors() {
        let cfg = Config::from_toml_str(
            r#"
            [beam]
            kind = "parameter"

            [[lattice]]
            type = "quadrupole"
            length = 0.2
            tracking_method = "integrator"
            "#,
        )
        .unwrap();
        let err = run(cfg).unwrap_err();
        assert!(err.to_string().contains("Tracking"));
    }

    #[test]
    fn test_beam_is_scalar() {
        let beam = build_test_beam();
        assert!(beam.batch_shape().is_empty());
        assert!((beam.sigma_x().as_slice()[0] - 1e-5).abs() < E_TOL);
    }
}
