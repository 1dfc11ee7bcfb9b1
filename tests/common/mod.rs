use beamline_rs::{
    Batched, Beam, BeamParameters, Drift, Marker, ParameterBeam, ParticleBeam, Quadrupole,
    Segment,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub fn parameter_beam() -> Beam {
    // A zero-mean Gaussian beam that can be used in testing
    let params = BeamParameters {
        sigma_x: Batched::scalar(1e-5),
        ..Default::default()
    };
    Beam::from(ParameterBeam::from_parameters(&params).unwrap())
}

pub fn particle_beam(num_particles: usize) -> Beam {
    let params = BeamParameters {
        sigma_x: Batched::scalar(1e-5),
        sigma_y: Batched::scalar(2e-5),
        sigma_p: Batched::scalar(1e-4),
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(1234);
    Beam::from(ParticleBeam::from_parameters(num_particles, &params, &mut rng).unwrap())
}

pub fn fodo() -> Segment {
    Segment::new(vec![
        Marker::new().with_name("start").into(),
        Quadrupole::new(0.2, 4.2).unwrap().with_name("QF").into(),
        Drift::new(0.5).with_name("D1").into(),
        Quadrupole::new(0.2, -4.2).unwrap().with_name("QD").into(),
        Drift::new(0.5).with_name("D2").into(),
        Marker::new().with_name("end").into(),
    ])
    .with_name("fodo")
}
