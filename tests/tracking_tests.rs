mod common;

use approx::assert_abs_diff_eq;
use beamline_rs::{
    Batched, Beam, BeamParameters, Dipole, Drift, Element, Float, Matrix6, Moments,
    ParameterBeam, ParticleBeam, Quadrupole, Segment, TrackError, TrackingMethod,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn particles(beam: &Beam) -> &Batched<Vec<beamline_rs::Vector7>> {
    beam.as_particle_beam().unwrap().particles()
}

fn assert_same_coordinates(a: &Beam, b: &Beam, coords: &[usize], epsilon: Float) {
    for (p, q) in particles(a).as_slice()[0]
        .iter()
        .zip(particles(b).as_slice()[0].iter())
    {
        for &i in coords {
            assert_abs_diff_eq!(p[i], q[i], epsilon = epsilon);
        }
    }
}

/// Every covariance entry within `tol` of the product of the two sigmas.
fn assert_cov_close(sampled: &Matrix6, expected: &Matrix6, tol: Float) {
    for i in 0..6 {
        for j in 0..6 {
            let scale = (expected[(i, i)] * expected[(j, j)]).sqrt();
            assert_abs_diff_eq!(sampled[(i, j)], expected[(i, j)], epsilon = tol * scale);
        }
    }
}

fn sampled(beam: &Beam, num_particles: usize) -> Beam {
    let mut rng = StdRng::seed_from_u64(99);
    let pb = beam.as_parameter_beam().unwrap();
    Beam::from(pb.as_particle_beam(num_particles, &mut rng).unwrap())
}

#[test]
fn output_shape_follows_element_shape() {
    let beam = common::parameter_beam();

    let quad = Quadrupole::new(0.2, vec![1.0, 2.0, 3.0]).unwrap();
    let out = quad.track(&beam).unwrap();
    assert_eq!(out.batch_shape(), &[3]);
    assert_eq!(out.cov().shape(), &[3]);

    let quad = Quadrupole::new(
        Batched::from_rows(vec![vec![0.1], vec![0.2]]).unwrap(),
        vec![1.0, 2.0, 3.0],
    )
    .unwrap();
    let out = quad.track(&beam).unwrap();
    assert_eq!(out.batch_shape(), &[2, 3]);
    assert_eq!(out.energy().shape(), &[2, 3]);
}

#[test]
fn particle_shape_keeps_trailing_dimensions() {
    let beam = common::particle_beam(100);
    let quad = Quadrupole::new(0.2, vec![1.0, 2.0, 3.0]).unwrap();

    for method in [TrackingMethod::Matrix, TrackingMethod::Integrator] {
        let out = quad.clone().with_tracking_method(method).track(&beam).unwrap();
        let out = out.as_particle_beam().unwrap();
        assert_eq!(out.particles_shape(), vec![3, 100, 7]);
        assert_eq!(out.particle_charges().shape(), &[3]);
    }

    let wide = beam.broadcast(&[4, 2]);
    let line = Segment::new(vec![
        Drift::new(vec![0.5, 1.0]).into(),
        Quadrupole::new(0.2, 4.0).unwrap().into(),
    ]);
    let out = line.track(&wide).unwrap();
    assert_eq!(out.as_particle_beam().unwrap().particles_shape(), vec![4, 2, 100, 7]);
}

#[test]
fn broadcasting_is_invariant_per_sample() {
    let beam = common::parameter_beam();
    let quad: Element = Quadrupole::new(0.2, vec![1.0, -2.0, 3.0])
        .unwrap()
        .with_tilt(0.1)
        .unwrap()
        .into();
    let reference = quad.track(&beam).unwrap();

    let wide = quad.broadcast(&[2]).track(&beam.broadcast(&[2])).unwrap();
    assert_eq!(wide.batch_shape(), &[2, 3]);
    let sigma = wide.sigma_x();
    for i in 0..2 {
        assert_eq!(sigma.subbatch(&[i]).unwrap(), reference.sigma_x());
    }
}

#[test]
fn fused_segment_matches_sequential_particles() {
    let line = common::fodo();
    let beam = common::particle_beam(500);
    let fused = line.track(&beam).unwrap();

    let mut sequential = beam.clone();
    for e in line.elements().iter() {
        sequential = e.track(&sequential).unwrap();
    }
    for (a, b) in particles(&fused).as_slice()[0]
        .iter()
        .zip(particles(&sequential).as_slice()[0].iter())
    {
        for i in 0..7 {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-14);
        }
    }
}

#[test]
fn integrator_agrees_with_matrix_for_weak_quadrupole() {
    let beam = common::particle_beam(1000);
    let quad = Quadrupole::new(0.1, 0.5).unwrap();
    let matrix = quad.track(&beam).unwrap();
    let integrated = quad
        .clone()
        .with_tracking_method(TrackingMethod::Integrator)
        .track(&beam)
        .unwrap();
    for (a, b) in particles(&matrix).as_slice()[0]
        .iter()
        .zip(particles(&integrated).as_slice()[0].iter())
    {
        for i in 0..6 {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-10);
        }
    }
}

#[test]
fn integrator_discrepancy_is_independent_of_steps() {
    let beam = common::particle_beam(500);
    let quad = Quadrupole::new(0.3, 8.0).unwrap();
    let matrix = quad.track(&beam).unwrap();

    let integrated = |num_steps: usize| -> Beam {
        quad.clone()
            .with_tracking_method(TrackingMethod::Integrator)
            .with_num_steps(num_steps)
            .unwrap()
            .track(&beam)
            .unwrap()
    };
    let discrepancy = |out: &Beam| -> Float {
        particles(&matrix).as_slice()[0]
            .iter()
            .zip(particles(out).as_slice()[0].iter())
            .map(|(a, b)| (0..4).map(|i| (a[i] - b[i]).abs()).fold(0.0, Float::max))
            .fold(0.0, Float::max)
    };

    // every step solves the linear motion exactly at the particle's own
    // momentum, so splitting the magnet only reorders exact compositions
    let single = integrated(1);
    let reference = discrepancy(&single);
    assert!(reference > 0.0);
    for n in [2, 5, 20] {
        let out = integrated(n);
        assert_abs_diff_eq!(discrepancy(&out), reference, epsilon = 1e-6 * reference + 1e-18);
        assert_same_coordinates(&out, &single, &[0, 1, 2, 3, 5], 1e-16);
    }
}

#[test]
fn integrator_agrees_with_matrix_for_tilted_misaligned_quadrupole() {
    let mut rng = StdRng::seed_from_u64(5);
    let beam = Beam::from(
        ParticleBeam::from_parameters(1000, &BeamParameters::default(), &mut rng).unwrap(),
    );
    let quad = Quadrupole::new(0.1, 0.5)
        .unwrap()
        .with_tilt(0.2)
        .unwrap()
        .with_misalignment(Batched::scalar([1e-5, -5e-6]))
        .unwrap();
    let matrix = quad.track(&beam).unwrap();
    let integrated = quad
        .with_tracking_method(TrackingMethod::Integrator)
        .with_num_steps(4)
        .unwrap()
        .track(&beam)
        .unwrap();
    assert_same_coordinates(&matrix, &integrated, &[0, 1, 2, 3, 5], 1e-10);
}

#[test]
fn integrator_broadcasting_is_invariant_per_sample() {
    let beam = common::particle_beam(200);
    let quad: Element = Quadrupole::new(0.2, vec![1.0, -2.0, 3.0])
        .unwrap()
        .with_tilt(0.1)
        .unwrap()
        .with_misalignment(Batched::scalar([2e-5, 1e-5]))
        .unwrap()
        .with_tracking_method(TrackingMethod::Integrator)
        .with_num_steps(3)
        .unwrap()
        .into();
    let reference = quad.track(&beam).unwrap();

    let wide = quad.broadcast(&[2]).track(&beam.broadcast(&[2])).unwrap();
    assert_eq!(wide.batch_shape(), &[2, 3]);
    for i in 0..2 {
        assert_eq!(&particles(&wide).subbatch(&[i]).unwrap(), particles(&reference));
    }
}

#[test]
fn dispersive_beam_converts_with_its_correlations() {
    let params = BeamParameters {
        sigma_x: Batched::scalar(1e-5),
        sigma_p: Batched::scalar(1e-2),
        ..Default::default()
    };
    let beam = Beam::from(ParameterBeam::from_parameters(&params).unwrap());
    let bend = Dipole::new(1.0, 0.5).unwrap();
    let bent = bend.track(&beam).unwrap();
    let expected = bent.cov().as_slice()[0];
    // the bend couples x to the momentum deviation
    assert!(expected[(0, 5)] > 1e-5);

    let converted = sampled(&bent, 200_000);
    let cov = converted.cov().as_slice()[0];
    assert_cov_close(&cov, &expected, 0.02);
    assert_abs_diff_eq!(cov[(0, 5)], expected[(0, 5)], epsilon = 0.02 * expected[(0, 5)]);

    // a second bend adds dispersion on top of the sampled correlation
    let after_parameter = bend.track(&bent).unwrap().sigma_x().as_slice()[0];
    let after_particle = bend.track(&converted).unwrap().sigma_x().as_slice()[0];
    assert_abs_diff_eq!(after_particle, after_parameter, epsilon = 0.02 * after_parameter);
}

#[test]
fn tilted_quadrupole_coupling_survives_conversion() {
    let params = BeamParameters {
        sigma_x: Batched::scalar(1e-4),
        sigma_y: Batched::scalar(1e-5),
        ..Default::default()
    };
    let beam = Beam::from(ParameterBeam::from_parameters(&params).unwrap());
    let quad = Quadrupole::new(0.2, 4.2)
        .unwrap()
        .with_tilt(std::f64::consts::FRAC_PI_4 as Float)
        .unwrap();
    let coupled = quad.track(&beam).unwrap();
    let expected = coupled.cov().as_slice()[0];
    let scale = (expected[(0, 0)] * expected[(2, 2)]).sqrt();
    assert!(expected[(0, 2)].abs() > 0.1 * scale);

    let cov = sampled(&coupled, 200_000).cov().as_slice()[0];
    assert_cov_close(&cov, &expected, 0.02);
    assert_eq!(cov[(0, 2)].signum(), expected[(0, 2)].signum());
}

#[test]
fn zero_length_integrator_leaves_particles_unchanged() {
    let beam = common::particle_beam(200);
    let quad = Quadrupole::new(0.0, 10.0)
        .unwrap()
        .with_tracking_method(TrackingMethod::Integrator);
    let out = quad.track(&beam).unwrap();
    for (a, b) in particles(&beam).as_slice()[0]
        .iter()
        .zip(particles(&out).as_slice()[0].iter())
    {
        for i in 0..7 {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-12);
        }
    }
}

#[test]
fn golden_quadrupole_covariance() {
    let (l, k1): (Float, Float) = (0.2, 4.2);
    let beam = common::parameter_beam();
    let out = Quadrupole::new(l, k1).unwrap().track(&beam).unwrap();

    let c = beam.cov().as_slice()[0];
    let r00 = (k1.sqrt() * l).cos();
    let r01 = (k1.sqrt() * l).sin() / k1.sqrt();
    let expected =
        r00 * r00 * c[(0, 0)] + 2.0 * r00 * r01 * c[(0, 1)] + r01 * r01 * c[(1, 1)];
    assert_abs_diff_eq!(out.cov().as_slice()[0][(0, 0)], expected, epsilon = 1e-22);
    assert!(out.sigma_x().as_slice()[0] < 1e-5);
}

#[test]
fn zero_strength_quadrupole_is_a_drift_on_both_paths() {
    let beam = common::particle_beam(300);
    for method in [TrackingMethod::Matrix, TrackingMethod::Integrator] {
        let quad = Quadrupole::new(0.6, 0.0)
            .unwrap()
            .with_tracking_method(method)
            .track(&beam)
            .unwrap();
        let drift = Drift::new(0.6)
            .with_tracking_method(method)
            .track(&beam)
            .unwrap();
        for (a, b) in particles(&quad).as_slice()[0]
            .iter()
            .zip(particles(&drift).as_slice()[0].iter())
        {
            for i in 0..7 {
                assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn tracking_leaves_input_untouched() {
    let beam = common::particle_beam(50);
    let copy = beam.clone();
    common::fodo().track(&beam).unwrap();
    assert_eq!(beam, copy);
}

#[test]
fn parameter_and_particle_moments_agree() {
    let beam = common::particle_beam(20_000);
    let reduced = Beam::from(beam.as_particle_beam().unwrap().as_parameter_beam().unwrap());
    let line = common::fodo();
    let a = line.track(&beam).unwrap();
    let b = line.track(&reduced).unwrap();
    for (x, y) in a.sigma_x().iter().zip(b.sigma_x().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-15);
    }
    for (x, y) in a.emittance_y().iter().zip(b.emittance_y().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-17);
    }
}

#[test]
fn integrator_needs_particles() {
    let quad = Quadrupole::new(0.2, 1.0)
        .unwrap()
        .with_tracking_method(TrackingMethod::Integrator);
    let err = quad.track(&common::parameter_beam()).unwrap_err();
    assert!(matches!(err, TrackError::CapabilityMismatch(_)));
}

#[test]
fn subcell_tracks_like_the_full_range() {
    let line = common::fodo();
    let beam = common::parameter_beam();
    let sub = line.subcell("start", "end").unwrap();
    assert_eq!(sub.len(), line.len());
    assert_eq!(sub.track(&beam).unwrap(), line.track(&beam).unwrap());
}
