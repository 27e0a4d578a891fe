//! Volume grid pipeline tests.
//!
//! Exercises the fixed stage order (Clear -> Insert -> Resolve -> Divergence
//! -> PressureEOS -> PressureSolve -> PressureGradient) through the public
//! grid API, across all three splat methods.

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strandsim::volume::splat::splat_group;
use strandsim::volume::VolumeGrid;
use strandsim::{GroupBounds, PressureMode, SplatMethod, VolumeSettings};

fn fitted_grid(resolution: u32, side: f32) -> VolumeGrid {
    let mut grid = VolumeGrid::new();
    grid.set_resolution(resolution);
    grid.fit_bounds(
        &GroupBounds::new(Vec3::splat(side * 0.5), Vec3::splat(side * 0.5)),
        0.0,
    );
    grid
}

/// Splat-then-resolve density of one static particle of known diameter and
/// interval matches the volumetric scaling law
/// (pi/4 * d^2 * interval * scale^3) / cell_volume, for every splat method.
#[test]
fn test_density_round_trip_all_methods() {
    let diameter = 0.02f32;
    let interval = 0.25f32;
    let scale = 1.5f32;
    let particle_volume =
        std::f32::consts::FRAC_PI_4 * diameter * diameter * interval * scale.powi(3);

    for method in [
        SplatMethod::Combined,
        SplatMethod::Split,
        SplatMethod::Rasterized,
    ] {
        let mut grid = fitted_grid(16, 4.0);
        let p = grid.cell_center(8, 8, 8);
        grid.clear();
        splat_group(
            &mut grid,
            &[p],
            &[Vec3::ZERO],
            None,
            particle_volume,
            method,
        );
        grid.resolve(&VolumeSettings::default());

        let cell_volume = grid.cell_size().powi(3);
        let expected = particle_volume / cell_volume;
        let got = grid.density()[grid.cell_index(8, 8, 8)];
        assert!(
            (got - expected).abs() <= expected * 1e-4,
            "{:?}: expected density {}, got {}",
            method,
            expected,
            got
        );

        // Total mass is conserved across the splat footprint
        let total: f32 = grid.density().iter().sum::<f32>() * cell_volume;
        assert!(
            (total - particle_volume).abs() <= particle_volume * 1e-4,
            "{:?}: total mass {} vs particle volume {}",
            method,
            total,
            particle_volume
        );
    }
}

/// A particle between cell centers spreads its mass trilinearly; the
/// rasterized path agrees with the float path within the fixed-point
/// precision budget.
#[test]
fn test_rasterized_matches_float_within_precision() {
    // Deterministic scatter of particles inside the grid interior
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let positions: Vec<Vec3> = (0..50)
        .map(|_| {
            Vec3::new(
                rng.gen_range(0.5..3.5),
                rng.gen_range(0.5..3.5),
                rng.gen_range(0.5..3.5),
            )
        })
        .collect();
    let velocities: Vec<Vec3> = positions.iter().map(|p| *p * 0.1).collect();
    let settings = VolumeSettings::default();

    let mut float_grid = fitted_grid(8, 4.0);
    float_grid.clear();
    splat_group(
        &mut float_grid,
        &positions,
        &velocities,
        None,
        0.01,
        SplatMethod::Combined,
    );
    float_grid.resolve(&settings);

    let mut fx_grid = fitted_grid(8, 4.0);
    fx_grid.clear();
    splat_group(
        &mut fx_grid,
        &positions,
        &velocities,
        None,
        0.01,
        SplatMethod::Rasterized,
    );
    fx_grid.resolve(&settings);

    for (a, b) in float_grid.density().iter().zip(fx_grid.density()) {
        assert!((a - b).abs() < 1e-4, "density {} vs {}", a, b);
    }
    for (a, b) in float_grid.velocity().iter().zip(fx_grid.velocity()) {
        assert!((*a - *b).length() < 1e-4, "velocity {:?} vs {:?}", a, b);
    }
}

/// Pressure solve with zero iterations returns the EOS guess verbatim;
/// with iterations it departs from the guess.
#[test]
fn test_zero_pressure_iterations_is_eos_guess() {
    let settings = VolumeSettings {
        pressure_mode: PressureMode::DensityEquals,
        rest_density: 0.5,
        ..Default::default()
    };

    let build = |iterations: u32| {
        let mut grid = fitted_grid(8, 8.0);
        // A cluster of particles creates a density error against the target
        let positions: Vec<Vec3> = (0..20)
            .map(|i| Vec3::splat(4.0) + Vec3::new(i as f32 * 0.01, 0.0, 0.0))
            .collect();
        let velocities = vec![Vec3::ZERO; positions.len()];
        grid.clear();
        splat_group(
            &mut grid,
            &positions,
            &velocities,
            None,
            0.5,
            SplatMethod::Combined,
        );
        grid.resolve(&settings);
        grid.compute_divergence();
        grid.pressure_eos(&settings);
        let eos: Vec<f32> = grid.pressure().to_vec();
        grid.pressure_solve(iterations);
        (eos, grid.pressure().to_vec())
    };

    let (eos, solved) = build(0);
    assert_eq!(eos, solved, "0 iterations must keep the EOS guess");

    let (eos, solved) = build(8);
    assert_ne!(eos, solved, "iterations must refine the guess");
}

/// The pressure gradient points away from a density spike, so the coupling
/// impulse (-gradient) pushes particles apart.
#[test]
fn test_pressure_gradient_points_away_from_cluster() {
    let settings = VolumeSettings {
        pressure_mode: PressureMode::DensityEquals,
        rest_density: 0.001,
        ..Default::default()
    };
    let mut grid = fitted_grid(8, 8.0);
    let center = Vec3::splat(4.0);
    let positions = vec![center; 30];
    let velocities = vec![Vec3::ZERO; 30];
    grid.clear();
    splat_group(
        &mut grid,
        &positions,
        &velocities,
        None,
        0.5,
        SplatMethod::Combined,
    );
    grid.resolve(&settings);
    grid.compute_divergence();
    grid.pressure_eos(&settings);
    grid.pressure_solve(4);
    grid.compute_pressure_gradient();

    // Sample beside the spike: the gradient x-component must point toward
    // the spike (positive pressure inside), i.e. sampling right of center
    // gives a negative-x gradient... the impulse -gradient pushes outward.
    let sample = grid.sample_pressure_gradient(center + Vec3::new(1.0, 0.0, 0.0));
    assert!(
        sample.x < 0.0,
        "expected gradient pointing back toward the spike, got {:?}",
        sample
    );
}

/// Changing resolution recreates buffers and reports the change exactly once.
#[test]
fn test_resize_reporting() {
    let mut grid = VolumeGrid::new();
    assert!(grid.set_resolution(32));
    assert!(!grid.set_resolution(32));
    assert!(grid.set_resolution(16));
    assert_eq!(grid.resolution(), 16);
    assert_eq!(grid.cell_count(), 16 * 16 * 16);
}
