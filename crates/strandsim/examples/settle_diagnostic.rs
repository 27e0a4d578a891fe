//! Settling diagnostic: a block of strands draping over a sphere.
//!
//! Deterministic scenario (no RNG) printing per-interval metrics so behavior
//! can be locked over time and compared across solver methods.
//!
//! Run with: cargo run --example settle_diagnostic

use glam::{Mat4, Vec3};
use strandsim::{
    Boundary, BoundaryHandle, BoundaryShape, MemoryLayout, SimulationSettings, SolverMethod,
    SolverSettings, StrandGroupAsset, StrandSimulation, TimeInterval,
};

const STRANDS: usize = 64;
const PARTICLES: usize = 32;
const SPACING: f32 = 0.05;
const FRAMES: usize = 300;
const REPORT_STRIDE: usize = 30;

fn build_asset() -> StrandGroupAsset {
    let side = (STRANDS as f32).sqrt().ceil() as usize;
    let mut rest = Vec::with_capacity(STRANDS * PARTICLES);
    for s in 0..STRANDS {
        let x = (s % side) as f32 * 0.08;
        let z = (s / side) as f32 * 0.08;
        for i in 0..PARTICLES {
            rest.push(Vec3::new(x, -(i as f32) * SPACING, z));
        }
    }
    StrandGroupAsset::new(
        STRANDS,
        PARTICLES,
        MemoryLayout::Sequential,
        rest,
        Vec::new(),
        0.001,
        Vec::new(),
    )
}

fn main() {
    let mut sim = StrandSimulation::new(SimulationSettings::default());
    let solver = SolverSettings {
        method: SolverMethod::GaussSeidel,
        iterations: 4,
        damping: 0.2,
        damping_interval: TimeInterval::Per100ms,
        ..Default::default()
    };
    let id = sim.add_group(build_asset(), solver);

    sim.add_resident_boundary(Boundary::new(
        BoundaryHandle(1),
        BoundaryShape::Sphere { radius: 0.4 },
        Mat4::from_translation(Vec3::new(0.25, -1.2, 0.25)),
    ));

    println!("frame  avg_y      max_speed  density_max  pressure_max");
    for frame in 0..FRAMES {
        sim.update(1.0 / 60.0, &[], &[]);

        if frame % REPORT_STRIDE != 0 {
            continue;
        }
        let positions = sim.particle_positions(id).expect("simulated");
        let avg_y: f32 = positions.iter().map(|p| p.y).sum::<f32>() / positions.len() as f32;

        let max_speed = sim
            .particle_velocities(id)
            .expect("simulated")
            .iter()
            .map(|v| v.length())
            .fold(0.0f32, f32::max);

        let density_max = sim
            .volume()
            .density()
            .iter()
            .fold(0.0f32, |a, &b| a.max(b));
        let pressure_max = sim
            .volume()
            .pressure()
            .iter()
            .fold(0.0f32, |a, &b| a.max(b.abs()));

        println!(
            "{:5}  {:9.4}  {:9.4}  {:11.6}  {:12.6}",
            frame, avg_y, max_speed, density_max, pressure_max
        );
    }

    let bounds = sim.bounds();
    println!(
        "final bounds: center {:?} extent {:?}",
        bounds.center, bounds.extent
    );
}
