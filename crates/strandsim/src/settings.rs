//! Settings structs for the solver, volume grid, and LOD selector.
//!
//! All settings are pure configuration with documented defaults. Out-of-range
//! values are clamped at this boundary (`clamped()`), never rejected:
//! a degenerate value downstream (zero resolution, zero dt) causes a
//! documented no-op for the affected step, not a fault.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_GRID_RESOLUTION;

/// Relaxation method for the constraint solver.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Strictly serial reference implementation. Bit-stable ordering,
    /// useful for regression comparison.
    GaussSeidelReference,
    /// Production path: per-strand Gauss-Seidel relaxation, strands relaxed
    /// in parallel (strands are independent, so results match the reference).
    #[default]
    GaussSeidel,
    /// Jacobi relaxation with specialized kernels for strand particle counts
    /// 16/32/64/128. Unmatched counts fall back to GaussSeidel.
    Jacobi,
}

/// Comparison mode for the local bending curvature constraint.
/// The three modes are mutually exclusive.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum CurvatureMode {
    /// Drive the bend angle toward the target.
    #[default]
    Equals,
    /// Only enforce a minimum bend (correct when straighter than target).
    GreaterThan,
    /// Only enforce a maximum bend (correct when more bent than target).
    LessThan,
}

/// How the local shape constraint reconstructs the rest pose.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ShapeMode {
    /// Each segment is driven toward its rest vector independently.
    #[default]
    PerSegment,
    /// Targets are accumulated root-to-tip from already-corrected positions.
    Stitched,
}

/// Normalization interval for damping factors and fractional pulls.
///
/// A factor `f` tagged with an interval means "fraction applied per interval",
/// independent of sub-step rate: the per-step amount is
/// `1 - (1 - f)^(dt / interval)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum TimeInterval {
    #[default]
    PerSecond,
    Per100ms,
    Per10ms,
    Per1ms,
}

impl TimeInterval {
    /// Interval length in seconds.
    pub fn seconds(self) -> f32 {
        match self {
            TimeInterval::PerSecond => 1.0,
            TimeInterval::Per100ms => 0.1,
            TimeInterval::Per10ms => 0.01,
            TimeInterval::Per1ms => 0.001,
        }
    }
}

/// Resolve an interval-tagged fraction to the amount applied over `dt`.
///
/// `fraction = 1` always resolves to 1 (a full pull), `fraction = 0` to 0.
/// When `dt` equals the interval the result is exactly `fraction`.
pub fn interval_amount(fraction: f32, interval: TimeInterval, dt: f32) -> f32 {
    let f = fraction.clamp(0.0, 1.0);
    if f >= 1.0 {
        return 1.0;
    }
    1.0 - (1.0 - f).powf(dt / interval.seconds())
}

/// Splat method for the volume grid's Insert stage.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum SplatMethod {
    /// Single combined pass accumulating weight + weighted velocity.
    #[default]
    Combined,
    /// Density pass plus three per-axis velocity passes.
    Split,
    /// Scatter into fixed-point integer accumulators, decoded during Resolve.
    Rasterized,
}

/// Pressure solution mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum PressureMode {
    /// Solve density toward the target from both sides
    /// (compression and decompression).
    DensityEquals,
    /// Decompression only: pressure never pulls particles together.
    #[default]
    DensityLessThan,
}

/// Where the pressure target density comes from.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum TargetDensityMode {
    /// Uniform physical rest density from `VolumeSettings::rest_density`.
    #[default]
    Uniform,
    /// Cell densities captured at the first resolved frame after (re)seed.
    InitialPose,
    /// Per-particle carried initial density, splatted each step.
    InitialPoseInParticles,
}

/// Per-group constraint solver settings.
///
/// Enables and parameters for every constraint, in the fixed application
/// order: boundary collision, distance (+ LRA + FTL), curvature, shape,
/// global pose (with root-to-tip fade).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Relaxation method.
    pub method: SolverMethod,
    /// Constraint iterations per step. Zero leaves integrated positions
    /// untouched.
    pub iterations: u32,
    /// Global constraint stiffness (0-1).
    pub stiffness: f32,
    /// Successive over-relaxation factor (1-2). Has no effect at
    /// iterations <= 1.
    pub sor_factor: f32,

    /// Velocity damping factor (0-1), applied per `damping_interval`.
    pub damping: f32,
    /// Normalization interval for `damping`.
    pub damping_interval: TimeInterval,
    /// Gravity scale multiplier.
    pub gravity_scale: f32,

    /// Enable inter-particle distance constraints.
    pub distance: bool,
    /// Enable long-range attachment (root-to-particle max distance).
    pub distance_lra: bool,
    /// Enable follow-the-leader hard correction.
    pub distance_ftl: bool,
    /// FTL velocity correction factor (0-1).
    pub ftl_damping: f32,

    /// Enable boundary collision.
    pub boundary_collision: bool,
    /// Boundary friction (0-1). Zero selects the friction-free kernel.
    pub boundary_friction: f32,

    /// Enable the local bending curvature constraint.
    pub curvature: bool,
    /// Curvature comparison mode.
    pub curvature_mode: CurvatureMode,
    /// Target bend (0-1), mapped onto a [0, 90] degree range.
    pub curvature_value: f32,

    /// Enable the local shape constraint.
    pub shape: bool,
    /// Shape reconstruction mode.
    pub shape_mode: ShapeMode,
    /// Shape influence weight (0-1).
    pub shape_influence: f32,

    /// Enable the global position constraint.
    pub global_position: bool,
    /// Fractional pull toward the reference pose (0-1) per interval.
    pub global_position_fraction: f32,
    /// Normalization interval for the position pull.
    pub global_position_interval: TimeInterval,

    /// Enable the global rotation constraint.
    pub global_rotation: bool,
    /// Fractional pull toward the reference segment directions (0-1)
    /// per interval.
    pub global_rotation_fraction: f32,
    /// Normalization interval for the rotation pull.
    pub global_rotation_interval: TimeInterval,

    /// Enable the root-to-tip fade of global constraints.
    pub global_fade: bool,
    /// Normalized arc position where the fade begins (0-1).
    pub global_fade_offset: f32,
    /// Normalized arc extent over which the fade ramps to zero (0-1).
    pub global_fade_extent: f32,

    /// Scale on the PIC-like pressure-gradient impulse from the volume grid.
    pub cell_pressure: f32,
    /// Scale on the FLIP-like pull toward the volume grid velocity (0-1).
    pub cell_velocity: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            method: SolverMethod::GaussSeidel,
            iterations: 3,
            stiffness: 1.0,
            sor_factor: 1.0,

            damping: 0.0,
            damping_interval: TimeInterval::PerSecond,
            gravity_scale: 1.0,

            distance: true,
            distance_lra: true,
            distance_ftl: false,
            ftl_damping: 0.8,

            boundary_collision: true,
            boundary_friction: 0.0,

            curvature: false,
            curvature_mode: CurvatureMode::Equals,
            curvature_value: 0.0,

            shape: false,
            shape_mode: ShapeMode::PerSegment,
            shape_influence: 1.0,

            global_position: false,
            global_position_fraction: 0.05,
            global_position_interval: TimeInterval::PerSecond,

            global_rotation: false,
            global_rotation_fraction: 1.0,
            global_rotation_interval: TimeInterval::PerSecond,

            global_fade: false,
            global_fade_offset: 0.1,
            global_fade_extent: 0.2,

            cell_pressure: 0.25,
            cell_velocity: 0.05,
        }
    }
}

impl SolverSettings {
    /// Clamp every parameter into its documented range.
    pub fn clamped(&self) -> Self {
        let mut s = *self;
        s.iterations = s.iterations.min(100);
        s.stiffness = s.stiffness.clamp(0.0, 1.0);
        s.sor_factor = s.sor_factor.clamp(1.0, 2.0);
        s.damping = s.damping.clamp(0.0, 1.0);
        s.ftl_damping = s.ftl_damping.clamp(0.0, 1.0);
        s.boundary_friction = s.boundary_friction.clamp(0.0, 1.0);
        s.curvature_value = s.curvature_value.clamp(0.0, 1.0);
        s.shape_influence = s.shape_influence.clamp(0.0, 1.0);
        s.global_position_fraction = s.global_position_fraction.clamp(0.0, 1.0);
        s.global_rotation_fraction = s.global_rotation_fraction.clamp(0.0, 1.0);
        s.global_fade_offset = s.global_fade_offset.clamp(0.0, 1.0);
        s.global_fade_extent = s.global_fade_extent.clamp(1e-4, 1.0);
        s.cell_pressure = s.cell_pressure.max(0.0);
        s.cell_velocity = s.cell_velocity.clamp(0.0, 1.0);
        s
    }
}

/// Volume grid settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VolumeSettings {
    /// Uniform cubic cell count per axis. Zero makes the grid step a no-op.
    pub grid_resolution: u32,
    /// Splat method for the Insert stage.
    pub splat_method: SplatMethod,
    /// Jacobi pressure iterations. Zero uses the EOS guess as final pressure.
    pub pressure_iterations: u32,
    /// Pressure solution mode.
    pub pressure_mode: PressureMode,
    /// Target density source.
    pub target_density_mode: TargetDensityMode,
    /// Uniform rest density (particle volume fraction) for
    /// `TargetDensityMode::Uniform`.
    pub rest_density: f32,
    /// Closed-form EOS stiffness for the initial pressure guess.
    pub eos_stiffness: f32,
    /// Fractional margin added around the simulation bounds when fitting
    /// the grid.
    pub grid_margin: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            grid_resolution: 32,
            splat_method: SplatMethod::Combined,
            pressure_iterations: 3,
            pressure_mode: PressureMode::DensityLessThan,
            target_density_mode: TargetDensityMode::Uniform,
            rest_density: 1.0,
            eos_stiffness: 1.0,
            grid_margin: 0.25,
        }
    }
}

impl VolumeSettings {
    /// Clamp every parameter into its documented range.
    pub fn clamped(&self) -> Self {
        let mut s = *self;
        s.grid_resolution = s.grid_resolution.min(MAX_GRID_RESOLUTION);
        s.pressure_iterations = s.pressure_iterations.min(100);
        s.rest_density = s.rest_density.max(1e-6);
        s.eos_stiffness = s.eos_stiffness.max(0.0);
        s.grid_margin = s.grid_margin.clamp(0.0, 4.0);
        s
    }
}

/// LOD resolution settings. Physics and rendering each get an independent
/// instance sharing the same coverage inputs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LodSettings {
    /// Enable cross-fade blending between adjacent LOD indices.
    pub blending: bool,
    /// Coverage scale applied before the bias.
    pub scale: f32,
    /// Bias added after scaling (can force a minimum LOD).
    pub bias: f32,
    /// Ceiling clamp on the resolved LOD value (0-1).
    pub ceiling: f32,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self {
            blending: true,
            scale: 1.0,
            bias: 0.0,
            ceiling: 1.0,
        }
    }
}

impl LodSettings {
    /// Clamp every parameter into its documented range.
    pub fn clamped(&self) -> Self {
        let mut s = *self;
        s.scale = s.scale.max(0.0);
        s.bias = s.bias.clamp(-1.0, 1.0);
        s.ceiling = s.ceiling.clamp(0.0, 1.0);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_seconds() {
        assert_eq!(TimeInterval::PerSecond.seconds(), 1.0);
        assert_eq!(TimeInterval::Per100ms.seconds(), 0.1);
        assert_eq!(TimeInterval::Per10ms.seconds(), 0.01);
        assert_eq!(TimeInterval::Per1ms.seconds(), 0.001);
    }

    #[test]
    fn test_interval_amount_identity_at_interval() {
        // dt equal to the interval yields exactly the configured fraction
        let amount = interval_amount(0.3, TimeInterval::Per100ms, 0.1);
        assert!((amount - 0.3).abs() < 1e-6, "got {}", amount);
    }

    #[test]
    fn test_interval_amount_composes_over_substeps() {
        // Two half-interval applications must compose to one full application
        let half = interval_amount(0.5, TimeInterval::PerSecond, 0.5);
        let composed = 1.0 - (1.0 - half) * (1.0 - half);
        assert!((composed - 0.5).abs() < 1e-6, "got {}", composed);
    }

    #[test]
    fn test_interval_amount_extremes() {
        assert_eq!(interval_amount(0.0, TimeInterval::PerSecond, 0.016), 0.0);
        assert_eq!(interval_amount(1.0, TimeInterval::Per1ms, 0.016), 1.0);
    }

    #[test]
    fn test_solver_settings_clamped() {
        let s = SolverSettings {
            iterations: 10_000,
            stiffness: 4.0,
            sor_factor: 0.2,
            boundary_friction: -1.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(s.iterations, 100);
        assert_eq!(s.stiffness, 1.0);
        assert_eq!(s.sor_factor, 1.0);
        assert_eq!(s.boundary_friction, 0.0);
    }

    #[test]
    fn test_volume_settings_clamped() {
        let s = VolumeSettings {
            grid_resolution: 100_000,
            rest_density: 0.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(s.grid_resolution, MAX_GRID_RESOLUTION);
        assert!(s.rest_density > 0.0);
    }
}
