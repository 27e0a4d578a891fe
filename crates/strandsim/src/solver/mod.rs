//! Per-strand particle integrator and constraint relaxer.
//!
//! Step structure, always in this order:
//! 1. Refresh constant step parameters (transforms, scales, time step,
//!    iteration/stiffness/SOR, interval-normalized damping and pulls).
//! 2. Derive boolean feature flags from the settings (mutually exclusive
//!    groups enforced).
//! 3. Swap position/velocity buffers so "previous" is the pre-step state.
//! 4. Integrate, dispatch the chosen relaxation kernel, finalize velocities.
//!
//! A zero time step or inactive simulation skips the entire step with no
//! buffer mutation and resets the step counter to zero.

pub(crate) mod constraints;
mod jacobi;

use glam::{Mat4, Quat, Vec3};
use rayon::prelude::*;

use crate::boundary::BoundarySet;
use crate::group::{RootFrame, StrandGroupAsset, StrandState};
use crate::settings::{
    interval_amount, CurvatureMode, ShapeMode, SolverMethod, SolverSettings,
};
use crate::volume::VolumeGrid;

use constraints::{
    apply_boundary_collision, apply_curvature, apply_distance, apply_follow_the_leader,
    apply_global, apply_long_range_attachment, apply_shape, StrandContext,
};

/// Boolean feature flags derived from the settings once per step.
///
/// Mutually exclusive groups: the curvature comparison modes, and boundary
/// collision with vs. without friction.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverFeatures {
    pub distance: bool,
    pub lra: bool,
    pub ftl: bool,
    pub boundary: bool,
    pub boundary_friction: bool,
    pub curvature: bool,
    pub curvature_gt: bool,
    pub curvature_lt: bool,
    pub shape: bool,
    pub shape_stitched: bool,
    pub global_position: bool,
    pub global_rotation: bool,
    pub fade: bool,
    pub volume_pressure: bool,
    pub volume_velocity: bool,
}

impl SolverFeatures {
    /// Derive the flag set from clamped settings.
    pub fn derive(settings: &SolverSettings) -> Self {
        let boundary = settings.boundary_collision;
        let curvature = settings.curvature;
        Self {
            distance: settings.distance,
            lra: settings.distance && settings.distance_lra,
            ftl: settings.distance && settings.distance_ftl,
            boundary,
            boundary_friction: boundary && settings.boundary_friction > 0.0,
            curvature,
            curvature_gt: curvature && settings.curvature_mode == CurvatureMode::GreaterThan,
            curvature_lt: curvature && settings.curvature_mode == CurvatureMode::LessThan,
            shape: settings.shape && settings.shape_influence > 0.0,
            shape_stitched: settings.shape && settings.shape_mode == ShapeMode::Stitched,
            global_position: settings.global_position && settings.global_position_fraction > 0.0,
            global_rotation: settings.global_rotation && settings.global_rotation_fraction > 0.0,
            fade: settings.global_fade,
            volume_pressure: settings.cell_pressure > 0.0,
            volume_velocity: settings.cell_velocity > 0.0,
        }
    }
}

/// Constant parameters refreshed at the start of every step.
#[derive(Clone, Copy, Debug)]
pub struct StepParams {
    pub dt: f32,
    pub inv_dt: f32,
    /// Group local-to-world transform.
    pub local_to_world: Mat4,
    /// Inverse transpose, for transforming directions.
    pub local_to_world_inv_t: Mat4,
    /// World rotation extracted from the transform.
    pub world_rotation: Quat,
    /// Uniform strand scale extracted from the transform.
    pub strand_scale: f32,
    pub gravity: Vec3,

    pub iterations: u32,
    pub stiffness: f32,
    pub sor: f32,

    /// Velocity retained per step: (1 - damping)^(dt / interval).
    pub damping_keep: f32,
    /// Global position pull per iteration (interval normalized, then split
    /// across iterations so the per-step total matches the configured
    /// fraction).
    pub global_position_amount: f32,
    /// Global rotation pull per iteration.
    pub global_rotation_amount: f32,

    /// Curvature target angle in radians, mapped from [0,1] onto [0, pi/2].
    pub curvature_target_angle: f32,
    pub boundary_friction: f32,
    /// World-space particle collision radius.
    pub particle_radius: f32,
    pub ftl_damping: f32,
    pub shape_influence: f32,
    pub fade_offset: f32,
    pub fade_extent: f32,
    pub cell_pressure: f32,
    pub cell_velocity: f32,
}

impl StepParams {
    /// Refresh parameters from clamped settings for one step.
    pub fn derive(
        settings: &SolverSettings,
        transform: Mat4,
        gravity: Vec3,
        dt: f32,
        strand_diameter: f32,
    ) -> Self {
        let (scale, world_rotation, _) = transform.to_scale_rotation_translation();
        let strand_scale = scale.max_element();
        let iterations = settings.iterations;
        let per_iteration = 1.0 / iterations.max(1) as f32;

        let position_step = interval_amount(
            settings.global_position_fraction,
            settings.global_position_interval,
            dt,
        );
        let rotation_step = interval_amount(
            settings.global_rotation_fraction,
            settings.global_rotation_interval,
            dt,
        );

        Self {
            dt,
            inv_dt: 1.0 / dt,
            local_to_world: transform,
            local_to_world_inv_t: transform.inverse().transpose(),
            world_rotation,
            strand_scale,
            gravity: gravity * settings.gravity_scale,
            iterations,
            stiffness: settings.stiffness,
            sor: settings.sor_factor,
            damping_keep: 1.0 - interval_amount(settings.damping, settings.damping_interval, dt),
            global_position_amount: 1.0 - (1.0 - position_step).powf(per_iteration),
            global_rotation_amount: 1.0 - (1.0 - rotation_step).powf(per_iteration),
            curvature_target_angle: settings.curvature_value * std::f32::consts::FRAC_PI_2,
            boundary_friction: settings.boundary_friction,
            particle_radius: strand_diameter * 0.5 * strand_scale,
            ftl_damping: settings.ftl_damping,
            shape_influence: settings.shape_influence,
            fade_offset: settings.global_fade_offset,
            fade_extent: settings.global_fade_extent,
            cell_pressure: settings.cell_pressure,
            cell_velocity: settings.cell_velocity,
        }
    }

    #[cfg(test)]
    pub(crate) fn test_default() -> Self {
        Self::derive(
            &SolverSettings::default().clamped(),
            Mat4::IDENTITY,
            Vec3::new(0.0, crate::constants::GRAVITY, 0.0),
            1.0 / 60.0,
            0.01,
        )
    }
}

/// Per-strand constraint solver for one group.
pub struct ConstraintSolver {
    pub settings: SolverSettings,
    step_count: u32,
}

impl ConstraintSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            step_count: 0,
        }
    }

    /// Steps completed since the last skip.
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Reset the step counter. Called when a step is skipped (zero delta
    /// time or disabled simulation).
    pub fn reset_step_count(&mut self) {
        self.step_count = 0;
    }

    /// Advance the group by one sub-step.
    ///
    /// `roots` must hold one entry per strand, refreshed by the caller.
    /// A zero/negative `dt` or `active == false` skips the step entirely:
    /// no buffer is mutated and the step counter resets to zero.
    pub fn step(
        &mut self,
        asset: &StrandGroupAsset,
        state: &mut StrandState,
        roots: &[RootFrame],
        boundaries: &BoundarySet,
        volume: &VolumeGrid,
        transform: Mat4,
        gravity: Vec3,
        dt: f32,
        active: bool,
    ) {
        if !active || dt <= 0.0 {
            self.step_count = 0;
            return;
        }
        debug_assert_eq!(roots.len(), asset.strand_count);

        let settings = self.settings.clamped();
        let features = SolverFeatures::derive(&settings);
        let params = StepParams::derive(&settings, transform, gravity, dt, asset.strand_diameter);

        state.swap_buffers();
        integrate(asset, state, roots, volume, &params, &features);
        relax(
            asset,
            state,
            roots,
            boundaries,
            &params,
            &features,
            settings.method,
        );
        finalize_velocities(asset, state, &params, &features);

        self.step_count += 1;
    }
}

/// Resolve the per-strand constants for relaxation.
fn strand_context<'a>(
    asset: &'a StrandGroupAsset,
    roots: &[RootFrame],
    params: &StepParams,
    s: usize,
) -> StrandContext<'a> {
    let root = roots[s];
    let frame_delta = params.world_rotation * root.frame * asset.rest_frame(s).inverse();
    let root_direction = params
        .local_to_world_inv_t
        .transform_vector3(root.direction)
        .normalize_or_zero();
    StrandContext {
        rest_lengths: asset.rest_lengths(s),
        rest_segments: asset.rest_segments(s),
        rest_offsets: asset.rest_offsets(s),
        scale: params.strand_scale * asset.strand_length_scale[s],
        root_position: params.local_to_world.transform_point3(root.position),
        root_direction,
        frame_delta,
    }
}

/// Step 1: integrate particle velocities and positions from the pre-step
/// state. Roots are pinned to the refreshed root pose. The volume grid's
/// fields couple in here: a PIC-like impulse down the pressure gradient
/// scaled by `cell_pressure`, and a FLIP-like pull toward the grid velocity
/// scaled by `cell_velocity`.
fn integrate(
    asset: &StrandGroupAsset,
    state: &mut StrandState,
    roots: &[RootFrame],
    volume: &VolumeGrid,
    params: &StepParams,
    features: &SolverFeatures,
) {
    let position_prev = &state.position_prev;
    let velocity_prev = &state.velocity_prev;
    let position = &mut state.position;
    let velocity = &mut state.velocity;

    position
        .par_iter_mut()
        .zip(velocity.par_iter_mut())
        .enumerate()
        .for_each(|(idx, (pos, vel))| {
            let (s, i) = asset.decompose_index(idx);
            if i == 0 {
                let root = roots[s];
                let world = params.local_to_world.transform_point3(root.position);
                *pos = world;
                *vel = (world - position_prev[idx]) * params.inv_dt;
                return;
            }

            let prev_pos = position_prev[idx];
            let mut v = velocity_prev[idx] * params.damping_keep;
            if features.volume_pressure {
                v -= volume.sample_pressure_gradient(prev_pos) * (params.cell_pressure * params.dt);
            }
            if features.volume_velocity {
                v = v.lerp(volume.sample_velocity(prev_pos), params.cell_velocity);
            }
            v += params.gravity * params.dt;

            *pos = prev_pos + v * params.dt;
            *vel = v;
        });
}

/// Step 2: dispatch the relaxation kernel over all strands.
fn relax(
    asset: &StrandGroupAsset,
    state: &mut StrandState,
    roots: &[RootFrame],
    boundaries: &BoundarySet,
    params: &StepParams,
    features: &SolverFeatures,
    method: SolverMethod,
) {
    if params.iterations == 0 {
        return;
    }
    state.begin_relax();
    let ppc = asset.strand_particle_count;
    let (positions, prev, corrections) = state.relax_slices();

    match method {
        SolverMethod::GaussSeidelReference => {
            // Strictly serial reference path
            for (s, (p, (pr, corr))) in positions
                .chunks_mut(ppc)
                .zip(prev.chunks(ppc).zip(corrections.chunks_mut(ppc)))
                .enumerate()
            {
                let ctx = strand_context(asset, roots, params, s);
                relax_strand_gauss_seidel(p, pr, corr, &ctx, boundaries, params, features);
            }
        }
        SolverMethod::GaussSeidel => {
            // Strands are independent: relax them in parallel
            positions
                .par_chunks_mut(ppc)
                .zip(prev.par_chunks(ppc).zip(corrections.par_chunks_mut(ppc)))
                .enumerate()
                .for_each(|(s, (p, (pr, corr)))| {
                    let ctx = strand_context(asset, roots, params, s);
                    relax_strand_gauss_seidel(p, pr, corr, &ctx, boundaries, params, features);
                });
        }
        SolverMethod::Jacobi => {
            // Explicit dispatch table keyed by exact particle count
            let matched = match ppc {
                16 => {
                    jacobi_over_strands::<16>(
                        positions, prev, corrections, asset, roots, boundaries, params, features,
                    );
                    true
                }
                32 => {
                    jacobi_over_strands::<32>(
                        positions, prev, corrections, asset, roots, boundaries, params, features,
                    );
                    true
                }
                64 => {
                    jacobi_over_strands::<64>(
                        positions, prev, corrections, asset, roots, boundaries, params, features,
                    );
                    true
                }
                128 => {
                    jacobi_over_strands::<128>(
                        positions, prev, corrections, asset, roots, boundaries, params, features,
                    );
                    true
                }
                _ => false,
            };
            if !matched {
                log::warn!(
                    "no Jacobi kernel for strand particle count {}, falling back to GaussSeidel",
                    ppc
                );
                positions
                    .par_chunks_mut(ppc)
                    .zip(prev.par_chunks(ppc).zip(corrections.par_chunks_mut(ppc)))
                    .enumerate()
                    .for_each(|(s, (p, (pr, corr)))| {
                        let ctx = strand_context(asset, roots, params, s);
                        relax_strand_gauss_seidel(p, pr, corr, &ctx, boundaries, params, features);
                    });
            }
        }
    }
    state.end_relax();
}

/// One strand's Gauss-Seidel relaxation: the fixed constraint order applied
/// in place, `iterations` times. SOR scales corrections only when more than
/// one iteration runs.
fn relax_strand_gauss_seidel(
    p: &mut [glam::Vec3],
    prev: &[glam::Vec3],
    corr: &mut [glam::Vec3],
    ctx: &StrandContext,
    boundaries: &BoundarySet,
    params: &StepParams,
    features: &SolverFeatures,
) {
    let sor = if params.iterations > 1 { params.sor } else { 1.0 };
    let k = params.stiffness * sor;
    let friction = if features.boundary_friction {
        params.boundary_friction
    } else {
        0.0
    };

    for _ in 0..params.iterations {
        if features.boundary {
            apply_boundary_collision(p, prev, boundaries, params.particle_radius, friction);
        }
        if features.distance {
            apply_distance(p, ctx, k);
        }
        if features.lra {
            apply_long_range_attachment(p, ctx);
        }
        if features.ftl {
            apply_follow_the_leader(p, corr, ctx);
        }
        if features.curvature {
            apply_curvature(
                p,
                ctx,
                features.curvature_gt,
                features.curvature_lt,
                params.curvature_target_angle,
                k,
            );
        }
        if features.shape {
            apply_shape(p, ctx, features.shape_stitched, params.shape_influence * sor);
        }
        if features.global_position || features.global_rotation {
            apply_global(p, ctx, params, features);
        }
    }
}

/// Run the fixed-count Jacobi kernel over all strands in parallel.
#[allow(clippy::too_many_arguments)]
fn jacobi_over_strands<const N: usize>(
    positions: &mut [glam::Vec3],
    prev: &[glam::Vec3],
    corrections: &mut [glam::Vec3],
    asset: &StrandGroupAsset,
    roots: &[RootFrame],
    boundaries: &BoundarySet,
    params: &StepParams,
    features: &SolverFeatures,
) {
    positions
        .par_chunks_mut(N)
        .zip(prev.par_chunks(N).zip(corrections.par_chunks_mut(N)))
        .enumerate()
        .for_each(|(s, (p, (pr, corr)))| {
            let ctx = strand_context(asset, roots, params, s);
            jacobi::relax_strand_jacobi::<N>(p, pr, corr, &ctx, boundaries, params, features);
        });
}

/// Step 3: derive post-constraint velocities from the position change, with
/// the follow-the-leader damping term fed by the recorded corrections.
fn finalize_velocities(
    asset: &StrandGroupAsset,
    state: &mut StrandState,
    params: &StepParams,
    features: &SolverFeatures,
) {
    let position = &state.position;
    let position_prev = &state.position_prev;
    let correction = &state.correction;
    let velocity = &mut state.velocity;

    velocity.par_iter_mut().enumerate().for_each(|(idx, v)| {
        let mut vel = (position[idx] - position_prev[idx]) * params.inv_dt;
        if features.ftl {
            let (s, i) = asset.decompose_index(idx);
            if i + 1 < asset.strand_particle_count {
                let next = asset.particle_index(s, i + 1);
                vel -= correction[next] * (params.ftl_damping * params.inv_dt);
            }
        }
        *v = vel;
    });
}
