//! Strand-based hair simulation core.
//!
//! A Lagrangian per-strand constraint solver coupled to an Eulerian volume
//! grid for self-collision/density coupling, plus a view-dependent LOD
//! selector driven by projected screen coverage. The orchestrator
//! accumulates fixed sub-steps from variable delta time and issues a
//! strictly ordered stage sequence per sub-step; every stage completes
//! before the next begins, so the only ordering primitive the particle
//! state needs is its buffer ping-pong swap.
//!
//! # Example
//!
//! ```
//! use strandsim::{MemoryLayout, SimulationSettings, StrandGroupAsset, StrandSimulation};
//! use glam::Vec3;
//!
//! // Four strands of eight particles hanging along -Y
//! let mut rest = Vec::new();
//! for s in 0..4 {
//!     for i in 0..8 {
//!         rest.push(Vec3::new(s as f32 * 0.1, -(i as f32) * 0.05, 0.0));
//!     }
//! }
//! let asset = StrandGroupAsset::new(
//!     4,
//!     8,
//!     MemoryLayout::Sequential,
//!     rest,
//!     Vec::new(),
//!     0.001,
//!     Vec::new(),
//! );
//!
//! let mut sim = StrandSimulation::new(SimulationSettings::default());
//! let group = sim.add_group(asset, Default::default());
//! sim.update(1.0 / 60.0, &[], &[]);
//! assert!(sim.particle_positions(group).unwrap().iter().all(|p| p.is_finite()));
//! ```

pub mod boundary;
pub mod bounds;
pub mod constants;
pub mod group;
pub mod lod;
pub mod settings;
pub mod solver;
pub mod volume;

pub use boundary::{
    Boundary, BoundaryHandle, BoundarySet, BoundaryShape, PackReport, PackedBoundary, SdfField,
};
pub use bounds::GroupBounds;
pub use glam::{Mat4, Quat, Vec3};
pub use group::{MemoryLayout, RootFrame, StrandGroupAsset, StrandState};
pub use lod::{CameraRole, LodFrustum, LodIndices, LodOutput, LodSelector};
pub use settings::{
    CurvatureMode, LodSettings, PressureMode, ShapeMode, SolverMethod, SolverSettings,
    SplatMethod, TargetDensityMode, TimeInterval, VolumeSettings,
};
pub use solver::{ConstraintSolver, SolverFeatures, StepParams};
pub use volume::VolumeGrid;

use serde::{Deserialize, Serialize};

/// Top-level simulation settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Fixed sub-step length in seconds.
    pub step_dt: f32,
    /// Cap on sub-steps per `update` call; surplus whole steps are dropped
    /// from the accumulator so slow frames do not spiral.
    pub max_steps_per_frame: u32,
    /// Gravity applied to all groups (scaled per group by the solver
    /// settings).
    pub gravity: Vec3,
    /// Volume grid settings, shared by all groups of this instance.
    pub volume: VolumeSettings,
    /// LOD resolution parameters for the physics consumer.
    pub lod_physics: LodSettings,
    /// LOD resolution parameters for the rendering consumer.
    pub lod_render: LodSettings,
    /// Include inspection-role cameras in the LOD coverage query.
    pub lod_allow_inspection: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            step_dt: 1.0 / 60.0,
            max_steps_per_frame: 4,
            gravity: Vec3::new(0.0, constants::GRAVITY, 0.0),
            volume: VolumeSettings::default(),
            lod_physics: LodSettings::default(),
            lod_render: LodSettings::default(),
            lod_allow_inspection: false,
        }
    }
}

/// Handle to a strand group registered with the simulation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GroupId(usize);

/// Per-frame outcome of `update`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepReport {
    /// Sub-steps executed this call.
    pub steps_run: u32,
    /// Boundary packing outcome of the last sub-step.
    pub boundary: PackReport,
    /// Frustums discarded by the LOD gather of the last sub-step.
    pub frustums_discarded: usize,
}

struct SimGroup {
    asset: StrandGroupAsset,
    solver: ConstraintSolver,
    roots: Vec<RootFrame>,
    transform: Mat4,
    /// Lazily created on first step; released as a unit on disable.
    state: Option<StrandState>,
    bounds: GroupBounds,
    lod: LodOutput,
}

impl SimGroup {
    fn uniform_scale(&self) -> f32 {
        let (scale, _, _) = self.transform.to_scale_rotation_translation();
        scale.max_element()
    }
}

/// Per-frame driver owning every shared resource explicitly: the groups'
/// particle buffers, the shared volume grid, and the boundary slots.
/// Constructed once; `set_enabled(false)` releases all live buffers
/// together.
pub struct StrandSimulation {
    settings: SimulationSettings,
    groups: Vec<SimGroup>,
    volume: VolumeGrid,
    boundaries: BoundarySet,
    accumulator: f32,
    steps_total: u64,
    bounds: GroupBounds,
    bounds_hint: Option<GroupBounds>,
    enabled: bool,
}

impl StrandSimulation {
    /// Create a simulation. Buffers are created lazily on first use.
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            settings,
            groups: Vec::new(),
            volume: VolumeGrid::new(),
            boundaries: BoundarySet::new(),
            accumulator: 0.0,
            steps_total: 0,
            bounds: GroupBounds::new(Vec3::ZERO, Vec3::ONE),
            bounds_hint: None,
            enabled: true,
        }
    }

    /// Register a strand group. Roots default to the asset's rest pose
    /// until `update_roots` supplies live ones.
    pub fn add_group(&mut self, asset: StrandGroupAsset, settings: SolverSettings) -> GroupId {
        let roots = asset.rest_root_frames();
        self.groups.push(SimGroup {
            asset,
            solver: ConstraintSolver::new(settings),
            roots,
            transform: Mat4::IDENTITY,
            state: None,
            bounds: GroupBounds::new(Vec3::ZERO, Vec3::ONE),
            lod: LodOutput::default(),
        });
        GroupId(self.groups.len() - 1)
    }

    /// Refresh a group's root poses from the external root source.
    pub fn update_roots(&mut self, id: GroupId, roots: &[RootFrame]) {
        let group = &mut self.groups[id.0];
        assert_eq!(
            roots.len(),
            group.asset.strand_count,
            "one root frame per strand required"
        );
        group.roots.copy_from_slice(roots);
    }

    /// Set a group's local-to-world transform.
    pub fn set_group_transform(&mut self, id: GroupId, transform: Mat4) {
        self.groups[id.0].transform = transform;
    }

    /// Mutable access to a group's solver settings.
    pub fn solver_settings_mut(&mut self, id: GroupId) -> &mut SolverSettings {
        &mut self.groups[id.0].solver.settings
    }

    /// Add a boundary included every step.
    pub fn add_resident_boundary(&mut self, boundary: Boundary) {
        self.boundaries.add_resident(boundary);
    }

    /// Supply an asynchronously computed bounds hint for the next sub-step.
    /// Best effort: one frame of staleness is tolerated, and a non-finite
    /// hint falls back to the synchronous computation.
    pub fn set_bounds_hint(&mut self, bounds: GroupBounds) {
        self.bounds_hint = Some(bounds);
    }

    /// Enable or disable the simulation. Disabling releases all per-group
    /// particle buffers and the volume grid together (no partial teardown)
    /// and resets step counters; the next enabled step recreates them.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            for group in &mut self.groups {
                group.state = None;
                group.solver.reset_step_count();
            }
            self.volume = VolumeGrid::new();
            self.accumulator = 0.0;
        }
        self.enabled = enabled;
    }

    /// Current simulation bounding volume.
    pub fn bounds(&self) -> GroupBounds {
        self.bounds
    }

    /// Shared volume grid (read access for diagnostics/tests).
    pub fn volume(&self) -> &VolumeGrid {
        &self.volume
    }

    /// Packed boundary slots of the last sub-step.
    pub fn boundaries(&self) -> &BoundarySet {
        &self.boundaries
    }

    /// Total sub-steps executed.
    pub fn steps_total(&self) -> u64 {
        self.steps_total
    }

    /// Per-group particle positions (layout-addressed), for the renderer.
    /// `None` until the group has simulated its first step.
    pub fn particle_positions(&self, id: GroupId) -> Option<&[Vec3]> {
        self.groups[id.0].state.as_ref().map(|s| s.position.as_slice())
    }

    /// Per-group particle velocities (layout-addressed).
    pub fn particle_velocities(&self, id: GroupId) -> Option<&[Vec3]> {
        self.groups[id.0].state.as_ref().map(|s| s.velocity.as_slice())
    }

    /// Resolved LOD indices of a group (physics and rendering).
    pub fn group_lod(&self, id: GroupId) -> LodOutput {
        self.groups[id.0].lod
    }

    /// Bounding volume of a group.
    pub fn group_bounds(&self, id: GroupId) -> GroupBounds {
        self.groups[id.0].bounds
    }

    /// Advance the simulation by a variable frame delta.
    ///
    /// Whole sub-steps of `step_dt` are drained from the accumulator, capped
    /// at `max_steps_per_frame`. A zero delta or a disabled simulation runs
    /// no sub-step, mutates no buffer, and resets the per-group step
    /// counters to zero; the last valid state is preserved.
    pub fn update(
        &mut self,
        dt: f32,
        dynamic_boundaries: &[Boundary],
        frustums: &[LodFrustum],
    ) -> StepReport {
        let mut report = StepReport::default();
        if !self.enabled || dt <= 0.0 {
            for group in &mut self.groups {
                group.solver.reset_step_count();
            }
            return report;
        }

        self.accumulator += dt;
        let step_dt = self.settings.step_dt.max(1e-6);
        let mut steps = (self.accumulator / step_dt) as u32;
        self.accumulator -= steps as f32 * step_dt;
        if steps > self.settings.max_steps_per_frame {
            // Surplus whole steps are discarded, not carried
            steps = self.settings.max_steps_per_frame;
        }

        for _ in 0..steps {
            self.step_once(step_dt, dynamic_boundaries, frustums, &mut report);
        }
        report.steps_run = steps;
        report
    }

    /// One fixed sub-step: the strictly ordered stage sequence.
    fn step_once(
        &mut self,
        dt: f32,
        dynamic_boundaries: &[Boundary],
        frustums: &[LodFrustum],
        report: &mut StepReport,
    ) {
        let volume_settings = self.settings.volume.clamped();

        // 1. Ensure per-group state (lazy create, full reallocation on any
        //    shape change).
        for group in &mut self.groups {
            let stale = group
                .state
                .as_ref()
                .map_or(true, |s| !s.matches(&group.asset));
            if stale {
                group.state = Some(StrandState::new(&group.asset, group.transform));
            }
        }

        // 2. Gather + pack boundaries.
        report.boundary = self.boundaries.pack(dynamic_boundaries);

        // 3. Bounds: an asynchronous hint when finite, else the synchronous
        //    reduction over particle positions.
        let computed = self.compute_bounds();
        self.bounds = match self.bounds_hint.take() {
            Some(hint) if hint.is_finite() => hint,
            Some(_) => {
                log::warn!("non-finite bounds readback, using synchronous fallback");
                computed
            }
            None => computed,
        };

        // 4. Volume grid shape: resolution changes recreate all buffers and
        //    reseed the captured target density.
        self.volume.set_resolution(volume_settings.grid_resolution);
        self.volume
            .fit_bounds(&self.bounds, volume_settings.grid_margin);

        // 5. LOD selection (physics + rendering share coverage inputs).
        let (qualified, discarded) =
            lod::qualify_frustums(frustums, self.settings.lod_allow_inspection);
        report.frustums_discarded = discarded;
        let selector = LodSelector::new(self.settings.lod_physics, self.settings.lod_render);
        for group in &mut self.groups {
            let scale = group.uniform_scale();
            group.lod = selector.select(
                &group.bounds,
                group.asset.strand_diameter * scale,
                group.asset.max_particle_interval * scale,
                &group.asset.lod_thresholds,
                &qualified,
            );
        }

        // 6. Solver step per group. The volume coupling reads the previous
        //    sub-step's resolved fields.
        for group in &mut self.groups {
            let state = group.state.as_mut().expect("state ensured above");
            group.solver.step(
                &group.asset,
                state,
                &group.roots,
                &self.boundaries,
                &self.volume,
                group.transform,
                self.settings.gravity,
                dt,
                true,
            );
        }

        // 7. Volume pipeline: Clear -> Insert (once per group) -> Resolve ->
        //    Divergence -> PressureEOS -> PressureSolve -> PressureGradient.
        self.volume.clear();
        let in_particles = volume_settings.target_density_mode
            == TargetDensityMode::InitialPoseInParticles;
        for group in &self.groups {
            let state = group.state.as_ref().expect("state ensured above");
            let scale = group.uniform_scale();
            let particle_volume = std::f32::consts::FRAC_PI_4
                * group.asset.strand_diameter
                * group.asset.strand_diameter
                * group.asset.max_particle_interval
                * scale.powi(3);
            let rest = (in_particles && state.rest_density_seeded)
                .then_some(state.rest_density.as_slice());
            volume::splat::splat_group(
                &mut self.volume,
                &state.position,
                &state.velocity,
                rest,
                particle_volume,
                volume_settings.splat_method,
            );
        }
        self.volume.resolve(&volume_settings);
        if in_particles {
            // Capture each particle's initial density once, after the first
            // resolved frame.
            for group in &mut self.groups {
                let state = group.state.as_mut().expect("state ensured above");
                if !state.rest_density_seeded {
                    for idx in 0..state.position.len() {
                        state.rest_density[idx] = self.volume.sample_density(state.position[idx]);
                    }
                    state.rest_density_seeded = true;
                }
            }
        }
        self.volume.compute_divergence();
        self.volume.pressure_eos(&volume_settings);
        self.volume.pressure_solve(volume_settings.pressure_iterations);
        self.volume.compute_pressure_gradient();

        self.steps_total += 1;
    }

    /// Synchronous bounds reduction over all groups' particle positions.
    fn compute_bounds(&mut self) -> GroupBounds {
        let mut total: Option<GroupBounds> = None;
        for group in &mut self.groups {
            let bounds = group
                .state
                .as_ref()
                .and_then(|s| GroupBounds::from_points(&s.position));
            if let Some(b) = bounds {
                group.bounds = b;
                total = Some(match total {
                    Some(t) => t.union(&b),
                    None => b,
                });
            }
        }
        total.unwrap_or_else(|| GroupBounds::new(Vec3::ZERO, Vec3::ONE))
    }
}
