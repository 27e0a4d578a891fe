//! Strand group assets and per-group simulation state.
//!
//! A `StrandGroupAsset` is produced offline and immutable at simulation time.
//! `StrandState` is the live double-buffered particle storage: buffers are
//! swapped, never aliased, each step, and fully reallocated whenever the
//! asset shape changes.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_STRAND_COUNT, MAX_STRAND_PARTICLE_COUNT};

/// Particle addressing scheme of a strand group.
///
/// `Sequential` stores one strand's particles contiguously;
/// `Interleaved` stores one particle index across all strands contiguously.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum MemoryLayout {
    #[default]
    Sequential,
    Interleaved,
}

/// Per-strand root pose, refreshed every step from the external root source.
/// Expressed in the group's local space.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RootFrame {
    /// Root position.
    pub position: Vec3,
    /// Root direction (unit, points from root toward the first segment).
    pub direction: Vec3,
    /// Material frame (orientation basis) at the root.
    pub frame: Quat,
}

impl RootFrame {
    pub fn new(position: Vec3, direction: Vec3, frame: Quat) -> Self {
        Self {
            position,
            direction,
            frame,
        }
    }
}

/// Immutable strand group asset.
///
/// Carries the rest pose plus the derived per-strand tables the solver needs
/// (segment vectors/lengths, root offsets, rest material frames). Derived
/// tables are always strand-major (sequential) regardless of `memory_layout`;
/// only the live particle buffers honor the layout tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrandGroupAsset {
    /// Number of strands.
    pub strand_count: usize,
    /// Number of particles per strand.
    pub strand_particle_count: usize,
    /// Particle addressing scheme for the live buffers.
    pub memory_layout: MemoryLayout,

    /// Rest particle positions, addressed by `memory_layout`.
    pub rest_positions: Vec<Vec3>,
    /// Per-strand length scale.
    pub strand_length_scale: Vec<f32>,
    /// Strand cross-section diameter (uniform per group).
    pub strand_diameter: f32,

    /// Monotonically increasing LOD thresholds in (0, 1], lowest detail
    /// first. Derived from the guide counts.
    pub lod_thresholds: Vec<f32>,
    /// Simulated strand count per LOD level, ascending.
    pub lod_guide_counts: Vec<usize>,

    /// Rest segment vectors, strand-major: `[strand][segment]`, local space.
    rest_segments: Vec<Vec3>,
    /// Rest segment lengths, strand-major.
    rest_lengths: Vec<f32>,
    /// Rest offsets from the root particle, strand-major, local space.
    rest_offsets: Vec<Vec3>,
    /// Rest material frame per strand.
    rest_frames: Vec<Quat>,

    /// Largest rest segment length across the group.
    pub max_particle_interval: f32,
}

impl StrandGroupAsset {
    /// Build an asset from rest positions.
    ///
    /// `rest_positions` must contain `strand_count * strand_particle_count`
    /// entries addressed by `memory_layout`. `lod_guide_counts` lists the
    /// simulated strand count per LOD level in ascending order; an empty list
    /// means a single full-detail level.
    pub fn new(
        strand_count: usize,
        strand_particle_count: usize,
        memory_layout: MemoryLayout,
        rest_positions: Vec<Vec3>,
        strand_length_scale: Vec<f32>,
        strand_diameter: f32,
        lod_guide_counts: Vec<usize>,
    ) -> Self {
        assert!(strand_count > 0, "strand_count must be positive");
        assert!(
            strand_count <= MAX_STRAND_COUNT,
            "strand_count {} exceeds maximum {}",
            strand_count,
            MAX_STRAND_COUNT
        );
        assert!(
            strand_particle_count >= 2,
            "strand_particle_count must be at least 2, got {}",
            strand_particle_count
        );
        assert!(
            strand_particle_count <= MAX_STRAND_PARTICLE_COUNT,
            "strand_particle_count {} exceeds maximum {}",
            strand_particle_count,
            MAX_STRAND_PARTICLE_COUNT
        );
        assert_eq!(
            rest_positions.len(),
            strand_count * strand_particle_count,
            "rest_positions length mismatch"
        );
        assert!(
            strand_length_scale.is_empty() || strand_length_scale.len() == strand_count,
            "strand_length_scale must be empty or one entry per strand"
        );
        assert!(strand_diameter > 0.0, "strand_diameter must be positive");

        let strand_length_scale = if strand_length_scale.is_empty() {
            vec![1.0; strand_count]
        } else {
            strand_length_scale
        };

        let guide_counts = if lod_guide_counts.is_empty() {
            vec![strand_count]
        } else {
            lod_guide_counts
        };
        for pair in guide_counts.windows(2) {
            assert!(
                pair[0] <= pair[1],
                "lod_guide_counts must be ascending: {} > {}",
                pair[0],
                pair[1]
            );
        }
        let full = *guide_counts.last().expect("non-empty") as f32;
        let lod_thresholds: Vec<f32> = guide_counts
            .iter()
            .map(|&c| (c as f32 / full).clamp(0.0, 1.0))
            .collect();

        let mut asset = Self {
            strand_count,
            strand_particle_count,
            memory_layout,
            rest_positions,
            strand_length_scale,
            strand_diameter,
            lod_thresholds,
            lod_guide_counts: guide_counts,
            rest_segments: Vec::new(),
            rest_lengths: Vec::new(),
            rest_offsets: Vec::new(),
            rest_frames: Vec::new(),
            max_particle_interval: 0.0,
        };
        asset.build_rest_tables();
        asset
    }

    /// Precompute strand-major rest tables from the layout-addressed rest
    /// positions.
    fn build_rest_tables(&mut self) {
        let segments = self.strand_particle_count - 1;
        self.rest_segments = Vec::with_capacity(self.strand_count * segments);
        self.rest_lengths = Vec::with_capacity(self.strand_count * segments);
        self.rest_offsets = Vec::with_capacity(self.strand_count * self.strand_particle_count);
        self.rest_frames = Vec::with_capacity(self.strand_count);

        let mut max_interval = 0.0f32;
        for s in 0..self.strand_count {
            let root = self.rest_positions[self.particle_index(s, 0)];
            for i in 0..self.strand_particle_count {
                let p = self.rest_positions[self.particle_index(s, i)];
                self.rest_offsets.push(p - root);
                if i + 1 < self.strand_particle_count {
                    let q = self.rest_positions[self.particle_index(s, i + 1)];
                    let seg = q - p;
                    let len = seg.length();
                    max_interval = max_interval.max(len);
                    self.rest_segments.push(seg);
                    self.rest_lengths.push(len);
                }
            }
            let dir = self.rest_segments[s * segments].normalize_or_zero();
            let dir = if dir == Vec3::ZERO { Vec3::Y } else { dir };
            self.rest_frames.push(Quat::from_rotation_arc(Vec3::Y, dir));
        }
        self.max_particle_interval = max_interval;
    }

    /// Total particle count.
    #[inline]
    pub fn particle_count(&self) -> usize {
        self.strand_count * self.strand_particle_count
    }

    /// Buffer index of particle `i` on strand `s` under the group's layout.
    #[inline]
    pub fn particle_index(&self, s: usize, i: usize) -> usize {
        match self.memory_layout {
            MemoryLayout::Sequential => s * self.strand_particle_count + i,
            MemoryLayout::Interleaved => i * self.strand_count + s,
        }
    }

    /// Strand and particle index of a buffer index under the group's layout.
    #[inline]
    pub fn decompose_index(&self, idx: usize) -> (usize, usize) {
        match self.memory_layout {
            MemoryLayout::Sequential => (
                idx / self.strand_particle_count,
                idx % self.strand_particle_count,
            ),
            MemoryLayout::Interleaved => (idx % self.strand_count, idx / self.strand_count),
        }
    }

    /// Rest segment vectors of one strand (local space).
    #[inline]
    pub fn rest_segments(&self, s: usize) -> &[Vec3] {
        let n = self.strand_particle_count - 1;
        &self.rest_segments[s * n..(s + 1) * n]
    }

    /// Rest segment lengths of one strand.
    #[inline]
    pub fn rest_lengths(&self, s: usize) -> &[f32] {
        let n = self.strand_particle_count - 1;
        &self.rest_lengths[s * n..(s + 1) * n]
    }

    /// Rest offsets from the root particle of one strand (local space).
    #[inline]
    pub fn rest_offsets(&self, s: usize) -> &[Vec3] {
        let n = self.strand_particle_count;
        &self.rest_offsets[s * n..(s + 1) * n]
    }

    /// Rest material frame of one strand.
    #[inline]
    pub fn rest_frame(&self, s: usize) -> Quat {
        self.rest_frames[s]
    }

    /// Default root frames derived from the rest pose (local space).
    pub fn rest_root_frames(&self) -> Vec<RootFrame> {
        (0..self.strand_count)
            .map(|s| {
                let root = self.rest_positions[self.particle_index(s, 0)];
                let dir = self.rest_segments(s)[0].normalize_or_zero();
                RootFrame::new(root, dir, self.rest_frames[s])
            })
            .collect()
    }
}

/// Live double-buffered particle state for one strand group.
///
/// Created lazily on first use, persists across frames, and is released as a
/// unit when the owning instance is disabled. Any change in counts forces a
/// full reallocation; there is no partial resize.
#[derive(Clone, Debug)]
pub struct StrandState {
    /// Current particle positions (world space), layout-addressed.
    pub position: Vec<Vec3>,
    /// Previous-step particle positions.
    pub position_prev: Vec<Vec3>,
    /// Current particle velocities.
    pub velocity: Vec<Vec3>,
    /// Previous-step particle velocities.
    pub velocity_prev: Vec<Vec3>,
    /// Corrective offsets (follow-the-leader), layout-addressed.
    pub correction: Vec<Vec3>,
    /// Per-particle carried initial density
    /// (`TargetDensityMode::InitialPoseInParticles`).
    pub rest_density: Vec<f32>,
    /// Whether `rest_density` has been captured.
    pub rest_density_seeded: bool,

    strand_count: usize,
    strand_particle_count: usize,
    layout: MemoryLayout,

    // Strand-major scratch used to relax interleaved groups without
    // per-frame allocation.
    scratch_pos: Vec<Vec3>,
    scratch_prev: Vec<Vec3>,
    scratch_corr: Vec<Vec3>,
}

impl StrandState {
    /// Allocate state for an asset, seeding positions from the rest pose
    /// transformed by `transform`.
    pub fn new(asset: &StrandGroupAsset, transform: glam::Mat4) -> Self {
        let n = asset.particle_count();
        let mut position = vec![Vec3::ZERO; n];
        for (idx, p) in position.iter_mut().enumerate() {
            *p = transform.transform_point3(asset.rest_positions[idx]);
        }
        Self {
            position_prev: position.clone(),
            position,
            velocity: vec![Vec3::ZERO; n],
            velocity_prev: vec![Vec3::ZERO; n],
            correction: vec![Vec3::ZERO; n],
            rest_density: vec![0.0; n],
            rest_density_seeded: false,
            strand_count: asset.strand_count,
            strand_particle_count: asset.strand_particle_count,
            layout: asset.memory_layout,
            scratch_pos: vec![Vec3::ZERO; n],
            scratch_prev: vec![Vec3::ZERO; n],
            scratch_corr: vec![Vec3::ZERO; n],
        }
    }

    /// Whether this state still matches the asset's shape. A mismatch forces
    /// full reallocation.
    pub fn matches(&self, asset: &StrandGroupAsset) -> bool {
        self.strand_count == asset.strand_count
            && self.strand_particle_count == asset.strand_particle_count
            && self.layout == asset.memory_layout
    }

    /// Total particle count.
    #[inline]
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// Whether the state is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Ping-pong swap of position and velocity buffers. After the swap,
    /// the `_prev` buffers hold the pre-step state.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.position, &mut self.position_prev);
        std::mem::swap(&mut self.velocity, &mut self.velocity_prev);
    }

    /// Prepare strand-major views for relaxation. For interleaved groups the
    /// particle buffers are gathered into the sequential scratch.
    pub(crate) fn begin_relax(&mut self) {
        if self.layout == MemoryLayout::Interleaved {
            let sc = self.strand_count;
            let ppc = self.strand_particle_count;
            for s in 0..sc {
                for i in 0..ppc {
                    let src = i * sc + s;
                    let dst = s * ppc + i;
                    self.scratch_pos[dst] = self.position[src];
                    self.scratch_prev[dst] = self.position_prev[src];
                    self.scratch_corr[dst] = self.correction[src];
                }
            }
        }
    }

    /// Strand-major (positions, previous positions, corrections) views.
    /// Positions and corrections are mutable; chunks of
    /// `strand_particle_count` cover one strand each.
    pub(crate) fn relax_slices(&mut self) -> (&mut [Vec3], &[Vec3], &mut [Vec3]) {
        match self.layout {
            MemoryLayout::Sequential => (
                &mut self.position,
                &self.position_prev,
                &mut self.correction,
            ),
            MemoryLayout::Interleaved => (
                &mut self.scratch_pos,
                &self.scratch_prev,
                &mut self.scratch_corr,
            ),
        }
    }

    /// Scatter relaxed positions/corrections back for interleaved groups.
    pub(crate) fn end_relax(&mut self) {
        if self.layout == MemoryLayout::Interleaved {
            let sc = self.strand_count;
            let ppc = self.strand_particle_count;
            for s in 0..sc {
                for i in 0..ppc {
                    let src = s * ppc + i;
                    let dst = i * sc + s;
                    self.position[dst] = self.scratch_pos[src];
                    self.correction[dst] = self.scratch_corr[src];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    fn line_positions(strands: usize, particles: usize, layout: MemoryLayout) -> Vec<Vec3> {
        let mut out = vec![Vec3::ZERO; strands * particles];
        for s in 0..strands {
            for i in 0..particles {
                let idx = match layout {
                    MemoryLayout::Sequential => s * particles + i,
                    MemoryLayout::Interleaved => i * strands + s,
                };
                out[idx] = Vec3::new(s as f32, -(i as f32) * 0.1, 0.0);
            }
        }
        out
    }

    fn line_asset(strands: usize, particles: usize, layout: MemoryLayout) -> StrandGroupAsset {
        StrandGroupAsset::new(
            strands,
            particles,
            layout,
            line_positions(strands, particles, layout),
            Vec::new(),
            0.01,
            Vec::new(),
        )
    }

    #[test]
    fn test_particle_index_layouts() {
        let seq = line_asset(4, 8, MemoryLayout::Sequential);
        let ilv = line_asset(4, 8, MemoryLayout::Interleaved);
        assert_eq!(seq.particle_index(2, 3), 2 * 8 + 3);
        assert_eq!(ilv.particle_index(2, 3), 3 * 4 + 2);
        for idx in 0..seq.particle_count() {
            let (s, i) = seq.decompose_index(idx);
            assert_eq!(seq.particle_index(s, i), idx);
            let (s, i) = ilv.decompose_index(idx);
            assert_eq!(ilv.particle_index(s, i), idx);
        }
    }

    #[test]
    fn test_rest_tables_match_across_layouts() {
        // The derived strand-major tables must not depend on the layout tag
        let seq = line_asset(4, 8, MemoryLayout::Sequential);
        let ilv = line_asset(4, 8, MemoryLayout::Interleaved);
        for s in 0..4 {
            assert_eq!(seq.rest_segments(s), ilv.rest_segments(s));
            assert_eq!(seq.rest_lengths(s), ilv.rest_lengths(s));
            assert_eq!(seq.rest_offsets(s), ilv.rest_offsets(s));
        }
        assert!((seq.max_particle_interval - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_lod_thresholds_ascending() {
        let asset = StrandGroupAsset::new(
            8,
            4,
            MemoryLayout::Sequential,
            line_positions(8, 4, MemoryLayout::Sequential),
            Vec::new(),
            0.01,
            vec![1, 2, 4, 8],
        );
        assert_eq!(asset.lod_thresholds.len(), 4);
        assert_eq!(*asset.lod_thresholds.last().unwrap(), 1.0);
        for pair in asset.lod_thresholds.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_swap_buffers_never_aliases() {
        let asset = line_asset(2, 4, MemoryLayout::Sequential);
        let mut state = StrandState::new(&asset, Mat4::IDENTITY);
        state.position[0] = Vec3::splat(5.0);
        state.swap_buffers();
        assert_eq!(state.position_prev[0], Vec3::splat(5.0));
        assert_ne!(state.position[0], state.position_prev[0]);
    }

    #[test]
    fn test_interleaved_gather_scatter_roundtrip() {
        let asset = line_asset(3, 5, MemoryLayout::Interleaved);
        let mut state = StrandState::new(&asset, Mat4::IDENTITY);
        let before = state.position.clone();
        state.begin_relax();
        state.end_relax();
        assert_eq!(state.position, before);
    }

    #[test]
    #[should_panic(expected = "strand_particle_count must be at least 2")]
    fn test_single_particle_strand_panics() {
        let _ = StrandGroupAsset::new(
            1,
            1,
            MemoryLayout::Sequential,
            vec![Vec3::ZERO],
            Vec::new(),
            0.01,
            Vec::new(),
        );
    }
}
