//! External solid boundaries: analytic shapes plus one discrete SDF.
//!
//! Boundaries are gathered each step from a resident list and a dynamic
//! query list, deduplicated by handle, and packed into priority-ordered
//! slots (discrete SDF first, then capsule/sphere/torus/cube groups). The
//! signed-distance functions are pure and shared by the solver's collision
//! constraint and external visualization.

use glam::{Mat4, Vec2, Vec3};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::{BOUNDARY_HISTORY_TTL_FRAMES, MAX_BOUNDARIES};

/// Stable identity of a boundary across frames.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct BoundaryHandle(pub u64);

/// Precomputed discrete signed-distance field.
///
/// Distances are stored in local units over the local axis-aligned box
/// `[local_min, local_max]`; queries are transformed into this box and
/// sampled trilinearly with edge clamping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SdfField {
    /// Sample counts per axis (each at least 2).
    pub resolution: [usize; 3],
    /// Distance samples, x-major then y then z.
    pub data: Vec<f32>,
    /// Local-space lower corner of the field box.
    pub local_min: Vec3,
    /// Local-space upper corner of the field box.
    pub local_max: Vec3,
}

impl SdfField {
    pub fn new(resolution: [usize; 3], data: Vec<f32>, local_min: Vec3, local_max: Vec3) -> Self {
        assert!(
            resolution.iter().all(|&r| r >= 2),
            "SDF field resolution must be at least 2 per axis, got {:?}",
            resolution
        );
        assert_eq!(
            data.len(),
            resolution[0] * resolution[1] * resolution[2],
            "SDF field data length mismatch"
        );
        Self {
            resolution,
            data,
            local_min,
            local_max,
        }
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.resolution[1] + j) * self.resolution[0] + i
    }

    /// Trilinear sample at a local-space position. Queries outside the box
    /// clamp to the nearest edge sample.
    pub fn sample_local(&self, p: Vec3) -> f32 {
        let size = self.local_max - self.local_min;
        // Normalized [0,1] coordinates, then texel space
        let uvw = ((p - self.local_min) / size).clamp(Vec3::ZERO, Vec3::ONE);
        let tx = uvw.x * (self.resolution[0] - 1) as f32;
        let ty = uvw.y * (self.resolution[1] - 1) as f32;
        let tz = uvw.z * (self.resolution[2] - 1) as f32;

        let i0 = (tx.floor() as usize).min(self.resolution[0] - 2);
        let j0 = (ty.floor() as usize).min(self.resolution[1] - 2);
        let k0 = (tz.floor() as usize).min(self.resolution[2] - 2);
        let fx = tx - i0 as f32;
        let fy = ty - j0 as f32;
        let fz = tz - k0 as f32;

        let mut result = 0.0;
        for dk in 0..2 {
            for dj in 0..2 {
                for di in 0..2 {
                    let w = if di == 0 { 1.0 - fx } else { fx }
                        * if dj == 0 { 1.0 - fy } else { fy }
                        * if dk == 0 { 1.0 - fz } else { fz };
                    result += w * self.data[self.index(i0 + di, j0 + dj, k0 + dk)];
                }
            }
        }
        result
    }
}

/// Boundary shape in canonical local space, positioned by the boundary
/// transform.
#[derive(Clone, Debug)]
pub enum BoundaryShape {
    /// Capsule along the local Y axis: segment from -extent to +extent.
    Capsule { radius: f32, extent: f32 },
    /// Sphere at the local origin.
    Sphere { radius: f32 },
    /// Torus around the local Y axis.
    Torus { major_radius: f32, minor_radius: f32 },
    /// Axis-aligned box at the local origin.
    Cube { half_extent: Vec3 },
    /// Discrete signed-distance field.
    Field(Arc<SdfField>),
}

impl BoundaryShape {
    /// Packing priority: the discrete SDF first, then capsule, sphere,
    /// torus, cube.
    #[inline]
    pub(crate) fn priority(&self) -> usize {
        match self {
            BoundaryShape::Field(_) => 0,
            BoundaryShape::Capsule { .. } => 1,
            BoundaryShape::Sphere { .. } => 2,
            BoundaryShape::Torus { .. } => 3,
            BoundaryShape::Cube { .. } => 4,
        }
    }
}

// ========== Closed-form distance functions ==========

/// Signed distance to a sphere of radius `r` at the origin.
#[inline]
pub fn sd_sphere(p: Vec3, r: f32) -> f32 {
    p.length() - r
}

/// Signed distance to a Y-axis capsule (segment half-length `extent`).
#[inline]
pub fn sd_capsule(p: Vec3, radius: f32, extent: f32) -> f32 {
    let q = Vec3::new(p.x, p.y - p.y.clamp(-extent, extent), p.z);
    q.length() - radius
}

/// Signed distance to a torus around the Y axis.
#[inline]
pub fn sd_torus(p: Vec3, major_radius: f32, minor_radius: f32) -> f32 {
    let q = Vec2::new(Vec2::new(p.x, p.z).length() - major_radius, p.y);
    q.length() - minor_radius
}

/// Signed distance to an axis-aligned box of the given half extents.
#[inline]
pub fn sd_box(p: Vec3, half_extent: Vec3) -> f32 {
    let q = p.abs() - half_extent;
    q.max(Vec3::ZERO).length() + q.max_element().min(0.0)
}

/// One external boundary: shape + world transform + identity handle.
#[derive(Clone, Debug)]
pub struct Boundary {
    pub handle: BoundaryHandle,
    pub shape: BoundaryShape,
    /// Local-to-world transform. Rigid plus uniform scale.
    pub transform: Mat4,
}

impl Boundary {
    pub fn new(handle: BoundaryHandle, shape: BoundaryShape, transform: Mat4) -> Self {
        Self {
            handle,
            shape,
            transform,
        }
    }

    /// Signed distance from a world-space point to this boundary.
    pub fn distance(&self, p: Vec3) -> f32 {
        let scale = self.transform.x_axis.truncate().length().max(1e-6);
        let local = self.transform.inverse().transform_point3(p);
        let d = match &self.shape {
            BoundaryShape::Capsule { radius, extent } => sd_capsule(local, *radius, *extent),
            BoundaryShape::Sphere { radius } => sd_sphere(local, *radius),
            BoundaryShape::Torus {
                major_radius,
                minor_radius,
            } => sd_torus(local, *major_radius, *minor_radius),
            BoundaryShape::Cube { half_extent } => sd_box(local, *half_extent),
            BoundaryShape::Field(field) => field.sample_local(local),
        };
        d * scale
    }

    /// Outward normal at a world-space point, by central differences.
    pub fn normal(&self, p: Vec3, eps: f32) -> Vec3 {
        let dx = self.distance(p + Vec3::X * eps) - self.distance(p - Vec3::X * eps);
        let dy = self.distance(p + Vec3::Y * eps) - self.distance(p - Vec3::Y * eps);
        let dz = self.distance(p + Vec3::Z * eps) - self.distance(p - Vec3::Z * eps);
        let grad = Vec3::new(dx, dy, dz);
        let len = grad.length();
        if len > 1e-6 {
            grad / len
        } else {
            Vec3::Y // Degenerate gradient, push up
        }
    }
}

/// A boundary packed into a slot for the current step.
#[derive(Clone, Debug)]
pub struct PackedBoundary {
    pub boundary: Boundary,
    /// Maps current world positions to where the boundary carried them last
    /// frame. Identity for handles not seen last frame.
    pub world_to_prev_world: Mat4,
}

/// Result of a packing pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackReport {
    /// Number of boundaries packed this step.
    pub packed: usize,
    /// Number of candidates dropped (overflow or surplus SDF fields).
    /// Not an error.
    pub discarded: usize,
}

#[derive(Clone, Copy, Debug)]
struct HistoryEntry {
    transform: Mat4,
    frame: u64,
}

/// Fixed-capacity boundary slots plus the per-handle transform history.
#[derive(Default)]
pub struct BoundarySet {
    resident: Vec<Boundary>,
    packed: Vec<PackedBoundary>,
    history: FxHashMap<BoundaryHandle, HistoryEntry>,
    frame: u64,
}

impl BoundarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a boundary that is included every step.
    pub fn add_resident(&mut self, boundary: Boundary) {
        self.resident.push(boundary);
    }

    /// Remove all resident boundaries.
    pub fn clear_resident(&mut self) {
        self.resident.clear();
    }

    /// Boundaries packed by the last `pack` call.
    #[inline]
    pub fn packed(&self) -> &[PackedBoundary] {
        &self.packed
    }

    /// Gather resident + dynamic boundaries, dedupe by handle, and pack into
    /// priority-ordered slots. At most one discrete SDF is kept and always
    /// lands in slot 0; overflow beyond `MAX_BOUNDARIES` is dropped in
    /// discovery order and reported, never treated as an error.
    pub fn pack(&mut self, dynamic: &[Boundary]) -> PackReport {
        self.frame += 1;
        self.packed.clear();

        let mut seen = FxHashSet::default();
        let mut discarded = 0usize;

        // Candidates by priority group, discovery order within each group.
        let mut groups: [Vec<&Boundary>; 5] =
            [Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new()];
        for boundary in self.resident.iter().chain(dynamic.iter()) {
            if !seen.insert(boundary.handle) {
                continue; // Duplicate handle, first occurrence wins
            }
            let priority = boundary.shape.priority();
            if priority == 0 && !groups[0].is_empty() {
                discarded += 1; // Only one discrete SDF is supported
                continue;
            }
            groups[priority].push(boundary);
        }

        for boundary in groups.iter().flat_map(|g| g.iter()) {
            if self.packed.len() >= MAX_BOUNDARIES {
                discarded += 1;
                continue;
            }
            let world_to_prev_world = match self.history.get(&boundary.handle) {
                Some(entry) if entry.frame + 1 == self.frame => {
                    entry.transform * boundary.transform.inverse()
                }
                _ => Mat4::IDENTITY,
            };
            self.packed.push(PackedBoundary {
                boundary: (*boundary).clone(),
                world_to_prev_world,
            });
        }

        if discarded > 0 {
            log::warn!(
                "boundary packing discarded {} of {} candidates",
                discarded,
                seen.len()
            );
        }

        // Record this frame's transforms and evict stale handles.
        for boundary in groups.iter().flat_map(|g| g.iter()) {
            self.history.insert(
                boundary.handle,
                HistoryEntry {
                    transform: boundary.transform,
                    frame: self.frame,
                },
            );
        }
        let cutoff = self
            .frame
            .saturating_sub(BOUNDARY_HISTORY_TTL_FRAMES as u64);
        self.history.retain(|_, entry| entry.frame >= cutoff);

        PackReport {
            packed: self.packed.len(),
            discarded,
        }
    }

    /// Number of tracked transform-history entries (diagnostics).
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Signed distance from a world point to the nearest packed boundary,
    /// with the slot index. `None` when no boundaries are packed.
    pub fn query(&self, p: Vec3) -> Option<(f32, usize)> {
        let mut best: Option<(f32, usize)> = None;
        for (slot, packed) in self.packed.iter().enumerate() {
            let d = packed.boundary.distance(p);
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, slot));
            }
        }
        best
    }

    /// Signed distance to the nearest packed boundary, or `f32::MAX`.
    pub fn distance(&self, p: Vec3) -> f32 {
        self.query(p).map_or(f32::MAX, |(d, _)| d)
    }
}
