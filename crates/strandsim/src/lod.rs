//! View-dependent level-of-detail selection.
//!
//! Coverage is the projected pixel size of a reference span (maximum particle
//! diameter or interval) evaluated at the closest point on the group's
//! bounding sphere to each qualifying camera, worst case (maximum) over all
//! cameras. The LOD value derived from coverage is mapped onto a per-group
//! monotonic threshold table. Physics and rendering run this resolution
//! independently over the same coverage inputs.
//!
//! Cameras are passed in as explicit frustum descriptors; there is no
//! ambient camera enumeration.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::bounds::GroupBounds;
use crate::constants::MAX_FRUSTUMS;
use crate::settings::LodSettings;

/// Role of the camera a frustum was built from. Non-gameplay inspection
/// views are excluded from coverage unless explicitly requested.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum CameraRole {
    #[default]
    Gameplay,
    Inspection,
}

/// One camera frustum prepared for coverage queries.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LodFrustum {
    /// Camera position (world).
    pub position: Vec3,
    /// Camera forward (unit). Zero for orthographic cameras, which removes
    /// the depth dependence.
    pub forward: Vec3,
    /// Near clip distance; the depth denominator never drops below this.
    /// Orthographic cameras carry 1 here so depth resolves to exactly 1.
    pub near_clip: f32,
    /// Pixels per world unit of span at depth 1.
    pub unit_span_px: f32,
    /// Six clip planes as (normal, distance): a point p is inside when
    /// `dot(n, p) + d >= 0`. All-zero planes disable culling.
    pub planes: [Vec4; 6],
    /// Camera role for gather filtering.
    pub role: CameraRole,
}

impl LodFrustum {
    /// Build a perspective frustum. `fov_y` is the full vertical field of
    /// view in radians.
    pub fn perspective(
        position: Vec3,
        forward: Vec3,
        fov_y: f32,
        viewport_height_px: f32,
        near_clip: f32,
        planes: [Vec4; 6],
        role: CameraRole,
    ) -> Self {
        let unit_span_px = viewport_height_px / (2.0 * (fov_y * 0.5).tan());
        Self {
            position,
            forward: forward.normalize_or_zero(),
            near_clip: near_clip.max(1e-4),
            unit_span_px,
            planes,
            role,
        }
    }

    /// Build an orthographic frustum. `ortho_size` is the half height of the
    /// view volume in world units. Depth is forced to 1 (forward zeroed,
    /// near clip 1) so coverage is distance independent.
    pub fn orthographic(
        position: Vec3,
        ortho_size: f32,
        viewport_height_px: f32,
        planes: [Vec4; 6],
        role: CameraRole,
    ) -> Self {
        Self {
            position,
            forward: Vec3::ZERO,
            near_clip: 1.0,
            unit_span_px: viewport_height_px / (2.0 * ortho_size.max(1e-6)),
            planes,
            role,
        }
    }

    /// Planes that never cull. Useful when the caller has no plane data.
    pub fn unbounded_planes() -> [Vec4; 6] {
        [Vec4::ZERO; 6]
    }

    /// Sphere visibility against the clip planes.
    pub fn sphere_visible(&self, center: Vec3, radius: f32) -> bool {
        for plane in &self.planes {
            if plane.truncate().dot(center) + plane.w < -radius {
                return false;
            }
        }
        true
    }

    /// Projected pixel coverage of `span` at the closest point of the
    /// bounding sphere to this camera.
    pub fn coverage(&self, bounds: &GroupBounds, span: f32) -> f32 {
        let to_center = bounds.center - self.position;
        let dist = to_center.length();
        // Closest point on the bounding sphere; the camera inside the sphere
        // degenerates to the camera position (depth clamps to near)
        let closest = if dist > bounds.radius {
            bounds.center - to_center * (bounds.radius / dist)
        } else {
            self.position
        };
        let depth = self.forward.dot(closest - self.position).max(self.near_clip);
        span * self.unit_span_px / depth
    }
}

/// Resolved LOD indices with blend fraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LodIndices {
    /// Lower-detail table index.
    pub lod_index_lo: usize,
    /// Higher-detail table index.
    pub lod_index_hi: usize,
    /// Blend fraction from lo toward hi. Exactly 0 when blending is
    /// disabled or the value lies outside the table.
    pub lod_blend_frac: f32,
    /// The resolved LOD value the indices were derived from.
    pub lod_value: f32,
}

/// Coverage and per-consumer resolutions for one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LodOutput {
    /// Worst-case projected coverage of the maximum particle diameter (px).
    pub coverage_diameter: f32,
    /// Worst-case projected coverage of the maximum particle interval (px).
    pub coverage_interval: f32,
    /// Resolution for the physics consumer.
    pub physics: LodIndices,
    /// Resolution for the rendering consumer.
    pub render: LodIndices,
}

/// Truncate the frustum list to the fixed maximum, filtering by role.
/// Returns the qualifying frustums and the number discarded by truncation.
pub fn qualify_frustums(
    frustums: &[LodFrustum],
    allow_inspection: bool,
) -> (Vec<LodFrustum>, usize) {
    let mut qualified: Vec<LodFrustum> = frustums
        .iter()
        .filter(|f| allow_inspection || f.role == CameraRole::Gameplay)
        .copied()
        .collect();
    let discarded = qualified.len().saturating_sub(MAX_FRUSTUMS);
    if discarded > 0 {
        log::warn!(
            "frustum gather discarded {} of {} candidates",
            discarded,
            qualified.len()
        );
        qualified.truncate(MAX_FRUSTUMS);
    }
    (qualified, discarded)
}

/// Worst-case (maximum) coverage of `span` over all qualifying frustums.
/// Groups fully outside a frustum contribute nothing from that camera.
pub fn worst_case_coverage(frustums: &[LodFrustum], bounds: &GroupBounds, span: f32) -> f32 {
    let mut coverage = 0.0f32;
    for frustum in frustums {
        if !frustum.sphere_visible(bounds.center, bounds.radius) {
            continue;
        }
        coverage = coverage.max(frustum.coverage(bounds, span));
    }
    coverage
}

/// Map coverage to the clamped LOD value:
/// `min(clamp01(clamp01(coverage * scale) + bias), ceiling)`.
pub fn lod_value(coverage: f32, settings: &LodSettings) -> f32 {
    let s = settings.clamped();
    ((coverage * s.scale).clamp(0.0, 1.0) + s.bias)
        .clamp(0.0, 1.0)
        .min(s.ceiling)
}

/// Resolve a LOD value against a monotonically increasing threshold table.
///
/// Outside the table, the nearest boundary index is used with zero blend.
/// With blending disabled the pair collapses to a single index by rounding
/// the fraction: above 0.5 picks the higher-detail index, exactly 0.5 picks
/// the lower-detail index (reference behavior).
pub fn resolve_indices(value: f32, thresholds: &[f32], blending: bool) -> LodIndices {
    assert!(!thresholds.is_empty(), "threshold table must not be empty");
    let v = value.clamp(0.0, 1.0);
    let last = thresholds.len() - 1;

    let (lo, hi, frac) = if v <= thresholds[0] {
        (0, 0, 0.0)
    } else if v >= thresholds[last] {
        (last, last, 0.0)
    } else {
        // First index whose threshold exceeds v; its predecessor is <= v
        let hi = thresholds.partition_point(|&t| t <= v);
        let lo = hi - 1;
        let frac = (v - thresholds[lo]) / (thresholds[hi] - thresholds[lo]);
        (lo, hi, frac)
    };

    if blending {
        LodIndices {
            lod_index_lo: lo,
            lod_index_hi: hi,
            lod_blend_frac: frac,
            lod_value: v,
        }
    } else {
        let index = if frac > 0.5 { hi } else { lo };
        LodIndices {
            lod_index_lo: index,
            lod_index_hi: index,
            lod_blend_frac: 0.0,
            lod_value: v,
        }
    }
}

/// Independent physics/rendering LOD resolution over shared coverage.
#[derive(Clone, Copy, Debug, Default)]
pub struct LodSelector {
    pub physics: LodSettings,
    pub render: LodSettings,
}

impl LodSelector {
    pub fn new(physics: LodSettings, render: LodSettings) -> Self {
        Self { physics, render }
    }

    /// Compute coverage for one group and resolve both consumers.
    /// `frustums` must already be qualified (see [`qualify_frustums`]).
    pub fn select(
        &self,
        bounds: &GroupBounds,
        max_particle_diameter: f32,
        max_particle_interval: f32,
        thresholds: &[f32],
        frustums: &[LodFrustum],
    ) -> LodOutput {
        let coverage_diameter = worst_case_coverage(frustums, bounds, max_particle_diameter);
        let coverage_interval = worst_case_coverage(frustums, bounds, max_particle_interval);

        let physics_value = lod_value(coverage_diameter, &self.physics);
        let render_value = lod_value(coverage_diameter, &self.render);

        LodOutput {
            coverage_diameter,
            coverage_interval,
            physics: resolve_indices(physics_value, thresholds, self.physics.blending),
            render: resolve_indices(render_value, thresholds, self.render.blending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gameplay_perspective(position: Vec3, forward: Vec3) -> LodFrustum {
        LodFrustum::perspective(
            position,
            forward,
            std::f32::consts::FRAC_PI_2,
            1080.0,
            0.1,
            LodFrustum::unbounded_planes(),
            CameraRole::Gameplay,
        )
    }

    #[test]
    fn test_perspective_unit_span() {
        // 90 degree fov: unit_span_px = h / (2 tan 45) = h / 2
        let f = gameplay_perspective(Vec3::ZERO, Vec3::Z);
        assert!((f.unit_span_px - 540.0).abs() < 1e-3);
    }

    #[test]
    fn test_coverage_falls_with_distance() {
        let f = gameplay_perspective(Vec3::ZERO, Vec3::Z);
        let near = GroupBounds::new(Vec3::new(0.0, 0.0, 2.0), Vec3::splat(0.5));
        let far = GroupBounds::new(Vec3::new(0.0, 0.0, 20.0), Vec3::splat(0.5));
        assert!(f.coverage(&near, 0.01) > f.coverage(&far, 0.01));
    }

    #[test]
    fn test_coverage_uses_closest_sphere_point() {
        let f = gameplay_perspective(Vec3::ZERO, Vec3::Z);
        let bounds = GroupBounds::new(Vec3::new(0.0, 0.0, 10.0), Vec3::splat(1.0));
        // Closest point is at depth 10 - radius
        let expected = 0.01 * f.unit_span_px / (10.0 - bounds.radius);
        assert!((f.coverage(&bounds, 0.01) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_orthographic_depth_independent() {
        let f = LodFrustum::orthographic(
            Vec3::ZERO,
            5.0,
            1080.0,
            LodFrustum::unbounded_planes(),
            CameraRole::Gameplay,
        );
        assert_eq!(f.forward, Vec3::ZERO);
        let near = GroupBounds::new(Vec3::new(0.0, 0.0, 2.0), Vec3::splat(0.5));
        let far = GroupBounds::new(Vec3::new(0.0, 0.0, 200.0), Vec3::splat(0.5));
        let c_near = f.coverage(&near, 0.01);
        let c_far = f.coverage(&far, 0.01);
        assert!((c_near - c_far).abs() < 1e-6, "{} vs {}", c_near, c_far);
    }

    #[test]
    fn test_role_filter() {
        let gameplay = gameplay_perspective(Vec3::ZERO, Vec3::Z);
        let mut inspection = gameplay;
        inspection.role = CameraRole::Inspection;
        let (q, _) = qualify_frustums(&[gameplay, inspection], false);
        assert_eq!(q.len(), 1);
        let (q, _) = qualify_frustums(&[gameplay, inspection], true);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_frustum_truncation_reports_discards() {
        let f = gameplay_perspective(Vec3::ZERO, Vec3::Z);
        let many = vec![f; MAX_FRUSTUMS + 3];
        let (q, discarded) = qualify_frustums(&many, false);
        assert_eq!(q.len(), MAX_FRUSTUMS);
        assert_eq!(discarded, 3);
    }

    #[test]
    fn test_resolve_extremes() {
        let thresholds = [0.125, 0.25, 0.5, 1.0];
        let lo = resolve_indices(0.0, &thresholds, true);
        assert_eq!((lo.lod_index_lo, lo.lod_index_hi), (0, 0));
        assert_eq!(lo.lod_blend_frac, 0.0);
        let hi = resolve_indices(1.0, &thresholds, true);
        assert_eq!((hi.lod_index_lo, hi.lod_index_hi), (3, 3));
        assert_eq!(hi.lod_blend_frac, 0.0);
    }

    #[test]
    fn test_resolve_interior_blend() {
        let thresholds = [0.25, 0.75, 1.0];
        let r = resolve_indices(0.5, &thresholds, true);
        assert_eq!((r.lod_index_lo, r.lod_index_hi), (0, 1));
        assert!((r.lod_blend_frac - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_blending_disabled_collapses() {
        let thresholds = [0.25, 0.75, 1.0];
        // frac 0.5 exactly: the tie rounds down to the lower-detail index
        let tie = resolve_indices(0.5, &thresholds, false);
        assert_eq!((tie.lod_index_lo, tie.lod_index_hi), (0, 0));
        assert_eq!(tie.lod_blend_frac, 0.0);
        // Above 0.5 rounds up
        let up = resolve_indices(0.6, &thresholds, false);
        assert_eq!((up.lod_index_lo, up.lod_index_hi), (1, 1));
        assert_eq!(up.lod_blend_frac, 0.0);
    }

    #[test]
    fn test_monotonic_in_value() {
        let thresholds = [0.1, 0.2, 0.4, 0.8, 1.0];
        let mut prev = resolve_indices(0.0, &thresholds, true);
        let mut v = 0.0f32;
        while v <= 1.0 {
            let r = resolve_indices(v, &thresholds, true);
            assert!(r.lod_index_lo >= prev.lod_index_lo);
            assert!(r.lod_index_hi >= prev.lod_index_hi);
            prev = r;
            v += 0.01;
        }
    }

    #[test]
    fn test_lod_value_clamps() {
        let settings = LodSettings {
            scale: 10.0,
            bias: 0.0,
            ceiling: 0.6,
            ..Default::default()
        };
        assert_eq!(lod_value(100.0, &settings), 0.6);
        let biased = LodSettings {
            scale: 0.0,
            bias: 0.3,
            ceiling: 1.0,
            ..Default::default()
        };
        assert!((lod_value(0.0, &biased) - 0.3).abs() < 1e-6);
    }
}
