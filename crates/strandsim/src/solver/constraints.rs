//! Constraint kernels shared by the relaxation methods.
//!
//! All functions operate on one strand's particles in strand-major order.
//! The root particle (index 0) is pinned: it has zero inverse mass and is
//! never displaced by a constraint. Pure per-pair/per-triple helpers are
//! split out so the Jacobi path can accumulate the same corrections against
//! an iterate snapshot.

use glam::{Quat, Vec3};

use crate::boundary::BoundarySet;

use super::{SolverFeatures, StepParams};

/// Per-strand constants resolved once per step.
pub(crate) struct StrandContext<'a> {
    /// Rest segment lengths, unscaled.
    pub rest_lengths: &'a [f32],
    /// Rest segment vectors in asset-local space, unscaled.
    pub rest_segments: &'a [Vec3],
    /// Rest offsets from the root particle, unscaled.
    pub rest_offsets: &'a [Vec3],
    /// Combined group/strand length scale.
    pub scale: f32,
    /// Current root position (world).
    pub root_position: Vec3,
    /// Current root direction (world, unit). Drives the first segment's
    /// target; zero falls back to the material frame.
    pub root_direction: Vec3,
    /// Rotation carrying rest-pose vectors into the current world frame.
    pub frame_delta: Quat,
}

impl StrandContext<'_> {
    /// Scaled rest length of a segment.
    #[inline]
    pub fn segment_length(&self, i: usize) -> f32 {
        self.rest_lengths[i] * self.scale
    }

    /// Rest segment carried into the current world frame, scaled. The first
    /// segment follows the refreshed root direction directly.
    #[inline]
    pub fn world_segment(&self, i: usize) -> Vec3 {
        if i == 0 && self.root_direction != Vec3::ZERO {
            return self.root_direction * (self.rest_lengths[0] * self.scale);
        }
        self.frame_delta * (self.rest_segments[i] * self.scale)
    }

    /// Reference world position of a particle under the current root pose.
    #[inline]
    pub fn reference_position(&self, i: usize) -> Vec3 {
        self.root_position + self.frame_delta * (self.rest_offsets[i] * self.scale)
    }
}

/// Root-to-tip fade weight for the global constraints. 1 at the root,
/// ramping to 0 past `offset` over `extent` of normalized arc position.
#[inline]
pub(crate) fn fade_weight(i: usize, count: usize, params: &StepParams, enabled: bool) -> f32 {
    if !enabled {
        return 1.0;
    }
    let t = i as f32 / (count - 1) as f32;
    1.0 - ((t - params.fade_offset) / params.fade_extent).clamp(0.0, 1.0)
}

/// Correction pair driving two points to a target separation.
/// Returns the displacement to add to each end (zero for pinned ends).
#[inline]
pub(crate) fn separation_correction(
    p0: Vec3,
    p1: Vec3,
    target: f32,
    w0: f32,
    w1: f32,
) -> (Vec3, Vec3) {
    let delta = p1 - p0;
    let len = delta.length();
    if len < 1e-9 {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    let err = (len - target) / len;
    let wsum = w0 + w1;
    (
        delta * (err * w0 / wsum),
        delta * (-err * w1 / wsum),
    )
}

/// Boundary pushout (plus motion-aware friction) for one particle.
/// Returns the corrected position, or `None` when not in contact.
#[inline]
pub(crate) fn collide_particle(
    p: Vec3,
    prev: Vec3,
    boundaries: &BoundarySet,
    radius: f32,
    friction: f32,
) -> Option<Vec3> {
    let (d, slot) = boundaries.query(p)?;
    let depth = d - radius;
    if depth >= 0.0 {
        return None;
    }
    let packed = &boundaries.packed()[slot];
    let n = packed.boundary.normal(p, radius.max(1e-4));
    let mut corrected = p - n * depth;
    if friction > 0.0 {
        // Where the boundary carried the contact point since last frame
        let carried = packed.world_to_prev_world.transform_point3(corrected);
        let boundary_disp = corrected - carried;
        let rel = (corrected - prev) - boundary_disp;
        let tangential = rel - n * rel.dot(n);
        corrected -= tangential * friction;
    }
    Some(corrected)
}

// ========== Gauss-Seidel application (in place, fixed order) ==========

/// Boundary collision, friction-weighted when friction > 0. Hard pushout.
pub(crate) fn apply_boundary_collision(
    p: &mut [Vec3],
    prev: &[Vec3],
    boundaries: &BoundarySet,
    radius: f32,
    friction: f32,
) {
    if boundaries.packed().is_empty() {
        return;
    }
    for i in 1..p.len() {
        if let Some(corrected) = collide_particle(p[i], prev[i], boundaries, radius, friction) {
            p[i] = corrected;
        }
    }
}

/// Inter-particle distance constraints along the strand.
pub(crate) fn apply_distance(p: &mut [Vec3], ctx: &StrandContext, k: f32) {
    for i in 0..p.len() - 1 {
        let w0 = if i == 0 { 0.0 } else { 1.0 };
        let (d0, d1) = separation_correction(p[i], p[i + 1], ctx.segment_length(i), w0, 1.0);
        p[i] += d0 * k;
        p[i + 1] += d1 * k;
    }
}

/// Long-range attachment: root-to-particle distance never exceeds the rest
/// distance. Hard projection.
pub(crate) fn apply_long_range_attachment(p: &mut [Vec3], ctx: &StrandContext) {
    for i in 1..p.len() {
        let max_dist = ctx.rest_offsets[i].length() * ctx.scale;
        let delta = p[i] - ctx.root_position;
        let len = delta.length();
        if len > max_dist && len > 1e-9 {
            p[i] = ctx.root_position + delta * (max_dist / len);
        }
    }
}

/// Follow-the-leader: hard root-to-tip distance correction. The applied
/// correction is recorded per particle for velocity damping.
pub(crate) fn apply_follow_the_leader(p: &mut [Vec3], correction: &mut [Vec3], ctx: &StrandContext) {
    correction[0] = Vec3::ZERO;
    for i in 0..p.len() - 1 {
        let rest = ctx.segment_length(i);
        let delta = p[i + 1] - p[i];
        let len = delta.length();
        let target = if len > 1e-9 {
            p[i] + delta * (rest / len)
        } else {
            p[i] + ctx.world_segment(i)
        };
        let d = target - p[i + 1];
        p[i + 1] = target;
        correction[i + 1] = d;
    }
}

/// Local bending curvature over particle triples. The bend angle maps onto
/// the separation of the outer pair: sep = 2 r cos(angle / 2).
pub(crate) fn apply_curvature(
    p: &mut [Vec3],
    ctx: &StrandContext,
    gt: bool,
    lt: bool,
    target_angle: f32,
    k: f32,
) {
    for i in 0..p.len() - 2 {
        let r = 0.5 * (ctx.segment_length(i) + ctx.segment_length(i + 1));
        let target_sep = 2.0 * r * (target_angle * 0.5).cos();
        let sep = (p[i + 2] - p[i]).length();
        // GreaterThan enforces a minimum bend (correct when straighter:
        // separation too large); LessThan a maximum bend.
        let apply = if gt {
            sep > target_sep
        } else if lt {
            sep < target_sep
        } else {
            true
        };
        if !apply {
            continue;
        }
        let w0 = if i == 0 { 0.0 } else { 1.0 };
        let (d0, d2) = separation_correction(p[i], p[i + 2], target_sep, w0, 1.0);
        p[i] += d0 * k;
        p[i + 2] += d2 * k;
    }
}

/// Local shape constraint toward the rest pose.
pub(crate) fn apply_shape(p: &mut [Vec3], ctx: &StrandContext, stitched: bool, k: f32) {
    if stitched {
        // Accumulate targets root-to-tip from already-corrected positions
        let mut anchor = p[0];
        for i in 0..p.len() - 1 {
            let target = anchor + ctx.world_segment(i);
            p[i + 1] += (target - p[i + 1]) * k;
            anchor = p[i + 1];
        }
    } else {
        for i in 0..p.len() - 1 {
            let delta = (ctx.world_segment(i) - (p[i + 1] - p[i])) * (0.5 * k);
            if i > 0 {
                p[i] -= delta;
            }
            p[i + 1] += delta;
        }
    }
}

/// Global position/rotation constraints with the root-to-tip fade.
pub(crate) fn apply_global(
    p: &mut [Vec3],
    ctx: &StrandContext,
    params: &StepParams,
    features: &SolverFeatures,
) {
    let n = p.len();
    if features.global_position {
        for i in 1..n {
            let amount = params.global_position_amount * fade_weight(i, n, params, features.fade);
            if amount > 0.0 {
                p[i] = p[i].lerp(ctx.reference_position(i), amount);
            }
        }
    }
    if features.global_rotation {
        for i in 0..n - 1 {
            let amount =
                params.global_rotation_amount * fade_weight(i + 1, n, params, features.fade);
            if amount > 0.0 {
                let blended = (p[i + 1] - p[i]).lerp(ctx.world_segment(i), amount);
                p[i + 1] = p[i] + blended;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_context(rest_lengths: &'static [f32], segments: &'static [Vec3]) -> StrandContext<'static> {
        StrandContext {
            rest_lengths,
            rest_segments: segments,
            rest_offsets: &[],
            scale: 1.0,
            root_position: Vec3::ZERO,
            root_direction: Vec3::ZERO,
            frame_delta: Quat::IDENTITY,
        }
    }

    #[test]
    fn test_distance_restores_rest_length() {
        static LENGTHS: [f32; 1] = [1.0];
        static SEGMENTS: [Vec3; 1] = [Vec3::Y];
        let ctx = straight_context(&LENGTHS, &SEGMENTS);
        let mut p = [Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0)];
        for _ in 0..20 {
            apply_distance(&mut p, &ctx, 1.0);
        }
        assert_eq!(p[0], Vec3::ZERO, "root must stay pinned");
        assert!((p[1].length() - 1.0).abs() < 1e-4, "{:?}", p[1]);
    }

    #[test]
    fn test_ftl_is_hard_and_records_corrections() {
        static LENGTHS: [f32; 2] = [1.0, 1.0];
        static SEGMENTS: [Vec3; 2] = [Vec3::Y, Vec3::Y];
        let ctx = straight_context(&LENGTHS, &SEGMENTS);
        let mut p = [
            Vec3::ZERO,
            Vec3::new(0.0, 3.0, 0.0),
            Vec3::new(0.0, 3.5, 0.0),
        ];
        let mut corr = [Vec3::ZERO; 3];
        apply_follow_the_leader(&mut p, &mut corr, &ctx);
        assert!((p[1] - Vec3::Y).length() < 1e-6);
        assert!(((p[2] - p[1]).length() - 1.0).abs() < 1e-6);
        assert!(corr[1].length() > 0.0);
        assert_eq!(corr[0], Vec3::ZERO);
    }

    #[test]
    fn test_lra_clamps_overextension() {
        static OFFSETS: [Vec3; 2] = [Vec3::ZERO, Vec3::Y];
        let ctx = StrandContext {
            rest_lengths: &[1.0],
            rest_segments: &[Vec3::Y],
            rest_offsets: &OFFSETS,
            scale: 1.0,
            root_position: Vec3::ZERO,
            root_direction: Vec3::ZERO,
            frame_delta: Quat::IDENTITY,
        };
        let mut p = [Vec3::ZERO, Vec3::new(0.0, 5.0, 0.0)];
        apply_long_range_attachment(&mut p, &ctx);
        assert!((p[1].length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_curvature_less_than_straightens_only_when_bent() {
        static LENGTHS: [f32; 2] = [1.0, 1.0];
        static SEGMENTS: [Vec3; 2] = [Vec3::Y, Vec3::Y];
        let ctx = straight_context(&LENGTHS, &SEGMENTS);
        // Perfectly straight chain: LessThan(0 degrees) leaves it untouched
        let mut p = [Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 2.0, 0.0)];
        let before = p;
        apply_curvature(&mut p, &ctx, false, true, 0.0, 1.0);
        assert_eq!(p, before);
        // Bent chain gets straightened toward zero curvature
        let mut bent = [Vec3::ZERO, Vec3::Y, Vec3::new(0.9, 1.2, 0.0)];
        let sep_before = (bent[2] - bent[0]).length();
        apply_curvature(&mut bent, &ctx, false, true, 0.0, 1.0);
        let sep_after = (bent[2] - bent[0]).length();
        assert!(sep_after > sep_before, "{} vs {}", sep_after, sep_before);
    }

    #[test]
    fn test_shape_per_segment_recovers_rest_direction() {
        static LENGTHS: [f32; 1] = [1.0];
        static SEGMENTS: [Vec3; 1] = [Vec3::Y];
        let ctx = straight_context(&LENGTHS, &SEGMENTS);
        let mut p = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)];
        for _ in 0..50 {
            apply_shape(&mut p, &ctx, false, 0.5);
        }
        assert!((p[1] - Vec3::Y).length() < 1e-2, "{:?}", p[1]);
    }

    #[test]
    fn test_fade_weight_ramp() {
        let mut params = StepParams::test_default();
        params.fade_offset = 0.5;
        params.fade_extent = 0.25;
        // 5 particles: t = 0, 0.25, 0.5, 0.75, 1.0
        assert_eq!(fade_weight(0, 5, &params, true), 1.0);
        assert_eq!(fade_weight(2, 5, &params, true), 1.0);
        assert_eq!(fade_weight(3, 5, &params, true), 0.0);
        assert_eq!(fade_weight(4, 5, &params, true), 0.0);
        // Disabled fade is a constant 1
        assert_eq!(fade_weight(4, 5, &params, false), 1.0);
    }
}
