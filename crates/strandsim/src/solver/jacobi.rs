//! Fixed-count Jacobi relaxation kernels.
//!
//! One kernel per supported strand particle count (16/32/64/128), iterating
//! per strand against a stack-resident iterate snapshot: soft constraint
//! corrections are accumulated from the snapshot and applied together,
//! averaged per particle. The hard corrections (boundary pushout, long-range
//! attachment, follow-the-leader) stay serial sub-passes, matching their
//! definition as hard projections.

use glam::Vec3;

use crate::boundary::BoundarySet;

use super::constraints::{
    apply_boundary_collision, apply_follow_the_leader, apply_long_range_attachment, fade_weight,
    separation_correction, StrandContext,
};
use super::{SolverFeatures, StepParams};

/// Relax one strand with `N` particles.
pub(crate) fn relax_strand_jacobi<const N: usize>(
    p: &mut [Vec3],
    prev: &[Vec3],
    corr: &mut [Vec3],
    ctx: &StrandContext,
    boundaries: &BoundarySet,
    params: &StepParams,
    features: &SolverFeatures,
) {
    debug_assert_eq!(p.len(), N);
    let sor = if params.iterations > 1 { params.sor } else { 1.0 };
    let k = params.stiffness;
    let friction = if features.boundary_friction {
        params.boundary_friction
    } else {
        0.0
    };

    for _ in 0..params.iterations {
        if features.boundary {
            apply_boundary_collision(p, prev, boundaries, params.particle_radius, friction);
        }

        let mut snapshot = [Vec3::ZERO; N];
        snapshot.copy_from_slice(p);
        let mut delta = [Vec3::ZERO; N];
        let mut count = [0.0f32; N];

        if features.distance {
            for i in 0..N - 1 {
                let w0 = if i == 0 { 0.0 } else { 1.0 };
                let (d0, d1) =
                    separation_correction(snapshot[i], snapshot[i + 1], ctx.segment_length(i), w0, 1.0);
                delta[i] += d0 * k;
                delta[i + 1] += d1 * k;
                count[i] += 1.0;
                count[i + 1] += 1.0;
            }
        }

        if features.curvature {
            for i in 0..N - 2 {
                let r = 0.5 * (ctx.segment_length(i) + ctx.segment_length(i + 1));
                let target_sep = 2.0 * r * (params.curvature_target_angle * 0.5).cos();
                let sep = (snapshot[i + 2] - snapshot[i]).length();
                let apply = if features.curvature_gt {
                    sep > target_sep
                } else if features.curvature_lt {
                    sep < target_sep
                } else {
                    true
                };
                if !apply {
                    continue;
                }
                let w0 = if i == 0 { 0.0 } else { 1.0 };
                let (d0, d2) =
                    separation_correction(snapshot[i], snapshot[i + 2], target_sep, w0, 1.0);
                delta[i] += d0 * k;
                delta[i + 2] += d2 * k;
                count[i] += 1.0;
                count[i + 2] += 1.0;
            }
        }

        if features.shape {
            // Snapshot-anchored targets (the stitched chain accumulates over
            // snapshot positions under Jacobi)
            let mut anchor = snapshot[0];
            for i in 0..N - 1 {
                let target_seg = ctx.world_segment(i);
                if features.shape_stitched {
                    let target = anchor + target_seg;
                    delta[i + 1] += (target - snapshot[i + 1]) * params.shape_influence;
                    count[i + 1] += 1.0;
                    anchor = target;
                } else {
                    let d = (target_seg - (snapshot[i + 1] - snapshot[i]))
                        * (0.5 * params.shape_influence);
                    if i > 0 {
                        delta[i] -= d;
                        count[i] += 1.0;
                    }
                    delta[i + 1] += d;
                    count[i + 1] += 1.0;
                }
            }
        }

        if features.global_position {
            for i in 1..N {
                let amount = params.global_position_amount * fade_weight(i, N, params, features.fade);
                if amount > 0.0 {
                    delta[i] += (ctx.reference_position(i) - snapshot[i]) * amount;
                    count[i] += 1.0;
                }
            }
        }
        if features.global_rotation {
            for i in 0..N - 1 {
                let amount =
                    params.global_rotation_amount * fade_weight(i + 1, N, params, features.fade);
                if amount > 0.0 {
                    let target = snapshot[i] + ctx.world_segment(i);
                    delta[i + 1] += (target - snapshot[i + 1]) * amount;
                    count[i + 1] += 1.0;
                }
            }
        }

        // Apply the averaged corrections; the root stays pinned
        for i in 1..N {
            if count[i] > 0.0 {
                p[i] = snapshot[i] + delta[i] * (sor / count[i]);
            }
        }

        if features.lra {
            apply_long_range_attachment(p, ctx);
        }
        if features.ftl {
            apply_follow_the_leader(p, corr, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_jacobi_relaxes_local_perturbation() {
        const N: usize = 16;
        let rest_lengths = [0.1f32; N - 1];
        let rest_segments = [Vec3::NEG_Y * 0.1; N - 1];
        let mut rest_offsets = [Vec3::ZERO; N];
        for (i, offset) in rest_offsets.iter_mut().enumerate() {
            *offset = Vec3::NEG_Y * 0.1 * i as f32;
        }
        let ctx = StrandContext {
            rest_lengths: &rest_lengths,
            rest_segments: &rest_segments,
            rest_offsets: &rest_offsets,
            scale: 1.0,
            root_position: Vec3::ZERO,
            root_direction: Vec3::ZERO,
            frame_delta: Quat::IDENTITY,
        };
        // At rest except one displaced particle
        let mut p = [Vec3::ZERO; N];
        for (i, pos) in p.iter_mut().enumerate() {
            *pos = Vec3::NEG_Y * 0.1 * i as f32;
        }
        p[4] += Vec3::new(0.05, 0.0, 0.0);
        let prev = p;
        let mut corr = [Vec3::ZERO; N];

        let mut params = StepParams::test_default();
        params.iterations = 64;
        params.sor = 1.0;
        params.stiffness = 1.0;
        let features = SolverFeatures {
            distance: true,
            ..Default::default()
        };
        relax_strand_jacobi::<N>(
            &mut p,
            &prev,
            &mut corr,
            &ctx,
            &BoundarySet::new(),
            &params,
            &features,
        );

        assert_eq!(p[0], Vec3::ZERO, "root must stay pinned");
        for pos in &p {
            assert!(pos.is_finite());
        }
        // The perturbed neighborhood settles back near rest length
        for i in 3..6 {
            let len = (p[i + 1] - p[i]).length();
            assert!(
                (len - 0.1).abs() < 0.02,
                "segment {} length {} after relaxation",
                i,
                len
            );
        }
    }
}
