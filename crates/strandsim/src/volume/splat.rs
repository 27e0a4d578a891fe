//! Splat kernels for the volume grid's Insert stage.
//!
//! All three methods scatter the same trilinear 2x2x2 footprint and produce
//! identical fields within precision:
//! - `Combined`: one pass accumulating weight and weighted velocity.
//! - `Split`: a density pass plus one pass per velocity axis.
//! - `Rasterized`: fixed-point integer accumulation, decoded during Resolve.
//!
//! The per-particle volume (cross-section area x max interval x scale cubed)
//! is applied here; Resolve completes the density conversion by dividing by
//! the cell volume.

use glam::Vec3;

use super::{fp_encode, trilinear_weight, VolumeGrid};
use crate::settings::SplatMethod;

/// Scatter one strand group's particles onto the grid.
///
/// `rest_densities` carries the per-particle initial densities when the
/// target density mode is `InitialPoseInParticles`; pass `None` otherwise.
pub fn splat_group(
    grid: &mut VolumeGrid,
    positions: &[Vec3],
    velocities: &[Vec3],
    rest_densities: Option<&[f32]>,
    particle_volume: f32,
    method: SplatMethod,
) {
    let res = grid.resolution() as i32;
    if res == 0 || positions.is_empty() {
        return;
    }
    debug_assert_eq!(positions.len(), velocities.len());

    let (bounds_min, _) = grid.world_bounds();
    let inv_h = 1.0 / grid.cell_size();

    match method {
        SplatMethod::Combined => {
            let (weight, momentum, rest_weight) = grid.accumulators();
            for (p_idx, &p) in positions.iter().enumerate() {
                let vel = velocities[p_idx];
                let rest = rest_densities.map_or(0.0, |r| r[p_idx]);
                let g = (p - bounds_min) * inv_h - Vec3::splat(0.5);
                let base = g.floor();
                let frac = g - base;
                let (bi, bj, bk) = (base.x as i32, base.y as i32, base.z as i32);
                for dk in 0..2 {
                    for dj in 0..2 {
                        for di in 0..2 {
                            let (ni, nj, nk) = (bi + di, bj + dj, bk + dk);
                            if ni < 0 || ni >= res || nj < 0 || nj >= res || nk < 0 || nk >= res {
                                continue;
                            }
                            let w = trilinear_weight(frac, di, dj, dk) * particle_volume;
                            if w <= 0.0 {
                                continue;
                            }
                            let idx = ((nk * res + nj) * res + ni) as usize;
                            weight[idx] += w;
                            momentum[idx] += vel * w;
                            rest_weight[idx] += rest * w;
                        }
                    }
                }
            }
        }
        SplatMethod::Split => {
            // Density pass
            {
                let (weight, _, rest_weight) = grid.accumulators();
                for (p_idx, &p) in positions.iter().enumerate() {
                    let rest = rest_densities.map_or(0.0, |r| r[p_idx]);
                    let g = (p - bounds_min) * inv_h - Vec3::splat(0.5);
                    let base = g.floor();
                    let frac = g - base;
                    let (bi, bj, bk) = (base.x as i32, base.y as i32, base.z as i32);
                    for dk in 0..2 {
                        for dj in 0..2 {
                            for di in 0..2 {
                                let (ni, nj, nk) = (bi + di, bj + dj, bk + dk);
                                if ni < 0 || ni >= res || nj < 0 || nj >= res || nk < 0 || nk >= res
                                {
                                    continue;
                                }
                                let w = trilinear_weight(frac, di, dj, dk) * particle_volume;
                                if w <= 0.0 {
                                    continue;
                                }
                                let idx = ((nk * res + nj) * res + ni) as usize;
                                weight[idx] += w;
                                rest_weight[idx] += rest * w;
                            }
                        }
                    }
                }
            }
            // One pass per velocity axis
            for axis in 0..3 {
                let (_, momentum, _) = grid.accumulators();
                for (p_idx, &p) in positions.iter().enumerate() {
                    let v_axis = velocities[p_idx][axis];
                    let g = (p - bounds_min) * inv_h - Vec3::splat(0.5);
                    let base = g.floor();
                    let frac = g - base;
                    let (bi, bj, bk) = (base.x as i32, base.y as i32, base.z as i32);
                    for dk in 0..2 {
                        for dj in 0..2 {
                            for di in 0..2 {
                                let (ni, nj, nk) = (bi + di, bj + dj, bk + dk);
                                if ni < 0 || ni >= res || nj < 0 || nj >= res || nk < 0 || nk >= res
                                {
                                    continue;
                                }
                                let w = trilinear_weight(frac, di, dj, dk) * particle_volume;
                                if w <= 0.0 {
                                    continue;
                                }
                                let idx = ((nk * res + nj) * res + ni) as usize;
                                momentum[idx][axis] += v_axis * w;
                            }
                        }
                    }
                }
            }
        }
        SplatMethod::Rasterized => {
            // Worst case: every particle lands in one cell
            grid.validate_fixed_point_headroom(positions.len() as f64 * particle_volume as f64);
            let (weight_fx, momentum_fx, rest_weight_fx) = grid.accumulators_fx();
            for (p_idx, &p) in positions.iter().enumerate() {
                let vel = velocities[p_idx];
                let rest = rest_densities.map_or(0.0, |r| r[p_idx]);
                let g = (p - bounds_min) * inv_h - Vec3::splat(0.5);
                let base = g.floor();
                let frac = g - base;
                let (bi, bj, bk) = (base.x as i32, base.y as i32, base.z as i32);
                for dk in 0..2 {
                    for dj in 0..2 {
                        for di in 0..2 {
                            let (ni, nj, nk) = (bi + di, bj + dj, bk + dk);
                            if ni < 0 || ni >= res || nj < 0 || nj >= res || nk < 0 || nk >= res {
                                continue;
                            }
                            let w = trilinear_weight(frac, di, dj, dk) * particle_volume;
                            if w <= 0.0 {
                                continue;
                            }
                            let idx = ((nk * res + nj) * res + ni) as usize;
                            weight_fx[idx] += fp_encode(w);
                            momentum_fx[idx][0] += fp_encode(vel.x * w);
                            momentum_fx[idx][1] += fp_encode(vel.y * w);
                            momentum_fx[idx][2] += fp_encode(vel.z * w);
                            rest_weight_fx[idx] += fp_encode(rest * w);
                        }
                    }
                }
            }
        }
    }
}
