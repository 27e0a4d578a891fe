//! Fixed capacities and numeric budgets for the simulation core.
//!
//! ## Capacity Conventions
//!
//! All maxima here are hard caps, not hints. Exceeding a strand/particle
//! maximum panics at asset construction; exceeding a per-step maximum
//! (boundaries, frustums) silently truncates and reports a discard count.

/// Gravity acceleration (m/s^2) - negative Y direction
pub const GRAVITY: f32 = -9.81;

/// Maximum number of strands in a single group.
pub const MAX_STRAND_COUNT: usize = 64 * 1024;

/// Maximum number of particles along a single strand.
pub const MAX_STRAND_PARTICLE_COUNT: usize = 128;

/// Maximum number of packed boundaries per step. The discrete SDF boundary,
/// if present, always occupies slot 0 within this budget.
pub const MAX_BOUNDARIES: usize = 8;

/// Maximum number of camera frustums considered by the LOD selector per step.
pub const MAX_FRUSTUMS: usize = 16;

/// Maximum grid resolution (cells per axis) accepted by the volume settings.
pub const MAX_GRID_RESOLUTION: u32 = 160;

/// Fractional bits used by the rasterized splat path's fixed-point
/// accumulators. Accumulation runs in i64, so the integer headroom is
/// 2^(63 - FIXED_POINT_FRACTIONAL_BITS) weight units per cell.
pub const FIXED_POINT_FRACTIONAL_BITS: u32 = 32;

/// Frames a boundary handle may go unseen before its previous-transform
/// history entry is evicted.
pub const BOUNDARY_HISTORY_TTL_FRAMES: u32 = 256;

/// Strand particle counts with a dedicated Jacobi relaxation kernel.
pub const JACOBI_KERNEL_COUNTS: [usize; 4] = [16, 32, 64, 128];
