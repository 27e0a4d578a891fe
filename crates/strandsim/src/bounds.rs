//! Simulation bounding volumes.

use glam::Vec3;
use rayon::prelude::*;

/// Axis-aligned bounding volume: center + half extents + enclosing radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupBounds {
    pub center: Vec3,
    /// Half extents.
    pub extent: Vec3,
    /// Radius of the enclosing sphere.
    pub radius: f32,
}

impl GroupBounds {
    pub fn new(center: Vec3, extent: Vec3) -> Self {
        Self {
            center,
            extent,
            radius: extent.length(),
        }
    }

    /// Whether every component is finite. Non-finite bounds (e.g. from a
    /// failed asynchronous readback) must not be consumed.
    pub fn is_finite(&self) -> bool {
        self.center.is_finite() && self.extent.is_finite() && self.radius.is_finite()
    }

    /// Tight bounds over a set of points. `None` when empty.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let (min, max) = points
            .par_iter()
            .fold(
                || (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                |(min, max), p| (min.min(*p), max.max(*p)),
            )
            .reduce(
                || (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                |(amin, amax), (bmin, bmax)| (amin.min(bmin), amax.max(bmax)),
            );
        Some(Self::new((min + max) * 0.5, (max - min) * 0.5))
    }

    /// Smallest bounds containing both inputs.
    pub fn union(&self, other: &Self) -> Self {
        let min = (self.center - self.extent).min(other.center - other.extent);
        let max = (self.center + self.extent).max(other.center + other.extent);
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() {
        let points = vec![
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 2.0, 0.0),
            Vec3::new(0.0, 1.0, 3.0),
        ];
        let bounds = GroupBounds::from_points(&points).unwrap();
        assert_eq!(bounds.center, Vec3::new(0.0, 1.0, 1.5));
        assert_eq!(bounds.extent, Vec3::new(1.0, 1.0, 1.5));
        assert!((bounds.radius - bounds.extent.length()).abs() < 1e-6);
    }

    #[test]
    fn test_from_points_empty() {
        assert!(GroupBounds::from_points(&[]).is_none());
    }

    #[test]
    fn test_union() {
        let a = GroupBounds::new(Vec3::ZERO, Vec3::ONE);
        let b = GroupBounds::new(Vec3::new(4.0, 0.0, 0.0), Vec3::ONE);
        let u = a.union(&b);
        assert_eq!(u.center, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(u.extent, Vec3::new(3.0, 1.0, 1.0));
    }

    #[test]
    fn test_non_finite_detected() {
        let b = GroupBounds::new(Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ONE);
        assert!(!b.is_finite());
    }
}
