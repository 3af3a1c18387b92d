//! Parametric rays and segments

use crate::core::types::Vec3;
use super::aabb::Aabb;

/// A ray `origin + direction * t`. The direction is not normalised, so a
/// segment from `a` to `b` is the ray `(a, b - a)` over `t` in `[0, 1]`.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Ray covering the segment `from .. to` over `t` in `[0, 1]`
    pub fn segment(from: Vec3, to: Vec3) -> Self {
        Self::new(from, to - from)
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Parameter range `(t_near, t_far)` inside the box, with `t_near`
    /// clamped to zero. Axes the ray does not move along only require the
    /// origin to lie within that slab.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let mut t_near = 0.0f32;
        let mut t_far = f32::INFINITY;
        for axis in 0..3 {
            let origin = self.origin[axis];
            let direction = self.direction[axis];
            let (min, max) = (aabb.min[axis], aabb.max[axis]);
            if direction == 0.0 {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }
            let t1 = (min - origin) / direction;
            let t2 = (max - origin) / direction;
            t_near = t_near.max(t1.min(t2));
            t_far = t_far.min(t1.max(t2));
            if t_near > t_far {
                return None;
            }
        }
        Some((t_near, t_far))
    }

    /// Like [`Self::intersects_aabb`] but limited to `t <= max_t`
    pub fn clip_to_aabb(&self, aabb: &Aabb, max_t: f32) -> Option<(f32, f32)> {
        let (t_near, t_far) = self.intersects_aabb(aabb)?;
        (t_near <= max_t).then(|| (t_near, t_far.min(max_t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::ONE)
    }

    #[test]
    fn test_segment_endpoints() {
        let ray = Ray::segment(Vec3::new(1.0, 2.0, 3.0), Vec3::new(3.0, 2.0, -1.0));
        assert_eq!(ray.at(0.0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(ray.at(1.0), Vec3::new(3.0, 2.0, -1.0));
    }

    #[test]
    fn test_slab_hit_and_miss() {
        let (t_near, t_far) = Ray::new(Vec3::new(-2.0, 0.5, 0.5), Vec3::X).intersects_aabb(&unit_box()).unwrap();
        assert!((t_near - 2.0).abs() < 1e-5);
        assert!((t_far - 3.0).abs() < 1e-5);
        assert!(Ray::new(Vec3::new(-2.0, 5.0, 0.5), Vec3::X).intersects_aabb(&unit_box()).is_none());
        assert!(Ray::new(Vec3::new(2.0, 0.5, 0.5), Vec3::X).intersects_aabb(&unit_box()).is_none());
    }

    #[test]
    fn test_origin_inside_starts_at_zero() {
        let (t_near, t_far) = Ray::new(Vec3::splat(0.5), Vec3::X).intersects_aabb(&unit_box()).unwrap();
        assert_eq!(t_near, 0.0);
        assert!((t_far - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_vertical_ray_on_box_edge() {
        // Zero X/Z direction with the origin on the box boundary
        let ray = Ray::segment(Vec3::new(0.0, 10.0, 1.0), Vec3::new(0.0, -10.0, 1.0));
        let (t_near, t_far) = ray.intersects_aabb(&unit_box()).unwrap();
        assert!((t_near - 0.9).abs() < 1e-5);
        assert!((t_far - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_flat_box() {
        let flat = Aabb::new(Vec3::new(0.0, 5.0, 0.0), Vec3::new(4.0, 5.0, 4.0));
        let ray = Ray::segment(Vec3::new(2.0, 10.0, 2.0), Vec3::new(2.0, 0.0, 2.0));
        let (t_near, t_far) = ray.intersects_aabb(&flat).unwrap();
        assert!((t_near - 0.5).abs() < 1e-5);
        assert!((t_far - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_clip_to_aabb() {
        let ray = Ray::new(Vec3::new(-2.0, 0.5, 0.5), Vec3::X);
        assert!(ray.clip_to_aabb(&unit_box(), 1.0).is_none());
        assert_eq!(ray.clip_to_aabb(&unit_box(), 2.5), Some((2.0, 2.5)));
    }
}
