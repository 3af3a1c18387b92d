//! View frustum for culling

use crate::core::camera::Camera;
use crate::core::types::{Vec3, Vec4, Mat4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Result of classifying a volume against the frustum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Entirely outside at least one plane
    Invisible,
    /// Straddles one or more planes
    PartiallyVisible,
    /// Inside every plane
    FullyVisible,
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
    /// View-projection matrix the planes were extracted from
    pub view_projection: Mat4,
    /// Eye position (sort origin for front-to-back traversal)
    pub origin: Vec3,
}

impl Frustum {
    /// Build the frustum for a camera
    pub fn from_camera(camera: &Camera) -> Self {
        let mut frustum = Self::from_view_projection(&camera.view_projection());
        frustum.origin = camera.position;
        frustum
    }

    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |r: usize| Vec4::new(m[0][r], m[1][r], m[2][r], m[3][r]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        // Near uses row2 alone: glam's perspective_rh maps depth to [0, 1].
        let near = Self::normalize_plane(r2);
        let far = Self::normalize_plane(r3 - r2);
        let left = Self::normalize_plane(r3 + r0);
        let right = Self::normalize_plane(r3 - r0);
        let top = Self::normalize_plane(r3 - r1);
        let bottom = Self::normalize_plane(r3 + r1);

        // The eye is the point whose clip-space w is zero: (0, 0, c, 0).
        let inv = vp.inverse();
        let eye = inv * Vec4::new(0.0, 0.0, 1.0, 0.0);
        let origin = if eye.w.abs() > f32::EPSILON {
            eye.truncate() / eye.w
        } else {
            Vec3::ZERO
        };

        Self {
            planes: [near, far, left, right, top, bottom],
            view_projection: *vp,
            origin,
        }
    }

    fn normalize_plane(plane: Vec4) -> Plane {
        let normal = Vec3::new(plane.x, plane.y, plane.z);
        let len = normal.length();
        if len <= f32::EPSILON {
            return Plane::new(Vec3::ZERO, 0.0);
        }
        Plane {
            normal: normal / len,
            distance: plane.w / len,
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if AABB intersects frustum (conservative test)
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.classify_aabb(aabb) != Visibility::Invisible
    }

    /// Three-state classification of an AABB against all six planes
    pub fn classify_aabb(&self, aabb: &Aabb) -> Visibility {
        let mut result = Visibility::FullyVisible;
        for plane in &self.planes {
            // p-vertex: corner most aligned with the plane normal
            let p = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            if plane.distance_to_point(p) < 0.0 {
                return Visibility::Invisible;
            }

            // n-vertex: the opposite corner
            let n = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.min.x } else { aabb.max.x },
                if plane.normal.y >= 0.0 { aabb.min.y } else { aabb.max.y },
                if plane.normal.z >= 0.0 { aabb.min.z } else { aabb.max.z },
            );
            if plane.distance_to_point(n) < 0.0 {
                result = Visibility::PartiallyVisible;
            }
        }
        result
    }
}
