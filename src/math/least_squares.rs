//! Least-squares plane fitting for horizon approximation

use glam::{DMat3, DVec3};

/// A height plane `y = a*x + b*z + c`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeightPlane {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl HeightPlane {
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        self.a * x + self.b * z + self.c
    }

    /// Same slope, shifted vertically
    pub fn offset(&self, dy: f32) -> HeightPlane {
        HeightPlane { c: self.c + dy, ..*self }
    }
}

/// Running sums for fitting a height plane to a set of samples.
///
/// Sums from disjoint sample sets can be merged, so parent nodes of a spatial
/// tree can be fitted from their children without revisiting samples.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeastSquaresSums {
    pub count: f64,
    pub x: f64,
    pub z: f64,
    pub y: f64,
    pub xx: f64,
    pub zz: f64,
    pub xz: f64,
    pub xy: f64,
    pub zy: f64,
}

impl LeastSquaresSums {
    pub fn add(&mut self, x: f32, y: f32, z: f32) {
        let (x, y, z) = (x as f64, y as f64, z as f64);
        self.count += 1.0;
        self.x += x;
        self.z += z;
        self.y += y;
        self.xx += x * x;
        self.zz += z * z;
        self.xz += x * z;
        self.xy += x * y;
        self.zy += z * y;
    }

    pub fn merge(&mut self, other: &LeastSquaresSums) {
        self.count += other.count;
        self.x += other.x;
        self.z += other.z;
        self.y += other.y;
        self.xx += other.xx;
        self.zz += other.zz;
        self.xz += other.xz;
        self.xy += other.xy;
        self.zy += other.zy;
    }

    /// Solve the normal equations. Degenerate sample sets (fewer than three
    /// non-collinear points) fall back to a flat plane through the mean.
    pub fn fit(&self) -> HeightPlane {
        if self.count == 0.0 {
            return HeightPlane::default();
        }
        let m = DMat3::from_cols(
            DVec3::new(self.xx, self.xz, self.x),
            DVec3::new(self.xz, self.zz, self.z),
            DVec3::new(self.x, self.z, self.count),
        );
        let det = m.determinant();
        if det.abs() < 1e-9 {
            return HeightPlane { a: 0.0, b: 0.0, c: (self.y / self.count) as f32 };
        }
        let solution = m.inverse() * DVec3::new(self.xy, self.zy, self.y);
        HeightPlane {
            a: solution.x as f32,
            b: solution.y as f32,
            c: solution.z as f32,
        }
    }
}
