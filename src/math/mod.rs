//! Mathematical utilities and data structures

pub mod aabb;
pub mod ray;
pub mod rect;
pub mod frustum;
pub mod least_squares;

pub use aabb::Aabb;
pub use ray::Ray;
pub use rect::{Rect, RectF};
pub use frustum::{Plane, Frustum, Visibility};
pub use least_squares::{HeightPlane, LeastSquaresSums};
