//! Integer and floating point rectangles on the heightmap / blend-map grids

/// Integer rectangle with exclusive right and bottom edges
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const EMPTY: Rect = Rect { left: 0, top: 0, right: 0, bottom: 0 };

    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Rectangle anchored at the origin
    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Overlapping region (empty rect when disjoint)
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { Rect::EMPTY } else { r }
    }

    /// Smallest rectangle containing both; empty inputs are ignored
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Grow (or shrink, when negative) every edge by `amount`
    pub fn inflate(&self, amount: i32) -> Rect {
        Rect::new(self.left - amount, self.top - amount, self.right + amount, self.bottom + amount)
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }
}

/// World-space rectangle on the XZ plane (`top`/`bottom` are Z)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectF {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Bounding rectangle of a segment swept by a radius
    pub fn from_segment(from_x: f32, from_z: f32, to_x: f32, to_z: f32, radius: f32) -> Self {
        Self::new(
            from_x.min(to_x) - radius,
            from_z.min(to_z) - radius,
            from_x.max(to_x) + radius,
            from_z.max(to_z) + radius,
        )
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Closed-interval overlap test
    pub fn intersects(&self, other: &RectF) -> bool {
        self.left <= other.right && self.right >= other.left &&
        self.top <= other.bottom && self.bottom >= other.top
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_and_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 15, 20);
        assert_eq!(a.intersect(&b), Rect::new(5, 5, 10, 10));
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 20));

        let c = Rect::new(20, 20, 30, 30);
        assert!(a.intersect(&c).is_empty());
        assert_eq!(Rect::EMPTY.union(&c), c);
    }

    #[test]
    fn test_contains_exclusive_edges() {
        let r = Rect::from_size(4, 4);
        assert!(r.contains(0, 0));
        assert!(r.contains(3, 3));
        assert!(!r.contains(4, 0));
        assert_eq!(r.width(), 4);
    }

    #[test]
    fn test_rectf_from_segment() {
        let r = RectF::from_segment(10.0, 5.0, 0.0, 15.0, 2.0);
        assert_eq!(r, RectF::new(-2.0, 3.0, 12.0, 17.0));
        assert!(r.intersects(&RectF::new(11.0, 16.0, 20.0, 20.0)));
        assert!(!r.intersects(&RectF::new(13.0, 0.0, 20.0, 20.0)));
    }
}
