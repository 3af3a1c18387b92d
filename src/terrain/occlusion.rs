//! Screen-space horizon buffer for occlusion culling
//!
//! The buffer records, per screen column, the lowest height (normalised
//! device Y) that near geometry is guaranteed to cover. Geometry visited
//! later in front-to-back order whose outline stays below the recorded
//! horizon in every column it spans is hidden.

use crate::core::types::{Mat4, Vec3, Vec4};
use super::config::OcclusionConfig;

/// Outcome of testing one projected edge against the horizon
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HorizonResult {
    /// On screen and entirely below the recorded horizon
    Occluded,
    /// Rises above the recorded horizon somewhere
    Visible,
    /// Leaves the horizontal screen range, fully or in part. Nothing can
    /// be concluded about the off-screen part, so this counts as visible.
    Clipped,
    /// Could not be projected (behind the near limit)
    Invalid,
}

pub struct HorizonBuffer {
    columns: Vec<f32>,
    max_height: f32,
    epsilon: f32,
    near_w: f32,
}

impl HorizonBuffer {
    pub fn new(resolution: u32, epsilon: f32, near_w: f32) -> Self {
        Self {
            columns: vec![f32::MIN; resolution.max(1) as usize],
            max_height: f32::MIN,
            epsilon,
            near_w: near_w.max(f32::EPSILON),
        }
    }

    pub fn from_config(config: &OcclusionConfig) -> Self {
        Self::new(config.horizon_resolution, config.horizon_epsilon, config.near_w)
    }

    /// Forget every recorded horizon
    pub fn reset(&mut self) {
        self.columns.fill(f32::MIN);
        self.max_height = f32::MIN;
    }

    pub fn resolution(&self) -> usize {
        self.columns.len()
    }

    /// Highest value recorded in any column
    pub fn max_height(&self) -> f32 {
        self.max_height
    }

    pub fn height(&self, column: usize) -> f32 {
        self.columns.get(column).copied().unwrap_or(f32::MIN)
    }

    pub fn is_empty(&self) -> bool {
        self.max_height == f32::MIN
    }

    fn column_width(&self) -> f32 {
        2.0 / self.columns.len() as f32
    }

    fn column_at(&self, x: f32) -> usize {
        let column = ((x + 1.0) / self.column_width()).floor();
        (column.max(0.0) as usize).min(self.columns.len() - 1)
    }

    /// Test a clip-space edge
    pub fn test_edge(&self, a: Vec4, b: Vec4) -> HorizonResult {
        if a.w < self.near_w || b.w < self.near_w {
            return HorizonResult::Invalid;
        }
        self.test_line(a.x / a.w, a.y / a.w, b.x / b.w, b.y / b.w)
    }

    /// Test an edge given in normalised device coordinates
    pub fn test_line(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> HorizonResult {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return HorizonResult::Invalid;
        }
        let ((x1, y1), (x2, y2)) = if x1 <= x2 { ((x1, y1), (x2, y2)) } else { ((x2, y2), (x1, y1)) };
        if x1 < -1.0 || x2 > 1.0 {
            return HorizonResult::Clipped;
        }
        let line = Line { x1, y1, x2, y2 };
        let (lx, rx) = (x1, x2);
        if line.y_at(lx).max(line.y_at(rx)) >= self.max_height - self.epsilon {
            return HorizonResult::Visible;
        }

        let width = self.column_width();
        for column in self.column_at(lx)..=self.column_at(rx) {
            let cx0 = (-1.0 + column as f32 * width).max(lx);
            let cx1 = (-1.0 + (column + 1) as f32 * width).min(rx);
            let top = line.y_at(cx0).max(line.y_at(cx1));
            if top >= self.columns[column] - self.epsilon {
                return HorizonResult::Visible;
            }
        }
        HorizonResult::Occluded
    }

    /// Raise the horizon with a clip-space occluder edge. The part behind
    /// the near limit is clipped away.
    pub fn draw_edge(&mut self, a: Vec4, b: Vec4) {
        let (mut a, mut b) = (a, b);
        if a.w < self.near_w && b.w < self.near_w {
            return;
        }
        if a.w < self.near_w {
            a = a + (b - a) * ((self.near_w - a.w) / (b.w - a.w));
        } else if b.w < self.near_w {
            b = b + (a - b) * ((self.near_w - b.w) / (a.w - b.w));
        }
        self.raster_line(a.x / a.w, a.y / a.w, b.x / b.w, b.y / b.w);
    }

    /// Rasterise an occluder edge in normalised device coordinates. Only
    /// columns the edge spans completely are raised, each to the edge's
    /// lowest point within it.
    pub fn raster_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return;
        }
        let ((x1, y1), (x2, y2)) = if x1 <= x2 { ((x1, y1), (x2, y2)) } else { ((x2, y2), (x1, y1)) };
        if x2 < -1.0 || x1 > 1.0 {
            return;
        }
        let line = Line { x1, y1, x2, y2 };
        let width = self.column_width();
        for column in self.column_at(x1)..=self.column_at(x2) {
            let cx0 = -1.0 + column as f32 * width;
            let cx1 = cx0 + width;
            if cx0 < x1 || cx1 > x2 {
                continue;
            }
            let low = line.y_at(cx0).min(line.y_at(cx1));
            if low > self.columns[column] {
                self.columns[column] = low;
                self.max_height = self.max_height.max(low);
            }
        }
    }

    /// Test the outline of a convex solid given by its world-space corners
    /// and edge list. The solid is occluded only if every edge is; the
    /// first edge that is not decides the result.
    pub fn test_solid(&self, view_projection: &Mat4, corners: &[Vec3], edges: &[(usize, usize)]) -> HorizonResult {
        let projected: Vec<Vec4> = corners.iter().map(|c| *view_projection * c.extend(1.0)).collect();
        for &(a, b) in edges {
            match self.test_edge(projected[a], projected[b]) {
                HorizonResult::Occluded => {}
                result => return result,
            }
        }
        if edges.is_empty() { HorizonResult::Invalid } else { HorizonResult::Occluded }
    }

    /// Rasterise a closed world-space polygon as an occluder
    pub fn draw_polygon(&mut self, view_projection: &Mat4, corners: &[Vec3]) {
        for i in 0..corners.len() {
            let a = *view_projection * corners[i].extend(1.0);
            let b = *view_projection * corners[(i + 1) % corners.len()].extend(1.0);
            self.draw_edge(a, b);
        }
    }
}

#[derive(Clone, Copy)]
struct Line {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl Line {
    fn y_at(&self, x: f32) -> f32 {
        let dx = self.x2 - self.x1;
        if dx.abs() <= f32::EPSILON {
            return self.y1.max(self.y2);
        }
        self.y1 + (self.y2 - self.y1) * ((x - self.x1) / dx)
    }
}

/// Per-frame occlusion statistics and re-test scheduling
#[derive(Clone, Debug, Default)]
pub struct OcclusionScheduler {
    /// Nodes culled by occlusion in the last tested frame
    pub success: u32,
    /// Occlusion tests that found the node visible in the last tested frame
    pub failure: u32,
    skip_frames: u32,
    skip_origin: Vec3,
}

impl OcclusionScheduler {
    /// Whether occlusion tests should run this frame
    pub fn begin_frame(&mut self, eye: Vec3, config: &OcclusionConfig) -> bool {
        if !config.enabled {
            return false;
        }
        if self.skip_frames > 0 {
            if eye.distance(self.skip_origin) > config.retest_distance {
                self.skip_frames = 0;
            } else {
                self.skip_frames -= 1;
                return false;
            }
        }
        self.success = 0;
        self.failure = 0;
        true
    }

    /// Record the results of a tested frame and decide whether to back off
    pub fn end_frame(&mut self, eye: Vec3, success: u32, failure: u32, config: &OcclusionConfig) {
        self.success = success;
        self.failure = failure;
        let total = success + failure;
        let ratio = if total > 0 { success as f32 / total as f32 } else { 0.0 };
        if ratio < config.min_success_ratio && config.retest_interval > 0 {
            self.skip_frames = config.retest_interval;
            self.skip_origin = eye;
            log::trace!("Occlusion success ratio {:.3}; skipping {} frames", ratio, self.skip_frames);
        }
    }

    pub fn skipping(&self) -> bool {
        self.skip_frames > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_sees_everything() {
        let buffer = HorizonBuffer::new(64, 1e-3, 0.01);
        assert!(buffer.is_empty());
        assert_eq!(buffer.test_line(-0.5, -0.9, 0.5, -0.9), HorizonResult::Visible);
    }

    #[test]
    fn test_raster_then_occlude() {
        let mut buffer = HorizonBuffer::new(64, 1e-3, 0.01);
        buffer.raster_line(-1.0, 0.2, 1.0, 0.2);
        assert!((buffer.max_height() - 0.2).abs() < 1e-6);
        assert_eq!(buffer.test_line(-0.5, 0.0, 0.5, 0.1), HorizonResult::Occluded);
        assert_eq!(buffer.test_line(-0.5, 0.0, 0.5, 0.3), HorizonResult::Visible);
    }

    #[test]
    fn test_partial_columns_not_raised() {
        let mut buffer = HorizonBuffer::new(4, 1e-3, 0.01);
        // Columns are 0.5 wide; only [-0.5, 0.0) and [0.0, 0.5) are spanned fully
        buffer.raster_line(-0.6, 0.5, 0.6, 0.5);
        assert_eq!(buffer.height(0), f32::MIN);
        assert!((buffer.height(1) - 0.5).abs() < 1e-6);
        assert!((buffer.height(2) - 0.5).abs() < 1e-6);
        assert_eq!(buffer.height(3), f32::MIN);
        assert_eq!(buffer.test_line(-0.9, 0.0, -0.8, 0.0), HorizonResult::Visible);
        assert_eq!(buffer.test_line(-0.4, 0.0, 0.4, 0.0), HorizonResult::Occluded);
    }

    #[test]
    fn test_sloped_edge_uses_column_low_point() {
        let mut buffer = HorizonBuffer::new(2, 0.0, 0.01);
        buffer.raster_line(-1.0, 0.0, 1.0, 1.0);
        assert!((buffer.height(0) - 0.0).abs() < 1e-6);
        assert!((buffer.height(1) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_off_screen_and_behind() {
        let buffer = HorizonBuffer::new(16, 1e-3, 0.01);
        assert_eq!(buffer.test_line(1.5, 0.0, 2.0, 0.0), HorizonResult::Clipped);
        let behind = Vec4::new(0.0, 0.0, 0.0, -1.0);
        let front = Vec4::new(0.0, 0.0, 0.5, 1.0);
        assert_eq!(buffer.test_edge(behind, front), HorizonResult::Invalid);
    }

    #[test]
    fn test_solid_straddling_screen_edge_is_not_occluded() {
        let mut buffer = HorizonBuffer::new(16, 1e-3, 0.01);
        buffer.raster_line(-1.0, 0.5, 1.0, 0.5);
        let edges = [(0, 1), (1, 2), (2, 3), (3, 0)];
        let quad = |x0: f32, x1: f32| {
            [Vec3::new(x0, -0.5, 0.5), Vec3::new(x1, -0.5, 0.5), Vec3::new(x1, 0.0, 0.5), Vec3::new(x0, 0.0, 0.5)]
        };

        let inside = quad(-0.5, 0.5);
        assert_eq!(buffer.test_solid(&Mat4::IDENTITY, &inside, &edges), HorizonResult::Occluded);

        // Every on-screen edge sits under the horizon, but the solid runs off the left edge
        let straddling = quad(-1.5, 0.5);
        assert_eq!(buffer.test_line(-1.5, 0.0, 0.5, 0.0), HorizonResult::Clipped);
        assert_eq!(buffer.test_line(0.5, -0.5, 0.5, 0.0), HorizonResult::Occluded);
        assert_eq!(buffer.test_solid(&Mat4::IDENTITY, &straddling, &edges), HorizonResult::Clipped);
    }

    #[test]
    fn test_draw_edge_clips_near() {
        let mut buffer = HorizonBuffer::new(8, 1e-3, 0.5);
        buffer.draw_edge(Vec4::new(-2.0, 0.0, 0.0, 0.0), Vec4::new(2.0, 0.0, 1.0, 2.0));
        // The clipped start projects to x = -2; the rest still reaches the right edge
        assert!(buffer.height(7) > f32::MIN);
    }

    #[test]
    fn test_scheduler_backs_off_and_resumes() {
        let config = OcclusionConfig { retest_interval: 2, retest_distance: 5.0, ..Default::default() };
        let mut scheduler = OcclusionScheduler::default();
        assert!(scheduler.begin_frame(Vec3::ZERO, &config));
        scheduler.end_frame(Vec3::ZERO, 0, 40, &config);
        assert!(scheduler.skipping());
        assert!(!scheduler.begin_frame(Vec3::ZERO, &config));
        // Moving far cancels the skip
        assert!(scheduler.begin_frame(Vec3::new(10.0, 0.0, 0.0), &config));
        scheduler.end_frame(Vec3::ZERO, 10, 40, &config);
        assert!(!scheduler.skipping());
    }
}
