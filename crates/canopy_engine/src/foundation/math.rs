//! Math types used by the draw queue

use nalgebra::Vector2;

/// 2D vector (draw offsets, surface-space positions)
pub type Vec2 = Vector2<f32>;

/// Surface dimensions in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl SurfaceSize {
    /// Create a new size
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero (minimized window)
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height, 0.0 for an empty surface
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}
