//! Graphics backend abstraction
//!
//! The registry never talks to a graphics API directly. A backend owns the
//! device and the presentation surface; the registry asks it for a render
//! target each frame, hands out one encoder per draw step, and gives the
//! recorded encoders back for presentation in draw order.

use crate::foundation::math::SurfaceSize;
use crate::render::error::RenderResult;

/// Surface and device owner for one render registry
///
/// Every method is called on the render thread with the frame lock held,
/// except that `Device` and `Target` clones are handed to draw steps that may
/// run on pool workers, hence their `Send + Sync` bounds.
pub trait GraphicsBackend: Send + 'static {
    /// Device handle shared by every draw step
    type Device: Clone + Send + Sync + 'static;

    /// Per-draw command recorder
    type Encoder: Send + 'static;

    /// Frame image acquired from the surface
    type Target: Clone + Send + Sync + 'static;

    /// Device used to create resources and record draws
    fn device(&self) -> &Self::Device;

    /// Current surface dimensions
    fn surface_size(&self) -> SurfaceSize;

    /// Acquire the next frame's target
    fn begin_frame(&mut self) -> RenderResult<Self::Target>;

    /// Fresh encoder for one draw step
    fn create_encoder(&self) -> RenderResult<Self::Encoder>;

    /// Submit encoders in order and present `target`
    fn present(&mut self, target: Self::Target, encoders: Vec<Self::Encoder>) -> RenderResult<()>;

    /// Rebuild the swapchain (or equivalent) for a new surface size
    fn resize(&mut self, size: SurfaceSize) -> RenderResult<()>;

    /// Release the surface and device; called once, at shutdown
    fn release(&mut self);
}

/// Notifications from the windowing layer to the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The surface changed size
    Resized(SurfaceSize),
    /// The window is closing; the render loop stops
    CloseRequested,
}
