//! Draw operations

use crate::foundation::math::{SurfaceSize, Vec2};
use crate::render::backend::GraphicsBackend;
use crate::render::error::RenderResult;
use std::time::Duration;

/// Per-frame values handed to every draw step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Frame index, starting at 1
    pub frame: u64,
    /// Wall-clock time since the previous frame
    pub delta: Duration,
    /// Offset requested by the operation's owner
    pub offset: Vec2,
}

/// A unit of drawing work registered with a
/// [`RenderRegistry`](crate::render::RenderRegistry)
///
/// Resource hooks run on the render thread (or the registering thread) with
/// the frame lock held. `draw` may run on a pool worker concurrently with
/// other operations' draws, but never concurrently with this operation's own
/// hooks.
pub trait DrawOperation<B: GraphicsBackend>: Send + 'static {
    /// Name used in errors and logs
    fn name(&self) -> &str {
        "draw operation"
    }

    /// Allocate resources that live as long as the operation
    fn create_resources(&mut self, device: &B::Device, size: SurfaceSize) -> RenderResult<()>;

    /// Allocate resources that depend on the surface size
    ///
    /// Called after `create_resources` and again after every resize.
    fn create_surface_sized_resources(&mut self, _device: &B::Device, _size: SurfaceSize) -> RenderResult<()> {
        Ok(())
    }

    /// Record this frame's commands into `encoder`
    fn draw(
        &mut self,
        frame: &FrameInfo,
        encoder: &mut B::Encoder,
        device: &B::Device,
        target: &B::Target,
    ) -> RenderResult<()>;

    /// Whether the operation retired itself; a disposed operation is skipped
    /// and pruned on the next frame
    fn is_disposed(&self) -> bool {
        false
    }

    /// Free everything allocated by the creation hooks
    fn release_resources(&mut self) {}
}
