//! Draw operation registry and background render thread
//!
//! Drawable entities register [`DrawOperation`]s with a [`RenderRegistry`],
//! which draws them every frame on its own thread, in priority order, until
//! their [`DrawHandle`] is disposed.

pub mod backend;
pub mod draw_queue;
pub mod error;
pub mod headless;
pub mod operation;
pub mod owner;
pub mod registry;

pub use backend::{GraphicsBackend, SurfaceEvent};
pub use draw_queue::{DrawQueue, QueuedDraw};
pub use error::{RenderError, RenderResult};
pub use headless::{CommandList, HeadlessBackend, HeadlessDevice, HeadlessTarget};
pub use operation::{DrawOperation, FrameInfo};
pub use owner::{Contribution, DrawableOwner, GatedOwner, RegistrationFilter, StaticOwner};
pub use registry::{DrawHandle, RegistryStats, RenderRegistry};
