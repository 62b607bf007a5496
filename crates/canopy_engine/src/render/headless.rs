//! Headless backend
//!
//! A backend with no window and no GPU. It counts what would have been
//! presented, which makes it suitable for servers, benchmarks of the frame
//! loop, and tests.

use crate::foundation::math::SurfaceSize;
use crate::render::backend::GraphicsBackend;
use crate::render::error::{RenderError, RenderResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    presented: AtomicU64,
    commands: AtomicU64,
    resizes: AtomicU64,
    allocations: AtomicI64,
    released: AtomicBool,
    last_frame: Mutex<Vec<String>>,
}

/// Shared view of a headless backend's counters
///
/// Cloning is cheap; every clone observes the same backend.
#[derive(Debug, Clone, Default)]
pub struct HeadlessDevice {
    counters: Arc<Counters>,
}

impl HeadlessDevice {
    /// Record a resource allocation
    pub fn allocate(&self) {
        self.counters.allocations.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a resource release
    pub fn free(&self) {
        self.counters.allocations.fetch_sub(1, Ordering::AcqRel);
    }

    /// Allocations not yet freed
    pub fn live_allocations(&self) -> i64 {
        self.counters.allocations.load(Ordering::Acquire)
    }

    /// Frames presented
    pub fn presented(&self) -> u64 {
        self.counters.presented.load(Ordering::Acquire)
    }

    /// Commands submitted across all frames
    pub fn submitted_commands(&self) -> u64 {
        self.counters.commands.load(Ordering::Acquire)
    }

    /// Resize requests applied
    pub fn resizes(&self) -> u64 {
        self.counters.resizes.load(Ordering::Acquire)
    }

    /// Whether the backend released its surface and device
    pub fn is_released(&self) -> bool {
        self.counters.released.load(Ordering::Acquire)
    }

    /// Commands of the most recent presented frame, in submission order
    pub fn last_frame(&self) -> Vec<String> {
        self.counters.last_frame.lock().clone()
    }
}

/// Command recorder for the headless backend
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<String>,
}

impl CommandList {
    /// Record a labelled command
    pub fn record(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    /// Recorded commands
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

/// Frame target of the headless backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessTarget {
    /// Presentation index, starting at 1
    pub frame: u64,
    /// Surface size when the frame began
    pub size: SurfaceSize,
}

/// Backend that presents into counters
#[derive(Debug)]
pub struct HeadlessBackend {
    device: HeadlessDevice,
    size: SurfaceSize,
}

impl HeadlessBackend {
    /// Create a backend with a surface of `size`
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            device: HeadlessDevice::default(),
            size,
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    type Device = HeadlessDevice;
    type Encoder = CommandList;
    type Target = HeadlessTarget;

    fn device(&self) -> &HeadlessDevice {
        &self.device
    }

    fn surface_size(&self) -> SurfaceSize {
        self.size
    }

    fn begin_frame(&mut self) -> RenderResult<HeadlessTarget> {
        if self.device.is_released() {
            return Err(RenderError::BackendError("surface already released".to_string()));
        }
        Ok(HeadlessTarget {
            frame: self.device.presented() + 1,
            size: self.size,
        })
    }

    fn create_encoder(&self) -> RenderResult<CommandList> {
        Ok(CommandList::default())
    }

    fn present(&mut self, _target: HeadlessTarget, encoders: Vec<CommandList>) -> RenderResult<()> {
        let commands: Vec<String> = encoders.into_iter().flat_map(|encoder| encoder.commands).collect();
        self.device
            .counters
            .commands
            .fetch_add(commands.len() as u64, Ordering::AcqRel);
        *self.device.counters.last_frame.lock() = commands;
        self.device.counters.presented.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn resize(&mut self, size: SurfaceSize) -> RenderResult<()> {
        self.size = size;
        self.device.counters.resizes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release(&mut self) {
        self.device.counters.released.store(true, Ordering::Release);
        log::debug!("Headless surface released after {} frames", self.device.presented());
    }
}
