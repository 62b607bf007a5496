//! Render registry
//!
//! One registry drives one surface from its own background thread. All frame
//! work happens under a single frame lock that also guards the backend and
//! the registry's entries, so registration, resize handling, pruning and
//! drawing never interleave.
//!
//! Frame loop:
//! 1. Wait on the frame lock for at most `frame_lock_timeout`, then re-check
//!    the stop flag; a busy lock never starves shutdown
//! 2. Apply pending surface events
//! 3. Prune entries whose handle was dropped or disposed, or whose operation
//!    retired itself
//! 4. Ask each live owner for a contribution and sort the draw queue
//! 5. Run every draw step (on the worker pool above a threshold) and present
//!    the recorded encoders in queue order
//! 6. Release the lock and update the FPS estimate
//!
//! Disposal through a [`DrawHandle`] is a flag write: it never takes the
//! frame lock, and a disposed entry that is already queued is skipped rather
//! than drawn.

use crate::core::config::RenderConfig;
use crate::core::RuntimeContext;
use crate::foundation::collections::{DrawOperationId, HandleMap};
use crate::foundation::math::SurfaceSize;
use crate::foundation::pool::{run_guarded, WorkerPool};
use crate::foundation::time::{Clock, Timer};
use crate::render::backend::{GraphicsBackend, SurfaceEvent};
use crate::render::draw_queue::DrawQueue;
use crate::render::error::{RenderError, RenderResult};
use crate::render::operation::{DrawOperation, FrameInfo};
use crate::render::owner::{DrawableOwner, RegistrationFilter};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type SharedOperation<B> = Arc<Mutex<Box<dyn DrawOperation<B>>>>;

/// Owning handle to a registered draw operation
///
/// Dropping the handle disposes the operation. Disposal may happen on any
/// thread at any time; it guarantees no future draw, while a draw already in
/// progress completes.
#[derive(Debug)]
pub struct DrawHandle {
    id: DrawOperationId,
    disposed: Arc<AtomicBool>,
}

impl DrawHandle {
    /// Registry key of the operation
    pub const fn id(&self) -> DrawOperationId {
        self.id
    }

    /// Stop drawing the operation; its entry is pruned on the next frame
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Whether [`dispose`](Self::dispose) was called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for DrawHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryStats {
    /// Smoothed frames per second
    pub fps: f32,
    /// Frames presented
    pub frames_rendered: u64,
    /// Entries alive after the last prune or registration
    pub live_operations: usize,
    /// Render thread errors not yet collected
    pub pending_errors: usize,
}

struct Entry<B: GraphicsBackend> {
    sequence: u64,
    name: String,
    owner: Arc<dyn DrawableOwner>,
    operation: SharedOperation<B>,
    disposed: Arc<AtomicBool>,
}

impl<B: GraphicsBackend> Entry<B> {
    fn is_retired(&self) -> bool {
        self.disposed.load(Ordering::Acquire) || self.operation.lock().is_disposed()
    }
}

struct FrameState<B: GraphicsBackend> {
    backend: B,
    entries: HandleMap<DrawOperationId, Entry<B>>,
    next_sequence: u64,
    released: bool,
}

impl<B: GraphicsBackend> FrameState<B> {
    fn prune(&mut self) -> usize {
        let retired: Vec<DrawOperationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_retired())
            .map(|(id, _)| id)
            .collect();

        for &id in &retired {
            if let Some(entry) = self.entries.remove(id) {
                entry.operation.lock().release_resources();
                log::trace!("Pruned draw operation '{}' ({id:?})", entry.name);
            }
        }
        retired.len()
    }

    fn release_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.disposed.store(true, Ordering::Release);
            entry.operation.lock().release_resources();
        }
        if !self.released {
            self.backend.release();
            self.released = true;
        }
    }
}

struct DrawJob<B: GraphicsBackend> {
    name: String,
    operation: SharedOperation<B>,
    disposed: Arc<AtomicBool>,
}

struct Stats {
    timer: Timer,
    frames: u64,
}

struct Shared<B: GraphicsBackend> {
    state: Mutex<FrameState<B>>,
    stopping: AtomicBool,
    filters: RwLock<Vec<Arc<dyn RegistrationFilter<B>>>>,
    errors: Mutex<Vec<RenderError>>,
    stats: Mutex<Stats>,
    frame_done: Condvar,
    live: AtomicUsize,
    config: RenderConfig,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl<B: GraphicsBackend> Shared<B> {
    fn record(&self, err: RenderError) {
        log::error!("Render thread: {err}");
        self.errors.lock().push(err);
    }

    fn render_frame(&self, events: &Receiver<SurfaceEvent>) {
        let timeout = self.config.frame_lock_timeout();
        let Some(mut state) = self.state.try_lock_for(timeout) else {
            log::debug!("Frame lock busy for {timeout:?}, re-checking stop flag");
            return;
        };
        if self.stopping.load(Ordering::Acquire) || state.released {
            return;
        }

        for event in events.try_iter() {
            match event {
                SurfaceEvent::Resized(size) => self.apply_resize(&mut state, size),
                SurfaceEvent::CloseRequested => {
                    log::info!("Surface close requested, stopping render loop");
                    self.stopping.store(true, Ordering::Release);
                    return;
                }
            }
        }

        let pruned = state.prune();
        self.live.store(state.entries.len(), Ordering::Release);
        if pruned > 0 {
            log::debug!("Pruned {pruned} draw operation(s), {} live", state.entries.len());
        }

        if state.backend.surface_size().is_empty() {
            return;
        }

        let (frame, delta) = {
            let mut stats = self.stats.lock();
            stats.timer.update(self.clock.now());
            (stats.frames + 1, stats.timer.delta_time())
        };

        let mut queue = DrawQueue::with_capacity(state.entries.len());
        for (id, entry) in &state.entries {
            match run_guarded(|| entry.owner.contribute(id)) {
                Ok(Some(contribution)) => queue.push(
                    id,
                    entry.sequence,
                    contribution,
                    DrawJob {
                        name: entry.name.clone(),
                        operation: Arc::clone(&entry.operation),
                        disposed: Arc::clone(&entry.disposed),
                    },
                ),
                Ok(None) => {}
                Err(panic) => self.record(RenderError::DrawPanicked(format!(
                    "owner of '{}' panicked: {}",
                    entry.name,
                    panic.message()
                ))),
            }
        }

        let target = match state.backend.begin_frame() {
            Ok(target) => target,
            Err(err) => {
                self.record(err);
                return;
            }
        };
        let device = state.backend.device().clone();

        let mut prepared = Vec::with_capacity(queue.len());
        for draw in queue.into_ordered() {
            if draw.payload.disposed.load(Ordering::Acquire) {
                continue;
            }
            match state.backend.create_encoder() {
                Ok(encoder) => prepared.push((draw.payload, FrameInfo { frame, delta, offset: draw.offset }, encoder)),
                Err(err) => self.record(err),
            }
        }

        let encoders = self.run_draws(prepared, &device, &target);
        if let Err(err) = state.backend.present(target, encoders) {
            self.record(err);
            return;
        }
        drop(state);

        self.stats.lock().frames = frame;
        self.frame_done.notify_all();
    }

    fn run_draws(
        &self,
        prepared: Vec<(DrawJob<B>, FrameInfo, B::Encoder)>,
        device: &B::Device,
        target: &B::Target,
    ) -> Vec<B::Encoder> {
        let names: Vec<String> = prepared.iter().map(|(job, _, _)| job.name.clone()).collect();
        let results = if prepared.len() >= self.config.parallel_draw_threshold && self.pool.size() > 1 {
            let jobs: Vec<_> = prepared
                .into_iter()
                .map(|(job, info, encoder)| {
                    let device = device.clone();
                    let target = target.clone();
                    move || draw_one::<B>(&job, &info, encoder, &device, &target)
                })
                .collect();
            self.pool.scatter(jobs)
        } else {
            prepared
                .into_iter()
                .map(|(job, info, encoder)| run_guarded(|| draw_one::<B>(&job, &info, encoder, device, target)))
                .collect()
        };

        let mut encoders = Vec::with_capacity(results.len());
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(Some(encoder))) => encoders.push(encoder),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    log::warn!("Draw operation '{name}' failed");
                    self.record(err);
                }
                Err(panic) => self.record(RenderError::DrawPanicked(format!("'{name}': {}", panic.message()))),
            }
        }
        encoders
    }

    fn apply_resize(&self, state: &mut FrameState<B>, size: SurfaceSize) {
        if let Err(err) = state.backend.resize(size) {
            self.record(err);
            return;
        }
        if size.is_empty() {
            return;
        }
        let device = state.backend.device().clone();
        for (_, entry) in &state.entries {
            if let Err(err) = entry.operation.lock().create_surface_sized_resources(&device, size) {
                self.record(err);
            }
        }
        log::debug!("Surface resized to {}x{}", size.width, size.height);
    }
}

fn draw_one<B: GraphicsBackend>(
    job: &DrawJob<B>,
    info: &FrameInfo,
    mut encoder: B::Encoder,
    device: &B::Device,
    target: &B::Target,
) -> RenderResult<Option<B::Encoder>> {
    let mut operation = job.operation.lock();
    if job.disposed.load(Ordering::Acquire) || operation.is_disposed() {
        return Ok(None);
    }
    operation.draw(info, &mut encoder, device, target)?;
    Ok(Some(encoder))
}

fn render_loop<B: GraphicsBackend>(shared: Arc<Shared<B>>, events: Receiver<SurfaceEvent>) {
    log::info!("Render thread started");
    while !shared.stopping.load(Ordering::Acquire) {
        if let Err(panic) = run_guarded(|| shared.render_frame(&events)) {
            shared.record(RenderError::BackendError(format!("frame panicked: {}", panic.message())));
        }
        let idle = shared.config.idle_sleep();
        if !idle.is_zero() {
            thread::sleep(idle);
        }
    }
    shared.frame_done.notify_all();
    log::info!("Render thread stopped after {} frames", shared.stats.lock().frames);
}

/// Registry of draw operations bound to one surface and one render thread
pub struct RenderRegistry<B: GraphicsBackend> {
    shared: Arc<Shared<B>>,
    events: Sender<SurfaceEvent>,
    thread: Option<JoinHandle<()>>,
}

impl<B: GraphicsBackend> RenderRegistry<B> {
    /// Take ownership of `backend` and start the render thread
    pub fn new(backend: B, ctx: &RuntimeContext) -> RenderResult<Self> {
        let config = ctx.config().render.clone();
        let (events, receiver) = unbounded();
        let size = backend.surface_size();

        let shared = Arc::new(Shared {
            state: Mutex::new(FrameState {
                backend,
                entries: HandleMap::with_key(),
                next_sequence: 0,
                released: false,
            }),
            stopping: AtomicBool::new(false),
            filters: RwLock::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            stats: Mutex::new(Stats {
                timer: Timer::new(ctx.now(), config.fps_smoothing),
                frames: 0,
            }),
            frame_done: Condvar::new(),
            live: AtomicUsize::new(0),
            config,
            pool: Arc::clone(ctx.pool()),
            clock: Arc::clone(ctx.clock()),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("canopy-render".to_string())
            .spawn(move || render_loop(thread_shared, receiver))
            .map_err(|err| RenderError::ThreadSpawn(err.to_string()))?;

        log::info!("Render registry started on a {}x{} surface", size.width, size.height);
        Ok(Self {
            shared,
            events,
            thread: Some(thread),
        })
    }

    /// Add a filter consulted by every later registration
    ///
    /// Filters run with the frame lock held and must not call back into the
    /// registry.
    pub fn add_filter(&self, filter: impl RegistrationFilter<B> + 'static) {
        self.shared.filters.write().push(Arc::new(filter));
    }

    /// Register `operation` on behalf of `owner`
    ///
    /// Resources are allocated for the current surface size before this
    /// returns. On rejection the operation's resources are released and the
    /// operation is dropped.
    pub fn add_drawable<O, D>(&self, owner: O, operation: D) -> RenderResult<DrawHandle>
    where
        O: DrawableOwner,
        D: DrawOperation<B>,
    {
        self.register(Arc::new(owner), move |_, _| Ok(Box::new(operation)))
    }

    /// Build an operation with the backend's device and register it
    pub fn add_drawable_with<O, D, F>(&self, owner: O, factory: F) -> RenderResult<DrawHandle>
    where
        O: DrawableOwner,
        D: DrawOperation<B>,
        F: FnOnce(&B::Device, SurfaceSize) -> RenderResult<D>,
    {
        self.register(Arc::new(owner), move |device, size| {
            factory(device, size).map(|operation| Box::new(operation) as Box<dyn DrawOperation<B>>)
        })
    }

    fn register<F>(&self, owner: Arc<dyn DrawableOwner>, build: F) -> RenderResult<DrawHandle>
    where
        F: FnOnce(&B::Device, SurfaceSize) -> RenderResult<Box<dyn DrawOperation<B>>>,
    {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(RenderError::ShutDown);
        }
        let filters = self.shared.filters.read().clone();
        let timeout = self.shared.config.frame_lock_timeout();
        let mut state = self
            .shared
            .state
            .try_lock_for(timeout)
            .ok_or(RenderError::FrameLockTimeout(timeout))?;
        if state.released {
            return Err(RenderError::ShutDown);
        }

        let device = state.backend.device().clone();
        let size = state.backend.surface_size();
        let mut operation = build(&device, size)?;
        let name = operation.name().to_string();

        for filter in &filters {
            if let Err(reason) = filter.accept(operation.as_ref()) {
                operation.release_resources();
                log::debug!("Registration of '{name}' rejected: {reason}");
                return Err(RenderError::Rejected { operation: name, reason });
            }
        }
        if operation.is_disposed() {
            operation.release_resources();
            return Err(RenderError::AlreadyDisposed(name));
        }

        let created = operation
            .create_resources(&device, size)
            .and_then(|()| operation.create_surface_sized_resources(&device, size));
        if let Err(err) = created {
            operation.release_resources();
            return Err(err);
        }
        if operation.is_disposed() {
            operation.release_resources();
            return Err(RenderError::AlreadyDisposed(name));
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let disposed = Arc::new(AtomicBool::new(false));
        let id = state.entries.insert(Entry {
            sequence,
            name,
            owner,
            operation: Arc::new(Mutex::new(operation)),
            disposed: Arc::clone(&disposed),
        });
        self.shared.live.store(state.entries.len(), Ordering::Release);
        Ok(DrawHandle { id, disposed })
    }

    /// Forward a windowing event to the render thread
    pub fn notify(&self, event: SurfaceEvent) -> RenderResult<()> {
        self.events.send(event).map_err(|_| RenderError::ShutDown)
    }

    /// Whether the render loop is still running
    pub fn is_running(&self) -> bool {
        !self.shared.stopping.load(Ordering::Acquire)
    }

    /// Smoothed frames per second
    pub fn fps(&self) -> f32 {
        self.shared.stats.lock().timer.fps()
    }

    /// Frames presented so far
    pub fn frames_rendered(&self) -> u64 {
        self.shared.stats.lock().frames
    }

    /// Registered operations not yet pruned
    pub fn live_operations(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Counter snapshot
    pub fn stats(&self) -> RegistryStats {
        let (fps, frames_rendered) = {
            let stats = self.shared.stats.lock();
            (stats.timer.fps(), stats.frames)
        };
        RegistryStats {
            fps,
            frames_rendered,
            live_operations: self.live_operations(),
            pending_errors: self.shared.errors.lock().len(),
        }
    }

    /// Block until `frames` more frames are presented; `false` on timeout or stop
    pub fn wait_for_frames(&self, frames: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stats = self.shared.stats.lock();
        let target = stats.frames + frames;
        while stats.frames < target {
            if !self.is_running() {
                return false;
            }
            if self.shared.frame_done.wait_until(&mut stats, deadline).timed_out() {
                return stats.frames >= target;
            }
        }
        true
    }

    /// Collect the errors recorded on the render thread
    pub fn take_errors(&self) -> Vec<RenderError> {
        std::mem::take(&mut *self.shared.errors.lock())
    }

    /// Wait until no frame is in flight, then report recorded errors
    pub fn wait_idle(&self) -> RenderResult<()> {
        let timeout = self.shared.config.frame_lock_timeout();
        drop(
            self.shared
                .state
                .try_lock_for(timeout)
                .ok_or(RenderError::FrameLockTimeout(timeout))?,
        );
        let errors = self.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RenderError::Recorded(errors))
        }
    }

    /// Run `f` against the backend with the frame lock held
    pub fn with_backend<R>(&self, f: impl FnOnce(&B) -> R) -> RenderResult<R> {
        let timeout = self.shared.config.frame_lock_timeout();
        let state = self
            .shared
            .state
            .try_lock_for(timeout)
            .ok_or(RenderError::FrameLockTimeout(timeout))?;
        Ok(f(&state.backend))
    }

    /// Stop the render thread and release every resource
    ///
    /// Returns the errors recorded on the render thread that nobody collected.
    pub fn shutdown(mut self) -> RenderResult<()> {
        self.stop();
        let errors = self.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RenderError::Recorded(errors))
        }
    }

    fn stop(&mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                self.shared
                    .record(RenderError::BackendError("render thread panicked".to_string()));
            }
        }

        let mut state = self.shared.state.lock();
        if !state.released {
            state.release_all();
            self.shared.live.store(0, Ordering::Release);
            log::info!("Render registry released");
        }
        drop(state);
        self.shared.frame_done.notify_all();
    }
}

impl<B: GraphicsBackend> fmt::Debug for RenderRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRegistry")
            .field("running", &self.is_running())
            .field("live_operations", &self.live_operations())
            .finish_non_exhaustive()
    }
}

impl<B: GraphicsBackend> Drop for RenderRegistry<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
