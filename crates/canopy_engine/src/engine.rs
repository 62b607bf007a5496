//! Core engine implementation

use crate::application::{AppError, Application, FrameDecision};
use crate::config::ConfigError;
use crate::core::{RuntimeConfig, RuntimeContext};
use crate::foundation::collections::SceneId;
use crate::foundation::time::Timer;
use crate::render::RenderError;
use crate::scene::{FrameError, FrameReport, Scene, SceneOptions, SceneTree, TreeError};
use crate::time_wheel::{TickSummary, TimeWheel, TimeWheelError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one engine frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFrame {
    /// Time wheel tick run at the start of the frame
    pub tick: TickSummary,
    /// One report per scene, in creation order
    pub scenes: Vec<(SceneId, FrameReport)>,
}

/// Main engine struct
///
/// The engine owns the runtime context, the scene tree, the time wheel and
/// the scenes it drives, and runs the main loop.
pub struct Engine {
    ctx: Arc<RuntimeContext>,
    tree: SceneTree,
    wheel: TimeWheel,
    scenes: Vec<Scene>,

    /// Frame timing
    timer: Timer,

    /// Whether the engine should continue running
    running: bool,
}

impl Engine {
    /// Create a new engine instance
    pub fn new(config: RuntimeConfig) -> Result<Self, EngineError> {
        Ok(Self::with_context(RuntimeContext::new(config)?))
    }

    /// Create an engine around an existing context
    pub fn with_context(ctx: Arc<RuntimeContext>) -> Self {
        log::info!("Initializing engine...");
        let timer = Timer::new(ctx.now(), ctx.config().render.fps_smoothing);
        Self {
            tree: SceneTree::new(&ctx),
            wheel: TimeWheel::new(&ctx),
            scenes: Vec::new(),
            timer,
            running: true,
            ctx,
        }
    }

    /// Run the engine main loop with the given application
    pub fn run<T: Application>(config: RuntimeConfig, app: &mut T) -> Result<(), EngineError> {
        let mut engine = Self::new(config)?;
        engine.run_app(app)
    }

    /// Run the main loop on this engine until [`quit`](Self::quit) is called
    /// or a failed frame halts it
    pub fn run_app<T: Application>(&mut self, app: &mut T) -> Result<(), EngineError> {
        app.initialize(self)
            .map_err(|e| EngineError::ApplicationError(format!("App initialization: {e}")))?;

        log::info!("Starting main loop...");

        let result = loop {
            if !self.running {
                break Ok(());
            }

            self.timer.update(self.ctx.now());
            let delta = self.timer.delta_time();

            if let Err(e) = app.update(self, delta) {
                break Err(EngineError::ApplicationError(format!("App update: {e}")));
            }

            if let Err(err) = self.frame(delta) {
                match app.on_frame_error(self, &err) {
                    FrameDecision::Continue => log::warn!("Continuing after failed frame: {err}"),
                    FrameDecision::Halt => break Err(err),
                }
            }
        };

        app.cleanup(self);

        log::info!("Engine shutdown complete after {} frames", self.timer.frame_count());
        result
    }

    /// Run one frame: tick the time wheel, then advance every scene once
    ///
    /// A faulting tick or a failing scene never stops the others. Every
    /// failure of the frame is returned together in [`EngineError::Frame`]
    /// after all scenes have run.
    pub fn frame(&mut self, delta: Duration) -> Result<EngineFrame, EngineError> {
        let tick = self.wheel.tick();
        if let Err(err) = &tick {
            log::warn!("Time wheel tick failed: {err}");
        }

        let mut completed = Vec::with_capacity(self.scenes.len());
        let mut failed = Vec::new();
        for scene in &self.scenes {
            match scene.advance_frame(delta) {
                Ok(report) => completed.push((scene.id(), report)),
                Err(err) => {
                    log::warn!("Scene {:?} frame failed: {err}", scene.id());
                    failed.push((scene.id(), err));
                }
            }
        }

        match tick {
            Ok(tick) if failed.is_empty() => Ok(EngineFrame {
                tick,
                scenes: completed,
            }),
            tick => Err(EngineError::Frame {
                tick: self.wheel.tick_count(),
                wheel: tick.err(),
                scenes: failed,
                completed,
            }),
        }
    }

    /// Create a scene driven by this engine's frames
    pub fn create_scene(&mut self, options: SceneOptions) -> SceneId {
        let scene = Scene::new(&self.tree, &self.ctx, options);
        let id = scene.id();
        self.scenes.push(scene);
        id
    }

    /// Stop driving `scene` and dispose it; its roots become unattached
    pub fn remove_scene(&mut self, scene: SceneId) -> Result<(), EngineError> {
        let position = self
            .scenes
            .iter()
            .position(|candidate| candidate.id() == scene)
            .ok_or(TreeError::UnknownScene(scene))?;
        self.scenes.remove(position);
        Ok(())
    }

    /// Scene handle by id
    pub fn scene(&self, scene: SceneId) -> Option<&Scene> {
        self.scenes.iter().find(|candidate| candidate.id() == scene)
    }

    /// Scenes in creation order
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Shared runtime context
    pub const fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Scene tree shared by every scene
    pub const fn tree(&self) -> &SceneTree {
        &self.tree
    }

    /// Time wheel ticked once per frame
    pub const fn time_wheel(&self) -> &TimeWheel {
        &self.wheel
    }

    /// Request engine shutdown
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// Whether the main loop keeps going
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Get the current frame delta time
    pub const fn delta_time(&self) -> Duration {
        self.timer.delta_time()
    }

    /// Frames started by the main loop
    pub const fn frame_count(&self) -> u64 {
        self.timer.frame_count()
    }

    /// Smoothed main loop rate
    pub const fn fps(&self) -> f32 {
        self.timer.fps()
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected while building the context
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Part of a frame failed; every other part still ran
    #[error(
        "Frame {tick} failed in {} scene(s){}",
        .scenes.len(),
        .wheel.as_ref().map(|err| format!(", time wheel: {err}")).unwrap_or_default()
    )]
    Frame {
        /// Time wheel tick count after the frame
        tick: u64,
        /// Tick failure, if the wheel faulted or was busy
        wheel: Option<TimeWheelError>,
        /// Scenes whose frame failed, in creation order
        scenes: Vec<(SceneId, FrameError)>,
        /// Reports of the scenes that advanced cleanly
        completed: Vec<(SceneId, FrameReport)>,
    },

    /// Tree protocol error
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Rendering error
    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    /// Application error
    #[error("Application error: {0}")]
    ApplicationError(String),
}

impl From<AppError> for EngineError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Engine(inner) => inner,
            other => Self::ApplicationError(other.to_string()),
        }
    }
}
