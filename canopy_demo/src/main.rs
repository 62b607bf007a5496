//! Fleet demo application
//!
//! Drives a scene of drifting ships through the engine's frame loop: ships
//! update in batches, draw through a headless render registry on its own
//! thread, and the time wheel logs progress along the way.

use canopy_engine::prelude::*;
use canopy_engine::render::{CommandList, HeadlessDevice, HeadlessTarget, RenderResult};
use canopy_engine::scene::HookError;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;

const SHIP_COUNT: usize = 24;
const FRAME_LIMIT: u64 = 300;
const FRAME_BUDGET: Duration = Duration::from_millis(16);

#[derive(Error, Debug)]
enum DemoError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

impl From<DemoError> for AppError {
    fn from(err: DemoError) -> Self {
        match err {
            DemoError::Engine(err) => Self::Engine(err),
            DemoError::Render(err) => Self::Engine(err.into()),
        }
    }
}

/// Moves its owner along a fixed velocity
struct Drift {
    position: Vec2,
    velocity: Vec2,
}

impl FunctionalComponent for Drift {
    fn name(&self) -> &str {
        "drift"
    }

    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<(), HookError> {
        self.position += self.velocity * ctx.delta().as_secs_f32();
        log::trace!("Ship {:?} at ({:.2}, {:.2})", ctx.node(), self.position.x, self.position.y);
        Ok(())
    }
}

/// Draws one ship marker
struct ShipMarker {
    label: String,
    device: Option<HeadlessDevice>,
}

impl DrawOperation<HeadlessBackend> for ShipMarker {
    fn name(&self) -> &str {
        &self.label
    }

    fn create_resources(&mut self, device: &HeadlessDevice, _size: SurfaceSize) -> RenderResult<()> {
        device.allocate();
        self.device = Some(device.clone());
        Ok(())
    }

    fn draw(
        &mut self,
        frame: &FrameInfo,
        encoder: &mut CommandList,
        _device: &HeadlessDevice,
        _target: &HeadlessTarget,
    ) -> RenderResult<()> {
        encoder.record(format!("{} @ frame {}", self.label, frame.frame));
        Ok(())
    }

    fn release_resources(&mut self) {
        if let Some(device) = self.device.take() {
            device.free();
        }
    }
}

struct FleetDemo {
    registry: Option<RenderRegistry<HeadlessBackend>>,
    handles: Vec<DrawHandle>,
    heartbeat: Option<RecurrentHandle>,
    failed_frames: usize,
}

impl FleetDemo {
    fn new() -> Self {
        Self {
            registry: None,
            handles: Vec::new(),
            heartbeat: None,
            failed_frames: 0,
        }
    }

    fn spawn_fleet(&mut self, engine: &mut Engine, scene: SceneId) -> Result<(), DemoError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| EngineError::ApplicationError("render registry missing".to_string()))?;
        let batches = engine.tree().batch_count();

        for index in 0..SHIP_COUNT {
            let (class, velocity, priority) = engine.context().with_rng(|rng| {
                let batch = rng.gen_range(0..batches);
                let class = if rng.gen_bool(0.5) {
                    UpdateClass::concurrent(batch)
                } else {
                    UpdateClass::sequential(batch)
                };
                let velocity = Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
                (class, velocity, rng.gen_range(-4..4))
            });

            // Every tenth ship refuses the hundredth frame to exercise error recovery.
            let flaky = index % 10 == 9;
            let behavior = update_fn(move |ctx| {
                if flaky && ctx.frame() % 100 == 0 {
                    return Err(format!("ship {index} lost contact").into());
                }
                Ok(true)
            });

            let tree = engine.tree();
            let ship = tree.create_node(
                NodeOptions::new()
                    .named(format!("ship-{index}"))
                    .with_class(class)
                    .with_behavior(behavior),
            );
            tree.install_component(
                ship,
                Drift {
                    position: Vec2::zeros(),
                    velocity,
                },
            )
            .map_err(EngineError::from)?;
            tree.attach_to_scene(ship, scene).map_err(EngineError::from)?;

            let gate = tree.draw_gate(ship).map_err(EngineError::from)?;
            let marker = ShipMarker {
                label: format!("ship-{index}"),
                device: None,
            };
            self.handles.push(registry.add_drawable(GatedOwner::new(gate, priority), marker)?);
        }

        log::info!("Spawned {SHIP_COUNT} ships across {batches} update batches");
        Ok(())
    }
}

impl Application for FleetDemo {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        log::info!("Initializing fleet demo...");

        let backend = HeadlessBackend::new(SurfaceSize::new(800, 600));
        self.registry = Some(RenderRegistry::new(backend, engine.context()).map_err(DemoError::from)?);

        let scene = engine.create_scene(SceneOptions::new().named("fleet"));
        self.spawn_fleet(engine, scene)?;

        let wheel = engine.time_wheel();
        wheel.defer(Duration::from_millis(500), |waited| {
            log::info!("Fleet settled after {waited:?}");
        });
        wheel.repeat_for(Trigger::Frames(30), |delta| {
            log::debug!("Warm-up tick ({delta:?})");
        });
        let stats_source = engine.tree().clone();
        self.heartbeat = Some(wheel.repeat_every(Duration::from_secs(1), move |_| {
            log::info!("Heartbeat: {} nodes alive", stats_source.node_count());
        }));

        Ok(())
    }

    fn update(&mut self, engine: &mut Engine, delta: Duration) -> Result<(), AppError> {
        if engine.frame_count() >= FRAME_LIMIT {
            engine.quit();
        }

        // Retire one ship every fifty frames; its marker is pruned on the next render frame.
        if engine.frame_count() % 50 == 0 {
            if let Some(handle) = self.handles.pop() {
                log::debug!("Retiring drawable {:?}", handle.id());
                handle.dispose();
            }
        }

        std::thread::sleep(FRAME_BUDGET.saturating_sub(delta));
        Ok(())
    }

    fn on_frame_error(&mut self, _engine: &mut Engine, error: &EngineError) -> FrameDecision {
        self.failed_frames += 1;
        log::warn!("Recovering from failed frame: {error}");
        FrameDecision::Continue
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        log::info!("Cleaning up fleet demo...");

        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.dispose();
        }
        self.handles.clear();

        if let Some(registry) = self.registry.take() {
            let stats = registry.stats();
            log::info!(
                "Render thread: {} frames at {:.1} fps, {} live operations",
                stats.frames_rendered,
                stats.fps,
                stats.live_operations
            );
            if let Err(e) = registry.shutdown() {
                log::error!("Render registry shutdown reported: {e}");
            }
        }

        log::info!(
            "Frame loop: {} frames at {:.1} fps, {} failed frames",
            engine.frame_count(),
            engine.fps(),
            self.failed_frames
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up panic hook for better error reporting
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC occurred: {panic_info}");

        if let Some(location) = panic_info.location() {
            eprintln!("Panic location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let config = RuntimeConfig::load_from_file("canopy.toml").unwrap_or_else(|e| {
        eprintln!("Using default configuration ({e})");
        RuntimeConfig::default()
    });

    // Initialize logging; RUST_LOG overrides the configured level
    canopy_engine::foundation::logging::init(&config.logging.level);

    log::info!("Starting Canopy fleet demo");

    let mut app = FleetDemo::new();
    match Engine::run(config, &mut app) {
        Ok(()) => {
            log::info!("Fleet demo finished successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Application error: {e}");
            Err(e.into())
        }
    }
}
