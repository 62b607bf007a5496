//! # Canopy Engine
//!
//! The runtime core of a real-time engine: a scene graph with an attach
//! protocol, a batched frame update scheduler, a render registry drawing on
//! its own thread, and a time wheel for deferred and recurrent callbacks.
//!
//! ## Features
//!
//! - **Scene Graph**: Nodes attach to nodes or scenes through validated,
//!   filterable operations with observable events
//! - **Update Scheduler**: Per-frame updates ordered by batch, with
//!   sequential and concurrent tendencies and aggregated failures
//! - **Render Registry**: Priority-ordered draw operations on a background
//!   render thread, pruned lazily once disposed
//! - **Time Wheel**: `defer`, `repeat_for` and `repeat_every` callbacks driven
//!   by one tick per frame
//! - **Headless Backend**: Run and test the render path without a GPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use canopy_engine::prelude::*;
//! use std::time::Duration;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         let scene = engine.create_scene(SceneOptions::new().named("main"));
//!         let node = engine.tree().create_node(NodeOptions::new().named("player"));
//!         engine.tree().attach_to_scene(node, scene).map_err(EngineError::from)?;
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, engine: &mut Engine, _delta: Duration) -> Result<(), AppError> {
//!         if engine.frame_count() >= 600 {
//!             engine.quit();
//!         }
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, _engine: &mut Engine) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RuntimeConfig::default();
//!     let mut app = MyApp;
//!     Engine::run(config, &mut app)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Core runtime modules
pub mod config;
pub mod core;
pub mod events;
pub mod foundation;

// Subsystems
pub mod render;
pub mod scene;
pub mod time_wheel;

mod application;
mod engine;

pub use application::{AppError, Application, FrameDecision};
pub use engine::{Engine, EngineError, EngineFrame};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::Config,
        core::{RuntimeConfig, RuntimeContext},
        events::Observers,
        foundation::{
            collections::{CallId, ComponentId, DrawOperationId, NodeId, SceneId},
            math::{SurfaceSize, Vec2},
            time::{Clock, ManualClock, SystemClock},
        },
        render::{
            Contribution, DrawHandle, DrawOperation, FrameInfo, GatedOwner, GraphicsBackend, HeadlessBackend,
            RenderError, RenderRegistry, StaticOwner, SurfaceEvent,
        },
        scene::{
            update_fn, DrawGate, FrameError, FrameReport, FunctionalComponent, NodeOptions, ParentRef, Scene,
            SceneOptions, SceneTree, TreeError, TreeEvent, UpdateClass, UpdateContext,
        },
        time_wheel::{RecurrentHandle, TimeWheel, TimeWheelError, Trigger},
        AppError, Application, Engine, EngineError, EngineFrame, FrameDecision,
    };
}
