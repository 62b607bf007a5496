//! Application trait and lifecycle management

use crate::engine::{Engine, EngineError};
use std::time::Duration;
use thiserror::Error;

/// What the frame loop does after a frame failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    /// Log the error and run the next frame
    Continue,
    /// Leave the loop and return the error from [`Engine::run`]
    Halt,
}

/// Application lifecycle trait
///
/// Implement this trait to drive scenes and callbacks with the engine's
/// frame loop.
pub trait Application {
    /// Initialize the application
    ///
    /// Called once before the first frame. Create scenes, nodes, drawables
    /// and scheduled callbacks here.
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError>;

    /// Update the application
    ///
    /// Called every frame before the time wheel ticks and the scenes
    /// advance.
    ///
    /// # Arguments
    /// * `engine` - Mutable reference to the engine
    /// * `delta` - Time since the last frame
    fn update(&mut self, engine: &mut Engine, delta: Duration) -> Result<(), AppError>;

    /// Decide whether a failed frame stops the loop
    ///
    /// The default halts on every error.
    fn on_frame_error(&mut self, _engine: &mut Engine, error: &EngineError) -> FrameDecision {
        log::error!("Frame failed: {error}");
        FrameDecision::Halt
    }

    /// Cleanup the application
    ///
    /// Called when the loop ends, whether it was asked to quit or halted on
    /// an error.
    fn cleanup(&mut self, engine: &mut Engine);
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Engine error propagated to application level
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}
