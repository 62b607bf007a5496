//! Render registry errors

use std::time::Duration;
use thiserror::Error;

/// Result type for render registry operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors raised by the render registry, its backend, and draw operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A registration filter vetoed the operation
    ///
    /// The operation has already been released when this is returned, so no
    /// partially registered resource remains.
    #[error("Draw operation '{operation}' rejected: {reason}")]
    Rejected {
        /// Name the operation reported
        operation: String,
        /// Reason given by the filter
        reason: String,
    },

    /// The operation reported itself disposed before registration completed
    #[error("Draw operation '{0}' was disposed before registration completed")]
    AlreadyDisposed(String),

    /// The frame lock could not be acquired within the configured wait
    ///
    /// A frame held the lock for longer than the timeout. The caller may
    /// retry; nothing was changed.
    #[error("Frame lock not acquired within {0:?}")]
    FrameLockTimeout(Duration),

    /// Resource creation failed
    ///
    /// Raised by operations while allocating their backend resources at
    /// registration or after a resize.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A draw step failed during a frame
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// A draw step panicked; the frame still completed without it
    #[error("Draw operation panicked: {0}")]
    DrawPanicked(String),

    /// Backend-specific error (frame acquisition, presentation, resize)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// The render thread could not be started
    #[error("Failed to start render thread: {0}")]
    ThreadSpawn(String),

    /// The registry is stopping or has released its backend
    #[error("Render registry is shut down")]
    ShutDown,

    /// Errors recorded on the render thread since they were last collected
    #[error("{} render thread error(s), first: {}", .0.len(), .0.first().map_or(String::new(), ToString::to_string))]
    Recorded(Vec<RenderError>),
}
