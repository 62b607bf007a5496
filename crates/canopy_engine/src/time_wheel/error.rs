//! Time wheel errors

use crate::foundation::collections::CallId;
use std::fmt;
use thiserror::Error;

/// Which list a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Scheduled with `defer`
    OneShot,
    /// Scheduled with `repeat_for`
    RepeatFor,
    /// Scheduled with `repeat_every`
    Recurrent,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OneShot => "one-shot",
            Self::RepeatFor => "repeat-for",
            Self::Recurrent => "recurrent",
        };
        f.write_str(name)
    }
}

/// Something that went wrong while a tick scanned its lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackFault {
    /// A callback panicked; its record was removed
    Panicked {
        /// Record handle
        call: CallId,
        /// List the record was in
        kind: RecordKind,
        /// Panic message
        message: String,
    },
    /// A recurrent handle was dropped without being disposed
    LeakedHandle {
        /// Record handle
        call: CallId,
    },
    /// A whole list scan panicked outside any callback
    ScanPanicked {
        /// List being scanned
        kind: RecordKind,
        /// Panic message
        message: String,
    },
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panicked { call, kind, message } => write!(f, "{kind} callback {call:?} panicked: {message}"),
            Self::LeakedHandle { call } => {
                write!(f, "recurrent callback {call:?} lost its handle without being disposed")
            }
            Self::ScanPanicked { kind, message } => write!(f, "{kind} scan panicked: {message}"),
        }
    }
}

/// Errors returned by [`TimeWheel::tick`](crate::time_wheel::TimeWheel::tick)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeWheelError {
    /// Another tick is running (possibly the caller's own, from a callback)
    #[error("A tick is already in progress")]
    TickInProgress,

    /// The tick completed but some callbacks misbehaved
    #[error("Tick {tick}: {} callback fault(s)", faults.len())]
    Faults {
        /// Tick index
        tick: u64,
        /// Every fault of the tick
        faults: Vec<CallbackFault>,
    },
}
