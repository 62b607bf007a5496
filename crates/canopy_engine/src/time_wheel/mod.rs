//! Time wheel: deferred, time-boxed and recurrent callbacks
//!
//! Driven by one external [`TimeWheel::tick`] per logical frame. Records are
//! triggered either by clock time or by tick count.

pub mod error;
pub mod handle;
pub mod record;
pub mod wheel;

pub use error::{CallbackFault, RecordKind, TimeWheelError};
pub use handle::RecurrentHandle;
pub use record::Trigger;
pub use wheel::{PendingCalls, TickSummary, TimeWheel};
