//! Scene graph and frame update scheduling
//!
//! Nodes form trees rooted in scenes. Each frame a [`Scene`] walks its roots
//! in update batches and propagates updates down through components and
//! children.

pub mod batch;
pub mod component;
pub mod error;
pub mod filter;
pub mod node;
pub mod scene_handle;
pub mod scheduler;
pub mod tree;

pub use batch::{BatchGroup, UpdateBatchTable};
pub use component::FunctionalComponent;
pub use error::{TreeEntity, TreeError};
pub use filter::{AttachmentFilter, DenyComponents, Leaf, SceneRootOnly};
pub use node::{
    update_fn, AttachState, DrawGate, HookError, NodeOptions, ParentRef, SkipWindow, Tendency, Updatable,
    UpdateClass, UpdateContext, UpdateFn,
};
pub use scene_handle::Scene;
pub use scheduler::{FrameError, FrameReport, NodeFailure};
pub use tree::{SceneOptions, SceneTree, TreeEvent};
