//! Node types: attachment state, update classification, skip windows, and the
//! `Updatable` capability.

use crate::foundation::collections::{NodeId, SceneId};
use crate::scene::filter::AttachmentFilter;
use crate::scene::tree::SceneTree;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error type returned by user update hooks
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Attachment state machine
///
/// `Unattached -> Attaching -> Attached -> Detaching -> Unattached`. The
/// transient states are only observable by filters consulted mid-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachState {
    /// No parent
    Unattached,
    /// Filters are being consulted for a pending attach
    Attaching,
    /// Parent slot occupied
    Attached,
    /// Being removed from its parent
    Detaching,
}

/// The single parent slot of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentRef {
    /// Child of another node
    Node(NodeId),
    /// Directly rooted in a scene
    Scene(SceneId),
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(node) => write!(f, "node {node:?}"),
            Self::Scene(scene) => write!(f, "scene {scene:?}"),
        }
    }
}

/// Whether a node's update may overlap its batch siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Tendency {
    /// Awaited one at a time, in order
    #[default]
    Sequential,
    /// Dispatched together with the other concurrent nodes of its batch
    Concurrent,
}

/// Update batch ordinal plus tendency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UpdateClass {
    /// Batch ordinal; batches run in ascending order
    pub batch: u8,
    /// Concurrency classification within the batch
    pub tendency: Tendency,
}

impl UpdateClass {
    /// Sequential node in the given batch
    pub const fn sequential(batch: u8) -> Self {
        Self {
            batch,
            tendency: Tendency::Sequential,
        }
    }

    /// Concurrent node in the given batch
    pub const fn concurrent(batch: u8) -> Self {
        Self {
            batch,
            tendency: Tendency::Concurrent,
        }
    }
}

/// Bounded window during which a node (and its subtree) is not updated
///
/// `None` is the "no skip" state and is distinct from every countdown value:
/// a countdown only ever shrinks toward `None`, so no sequence of frames can
/// leave a node skipped forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipWindow {
    /// Update normally
    #[default]
    None,
    /// Skip this many more frames
    Frames(NonZeroU32),
    /// Skip until this much more scene time has passed
    For(Duration),
}

impl SkipWindow {
    /// Window covering the next `frames` frames
    pub fn frames(frames: u32) -> Self {
        NonZeroU32::new(frames).map_or(Self::None, Self::Frames)
    }

    /// Window covering the next `duration` of scene time
    pub const fn duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::None
        } else {
            Self::For(duration)
        }
    }

    /// Whether the window is active
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Consume one frame of the window; returns whether this frame is skipped
    pub fn advance(&mut self, delta: Duration) -> bool {
        match *self {
            Self::None => false,
            Self::Frames(remaining) => {
                *self = Self::frames(remaining.get() - 1);
                true
            }
            Self::For(remaining) => {
                *self = Self::duration(remaining.saturating_sub(delta));
                true
            }
        }
    }
}

/// Per-frame state handed to update hooks
pub struct UpdateContext<'a> {
    pub(crate) tree: &'a SceneTree,
    pub(crate) node: NodeId,
    pub(crate) scene: SceneId,
    pub(crate) delta: Duration,
    pub(crate) elapsed: Duration,
    pub(crate) frame: u64,
}

impl UpdateContext<'_> {
    /// Tree the node lives in; mutations made here apply from the next frame
    pub const fn tree(&self) -> &SceneTree {
        self.tree
    }

    /// Node being updated (the owner, for component hooks)
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Scene driving the frame
    pub const fn scene(&self) -> SceneId {
        self.scene
    }

    /// Time since the previous frame
    pub const fn delta(&self) -> Duration {
        self.delta
    }

    /// Scene time including this frame
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Frame index, starting at 1
    pub const fn frame(&self) -> u64 {
        self.frame
    }
}

/// Node capability: a per-frame update hook
pub trait Updatable: Send {
    /// Update the node
    ///
    /// Return `Ok(true)` to continue into the node's components and children,
    /// `Ok(false)` to stop propagation for this frame.
    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<bool, HookError>;
}

/// [`Updatable`] backed by a closure, see [`update_fn`]
pub struct UpdateFn<F>(F);

impl<F> Updatable for UpdateFn<F>
where
    F: FnMut(&UpdateContext<'_>) -> Result<bool, HookError> + Send,
{
    fn update(&mut self, ctx: &UpdateContext<'_>) -> Result<bool, HookError> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as an update hook
pub const fn update_fn<F>(hook: F) -> UpdateFn<F>
where
    F: FnMut(&UpdateContext<'_>) -> Result<bool, HookError> + Send,
{
    UpdateFn(hook)
}

pub(crate) type SharedBehavior = Arc<Mutex<Box<dyn Updatable>>>;

/// Shared "should this node be drawn" flag
///
/// Written by the update scheduler every frame (true when the node is
/// scene-rooted and it and all its ancestors are ready) and cleared as soon as
/// the node leaves its scene or becomes not ready. Handed to the render
/// registry as the owner of the node's draw operations.
#[derive(Debug, Clone, Default)]
pub struct DrawGate {
    open: Arc<AtomicBool>,
}

impl DrawGate {
    /// Create a closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the owning node should be drawn this frame
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

/// Options for [`SceneTree::create_node`]
#[derive(Default)]
pub struct NodeOptions {
    pub(crate) name: Option<String>,
    pub(crate) behavior: Option<Box<dyn Updatable>>,
    pub(crate) filter: Option<Arc<dyn AttachmentFilter>>,
    pub(crate) class: UpdateClass,
    pub(crate) not_ready: bool,
}

impl NodeOptions {
    /// Plain grouping node with no update hook
    pub fn new() -> Self {
        Self::default()
    }

    /// Debug name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Update hook
    pub fn with_behavior(mut self, behavior: impl Updatable + 'static) -> Self {
        self.behavior = Some(Box::new(behavior));
        self
    }

    /// Attachment filter
    pub fn with_filter(mut self, filter: impl AttachmentFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Batch and tendency
    pub fn with_class(mut self, class: UpdateClass) -> Self {
        self.class = class;
        self
    }

    /// Start with the readiness flag cleared
    pub fn not_ready(mut self) -> Self {
        self.not_ready = true;
        self
    }
}

impl fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOptions")
            .field("name", &self.name)
            .field("has_behavior", &self.behavior.is_some())
            .field("has_filter", &self.filter.is_some())
            .field("class", &self.class)
            .field("not_ready", &self.not_ready)
            .finish()
    }
}
