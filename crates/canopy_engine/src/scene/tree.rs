//! Scene tree
//!
//! Nodes, scenes and components live in one arena behind a single
//! reader-writer lock. Every mutation validates first and only then writes, so
//! an error never leaves the tree half-changed. Observers are notified after
//! the lock is released, in registration order, which lets them query or
//! mutate the tree from inside the callback.
//!
//! Lock order is behavior, then tree: update hooks run with their own mutex
//! held and may call back into the tree, while tree operations never lock a
//! behavior or component.

use crate::core::RuntimeContext;
use crate::events::Observers;
use crate::foundation::collections::{ComponentId, HandleMap, NodeId, SceneId, SubscriptionId};
use crate::scene::batch::UpdateBatchTable;
use crate::scene::component::{ComponentSlot, FunctionalComponent};
use crate::scene::error::{TreeEntity, TreeError};
use crate::scene::filter::AttachmentFilter;
use crate::scene::node::{
    AttachState, DrawGate, NodeOptions, ParentRef, SharedBehavior, SkipWindow, UpdateClass,
};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Notification describing a change that has already happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// `node` now occupies slot `index` under `parent`
    Attached {
        /// Attached node
        node: NodeId,
        /// New parent
        parent: ParentRef,
        /// Position among the parent's children
        index: usize,
    },
    /// `node` left `parent`; its subtree came with it
    Detached {
        /// Detached node
        node: NodeId,
        /// Former parent
        parent: ParentRef,
    },
    /// The scene `node` resolves to changed
    SceneChanged {
        /// Affected node
        node: NodeId,
        /// New root scene, `None` once cut off from any scene
        scene: Option<SceneId>,
    },
    /// Readiness flag flipped
    ReadinessChanged {
        /// Affected node
        node: NodeId,
        /// New value
        ready: bool,
    },
    /// Component installed on `node`
    ComponentInstalled {
        /// Owner
        node: NodeId,
        /// New component
        component: ComponentId,
    },
    /// Component removed from `node`
    ComponentUninstalled {
        /// Former owner
        node: NodeId,
        /// Removed component
        component: ComponentId,
    },
    /// Node released; its handle no longer resolves
    Disposed(NodeId),
    /// Scene released; its former roots are unattached
    SceneDisposed(SceneId),
}

/// Options for [`SceneTree::create_scene`]
#[derive(Default)]
pub struct SceneOptions {
    pub(crate) name: Option<String>,
    pub(crate) filter: Option<Arc<dyn AttachmentFilter>>,
}

impl SceneOptions {
    /// Unnamed scene accepting every root
    pub fn new() -> Self {
        Self::default()
    }

    /// Debug name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Filter consulted when a node is attached as a root
    pub fn with_filter(mut self, filter: impl AttachmentFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for SceneOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneOptions")
            .field("name", &self.name)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

pub(crate) struct NodeEntry {
    pub(crate) name: Option<String>,
    pub(crate) state: AttachState,
    pub(crate) parent: Option<ParentRef>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) index: usize,
    pub(crate) components: Vec<ComponentSlot>,
    pub(crate) ready: bool,
    pub(crate) class: UpdateClass,
    pub(crate) skip: SkipWindow,
    pub(crate) behavior: Option<SharedBehavior>,
    pub(crate) filter: Option<Arc<dyn AttachmentFilter>>,
    pub(crate) gate: DrawGate,
}

pub(crate) struct SceneEntry {
    pub(crate) name: Option<String>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) batches: UpdateBatchTable,
    pub(crate) filter: Option<Arc<dyn AttachmentFilter>>,
}

/// Values removed from the arena, dropped once the lock is released
#[derive(Default)]
struct Released {
    nodes: Vec<NodeEntry>,
    components: Vec<ComponentSlot>,
}

pub(crate) struct Arena {
    pub(crate) nodes: HandleMap<NodeId, NodeEntry>,
    pub(crate) scenes: HandleMap<SceneId, SceneEntry>,
    pub(crate) components: HandleMap<ComponentId, NodeId>,
}

impl Arena {
    fn new() -> Self {
        Self {
            nodes: HandleMap::with_key(),
            scenes: HandleMap::with_key(),
            components: HandleMap::with_key(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&NodeEntry, TreeError> {
        self.nodes.get(id).ok_or(TreeError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry, TreeError> {
        self.nodes.get_mut(id).ok_or(TreeError::UnknownNode(id))
    }

    fn scene(&self, id: SceneId) -> Result<&SceneEntry, TreeError> {
        self.scenes.get(id).ok_or(TreeError::UnknownScene(id))
    }

    fn scene_mut(&mut self, id: SceneId) -> Result<&mut SceneEntry, TreeError> {
        self.scenes.get_mut(id).ok_or(TreeError::UnknownScene(id))
    }

    fn filter_of(&self, parent: ParentRef) -> Result<Option<Arc<dyn AttachmentFilter>>, TreeError> {
        match parent {
            ParentRef::Node(node) => Ok(self.node(node)?.filter.clone()),
            ParentRef::Scene(scene) => Ok(self.scene(scene)?.filter.clone()),
        }
    }

    /// Scene reached by following parent links, computed on demand
    pub(crate) fn root_scene(&self, mut node: NodeId) -> Option<SceneId> {
        loop {
            match self.nodes.get(node)?.parent? {
                ParentRef::Scene(scene) => return Some(scene),
                ParentRef::Node(parent) => node = parent,
            }
        }
    }

    /// Whether `ancestor` is `node` or lies on its parent chain
    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(node).and_then(|entry| entry.parent) {
                Some(ParentRef::Node(parent)) => node = parent,
                _ => return false,
            }
        }
    }

    /// `root` and its descendants, pre-order
    pub(crate) fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Some(entry) = self.nodes.get(node) {
                order.push(node);
                stack.extend(entry.children.iter().rev().copied());
            }
        }
        order
    }

    pub(crate) fn close_gates(&self, root: NodeId) {
        for node in self.subtree(root) {
            if let Some(entry) = self.nodes.get(node) {
                entry.gate.set(false);
            }
        }
    }

    fn renumber(&mut self, siblings: &[NodeId]) {
        for (index, &sibling) in siblings.iter().enumerate() {
            if let Some(entry) = self.nodes.get_mut(sibling) {
                entry.index = index;
            }
        }
    }

    fn attach(&mut self, child: NodeId, parent: ParentRef, events: &mut Vec<TreeEvent>) -> Result<(), TreeError> {
        let entry = self.node(child)?;
        let child_filter = entry.filter.clone();
        let class = entry.class;
        let parent_filter = self.filter_of(parent)?;

        if let Some(existing) = entry.parent {
            return Err(TreeError::AlreadyAttached {
                node: child,
                parent: existing,
            });
        }
        if let ParentRef::Node(parent_node) = parent {
            if self.is_ancestor_or_self(child, parent_node) {
                return Err(TreeError::CyclicAttachment {
                    child,
                    parent: parent_node,
                });
            }
        }

        self.node_mut(child)?.state = AttachState::Attaching;
        let verdict = check_pairing(child, parent, child_filter.as_deref(), parent_filter.as_deref());
        if let Err(err) = verdict {
            self.node_mut(child)?.state = AttachState::Unattached;
            return Err(err);
        }

        let index = match parent {
            ParentRef::Node(parent_node) => {
                let siblings = &mut self.node_mut(parent_node)?.children;
                siblings.push(child);
                siblings.len() - 1
            }
            ParentRef::Scene(scene) => {
                let entry = self.scene_mut(scene)?;
                entry.roots.push(child);
                entry.batches.insert(child, class);
                entry.roots.len() - 1
            }
        };

        let entry = self.node_mut(child)?;
        entry.parent = Some(parent);
        entry.index = index;
        entry.state = AttachState::Attached;

        events.push(TreeEvent::Attached {
            node: child,
            parent,
            index,
        });
        if let Some(scene) = self.root_scene(child) {
            events.extend(self.subtree(child).into_iter().map(|node| TreeEvent::SceneChanged {
                node,
                scene: Some(scene),
            }));
        }
        Ok(())
    }

    fn detach(&mut self, node: NodeId, events: &mut Vec<TreeEvent>) -> Result<(), TreeError> {
        let entry = self.node(node)?;
        let parent = entry.parent.ok_or(TreeError::NotAttached(node))?;
        let class = entry.class;
        let scene = self.root_scene(node);

        self.node_mut(node)?.state = AttachState::Detaching;

        let siblings = match parent {
            ParentRef::Node(parent_node) => {
                let children = &mut self.node_mut(parent_node)?.children;
                children.retain(|&sibling| sibling != node);
                children.clone()
            }
            ParentRef::Scene(scene_id) => {
                let entry = self.scene_mut(scene_id)?;
                entry.roots.retain(|&sibling| sibling != node);
                entry.batches.remove(node, class);
                entry.roots.clone()
            }
        };
        self.renumber(&siblings);

        let entry = self.node_mut(node)?;
        entry.parent = None;
        entry.index = 0;
        entry.state = AttachState::Unattached;
        self.close_gates(node);

        events.push(TreeEvent::Detached { node, parent });
        if scene.is_some() {
            events.extend(
                self.subtree(node)
                    .into_iter()
                    .map(|node| TreeEvent::SceneChanged { node, scene: None }),
            );
        }
        Ok(())
    }

    /// Remove `node` and its descendants, children first
    fn dispose_subtree(&mut self, node: NodeId, events: &mut Vec<TreeEvent>, released: &mut Released) {
        let children = match self.nodes.get_mut(node) {
            Some(entry) => std::mem::take(&mut entry.children),
            None => return,
        };
        for child in children {
            self.dispose_subtree(child, events, released);
        }

        let Some(mut entry) = self.nodes.remove(node) else {
            return;
        };
        entry.gate.set(false);
        for slot in entry.components.drain(..) {
            self.components.remove(slot.id);
            events.push(TreeEvent::ComponentUninstalled {
                node,
                component: slot.id,
            });
            released.components.push(slot);
        }
        events.push(TreeEvent::Disposed(node));
        released.nodes.push(entry);
    }
}

fn check_pairing(
    child: NodeId,
    parent: ParentRef,
    child_filter: Option<&dyn AttachmentFilter>,
    parent_filter: Option<&dyn AttachmentFilter>,
) -> Result<(), TreeError> {
    if let Some(filter) = child_filter {
        filter
            .accept_parent(child, parent)
            .map_err(|reason| TreeError::Rejected {
                subject: TreeEntity::Node(child),
                other: parent.into(),
                reason,
            })?;
    }
    if let Some(filter) = parent_filter {
        filter
            .accept_child(parent, child)
            .map_err(|reason| TreeError::Rejected {
                subject: parent.into(),
                other: TreeEntity::Node(child),
                reason,
            })?;
    }
    Ok(())
}

struct TreeShared {
    arena: RwLock<Arena>,
    observers: Observers<TreeEvent>,
    batch_count: u8,
}

/// Cloneable handle to a node/scene tree
///
/// Clones share the same arena; handles from one tree never resolve in
/// another.
#[derive(Clone)]
pub struct SceneTree {
    shared: Arc<TreeShared>,
}

impl SceneTree {
    /// Create an empty tree using the context's batch count
    pub fn new(ctx: &RuntimeContext) -> Self {
        Self::with_batch_count(ctx.config().scheduler.batch_count)
    }

    /// Create an empty tree with `batch_count` update batches
    pub fn with_batch_count(batch_count: u8) -> Self {
        Self {
            shared: Arc::new(TreeShared {
                arena: RwLock::new(Arena::new()),
                observers: Observers::new(),
                batch_count: batch_count.max(1),
            }),
        }
    }

    /// Number of update batches nodes are clamped into
    pub fn batch_count(&self) -> u8 {
        self.shared.batch_count
    }

    pub(crate) fn arena_mut(&self) -> RwLockWriteGuard<'_, Arena> {
        self.shared.arena.write()
    }

    fn clamp(&self, class: UpdateClass) -> UpdateClass {
        UpdateClass {
            batch: class.batch.min(self.shared.batch_count - 1),
            tendency: class.tendency,
        }
    }

    fn publish(&self, events: &[TreeEvent]) {
        self.shared.observers.notify_all(events);
    }

    fn read<R>(&self, f: impl FnOnce(&Arena) -> Result<R, TreeError>) -> Result<R, TreeError> {
        f(&self.shared.arena.read())
    }

    /// Create a scene root with no nodes
    pub fn create_scene(&self, options: SceneOptions) -> SceneId {
        let id = self.shared.arena.write().scenes.insert(SceneEntry {
            name: options.name,
            roots: Vec::new(),
            batches: UpdateBatchTable::new(),
            filter: options.filter,
        });
        log::debug!("Created scene {id:?}");
        id
    }

    /// Detach every root of `scene`, then release the scene
    pub fn dispose_scene(&self, scene: SceneId) -> Result<(), TreeError> {
        let mut events = Vec::new();
        let name = {
            let mut arena = self.shared.arena.write();
            let roots = arena.scene(scene)?.roots.clone();
            for root in roots {
                arena.detach(root, &mut events)?;
            }
            arena.scenes.remove(scene).and_then(|entry| entry.name)
        };
        events.push(TreeEvent::SceneDisposed(scene));
        log::debug!("Disposed scene {scene:?} ({})", name.as_deref().unwrap_or("unnamed"));
        self.publish(&events);
        Ok(())
    }

    /// Create an unattached node
    pub fn create_node(&self, options: NodeOptions) -> NodeId {
        let class = self.clamp(options.class);
        self.shared.arena.write().nodes.insert(NodeEntry {
            name: options.name,
            state: AttachState::Unattached,
            parent: None,
            children: Vec::new(),
            index: 0,
            components: Vec::new(),
            ready: !options.not_ready,
            class,
            skip: SkipWindow::None,
            behavior: options.behavior.map(|behavior| Arc::new(Mutex::new(behavior))),
            filter: options.filter,
            gate: DrawGate::new(),
        })
    }

    /// Attach `child` as the last child of node `parent`
    pub fn attach_to_node(&self, child: NodeId, parent: NodeId) -> Result<(), TreeError> {
        self.attach(child, ParentRef::Node(parent))
    }

    /// Attach `child` as the last root of `scene`
    pub fn attach_to_scene(&self, child: NodeId, scene: SceneId) -> Result<(), TreeError> {
        self.attach(child, ParentRef::Scene(scene))
    }

    /// Attach `child` under `parent`
    ///
    /// Checks run in order: handles resolve, `child` is unattached, no cycle
    /// would form, then the child's filter and the parent's filter. Nothing
    /// changes unless every check passes.
    pub fn attach(&self, child: NodeId, parent: ParentRef) -> Result<(), TreeError> {
        let mut events = Vec::new();
        let result = self.shared.arena.write().attach(child, parent, &mut events);
        if let Err(err @ TreeError::Rejected { .. }) = &result {
            log::warn!("Attach of {child:?} to {parent} refused: {err}");
        }
        result?;
        log::debug!("Attached {child:?} to {parent}");
        self.publish(&events);
        Ok(())
    }

    /// Remove `node` from its parent, keeping its subtree intact
    pub fn detach(&self, node: NodeId) -> Result<(), TreeError> {
        let mut events = Vec::new();
        self.shared.arena.write().detach(node, &mut events)?;
        log::debug!("Detached {node:?}");
        self.publish(&events);
        Ok(())
    }

    /// Release `node` and everything below it
    ///
    /// An attached node is detached first. Children are disposed depth-first
    /// before their parent, and each node's components are uninstalled before
    /// the node itself is released.
    pub fn dispose_node(&self, node: NodeId) -> Result<(), TreeError> {
        let mut events = Vec::new();
        let mut released = Released::default();
        {
            let mut arena = self.shared.arena.write();
            if arena.node(node)?.parent.is_some() {
                arena.detach(node, &mut events)?;
            }
            arena.dispose_subtree(node, &mut events, &mut released);
        }
        log::debug!("Disposed {node:?} and its subtree");
        self.publish(&events);
        drop(released);
        Ok(())
    }

    /// Install `component` on `node`
    ///
    /// The component's own owner check runs first, then the node's filter. A
    /// rejected component is dropped. `on_installed` runs after the tree lock
    /// is released and before the component's first update.
    pub fn install_component(
        &self,
        node: NodeId,
        component: impl FunctionalComponent + 'static,
    ) -> Result<ComponentId, TreeError> {
        let boxed: Box<dyn FunctionalComponent> = Box::new(component);
        let shared = Arc::new(Mutex::new(boxed));
        // Held until `on_installed` returns so a concurrent frame cannot update it first.
        let mut installing = shared.lock();
        let id = {
            let mut arena = self.shared.arena.write();
            let filter = arena.node(node)?.filter.clone();

            installing
                .accepts_owner(node)
                .map_err(|reason| TreeError::Rejected {
                    subject: TreeEntity::Component(installing.name().to_string()),
                    other: TreeEntity::Node(node),
                    reason,
                })?;
            if let Some(filter) = filter {
                filter
                    .accept_component(node, &**installing)
                    .map_err(|reason| TreeError::Rejected {
                        subject: TreeEntity::Node(node),
                        other: TreeEntity::Component(installing.name().to_string()),
                        reason,
                    })?;
            }

            let id = arena.components.insert(node);
            let name = installing.name().to_string();
            arena.node_mut(node)?.components.push(ComponentSlot {
                id,
                name,
                component: Arc::clone(&shared),
            });
            id
        };
        installing.on_installed(node, id);
        drop(installing);
        self.publish(&[TreeEvent::ComponentInstalled { node, component: id }]);
        Ok(id)
    }

    /// Remove `component` from `node`
    ///
    /// The component is dropped once any update already running with it
    /// finishes.
    pub fn uninstall_component(&self, node: NodeId, component: ComponentId) -> Result<(), TreeError> {
        let slot = {
            let mut arena = self.shared.arena.write();
            let owner = *arena
                .components
                .get(component)
                .ok_or(TreeError::UnknownComponent(component))?;
            let entry = arena.node_mut(node)?;
            if owner != node {
                return Err(TreeError::NotOwner { node, component });
            }
            let position = entry
                .components
                .iter()
                .position(|slot| slot.id == component)
                .ok_or(TreeError::UnknownComponent(component))?;
            let slot = entry.components.remove(position);
            arena.components.remove(component);
            slot
        };
        self.publish(&[TreeEvent::ComponentUninstalled { node, component }]);
        drop(slot);
        Ok(())
    }

    /// Set the readiness flag; a not-ready node and its subtree are neither
    /// updated nor drawn
    pub fn set_ready(&self, node: NodeId, ready: bool) -> Result<(), TreeError> {
        let changed = {
            let mut arena = self.shared.arena.write();
            let entry = arena.node_mut(node)?;
            let changed = entry.ready != ready;
            entry.ready = ready;
            if !ready {
                arena.close_gates(node);
            }
            changed
        };
        if changed {
            self.publish(&[TreeEvent::ReadinessChanged { node, ready }]);
        }
        Ok(())
    }

    /// Move `node` to another batch or tendency, effective next frame
    pub fn set_update_class(&self, node: NodeId, class: UpdateClass) -> Result<(), TreeError> {
        let class = self.clamp(class);
        let mut arena = self.shared.arena.write();
        let entry = arena.node_mut(node)?;
        let previous = std::mem::replace(&mut entry.class, class);
        if let Some(ParentRef::Scene(scene)) = entry.parent {
            arena.scene_mut(scene)?.batches.reclassify(node, previous, class);
        }
        Ok(())
    }

    /// Skip updating `node` and its subtree for the next `frames` frames
    pub fn skip_frames(&self, node: NodeId, frames: u32) -> Result<(), TreeError> {
        self.set_skip(node, SkipWindow::frames(frames))
    }

    /// Skip updating `node` and its subtree for the next `duration` of scene time
    pub fn skip_for(&self, node: NodeId, duration: Duration) -> Result<(), TreeError> {
        self.set_skip(node, SkipWindow::duration(duration))
    }

    /// Cancel any pending skip window
    pub fn clear_skip(&self, node: NodeId) -> Result<(), TreeError> {
        self.set_skip(node, SkipWindow::None)
    }

    fn set_skip(&self, node: NodeId, window: SkipWindow) -> Result<(), TreeError> {
        self.shared.arena.write().node_mut(node)?.skip = window;
        Ok(())
    }

    /// Flag telling whether `node` should be drawn this frame
    pub fn draw_gate(&self, node: NodeId) -> Result<DrawGate, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.gate.clone()))
    }

    /// Register a tree observer
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&TreeEvent) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(observer)
    }

    /// Remove a tree observer; returns `false` if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Current parent slot
    pub fn parent(&self, node: NodeId) -> Result<Option<ParentRef>, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.parent))
    }

    /// Children in index order
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.children.clone()))
    }

    /// Position among the parent's children, `None` while unattached
    pub fn child_index(&self, node: NodeId) -> Result<Option<usize>, TreeError> {
        self.read(|arena| {
            let entry = arena.node(node)?;
            Ok(entry.parent.map(|_| entry.index))
        })
    }

    /// Attachment state
    pub fn state(&self, node: NodeId) -> Result<AttachState, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.state))
    }

    /// Scene at the top of the parent chain, if any
    pub fn root_scene(&self, node: NodeId) -> Result<Option<SceneId>, TreeError> {
        self.read(|arena| {
            arena.node(node)?;
            Ok(arena.root_scene(node))
        })
    }

    /// Nodes attached directly to `scene`, in index order
    pub fn scene_roots(&self, scene: SceneId) -> Result<Vec<NodeId>, TreeError> {
        self.read(|arena| Ok(arena.scene(scene)?.roots.clone()))
    }

    /// Scene roots in one update bucket, in insertion order
    pub fn scene_bucket(&self, scene: SceneId, class: UpdateClass) -> Result<Vec<NodeId>, TreeError> {
        self.read(|arena| Ok(arena.scene(scene)?.batches.bucket(class).to_vec()))
    }

    /// Installed components in install order
    pub fn components(&self, node: NodeId) -> Result<Vec<ComponentId>, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.components.iter().map(|slot| slot.id).collect()))
    }

    /// Name the component reported at install time
    pub fn component_name(&self, component: ComponentId) -> Result<String, TreeError> {
        self.read(|arena| {
            let owner = *arena
                .components
                .get(component)
                .ok_or(TreeError::UnknownComponent(component))?;
            arena
                .node(owner)?
                .components
                .iter()
                .find(|slot| slot.id == component)
                .map(|slot| slot.name.clone())
                .ok_or(TreeError::UnknownComponent(component))
        })
    }

    /// Node that owns `component`
    pub fn component_owner(&self, component: ComponentId) -> Result<NodeId, TreeError> {
        self.read(|arena| {
            arena
                .components
                .get(component)
                .copied()
                .ok_or(TreeError::UnknownComponent(component))
        })
    }

    /// Readiness flag
    pub fn is_ready(&self, node: NodeId) -> Result<bool, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.ready))
    }

    /// Batch and tendency
    pub fn update_class(&self, node: NodeId) -> Result<UpdateClass, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.class))
    }

    /// Debug name given at creation
    pub fn name(&self, node: NodeId) -> Result<Option<String>, TreeError> {
        self.read(|arena| Ok(arena.node(node)?.name.clone()))
    }

    /// Debug name given to a scene at creation
    pub fn scene_name(&self, scene: SceneId) -> Result<Option<String>, TreeError> {
        self.read(|arena| Ok(arena.scene(scene)?.name.clone()))
    }

    /// Whether `node` still resolves
    pub fn contains(&self, node: NodeId) -> bool {
        self.shared.arena.read().nodes.contains_key(node)
    }

    /// Whether `scene` still resolves
    pub fn contains_scene(&self, scene: SceneId) -> bool {
        self.shared.arena.read().scenes.contains_key(scene)
    }

    /// Live nodes
    pub fn node_count(&self) -> usize {
        self.shared.arena.read().nodes.len()
    }

    /// Live scenes
    pub fn scene_count(&self) -> usize {
        self.shared.arena.read().scenes.len()
    }

    /// Number of node ancestors; 0 for an unattached node or a scene root
    pub fn depth(&self, node: NodeId) -> Result<usize, TreeError> {
        self.read(|arena| {
            let mut depth = 0;
            let mut current = arena.node(node)?;
            while let Some(ParentRef::Node(parent)) = current.parent {
                depth += 1;
                current = arena.node(parent)?;
            }
            Ok(depth)
        })
    }
}

impl fmt::Debug for SceneTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.shared.arena.read();
        f.debug_struct("SceneTree")
            .field("nodes", &arena.nodes.len())
            .field("scenes", &arena.scenes.len())
            .field("components", &arena.components.len())
            .field("observers", &self.shared.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::filter::{DenyComponents, Leaf, SceneRootOnly};
    use crate::scene::node::{HookError, UpdateContext};

    struct Tag(&'static str);

    impl FunctionalComponent for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn update(&mut self, _ctx: &UpdateContext<'_>) -> Result<(), HookError> {
            Ok(())
        }
    }

    fn recorder(tree: &SceneTree) -> Arc<Mutex<Vec<TreeEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        tree.subscribe(move |event| sink.lock().push(event.clone()));
        log
    }

    #[test]
    fn test_child_indices_stay_dense() {
        let tree = SceneTree::with_batch_count(2);
        let parent = tree.create_node(NodeOptions::new());
        let kids: Vec<NodeId> = (0..4).map(|_| tree.create_node(NodeOptions::new())).collect();
        for &kid in &kids {
            tree.attach_to_node(kid, parent).unwrap();
        }

        tree.detach(kids[1]).unwrap();

        assert_eq!(tree.children(parent).unwrap(), vec![kids[0], kids[2], kids[3]]);
        assert_eq!(tree.child_index(kids[0]).unwrap(), Some(0));
        assert_eq!(tree.child_index(kids[2]).unwrap(), Some(1));
        assert_eq!(tree.child_index(kids[3]).unwrap(), Some(2));
        assert_eq!(tree.child_index(kids[1]).unwrap(), None);
        assert_eq!(tree.state(kids[1]).unwrap(), AttachState::Unattached);
    }

    #[test]
    fn test_concurrent_detaches_keep_indices_dense() {
        let tree = SceneTree::with_batch_count(1);
        let parent = tree.create_node(NodeOptions::new());
        let kids: Vec<NodeId> = (0..16).map(|_| tree.create_node(NodeOptions::new())).collect();
        for &kid in &kids {
            tree.attach_to_node(kid, parent).unwrap();
        }

        let start = Arc::new(std::sync::Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let tree = tree.clone();
                let start = Arc::clone(&start);
                let mine = [kids[2 * t + 1], kids[2 * t + 9]];
                std::thread::spawn(move || {
                    start.wait();
                    for kid in mine {
                        tree.detach(kid).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let expected: Vec<NodeId> = kids.iter().copied().step_by(2).collect();
        assert_eq!(tree.children(parent).unwrap(), expected);
        for (index, &kid) in expected.iter().enumerate() {
            assert_eq!(tree.child_index(kid).unwrap(), Some(index));
        }
        for &kid in kids.iter().skip(1).step_by(2) {
            assert_eq!(tree.child_index(kid).unwrap(), None);
            assert_eq!(tree.state(kid).unwrap(), AttachState::Unattached);
        }
    }

    #[test]
    fn test_attach_twice_is_rejected_without_mutation() {
        let tree = SceneTree::with_batch_count(1);
        let a = tree.create_node(NodeOptions::new());
        let b = tree.create_node(NodeOptions::new());
        let child = tree.create_node(NodeOptions::new());
        tree.attach_to_node(child, a).unwrap();

        let err = tree.attach_to_node(child, b).unwrap_err();
        assert_eq!(
            err,
            TreeError::AlreadyAttached {
                node: child,
                parent: ParentRef::Node(a)
            }
        );
        assert!(tree.children(b).unwrap().is_empty());
        assert_eq!(tree.parent(child).unwrap(), Some(ParentRef::Node(a)));
    }

    #[test]
    fn test_cycles_are_refused() {
        let tree = SceneTree::with_batch_count(1);
        let a = tree.create_node(NodeOptions::new());
        let b = tree.create_node(NodeOptions::new());
        let c = tree.create_node(NodeOptions::new());
        tree.attach_to_node(b, a).unwrap();
        tree.attach_to_node(c, b).unwrap();

        assert_eq!(
            tree.attach_to_node(a, c).unwrap_err(),
            TreeError::CyclicAttachment { child: a, parent: c }
        );
        assert_eq!(
            tree.attach_to_node(a, a).unwrap_err(),
            TreeError::CyclicAttachment { child: a, parent: a }
        );
        assert_eq!(tree.parent(a).unwrap(), None);
    }

    #[test]
    fn test_detach_unattached_node() {
        let tree = SceneTree::with_batch_count(1);
        let node = tree.create_node(NodeOptions::new());
        assert_eq!(tree.detach(node).unwrap_err(), TreeError::NotAttached(node));
    }

    #[test]
    fn test_filters_veto_in_order() {
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let root_only = tree.create_node(NodeOptions::new().with_filter(SceneRootOnly));
        let leaf = tree.create_node(NodeOptions::new().with_filter(Leaf));
        let plain = tree.create_node(NodeOptions::new());

        let err = tree.attach_to_node(root_only, plain).unwrap_err();
        assert!(matches!(
            err,
            TreeError::Rejected { subject: TreeEntity::Node(n), other: TreeEntity::Node(p), .. }
                if n == root_only && p == plain
        ));
        assert_eq!(tree.state(root_only).unwrap(), AttachState::Unattached);
        tree.attach_to_scene(root_only, scene).unwrap();

        let err = tree.attach_to_node(plain, leaf).unwrap_err();
        assert!(matches!(err, TreeError::Rejected { subject: TreeEntity::Node(n), .. } if n == leaf));
        assert!(tree.children(leaf).unwrap().is_empty());
    }

    #[test]
    fn test_detach_subtree_leaves_scene() {
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let a = tree.create_node(NodeOptions::new());
        let b = tree.create_node(NodeOptions::new());
        let c = tree.create_node(NodeOptions::new());
        tree.attach_to_scene(a, scene).unwrap();
        tree.attach_to_node(b, a).unwrap();
        tree.attach_to_node(c, b).unwrap();
        assert_eq!(tree.root_scene(c).unwrap(), Some(scene));
        assert_eq!(tree.depth(c).unwrap(), 2);

        let events = recorder(&tree);
        tree.detach(a).unwrap();

        assert_eq!(tree.root_scene(a).unwrap(), None);
        assert_eq!(tree.root_scene(c).unwrap(), None);
        assert_eq!(tree.parent(c).unwrap(), Some(ParentRef::Node(b)));
        assert!(tree.scene_roots(scene).unwrap().is_empty());
        assert!(tree.scene_bucket(scene, UpdateClass::default()).unwrap().is_empty());

        let events = events.lock();
        assert_eq!(
            events[0],
            TreeEvent::Detached {
                node: a,
                parent: ParentRef::Scene(scene)
            }
        );
        let cleared: Vec<NodeId> = events[1..]
            .iter()
            .filter_map(|event| match event {
                TreeEvent::SceneChanged { node, scene: None } => Some(*node),
                _ => None,
            })
            .collect();
        assert_eq!(cleared, vec![a, b, c]);
    }

    #[test]
    fn test_observer_sees_committed_state_and_may_reenter() {
        let tree = SceneTree::with_batch_count(1);
        let parent = tree.create_node(NodeOptions::new());
        let child = tree.create_node(NodeOptions::new());
        let seen = Arc::new(Mutex::new(None));

        let reader = tree.clone();
        let slot = Arc::clone(&seen);
        tree.subscribe(move |event| {
            if let TreeEvent::Attached { node, .. } = event {
                *slot.lock() = Some(reader.parent(*node).unwrap());
            }
        });

        tree.attach_to_node(child, parent).unwrap();
        assert_eq!(*seen.lock(), Some(Some(ParentRef::Node(parent))));
    }

    #[test]
    fn test_dispose_cascades_children_first() {
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let root = tree.create_node(NodeOptions::new());
        let kid = tree.create_node(NodeOptions::new());
        let grandkid = tree.create_node(NodeOptions::new());
        tree.attach_to_scene(root, scene).unwrap();
        tree.attach_to_node(kid, root).unwrap();
        tree.attach_to_node(grandkid, kid).unwrap();
        let component = tree.install_component(kid, Tag("tag")).unwrap();

        let events = recorder(&tree);
        tree.dispose_node(root).unwrap();

        let tail: Vec<TreeEvent> = events
            .lock()
            .iter()
            .filter(|event| matches!(event, TreeEvent::Disposed(_) | TreeEvent::ComponentUninstalled { .. }))
            .cloned()
            .collect();
        assert_eq!(
            tail,
            vec![
                TreeEvent::Disposed(grandkid),
                TreeEvent::ComponentUninstalled { node: kid, component },
                TreeEvent::Disposed(kid),
                TreeEvent::Disposed(root),
            ]
        );
        assert_eq!(tree.node_count(), 0);
        assert!(tree.scene_roots(scene).unwrap().is_empty());
        assert_eq!(tree.component_owner(component).unwrap_err(), TreeError::UnknownComponent(component));
        assert_eq!(tree.state(root).unwrap_err(), TreeError::UnknownNode(root));
    }

    #[test]
    fn test_component_install_filters() {
        let tree = SceneTree::with_batch_count(1);
        let node = tree.create_node(NodeOptions::new().with_filter(DenyComponents::new(["audio"])));

        let err = tree.install_component(node, Tag("audio")).unwrap_err();
        assert!(matches!(err, TreeError::Rejected { other: TreeEntity::Component(ref name), .. } if name == "audio"));
        assert!(tree.components(node).unwrap().is_empty());

        let first = tree.install_component(node, Tag("physics")).unwrap();
        let second = tree.install_component(node, Tag("ai")).unwrap();
        assert_eq!(tree.components(node).unwrap(), vec![first, second]);
        assert_eq!(tree.component_name(second).unwrap(), "ai");
    }

    struct Introspect {
        tree: SceneTree,
        seen: Arc<Mutex<Vec<ComponentId>>>,
    }

    impl FunctionalComponent for Introspect {
        fn name(&self) -> &str {
            "introspect"
        }

        fn on_installed(&mut self, owner: NodeId, id: ComponentId) {
            let installed = self.tree.components(owner).unwrap();
            assert!(installed.contains(&id));
            assert_eq!(self.tree.component_owner(id).unwrap(), owner);
            *self.seen.lock() = installed;
        }

        fn update(&mut self, _ctx: &UpdateContext<'_>) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn test_install_hook_may_query_tree() {
        let tree = SceneTree::with_batch_count(1);
        let node = tree.create_node(NodeOptions::new());
        let first = tree.install_component(node, Tag("first")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let events = recorder(&tree);
        let id = tree
            .install_component(
                node,
                Introspect {
                    tree: tree.clone(),
                    seen: Arc::clone(&seen),
                },
            )
            .unwrap();

        assert_eq!(*seen.lock(), vec![first, id]);
        assert_eq!(
            *events.lock(),
            vec![TreeEvent::ComponentInstalled { node, component: id }]
        );
    }

    #[test]
    fn test_uninstall_checks_owner() {
        let tree = SceneTree::with_batch_count(1);
        let a = tree.create_node(NodeOptions::new());
        let b = tree.create_node(NodeOptions::new());
        let component = tree.install_component(a, Tag("tag")).unwrap();

        assert_eq!(
            tree.uninstall_component(b, component).unwrap_err(),
            TreeError::NotOwner { node: b, component }
        );
        tree.uninstall_component(a, component).unwrap();
        assert_eq!(
            tree.uninstall_component(a, component).unwrap_err(),
            TreeError::UnknownComponent(component)
        );
    }

    #[test]
    fn test_dispose_scene_detaches_roots() {
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new().named("level"));
        let root = tree.create_node(NodeOptions::new());
        tree.attach_to_scene(root, scene).unwrap();

        tree.dispose_scene(scene).unwrap();

        assert!(!tree.contains_scene(scene));
        assert!(tree.contains(root));
        assert_eq!(tree.parent(root).unwrap(), None);
        assert_eq!(tree.dispose_scene(scene).unwrap_err(), TreeError::UnknownScene(scene));
    }

    #[test]
    fn test_update_class_is_clamped_and_tracked() {
        let tree = SceneTree::with_batch_count(3);
        let scene = tree.create_scene(SceneOptions::new());
        let node = tree.create_node(NodeOptions::new().with_class(UpdateClass::sequential(9)));
        assert_eq!(tree.update_class(node).unwrap(), UpdateClass::sequential(2));
        tree.attach_to_scene(node, scene).unwrap();

        tree.set_update_class(node, UpdateClass::concurrent(0)).unwrap();
        assert!(tree.scene_bucket(scene, UpdateClass::sequential(2)).unwrap().is_empty());
        assert_eq!(tree.scene_bucket(scene, UpdateClass::concurrent(0)).unwrap(), vec![node]);
    }

    #[test]
    fn test_not_ready_closes_gate() {
        let tree = SceneTree::with_batch_count(1);
        let node = tree.create_node(NodeOptions::new());
        let gate = tree.draw_gate(node).unwrap();
        gate.set(true);

        let events = recorder(&tree);
        tree.set_ready(node, false).unwrap();
        tree.set_ready(node, false).unwrap();

        assert!(!gate.is_open());
        assert_eq!(*events.lock(), vec![TreeEvent::ReadinessChanged { node, ready: false }]);
    }
}
