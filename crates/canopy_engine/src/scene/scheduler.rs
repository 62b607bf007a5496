//! Frame update scheduler
//!
//! A frame runs in two phases. Planning holds the tree's write lock just long
//! enough to walk the scene: it evaluates readiness and skip windows, writes
//! draw gates, and snapshots the behavior and component handles of every node
//! that will update. Execution then runs that snapshot with no tree lock held,
//! so hooks are free to attach, detach or dispose nodes; such changes take
//! effect from the next frame.
//!
//! Batches run in ascending ordinal order. Within a batch the sequential nodes
//! run first, one at a time, then the concurrent nodes are fanned out on the
//! worker pool and joined. Children are grouped into batches the same way
//! under each parent. When any update in a batch fails, the rest of that batch
//! still settles, the failures are reported together, and later batches are
//! not started.

use crate::foundation::collections::{ComponentId, NodeId, SceneId};
use crate::foundation::pool::{run_guarded, WorkerPool};
use crate::scene::batch::{group_by_batch, BatchGroup};
use crate::scene::component::ComponentSlot;
use crate::scene::error::TreeError;
use crate::scene::node::{SharedBehavior, UpdateContext};
use crate::scene::tree::{Arena, SceneTree};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One failed node or component update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// Node being updated (the owner, for a component failure)
    pub node: NodeId,
    /// Failing component, `None` when the node's own hook failed
    pub component: Option<ComponentId>,
    /// Error or panic message
    pub message: String,
    /// Whether the hook panicked rather than returning an error
    pub panicked: bool,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.panicked { "panicked" } else { "failed" };
        match self.component {
            Some(component) => write!(f, "component {component:?} of node {:?} {verb}: {}", self.node, self.message),
            None => write!(f, "node {:?} {verb}: {}", self.node, self.message),
        }
    }
}

/// Errors returned by [`Scene::advance_frame`](crate::scene::Scene::advance_frame)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// At least one update in `batch` failed; later batches did not run
    #[error("Frame {frame}: {} update(s) failed in batch {batch}", failures.len())]
    Batch {
        /// Frame index
        frame: u64,
        /// Failing batch ordinal
        batch: u8,
        /// Every failure of the batch, in completion order
        failures: Vec<NodeFailure>,
    },

    /// The scene no longer exists in its tree
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl FrameError {
    /// Failures carried by a batch error
    pub fn failures(&self) -> &[NodeFailure] {
        match self {
            Self::Batch { failures, .. } => failures,
            Self::Tree(_) => &[],
        }
    }
}

/// Summary of one successful frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame index, starting at 1
    pub frame: u64,
    /// Nodes visited (hook run, or no hook)
    pub updated: usize,
    /// Nodes left out because of readiness or a skip window
    pub skipped: usize,
    /// Component updates that succeeded
    pub components: usize,
}

/// Frame parameters shared by every hook
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameStamp {
    pub(crate) scene: SceneId,
    pub(crate) delta: Duration,
    pub(crate) elapsed: Duration,
    pub(crate) frame: u64,
}

struct PlannedNode {
    id: NodeId,
    behavior: Option<SharedBehavior>,
    components: Vec<ComponentSlot>,
    children: Vec<PlannedBatch>,
}

struct PlannedBatch {
    batch: u8,
    sequential: Vec<PlannedNode>,
    concurrent: Vec<PlannedNode>,
}

struct FramePlan {
    batches: Vec<PlannedBatch>,
    skipped: usize,
}

fn plan_frame(tree: &SceneTree, scene: SceneId, delta: Duration) -> Result<FramePlan, TreeError> {
    let mut arena = tree.arena_mut();
    let groups = arena
        .scenes
        .get(scene)
        .ok_or(TreeError::UnknownScene(scene))?
        .batches
        .groups();

    let mut skipped = 0;
    let batches = groups
        .into_iter()
        .map(|group| plan_batch(&mut arena, group, delta, &mut skipped))
        .collect();
    Ok(FramePlan { batches, skipped })
}

fn plan_batch(arena: &mut Arena, group: BatchGroup, delta: Duration, skipped: &mut usize) -> PlannedBatch {
    PlannedBatch {
        batch: group.batch,
        sequential: group
            .sequential
            .into_iter()
            .filter_map(|node| plan_node(arena, node, delta, skipped))
            .collect(),
        concurrent: group
            .concurrent
            .into_iter()
            .filter_map(|node| plan_node(arena, node, delta, skipped))
            .collect(),
    }
}

fn plan_node(arena: &mut Arena, node: NodeId, delta: Duration, skipped: &mut usize) -> Option<PlannedNode> {
    let entry = arena.nodes.get_mut(node)?;

    if !entry.ready {
        arena.close_gates(node);
        *skipped += arena.subtree(node).len();
        return None;
    }

    if entry.skip.advance(delta) {
        // Skipping pauses updates only; drawing still follows readiness.
        refresh_gates(arena, node, true);
        *skipped += arena.subtree(node).len();
        return None;
    }

    entry.gate.set(true);
    let behavior = entry.behavior.clone();
    let components = entry.components.clone();
    let children = entry.children.clone();

    let groups = group_by_batch(
        children
            .into_iter()
            .filter_map(|child| arena.nodes.get(child).map(|entry| (child, entry.class))),
    );
    let children = groups
        .into_iter()
        .map(|group| plan_batch(arena, group, delta, skipped))
        .collect();

    Some(PlannedNode {
        id: node,
        behavior,
        components,
        children,
    })
}

/// Open the gate of every node whose ancestors down from `node` are all ready
fn refresh_gates(arena: &Arena, node: NodeId, parent_open: bool) {
    let Some(entry) = arena.nodes.get(node) else {
        return;
    };
    let open = parent_open && entry.ready;
    entry.gate.set(open);
    for &child in &entry.children {
        refresh_gates(arena, child, open);
    }
}

#[derive(Default)]
struct Outcome {
    updated: usize,
    components: usize,
    failures: Vec<NodeFailure>,
}

impl Outcome {
    fn merge(&mut self, other: Self) {
        self.updated += other.updated;
        self.components += other.components;
        self.failures.extend(other.failures);
    }

    fn fail(&mut self, node: NodeId, component: Option<ComponentId>, message: String, panicked: bool) {
        self.failures.push(NodeFailure {
            node,
            component,
            message,
            panicked,
        });
    }
}

fn run_node(tree: &SceneTree, pool: &Arc<WorkerPool>, stamp: FrameStamp, node: PlannedNode) -> Outcome {
    let ctx = UpdateContext {
        tree,
        node: node.id,
        scene: stamp.scene,
        delta: stamp.delta,
        elapsed: stamp.elapsed,
        frame: stamp.frame,
    };
    let mut outcome = Outcome {
        updated: 1,
        ..Outcome::default()
    };

    let proceed = match &node.behavior {
        None => true,
        Some(behavior) => match run_guarded(|| behavior.lock().update(&ctx)) {
            Ok(Ok(proceed)) => proceed,
            Ok(Err(err)) => {
                outcome.fail(node.id, None, err.to_string(), false);
                false
            }
            Err(panic) => {
                outcome.fail(node.id, None, panic.message().to_string(), true);
                false
            }
        },
    };
    if !proceed {
        return outcome;
    }

    for slot in &node.components {
        match run_guarded(|| slot.component.lock().update(&ctx)) {
            Ok(Ok(())) => outcome.components += 1,
            Ok(Err(err)) => outcome.fail(node.id, Some(slot.id), err.to_string(), false),
            Err(panic) => outcome.fail(node.id, Some(slot.id), panic.message().to_string(), true),
        }
    }
    if !outcome.failures.is_empty() {
        return outcome;
    }

    for batch in node.children {
        let result = run_batch(tree, pool, stamp, batch);
        let failed = !result.failures.is_empty();
        outcome.merge(result);
        if failed {
            break;
        }
    }
    outcome
}

fn run_batch(tree: &SceneTree, pool: &Arc<WorkerPool>, stamp: FrameStamp, batch: PlannedBatch) -> Outcome {
    let mut outcome = Outcome::default();

    for node in batch.sequential {
        outcome.merge(run_node(tree, pool, stamp, node));
    }

    if batch.concurrent.is_empty() {
        return outcome;
    }
    let ids: Vec<NodeId> = batch.concurrent.iter().map(|node| node.id).collect();
    let jobs: Vec<_> = batch
        .concurrent
        .into_iter()
        .map(|node| {
            let tree = tree.clone();
            let pool = Arc::clone(pool);
            move || run_node(&tree, &pool, stamp, node)
        })
        .collect();

    for (id, result) in ids.into_iter().zip(pool.scatter(jobs)) {
        match result {
            Ok(result) => outcome.merge(result),
            Err(panic) => outcome.fail(id, None, panic.message().to_string(), true),
        }
    }
    outcome
}

/// Plan and run one frame of `stamp.scene`
pub(crate) fn run_frame(tree: &SceneTree, pool: &Arc<WorkerPool>, stamp: FrameStamp) -> Result<FrameReport, FrameError> {
    let plan = plan_frame(tree, stamp.scene, stamp.delta)?;
    let mut report = FrameReport {
        frame: stamp.frame,
        skipped: plan.skipped,
        ..FrameReport::default()
    };

    for batch in plan.batches {
        let ordinal = batch.batch;
        let outcome = run_batch(tree, pool, stamp, batch);
        report.updated += outcome.updated;
        report.components += outcome.components;

        if !outcome.failures.is_empty() {
            for failure in &outcome.failures {
                log::error!("Frame {}: {failure}", stamp.frame);
            }
            return Err(FrameError::Batch {
                frame: stamp.frame,
                batch: ordinal,
                failures: outcome.failures,
            });
        }
    }

    log::trace!(
        "Frame {} of scene {:?}: {} updated, {} skipped",
        report.frame,
        stamp.scene,
        report.updated,
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::component::FunctionalComponent;
    use crate::scene::node::{update_fn, HookError, NodeOptions, UpdateClass};
    use crate::scene::tree::SceneOptions;
    use parking_lot::Mutex;

    fn stamp(scene: SceneId, frame: u64) -> FrameStamp {
        FrameStamp {
            scene,
            delta: Duration::from_millis(16),
            elapsed: Duration::from_millis(16 * frame),
            frame,
        }
    }

    fn logging_node(tree: &SceneTree, log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, class: UpdateClass) -> NodeId {
        let log = Arc::clone(log);
        tree.create_node(
            NodeOptions::new()
                .with_class(class)
                .with_behavior(update_fn(move |_ctx| {
                    log.lock().push(name);
                    Ok(true)
                })),
        )
    }

    struct Counter(Arc<Mutex<Vec<&'static str>>>, &'static str);

    impl FunctionalComponent for Counter {
        fn name(&self) -> &str {
            self.1
        }

        fn update(&mut self, _ctx: &UpdateContext<'_>) -> Result<(), HookError> {
            self.0.lock().push(self.1);
            Ok(())
        }
    }

    #[test]
    fn test_batches_run_in_ascending_order() {
        let pool = Arc::new(WorkerPool::new(2));
        let tree = SceneTree::with_batch_count(3);
        let scene = tree.create_scene(SceneOptions::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let late = logging_node(&tree, &log, "late", UpdateClass::sequential(2));
        let early = logging_node(&tree, &log, "early", UpdateClass::sequential(0));
        let middle = logging_node(&tree, &log, "middle", UpdateClass::sequential(1));
        for node in [late, early, middle] {
            tree.attach_to_scene(node, scene).unwrap();
        }

        let report = run_frame(&tree, &pool, stamp(scene, 1)).unwrap();
        assert_eq!(*log.lock(), vec!["early", "middle", "late"]);
        assert_eq!(report.updated, 3);
    }

    #[test]
    fn test_components_then_children() {
        let pool = Arc::new(WorkerPool::new(1));
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let parent = logging_node(&tree, &log, "parent", UpdateClass::default());
        let child = logging_node(&tree, &log, "child", UpdateClass::default());
        tree.attach_to_scene(parent, scene).unwrap();
        tree.attach_to_node(child, parent).unwrap();
        tree.install_component(parent, Counter(Arc::clone(&log), "first")).unwrap();
        tree.install_component(parent, Counter(Arc::clone(&log), "second")).unwrap();

        let report = run_frame(&tree, &pool, stamp(scene, 1)).unwrap();
        assert_eq!(*log.lock(), vec!["parent", "first", "second", "child"]);
        assert_eq!(report.components, 2);
    }

    #[test]
    fn test_false_stops_propagation() {
        let pool = Arc::new(WorkerPool::new(1));
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let gate = tree.create_node(NodeOptions::new().with_behavior(update_fn(|_ctx| Ok(false))));
        let child = logging_node(&tree, &log, "child", UpdateClass::default());
        tree.attach_to_scene(gate, scene).unwrap();
        tree.attach_to_node(child, gate).unwrap();

        run_frame(&tree, &pool, stamp(scene, 1)).unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_not_ready_subtree_is_skipped_and_undrawn() {
        let pool = Arc::new(WorkerPool::new(1));
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let root = logging_node(&tree, &log, "root", UpdateClass::default());
        let child = logging_node(&tree, &log, "child", UpdateClass::default());
        tree.attach_to_scene(root, scene).unwrap();
        tree.attach_to_node(child, root).unwrap();

        run_frame(&tree, &pool, stamp(scene, 1)).unwrap();
        assert!(tree.draw_gate(child).unwrap().is_open());

        tree.set_ready(root, false).unwrap();
        let report = run_frame(&tree, &pool, stamp(scene, 2)).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.updated, 0);
        assert!(!tree.draw_gate(child).unwrap().is_open());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_skip_frames_pauses_updates_but_not_drawing() {
        let pool = Arc::new(WorkerPool::new(1));
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let node = logging_node(&tree, &log, "node", UpdateClass::default());
        tree.attach_to_scene(node, scene).unwrap();
        tree.skip_frames(node, 2).unwrap();

        for frame in 1..=3 {
            run_frame(&tree, &pool, stamp(scene, frame)).unwrap();
        }
        assert_eq!(*log.lock(), vec!["node"]);
        assert!(tree.draw_gate(node).unwrap().is_open());
    }

    #[test]
    fn test_failing_batch_stops_later_batches() {
        let pool = Arc::new(WorkerPool::new(2));
        let tree = SceneTree::with_batch_count(2);
        let scene = tree.create_scene(SceneOptions::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let broken = tree.create_node(
            NodeOptions::new().with_behavior(update_fn(|_ctx| Err("boom".into()))),
        );
        let sibling = logging_node(&tree, &log, "sibling", UpdateClass::sequential(0));
        let later = logging_node(&tree, &log, "later", UpdateClass::sequential(1));
        for node in [broken, sibling, later] {
            tree.attach_to_scene(node, scene).unwrap();
        }

        let err = run_frame(&tree, &pool, stamp(scene, 7)).unwrap_err();
        match err {
            FrameError::Batch { frame, batch, failures } => {
                assert_eq!(frame, 7);
                assert_eq!(batch, 0);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].node, broken);
                assert_eq!(failures[0].message, "boom");
                assert!(!failures[0].panicked);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock(), vec!["sibling"]);
    }

    #[test]
    fn test_panicking_hook_is_reported() {
        let pool = Arc::new(WorkerPool::new(2));
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let node = tree.create_node(
            NodeOptions::new()
                .with_class(UpdateClass::concurrent(0))
                .with_behavior(update_fn(|_ctx| panic!("hook exploded"))),
        );
        tree.attach_to_scene(node, scene).unwrap();

        let err = run_frame(&tree, &pool, stamp(scene, 1)).unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert!(err.failures()[0].panicked);
        assert_eq!(err.failures()[0].message, "hook exploded");
    }

    #[test]
    fn test_hook_may_mutate_tree_mid_frame() {
        let pool = Arc::new(WorkerPool::new(1));
        let tree = SceneTree::with_batch_count(1);
        let scene = tree.create_scene(SceneOptions::new());
        let spawned = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&spawned);
        let spawner = tree.create_node(NodeOptions::new().with_behavior(update_fn(move |ctx| {
            let mut slot = slot.lock();
            if slot.is_none() {
                let child = ctx.tree().create_node(NodeOptions::new());
                ctx.tree().attach_to_node(child, ctx.node())?;
                *slot = Some(child);
            }
            Ok(true)
        })));
        tree.attach_to_scene(spawner, scene).unwrap();

        let first = run_frame(&tree, &pool, stamp(scene, 1)).unwrap();
        assert_eq!(first.updated, 1);
        let second = run_frame(&tree, &pool, stamp(scene, 2)).unwrap();
        assert_eq!(second.updated, 2);
    }
}
