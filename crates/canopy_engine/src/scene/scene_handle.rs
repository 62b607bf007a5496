//! Host-facing scene handle

use crate::core::RuntimeContext;
use crate::foundation::collections::{NodeId, SceneId};
use crate::scene::error::TreeError;
use crate::scene::scheduler::{run_frame, FrameError, FrameReport, FrameStamp};
use crate::scene::tree::{SceneOptions, SceneTree};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct FrameClock {
    elapsed: Duration,
    frames: u64,
}

/// A scene root plus the clock that drives its frames
///
/// Frames of one scene never overlap: [`advance_frame`](Self::advance_frame)
/// holds the scene's frame gate for the whole plan-and-run cycle. Dropping the
/// handle disposes the scene, leaving its former roots unattached.
pub struct Scene {
    id: SceneId,
    tree: SceneTree,
    ctx: Arc<RuntimeContext>,
    clock: Mutex<FrameClock>,
}

impl Scene {
    /// Create a new scene in `tree`
    pub fn new(tree: &SceneTree, ctx: &Arc<RuntimeContext>, options: SceneOptions) -> Self {
        let id = tree.create_scene(options);
        Self {
            id,
            tree: tree.clone(),
            ctx: Arc::clone(ctx),
            clock: Mutex::new(FrameClock::default()),
        }
    }

    /// Scene handle in the tree
    pub const fn id(&self) -> SceneId {
        self.id
    }

    /// Tree the scene lives in
    pub const fn tree(&self) -> &SceneTree {
        &self.tree
    }

    /// Attach `node` as the last root of this scene
    pub fn attach(&self, node: NodeId) -> Result<(), TreeError> {
        self.tree.attach_to_scene(node, self.id)
    }

    /// Current root nodes in index order
    pub fn roots(&self) -> Result<Vec<NodeId>, TreeError> {
        self.tree.scene_roots(self.id)
    }

    /// Run one frame: every ready, unskipped node updates once, batch by batch
    pub fn advance_frame(&self, delta: Duration) -> Result<FrameReport, FrameError> {
        let mut clock = self.clock.lock();
        clock.frames += 1;
        clock.elapsed += delta;

        let stamp = FrameStamp {
            scene: self.id,
            delta,
            elapsed: clock.elapsed,
            frame: clock.frames,
        };
        run_frame(&self.tree, self.ctx.pool(), stamp)
    }

    /// Scene time accumulated over all frames
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().elapsed
    }

    /// Frames advanced so far
    pub fn frame_count(&self) -> u64 {
        self.clock.lock().frames
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        if let Err(err) = self.tree.dispose_scene(self.id) {
            log::debug!("Scene {:?} already gone at drop: {err}", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RuntimeConfig;
    use crate::scene::node::{update_fn, NodeOptions};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_frames_accumulate_time() {
        let ctx = RuntimeContext::new(RuntimeConfig::default().with_worker_threads(1)).unwrap();
        let tree = SceneTree::new(&ctx);
        let scene = Scene::new(&tree, &ctx, SceneOptions::new().named("main"));

        let last_frame = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&last_frame);
        let node = tree.create_node(NodeOptions::new().with_behavior(update_fn(move |ctx| {
            seen.store(ctx.frame(), Ordering::SeqCst);
            Ok(true)
        })));
        scene.attach(node).unwrap();

        for _ in 0..3 {
            scene.advance_frame(Duration::from_millis(10)).unwrap();
        }
        assert_eq!(scene.frame_count(), 3);
        assert_eq!(scene.elapsed(), Duration::from_millis(30));
        assert_eq!(last_frame.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_drop_disposes_scene() {
        let ctx = RuntimeContext::new(RuntimeConfig::default().with_worker_threads(1)).unwrap();
        let tree = SceneTree::new(&ctx);
        let scene = Scene::new(&tree, &ctx, SceneOptions::new());
        let id = scene.id();
        let node = tree.create_node(NodeOptions::new());
        scene.attach(node).unwrap();

        drop(scene);
        assert!(!tree.contains_scene(id));
        assert_eq!(tree.parent(node).unwrap(), None);
    }
}
